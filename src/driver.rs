//! Page-driver seam between the action layer and a concrete browser.
//!
//! The resilient action layer is written against [`PageDriver`] only. The
//! chromiumoxide-backed implementation lives in [`crate::page`]; tests use an
//! in-memory document double.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::actions::target::LocatorStrategy;
use crate::error::DriverError;

#[cfg(test)]
pub(crate) mod fake;

/// Opaque reference to an element returned by a query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle(String);

impl ElementHandle {
    pub fn new(token: impl Into<String>) -> Self {
        ElementHandle(token.into())
    }

    pub fn token(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Computed interactability snapshot of an element.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementState {
    pub pointer_events: bool,
    pub opacity: f64,
    pub width: f64,
    pub height: f64,
    pub disabled: bool,
    pub aria_disabled: bool,
    pub visible: bool,
}

impl Default for ElementState {
    fn default() -> Self {
        ElementState {
            pointer_events: true,
            opacity: 1.0,
            width: 120.0,
            height: 40.0,
            disabled: false,
            aria_disabled: false,
            visible: true,
        }
    }
}

/// How a click is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickMethod {
    /// Scroll into view and click the element centre with the mouse.
    Pointer,
    /// Mouse click at the bounding-box centre without scrolling or waiting.
    Forced,
    /// `element.click()` in page context.
    Script,
    /// Focus the element and press Enter.
    EnterKey,
}

/// How [`PageDriver::dispatch_value`] writes a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueDispatch {
    /// Native setter for the whole value, then `input` and `change`.
    /// The value is clamped to the field's `maxlength`.
    Whole,
    /// Clear through the native setter, then per character `beforeinput` and
    /// `input`, finishing with `change` and blur.
    PerCharacter,
}

/// Browser page operations required by the action layer.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// All matches for `strategy`, visible elements first, document order otherwise.
    async fn query(&self, strategy: &LocatorStrategy) -> Result<Vec<ElementHandle>, DriverError>;

    /// Matches for `strategy` among the descendants of `scope`.
    async fn query_within(
        &self,
        scope: &ElementHandle,
        strategy: &LocatorStrategy,
    ) -> Result<Vec<ElementHandle>, DriverError>;

    /// Elements matching `css` that follow `anchor` in document order.
    async fn query_following(
        &self,
        anchor: &ElementHandle,
        css: &str,
    ) -> Result<Vec<ElementHandle>, DriverError>;

    /// Nearest ancestor-or-self matching `css`.
    async fn closest(
        &self,
        element: &ElementHandle,
        css: &str,
    ) -> Result<Option<ElementHandle>, DriverError>;

    async fn element_state(&self, element: &ElementHandle) -> Result<ElementState, DriverError>;

    async fn click(&self, element: &ElementHandle, method: ClickMethod) -> Result<(), DriverError>;

    async fn focus(&self, element: &ElementHandle) -> Result<(), DriverError>;

    async fn blur(&self, element: &ElementHandle) -> Result<(), DriverError>;

    async fn input_value(&self, element: &ElementHandle) -> Result<String, DriverError>;

    /// Replace the whole value the way a form-fill helper would.
    async fn fill(&self, element: &ElementHandle, value: &str) -> Result<(), DriverError>;

    /// Native keystrokes with `delay` between keys.
    async fn type_text(
        &self,
        element: &ElementHandle,
        text: &str,
        delay: Duration,
    ) -> Result<(), DriverError>;

    /// Select the field's content with the platform select-all shortcuts.
    async fn select_all(&self, element: &ElementHandle) -> Result<(), DriverError>;

    async fn dispatch_value(
        &self,
        element: &ElementHandle,
        value: &str,
        dispatch: ValueDispatch,
    ) -> Result<(), DriverError>;

    async fn set_input_files(
        &self,
        element: &ElementHandle,
        files: &[PathBuf],
    ) -> Result<(), DriverError>;

    async fn is_checked(&self, element: &ElementHandle) -> Result<bool, DriverError>;

    /// Select an `<option>` by value or label; `false` if none matched.
    async fn select_option(
        &self,
        element: &ElementHandle,
        option: &str,
    ) -> Result<bool, DriverError>;

    async fn attribute(
        &self,
        element: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, DriverError>;

    async fn inner_text(&self, element: &ElementHandle) -> Result<String, DriverError>;

    async fn body_text(&self) -> Result<String, DriverError>;

    async fn goto(&self, url: &str) -> Result<(), DriverError>;

    async fn reload(&self) -> Result<(), DriverError>;

    async fn current_url(&self) -> Result<String, DriverError>;

    async fn evaluate(&self, script: &str) -> Result<JsonValue, DriverError>;

    /// Grant camera and microphone access for the current origin.
    async fn grant_media_permissions(&self) -> Result<(), DriverError>;
}
