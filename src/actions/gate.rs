//! Clickable-state gate.
//!
//! Buttons in the onboarding app render before they accept input: they fade
//! in, stay `aria-disabled` until a form validates, or sit under an overlay
//! with `pointer-events: none`. The gate polls computed state until the
//! element is interactable.

use std::time::Duration;

use tokio::time::sleep;

use crate::driver::{ElementHandle, ElementState, PageDriver};
use crate::error::ActionError;

pub const MIN_OPACITY: f64 = 0.2;
pub const MIN_EDGE_PX: f64 = 5.0;

/// Readiness predicate over a computed-state snapshot.
pub fn is_clickable(state: &ElementState) -> bool {
    state.visible
        && state.pointer_events
        && state.opacity > MIN_OPACITY
        && state.width > MIN_EDGE_PX
        && state.height > MIN_EDGE_PX
        && !state.disabled
        && !state.aria_disabled
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClickableGate {
    pub poll_interval: Duration,
    pub max_polls: u32,
}

impl Default for ClickableGate {
    fn default() -> Self {
        ClickableGate {
            poll_interval: Duration::from_millis(250),
            max_polls: 30,
        }
    }
}

impl ClickableGate {
    pub fn new(poll_interval: Duration, max_polls: u32) -> Self {
        ClickableGate {
            poll_interval,
            max_polls: max_polls.max(1),
        }
    }

    /// Poll until clickable. Read failures count as not-ready polls.
    pub async fn wait_until_clickable(&self, page: &dyn PageDriver, element: &ElementHandle) -> bool {
        for poll in 0..self.max_polls {
            match page.element_state(element).await {
                Ok(state) if is_clickable(&state) => return true,
                Ok(state) => log::debug!("{element} not clickable on poll {poll}: {state:?}"),
                Err(err) => log::debug!("{element} state read failed on poll {poll}: {err}"),
            }
            if poll + 1 < self.max_polls {
                sleep(self.poll_interval).await;
            }
        }
        false
    }

    pub async fn require_clickable(
        &self,
        page: &dyn PageDriver,
        element: &ElementHandle,
        description: &str,
    ) -> Result<(), ActionError> {
        if self.wait_until_clickable(page, element).await {
            Ok(())
        } else {
            Err(ActionError::NotInteractable {
                target: description.to_string(),
                polls: self.max_polls,
            })
        }
    }
}
