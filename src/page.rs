//! Chromiumoxide-backed [`PageDriver`].
//!
//! Element queries run through the bundled `window.__harness` helpers, which
//! tag every match with a `data-harness-ref` attribute. Native input (mouse,
//! keyboard, file chooser) goes through CDP on the element found by that
//! attribute.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::browser::{GrantPermissionsParams, PermissionType};
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType, InsertTextParams, MouseButton,
};
use chromiumoxide::element::Element;
use chromiumoxide::page::Page as ChromiumPage;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::actions::target::LocatorStrategy;
use crate::dom_scripts::helper_call;
use crate::driver::{ClickMethod, ElementHandle, ElementState, PageDriver, ValueDispatch};
use crate::error::DriverError;

fn cdp_error(err: impl std::fmt::Display) -> DriverError {
    let message = err.to_string();
    if message.contains("detached:") {
        DriverError::Detached(message)
    } else {
        DriverError::Command(message)
    }
}

fn arg(value: impl serde::Serialize) -> Result<String, DriverError> {
    serde_json::to_string(&value).map_err(|err| DriverError::Script(err.to_string()))
}

#[derive(Debug, Deserialize)]
struct Point {
    x: f64,
    y: f64,
}

/// A live chromium tab.
#[derive(Debug, Clone)]
pub struct HarnessPage {
    page: ChromiumPage,
}

impl HarnessPage {
    pub fn new(page: ChromiumPage) -> Self {
        HarnessPage { page }
    }

    pub fn inner(&self) -> &ChromiumPage {
        &self.page
    }

    async fn call<T: DeserializeOwned>(&self, call: String) -> Result<T, DriverError> {
        let result = self.page.evaluate(helper_call(&call)).await.map_err(cdp_error)?;
        let value = result.value().cloned().unwrap_or(JsonValue::Null);
        serde_json::from_value(value)
            .map_err(|err| DriverError::Script(format!("{call}: unexpected result: {err}")))
    }

    async fn element(&self, handle: &ElementHandle) -> Result<Element, DriverError> {
        self.page
            .find_element(format!(r#"[data-harness-ref="{}"]"#, handle.token()))
            .await
            .map_err(|_| DriverError::Detached(handle.to_string()))
    }

    async fn mouse_click(&self, at: &Point) -> Result<(), DriverError> {
        for kind in [
            DispatchMouseEventType::MousePressed,
            DispatchMouseEventType::MouseReleased,
        ] {
            let params = DispatchMouseEventParams::builder()
                .r#type(kind)
                .x(at.x)
                .y(at.y)
                .button(MouseButton::Left)
                .click_count(1)
                .build()
                .map_err(DriverError::Command)?;
            self.page.execute(params).await.map_err(cdp_error)?;
        }
        Ok(())
    }

    async fn origin(&self) -> Option<String> {
        let current = self.page.url().await.ok().flatten()?;
        let parsed = url::Url::parse(&current).ok()?;
        match parsed.origin() {
            origin @ url::Origin::Tuple(..) => Some(origin.ascii_serialization()),
            url::Origin::Opaque(_) => None,
        }
    }
}

#[async_trait]
impl PageDriver for HarnessPage {
    async fn query(&self, strategy: &LocatorStrategy) -> Result<Vec<ElementHandle>, DriverError> {
        let refs: Vec<String> = self.call(format!("query({}, null)", arg(strategy)?)).await?;
        Ok(refs.into_iter().map(ElementHandle::new).collect())
    }

    async fn query_within(
        &self,
        scope: &ElementHandle,
        strategy: &LocatorStrategy,
    ) -> Result<Vec<ElementHandle>, DriverError> {
        let refs: Vec<String> = self
            .call(format!("query({}, {})", arg(strategy)?, arg(scope.token())?))
            .await?;
        Ok(refs.into_iter().map(ElementHandle::new).collect())
    }

    async fn query_following(
        &self,
        anchor: &ElementHandle,
        css: &str,
    ) -> Result<Vec<ElementHandle>, DriverError> {
        let refs: Vec<String> = self
            .call(format!("following({}, {})", arg(anchor.token())?, arg(css)?))
            .await?;
        Ok(refs.into_iter().map(ElementHandle::new).collect())
    }

    async fn closest(
        &self,
        element: &ElementHandle,
        css: &str,
    ) -> Result<Option<ElementHandle>, DriverError> {
        let found: Option<String> = self
            .call(format!("closest({}, {})", arg(element.token())?, arg(css)?))
            .await?;
        Ok(found.map(ElementHandle::new))
    }

    async fn element_state(&self, element: &ElementHandle) -> Result<ElementState, DriverError> {
        self.call(format!("state({})", arg(element.token())?)).await
    }

    async fn click(&self, element: &ElementHandle, method: ClickMethod) -> Result<(), DriverError> {
        let token = arg(element.token())?;
        match method {
            ClickMethod::Pointer => {
                let state = self.element_state(element).await?;
                if !(state.visible && state.pointer_events && !state.disabled) {
                    return Err(DriverError::Command(format!("{element} is not actionable")));
                }
                self.element(element)
                    .await?
                    .click()
                    .await
                    .map_err(cdp_error)?;
            }
            ClickMethod::Forced => {
                let center: Point = self.call(format!("center({token})")).await?;
                self.mouse_click(&center).await?;
            }
            ClickMethod::Script => {
                let _: bool = self.call(format!("click({token})")).await?;
            }
            ClickMethod::EnterKey => {
                let handle = self.element(element).await?;
                handle.focus().await.map_err(cdp_error)?;
                handle.press_key("Enter").await.map_err(cdp_error)?;
            }
        }
        Ok(())
    }

    async fn focus(&self, element: &ElementHandle) -> Result<(), DriverError> {
        let _: bool = self.call(format!("focus({})", arg(element.token())?)).await?;
        Ok(())
    }

    async fn blur(&self, element: &ElementHandle) -> Result<(), DriverError> {
        let _: bool = self.call(format!("blur({})", arg(element.token())?)).await?;
        Ok(())
    }

    async fn input_value(&self, element: &ElementHandle) -> Result<String, DriverError> {
        self.call(format!("value({})", arg(element.token())?)).await
    }

    async fn fill(&self, element: &ElementHandle, value: &str) -> Result<(), DriverError> {
        self.select_all(element).await?;
        if value.is_empty() {
            self.element(element)
                .await?
                .press_key("Backspace")
                .await
                .map_err(cdp_error)?;
        } else {
            self.page
                .execute(InsertTextParams::new(value))
                .await
                .map_err(cdp_error)?;
        }
        Ok(())
    }

    async fn type_text(
        &self,
        element: &ElementHandle,
        text: &str,
        delay: Duration,
    ) -> Result<(), DriverError> {
        let handle = self.element(element).await?;
        handle.focus().await.map_err(cdp_error)?;
        let mut buf = [0u8; 4];
        for ch in text.chars() {
            handle
                .type_str(ch.encode_utf8(&mut buf))
                .await
                .map_err(cdp_error)?;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
        Ok(())
    }

    async fn select_all(&self, element: &ElementHandle) -> Result<(), DriverError> {
        let _: bool = self
            .call(format!("selectAll({})", arg(element.token())?))
            .await?;
        Ok(())
    }

    async fn dispatch_value(
        &self,
        element: &ElementHandle,
        value: &str,
        dispatch: ValueDispatch,
    ) -> Result<(), DriverError> {
        let mode = match dispatch {
            ValueDispatch::Whole => "whole",
            ValueDispatch::PerCharacter => "per_character",
        };
        let _: String = self
            .call(format!(
                "setValue({}, {}, {})",
                arg(element.token())?,
                arg(value)?,
                arg(mode)?
            ))
            .await?;
        Ok(())
    }

    async fn set_input_files(
        &self,
        element: &ElementHandle,
        files: &[PathBuf],
    ) -> Result<(), DriverError> {
        let handle = self.element(element).await?;
        let files = files
            .iter()
            .map(|path| path.to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        let params = SetFileInputFilesParams::builder()
            .files(files)
            .backend_node_id(handle.backend_node_id)
            .build()
            .map_err(DriverError::Command)?;
        self.page.execute(params).await.map_err(cdp_error)?;
        Ok(())
    }

    async fn is_checked(&self, element: &ElementHandle) -> Result<bool, DriverError> {
        self.call(format!("checked({})", arg(element.token())?)).await
    }

    async fn select_option(
        &self,
        element: &ElementHandle,
        option: &str,
    ) -> Result<bool, DriverError> {
        self.call(format!(
            "selectOption({}, {})",
            arg(element.token())?,
            arg(option)?
        ))
        .await
    }

    async fn attribute(
        &self,
        element: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, DriverError> {
        self.call(format!("attribute({}, {})", arg(element.token())?, arg(name)?))
            .await
    }

    async fn inner_text(&self, element: &ElementHandle) -> Result<String, DriverError> {
        self.call(format!("text({})", arg(element.token())?)).await
    }

    async fn body_text(&self) -> Result<String, DriverError> {
        self.call("bodyText()".to_string()).await
    }

    async fn goto(&self, url: &str) -> Result<(), DriverError> {
        self.page.goto(url).await.map_err(cdp_error)?;
        Ok(())
    }

    async fn reload(&self) -> Result<(), DriverError> {
        self.page.reload().await.map_err(cdp_error)?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self
            .page
            .url()
            .await
            .map_err(cdp_error)?
            .unwrap_or_default())
    }

    async fn evaluate(&self, script: &str) -> Result<JsonValue, DriverError> {
        let result = self.page.evaluate(script).await.map_err(cdp_error)?;
        Ok(result.value().cloned().unwrap_or(JsonValue::Null))
    }

    async fn grant_media_permissions(&self) -> Result<(), DriverError> {
        let mut builder = GrantPermissionsParams::builder()
            .permission(PermissionType::VideoCapture)
            .permission(PermissionType::AudioCapture);
        if let Some(origin) = self.origin().await {
            builder = builder.origin(origin);
        }
        let params = builder.build().map_err(DriverError::Command)?;
        self.page.execute(params).await.map_err(cdp_error)?;
        Ok(())
    }
}
