//! One-time passwords: reading the newest code from the admin OTP list and
//! typing it into the app.

use std::time::Duration;

use regex::Regex;

use super::{FlowContext, FlowError, ScopedSession, SessionSpec};
use crate::actions::{
    ActionTarget, AriaRole, ClickPlan, CodeEntryEngine, CodeEntryState, CodeIntent,
    LocatorResolver, TextMatcher, WidgetTargets, click_target,
};
use crate::driver::PageDriver;

pub const LATEST_ROW_LINK: &str = "#result_list tbody tr th.field-user a";
pub const PIN_INPUT_SELECTOR: &str = r#"input#id_pin, input[name="pin"]"#;
pub const OTP_PROBE_TIMEOUT: Duration = Duration::from_millis(2_500);

/// First standalone 4 to 8 digit token in `text`.
pub fn extract_otp_from_text(text: &str) -> Option<String> {
    Regex::new(r"\b(\d{4,8})\b")
        .ok()?
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn code_field(budget: Duration) -> ActionTarget {
    ActionTarget::builder("OTP detail field")
        .budget(budget)
        .css(PIN_INPUT_SELECTOR)
        .role(AriaRole::Textbox, TextMatcher::regex("(?i)otp|code|token|pin"))
        .build()
}

/// Open the newest OTP row on an admin page and read its code.
pub async fn read_latest_otp(
    page: &dyn PageDriver,
    list_url: &str,
    timeout: Duration,
) -> Result<String, FlowError> {
    page.goto(list_url).await?;
    let row = ActionTarget::builder("latest OTP row")
        .budget(timeout)
        .css(LATEST_ROW_LINK)
        .build();
    click_target(page, &row, &ClickPlan::default().without_gate()).await?;

    match LocatorResolver::new(page).resolve(&code_field(timeout)).await {
        Ok(field) => {
            let value = page.input_value(&field.element).await?;
            let value = value.trim();
            if !value.is_empty() {
                return Ok(value.to_string());
            }
        }
        Err(err) => log::debug!("no OTP field on detail page: {err}"),
    }

    let body = page.body_text().await?;
    extract_otp_from_text(&body).ok_or(FlowError::OtpNotFound)
}

/// Fetch the newest OTP in a separate admin browser.
pub async fn fetch_admin_otp(ctx: &FlowContext<'_>) -> Result<String, FlowError> {
    let list_url = ctx.config.otp_list_url();
    let timeout = Duration::from_millis(ctx.config.otp_admin_timeout_ms);
    ctx.logger
        .info(format!("opening admin OTP list {list_url}"), Some("otp"), None);
    let code = ScopedSession::run(ctx.launcher, &SessionSpec::admin(ctx.config), |page| {
        let list_url = list_url.clone();
        async move { read_latest_otp(page.as_ref(), &list_url, timeout).await }
    })
    .await?;
    ctx.logger.debug("admin OTP retrieved", Some("otp"), None);
    Ok(code)
}

/// Whether the app is asking for an OTP right now.
pub async fn is_otp_required(page: &dyn PageDriver, custom_selector: Option<&str>) -> bool {
    let mut probe = ActionTarget::builder("OTP prompt").budget(OTP_PROBE_TIMEOUT);
    probe = match custom_selector {
        Some(selector) => probe.css(selector),
        None => probe
            .role(AriaRole::Textbox, TextMatcher::contains("otp"))
            .attribute("placeholder", TextMatcher::regex("(?i)otp|one[- ]time|code")),
    };
    LocatorResolver::new(page)
        .wait_for_any(&[&probe.build()], OTP_PROBE_TIMEOUT)
        .await
        .is_some()
}

pub async fn enter_otp(
    page: &dyn PageDriver,
    code: &str,
    custom_selector: Option<&str>,
) -> Result<CodeEntryState, FlowError> {
    let digits: String = code.chars().filter(char::is_ascii_digit).collect();
    let targets = WidgetTargets::for_intent(CodeIntent::Otp, custom_selector);
    Ok(CodeEntryEngine::default().enter(page, &digits, &targets).await?)
}
