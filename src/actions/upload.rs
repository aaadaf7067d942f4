//! KYC document upload.
//!
//! Each ID side sits in its own section: a heading ("ID Front", "ID Back")
//! followed by a `div[tabindex="0"]` dropzone and a hidden file input.

use std::path::Path;
use std::time::Duration;

use super::clicker::{ClickPlan, click_element, click_target};
use super::locator::LocatorResolver;
use super::target::{ActionTarget, AriaRole, LocatorStrategy, TextMatcher};
use crate::driver::{ClickMethod, ElementHandle, PageDriver};
use crate::error::ActionError;

pub const FILE_INPUT_SELECTOR: &str = r#"input[type="file"]"#;
pub const DROPZONE_SELECTOR: &str = r#"div[tabindex="0"]"#;

pub fn section_heading(label: &str, budget: Duration) -> ActionTarget {
    ActionTarget::builder(format!("{label} heading"))
        .budget(budget)
        .role(AriaRole::Heading, TextMatcher::exact(label))
        .text(TextMatcher::exact(label))
        .build()
}

/// The card that opens the upload screen.
pub fn upload_cta(budget: Duration) -> ActionTarget {
    ActionTarget::builder("Upload card")
        .budget(budget)
        .within(DROPZONE_SELECTOR, "h1", TextMatcher::contains("Upload"))
        .role(AriaRole::Button, TextMatcher::regex("(?i)upload"))
        .build()
}

pub async fn open_upload(page: &dyn PageDriver, budget: Duration) -> Result<ClickMethod, ActionError> {
    click_target(page, &upload_cta(budget), &ClickPlan::default()).await
}

/// Attach `file` to the section headed `label`.
///
/// The dropzone after the heading is clicked first since some builds only
/// mount the file input on interaction. The input is the first file input
/// after the heading, else the newest one on the page.
pub async fn upload_to_section(
    page: &dyn PageDriver,
    label: &str,
    file: &Path,
    budget: Duration,
) -> Result<ElementHandle, ActionError> {
    let heading = LocatorResolver::new(page)
        .resolve(&section_heading(label, budget))
        .await?;

    match page.query_following(&heading.element, DROPZONE_SELECTOR).await {
        Ok(zones) => {
            if let Some(zone) = zones.first() {
                if let Err(err) = page.click(zone, ClickMethod::Forced).await {
                    log::debug!("{label} dropzone click failed: {err}");
                }
            }
        }
        Err(err) => log::debug!("{label} dropzone lookup failed: {err}"),
    }

    let following = page
        .query_following(&heading.element, FILE_INPUT_SELECTOR)
        .await
        .unwrap_or_default();
    let input = match following.into_iter().next() {
        Some(input) => input,
        None => page
            .query(&LocatorStrategy::css(FILE_INPUT_SELECTOR))
            .await?
            .pop()
            .ok_or_else(|| ActionError::ElementNotFound {
                target: format!("{label} file input"),
                strategies: 2,
                budget,
            })?,
    };

    page.set_input_files(&input, &[file.to_path_buf()]).await?;
    log::debug!("attached {} to {label}", file.display());
    Ok(input)
}

/// Final "Upload" button, only pressed once it is clickable.
pub async fn submit_upload(page: &dyn PageDriver, budget: Duration) -> Result<ClickMethod, ActionError> {
    let target = ActionTarget::button(&["Upload", "Submit"]).budget(budget).build();
    let resolved = LocatorResolver::new(page).resolve(&target).await?;
    click_element(
        page,
        &resolved.element,
        target.description(),
        &ClickPlan::gated_submit(),
    )
    .await
}
