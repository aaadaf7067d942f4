//! Liveness video recording.
//!
//! The recording screen has a single round control (`div[tabindex="0"]`
//! wrapping an SVG circle) that starts and stops recording. A cycle is
//! successful once recording stopped and the screen offers a way forward.

use std::time::Duration;

use tokio::time::{Instant, sleep};

use super::clicker::click_button;
use super::locator::LocatorResolver;
use super::retry::{RetryOutcome, RetryPolicy};
use super::target::ActionTarget;
use crate::dom_scripts::CAMERA_FALLBACK_SCRIPT;
use crate::driver::{ClickMethod, PageDriver};
use crate::error::ActionError;

pub const RECORD_CONTROL_SELECTOR: &str = r#"div[tabindex="0"]:has(svg circle)"#;
pub const READY_CAPTIONS: [&str; 3] = ["I'm ready", "I’m ready", "Im ready"];
pub const ADVANCE_CAPTIONS: [&str; 3] = ["Submit", "Finish", "Continue"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessTimings {
    pub record_for: Duration,
    /// Minimum time since start before a failed stop is retried.
    pub min_before_stop_retry: Duration,
    pub advance_timeout: Duration,
    pub control_timeout: Duration,
    pub click_tries: u32,
    pub try_pause: Duration,
}

impl Default for LivenessTimings {
    fn default() -> Self {
        LivenessTimings {
            record_for: Duration::from_secs(4),
            min_before_stop_retry: Duration::from_secs(6),
            advance_timeout: Duration::from_secs(5),
            control_timeout: Duration::from_secs(10),
            click_tries: 6,
            try_pause: Duration::from_millis(300),
        }
    }
}

/// Grant camera/microphone and install a synthetic `getUserMedia` fallback.
pub async fn prepare_camera(page: &dyn PageDriver) {
    if let Err(err) = page.grant_media_permissions().await {
        log::debug!("media permission grant failed: {err}");
    }
    if let Err(err) = page.evaluate(CAMERA_FALLBACK_SCRIPT).await {
        log::debug!("camera fallback install failed: {err}");
    }
}

/// Press the record control; `false` when it never appears or no click lands.
pub async fn press_record_control(page: &dyn PageDriver, timings: &LivenessTimings) -> bool {
    let target = ActionTarget::builder("record control")
        .budget(timings.control_timeout)
        .css(RECORD_CONTROL_SELECTOR)
        .build();
    let control = match LocatorResolver::new(page).resolve(&target).await {
        Ok(found) => found.element,
        Err(err) => {
            log::debug!("record control missing: {err}");
            return false;
        }
    };

    for attempt in 0..timings.click_tries {
        for method in [ClickMethod::Pointer, ClickMethod::Script, ClickMethod::Forced] {
            match page.click(&control, method).await {
                Ok(()) => return true,
                Err(err) => log::debug!("record control {method:?} click {attempt} failed: {err}"),
            }
        }
        sleep(timings.try_pause).await;
    }
    false
}

/// One start, record, stop cycle.
pub async fn record_once(
    page: &dyn PageDriver,
    timings: &LivenessTimings,
) -> Result<bool, ActionError> {
    prepare_camera(page).await;

    let started = Instant::now();
    if !press_record_control(page, timings).await {
        return Ok(false);
    }
    sleep(timings.record_for).await;

    let mut stopped = press_record_control(page, timings).await;
    if !stopped {
        let elapsed = started.elapsed();
        if elapsed < timings.min_before_stop_retry {
            sleep(timings.min_before_stop_retry - elapsed).await;
        }
        stopped = press_record_control(page, timings).await;
    }
    Ok(stopped && advanced(page, timings).await)
}

async fn advanced(page: &dyn PageDriver, timings: &LivenessTimings) -> bool {
    let next = ActionTarget::button(&ADVANCE_CAPTIONS).build();
    LocatorResolver::new(page)
        .wait_for_any(&[&next], timings.advance_timeout)
        .await
        .is_some()
}

/// Reload the screen and get back to the recording checkpoint.
pub async fn recover_recording_screen(page: &dyn PageDriver) -> Result<(), ActionError> {
    page.reload().await?;
    if !click_button(page, &READY_CAPTIONS, Duration::from_secs(10)).await {
        log::debug!("no \"I'm ready\" button after reload");
    }
    Ok(())
}

/// Record with one reload-and-retry.
pub async fn record_liveness(
    page: &dyn PageDriver,
    timings: &LivenessTimings,
    policy: &RetryPolicy,
) -> Result<RetryOutcome, ActionError> {
    policy
        .run_with_recovery(
            |_| record_once(page, timings),
            Some(|| recover_recording_screen(page)),
        )
        .await
        .into_result("liveness recording")
}
