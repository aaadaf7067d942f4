//! KYC: document type, ID uploads, liveness recording and PIN creation.

use std::time::Duration;

use super::pin::PinEntry;
use super::{FlowContext, FlowError, FlowRecorder, Step, clicked};
use crate::actions::liveness::{ADVANCE_CAPTIONS, LivenessTimings, READY_CAPTIONS, record_liveness};
use crate::actions::upload::{open_upload, submit_upload, upload_to_section};
use crate::actions::{
    ActionTarget, AriaRole, ClickPlan, CodeIntent, LocatorResolver, RetryPolicy, TextMatcher,
    click_button, click_element, click_target,
};
use crate::driver::PageDriver;
use crate::media::UserMedia;

pub const FRONT_SECTION: &str = "ID Front";
pub const BACK_SECTION: &str = "ID Back";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KycTimings {
    pub prompt_timeout: Duration,
    pub section_timeout: Duration,
    pub upload_submit_timeout: Duration,
    pub liveness: LivenessTimings,
    pub liveness_policy: RetryPolicy,
    pub liveness_submit_timeout: Duration,
    pub pin: PinEntry,
}

impl Default for KycTimings {
    fn default() -> Self {
        KycTimings {
            prompt_timeout: Duration::from_secs(5),
            section_timeout: Duration::from_secs(20),
            upload_submit_timeout: Duration::from_secs(10),
            liveness: LivenessTimings::default(),
            liveness_policy: RetryPolicy::once_with_recovery(Duration::from_secs(60)),
            liveness_submit_timeout: Duration::from_secs(20),
            pin: PinEntry::default(),
        }
    }
}

fn post_upload_continue(budget: Duration) -> ActionTarget {
    ActionTarget::builder("post-upload continue")
        .budget(budget)
        .role(AriaRole::Button, TextMatcher::regex("(?i)continue|submit"))
        .build()
}

async fn ready(page: &dyn PageDriver, budget: Duration) -> Result<(), FlowError> {
    clicked(
        click_button(page, &READY_CAPTIONS, budget).await,
        "I'm ready",
        budget,
    )
}

/// Submit the liveness recording once its button enables.
async fn submit_liveness(page: &dyn PageDriver, budget: Duration) -> Result<(), FlowError> {
    let target = ActionTarget::button(&ADVANCE_CAPTIONS).budget(budget).build();
    let resolved = LocatorResolver::new(page).resolve(&target).await?;
    click_element(
        page,
        &resolved.element,
        target.description(),
        &ClickPlan::gated_submit().with_rounds(3),
    )
    .await?;
    Ok(())
}

/// Run KYC from the first "I'm ready" through PIN creation.
///
/// The liveness recording is an optional step: a recording that never
/// advances is reported as skipped and the flow moves on to submit. PIN
/// creation is optional too, since an auto-advancing keypad leaves nothing to
/// verify; the "verification submitted" assertion after this flow decides.
pub async fn run_kyc(
    ctx: &FlowContext<'_>,
    page: &dyn PageDriver,
    recorder: &mut FlowRecorder,
    media: &UserMedia,
    timings: &KycTimings,
) -> Result<(), FlowError> {
    let prompt = timings.prompt_timeout;

    recorder
        .run(Step::optional("first I'm ready"), ready(page, prompt))
        .await?;
    recorder
        .run(Step::optional("ID type"), async {
            clicked(
                click_button(page, ctx.config.id_type.captions(), prompt).await,
                "ID type",
                prompt,
            )
        })
        .await?;
    recorder
        .run(Step::optional("upload CTA"), async {
            open_upload(page, prompt).await?;
            Ok(())
        })
        .await?;
    for (step, section, file) in [
        (Step::required("ID front"), FRONT_SECTION, &media.id_front),
        (Step::required("ID back"), BACK_SECTION, &media.id_back),
    ] {
        recorder
            .run(step, async {
                upload_to_section(page, section, file, timings.section_timeout).await?;
                ctx.logger
                    .debug(format!("{section} <- {}", file.display()), Some("kyc"), None);
                Ok(())
            })
            .await?;
    }
    recorder
        .run(Step::required("submit upload"), async {
            submit_upload(page, timings.upload_submit_timeout).await?;
            Ok(())
        })
        .await?;
    recorder
        .run(Step::optional("post-upload continue"), async {
            click_target(page, &post_upload_continue(prompt), &ClickPlan::default()).await?;
            Ok(())
        })
        .await?;
    recorder
        .run(Step::optional("second I'm ready"), ready(page, prompt))
        .await?;
    recorder
        .run(Step::optional("liveness recording"), async {
            let outcome =
                record_liveness(page, &timings.liveness, &timings.liveness_policy).await?;
            ctx.logger.info(
                format!("liveness recorded after {} attempt(s)", outcome.attempts),
                Some("kyc"),
                None,
            );
            Ok(())
        })
        .await?;
    recorder
        .run(
            Step::optional("liveness submit"),
            submit_liveness(page, timings.liveness_submit_timeout),
        )
        .await?;
    recorder
        .run(Step::optional("create PIN"), async {
            timings
                .pin
                .submit(page, CodeIntent::CreatePin, &ctx.config.default_pin)
                .await?;
            Ok(())
        })
        .await?;
    recorder
        .run(Step::optional("final continue"), async {
            timings.pin.follow_up(page, CodeIntent::CreatePin).await?;
            Ok(())
        })
        .await?;
    Ok(())
}
