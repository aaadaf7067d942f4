//! End-to-end scenarios composed from the flows.
//!
//! Each scenario owns its browsers through [`ScopedSession`], finishes with a
//! terminal assertion on page text, and hands back a [`ScenarioRun`] whose
//! report survives a failed outcome.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::sleep;

use crate::config::HarnessConfig;
use crate::driver::PageDriver;
use crate::flows::cdm::{CdmTimings, verify_user};
use crate::flows::kyc::{KycTimings, run_kyc};
use crate::flows::login::run_login;
use crate::flows::personalise::{PersonaliseTimings, run_personalise, start_earning};
use crate::flows::pin::PinEntry;
use crate::flows::signup::{SignupDetails, generate_phone, run_signup};
use crate::flows::{
    FlowContext, FlowError, FlowRecorder, FlowReport, ScopedSession, SessionRole, SessionSpec,
    Step, expect_page_text,
};
use crate::media::{UserMedia, take_newest};

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error(transparent)]
    Flow(#[from] FlowError),
    #[error("verification failed for {}", .0.join(", "))]
    Unverified(Vec<String>),
}

/// A scenario's step report plus how it ended.
#[derive(Debug)]
pub struct ScenarioRun {
    pub report: FlowReport,
    pub users: Vec<SignupDetails>,
    pub outcome: Result<(), ScenarioError>,
}

impl ScenarioRun {
    pub fn summary(&self) -> ScenarioSummary<'_> {
        ScenarioSummary {
            report: &self.report,
            users: &self.users,
            error: self.outcome.as_ref().err().map(ToString::to_string),
        }
    }
}

/// Serialisable view of a [`ScenarioRun`].
#[derive(Debug, Serialize)]
pub struct ScenarioSummary<'a> {
    pub report: &'a FlowReport,
    pub users: &'a [SignupDetails],
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScenarioTimings {
    pub kyc: KycTimings,
    pub personalise: PersonaliseTimings,
    pub pin: PinEntry,
    pub cdm: CdmTimings,
    pub terminal_timeout: Duration,
    pub start_earning_timeout: Duration,
    pub inspect_delay: Duration,
}

impl ScenarioTimings {
    pub fn from_config(config: &HarnessConfig) -> Self {
        ScenarioTimings {
            kyc: KycTimings::default(),
            personalise: PersonaliseTimings::default(),
            pin: PinEntry::default(),
            cdm: CdmTimings::from_config(config),
            terminal_timeout: Duration::from_secs(20),
            start_earning_timeout: Duration::from_secs(15),
            inspect_delay: Duration::from_millis(config.inspect_delay_ms),
        }
    }
}

fn fresh_app() -> SessionSpec {
    SessionSpec {
        role: SessionRole::App,
        storage_state: None,
        persist_to: None,
    }
}

fn finish(
    recorder: FlowRecorder,
    users: Vec<SignupDetails>,
    outcome: Result<(), ScenarioError>,
) -> ScenarioRun {
    ScenarioRun {
        report: recorder.finish(),
        users,
        outcome,
    }
}

/// Signup, KYC and PIN creation for one user in a fresh app browser.
async fn create_user(
    ctx: &FlowContext<'_>,
    recorder: &mut FlowRecorder,
    media: &UserMedia,
    timings: &ScenarioTimings,
) -> Result<SignupDetails, FlowError> {
    let details = SignupDetails::for_media(media, generate_phone(&media.seed));
    ctx.logger.info(
        format!("creating {} ({})", details.name, details.phone),
        Some("scenario"),
        Some(serde_json::json!({ "seed": media.seed, "id": media.id })),
    );
    let entered = &details;
    ScopedSession::run(ctx.launcher, &fresh_app(), |page| async move {
        let page = page.as_ref();
        run_signup(ctx, page, recorder, entered).await?;
        run_kyc(ctx, page, recorder, media, &timings.kyc).await?;
        recorder
            .run(
                Step::required("verification submitted"),
                expect_page_text(page, &ctx.config.signup_done_pattern, timings.terminal_timeout),
            )
            .await?;
        sleep(timings.inspect_delay).await;
        Ok(())
    })
    .await?;
    Ok(details)
}

fn load_media(ctx: &FlowContext<'_>) -> Result<Vec<UserMedia>, FlowError> {
    Ok(take_newest(
        &ctx.config.media_dir,
        ctx.config.num_users as usize,
    )?)
}

/// Create `num_users` applicants from the newest media, optionally approving
/// each in CDM straight away. Stops at the first failure.
pub async fn signup_users(
    ctx: &FlowContext<'_>,
    timings: &ScenarioTimings,
    approve: bool,
) -> ScenarioRun {
    let mut recorder = ctx.recorder("signup-users");
    let mut users = Vec::new();
    let outcome = async {
        let media = load_media(ctx)?;
        for (index, media) in media.iter().enumerate() {
            log::info!("user {}/{}", index + 1, ctx.config.num_users);
            let details = create_user(ctx, &mut recorder, media, timings).await?;
            if approve {
                verify_user(ctx, &mut recorder, &details.id_number, &timings.cdm).await?;
            }
            users.push(details);
        }
        Ok::<_, FlowError>(())
    }
    .await;
    finish(recorder, users, outcome.map_err(Into::into))
}

/// Approve every configured ID in CDM. A failure is recorded and the
/// remaining IDs are still attempted.
pub async fn verify_users(ctx: &FlowContext<'_>, timings: &ScenarioTimings) -> ScenarioRun {
    let mut recorder = ctx.recorder("verify-users");
    let mut unverified = Vec::new();
    for id in &ctx.config.verify_user_ids {
        if let Err(err) = verify_user(ctx, &mut recorder, id, &timings.cdm).await {
            ctx.logger
                .error(format!("{id} not verified: {err}"), Some("scenario"), None);
            unverified.push(id.clone());
        }
    }
    let outcome = if unverified.is_empty() {
        Ok(())
    } else {
        Err(ScenarioError::Unverified(unverified))
    };
    finish(recorder, Vec::new(), outcome)
}

fn login_phone(ctx: &FlowContext<'_>) -> Result<String, FlowError> {
    ctx.config
        .default_phone
        .clone()
        .ok_or(FlowError::MissingSetting("DEFAULT_PHONE"))
}

/// Log in with stored app state and reach the home screen.
async fn login_home(
    ctx: &FlowContext<'_>,
    page: &dyn PageDriver,
    recorder: &mut FlowRecorder,
    phone: &str,
    timings: &ScenarioTimings,
) -> Result<(), FlowError> {
    run_login(ctx, page, recorder, phone, &timings.pin).await?;
    recorder
        .run(
            Step::required("home screen"),
            expect_page_text(page, &ctx.config.home_screen_pattern, timings.terminal_timeout),
        )
        .await?;
    Ok(())
}

/// Log in as `DEFAULT_PHONE` and answer the questionnaire.
pub async fn personalise(ctx: &FlowContext<'_>, timings: &ScenarioTimings) -> ScenarioRun {
    let mut recorder = ctx.recorder("personalise");
    let outcome = async {
        let phone = login_phone(ctx)?;
        let recorder = &mut recorder;
        ScopedSession::run(ctx.launcher, &SessionSpec::app(ctx.config), |page| async move {
            let page = page.as_ref();
            login_home(ctx, page, recorder, &phone, timings).await?;
            run_personalise(ctx, page, recorder, &timings.personalise).await?;
            sleep(timings.inspect_delay).await;
            Ok(())
        })
        .await
    }
    .await;
    finish(recorder, Vec::new(), outcome.map_err(Into::into))
}

/// Log in as `DEFAULT_PHONE`, finish any pending questionnaire, then press
/// "Start Earning".
pub async fn start_earning_scenario(
    ctx: &FlowContext<'_>,
    timings: &ScenarioTimings,
) -> ScenarioRun {
    let mut recorder = ctx.recorder("start-earning");
    let outcome = async {
        let phone = login_phone(ctx)?;
        let recorder = &mut recorder;
        ScopedSession::run(ctx.launcher, &SessionSpec::app(ctx.config), |page| async move {
            let page = page.as_ref();
            login_home(ctx, page, recorder, &phone, timings).await?;
            run_personalise(ctx, page, recorder, &timings.personalise).await?;
            start_earning(page, recorder, timings.start_earning_timeout).await?;
            sleep(timings.inspect_delay).await;
            Ok(())
        })
        .await
    }
    .await;
    finish(recorder, Vec::new(), outcome.map_err(Into::into))
}

/// Signup through CDM approval, then login, personalise and start earning,
/// for each of `num_users` applicants.
pub async fn full_journey(ctx: &FlowContext<'_>, timings: &ScenarioTimings) -> ScenarioRun {
    let mut recorder = ctx.recorder("full-journey");
    let mut users = Vec::new();
    let outcome = async {
        for media in load_media(ctx)? {
            let details = create_user(ctx, &mut recorder, &media, timings).await?;
            verify_user(ctx, &mut recorder, &details.id_number, &timings.cdm).await?;
            let recorder = &mut recorder;
            let phone = details.phone.as_str();
            ScopedSession::run(ctx.launcher, &fresh_app(), |page| async move {
                let page = page.as_ref();
                login_home(ctx, page, recorder, phone, timings).await?;
                run_personalise(ctx, page, recorder, &timings.personalise).await?;
                start_earning(page, recorder, timings.start_earning_timeout).await?;
                sleep(timings.inspect_delay).await;
                Ok(())
            })
            .await?;
            ctx.logger.info(
                format!("journey complete for {} ({})", details.name, details.phone),
                Some("scenario"),
                None,
            );
            users.push(details);
        }
        Ok::<_, FlowError>(())
    }
    .await;
    finish(recorder, users, outcome.map_err(Into::into))
}
