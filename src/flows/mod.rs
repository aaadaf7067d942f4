//! Onboarding flows built on the resilient action layer.
//!
//! A flow drives one page through a sequence of [`Step`]s recorded by a
//! [`FlowRecorder`]. Admin work (OTP lookup, CDM approval) never shares the
//! applicant's browser: it runs inside a [`ScopedSession`] opened from the
//! [`SessionLauncher`] and closed on every exit path.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::browser::BrowserRuntimeError;
use crate::config::HarnessConfig;
use crate::driver::PageDriver;
use crate::error::{ActionError, DriverError};
use crate::logging::HarnessLogger;
use crate::media::MediaError;
use crate::session::SessionStateError;

pub mod cdm;
pub mod kyc;
pub mod login;
pub mod otp;
pub mod personalise;
pub mod pin;
pub mod signup;
pub mod step;

#[cfg(test)]
pub(crate) mod fake;

pub use step::{FlowRecorder, FlowReport, Step, StepRecord, StepStatus};

#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Action(#[from] ActionError),
    #[error("required step '{step}' failed: {source}")]
    RequiredStep {
        step: String,
        #[source]
        source: Box<FlowError>,
    },
    #[error("page text never matched {pattern:?} within {timeout:?}")]
    TerminalAssertion { pattern: String, timeout: Duration },
    #[error("invalid pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error(transparent)]
    Browser(#[from] BrowserRuntimeError),
    #[error(transparent)]
    SessionState(#[from] SessionStateError),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error("invalid URL {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("no OTP code found on the admin page")]
    OtpNotFound,
    #[error("no admin row contains '{id}' after {attempts} attempts")]
    RowNotFound { id: String, attempts: u32 },
    #[error("{0} is not configured")]
    MissingSetting(&'static str),
}

impl FlowError {
    /// Whether this error aborts a flow even from an optional step.
    pub fn is_fatal(&self) -> bool {
        match self {
            FlowError::Action(err) => err.is_fatal(),
            FlowError::RequiredStep { .. } => true,
            _ => false,
        }
    }
}

impl From<DriverError> for FlowError {
    fn from(err: DriverError) -> Self {
        FlowError::Action(ActionError::Driver(err))
    }
}

/// Which browser a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// The applicant's browser, pointed at the onboarding app.
    App,
    /// A separate admin browser for OTP lookup and CDM approval.
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSpec {
    pub role: SessionRole,
    /// Storage state to preload; a missing file starts a clean profile.
    pub storage_state: Option<PathBuf>,
    /// Where [`ScopedSession::run`] writes the storage state after success.
    pub persist_to: Option<PathBuf>,
}

impl SessionSpec {
    pub fn app(config: &HarnessConfig) -> Self {
        SessionSpec {
            role: SessionRole::App,
            storage_state: Some(config.app_state_path.clone()),
            persist_to: None,
        }
    }

    pub fn admin(config: &HarnessConfig) -> Self {
        SessionSpec {
            role: SessionRole::Admin,
            storage_state: Some(config.cdm_state_path.clone()),
            persist_to: None,
        }
    }

    pub fn persisting(mut self, path: impl Into<PathBuf>) -> Self {
        self.persist_to = Some(path.into());
        self
    }
}

/// An open browser with one active page.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    fn page(&self) -> Arc<dyn PageDriver>;

    /// Write cookies and local storage as storage-state JSON.
    async fn save_storage_state(&self, path: &Path) -> Result<(), FlowError>;

    async fn close(&mut self) -> Result<(), FlowError>;
}

#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn open(&self, spec: &SessionSpec) -> Result<Box<dyn BrowserSession>, FlowError>;
}

/// A browser opened for one piece of work and always closed afterwards.
pub struct ScopedSession;

impl ScopedSession {
    /// Open a browser for `spec`, run `work` on its page, then close it whether
    /// `work` succeeded or not. On success the storage state is written to
    /// `spec.persist_to` first. A close failure is only reported when `work`
    /// itself succeeded.
    pub async fn run<T, F, Fut>(
        launcher: &dyn SessionLauncher,
        spec: &SessionSpec,
        work: F,
    ) -> Result<T, FlowError>
    where
        F: FnOnce(Arc<dyn PageDriver>) -> Fut,
        Fut: Future<Output = Result<T, FlowError>>,
    {
        let mut session = launcher.open(spec).await?;
        let mut outcome = work(session.page()).await;
        if let Some(path) = spec.persist_to.as_deref().filter(|_| outcome.is_ok()) {
            if let Err(err) = session.save_storage_state(path).await {
                outcome = Err(err);
            }
        }
        let closed = session.close().await;
        match (outcome, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(err)) => Err(err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(close_err)) => {
                log::warn!("admin session close failed after error: {close_err}");
                Err(err)
            }
        }
    }
}

/// Everything a flow needs besides the page it drives.
#[derive(Clone, Copy)]
pub struct FlowContext<'a> {
    pub config: &'a HarnessConfig,
    pub logger: &'a Arc<HarnessLogger>,
    pub launcher: &'a dyn SessionLauncher,
}

impl<'a> FlowContext<'a> {
    pub fn new(
        config: &'a HarnessConfig,
        logger: &'a Arc<HarnessLogger>,
        launcher: &'a dyn SessionLauncher,
    ) -> Self {
        FlowContext {
            config,
            logger,
            launcher,
        }
    }

    pub fn recorder(&self, flow: &str) -> FlowRecorder {
        FlowRecorder::new(flow, Arc::clone(self.logger))
    }

    pub fn click_timeout(&self) -> Duration {
        Duration::from_millis(self.config.click_timeout_ms)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.config.wait_timeout_ms)
    }
}

/// Turn a `bool` click helper result into a step error.
pub(crate) fn clicked(found: bool, what: &str, budget: Duration) -> Result<(), FlowError> {
    if found {
        Ok(())
    } else {
        Err(ActionError::ElementNotFound {
            target: what.to_string(),
            strategies: 1,
            budget,
        }
        .into())
    }
}

pub(crate) fn compile(pattern: &str) -> Result<regex::Regex, FlowError> {
    regex::Regex::new(pattern).map_err(|source| FlowError::Pattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// Poll body text until it matches `pattern`.
pub async fn expect_page_text(
    page: &dyn PageDriver,
    pattern: &str,
    timeout: Duration,
) -> Result<(), FlowError> {
    let re = compile(pattern)?;
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match page.body_text().await {
            Ok(text) if re.is_match(&text) => return Ok(()),
            Ok(_) => {}
            Err(err) => log::debug!("body text read failed: {err}"),
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return Err(FlowError::TerminalAssertion {
                pattern: pattern.to_string(),
                timeout,
            });
        }
        tokio::time::sleep(Duration::from_millis(250).min(deadline - now)).await;
    }
}
