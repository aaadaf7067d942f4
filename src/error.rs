//! Error taxonomy for the UI-action layer.
//!
//! Every action either succeeds, or reports one of a small set of typed
//! failures. Flow scripts decide per step whether a failure aborts the run
//! (see [`crate::flows::step`]).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Transport-level failures raised by a [`PageDriver`](crate::driver::PageDriver).
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("browser command failed: {0}")]
    Command(String),
    #[error("element '{0}' is no longer attached to the document")]
    Detached(String),
    #[error("script evaluation failed: {0}")]
    Script(String),
    #[error("driver operation unsupported: {0}")]
    Unsupported(&'static str),
}

/// Failures surfaced by the resilient UI-action layer.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("no element matched '{target}' after {strategies} strategies within {budget:?}")]
    ElementNotFound {
        target: String,
        strategies: usize,
        budget: Duration,
    },
    #[error("'{target}' never became clickable after {polls} polls")]
    NotInteractable { target: String, polls: u32 },
    #[error("value for '{target}' was not applied (last read back {last_value:?})")]
    ValueNotApplied { target: String, last_value: String },
    #[error("code entry failed: {reason}")]
    CodeEntryFailed { reason: String },
    #[error("'{action}' failed after {attempts} attempts")]
    RetryExhausted { action: String, attempts: u32 },
    #[error("expected the {expected} screen but the {found} screen is showing")]
    UnexpectedScreen {
        expected: &'static str,
        found: &'static str,
    },
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Fieldless mirror of [`ActionError`] used in interaction reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionErrorKind {
    ElementNotFound,
    NotInteractable,
    ValueNotApplied,
    CodeEntryFailed,
    RetryExhausted,
    UnexpectedScreen,
    Driver,
}

impl ActionError {
    pub fn kind(&self) -> ActionErrorKind {
        match self {
            ActionError::ElementNotFound { .. } => ActionErrorKind::ElementNotFound,
            ActionError::NotInteractable { .. } => ActionErrorKind::NotInteractable,
            ActionError::ValueNotApplied { .. } => ActionErrorKind::ValueNotApplied,
            ActionError::CodeEntryFailed { .. } => ActionErrorKind::CodeEntryFailed,
            ActionError::RetryExhausted { .. } => ActionErrorKind::RetryExhausted,
            ActionError::UnexpectedScreen { .. } => ActionErrorKind::UnexpectedScreen,
            ActionError::Driver(_) => ActionErrorKind::Driver,
        }
    }

    /// Errors that must abort a flow even when raised by an optional step.
    ///
    /// Landing on the wrong PIN screen means the account state disagrees with
    /// the caller's intent; continuing would create or overwrite a PIN.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ActionError::UnexpectedScreen { .. })
    }

    pub(crate) fn code_entry(reason: impl Into<String>) -> Self {
        ActionError::CodeEntryFailed {
            reason: reason.into(),
        }
    }
}
