//! Step bookkeeping for flows.
//!
//! Optional steps may fail without aborting the run; the recorder keeps what
//! happened to each of them so a report can show which steps no-opped.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::FlowError;
use crate::logging::HarnessLogger;
use crate::metrics::{FlowMetrics, StepOutcomeKind, elapsed_ms, start_step_timer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub name: &'static str,
    pub required: bool,
}

impl Step {
    pub const fn required(name: &'static str) -> Self {
        Step {
            name,
            required: true,
        }
    }

    pub const fn optional(name: &'static str) -> Self {
        Step {
            name,
            required: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    /// An optional step failed and the flow moved on.
    Skipped { reason: String },
    Failed { reason: String },
}

impl StepStatus {
    fn outcome(&self) -> StepOutcomeKind {
        match self {
            StepStatus::Completed => StepOutcomeKind::Completed,
            StepStatus::Skipped { .. } => StepOutcomeKind::Skipped,
            StepStatus::Failed { .. } => StepOutcomeKind::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub required: bool,
    #[serde(flatten)]
    pub status: StepStatus,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowReport {
    pub flow: String,
    pub steps: Vec<StepRecord>,
    pub metrics: FlowMetrics,
}

impl FlowReport {
    pub fn status_of(&self, step: &str) -> Option<&StepStatus> {
        self.steps
            .iter()
            .rev()
            .find(|record| record.name == step)
            .map(|record| &record.status)
    }
}

pub struct FlowRecorder {
    flow: String,
    steps: Vec<StepRecord>,
    metrics: FlowMetrics,
    logger: Arc<HarnessLogger>,
}

impl FlowRecorder {
    pub fn new(flow: impl Into<String>, logger: Arc<HarnessLogger>) -> Self {
        FlowRecorder {
            flow: flow.into(),
            steps: Vec::new(),
            metrics: FlowMetrics::default(),
            logger,
        }
    }

    /// Run one step.
    ///
    /// `Ok(Some(value))` when it completed, `Ok(None)` when an optional step
    /// failed and was skipped. A required step's failure, or a fatal error
    /// from any step, is returned as [`FlowError::RequiredStep`].
    pub async fn run<T, Fut>(&mut self, step: Step, work: Fut) -> Result<Option<T>, FlowError>
    where
        Fut: Future<Output = Result<T, FlowError>>,
    {
        let started = start_step_timer();
        let result = work.await;
        let duration_ms = elapsed_ms(started);

        let (status, outcome) = match result {
            Ok(value) => (StepStatus::Completed, Ok(Some(value))),
            Err(err) if !step.required && !err.is_fatal() => (
                StepStatus::Skipped {
                    reason: err.to_string(),
                },
                Ok(None),
            ),
            Err(err) => (
                StepStatus::Failed {
                    reason: err.to_string(),
                },
                Err(FlowError::RequiredStep {
                    step: step.name.to_string(),
                    source: Box::new(err),
                }),
            ),
        };

        self.log(step, &status, duration_ms);
        self.metrics.record(status.outcome(), duration_ms);
        self.steps.push(StepRecord {
            name: step.name.to_string(),
            required: step.required,
            status,
            duration_ms,
        });
        outcome
    }

    fn log(&self, step: Step, status: &StepStatus, duration_ms: u64) {
        let aux = Some(json!({ "flow": self.flow, "step": step.name, "duration_ms": duration_ms }));
        match status {
            StepStatus::Completed => {
                self.logger
                    .info(format!("{} completed", step.name), Some("flow"), aux)
            }
            StepStatus::Skipped { reason } => self.logger.debug(
                format!("{} skipped: {reason}", step.name),
                Some("flow"),
                aux,
            ),
            StepStatus::Failed { reason } => self.logger.error(
                format!("{} failed: {reason}", step.name),
                Some("flow"),
                aux,
            ),
        }
    }

    pub fn logger(&self) -> &Arc<HarnessLogger> {
        &self.logger
    }

    pub fn finish(self) -> FlowReport {
        FlowReport {
            flow: self.flow,
            steps: self.steps,
            metrics: self.metrics,
        }
    }
}
