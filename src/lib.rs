//! Browser-driven end-to-end harness for the onboarding app and the CDM
//! back office.
//!
//! [`actions`] is the resilient UI-action layer; [`flows`] builds the
//! onboarding journeys on top of it; [`scenario`] composes flows into the
//! runs exposed by the `onboarding-harness` binary.

pub mod actions;
pub mod browser;
pub mod config;
pub mod dom_scripts;
pub mod driver;
pub mod error;
pub mod flows;
pub mod harness;
pub mod logging;
pub mod media;
pub mod metrics;
pub mod page;
pub mod preflight;
pub mod runtime;
pub mod scenario;
pub mod session;

pub use config::{HarnessConfig, HarnessConfigOverrides, Verbosity};
pub use error::{ActionError, DriverError};
pub use flows::{FlowContext, FlowError, FlowReport};
pub use harness::ChromiumLauncher;
pub use logging::HarnessLogger;
