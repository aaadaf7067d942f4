//! Resilient UI actions.
//!
//! Everything here is written against [`crate::driver::PageDriver`] and every
//! wait is bounded by `tokio::time`, so the layer runs unchanged against a
//! real browser or the in-memory test page.

pub mod clicker;
pub mod code_entry;
pub mod gate;
pub mod liveness;
pub mod locator;
pub mod retry;
pub mod setter;
pub mod target;
pub mod upload;

pub use clicker::{ClickPlan, GateMode, click_button, click_element, click_target};
pub use code_entry::{CodeEntryEngine, CodeEntryState, CodeIntent, EntryPhase, WidgetShape, WidgetTargets};
pub use gate::{ClickableGate, is_clickable};
pub use locator::{InteractionResult, LocatorResolver, Resolved};
pub use retry::{RetryOutcome, RetryPolicy};
pub use setter::{FieldSetter, SetterStrategy, ValueComparison};
pub use target::{ActionTarget, ActionTargetBuilder, AriaRole, LocatorStrategy, StrategyKind, TextMatcher};
