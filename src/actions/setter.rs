//! Form-field setter with escalating write strategies.
//!
//! Framework-controlled inputs in the onboarding app ignore some write paths:
//! a masked phone field may drop a programmatic fill but accept keystrokes,
//! another keeps its internal state until it sees `beforeinput` events. The
//! setter escalates through four strategies and re-reads the value after
//! each one.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;

use super::locator::LocatorResolver;
use super::target::ActionTarget;
use crate::driver::{ElementHandle, PageDriver, ValueDispatch};
use crate::error::{ActionError, DriverError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetterStrategy {
    /// Clear, then native keystrokes with an inter-key delay.
    Keystrokes,
    /// Whole-value replacement, then the pretty variant if enabled.
    Replace,
    /// Select-all shortcuts, then retype.
    SelectAllRetype,
    /// Native value setter plus synthetic per-character input events.
    NativeEvents,
}

impl SetterStrategy {
    pub const ESCALATION: [SetterStrategy; 4] = [
        SetterStrategy::Keystrokes,
        SetterStrategy::Replace,
        SetterStrategy::SelectAllRetype,
        SetterStrategy::NativeEvents,
    ];
}

/// How a read-back value is compared with the requested one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueComparison {
    Exact,
    /// Ignore everything but ASCII digits, for inputs that auto-format.
    DigitsOnly,
}

impl ValueComparison {
    pub fn matches(self, expected: &str, actual: &str) -> bool {
        match self {
            ValueComparison::Exact => expected == actual,
            ValueComparison::DigitsOnly => digits_only(expected) == digits_only(actual),
        }
    }
}

pub fn digits_only(value: &str) -> String {
    value.chars().filter(char::is_ascii_digit).collect()
}

/// Group a digit string the way local phone numbers are displayed:
/// `0821234567` becomes `082 123 4567`.
pub fn pretty_grouped(value: &str) -> Option<String> {
    let digits = digits_only(value);
    if digits.len() < 7 {
        return None;
    }
    Some(format!("{} {} {}", &digits[..3], &digits[3..6], &digits[6..]))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSetter {
    pub comparison: ValueComparison,
    pub pretty_variant: bool,
    pub key_delay: Duration,
    pub retype_delay: Duration,
    pub settle: Duration,
}

impl FieldSetter {
    pub fn new(comparison: ValueComparison) -> Self {
        FieldSetter {
            comparison,
            pretty_variant: false,
            key_delay: Duration::from_millis(80),
            retype_delay: Duration::from_millis(70),
            settle: Duration::from_millis(100),
        }
    }

    /// Digit comparison with the grouped variant tried during replacement.
    pub fn phone() -> Self {
        FieldSetter {
            pretty_variant: true,
            ..FieldSetter::new(ValueComparison::DigitsOnly)
        }
    }

    /// Run one strategy without verification.
    pub async fn apply(
        &self,
        page: &dyn PageDriver,
        element: &ElementHandle,
        value: &str,
        strategy: SetterStrategy,
    ) -> Result<(), DriverError> {
        match strategy {
            SetterStrategy::Keystrokes => {
                page.focus(element).await?;
                page.fill(element, "").await?;
                page.type_text(element, value, self.key_delay).await
            }
            SetterStrategy::Replace => page.fill(element, value).await,
            SetterStrategy::SelectAllRetype => {
                page.focus(element).await?;
                page.select_all(element).await?;
                page.type_text(element, value, self.retype_delay).await
            }
            SetterStrategy::NativeEvents => {
                page.dispatch_value(element, value, ValueDispatch::PerCharacter)
                    .await
            }
        }
    }

    /// Run one strategy and verify by read-back.
    pub async fn try_strategy(
        &self,
        page: &dyn PageDriver,
        element: &ElementHandle,
        value: &str,
        strategy: SetterStrategy,
    ) -> Result<bool, ActionError> {
        if let Err(err) = self.apply(page, element, value, strategy).await {
            log::debug!("setter {strategy:?} on {element} failed: {err}");
            return Ok(false);
        }
        if self.verify(page, element, value).await? {
            return Ok(true);
        }
        if strategy == SetterStrategy::Replace && self.pretty_variant {
            if let Some(pretty) = pretty_grouped(value).filter(|pretty| pretty.as_str() != value) {
                if let Err(err) = page.fill(element, &pretty).await {
                    log::debug!("pretty replacement on {element} failed: {err}");
                    return Ok(false);
                }
                return self.verify(page, element, value).await;
            }
        }
        Ok(false)
    }

    /// Escalate through every strategy until the value reads back.
    pub async fn set(
        &self,
        page: &dyn PageDriver,
        element: &ElementHandle,
        value: &str,
        description: &str,
    ) -> Result<SetterStrategy, ActionError> {
        for strategy in SetterStrategy::ESCALATION {
            if self.try_strategy(page, element, value, strategy).await? {
                log::debug!("{description} set via {strategy:?}");
                return Ok(strategy);
            }
        }
        let last_value = page.input_value(element).await.unwrap_or_default();
        Err(ActionError::ValueNotApplied {
            target: description.to_string(),
            last_value,
        })
    }

    /// Resolve `target` and set its value.
    pub async fn set_target(
        &self,
        page: &dyn PageDriver,
        target: &ActionTarget,
        value: &str,
    ) -> Result<SetterStrategy, ActionError> {
        let resolved = LocatorResolver::new(page).resolve(target).await?;
        self.set(page, &resolved.element, value, target.description())
            .await
    }

    async fn verify(
        &self,
        page: &dyn PageDriver,
        element: &ElementHandle,
        expected: &str,
    ) -> Result<bool, ActionError> {
        sleep(self.settle).await;
        match page.input_value(element).await {
            Ok(actual) => Ok(self.comparison.matches(expected, &actual)),
            Err(DriverError::Detached(handle)) => Err(DriverError::Detached(handle).into()),
            Err(err) => {
                log::debug!("read-back of {element} failed: {err}");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::{FakeElement, FakePage, InputModel, WriteChannel};
    use crate::error::ActionErrorKind;

    fn phone_mask(raw: &str) -> String {
        pretty_grouped(raw).unwrap_or_else(|| digits_only(raw))
    }

    fn field(model: InputModel) -> FakePage {
        FakePage::new(vec![FakeElement::input("phone").input_model(model)])
    }

    #[test]
    fn comparison_modes() {
        assert!(ValueComparison::DigitsOnly.matches("0821234567", "082 123 4567"));
        assert!(!ValueComparison::Exact.matches("0821234567", "082 123 4567"));
        assert!(ValueComparison::Exact.matches("abc", "abc"));
    }

    #[test]
    fn pretty_grouping() {
        assert_eq!(pretty_grouped("0821234567").as_deref(), Some("082 123 4567"));
        assert_eq!(pretty_grouped("082"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn plain_input_takes_first_strategy() {
        let page = field(InputModel::plain());
        let used = FieldSetter::phone()
            .set(&page, &ElementHandle::new("phone"), "0821234567", "phone")
            .await
            .expect("set");
        assert_eq!(used, SetterStrategy::Keystrokes);
        assert_eq!(page.value("phone"), "0821234567");
    }

    #[tokio::test(start_paused = true)]
    async fn auto_formatting_input_passes_digit_comparison() {
        let page = field(InputModel::plain().formatted(phone_mask));
        let used = FieldSetter::phone()
            .set(&page, &ElementHandle::new("phone"), "0821234567", "phone")
            .await
            .expect("digits match");
        assert_eq!(used, SetterStrategy::Keystrokes);
        assert_eq!(page.value("phone"), "082 123 4567");
    }

    #[tokio::test(start_paused = true)]
    async fn escalates_until_a_channel_is_accepted() {
        let page = field(InputModel::accepting(&[WriteChannel::NativeEvents]));
        let used = FieldSetter::new(ValueComparison::Exact)
            .set(&page, &ElementHandle::new("phone"), "8207106197083", "id number")
            .await
            .expect("native events accepted");
        assert_eq!(used, SetterStrategy::NativeEvents);
        assert_eq!(page.count_events("fill:phone"), 2);
        assert_eq!(page.count_events("select_all:phone"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn select_all_retype_replaces_stale_value() {
        let page = FakePage::new(vec![
            FakeElement::input("email")
                .value("stale@example.com")
                .input_model(InputModel::accepting(&[
                    WriteChannel::Keystrokes,
                    WriteChannel::SelectAllRetype,
                ])),
        ]);
        let setter = FieldSetter::new(ValueComparison::Exact);
        let ok = setter
            .try_strategy(
                &page,
                &ElementHandle::new("email"),
                "test+abc@gmail.com",
                SetterStrategy::SelectAllRetype,
            )
            .await
            .expect("no driver error");
        assert!(ok);
        assert_eq!(page.value("email"), "test+abc@gmail.com");
    }

    #[tokio::test(start_paused = true)]
    async fn replace_alone_sets_a_fill_only_input() {
        let page = field(InputModel::accepting(&[WriteChannel::Fill]));
        let setter = FieldSetter::new(ValueComparison::Exact);
        let phone = ElementHandle::new("phone");

        let typed = setter
            .try_strategy(&page, &phone, "Thandi", SetterStrategy::Keystrokes)
            .await
            .expect("no driver error");
        assert!(!typed);

        let replaced = setter
            .try_strategy(&page, &phone, "Thandi", SetterStrategy::Replace)
            .await
            .expect("no driver error");
        assert!(replaced);
        assert_eq!(page.value("phone"), "Thandi");
    }

    #[tokio::test(start_paused = true)]
    async fn replace_falls_back_to_grouped_phone() {
        let page = field(
            InputModel::accepting(&[WriteChannel::Fill]).admitting(|raw| raw.contains(' ')),
        );
        let phone = ElementHandle::new("phone");

        let plain = FieldSetter::new(ValueComparison::DigitsOnly)
            .try_strategy(&page, &phone, "0821234567", SetterStrategy::Replace)
            .await
            .expect("no driver error");
        assert!(!plain);
        assert_eq!(page.value("phone"), "");

        let used = FieldSetter::phone()
            .set(&page, &phone, "0821234567", "phone")
            .await
            .expect("grouped variant sticks");
        assert_eq!(used, SetterStrategy::Replace);
        assert_eq!(page.value("phone"), "082 123 4567");
        assert!(page.events().contains(&"fill:phone".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn native_events_alone_set_the_value() {
        let page = field(InputModel::accepting(&[WriteChannel::NativeEvents]));
        let ok = FieldSetter::new(ValueComparison::Exact)
            .try_strategy(
                &page,
                &ElementHandle::new("phone"),
                "8207106197083",
                SetterStrategy::NativeEvents,
            )
            .await
            .expect("no driver error");
        assert!(ok);
        assert_eq!(page.value("phone"), "8207106197083");
        assert_eq!(page.count_events("dispatch:phone:PerCharacter"), 1);
        assert_eq!(page.count_events("fill:phone"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exact_comparison_on_reformatting_input_fails() {
        let page = field(InputModel::plain().formatted(phone_mask));
        let err = FieldSetter::new(ValueComparison::Exact)
            .set(&page, &ElementHandle::new("phone"), "0821234567", "phone")
            .await
            .expect_err("formatted value never equals raw value");
        assert_eq!(err.kind(), ActionErrorKind::ValueNotApplied);
        match err {
            ActionError::ValueNotApplied { last_value, .. } => {
                assert_eq!(last_value, "082 123 4567")
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ignoring_input_exhausts_all_strategies() {
        let page = field(InputModel::accepting(&[]));
        let err = FieldSetter::phone()
            .set(&page, &ElementHandle::new("phone"), "0821234567", "phone")
            .await
            .expect_err("nothing sticks");
        assert_eq!(err.kind(), ActionErrorKind::ValueNotApplied);
    }
}
