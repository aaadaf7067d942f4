//! OTP and PIN entry.
//!
//! The onboarding app renders codes three ways: an on-screen keypad of
//! `div[tabindex="0"]` keys, one `maxlength=1` input per digit, or a single
//! (often hidden) input. The engine races all three, types into whichever
//! appears, then verifies the observable value exactly. A shape that does not
//! verify hands over to the remaining shapes in keypad, per-box, single order.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;

use super::locator::LocatorResolver;
use super::setter::digits_only;
use super::target::{ActionTarget, AriaRole, TextMatcher};
use crate::driver::{ClickMethod, PageDriver, ValueDispatch};
use crate::error::ActionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryPhase {
    Idle,
    AwaitingWidget,
    EnteringDigits,
    Verifying,
    Complete,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WidgetShape {
    Keypad,
    PerBox,
    SingleField,
}

impl WidgetShape {
    pub const ORDER: [WidgetShape; 3] = [
        WidgetShape::Keypad,
        WidgetShape::PerBox,
        WidgetShape::SingleField,
    ];
}

/// What the caller is trying to do with the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeIntent {
    CreatePin,
    EnterPin,
    Otp,
}

/// Progress of one code entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeEntryState {
    pub expected_len: usize,
    /// Digits confirmed present in the widget.
    pub confirmed: String,
    pub shape: Option<WidgetShape>,
    pub phase: EntryPhase,
    pub history: Vec<EntryPhase>,
}

impl CodeEntryState {
    pub fn new(expected_len: usize) -> Self {
        CodeEntryState {
            expected_len,
            confirmed: String::new(),
            shape: None,
            phase: EntryPhase::Idle,
            history: vec![EntryPhase::Idle],
        }
    }

    fn transition(&mut self, next: EntryPhase) {
        self.phase = next;
        self.history.push(next);
    }

    pub fn is_complete(&self) -> bool {
        self.phase == EntryPhase::Complete && self.confirmed.len() == self.expected_len
    }
}

/// Locators for each widget shape.
#[derive(Debug, Clone)]
pub struct WidgetTargets {
    pub keypad: ActionTarget,
    pub per_box: ActionTarget,
    pub single: ActionTarget,
}

pub const KEYPAD_SELECTOR: &str = r#"div[tabindex="0"]:has(h3)"#;
pub const PER_BOX_SELECTOR: &str = r#"input[maxlength="1"]"#;
pub const PIN_FIELD_SELECTOR: &str =
    r#"input[type="password"], input[inputmode="numeric"], input[type="tel"]"#;

impl WidgetTargets {
    /// Targets for `intent`. `custom_single` is tried first for the single field.
    pub fn for_intent(intent: CodeIntent, custom_single: Option<&str>) -> Self {
        let mut single = ActionTarget::builder("code input").budget(Duration::from_secs(2));
        if let Some(selector) = custom_single {
            single = single.css(selector);
        }
        if intent == CodeIntent::Otp {
            single = single
                .css(r#"input[data-testid="otp-input-hidden"]"#)
                .role(AriaRole::Textbox, TextMatcher::exact("One-Time Password"))
                .role(AriaRole::Textbox, TextMatcher::contains("one-time password"))
                .css(r#"input[autocomplete="one-time-code"]"#)
                .css(r#"input[name="otp"]"#)
                .attribute("placeholder", TextMatcher::contains("otp"));
        }
        single = single.css(PIN_FIELD_SELECTOR);
        // PIN screens can keep unrelated text inputs around; only OTP falls
        // back to any input.
        if intent == CodeIntent::Otp {
            single = single.css("input");
        }
        WidgetTargets {
            keypad: ActionTarget::css("keypad", KEYPAD_SELECTOR),
            per_box: ActionTarget::css("per-digit inputs", PER_BOX_SELECTOR),
            single: single.build(),
        }
    }

    fn target(&self, shape: WidgetShape) -> &ActionTarget {
        match shape {
            WidgetShape::Keypad => &self.keypad,
            WidgetShape::PerBox => &self.per_box,
            WidgetShape::SingleField => &self.single,
        }
    }
}

/// Target for one keypad key.
pub fn keypad_key(digit: char, budget: Duration) -> ActionTarget {
    let label = digit.to_string();
    ActionTarget::builder(format!("keypad key {digit}"))
        .budget(budget)
        .strategy_timeout(Duration::from_millis(500))
        .role(AriaRole::Button, TextMatcher::exact(label.clone()))
        .within(r#"div[tabindex="0"]"#, "h3", TextMatcher::exact(label.clone()))
        .text(TextMatcher::exact(label))
        .build()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeEntryEngine {
    pub widget_timeout: Duration,
    pub key_timeout: Duration,
    pub key_pause: Duration,
    pub settle: Duration,
}

impl Default for CodeEntryEngine {
    fn default() -> Self {
        CodeEntryEngine {
            widget_timeout: Duration::from_secs(10),
            key_timeout: Duration::from_secs(5),
            key_pause: Duration::from_millis(150),
            settle: Duration::from_millis(200),
        }
    }
}

impl CodeEntryEngine {
    pub async fn enter(
        &self,
        page: &dyn PageDriver,
        code: &str,
        targets: &WidgetTargets,
    ) -> Result<CodeEntryState, ActionError> {
        if code.is_empty() || !code.chars().all(|c| c.is_ascii_digit()) {
            return Err(ActionError::code_entry(format!(
                "code must be a non-empty digit string, got {code:?}"
            )));
        }

        let mut state = CodeEntryState::new(code.len());
        let resolver = LocatorResolver::new(page);

        state.transition(EntryPhase::AwaitingWidget);
        let candidates = [&targets.keypad, &targets.per_box, &targets.single];
        let Some((position, _)) = resolver
            .wait_for_any(&candidates, self.widget_timeout)
            .await
        else {
            state.transition(EntryPhase::Failed);
            return Err(ActionError::code_entry(format!(
                "no keypad, per-digit inputs or code field appeared within {:?}",
                self.widget_timeout
            )));
        };
        let detected = WidgetShape::ORDER[position];

        let mut order = vec![detected];
        order.extend(WidgetShape::ORDER.into_iter().filter(|shape| *shape != detected));

        for shape in order {
            if shape != detected && !self.shape_present(page, targets, shape, code.len()).await {
                continue;
            }
            state.shape = Some(shape);
            state.transition(EntryPhase::EnteringDigits);
            if let Err(err) = self.type_code(page, targets, shape, code).await {
                log::debug!("{shape:?} entry failed: {err}");
                continue;
            }

            state.transition(EntryPhase::Verifying);
            sleep(self.settle).await;
            match self.observed_code(page, targets, shape, code.len()).await {
                Some(observed) if observed == code => {
                    state.confirmed = observed;
                    state.transition(EntryPhase::Complete);
                    return Ok(state);
                }
                observed => log::debug!("{shape:?} entry read back {observed:?}"),
            }
        }

        state.transition(EntryPhase::Failed);
        Err(ActionError::code_entry(format!(
            "{} digit code did not verify in any widget shape",
            code.len()
        )))
    }

    async fn shape_present(
        &self,
        page: &dyn PageDriver,
        targets: &WidgetTargets,
        shape: WidgetShape,
        len: usize,
    ) -> bool {
        let resolver = LocatorResolver::new(page);
        match shape {
            WidgetShape::PerBox => resolver.resolve_all(&targets.per_box).await.len() >= len,
            other => resolver.probe(targets.target(other)).await.is_some(),
        }
    }

    async fn type_code(
        &self,
        page: &dyn PageDriver,
        targets: &WidgetTargets,
        shape: WidgetShape,
        code: &str,
    ) -> Result<(), ActionError> {
        let resolver = LocatorResolver::new(page);
        match shape {
            WidgetShape::Keypad => {
                for digit in code.chars() {
                    let key = resolver.resolve(&keypad_key(digit, self.key_timeout)).await?;
                    if let Err(err) = page.click(&key.element, ClickMethod::Forced).await {
                        log::debug!("keypad {digit} forced click failed: {err}");
                        page.click(&key.element, ClickMethod::Script).await?;
                    }
                    sleep(self.key_pause).await;
                }
                Ok(())
            }
            WidgetShape::PerBox => {
                let boxes = resolver.resolve_all(&targets.per_box).await;
                if boxes.len() < code.len() {
                    return Err(ActionError::code_entry(format!(
                        "{} per-digit inputs for a {} digit code",
                        boxes.len(),
                        code.len()
                    )));
                }
                for (input, digit) in boxes.iter().zip(code.chars()) {
                    let digit = digit.to_string();
                    page.dispatch_value(input, &digit, ValueDispatch::Whole).await?;
                    if page.input_value(input).await? != digit {
                        page.focus(input).await?;
                        page.fill(input, &digit).await?;
                    }
                }
                Ok(())
            }
            WidgetShape::SingleField => {
                let field = resolver.resolve(&targets.single).await?;
                page.dispatch_value(&field.element, code, ValueDispatch::Whole)
                    .await?;
                let value = page.input_value(&field.element).await?;
                if digits_only(&value) != code {
                    page.focus(&field.element).await?;
                    page.fill(&field.element, "").await?;
                    page.type_text(&field.element, code, Duration::from_millis(50))
                        .await?;
                }
                Ok(())
            }
        }
    }

    /// The code currently visible in the widget, when it can be read.
    ///
    /// A keypad writes into per-digit inputs or a hidden field; with neither
    /// present nothing can be observed.
    async fn observed_code(
        &self,
        page: &dyn PageDriver,
        targets: &WidgetTargets,
        shape: WidgetShape,
        len: usize,
    ) -> Option<String> {
        let resolver = LocatorResolver::new(page);
        let boxes = resolver.resolve_all(&targets.per_box).await;
        if shape == WidgetShape::PerBox || (shape == WidgetShape::Keypad && boxes.len() >= len) {
            if boxes.len() < len {
                return None;
            }
            let mut observed = String::with_capacity(len);
            for input in boxes.iter().take(len) {
                let value = page.input_value(input).await.ok()?;
                if value.chars().count() != 1 {
                    return None;
                }
                observed.push_str(&value);
            }
            return Some(observed);
        }
        let field = resolver.probe(&targets.single).await?;
        page.input_value(&field.element)
            .await
            .ok()
            .map(|value| digits_only(&value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::{FakeElement, FakePage, InputModel, WriteChannel, keypad};
    use crate::error::ActionErrorKind;

    fn pin_targets() -> WidgetTargets {
        WidgetTargets::for_intent(CodeIntent::CreatePin, None)
    }

    fn engine() -> CodeEntryEngine {
        CodeEntryEngine {
            widget_timeout: Duration::from_secs(2),
            ..CodeEntryEngine::default()
        }
    }

    fn pin_sink() -> FakeElement {
        FakeElement::input("pin-value")
            .attr("type", "password")
            .css(r#"input[type="password"]"#)
            .input_model(InputModel::accepting(&[]))
            .hidden()
    }

    #[tokio::test(start_paused = true)]
    async fn keypad_entry_verifies_exact_value() {
        let page = FakePage::new(vec![pin_sink()]);
        keypad(&page, "pin-value");

        let state = engine()
            .enter(&page, "0000", &pin_targets())
            .await
            .expect("keypad entry");
        assert_eq!(state.shape, Some(WidgetShape::Keypad));
        assert!(state.is_complete());
        assert_eq!(page.value("pin-value"), "0000");
        assert_eq!(
            state.history,
            vec![
                EntryPhase::Idle,
                EntryPhase::AwaitingWidget,
                EntryPhase::EnteringDigits,
                EntryPhase::Verifying,
                EntryPhase::Complete,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn double_registered_keypress_is_not_complete() {
        let page = FakePage::new(vec![pin_sink()]);
        keypad(&page, "pin-value");
        // Key "1" registers twice.
        page.on_click(
            "key-1",
            std::sync::Arc::new(|dom: &mut crate::driver::fake::FakeDom| {
                if let Some(el) = dom.element_mut("pin-value") {
                    el.value.push_str("11");
                }
            }),
        );

        let err = engine()
            .enter(&page, "1234", &pin_targets())
            .await
            .expect_err("five digits observed for a four digit code");
        assert_eq!(err.kind(), ActionErrorKind::CodeEntryFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn per_box_inputs_each_hold_one_digit() {
        let boxes = (0..6)
            .map(|i| {
                FakeElement::input(&format!("otp-{i}"))
                    .css(PER_BOX_SELECTOR)
                    .input_model(InputModel::plain().max_length(1))
            })
            .collect();
        let page = FakePage::new(boxes);

        let state = engine()
            .enter(&page, "482913", &WidgetTargets::for_intent(CodeIntent::Otp, None))
            .await
            .expect("per-box entry");
        assert_eq!(state.shape, Some(WidgetShape::PerBox));
        assert_eq!(state.confirmed, "482913");
        assert_eq!(page.value("otp-5"), "3");
    }

    #[tokio::test(start_paused = true)]
    async fn single_field_falls_back_to_keystrokes() {
        let page = FakePage::new(vec![
            FakeElement::input("otp")
                .attr("autocomplete", "one-time-code")
                .css(r#"input[autocomplete="one-time-code"]"#)
                .input_model(InputModel::accepting(&[
                    WriteChannel::Fill,
                    WriteChannel::Keystrokes,
                ])),
        ]);

        let state = engine()
            .enter(&page, "5521", &WidgetTargets::for_intent(CodeIntent::Otp, None))
            .await
            .expect("single field entry");
        assert_eq!(state.shape, Some(WidgetShape::SingleField));
        assert_eq!(page.value("otp"), "5521");
        assert_eq!(page.count_events("type:otp"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn maxlength_shorter_than_code_never_completes() {
        let page = FakePage::new(vec![
            FakeElement::input("otp")
                .css(r#"input[name="otp"]"#)
                .input_model(InputModel::plain().max_length(4)),
        ]);

        let err = engine()
            .enter(&page, "123456", &WidgetTargets::for_intent(CodeIntent::Otp, None))
            .await
            .expect_err("truncated value is not the code");
        assert_eq!(err.kind(), ActionErrorKind::CodeEntryFailed);
        assert_eq!(page.value("otp"), "1234");
    }

    #[tokio::test(start_paused = true)]
    async fn unverified_keypad_falls_through_to_single_field() {
        let page = FakePage::new(vec![
            FakeElement::input("pin")
                .attr("inputmode", "numeric")
                .css(r#"input[inputmode="numeric"]"#),
        ]);
        // Keys exist but do nothing.
        for digit in '0'..='9' {
            page.with(|dom| dom.push(FakeElement::keypad_key(&format!("key-{digit}"), digit)));
        }

        let state = engine()
            .enter(&page, "0000", &pin_targets())
            .await
            .expect("single field accepted the code");
        assert_eq!(state.shape, Some(WidgetShape::SingleField));
        assert!(state.history.contains(&EntryPhase::Verifying));
        assert_eq!(page.value("pin"), "0000");
    }

    #[tokio::test(start_paused = true)]
    async fn pin_fallback_leaves_plain_text_inputs_alone() {
        let page = FakePage::new(vec![FakeElement::input("nickname")]);
        for digit in '0'..='9' {
            page.with(|dom| dom.push(FakeElement::keypad_key(&format!("key-{digit}"), digit)));
        }

        let err = engine()
            .enter(&page, "0000", &pin_targets())
            .await
            .expect_err("keypad never verifies and no PIN field exists");
        assert_eq!(err.kind(), ActionErrorKind::CodeEntryFailed);
        assert_eq!(page.value("nickname"), "");
        assert_eq!(page.count_events("type:nickname"), 0);
        assert_eq!(page.count_events("fill:nickname"), 0);
        assert_eq!(page.count_events("dispatch:nickname"), 0);
    }

    #[test]
    fn only_otp_targets_fall_back_to_any_input() {
        use crate::actions::target::LocatorStrategy;

        let has_catch_all = |intent| {
            WidgetTargets::for_intent(intent, None)
                .single
                .strategies()
                .iter()
                .any(|entry| {
                    matches!(
                        &entry.strategy,
                        LocatorStrategy::Css { selector } if selector == "input"
                    )
                })
        };
        assert!(has_catch_all(CodeIntent::Otp));
        assert!(!has_catch_all(CodeIntent::CreatePin));
        assert!(!has_catch_all(CodeIntent::EnterPin));
    }

    #[tokio::test(start_paused = true)]
    async fn no_widget_fails_after_bounded_wait() {
        let page = FakePage::new(vec![FakeElement::button("next", "Next")]);
        let started = tokio::time::Instant::now();
        let err = engine()
            .enter(&page, "0000", &pin_targets())
            .await
            .expect_err("no widget");
        assert_eq!(err.kind(), ActionErrorKind::CodeEntryFailed);
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_non_digit_codes() {
        let page = FakePage::new(Vec::new());
        let err = engine()
            .enter(&page, "12a4", &pin_targets())
            .await
            .expect_err("invalid code");
        assert_eq!(err.kind(), ActionErrorKind::CodeEntryFailed);
    }
}
