//! Clicking with clickability gating and delivery fallbacks.

use std::time::Duration;

use tokio::time::sleep;

use super::gate::ClickableGate;
use super::locator::LocatorResolver;
use super::target::ActionTarget;
use crate::driver::{ClickMethod, ElementHandle, PageDriver};
use crate::error::ActionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateMode {
    Skip,
    /// Wait for clickability but click anyway when it never arrives.
    Wait,
    /// Fail with `NotInteractable` when the gate gives up.
    Require,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClickPlan {
    pub gate_mode: GateMode,
    pub gate: ClickableGate,
    pub methods: Vec<ClickMethod>,
    pub rounds: u32,
    pub round_pause: Duration,
}

impl Default for ClickPlan {
    fn default() -> Self {
        ClickPlan {
            gate_mode: GateMode::Wait,
            gate: ClickableGate::new(Duration::from_millis(250), 8),
            methods: vec![ClickMethod::Pointer, ClickMethod::Forced, ClickMethod::Script],
            rounds: 1,
            round_pause: Duration::from_millis(200),
        }
    }
}

impl ClickPlan {
    /// Gate strictly, then force click, Enter, and script click in turn.
    pub fn gated_submit() -> Self {
        ClickPlan {
            gate_mode: GateMode::Require,
            gate: ClickableGate::default(),
            methods: vec![ClickMethod::Forced, ClickMethod::EnterKey, ClickMethod::Script],
            ..ClickPlan::default()
        }
    }

    pub fn with_rounds(mut self, rounds: u32) -> Self {
        self.rounds = rounds.max(1);
        self
    }

    pub fn with_methods(mut self, methods: &[ClickMethod]) -> Self {
        self.methods = methods.to_vec();
        self
    }

    pub fn without_gate(mut self) -> Self {
        self.gate_mode = GateMode::Skip;
        self
    }
}

pub async fn click_element(
    page: &dyn PageDriver,
    element: &ElementHandle,
    description: &str,
    plan: &ClickPlan,
) -> Result<ClickMethod, ActionError> {
    match plan.gate_mode {
        GateMode::Skip => {}
        GateMode::Wait => {
            if !plan.gate.wait_until_clickable(page, element).await {
                log::debug!("{description} still not clickable; clicking anyway");
            }
        }
        GateMode::Require => {
            plan.gate
                .require_clickable(page, element, description)
                .await?
        }
    }

    for round in 0..plan.rounds {
        for method in &plan.methods {
            match page.click(element, *method).await {
                Ok(()) => return Ok(*method),
                Err(err) => log::debug!("{description}: {method:?} click failed in round {round}: {err}"),
            }
        }
        if round + 1 < plan.rounds {
            sleep(plan.round_pause).await;
        }
    }

    Err(ActionError::RetryExhausted {
        action: format!("click {description}"),
        attempts: plan.rounds * u32::try_from(plan.methods.len()).unwrap_or(u32::MAX),
    })
}

pub async fn click_target(
    page: &dyn PageDriver,
    target: &ActionTarget,
    plan: &ClickPlan,
) -> Result<ClickMethod, ActionError> {
    let resolved = LocatorResolver::new(page).resolve(target).await?;
    click_element(page, &resolved.element, target.description(), plan).await
}

/// Click a button captioned with any of `captions`; `false` when none shows up
/// within `timeout` or every click fails.
pub async fn click_button(page: &dyn PageDriver, captions: &[&str], timeout: Duration) -> bool {
    let target = ActionTarget::button(captions)
        .budget(timeout)
        .build();
    match click_target(page, &target, &ClickPlan::default()).await {
        Ok(_) => true,
        Err(err) => {
            log::debug!("{} not clicked: {err}", target.description());
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::ElementState;
    use crate::driver::fake::{FakeElement, FakePage};
    use crate::error::ActionErrorKind;

    #[tokio::test(start_paused = true)]
    async fn clicks_button_by_caption_variants() {
        let page = FakePage::new(vec![FakeElement::button("go", "Let's Go!")]);
        assert!(click_button(&page, &["Lets Go!", "Let's Go!"], Duration::from_secs(1)).await);
        assert_eq!(page.count_events("click:go:Pointer"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn h1_card_is_clicked_through_structural_strategy() {
        let page = FakePage::new(vec![
            FakeElement::new("card")
                .css(r#"div[tabindex="0"]"#)
                .contains("h1", "Upload"),
        ]);
        assert!(click_button(&page, &["Upload"], Duration::from_secs(1)).await);
        assert_eq!(page.count_events("click:card"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn falls_back_to_later_click_methods() {
        let page = FakePage::new(vec![
            FakeElement::button("submit", "Submit")
                .failing_click(ClickMethod::Forced)
                .failing_click(ClickMethod::EnterKey),
        ]);
        let method = click_element(
            &page,
            &ElementHandle::new("submit"),
            "Submit",
            &ClickPlan::gated_submit(),
        )
        .await
        .expect("script click lands");
        assert_eq!(method, ClickMethod::Script);
    }

    #[tokio::test(start_paused = true)]
    async fn required_gate_blocks_disabled_button() {
        let page = FakePage::new(vec![FakeElement::button("submit", "Submit").state(
            ElementState {
                aria_disabled: true,
                ..ElementState::default()
            },
        )]);
        let err = click_element(
            &page,
            &ElementHandle::new("submit"),
            "Submit",
            &ClickPlan::gated_submit(),
        )
        .await
        .expect_err("never enabled");
        assert_eq!(err.kind(), ActionErrorKind::NotInteractable);
        assert_eq!(page.count_events("click:"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_button_reports_false() {
        let page = FakePage::new(Vec::new());
        assert!(!click_button(&page, &["Continue"], Duration::from_millis(300)).await);
    }
}
