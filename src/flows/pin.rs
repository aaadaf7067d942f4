//! PIN creation and PIN entry.
//!
//! Both screens render the same keypad, so the caller's intent decides what
//! is allowed: landing on the creation screen while logging in means the
//! account is not in the expected state and must abort rather than create a
//! second PIN.

use std::time::Duration;

use tokio::time::{Instant, sleep};

use super::FlowError;
use crate::actions::{
    ActionTarget, ClickPlan, ClickableGate, CodeEntryEngine, CodeEntryState, CodeIntent,
    GateMode, LocatorResolver, WidgetTargets, click_element,
};
use crate::driver::{ClickMethod, PageDriver};
use crate::error::ActionError;

pub const CREATE_SCREEN_PATTERN: &str = r"(?i)create (a |your )?pin|set (up )?(a |your )?pin";
pub const ENTER_SCREEN_PATTERN: &str = r"(?i)enter (your )?pin|welcome back";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinScreen {
    Create,
    Enter,
}

impl PinScreen {
    fn label(self) -> &'static str {
        match self {
            PinScreen::Create => "PIN creation",
            PinScreen::Enter => "PIN entry",
        }
    }

    fn expected_for(intent: CodeIntent) -> Option<PinScreen> {
        match intent {
            CodeIntent::CreatePin => Some(PinScreen::Create),
            CodeIntent::EnterPin => Some(PinScreen::Enter),
            CodeIntent::Otp => None,
        }
    }
}

/// Poll page text for a PIN screen heading.
pub async fn detect_pin_screen(page: &dyn PageDriver, timeout: Duration) -> Option<PinScreen> {
    let create = regex::Regex::new(CREATE_SCREEN_PATTERN).ok()?;
    let enter = regex::Regex::new(ENTER_SCREEN_PATTERN).ok()?;
    let deadline = Instant::now() + timeout;
    loop {
        if let Ok(text) = page.body_text().await {
            if create.is_match(&text) {
                return Some(PinScreen::Create);
            }
            if enter.is_match(&text) {
                return Some(PinScreen::Enter);
            }
        }
        let now = Instant::now();
        if now >= deadline {
            return None;
        }
        sleep(Duration::from_millis(200).min(deadline - now)).await;
    }
}

/// Buttons that move past the PIN screen once the code is in.
pub fn follow_up_captions(intent: CodeIntent) -> &'static [&'static str] {
    match intent {
        CodeIntent::CreatePin => &["Continue"],
        CodeIntent::EnterPin => &["Log in", "Login", "Continue"],
        CodeIntent::Otp => &[],
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinEntry {
    pub engine: CodeEntryEngine,
    /// How long to look for a recognisable screen heading.
    pub screen_timeout: Duration,
    pub follow_up_timeout: Duration,
}

impl Default for PinEntry {
    fn default() -> Self {
        PinEntry {
            engine: CodeEntryEngine::default(),
            screen_timeout: Duration::from_secs(5),
            follow_up_timeout: Duration::from_secs(15),
        }
    }
}

impl PinEntry {
    /// Enter `pin` for `intent`, refusing to act on the other PIN screen.
    ///
    /// A page without a recognisable heading is still attempted.
    pub async fn submit(
        &self,
        page: &dyn PageDriver,
        intent: CodeIntent,
        pin: &str,
    ) -> Result<CodeEntryState, ActionError> {
        if let Some(expected) = PinScreen::expected_for(intent) {
            match detect_pin_screen(page, self.screen_timeout).await {
                Some(found) if found != expected => {
                    return Err(ActionError::UnexpectedScreen {
                        expected: expected.label(),
                        found: found.label(),
                    });
                }
                Some(_) => {}
                None => log::debug!("no PIN heading seen; entering {intent:?} anyway"),
            }
        }
        self.engine
            .enter(page, pin, &WidgetTargets::for_intent(intent, None))
            .await
    }

    /// Press the follow-up button for `intent`, waiting for it to enable.
    pub async fn follow_up(
        &self,
        page: &dyn PageDriver,
        intent: CodeIntent,
    ) -> Result<ClickMethod, FlowError> {
        let target = ActionTarget::button(follow_up_captions(intent))
            .budget(self.follow_up_timeout)
            .build();
        let resolved = LocatorResolver::new(page).resolve(&target).await?;
        let plan = ClickPlan {
            gate_mode: GateMode::Wait,
            gate: ClickableGate::new(Duration::from_millis(250), 40),
            methods: vec![ClickMethod::Forced, ClickMethod::Script],
            ..ClickPlan::default()
        };
        Ok(click_element(page, &resolved.element, target.description(), &plan).await?)
    }
}
