//! "Personalise My Products" questionnaire and the "Start Earning" hand-off.

use std::time::Duration;

use super::signup::click_next;
use super::{FlowContext, FlowError, FlowRecorder, Step, clicked};
use crate::actions::{
    ActionTarget, AriaRole, ClickPlan, LocatorResolver, TextMatcher, click_button, click_target,
};
use crate::config::HarnessConfig;
use crate::driver::{ClickMethod, PageDriver};

pub const PERSONALISE_CAPTIONS: [&str; 1] = ["Personalise My Products"];
pub const LETS_GO_CAPTIONS: [&str; 2] = ["Lets Go!", "Let's Go!"];
pub const START_EARNING_CAPTIONS: [&str; 2] = ["Start Earning!", "Start Earning"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersonaliseTimings {
    pub entry_timeout: Duration,
    pub question_timeout: Duration,
    pub option_timeout: Duration,
    pub next_timeout: Duration,
}

impl Default for PersonaliseTimings {
    fn default() -> Self {
        PersonaliseTimings {
            entry_timeout: Duration::from_secs(15),
            question_timeout: Duration::from_secs(10),
            option_timeout: Duration::from_secs(8),
            next_timeout: Duration::from_secs(15),
        }
    }
}

/// One questionnaire screen and the answer configured for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Question {
    pub step: &'static str,
    pub prompt: &'static str,
    pub answer: &'static str,
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "Yes" } else { "No" }
}

pub fn questions(config: &HarnessConfig) -> [Question; 4] {
    [
        Question {
            step: "employment",
            prompt: "Are you currently employed?",
            answer: yes_no(config.employed),
        },
        Question {
            step: "income",
            prompt: "What are you currently earning per month?",
            answer: config.income_band.caption(),
        },
        Question {
            step: "tax region",
            prompt: "Where are you registered for tax?",
            answer: config.tax_region.caption(),
        },
        Question {
            step: "debt review",
            prompt: "Are you currently under debt review, or have you ever been declared insolvent?",
            answer: yes_no(config.debt_review),
        },
    ]
}

fn option_target(answer: &str, budget: Duration) -> ActionTarget {
    ActionTarget::builder(format!("option {answer}"))
        .budget(budget)
        .role(AriaRole::Button, TextMatcher::exact(answer))
        .within(r#"div[tabindex="0"]"#, "h1", TextMatcher::exact(answer))
        .within("button", "h1", TextMatcher::exact(answer))
        .build()
}

/// Wait for the question, pick the answer, then press Next.
///
/// A missing option card is logged and Next is still pressed, since some
/// screens preselect an answer.
pub async fn answer_question(
    page: &dyn PageDriver,
    question: &Question,
    timings: &PersonaliseTimings,
) -> Result<(), FlowError> {
    let prompt = ActionTarget::builder(question.step)
        .budget(timings.question_timeout)
        .text(TextMatcher::contains(question.prompt))
        .build();
    LocatorResolver::new(page).resolve(&prompt).await?;

    let plan = ClickPlan::default()
        .without_gate()
        .with_methods(&[ClickMethod::Forced]);
    if let Err(err) = click_target(page, &option_target(question.answer, timings.option_timeout), &plan).await {
        log::debug!("{} option {:?} not clicked: {err}", question.step, question.answer);
    }
    click_next(page, timings.next_timeout).await
}

/// Answer the questionnaire from config. Stops short of "Start Earning".
pub async fn run_personalise(
    ctx: &FlowContext<'_>,
    page: &dyn PageDriver,
    recorder: &mut FlowRecorder,
    timings: &PersonaliseTimings,
) -> Result<(), FlowError> {
    let entry = timings.entry_timeout;
    recorder
        .run(Step::optional("personalise my products"), async {
            clicked(
                click_button(page, &PERSONALISE_CAPTIONS, entry).await,
                "Personalise My Products",
                entry,
            )
        })
        .await?;
    recorder
        .run(Step::optional("let's go"), async {
            clicked(
                click_button(page, &LETS_GO_CAPTIONS, entry).await,
                "Let's Go",
                entry,
            )
        })
        .await?;
    for question in questions(ctx.config) {
        recorder
            .run(
                Step::optional(question.step),
                answer_question(page, &question, timings),
            )
            .await?;
    }
    Ok(())
}

pub async fn start_earning(
    page: &dyn PageDriver,
    recorder: &mut FlowRecorder,
    timeout: Duration,
) -> Result<(), FlowError> {
    recorder
        .run(Step::required("start earning"), async {
            clicked(
                click_button(page, &START_EARNING_CAPTIONS, timeout).await,
                "Start Earning",
                timeout,
            )
        })
        .await?;
    Ok(())
}
