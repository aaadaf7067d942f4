//! Phone signup through to the personal-details screens.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::otp::{enter_otp, fetch_admin_otp, is_otp_required};
use super::{FlowContext, FlowError, FlowRecorder, Step};
use crate::actions::{
    ActionTarget, AriaRole, ClickPlan, FieldSetter, LocatorResolver, LocatorStrategy, TextMatcher,
    ValueComparison, click_target,
};
use crate::driver::PageDriver;
use crate::media::UserMedia;

const DETAIL_FIELD_BUDGET: Duration = Duration::from_secs(20);

/// What the applicant typed during signup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignupDetails {
    pub phone: String,
    pub name: String,
    pub id_number: String,
    pub email: String,
}

impl SignupDetails {
    pub fn new(seed: &str, id_number: &str, phone: impl Into<String>) -> Self {
        SignupDetails {
            phone: phone.into(),
            name: name_for_seed(seed),
            id_number: id_number.chars().filter(char::is_ascii_digit).take(13).collect(),
            email: email_for_seed(seed),
        }
    }

    pub fn for_media(media: &UserMedia, phone: impl Into<String>) -> Self {
        SignupDetails::new(&media.seed, &media.id, phone)
    }
}

fn alphanumeric(seed: &str) -> String {
    seed.chars().filter(char::is_ascii_alphanumeric).collect()
}

/// `User<seed>`, at most 12 characters.
pub fn name_for_seed(seed: &str) -> String {
    format!("User{}", alphanumeric(seed)).chars().take(12).collect()
}

pub fn email_for_seed(seed: &str) -> String {
    let local: String = alphanumeric(seed).to_lowercase().chars().take(18).collect();
    format!("test+{local}@gmail.com")
}

/// A `082` mobile number with seven digits derived from `seed` and the clock.
pub fn generate_phone(seed: &str) -> String {
    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    chrono::Utc::now().timestamp_nanos_opt().hash(&mut hasher);
    format!("082{}", 1_000_000 + hasher.finish() % 9_000_000)
}

pub fn phone_target(custom_selector: Option<&str>, budget: Duration) -> ActionTarget {
    let builder = ActionTarget::builder("phone number").budget(budget);
    match custom_selector {
        Some(selector) => builder.css(selector).build(),
        None => builder
            .css(r#"input[type="tel"]"#)
            .css(r#"input[data-testid="phone-input"][type="tel"]"#)
            .css(r#"input[aria-label="Phone number"]"#)
            .attribute("placeholder", TextMatcher::regex("(?i)082 567 6728|phone|tel"))
            .role(AriaRole::Textbox, TextMatcher::regex("(?i)phone number"))
            .css("input")
            .build(),
    }
}

/// Type `digits` into the phone field.
///
/// Without a custom selector, a page with exactly one input uses that input.
pub async fn set_phone_number(
    page: &dyn PageDriver,
    digits: &str,
    custom_selector: Option<&str>,
    budget: Duration,
) -> Result<(), FlowError> {
    let setter = FieldSetter::phone();
    if custom_selector.is_none() {
        let inputs = page.query(&LocatorStrategy::css("input")).await?;
        if let [only] = inputs.as_slice() {
            setter.set(page, only, digits, "phone number").await?;
            return Ok(());
        }
    }
    setter
        .set_target(page, &phone_target(custom_selector, budget), digits)
        .await?;
    Ok(())
}

pub fn sms_button(budget: Duration) -> ActionTarget {
    ActionTarget::builder("SMS button")
        .budget(budget)
        .role(AriaRole::Button, TextMatcher::regex("(?i)sms"))
        .build()
}

pub async fn click_next(page: &dyn PageDriver, budget: Duration) -> Result<(), FlowError> {
    let next = ActionTarget::button(&["Next"]).budget(budget).build();
    click_target(page, &next, &ClickPlan::default()).await?;
    Ok(())
}

/// Phone, SMS and OTP. Shared by signup and login.
pub async fn verify_phone(
    ctx: &FlowContext<'_>,
    page: &dyn PageDriver,
    recorder: &mut FlowRecorder,
    phone: &str,
) -> Result<(), FlowError> {
    let config = ctx.config;
    let budget = ctx.click_timeout().max(Duration::from_secs(10));
    recorder
        .run(
            Step::required("phone number"),
            set_phone_number(page, phone, config.phone_selector.as_deref(), budget),
        )
        .await?;
    recorder
        .run(Step::required("request SMS"), async {
            click_target(page, &sms_button(budget), &ClickPlan::default()).await?;
            Ok(())
        })
        .await?;
    recorder
        .run(Step::required("OTP"), async {
            if !is_otp_required(page, config.otp_check_selector.as_deref()).await {
                ctx.logger
                    .info("no OTP prompt shown; continuing", Some("otp"), None);
                return Ok(());
            }
            let code = fetch_admin_otp(ctx).await?;
            enter_otp(page, &code, config.otp_check_selector.as_deref()).await?;
            Ok(())
        })
        .await?;
    Ok(())
}

fn name_field() -> ActionTarget {
    ActionTarget::builder("name")
        .budget(DETAIL_FIELD_BUDGET)
        .css(r#"input[placeholder="Name"]"#)
        .build()
}

fn id_number_field() -> ActionTarget {
    ActionTarget::builder("ID number")
        .budget(DETAIL_FIELD_BUDGET)
        .css(r#"input[placeholder="9807130178080"]"#)
        .attribute("placeholder", TextMatcher::regex(r"^\d{10,}$"))
        .css(r#"input[inputmode="numeric"][maxlength="13"]"#)
        .css(r#"input[maxlength="13"]"#)
        .css(r#"input[type="text"]"#)
        .build()
}

fn email_field() -> ActionTarget {
    ActionTarget::builder("email")
        .budget(DETAIL_FIELD_BUDGET)
        .css(r#"input[placeholder="email@gmail.com"]"#)
        .css(r#"input[type="email"]"#)
        .css(r#"input[inputmode="email"]"#)
        .attribute("placeholder", TextMatcher::contains("@"))
        .build()
}

async fn fill_and_next(
    page: &dyn PageDriver,
    field: &ActionTarget,
    value: &str,
    comparison: ValueComparison,
    next_budget: Duration,
) -> Result<(), FlowError> {
    let resolved = LocatorResolver::new(page).resolve(field).await?;
    FieldSetter::new(comparison)
        .set(page, &resolved.element, value, field.description())
        .await?;
    if let Err(err) = page.blur(&resolved.element).await {
        log::debug!("blur on {} failed: {err}", field.description());
    }
    click_next(page, next_budget).await
}

/// Open the app and complete phone verification and the personal details.
pub async fn run_signup(
    ctx: &FlowContext<'_>,
    page: &dyn PageDriver,
    recorder: &mut FlowRecorder,
    details: &SignupDetails,
) -> Result<(), FlowError> {
    let budget = ctx.click_timeout().max(Duration::from_secs(5));
    recorder
        .run(Step::required("open app"), async {
            page.goto(&ctx.config.app_url).await?;
            Ok(())
        })
        .await?;
    verify_phone(ctx, page, recorder, &details.phone).await?;
    recorder
        .run(
            Step::required("name"),
            fill_and_next(page, &name_field(), &details.name, ValueComparison::Exact, budget),
        )
        .await?;
    recorder
        .run(
            Step::required("ID number"),
            fill_and_next(
                page,
                &id_number_field(),
                &details.id_number,
                ValueComparison::DigitsOnly,
                budget,
            ),
        )
        .await?;
    recorder
        .run(
            Step::required("email"),
            fill_and_next(page, &email_field(), &details.email, ValueComparison::Exact, budget),
        )
        .await?;
    ctx.logger.info(
        format!("signed up {} ({})", details.name, details.phone),
        Some("signup"),
        Some(serde_json::json!({ "id_number": details.id_number, "email": details.email })),
    );
    Ok(())
}
