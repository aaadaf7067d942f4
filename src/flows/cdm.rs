//! CDM back-office approval of a freshly onboarded user.
//!
//! Runs in its own admin browser: identity-verification list, the user's
//! row, both document checklists, race update, liveness review and the
//! final Approve. The CDM storage state is written back on success.

use std::time::Duration;

use tokio::time::sleep;
use url::Url;

use super::{FlowContext, FlowError, FlowRecorder, ScopedSession, SessionSpec, Step};
use crate::actions::{
    ActionTarget, AriaRole, ClickPlan, LocatorResolver, LocatorStrategy, TextMatcher, click_target,
};
use crate::config::HarnessConfig;
use crate::driver::{ClickMethod, ElementHandle, PageDriver};

pub const VERIFICATION_PATH: &str = "/users/identity-verification/";
pub const CHECK_BLOCK: &str = "div.my-4";
pub const SUBMIT_SELECTOR: &str = r#"button[type="submit"]:not([onclick*="startVoipCall"]), input[type="submit"]:not([onclick*="startVoipCall"])"#;
pub const RACE_FORM: &str = r#"form.update-form[action*="/users/update-race/"]"#;
pub const RACE_SELECT: &str = r#"select#id_race, select[name="race"]"#;
pub const RACE_UPDATE: &str = r#"button.btn.btn-accent, input[type="submit"]"#;
pub const REVIEW_FORM: &str = r#"form.review-form[action*="/users/review-liveness/"]"#;
pub const LATEST_ID_LABEL: &str = "ID provided is the latest issued ID";

/// Document checks as (field name, label caption).
pub const DOCUMENT_CHECKS: [(&str, &str); 7] = [
    ("image_contains_id", "Image contains an ID"),
    ("id_readable", "ID is readable and not blurry"),
    ("id_of_person", "Image is the ID of the person signing up"),
    ("image_in_color", "Image is in colour"),
    ("id_condition", "ID is in an acceptable condition"),
    ("id_in_frame", "The ID is in frame"),
    ("latest_id", LATEST_ID_LABEL),
];

/// The first checklist has no "latest ID" box.
pub const FIRST_BLOCK_CHECKS: usize = 6;

pub const LIVENESS_CHECKS: [&str; 5] = [
    "person_visible",
    "enough_light",
    "person_matches_id",
    "sound_recorded",
    "client_confirmed",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CdmTimings {
    /// Pause on the CDM home page before opening the list.
    pub settle: Duration,
    pub row_attempts: u32,
    pub row_wait: Duration,
    pub retry_pause: Duration,
    pub click_timeout: Duration,
    pub wait_timeout: Duration,
    pub after_submit: Duration,
    pub approve_timeout: Duration,
}

impl CdmTimings {
    pub fn from_config(config: &HarnessConfig) -> Self {
        CdmTimings {
            settle: Duration::from_secs(3),
            row_attempts: 5,
            row_wait: Duration::from_secs(5),
            retry_pause: Duration::from_secs(2),
            click_timeout: Duration::from_millis(config.click_timeout_ms),
            wait_timeout: Duration::from_millis(config.wait_timeout_ms),
            after_submit: Duration::from_millis(config.cdm_after_submit_ms),
            approve_timeout: Duration::from_secs(8),
        }
    }
}

fn parse_url(raw: &str) -> Result<Url, FlowError> {
    Url::parse(raw).map_err(|source| FlowError::InvalidUrl {
        url: raw.to_string(),
        source,
    })
}

/// Identity-verification list on the CDM origin.
pub fn verification_url(cdm_url: &str) -> Result<String, FlowError> {
    let origin = parse_url(cdm_url)?.origin().ascii_serialization();
    Ok(format!("{origin}{VERIFICATION_PATH}"))
}

/// First single-quoted string in a row's `onclick` handler.
pub fn onclick_destination(onclick: &str) -> Option<&str> {
    let start = onclick.find('\'')? + 1;
    let len = onclick[start..].find('\'')?;
    Some(&onclick[start..start + len]).filter(|dest| !dest.is_empty())
}

fn user_row(id: &str, budget: Duration) -> ActionTarget {
    ActionTarget::builder(format!("row for {id}"))
        .budget(budget)
        .within("tr", "td", TextMatcher::contains(id))
        .build()
}

/// Find the list row containing `id`, reloading between attempts.
pub async fn find_user_row(
    page: &dyn PageDriver,
    id: &str,
    timings: &CdmTimings,
) -> Result<ElementHandle, FlowError> {
    let target = user_row(id, timings.row_wait);
    let attempts = timings.row_attempts.max(1);
    for attempt in 1..=attempts {
        match LocatorResolver::new(page).resolve(&target).await {
            Ok(found) => return Ok(found.element),
            Err(err) => log::debug!("row for {id} not found ({attempt}/{attempts}): {err}"),
        }
        if attempt < attempts {
            sleep(timings.retry_pause).await;
            page.reload().await?;
        }
    }
    Err(FlowError::RowNotFound {
        id: id.to_string(),
        attempts,
    })
}

/// Follow the row's `onclick` URL, or click the row when it has none.
pub async fn open_user_row(page: &dyn PageDriver, row: &ElementHandle) -> Result<(), FlowError> {
    let onclick = page.attribute(row, "onclick").await?.unwrap_or_default();
    match onclick_destination(&onclick) {
        Some(relative) => {
            let current = page.current_url().await?;
            let dest = parse_url(&current)?
                .join(relative)
                .map_err(|source| FlowError::InvalidUrl {
                    url: relative.to_string(),
                    source,
                })?;
            page.goto(dest.as_str()).await?;
        }
        None => page.click(row, ClickMethod::Forced).await?,
    }
    Ok(())
}

async fn scoped_query(
    page: &dyn PageDriver,
    scope: &ElementHandle,
    strategy: &LocatorStrategy,
) -> Vec<ElementHandle> {
    page.query_within(scope, strategy).await.unwrap_or_else(|err| {
        log::debug!("query in {scope} failed: {err}");
        Vec::new()
    })
}

async fn force_click(page: &dyn PageDriver, element: &ElementHandle) -> Result<(), FlowError> {
    if let Err(err) = page.click(element, ClickMethod::Forced).await {
        log::debug!("forced click on {element} failed: {err}; trying script click");
        page.click(element, ClickMethod::Script).await?;
    }
    Ok(())
}

/// Tick the checkbox `name` inside `scope` unless it already is.
///
/// Looks for `input[name=..]`, then `#id_..`, then clicks the label.
/// Returns whether anything was found.
pub async fn tick(
    page: &dyn PageDriver,
    scope: &ElementHandle,
    name: &str,
    label: &str,
) -> Result<bool, FlowError> {
    for selector in [format!(r#"input[name="{name}"]"#), format!("#id_{name}")] {
        if let Some(checkbox) = scoped_query(page, scope, &LocatorStrategy::css(selector))
            .await
            .into_iter()
            .next()
        {
            if !page.is_checked(&checkbox).await.unwrap_or(false) {
                force_click(page, &checkbox).await?;
            }
            return Ok(true);
        }
    }
    let by_label = LocatorStrategy::Text {
        matcher: TextMatcher::contains(label),
    };
    match scoped_query(page, scope, &by_label).await.into_iter().next() {
        Some(caption) => {
            force_click(page, &caption).await?;
            Ok(true)
        }
        None => {
            log::debug!("no checkbox for {name}");
            Ok(false)
        }
    }
}

/// Press the form's submit button, never the VoIP call button.
pub async fn submit_form(
    page: &dyn PageDriver,
    form: &ElementHandle,
    after: Duration,
) -> Result<bool, FlowError> {
    let mut candidates = scoped_query(page, form, &LocatorStrategy::css(SUBMIT_SELECTOR)).await;
    candidates.extend(
        scoped_query(
            page,
            form,
            &LocatorStrategy::Role {
                role: AriaRole::Button,
                name: TextMatcher::exact("Submit"),
            },
        )
        .await,
    );
    for candidate in candidates {
        let onclick = page.attribute(&candidate, "onclick").await?.unwrap_or_default();
        if onclick.contains("startVoipCall") {
            continue;
        }
        force_click(page, &candidate).await?;
        if !after.is_zero() {
            sleep(after).await;
        }
        return Ok(true);
    }
    log::debug!("no submit button in {form}");
    Ok(false)
}

async fn checklist(
    page: &dyn PageDriver,
    block: &ElementHandle,
    checks: &[(&str, &str)],
    after: Duration,
) -> Result<(), FlowError> {
    let mut ticked = 0;
    for (name, label) in checks {
        if tick(page, block, name, label).await? {
            ticked += 1;
        }
    }
    log::debug!("ticked {ticked}/{} in {block}", checks.len());
    let form = page.closest(block, "form").await?.unwrap_or_else(|| block.clone());
    submit_form(page, &form, after).await?;
    Ok(())
}

async fn first_document_block(page: &dyn PageDriver, timings: &CdmTimings) -> Result<(), FlowError> {
    let blocks = ActionTarget::builder("document checklist")
        .budget(timings.wait_timeout)
        .css(CHECK_BLOCK)
        .build();
    let block = LocatorResolver::new(page).resolve(&blocks).await?.element;
    checklist(page, &block, &DOCUMENT_CHECKS[..FIRST_BLOCK_CHECKS], timings.after_submit).await
}

/// The block holding the "latest ID" box, else the second checklist.
async fn second_document_block(page: &dyn PageDriver, timings: &CdmTimings) -> Result<(), FlowError> {
    let latest = ActionTarget::builder("latest ID label")
        .budget(timings.wait_timeout)
        .text(TextMatcher::contains(LATEST_ID_LABEL))
        .build();
    let block = match LocatorResolver::new(page).probe(&latest).await {
        Some(label) => page.closest(&label.element, CHECK_BLOCK).await?,
        None => None,
    };
    let block = match block {
        Some(block) => block,
        None => page
            .query(&LocatorStrategy::css(CHECK_BLOCK))
            .await?
            .into_iter()
            .nth(1)
            .ok_or_else(|| crate::error::ActionError::ElementNotFound {
                target: "second document checklist".to_string(),
                strategies: 2,
                budget: timings.wait_timeout,
            })?,
    };
    checklist(page, &block, &DOCUMENT_CHECKS, timings.after_submit).await
}

fn capitalised(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Set the race select by value, then by capitalised label, then by typing.
pub async fn update_race(
    page: &dyn PageDriver,
    race: &str,
    timings: &CdmTimings,
) -> Result<(), FlowError> {
    let form_target = ActionTarget::builder("race form")
        .budget(timings.wait_timeout)
        .css(RACE_FORM)
        .build();
    let form = LocatorResolver::new(page).resolve(&form_target).await?.element;
    let select = scoped_query(page, &form, &LocatorStrategy::css(RACE_SELECT))
        .await
        .into_iter()
        .next()
        .ok_or_else(|| crate::error::ActionError::ElementNotFound {
            target: "race select".to_string(),
            strategies: 1,
            budget: timings.wait_timeout,
        })?;

    let race = race.to_lowercase();
    let mut selected = page.select_option(&select, &race).await?;
    if !selected {
        selected = page.select_option(&select, &capitalised(&race)).await?;
    }
    if !selected {
        log::debug!("race {race:?} not among options; typing it");
        page.click(&select, ClickMethod::Forced).await?;
        page.type_text(&select, &format!("{race}\n"), Duration::from_millis(10))
            .await?;
    }

    let mut update = scoped_query(page, &form, &LocatorStrategy::css(RACE_UPDATE)).await;
    update.extend(
        scoped_query(
            page,
            &form,
            &LocatorStrategy::Role {
                role: AriaRole::Button,
                name: TextMatcher::contains("Update"),
            },
        )
        .await,
    );
    match update.first() {
        Some(button) => force_click(page, button).await?,
        None => log::debug!("no race update button"),
    }
    Ok(())
}

pub async fn review_liveness(page: &dyn PageDriver, timings: &CdmTimings) -> Result<(), FlowError> {
    let form_target = ActionTarget::builder("liveness review form")
        .budget(timings.wait_timeout)
        .css(REVIEW_FORM)
        .build();
    let form = LocatorResolver::new(page).resolve(&form_target).await?.element;
    for name in LIVENESS_CHECKS {
        tick(page, &form, name, &name.replace('_', " ")).await?;
    }
    submit_form(page, &form, timings.after_submit).await?;
    Ok(())
}

pub async fn approve(page: &dyn PageDriver, timings: &CdmTimings) -> Result<(), FlowError> {
    let target = ActionTarget::button(&["Approve"])
        .budget(timings.approve_timeout)
        .build();
    let plan = ClickPlan::default()
        .without_gate()
        .with_methods(&[ClickMethod::Forced, ClickMethod::Script]);
    click_target(page, &target, &plan).await?;
    Ok(())
}

/// Approve the user with `id_number` in a separate CDM browser.
pub async fn verify_user(
    ctx: &FlowContext<'_>,
    recorder: &mut FlowRecorder,
    id_number: &str,
    timings: &CdmTimings,
) -> Result<(), FlowError> {
    let config = ctx.config;
    let list_url = verification_url(&config.cdm_url)?;
    let spec = SessionSpec::admin(config).persisting(config.cdm_state_path.clone());
    ctx.logger.info(
        format!("verifying {id_number} in CDM"),
        Some("cdm"),
        Some(serde_json::json!({ "list": list_url })),
    );

    ScopedSession::run(ctx.launcher, &spec, |page| async move {
        let page = page.as_ref();
        recorder
            .run(Step::required("open verification list"), async {
                page.goto(&config.cdm_url).await?;
                sleep(timings.settle).await;
                page.goto(&list_url).await?;
                Ok(())
            })
            .await?;
        recorder
            .run(Step::required("open user"), async {
                let row = find_user_row(page, id_number, timings).await?;
                open_user_row(page, &row).await
            })
            .await?;
        recorder
            .run(
                Step::optional("first document checklist"),
                first_document_block(page, timings),
            )
            .await?;
        recorder
            .run(
                Step::optional("second document checklist"),
                second_document_block(page, timings),
            )
            .await?;
        recorder
            .run(
                Step::optional("race"),
                update_race(page, &config.race_option, timings),
            )
            .await?;
        recorder
            .run(Step::optional("liveness review"), review_liveness(page, timings))
            .await?;
        recorder
            .run(Step::required("approve"), approve(page, timings))
            .await?;
        Ok(())
    })
    .await?;

    ctx.logger
        .info(format!("{id_number} approved"), Some("cdm"), None);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::driver::fake::{FakeDom, FakeElement, FakePage};
    use crate::flows::fake::FakeLauncher;
    use crate::flows::{SessionRole, StepStatus};
    use crate::logging::capturing_logger;

    const ID: &str = "8207106197083";
    const LIST: &str = "https://cdm.st4ge.com/users/identity-verification/";
    const DETAIL: &str = "https://cdm.st4ge.com/users/identity-verification/42/";

    fn checkbox(name: &str, parent: &str) -> FakeElement {
        FakeElement::new(&format!("{parent}-{name}"))
            .css(&format!(r#"input[name="{name}"]"#))
            .attr("type", "checkbox")
            .parent(parent)
    }

    fn submit(key: &str, parent: &str) -> FakeElement {
        FakeElement::new(key)
            .css(r#"button[type="submit"]:not([onclick*="startVoipCall"])"#)
            .parent(parent)
    }

    fn detail_screen() -> Vec<FakeElement> {
        let mut screen = vec![
            FakeElement::new("form-1").css("form"),
            FakeElement::new("block-1").css(CHECK_BLOCK).parent("form-1"),
            FakeElement::new("voip")
                .css(r#"button[type="submit"]:not([onclick*="startVoipCall"])"#)
                .attr("onclick", "startVoipCall(42)")
                .parent("form-1"),
            submit("submit-1", "form-1"),
            FakeElement::new("form-2").css("form"),
            FakeElement::new("block-2").css(CHECK_BLOCK).parent("form-2"),
            FakeElement::new("latest-label")
                .css("label")
                .text(LATEST_ID_LABEL)
                .parent("block-2"),
            FakeElement::new("block-2-latest")
                .css("#id_latest_id")
                .attr("type", "checkbox")
                .parent("block-2"),
            submit("submit-2", "form-2"),
            FakeElement::new("race-form").css(RACE_FORM),
            FakeElement::new("race")
                .css("select#id_race")
                .option("C", "Coloured")
                .option("W", "White")
                .parent("race-form"),
            FakeElement::new("update").css("button.btn.btn-accent").parent("race-form"),
            FakeElement::new("review").css(REVIEW_FORM),
            FakeElement::new("confirm-label")
                .css("label")
                .text("client confirmed")
                .parent("review"),
            submit("submit-review", "review"),
            FakeElement::button("approve", "Approve"),
        ];
        for (name, _) in &DOCUMENT_CHECKS[..FIRST_BLOCK_CHECKS] {
            let mut cb = checkbox(name, "block-1");
            if *name == "id_readable" {
                cb.checked = true;
            }
            screen.push(cb);
            screen.push(checkbox(name, "block-2"));
        }
        for name in &LIVENESS_CHECKS[..4] {
            screen.push(checkbox(name, "review"));
        }
        screen
    }

    fn cdm_page() -> FakePage {
        let page = FakePage::new(Vec::new());
        page.on_goto(
            LIST,
            Arc::new(|dom: &mut FakeDom| {
                dom.replace_screen(vec![FakeElement::new("header").css("tr").text("ID number")]);
            }),
        );
        // The user only shows up after the first reload.
        page.on_reload(Arc::new(|dom: &mut FakeDom| {
            dom.push(
                FakeElement::new("row")
                    .css("tr")
                    .contains("td", ID)
                    .attr("onclick", "window.location.href='42/'"),
            );
        }));
        page.on_goto(
            DETAIL,
            Arc::new(|dom: &mut FakeDom| dom.replace_screen(detail_screen())),
        );
        page
    }

    fn quick(config: &HarnessConfig) -> CdmTimings {
        CdmTimings {
            row_wait: Duration::from_secs(1),
            ..CdmTimings::from_config(config)
        }
    }

    #[test]
    fn urls_from_cdm_settings() {
        assert_eq!(verification_url("https://cdm.st4ge.com/admin/x").unwrap(), LIST);
        assert!(matches!(
            verification_url("not a url"),
            Err(FlowError::InvalidUrl { .. })
        ));
        assert_eq!(
            onclick_destination("window.location.href='/users/identity-verification/7/'"),
            Some("/users/identity-verification/7/")
        );
        assert_eq!(onclick_destination("doSomething()"), None);
        assert_eq!(capitalised("coloured"), "Coloured");
    }

    #[tokio::test(start_paused = true)]
    async fn approves_user_in_separate_browser() {
        let launcher = FakeLauncher::new(|_| cdm_page());
        let config = HarnessConfig::default();
        let (logger, _) = capturing_logger();
        let ctx = FlowContext::new(&config, &logger, &launcher);
        let mut recorder = ctx.recorder("cdm");

        verify_user(&ctx, &mut recorder, ID, &quick(&config))
            .await
            .expect("approved");

        assert_eq!(launcher.opened(), vec![SessionRole::Admin]);
        assert_eq!(launcher.closed(), 1);
        assert_eq!(
            launcher.saved(),
            vec![config.cdm_state_path.display().to_string()]
        );

        let page = launcher.pages().remove(0);
        assert_eq!(page.count_events("reload"), 1);
        assert_eq!(page.count_events(&format!("goto:{DETAIL}")), 1);
        page.with(|dom| {
            for (name, _) in &DOCUMENT_CHECKS[..FIRST_BLOCK_CHECKS] {
                assert!(dom.element(&format!("block-1-{name}")).unwrap().checked, "{name}");
                assert!(dom.element(&format!("block-2-{name}")).unwrap().checked, "{name}");
            }
            assert!(dom.element("block-2-latest").unwrap().checked);
            assert_eq!(dom.value_of("race"), "C");
        });
        assert_eq!(page.count_events("click:block-1-id_readable"), 0);
        assert_eq!(page.count_events("click:voip"), 0);
        assert_eq!(page.count_events("click:submit-1"), 1);
        assert_eq!(page.count_events("click:submit-2"), 1);
        assert_eq!(page.count_events("click:update"), 1);
        assert_eq!(page.count_events("click:confirm-label"), 1);
        assert_eq!(page.count_events("click:submit-review"), 1);
        assert_eq!(page.count_events("click:approve"), 1);

        let report = recorder.finish();
        assert_eq!(report.metrics.skipped_steps, 0);
        assert_eq!(report.status_of("approve"), Some(&StepStatus::Completed));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_row_fails_and_closes_without_saving() {
        let launcher = FakeLauncher::new(|_| {
            let page = FakePage::new(Vec::new());
            page.on_goto(
                LIST,
                Arc::new(|dom: &mut FakeDom| {
                    dom.replace_screen(vec![FakeElement::new("header").css("tr")]);
                }),
            );
            page
        });
        let config = HarnessConfig::default();
        let (logger, _) = capturing_logger();
        let ctx = FlowContext::new(&config, &logger, &launcher);
        let mut recorder = ctx.recorder("cdm");

        let err = verify_user(&ctx, &mut recorder, ID, &quick(&config))
            .await
            .expect_err("row never appears");
        match err {
            FlowError::RequiredStep { step, source } => {
                assert_eq!(step, "open user");
                assert!(matches!(*source, FlowError::RowNotFound { attempts: 5, .. }));
            }
            other => panic!("unexpected {other}"),
        }
        assert_eq!(launcher.closed(), 1);
        assert!(launcher.saved().is_empty());
        assert_eq!(launcher.pages()[0].count_events("reload"), 4);
    }
}
