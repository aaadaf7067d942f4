//! Chromiumoxide-based browser runtime.
//!
//! One [`ChromiumoxideRuntime`] owns one local Chrome process launched from a
//! [`LocalPlan`]. It hands out [`HarnessPage`]s, moves storage state in and
//! out of the browser, and removes its throwaway profile on close.

use std::path::PathBuf;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    Cookie, CookieParam, CookieSameSite, TimeSinceEpoch,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::cdp::browser_protocol::storage::{GetCookiesParams, SetCookiesParams};
use chromiumoxide::page::Page as ChromiumPage;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::{fs, sync::Mutex, task::JoinHandle};

use crate::browser::{BrowserRuntimeError, LocalPlan};
use crate::page::HarnessPage;
use crate::session::{OriginState, StorageEntry, StorageState, StoredCookie};

const RESTORED_MARKER: &str = "__harnessStorageRestored";

/// Opaque origins (about:blank, data:) throw on `localStorage` access.
const DUMP_LOCAL_STORAGE: &str = "(() => { try { return { origin: location.origin, entries: Object.entries(window.localStorage) }; } catch (_) { return { origin: 'null', entries: [] }; } })()";

pub struct ChromiumoxideRuntime {
    state: Mutex<Option<RuntimeState>>,
}

struct RuntimeState {
    browser: Browser,
    handler: JoinHandle<()>,
    user_data_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct LocalStorageDump {
    origin: String,
    entries: Vec<(String, String)>,
}

impl ChromiumoxideRuntime {
    /// Start Chrome for `plan`.
    pub async fn launch(plan: &LocalPlan) -> Result<Self, BrowserRuntimeError> {
        fs::create_dir_all(&plan.user_data_dir)
            .await
            .map_err(|err| BrowserRuntimeError::Message(err.to_string()))?;
        let config = build_config(plan)?;
        let (browser, handler) = Browser::launch(config)
            .await
            .map_err(map_chromiumoxide_error)?;
        log::debug!(
            "launched {:?} browser with profile {}",
            plan.role,
            plan.user_data_dir.display()
        );

        Ok(ChromiumoxideRuntime {
            state: Mutex::new(Some(RuntimeState {
                browser,
                handler: spawn_handler(handler),
                user_data_dir: plan.user_data_dir.clone(),
            })),
        })
    }

    /// Open a blank tab with `storage` applied. Cookies are set up front;
    /// local storage is written the first time each saved origin loads.
    pub async fn new_page(
        &self,
        storage: Option<&StorageState>,
    ) -> Result<HarnessPage, BrowserRuntimeError> {
        let guard = self.state.lock().await;
        let state = guard.as_ref().ok_or(BrowserRuntimeError::NotInitialized)?;

        if let Some(storage) = storage.filter(|storage| !storage.cookies.is_empty()) {
            let cookies = storage
                .cookies
                .iter()
                .map(cookie_param)
                .collect::<Result<Vec<_>, _>>()?;
            state
                .browser
                .execute(SetCookiesParams::new(cookies))
                .await
                .map_err(map_chromiumoxide_error)?;
        }

        let page = state
            .browser
            .new_page("about:blank")
            .await
            .map_err(map_chromiumoxide_error)?;
        for origin in storage.map(|storage| storage.origins.as_slice()).unwrap_or_default() {
            if origin.local_storage.is_empty() {
                continue;
            }
            page.evaluate_on_new_document(AddScriptToEvaluateOnNewDocumentParams::new(
                restore_script(origin)?,
            ))
            .await
            .map_err(map_chromiumoxide_error)?;
        }
        Ok(HarnessPage::new(page))
    }

    /// All browser cookies plus the local storage of `page`'s current origin.
    pub async fn storage_state(
        &self,
        page: &ChromiumPage,
    ) -> Result<StorageState, BrowserRuntimeError> {
        let guard = self.state.lock().await;
        let state = guard.as_ref().ok_or(BrowserRuntimeError::NotInitialized)?;

        let cookies = state
            .browser
            .execute(GetCookiesParams::default())
            .await
            .map_err(map_chromiumoxide_error)?
            .result
            .cookies
            .iter()
            .map(stored_cookie)
            .collect();

        let dump: LocalStorageDump = page
            .evaluate(DUMP_LOCAL_STORAGE)
            .await
            .map_err(map_chromiumoxide_error)?
            .into_value()
            .map_err(map_chromiumoxide_error)?;
        let origins = if dump.origin == "null" || dump.entries.is_empty() {
            Vec::new()
        } else {
            vec![OriginState {
                origin: dump.origin,
                local_storage: dump
                    .entries
                    .into_iter()
                    .map(|(name, value)| StorageEntry { name, value })
                    .collect(),
            }]
        };

        Ok(StorageState { cookies, origins })
    }

    /// Close Chrome and remove the profile. Safe to call twice.
    pub async fn close(&self) -> Result<(), BrowserRuntimeError> {
        let Some(mut state) = self.state.lock().await.take() else {
            return Ok(());
        };
        let closed = state.browser.close().await.map_err(map_chromiumoxide_error);
        if closed.is_ok() {
            if let Err(err) = state.browser.wait().await {
                log::debug!("waiting for chrome to exit failed: {err}");
            }
        }
        state.handler.abort();
        if let Err(err) = fs::remove_dir_all(&state.user_data_dir).await {
            log::warn!(
                "failed to remove temporary user data dir {}: {err}",
                state.user_data_dir.display()
            );
        }
        closed.map(|_| ())
    }
}

fn build_config(plan: &LocalPlan) -> Result<BrowserConfig, BrowserRuntimeError> {
    let launch = &plan.launch_options;

    let viewport = chromiumoxide::handler::viewport::Viewport {
        width: launch.viewport.width,
        height: launch.viewport.height,
        device_scale_factor: None,
        emulating_mobile: false,
        is_landscape: launch.viewport.width >= launch.viewport.height,
        has_touch: false,
    };

    let mut builder = BrowserConfig::builder();

    if let Some(path) = &plan.chrome_executable {
        builder = builder.chrome_executable(path);
    }

    let builder = builder
        .viewport(viewport)
        .args(launch.args.clone())
        .user_data_dir(&plan.user_data_dir);

    let builder = if launch.headless {
        builder
    } else {
        builder.with_head()
    };

    let builder = if !launch.ignore_https_errors {
        builder.respect_https_errors()
    } else {
        builder
    };

    let builder = if !launch.locale.is_empty() {
        builder.arg(format!("--lang={}", launch.locale))
    } else {
        builder
    };

    let builder = if !launch.timezone_id.is_empty() {
        builder.arg(format!("--timezone={}", launch.timezone_id))
    } else {
        builder
    };

    builder.build().map_err(BrowserRuntimeError::Message)
}

fn map_chromiumoxide_error<E: std::fmt::Display>(err: E) -> BrowserRuntimeError {
    BrowserRuntimeError::Message(err.to_string())
}

fn spawn_handler(mut handler: chromiumoxide::handler::Handler) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(result) = handler.next().await {
            if let Err(err) = result {
                log::warn!("chromiumoxide handler error: {err}");
            }
        }
    })
}

fn cookie_param(cookie: &StoredCookie) -> Result<CookieParam, BrowserRuntimeError> {
    let mut builder = CookieParam::builder()
        .name(cookie.name.clone())
        .value(cookie.value.clone())
        .domain(cookie.domain.clone())
        .path(cookie.path.clone())
        .http_only(cookie.http_only)
        .secure(cookie.secure);
    if cookie.expires > 0.0 {
        builder = builder.expires(TimeSinceEpoch::new(cookie.expires));
    }
    if let Some(same_site) = cookie
        .same_site
        .as_deref()
        .and_then(|raw| raw.parse::<CookieSameSite>().ok())
    {
        builder = builder.same_site(same_site);
    }
    builder.build().map_err(BrowserRuntimeError::Message)
}

fn stored_cookie(cookie: &Cookie) -> StoredCookie {
    StoredCookie {
        name: cookie.name.clone(),
        value: cookie.value.clone(),
        domain: cookie.domain.clone(),
        path: cookie.path.clone(),
        expires: if cookie.session { -1.0 } else { cookie.expires },
        http_only: cookie.http_only,
        secure: cookie.secure,
        same_site: cookie
            .same_site
            .as_ref()
            .map(|same_site| same_site.as_ref().to_string()),
    }
}

fn js_literal<T: Serialize + ?Sized>(value: &T) -> Result<String, BrowserRuntimeError> {
    serde_json::to_string(value).map_err(map_chromiumoxide_error)
}

/// Script that seeds `origin`'s local storage once per tab.
fn restore_script(origin: &OriginState) -> Result<String, BrowserRuntimeError> {
    let entries: Vec<(&str, &str)> = origin
        .local_storage
        .iter()
        .map(|entry| (entry.name.as_str(), entry.value.as_str()))
        .collect();
    Ok(format!(
        "(() => {{\n  if (location.origin !== {origin}) return;\n  if (sessionStorage.getItem({marker})) return;\n  sessionStorage.setItem({marker}, '1');\n  for (const [name, value] of {entries}) localStorage.setItem(name, value);\n}})();",
        origin = js_literal(origin.origin.trim_end_matches('/'))?,
        marker = js_literal(RESTORED_MARKER)?,
        entries = js_literal(&entries)?,
    ))
}
