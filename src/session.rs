//! Persisted browser storage state and interactive state capture.
//!
//! The on-disk format is Playwright's `storageState` JSON so files captured
//! by either tool are interchangeable:
//!
//! ```json
//! { "cookies": [{ "name": "sid", "value": "…", "domain": ".st4ge.com",
//!                 "path": "/", "expires": -1, "httpOnly": true,
//!                 "secure": true, "sameSite": "Lax" }],
//!   "origins": [{ "origin": "https://app.st4ge.com",
//!                 "localStorage": [{ "name": "token", "value": "…" }] }] }
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{Instant, sleep, timeout};

use crate::actions::{ActionTarget, LocatorResolver};
use crate::driver::PageDriver;
use crate::flows::{FlowError, ScopedSession, SessionLauncher, SessionRole, SessionSpec, compile};

#[derive(Debug, Error)]
pub enum SessionStateError {
    #[error("storage state {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid storage state {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("login was not completed within {0:?}")]
    CaptureTimedOut(Duration),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageState {
    #[serde(default)]
    pub cookies: Vec<StoredCookie>,
    #[serde(default)]
    pub origins: Vec<OriginState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "root_path")]
    pub path: String,
    /// Unix seconds; `-1` for session cookies.
    #[serde(default = "session_expiry")]
    pub expires: f64,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

fn root_path() -> String {
    "/".to_string()
}

fn session_expiry() -> f64 {
    -1.0
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginState {
    pub origin: String,
    #[serde(default)]
    pub local_storage: Vec<StorageEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEntry {
    pub name: String,
    pub value: String,
}

impl StorageState {
    /// Read `path`; a missing file is `None` so callers start a clean profile.
    pub fn load(path: &Path) -> Result<Option<Self>, SessionStateError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(SessionStateError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| SessionStateError::Parse {
                path: path.to_path_buf(),
                source,
            })
    }

    pub fn save(&self, path: &Path) -> Result<(), SessionStateError> {
        let io_err = |source| SessionStateError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| SessionStateError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(io_err)
    }

    pub fn origin(&self, origin: &str) -> Option<&OriginState> {
        let origin = origin.trim_end_matches('/');
        self.origins
            .iter()
            .find(|entry| entry.origin.trim_end_matches('/') == origin)
    }
}

/// What signals that the operator finished logging in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureWait {
    Selector(String),
    UrlPattern(String),
    /// Enter pressed on stdin.
    Enter,
}

impl CaptureWait {
    /// Selector wins over URL pattern; neither means waiting for Enter.
    pub fn from_options(selector: Option<String>, url_pattern: Option<String>) -> Self {
        match (selector, url_pattern) {
            (Some(selector), _) => CaptureWait::Selector(selector),
            (None, Some(pattern)) => CaptureWait::UrlPattern(pattern),
            (None, None) => CaptureWait::Enter,
        }
    }

    async fn until_done(&self, page: &dyn PageDriver, limit: Duration) -> Result<(), FlowError> {
        match self {
            CaptureWait::Selector(selector) => {
                let target = ActionTarget::builder("login marker")
                    .budget(limit)
                    .css(selector.as_str())
                    .build();
                LocatorResolver::new(page)
                    .wait_for_any(&[&target], limit)
                    .await
                    .map(|_| ())
                    .ok_or(SessionStateError::CaptureTimedOut(limit).into())
            }
            CaptureWait::UrlPattern(pattern) => {
                let re = compile(pattern)?;
                let deadline = Instant::now() + limit;
                loop {
                    match page.current_url().await {
                        Ok(url) if re.is_match(&url) => return Ok(()),
                        Ok(_) => {}
                        Err(err) => log::debug!("url read failed: {err}"),
                    }
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(SessionStateError::CaptureTimedOut(limit).into());
                    }
                    sleep(Duration::from_millis(500).min(deadline - now)).await;
                }
            }
            CaptureWait::Enter => {
                println!("Press Enter here once login is complete to save the session...");
                let mut line = String::new();
                let mut stdin = BufReader::new(tokio::io::stdin());
                match timeout(limit, stdin.read_line(&mut line)).await {
                    Ok(Ok(_)) => Ok(()),
                    Ok(Err(source)) => Err(SessionStateError::Io {
                        path: PathBuf::from("<stdin>"),
                        source,
                    }
                    .into()),
                    Err(_) => Err(SessionStateError::CaptureTimedOut(limit).into()),
                }
            }
        }
    }
}

/// Open a fresh browser at `url`, wait for the operator to log in, then
/// write the storage state to `out`.
pub async fn capture_state(
    launcher: &dyn SessionLauncher,
    role: SessionRole,
    url: &str,
    wait: &CaptureWait,
    limit: Duration,
    out: &Path,
) -> Result<(), FlowError> {
    let spec = SessionSpec {
        role,
        storage_state: None,
        persist_to: Some(out.to_path_buf()),
    };
    log::info!("opening {url} for {role:?} login; waiting up to {limit:?}");
    ScopedSession::run(launcher, &spec, |page| async move {
        page.goto(url).await?;
        wait.until_done(page.as_ref(), limit).await
    })
    .await?;
    log::info!("saved storage state to {}", out.display());
    Ok(())
}
