//! Launch planning for local chromium sessions.
//!
//! Turns the harness configuration and a session role into a strongly-typed
//! [`LocalPlan`]. Every session gets its own throwaway profile directory so
//! the applicant and admin browsers never share cookies or a Chrome process.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::HarnessConfig;
use crate::flows::SessionRole;

/// Error surfaced while planning a launch.
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("fake camera file {0} does not exist")]
    MissingCameraFile(PathBuf),
}

#[derive(Debug, Error)]
pub enum BrowserRuntimeError {
    #[error("browser runtime error: {0}")]
    Message(String),
    #[error("browser runtime not initialized")]
    NotInitialized,
    #[error(transparent)]
    Plan(#[from] BrowserError),
}

/// Viewport dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Viewport {
            width: 1288,
            height: 711,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalLaunchOptions {
    pub headless: bool,
    pub args: Vec<String>,
    pub viewport: Viewport,
    pub locale: String,
    #[serde(rename = "timezoneId")]
    pub timezone_id: String,
    #[serde(rename = "ignoreHTTPSErrors")]
    pub ignore_https_errors: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalPlan {
    pub role: SessionRole,
    pub launch_options: LocalLaunchOptions,
    /// Fresh per session; removed when the session closes.
    pub user_data_dir: PathBuf,
    pub chrome_executable: Option<PathBuf>,
}

const BASE_ARGS: [&str; 3] = [
    "--disable-blink-features=AutomationControlled",
    "--no-sandbox",
    "--disable-setuid-sandbox",
];

/// Chrome flags that auto-accept the camera prompt and feed a synthetic
/// stream, optionally from a `.y4m` file.
pub fn fake_media_args(camera: Option<&Path>) -> Vec<String> {
    let mut args = vec![
        "--use-fake-ui-for-media-stream".to_string(),
        "--use-fake-device-for-media-stream".to_string(),
    ];
    if let Some(file) = camera {
        args.push(format!("--use-file-for-fake-video-capture={}", file.display()));
    }
    args
}

static NEXT_PROFILE: AtomicU32 = AtomicU32::new(0);

fn fresh_profile_dir(role: SessionRole) -> PathBuf {
    let slug = match role {
        SessionRole::App => "app",
        SessionRole::Admin => "admin",
    };
    env::temp_dir().join(format!(
        "onboarding-harness-{slug}-{}-{}",
        std::process::id(),
        NEXT_PROFILE.fetch_add(1, Ordering::Relaxed)
    ))
}

impl LocalPlan {
    /// Plan a browser for `role`. Only the applicant browser gets a camera.
    pub fn for_session(config: &HarnessConfig, role: SessionRole) -> Result<Self, BrowserError> {
        let mut args: Vec<String> = BASE_ARGS.iter().map(|arg| arg.to_string()).collect();
        if role == SessionRole::App {
            let camera = config.camera_y4m.as_deref();
            if let Some(file) = camera.filter(|file| !file.is_file()) {
                return Err(BrowserError::MissingCameraFile(file.to_path_buf()));
            }
            args.extend(fake_media_args(camera));
        }

        Ok(LocalPlan {
            role,
            launch_options: LocalLaunchOptions {
                headless: config.headless,
                args,
                viewport: Viewport::default(),
                locale: "en-ZA".to_string(),
                timezone_id: "Africa/Johannesburg".to_string(),
                ignore_https_errors: true,
            },
            user_data_dir: fresh_profile_dir(role),
            chrome_executable: config.chrome_executable.clone(),
        })
    }
}
