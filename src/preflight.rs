//! HTTP reachability check run before any browser is launched.

use std::time::Duration;

use reqwest::Client as HttpClient;
use serde::Serialize;
use thiserror::Error;

use crate::config::HarnessConfig;
use crate::metrics::{elapsed_ms, start_step_timer};

#[derive(Debug, Error)]
pub enum PreflightError {
    #[error("failed to construct preflight HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("unreachable: {}", .0.join(", "))]
    Unreachable(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Probe {
    pub name: &'static str,
    pub url: String,
    pub status: Option<u16>,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl Probe {
    /// Any response below 500 counts; the admin answers 302/403 when logged out.
    pub fn reachable(&self) -> bool {
        self.status.is_some_and(|status| status < 500)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PreflightReport {
    pub probes: Vec<Probe>,
}

impl PreflightReport {
    pub fn ensure_reachable(&self) -> Result<(), PreflightError> {
        let failed: Vec<String> = self
            .probes
            .iter()
            .filter(|probe| !probe.reachable())
            .map(|probe| match (&probe.status, &probe.error) {
                (Some(status), _) => format!("{} {} ({status})", probe.name, probe.url),
                (None, Some(error)) => format!("{} {} ({error})", probe.name, probe.url),
                (None, None) => format!("{} {}", probe.name, probe.url),
            })
            .collect();
        if failed.is_empty() {
            Ok(())
        } else {
            Err(PreflightError::Unreachable(failed))
        }
    }
}

async fn probe(client: &HttpClient, name: &'static str, url: String) -> Probe {
    let started = start_step_timer();
    let response = client.get(&url).send().await;
    let elapsed_ms = elapsed_ms(started);
    match response {
        Ok(response) => {
            let status = response.status().as_u16();
            log::debug!("preflight {name} {url}: {status} in {elapsed_ms}ms");
            Probe {
                name,
                url,
                status: Some(status),
                error: None,
                elapsed_ms,
            }
        }
        Err(err) => {
            log::warn!("preflight {name} {url} failed: {err}");
            Probe {
                name,
                url,
                status: None,
                error: Some(err.to_string()),
                elapsed_ms,
            }
        }
    }
}

/// GET the app and the CDM admin once each.
pub async fn run_preflight(
    config: &HarnessConfig,
    timeout: Duration,
) -> Result<PreflightReport, PreflightError> {
    let client = HttpClient::builder()
        .timeout(timeout)
        .build()
        .map_err(PreflightError::Client)?;
    let probes = vec![
        probe(&client, "app", config.app_url.clone()).await,
        probe(&client, "cdm", config.cdm_url.clone()).await,
    ];
    Ok(PreflightReport { probes })
}
