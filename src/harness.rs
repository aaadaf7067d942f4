//! Real-browser implementation of the session seam used by flows.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::browser::LocalPlan;
use crate::config::HarnessConfig;
use crate::driver::PageDriver;
use crate::flows::{BrowserSession, FlowError, SessionLauncher, SessionSpec};
use crate::page::HarnessPage;
use crate::runtime::ChromiumoxideRuntime;
use crate::session::StorageState;

/// Opens a separate local Chrome per [`SessionSpec`].
pub struct ChromiumLauncher {
    config: HarnessConfig,
}

impl ChromiumLauncher {
    pub fn new(config: HarnessConfig) -> Self {
        ChromiumLauncher { config }
    }
}

#[async_trait]
impl SessionLauncher for ChromiumLauncher {
    async fn open(&self, spec: &SessionSpec) -> Result<Box<dyn BrowserSession>, FlowError> {
        let plan = LocalPlan::for_session(&self.config, spec.role)
            .map_err(crate::browser::BrowserRuntimeError::from)?;
        let storage = match spec.storage_state.as_deref() {
            Some(path) => {
                let state = StorageState::load(path)?;
                if state.is_none() {
                    log::info!(
                        "no storage state at {}; starting a clean {:?} profile",
                        path.display(),
                        spec.role
                    );
                }
                state
            }
            None => None,
        };

        let runtime = ChromiumoxideRuntime::launch(&plan).await?;
        let page = match runtime.new_page(storage.as_ref()).await {
            Ok(page) => page,
            Err(err) => {
                if let Err(close_err) = runtime.close().await {
                    log::warn!("closing half-opened browser failed: {close_err}");
                }
                return Err(err.into());
            }
        };
        Ok(Box::new(ChromiumSession {
            runtime,
            page: Arc::new(page),
        }))
    }
}

struct ChromiumSession {
    runtime: ChromiumoxideRuntime,
    page: Arc<HarnessPage>,
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    fn page(&self) -> Arc<dyn PageDriver> {
        self.page.clone()
    }

    async fn save_storage_state(&self, path: &Path) -> Result<(), FlowError> {
        let state = self.runtime.storage_state(self.page.inner()).await?;
        state.save(path)?;
        log::debug!(
            "saved {} cookies and {} origins to {}",
            state.cookies.len(),
            state.origins.len(),
            path.display()
        );
        Ok(())
    }

    async fn close(&mut self) -> Result<(), FlowError> {
        self.runtime.close().await?;
        Ok(())
    }
}
