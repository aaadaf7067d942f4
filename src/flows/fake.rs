//! Session launcher double backed by [`FakePage`]s.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{BrowserSession, FlowError, SessionLauncher, SessionRole, SessionSpec};
use crate::config::HarnessConfig;
use crate::driver::PageDriver;
use crate::driver::fake::{FakeDom, FakeElement, FakePage};
use crate::flows::otp::LATEST_ROW_LINK;

type PageFactory = Box<dyn Fn(SessionRole) -> FakePage + Send + Sync>;

#[derive(Default)]
struct Journal {
    opened: Vec<SessionRole>,
    closed: usize,
    saved: Vec<String>,
    pages: Vec<Arc<FakePage>>,
}

pub(crate) struct FakeLauncher {
    factory: PageFactory,
    journal: Arc<Mutex<Journal>>,
}

impl FakeLauncher {
    pub fn new(factory: impl Fn(SessionRole) -> FakePage + Send + Sync + 'static) -> Self {
        FakeLauncher {
            factory: Box::new(factory),
            journal: Arc::new(Mutex::new(Journal::default())),
        }
    }

    pub fn opened(&self) -> Vec<SessionRole> {
        self.journal.lock().unwrap().opened.clone()
    }

    pub fn closed(&self) -> usize {
        self.journal.lock().unwrap().closed
    }

    pub fn saved(&self) -> Vec<String> {
        self.journal.lock().unwrap().saved.clone()
    }

    /// Pages handed out so far, in open order.
    pub fn pages(&self) -> Vec<Arc<FakePage>> {
        self.journal.lock().unwrap().pages.clone()
    }
}

#[async_trait]
impl SessionLauncher for FakeLauncher {
    async fn open(&self, spec: &SessionSpec) -> Result<Box<dyn BrowserSession>, FlowError> {
        let page = Arc::new((self.factory)(spec.role));
        let mut journal = self.journal.lock().unwrap();
        journal.opened.push(spec.role);
        journal.pages.push(Arc::clone(&page));
        Ok(Box::new(FakeSession {
            page,
            journal: Arc::clone(&self.journal),
        }))
    }
}

struct FakeSession {
    page: Arc<FakePage>,
    journal: Arc<Mutex<Journal>>,
}

#[async_trait]
impl BrowserSession for FakeSession {
    fn page(&self) -> Arc<dyn PageDriver> {
        self.page.clone()
    }

    async fn save_storage_state(&self, path: &Path) -> Result<(), FlowError> {
        self.journal
            .lock()
            .unwrap()
            .saved
            .push(path.display().to_string());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), FlowError> {
        self.journal.lock().unwrap().closed += 1;
        Ok(())
    }
}

/// Admin page whose OTP list opens onto `detail` for the newest row.
pub(crate) fn admin_otp_page(detail: Vec<FakeElement>) -> FakePage {
    let page = FakePage::new(Vec::new());
    page.on_goto(
        &HarnessConfig::default().otp_list_url(),
        Arc::new(|dom: &mut FakeDom| {
            dom.replace_screen(vec![
                FakeElement::new("row")
                    .css(LATEST_ROW_LINK)
                    .text("+27825550000"),
            ]);
        }),
    );
    let detail = Arc::new(detail);
    page.on_click(
        "row",
        Arc::new(move |dom: &mut FakeDom| dom.replace_screen(detail.as_ref().clone())),
    );
    page
}

/// Admin page serving `code` in the OTP detail `pin` input.
pub(crate) fn admin_with_code(code: &str) -> FakePage {
    admin_otp_page(vec![
        FakeElement::input("pin").css("input#id_pin").value(code),
    ])
}
