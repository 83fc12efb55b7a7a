//! OpusTicketSubmitter - creates the outlay ticket in the OPUS portal.
//!
//! The flow is a fixed sequence of screens:
//! 1. launch portal, open "Min Økonomi" / "Bilag og fakturaer"
//! 2. fill the creditor and posting fields
//! 3. attach the receipt through the upload popup
//! 4. fill the account lines, run "Kontroller", then "Opret"
//!
//! Selectors are the portal's generated element ids and are tied to its
//! current layout. The form lives two frames deep, the upload popup one.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::js_protocol::runtime::RemoteObjectId;
use chromiumoxide::page::Page;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use super::BrowserSession;
use super::cpr::CprCipher;
use super::dom::{self, Locator, Scope};
use crate::domain::{OutlayRequest, SubmitError};
use crate::ports::{Submission, TicketSubmitter};

const MY_ECONOMY_TAB: &str = "//div[@class='TabText_SmallTabs' and text()='Min Økonomi']";
const RECEIPTS_TAB: &str = "//div[text()='Bilag og fakturaer']";
const CREATE_RECEIPT_LINK: &str =
    "/html/body/div[1]/table/tbody/tr[1]/td/div/div[1]/div[9]/div[2]/span[2]";

const FORM_FRAMES: [&str; 2] = ["contentAreaFrame", "ivuFrm_page0ivu0"];
const UPLOAD_FRAMES: [&str; 1] = ["URLSPW-0"];

const CREDITOR_FIELD: &str = "WD9A";
const FETCH_CREDITOR_BUTTON: &str = "WD9D";
const PAYMENT_TEXT_FIELD: &str = "WDF6";
const POSTING_TEXT_FIELD: &str = "WD0112";
const REFERENCE_FIELD: &str = "WD0119";
const AMOUNT_FIELD: &str = "WD0123";
const NEXT_AGENT_FIELD: &str = "WD0156";

const ATTACH_BUTTON: &str = "WD0189";
const FILE_INPUT: &str = "input[type='file']";
const UPLOAD_OK_BUTTON: &str = "/html/body/table/tbody/tr/td/div/div[1]/div/div[4]/div/table/tbody/tr/td[3]/table/tbody/tr/td[1]/div";

const LINE_ACCOUNT_FIELD: &str = "WD0222";
const LINE_AMOUNT_FIELD: &str = "WD0228";
const LINE_PSP_FIELD: &str = "WD0239-r";
const LINE_POSTING_TEXT_FIELD: &str = "WD023F";
const CONTROL_BUTTON: &str = "WD1E";
const CREATE_BUTTON: &str = "WD1B";

pub const CONTROL_OK_TEXT: &str = "Udgiftsbilag er kontrolleret og OK";

/// Timing and portal settings.
#[derive(Debug, Clone)]
pub struct OpusSettings {
    pub launch_url: String,
    /// Upper bound for each element wait.
    pub element_timeout: Duration,
    pub click_retries: u32,
    pub poll_interval: Duration,
    /// Pause after the creditor lookup and after the control check.
    pub settle_delay: Duration,
    /// Text shown after "Opret" succeeded. When unset, a successful click on
    /// "Opret" counts as created.
    pub confirmation_text: Option<String>,
}

impl OpusSettings {
    pub fn new(launch_url: impl Into<String>) -> Self {
        Self {
            launch_url: launch_url.into(),
            element_timeout: Duration::from_secs(10),
            click_retries: 4,
            poll_interval: Duration::from_millis(250),
            settle_delay: Duration::from_secs(2),
            confirmation_text: None,
        }
    }
}

pub struct OpusTicketSubmitter {
    settings: OpusSettings,
    cipher: CprCipher,
}

impl OpusTicketSubmitter {
    pub fn new(settings: OpusSettings, cipher: CprCipher) -> Self {
        Self { settings, cipher }
    }

    fn not_found(&self, what: impl ToString) -> SubmitError {
        SubmitError::ElementNotFound {
            locator: what.to_string(),
            timeout_secs: self.settings.element_timeout.as_secs(),
        }
    }

    /// Checks that need no browser: the receipt is on disk and the
    /// identifier decrypts. Returns the plain identifier.
    async fn prepare(&self, request: &OutlayRequest, receipt: &Path) -> Result<String, SubmitError> {
        if !tokio::fs::try_exists(receipt).await.unwrap_or(false) {
            return Err(SubmitError::AttachmentMissing(receipt.to_path_buf()));
        }
        self.cipher.decrypt(&request.cpr_encrypted)
    }

    /// Wait until every frame on `path` is attached and has a context.
    async fn enter(&self, page: &Page, path: &[&str]) -> Result<Scope, SubmitError> {
        let deadline = Instant::now() + self.settings.element_timeout;
        loop {
            if let Some(scope) = dom::frame_scope(page, path).await? {
                return Ok(scope);
            }
            if Instant::now() >= deadline {
                return Err(self.not_found(format!("frame={}", path.join("/"))));
            }
            sleep(self.settings.poll_interval).await;
        }
    }

    /// Poll until `locator` resolves or the element timeout passes.
    async fn wait_for(
        &self,
        page: &Page,
        scope: &Scope,
        locator: &Locator,
    ) -> Result<RemoteObjectId, SubmitError> {
        let deadline = Instant::now() + self.settings.element_timeout;
        loop {
            if let Some(element) = dom::resolve(page, scope, locator).await? {
                return Ok(element);
            }
            if Instant::now() >= deadline {
                return Err(self.not_found(locator));
            }
            sleep(self.settings.poll_interval).await;
        }
    }

    /// The portal re-renders while loading, so a click may land on a node
    /// that is being replaced; each attempt looks the element up again.
    async fn click(&self, page: &Page, scope: &Scope, locator: &Locator) -> Result<(), SubmitError> {
        for attempt in 1..=self.settings.click_retries {
            let element = self.wait_for(page, scope, locator).await?;
            match dom::click(page, &element).await {
                Ok(()) => {
                    debug!(%locator, attempt, "clicked");
                    return Ok(());
                }
                Err(e) => {
                    debug!(%locator, attempt, error = %e, "click not accepted yet");
                    sleep(Duration::from_secs(1)).await;
                }
            }
        }
        Err(SubmitError::ClickFailed {
            locator: locator.to_string(),
            attempts: self.settings.click_retries,
        })
    }

    async fn type_into(
        &self,
        page: &Page,
        scope: &Scope,
        locator: &Locator,
        text: &str,
    ) -> Result<(), SubmitError> {
        let element = self.wait_for(page, scope, locator).await?;
        dom::type_text(page, &element, text).await
    }

    /// Click a field, then type into it.
    async fn click_and_type(
        &self,
        page: &Page,
        scope: &Scope,
        locator: &Locator,
        text: &str,
    ) -> Result<(), SubmitError> {
        self.click(page, scope, locator).await?;
        self.type_into(page, scope, locator, text).await
    }

    async fn wait_until_loaded(&self, page: &Page) -> Result<(), SubmitError> {
        let deadline = Instant::now() + self.settings.element_timeout;
        loop {
            let state = dom::evaluate(page, &Scope::top(), "document.readyState").await?;
            if state.as_str() == Some("complete") {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(self.not_found("document.readyState=complete"));
            }
            sleep(self.settings.poll_interval).await;
        }
    }

    async fn text_present(&self, page: &Page, scope: &Scope, text: &str) -> Result<bool, SubmitError> {
        Ok(dom::resolve(page, scope, &Locator::containing_text(text))
            .await?
            .is_some())
    }

    async fn text_appears(&self, page: &Page, scope: &Scope, text: &str) -> Result<bool, SubmitError> {
        let deadline = Instant::now() + self.settings.element_timeout;
        loop {
            if self.text_present(page, scope, text).await? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            sleep(self.settings.poll_interval).await;
        }
    }

    async fn open_receipt_form(&self, page: &Page) -> Result<(), SubmitError> {
        page.goto(self.settings.launch_url.as_str())
            .await
            .map_err(dom::cdp)?;
        let top = Scope::top();
        for step in [MY_ECONOMY_TAB, RECEIPTS_TAB, CREATE_RECEIPT_LINK] {
            self.click(page, &top, &Locator::xpath(step)).await?;
        }
        Ok(())
    }

    async fn fill_header(&self, page: &Page, request: &OutlayRequest, cpr: &str) -> Result<(), SubmitError> {
        let form = self.enter(page, &FORM_FRAMES).await?;
        self.type_into(page, &form, &Locator::id(CREDITOR_FIELD), cpr).await?;
        self.click(page, &form, &Locator::id(FETCH_CREDITOR_BUTTON)).await?;
        sleep(self.settings.settle_delay).await;

        let fields = [
            (PAYMENT_TEXT_FIELD, request.posting_text.as_str()),
            (POSTING_TEXT_FIELD, request.posting_text.as_str()),
            (REFERENCE_FIELD, request.reference.as_str()),
            (AMOUNT_FIELD, request.amount.as_str()),
            (NEXT_AGENT_FIELD, request.next_agent.as_str()),
        ];
        for (id, value) in fields {
            self.type_into(page, &form, &Locator::id(id), value).await?;
        }
        Ok(())
    }

    async fn attach_receipt(&self, page: &Page, receipt: &Path) -> Result<(), SubmitError> {
        let form = self.enter(page, &FORM_FRAMES).await?;
        self.click(page, &form, &Locator::id(ATTACH_BUTTON)).await?;
        self.wait_until_loaded(page).await?;

        let popup = self.enter(page, &UPLOAD_FRAMES).await?;
        let input = self.wait_for(page, &popup, &Locator::css(FILE_INPUT)).await?;
        dom::set_file(page, &input, receipt).await?;
        self.click(page, &popup, &Locator::xpath(UPLOAD_OK_BUTTON)).await
    }

    async fn fill_lines_and_create(
        &self,
        page: &Page,
        request: &OutlayRequest,
    ) -> Result<Submission, SubmitError> {
        let form = self.enter(page, &FORM_FRAMES).await?;
        let lines = [
            (LINE_ACCOUNT_FIELD, request.account.as_str()),
            (LINE_AMOUNT_FIELD, request.amount.as_str()),
            (LINE_PSP_FIELD, request.psp.as_str()),
            (LINE_POSTING_TEXT_FIELD, request.posting_text.as_str()),
        ];
        for (id, value) in lines {
            self.click_and_type(page, &form, &Locator::id(id), value).await?;
        }

        self.click(page, &form, &Locator::id(CONTROL_BUTTON)).await?;
        sleep(self.settings.settle_delay).await;
        if !self.text_present(page, &form, CONTROL_OK_TEXT).await? {
            warn!(uuid = %request.uuid, "control check failed");
            return Ok(Submission::Rejected {
                reason: "Control check failed".to_string(),
            });
        }

        self.click(page, &form, &Locator::id(CREATE_BUTTON)).await?;
        if let Some(confirmation) = &self.settings.confirmation_text
            && !self.text_appears(page, &form, confirmation).await?
        {
            warn!(uuid = %request.uuid, "no creation confirmation");
            return Ok(Submission::Rejected {
                reason: "Creation confirmation absent".to_string(),
            });
        }
        Ok(Submission::Created)
    }
}

#[async_trait]
impl TicketSubmitter<BrowserSession> for OpusTicketSubmitter {
    async fn submit(
        &self,
        session: &mut BrowserSession,
        request: &OutlayRequest,
        receipt: &Path,
    ) -> Result<Submission, SubmitError> {
        let cpr = self.prepare(request, receipt).await?;

        let page = session.page();
        self.open_receipt_form(page).await?;
        self.fill_header(page, request, &cpr).await?;
        self.attach_receipt(page, receipt).await?;
        let submission = self.fill_lines_and_create(page, request).await?;
        if submission == Submission::Created {
            info!(uuid = %request.uuid, "outlay ticket created");
        }
        Ok(submission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::sample_data;

    fn submitter() -> (OpusTicketSubmitter, CprCipher) {
        let key = fernet::Fernet::generate_key();
        let settings = OpusSettings {
            element_timeout: Duration::from_millis(50),
            ..OpusSettings::new("http://127.0.0.1:9/portal")
        };
        let submitter = OpusTicketSubmitter::new(settings, CprCipher::new(&key).unwrap());
        (submitter, CprCipher::new(&key).unwrap())
    }

    fn request(cpr_token: &str) -> OutlayRequest {
        let mut data = sample_data("a");
        data["cpr_encrypted"] = serde_json::json!(cpr_token);
        serde_json::from_value(data).unwrap()
    }

    #[test]
    fn defaults_match_portal_timing() {
        let settings = OpusSettings::new("https://portal");
        assert_eq!(settings.element_timeout, Duration::from_secs(10));
        assert_eq!(settings.click_retries, 4);
        assert!(settings.confirmation_text.is_none());
    }

    #[tokio::test]
    async fn missing_receipt_fails_before_touching_the_browser() {
        let (submitter, cipher) = submitter();
        let request = request(&cipher.encrypt("0101901234"));
        let dir = tempfile::tempdir().unwrap();
        let receipt = request.receipt_path(dir.path());

        let err = submitter.prepare(&request, &receipt).await.unwrap_err();

        assert!(matches!(err, SubmitError::AttachmentMissing(path) if path == receipt));
    }

    #[tokio::test]
    async fn undecryptable_identifier_is_reported() {
        let (submitter, _) = submitter();
        let request = request("gAAAAA-not-ours");
        let dir = tempfile::tempdir().unwrap();
        let receipt = request.receipt_path(dir.path());
        std::fs::write(&receipt, b"%PDF").unwrap();

        let err = submitter.prepare(&request, &receipt).await.unwrap_err();

        assert!(matches!(err, SubmitError::Decrypt(_)));
    }

    #[tokio::test]
    async fn prepared_request_carries_the_plain_identifier() {
        let (submitter, cipher) = submitter();
        let request = request(&cipher.encrypt("0101901234"));
        let dir = tempfile::tempdir().unwrap();
        let receipt = request.receipt_path(dir.path());
        std::fs::write(&receipt, b"%PDF").unwrap();

        assert_eq!(submitter.prepare(&request, &receipt).await.unwrap(), "0101901234");
    }

    #[test]
    fn confirmation_with_quotes_is_still_a_valid_lookup() {
        let locator = Locator::containing_text("Bilag 'nr. 7' er oprettet");
        assert_eq!(
            locator,
            Locator::xpath("//*[contains(text(), \"Bilag 'nr. 7' er oprettet\")]")
        );
    }
}
