//! Browser adapters: Chrome sessions over CDP and the OPUS ticket flow.

pub mod cpr;
pub mod dom;
pub mod opus;

use std::path::PathBuf;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::fetcher::{BrowserFetcher, BrowserFetcherOptions};
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use self::cpr::CprCipher;
pub use self::dom::Locator;
pub use self::opus::{OpusSettings, OpusTicketSubmitter};

use crate::domain::SessionError;
use crate::ports::SessionFactory;

const CHROME_ARGS: [&str; 3] = ["--test-type", "--start-maximized", "--disable-search-engine-choice"];

/// Where Chrome comes from and how it is shown.
#[derive(Debug, Clone, Default)]
pub struct ChromeSettings {
    /// Explicit Chrome binary. Takes precedence over `download_dir`.
    pub executable: Option<PathBuf>,
    /// Download (and cache) a Chromium build here when no binary is given.
    /// With neither set, the installed Chrome is detected.
    pub download_dir: Option<PathBuf>,
    pub headless: bool,
}

/// One running browser with the page the ticket flow drives.
pub struct BrowserSession {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
}

impl BrowserSession {
    pub fn page(&self) -> &Page {
        &self.page
    }
}

/// `SessionFactory` launching a local Chrome per session.
///
/// Browsers that did not close on release are kept and killed on `reset`,
/// so a hanging Chrome does not pile up windows across cycles.
pub struct ChromeSessions {
    settings: ChromeSettings,
    orphans: Mutex<Vec<Browser>>,
}

fn launch_error(e: impl std::fmt::Display) -> SessionError {
    SessionError::Launch(e.to_string())
}

impl ChromeSessions {
    pub fn new(settings: ChromeSettings) -> Self {
        Self {
            settings,
            orphans: Mutex::new(Vec::new()),
        }
    }

    pub async fn orphan_count(&self) -> usize {
        self.orphans.lock().await.len()
    }

    async fn executable(&self) -> Result<Option<PathBuf>, SessionError> {
        if let Some(path) = &self.settings.executable {
            return Ok(Some(path.clone()));
        }
        let Some(dir) = &self.settings.download_dir else {
            return Ok(None);
        };
        tokio::fs::create_dir_all(dir).await.map_err(launch_error)?;
        let fetcher = BrowserFetcher::new(
            BrowserFetcherOptions::builder()
                .with_path(dir)
                .build()
                .map_err(launch_error)?,
        );
        let info = fetcher.fetch().await.map_err(launch_error)?;
        Ok(Some(info.executable_path))
    }

    async fn config(&self) -> Result<BrowserConfig, SessionError> {
        let mut builder = BrowserConfig::builder().args(CHROME_ARGS).viewport(None);
        if !self.settings.headless {
            builder = builder.with_head();
        }
        if let Some(path) = self.executable().await? {
            builder = builder.chrome_executable(path);
        }
        builder.build().map_err(launch_error)
    }
}

async fn close(browser: &mut Browser) -> Result<(), String> {
    browser.close().await.map_err(|e| e.to_string())?;
    browser.wait().await.map_err(|e| e.to_string())?;
    Ok(())
}

#[async_trait]
impl SessionFactory for ChromeSessions {
    type Session = BrowserSession;

    async fn open(&self) -> Result<BrowserSession, SessionError> {
        let config = self.config().await?;
        let (mut browser, mut events) = Browser::launch(config).await.map_err(launch_error)?;
        let handler = tokio::spawn(async move { while events.next().await.is_some() {} });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                handler.abort();
                if let Err(close_err) = close(&mut browser).await {
                    warn!(error = %close_err, "could not close half-opened browser");
                    self.orphans.lock().await.push(browser);
                }
                return Err(launch_error(e));
            }
        };
        info!("browser session opened");
        Ok(BrowserSession {
            browser,
            page,
            handler,
        })
    }

    async fn is_alive(&self, session: &BrowserSession) -> bool {
        !session.handler.is_finished() && session.page.url().await.is_ok()
    }

    async fn release(&self, session: BrowserSession) {
        let BrowserSession {
            mut browser,
            page,
            handler,
        } = session;
        drop(page);
        match close(&mut browser).await {
            Ok(()) => debug!("browser session released"),
            Err(e) => {
                warn!(error = %e, "browser did not close; will kill on reset");
                self.orphans.lock().await.push(browser);
            }
        }
        handler.abort();
    }

    async fn reset(&self) {
        let pending = std::mem::take(&mut *self.orphans.lock().await);
        let mut still_running = Vec::new();
        for mut browser in pending {
            match browser.kill().await {
                Some(Err(e)) => {
                    warn!(error = %e, "stray browser still running");
                    still_running.push(browser);
                }
                Some(Ok(())) => debug!("stray browser killed"),
                None => {}
            }
        }
        self.orphans.lock().await.extend(still_running);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn missing_chrome() -> ChromeSessions {
        ChromeSessions::new(ChromeSettings {
            executable: Some(PathBuf::from("/nonexistent/outlay/chrome")),
            headless: true,
            ..ChromeSettings::default()
        })
    }

    #[tokio::test]
    async fn launch_without_chrome_is_a_launch_error() {
        let err = missing_chrome().open().await.err().unwrap();
        assert!(matches!(err, SessionError::Launch(_)));
    }

    #[tokio::test]
    async fn reset_without_strays_does_nothing() {
        let sessions = missing_chrome();
        sessions.reset().await;
        assert_eq!(sessions.orphan_count().await, 0);
    }

    #[tokio::test]
    async fn explicit_executable_skips_the_download() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = ChromeSessions::new(ChromeSettings {
            executable: Some(PathBuf::from("/opt/chrome/chrome")),
            download_dir: Some(dir.path().join("chromium")),
            headless: true,
        });

        let executable = sessions.executable().await.unwrap();

        assert_eq!(executable, Some(PathBuf::from("/opt/chrome/chrome")));
        assert!(!dir.path().join("chromium").exists());
    }
}
