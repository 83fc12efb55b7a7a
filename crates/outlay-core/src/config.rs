//! TOML robot configuration.
//!
//! ```toml
//! [robot]
//! queue_name = "Egenbefordring"
//! max_retry_count = 3
//! max_task_count = 100
//! fail_robot_on_too_many_errors = true
//!
//! [queue]
//! database = "outlay-queue.sqlite3"
//!
//! [os2forms]
//! api_key_env = "OS2FORMS_API_KEY"
//!
//! [browser]
//! launch_url = "https://ssolaunchpad.kmd.dk/?kommune=1574&start=portal"
//! encryption_key_env = "OUTLAY_ENCRYPTION_KEY"
//! download_dir = "chromium"
//!
//! [library]
//! kind = "sharepoint"
//! site_url = "https://tenant.sharepoint.com/teams/rpa"
//! library_path = "/teams/rpa/Delte dokumenter/General/Til udbetaling"
//! token_env = "SHAREPOINT_TOKEN"
//! ```
//!
//! The working directory is not part of the file; it comes with each
//! invocation. Secrets are only ever named here and read from the environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app::{ArchiveFolders, LoopSettings};
use crate::domain::ConfigError;
use crate::impls::{ChromeSettings, OpusSettings};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RobotConfig {
    pub robot: RobotSection,
    pub queue: QueueSection,
    pub os2forms: Os2FormsSection,
    pub browser: BrowserSection,
    #[serde(default)]
    pub library: Option<LibrarySection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RobotSection {
    pub queue_name: String,
    pub max_retry_count: u32,
    pub max_task_count: u32,
    pub fail_robot_on_too_many_errors: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct QueueSection {
    pub database: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Os2FormsSection {
    pub api_key_env: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BrowserSection {
    pub launch_url: String,
    #[serde(default = "default_element_timeout_secs")]
    pub element_timeout_secs: u64,
    #[serde(default = "default_click_retries")]
    pub click_retries: u32,
    pub encryption_key_env: String,
    #[serde(default)]
    pub headless: bool,
    /// Text the portal shows once a ticket is created.
    #[serde(default)]
    pub confirmation_text: Option<String>,
    /// Chrome binary; detected when unset.
    #[serde(default)]
    pub chrome_executable: Option<PathBuf>,
    /// Download Chromium here instead of using an installed Chrome.
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
}

fn default_element_timeout_secs() -> u64 {
    10
}

fn default_click_retries() -> u32 {
    4
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LibraryBackend {
    Local {
        root: PathBuf,
    },
    Sharepoint {
        site_url: String,
        library_path: String,
        token_env: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LibrarySection {
    #[serde(flatten)]
    pub backend: LibraryBackend,
    #[serde(default)]
    pub intake_folder: String,
    #[serde(default = "default_processed_folder")]
    pub processed_folder: String,
    #[serde(default = "default_failed_folder")]
    pub failed_folder: String,
}

fn default_processed_folder() -> String {
    ArchiveFolders::default().processed
}

fn default_failed_folder() -> String {
    ArchiveFolders::default().failed
}

impl RobotConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.robot.queue_name.trim().is_empty() {
            return Err(ConfigError::Invalid("robot.queue_name must not be empty".into()));
        }
        if self.robot.max_retry_count == 0 {
            return Err(ConfigError::Invalid("robot.max_retry_count must be at least 1".into()));
        }
        if self.robot.max_task_count == 0 {
            return Err(ConfigError::Invalid("robot.max_task_count must be at least 1".into()));
        }
        if self.browser.click_retries == 0 {
            return Err(ConfigError::Invalid("browser.click_retries must be at least 1".into()));
        }
        Ok(())
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            max_retry_count: self.robot.max_retry_count,
            max_task_count: self.robot.max_task_count,
            fail_robot_on_too_many_errors: self.robot.fail_robot_on_too_many_errors,
        }
    }

    pub fn opus_settings(&self) -> OpusSettings {
        OpusSettings {
            element_timeout: Duration::from_secs(self.browser.element_timeout_secs),
            click_retries: self.browser.click_retries,
            confirmation_text: self.browser.confirmation_text.clone(),
            ..OpusSettings::new(self.browser.launch_url.clone())
        }
    }

    pub fn chrome_settings(&self) -> ChromeSettings {
        ChromeSettings {
            executable: self.browser.chrome_executable.clone(),
            download_dir: self.browser.download_dir.clone(),
            headless: self.browser.headless,
        }
    }
}

impl LibrarySection {
    pub fn folders(&self) -> ArchiveFolders {
        ArchiveFolders {
            intake: self.intake_folder.clone(),
            processed: self.processed_folder.clone(),
            failed: self.failed_folder.clone(),
        }
    }
}

/// Read a secret from the environment variable `name`.
pub fn secret(name: &str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingEnv(name.to_string())),
    }
}

#[derive(Debug, Deserialize)]
struct ProcessArguments {
    path: Option<PathBuf>,
}

/// Working directory from the scheduler's process arguments (`{"path": "..."}`).
pub fn work_dir_from_process_arguments(raw: &str) -> Result<PathBuf, ConfigError> {
    let args: ProcessArguments = serde_json::from_str(raw)
        .map_err(|e| ConfigError::Invalid(format!("process arguments are not valid JSON: {e}")))?;
    args.path
        .filter(|path| !path.as_os_str().is_empty())
        .ok_or_else(|| ConfigError::Invalid("process arguments have no 'path'".into()))
}
