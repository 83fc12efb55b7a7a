//! Errors - one error type per seam.
//!
//! # Classification
//! - Queue / Session / Submit / Fetch (network, filesystem): robot errors,
//!   the loop retries the element in the next cycle
//! - Fetch (missing data) and undecodable payloads: business errors
//! - Ledger / Library: bookkeeping, logged and never allowed to mask an outcome
//! - Run: the retry budget was exhausted

use std::path::PathBuf;

use thiserror::Error;

use super::{TaskId, TaskStatus};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue element {0} not found")]
    NotFound(TaskId),

    #[error("queue element {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("queue backend: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("missing data: {0}")]
    MissingData(String),

    #[error("network error downloading receipt: {0}")]
    Network(String),

    #[error("file system error at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to open browser session: {0}")]
    Launch(String),

    #[error("browser session lost: {0}")]
    Lost(String),
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("browser: {0}")]
    Driver(String),

    #[error("element {locator} not found within {timeout_secs}s")]
    ElementNotFound { locator: String, timeout_secs: u64 },

    #[error("failed to click element {locator} after {attempts} attempts")]
    ClickFailed { locator: String, attempts: u32 },

    #[error("receipt not found: {0}")]
    AttachmentMissing(PathBuf),

    #[error("cannot decrypt personal identifier: {0}")]
    Decrypt(String),
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{pattern} not found in {dir}")]
    NotFound { pattern: String, dir: PathBuf },

    #[error("invalid ledger pattern '{0}'")]
    Pattern(String),

    #[error("ledger {path} has no '{column}' column")]
    MissingColumn { path: PathBuf, column: String },

    #[error("cannot read ledger {path}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("cannot write ledger {path}: {message}")]
    Write { path: PathBuf, message: String },
}

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("document library request failed: {0}")]
    Http(String),

    #[error("document library answered {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("environment variable {0} is not set")]
    MissingEnv(String),
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Library(#[from] LibraryError),
}

/// Why a retry cycle was abandoned.
#[derive(Debug, Error)]
pub enum CycleFault {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("robot error on {task_id}: {message}")]
    Robot { task_id: TaskId, message: String },
}

/// Run-level failure surfaced to the process exit code.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("process failed too many times ({errors} of {max_retry_count} cycles)")]
    TooManyErrors { errors: u32, max_retry_count: u32 },
}
