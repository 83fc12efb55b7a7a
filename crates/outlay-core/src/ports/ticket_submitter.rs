//! UI session and ticket submission ports.
//!
//! The session is the only shared mutable resource of a run. The worker loop
//! owns it and lends it to one `submit` call at a time as `&mut`.

use std::path::Path;

use async_trait::async_trait;

use crate::domain::{OutlayRequest, SessionError, SubmitError};

/// Opens and releases UI sessions (browser instances).
#[async_trait]
pub trait SessionFactory: Send + Sync {
    type Session: Send;

    async fn open(&self) -> Result<Self::Session, SessionError>;

    /// Cheap liveness check used before each cycle.
    async fn is_alive(&self, session: &Self::Session) -> bool;

    /// Release a session. Best-effort: failures are logged, never returned.
    async fn release(&self, session: Self::Session);

    /// Best-effort cleanup of stray sessions left behind by earlier releases
    /// or runs. Must not touch a session that is still held.
    async fn reset(&self);
}

/// How the target system answered a well-formed submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Created,
    /// The target system rejected the data (control check, missing confirmation).
    Rejected { reason: String },
}

/// Drives the ticket-creation screen for one request.
///
/// `Err` is reserved for unexpected failures (element never appeared, driver
/// died); business rejections are `Ok(Submission::Rejected { .. })`.
#[async_trait]
pub trait TicketSubmitter<S: Send>: Send + Sync {
    async fn submit(
        &self,
        session: &mut S,
        request: &OutlayRequest,
        receipt: &Path,
    ) -> Result<Submission, SubmitError>;
}
