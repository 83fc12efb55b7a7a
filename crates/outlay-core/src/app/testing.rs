//! Scripted fakes for the ports, shared by the app-layer tests.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;

use crate::domain::{FetchError, OutlayRequest, SessionError, SubmitError};
use crate::ports::{ReceiptFetcher, SessionFactory, Submission, TicketSubmitter};

/// Stand-in for a browser; `generation` tells sessions apart.
#[derive(Debug, PartialEq, Eq)]
pub struct FakeSession {
    pub generation: u32,
}

impl FakeSession {
    pub fn new(generation: u32) -> Self {
        Self { generation }
    }
}

#[derive(Default)]
pub struct FakeSessions {
    opened: AtomicU32,
    released: AtomicU32,
    resets: AtomicU32,
    dead: AtomicBool,
    fail_open: AtomicBool,
}

impl FakeSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opened(&self) -> u32 {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> u32 {
        self.released.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> u32 {
        self.resets.load(Ordering::SeqCst)
    }

    /// Every held session reports dead until the next `open`.
    pub fn kill(&self) {
        self.dead.store(true, Ordering::SeqCst);
    }

    pub fn fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionFactory for FakeSessions {
    type Session = FakeSession;

    async fn open(&self) -> Result<FakeSession, SessionError> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(SessionError::Launch("no browser".into()));
        }
        self.dead.store(false, Ordering::SeqCst);
        let generation = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(FakeSession::new(generation))
    }

    async fn is_alive(&self, _session: &FakeSession) -> bool {
        !self.dead.load(Ordering::SeqCst)
    }

    async fn release(&self, _session: FakeSession) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }

    async fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Step {
    Created,
    Rejected(&'static str),
    Fail(&'static str),
}

/// Answers submissions from a script; an exhausted script keeps creating.
pub struct ScriptedSubmitter {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicU32,
    seen: Mutex<Vec<(String, u32)>>,
}

impl ScriptedSubmitter {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            calls: AtomicU32::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// `(uuid, session generation)` per call.
    pub fn seen(&self) -> Vec<(String, u32)> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl TicketSubmitter<FakeSession> for ScriptedSubmitter {
    async fn submit(
        &self,
        session: &mut FakeSession,
        request: &OutlayRequest,
        receipt: &Path,
    ) -> Result<Submission, SubmitError> {
        assert!(receipt.exists(), "receipt must be fetched before submission");
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .unwrap()
            .push((request.uuid.clone(), session.generation));
        let step = self.steps.lock().unwrap().pop_front().unwrap_or(Step::Created);
        match step {
            Step::Created => Ok(Submission::Created),
            Step::Rejected(reason) => Ok(Submission::Rejected {
                reason: reason.to_string(),
            }),
            Step::Fail(message) => Err(SubmitError::Driver(message.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum FetchScript {
    Ok,
    Network,
    MissingData,
}

/// Writes a dummy receipt where the real fetcher would.
pub struct FakeFetcher {
    script: FetchScript,
}

impl FakeFetcher {
    pub fn new(script: FetchScript) -> Self {
        Self { script }
    }
}

#[async_trait]
impl ReceiptFetcher for FakeFetcher {
    async fn fetch(&self, request: &OutlayRequest, dir: &Path) -> Result<PathBuf, FetchError> {
        match self.script {
            FetchScript::Ok => {
                let path = request.receipt_path(dir);
                std::fs::write(&path, b"%PDF-1.4").map_err(|source| FetchError::Filesystem {
                    path: path.clone(),
                    source,
                })?;
                Ok(path)
            }
            FetchScript::Network => Err(FetchError::Network("connection reset".into())),
            FetchScript::MissingData => Err(FetchError::MissingData("missing 'attachment' URL".into())),
        }
    }
}
