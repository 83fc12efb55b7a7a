//! TaskProcessor - キュー要素 1 件の処理 (fetch → submit → ledger)
//!
//! どの経路もキューのステータス書き込みと ledger 書き込みで終わり、
//! `InProgress` のまま残る要素はない。この 2 つの書き込みの失敗はログに
//! 残すだけで、Outcome は変えない。
//! payload が decode できなくても uuid と filename があれば ledger に印を付ける。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::domain::{FetchError, LedgerKey, Outcome, OutlayRequest, Task, TaskId, TaskStatus};
use crate::ports::{ReceiptFetcher, StatusSink, Submission, TicketSubmitter, WorkQueue};

pub struct TaskProcessor<S: Send> {
    queue: Arc<dyn WorkQueue>,
    fetcher: Arc<dyn ReceiptFetcher>,
    submitter: Arc<dyn TicketSubmitter<S>>,
    sink: Arc<dyn StatusSink>,
    work_dir: PathBuf,
}

impl<S: Send> TaskProcessor<S> {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        fetcher: Arc<dyn ReceiptFetcher>,
        submitter: Arc<dyn TicketSubmitter<S>>,
        sink: Arc<dyn StatusSink>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            queue,
            fetcher,
            submitter,
            sink,
            work_dir: work_dir.into(),
        }
    }

    /// Process one element that is already `InProgress`.
    ///
    /// - `RobotError` は返すだけ。session とリトライ予算への影響は worker loop が決める
    pub async fn run(&self, task: &Task, session: &mut S) -> Outcome {
        let request = match task.request() {
            Ok(request) => request,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "undecodable queue element");
                let outcome = Outcome::business(format!("invalid queue element data: {e}"));
                self.set_status(task.id, &outcome).await;
                match task.ledger_key() {
                    Some(key) => self.record(task.id, &key, &outcome).await,
                    None => warn!(task_id = %task.id, "no uuid/filename; ledger left untouched"),
                }
                return outcome;
            }
        };

        info!(task_id = %task.id, uuid = %request.uuid, "processing queue element");
        let outcome = self.attempt(task.id, &request, session).await;
        self.set_status(task.id, &outcome).await;
        self.record(task.id, &request.ledger_key(), &outcome).await;
        outcome
    }

    async fn record(&self, id: TaskId, key: &LedgerKey, outcome: &Outcome) {
        if let Err(e) = self.sink.record(key, outcome).await {
            warn!(task_id = %id, uuid = %key.uuid, error = %e, "ledger update failed");
        }
    }

    async fn attempt(&self, id: TaskId, request: &OutlayRequest, session: &mut S) -> Outcome {
        let receipt = match self.fetcher.fetch(request, &self.work_dir).await {
            Ok(path) => path,
            Err(FetchError::MissingData(reason)) => {
                warn!(task_id = %id, uuid = %request.uuid, %reason, "missing data");
                return Outcome::business(format!("missing data: {reason}"));
            }
            Err(e) => {
                error!(task_id = %id, uuid = %request.uuid, error = %e, "receipt download failed");
                return Outcome::robot(e.to_string());
            }
        };

        let outcome = match self.submitter.submit(session, request, &receipt).await {
            Ok(Submission::Created) => Outcome::Completed,
            Ok(Submission::Rejected { reason }) => {
                warn!(task_id = %id, uuid = %request.uuid, %reason, "ticket rejected");
                Outcome::business(reason)
            }
            Err(e) => {
                error!(task_id = %id, uuid = %request.uuid, error = %e, "ticket submission failed");
                Outcome::robot(e.to_string())
            }
        };
        remove_receipt(&receipt).await;
        outcome
    }

    async fn set_status(&self, id: TaskId, outcome: &Outcome) {
        let status = match outcome {
            Outcome::Completed => TaskStatus::Done,
            _ => TaskStatus::Failed,
        };
        let message = outcome.message().map(str::to_string);
        if let Err(e) = self.queue.set_status(id, status, message).await {
            warn!(task_id = %id, %status, error = %e, "queue status update failed");
        }
    }
}

/// Best-effort; a receipt that is already gone is fine.
async fn remove_receipt(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "could not remove receipt"),
    }
}
