//! WorkerLoop - タスク実行ループ
//!
//! # フロー
//! 1. サイクルごとに `SessionFactory::reset`、持ち越しの要素がなければ
//!    キューから 1 件取得し、生きている session を確保
//! 2. キューが空になるか `max_task_count` に達するまで内側ループ:
//!    `InProgress` にして `TaskProcessor` を実行、確定した Outcome なら次へ
//! 3. `RobotError` (またはキュー/session の失敗) でサイクル終了:
//!    要素を `Failed` に戻し、session を作り直し、次のサイクルで同じ要素を再試行
//! 4. run の終わりに session を解放
//!
//! `task_count` はサイクル間でリセットしない。リトライも新規要素と同じ予算を使う。

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{error, info, warn};

use super::TaskProcessor;
use crate::domain::{CycleFault, Outcome, RunError, RunId, SessionError, Task, TaskId, TaskStatus};
use crate::ports::{IdGenerator, SessionFactory, WorkQueue};

/// Retry and work bounds of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    pub max_retry_count: u32,
    pub max_task_count: u32,
    pub fail_robot_on_too_many_errors: bool,
}

/// What a run did.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub run_id: RunId,
    pub cycles: u32,
    pub task_count: u32,
    pub error_count: u32,
    pub sessions_opened: u32,
    /// One entry per attempt, in order.
    pub outcomes: Vec<(TaskId, Outcome)>,
    /// Ledger file names reported into during the run.
    pub ledgers: BTreeSet<String>,
}

impl RunReport {
    fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            cycles: 0,
            task_count: 0,
            error_count: 0,
            sessions_opened: 0,
            outcomes: Vec::new(),
            ledgers: BTreeSet::new(),
        }
    }
}

pub struct WorkerLoop<F: SessionFactory> {
    queue: Arc<dyn WorkQueue>,
    sessions: Arc<F>,
    processor: TaskProcessor<F::Session>,
    ids: Arc<dyn IdGenerator>,
    settings: LoopSettings,
}

impl<F: SessionFactory> WorkerLoop<F> {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        sessions: Arc<F>,
        processor: TaskProcessor<F::Session>,
        ids: Arc<dyn IdGenerator>,
        settings: LoopSettings,
    ) -> Self {
        Self {
            queue,
            sessions,
            processor,
            ids,
            settings,
        }
    }

    pub async fn run(&self) -> Result<RunReport, RunError> {
        let mut report = RunReport::new(self.ids.generate_run_id());
        let mut current: Option<Task> = None;
        let mut session: Option<F::Session> = None;
        info!(
            run_id = %report.run_id,
            queue = self.queue.name(),
            max_retry_count = self.settings.max_retry_count,
            max_task_count = self.settings.max_task_count,
            "run started"
        );

        for cycle in 1..=self.settings.max_retry_count {
            report.cycles = cycle;
            self.sessions.reset().await;

            let fault = match self.cycle(&mut current, &mut session, &mut report).await {
                Ok(()) => break,
                Err(fault) => fault,
            };

            report.error_count += 1;
            error!(
                run_id = %report.run_id,
                cycle,
                error_count = report.error_count,
                error = %fault,
                "process error"
            );
            if let Some(task) = &current {
                let message = format!("Process Error #{}: {fault}", report.error_count);
                if let Err(e) = self
                    .queue
                    .set_status(task.id, TaskStatus::Failed, Some(message))
                    .await
                {
                    warn!(task_id = %task.id, error = %e, "could not record process error");
                }
            }

            if let Some(stale) = session.take() {
                self.sessions.release(stale).await;
            }
            if cycle < self.settings.max_retry_count {
                match self.open_session(&mut report).await {
                    Ok(fresh) => session = Some(fresh),
                    Err(e) => warn!(cycle, error = %e, "could not open a fresh session"),
                }
            }
        }

        if let Some(held) = session.take() {
            self.sessions.release(held).await;
        }
        info!(
            run_id = %report.run_id,
            cycles = report.cycles,
            task_count = report.task_count,
            error_count = report.error_count,
            "run finished"
        );

        if self.settings.fail_robot_on_too_many_errors
            && report.error_count == self.settings.max_retry_count
        {
            return Err(RunError::TooManyErrors {
                errors: report.error_count,
                max_retry_count: self.settings.max_retry_count,
            });
        }
        Ok(report)
    }

    async fn cycle(
        &self,
        current: &mut Option<Task>,
        session: &mut Option<F::Session>,
        report: &mut RunReport,
    ) -> Result<(), CycleFault> {
        if current.is_none() {
            *current = self.queue.next().await?;
        }
        self.ensure_session(session, report).await?;

        while report.task_count < self.settings.max_task_count {
            if current.is_none() {
                *current = self.queue.next().await?;
            }
            let Some(task) = current.clone() else {
                info!(queue = self.queue.name(), "queue empty");
                break;
            };
            let Some(held) = session.as_mut() else {
                return Err(SessionError::Lost("no session held".into()).into());
            };

            report.task_count += 1;
            self.queue
                .set_status(task.id, TaskStatus::InProgress, None)
                .await?;
            let outcome = self.processor.run(&task, held).await;

            if let Some(filename) = task.filename() {
                report.ledgers.insert(filename.to_string());
            }
            report.outcomes.push((task.id, outcome.clone()));

            match outcome {
                Outcome::Completed | Outcome::BusinessError { .. } => *current = None,
                Outcome::RobotError { message } => {
                    return Err(CycleFault::Robot {
                        task_id: task.id,
                        message,
                    });
                }
            }
        }
        Ok(())
    }

    /// 保持中の session が応答すればそのまま使い、死んでいれば作り直す
    async fn ensure_session(
        &self,
        session: &mut Option<F::Session>,
        report: &mut RunReport,
    ) -> Result<(), SessionError> {
        if let Some(held) = session.as_ref() {
            if self.sessions.is_alive(held).await {
                return Ok(());
            }
            warn!("held session is gone; opening a new one");
            if let Some(stale) = session.take() {
                self.sessions.release(stale).await;
            }
        }
        *session = Some(self.open_session(report).await?);
        Ok(())
    }

    async fn open_session(&self, report: &mut RunReport) -> Result<F::Session, SessionError> {
        let session = self.sessions.open().await?;
        report.sessions_opened += 1;
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing::{FakeFetcher, FakeSessions, FetchScript, ScriptedSubmitter, Step};
    use crate::domain::task::sample_data;
    use crate::impls::{InMemoryLedger, InMemoryWorkQueue, LedgerTable};
    use crate::ports::{SystemClock, UlidGenerator};
    use pretty_assertions::assert_eq;

    struct Harness {
        queue: Arc<InMemoryWorkQueue>,
        ledger: Arc<InMemoryLedger>,
        sessions: Arc<FakeSessions>,
        submitter: Arc<ScriptedSubmitter>,
        dir: tempfile::TempDir,
        ids: Vec<TaskId>,
    }

    impl Harness {
        async fn new(uuids: &[&str], steps: Vec<Step>) -> Self {
            let queue = Arc::new(InMemoryWorkQueue::new("outlay"));
            let mut ids = Vec::new();
            for uuid in uuids {
                ids.push(queue.enqueue(sample_data(uuid), None).await.unwrap());
            }
            let ledger = Arc::new(InMemoryLedger::new());
            ledger
                .insert("udbetaling.xlsx", LedgerTable::with_uuids(uuids.iter().copied()))
                .await;
            Self {
                queue,
                ledger,
                sessions: Arc::new(FakeSessions::new()),
                submitter: Arc::new(ScriptedSubmitter::new(steps)),
                dir: tempfile::tempdir().unwrap(),
                ids,
            }
        }

        fn worker(&self, settings: LoopSettings) -> WorkerLoop<FakeSessions> {
            let processor = TaskProcessor::new(
                self.queue.clone(),
                Arc::new(FakeFetcher::new(FetchScript::Ok)),
                self.submitter.clone(),
                self.ledger.clone(),
                self.dir.path(),
            );
            WorkerLoop::new(
                self.queue.clone(),
                self.sessions.clone(),
                processor,
                Arc::new(UlidGenerator::new(SystemClock)),
                settings,
            )
        }

        async fn statuses(&self) -> Vec<TaskStatus> {
            let mut out = Vec::new();
            for id in &self.ids {
                out.push(self.queue.status_of(*id).await.unwrap());
            }
            out
        }

        async fn markers(&self, uuid: &str) -> (bool, bool) {
            let table = self.ledger.table("udbetaling.xlsx").await.unwrap();
            let m = table.markers(uuid).unwrap();
            (m.failed, m.ok)
        }
    }

    fn settings(max_retry_count: u32, max_task_count: u32) -> LoopSettings {
        LoopSettings {
            max_retry_count,
            max_task_count,
            fail_robot_on_too_many_errors: true,
        }
    }

    #[tokio::test]
    async fn drains_the_queue_when_everything_succeeds() {
        let h = Harness::new(&["a", "b", "c"], vec![]).await;

        let report = h.worker(settings(3, 10)).run().await.unwrap();

        assert_eq!(report.task_count, 3);
        assert_eq!(report.error_count, 0);
        assert_eq!(report.cycles, 1);
        assert_eq!(report.sessions_opened, 1);
        assert_eq!(h.statuses().await, vec![TaskStatus::Done; 3]);
        for uuid in ["a", "b", "c"] {
            assert_eq!(h.markers(uuid).await, (false, true));
            assert!(!h.dir.path().join(format!("receipt_{uuid}.pdf")).exists());
        }
        assert_eq!(report.ledgers, BTreeSet::from(["udbetaling.xlsx".to_string()]));
        assert_eq!(h.sessions.released(), 1);
    }

    #[tokio::test]
    async fn business_error_is_final_and_not_counted() {
        let h = Harness::new(&["a"], vec![Step::Rejected("Control check failed")]).await;

        let report = h.worker(settings(3, 10)).run().await.unwrap();

        assert_eq!(report.error_count, 0);
        assert_eq!(report.task_count, 1);
        assert_eq!(h.statuses().await, vec![TaskStatus::Failed]);
        assert_eq!(h.markers("a").await, (true, false));
        assert_eq!(h.submitter.calls(), 1);
    }

    #[tokio::test]
    async fn fatal_error_retries_the_same_element_on_a_new_session() {
        let h = Harness::new(&["a"], vec![Step::Fail("element vanished"), Step::Created]).await;

        let report = h.worker(settings(3, 10)).run().await.unwrap();

        assert_eq!(report.error_count, 1);
        assert_eq!(report.cycles, 2);
        assert_eq!(report.sessions_opened, 2);
        assert_eq!(h.sessions.opened(), 2);
        assert_eq!(h.statuses().await, vec![TaskStatus::Done]);
        assert_eq!(h.markers("a").await, (false, true));
        assert_eq!(
            h.submitter.seen(),
            vec![("a".to_string(), 1), ("a".to_string(), 2)]
        );
        assert_eq!(
            report.outcomes.iter().map(|(_, o)| o.kind()).collect::<Vec<_>>(),
            vec![
                crate::domain::OutcomeKind::RobotError,
                crate::domain::OutcomeKind::Completed
            ]
        );
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_run() {
        let h = Harness::new(&["a"], vec![Step::Fail("boom"); 5]).await;

        let err = h.worker(settings(2, 10)).run().await.unwrap_err();

        assert!(matches!(
            err,
            RunError::TooManyErrors {
                errors: 2,
                max_retry_count: 2
            }
        ));
        assert_eq!(h.submitter.calls(), 2);
        assert_eq!(h.sessions.opened(), 2);
        assert_eq!(h.sessions.released(), 2);
        let task = h.queue.get(h.ids[0]).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.message.unwrap().starts_with("Process Error #2"));
    }

    #[tokio::test]
    async fn exhausted_retries_without_opt_in_exit_normally() {
        let h = Harness::new(&["a"], vec![Step::Fail("boom"); 5]).await;
        let settings = LoopSettings {
            fail_robot_on_too_many_errors: false,
            ..settings(2, 10)
        };

        let report = h.worker(settings).run().await.unwrap();

        assert_eq!(report.error_count, 2);
        assert_eq!(h.statuses().await, vec![TaskStatus::Failed]);
    }

    #[tokio::test]
    async fn task_cap_leaves_the_rest_for_the_next_run() {
        let h = Harness::new(&["a", "b", "c", "d"], vec![]).await;

        let report = h.worker(settings(3, 2)).run().await.unwrap();

        assert_eq!(report.task_count, 2);
        assert_eq!(
            h.statuses().await,
            vec![TaskStatus::Done, TaskStatus::Done, TaskStatus::New, TaskStatus::New]
        );
    }

    #[tokio::test]
    async fn retries_spend_the_task_budget() {
        let h = Harness::new(&["a", "b"], vec![Step::Fail("boom")]).await;

        let report = h.worker(settings(3, 2)).run().await.unwrap();

        // attempt 1 fails, attempt 2 retries "a", nothing left for "b"
        assert_eq!(report.task_count, 2);
        assert_eq!(report.error_count, 1);
        assert_eq!(h.statuses().await, vec![TaskStatus::Done, TaskStatus::New]);
    }

    #[tokio::test]
    async fn empty_queue_still_opens_and_releases_a_session() {
        let h = Harness::new(&[], vec![]).await;

        let report = h.worker(settings(3, 10)).run().await.unwrap();

        assert_eq!(report.task_count, 0);
        assert_eq!(report.sessions_opened, 1);
        assert_eq!(h.sessions.released(), 1);
        assert_eq!(h.sessions.resets(), 1);
    }

    #[tokio::test]
    async fn session_launch_failure_counts_as_a_process_error() {
        let h = Harness::new(&["a"], vec![]).await;
        h.sessions.fail_open(true);

        let err = h.worker(settings(2, 10)).run().await.unwrap_err();

        assert!(matches!(err, RunError::TooManyErrors { errors: 2, .. }));
        assert_eq!(h.submitter.calls(), 0);
        // pulled in cycle 1, then re-marked failed by the process error
        assert_eq!(h.statuses().await, vec![TaskStatus::Failed]);
    }

    #[tokio::test]
    async fn dead_session_is_replaced_before_work_resumes() {
        let h = Harness::new(&[], vec![]).await;
        let worker = h.worker(settings(3, 10));
        let mut report = RunReport::new(RunId::from_ulid(ulid::Ulid::new()));
        let mut session = Some(h.sessions.open().await.unwrap());

        worker.ensure_session(&mut session, &mut report).await.unwrap();
        assert_eq!(report.sessions_opened, 0);

        h.sessions.kill();
        worker.ensure_session(&mut session, &mut report).await.unwrap();

        assert_eq!(report.sessions_opened, 1);
        assert_eq!(h.sessions.released(), 1);
        assert_eq!(session.map(|s| s.generation), Some(2));
    }
}
