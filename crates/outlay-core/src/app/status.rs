//! Status - ステータスクエリ
//!
//! オペレーター向けにステータスごとの件数を返す。

use std::collections::BTreeMap;
use std::fmt;

use crate::domain::{QueueError, TaskStatus};
use crate::ports::WorkQueue;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueCounts {
    counts: BTreeMap<TaskStatus, usize>,
}

impl QueueCounts {
    pub async fn collect(queue: &dyn WorkQueue) -> Result<Self, QueueError> {
        let mut counts = QueueCounts::default();
        for task in queue.list(None).await? {
            *counts.counts.entry(task.status).or_default() += 1;
        }
        Ok(counts)
    }

    pub fn get(&self, status: TaskStatus) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    /// Elements whose attempt has not ended: waiting, or stranded mid-attempt.
    pub fn outstanding(&self) -> usize {
        self.counts
            .iter()
            .filter(|(status, _)| !status.is_terminal())
            .map(|(_, count)| count)
            .sum()
    }
}

impl fmt::Display for QueueCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = TaskStatus::ALL
            .iter()
            .map(|status| format!("{status}={}", self.get(*status)))
            .collect();
        write!(f, "{} (total={})", parts.join(" "), self.total())
    }
}
