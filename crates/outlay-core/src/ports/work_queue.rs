//! WorkQueue port - 経費精算リクエストのキュー
//!
//! 要素のステータスを持つのはキューだけ。実装は
//! `TaskStatus::can_transition_to` を強制し、1 つのキュー名に束縛される。

use async_trait::async_trait;

use crate::domain::{QueueError, Task, TaskId, TaskStatus};

#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Name of the queue this instance drains.
    fn name(&self) -> &str;

    /// Add a `New` element.
    async fn enqueue(
        &self,
        data: serde_json::Value,
        reference: Option<String>,
    ) -> Result<TaskId, QueueError>;

    /// Take the oldest `New` element and mark it `InProgress`.
    /// `None` means the queue is drained.
    async fn next(&self) -> Result<Option<Task>, QueueError>;

    /// Record a status (last write wins) with an optional human-readable message.
    async fn set_status(
        &self,
        id: TaskId,
        status: TaskStatus,
        message: Option<String>,
    ) -> Result<(), QueueError>;

    async fn get(&self, id: TaskId) -> Result<Option<Task>, QueueError>;

    /// Elements in creation order, optionally filtered by status.
    async fn list(&self, status: Option<TaskStatus>) -> Result<Vec<Task>, QueueError>;

    /// Operator requeue: a `Failed` element, or one left `InProgress` by a
    /// killed run, becomes `New` again with the same data.
    async fn requeue(&self, id: TaskId) -> Result<(), QueueError> {
        self.set_status(id, TaskStatus::New, None).await
    }
}
