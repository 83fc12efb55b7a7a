//! In-memory work queue.
//!
//! Used by tests and dry runs. Elements live in a map keyed by id; the
//! `BTreeMap` ordering on ULIDs doubles as creation order.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{QueueError, Task, TaskId, TaskStatus};
use crate::ports::{Clock, IdGenerator, SystemClock, UlidGenerator, WorkQueue};

/// In-memory queue bound to one queue name.
pub struct InMemoryWorkQueue {
    name: String,
    records: Mutex<BTreeMap<TaskId, Task>>,
    clock: Arc<dyn Clock>,
    ids: Box<dyn IdGenerator>,
}

impl InMemoryWorkQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_clock(name, Arc::new(SystemClock))
    }

    pub fn with_clock(name: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            records: Mutex::new(BTreeMap::new()),
            ids: Box::new(UlidGenerator::new(Arc::clone(&clock))),
            clock,
        }
    }

    /// Status history is not kept; this is the current projection.
    pub async fn status_of(&self, id: TaskId) -> Option<TaskStatus> {
        self.records.lock().await.get(&id).map(|task| task.status)
    }
}

#[async_trait]
impl WorkQueue for InMemoryWorkQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(
        &self,
        data: serde_json::Value,
        reference: Option<String>,
    ) -> Result<TaskId, QueueError> {
        let id = self.ids.generate_task_id();
        let mut task = Task::new(id, data, self.clock.now());
        task.reference = reference;
        self.records.lock().await.insert(id, task);
        Ok(id)
    }

    async fn next(&self) -> Result<Option<Task>, QueueError> {
        let mut records = self.records.lock().await;
        let Some(task) = records
            .values_mut()
            .find(|task| task.status == TaskStatus::New)
        else {
            return Ok(None);
        };
        task.status = TaskStatus::InProgress;
        task.updated_at = self.clock.now();
        Ok(Some(task.clone()))
    }

    async fn set_status(
        &self,
        id: TaskId,
        status: TaskStatus,
        message: Option<String>,
    ) -> Result<(), QueueError> {
        let mut records = self.records.lock().await;
        let task = records.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        if !task.status.can_transition_to(status) {
            return Err(QueueError::InvalidTransition {
                id,
                from: task.status,
                to: status,
            });
        }
        task.status = status;
        task.message = message;
        task.updated_at = self.clock.now();
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, QueueError> {
        Ok(self.records.lock().await.get(&id).cloned())
    }

    async fn list(&self, status: Option<TaskStatus>) -> Result<Vec<Task>, QueueError> {
        let records = self.records.lock().await;
        Ok(records
            .values()
            .filter(|task| status.is_none_or(|s| task.status == s))
            .cloned()
            .collect())
    }
}
