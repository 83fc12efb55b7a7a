//! SqliteWorkQueue - durable queue backed by a SQLite file.
//!
//! rusqlite is blocking, so every call runs on `spawn_blocking` over a
//! `std::sync::Mutex<Connection>`. The lock never crosses an `.await`.
//!
//! Several queues can share one database; rows are partitioned by `queue_name`.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::domain::{QueueError, Task, TaskId, TaskStatus};
use crate::ports::{Clock, IdGenerator, SystemClock, UlidGenerator, WorkQueue};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS queue_elements (
    id          TEXT PRIMARY KEY,
    queue_name  TEXT NOT NULL,
    status      TEXT NOT NULL,
    data        TEXT NOT NULL,
    reference   TEXT,
    message     TEXT,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS queue_elements_by_status
    ON queue_elements (queue_name, status, created_at);
";

const COLUMNS: &str = "id, status, data, reference, message, created_at, updated_at";

pub struct SqliteWorkQueue {
    name: String,
    conn: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock>,
    ids: Box<dyn IdGenerator>,
}

impl SqliteWorkQueue {
    /// Open (or create) the database file and bind to `queue_name`.
    pub fn open(path: &Path, queue_name: impl Into<String>) -> Result<Self, QueueError> {
        let conn = Connection::open(path).map_err(backend)?;
        Self::from_connection(conn, queue_name, Arc::new(SystemClock))
    }

    pub fn open_in_memory(queue_name: impl Into<String>) -> Result<Self, QueueError> {
        let conn = Connection::open_in_memory().map_err(backend)?;
        Self::from_connection(conn, queue_name, Arc::new(SystemClock))
    }

    pub fn from_connection(
        conn: Connection,
        queue_name: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, QueueError> {
        conn.execute_batch(SCHEMA).map_err(backend)?;
        Ok(Self {
            name: queue_name.into(),
            conn: Arc::new(Mutex::new(conn)),
            ids: Box::new(UlidGenerator::new(Arc::clone(&clock))),
            clock,
        })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, QueueError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, QueueError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| QueueError::Backend("connection mutex poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| QueueError::Backend(format!("blocking task failed: {e}")))?
    }
}

fn backend(e: rusqlite::Error) -> QueueError {
    QueueError::Backend(e.to_string())
}

/// Row as stored; converted to `Task` outside the rusqlite closure.
struct RawRow {
    id: String,
    status: String,
    data: String,
    reference: Option<String>,
    message: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RawRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            status: row.get(1)?,
            data: row.get(2)?,
            reference: row.get(3)?,
            message: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn into_task(self) -> Result<Task, QueueError> {
        let corrupt = |what: &str, detail: String| {
            QueueError::Backend(format!("corrupt row {}: {what}: {detail}", self.id))
        };
        Ok(Task {
            id: TaskId::from_str(&self.id).map_err(|e| corrupt("id", e.to_string()))?,
            status: TaskStatus::from_str(&self.status)
                .map_err(|e| corrupt("status", e.to_string()))?,
            data: serde_json::from_str(&self.data).map_err(|e| corrupt("data", e.to_string()))?,
            reference: self.reference.clone(),
            message: self.message.clone(),
            created_at: parse_time(&self.created_at)
                .map_err(|e| corrupt("created_at", e.to_string()))?,
            updated_at: parse_time(&self.updated_at)
                .map_err(|e| corrupt("updated_at", e.to_string()))?,
        })
    }
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|t| t.with_timezone(&Utc))
}

fn select_status(
    conn: &Connection,
    queue_name: &str,
    id: &str,
) -> Result<Option<TaskStatus>, QueueError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT status FROM queue_elements WHERE queue_name = ?1 AND id = ?2",
            params![queue_name, id],
            |row| row.get(0),
        )
        .optional()
        .map_err(backend)?;
    raw.map(|s| TaskStatus::from_str(&s).map_err(|e| QueueError::Backend(e.to_string())))
        .transpose()
}

#[async_trait]
impl WorkQueue for SqliteWorkQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(
        &self,
        data: serde_json::Value,
        reference: Option<String>,
    ) -> Result<TaskId, QueueError> {
        let id = self.ids.generate_task_id();
        let now = self.clock.now().to_rfc3339();
        let data = serde_json::to_string(&data)
            .map_err(|e| QueueError::Backend(format!("cannot encode data: {e}")))?;
        let queue_name = self.name.clone();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO queue_elements
                     (id, queue_name, status, data, reference, message, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, ?6)",
                params![
                    id.as_ulid().to_string(),
                    queue_name,
                    TaskStatus::New.as_str(),
                    data,
                    reference,
                    now,
                ],
            )
            .map_err(backend)?;
            Ok(id)
        })
        .await
    }

    async fn next(&self) -> Result<Option<Task>, QueueError> {
        let now = self.clock.now().to_rfc3339();
        let queue_name = self.name.clone();
        self.blocking(move |conn| {
            let tx = conn.transaction().map_err(backend)?;
            let raw = tx
                .query_row(
                    &format!(
                        "SELECT {COLUMNS} FROM queue_elements
                         WHERE queue_name = ?1 AND status = ?2
                         ORDER BY created_at, id LIMIT 1"
                    ),
                    params![queue_name, TaskStatus::New.as_str()],
                    RawRow::from_row,
                )
                .optional()
                .map_err(backend)?;
            let Some(mut raw) = raw else {
                return Ok(None);
            };
            tx.execute(
                "UPDATE queue_elements SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![TaskStatus::InProgress.as_str(), now, raw.id],
            )
            .map_err(backend)?;
            tx.commit().map_err(backend)?;

            raw.status = TaskStatus::InProgress.as_str().to_string();
            raw.updated_at = now;
            raw.into_task().map(Some)
        })
        .await
    }

    async fn set_status(
        &self,
        id: TaskId,
        status: TaskStatus,
        message: Option<String>,
    ) -> Result<(), QueueError> {
        let now = self.clock.now().to_rfc3339();
        let queue_name = self.name.clone();
        self.blocking(move |conn| {
            let tx = conn.transaction().map_err(backend)?;
            let key = id.as_ulid().to_string();
            let current =
                select_status(&tx, &queue_name, &key)?.ok_or(QueueError::NotFound(id))?;
            if !current.can_transition_to(status) {
                return Err(QueueError::InvalidTransition {
                    id,
                    from: current,
                    to: status,
                });
            }
            tx.execute(
                "UPDATE queue_elements SET status = ?1, message = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![status.as_str(), message, now, key],
            )
            .map_err(backend)?;
            tx.commit().map_err(backend)
        })
        .await
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, QueueError> {
        let queue_name = self.name.clone();
        self.blocking(move |conn| {
            let raw = conn
                .query_row(
                    &format!(
                        "SELECT {COLUMNS} FROM queue_elements WHERE queue_name = ?1 AND id = ?2"
                    ),
                    params![queue_name, id.as_ulid().to_string()],
                    RawRow::from_row,
                )
                .optional()
                .map_err(backend)?;
            raw.map(RawRow::into_task).transpose()
        })
        .await
    }

    async fn list(&self, status: Option<TaskStatus>) -> Result<Vec<Task>, QueueError> {
        let queue_name = self.name.clone();
        self.blocking(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {COLUMNS} FROM queue_elements
                     WHERE queue_name = ?1 AND (?2 IS NULL OR status = ?2)
                     ORDER BY created_at, id"
                ))
                .map_err(backend)?;
            let rows = stmt
                .query_map(
                    params![queue_name, status.map(TaskStatus::as_str)],
                    RawRow::from_row,
                )
                .map_err(backend)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(backend)?;
            rows.into_iter().map(RawRow::into_task).collect()
        })
        .await
    }
}
