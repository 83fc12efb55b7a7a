//! Ledger table - the per-request marker bookkeeping, independent of file format.
//!
//! A ledger has one row per request uuid and two marker columns used as
//! booleans (`x` = set). After `mark` exactly one of them is set for the
//! matching rows.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{LedgerError, LedgerKey, LedgerMark, Outcome};
use crate::ports::StatusSink;

pub const UUID_COLUMN: &str = "uuid";
pub const FAILED_COLUMN: &str = "behandlet_fejl";
pub const OK_COLUMN: &str = "behandlet_ok";

const MARKER: &str = "x";

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    /// Excel serial date, written back with a date format.
    DateTime(f64),
    Bool(bool),
}

impl Cell {
    pub fn text(s: impl Into<String>) -> Self {
        Cell::Text(s.into())
    }

    pub fn as_text(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.clone(),
            Cell::Number(n) | Cell::DateTime(n) => n.to_string(),
            Cell::Bool(b) => b.to_string(),
        }
    }

    fn is_marked(&self) -> bool {
        self.as_text().trim() == MARKER
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("ledger has no '{0}' column")]
pub struct MissingColumn(pub &'static str);

/// Marker state of one ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowMarkers {
    pub failed: bool,
    pub ok: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LedgerTable {
    headers: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl LedgerTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<Cell>>) -> Self {
        Self { headers, rows }
    }

    /// A minimal ledger with only a uuid column.
    pub fn with_uuids<'a>(uuids: impl IntoIterator<Item = &'a str>) -> Self {
        Self::new(
            vec![UUID_COLUMN.to_string()],
            uuids.into_iter().map(|u| vec![Cell::text(u)]).collect(),
        )
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Append missing marker columns and normalize marker cells to `x` / empty text.
    pub fn ensure_marker_columns(&mut self) {
        for name in [FAILED_COLUMN, OK_COLUMN] {
            if self.column(name).is_none() {
                self.headers.push(name.to_string());
            }
        }
        let width = self.headers.len();
        let markers = [self.column(FAILED_COLUMN), self.column(OK_COLUMN)];
        for row in &mut self.rows {
            row.resize(width, Cell::Empty);
            for col in markers.into_iter().flatten() {
                let marked = row[col].is_marked();
                row[col] = Cell::text(if marked { MARKER } else { "" });
            }
        }
    }

    /// Set the marker for `mark` on every row of `uuid`, clearing the other one.
    /// Returns the number of rows touched.
    pub fn mark(&mut self, uuid: &str, mark: LedgerMark) -> Result<usize, MissingColumn> {
        self.ensure_marker_columns();
        let uuid_col = self.column(UUID_COLUMN).ok_or(MissingColumn(UUID_COLUMN))?;
        let failed_col = self.column(FAILED_COLUMN).ok_or(MissingColumn(FAILED_COLUMN))?;
        let ok_col = self.column(OK_COLUMN).ok_or(MissingColumn(OK_COLUMN))?;
        let (set, clear) = match mark {
            LedgerMark::Succeeded => (ok_col, failed_col),
            LedgerMark::Failed => (failed_col, ok_col),
        };

        let mut touched = 0;
        for row in self
            .rows
            .iter_mut()
            .filter(|row| row[uuid_col].as_text().trim() == uuid)
        {
            row[set] = Cell::text(MARKER);
            row[clear] = Cell::text("");
            touched += 1;
        }
        Ok(touched)
    }

    pub fn markers(&self, uuid: &str) -> Option<RowMarkers> {
        let uuid_col = self.column(UUID_COLUMN)?;
        let row = self
            .rows
            .iter()
            .find(|row| row.get(uuid_col).is_some_and(|c| c.as_text().trim() == uuid))?;
        let flag = |name: &str| {
            self.column(name)
                .and_then(|col| row.get(col))
                .is_some_and(Cell::is_marked)
        };
        Some(RowMarkers {
            failed: flag(FAILED_COLUMN),
            ok: flag(OK_COLUMN),
        })
    }
}

/// `StatusSink` keeping ledgers in memory, keyed by ledger file name.
#[derive(Default)]
pub struct InMemoryLedger {
    tables: Mutex<HashMap<String, LedgerTable>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, filename: impl Into<String>, table: LedgerTable) {
        self.tables.lock().await.insert(filename.into(), table);
    }

    pub async fn table(&self, filename: &str) -> Option<LedgerTable> {
        self.tables.lock().await.get(filename).cloned()
    }
}

#[async_trait]
impl StatusSink for InMemoryLedger {
    async fn record(&self, key: &LedgerKey, outcome: &Outcome) -> Result<(), LedgerError> {
        let mut tables = self.tables.lock().await;
        let table = tables
            .get_mut(&key.filename)
            .ok_or_else(|| LedgerError::NotFound {
                pattern: key.filename.clone(),
                dir: PathBuf::from("memory"),
            })?;
        let touched = table
            .mark(&key.uuid, outcome.ledger_mark())
            .map_err(|e| LedgerError::MissingColumn {
                path: PathBuf::from(&key.filename),
                column: e.0.to_string(),
            })?;
        if touched == 0 {
            tracing::warn!(uuid = %key.uuid, ledger = %key.filename, "uuid not present in ledger");
        }
        Ok(())
    }
}
