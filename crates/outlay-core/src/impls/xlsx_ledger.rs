//! XlsxLedger - the ledger as an Excel workbook in the working directory.
//!
//! The workbook is located by globbing `{dir}/{filename}`, read in full with
//! calamine, updated through `LedgerTable` and rewritten in full with
//! rust_xlsxwriter (read-modify-write, never append). Only the first sheet
//! is kept.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use calamine::{Data, Reader, open_workbook_auto};
use rust_xlsxwriter::{Format, Workbook};
use tracing::{debug, warn};

use super::ledger::{Cell, LedgerTable};
use crate::domain::{LedgerError, LedgerKey, LedgerMark, Outcome};
use crate::ports::StatusSink;

pub struct XlsxLedger {
    dir: PathBuf,
}

impl XlsxLedger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

/// First file matching `{dir}/{pattern}`.
pub fn locate(dir: &Path, pattern: &str) -> Result<PathBuf, LedgerError> {
    let full = dir.join(pattern);
    let full = full.to_string_lossy();
    let mut matches =
        glob::glob(&full).map_err(|e| LedgerError::Pattern(format!("{pattern}: {e}")))?;
    matches
        .find_map(Result::ok)
        .ok_or_else(|| LedgerError::NotFound {
            pattern: pattern.to_string(),
            dir: dir.to_path_buf(),
        })
}

pub fn read_table(path: &Path) -> Result<LedgerTable, LedgerError> {
    let read_err = |message: String| LedgerError::Read {
        path: path.to_path_buf(),
        message,
    };
    let mut workbook = open_workbook_auto(path).map_err(|e| read_err(e.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| read_err("workbook has no sheets".to_string()))?
        .map_err(|e| read_err(e.to_string()))?;

    let mut rows = range.rows();
    let headers = rows
        .next()
        .map(|row| row.iter().map(|data| to_cell(data).as_text()).collect())
        .unwrap_or_default();
    let body = rows
        .map(|row| row.iter().map(to_cell).collect())
        .collect();
    Ok(LedgerTable::new(headers, body))
}

fn to_cell(data: &Data) -> Cell {
    match data {
        Data::Empty => Cell::Empty,
        Data::String(s) => Cell::Text(s.clone()),
        Data::Float(f) => Cell::Number(*f),
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Bool(b) => Cell::Bool(*b),
        Data::DateTime(dt) => Cell::DateTime(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::Text(s.clone()),
        Data::Error(e) => Cell::Text(e.to_string()),
    }
}

pub fn write_table(path: &Path, table: &LedgerTable) -> Result<(), LedgerError> {
    let write_err = |e: rust_xlsxwriter::XlsxError| LedgerError::Write {
        path: path.to_path_buf(),
        message: e.to_string(),
    };
    let date = Format::new().set_num_format("dd-mm-yyyy");
    let date_time = Format::new().set_num_format("dd-mm-yyyy hh:mm");
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();

    for (col, header) in table.headers().iter().enumerate() {
        sheet.write_string(0, col as u16, header).map_err(write_err)?;
    }
    for (r, row) in table.rows().iter().enumerate() {
        let r = (r + 1) as u32;
        for (c, cell) in row.iter().enumerate() {
            let c = c as u16;
            match cell {
                Cell::Empty => {}
                Cell::Text(s) => {
                    sheet.write_string(r, c, s).map_err(write_err)?;
                }
                Cell::Number(n) => {
                    sheet.write_number(r, c, *n).map_err(write_err)?;
                }
                Cell::DateTime(n) => {
                    let format = if n.fract() == 0.0 { &date } else { &date_time };
                    sheet
                        .write_number_with_format(r, c, *n, format)
                        .map_err(write_err)?;
                }
                Cell::Bool(b) => {
                    sheet.write_boolean(r, c, *b).map_err(write_err)?;
                }
            }
        }
    }
    workbook.save(path).map_err(write_err)
}

fn update_workbook(path: &Path, uuid: &str, mark: LedgerMark) -> Result<(), LedgerError> {
    let mut table = read_table(path)?;
    let touched = table
        .mark(uuid, mark)
        .map_err(|e| LedgerError::MissingColumn {
            path: path.to_path_buf(),
            column: e.0.to_string(),
        })?;
    if touched == 0 {
        warn!(%uuid, path = %path.display(), "uuid not present in ledger");
    }
    write_table(path, &table)?;
    debug!(%uuid, ?mark, path = %path.display(), "ledger updated");
    Ok(())
}

#[async_trait]
impl StatusSink for XlsxLedger {
    async fn record(&self, key: &LedgerKey, outcome: &Outcome) -> Result<(), LedgerError> {
        let path = locate(&self.dir, &key.filename)?;
        let uuid = key.uuid.clone();
        let mark = outcome.ledger_mark();
        let target = path.clone();
        tokio::task::spawn_blocking(move || update_workbook(&target, &uuid, mark))
            .await
            .map_err(|e| LedgerError::Write {
                path,
                message: format!("blocking task failed: {e}"),
            })?
    }
}
