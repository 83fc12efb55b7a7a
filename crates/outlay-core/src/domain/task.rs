use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::{TaskId, TaskStatus};

/// One queue element: identity + status + the raw JSON payload.
///
/// The queue owns `status`; only the worker loop and the task processor
/// write it. The payload stays raw so that an element whose data cannot be
/// decoded can still be tracked and failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub status: TaskStatus,
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(id: TaskId, data: serde_json::Value, now: DateTime<Utc>) -> Self {
        Self {
            id,
            status: TaskStatus::New,
            data,
            reference: None,
            message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Domain identity, stable across retries and requeues.
    pub fn uuid(&self) -> Option<&str> {
        self.data.get("uuid").and_then(serde_json::Value::as_str)
    }

    /// Ledger file name pattern this element reports into.
    pub fn filename(&self) -> Option<&str> {
        self.data.get("filename").and_then(serde_json::Value::as_str)
    }

    /// Ledger row of this element, readable even when the payload does not
    /// decode.
    pub fn ledger_key(&self) -> Option<LedgerKey> {
        Some(LedgerKey {
            uuid: self.uuid()?.to_string(),
            filename: self.filename()?.to_string(),
        })
    }

    /// Decode the typed payload.
    pub fn request(&self) -> Result<OutlayRequest, serde_json::Error> {
        OutlayRequest::deserialize(&self.data)
    }
}

/// Payload of an expense-reimbursement request.
///
/// Field names follow the ERP form; the JSON keys are the intake system's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlayRequest {
    pub uuid: String,
    pub filename: String,
    #[serde(default)]
    pub attachment: Option<String>,
    #[serde(rename = "posteringstekst")]
    pub posting_text: String,
    pub reference: String,
    #[serde(rename = "beloeb")]
    pub amount: String,
    pub psp: String,
    #[serde(rename = "arts_konto")]
    pub account: String,
    #[serde(rename = "naeste_agent")]
    pub next_agent: String,
    pub cpr_encrypted: String,
    #[serde(rename = "barnets_navn", default, skip_serializing_if = "Option::is_none")]
    pub child_name: Option<String>,
}

impl OutlayRequest {
    pub fn ledger_key(&self) -> LedgerKey {
        LedgerKey {
            uuid: self.uuid.clone(),
            filename: self.filename.clone(),
        }
    }

    pub fn receipt_path(&self, dir: &Path) -> PathBuf {
        receipt_path(dir, &self.uuid)
    }
}

/// Ledger file pattern plus the uuid of the row to mark.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LedgerKey {
    pub uuid: String,
    pub filename: String,
}

/// Where the receipt of `uuid` is cached: `{dir}/receipt_{uuid}.pdf`.
pub fn receipt_path(dir: &Path, uuid: &str) -> PathBuf {
    dir.join(format!("receipt_{uuid}.pdf"))
}

#[cfg(test)]
pub(crate) fn sample_data(uuid: &str) -> serde_json::Value {
    serde_json::json!({
        "uuid": uuid,
        "filename": "udbetaling.xlsx",
        "attachment": format!("https://forms.example/files/{uuid}"),
        "posteringstekst": "Kørsel oktober",
        "reference": "REF-1",
        "beloeb": "125,50",
        "psp": "XG-5240220808-00004",
        "arts_konto": "40430002",
        "naeste_agent": "az12345",
        "cpr_encrypted": "gAAAAA-token",
    })
}
