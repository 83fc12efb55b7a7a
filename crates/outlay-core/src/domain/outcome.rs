//! Outcome model: the classified result of processing one queue element.
//!
//! The worker loop reads it to decide control flow (advance or retry) and the
//! ledger reads it to decide which marker to set.

use serde::{Deserialize, Serialize};

/// Result of one task attempt.
///
/// - `Completed`: the ticket was created.
/// - `BusinessError`: the target system rejected the data; final for this run.
/// - `RobotError`: unexpected or fatal; the loop invalidates the session and
///   retries the same element in the next cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Completed,
    BusinessError { message: String },
    RobotError { message: String },
}

/// Payload-free classification of an `Outcome`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    Completed,
    BusinessError,
    RobotError,
}

/// Which ledger marker an outcome maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerMark {
    Succeeded,
    Failed,
}

impl Outcome {
    pub fn business(message: impl Into<String>) -> Self {
        Outcome::BusinessError {
            message: message.into(),
        }
    }

    pub fn robot(message: impl Into<String>) -> Self {
        Outcome::RobotError {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Completed => OutcomeKind::Completed,
            Outcome::BusinessError { .. } => OutcomeKind::BusinessError,
            Outcome::RobotError { .. } => OutcomeKind::RobotError,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Outcome::Completed => None,
            Outcome::BusinessError { message } | Outcome::RobotError { message } => Some(message),
        }
    }

    pub fn ledger_mark(&self) -> LedgerMark {
        match self {
            Outcome::Completed => LedgerMark::Succeeded,
            _ => LedgerMark::Failed,
        }
    }
}
