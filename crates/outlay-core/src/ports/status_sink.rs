//! StatusSink port - リクエストごとの処理結果を ledger に記録

use async_trait::async_trait;

use crate::domain::{LedgerError, LedgerKey, Outcome};

/// Reconciles a task outcome into the external ledger.
///
/// Exactly one of the two markers is set per call; setting one clears the
/// other, so recording the same outcome twice leaves the row unchanged.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn record(&self, key: &LedgerKey, outcome: &Outcome) -> Result<(), LedgerError>;
}
