//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてロボット本体を実装します。
//!
//! # コンポーネント
//! - **TaskProcessor**: キュー要素 1 件を fetch → submit → ledger
//! - **WorkerLoop**: processor を包むリトライサイクルと session の所有
//! - **BatchArchiver**: 処理済み ledger を document library へ格納
//! - **QueueCounts**: オペレーター向けのステータス集計

pub mod archiver;
pub mod status;
pub mod task_processor;
pub mod worker_loop;

#[cfg(test)]
pub(crate) mod testing;

pub use self::archiver::{ArchiveFolders, ArchivedLedger, BatchArchiver, Destination};
pub use self::status::QueueCounts;
pub use self::task_processor::TaskProcessor;
pub use self::worker_loop::{LoopSettings, RunReport, WorkerLoop};
