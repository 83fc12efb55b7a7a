//! Ports - 外部依存の抽象化
//!
//! ワーカーの外部コラボレーターはすべてここの trait の裏にいる。
//! app 層はこれ以外に依存しない。具体的なアダプターは `impls` にある。

pub mod clock;
pub mod document_library;
pub mod id_generator;
pub mod receipt_fetcher;
pub mod status_sink;
pub mod ticket_submitter;
pub mod work_queue;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::document_library::DocumentLibrary;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::receipt_fetcher::ReceiptFetcher;
pub use self::status_sink::StatusSink;
pub use self::ticket_submitter::{SessionFactory, Submission, TicketSubmitter};
pub use self::work_queue::WorkQueue;
