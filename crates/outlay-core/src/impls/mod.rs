//! Impls - adapters behind the ports.
//!
//! - in-memory queue and ledger for tests and dry runs
//! - SQLite queue, Excel ledger, OS2Forms, SharePoint and Chrome (CDP) for production

pub mod browser;
pub mod ledger;
pub mod library;
pub mod memory_queue;
pub mod os2forms;
pub mod sqlite_queue;
pub mod xlsx_ledger;

pub use self::browser::{
    BrowserSession, ChromeSessions, ChromeSettings, CprCipher, OpusSettings, OpusTicketSubmitter,
};
pub use self::ledger::{Cell, InMemoryLedger, LedgerTable};
pub use self::library::{LocalDocumentLibrary, SharePointLibrary};
pub use self::memory_queue::InMemoryWorkQueue;
pub use self::os2forms::Os2FormsFetcher;
pub use self::sqlite_queue::SqliteWorkQueue;
pub use self::xlsx_ledger::XlsxLedger;
