//! Domain model (ids, status, queue elements, outcomes, errors).

pub mod errors;
pub mod ids;
pub mod outcome;
pub mod status;
pub mod task;

pub use self::errors::{
    ArchiveError, ConfigError, CycleFault, FetchError, LedgerError, LibraryError, QueueError, RunError,
    SessionError, SubmitError,
};
pub use self::ids::{Id, IdMarker, ParseIdError, RunId, TaskId};
pub use self::outcome::{LedgerMark, Outcome, OutcomeKind};
pub use self::status::{ParseStatusError, TaskStatus};
pub use self::task::{LedgerKey, OutlayRequest, Task, receipt_path};
