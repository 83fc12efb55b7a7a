//! Queue element state machine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a queue element.
///
/// State transitions:
/// - New -> InProgress -> Done
/// - New -> InProgress -> Failed -> InProgress (same element retried in the next cycle)
/// - Failed -> New (operator requeue)
/// - InProgress -> New (operator requeue of an element stranded by a killed run)
///
/// Re-marking `InProgress`, `Failed` or `Done` with the same status is allowed:
/// the status is a last-write-wins projection, not a counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    New,
    InProgress,
    Done,
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::New,
        TaskStatus::InProgress,
        TaskStatus::Done,
        TaskStatus::Failed,
    ];

    /// Is this the end of an attempt?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (New, InProgress)
                | (InProgress, InProgress)
                | (InProgress, Done)
                | (InProgress, Failed)
                | (InProgress, New)
                | (Failed, InProgress)
                | (Failed, Failed)
                | (Failed, New)
                | (Done, Done)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::New => "NEW",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Done => "DONE",
            TaskStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown task status '{0}'")]
pub struct ParseStatusError(pub String);

impl FromStr for TaskStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use TaskStatus::*;

    #[rstest]
    #[case(New, InProgress, true)]
    #[case(InProgress, InProgress, true)]
    #[case(InProgress, Done, true)]
    #[case(InProgress, Failed, true)]
    #[case(Failed, InProgress, true)]
    #[case(Failed, New, true)]
    #[case(Done, Done, true)]
    #[case(New, Done, false)]
    #[case(New, Failed, false)]
    #[case(Done, InProgress, false)]
    #[case(Done, Failed, false)]
    #[case(Done, New, false)]
    #[case(InProgress, New, true)]
    #[case(New, New, false)]
    fn transitions(#[case] from: TaskStatus, #[case] to: TaskStatus, #[case] allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn only_done_and_failed_are_terminal() {
        assert!(Done.is_terminal());
        assert!(Failed.is_terminal());
        assert!(!New.is_terminal());
        assert!(!InProgress.is_terminal());
    }

    #[test]
    fn parses_its_own_display() {
        for status in TaskStatus::ALL {
            assert_eq!(status.to_string().parse::<TaskStatus>().unwrap(), status);
        }
        assert_eq!("failed".parse::<TaskStatus>().unwrap(), Failed);
        assert!("DEAD".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn serializes_screaming_snake_case() {
        assert_eq!(serde_json::to_string(&InProgress).unwrap(), "\"IN_PROGRESS\"");
    }
}
