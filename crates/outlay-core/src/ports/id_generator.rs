//! IdGenerator port - id minting.
//!
//! Abstracted behind a trait so the timestamp part of the ULID follows the
//! injected `Clock`.

use std::sync::{Mutex, PoisonError};

use crate::domain::ids::{RunId, TaskId};
use crate::ports::Clock;
use ulid::Ulid;

/// Mints queue element and run ids.
pub trait IdGenerator: Send + Sync {
    fn generate_task_id(&self) -> TaskId;

    fn generate_run_id(&self) -> RunId;
}

/// ULID-based generator: clock timestamp + random tail.
///
/// Ids from one generator are strictly increasing, also within the same
/// millisecond, so id order is creation order.
pub struct UlidGenerator<C> {
    clock: C,
    last: Mutex<Ulid>,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            last: Mutex::new(Ulid::nil()),
        }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        let candidate = Ulid::from_parts(timestamp_ms, rand::random());
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let next = if candidate > *last {
            candidate
        } else {
            last.increment().unwrap_or(candidate)
        };
        *last = next;
        next
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_task_id(&self) -> TaskId {
        TaskId::from(self.next_ulid())
    }

    fn generate_run_id(&self) -> RunId {
        RunId::from(self.next_ulid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn generates_unique_ids() {
        let id_gen = UlidGenerator::new(SystemClock);

        let id1 = id_gen.generate_task_id();
        let id2 = id_gen.generate_task_id();

        assert_ne!(id1, id2);
    }

    #[test]
    fn fixed_clock_pins_the_timestamp_part() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(FixedClock::new(fixed_time));

        let id1 = id_gen.generate_task_id();
        let id2 = id_gen.generate_task_id();

        // random tail differs, timestamp does not
        assert_ne!(id1, id2);
        assert_eq!(id1.as_ulid().timestamp_ms(), fixed_time.timestamp_millis() as u64);
        assert_eq!(id2.as_ulid().timestamp_ms(), fixed_time.timestamp_millis() as u64);
    }

    #[test]
    fn ids_increase_within_one_millisecond() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(FixedClock::new(fixed_time));

        let ids: Vec<_> = (0..50).map(|_| id_gen.generate_task_id()).collect();

        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn run_ids_have_their_own_prefix() {
        let id_gen = UlidGenerator::new(SystemClock);
        assert!(id_gen.generate_run_id().to_string().starts_with("run-"));
        assert!(id_gen.generate_task_id().to_string().starts_with("task-"));
    }
}
