//! `LogSequenceNumber`: a totally ordered identifier tagging every edit
//! applied to `BrokerStatus`.
//!
//! Modelled on the `(Term, LogIndex)` pair used by the source's raft log
//! (see `raft::protos::{Term, LogIndex}`): `epoch` plays the role of `Term`
//! (bumped on every leadership change or ledger rollover) and `offset` plays
//! the role of `LogIndex` (monotonic within one epoch).

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Sentinel returned by `StatusChangesLog::load_latest_snapshot` when no
/// snapshot has ever been written.
pub const NO_SNAPSHOT: LogSequenceNumber = LogSequenceNumber {
    epoch: -1,
    offset: -1,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogSequenceNumber {
    pub epoch: i64,
    pub offset: i64,
}

impl LogSequenceNumber {
    pub const fn new(epoch: i64, offset: i64) -> Self {
        Self { epoch, offset }
    }

    pub const ZERO: LogSequenceNumber = LogSequenceNumber::new(0, 0);

    /// The sequence number immediately following this one within the same
    /// epoch.
    pub fn next(&self) -> Self {
        Self {
            epoch: self.epoch,
            offset: self.offset + 1,
        }
    }

    /// The first sequence number of a freshly rolled-over epoch.
    pub fn first_of_epoch(epoch: i64) -> Self {
        Self { epoch, offset: 0 }
    }
}

impl PartialOrd for LogSequenceNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LogSequenceNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.epoch, self.offset).cmp(&(other.epoch, other.offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_by_epoch_then_offset() {
        assert!(LogSequenceNumber::new(1, 100) < LogSequenceNumber::new(2, 0));
        assert!(LogSequenceNumber::new(2, 0) < LogSequenceNumber::new(2, 1));
        assert_eq!(LogSequenceNumber::new(2, 1), LogSequenceNumber::new(2, 1));
    }

    #[test]
    fn next_stays_in_epoch() {
        let a = LogSequenceNumber::new(3, 7);
        assert_eq!(a.next(), LogSequenceNumber::new(3, 8));
    }

    #[test]
    fn no_snapshot_sorts_before_everything() {
        assert!(NO_SNAPSHOT < LogSequenceNumber::new(0, 0));
    }
}
