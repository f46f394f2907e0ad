//! `BrokerStatusSnapshot`: a full, serializable checkpoint of the state
//! machine.
//!
//! Grounded on the source's `CURRENT`/`snapshot-000N` scheme in
//! `datastore::meta::state_machine::EmbeddedDBStateMachine`, simplified to a
//! single JSON document per snapshot rather than a full embedded database
//! directory, since the core state here is small enough to serialize
//! wholesale.

use serde::{Deserialize, Serialize};

use crate::lsn::LogSequenceNumber;
use crate::model::{Task, WorkerStatus};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BrokerStatusSnapshot {
    pub seq: SnapshotSeq,
    pub max_task_id: u64,
    pub tasks: Vec<Task>,
    pub workers: Vec<WorkerStatus>,
}

/// `LogSequenceNumber` doesn't implement `Default`, but an empty snapshot
/// needs one whose value is `NO_SNAPSHOT` ((-1,-1)); this newtype supplies
/// that default so `BrokerStatusSnapshot` can derive `Default` directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSeq(pub LogSequenceNumber);

impl Default for SnapshotSeq {
    fn default() -> Self {
        SnapshotSeq(crate::lsn::NO_SNAPSHOT)
    }
}

impl BrokerStatusSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Filename encoding `(epoch, offset)`: `<epoch>_<offset>.snap.json`.
    pub fn file_name(&self) -> String {
        format!("{}_{}.snap.json", self.seq.0.epoch, self.seq.0.offset)
    }

    /// Parses the `(epoch, offset)` pair back out of a snapshot file name
    /// produced by `file_name`, used at boot to find the newest snapshot by
    /// lexicographic comparison on the numeric pair.
    pub fn parse_file_name(name: &str) -> Option<LogSequenceNumber> {
        let stem = name.strip_suffix(".snap.json")?;
        let (epoch_str, offset_str) = stem.split_once('_')?;
        let epoch = epoch_str.parse().ok()?;
        let offset = offset_str.parse().ok()?;
        Some(LogSequenceNumber::new(epoch, offset))
    }
}
