//! `MemoryLog`: the non-replicated, single-node `StatusChangesLog`
//! implementation.
//!
//! This replica is always the leader of its own (single-member) epoch: there
//! is no coordination service to lose a session with, so `request_leadership`
//! succeeds immediately and `is_leader` is always true once `start_writing`
//! has run. Kept deliberately simple — grounded on the idea of the source's
//! `TestMetastore` (`datastore::meta::test_store`), a single-process stand-in
//! used in unit tests rather than a production multi-node path.

use std::sync::Mutex;

use crate::edit::StatusEdit;
use crate::errors::{BrokerError, Result};
use crate::log::{EditConsumer, StatusChangesLog};
use crate::lsn::{LogSequenceNumber, NO_SNAPSHOT};
use crate::snapshot::BrokerStatusSnapshot;

struct State {
    entries: Vec<(LogSequenceNumber, StatusEdit)>,
    epoch: i64,
    writable: bool,
    latest_snapshot: Option<BrokerStatusSnapshot>,
}

pub struct MemoryLog {
    state: Mutex<State>,
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLog {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                entries: Vec::new(),
                epoch: 0,
                writable: false,
                latest_snapshot: None,
            }),
        }
    }

    /// Total count of entries ever appended (including ones truncated by a
    /// checkpoint), for test assertions.
    pub fn entry_count(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }
}

impl StatusChangesLog for MemoryLog {
    fn append(&self, edit: StatusEdit) -> Result<LogSequenceNumber> {
        let mut state = self.state.lock().unwrap();
        if !state.writable {
            return Err(BrokerError::NotWritable);
        }

        let next_offset = state
            .entries
            .last()
            .filter(|(seq, _)| seq.epoch == state.epoch)
            .map(|(seq, _)| seq.offset + 1)
            .unwrap_or(0);

        let seq = LogSequenceNumber::new(state.epoch, next_offset);
        state.entries.push((seq, edit));
        Ok(seq)
    }

    fn start_writing(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.epoch += 1;
        state.writable = true;
        Ok(())
    }

    fn is_writable(&self) -> bool {
        self.state.lock().unwrap().writable
    }

    fn recover(&self, skip_past: LogSequenceNumber, consumer: &dyn EditConsumer) -> Result<()> {
        let state = self.state.lock().unwrap();
        for (seq, edit) in state.entries.iter() {
            if *seq > skip_past {
                consumer.consume(*seq, edit);
            }
        }
        Ok(())
    }

    fn load_latest_snapshot(&self) -> Result<BrokerStatusSnapshot> {
        let state = self.state.lock().unwrap();
        Ok(state
            .latest_snapshot
            .clone()
            .unwrap_or_else(BrokerStatusSnapshot::empty))
    }

    fn checkpoint(&self, snapshot: &BrokerStatusSnapshot) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.entries.retain(|(seq, _)| *seq > snapshot.seq.0);
        state.latest_snapshot = Some(snapshot.clone());
        Ok(())
    }

    fn request_leadership(&self) -> Result<()> {
        Ok(())
    }

    fn is_leader(&self) -> bool {
        self.state.lock().unwrap().writable
    }
}
