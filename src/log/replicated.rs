//! `ReplicatedLog`: a `StatusChangesLog` backed by an external shared-log
//! service and coordinated by an external coordination service for leader
//! election.
//!
//! Grounded on `datastore::meta::store::run()`, which wires a
//! `raft::Node` (coordination + replication) to an
//! `EmbeddedDBStateMachine` (durable apply) and a `CURRENT`/`snapshot-000N`
//! file scheme (`datastore::meta::state_machine::EmbeddedDBStateMachine::open`)
//! for locating the newest snapshot at boot. Neither the shared-log transport
//! nor the coordination/election mechanism is implemented by this crate; they
//! appear here only as the `SharedLogClient` and `CoordinationService`
//! traits. `ReplicatedLog` owns the epoch/ledger rollover and the snapshot
//! directory exactly as the source's state machine owns its `CURRENT` file.

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::edit::StatusEdit;
use crate::errors::{BrokerError, Result};
use crate::log::{EditConsumer, LeadershipListener, StatusChangesLog};
use crate::lsn::LogSequenceNumber;
use crate::snapshot::BrokerStatusSnapshot;

/// Abstract handle to the durable, replicated ledger. Not implemented here:
/// a real implementation would talk to an external shared-log service.
pub trait SharedLogClient: Send + Sync {
    /// Appends `payload` to the ledger for `epoch`, returning the offset
    /// assigned to it. Must fail if `epoch` has been superseded by a later
    /// rollover (split-brain protection).
    fn append(&self, epoch: i64, payload: &[u8]) -> Result<i64>;

    /// Returns every entry with sequence number strictly greater than
    /// `skip_past`, across any epoch, in total order.
    fn read_since(&self, skip_past: LogSequenceNumber) -> Result<Vec<(LogSequenceNumber, Vec<u8>)>>;

    /// Allocates and returns a new, strictly greater epoch id. Called once
    /// per `start_writing()`.
    fn roll_over(&self) -> Result<i64>;

    /// Drops ledger entries at or before `seq`. Only ever called after a
    /// corresponding snapshot has been durably persisted.
    fn truncate_before(&self, seq: LogSequenceNumber) -> Result<()>;
}

/// Abstract handle to the external coordination service (e.g. a session-
/// based lock service) used purely for leader election. Not implemented
/// here.
pub trait CoordinationService: Send + Sync {
    /// Registers interest in leadership. `listener.leadership_acquired()` is
    /// invoked (on some implementation-defined thread) once granted;
    /// `listener.leadership_lost()` is invoked on session expiry or when a
    /// competing replica takes over.
    fn run_election(&self, listener: Arc<dyn LeadershipListener>) -> Result<()>;

    /// True iff this replica currently holds leadership, per the
    /// coordination service's last known state.
    fn is_leader(&self) -> bool;
}

struct State {
    epoch: i64,
    writable: bool,
}

pub struct ReplicatedLog {
    shared_log: Box<dyn SharedLogClient>,
    coordination: Box<dyn CoordinationService>,
    snapshots_dir: PathBuf,
    state: Mutex<State>,
    /// Serializes checkpoint file I/O, separate from `state` so a checkpoint
    /// write never blocks a concurrent `append`.
    snapshot_lock: Mutex<()>,
}

impl ReplicatedLog {
    pub fn new(
        shared_log: Box<dyn SharedLogClient>,
        coordination: Box<dyn CoordinationService>,
        snapshots_dir: PathBuf,
    ) -> Result<Self> {
        fs::create_dir_all(&snapshots_dir)
            .map_err(|e| BrokerError::LogUnavailable(format!("creating snapshots dir: {e}")))?;

        Ok(Self {
            shared_log,
            coordination,
            snapshots_dir,
            state: Mutex::new(State {
                epoch: 0,
                writable: false,
            }),
            snapshot_lock: Mutex::new(()),
        })
    }

    fn snapshot_path(&self, file_name: &str) -> PathBuf {
        self.snapshots_dir.join(file_name)
    }

    /// Picks the newest snapshot file by lexicographic comparison on the
    /// `(epoch, offset)` pair encoded in its name.
    fn newest_snapshot_file(&self) -> Result<Option<(LogSequenceNumber, PathBuf)>> {
        let read_dir = match fs::read_dir(&self.snapshots_dir) {
            Ok(d) => d,
            Err(e) => return Err(BrokerError::LogUnavailable(format!("reading snapshots dir: {e}"))),
        };

        let mut best: Option<(LogSequenceNumber, PathBuf)> = None;
        for entry in read_dir {
            let entry = entry.map_err(|e| BrokerError::LogUnavailable(e.to_string()))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(seq) = BrokerStatusSnapshot::parse_file_name(&name) {
                if best.as_ref().map(|(best_seq, _)| seq > *best_seq).unwrap_or(true) {
                    best = Some((seq, entry.path()));
                }
            }
        }
        Ok(best)
    }
}

impl StatusChangesLog for ReplicatedLog {
    fn append(&self, edit: StatusEdit) -> Result<LogSequenceNumber> {
        let epoch = {
            let state = self.state.lock().unwrap();
            if !state.writable {
                return Err(BrokerError::NotWritable);
            }
            state.epoch
        };

        let payload = bincode::serialize(&edit)
            .map_err(|e| BrokerError::LogUnavailable(format!("serializing edit: {e}")))?;

        match self.shared_log.append(epoch, &payload) {
            Ok(offset) => Ok(LogSequenceNumber::new(epoch, offset)),
            Err(e) => {
                // Any append failure is fatal to this replica's writer role.
                let mut state = self.state.lock().unwrap();
                state.writable = false;
                tracing::error!(error = %e, "append failed; stepping down as writer");
                Err(e)
            }
        }
    }

    fn start_writing(&self) -> Result<()> {
        let new_epoch = self.shared_log.roll_over()?;
        let mut state = self.state.lock().unwrap();
        state.epoch = new_epoch;
        state.writable = true;
        Ok(())
    }

    fn is_writable(&self) -> bool {
        self.state.lock().unwrap().writable
    }

    fn recover(&self, skip_past: LogSequenceNumber, consumer: &dyn EditConsumer) -> Result<()> {
        for (seq, payload) in self.shared_log.read_since(skip_past)? {
            let edit: StatusEdit = bincode::deserialize(&payload)
                .map_err(|e| BrokerError::LogUnavailable(format!("deserializing edit: {e}")))?;
            consumer.consume(seq, &edit);
        }
        Ok(())
    }

    fn load_latest_snapshot(&self) -> Result<BrokerStatusSnapshot> {
        let _guard = self.snapshot_lock.lock().unwrap();
        match self.newest_snapshot_file()? {
            None => Ok(BrokerStatusSnapshot::empty()),
            Some((_, path)) => {
                let data = fs::read(&path)
                    .map_err(|e| BrokerError::LogUnavailable(format!("reading snapshot: {e}")))?;
                serde_json::from_slice(&data)
                    .map_err(|e| BrokerError::LogUnavailable(format!("parsing snapshot: {e}")))
            }
        }
    }

    fn checkpoint(&self, snapshot: &BrokerStatusSnapshot) -> Result<()> {
        let _guard = self.snapshot_lock.lock().unwrap();

        let data = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| BrokerError::LogUnavailable(format!("serializing snapshot: {e}")))?;

        // Write to a temp file then rename, so a crash mid-write never
        // leaves a half-written snapshot that `newest_snapshot_file` could
        // pick up (mirrors the source's atomic `BlobFile`/`CURRENT`-style
        // replace-by-rename pattern).
        let final_path = self.snapshot_path(&snapshot.file_name());
        let tmp_path = self.snapshot_path(&format!("{}.tmp", snapshot.file_name()));
        fs::write(&tmp_path, &data)
            .map_err(|e| BrokerError::LogUnavailable(format!("writing snapshot: {e}")))?;
        fs::rename(&tmp_path, &final_path)
            .map_err(|e| BrokerError::LogUnavailable(format!("renaming snapshot: {e}")))?;

        // Only truncate the ledger after the snapshot is durably on disk.
        self.shared_log.truncate_before(snapshot.seq.0)?;
        tracing::info!(seq = %snapshot.seq.0, "checkpoint committed");
        Ok(())
    }

    fn request_leadership(&self) -> Result<()> {
        // The concrete `LeadershipListener` is supplied by `Broker` at
        // construction of the `CoordinationService` implementation, not
        // stored on `ReplicatedLog` itself, so it never needs a back-pointer
        // to `Broker`. This default implementation has no listener to hand
        // to `run_election`, so implementations wanting callback-driven
        // election should construct `ReplicatedLog` already wired to a
        // `CoordinationService` whose listener was bound at construction.
        if self.coordination.is_leader() {
            return Ok(());
        }
        Err(BrokerError::TransientCoordinationError(
            "leadership not yet granted; await leadership_acquired()".into(),
        ))
    }

    fn is_leader(&self) -> bool {
        self.coordination.is_leader()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsn::NO_SNAPSHOT;
    use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

    /// An in-memory `SharedLogClient` used purely to exercise `ReplicatedLog`
    /// without any real external service, analogous to the source's
    /// `TestMetastore`.
    struct FakeSharedLog {
        next_epoch: AtomicI64,
        entries: Mutex<Vec<(LogSequenceNumber, Vec<u8>)>>,
        fail_appends: AtomicBool,
    }

    impl FakeSharedLog {
        fn new() -> Self {
            Self {
                next_epoch: AtomicI64::new(0),
                entries: Mutex::new(Vec::new()),
                fail_appends: AtomicBool::new(false),
            }
        }
    }

    impl SharedLogClient for FakeSharedLog {
        fn append(&self, epoch: i64, payload: &[u8]) -> Result<i64> {
            if self.fail_appends.load(Ordering::SeqCst) {
                return Err(BrokerError::LogUnavailable("injected failure".into()));
            }
            let mut entries = self.entries.lock().unwrap();
            let offset = entries
                .iter()
                .filter(|(seq, _)| seq.epoch == epoch)
                .map(|(seq, _)| seq.offset + 1)
                .last()
                .unwrap_or(0);
            let seq = LogSequenceNumber::new(epoch, offset);
            entries.push((seq, payload.to_vec()));
            Ok(offset)
        }

        fn read_since(&self, skip_past: LogSequenceNumber) -> Result<Vec<(LogSequenceNumber, Vec<u8>)>> {
            Ok(self
                .entries
                .lock()
                .unwrap()
                .iter()
                .filter(|(seq, _)| *seq > skip_past)
                .cloned()
                .collect())
        }

        fn roll_over(&self) -> Result<i64> {
            Ok(self.next_epoch.fetch_add(1, Ordering::SeqCst))
        }

        fn truncate_before(&self, seq: LogSequenceNumber) -> Result<()> {
            self.entries.lock().unwrap().retain(|(s, _)| *s > seq);
            Ok(())
        }
    }

    struct FakeCoordination {
        leader: AtomicBool,
    }

    impl CoordinationService for FakeCoordination {
        fn run_election(&self, listener: Arc<dyn LeadershipListener>) -> Result<()> {
            self.leader.store(true, Ordering::SeqCst);
            listener.leadership_acquired();
            Ok(())
        }

        fn is_leader(&self) -> bool {
            self.leader.load(Ordering::SeqCst)
        }
    }

    fn add_task(id: u64) -> StatusEdit {
        StatusEdit::AddTask {
            task_id: id,
            task_type: 1,
            user_id: "u".into(),
            parameter: vec![],
            created_timestamp: 0,
        }
    }

    fn build(dir: &std::path::Path) -> ReplicatedLog {
        ReplicatedLog::new(
            Box::new(FakeSharedLog::new()),
            Box::new(FakeCoordination {
                leader: AtomicBool::new(true),
            }),
            dir.to_path_buf(),
        )
        .unwrap()
    }

    #[test]
    fn append_without_start_writing_fails() {
        let dir = tempfile::tempdir().unwrap();
        let log = build(dir.path());
        assert!(matches!(log.append(add_task(1)), Err(BrokerError::NotWritable)));
    }

    #[test]
    fn start_writing_rolls_epoch_and_unblocks_append() {
        let dir = tempfile::tempdir().unwrap();
        let log = build(dir.path());
        log.start_writing().unwrap();
        let seq = log.append(add_task(1)).unwrap();
        assert_eq!(seq, LogSequenceNumber::new(0, 0));
    }

    #[test]
    fn append_failure_marks_the_writer_not_writable() {
        let dir = tempfile::tempdir().unwrap();
        let shared_log = Arc::new(FakeSharedLog::new());
        // We need the same instance behind both the trait object and our
        // direct handle to flip `fail_appends`, so wrap with a thin pass-
        // through that shares the Arc.
        struct Shared(Arc<FakeSharedLog>);
        impl SharedLogClient for Shared {
            fn append(&self, epoch: i64, payload: &[u8]) -> Result<i64> {
                self.0.append(epoch, payload)
            }
            fn read_since(&self, skip_past: LogSequenceNumber) -> Result<Vec<(LogSequenceNumber, Vec<u8>)>> {
                self.0.read_since(skip_past)
            }
            fn roll_over(&self) -> Result<i64> {
                self.0.roll_over()
            }
            fn truncate_before(&self, seq: LogSequenceNumber) -> Result<()> {
                self.0.truncate_before(seq)
            }
        }

        let log = ReplicatedLog::new(
            Box::new(Shared(shared_log.clone())),
            Box::new(FakeCoordination {
                leader: AtomicBool::new(true),
            }),
            dir.path().to_path_buf(),
        )
        .unwrap();
        log.start_writing().unwrap();
        shared_log.fail_appends.store(true, Ordering::SeqCst);

        assert!(log.append(add_task(1)).is_err());
        assert!(!log.is_writable());
    }

    #[test]
    fn checkpoint_then_load_latest_snapshot_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let log = build(dir.path());
        log.start_writing().unwrap();
        log.append(add_task(1)).unwrap();

        let mut snap = BrokerStatusSnapshot::empty();
        snap.seq.0 = LogSequenceNumber::new(0, 0);
        snap.max_task_id = 1;
        log.checkpoint(&snap).unwrap();

        let loaded = log.load_latest_snapshot().unwrap();
        assert_eq!(loaded, snap);
    }

    #[test]
    fn newest_snapshot_wins_by_epoch_then_offset() {
        let dir = tempfile::tempdir().unwrap();
        let log = build(dir.path());

        let mut older = BrokerStatusSnapshot::empty();
        older.seq.0 = LogSequenceNumber::new(0, 5);
        older.max_task_id = 1;

        let mut newer = BrokerStatusSnapshot::empty();
        newer.seq.0 = LogSequenceNumber::new(1, 0);
        newer.max_task_id = 2;

        log.checkpoint(&older).unwrap();
        log.checkpoint(&newer).unwrap();

        assert_eq!(log.load_latest_snapshot().unwrap(), newer);
    }

    #[test]
    fn no_snapshot_on_disk_returns_empty_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let log = build(dir.path());
        assert_eq!(log.load_latest_snapshot().unwrap().seq.0, NO_SNAPSHOT);
    }

    #[test]
    fn request_leadership_reflects_coordination_service() {
        let dir = tempfile::tempdir().unwrap();
        let log = build(dir.path());
        assert!(log.is_leader());
        assert!(log.request_leadership().is_ok());
    }
}
