//! `StatusChangesLog`: the abstract append-only journal contract.
//!
//! Grounded on the capability set the source exposes around
//! `raft::Node`/`raft::StateMachine` (`node.server().execute(...)`,
//! `node.server().begin_read(...)`, `state_machine.apply/last_flushed`) in
//! `datastore::meta::store::Metastore` and
//! `datastore::meta::state_machine::EmbeddedDBStateMachine`: append maps to
//! `execute`, recovery maps to `StateMachine::apply` replay driven by
//! `raft::Node::create`'s `last_applied` parameter, and leadership maps to
//! the node's own election state. Here that capability set is made explicit
//! as a single trait so `MemoryLog` and `ReplicatedLog` can share one
//! interface with no runtime type introspection.

pub mod memory;
pub mod replicated;

use crate::edit::StatusEdit;
use crate::errors::Result;
use crate::lsn::LogSequenceNumber;

pub use memory::MemoryLog;
pub use replicated::{CoordinationService, ReplicatedLog, SharedLogClient};

/// Callback surface a `StatusChangesLog` implementation uses to notify its
/// owner of leadership transitions. Implemented by `Broker` and injected at
/// construction time so the log never holds a back-pointer to `Broker`
/// itself.
pub trait LeadershipListener: Send + Sync {
    /// Called once this replica has been granted leadership and a fresh
    /// epoch has been allocated. The listener should call `recover()` and
    /// then begin accepting client writes.
    fn leadership_acquired(&self);

    /// Called when this replica's leadership has been revoked or its
    /// coordination session was lost. The listener must stop accepting
    /// client writes and fall back to `follow_the_leader`.
    fn leadership_lost(&self);
}

/// Replays recovered/tailed edits into the state machine. `BrokerStatus`
/// implements this directly; tests may substitute a recording stub.
pub trait EditConsumer {
    fn consume(&self, seq: LogSequenceNumber, edit: &StatusEdit);
}

impl<F: Fn(LogSequenceNumber, &StatusEdit)> EditConsumer for F {
    fn consume(&self, seq: LogSequenceNumber, edit: &StatusEdit) {
        (self)(seq, edit)
    }
}

/// The append-only journal abstraction shared by `MemoryLog` (single-node)
/// and `ReplicatedLog` (shared-log + coordination service backed).
pub trait StatusChangesLog: Send + Sync {
    /// Durably appends `edit`, returning the `LogSequenceNumber` assigned to
    /// it. Fails with `BrokerError::LogUnavailable` on any storage or
    /// coordination error, and with `BrokerError::NotWritable` if this
    /// replica is not currently the leader. The returned number is strictly
    /// greater than every number this log has ever returned.
    fn append(&self, edit: StatusEdit) -> Result<LogSequenceNumber>;

    /// Allocates a new epoch, making subsequent `append` calls succeed.
    /// Called once after leadership has been acquired.
    fn start_writing(&self) -> Result<()>;

    /// True iff `append` is currently permitted.
    fn is_writable(&self) -> bool;

    /// Replays every edit with sequence number strictly greater than
    /// `skip_past`, in total order, invoking `consumer` for each.
    fn recover(&self, skip_past: LogSequenceNumber, consumer: &dyn EditConsumer) -> Result<()>;

    /// Semantically identical to `recover`, but used by a follower tailing
    /// a live leader; may return (e.g. on a transient disconnect) and be
    /// retried by the caller.
    fn follow_the_leader(&self, skip_past: LogSequenceNumber, consumer: &dyn EditConsumer) -> Result<()> {
        self.recover(skip_past, consumer)
    }

    /// Returns the newest persisted snapshot, or an empty snapshot at
    /// `NO_SNAPSHOT` if none has ever been written.
    fn load_latest_snapshot(&self) -> Result<crate::snapshot::BrokerStatusSnapshot>;

    /// Persists `snapshot` atomically, then (at the implementation's
    /// discretion) truncates journal prefixes no longer needed. Must never
    /// truncate past a snapshot that was not itself durably persisted.
    fn checkpoint(&self, snapshot: &crate::snapshot::BrokerStatusSnapshot) -> Result<()>;

    /// Requests leadership from the log's election mechanism. Asynchronous:
    /// the result is observed via `LeadershipListener::leadership_acquired`.
    fn request_leadership(&self) -> Result<()>;

    /// True iff this replica currently believes itself to be the leader.
    fn is_leader(&self) -> bool;
}
