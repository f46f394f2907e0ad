//! `BrokerStatus`: the single-writer-lock replicated state machine.
//!
//! Grounded on `datastore::meta::state_machine::EmbeddedDBStateMachine`: one
//! `apply(seq, edit)` entry point fed by the log (either replayed during
//! recovery or applied live after a successful append), a `last_applied`
//! watermark (`last_flushed` there), and a `snapshot`/`restore` pair. Unlike
//! the source, which shards its table across an embedded database file per
//! entity, all task/worker state here fits in memory behind one `RwLock`, so
//! reads never block each other and only a write takes the exclusive path.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use crate::edit::StatusEdit;
use crate::errors::{BrokerError, Result};
use crate::log::{EditConsumer, StatusChangesLog};
use crate::lsn::LogSequenceNumber;
use crate::model::{Task, TaskId, TaskStatus, WorkerConnState, WorkerId, WorkerStatus};
use crate::snapshot::BrokerStatusSnapshot;

struct State {
    tasks: HashMap<TaskId, Task>,
    workers: HashMap<WorkerId, WorkerStatus>,
    max_task_id: TaskId,
    last_applied: LogSequenceNumber,
}

/// The core state machine: every task and worker the broker currently knows
/// about, plus the watermark of the last edit folded into it.
pub struct BrokerStatus {
    state: RwLock<State>,
}

impl Default for BrokerStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerStatus {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State {
                tasks: HashMap::new(),
                workers: HashMap::new(),
                max_task_id: 0,
                last_applied: crate::lsn::NO_SNAPSHOT,
            }),
        }
    }

    /// The sequence number of the most recently applied edit (or
    /// `NO_SNAPSHOT` if nothing has been applied yet).
    pub fn last_applied(&self) -> LogSequenceNumber {
        self.state.read().unwrap().last_applied
    }

    /// Next unused task id. Monotonic across restarts because it is restored
    /// from the snapshot/log exactly like any other piece of state.
    pub fn next_task_id(&self) -> TaskId {
        self.state.read().unwrap().max_task_id + 1
    }

    pub fn get_task(&self, task_id: TaskId) -> Option<Task> {
        self.state.read().unwrap().tasks.get(&task_id).cloned()
    }

    pub fn get_all_tasks(&self) -> Vec<Task> {
        self.state.read().unwrap().tasks.values().cloned().collect()
    }

    pub fn get_all_workers(&self) -> Vec<WorkerStatus> {
        self.state.read().unwrap().workers.values().cloned().collect()
    }

    pub fn get_task_status(&self, task_id: TaskId) -> Option<TaskStatus> {
        self.state.read().unwrap().tasks.get(&task_id).map(|t| t.status)
    }

    /// Appends `edit` to `log` and, on success, applies it to this state
    /// machine. The two-step discipline (append, then apply) means a failed
    /// append never mutates state, and a successful append is always
    /// eventually reflected here.
    pub fn apply_modification(&self, log: &dyn StatusChangesLog, edit: StatusEdit) -> Result<LogSequenceNumber> {
        let seq = log.append(edit.clone())?;
        self.apply(seq, &edit)?;
        Ok(seq)
    }

    /// Folds `edit`, already assigned sequence number `seq`, into the state
    /// machine. Never called with a `seq` the machine has already applied or
    /// skipped (the log guarantees strictly increasing delivery).
    ///
    /// Any inconsistency found here (e.g. assigning a task that does not
    /// exist) is a `BrokerError::InvariantViolation`: the replicated log is
    /// assumed to carry only edits that were valid when some replica first
    /// applied them, so a mismatch means this replica's state has diverged
    /// and it must not continue serving.
    pub fn apply(&self, seq: LogSequenceNumber, edit: &StatusEdit) -> Result<()> {
        let mut state = self.state.write().unwrap();

        if seq <= state.last_applied {
            warn!(?seq, last_applied = ?state.last_applied, "ignoring already-applied edit");
            return Ok(());
        }

        match edit {
            StatusEdit::AddTask {
                task_id,
                task_type,
                user_id,
                parameter,
                created_timestamp,
            } => {
                if state.tasks.contains_key(task_id) {
                    return Err(BrokerError::InvariantViolation(format!(
                        "AddTask for already-known task {task_id}"
                    )));
                }
                let task = Task::new(*task_id, *task_type, user_id.clone(), parameter.clone(), *created_timestamp);
                state.tasks.insert(*task_id, task);
                state.max_task_id = state.max_task_id.max(*task_id);
            }

            StatusEdit::AssignTaskToWorker { task_id, worker_id } => {
                let task = state
                    .tasks
                    .get_mut(task_id)
                    .ok_or_else(|| BrokerError::InvariantViolation(format!("AssignTaskToWorker: unknown task {task_id}")))?;
                if task.status != TaskStatus::Waiting {
                    return Err(BrokerError::InvariantViolation(format!(
                        "AssignTaskToWorker: task {task_id} not Waiting (is {:?})",
                        task.status
                    )));
                }
                task.status = TaskStatus::Running;
                task.worker_id = Some(worker_id.clone());
            }

            StatusEdit::TaskFinished {
                task_id,
                worker_id,
                status,
                result,
            } => {
                let task = state
                    .tasks
                    .get_mut(task_id)
                    .ok_or_else(|| BrokerError::InvariantViolation(format!("TaskFinished: unknown task {task_id}")))?;
                if task.worker_id.as_deref() != Some(worker_id.as_str()) {
                    return Err(BrokerError::InvariantViolation(format!(
                        "TaskFinished: task {task_id} reported by {worker_id}, assigned to {:?}",
                        task.worker_id
                    )));
                }
                if !status.is_terminal() {
                    return Err(BrokerError::InvariantViolation(format!(
                        "TaskFinished: status {status:?} is not terminal"
                    )));
                }
                task.status = *status;
                task.result = result.clone();
                task.terminal_since_seq = Some(seq.offset);
            }

            StatusEdit::WorkerConnected {
                worker_id,
                worker_location,
                worker_process_id,
                timestamp,
            } => {
                state.workers.insert(
                    worker_id.clone(),
                    WorkerStatus {
                        worker_id: worker_id.clone(),
                        worker_location: worker_location.clone(),
                        process_id: *worker_process_id,
                        last_connection_ts: *timestamp,
                        status: WorkerConnState::Connected,
                    },
                );
            }

            StatusEdit::WorkerDisconnected { worker_id, timestamp, dead } => {
                let worker = state
                    .workers
                    .get_mut(worker_id)
                    .ok_or_else(|| BrokerError::InvariantViolation(format!("WorkerDisconnected: unknown worker {worker_id}")))?;
                worker.last_connection_ts = *timestamp;
                worker.status = if *dead {
                    WorkerConnState::Dead
                } else {
                    WorkerConnState::Disconnected
                };
            }

            StatusEdit::PurgeTasks { task_ids, as_of_seq } => {
                // A task_id that is absent (already purged by a prior replay
                // of this same edit, e.g. during recovery after a partial
                // checkpoint) or not yet terminal (resurrected after the
                // purge was decided, impossible under the state machine but
                // checked defensively) is a no-op for that id, not a reason
                // to fail the whole batch.
                for task_id in task_ids {
                    let terminal = state.tasks.get(task_id).map(|t| t.status.is_terminal()).unwrap_or(false);
                    if terminal {
                        state.tasks.remove(task_id);
                    }
                }
                let _ = as_of_seq;
            }
        }

        state.last_applied = seq;
        Ok(())
    }

    /// Produces a point-in-time snapshot suitable for `StatusChangesLog::checkpoint`.
    pub fn snapshot(&self) -> BrokerStatusSnapshot {
        let state = self.state.read().unwrap();
        BrokerStatusSnapshot {
            seq: crate::snapshot::SnapshotSeq(state.last_applied),
            max_task_id: state.max_task_id,
            tasks: state.tasks.values().cloned().collect(),
            workers: state.workers.values().cloned().collect(),
        }
    }

    /// Restores from `snapshot`, discarding any prior state, then replays
    /// everything the log has past the snapshot's sequence number. Used both
    /// at boot and whenever a follower needs to fast-forward past a gap it
    /// can no longer replay edit-by-edit.
    pub fn restore_from(&self, log: &dyn StatusChangesLog, snapshot: BrokerStatusSnapshot) -> Result<()> {
        {
            let mut state = self.state.write().unwrap();
            state.tasks = snapshot.tasks.into_iter().map(|t| (t.task_id, t)).collect();
            state.workers = snapshot.workers.into_iter().map(|w| (w.worker_id.clone(), w)).collect();
            state.max_task_id = snapshot.max_task_id;
            state.last_applied = snapshot.seq.0;
        }

        let skip_past = self.state.read().unwrap().last_applied;
        info!(?skip_past, "replaying log after snapshot restore");
        log.recover(skip_past, self)
    }

    /// Loads the newest snapshot from `log` and replays everything after it.
    /// Call once, before accepting any client traffic (writer or follower).
    pub fn recover(&self, log: &dyn StatusChangesLog) -> Result<()> {
        let snapshot = log.load_latest_snapshot()?;
        self.restore_from(log, snapshot)
    }
}

impl EditConsumer for BrokerStatus {
    fn consume(&self, seq: LogSequenceNumber, edit: &StatusEdit) {
        if let Err(e) = self.apply(seq, edit) {
            // `apply` only returns an error for a genuine invariant
            // violation or an edit already folded in; the latter is handled
            // above via the `seq <= last_applied` guard, so reaching here
            // means replicated state has diverged, which is fatal: this
            // replica must not continue serving.
            panic!("fatal: invariant violation while applying {seq:?} ({}): {e}", edit.kind());
        }
    }
}

/// Helper so call sites that already hold an `Arc<BrokerStatus>` can pass it
/// directly wherever an `EditConsumer` is expected.
impl EditConsumer for Arc<BrokerStatus> {
    fn consume(&self, seq: LogSequenceNumber, edit: &StatusEdit) {
        (**self).consume(seq, edit)
    }
}
