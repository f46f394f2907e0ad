//! `StatusEdit`: the tagged record describing one atomic mutation of broker
//! state.
//!
//! Every field an `apply` needs is carried in the edit itself; nothing is
//! read from ambient state (clock, RNG, environment) during `apply`. This is
//! the fix to the source's flagged non-determinism where `ADD_TASK`
//! timestamps were read from the wall clock inside `apply`.

use serde::{Deserialize, Serialize};

use crate::model::{TaskId, TaskStatus, WorkerId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusEdit {
    AddTask {
        task_id: TaskId,
        task_type: i32,
        user_id: String,
        parameter: Vec<u8>,
        created_timestamp: i64,
    },
    AssignTaskToWorker {
        task_id: TaskId,
        worker_id: WorkerId,
    },
    TaskFinished {
        task_id: TaskId,
        worker_id: WorkerId,
        status: TaskStatus,
        result: Option<Vec<u8>>,
    },
    WorkerConnected {
        worker_id: WorkerId,
        worker_location: String,
        worker_process_id: i64,
        timestamp: i64,
    },
    WorkerDisconnected {
        worker_id: WorkerId,
        timestamp: i64,
        /// Set by the caller when the disconnect should be treated as a
        /// terminal death (e.g. after a reconnection timeout) rather than a
        /// transient disconnect.
        dead: bool,
    },
    /// Deterministically removes terminal tasks from `BrokerStatus`. Emitted
    /// by the purge scheduler rather than being derived independently by
    /// each replica from its own clock.
    PurgeTasks {
        task_ids: Vec<TaskId>,
        as_of_seq: i64,
    },
}

impl StatusEdit {
    /// A short tag used for logging/metrics without formatting the whole
    /// payload (field values may contain opaque, potentially large, user
    /// data in `parameter`/`result`).
    pub fn kind(&self) -> &'static str {
        match self {
            StatusEdit::AddTask { .. } => "AddTask",
            StatusEdit::AssignTaskToWorker { .. } => "AssignTaskToWorker",
            StatusEdit::TaskFinished { .. } => "TaskFinished",
            StatusEdit::WorkerConnected { .. } => "WorkerConnected",
            StatusEdit::WorkerDisconnected { .. } => "WorkerDisconnected",
            StatusEdit::PurgeTasks { .. } => "PurgeTasks",
        }
    }
}
