//! In-memory shapes for tasks and workers.
//!
//! Field names mirror the proto-style getters in the source's
//! `container::proto::{task,meta}` (`TaskMetadata`, `WorkerMetadata`), but as
//! plain serde structs: there is no wire protocol in scope here, only the
//! in-memory/snapshot representation.

use serde::{Deserialize, Serialize};

pub type TaskId = u64;
pub type WorkerId = String;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Waiting,
    Running,
    Finished,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Finished | TaskStatus::Error)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub task_type: i32,
    pub parameter: Vec<u8>,
    pub user_id: String,
    pub created_timestamp: i64,
    pub status: TaskStatus,
    pub worker_id: Option<WorkerId>,
    pub result: Option<Vec<u8>>,
    /// Sequence number at which this task most recently transitioned to a
    /// terminal status. `None` while the task is not yet terminal. Used by
    /// the purge scheduler to compute retention windows deterministically
    /// instead of stamping a wall-clock time.
    pub terminal_since_seq: Option<i64>,
}

impl Task {
    pub fn new(task_id: TaskId, task_type: i32, user_id: String, parameter: Vec<u8>, created_timestamp: i64) -> Self {
        Self {
            task_id,
            task_type,
            parameter,
            user_id,
            created_timestamp,
            status: TaskStatus::Waiting,
            worker_id: None,
            result: None,
            terminal_since_seq: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerConnState {
    Connected,
    Disconnected,
    Dead,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub worker_id: WorkerId,
    pub worker_location: String,
    pub process_id: i64,
    pub last_connection_ts: i64,
    pub status: WorkerConnState,
}
