//! A replicated task-dispatch broker.
//!
//! Three layers, each independently testable:
//!
//! - [`log`]: the append-only `StatusChangesLog` journal abstraction, with a
//!   single-node [`log::MemoryLog`] and a [`log::ReplicatedLog`] backed by an
//!   external shared-log and coordination service.
//! - [`status`]: [`status::BrokerStatus`], the in-memory state machine that
//!   folds log entries into a task/worker view.
//! - [`heap`]: [`heap::TasksHeap`], the bounded, group-aware buffer of
//!   currently-dispatchable tasks.
//!
//! [`broker::Broker`] wires the three together behind a small request API
//! (`submit_task`, `request_tasks`, `task_finished`, ...).

pub mod broker;
pub mod checkpoint;
pub mod config;
pub mod edit;
pub mod errors;
pub mod group_mapper;
pub mod heap;
pub mod log;
pub mod lsn;
pub mod model;
pub mod purge;
pub mod snapshot;
pub mod status;

pub use broker::Broker;
pub use config::BrokerConfig;
pub use edit::StatusEdit;
pub use errors::{BrokerError, Result};
pub use group_mapper::{GroupMapperFunction, GROUP_ANY};
pub use heap::TasksHeap;
pub use log::{CoordinationService, LeadershipListener, MemoryLog, ReplicatedLog, SharedLogClient, StatusChangesLog};
pub use lsn::LogSequenceNumber;
pub use model::{Task, TaskId, TaskStatus, WorkerId, WorkerStatus};
pub use snapshot::BrokerStatusSnapshot;
pub use status::BrokerStatus;
