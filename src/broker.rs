//! `Broker`: the public façade wiring `BrokerStatus`, `TasksHeap`, and a
//! `StatusChangesLog` together.
//!
//! Grounded on `container::manager::Manager`: a long-lived object holding
//! `Arc`s to its collaborators, exposing a handful of request-style methods
//! (`reconcile_job` there; `submit_task`/`request_tasks`/`task_finished`
//! here) that each perform one "append, then react" cycle. `Manager` also
//! supplies the precedent for reacting to membership changes (nodes
//! joining/leaving) the way `Broker` reacts to leadership transitions here.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use crate::checkpoint::CheckpointScheduler;
use crate::config::BrokerConfig;
use crate::edit::StatusEdit;
use crate::errors::{BrokerError, Result};
use crate::group_mapper::GroupMapperFunction;
use crate::heap::TasksHeap;
use crate::log::{LeadershipListener, StatusChangesLog};
use crate::model::{Task, TaskId, WorkerStatus};
use crate::purge::PurgeScheduler;
use crate::status::BrokerStatus;

struct Clock(AtomicI64);

impl Clock {
    fn new() -> Self {
        Self(AtomicI64::new(0))
    }

    /// Monotonic logical timestamp, advanced once per call. Stamped into
    /// edits by the broker (the writer) before append, never read inside
    /// `apply` — keeps replay deterministic across replicas.
    fn tick(&self) -> i64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

/// Tracks whether this replica currently believes it is the active writer.
/// Read by request-handling methods to reject client calls made against a
/// non-leader replica with `BrokerError::NotWritable`.
struct ActiveFlag(RwLock<bool>);

impl ActiveFlag {
    fn new() -> Self {
        Self(RwLock::new(false))
    }

    fn get(&self) -> bool {
        *self.0.read().unwrap()
    }

    fn set(&self, value: bool) {
        *self.0.write().unwrap() = value;
    }
}

/// The broker: the crate's single public entry point.
pub struct Broker {
    status: Arc<BrokerStatus>,
    heap: Arc<TasksHeap>,
    log: Arc<dyn StatusChangesLog>,
    config: BrokerConfig,
    clock: Clock,
    active: Arc<ActiveFlag>,
    purge_scheduler: RwLock<Option<PurgeScheduler>>,
    checkpoint_scheduler: RwLock<Option<CheckpointScheduler>>,
}

impl Broker {
    /// Builds a broker around an already-constructed log and group mapper.
    /// Does not acquire leadership by itself; callers drive that via
    /// `log.request_leadership()` and the `LeadershipListener` callbacks
    /// this type implements (`leadership_listener()`).
    pub fn new(
        log: Arc<dyn StatusChangesLog>,
        mapper: Box<dyn GroupMapperFunction>,
        config: BrokerConfig,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let heap = Arc::new(TasksHeap::new(config.tasksheap_size, mapper));
        heap.set_max_fragmentation(config.tasksheap_max_fragmentation);

        let broker = Arc::new(Self {
            status: Arc::new(BrokerStatus::new()),
            heap,
            log,
            config,
            clock: Clock::new(),
            active: Arc::new(ActiveFlag::new()),
            purge_scheduler: RwLock::new(None),
            checkpoint_scheduler: RwLock::new(None),
        });

        Ok(broker)
    }

    /// Returns a `LeadershipListener` implementation to register with this
    /// broker's log (e.g. via the concrete `CoordinationService` used to
    /// build a `ReplicatedLog`). Kept separate from `Broker` itself so the
    /// log never needs an `Arc<Broker>` strong reference back to its owner.
    pub fn leadership_listener(self: &Arc<Self>) -> Arc<dyn LeadershipListener> {
        Arc::new(BrokerLeadershipListener { broker: Arc::downgrade(self) })
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    fn require_active(&self) -> Result<()> {
        if self.active.get() {
            Ok(())
        } else {
            Err(BrokerError::NotWritable)
        }
    }

    fn activate(self: &Arc<Self>) {
        self.active.set(true);

        // Rehydrate the dispatch heap: a snapshot/log replay only restores
        // `BrokerStatus`, so every still-Waiting task must be reinserted.
        for task in self.status.get_all_tasks() {
            if task.status == crate::model::TaskStatus::Waiting {
                if let Err(e) = self.heap.insert(task.task_id, task.task_type, &task.user_id) {
                    warn!(task_id = task.task_id, error = %e, "failed to rehydrate waiting task into heap");
                }
            }
        }

        let mut purge_scheduler = self.purge_scheduler.write().unwrap();
        *purge_scheduler = Some(PurgeScheduler::spawn(
            self.status.clone(),
            self.log.clone(),
            self.config.finished_tasks_purge_scheduler_period,
            self.config.finished_tasks_retention,
            self.config.max_expired_tasks_per_cycle,
        ));

        let mut checkpoint_scheduler = self.checkpoint_scheduler.write().unwrap();
        *checkpoint_scheduler = Some(CheckpointScheduler::spawn(
            self.status.clone(),
            self.log.clone(),
            self.config.checkpoint_period,
        ));

        info!("broker activated (leader)");
    }

    fn deactivate(&self) {
        self.active.set(false);
        *self.purge_scheduler.write().unwrap() = None;
        *self.checkpoint_scheduler.write().unwrap() = None;
        info!("broker deactivated (follower)");
    }

    /// Submits a new task, returning its allocated id. Fails with
    /// `BrokerError::HeapFull` if the dispatch buffer has no room.
    /// Capacity is admitted *before* the `AddTask` edit is appended, so a
    /// full heap rejects the submission without ever durably recording a
    /// task that the heap then refuses to hold.
    pub fn submit_task(&self, task_type: i32, user_id: &str, parameter: Vec<u8>) -> Result<TaskId> {
        self.require_active()?;

        if self.heap.len() >= self.heap.capacity() {
            return Err(BrokerError::HeapFull);
        }

        let task_id = self.status.next_task_id();
        let created_timestamp = self.clock.tick();

        self.status.apply_modification(
            self.log.as_ref(),
            StatusEdit::AddTask {
                task_id,
                task_type,
                user_id: user_id.to_string(),
                parameter,
                created_timestamp,
            },
        )?;

        // The capacity check above admits the submission before the edit is
        // appended, so this insert is not expected to fail. It can still
        // lose a race to a concurrent `submit_task` that passed the same
        // check first; in that case task_id is already durably Waiting in
        // `BrokerStatus`, so silently dropping it here would leave the heap
        // invariant violated rather than just this one call failing.
        if let Err(e) = self.heap.insert(task_id, task_type, user_id) {
            panic!("fatal: heap admitted capacity for task {task_id} but insert failed ({e}); heap/status have diverged");
        }
        Ok(task_id)
    }

    /// Records a worker coming online.
    pub fn worker_connected(&self, worker_id: &str, worker_location: &str, worker_process_id: i64) -> Result<()> {
        self.require_active()?;
        let timestamp = self.clock.tick();
        self.status.apply_modification(
            self.log.as_ref(),
            StatusEdit::WorkerConnected {
                worker_id: worker_id.to_string(),
                worker_location: worker_location.to_string(),
                worker_process_id,
                timestamp,
            },
        )?;
        Ok(())
    }

    /// Records a worker going offline. `dead` marks the disconnect as
    /// terminal (see `StatusEdit::WorkerDisconnected`).
    pub fn worker_disconnected(&self, worker_id: &str, dead: bool) -> Result<()> {
        self.require_active()?;
        let timestamp = self.clock.tick();
        self.status.apply_modification(
            self.log.as_ref(),
            StatusEdit::WorkerDisconnected {
                worker_id: worker_id.to_string(),
                timestamp,
                dead,
            },
        )?;
        Ok(())
    }

    /// Dispatches up to `max` waiting tasks whose group is in `groups` (or
    /// `groups` contains `GROUP_ANY`) and whose type has remaining room in
    /// `available_space`, assigning each claimed task to `worker_id` via a
    /// replicated `AssignTaskToWorker` edit. Returns the claimed tasks.
    ///
    /// If an `AssignTaskToWorker` append fails partway through a batch, the
    /// tasks already claimed from the heap but not yet assigned are put
    /// back so they are not silently lost.
    pub fn request_tasks(
        &self,
        worker_id: &str,
        max: usize,
        groups: &HashSet<i32>,
        available_space: &mut HashMap<i32, usize>,
    ) -> Result<Vec<Task>> {
        self.require_active()?;

        let claimed_ids = self.heap.take(max, groups, available_space);
        let mut assigned = Vec::with_capacity(claimed_ids.len());

        for task_id in claimed_ids {
            match self.status.apply_modification(
                self.log.as_ref(),
                StatusEdit::AssignTaskToWorker {
                    task_id,
                    worker_id: worker_id.to_string(),
                },
            ) {
                Ok(_) => {
                    if let Some(task) = self.status.get_task(task_id) {
                        assigned.push(task);
                    }
                }
                Err(e) => {
                    warn!(task_id, error = %e, "assign failed after claim; returning task to heap");
                    if let Some(task) = self.status.get_task(task_id) {
                        let _ = self.heap.insert(task.task_id, task.task_type, &task.user_id);
                    }
                    return Err(e);
                }
            }
        }

        Ok(assigned)
    }

    /// Records a worker's result for `task_id`.
    pub fn task_finished(
        &self,
        task_id: TaskId,
        worker_id: &str,
        status: crate::model::TaskStatus,
        result: Option<Vec<u8>>,
    ) -> Result<()> {
        self.require_active()?;
        self.status.apply_modification(
            self.log.as_ref(),
            StatusEdit::TaskFinished {
                task_id,
                worker_id: worker_id.to_string(),
                status,
                result,
            },
        )?;
        Ok(())
    }

    pub fn get_task(&self, task_id: TaskId) -> Option<Task> {
        self.status.get_task(task_id)
    }

    pub fn get_all_workers(&self) -> Vec<WorkerStatus> {
        self.status.get_all_workers()
    }

    /// Forces an immediate checkpoint, independent of the configured
    /// periodic cadence. Intended for tests and graceful-shutdown paths.
    pub fn checkpoint_now(&self) -> Result<()> {
        let snapshot = self.status.snapshot();
        self.log.checkpoint(&snapshot)
    }
}

/// The concrete `LeadershipListener` handed to a `CoordinationService`.
/// Holds only a `Weak` back-reference so the log (which may itself be held
/// behind this listener, e.g. inside `ReplicatedLog`'s `CoordinationService`)
/// never keeps the broker alive past its last strong reference.
struct BrokerLeadershipListener {
    broker: std::sync::Weak<Broker>,
}

impl LeadershipListener for BrokerLeadershipListener {
    fn leadership_acquired(&self) {
        let Some(broker) = self.broker.upgrade() else { return };
        if let Err(e) = broker.log.start_writing() {
            warn!(error = %e, "start_writing failed after leadership_acquired");
            return;
        }
        if let Err(e) = broker.status.recover(broker.log.as_ref()) {
            warn!(error = %e, "recover failed after leadership_acquired");
            return;
        }
        broker.activate();
    }

    fn leadership_lost(&self) {
        let Some(broker) = self.broker.upgrade() else { return };
        broker.deactivate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group_mapper::ConstantGroupMapper;
    use crate::log::memory::MemoryLog;
    use crate::model::TaskStatus;

    fn build() -> Arc<Broker> {
        let log: Arc<dyn StatusChangesLog> = Arc::new(MemoryLog::new());
        let broker = Broker::new(log, Box::new(ConstantGroupMapper(0)), BrokerConfig::default()).unwrap();
        let listener = broker.leadership_listener();
        listener.leadership_acquired();
        broker
    }

    fn any_groups() -> HashSet<i32> {
        let mut s = HashSet::new();
        s.insert(crate::group_mapper::GROUP_ANY);
        s
    }

    #[test]
    fn submit_task_before_activation_is_rejected() {
        let log: Arc<dyn StatusChangesLog> = Arc::new(MemoryLog::new());
        let broker = Broker::new(log, Box::new(ConstantGroupMapper(0)), BrokerConfig::default()).unwrap();
        assert!(matches!(
            broker.submit_task(1, "u1", vec![]),
            Err(BrokerError::NotWritable)
        ));
    }

    #[test]
    fn submit_assign_finish_end_to_end() {
        let broker = build();
        let task_id = broker.submit_task(10, "u1", vec![1, 2, 3]).unwrap();

        let mut space = HashMap::new();
        space.insert(10, 1);
        let assigned = broker.request_tasks("w1", 5, &any_groups(), &mut space).unwrap();
        assert_eq!(assigned.len(), 1);
        assert_eq!(assigned[0].task_id, task_id);

        broker
            .task_finished(task_id, "w1", TaskStatus::Finished, Some(b"done".to_vec()))
            .unwrap();
        assert_eq!(broker.get_task(task_id).unwrap().status, TaskStatus::Finished);
    }

    #[test]
    fn task_ids_remain_monotone_across_recovery() {
        let log: Arc<dyn StatusChangesLog> = Arc::new(MemoryLog::new());
        let broker = Broker::new(log.clone(), Box::new(ConstantGroupMapper(0)), BrokerConfig::default()).unwrap();
        broker.leadership_listener().leadership_acquired();
        let id1 = broker.submit_task(1, "u", vec![]).unwrap();
        let id2 = broker.submit_task(1, "u", vec![]).unwrap();
        assert!(id2 > id1);

        // Simulate a restart: a fresh broker recovers from the same log.
        let broker2 = Broker::new(log, Box::new(ConstantGroupMapper(0)), BrokerConfig::default()).unwrap();
        broker2.leadership_listener().leadership_acquired();
        let id3 = broker2.submit_task(1, "u", vec![]).unwrap();
        assert!(id3 > id2);
    }

    #[test]
    fn worker_connect_and_disconnect_round_trip() {
        let broker = build();
        broker.worker_connected("w1", "10.0.0.1:9000", 42).unwrap();
        assert_eq!(broker.get_all_workers().len(), 1);
        broker.worker_disconnected("w1", false).unwrap();
        assert_eq!(
            broker.get_all_workers()[0].status,
            crate::model::WorkerConnState::Disconnected
        );
    }

    #[test]
    fn checkpoint_now_persists_current_state() {
        let broker = build();
        broker.submit_task(1, "u", vec![]).unwrap();
        broker.checkpoint_now().unwrap();
    }
}
