//! Background checkpoint scheduler: periodically snapshots `BrokerStatus`
//! and hands the snapshot to the log for durable persistence.
//!
//! Same shape as [`crate::purge::PurgeScheduler`]: a `std::thread` woken on a
//! fixed period, gated on leadership, torn down via a shared running flag
//! rather than killed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::log::StatusChangesLog;
use crate::status::BrokerStatus;

/// Periodically snapshots `status` and hands it to `log.checkpoint`, so the
/// journal never grows without bound between leadership changes.
pub struct CheckpointScheduler {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CheckpointScheduler {
    pub fn spawn(status: Arc<BrokerStatus>, log: Arc<dyn StatusChangesLog>, period: Duration) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let running_loop = running.clone();

        let handle = std::thread::Builder::new()
            .name("broker-checkpoint-scheduler".into())
            .spawn(move || {
                while running_loop.load(Ordering::SeqCst) {
                    std::thread::sleep(period);
                    if !running_loop.load(Ordering::SeqCst) {
                        break;
                    }
                    if !log.is_leader() {
                        debug!("checkpoint scheduler skipping cycle: not leader");
                        continue;
                    }
                    let snapshot = status.snapshot();
                    match log.checkpoint(&snapshot) {
                        Ok(()) => info!(seq = ?snapshot.seq.0, "periodic checkpoint committed"),
                        Err(e) => warn!(error = %e, "periodic checkpoint failed"),
                    }
                }
            })
            .expect("failed to spawn broker-checkpoint-scheduler thread");

        Self {
            running,
            handle: Some(handle),
        }
    }
}

impl Drop for CheckpointScheduler {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edit::StatusEdit;
    use crate::log::memory::MemoryLog;

    #[test]
    fn spawn_and_drop_does_not_panic_with_no_leadership() {
        let log: Arc<dyn StatusChangesLog> = Arc::new(MemoryLog::new());
        let status = Arc::new(BrokerStatus::new());
        let scheduler = CheckpointScheduler::spawn(status, log, Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(20));
        drop(scheduler);
    }

    #[test]
    fn checkpoints_while_leader() {
        let log = Arc::new(MemoryLog::new());
        log.start_writing().unwrap();
        let status = Arc::new(BrokerStatus::new());
        status
            .apply_modification(
                log.as_ref(),
                StatusEdit::AddTask {
                    task_id: 1,
                    task_type: 1,
                    user_id: "u".into(),
                    parameter: vec![],
                    created_timestamp: 0,
                },
            )
            .unwrap();

        let log_dyn: Arc<dyn StatusChangesLog> = log.clone();
        let scheduler = CheckpointScheduler::spawn(status, log_dyn, Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(50));
        drop(scheduler);

        assert_ne!(log.load_latest_snapshot().unwrap().seq.0, crate::lsn::NO_SNAPSHOT);
    }
}
