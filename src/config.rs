//! `BrokerConfig`: user-facing configuration knobs recognized by the core
//! (tasks heap capacity, checkpoint cadence, finished-task retention).
//!
//! The source threads configuration through `sys::config`-style flag structs
//! parsed at process start and validated before anything else runs; this
//! follows the same shape (a plain struct with a `validate()` gate) rather
//! than reading ad hoc values out of a generic key-value map at each call
//! site.

use std::time::Duration;

use crate::errors::{BrokerError, Result};

/// Configuration accepted by `Broker::new`.
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    /// `broker.tasksheap.size`: fixed capacity of the in-memory dispatch
    /// buffer.
    pub tasksheap_size: usize,

    /// `checkpoint_time`: how long a writer waits between automatic
    /// snapshot/checkpoint cycles.
    pub checkpoint_period: Duration,

    /// `finished_tasks_retention`: how long a terminal task is kept before
    /// it becomes eligible for purging.
    pub finished_tasks_retention: Duration,

    /// `finished_tasks_purge_scheduler_period`: how often the purge
    /// scheduler wakes up to scan for eligible tasks.
    pub finished_tasks_purge_scheduler_period: Duration,

    /// `max_expired_tasks_per_cycle`: upper bound on how many tasks one
    /// purge cycle will remove, to keep a single `PurgeTasks` edit small.
    pub max_expired_tasks_per_cycle: usize,

    /// Fragmentation threshold forwarded to `TasksHeap::set_max_fragmentation`.
    pub tasksheap_max_fragmentation: f64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            tasksheap_size: 4096,
            checkpoint_period: Duration::from_secs(300),
            finished_tasks_retention: Duration::from_secs(3600),
            finished_tasks_purge_scheduler_period: Duration::from_secs(60),
            max_expired_tasks_per_cycle: 1000,
            tasksheap_max_fragmentation: 0.5,
        }
    }
}

impl BrokerConfig {
    /// Rejects configurations that could never be served correctly. Called
    /// once by `Broker::new` before any log or heap is constructed.
    pub fn validate(&self) -> Result<()> {
        if self.tasksheap_size == 0 {
            return Err(BrokerError::InvalidConfig("broker.tasksheap.size must be > 0".into()));
        }
        if self.max_expired_tasks_per_cycle == 0 {
            return Err(BrokerError::InvalidConfig(
                "max_expired_tasks_per_cycle must be > 0".into(),
            ));
        }
        if self.finished_tasks_purge_scheduler_period.is_zero() {
            return Err(BrokerError::InvalidConfig(
                "finished_tasks_purge_scheduler_period must be > 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.tasksheap_max_fragmentation) && self.tasksheap_max_fragmentation.is_finite() {
            return Err(BrokerError::InvalidConfig(
                "tasksheap_max_fragmentation must be within [0, 1] or infinite".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(BrokerConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_heap_size_is_rejected() {
        let mut cfg = BrokerConfig::default();
        cfg.tasksheap_size = 0;
        assert!(matches!(cfg.validate(), Err(BrokerError::InvalidConfig(_))));
    }

    #[test]
    fn zero_purge_period_is_rejected() {
        let mut cfg = BrokerConfig::default();
        cfg.finished_tasks_purge_scheduler_period = Duration::from_secs(0);
        assert!(matches!(cfg.validate(), Err(BrokerError::InvalidConfig(_))));
    }
}
