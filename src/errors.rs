//! Error taxonomy for the broker core.
//!
//! The source (`common::errors`) exposes a single type-erased `failure::Error`
//! for everything. That is a poor fit here: callers of `apply_modification`
//! and `TasksHeap::insert` must be able to distinguish `LogUnavailable` from
//! `HeapFull` to decide whether to back off or retry, so this crate uses a
//! closed enum instead and keeps only the shape of the source's alias
//! (`pub type Result<T, E = Error>`).

use crate::lsn::LogSequenceNumber;

/// The error taxonomy of `broker`.
#[derive(thiserror::Error, Debug)]
pub enum BrokerError {
    /// A durable append, snapshot write, or replay failed. Surfaced to the
    /// caller; no state change has occurred.
    #[error("log unavailable: {0}")]
    LogUnavailable(String),

    /// `apply` found state inconsistent with an edit it was asked to apply.
    /// Fatal: the caller is expected to abort the process after observing
    /// this (see `BrokerStatus::apply`).
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// `TasksHeap::insert` found no empty slot.
    #[error("tasks heap is full (capacity exhausted)")]
    HeapFull,

    /// The coordination service session expired or was lost. The broker
    /// should treat this the same as `leadership_lost`.
    #[error("transient coordination error: {0}")]
    TransientCoordinationError(String),

    /// `BrokerConfig::validate()` rejected the configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Attempted a leader-only operation (e.g. `append`) while not the
    /// leader, or while the log has not yet called `start_writing()`.
    #[error("log is not currently writable")]
    NotWritable,

    /// Requested recovery/replay strictly after a sequence number the log
    /// never produced (defensive bound check, not expected in practice).
    #[error("requested replay past the tail of the log (skip_past={0:?})")]
    SkipPastTail(LogSequenceNumber),
}

pub type Result<T, E = BrokerError> = std::result::Result<T, E>;
