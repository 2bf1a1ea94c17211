use thiserror::Error;

/// Errors raised by the engine's core synchronization algorithm.
///
/// Usage errors (`SnapshotReused`, `InvalidStatement`) are returned to the
/// caller with state left unchanged. Cycle-internal errors abort the running
/// program and are surfaced to listeners via `EngineEvent::Halted`.
#[derive(Debug, Error, Clone)]
pub enum BpError {
    #[error("bthread '{bthread}' body failed: {source}")]
    BodyFailure { bthread: String, source: String },

    #[error("bthread '{bthread}' called bsync from inside a break-upon handler")]
    BreakUponMisuse { bthread: String },

    #[error("snapshot was already advanced once and cannot be reused")]
    SnapshotReused,

    #[error("bthread '{bthread}' published an invalid sync statement: {reason}")]
    InvalidStatement { bthread: String, reason: String },

    #[error("event-set host predicate failed: {reason}")]
    HostPredicateFailure { reason: String },

    #[error("cycle exceeded its configured timeout")]
    CycleTimeout,

    #[error("resource not found: {path}")]
    ResourceNotFound { path: String },
}
