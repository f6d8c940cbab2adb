//! Error types shared across the detection and response core.

use thiserror::Error;

/// Errors surfaced by the core's fallible operations.
///
/// Capacity, effector-failure, and baseline-absent conditions are *not*
/// represented here — per the engine's propagation policy they are
/// recovered locally into typed result values (`ActionResult`,
/// `AnomalyCheck`) rather than surfaced as `Err`. This enum only carries
/// conditions that abort the operation that raised them.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("store operation failed: {0}")]
    Store(String),

    #[error("concurrency violation: {0}")]
    Concurrency(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
