//! Autoscaler error types.

use thiserror::Error;

/// Errors surfaced to callers of the scaler service.
#[derive(Debug, Error)]
pub enum ScalerError {
    /// The periodic trigger could not be scheduled.
    #[error("failed to schedule scaler: {0}")]
    Scheduling(String),

    #[error("invalid scaler config: {0}")]
    Config(String),
}

pub type ScalerResult<T> = Result<T, ScalerError>;

/// Errors returned by an [`AllocationDecider`](crate::AllocationDecider).
///
/// A decision error only affects the deployment it was raised for.
#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("invalid decision input: {0}")]
    InvalidInput(String),

    #[error("decider failed: {0}")]
    Internal(String),
}
