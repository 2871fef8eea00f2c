//! Error types for calls made against the cluster.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for stats fetches and update commands.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors returned by a stats fetch or an update command.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("deployment not found: {0}")]
    NotFound(String),
}
