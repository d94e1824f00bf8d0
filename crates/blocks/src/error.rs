//! Block-level and registry error types.

use std::time::Duration;

use thiserror::Error;

/// Errors raised inside a block's logic.
///
/// These never escape [`Block::execute`](crate::Block::execute): the
/// dispatch layer turns them into a `failed` [`NodeResult`](crate::NodeResult).
/// The variant decides retry behaviour:
/// - `Retryable` / `Timeout` — retried with exponential back-off.
/// - `InvalidConfig` / `Fatal` — the node fails immediately.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BlockError {
    /// Missing or malformed configuration, detected at block entry.
    #[error("invalid block config: {0}")]
    InvalidConfig(String),

    /// Transient failure (network, rate limit); worth another attempt.
    #[error("retryable block error: {0}")]
    Retryable(String),

    /// Permanent failure; no retry should be attempted.
    #[error("fatal block error: {0}")]
    Fatal(String),

    /// The operation did not finish within its deadline.
    #[error("block timed out after {0:?}")]
    Timeout(Duration),
}

impl BlockError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, BlockError::Retryable(_) | BlockError::Timeout(_))
    }
}

impl From<serde_json::Error> for BlockError {
    fn from(err: serde_json::Error) -> Self {
        BlockError::InvalidConfig(err.to_string())
    }
}

impl From<reqwest::Error> for BlockError {
    fn from(err: reqwest::Error) -> Self {
        let transient = err.is_timeout()
            || err.is_connect()
            || err
                .status()
                .is_some_and(|s| s.is_server_error() || s.as_u16() == 429);
        if transient {
            BlockError::Retryable(err.to_string())
        } else {
            BlockError::Fatal(err.to_string())
        }
    }
}

/// Errors from [`BlockRegistry`](crate::BlockRegistry) operations.
///
/// Always fatal and never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// `register` was called twice with the same type key.
    #[error("block type '{0}' is already registered")]
    DuplicateType(String),

    /// `create` or a metadata lookup named a type nobody registered.
    #[error("unknown block type '{0}'")]
    UnknownType(String),
}
