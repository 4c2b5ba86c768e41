//! Error types for the engine's boundaries.

use thiserror::Error;

/// Errors surfaced by a fetch collaborator.
///
/// The scheduler never propagates these to dependents: a failed fetch
/// completes its variable with the previous value so downstream variables
/// proceed instead of stalling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The query itself failed.
    #[error("query failed: {0}")]
    Query(String),

    /// The collaborator went away before delivering a result.
    #[error("fetch collaborator disconnected before completing")]
    Disconnected,
}

impl FetchError {
    /// Query failure with a message.
    pub fn query(message: impl Into<String>) -> Self {
        FetchError::Query(message.into())
    }
}

/// Errors from constructing or addressing a variable set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SetError {
    /// Two variables share a name.
    #[error("duplicate variable name: '{0}'")]
    DuplicateName(String),

    /// The addressed variable is not part of the set.
    #[error("unknown variable: '{0}'")]
    UnknownVariable(String),
}
