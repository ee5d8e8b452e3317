//! Error types for conversation orchestration.
//!
//! This module defines the central `Error` enum, which captures every failure
//! the orchestration layer can report upward. Transport crates map these onto
//! their own status codes; only [`Error::InvalidRequest`] is a client error,
//! everything else is an internal failure.
//!
//! ## Error Cases
//! - `Generation`: The model collaborator failed to produce a value.
//! - `TaskFailed`: A spawned sub-operation panicked or was aborted.
//! - `InvalidRequest`: The caller supplied unusable input.

use core::fmt;

pub type Result<T> = core::result::Result<T, Error>;

/// The sub-operation an error originated from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Title,
    Reply,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Title => f.write_str("title"),
            Self::Reply => f.write_str("reply"),
        }
    }
}

/// Unified error type for conversation orchestration.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The generation collaborator returned a failure.
    #[error("{stage} generation failed: {reason}")]
    Generation { stage: Stage, reason: String },

    /// The task running a sub-operation did not complete normally.
    #[error("{stage} task failed: {reason}")]
    TaskFailed { stage: Stage, reason: String },

    /// The request was malformed.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },
}

impl Error {
    /// Shorthand for a [`Error::Generation`] failure.
    pub fn generation(stage: Stage, reason: impl Into<String>) -> Self {
        Self::Generation {
            stage,
            reason: reason.into(),
        }
    }

    /// Returns `true` when the error was caused by the caller's input.
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidRequest { .. })
    }
}
