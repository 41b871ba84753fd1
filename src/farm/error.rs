use std::io;

use thiserror::Error;

use super::task::{Arity, TaskKind};

#[derive(Debug, Error)]
pub enum FarmError {
    /// The positional payload does not have the arity the task kind expects.
    #[error("malformed `{kind}` task payload: expected {expected} data items, got {actual}")]
    MalformedPayload {
        kind: TaskKind,
        expected: Arity,
        actual: usize,
    },
    #[error("invalid `{kind}` task payload: {reason}")]
    InvalidPayload { kind: TaskKind, reason: String },
    #[error("no handler registered for `{kind}` tasks")]
    HandlerNotRegistered { kind: TaskKind },
    #[error("a handler for `{kind}` tasks is already registered")]
    AlreadyRegistered { kind: TaskKind },
    #[error("`{kind}` task for `{target}` failed: {message}")]
    Execute {
        kind: TaskKind,
        target: String,
        message: String,
    },
    #[error("farm transport failed: {message}")]
    Transport { message: String },
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl FarmError {
    pub fn malformed(kind: TaskKind, expected: Arity, actual: usize) -> Self {
        Self::MalformedPayload {
            kind,
            expected,
            actual,
        }
    }

    pub fn invalid_payload(kind: TaskKind, reason: impl Into<String>) -> Self {
        Self::InvalidPayload {
            kind,
            reason: reason.into(),
        }
    }

    pub fn execute(kind: TaskKind, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execute {
            kind,
            target: target.into(),
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Payload problems are permanent: the task is dropped, never retried.
    pub fn is_payload_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedPayload { .. } | Self::InvalidPayload { .. }
        )
    }
}
