use std::sync::Arc;

use thiserror::Error;

use crate::domain::{DomainError, InfoObject};
use crate::events::EventError;
use crate::farm::FarmError;

/// Failure surfaced by the storage collaborator. Propagated unchanged.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage query for `{object_type}` failed: {message}")]
    Query {
        object_type: String,
        message: String,
    },
    #[error("storage write for `{object_type}` failed: {message}")]
    Write {
        object_type: String,
        message: String,
    },
    #[error("storage has no `{object_type}` record `{key}`")]
    Missing { object_type: String, key: String },
    #[error("storage call for `{object_type}` timed out")]
    Timeout { object_type: String },
}

impl StoreError {
    pub fn query(object_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Query {
            object_type: object_type.into(),
            message: message.into(),
        }
    }

    pub fn write(object_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Write {
            object_type: object_type.into(),
            message: message.into(),
        }
    }

    pub fn missing(object_type: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Missing {
            object_type: object_type.into(),
            key: key.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{object_type} `{key}` not found")]
    NotFound { object_type: String, key: String },
    #[error("`{object_type}` has no {lookup} index")]
    Unsupported {
        object_type: String,
        lookup: &'static str,
    },
    #[error("`{actual}` object passed to the `{expected}` provider")]
    TypeMismatch { expected: String, actual: String },
    #[error("provider for `{object_type}` is already registered")]
    AlreadyRegistered { object_type: String },
    /// The write reached the store and the cache, then an `After`
    /// subscriber failed. `object` is the stored entity for single-object
    /// writes.
    #[error("`{object_type}` write was committed but its completion failed: {source}")]
    Committed {
        object_type: String,
        object: Option<Arc<InfoObject>>,
        #[source]
        source: EventError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Event(#[from] EventError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Farm(#[from] FarmError),
}

impl ProviderError {
    pub fn not_found(object_type: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            object_type: object_type.into(),
            key: key.into(),
        }
    }

    pub fn unsupported(object_type: impl Into<String>, lookup: &'static str) -> Self {
        Self::Unsupported {
            object_type: object_type.into(),
            lookup,
        }
    }

    /// The entity a failed-but-committed write stored.
    pub fn committed_object(&self) -> Option<&Arc<InfoObject>> {
        match self {
            Self::Committed { object, .. } => object.as_ref(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
