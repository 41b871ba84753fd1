//! The web-farm task record as exchanged between nodes.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Kinds of cache-affecting operations replayed on peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    ClearHashtables,
    RemoveReadOnlyObject,
    ClearReadOnlyObjects,
    InvalidateTypeInfo,
    InvalidateObject,
    UpdateFile,
    DeleteFile,
    ProcessCommand,
}

impl TaskKind {
    pub const ALL: [TaskKind; 8] = [
        Self::ClearHashtables,
        Self::RemoveReadOnlyObject,
        Self::ClearReadOnlyObjects,
        Self::InvalidateTypeInfo,
        Self::InvalidateObject,
        Self::UpdateFile,
        Self::DeleteFile,
        Self::ProcessCommand,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClearHashtables => "ClearHashtables",
            Self::RemoveReadOnlyObject => "RemoveReadOnlyObject",
            Self::ClearReadOnlyObjects => "ClearReadOnlyObjects",
            Self::InvalidateTypeInfo => "InvalidateTypeInfo",
            Self::InvalidateObject => "InvalidateObject",
            Self::UpdateFile => "UpdateFile",
            Self::DeleteFile => "DeleteFile",
            Self::ProcessCommand => "ProcessCommand",
        }
    }

    /// Expected length of `data`.
    pub fn arity(&self) -> Arity {
        match self {
            Self::ClearHashtables
            | Self::RemoveReadOnlyObject
            | Self::ClearReadOnlyObjects
            | Self::InvalidateTypeInfo => Arity::Exact(0),
            Self::InvalidateObject => Arity::AtLeast(3),
            Self::UpdateFile => Arity::Exact(2),
            Self::DeleteFile => Arity::Exact(1),
            Self::ProcessCommand => Arity::AtLeast(1),
        }
    }

    /// Memory tasks never touch persisted storage.
    pub fn is_memory_task(&self) -> bool {
        !matches!(self, Self::UpdateFile | Self::DeleteFile)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(&self, len: usize) -> bool {
        match *self {
            Self::Exact(expected) => len == expected,
            Self::AtLeast(minimum) => len >= minimum,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(expected) => write!(f, "exactly {expected}"),
            Self::AtLeast(minimum) => write!(f, "at least {minimum}"),
        }
    }
}

/// An immutable, serializable description of one cache-affecting operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FarmTask {
    id: Uuid,
    #[serde(rename = "type")]
    kind: TaskKind,
    target: String,
    data: Vec<String>,
    #[serde(default, with = "binary_payload", skip_serializing_if = "Option::is_none")]
    binary_data: Option<Vec<u8>>,
    is_memory_task: bool,
    origin: String,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
}

impl FarmTask {
    pub fn new(
        kind: TaskKind,
        target: impl Into<String>,
        data: Vec<String>,
        binary_data: Option<Vec<u8>>,
        origin: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            target: target.into(),
            data,
            binary_data,
            is_memory_task: kind.is_memory_task(),
            origin: origin.into(),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn data(&self) -> &[String] {
        &self.data
    }

    pub fn binary_data(&self) -> Option<&[u8]> {
        self.binary_data.as_deref()
    }

    pub fn is_memory_task(&self) -> bool {
        self.is_memory_task
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    /// Identity of the operation regardless of task id; equal for two
    /// memory tasks that have the same effect.
    pub(crate) fn effect_key(&self) -> (TaskKind, String, &[String]) {
        (self.kind, self.target.to_lowercase(), &self.data)
    }
}

mod binary_payload {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|encoded| STANDARD.decode(encoded).map_err(D::Error::custom))
            .transpose()
    }
}
