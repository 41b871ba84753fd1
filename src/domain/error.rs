use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid object type `{value}`: {reason}")]
    InvalidObjectType { value: String, reason: String },
    #[error("invalid type descriptor for `{object_type}`: {reason}")]
    InvalidDescriptor { object_type: String, reason: String },
    #[error("object of type `{object_type}` is read-only")]
    ReadOnly { object_type: String },
    #[error("field `{column}` of `{object_type}` is missing")]
    MissingField { object_type: String, column: String },
    #[error("field `{column}` of `{object_type}` is not {expected}")]
    FieldType {
        object_type: String,
        column: String,
        expected: &'static str,
    },
}

impl DomainError {
    pub fn invalid_object_type(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidObjectType {
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_descriptor(object_type: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDescriptor {
            object_type: object_type.into(),
            reason: reason.into(),
        }
    }

    pub fn read_only(object_type: impl Into<String>) -> Self {
        Self::ReadOnly {
            object_type: object_type.into(),
        }
    }

    pub fn missing_field(object_type: impl Into<String>, column: impl Into<String>) -> Self {
        Self::MissingField {
            object_type: object_type.into(),
            column: column.into(),
        }
    }

    pub fn field_type(
        object_type: impl Into<String>,
        column: impl Into<String>,
        expected: &'static str,
    ) -> Self {
        Self::FieldType {
            object_type: object_type.into(),
            column: column.into(),
            expected,
        }
    }
}
