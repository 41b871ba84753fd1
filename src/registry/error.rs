use thiserror::Error;

use crate::domain::DomainError;
use crate::farm::FarmError;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("object type `{object_type}` not found")]
    TypeNotFound { object_type: String },
    #[error("module `{module}` not found")]
    ModuleNotFound { module: String },
    #[error("module `{module}` is already registered")]
    ModuleAlreadyRegistered { module: String },
    /// The module has no command of that name.
    #[error("module `{module}` has no command `{command}`")]
    CommandNotFound { module: String, command: String },
    #[error("command `{command}` of module `{module}` failed: {message}")]
    Command {
        module: String,
        command: String,
        message: String,
    },
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Farm(#[from] FarmError),
}

impl RegistryError {
    pub fn type_not_found(object_type: impl Into<String>) -> Self {
        Self::TypeNotFound {
            object_type: object_type.into(),
        }
    }

    pub fn module_not_found(module: impl Into<String>) -> Self {
        Self::ModuleNotFound {
            module: module.into(),
        }
    }

    pub fn command_not_found(module: impl Into<String>, command: impl Into<String>) -> Self {
        Self::CommandNotFound {
            module: module.into(),
            command: command.into(),
        }
    }

    /// Failure raised inside a command body; module and command are filled in
    /// by the registry.
    pub fn command(message: impl Into<String>) -> Self {
        Self::Command {
            module: String::new(),
            command: String::new(),
            message: message.into(),
        }
    }

    pub(crate) fn in_command(self, module: &str, command: &str) -> Self {
        match self {
            Self::Command { message, .. } => Self::Command {
                module: module.to_string(),
                command: command.to_string(),
                message,
            },
            other => other,
        }
    }
}
