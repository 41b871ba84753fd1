//! Domain layer types and invariants.

pub mod condition;
pub mod descriptor;
pub mod error;
pub mod object;
pub mod typed;
pub mod types;

pub use condition::{Clause, WhereCondition};
pub use descriptor::{FullNameResolution, TypeDescriptor, TypeDescriptorBuilder};
pub use error::DomainError;
pub use object::{FULL_NAME_LIST_SEPARATOR, InfoObject};
pub use typed::TypedInfo;
pub use types::{DataRow, FieldValue, ObjectType};
