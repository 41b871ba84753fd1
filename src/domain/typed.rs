//! Hand-written typed views over info objects.

use std::sync::Arc;

use super::descriptor::TypeDescriptor;
use super::error::DomainError;
use super::object::InfoObject;

/// A strongly typed entity backed by an [`InfoObject`].
///
/// Implementations map their fields to columns explicitly, so no code reads
/// fields by reflection.
pub trait TypedInfo: Sized + Send + Sync {
    fn from_object(object: &InfoObject) -> Result<Self, DomainError>;

    fn to_object(&self, descriptor: &Arc<TypeDescriptor>) -> Result<InfoObject, DomainError>;
}
