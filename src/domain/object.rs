//! Info objects: identity-bearing records of one entity type.

use std::sync::Arc;

use uuid::Uuid;

use super::descriptor::TypeDescriptor;
use super::error::DomainError;
use super::types::{DataRow, FieldValue, ObjectType};

/// Separator of multi-valued full names.
pub const FULL_NAME_LIST_SEPARATOR: char = ';';

/// A record of arbitrary named fields plus a back-reference to its type.
///
/// Cached and prototype instances are frozen; callers obtain a mutable
/// working copy through [`InfoObject::to_mutable`].
#[derive(Debug, Clone)]
pub struct InfoObject {
    descriptor: Arc<TypeDescriptor>,
    fields: DataRow,
    frozen: bool,
}

impl InfoObject {
    /// A fresh, mutable instance with no field values.
    pub fn empty(descriptor: Arc<TypeDescriptor>) -> Self {
        Self {
            descriptor,
            fields: DataRow::new(),
            frozen: false,
        }
    }

    pub fn from_row(descriptor: Arc<TypeDescriptor>, row: DataRow) -> Self {
        Self {
            descriptor,
            fields: row,
            frozen: false,
        }
    }

    pub fn descriptor(&self) -> &Arc<TypeDescriptor> {
        &self.descriptor
    }

    pub fn object_type(&self) -> &ObjectType {
        self.descriptor.object_type()
    }

    pub fn fields(&self) -> &DataRow {
        &self.fields
    }

    pub fn into_row(self) -> DataRow {
        self.fields
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Mark the instance read-only.
    pub fn freeze(mut self) -> Self {
        self.frozen = true;
        self
    }

    /// Mutable copy of this instance.
    pub fn to_mutable(&self) -> Self {
        Self {
            descriptor: Arc::clone(&self.descriptor),
            fields: self.fields.clone(),
            frozen: false,
        }
    }

    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.fields.get(column).filter(|value| !value.is_null())
    }

    pub fn set(
        &mut self,
        column: impl Into<String>,
        value: impl Into<FieldValue>,
    ) -> Result<(), DomainError> {
        if self.frozen {
            return Err(DomainError::read_only(self.object_type().as_str()));
        }
        self.fields.insert(column.into(), value.into());
        Ok(())
    }

    /// Chained setter for building working copies.
    pub fn with(
        mut self,
        column: impl Into<String>,
        value: impl Into<FieldValue>,
    ) -> Result<Self, DomainError> {
        self.set(column, value)?;
        Ok(self)
    }

    /// Overwrite fields with the values of `row`.
    pub fn merge_row(&mut self, row: DataRow) -> Result<(), DomainError> {
        if self.frozen {
            return Err(DomainError::read_only(self.object_type().as_str()));
        }
        self.fields.extend(row);
        Ok(())
    }

    pub fn get_i64(&self, column: &str) -> Result<i64, DomainError> {
        let value = self
            .get(column)
            .ok_or_else(|| DomainError::missing_field(self.object_type().as_str(), column))?;
        value.as_i64().ok_or_else(|| {
            DomainError::field_type(self.object_type().as_str(), column, "an integer")
        })
    }

    pub fn get_str(&self, column: &str) -> Result<&str, DomainError> {
        let value = self
            .get(column)
            .ok_or_else(|| DomainError::missing_field(self.object_type().as_str(), column))?;
        value
            .as_str()
            .ok_or_else(|| DomainError::field_type(self.object_type().as_str(), column, "text"))
    }

    pub fn get_bool(&self, column: &str) -> Result<bool, DomainError> {
        let value = self
            .get(column)
            .ok_or_else(|| DomainError::missing_field(self.object_type().as_str(), column))?;
        value
            .as_bool()
            .ok_or_else(|| DomainError::field_type(self.object_type().as_str(), column, "a bool"))
    }

    /// Primary key value, if the type has an ID column and it is assigned.
    pub fn id(&self) -> Option<i64> {
        let column = self.descriptor.id_column()?;
        self.get(column).and_then(FieldValue::as_i64)
    }

    pub fn code_name(&self) -> Option<&str> {
        let column = self.descriptor.name_column()?;
        self.get(column).and_then(FieldValue::as_str)
    }

    pub fn guid(&self) -> Option<Uuid> {
        let column = self.descriptor.guid_column()?;
        self.get(column).and_then(FieldValue::as_guid)
    }

    pub fn site_id(&self) -> Option<i64> {
        let column = self.descriptor.site_id_column()?;
        self.get(column).and_then(FieldValue::as_i64)
    }

    /// Raw value of the persisted full-name column.
    pub fn full_name_value(&self) -> Option<&str> {
        let column = self.descriptor.full_name_column()?;
        self.get(column).and_then(FieldValue::as_str)
    }
}

impl PartialEq for InfoObject {
    fn eq(&self, other: &Self) -> bool {
        self.object_type() == other.object_type() && self.fields == other.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::descriptor::FullNameResolution;

    fn descriptor() -> Arc<TypeDescriptor> {
        TypeDescriptor::builder(ObjectType::new("ecommerce.manufacturer").expect("type"))
            .id_column("ManufacturerID")
            .name_column("ManufacturerName")
            .full_name_column("ManufacturerFullName")
            .full_name_resolution(FullNameResolution::PersistedFirst)
            .site_id_column("ManufacturerSiteID")
            .guid_column("ManufacturerGUID")
            .build()
            .expect("descriptor")
    }

    #[test]
    fn accessors_follow_descriptor_columns() {
        let guid = Uuid::new_v4();
        let object = InfoObject::empty(descriptor())
            .with("ManufacturerID", 7_i64)
            .and_then(|o| o.with("ManufacturerName", "Acme"))
            .and_then(|o| o.with("ManufacturerFullName", "site1.Acme"))
            .and_then(|o| o.with("ManufacturerSiteID", 1_i64))
            .and_then(|o| o.with("ManufacturerGUID", guid))
            .expect("build object");

        assert_eq!(object.id(), Some(7));
        assert_eq!(object.code_name(), Some("Acme"));
        assert_eq!(object.full_name_value(), Some("site1.Acme"));
        assert_eq!(object.site_id(), Some(1));
        assert_eq!(object.guid(), Some(guid));
    }

    #[test]
    fn frozen_objects_reject_mutation() {
        let mut frozen = InfoObject::empty(descriptor()).freeze();
        let err = frozen.set("ManufacturerName", "Acme").expect_err("read-only");
        assert!(matches!(err, DomainError::ReadOnly { .. }));

        let mut working = frozen.to_mutable();
        working.set("ManufacturerName", "Acme").expect("mutable copy");
        assert!(!working.is_frozen());
    }

    #[test]
    fn null_fields_read_as_missing() {
        let object = InfoObject::empty(descriptor())
            .with("ManufacturerID", FieldValue::Null)
            .expect("set null");
        assert_eq!(object.id(), None);
        assert!(matches!(
            object.get_i64("ManufacturerID"),
            Err(DomainError::MissingField { .. })
        ));
    }

    #[test]
    fn typed_getter_reports_mismatch() {
        let object = InfoObject::empty(descriptor())
            .with("ManufacturerName", true)
            .expect("set");
        assert!(matches!(
            object.get_str("ManufacturerName"),
            Err(DomainError::FieldType { .. })
        ));
    }
}
