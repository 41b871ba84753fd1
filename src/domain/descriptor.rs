//! Immutable per-type metadata.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::error::DomainError;
use super::types::ObjectType;

/// Which source wins when both a persisted object and a derived (automatic)
/// object exist for the same full name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FullNameResolution {
    /// Ask the derived source first and fall back to the store.
    DerivedFirst,
    /// Ask the store first and fall back to the derived source.
    PersistedFirst,
}

/// Metadata describing one entity type.
///
/// Built once through [`TypeDescriptorBuilder`] and shared behind an `Arc`;
/// there is no way to mutate a descriptor after `build()`.
#[derive(Debug, PartialEq, Eq)]
pub struct TypeDescriptor {
    object_type: ObjectType,
    module: Option<String>,
    id_column: Option<String>,
    name_column: Option<String>,
    full_name_column: Option<String>,
    guid_column: Option<String>,
    last_modified_column: Option<String>,
    site_id_column: Option<String>,
    full_name_resolution: Option<FullNameResolution>,
    supports_caching: bool,
    log_events: bool,
    touch_cache_dependencies: bool,
}

impl TypeDescriptor {
    pub fn builder(object_type: ObjectType) -> TypeDescriptorBuilder {
        TypeDescriptorBuilder::new(object_type)
    }

    pub fn object_type(&self) -> &ObjectType {
        &self.object_type
    }

    pub fn module(&self) -> Option<&str> {
        self.module.as_deref()
    }

    pub fn id_column(&self) -> Option<&str> {
        self.id_column.as_deref()
    }

    pub fn name_column(&self) -> Option<&str> {
        self.name_column.as_deref()
    }

    pub fn full_name_column(&self) -> Option<&str> {
        self.full_name_column.as_deref()
    }

    pub fn guid_column(&self) -> Option<&str> {
        self.guid_column.as_deref()
    }

    pub fn last_modified_column(&self) -> Option<&str> {
        self.last_modified_column.as_deref()
    }

    pub fn site_id_column(&self) -> Option<&str> {
        self.site_id_column.as_deref()
    }

    pub fn full_name_resolution(&self) -> Option<FullNameResolution> {
        self.full_name_resolution
    }

    pub fn supports_caching(&self) -> bool {
        self.supports_caching
    }

    pub fn log_events(&self) -> bool {
        self.log_events
    }

    pub fn touch_cache_dependencies(&self) -> bool {
        self.touch_cache_dependencies
    }

    pub fn has_id_index(&self) -> bool {
        self.supports_caching && self.id_column.is_some()
    }

    pub fn has_name_index(&self) -> bool {
        self.supports_caching && self.name_column.is_some()
    }

    pub fn has_guid_index(&self) -> bool {
        self.supports_caching && self.guid_column.is_some()
    }

    pub fn has_full_name_index(&self) -> bool {
        self.supports_caching && self.full_name_resolution.is_some()
    }
}

/// Builder for [`TypeDescriptor`].
#[derive(Debug, Clone)]
pub struct TypeDescriptorBuilder {
    object_type: ObjectType,
    module: Option<String>,
    id_column: Option<String>,
    name_column: Option<String>,
    full_name_column: Option<String>,
    guid_column: Option<String>,
    last_modified_column: Option<String>,
    site_id_column: Option<String>,
    full_name_resolution: Option<FullNameResolution>,
    supports_caching: bool,
    log_events: bool,
    touch_cache_dependencies: bool,
}

impl TypeDescriptorBuilder {
    fn new(object_type: ObjectType) -> Self {
        Self {
            object_type,
            module: None,
            id_column: None,
            name_column: None,
            full_name_column: None,
            guid_column: None,
            last_modified_column: None,
            site_id_column: None,
            full_name_resolution: None,
            supports_caching: true,
            log_events: false,
            touch_cache_dependencies: false,
        }
    }

    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = Some(column.into());
        self
    }

    pub fn name_column(mut self, column: impl Into<String>) -> Self {
        self.name_column = Some(column.into());
        self
    }

    /// Persisted column holding the full name (may be a `;`-delimited list).
    pub fn full_name_column(mut self, column: impl Into<String>) -> Self {
        self.full_name_column = Some(column.into());
        self
    }

    /// Enables the full-name index with an explicit tie-break policy.
    pub fn full_name_resolution(mut self, resolution: FullNameResolution) -> Self {
        self.full_name_resolution = Some(resolution);
        self
    }

    pub fn guid_column(mut self, column: impl Into<String>) -> Self {
        self.guid_column = Some(column.into());
        self
    }

    pub fn last_modified_column(mut self, column: impl Into<String>) -> Self {
        self.last_modified_column = Some(column.into());
        self
    }

    pub fn site_id_column(mut self, column: impl Into<String>) -> Self {
        self.site_id_column = Some(column.into());
        self
    }

    pub fn supports_caching(mut self, value: bool) -> Self {
        self.supports_caching = value;
        self
    }

    pub fn log_events(mut self, value: bool) -> Self {
        self.log_events = value;
        self
    }

    pub fn touch_cache_dependencies(mut self, value: bool) -> Self {
        self.touch_cache_dependencies = value;
        self
    }

    pub fn build(self) -> Result<Arc<TypeDescriptor>, DomainError> {
        let object_type = self.object_type.as_str().to_string();

        let columns = [
            ("id_column", &self.id_column),
            ("name_column", &self.name_column),
            ("full_name_column", &self.full_name_column),
            ("guid_column", &self.guid_column),
            ("last_modified_column", &self.last_modified_column),
            ("site_id_column", &self.site_id_column),
        ];
        for (key, column) in columns {
            if column.as_deref().is_some_and(|value| value.trim().is_empty()) {
                return Err(DomainError::invalid_descriptor(
                    object_type,
                    format!("{key} must not be empty"),
                ));
            }
        }

        if self.full_name_column.is_some() && self.full_name_resolution.is_none() {
            return Err(DomainError::invalid_descriptor(
                object_type,
                "full_name_column requires an explicit full_name_resolution",
            ));
        }

        if self.touch_cache_dependencies && self.id_column.is_none() {
            return Err(DomainError::invalid_descriptor(
                object_type,
                "touch_cache_dependencies requires an id_column",
            ));
        }

        Ok(Arc::new(TypeDescriptor {
            object_type: self.object_type,
            module: self.module,
            id_column: self.id_column,
            name_column: self.name_column,
            full_name_column: self.full_name_column,
            guid_column: self.guid_column,
            last_modified_column: self.last_modified_column,
            site_id_column: self.site_id_column,
            full_name_resolution: self.full_name_resolution,
            supports_caching: self.supports_caching,
            log_events: self.log_events,
            touch_cache_dependencies: self.touch_cache_dependencies,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manufacturer() -> ObjectType {
        ObjectType::new("ecommerce.manufacturer").expect("valid type")
    }

    #[test]
    fn indices_follow_columns_and_caching_flag() {
        let descriptor = TypeDescriptor::builder(manufacturer())
            .id_column("ManufacturerID")
            .name_column("ManufacturerName")
            .build()
            .expect("valid descriptor");

        assert!(descriptor.has_id_index());
        assert!(descriptor.has_name_index());
        assert!(!descriptor.has_full_name_index());
        assert!(!descriptor.has_guid_index());

        let uncached = TypeDescriptor::builder(manufacturer())
            .id_column("ManufacturerID")
            .supports_caching(false)
            .build()
            .expect("valid descriptor");
        assert!(!uncached.has_id_index());
    }

    #[test]
    fn full_name_column_requires_resolution() {
        let err = TypeDescriptor::builder(manufacturer())
            .full_name_column("ManufacturerFullName")
            .build()
            .expect_err("missing resolution");
        assert!(matches!(err, DomainError::InvalidDescriptor { .. }));

        let descriptor = TypeDescriptor::builder(manufacturer())
            .full_name_column("ManufacturerFullName")
            .full_name_resolution(FullNameResolution::PersistedFirst)
            .build()
            .expect("valid descriptor");
        assert_eq!(
            descriptor.full_name_resolution(),
            Some(FullNameResolution::PersistedFirst)
        );
        assert!(descriptor.has_full_name_index());
    }

    #[test]
    fn rejects_blank_columns() {
        let err = TypeDescriptor::builder(manufacturer())
            .id_column("  ")
            .build()
            .expect_err("blank column");
        assert!(err.to_string().contains("id_column"));
    }

    #[test]
    fn touch_requires_id_column() {
        assert!(
            TypeDescriptor::builder(manufacturer())
                .touch_cache_dependencies(true)
                .build()
                .is_err()
        );
    }
}
