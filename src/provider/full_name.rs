//! Full-name key derivation and derived ("automatic") object sources.

use std::sync::Arc;

use crate::domain::{
    FULL_NAME_LIST_SEPARATOR, FieldValue, InfoObject, TypeDescriptor, WhereCondition,
};

/// Maps an object to its full-name index keys and a full name back to a
/// store filter.
///
/// `full_names` must be a pure function of the object's fields: removal
/// re-derives the keys used at insertion time.
pub trait FullNameScheme: Send + Sync {
    fn full_names(&self, object: &InfoObject) -> Vec<String>;

    /// Filter locating the persisted object named `full_name`, or `None` when
    /// the name cannot belong to a persisted object.
    fn where_condition(&self, descriptor: &TypeDescriptor, full_name: &str)
    -> Option<WhereCondition>;
}

/// Normalized index key of a full name.
pub fn full_name_key(full_name: &str) -> String {
    full_name.trim().to_lowercase()
}

/// Full names read from the descriptor's full-name column; a `;`-delimited
/// value yields one key per item.
#[derive(Debug, Default, Clone, Copy)]
pub struct ColumnFullName;

impl FullNameScheme for ColumnFullName {
    fn full_names(&self, object: &InfoObject) -> Vec<String> {
        let Some(value) = object.full_name_value() else {
            return Vec::new();
        };
        let mut names: Vec<String> = value
            .split(FULL_NAME_LIST_SEPARATOR)
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect();
        names.dedup_by(|a, b| a.eq_ignore_ascii_case(b));
        names
    }

    fn where_condition(
        &self,
        descriptor: &TypeDescriptor,
        full_name: &str,
    ) -> Option<WhereCondition> {
        let column = descriptor.full_name_column()?;
        Some(WhereCondition::new().where_list_contains(column, full_name.trim()))
    }
}

/// `parent<sep>name` composed from a parent column and the code name column,
/// e.g. `site1.Acme`.
#[derive(Debug, Clone)]
pub struct CompositeFullName {
    parent_column: String,
    separator: char,
}

impl CompositeFullName {
    pub fn new(parent_column: impl Into<String>) -> Self {
        Self {
            parent_column: parent_column.into(),
            separator: '.',
        }
    }

    pub fn with_separator(mut self, separator: char) -> Self {
        self.separator = separator;
        self
    }

    fn compose(&self, parent: &str, name: &str) -> String {
        format!("{parent}{}{name}", self.separator)
    }
}

impl FullNameScheme for CompositeFullName {
    fn full_names(&self, object: &InfoObject) -> Vec<String> {
        let (Some(parent), Some(name)) = (object.get(&self.parent_column), object.code_name())
        else {
            return Vec::new();
        };
        vec![self.compose(&parent.to_key_string(), name)]
    }

    fn where_condition(
        &self,
        descriptor: &TypeDescriptor,
        full_name: &str,
    ) -> Option<WhereCondition> {
        let name_column = descriptor.name_column()?;
        let (parent, name) = full_name.trim().split_once(self.separator)?;
        if parent.is_empty() || name.is_empty() {
            return None;
        }
        let filter = match parent.parse::<i64>() {
            Ok(id) => WhereCondition::new().where_equals(&self.parent_column, FieldValue::Int(id)),
            Err(_) => WhereCondition::new().where_equals_ignore_case(&self.parent_column, parent),
        };
        Some(filter.where_equals_ignore_case(name_column, name))
    }
}

/// Source of objects computed rather than persisted (the "automatic" value
/// in full-name resolution).
pub trait DerivedObjects: Send + Sync {
    fn derive(&self, descriptor: &Arc<TypeDescriptor>, full_name: &str) -> Option<InfoObject>;
}

impl<F> DerivedObjects for F
where
    F: Fn(&Arc<TypeDescriptor>, &str) -> Option<InfoObject> + Send + Sync,
{
    fn derive(&self, descriptor: &Arc<TypeDescriptor>, full_name: &str) -> Option<InfoObject> {
        self(descriptor, full_name)
    }
}
