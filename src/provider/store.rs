use async_trait::async_trait;

use crate::domain::{DataRow, InfoObject, TypeDescriptor, WhereCondition};

use super::error::StoreError;

/// Storage collaborator behind every provider.
///
/// Implementations own their timeout and retry policy; providers propagate
/// any [`StoreError`] to their caller unchanged.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Rows of `descriptor`'s type matching `filter`, for load-on-miss.
    async fn execute_query(
        &self,
        descriptor: &TypeDescriptor,
        filter: &WhereCondition,
    ) -> Result<Vec<DataRow>, StoreError>;

    /// Insert or update `object`; returns the row as persisted, including
    /// any identity the store assigned.
    async fn upsert(
        &self,
        descriptor: &TypeDescriptor,
        object: &InfoObject,
    ) -> Result<DataRow, StoreError>;

    async fn delete(&self, descriptor: &TypeDescriptor, object: &InfoObject)
    -> Result<(), StoreError>;

    async fn bulk_insert(
        &self,
        descriptor: &TypeDescriptor,
        rows: &[DataRow],
    ) -> Result<u64, StoreError>;

    /// Apply `values` to every row matching `filter`; returns rows affected.
    async fn bulk_update(
        &self,
        descriptor: &TypeDescriptor,
        filter: &WhereCondition,
        values: &DataRow,
    ) -> Result<u64, StoreError>;

    async fn bulk_delete(
        &self,
        descriptor: &TypeDescriptor,
        filter: &WhereCondition,
    ) -> Result<u64, StoreError>;
}
