//! In-process [`ObjectStore`] with call accounting.
//!
//! Backs the `replay` command and the test suites; the counters let tests
//! assert how often a provider reached its collaborator.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use tracing::debug;

use crate::domain::{DataRow, FieldValue, InfoObject, ObjectType, TypeDescriptor, WhereCondition};
use crate::lock::{mutex_lock, rw_read, rw_write};
use crate::provider::{ObjectStore, StoreError};

const SOURCE: &str = "infra::memory_store";

#[derive(Default)]
struct Table {
    rows: Vec<DataRow>,
    next_id: i64,
}

impl Table {
    fn allocate_id(&mut self, id_column: &str) -> i64 {
        let max_existing = self
            .rows
            .iter()
            .filter_map(|row| row.get(id_column).and_then(FieldValue::as_i64))
            .max()
            .unwrap_or(0);
        let id = self.next_id.max(max_existing + 1);
        self.next_id = id + 1;
        id
    }
}

/// Snapshot of the collaborator calls made so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCalls {
    pub queries: usize,
    pub writes: usize,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<ObjectType, Table>>,
    queries: AtomicUsize,
    writes: AtomicUsize,
    failures: Mutex<Vec<StoreError>>,
    latency_ms: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate rows of one type without counting writes.
    pub fn seed(&self, object_type: &ObjectType, rows: impl IntoIterator<Item = DataRow>) {
        rw_write(&self.tables, SOURCE, "seed")
            .entry(object_type.clone())
            .or_default()
            .rows
            .extend(rows);
    }

    /// Lowest ID the next insert of `object_type` may receive.
    pub fn set_next_id(&self, object_type: &ObjectType, next_id: i64) {
        rw_write(&self.tables, SOURCE, "set_next_id")
            .entry(object_type.clone())
            .or_default()
            .next_id = next_id;
    }

    /// Make the next call fail with `error`; queued failures fire in order.
    pub fn fail_next(&self, error: StoreError) {
        mutex_lock(&self.failures, SOURCE, "fail_next").push(error);
    }

    /// Simulated collaborator latency for every call.
    pub fn set_latency_ms(&self, latency_ms: u64) {
        self.latency_ms.store(latency_ms, Ordering::Relaxed);
    }

    pub fn rows(&self, object_type: &ObjectType) -> Vec<DataRow> {
        rw_read(&self.tables, SOURCE, "rows")
            .get(object_type)
            .map(|table| table.rows.clone())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> StoreCalls {
        StoreCalls {
            queries: self.queries.load(Ordering::SeqCst),
            writes: self.writes.load(Ordering::SeqCst),
        }
    }

    pub fn reset_calls(&self) {
        self.queries.store(0, Ordering::SeqCst);
        self.writes.store(0, Ordering::SeqCst);
    }

    async fn enter(&self, counter: &AtomicUsize) -> Result<(), StoreError> {
        counter.fetch_add(1, Ordering::SeqCst);
        let latency_ms = self.latency_ms.load(Ordering::Relaxed);
        if latency_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(latency_ms)).await;
        }
        let mut failures = mutex_lock(&self.failures, SOURCE, "enter");
        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures.remove(0))
        }
    }
}

/// Identity used to match an upserted object against stored rows.
fn same_entity(descriptor: &TypeDescriptor, row: &DataRow, object: &InfoObject) -> bool {
    if let Some(id) = object.id() {
        return descriptor
            .id_column()
            .and_then(|column| row.get(column))
            .and_then(FieldValue::as_i64)
            == Some(id);
    }
    if let Some(guid) = object.guid() {
        return descriptor
            .guid_column()
            .and_then(|column| row.get(column))
            .and_then(FieldValue::as_guid)
            == Some(guid);
    }
    false
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn execute_query(
        &self,
        descriptor: &TypeDescriptor,
        filter: &WhereCondition,
    ) -> Result<Vec<DataRow>, StoreError> {
        self.enter(&self.queries).await?;
        let tables = rw_read(&self.tables, SOURCE, "execute_query");
        let rows: Vec<DataRow> = tables
            .get(descriptor.object_type())
            .map(|table| {
                table
                    .rows
                    .iter()
                    .filter(|row| filter.matches(row))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        debug!(
            object_type = %descriptor.object_type(),
            filter = %filter,
            rows = rows.len(),
            "Memory store query"
        );
        Ok(rows)
    }

    async fn upsert(
        &self,
        descriptor: &TypeDescriptor,
        object: &InfoObject,
    ) -> Result<DataRow, StoreError> {
        self.enter(&self.writes).await?;
        let mut tables = rw_write(&self.tables, SOURCE, "upsert");
        let table = tables.entry(descriptor.object_type().clone()).or_default();

        if let Some(row) = table
            .rows
            .iter_mut()
            .find(|row| same_entity(descriptor, row, object))
        {
            row.extend(object.fields().clone());
            return Ok(row.clone());
        }
        if let Some(id) = object.id() {
            return Err(StoreError::missing(
                descriptor.object_type().as_str(),
                id.to_string(),
            ));
        }

        let mut row = object.fields().clone();
        if let Some(column) = descriptor.id_column() {
            let id = table.allocate_id(column);
            row.insert(column.to_string(), FieldValue::Int(id));
        }
        table.rows.push(row.clone());
        Ok(row)
    }

    async fn delete(
        &self,
        descriptor: &TypeDescriptor,
        object: &InfoObject,
    ) -> Result<(), StoreError> {
        self.enter(&self.writes).await?;
        let mut tables = rw_write(&self.tables, SOURCE, "delete");
        if let Some(table) = tables.get_mut(descriptor.object_type()) {
            table.rows.retain(|row| !same_entity(descriptor, row, object));
        }
        Ok(())
    }

    async fn bulk_insert(
        &self,
        descriptor: &TypeDescriptor,
        rows: &[DataRow],
    ) -> Result<u64, StoreError> {
        self.enter(&self.writes).await?;
        let mut tables = rw_write(&self.tables, SOURCE, "bulk_insert");
        let table = tables.entry(descriptor.object_type().clone()).or_default();
        for row in rows {
            let mut row = row.clone();
            if let Some(column) = descriptor.id_column()
                && row.get(column).is_none_or(FieldValue::is_null)
            {
                let id = table.allocate_id(column);
                row.insert(column.to_string(), FieldValue::Int(id));
            }
            table.rows.push(row);
        }
        Ok(rows.len() as u64)
    }

    async fn bulk_update(
        &self,
        descriptor: &TypeDescriptor,
        filter: &WhereCondition,
        values: &DataRow,
    ) -> Result<u64, StoreError> {
        self.enter(&self.writes).await?;
        let mut tables = rw_write(&self.tables, SOURCE, "bulk_update");
        let Some(table) = tables.get_mut(descriptor.object_type()) else {
            return Ok(0);
        };
        let mut affected = 0;
        for row in table.rows.iter_mut().filter(|row| filter.matches(row)) {
            row.extend(values.clone());
            affected += 1;
        }
        Ok(affected)
    }

    async fn bulk_delete(
        &self,
        descriptor: &TypeDescriptor,
        filter: &WhereCondition,
    ) -> Result<u64, StoreError> {
        self.enter(&self.writes).await?;
        let mut tables = rw_write(&self.tables, SOURCE, "bulk_delete");
        let Some(table) = tables.get_mut(descriptor.object_type()) else {
            return Ok(0);
        };
        let before = table.rows.len();
        table.rows.retain(|row| !filter.matches(row));
        Ok((before - table.rows.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn descriptor() -> Arc<TypeDescriptor> {
        TypeDescriptor::builder(ObjectType::new("cms.query").expect("type"))
            .id_column("QueryID")
            .name_column("QueryName")
            .build()
            .expect("descriptor")
    }

    #[tokio::test]
    async fn upsert_assigns_ids_from_next_id() {
        let store = MemoryStore::new();
        let descriptor = descriptor();
        store.set_next_id(descriptor.object_type(), 7);

        let object = InfoObject::empty(Arc::clone(&descriptor))
            .with("QueryName", "q")
            .expect("object");
        let row = store.upsert(&descriptor, &object).await.expect("upsert");

        assert_eq!(row.get("QueryID"), Some(&FieldValue::Int(7)));
        assert_eq!(store.calls().writes, 1);
    }

    #[tokio::test]
    async fn updating_unknown_id_is_reported() {
        let store = MemoryStore::new();
        let descriptor = descriptor();
        let object = InfoObject::empty(Arc::clone(&descriptor))
            .with("QueryID", 3_i64)
            .expect("object");

        let err = store.upsert(&descriptor, &object).await.expect_err("missing");
        assert!(matches!(err, StoreError::Missing { .. }));
    }

    #[tokio::test]
    async fn injected_failures_fire_once() {
        let store = MemoryStore::new();
        let descriptor = descriptor();
        store.fail_next(StoreError::query("cms.query", "down"));

        assert!(store
            .execute_query(&descriptor, &WhereCondition::new())
            .await
            .is_err());
        assert!(store
            .execute_query(&descriptor, &WhereCondition::new())
            .await
            .is_ok());
        assert_eq!(store.calls().queries, 2);
    }
}
