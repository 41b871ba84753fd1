//! Cached CRUD access to one entity type.

use std::sync::Arc;

use metrics::counter;
use time::OffsetDateTime;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::domain::{
    DataRow, FieldValue, FullNameResolution, InfoObject, TypeDescriptor, WhereCondition,
};
use crate::events::{
    BulkEventArgs, BulkInsertEventArgs, DataEventArgs, EventError, EventHandler, EventScope,
    ObjectEventArgs, ObjectEvents, PermissionEventArgs, call_chain,
};
use crate::farm::{TaskKind, WebFarmSynchronizer};

use super::error::ProviderError;
use super::full_name::{ColumnFullName, DerivedObjects, FullNameScheme, full_name_key};
use super::index::{CacheIndexSet, CacheSlot, EntityKeys, IndexKind, IndexStats, name_key};
use super::store::ObjectStore;

pub(crate) const METRIC_HIT: &str = "infocache_provider_hit_total";
pub(crate) const METRIC_MISS: &str = "infocache_provider_miss_total";
pub(crate) const METRIC_NEGATIVE_HIT: &str = "infocache_provider_negative_hit_total";

/// Lookup result: `None` is "not found" unless strict mode was requested.
pub type Lookup = Result<Option<Arc<InfoObject>>, ProviderError>;

/// The per-type service owning caching and CRUD for one entity type.
///
/// Reads consult the indices first and load from the store on a miss,
/// caching the result (or a `NotFound` sentinel). Writes go through the
/// store, refresh every index key of the entity together and, for
/// cache-touching types, notify peers through the web farm.
pub struct ObjectProvider {
    descriptor: Arc<TypeDescriptor>,
    store: Arc<dyn ObjectStore>,
    events: ObjectEvents,
    index: CacheIndexSet,
    full_names: Arc<dyn FullNameScheme>,
    derived: Option<Arc<dyn DerivedObjects>>,
    farm: Option<Arc<WebFarmSynchronizer>>,
    caching: bool,
    type_label: String,
}

pub struct ObjectProviderBuilder {
    descriptor: Arc<TypeDescriptor>,
    store: Arc<dyn ObjectStore>,
    full_names: Option<Arc<dyn FullNameScheme>>,
    derived: Option<Arc<dyn DerivedObjects>>,
    farm: Option<Arc<WebFarmSynchronizer>>,
    caching_enabled: bool,
}

impl ObjectProviderBuilder {
    pub fn full_name_scheme(mut self, scheme: Arc<dyn FullNameScheme>) -> Self {
        self.full_names = Some(scheme);
        self
    }

    pub fn derived_objects(mut self, source: Arc<dyn DerivedObjects>) -> Self {
        self.derived = Some(source);
        self
    }

    pub fn farm(mut self, farm: Arc<WebFarmSynchronizer>) -> Self {
        self.farm = Some(farm);
        self
    }

    /// Global cache switch; the descriptor's `supports_caching` still applies.
    pub fn caching_enabled(mut self, enabled: bool) -> Self {
        self.caching_enabled = enabled;
        self
    }

    pub fn build(self) -> ObjectProvider {
        let object_type = self.descriptor.object_type();
        ObjectProvider {
            events: ObjectEvents::new(object_type),
            type_label: object_type.key().to_string(),
            caching: self.caching_enabled && self.descriptor.supports_caching(),
            index: CacheIndexSet::new(),
            full_names: self.full_names.unwrap_or_else(|| Arc::new(ColumnFullName)),
            derived: self.derived,
            farm: self.farm,
            store: self.store,
            descriptor: self.descriptor,
        }
    }
}

impl ObjectProvider {
    pub fn builder(
        descriptor: Arc<TypeDescriptor>,
        store: Arc<dyn ObjectStore>,
    ) -> ObjectProviderBuilder {
        ObjectProviderBuilder {
            descriptor,
            store,
            full_names: None,
            derived: None,
            farm: None,
            caching_enabled: true,
        }
    }

    pub fn descriptor(&self) -> &Arc<TypeDescriptor> {
        &self.descriptor
    }

    pub fn events(&self) -> &ObjectEvents {
        &self.events
    }

    pub fn is_caching(&self) -> bool {
        self.caching
    }

    pub fn stats(&self) -> IndexStats {
        self.index.stats()
    }

    /// A fresh mutable instance of this type.
    pub fn new_object(&self) -> InfoObject {
        InfoObject::empty(Arc::clone(&self.descriptor))
    }

    pub async fn get_by_id(&self, id: i64, throw_if_not_found: bool) -> Lookup {
        let column = self
            .descriptor
            .id_column()
            .ok_or_else(|| ProviderError::unsupported(&self.type_label, "id"))?;
        let cached = self.cached(IndexKind::Id, || self.index.get_by_id(id));
        let found = match cached {
            Some(slot) => slot.object().cloned(),
            None => {
                let filter = WhereCondition::new().where_equals(column, id);
                self.load_and_cache(IndexKind::Id, &id.to_string(), filter)
                    .await?
            }
        };
        self.found_or(found, id.to_string(), throw_if_not_found)
    }

    /// Code name lookup outside any site scope.
    pub async fn get_by_name(&self, name: &str, throw_if_not_found: bool) -> Lookup {
        self.get_by_name_on_site(name, None, throw_if_not_found)
            .await
    }

    pub async fn get_by_name_on_site(
        &self,
        name: &str,
        site_id: Option<i64>,
        throw_if_not_found: bool,
    ) -> Lookup {
        let column = self
            .descriptor
            .name_column()
            .ok_or_else(|| ProviderError::unsupported(&self.type_label, "name"))?;
        let site_id = site_id.filter(|_| self.descriptor.site_id_column().is_some());
        let key = name_key(name, site_id);
        let cached = self.cached(IndexKind::Name, || self.index.get_by_name(&key));
        let found = match cached {
            Some(slot) => slot.object().cloned(),
            None => {
                let mut filter = WhereCondition::new().where_equals_ignore_case(column, name.trim());
                if let Some(site_column) = self.descriptor.site_id_column() {
                    filter = match site_id {
                        Some(site) => filter.where_equals(site_column, site),
                        None => filter.where_null(site_column),
                    };
                }
                self.load_and_cache(IndexKind::Name, &key, filter).await?
            }
        };
        self.found_or(found, name.to_string(), throw_if_not_found)
    }

    pub async fn get_by_guid(&self, guid: Uuid, throw_if_not_found: bool) -> Lookup {
        let column = self
            .descriptor
            .guid_column()
            .ok_or_else(|| ProviderError::unsupported(&self.type_label, "guid"))?;
        let cached = self.cached(IndexKind::Guid, || self.index.get_by_guid(guid));
        let found = match cached {
            Some(slot) => slot.object().cloned(),
            None => {
                let filter = WhereCondition::new().where_equals(column, FieldValue::Guid(guid));
                self.load_and_cache(IndexKind::Guid, &guid.to_string(), filter)
                    .await?
            }
        };
        self.found_or(found, guid.to_string(), throw_if_not_found)
    }

    /// Resolve a full name, consulting the derived source and the store in
    /// the order the type's [`FullNameResolution`] prescribes. Both misses
    /// are memoized as `NotFound`.
    pub async fn get_by_full_name(&self, full_name: &str, throw_if_not_found: bool) -> Lookup {
        let resolution = self
            .descriptor
            .full_name_resolution()
            .ok_or_else(|| ProviderError::unsupported(&self.type_label, "full name"))?;
        let key = full_name_key(full_name);
        if key.is_empty() {
            return self.found_or(None, full_name.to_string(), throw_if_not_found);
        }

        if let Some(slot) = self.cached(IndexKind::FullName, || self.index.get_by_full_name(&key)) {
            return self.found_or(slot.object().cloned(), full_name.to_string(), throw_if_not_found);
        }

        let generation = self.index.generation();
        let full_name = full_name.trim();
        let (found, persisted) = match resolution {
            FullNameResolution::DerivedFirst => match self.derive(full_name) {
                Some(object) => (Some(object), false),
                None => (self.load_by_full_name(full_name).await?, true),
            },
            FullNameResolution::PersistedFirst => match self.load_by_full_name(full_name).await? {
                Some(object) => (Some(object), true),
                None => (self.derive(full_name), false),
            },
        };

        if self.caching {
            match &found {
                Some(object) if persisted => {
                    let mut keys = self.cache_keys_of(object);
                    if !keys.full_names.contains(&key) {
                        keys.full_names.push(key.clone());
                    }
                    self.index.store_loaded(Arc::clone(object), &keys, generation);
                }
                Some(object) => {
                    self.index
                        .store_full_name_only(&key, Arc::clone(object), generation);
                }
                None => {
                    self.index
                        .store_missing(IndexKind::FullName, &key, generation);
                }
            }
        }
        self.found_or(found, full_name.to_string(), throw_if_not_found)
    }

    /// Insert (no ID yet) or update `object`, returning the persisted,
    /// frozen instance now held by the cache.
    pub async fn set(&self, object: InfoObject) -> Result<Arc<InfoObject>, ProviderError> {
        call_chain(self.set_in_chain(object)).await
    }

    async fn set_in_chain(&self, object: InfoObject) -> Result<Arc<InfoObject>, ProviderError> {
        self.ensure_type(&object)?;
        let mut object = if object.is_frozen() {
            object.to_mutable()
        } else {
            object
        };

        let is_insert = object.id().is_none();
        if is_insert
            && let Some(column) = self.descriptor.guid_column()
            && object.guid().is_none()
        {
            object.set(column, Uuid::new_v4())?;
        }
        if let Some(column) = self.descriptor.last_modified_column() {
            object.set(column, OffsetDateTime::now_utc())?;
        }

        let handler = if is_insert {
            &self.events.insert
        } else {
            &self.events.update
        };
        let mut scope = handler.start_event(ObjectEventArgs { object })?;
        let working = proceed(handler, &scope)?.object.clone();

        let row = self.store.upsert(&self.descriptor, &working).await?;
        let mut persisted = working;
        persisted.merge_row(row)?;
        let stored = Arc::new(persisted.freeze());

        if self.caching {
            self.index.replace(Arc::clone(&stored), &self.cache_keys_of(&stored), |cached| {
                self.keys_of(cached)
            });
        }
        if let Some(args) = scope.args_mut() {
            args.object = stored.to_mutable();
        }

        self.touch_peers(TaskKind::InvalidateObject, self.invalidation_data(&stored))
            .await;
        self.audit(if is_insert { "insert" } else { "update" }, &stored);
        scope
            .finish()
            .map_err(|source| self.committed(Some(Arc::clone(&stored)), source))?;
        Ok(stored)
    }

    pub async fn delete(&self, object: &InfoObject) -> Result<(), ProviderError> {
        call_chain(self.delete_in_chain(object)).await
    }

    async fn delete_in_chain(&self, object: &InfoObject) -> Result<(), ProviderError> {
        self.ensure_type(object)?;
        let mut scope = self.events.delete.start_event(ObjectEventArgs {
            object: object.to_mutable(),
        })?;
        let target = proceed(&self.events.delete, &scope)?.object.clone();

        self.store.delete(&self.descriptor, &target).await?;

        if self.caching {
            self.index
                .evict(&self.keys_of(&target), |cached| self.keys_of(cached));
        }
        if let Some(args) = scope.args_mut() {
            args.object = target.to_mutable();
        }

        self.touch_peers(TaskKind::InvalidateObject, self.invalidation_data(&target))
            .await;
        self.audit("delete", &target);
        scope
            .finish()
            .map_err(|source| self.committed(Some(Arc::new(target.freeze())), source))?;
        Ok(())
    }

    pub async fn bulk_insert(&self, objects: Vec<InfoObject>) -> Result<u64, ProviderError> {
        call_chain(async move {
            for object in &objects {
                self.ensure_type(object)?;
            }
            let scope = self.events.bulk_insert.start_event(BulkInsertEventArgs {
                object_type: self.descriptor.object_type().clone(),
                objects,
            })?;
            let rows: Vec<DataRow> = proceed(&self.events.bulk_insert, &scope)?
                .objects
                .iter()
                .map(|object| object.fields().clone())
                .collect();

            let affected = self.store.bulk_insert(&self.descriptor, &rows).await?;
            self.after_bulk("bulk_insert", affected).await;
            scope.finish().map_err(|source| self.committed(None, source))?;
            Ok(affected)
        })
        .await
    }

    /// Apply `values` to every row matching `filter`. Every index of the type
    /// is dropped afterwards, so later reads observe the change.
    pub async fn bulk_update(
        &self,
        filter: WhereCondition,
        values: DataRow,
    ) -> Result<u64, ProviderError> {
        call_chain(async move {
            let mut scope = self.events.bulk_update.start_event(BulkEventArgs {
                object_type: self.descriptor.object_type().clone(),
                where_condition: filter,
                changed_columns: Some(values.keys().cloned().collect()),
                affected: 0,
            })?;
            let filter = proceed(&self.events.bulk_update, &scope)?
                .where_condition
                .clone();

            let affected = self
                .store
                .bulk_update(&self.descriptor, &filter, &values)
                .await?;
            self.after_bulk("bulk_update", affected).await;
            if let Some(args) = scope.args_mut() {
                args.affected = affected;
            }
            scope.finish().map_err(|source| self.committed(None, source))?;
            Ok(affected)
        })
        .await
    }

    pub async fn bulk_delete(&self, filter: WhereCondition) -> Result<u64, ProviderError> {
        call_chain(async move {
            let mut scope = self.events.bulk_delete.start_event(BulkEventArgs {
                object_type: self.descriptor.object_type().clone(),
                where_condition: filter,
                changed_columns: None,
                affected: 0,
            })?;
            let filter = proceed(&self.events.bulk_delete, &scope)?
                .where_condition
                .clone();

            let affected = self.store.bulk_delete(&self.descriptor, &filter).await?;
            self.after_bulk("bulk_delete", affected).await;
            if let Some(args) = scope.args_mut() {
                args.affected = affected;
            }
            scope.finish().map_err(|source| self.committed(None, source))?;
            Ok(affected)
        })
        .await
    }

    /// Fire `CheckPermissions`; allowed unless a subscriber denies or cancels.
    pub fn check_permissions(
        &self,
        object: &InfoObject,
        permission: &str,
        user: &str,
    ) -> Result<bool, ProviderError> {
        let scope = self
            .events
            .check_permissions
            .start_event(PermissionEventArgs {
                object: object.to_mutable(),
                permission: permission.to_string(),
                user: user.to_string(),
                allowed: true,
            })?;
        let cancelled = scope.is_cancelled();
        let args = scope.finish()?;
        Ok(args.allowed && !cancelled)
    }

    /// Drop every index of the type; with `log_task`, ask peers to do the same.
    pub async fn clear_hashtables(&self, log_task: bool) -> Result<(), ProviderError> {
        self.clear_local();
        if log_task && let Some(farm) = &self.farm {
            farm.create_task(
                TaskKind::ClearHashtables,
                self.descriptor.object_type().as_str(),
                Vec::new(),
                None,
            )
            .await?;
        }
        Ok(())
    }

    /// Drop every index of the type on this node only.
    pub fn clear_local(&self) {
        let before = self.index.stats();
        self.index.clear();
        debug!(
            object_type = %self.type_label,
            by_id = before.by_id,
            by_name = before.by_name,
            by_full_name = before.by_full_name,
            "Provider hashtables cleared"
        );
    }

    /// Evict one entity: the given keys, plus every key of whatever is
    /// currently cached under them.
    pub fn invalidate_object(&self, keys: &EntityKeys) {
        let mut cached = Vec::new();
        if let Some(id) = keys.id {
            cached.extend(self.index.get_by_id(id));
        }
        if let Some(guid) = keys.guid {
            cached.extend(self.index.get_by_guid(guid));
        }
        if let Some(name) = &keys.name {
            cached.extend(self.index.get_by_name(name));
        }
        for key in &keys.full_names {
            cached.extend(self.index.get_by_full_name(key));
        }

        self.index.remove(keys);
        for slot in cached {
            if let CacheSlot::Found(object) = slot {
                self.index.remove(&self.keys_of(&object));
            }
        }
    }

    /// Every index key `object` is cached under.
    pub fn keys_of(&self, object: &InfoObject) -> EntityKeys {
        let descriptor = &self.descriptor;
        let mut full_names: Vec<String> = if descriptor.has_full_name_index() {
            self.full_names
                .full_names(object)
                .iter()
                .map(|name| full_name_key(name))
                .filter(|key| !key.is_empty())
                .collect()
        } else {
            Vec::new()
        };
        full_names.sort();
        full_names.dedup();

        EntityKeys {
            id: object.id().filter(|_| descriptor.has_id_index()),
            guid: object.guid().filter(|_| descriptor.has_guid_index()),
            name: object
                .code_name()
                .filter(|_| descriptor.has_name_index())
                .map(|name| name_key(name, object.site_id())),
            full_names,
        }
    }

    /// Keys a persisted object is cached under outside `get_by_full_name`.
    /// Derived-first types leave full names out: the derived source must be
    /// asked before a persisted object answers a full name.
    fn cache_keys_of(&self, object: &InfoObject) -> EntityKeys {
        let mut keys = self.keys_of(object);
        if self.descriptor.full_name_resolution() == Some(FullNameResolution::DerivedFirst) {
            keys.full_names.clear();
        }
        keys
    }

    /// `InvalidateObject` payload: `[id, name, site, full-name keys...]`.
    pub fn invalidation_data(&self, object: &InfoObject) -> Vec<String> {
        let keys = self.keys_of(object);
        let mut data = vec![
            object.id().map(|id| id.to_string()).unwrap_or_default(),
            object.code_name().unwrap_or_default().to_string(),
            object.site_id().map(|site| site.to_string()).unwrap_or_default(),
        ];
        data.extend(keys.full_names);
        data
    }

    fn cached(&self, index: IndexKind, read: impl FnOnce() -> Option<CacheSlot>) -> Option<CacheSlot> {
        if !self.caching {
            return None;
        }
        let slot = read();
        let metric = match &slot {
            Some(CacheSlot::Found(_)) => METRIC_HIT,
            Some(CacheSlot::NotFound) => METRIC_NEGATIVE_HIT,
            None => METRIC_MISS,
        };
        counter!(metric, "object_type" => self.type_label.clone(), "index" => index.as_str())
            .increment(1);
        slot
    }

    async fn load_and_cache(
        &self,
        index: IndexKind,
        key: &str,
        filter: WhereCondition,
    ) -> Result<Option<Arc<InfoObject>>, ProviderError> {
        let generation = self.index.generation();
        let found = self.load_one(filter).await?;
        if self.caching {
            match &found {
                Some(object) => {
                    self.index
                        .store_loaded(Arc::clone(object), &self.cache_keys_of(object), generation);
                }
                None => {
                    self.index.store_missing(index, key, generation);
                }
            }
        }
        Ok(found)
    }

    async fn load_by_full_name(
        &self,
        full_name: &str,
    ) -> Result<Option<Arc<InfoObject>>, ProviderError> {
        match self.full_names.where_condition(&self.descriptor, full_name) {
            Some(filter) => self.load_one(filter).await,
            None => Ok(None),
        }
    }

    async fn load_one(
        &self,
        filter: WhereCondition,
    ) -> Result<Option<Arc<InfoObject>>, ProviderError> {
        let rows = self.load_rows(filter).await?;
        Ok(rows.into_iter().next().map(|row| {
            Arc::new(InfoObject::from_row(Arc::clone(&self.descriptor), row).freeze())
        }))
    }

    /// Query the store inside a `GetData` bracket. A subscriber that cancels
    /// supplies the rows itself.
    async fn load_rows(&self, filter: WhereCondition) -> Result<Vec<DataRow>, ProviderError> {
        let mut scope = self.events.get_data.start_event(DataEventArgs {
            object_type: self.descriptor.object_type().clone(),
            where_condition: filter.clone(),
            rows: Vec::new(),
        })?;
        if !scope.is_cancelled() {
            let rows = self.store.execute_query(&self.descriptor, &filter).await?;
            if let Some(args) = scope.args_mut() {
                args.rows = rows;
            }
        }
        Ok(scope.finish()?.rows)
    }

    fn derive(&self, full_name: &str) -> Option<Arc<InfoObject>> {
        let object = self.derived.as_ref()?.derive(&self.descriptor, full_name)?;
        Some(Arc::new(object.freeze()))
    }

    async fn after_bulk(&self, op: &'static str, affected: u64) {
        if self.caching {
            self.index.clear();
        }
        debug!(object_type = %self.type_label, op, affected, "Bulk operation applied");
        if self.descriptor.log_events() {
            info!(object_type = %self.type_label, op, affected, "Object event logged");
        }
        self.touch_peers(TaskKind::ClearHashtables, Vec::new()).await;
    }

    /// Notify peers of a local mutation of a cache-touching type. The local
    /// operation already happened, so failures are logged only.
    async fn touch_peers(&self, kind: TaskKind, data: Vec<String>) {
        if !self.descriptor.touch_cache_dependencies() {
            return;
        }
        let Some(farm) = &self.farm else {
            return;
        };
        if let Err(err) = farm
            .create_task(kind, self.descriptor.object_type().as_str(), data, None)
            .await
        {
            error!(
                object_type = %self.type_label,
                task_kind = %kind,
                error = %err,
                "Failed to create farm task"
            );
        }
    }

    fn audit(&self, op: &'static str, object: &InfoObject) {
        if !self.descriptor.log_events() {
            return;
        }
        info!(
            object_type = %self.type_label,
            op,
            id = object.id(),
            name = object.code_name(),
            "Object event logged"
        );
    }

    fn committed(&self, object: Option<Arc<InfoObject>>, source: EventError) -> ProviderError {
        ProviderError::Committed {
            object_type: self.type_label.clone(),
            object,
            source,
        }
    }

    fn ensure_type(&self, object: &InfoObject) -> Result<(), ProviderError> {
        if object.object_type() == self.descriptor.object_type() {
            return Ok(());
        }
        Err(ProviderError::TypeMismatch {
            expected: self.descriptor.object_type().to_string(),
            actual: object.object_type().to_string(),
        })
    }

    fn found_or(&self, found: Option<Arc<InfoObject>>, key: String, strict: bool) -> Lookup {
        match found {
            None if strict => Err(ProviderError::not_found(
                self.descriptor.object_type().as_str(),
                key,
            )),
            found => Ok(found),
        }
    }
}

/// Arguments of a started event, or the cancellation error when a `Before`
/// subscriber vetoed the operation.
fn proceed<'s, A: 'static>(
    handler: &EventHandler<A>,
    scope: &'s EventScope<'_, A>,
) -> Result<&'s A, EventError> {
    if scope.is_cancelled() {
        return Err(EventError::cancelled(handler.name(), handler.scope()));
    }
    scope.args().ok_or(EventError::Finished {
        event: handler.name(),
    })
}
