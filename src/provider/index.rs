//! Concurrent lookup indices of one provider.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::InfoObject;
use crate::lock::StripedLock;

const SOURCE: &str = "provider::index";

/// A cached lookup result. `NotFound` memoizes a negative lookup and is
/// distinct from "no entry yet", which is a map miss.
#[derive(Debug, Clone)]
pub enum CacheSlot {
    Found(Arc<InfoObject>),
    NotFound,
}

impl CacheSlot {
    pub fn object(&self) -> Option<&Arc<InfoObject>> {
        match self {
            Self::Found(object) => Some(object),
            Self::NotFound => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Id,
    Name,
    FullName,
    Guid,
}

impl IndexKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Name => "name",
            Self::FullName => "full_name",
            Self::Guid => "guid",
        }
    }
}

/// Name index key; scoped by site when the type has a site column.
pub fn name_key(name: &str, site_id: Option<i64>) -> String {
    let name = name.trim().to_lowercase();
    match site_id {
        Some(site) => format!("{site}|{name}"),
        None => format!("global|{name}"),
    }
}

/// Every index key under which one entity is (or was) cached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityKeys {
    pub id: Option<i64>,
    pub guid: Option<Uuid>,
    pub name: Option<String>,
    pub full_names: Vec<String>,
}

impl EntityKeys {
    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.guid.is_none() && self.name.is_none() && self.full_names.is_empty()
    }

    /// Parse an `InvalidateObject` payload `[id, name, site, full-name keys...]`;
    /// empty items mean "absent".
    pub fn from_invalidation_data(data: &[String]) -> Result<Self, String> {
        let [id, name, site, full_names @ ..] = data else {
            return Err(format!("expected at least 3 items, got {}", data.len()));
        };
        let parse = |label: &str, value: &str| {
            value
                .parse::<i64>()
                .map_err(|_| format!("{label} `{value}` is not an integer"))
        };
        let id = (!id.is_empty()).then(|| parse("id", id)).transpose()?;
        let site = (!site.is_empty()).then(|| parse("site", site)).transpose()?;
        Ok(Self {
            id,
            guid: None,
            name: (!name.is_empty()).then(|| name_key(name, site)),
            full_names: full_names
                .iter()
                .map(|key| key.trim().to_lowercase())
                .filter(|key| !key.is_empty())
                .collect(),
        })
    }

    fn stripe(&self) -> String {
        if let Some(id) = self.id {
            return format!("id:{id}");
        }
        if let Some(guid) = self.guid {
            return format!("guid:{guid}");
        }
        if let Some(name) = &self.name {
            return format!("name:{name}");
        }
        self.full_names
            .first()
            .map(|key| format!("full_name:{key}"))
            .unwrap_or_default()
    }
}

/// Entry counts per index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub by_id: usize,
    pub by_name: usize,
    pub by_full_name: usize,
    pub by_guid: usize,
}

/// By-ID, by-name, by-full-name and by-GUID maps of one type.
///
/// Single keys are read and written through the concurrent maps. Changing the
/// whole key set of one entity happens under that entity's stripe lock. A
/// generation counter, bumped by every write and clear, fences results loaded
/// from the store: a load that raced with a write is returned to its caller
/// but not cached.
pub struct CacheIndexSet {
    by_id: DashMap<i64, CacheSlot>,
    by_name: DashMap<String, CacheSlot>,
    by_full_name: DashMap<String, CacheSlot>,
    by_guid: DashMap<Uuid, CacheSlot>,
    generation: AtomicU64,
    stripes: StripedLock,
}

impl CacheIndexSet {
    pub fn new() -> Self {
        Self {
            by_id: DashMap::new(),
            by_name: DashMap::new(),
            by_full_name: DashMap::new(),
            by_guid: DashMap::new(),
            generation: AtomicU64::new(0),
            stripes: StripedLock::new(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn get_by_id(&self, id: i64) -> Option<CacheSlot> {
        self.by_id.get(&id).map(|entry| entry.value().clone())
    }

    pub fn get_by_name(&self, key: &str) -> Option<CacheSlot> {
        self.by_name.get(key).map(|entry| entry.value().clone())
    }

    pub fn get_by_full_name(&self, key: &str) -> Option<CacheSlot> {
        self.by_full_name.get(key).map(|entry| entry.value().clone())
    }

    pub fn get_by_guid(&self, guid: Uuid) -> Option<CacheSlot> {
        self.by_guid.get(&guid).map(|entry| entry.value().clone())
    }

    /// Cache an object loaded on a miss under all of its keys, unless a write
    /// happened since `seen_generation` was read.
    pub fn store_loaded(
        &self,
        object: Arc<InfoObject>,
        keys: &EntityKeys,
        seen_generation: u64,
    ) -> bool {
        if keys.is_empty() {
            return false;
        }
        let _guard = self.stripes.lock(&keys.stripe(), SOURCE, "store_loaded");
        if self.generation() != seen_generation {
            return false;
        }
        self.insert_keys(&object, keys);
        if self.generation() != seen_generation {
            self.rollback_keys(&object, keys);
            return false;
        }
        true
    }

    /// Cache a negative result for one key, with the same fencing as
    /// [`CacheIndexSet::store_loaded`].
    pub fn store_missing(&self, kind: IndexKind, key: &str, seen_generation: u64) -> bool {
        let stripe = format!("{}:{key}", kind.as_str());
        let _guard = self.stripes.lock(&stripe, SOURCE, "store_missing");
        if self.generation() != seen_generation {
            return false;
        }
        let stored = match kind {
            IndexKind::Id => key
                .parse::<i64>()
                .map(|id| self.by_id.insert(id, CacheSlot::NotFound))
                .is_ok(),
            IndexKind::Guid => Uuid::parse_str(key)
                .map(|guid| self.by_guid.insert(guid, CacheSlot::NotFound))
                .is_ok(),
            IndexKind::Name => {
                self.by_name.insert(key.to_string(), CacheSlot::NotFound);
                true
            }
            IndexKind::FullName => {
                self.by_full_name.insert(key.to_string(), CacheSlot::NotFound);
                true
            }
        };
        if stored && self.generation() != seen_generation {
            match kind {
                IndexKind::Id => {
                    if let Ok(id) = key.parse::<i64>() {
                        self.by_id.remove_if(&id, is_negative);
                    }
                }
                IndexKind::Guid => {
                    if let Ok(guid) = Uuid::parse_str(key) {
                        self.by_guid.remove_if(&guid, is_negative);
                    }
                }
                IndexKind::Name => {
                    self.by_name.remove_if(key, is_negative);
                }
                IndexKind::FullName => {
                    self.by_full_name.remove_if(key, is_negative);
                }
            }
            return false;
        }
        stored
    }

    /// Cache an object under a single full-name key only (derived objects).
    pub fn store_full_name_only(
        &self,
        key: &str,
        object: Arc<InfoObject>,
        seen_generation: u64,
    ) -> bool {
        let keys = EntityKeys {
            full_names: vec![key.to_string()],
            ..EntityKeys::default()
        };
        self.store_loaded(object, &keys, seen_generation)
    }

    /// Replace an entity after a write: drop every key of the copy currently
    /// cached under the same ID or GUID, then insert `object` under `keys`.
    /// The lookup happens under the entity's stripe lock, so a load cached
    /// concurrently is either seen here or fenced out by the generation bump.
    pub fn replace(
        &self,
        object: Arc<InfoObject>,
        keys: &EntityKeys,
        keys_of: impl Fn(&InfoObject) -> EntityKeys,
    ) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if keys.is_empty() {
            return;
        }
        let _guard = self.stripes.lock(&keys.stripe(), SOURCE, "replace");
        if let Some(previous) = self.cached_entity(keys) {
            self.remove_keys(&keys_of(&previous));
        }
        self.insert_keys(&object, keys);
    }

    /// Evict `keys` and every key of the copy cached under the same ID or
    /// GUID.
    pub fn evict(&self, keys: &EntityKeys, keys_of: impl Fn(&InfoObject) -> EntityKeys) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let _guard = self.stripes.lock(&keys.stripe(), SOURCE, "evict");
        if let Some(previous) = self.cached_entity(keys) {
            self.remove_keys(&keys_of(&previous));
        }
        self.remove_keys(keys);
    }

    /// Evict every key of one entity.
    pub fn remove(&self, keys: &EntityKeys) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let _guard = self.stripes.lock(&keys.stripe(), SOURCE, "remove");
        self.remove_keys(keys);
    }

    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.by_id.clear();
        self.by_name.clear();
        self.by_full_name.clear();
        self.by_guid.clear();
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            by_id: self.by_id.len(),
            by_name: self.by_name.len(),
            by_full_name: self.by_full_name.len(),
            by_guid: self.by_guid.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stats() == IndexStats::default()
    }

    fn cached_entity(&self, keys: &EntityKeys) -> Option<Arc<InfoObject>> {
        let slot = match (keys.id, keys.guid) {
            (Some(id), _) => self.by_id.get(&id).map(|entry| entry.value().clone()),
            (None, Some(guid)) => self.by_guid.get(&guid).map(|entry| entry.value().clone()),
            (None, None) => None,
        }?;
        slot.object().cloned()
    }

    fn insert_keys(&self, object: &Arc<InfoObject>, keys: &EntityKeys) {
        let slot = CacheSlot::Found(Arc::clone(object));
        if let Some(id) = keys.id {
            self.by_id.insert(id, slot.clone());
        }
        if let Some(guid) = keys.guid {
            self.by_guid.insert(guid, slot.clone());
        }
        if let Some(name) = &keys.name {
            self.by_name.insert(name.clone(), slot.clone());
        }
        for key in &keys.full_names {
            self.by_full_name.insert(key.clone(), slot.clone());
        }
    }

    /// Undo `insert_keys` for slots that still hold `object`.
    fn rollback_keys(&self, object: &Arc<InfoObject>, keys: &EntityKeys) {
        if let Some(id) = keys.id {
            self.by_id.remove_if(&id, |_, slot| holds(slot, object));
        }
        if let Some(guid) = keys.guid {
            self.by_guid.remove_if(&guid, |_, slot| holds(slot, object));
        }
        if let Some(name) = &keys.name {
            self.by_name.remove_if(name.as_str(), |_, slot| holds(slot, object));
        }
        for key in &keys.full_names {
            self.by_full_name
                .remove_if(key.as_str(), |_, slot| holds(slot, object));
        }
    }

    fn remove_keys(&self, keys: &EntityKeys) {
        if let Some(id) = keys.id {
            self.by_id.remove(&id);
        }
        if let Some(guid) = keys.guid {
            self.by_guid.remove(&guid);
        }
        if let Some(name) = &keys.name {
            self.by_name.remove(name);
        }
        for key in &keys.full_names {
            self.by_full_name.remove(key);
        }
    }
}

fn is_negative<K>(_: &K, slot: &CacheSlot) -> bool {
    matches!(slot, CacheSlot::NotFound)
}

fn holds(slot: &CacheSlot, object: &Arc<InfoObject>) -> bool {
    slot.object().is_some_and(|cached| Arc::ptr_eq(cached, object))
}

impl Default for CacheIndexSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ObjectType, TypeDescriptor};

    fn object(id: i64) -> Arc<InfoObject> {
        let descriptor = TypeDescriptor::builder(ObjectType::new("cms.query").expect("type"))
            .id_column("QueryID")
            .build()
            .expect("descriptor");
        Arc::new(
            InfoObject::empty(descriptor)
                .with("QueryID", id)
                .expect("object")
                .freeze(),
        )
    }

    fn keys(id: i64, full_names: &[&str]) -> EntityKeys {
        EntityKeys {
            id: Some(id),
            guid: None,
            name: Some(name_key("q", None)),
            full_names: full_names.iter().map(|key| key.to_string()).collect(),
        }
    }

    #[test]
    fn replace_drops_previous_keys_together() {
        let index = CacheIndexSet::new();
        let generation = index.generation();
        assert!(index.store_loaded(object(1), &keys(1, &["a", "b"]), generation));

        index.replace(object(1), &keys(1, &["c"]), |_| keys(1, &["a", "b"]));

        assert!(index.get_by_full_name("a").is_none());
        assert!(index.get_by_full_name("b").is_none());
        assert!(index.get_by_full_name("c").is_some());
        assert_eq!(index.stats().by_full_name, 1);
    }

    #[test]
    fn writes_fence_out_stale_loads() {
        let index = CacheIndexSet::new();
        let seen = index.generation();
        index.remove(&keys(1, &[]));

        assert!(!index.store_loaded(object(1), &keys(1, &[]), seen));
        assert!(!index.store_missing(IndexKind::FullName, "a", seen));
        assert!(index.is_empty());
    }

    #[test]
    fn negative_slots_are_distinct_from_misses() {
        let index = CacheIndexSet::new();
        assert!(index.get_by_full_name("missing").is_none());

        assert!(index.store_missing(IndexKind::FullName, "missing", index.generation()));
        assert!(matches!(
            index.get_by_full_name("missing"),
            Some(CacheSlot::NotFound)
        ));
    }

    #[test]
    fn invalidation_payload_parses_positionally() {
        let data: Vec<String> = ["7", "Acme", "1", "site1.acme", "b"]
            .iter()
            .map(|item| item.to_string())
            .collect();
        let keys = EntityKeys::from_invalidation_data(&data).expect("parse");
        assert_eq!(keys.id, Some(7));
        assert_eq!(keys.name.as_deref(), Some("1|acme"));
        assert_eq!(keys.full_names, vec!["site1.acme", "b"]);

        let bad = vec!["x".to_string(), String::new(), String::new()];
        assert!(EntityKeys::from_invalidation_data(&bad).is_err());
        assert!(EntityKeys::from_invalidation_data(&bad[..2]).is_err());
    }

    #[test]
    fn name_keys_are_site_scoped() {
        assert_ne!(name_key("Acme", Some(1)), name_key("Acme", None));
        assert_eq!(name_key("ACME", Some(1)), name_key("acme", Some(1)));
    }
}
