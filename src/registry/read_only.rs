//! Frozen prototype instances, one per object type.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, info};

use crate::domain::{DataRow, InfoObject, ObjectType};
use crate::farm::{TaskKind, WebFarmSynchronizer};
use crate::lock::{mutex_lock, rw_read, rw_write};

use super::error::RegistryError;
use super::module::ModuleCatalog;

const SOURCE: &str = "registry::read_only";

/// Factory of a prototype instance for one type.
pub type ObjectFactory = Arc<dyn Fn() -> Option<InfoObject> + Send + Sync>;

#[derive(Clone)]
enum Slot {
    Object(Arc<InfoObject>),
    /// The type was searched for and is not resolvable.
    Empty,
}

/// Get-or-create registry of frozen prototypes.
///
/// Reads take a shared lock only. The first request for a type searches the
/// factory table, then every module in registration order, under that type's
/// construction gate, re-checked after acquisition, so each type is built at
/// most once even under concurrent first access. Negative results are cached
/// as well. Evictions bump a generation counter; a prototype whose
/// construction overlapped an eviction is returned to its caller but not
/// cached.
pub struct ReadOnlyObjectRegistry {
    objects: RwLock<HashMap<ObjectType, Slot>>,
    construction: Mutex<HashMap<ObjectType, Arc<Mutex<()>>>>,
    generation: AtomicU64,
    factories: RwLock<HashMap<ObjectType, ObjectFactory>>,
    modules: Arc<ModuleCatalog>,
    farm: Option<Arc<WebFarmSynchronizer>>,
}

impl ReadOnlyObjectRegistry {
    pub fn new(modules: Arc<ModuleCatalog>, farm: Option<Arc<WebFarmSynchronizer>>) -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            construction: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            factories: RwLock::new(HashMap::new()),
            modules,
            farm,
        }
    }

    /// Register the factory consulted first for `object_type`. Replaces any
    /// earlier factory and evicts a prototype already built for the type.
    pub fn register_factory(
        &self,
        object_type: ObjectType,
        factory: impl Fn() -> Option<InfoObject> + Send + Sync + 'static,
    ) {
        rw_write(&self.factories, SOURCE, "register_factory")
            .insert(object_type.clone(), Arc::new(factory));
        self.remove_local(&object_type);
    }

    pub fn registered_types(&self) -> Vec<ObjectType> {
        let mut types: Vec<_> = rw_read(&self.factories, SOURCE, "registered_types")
            .keys()
            .cloned()
            .collect();
        types.sort_by(|a, b| a.key().cmp(b.key()));
        types
    }

    /// The frozen prototype of `object_type`. Unknown types yield `None`,
    /// or [`RegistryError::TypeNotFound`] when `exception_if_not_found`.
    pub fn get_read_only_object(
        &self,
        object_type: &str,
        exception_if_not_found: bool,
    ) -> Result<Option<Arc<InfoObject>>, RegistryError> {
        let found = match ObjectType::new(object_type) {
            Ok(object_type) => self.get_or_create(&object_type),
            Err(_) => None,
        };
        match found {
            None if exception_if_not_found => Err(RegistryError::type_not_found(object_type)),
            found => Ok(found),
        }
    }

    /// A new mutable instance cloned from the prototype.
    pub fn new_object(&self, object_type: &str) -> Result<InfoObject, RegistryError> {
        self.get_read_only_object(object_type, true)?
            .map(|prototype| prototype.to_mutable())
            .ok_or_else(|| RegistryError::type_not_found(object_type))
    }

    /// A new mutable instance hydrated from `row`.
    pub fn new_object_from_row(
        &self,
        row: DataRow,
        object_type: &str,
    ) -> Result<InfoObject, RegistryError> {
        let mut object = self.new_object(object_type)?;
        object.merge_row(row)?;
        Ok(object)
    }

    /// Evict one prototype; with `log_task`, peers evict it too.
    pub async fn remove_read_only_object(
        &self,
        object_type: &str,
        log_task: bool,
    ) -> Result<(), RegistryError> {
        if let Ok(parsed) = ObjectType::new(object_type) {
            self.remove_local(&parsed);
        }
        if log_task && let Some(farm) = &self.farm {
            farm.create_task(TaskKind::RemoveReadOnlyObject, object_type, Vec::new(), None)
                .await?;
        }
        Ok(())
    }

    /// Evict every prototype; with `log_task`, peers do the same.
    pub async fn clear_read_only_objects(&self, log_task: bool) -> Result<(), RegistryError> {
        self.clear_local();
        if log_task && let Some(farm) = &self.farm {
            farm.create_task(TaskKind::ClearReadOnlyObjects, "", Vec::new(), None)
                .await?;
        }
        Ok(())
    }

    pub fn remove_local(&self, object_type: &ObjectType) {
        let removed = {
            let mut objects = rw_write(&self.objects, SOURCE, "remove_local");
            self.generation.fetch_add(1, Ordering::SeqCst);
            objects.remove(object_type)
        };
        if removed.is_some() {
            debug!(object_type = %object_type, "Read-only object evicted");
        }
    }

    pub fn clear_local(&self) {
        let mut objects = rw_write(&self.objects, SOURCE, "clear_local");
        self.generation.fetch_add(1, Ordering::SeqCst);
        let count = objects.len();
        objects.clear();
        info!(count, "Read-only objects cleared");
    }

    /// Teardown: forget prototypes and factories.
    pub fn clear(&self) {
        self.clear_local();
        rw_write(&self.factories, SOURCE, "clear").clear();
    }

    pub fn len(&self) -> usize {
        rw_read(&self.objects, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cached(&self, object_type: &ObjectType) -> Option<Slot> {
        rw_read(&self.objects, SOURCE, "cached")
            .get(object_type)
            .cloned()
    }

    fn get_or_create(&self, object_type: &ObjectType) -> Option<Arc<InfoObject>> {
        if let Some(slot) = self.cached(object_type) {
            return into_object(slot);
        }

        let gate = self.construction_gate(object_type);
        let _building = mutex_lock(&*gate, SOURCE, "construct");
        if let Some(slot) = self.cached(object_type) {
            return into_object(slot);
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let slot = match self.construct(object_type) {
            Some(object) => Slot::Object(Arc::new(object.freeze())),
            None => Slot::Empty,
        };

        let mut objects = rw_write(&self.objects, SOURCE, "insert");
        let current = self.generation.load(Ordering::SeqCst) == generation;
        if current {
            objects.insert(object_type.clone(), slot.clone());
        }
        drop(objects);
        debug!(
            object_type = %object_type,
            found = matches!(slot, Slot::Object(_)),
            cached = current,
            "Read-only object constructed"
        );
        into_object(slot)
    }

    fn construction_gate(&self, object_type: &ObjectType) -> Arc<Mutex<()>> {
        let mut gates = mutex_lock(&self.construction, SOURCE, "construction_gate");
        Arc::clone(gates.entry(object_type.clone()).or_default())
    }

    fn construct(&self, object_type: &ObjectType) -> Option<InfoObject> {
        let factory = rw_read(&self.factories, SOURCE, "factory")
            .get(object_type)
            .cloned();
        if let Some(object) = factory.and_then(|factory| factory()) {
            return Some(object);
        }
        self.modules
            .modules()
            .iter()
            .find_map(|module| module.get_object(object_type))
    }
}

fn into_object(slot: Slot) -> Option<Arc<InfoObject>> {
    match slot {
        Slot::Object(object) => Some(object),
        Slot::Empty => None,
    }
}
