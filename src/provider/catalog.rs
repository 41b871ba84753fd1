use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::domain::ObjectType;
use crate::lock::{rw_read, rw_write};

use super::error::ProviderError;
use super::index::IndexStats;
use super::object_provider::ObjectProvider;

const SOURCE: &str = "provider::catalog";

/// Every provider of one node, keyed by object type.
#[derive(Default)]
pub struct ProviderCatalog {
    providers: RwLock<HashMap<ObjectType, Arc<ObjectProvider>>>,
}

impl ProviderCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, provider: Arc<ObjectProvider>) -> Result<(), ProviderError> {
        let object_type = provider.descriptor().object_type().clone();
        let mut providers = rw_write(&self.providers, SOURCE, "register");
        if providers.contains_key(&object_type) {
            return Err(ProviderError::AlreadyRegistered {
                object_type: object_type.to_string(),
            });
        }
        providers.insert(object_type, provider);
        Ok(())
    }

    pub fn get(&self, object_type: &ObjectType) -> Option<Arc<ObjectProvider>> {
        rw_read(&self.providers, SOURCE, "get")
            .get(object_type)
            .cloned()
    }

    /// Lookup by type name; unknown or malformed names yield `None`.
    pub fn get_by_name(&self, object_type: &str) -> Option<Arc<ObjectProvider>> {
        let object_type = ObjectType::new(object_type).ok()?;
        self.get(&object_type)
    }

    /// All providers, ordered by type key.
    pub fn all(&self) -> Vec<Arc<ObjectProvider>> {
        let mut providers: Vec<_> = rw_read(&self.providers, SOURCE, "all")
            .values()
            .cloned()
            .collect();
        providers.sort_by(|a, b| {
            a.descriptor()
                .object_type()
                .key()
                .cmp(b.descriptor().object_type().key())
        });
        providers
    }

    pub fn len(&self) -> usize {
        rw_read(&self.providers, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every index of every provider on this node.
    pub fn clear_all_local(&self) {
        for provider in self.all() {
            provider.clear_local();
        }
    }

    pub fn stats(&self) -> Vec<(ObjectType, IndexStats)> {
        self.all()
            .into_iter()
            .map(|provider| (provider.descriptor().object_type().clone(), provider.stats()))
            .collect()
    }

    /// Teardown: forget every provider and its subscribers.
    pub fn clear(&self) {
        let providers: Vec<_> = rw_write(&self.providers, SOURCE, "clear")
            .drain()
            .map(|(_, provider)| provider)
            .collect();
        for provider in providers {
            provider.events().clear();
            provider.clear_local();
        }
    }
}
