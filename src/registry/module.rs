//! Feature modules and their command tables.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use once_cell::sync::OnceCell;
use serde_json::Value;
use tracing::debug;

use crate::domain::{InfoObject, ObjectType};
use crate::lock::{rw_read, rw_write};

use super::error::RegistryError;

const SOURCE: &str = "registry::module";

pub type CommandFn = Arc<dyn Fn(&[Value]) -> Result<Value, RegistryError> + Send + Sync>;

/// Named commands of one module; names are case-insensitive.
#[derive(Default)]
pub struct CommandTable {
    commands: HashMap<String, CommandFn>,
}

impl CommandTable {
    pub fn register(
        &mut self,
        name: &str,
        command: impl Fn(&[Value]) -> Result<Value, RegistryError> + Send + Sync + 'static,
    ) {
        self.commands.insert(name.to_lowercase(), Arc::new(command));
    }

    pub fn get(&self, name: &str) -> Option<&CommandFn> {
        self.commands.get(&name.to_lowercase())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.commands.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// A feature module plugged into the registries.
pub trait Module: Send + Sync {
    fn name(&self) -> &str;

    /// Prototype instance of `object_type` when this module owns the type.
    ///
    /// Runs under the registry's construction gate for `object_type`: it may
    /// request prototypes of other types, but not of `object_type` itself.
    fn get_object(&self, _object_type: &ObjectType) -> Option<InfoObject> {
        None
    }

    /// Drop the module's own in-memory caches.
    fn clear_hashtables(&self) {}

    /// Called once, on first command dispatch to this module.
    fn register_commands(&self, _commands: &mut CommandTable) {}
}

pub(crate) struct ModuleEntry {
    module: Arc<dyn Module>,
    commands: OnceCell<CommandTable>,
}

impl ModuleEntry {
    pub(crate) fn module(&self) -> &Arc<dyn Module> {
        &self.module
    }

    /// Built on first use; concurrent first callers build it once.
    pub(crate) fn commands(&self) -> &CommandTable {
        self.commands.get_or_init(|| {
            let mut table = CommandTable::default();
            self.module.register_commands(&mut table);
            debug!(
                module = self.module.name(),
                commands = table.len(),
                "Module command table built"
            );
            table
        })
    }
}

/// Registered modules in registration order, shared by the read-only object
/// registry (prototype lookup) and the module registry (commands).
#[derive(Default)]
pub struct ModuleCatalog {
    entries: RwLock<Vec<Arc<ModuleEntry>>>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, module: Arc<dyn Module>) -> Result<(), RegistryError> {
        let mut entries = rw_write(&self.entries, SOURCE, "add");
        if entries
            .iter()
            .any(|entry| entry.module.name().eq_ignore_ascii_case(module.name()))
        {
            return Err(RegistryError::ModuleAlreadyRegistered {
                module: module.name().to_string(),
            });
        }
        entries.push(Arc::new(ModuleEntry {
            module,
            commands: OnceCell::new(),
        }));
        Ok(())
    }

    pub(crate) fn entry(&self, name: &str) -> Option<Arc<ModuleEntry>> {
        rw_read(&self.entries, SOURCE, "entry")
            .iter()
            .find(|entry| entry.module.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    pub fn modules(&self) -> Vec<Arc<dyn Module>> {
        rw_read(&self.entries, SOURCE, "modules")
            .iter()
            .map(|entry| Arc::clone(&entry.module))
            .collect()
    }

    pub fn clear(&self) {
        rw_write(&self.entries, SOURCE, "clear").clear();
    }
}
