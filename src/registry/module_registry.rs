use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::farm::{TaskKind, WebFarmSynchronizer};
use crate::provider::ProviderCatalog;

use super::error::RegistryError;
use super::module::{Module, ModuleCatalog};
use super::read_only::ReadOnlyObjectRegistry;

/// Module lifecycle, command routing and node-wide cache clearing.
pub struct ModuleRegistry {
    modules: Arc<ModuleCatalog>,
    read_only: Arc<ReadOnlyObjectRegistry>,
    providers: Arc<ProviderCatalog>,
    farm: Option<Arc<WebFarmSynchronizer>>,
}

impl ModuleRegistry {
    pub fn new(
        modules: Arc<ModuleCatalog>,
        read_only: Arc<ReadOnlyObjectRegistry>,
        providers: Arc<ProviderCatalog>,
        farm: Option<Arc<WebFarmSynchronizer>>,
    ) -> Self {
        Self {
            modules,
            read_only,
            providers,
            farm,
        }
    }

    pub fn register_module(&self, module: Arc<dyn Module>) -> Result<(), RegistryError> {
        let name = module.name().to_string();
        self.modules.add(module)?;
        info!(module = %name, "Module registered");
        Ok(())
    }

    pub fn module(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.modules
            .entry(name)
            .map(|entry| Arc::clone(entry.module()))
    }

    /// Names in registration order.
    pub fn modules(&self) -> Vec<String> {
        self.modules
            .modules()
            .iter()
            .map(|module| module.name().to_string())
            .collect()
    }

    pub fn read_only_objects(&self) -> &Arc<ReadOnlyObjectRegistry> {
        &self.read_only
    }

    pub fn providers(&self) -> &Arc<ProviderCatalog> {
        &self.providers
    }

    /// Route `command` to `module` on this node.
    pub fn process_command(
        &self,
        module: &str,
        command: &str,
        args: &[Value],
    ) -> Result<Value, RegistryError> {
        let entry = self
            .modules
            .entry(module)
            .ok_or_else(|| RegistryError::module_not_found(module))?;
        let handler = entry
            .commands()
            .get(command)
            .cloned()
            .ok_or_else(|| RegistryError::command_not_found(module, command))?;
        debug!(module, command, args = args.len(), "Processing module command");
        handler(args).map_err(|err| err.in_command(module, command))
    }

    /// Run `command` locally, then replay it on every peer.
    pub async fn broadcast_command(
        &self,
        module: &str,
        command: &str,
        args: &[String],
    ) -> Result<Value, RegistryError> {
        let values: Vec<Value> = args.iter().cloned().map(Value::String).collect();
        let result = self.process_command(module, command, &values)?;
        if let Some(farm) = &self.farm {
            let mut data = Vec::with_capacity(args.len() + 1);
            data.push(command.to_string());
            data.extend(args.iter().cloned());
            farm.create_task(TaskKind::ProcessCommand, module, data, None)
                .await?;
        }
        Ok(result)
    }

    /// Clear every module's and every provider's in-memory caches; with
    /// `log_task`, peers do the same.
    pub async fn clear_hashtables(&self, log_task: bool) -> Result<(), RegistryError> {
        self.clear_local();
        if log_task && let Some(farm) = &self.farm {
            farm.create_task(TaskKind::ClearHashtables, "", Vec::new(), None)
                .await?;
        }
        Ok(())
    }

    pub fn clear_local(&self) {
        for module in self.modules.modules() {
            module.clear_hashtables();
        }
        self.providers.clear_all_local();
        info!(modules = self.modules.modules().len(), "All hashtables cleared");
    }

    /// Teardown in reverse initialization order: providers, prototypes,
    /// modules.
    pub fn clear(&self) {
        self.providers.clear();
        self.read_only.clear();
        self.modules.clear();
    }
}
