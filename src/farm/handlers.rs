//! Built-in receivers for every [`TaskKind`].
//!
//! Handlers hold weak references to the services they act on: those services
//! own the synchronizer, which owns the handlers.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::provider::{EntityKeys, ProviderCatalog};
use crate::registry::{ModuleRegistry, ReadOnlyObjectRegistry};

use super::error::FarmError;
use super::files::{FileReplica, FileReplicaError, WriteOutcome};
use super::handler::TaskHandler;
use super::task::{FarmTask, TaskKind};

fn upgrade<T>(service: &Weak<T>, task: &FarmTask) -> Result<Arc<T>, FarmError> {
    service
        .upgrade()
        .ok_or_else(|| FarmError::execute(task.kind(), task.target(), "service has been shut down"))
}

fn replica_error(task: &FarmTask, err: FileReplicaError) -> FarmError {
    match err {
        FileReplicaError::Io(err) => FarmError::execute(task.kind(), task.target(), err.to_string()),
        other => FarmError::invalid_payload(task.kind(), other.to_string()),
    }
}

/// Target `""` clears every module and provider; otherwise one provider.
pub struct ClearHashtablesHandler {
    registry: Weak<ModuleRegistry>,
}

impl ClearHashtablesHandler {
    pub fn new(registry: &Arc<ModuleRegistry>) -> Self {
        Self {
            registry: Arc::downgrade(registry),
        }
    }
}

#[async_trait]
impl TaskHandler for ClearHashtablesHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::ClearHashtables
    }

    async fn execute(&self, task: &FarmTask) -> Result<(), FarmError> {
        let registry = upgrade(&self.registry, task)?;
        if task.target().is_empty() {
            registry.clear_local();
            return Ok(());
        }
        match registry.providers().get_by_name(task.target()) {
            Some(provider) => provider.clear_local(),
            None => debug!(object_type = task.target(), "No provider to clear"),
        }
        Ok(())
    }
}

pub struct RemoveReadOnlyObjectHandler {
    registry: Weak<ReadOnlyObjectRegistry>,
}

impl RemoveReadOnlyObjectHandler {
    pub fn new(registry: &Arc<ReadOnlyObjectRegistry>) -> Self {
        Self {
            registry: Arc::downgrade(registry),
        }
    }
}

#[async_trait]
impl TaskHandler for RemoveReadOnlyObjectHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::RemoveReadOnlyObject
    }

    async fn execute(&self, task: &FarmTask) -> Result<(), FarmError> {
        upgrade(&self.registry, task)?
            .remove_read_only_object(task.target(), false)
            .await
            .map_err(|err| FarmError::execute(task.kind(), task.target(), err.to_string()))
    }
}

pub struct ClearReadOnlyObjectsHandler {
    registry: Weak<ReadOnlyObjectRegistry>,
}

impl ClearReadOnlyObjectsHandler {
    pub fn new(registry: &Arc<ReadOnlyObjectRegistry>) -> Self {
        Self {
            registry: Arc::downgrade(registry),
        }
    }
}

#[async_trait]
impl TaskHandler for ClearReadOnlyObjectsHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::ClearReadOnlyObjects
    }

    async fn execute(&self, task: &FarmTask) -> Result<(), FarmError> {
        upgrade(&self.registry, task)?.clear_local();
        Ok(())
    }
}

/// A type's shape changed: drop its prototype and everything cached for it.
pub struct InvalidateTypeInfoHandler {
    registry: Weak<ModuleRegistry>,
}

impl InvalidateTypeInfoHandler {
    pub fn new(registry: &Arc<ModuleRegistry>) -> Self {
        Self {
            registry: Arc::downgrade(registry),
        }
    }
}

#[async_trait]
impl TaskHandler for InvalidateTypeInfoHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::InvalidateTypeInfo
    }

    async fn execute(&self, task: &FarmTask) -> Result<(), FarmError> {
        let registry = upgrade(&self.registry, task)?;
        registry
            .read_only_objects()
            .remove_read_only_object(task.target(), false)
            .await
            .map_err(|err| FarmError::execute(task.kind(), task.target(), err.to_string()))?;
        if let Some(provider) = registry.providers().get_by_name(task.target()) {
            provider.clear_local();
        }
        Ok(())
    }
}

/// Evicts one object by the keys carried in `data = [id, name, site, full names...]`.
pub struct InvalidateObjectHandler {
    providers: Weak<ProviderCatalog>,
}

impl InvalidateObjectHandler {
    pub fn new(providers: &Arc<ProviderCatalog>) -> Self {
        Self {
            providers: Arc::downgrade(providers),
        }
    }
}

#[async_trait]
impl TaskHandler for InvalidateObjectHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::InvalidateObject
    }

    async fn execute(&self, task: &FarmTask) -> Result<(), FarmError> {
        let keys = EntityKeys::from_invalidation_data(task.data())
            .map_err(|reason| FarmError::invalid_payload(task.kind(), reason))?;
        let providers = upgrade(&self.providers, task)?;
        match providers.get_by_name(task.target()) {
            Some(provider) => provider.invalidate_object(&keys),
            None => debug!(object_type = task.target(), "No provider to invalidate"),
        }
        Ok(())
    }
}

/// `data = [path, sha256]`, content in the binary payload.
pub struct UpdateFileHandler {
    replica: FileReplica,
    enabled: bool,
}

impl UpdateFileHandler {
    pub fn new(replica: FileReplica, enabled: bool) -> Self {
        Self { replica, enabled }
    }
}

#[async_trait]
impl TaskHandler for UpdateFileHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::UpdateFile
    }

    fn condition(&self, _task: &FarmTask) -> bool {
        self.enabled
    }

    async fn execute(&self, task: &FarmTask) -> Result<(), FarmError> {
        let [path, digest] = task.data() else {
            return Err(FarmError::malformed(task.kind(), task.kind().arity(), task.data().len()));
        };
        let payload = task
            .binary_data()
            .ok_or_else(|| FarmError::invalid_payload(task.kind(), "missing binary data"))?;
        let outcome = self
            .replica
            .write(path, digest, payload)
            .await
            .map_err(|err| replica_error(task, err))?;
        debug!(
            path = %path,
            written = outcome == WriteOutcome::Written,
            "File replica updated"
        );
        Ok(())
    }
}

/// `data = [path]`.
pub struct DeleteFileHandler {
    replica: FileReplica,
    enabled: bool,
}

impl DeleteFileHandler {
    pub fn new(replica: FileReplica, enabled: bool) -> Self {
        Self { replica, enabled }
    }
}

#[async_trait]
impl TaskHandler for DeleteFileHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::DeleteFile
    }

    fn condition(&self, _task: &FarmTask) -> bool {
        self.enabled
    }

    async fn execute(&self, task: &FarmTask) -> Result<(), FarmError> {
        let [path] = task.data() else {
            return Err(FarmError::malformed(task.kind(), task.kind().arity(), task.data().len()));
        };
        self.replica
            .delete(path)
            .await
            .map_err(|err| replica_error(task, err))
    }
}

/// Target is the module, `data = [command, args...]`.
pub struct ProcessCommandHandler {
    registry: Weak<ModuleRegistry>,
}

impl ProcessCommandHandler {
    pub fn new(registry: &Arc<ModuleRegistry>) -> Self {
        Self {
            registry: Arc::downgrade(registry),
        }
    }
}

#[async_trait]
impl TaskHandler for ProcessCommandHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::ProcessCommand
    }

    async fn execute(&self, task: &FarmTask) -> Result<(), FarmError> {
        let Some((command, args)) = task.data().split_first() else {
            return Err(FarmError::malformed(task.kind(), task.kind().arity(), 0));
        };
        let args: Vec<Value> = args.iter().cloned().map(Value::String).collect();
        upgrade(&self.registry, task)?
            .process_command(task.target(), command, &args)
            .map(|_| ())
            .map_err(|err| FarmError::execute(task.kind(), task.target(), err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::farm::files::sha256_hex;
    use crate::registry::{CommandTable, Module, ModuleCatalog, RegistryError};

    fn task(kind: TaskKind, target: &str, data: &[&str], binary: Option<Vec<u8>>) -> FarmTask {
        FarmTask::new(
            kind,
            target,
            data.iter().map(|item| item.to_string()).collect(),
            binary,
            "node-b",
        )
    }

    struct Counter {
        runs: Arc<AtomicUsize>,
    }

    impl Module for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn register_commands(&self, commands: &mut CommandTable) {
            let runs = Arc::clone(&self.runs);
            commands.register("bump", move |args| {
                let by = args
                    .first()
                    .and_then(Value::as_str)
                    .and_then(|value| value.parse::<usize>().ok())
                    .ok_or_else(|| RegistryError::command("bump needs a number"))?;
                runs.fetch_add(by, Ordering::SeqCst);
                Ok(Value::Null)
            });
        }
    }

    fn module_registry(runs: Arc<AtomicUsize>) -> Arc<ModuleRegistry> {
        let modules = Arc::new(ModuleCatalog::new());
        let read_only = Arc::new(ReadOnlyObjectRegistry::new(Arc::clone(&modules), None));
        let registry = Arc::new(ModuleRegistry::new(
            modules,
            read_only,
            Arc::new(ProviderCatalog::new()),
            None,
        ));
        registry
            .register_module(Arc::new(Counter { runs }))
            .expect("register");
        registry
    }

    #[tokio::test]
    async fn process_command_runs_module_command() {
        let runs = Arc::new(AtomicUsize::new(0));
        let registry = module_registry(Arc::clone(&runs));
        let handler = ProcessCommandHandler::new(&registry);

        handler
            .execute(&task(TaskKind::ProcessCommand, "counter", &["bump", "3"], None))
            .await
            .expect("execute");
        let err = handler
            .execute(&task(TaskKind::ProcessCommand, "counter", &["bump", "x"], None))
            .await
            .expect_err("bad argument");

        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert!(matches!(err, FarmError::Execute { .. }));
    }

    #[tokio::test]
    async fn dropped_services_fail_execution() {
        let registry = module_registry(Arc::new(AtomicUsize::new(0)));
        let handler = ClearHashtablesHandler::new(&registry);
        drop(registry);

        let err = handler
            .execute(&task(TaskKind::ClearHashtables, "", &[], None))
            .await
            .expect_err("gone");
        assert!(matches!(err, FarmError::Execute { .. }));
    }

    #[tokio::test]
    async fn invalidate_object_rejects_bad_keys() {
        let providers = Arc::new(ProviderCatalog::new());
        let handler = InvalidateObjectHandler::new(&providers);
        let err = handler
            .execute(&task(TaskKind::InvalidateObject, "cms.user", &["x", "", ""], None))
            .await
            .expect_err("bad id");
        assert!(err.is_payload_error());
    }

    #[tokio::test]
    async fn file_handlers_replicate_and_delete() {
        let dir = tempfile::tempdir().expect("tempdir");
        let update = UpdateFileHandler::new(FileReplica::new(dir.path()), true);
        let delete = DeleteFileHandler::new(FileReplica::new(dir.path()), true);
        let digest = sha256_hex(b"body");
        let write = task(
            TaskKind::UpdateFile,
            "media",
            &["media/logo.png", digest.as_str()],
            Some(b"body".to_vec()),
        );

        update.execute(&write).await.expect("write");
        update.execute(&write).await.expect("write again");
        assert_eq!(
            std::fs::read(dir.path().join("media/logo.png")).expect("read"),
            b"body"
        );

        let remove = task(TaskKind::DeleteFile, "media", &["media/logo.png"], None);
        delete.execute(&remove).await.expect("delete");
        delete.execute(&remove).await.expect("delete again");
        assert!(!dir.path().join("media/logo.png").exists());
    }

    #[tokio::test]
    async fn unsafe_paths_are_payload_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let update = UpdateFileHandler::new(FileReplica::new(dir.path()), true);
        let digest = sha256_hex(b"x");
        let err = update
            .execute(&task(
                TaskKind::UpdateFile,
                "media",
                &["../escape", digest.as_str()],
                Some(b"x".to_vec()),
            ))
            .await
            .expect_err("escape");
        assert!(err.is_payload_error());
    }

    #[test]
    fn file_sync_switch_drives_condition() {
        let dir = tempfile::tempdir().expect("tempdir");
        let handler = DeleteFileHandler::new(FileReplica::new(dir.path()), false);
        assert!(!handler.condition(&task(TaskKind::DeleteFile, "", &["a"], None)));
    }
}
