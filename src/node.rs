//! Assembly of one web-farm node.
//!
//! Services are created in dependency order: the synchronizer, the module
//! catalog, the read-only object registry, the provider catalog and its
//! providers, the module registry, then the task handlers, inbox and
//! consumer. [`NodeContext::shutdown`] tears them down in reverse.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::Settings;
use crate::domain::{InfoObject, TypeDescriptor};
use crate::farm::{
    ClearHashtablesHandler, ClearReadOnlyObjectsHandler, DeleteFileHandler, FarmError,
    FarmTransport, FileReplica, FileReplicaError, InvalidateObjectHandler,
    InvalidateTypeInfoHandler, ProcessCommandHandler, RemoveReadOnlyObjectHandler, TaskConsumer,
    TaskInbox, TaskKind, UpdateFileHandler, WebFarmSynchronizer, WriteOutcome, sha256_hex,
};
use crate::infra::InfraError;
use crate::provider::{
    ObjectProvider, ObjectProviderBuilder, ObjectStore, ProviderCatalog, ProviderError,
};
use crate::registry::{ModuleCatalog, ModuleRegistry, ReadOnlyObjectRegistry};

const DEFAULT_BATCH_LIMIT: NonZeroUsize = NonZeroUsize::MIN.saturating_add(99);
const DEFAULT_DEDUPE_WINDOW: NonZeroUsize = NonZeroUsize::MIN.saturating_add(1_023);
const DEFAULT_CONSUME_INTERVAL: Duration = Duration::from_secs(1);

pub struct NodeBuilder {
    name: String,
    transport: Arc<dyn FarmTransport>,
    farm_enabled: bool,
    caching_enabled: bool,
    files_root: PathBuf,
    file_sync_enabled: bool,
    batch_limit: NonZeroUsize,
    dedupe_window: NonZeroUsize,
    consume_interval: Duration,
}

impl NodeBuilder {
    pub fn farm_enabled(mut self, enabled: bool) -> Self {
        self.farm_enabled = enabled;
        self
    }

    pub fn caching_enabled(mut self, enabled: bool) -> Self {
        self.caching_enabled = enabled;
        self
    }

    pub fn files(mut self, root: impl Into<PathBuf>, sync_enabled: bool) -> Self {
        self.files_root = root.into();
        self.file_sync_enabled = sync_enabled;
        self
    }

    pub fn batch_limit(mut self, limit: NonZeroUsize) -> Self {
        self.batch_limit = limit;
        self
    }

    pub fn dedupe_window(mut self, window: NonZeroUsize) -> Self {
        self.dedupe_window = window;
        self
    }

    /// Cadence of [`NodeContext::spawn_auto_consume`].
    pub fn consume_interval(mut self, every: Duration) -> Self {
        self.consume_interval = every;
        self
    }

    pub fn build(self) -> Result<NodeContext, FarmError> {
        let farm = Arc::new(WebFarmSynchronizer::new(
            self.name.as_str(),
            self.farm_enabled,
            self.transport,
        ));
        let modules = Arc::new(ModuleCatalog::new());
        let read_only = Arc::new(ReadOnlyObjectRegistry::new(
            Arc::clone(&modules),
            Some(Arc::clone(&farm)),
        ));
        let providers = Arc::new(ProviderCatalog::new());
        let registry = Arc::new(ModuleRegistry::new(
            modules,
            Arc::clone(&read_only),
            Arc::clone(&providers),
            Some(Arc::clone(&farm)),
        ));

        let files = FileReplica::new(self.files_root);
        farm.register(Arc::new(ClearHashtablesHandler::new(&registry)))?;
        farm.register(Arc::new(RemoveReadOnlyObjectHandler::new(&read_only)))?;
        farm.register(Arc::new(ClearReadOnlyObjectsHandler::new(&read_only)))?;
        farm.register(Arc::new(InvalidateTypeInfoHandler::new(&registry)))?;
        farm.register(Arc::new(InvalidateObjectHandler::new(&providers)))?;
        farm.register(Arc::new(UpdateFileHandler::new(
            files.clone(),
            self.file_sync_enabled,
        )))?;
        farm.register(Arc::new(DeleteFileHandler::new(
            files.clone(),
            self.file_sync_enabled,
        )))?;
        farm.register(Arc::new(ProcessCommandHandler::new(&registry)))?;

        let inbox = Arc::new(TaskInbox::new());
        let consumer = Arc::new(TaskConsumer::new(
            Arc::clone(&farm),
            Arc::clone(&inbox),
            self.batch_limit,
            self.dedupe_window,
        ));

        info!(
            node = %self.name,
            farm_enabled = self.farm_enabled,
            caching_enabled = self.caching_enabled,
            file_sync_enabled = self.file_sync_enabled,
            "Node initialized"
        );

        Ok(NodeContext {
            farm,
            read_only,
            providers,
            registry,
            inbox,
            consumer,
            files,
            caching_enabled: self.caching_enabled,
            consume_interval: self.consume_interval,
        })
    }
}

/// Every service of one node, wired together.
pub struct NodeContext {
    farm: Arc<WebFarmSynchronizer>,
    read_only: Arc<ReadOnlyObjectRegistry>,
    providers: Arc<ProviderCatalog>,
    registry: Arc<ModuleRegistry>,
    inbox: Arc<TaskInbox>,
    consumer: Arc<TaskConsumer>,
    files: FileReplica,
    caching_enabled: bool,
    consume_interval: Duration,
}

impl NodeContext {
    pub fn builder(name: impl Into<String>, transport: Arc<dyn FarmTransport>) -> NodeBuilder {
        NodeBuilder {
            name: name.into(),
            transport,
            farm_enabled: true,
            caching_enabled: true,
            files_root: PathBuf::from("files"),
            file_sync_enabled: false,
            batch_limit: DEFAULT_BATCH_LIMIT,
            dedupe_window: DEFAULT_DEDUPE_WINDOW,
            consume_interval: DEFAULT_CONSUME_INTERVAL,
        }
    }

    /// A node with one provider per configured type, all backed by `store`.
    pub fn from_settings(
        settings: &Settings,
        store: Arc<dyn ObjectStore>,
        transport: Arc<dyn FarmTransport>,
    ) -> Result<Self, InfraError> {
        let node = Self::builder(settings.node.name.as_str(), transport)
            .farm_enabled(settings.farm.enabled)
            .caching_enabled(settings.cache.enabled)
            .files(
                settings.farm.files_root.clone(),
                settings.farm.file_sync_enabled,
            )
            .batch_limit(settings.farm.consume_batch_limit)
            .dedupe_window(settings.farm.dedupe_window)
            .consume_interval(settings.farm.auto_consume_interval)
            .build()?;
        for descriptor in &settings.types {
            let provider = node
                .provider_builder(Arc::clone(descriptor), Arc::clone(&store))
                .build();
            node.add_provider(provider)?;
        }
        Ok(node)
    }

    /// A provider builder already wired to this node's farm and cache switch.
    pub fn provider_builder(
        &self,
        descriptor: Arc<TypeDescriptor>,
        store: Arc<dyn ObjectStore>,
    ) -> ObjectProviderBuilder {
        ObjectProvider::builder(descriptor, store)
            .farm(Arc::clone(&self.farm))
            .caching_enabled(self.caching_enabled)
    }

    /// Register `provider` and the empty prototype of its type.
    pub fn add_provider(
        &self,
        provider: ObjectProvider,
    ) -> Result<Arc<ObjectProvider>, ProviderError> {
        let provider = Arc::new(provider);
        self.providers.register(Arc::clone(&provider))?;
        let descriptor = Arc::clone(provider.descriptor());
        self.read_only
            .register_factory(descriptor.object_type().clone(), move || {
                Some(InfoObject::empty(Arc::clone(&descriptor)))
            });
        Ok(provider)
    }

    pub fn name(&self) -> &str {
        self.farm.node()
    }

    pub fn farm(&self) -> &Arc<WebFarmSynchronizer> {
        &self.farm
    }

    pub fn read_only_objects(&self) -> &Arc<ReadOnlyObjectRegistry> {
        &self.read_only
    }

    pub fn providers(&self) -> &Arc<ProviderCatalog> {
        &self.providers
    }

    pub fn modules(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn inbox(&self) -> &Arc<TaskInbox> {
        &self.inbox
    }

    pub fn consumer(&self) -> &Arc<TaskConsumer> {
        &self.consumer
    }

    pub fn files(&self) -> &FileReplica {
        &self.files
    }

    /// Write a file locally and replicate it to peers.
    pub async fn replicate_file(&self, path: &str, content: Vec<u8>) -> Result<(), FarmError> {
        let digest = sha256_hex(&content);
        let outcome = self
            .files
            .write(path, &digest, &content)
            .await
            .map_err(|err| file_error(TaskKind::UpdateFile, path, err))?;
        debug!(path, written = outcome == WriteOutcome::Written, "File written locally");
        self.farm
            .create_task(
                TaskKind::UpdateFile,
                path,
                vec![path.to_string(), digest],
                Some(content),
            )
            .await?;
        Ok(())
    }

    /// Delete a file locally and on every peer.
    pub async fn remove_file(&self, path: &str) -> Result<(), FarmError> {
        self.files
            .delete(path)
            .await
            .map_err(|err| file_error(TaskKind::DeleteFile, path, err))?;
        self.farm
            .create_task(TaskKind::DeleteFile, path, vec![path.to_string()], None)
            .await?;
        Ok(())
    }

    /// Drain the inbox on the configured cadence until the handle is aborted.
    pub fn spawn_auto_consume(&self) -> JoinHandle<()> {
        let consumer = Arc::clone(&self.consumer);
        let every = self.consume_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                consumer.consume().await;
            }
        })
    }

    /// Teardown: handlers, queued tasks, then the registries.
    pub fn shutdown(&self) {
        self.farm.clear();
        self.inbox.clear();
        self.registry.clear();
        info!(node = %self.farm.node(), "Node shut down");
    }
}

fn file_error(kind: TaskKind, path: &str, err: FileReplicaError) -> FarmError {
    match err {
        FileReplicaError::Io(err) => FarmError::Io(err),
        other => FarmError::execute(kind, path, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ObjectType;
    use crate::farm::{FarmTask, NullTransport};
    use crate::infra::MemoryStore;

    fn descriptor(object_type: &str) -> Arc<TypeDescriptor> {
        TypeDescriptor::builder(ObjectType::new(object_type).expect("type"))
            .id_column("ID")
            .name_column("CodeName")
            .build()
            .expect("descriptor")
    }

    #[test]
    fn registers_every_builtin_handler() {
        let node = NodeContext::builder("node-a", Arc::new(NullTransport))
            .build()
            .expect("node");
        assert_eq!(node.farm().registered_kinds(), TaskKind::ALL.to_vec());
    }

    #[test]
    fn providers_expose_prototypes() {
        let node = NodeContext::builder("node-a", Arc::new(NullTransport))
            .build()
            .expect("node");
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
        let provider = node
            .provider_builder(descriptor("cms.user"), store)
            .build();
        node.add_provider(provider).expect("add");

        let prototype = node
            .read_only_objects()
            .get_read_only_object("CMS.USER", true)
            .expect("lookup")
            .expect("prototype");
        assert!(prototype.is_frozen());
        assert!(node.providers().get_by_name("cms.user").is_some());
    }

    #[tokio::test]
    async fn auto_consume_drains_the_inbox() {
        let node = NodeContext::builder("node-a", Arc::new(NullTransport))
            .consume_interval(Duration::from_millis(10))
            .build()
            .expect("node");
        node.inbox().push(FarmTask::new(
            TaskKind::ClearHashtables,
            "",
            Vec::new(),
            None,
            "node-b",
        ));

        let worker = node.spawn_auto_consume();
        for _ in 0..100 {
            if node.inbox().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        worker.abort();

        assert!(node.inbox().is_empty());
    }

    #[tokio::test]
    async fn shutdown_releases_services() {
        let node = NodeContext::builder("node-a", Arc::new(NullTransport))
            .build()
            .expect("node");
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
        node.add_provider(node.provider_builder(descriptor("cms.user"), store).build())
            .expect("add");

        node.shutdown();

        assert!(node.farm().registered_kinds().is_empty());
        assert!(node.providers().is_empty());
    }
}
