//! Task registration, creation and receiver-side dispatch.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use metrics::counter;
use tracing::{debug, info};

use crate::lock::{rw_read, rw_write};

use super::error::FarmError;
use super::handler::TaskHandler;
use super::task::{FarmTask, TaskKind};
use super::transport::FarmTransport;

const SOURCE: &str = "farm::synchronizer";

pub(crate) const METRIC_TASK_CREATED: &str = "infocache_farm_task_created_total";
pub(crate) const METRIC_TASK_APPLIED: &str = "infocache_farm_task_applied_total";
pub(crate) const METRIC_TASK_FAILED: &str = "infocache_farm_task_failed_total";
pub(crate) const METRIC_TASK_SKIPPED: &str = "infocache_farm_task_skipped_total";

/// Result of applying one received task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Applied,
    /// Produced by this node; its effect is already in place.
    SkippedOwnOrigin,
    /// The receiver-side condition rejected the task.
    SkippedCondition,
    /// Already applied recently.
    SkippedDuplicate,
}

impl TaskOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::SkippedOwnOrigin => "own_origin",
            Self::SkippedCondition => "condition",
            Self::SkippedDuplicate => "duplicate",
        }
    }
}

/// One node's endpoint of the web farm.
pub struct WebFarmSynchronizer {
    node: String,
    enabled: bool,
    handlers: RwLock<HashMap<TaskKind, Arc<dyn TaskHandler>>>,
    transport: Arc<dyn FarmTransport>,
}

impl WebFarmSynchronizer {
    pub fn new(node: impl Into<String>, enabled: bool, transport: Arc<dyn FarmTransport>) -> Self {
        Self {
            node: node.into(),
            enabled,
            handlers: RwLock::new(HashMap::new()),
            transport,
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Associate a task kind with its handler. A second registration for the
    /// same kind is rejected.
    pub fn register(&self, handler: Arc<dyn TaskHandler>) -> Result<(), FarmError> {
        let kind = handler.kind();
        let mut handlers = rw_write(&self.handlers, SOURCE, "register");
        if handlers.contains_key(&kind) {
            return Err(FarmError::AlreadyRegistered { kind });
        }
        handlers.insert(kind, handler);
        debug!(task_kind = %kind, node = %self.node, "Farm task handler registered");
        Ok(())
    }

    pub fn is_registered(&self, kind: TaskKind) -> bool {
        rw_read(&self.handlers, SOURCE, "is_registered").contains_key(&kind)
    }

    pub fn registered_kinds(&self) -> Vec<TaskKind> {
        let handlers = rw_read(&self.handlers, SOURCE, "registered_kinds");
        TaskKind::ALL
            .into_iter()
            .filter(|kind| handlers.contains_key(kind))
            .collect()
    }

    /// Remove every handler.
    pub fn clear(&self) {
        rw_write(&self.handlers, SOURCE, "clear").clear();
    }

    fn handler(&self, kind: TaskKind) -> Result<Arc<dyn TaskHandler>, FarmError> {
        rw_read(&self.handlers, SOURCE, "handler")
            .get(&kind)
            .cloned()
            .ok_or(FarmError::HandlerNotRegistered { kind })
    }

    /// Broadcast a task describing a mutation already applied locally.
    ///
    /// Returns `None` when the farm is disabled or the handler's condition
    /// rejects the task on this node.
    pub async fn create_task(
        &self,
        kind: TaskKind,
        target: impl Into<String>,
        data: Vec<String>,
        binary_data: Option<Vec<u8>>,
    ) -> Result<Option<FarmTask>, FarmError> {
        let target = target.into();
        if !self.enabled {
            debug!(task_kind = %kind, target = %target, "Farm task skipped: farm disabled");
            return Ok(None);
        }

        let handler = self.handler(kind)?;
        let arity = kind.arity();
        if !arity.accepts(data.len()) {
            return Err(FarmError::malformed(kind, arity, data.len()));
        }

        let task = FarmTask::new(kind, target, data, binary_data, self.node.as_str());
        if !handler.condition(&task) {
            debug!(
                task_id = %task.id(),
                task_kind = %kind,
                target = %task.target(),
                "Farm task skipped: condition not met"
            );
            return Ok(None);
        }

        self.transport.broadcast(&task).await?;
        counter!(METRIC_TASK_CREATED, "kind" => kind.as_str()).increment(1);
        info!(
            task_id = %task.id(),
            task_kind = %kind,
            target = %task.target(),
            data_len = task.data().len(),
            "Farm task created"
        );
        Ok(Some(task))
    }

    /// Apply a task received from a peer.
    ///
    /// Payload arity is checked before the handler runs; a mismatch fails
    /// with [`FarmError::MalformedPayload`] without side effects.
    pub async fn apply(&self, task: &FarmTask) -> Result<TaskOutcome, FarmError> {
        let kind = task.kind();
        if task.origin() == self.node {
            return Ok(TaskOutcome::SkippedOwnOrigin);
        }

        let handler = self.handler(kind)?;
        let arity = kind.arity();
        if !arity.accepts(task.data().len()) {
            return Err(FarmError::malformed(kind, arity, task.data().len()));
        }

        if !handler.condition(task) {
            return Ok(TaskOutcome::SkippedCondition);
        }

        handler.execute(task).await?;
        Ok(TaskOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<FarmTask>>,
    }

    #[async_trait]
    impl FarmTransport for Recorder {
        async fn broadcast(&self, task: &FarmTask) -> Result<(), FarmError> {
            self.sent.lock().expect("sent lock").push(task.clone());
            Ok(())
        }
    }

    struct Counting {
        kind: TaskKind,
        allowed: AtomicBool,
        executed: AtomicUsize,
    }

    impl Counting {
        fn new(kind: TaskKind) -> Arc<Self> {
            Arc::new(Self {
                kind,
                allowed: AtomicBool::new(true),
                executed: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TaskHandler for Counting {
        fn kind(&self) -> TaskKind {
            self.kind
        }

        fn condition(&self, _task: &FarmTask) -> bool {
            self.allowed.load(Ordering::SeqCst)
        }

        async fn execute(&self, _task: &FarmTask) -> Result<(), FarmError> {
            self.executed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn node(name: &str) -> (WebFarmSynchronizer, Arc<Recorder>) {
        let transport = Arc::new(Recorder::default());
        (
            WebFarmSynchronizer::new(name, true, Arc::clone(&transport) as Arc<dyn FarmTransport>),
            transport,
        )
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let (sync, _) = node("a");
        sync.register(Counting::new(TaskKind::ClearHashtables))
            .expect("first registration");
        let err = sync
            .register(Counting::new(TaskKind::ClearHashtables))
            .expect_err("second registration");
        assert!(matches!(err, FarmError::AlreadyRegistered { .. }));
    }

    #[tokio::test]
    async fn create_task_respects_local_condition() {
        let (sync, transport) = node("a");
        let handler = Counting::new(TaskKind::DeleteFile);
        handler.allowed.store(false, Ordering::SeqCst);
        sync.register(handler.clone()).expect("register");

        let created = sync
            .create_task(TaskKind::DeleteFile, "files", vec!["a.txt".into()], None)
            .await
            .expect("create");

        assert!(created.is_none());
        assert!(transport.sent.lock().expect("sent lock").is_empty());
    }

    #[tokio::test]
    async fn disabled_farm_creates_nothing() {
        let transport = Arc::new(Recorder::default());
        let sync = WebFarmSynchronizer::new("a", false, transport.clone());
        let created = sync
            .create_task(TaskKind::ClearHashtables, "cms.query", Vec::new(), None)
            .await
            .expect("create");
        assert!(created.is_none());
    }

    #[tokio::test]
    async fn receiver_rejects_wrong_arity_without_executing() {
        let (producer, _) = node("a");
        let (receiver, _) = node("b");
        let handler = Counting::new(TaskKind::DeleteFile);
        receiver.register(handler.clone()).expect("register");
        producer
            .register(Counting::new(TaskKind::DeleteFile))
            .expect("register");

        let task = FarmTask::new(TaskKind::DeleteFile, "files", Vec::new(), None, "a");
        let err = receiver.apply(&task).await.expect_err("malformed");

        assert!(matches!(
            err,
            FarmError::MalformedPayload {
                kind: TaskKind::DeleteFile,
                actual: 0,
                ..
            }
        ));
        assert_eq!(handler.executed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn own_tasks_are_not_reapplied() {
        let (sync, _) = node("a");
        let handler = Counting::new(TaskKind::ClearHashtables);
        sync.register(handler.clone()).expect("register");

        let task = FarmTask::new(TaskKind::ClearHashtables, "cms.query", Vec::new(), None, "a");
        let outcome = sync.apply(&task).await.expect("apply");

        assert_eq!(outcome, TaskOutcome::SkippedOwnOrigin);
        assert_eq!(handler.executed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn receiver_condition_is_evaluated_again() {
        let (sync, _) = node("b");
        let handler = Counting::new(TaskKind::ClearHashtables);
        sync.register(handler.clone()).expect("register");
        handler.allowed.store(false, Ordering::SeqCst);

        let task = FarmTask::new(TaskKind::ClearHashtables, "cms.query", Vec::new(), None, "a");
        assert_eq!(
            sync.apply(&task).await.expect("apply"),
            TaskOutcome::SkippedCondition
        );
    }
}
