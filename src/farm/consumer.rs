//! Drains the inbox and applies tasks, one failure boundary per task.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use lru::LruCache;
use metrics::{counter, histogram};
use serde::Serialize;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::lock::mutex_lock;

use super::inbox::TaskInbox;
use super::plan::ReplayPlan;
use super::synchronizer::{
    METRIC_TASK_APPLIED, METRIC_TASK_FAILED, METRIC_TASK_SKIPPED, TaskOutcome,
    WebFarmSynchronizer,
};
use super::task::FarmTask;

const SOURCE: &str = "farm::consumer";
const METRIC_CONSUME_MS: &str = "infocache_farm_consume_ms";

/// Counts of one consumption run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsumeReport {
    pub received: usize,
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ConsumeReport {
    fn merge(&mut self, other: ConsumeReport) {
        self.received += other.received;
        self.applied += other.applied;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

pub struct TaskConsumer {
    synchronizer: Arc<WebFarmSynchronizer>,
    inbox: Arc<TaskInbox>,
    batch_limit: usize,
    recent: Mutex<LruCache<Uuid, ()>>,
}

impl TaskConsumer {
    pub fn new(
        synchronizer: Arc<WebFarmSynchronizer>,
        inbox: Arc<TaskInbox>,
        batch_limit: NonZeroUsize,
        dedupe_window: NonZeroUsize,
    ) -> Self {
        Self {
            synchronizer,
            inbox,
            batch_limit: batch_limit.get(),
            recent: Mutex::new(LruCache::new(dedupe_window)),
        }
    }

    pub fn inbox(&self) -> &Arc<TaskInbox> {
        &self.inbox
    }

    /// Apply one batch of pending tasks.
    #[instrument(skip(self), fields(node = %self.synchronizer.node()))]
    pub async fn consume(&self) -> ConsumeReport {
        let started_at = Instant::now();
        let tasks = self.inbox.drain(self.batch_limit);
        if tasks.is_empty() {
            return ConsumeReport::default();
        }

        let received = tasks.len();
        let plan = ReplayPlan::from_tasks(tasks);
        info!(received, plan = %plan, "Farm task consumption starting");

        let mut report = ConsumeReport {
            received,
            skipped: plan.duplicates + plan.subsumed,
            ..ConsumeReport::default()
        };
        for task in &plan.tasks {
            match self.apply_one(task).await {
                Some(TaskOutcome::Applied) => report.applied += 1,
                Some(_) => report.skipped += 1,
                None => report.failed += 1,
            }
        }

        info!(
            applied = report.applied,
            skipped = report.skipped,
            failed = report.failed,
            "Farm task consumption complete"
        );
        histogram!(METRIC_CONSUME_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);
        report
    }

    /// Consume until the inbox is empty.
    pub async fn consume_all(&self) -> ConsumeReport {
        let mut total = ConsumeReport::default();
        loop {
            let report = self.consume().await;
            if report.received == 0 {
                return total;
            }
            total.merge(report);
        }
    }

    /// `None` when the task failed; the failure is logged and the task dropped.
    async fn apply_one(&self, task: &FarmTask) -> Option<TaskOutcome> {
        let kind = task.kind().as_str();
        if mutex_lock(&self.recent, SOURCE, "recent.contains").contains(&task.id()) {
            counter!(METRIC_TASK_SKIPPED, "kind" => kind, "reason" => TaskOutcome::SkippedDuplicate.as_str())
                .increment(1);
            return Some(TaskOutcome::SkippedDuplicate);
        }

        match self.synchronizer.apply(task).await {
            Ok(TaskOutcome::Applied) => {
                mutex_lock(&self.recent, SOURCE, "recent.put").put(task.id(), ());
                counter!(METRIC_TASK_APPLIED, "kind" => kind).increment(1);
                Some(TaskOutcome::Applied)
            }
            Ok(outcome) => {
                counter!(METRIC_TASK_SKIPPED, "kind" => kind, "reason" => outcome.as_str())
                    .increment(1);
                Some(outcome)
            }
            Err(err) if err.is_payload_error() => {
                counter!(METRIC_TASK_FAILED, "kind" => kind).increment(1);
                warn!(
                    task_id = %task.id(),
                    task_kind = kind,
                    origin = %task.origin(),
                    error = %err,
                    "Malformed farm task dropped"
                );
                None
            }
            Err(err) => {
                counter!(METRIC_TASK_FAILED, "kind" => kind).increment(1);
                error!(
                    task_id = %task.id(),
                    task_kind = kind,
                    target = %task.target(),
                    origin = %task.origin(),
                    error = %err,
                    "Farm task failed"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::farm::{FarmError, NullTransport, TaskHandler, TaskKind};

    struct Flaky {
        kind: TaskKind,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TaskHandler for Flaky {
        fn kind(&self) -> TaskKind {
            self.kind
        }

        async fn execute(&self, task: &FarmTask) -> Result<(), FarmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if task.data().first().map(String::as_str) == Some("boom") {
                return Err(FarmError::execute(self.kind, task.target(), "boom"));
            }
            Ok(())
        }
    }

    fn consumer() -> (TaskConsumer, Arc<Flaky>) {
        let sync = Arc::new(WebFarmSynchronizer::new("b", true, Arc::new(NullTransport)));
        let handler = Arc::new(Flaky {
            kind: TaskKind::ProcessCommand,
            calls: AtomicUsize::new(0),
        });
        sync.register(handler.clone()).expect("register");
        let consumer = TaskConsumer::new(
            sync,
            Arc::new(TaskInbox::new()),
            NonZeroUsize::new(10).expect("non-zero"),
            NonZeroUsize::new(16).expect("non-zero"),
        );
        (consumer, handler)
    }

    fn command(data: &[&str]) -> FarmTask {
        FarmTask::new(
            TaskKind::ProcessCommand,
            "ecommerce",
            data.iter().map(|item| item.to_string()).collect(),
            None,
            "a",
        )
    }

    #[tokio::test]
    async fn one_failing_task_does_not_block_others() {
        let (consumer, handler) = consumer();
        consumer.inbox().push(command(&["boom"]));
        consumer.inbox().push(command(&[]));
        consumer.inbox().push(command(&["ok"]));

        let report = consumer.consume().await;

        assert_eq!(report.received, 3);
        assert_eq!(report.applied, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn redelivered_tasks_are_skipped() {
        let (consumer, handler) = consumer();
        let task = command(&["ok"]);
        consumer.inbox().push(task.clone());
        consumer.consume().await;
        consumer.inbox().push(task);

        let report = consumer.consume().await;

        assert_eq!(report.skipped, 1);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn consume_all_respects_batch_limit() {
        let (consumer, _) = consumer();
        for _ in 0..25 {
            consumer.inbox().push(command(&["ok"]));
        }

        let report = consumer.consume_all().await;

        assert_eq!(report.received, 25);
        assert_eq!(report.applied, 25);
        assert!(consumer.inbox().is_empty());
    }
}
