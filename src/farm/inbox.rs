//! Inbound queue of tasks delivered by peers.

use std::collections::VecDeque;
use std::sync::Mutex;

use metrics::gauge;
use tracing::info;

use crate::lock::mutex_lock;

use super::task::FarmTask;

const SOURCE: &str = "farm::inbox";
const METRIC_INBOX_LEN: &str = "infocache_farm_inbox_len";

/// FIFO of received tasks awaiting the consumer.
///
/// A plain mutex is enough here: pushes come from the transport and drains
/// from a single consumer.
pub struct TaskInbox {
    queue: Mutex<VecDeque<FarmTask>>,
}

impl TaskInbox {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Accept a delivered task.
    pub fn push(&self, task: FarmTask) {
        info!(
            task_id = %task.id(),
            task_kind = %task.kind(),
            origin = %task.origin(),
            "Farm task received"
        );
        let mut queue = mutex_lock(&self.queue, SOURCE, "push");
        queue.push_back(task);
        gauge!(METRIC_INBOX_LEN).set(queue.len() as f64);
    }

    /// Remove up to `limit` tasks in arrival order.
    pub fn drain(&self, limit: usize) -> Vec<FarmTask> {
        let mut queue = mutex_lock(&self.queue, SOURCE, "drain");
        let count = limit.min(queue.len());
        let batch = queue.drain(..count).collect();
        gauge!(METRIC_INBOX_LEN).set(queue.len() as f64);
        batch
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.queue, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        mutex_lock(&self.queue, SOURCE, "clear").clear();
        gauge!(METRIC_INBOX_LEN).set(0.0);
    }
}

impl Default for TaskInbox {
    fn default() -> Self {
        Self::new()
    }
}
