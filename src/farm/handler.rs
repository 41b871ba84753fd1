use async_trait::async_trait;

use super::error::FarmError;
use super::task::{FarmTask, TaskKind};

/// Receiver-side callback of one task kind.
///
/// `execute` must be idempotent: delivery is at-least-once.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn kind(&self) -> TaskKind;

    /// Evaluated on the producing node before the task is broadcast and again
    /// on the receiving node before `execute`.
    fn condition(&self, _task: &FarmTask) -> bool {
        true
    }

    async fn execute(&self, task: &FarmTask) -> Result<(), FarmError>;
}
