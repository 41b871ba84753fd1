use async_trait::async_trait;

use super::error::FarmError;
use super::task::FarmTask;

/// Delivers tasks produced on this node to its peers.
#[async_trait]
pub trait FarmTransport: Send + Sync {
    async fn broadcast(&self, task: &FarmTask) -> Result<(), FarmError>;
}

/// Transport of a single-node deployment: nothing to deliver to.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTransport;

#[async_trait]
impl FarmTransport for NullTransport {
    async fn broadcast(&self, _task: &FarmTask) -> Result<(), FarmError> {
        Ok(())
    }
}
