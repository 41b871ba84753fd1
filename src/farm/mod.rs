//! Web-farm task synchronization between nodes.
//!
//! A node that changes shared state calls [`WebFarmSynchronizer::create_task`];
//! the task is broadcast through a [`FarmTransport`], lands in each peer's
//! [`TaskInbox`] and is applied there by a [`TaskConsumer`].

mod consumer;
mod error;
mod files;
mod handler;
mod handlers;
mod inbox;
mod plan;
mod synchronizer;
mod task;
mod transport;

pub use consumer::{ConsumeReport, TaskConsumer};
pub use error::FarmError;
pub use files::{FileReplica, FileReplicaError, WriteOutcome, sha256_hex};
pub use handler::TaskHandler;
pub use handlers::{
    ClearHashtablesHandler, ClearReadOnlyObjectsHandler, DeleteFileHandler,
    InvalidateObjectHandler, InvalidateTypeInfoHandler, ProcessCommandHandler,
    RemoveReadOnlyObjectHandler, UpdateFileHandler,
};
pub use inbox::TaskInbox;
pub use plan::ReplayPlan;
pub use synchronizer::{TaskOutcome, WebFarmSynchronizer};
pub use task::{Arity, FarmTask, TaskKind};
pub use transport::{FarmTransport, NullTransport};
