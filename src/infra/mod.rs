//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod memory_store;
pub mod telemetry;
pub mod transport;

pub use error::InfraError;
pub use memory_store::{MemoryStore, StoreCalls};
pub use transport::{JsonLinesTransport, LoopbackTransport, read_json_lines};
