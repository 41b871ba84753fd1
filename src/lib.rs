//! Cached typed-object providers with lifecycle events, read-only and module
//! registries, and web-farm cache synchronization.

pub mod config;
pub mod domain;
pub mod events;
pub mod farm;
pub mod infra;
pub(crate) mod lock;
pub mod node;
pub mod provider;
pub mod registry;
