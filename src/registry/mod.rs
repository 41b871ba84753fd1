//! Type and module registries.
//!
//! Both are explicitly constructed services. Initialization order on a node:
//! [`ModuleCatalog`], [`ReadOnlyObjectRegistry`], providers, then
//! [`ModuleRegistry`]. [`ModuleRegistry::clear`] tears them down in reverse.

mod error;
mod module;
mod module_registry;
mod read_only;

pub use error::RegistryError;
pub use module::{CommandFn, CommandTable, Module, ModuleCatalog};
pub use module_registry::ModuleRegistry;
pub use read_only::{ObjectFactory, ReadOnlyObjectRegistry};
