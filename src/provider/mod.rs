//! Per-type cached object providers.

mod catalog;
mod error;
mod full_name;
mod index;
mod object_provider;
mod store;
mod typed;


pub use catalog::ProviderCatalog;
pub use error::{ProviderError, StoreError};
pub use full_name::{
    ColumnFullName, CompositeFullName, DerivedObjects, FullNameScheme, full_name_key,
};
pub use index::{CacheIndexSet, CacheSlot, EntityKeys, IndexKind, IndexStats, name_key};
pub use object_provider::{Lookup, ObjectProvider, ObjectProviderBuilder};
pub use store::ObjectStore;
pub use typed::TypedProvider;
