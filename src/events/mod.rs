//! Object lifecycle event pipeline.
//!
//! Every type's provider owns one [`ObjectEvents`] set. Each event has ordered
//! `Before` and `After` subscriber lists; [`EventHandler::start_event`] fires
//! `Before` and hands back an [`EventScope`] whose completion fires `After`.

mod error;
mod guard;
mod handler;
mod object_events;

pub use error::EventError;
pub use guard::{RecursionGuard, call_chain};
pub use handler::{Event, EventHandler, EventScope, Subscriber};
pub use object_events::{
    BulkEventArgs, BulkInsertEventArgs, DataEventArgs, ObjectEventArgs, ObjectEvents,
    PermissionEventArgs, object_recursion_key,
};
