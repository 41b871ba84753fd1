//! Two-phase (Before/After) event handlers.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, RwLock};

use tracing::{debug, error};

use crate::lock::{rw_read, rw_write};

use super::error::EventError;
use super::guard::RecursionGuard;

const SOURCE: &str = "events::handler";

/// Subscriber callback; receives the mutable event for its phase.
pub type Subscriber<A> = Arc<dyn Fn(&mut Event<A>) -> Result<(), EventError> + Send + Sync>;

type RecursionKey<A> = Arc<dyn Fn(&A) -> Option<String> + Send + Sync>;
type Continuation<A> = Box<dyn FnOnce(&A) + Send>;

/// Arguments of one event occurrence plus its cancellation flag and the
/// continuations deferred until the bracketed operation finishes.
pub struct Event<A> {
    data: A,
    cancelled: bool,
    completed: bool,
    continuations: Vec<Continuation<A>>,
}

impl<A> Event<A> {
    fn new(data: A) -> Self {
        Self {
            data,
            cancelled: false,
            completed: false,
            continuations: Vec::new(),
        }
    }

    /// Ask the wrapped operation not to proceed. Only meaningful in `Before`.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Whether the bracketed operation completed normally. Always false in
    /// `Before`; false in `After` when the scope was dropped on an error path.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Defer `action` until after the `After` subscribers have run.
    pub fn call_when_finished(&mut self, action: impl FnOnce(&A) + Send + 'static) {
        self.continuations.push(Box::new(action));
    }

    pub fn into_data(self) -> A {
        self.data
    }
}

impl<A> Deref for Event<A> {
    type Target = A;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl<A> DerefMut for Event<A> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

/// Ordered `Before` and `After` subscriber lists for one event of one type.
pub struct EventHandler<A> {
    name: &'static str,
    scope: String,
    before: RwLock<Vec<Subscriber<A>>>,
    after: RwLock<Vec<Subscriber<A>>>,
    recursion_key: Option<RecursionKey<A>>,
}

impl<A: 'static> EventHandler<A> {
    pub fn new(name: &'static str, scope: impl Into<String>) -> Self {
        Self {
            name,
            scope: scope.into(),
            before: RwLock::new(Vec::new()),
            after: RwLock::new(Vec::new()),
            recursion_key: None,
        }
    }

    /// Enable the recursion guard, deriving the key from the event args.
    pub fn with_recursion_key(
        mut self,
        key: impl Fn(&A) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.recursion_key = Some(Arc::new(key));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn before(
        &self,
        subscriber: impl Fn(&mut Event<A>) -> Result<(), EventError> + Send + Sync + 'static,
    ) {
        rw_write(&self.before, SOURCE, "subscribe_before").push(Arc::new(subscriber));
    }

    pub fn after(
        &self,
        subscriber: impl Fn(&mut Event<A>) -> Result<(), EventError> + Send + Sync + 'static,
    ) {
        rw_write(&self.after, SOURCE, "subscribe_after").push(Arc::new(subscriber));
    }

    pub fn has_subscribers(&self) -> bool {
        !rw_read(&self.before, SOURCE, "has_subscribers.before").is_empty()
            || !rw_read(&self.after, SOURCE, "has_subscribers.after").is_empty()
    }

    /// Remove all subscribers.
    pub fn clear(&self) {
        rw_write(&self.before, SOURCE, "clear.before").clear();
        rw_write(&self.after, SOURCE, "clear.after").clear();
    }

    /// Fire `Before` and return the bracket whose completion fires `After`.
    ///
    /// When the recursion key of `args` is already in flight on the current
    /// call chain, the returned scope is inert: neither phase runs.
    pub fn start_event(&self, args: A) -> Result<EventScope<'_, A>, EventError> {
        let guard = match self.recursion_key.as_ref().and_then(|key| key(&args)) {
            Some(key) => {
                let key = format!("{}|{}|{}", self.scope, self.name, key);
                match RecursionGuard::enter(key) {
                    Some(guard) => Some(guard),
                    None => {
                        debug!(
                            event = self.name,
                            scope = %self.scope,
                            "Nested event for in-flight key skipped"
                        );
                        return Ok(EventScope::inert(self, args));
                    }
                }
            }
            None => None,
        };

        let mut event = Event::new(args);
        let subscribers = rw_read(&self.before, SOURCE, "start_event").clone();
        for subscriber in subscribers {
            subscriber(&mut event).map_err(|source| EventError::before(self.name, &self.scope, source))?;
        }

        Ok(EventScope {
            handler: self,
            event: Some(event),
            active: true,
            _guard: guard,
        })
    }

    fn run_after(&self, event: &mut Event<A>) -> Result<(), EventError> {
        let subscribers = rw_read(&self.after, SOURCE, "finish_event").clone();
        let mut first_failure = None;
        for subscriber in subscribers {
            if let Err(err) = subscriber(event) {
                error!(
                    event = self.name,
                    scope = %self.scope,
                    error = %err,
                    completed = event.completed,
                    "After subscriber failed"
                );
                first_failure.get_or_insert(err);
            }
        }

        for continuation in event.continuations.drain(..) {
            continuation(&event.data);
        }

        match first_failure {
            Some(source) => Err(EventError::after(self.name, &self.scope, source)),
            None => Ok(()),
        }
    }
}

/// Bracket around a wrapped operation: `After` runs on [`EventScope::finish`],
/// or on drop if the operation exits early.
pub struct EventScope<'h, A: 'static> {
    handler: &'h EventHandler<A>,
    event: Option<Event<A>>,
    active: bool,
    _guard: Option<RecursionGuard>,
}

impl<'h, A: 'static> EventScope<'h, A> {
    fn inert(handler: &'h EventHandler<A>, args: A) -> Self {
        Self {
            handler,
            event: Some(Event::new(args)),
            active: false,
            _guard: None,
        }
    }

    /// False when the event was short-circuited by the recursion guard.
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_cancelled(&self) -> bool {
        self.event.as_ref().is_some_and(Event::is_cancelled)
    }

    pub fn args(&self) -> Option<&A> {
        self.event.as_ref().map(|event| &event.data)
    }

    pub fn args_mut(&mut self) -> Option<&mut A> {
        self.event.as_mut().map(|event| &mut event.data)
    }

    /// Complete the operation: run `After` subscribers then continuations.
    ///
    /// Every subscriber runs even if an earlier one fails; the first failure
    /// is returned after all of them were logged.
    pub fn finish(mut self) -> Result<A, EventError> {
        let Some(mut event) = self.event.take() else {
            return Err(EventError::Finished {
                event: self.handler.name,
            });
        };
        if !self.active {
            return Ok(event.data);
        }
        event.completed = true;
        self.handler.run_after(&mut event)?;
        Ok(event.data)
    }
}

impl<A: 'static> Drop for EventScope<'_, A> {
    fn drop(&mut self) {
        if let Some(mut event) = self.event.take()
            && self.active
        {
            // Errors were already logged by run_after.
            let _ = self.handler.run_after(&mut event);
        }
    }
}
