use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventError {
    /// Raised by a subscriber.
    #[error("{message}")]
    Subscriber { message: String },
    #[error("before `{event}` on `{scope}` failed: {source}")]
    Before {
        event: &'static str,
        scope: String,
        #[source]
        source: Box<EventError>,
    },
    #[error("after `{event}` on `{scope}` failed: {source}")]
    After {
        event: &'static str,
        scope: String,
        #[source]
        source: Box<EventError>,
    },
    #[error("`{event}` on `{scope}` was cancelled by a subscriber")]
    Cancelled { event: &'static str, scope: String },
    #[error("`{event}` scope already finished")]
    Finished { event: &'static str },
}

impl EventError {
    pub fn subscriber(message: impl Into<String>) -> Self {
        Self::Subscriber {
            message: message.into(),
        }
    }

    pub(crate) fn before(event: &'static str, scope: &str, source: EventError) -> Self {
        Self::Before {
            event,
            scope: scope.to_string(),
            source: Box::new(source),
        }
    }

    pub(crate) fn after(event: &'static str, scope: &str, source: EventError) -> Self {
        Self::After {
            event,
            scope: scope.to_string(),
            source: Box::new(source),
        }
    }

    pub(crate) fn cancelled(event: &'static str, scope: &str) -> Self {
        Self::Cancelled {
            event,
            scope: scope.to_string(),
        }
    }
}
