//! Event publisher port — how components put events onto the bus.

use std::future::Future;

use nido_domain::error::NidoError;
use nido_domain::event::{Event, EventPayload, EventSource};

/// Publishes events to the bus, which assigns the per-source sequence
/// number and fans out to subscribers.
pub trait EventPublisher: Send + Sync {
    /// Publish an event; returns the event as published (with its
    /// assigned sequence number).
    fn publish(
        &self,
        payload: EventPayload,
        source: EventSource,
    ) -> impl Future<Output = Result<Event, NidoError>> + Send;
}

impl<T: EventPublisher> EventPublisher for std::sync::Arc<T> {
    fn publish(
        &self,
        payload: EventPayload,
        source: EventSource,
    ) -> impl Future<Output = Result<Event, NidoError>> + Send {
        (**self).publish(payload, source)
    }
}
