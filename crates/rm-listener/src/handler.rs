use std::sync::Arc;

use crate::error::{HandlerError, ListenerError};
use crate::event::EventBatch;

/// Consumes event batches delivered by the bus.
///
/// Called synchronously on a blocking thread; it may block. Returning an
/// error or panicking answers the bus with 500 so the batch is redelivered.
pub trait EventHandler: Send + Sync {
    fn handle(&self, events: EventBatch) -> Result<(), HandlerError>;
}

/// `EventHandler` backed by a closure, see `handler_fn`
#[derive(Clone)]
pub struct HandlerFn<F> {
    f: F,
}

/// Wraps a closure as an `EventHandler`.
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: Fn(EventBatch) -> Result<(), HandlerError> + Send + Sync,
{
    HandlerFn { f }
}

impl<F> EventHandler for HandlerFn<F>
where
    F: Fn(EventBatch) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, events: EventBatch) -> Result<(), HandlerError> {
        (self.f)(events)
    }
}

impl<H: EventHandler + ?Sized> EventHandler for Arc<H> {
    fn handle(&self, events: EventBatch) -> Result<(), HandlerError> {
        (**self).handle(events)
    }
}

/// Hook receiving every listener error in place of the default diagnostic
pub type ErrorHook = Arc<dyn Fn(&ListenerError) + Send + Sync>;
