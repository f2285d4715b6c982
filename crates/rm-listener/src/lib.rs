//! Routemaster Listener
//!
//! Receives event batches pushed by the Routemaster bus over HTTP:
//! - Authenticates the bus by the Basic-auth username (the subscriber UUID)
//! - Decodes the body into a non-empty `EventBatch`
//! - Dispatches it synchronously to an `EventHandler`
//! - Recovers handler and error-hook panics, answering 500
//!
//! | Condition | Status | Body |
//! |---|---|---|
//! | handled | 200 | empty |
//! | bad or missing credential | 401 | `401 Unauthorized\n` |
//! | empty or malformed batch | 400 | `400 Bad Request\n` |
//! | body read failure, handler error or panic | 500 | `500 Internal Server Error\n` |
//!
//! Every non-200 outcome produces one diagnostic: the error hook if one is
//! configured, otherwise a JSON record on the listener's `LogSink`. Panic
//! records carry the frames where the panic started; capturing them installs
//! a process-wide panic hook that chains to the previous one.

pub mod auth;
pub mod error;
pub mod event;
pub mod handler;
pub mod http;
pub mod listener;
mod recover;

pub use error::{HandlerError, ListenerError, Result};
pub use event::{BatchError, EventBatch, ReceivedEvent};
pub use handler::{handler_fn, ErrorHook, EventHandler, HandlerFn};
pub use http::router;
pub use listener::{
    default_sink, Listener, ListenerBuilder, DEFAULT_LOG_PREFIX, DEFAULT_MAX_BODY_BYTES,
};
