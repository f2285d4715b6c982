//! Routemaster Structured Logging
//!
//! Builds one self-describing JSON record per call site:
//! - `LogMessage`: time, level, source location, optional trace, what, context, data
//! - `Context`: cross-cutting fields shared by every message built from it
//! - `LogSink`: one-operation line sink, with `Logger`, `MemorySink` and `TracingSink`
//!
//! ```ignore
//! let mut ctx = Context::new();
//! ctx.set("request_id", "abc");
//! ctx.error("dispatch failed").set_error(&err).print(&*sink);
//! ```

mod context;
mod message;
mod sink;

pub use context::Context;
pub use message::{Level, LogMessage};
pub use sink::{Flags, LogSink, Logger, MemorySink, TracingSink};
pub use rm_stacktrace::Frame;

pub(crate) type Params = indexmap::IndexMap<String, serde_json::Value>;

/// Starts a debug-level message with no context.
#[track_caller]
pub fn debug(what: impl Into<String>) -> LogMessage {
    LogMessage::new(Level::Debug, what, None)
}

/// Starts an info-level message with no context.
#[track_caller]
pub fn info(what: impl Into<String>) -> LogMessage {
    LogMessage::new(Level::Info, what, None)
}

/// Starts a warning-level message with no context.
#[track_caller]
pub fn warning(what: impl Into<String>) -> LogMessage {
    LogMessage::new(Level::Warning, what, None)
}

/// Starts an error-level message with no context.
#[track_caller]
pub fn error(what: impl Into<String>) -> LogMessage {
    LogMessage::new(Level::Error, what, None)
}
