use std::fmt;
use std::panic::Location;

use chrono::{DateTime, SecondsFormat, Utc};
use rm_stacktrace::Frame;
use serde::{Serialize, Serializer};
use serde_json::Value;
use tracing::warn;

use crate::context::Context;
use crate::sink::LogSink;
use crate::Params;

/// Frames recorded by `LogMessage::stack_trace`
const TRACE_DEPTH: usize = 10;

/// Severity of a log message
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warning => "warning",
            Level::Error => "error",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured log message.
///
/// Rendered as a single JSON object with the fields in a fixed order:
/// `Time`, `Level`, `File`, `Line`, `Trace`, `What`, `Context`, `Data`.
/// `Trace`, `Context` and `Data` are omitted when empty.
#[derive(Debug, Clone)]
pub struct LogMessage {
    time: DateTime<Utc>,
    level: Level,
    file: &'static str,
    line: u32,
    trace: Vec<Frame>,
    what: String,
    context: Params,
    data: Params,
}

impl LogMessage {
    /// Builds a message located at the caller of the public constructor.
    #[track_caller]
    pub(crate) fn new(level: Level, what: impl Into<String>, ctx: Option<&Context>) -> Self {
        let location = Location::caller();
        Self {
            time: Utc::now(),
            level,
            file: short_file(location.file()),
            line: location.line(),
            trace: Vec::new(),
            what: what.into(),
            context: ctx.map(|c| c.params().clone()).unwrap_or_default(),
            data: Params::new(),
        }
    }

    /// Adds a key-value pair to the message data.
    ///
    /// A value that fails to serialize is stored as the serializer's error text.
    pub fn set<V: Serialize>(&mut self, key: impl Into<String>, value: V) -> &mut Self {
        self.data.insert(key.into(), to_field_value(&value));
        self
    }

    /// Adds an error under `key`, stored as its description.
    ///
    /// Error types that carry their own structured representation should
    /// be passed to `set` instead.
    pub fn set_err(
        &mut self,
        key: impl Into<String>,
        err: &(dyn std::error::Error + '_),
    ) -> &mut Self {
        self.data.insert(key.into(), Value::String(err.to_string()));
        self
    }

    /// Shorthand for `set_err("error", err)`.
    pub fn set_error(&mut self, err: &(dyn std::error::Error + '_)) -> &mut Self {
        self.set_err("error", err)
    }

    /// Records the caller's stack trace.
    #[inline(never)]
    pub fn stack_trace(&mut self) -> &mut Self {
        self.trace = rm_stacktrace::frames(1, TRACE_DEPTH).collect();
        self
    }

    /// Records frames captured elsewhere, such as at a panic site.
    pub fn set_trace(&mut self, frames: impl IntoIterator<Item = Frame>) -> &mut Self {
        self.trace = frames.into_iter().take(TRACE_DEPTH).collect();
        self
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn what(&self) -> &str {
        &self.what
    }

    pub fn file(&self) -> &str {
        self.file
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    pub fn trace(&self) -> &[Frame] {
        &self.trace
    }

    pub fn data(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn context(&self, key: &str) -> Option<&Value> {
        self.context.get(key)
    }

    /// Writes the message to `sink` without the sink's own decoration.
    pub fn print(&self, sink: &dyn LogSink) {
        if let Err(e) = sink.emit_undecorated(&self.to_string()) {
            warn!(error = %e, what = %self.what, "Failed to write log message");
        }
    }

    /// Writes the message to `sink`, then exits the process with status 1.
    pub fn fatal(&self, sink: &dyn LogSink) -> ! {
        self.print(sink);
        std::process::exit(1)
    }

    /// Writes the message to `sink`, then panics with the rendered message.
    pub fn panic(&self, sink: &dyn LogSink) -> ! {
        let line = self.to_string();
        if let Err(e) = sink.emit_undecorated(&line) {
            warn!(error = %e, what = %self.what, "Failed to write log message");
        }
        panic!("{}", line)
    }

    fn record(&self) -> Record<'_> {
        Record {
            time: self.time.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            level: self.level,
            file: self.file,
            line: self.line,
            trace: &self.trace,
            what: &self.what,
            context: &self.context,
            data: &self.data,
        }
    }
}

impl Serialize for LogMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.record().serialize(serializer)
    }
}

impl fmt::Display for LogMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(&self.record()) {
            Ok(line) => f.write_str(&line),
            // Unreachable in practice: every data value is already a `Value`.
            Err(e) => write!(
                f,
                r#"{{"Level":"{}","What":{},"Error":{}}}"#,
                self.level,
                Value::String(self.what.clone()),
                Value::String(e.to_string()),
            ),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct Record<'a> {
    time: String,
    level: Level,
    file: &'a str,
    line: u32,
    #[serde(skip_serializing_if = "<[Frame]>::is_empty")]
    trace: &'a [Frame],
    what: &'a str,
    #[serde(skip_serializing_if = "Params::is_empty")]
    context: &'a Params,
    #[serde(skip_serializing_if = "Params::is_empty")]
    data: &'a Params,
}

pub(crate) fn to_field_value<V: Serialize + ?Sized>(value: &V) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| Value::String(e.to_string()))
}

fn short_file(file: &'static str) -> &'static str {
    file.rsplit(['/', '\\']).next().unwrap_or(file)
}
