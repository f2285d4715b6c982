use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

use chrono::{Local, Utc};
use parking_lot::Mutex;

/// Destination for rendered log lines.
///
/// Implementations must be safe to call from concurrently handled requests.
pub trait LogSink: Send + Sync {
    /// Writes one line, applying the sink's own decoration (prefix, timestamp).
    fn emit(&self, line: &str) -> io::Result<()>;

    /// Writes one line that already carries its own timestamp.
    ///
    /// Decorating sinks suppress their timestamp flags for this call only.
    fn emit_undecorated(&self, line: &str) -> io::Result<()> {
        self.emit(line)
    }
}

/// Timestamp decoration applied by `Logger`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags {
    pub date: bool,
    pub time: bool,
    pub microseconds: bool,
    pub utc: bool,
}

impl Flags {
    pub const NONE: Flags = Flags {
        date: false,
        time: false,
        microseconds: false,
        utc: false,
    };

    /// Date and time, local zone: `2024/01/23 01:23:23 `
    pub const STANDARD: Flags = Flags {
        date: true,
        time: true,
        microseconds: false,
        utc: false,
    };

    fn header(&self) -> String {
        if !self.date && !self.time {
            return String::new();
        }
        let mut format = String::new();
        if self.date {
            format.push_str("%Y/%m/%d ");
        }
        if self.time {
            format.push_str("%H:%M:%S");
            if self.microseconds {
                format.push_str("%.6f");
            }
            format.push(' ');
        }
        if self.utc {
            Utc::now().format(&format).to_string()
        } else {
            Local::now().format(&format).to_string()
        }
    }
}

struct LoggerState {
    prefix: String,
    flags: Flags,
    out: Box<dyn Write + Send>,
}

impl LoggerState {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        let mut buf = String::with_capacity(self.prefix.len() + line.len() + 32);
        buf.push_str(&self.prefix);
        buf.push_str(&self.flags.header());
        buf.push_str(line);
        if !line.ends_with('\n') {
            buf.push('\n');
        }
        self.out.write_all(buf.as_bytes())?;
        self.out.flush()
    }
}

/// Restores the logger flags when dropped, including on a failed write.
struct FlagsGuard<'a> {
    state: &'a mut LoggerState,
    saved: Flags,
}

impl Drop for FlagsGuard<'_> {
    fn drop(&mut self) {
        self.state.flags = self.saved;
    }
}

/// Line logger with a prefix and timestamp flags, writing to any `Write`.
pub struct Logger {
    state: Mutex<LoggerState>,
}

impl Logger {
    pub fn new(out: impl Write + Send + 'static, prefix: impl Into<String>, flags: Flags) -> Self {
        Self {
            state: Mutex::new(LoggerState {
                prefix: prefix.into(),
                flags,
                out: Box::new(out),
            }),
        }
    }

    /// Logger on standard error with standard flags and no prefix.
    pub fn stderr() -> Self {
        Self::new(io::stderr(), "", Flags::STANDARD)
    }

    /// Logger appending to `path`, creating the file if needed.
    pub fn file(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(file, "", Flags::STANDARD))
    }

    pub fn flags(&self) -> Flags {
        self.state.lock().flags
    }

    pub fn set_flags(&self, flags: Flags) {
        self.state.lock().flags = flags;
    }

    pub fn prefix(&self) -> String {
        self.state.lock().prefix.clone()
    }

    pub fn set_prefix(&self, prefix: impl Into<String>) {
        self.state.lock().prefix = prefix.into();
    }
}

impl LogSink for Logger {
    fn emit(&self, line: &str) -> io::Result<()> {
        self.state.lock().write_line(line)
    }

    fn emit_undecorated(&self, line: &str) -> io::Result<()> {
        let mut state = self.state.lock();
        let saved = std::mem::replace(&mut state.flags, Flags::NONE);
        let guard = FlagsGuard {
            state: &mut *state,
            saved,
        };
        guard.state.write_line(line)
    }
}

/// Collects lines in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// All lines joined with newlines.
    pub fn contents(&self) -> String {
        self.lines.lock().join("\n")
    }

    /// Removes and returns the collected lines.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.lock())
    }
}

impl LogSink for MemorySink {
    fn emit(&self, line: &str) -> io::Result<()> {
        self.lines.lock().push(line.trim_end_matches('\n').to_string());
        Ok(())
    }
}

/// Forwards lines to the `tracing` subscriber under the
/// `routemaster::diagnostics` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, line: &str) -> io::Result<()> {
        tracing::info!(target: "routemaster::diagnostics", record = %line);
        Ok(())
    }
}
