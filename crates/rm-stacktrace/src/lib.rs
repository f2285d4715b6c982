//! Routemaster Stack Traces
//!
//! Thin wrappers around the `backtrace` crate:
//! - `frames`: lazy iterator over the current thread's call chain
//! - `trace`: formatted backtrace, capped at 4 KiB

use std::collections::VecDeque;
use std::ffi::c_void;
use std::iter::FusedIterator;

use serde::{Deserialize, Serialize};

/// Upper bound on raw frames walked by a single capture
const MAX_DEPTH: usize = 256;

/// Byte limit for `trace`
const TRACE_LIMIT: usize = 4096;

/// Frames that mark a panic in progress. Kept even though they live in std.
const PANIC_MARKERS: &[&str] = &[
    "rust_begin_unwind",
    "core::panicking::panic_fmt",
    "std::panicking::begin_panic",
];

const RUNTIME_PREFIXES: &[&str] = &[
    "std::",
    "core::",
    "alloc::",
    "backtrace::",
    "rm_stacktrace::frames",
    "__rust",
    "__libc_start",
    "_start",
];

/// A function call in the call stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Frame {
    pub func: String,
    pub file: String,
    pub line: u32,
}

/// Captures the current thread's call chain, skipping this function plus
/// `skip` frames above it. Yields at most `max` frames.
///
/// Instruction pointers are captured here; symbols are resolved as the
/// returned iterator is advanced.
#[inline(never)]
pub fn frames(skip: usize, max: usize) -> Frames {
    let anchor = frames as *const () as usize;
    let mut ips: Vec<usize> = Vec::with_capacity(32);
    let mut start = None;

    backtrace::trace(|frame| {
        if start.is_none() && frame.symbol_address() as usize == anchor {
            start = Some(ips.len() + 1);
        }
        ips.push(frame.ip() as usize);
        ips.len() < MAX_DEPTH
    });

    // Without an anchor the capture machinery is still filtered by name.
    let ips = match start {
        Some(index) => ips.split_off(index.min(ips.len())),
        None => ips,
    };

    Frames {
        ips: ips.into(),
        pending: VecDeque::new(),
        skip,
        remaining: max,
    }
}

/// Returns up to 4 KiB of the current thread's formatted backtrace.
pub fn trace() -> String {
    let mut text = format!("{:?}", backtrace::Backtrace::new());
    if text.len() > TRACE_LIMIT {
        let mut end = TRACE_LIMIT;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}

/// Lazy, single-pass sequence of resolved frames
#[derive(Debug)]
pub struct Frames {
    ips: VecDeque<usize>,
    pending: VecDeque<Frame>,
    skip: usize,
    remaining: usize,
}

impl Frames {
    fn resolve_next_ip(&mut self) -> bool {
        let Some(ip) = self.ips.pop_front() else {
            return false;
        };

        if self.skip > 0 {
            self.skip -= 1;
            return true;
        }

        // Return addresses point past the call instruction.
        let addr = ip.saturating_sub(1) as *mut c_void;
        let mut resolved = Vec::new();
        backtrace::resolve(addr, |symbol| {
            let func = symbol
                .name()
                .map(|name| format!("{:#}", name))
                .unwrap_or_default();
            let file = symbol
                .filename()
                .map(|path| path.display().to_string())
                .unwrap_or_default();
            resolved.push(Frame {
                func,
                file,
                line: symbol.lineno().unwrap_or(0),
            });
        });

        if resolved.is_empty() {
            resolved.push(Frame {
                func: String::new(),
                file: String::new(),
                line: 0,
            });
        }

        self.pending
            .extend(resolved.into_iter().filter(|f| !is_runtime_frame(&f.func)));
        true
    }
}

impl Iterator for Frames {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        if self.remaining == 0 {
            return None;
        }
        loop {
            if let Some(frame) = self.pending.pop_front() {
                self.remaining -= 1;
                return Some(frame);
            }
            if !self.resolve_next_ip() {
                self.remaining = 0;
                return None;
            }
        }
    }
}

impl FusedIterator for Frames {}

/// Reports whether `func` belongs to the runtime or the capture machinery.
/// Panic markers are never considered runtime frames.
pub fn is_runtime_frame(func: &str) -> bool {
    if PANIC_MARKERS.contains(&func) {
        return false;
    }
    if RUNTIME_PREFIXES.iter().any(|p| func.starts_with(p)) {
        return true;
    }
    // Trait impls on std types and closure call shims, e.g.
    // `<alloc::boxed::Box<F,A> as core::ops::function::FnOnce<Args>>::call_once`
    if let Some(rest) = func.strip_prefix('<') {
        let self_ty = rest.split(" as ").next().unwrap_or(rest);
        return RUNTIME_PREFIXES[..4].iter().any(|p| self_ty.starts_with(p))
            || rest.contains(" as core::ops::function::Fn");
    }
    false
}
