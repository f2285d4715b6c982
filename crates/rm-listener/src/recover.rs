//! Panic recovery with panic-site capture
//!
//! `catch_unwind` only returns after the stack has unwound, so the frames
//! leading to the panic are recorded from a process-wide panic hook while a
//! recovery is armed on the current thread. The previously installed hook
//! still runs for every panic.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::io;
use std::panic::{self, AssertUnwindSafe, PanicHookInfo};
use std::sync::{Once, OnceLock};

use rm_logmsg::Frame;

use crate::error::HandlerError;

/// Frames kept for a recovered panic
const SITE_DEPTH: usize = 10;

type PanicHook = Box<dyn Fn(&PanicHookInfo<'_>) + Sync + Send + 'static>;

static INSTALL: Once = Once::new();
static PREVIOUS_HOOK: OnceLock<PanicHook> = OnceLock::new();

thread_local! {
    static ARMED: Cell<bool> = const { Cell::new(false) };
    static SITE: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// A panic caught by `catch_panic`
pub(crate) struct Recovered {
    /// Rendered payload
    pub text: String,
    /// Frames from the panic site outward; empty if another panic hook
    /// replaced ours after installation.
    pub site: Vec<Frame>,
}

/// Runs `f`, recovering a panic together with the frames where it started.
pub(crate) fn catch_panic<R>(f: impl FnOnce() -> R) -> Result<R, Recovered> {
    install_hook();

    let was_armed = ARMED.with(|armed| armed.replace(true));
    SITE.with(|site| site.borrow_mut().clear());
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    ARMED.with(|armed| armed.set(was_armed));

    result.map_err(|payload| Recovered {
        text: panic_text(&*payload),
        site: SITE.with(|site| site.take()),
    })
}

fn install_hook() {
    INSTALL.call_once(|| {
        let _ = PREVIOUS_HOOK.set(panic::take_hook());
        panic::set_hook(Box::new(record_panic_site));
    });
}

#[inline(never)]
fn record_panic_site(info: &PanicHookInfo<'_>) {
    if ARMED.with(|armed| armed.get()) {
        let frames: Vec<Frame> = rm_stacktrace::frames(1, SITE_DEPTH).collect();
        SITE.with(|site| *site.borrow_mut() = frames);
    }
    if let Some(previous) = PREVIOUS_HOOK.get() {
        previous(info);
    }
}

/// Renders a recovered panic payload.
pub(crate) fn panic_text(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(e) = payload.downcast_ref::<HandlerError>() {
        e.to_string()
    } else if let Some(e) = payload.downcast_ref::<io::Error>() {
        e.to_string()
    } else {
        "non-string panic payload".to_string()
    }
}
