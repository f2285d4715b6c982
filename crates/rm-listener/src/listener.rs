//! Listener - request state machine
//!
//! `Received -> Authenticating -> Parsing -> Dispatching`, ending in exactly
//! one of 200, 400, 401 or 500. Panics raised by user code (the event
//! handler or the error hook) are recovered here and nowhere else.

use std::io;
use std::sync::Arc;

use axum::http::StatusCode;
use bytes::Bytes;
use metrics::counter;
use rm_logmsg::{Context, Flags, Frame, LogMessage, LogSink, Logger};
use tracing::debug;
use uuid::Uuid;

use crate::auth::{basic_auth_username, credential_matches};
use crate::error::{ListenerError, Result};
use crate::event::EventBatch;
use crate::handler::{ErrorHook, EventHandler};
use crate::recover::catch_panic;

/// Default limit for a single webhook body
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Prefix of the default diagnostic logger
pub const DEFAULT_LOG_PREFIX: &str = "routemaster/listener: ";

/// Standard-error logger used when no sink is configured.
pub fn default_sink() -> Logger {
    Logger::new(io::stderr(), DEFAULT_LOG_PREFIX, Flags::STANDARD)
}

/// Handles webhook calls from Routemaster.
///
/// Holds only immutable configuration, so one instance serves any number of
/// concurrent requests.
pub struct Listener {
    secret: String,
    handler: Arc<dyn EventHandler>,
    sink: Arc<dyn LogSink>,
    on_error: Option<ErrorHook>,
    max_body_bytes: usize,
}

impl Listener {
    /// Starts a listener configuration; `secret` is the subscriber UUID the
    /// bus presents as Basic-auth username.
    pub fn builder(secret: impl Into<String>) -> ListenerBuilder {
        ListenerBuilder {
            secret: secret.into(),
            handler: None,
            sink: None,
            on_error: None,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    pub fn sink(&self) -> &Arc<dyn LogSink> {
        &self.sink
    }

    /// Whether `authorization` carries the configured secret as username.
    pub fn authenticate(&self, authorization: Option<&str>) -> bool {
        let username = basic_auth_username(authorization).unwrap_or_default();
        credential_matches(&self.secret, &username)
    }

    /// Runs one request through the state machine and returns the status to
    /// write. `body` is the fully read request body, or the read failure.
    pub fn process<E: std::fmt::Display>(
        &self,
        authorization: Option<&str>,
        body: std::result::Result<Bytes, E>,
    ) -> StatusCode {
        let mut ctx = Context::new();
        ctx.set("request_id", Uuid::new_v4().to_string());

        let status = self.run(&ctx, authorization, body);
        counter!("routemaster_listener_requests_total", "outcome" => outcome_label(status))
            .increment(1);
        status
    }

    fn run<E: std::fmt::Display>(
        &self,
        ctx: &Context,
        authorization: Option<&str>,
        body: std::result::Result<Bytes, E>,
    ) -> StatusCode {
        if !self.authenticate(authorization) {
            return self.report(ctx, ListenerError::AuthFailure, Vec::new());
        }

        let body = match body {
            Ok(body) => body,
            Err(e) => {
                return self.report(ctx, ListenerError::BodyRead(e.to_string()), Vec::new())
            }
        };

        let batch = match EventBatch::from_json(&body) {
            Ok(batch) => batch,
            Err(e) => return self.report(ctx, ListenerError::malformed(&body, e), Vec::new()),
        };

        let count = batch.len();
        match catch_panic(|| self.handler.handle(batch)) {
            Ok(Ok(())) => {
                debug!(events = count, "Event batch handled");
                counter!("routemaster_listener_events_total").increment(count as u64);
                StatusCode::OK
            }
            Ok(Err(e)) => self.report(ctx, ListenerError::HandlerFailure(e), Vec::new()),
            Err(panicked) => {
                self.report(ctx, ListenerError::HandlerPanic(panicked.text), panicked.site)
            }
        }
    }

    /// Emits one diagnostic for `err` and returns the status it maps to.
    /// `site` holds the frames of a recovered panic, if any.
    ///
    /// A panicking error hook is logged as its own record; the status is
    /// returned either way.
    fn report(&self, ctx: &Context, err: ListenerError, site: Vec<Frame>) -> StatusCode {
        let status = err.status();

        let Some(hook) = &self.on_error else {
            self.diagnostic(ctx, &err, site).print(&*self.sink);
            return status;
        };

        if let Err(panicked) = catch_panic(|| hook(&err)) {
            let hook_err = ListenerError::ErrorHookPanic(panicked.text);
            let mut msg = ctx.error(hook_err.what());
            msg.set_error(&hook_err)
                .set("original_error", err.to_string())
                .set("status", status.as_u16())
                .set_trace(panicked.site);
            msg.print(&*self.sink);
        }
        status
    }

    fn diagnostic(&self, ctx: &Context, err: &ListenerError, site: Vec<Frame>) -> LogMessage {
        let mut msg = ctx.error(err.what());
        msg.set_error(err)
            .set("status", err.status().as_u16())
            .set_trace(site);
        // The payload is already part of the error text.
        if let ListenerError::MalformedBatch { source, .. } = err {
            msg.set_err("cause", source);
        }
        msg
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("has_error_hook", &self.on_error.is_some())
            .field("max_body_bytes", &self.max_body_bytes)
            .finish_non_exhaustive()
    }
}

/// Builder for `Listener`
pub struct ListenerBuilder {
    secret: String,
    handler: Option<Arc<dyn EventHandler>>,
    sink: Option<Arc<dyn LogSink>>,
    on_error: Option<ErrorHook>,
    max_body_bytes: usize,
}

impl ListenerBuilder {
    /// Handler invoked once per accepted batch (required)
    pub fn handler(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Destination for diagnostic records; defaults to standard error
    pub fn sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Hook that receives every error instead of the default diagnostic
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ListenerError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    pub fn max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    pub fn build(self) -> Result<Listener> {
        if self.secret.is_empty() {
            return Err(ListenerError::configuration("listener secret must be non-empty"));
        }
        let handler = self
            .handler
            .ok_or_else(|| ListenerError::configuration("an event handler is required"))?;

        Ok(Listener {
            secret: self.secret,
            handler,
            sink: self.sink.unwrap_or_else(|| Arc::new(default_sink())),
            on_error: self.on_error,
            max_body_bytes: self.max_body_bytes,
        })
    }
}

fn outcome_label(status: StatusCode) -> &'static str {
    match status {
        StatusCode::OK => "ok",
        StatusCode::UNAUTHORIZED => "unauthorized",
        StatusCode::BAD_REQUEST => "bad_request",
        _ => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::handler::handler_fn;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use rm_logmsg::MemorySink;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const BODY: &[u8] = br#"[{"topic":"orders","type":"create","url":"https://orders/1","t":500}]"#;

    fn auth(user: &str) -> String {
        format!("Basic {}", BASE64.encode(format!("{}:", user)))
    }

    fn ok_body() -> std::result::Result<Bytes, String> {
        Ok(Bytes::from_static(BODY))
    }

    #[test]
    fn test_build_requires_secret() {
        let err = Listener::builder("")
            .handler(handler_fn(|_| Ok(())))
            .build()
            .unwrap_err();
        assert!(matches!(err, ListenerError::Configuration { .. }));
    }

    #[test]
    fn test_build_requires_handler() {
        let err = Listener::builder("secret").build().unwrap_err();
        assert!(err.to_string().contains("event handler is required"));
    }

    #[test]
    fn test_success_emits_nothing() {
        let sink = Arc::new(MemorySink::new());
        let listener = Listener::builder("secret")
            .handler(handler_fn(|_| Ok(())))
            .sink(sink.clone())
            .build()
            .unwrap();

        let status = listener.process(Some(&auth("secret")), ok_body());
        assert_eq!(status, StatusCode::OK);
        assert!(sink.lines().is_empty());
    }

    #[test]
    fn test_auth_checked_before_body() {
        let sink = Arc::new(MemorySink::new());
        let listener = Listener::builder("secret")
            .handler(handler_fn(|_| Ok(())))
            .sink(sink.clone())
            .build()
            .unwrap();

        let status = listener.process(Some(&auth("intruder")), Err::<Bytes, _>("connection reset"));
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(sink.contents().contains("bad token"));
        assert!(!sink.contents().contains("connection reset"));
    }

    #[test]
    fn test_body_read_failure() {
        let sink = Arc::new(MemorySink::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let listener = Listener::builder("secret")
            .handler(handler_fn(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .sink(sink.clone())
            .build()
            .unwrap();

        let status = listener.process(Some(&auth("secret")), Err::<Bytes, _>("connection reset"));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(sink.contents().contains("request body read failed: connection reset"));
    }

    #[test]
    fn test_default_diagnostic_record() {
        let sink = Arc::new(MemorySink::new());
        let listener = Listener::builder("secret")
            .handler(handler_fn(|_| Err("unknown error".into())))
            .sink(sink.clone())
            .build()
            .unwrap();

        listener.process(Some(&auth("secret")), ok_body());

        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        let record: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(record["Level"], "error");
        assert_eq!(record["What"], "event handler failed");
        assert_eq!(record["File"], "listener.rs");
        assert_eq!(record["Data"]["error"], "unknown error");
        assert_eq!(record["Data"]["status"], 500);
        assert!(record["Context"]["request_id"].is_string());
    }

    #[test]
    fn test_malformed_record_carries_payload_once() {
        let sink = Arc::new(MemorySink::new());
        let listener = Listener::builder("secret")
            .handler(handler_fn(|_| Ok(())))
            .sink(sink.clone())
            .build()
            .unwrap();

        let status = listener.process(
            Some(&auth("secret")),
            Ok::<_, String>(Bytes::from_static(b"{\"topic\":\"orders\"}]")),
        );
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let record: serde_json::Value = serde_json::from_str(&sink.lines()[0]).unwrap();
        assert_eq!(record["Data"]["error"], "body malformed: {\"topic\":\"orders\"}]");
        assert!(record["Data"].get("payload").is_none());
        assert!(record["Data"]["cause"].is_string());
    }

    #[test]
    fn test_hook_replaces_default_record() {
        let sink = Arc::new(MemorySink::new());
        let hooked = Arc::new(AtomicUsize::new(0));
        let counter = hooked.clone();
        let listener = Listener::builder("secret")
            .handler(handler_fn(|_| Err("unknown error".into())))
            .sink(sink.clone())
            .on_error(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap();

        let status = listener.process(Some(&auth("secret")), ok_body());
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(hooked.load(Ordering::SeqCst), 1);
        assert!(sink.lines().is_empty());
    }

    #[test]
    fn test_hook_panic_logged_and_status_kept() {
        let sink = Arc::new(MemorySink::new());
        let listener = Listener::builder("secret")
            .handler(handler_fn(|_| Ok(())))
            .sink(sink.clone())
            .on_error(|_| panic!("hook exploded"))
            .build()
            .unwrap();

        let status = listener.process(Some(&auth("wrong")), ok_body());
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        let record: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(record["What"], "error hook panicked");
        assert_eq!(record["Data"]["error"], "panic while running error hook: hook exploded");
        assert_eq!(record["Data"]["original_error"], "bad token");
    }

    #[inline(never)]
    fn reject_order(_: EventBatch) -> std::result::Result<(), HandlerError> {
        panic!("order rejected")
    }

    #[test]
    fn test_panic_record_traces_panic_site() {
        let sink = Arc::new(MemorySink::new());
        let listener = Listener::builder("secret")
            .handler(handler_fn(reject_order))
            .sink(sink.clone())
            .build()
            .unwrap();

        let status = listener.process(Some(&auth("secret")), ok_body());
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        let record: serde_json::Value = serde_json::from_str(&sink.lines()[0]).unwrap();
        assert_eq!(record["Data"]["error"], "order rejected");
        let funcs: Vec<&str> = record["Trace"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["Func"].as_str().unwrap())
            .collect();
        assert!(
            funcs.iter().any(|f| f.ends_with("reject_order")),
            "panic site missing: {:?}",
            funcs
        );
        assert!(
            !funcs.iter().any(|f| f.contains("Listener::diagnostic")),
            "trace taken after unwinding: {:?}",
            funcs
        );
    }

    #[test]
    fn test_boxed_error_panic_payload_kept() {
        let sink = Arc::new(MemorySink::new());
        let listener = Listener::builder("secret")
            .handler(handler_fn(|_| {
                std::panic::panic_any::<HandlerError>("orders db unreachable".into())
            }))
            .sink(sink.clone())
            .build()
            .unwrap();

        listener.process(Some(&auth("secret")), ok_body());

        let record: serde_json::Value = serde_json::from_str(&sink.lines()[0]).unwrap();
        assert_eq!(record["What"], "event handler panicked");
        assert_eq!(record["Data"]["error"], "orders db unreachable");
    }

    #[test]
    fn test_default_sink_prefixed() {
        let logger = default_sink();
        assert_eq!(logger.prefix(), "routemaster/listener: ");
        assert_eq!(logger.flags(), Flags::STANDARD);
    }

    #[test]
    fn test_authenticate() {
        let listener = Listener::builder("secret")
            .handler(handler_fn(|_| Ok(())))
            .build()
            .unwrap();
        assert!(listener.authenticate(Some(&auth("secret"))));
        assert!(!listener.authenticate(Some(&auth("secrets"))));
        assert!(!listener.authenticate(None));
    }
}
