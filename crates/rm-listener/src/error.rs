//! Listener Error Types

use axum::http::StatusCode;
use thiserror::Error;

use crate::event::BatchError;

/// Error returned by an event handler
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Every abnormal outcome of a webhook request, plus construction-time
/// misconfiguration.
#[derive(Error, Debug)]
pub enum ListenerError {
    #[error("bad token")]
    AuthFailure,

    #[error("request body read failed: {0}")]
    BodyRead(String),

    #[error("body malformed: {payload}")]
    MalformedBatch {
        payload: String,
        #[source]
        source: BatchError,
    },

    #[error("{0}")]
    HandlerFailure(#[source] HandlerError),

    #[error("{0}")]
    HandlerPanic(String),

    #[error("panic while running error hook: {0}")]
    ErrorHookPanic(String),

    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl ListenerError {
    pub fn malformed(body: &[u8], source: BatchError) -> Self {
        Self::MalformedBatch {
            payload: String::from_utf8_lossy(body).into_owned(),
            source,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// HTTP status written for this error
    pub fn status(&self) -> StatusCode {
        match self {
            Self::AuthFailure => StatusCode::UNAUTHORIZED,
            Self::MalformedBatch { .. } => StatusCode::BAD_REQUEST,
            Self::BodyRead(_)
            | Self::HandlerFailure(_)
            | Self::HandlerPanic(_)
            | Self::ErrorHookPanic(_)
            | Self::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short label used as the diagnostic `What`
    pub fn what(&self) -> &'static str {
        match self {
            Self::AuthFailure => "authentication failed",
            Self::BodyRead(_) => "request body read failed",
            Self::MalformedBatch { .. } => "malformed event batch",
            Self::HandlerFailure(_) => "event handler failed",
            Self::HandlerPanic(_) => "event handler panicked",
            Self::ErrorHookPanic(_) => "error hook panicked",
            Self::Configuration { .. } => "invalid listener configuration",
        }
    }
}

pub type Result<T> = std::result::Result<T, ListenerError>;
