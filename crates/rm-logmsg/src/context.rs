use serde::Serialize;

use crate::message::{to_field_value, Level, LogMessage};
use crate::Params;

/// Cross-cutting fields (request id, subscriber, ...) attached to every
/// message built from this context. `clone` gives an independent copy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    params: Params,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<V: Serialize>(&mut self, key: impl Into<String>, value: V) -> &mut Self {
        self.params.insert(key.into(), to_field_value(&value));
        self
    }

    pub fn unset(&mut self, key: &str) -> &mut Self {
        self.params.shift_remove(key);
        self
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.params.get(key)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    #[track_caller]
    pub fn debug(&self, what: impl Into<String>) -> LogMessage {
        LogMessage::new(Level::Debug, what, Some(self))
    }

    #[track_caller]
    pub fn info(&self, what: impl Into<String>) -> LogMessage {
        LogMessage::new(Level::Info, what, Some(self))
    }

    #[track_caller]
    pub fn warning(&self, what: impl Into<String>) -> LogMessage {
        LogMessage::new(Level::Warning, what, Some(self))
    }

    #[track_caller]
    pub fn error(&self, what: impl Into<String>) -> LogMessage {
        LogMessage::new(Level::Error, what, Some(self))
    }

    pub(crate) fn params(&self) -> &Params {
        &self.params
    }
}
