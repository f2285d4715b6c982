//! Events pushed by the bus

use std::ops::Deref;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An event received from Routemaster.
///
/// `data` is kept as raw JSON and only decoded on request. Missing string
/// fields decode as empty; validating events is the publisher's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceivedEvent {
    #[serde(default)]
    topic: String,
    #[serde(rename = "type", default)]
    event_type: String,
    #[serde(default)]
    url: String,
    #[serde(alias = "t", default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl ReceivedEvent {
    /// Topic the event was published to
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Event type as sent by the publisher (create, update, delete, noop)
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Authoritative URL of the entity the event refers to
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }

    /// Raw payload, if the publisher attached one
    pub fn raw_data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    /// Decodes the payload into `T`. An absent payload decodes as JSON `null`,
    /// so `Option<T>` targets accept it.
    pub fn decode_data<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match &self.data {
            Some(value) => T::deserialize(value),
            None => T::deserialize(&Value::Null),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("event batch is empty")]
    Empty,

    #[error("invalid event batch: {0}")]
    Json(#[from] serde_json::Error),
}

/// Ordered, non-empty sequence of events delivered in one webhook call
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct EventBatch(Vec<ReceivedEvent>);

impl EventBatch {
    pub fn new(events: Vec<ReceivedEvent>) -> Result<Self, BatchError> {
        if events.is_empty() {
            return Err(BatchError::Empty);
        }
        Ok(Self(events))
    }

    /// Decodes a JSON array of events.
    pub fn from_json(body: &[u8]) -> Result<Self, BatchError> {
        let events: Vec<ReceivedEvent> = serde_json::from_slice(body)?;
        Self::new(events)
    }

    pub fn into_vec(self) -> Vec<ReceivedEvent> {
        self.0
    }
}

impl TryFrom<Vec<ReceivedEvent>> for EventBatch {
    type Error = BatchError;

    fn try_from(events: Vec<ReceivedEvent>) -> Result<Self, Self::Error> {
        Self::new(events)
    }
}

impl Deref for EventBatch {
    type Target = [ReceivedEvent];

    fn deref(&self) -> &[ReceivedEvent] {
        &self.0
    }
}

impl IntoIterator for EventBatch {
    type Item = ReceivedEvent;
    type IntoIter = std::vec::IntoIter<ReceivedEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a EventBatch {
    type Item = &'a ReceivedEvent;
    type IntoIter = std::slice::Iter<'a, ReceivedEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
