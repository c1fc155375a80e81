//! Messages and their stored form.
//!
//! A [`Message`] is immutable once created: an identifier, a typed
//! [`Payload`], ordered [`Metadata`] and a creation timestamp. Stores hand
//! messages back as [`StoredMessage`]s tagged with the log position they were
//! written at.

use std::pin::Pin;

use chrono::{DateTime, Utc};
use futures_core::Stream;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use uuid::Uuid;

use crate::{event::DomainEvent, metadata::Metadata};

/// Error raised while converting between typed events and payloads.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("failed to serialise payload `{kind}`: {source}")]
    Serialize {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to deserialise payload `{kind}`: {source}")]
    Deserialize {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Serialised event body plus the kind that identifies its type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub kind: String,
    pub data: serde_json::Value,
}

impl Payload {
    pub fn new(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// Serialise a typed event, using its [`DomainEvent::KIND`] as the kind.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::Serialize`] if the event cannot be represented
    /// as JSON.
    pub fn from_event<E>(event: &E) -> Result<Self, PayloadError>
    where
        E: DomainEvent + Serialize,
    {
        let data = serde_json::to_value(event).map_err(|source| PayloadError::Serialize {
            kind: E::KIND,
            source,
        })?;
        Ok(Self::new(E::KIND, data))
    }

    /// Decode the payload as `E` if it carries `E`'s kind.
    ///
    /// Returns `None` for payloads of any other kind, which lets a projection
    /// skip events it does not handle.
    pub fn decode<E>(&self) -> Option<Result<E, PayloadError>>
    where
        E: DomainEvent + DeserializeOwned,
    {
        if self.kind != E::KIND {
            return None;
        }
        Some(
            serde_json::from_value(self.data.clone()).map_err(|source| {
                PayloadError::Deserialize {
                    kind: self.kind.clone(),
                    source,
                }
            }),
        )
    }
}

/// An identified, timestamped payload with queryable metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub payload: Payload,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a message with a fresh identifier stamped with the current time.
    #[must_use]
    pub fn new(payload: Payload) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            metadata: Metadata::new(),
            created_at: Utc::now(),
        }
    }

    /// Build a message from a typed event.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::Serialize`] if the event cannot be serialised.
    pub fn from_event<E>(event: &E) -> Result<Self, PayloadError>
    where
        E: DomainEvent + Serialize,
    {
        Payload::from_event(event).map(Self::new)
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key, value);
        self
    }
}

/// A message read back from the log, tagged with its position.
///
/// The position is the log's own row sequence number, not a count of the
/// messages that matched a load.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredMessage {
    pub position: i64,
    pub message: Message,
}

/// Forward-only stream of stored messages produced by a load.
///
/// Rows materialise lazily from the backend; once consumed the stream cannot
/// be restarted.
pub type EventStream<'a, E> = Pin<Box<dyn Stream<Item = Result<StoredMessage, E>> + Send + 'a>>;
