//! Decoding result rows into messages.

use std::pin::Pin;

use chrono::{DateTime, Utc};
use futures_core::Stream;
use ledgerfold_core::{
    message::{EventStream, Message, Payload, StoredMessage},
    metadata::Metadata,
};
use serde_json::{Map, Value};
use sqlx::{Row, postgres::PgRow, types::Json};
use tokio_stream::StreamExt as _;

use crate::Error;

/// Raw rows of a load query, materialised lazily from the result set.
pub type RowStream = Pin<Box<dyn Stream<Item = Result<PgRow, sqlx::Error>> + Send>>;

/// Turns the rows of a load query into an [`EventStream`].
// ANCHOR: message_factory_trait
pub trait MessageFactory: Send + Sync {
    /// Wrap `rows` in a stream of decoded messages.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be set up. Errors for individual
    /// rows are yielded by the returned stream.
    fn create_event_stream(&self, rows: RowStream) -> Result<EventStream<'static, Error>, Error>;
}
// ANCHOR_END: message_factory_trait

/// Decodes rows written by [`JsonStrategy`](crate::JsonStrategy).
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonMessageFactory;

impl JsonMessageFactory {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl MessageFactory for JsonMessageFactory {
    fn create_event_stream(&self, rows: RowStream) -> Result<EventStream<'static, Error>, Error> {
        Ok(Box::pin(rows.map(|row| -> Result<StoredMessage, Error> {
            let row = row?;
            decode_row(&row).map_err(|error| Error::Factory(Box::new(error)))
        })))
    }
}

fn decode_row(row: &PgRow) -> Result<StoredMessage, sqlx::Error> {
    let position: i64 = row.try_get("no")?;
    let id: uuid::Uuid = row.try_get("event_id")?;
    let kind: String = row.try_get("event_name")?;
    let data: Json<Value> = row.try_get("payload")?;
    let metadata: Json<Map<String, Value>> = row.try_get("metadata")?;
    let keys: Json<Vec<String>> = row.try_get("metadata_keys")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;

    Ok(StoredMessage {
        position,
        message: Message {
            id,
            payload: Payload::new(kind, data.0),
            metadata: ordered_metadata(metadata.0, keys.0),
            created_at,
        },
    })
}

/// Rebuild metadata in the key order it was written with. Keys missing from
/// `keys` follow in the column's own order.
fn ordered_metadata(mut values: Map<String, Value>, keys: Vec<String>) -> Metadata {
    let mut metadata: Metadata = keys
        .into_iter()
        .filter_map(|key| values.remove(&key).map(|value| (key, value)))
        .collect();
    for (key, value) in values {
        metadata.insert(key, value);
    }
    metadata
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected an object, got {other}"),
        }
    }

    #[test]
    fn metadata_follows_recorded_key_order() {
        let values = object(json!({ "type": "m1", "version": 1 }));

        let metadata = ordered_metadata(values, vec!["version".into(), "type".into()]);

        assert_eq!(
            metadata.iter().map(|(key, _)| key).collect::<Vec<_>>(),
            vec!["version", "type"]
        );
        assert_eq!(metadata.get("type"), Some(&json!("m1")));
    }

    #[test]
    fn unrecorded_keys_are_kept_after_recorded_ones() {
        let values = object(json!({ "a": 1, "b": 2, "z": 3 }));

        let metadata = ordered_metadata(values, vec!["z".into(), "missing".into()]);

        assert_eq!(
            metadata.iter().map(|(key, _)| key).collect::<Vec<_>>(),
            vec!["z", "a", "b"]
        );
    }
}
