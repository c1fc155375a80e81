//! Table layout and row encoding.
//!
//! A [`PersistenceStrategy`] decides how a stream maps onto a table: its
//! name, its DDL and how messages become row values. [`JsonStrategy`] is the
//! provided implementation, storing one stream per table with JSON payloads
//! and metadata.

use ledgerfold_core::message::Message;

use crate::{
    error::BoxError,
    statement::{SqlValue, quote_ident},
};

/// Pluggable policy for table naming, schema and row encoding.
// ANCHOR: persistence_strategy_trait
pub trait PersistenceStrategy: Send + Sync {
    /// Columns written by an insert, in the order [`prepare_data`] encodes
    /// them.
    ///
    /// [`prepare_data`]: PersistenceStrategy::prepare_data
    fn column_names(&self) -> &[&str];

    /// Resolve the table backing `stream_name`.
    ///
    /// # Errors
    ///
    /// Returns an error if no table name can be derived from the stream name.
    fn generate_table_name(&self, stream_name: &str) -> Result<String, BoxError>;

    /// Ordered DDL statements creating `table_name` and its indexes.
    fn create_schema(&self, table_name: &str) -> Vec<String>;

    /// Encode `messages` as `messages.len() × column_names().len()` values,
    /// row by row in message order.
    ///
    /// # Errors
    ///
    /// Returns an error if any message cannot be encoded.
    fn prepare_data(&self, messages: &[Message]) -> Result<Vec<SqlValue>, BoxError>;

    /// Monotonic sequence column holding each row's position.
    fn position_column(&self) -> &str {
        "no"
    }

    /// `jsonb` column that matcher constraints are evaluated against.
    fn metadata_column(&self) -> &str {
        "metadata"
    }
}
// ANCHOR_END: persistence_strategy_trait

/// Error raised by [`JsonStrategy`].
#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    #[error("stream name is empty")]
    EmptyStreamName,
    #[error("message {index} has an empty payload kind")]
    EmptyPayloadKind { index: usize },
    #[error("failed to encode metadata of message {index}: {source}")]
    Metadata {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
}

const JSON_COLUMNS: &[&str] = &[
    "event_id",
    "event_name",
    "payload",
    "metadata",
    "metadata_keys",
    "created_at",
];

/// One table per stream, named `events_<stream>`, with `jsonb` payload and
/// metadata columns.
///
/// `jsonb` does not keep object key order, so the metadata keys are also
/// written, in order, to `metadata_keys`.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonStrategy;

impl JsonStrategy {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl PersistenceStrategy for JsonStrategy {
    fn column_names(&self) -> &[&str] {
        JSON_COLUMNS
    }

    fn generate_table_name(&self, stream_name: &str) -> Result<String, BoxError> {
        if stream_name.trim().is_empty() {
            return Err(Box::new(StrategyError::EmptyStreamName));
        }
        Ok(format!("events_{}", sanitize(stream_name)))
    }

    fn create_schema(&self, table_name: &str) -> Vec<String> {
        let table = quote_ident(table_name);
        vec![
            format!(
                "CREATE TABLE {table}(
                    no BIGSERIAL,
                    event_id UUID NOT NULL,
                    event_name TEXT NOT NULL,
                    payload JSONB NOT NULL,
                    metadata JSONB NOT NULL,
                    metadata_keys JSONB NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL,
                    PRIMARY KEY (no)
                )"
            ),
            format!("CREATE UNIQUE INDEX ON {table} (event_id)"),
            format!("CREATE INDEX ON {table} (event_name, no)"),
        ]
    }

    fn prepare_data(&self, messages: &[Message]) -> Result<Vec<SqlValue>, BoxError> {
        let mut values = Vec::with_capacity(messages.len() * JSON_COLUMNS.len());
        for (index, message) in messages.iter().enumerate() {
            if message.payload.kind.is_empty() {
                return Err(Box::new(StrategyError::EmptyPayloadKind { index }));
            }
            let metadata = serde_json::to_value(&message.metadata)
                .map_err(|source| StrategyError::Metadata { index, source })?;
            let keys = message
                .metadata
                .iter()
                .map(|(key, _)| serde_json::Value::from(key))
                .collect();

            values.push(SqlValue::Uuid(message.id));
            values.push(SqlValue::Text(message.payload.kind.clone()));
            values.push(SqlValue::Json(message.payload.data.clone()));
            values.push(SqlValue::Json(metadata));
            values.push(SqlValue::Json(serde_json::Value::Array(keys)));
            values.push(SqlValue::Timestamp(message.created_at));
        }
        Ok(values)
    }
}

/// Lower-case `name`, replacing anything outside `[a-z0-9_]` with `_`.
pub(crate) fn sanitize(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use ledgerfold_core::message::Payload;
    use serde_json::json;

    use super::*;

    fn message(kind: &str, version: u64) -> Message {
        Message::new(Payload::new(kind, json!({ "name": "alice" })))
            .with_metadata("type", kind)
            .with_metadata("version", version)
    }

    #[test]
    fn table_names_are_prefixed_and_sanitised() {
        let strategy = JsonStrategy::new();

        assert_eq!(strategy.generate_table_name("orders").unwrap(), "events_orders");
        assert_eq!(
            strategy.generate_table_name("Bank Accounts-2").unwrap(),
            "events_bank_accounts_2"
        );
    }

    #[test]
    fn empty_stream_name_cannot_be_resolved() {
        let error = JsonStrategy::new().generate_table_name("  ").unwrap_err();

        assert!(matches!(
            error.downcast_ref::<StrategyError>(),
            Some(StrategyError::EmptyStreamName)
        ));
    }

    #[test]
    fn schema_creates_table_then_indexes() {
        let queries = JsonStrategy::new().create_schema("events_orders");

        assert_eq!(queries.len(), 3);
        assert!(queries[0].starts_with("CREATE TABLE \"events_orders\"("));
        assert!(queries[1].starts_with("CREATE UNIQUE INDEX ON \"events_orders\""));
        assert!(queries[2].starts_with("CREATE INDEX ON \"events_orders\""));
    }

    #[test]
    fn prepare_data_encodes_each_column_in_message_order() {
        let messages = [message("m0", 1), message("m1", 2)];

        let values = JsonStrategy::new().prepare_data(&messages).unwrap();

        assert_eq!(values.len(), 2 * JSON_COLUMNS.len());
        assert_eq!(values[0], SqlValue::Uuid(messages[0].id));
        assert_eq!(values[1], SqlValue::Text("m0".into()));
        assert_eq!(values[3], SqlValue::Json(json!({ "type": "m0", "version": 1 })));
        assert_eq!(values[4], SqlValue::Json(json!(["type", "version"])));
        assert_eq!(values[6], SqlValue::Uuid(messages[1].id));
        assert_eq!(values[11], SqlValue::Timestamp(messages[1].created_at));
    }

    #[test]
    fn prepare_data_records_metadata_key_order() {
        let message = Message::new(Payload::new("m0", json!({})))
            .with_metadata("version", 1)
            .with_metadata("type", "m0");

        let values = JsonStrategy::new().prepare_data(&[message]).unwrap();

        assert_eq!(values[4], SqlValue::Json(json!(["version", "type"])));
    }

    #[test]
    fn prepare_data_reports_failing_index() {
        let messages = [message("m0", 1), message("", 2)];

        let error = JsonStrategy::new().prepare_data(&messages).unwrap_err();

        assert!(matches!(
            error.downcast_ref::<StrategyError>(),
            Some(StrategyError::EmptyPayloadKind { index: 1 })
        ));
    }
}
