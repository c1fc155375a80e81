use ledgerfold_core::message::Message;
use nonempty::NonEmpty;

use crate::{
    Error,
    factory::MessageFactory,
    statement,
    strategy::PersistenceStrategy,
};

use super::EventStore;

impl<S, F> EventStore<S, F>
where
    S: PersistenceStrategy,
    F: MessageFactory,
{
    /// Append `messages` to `stream_name` with a single multi-row insert.
    ///
    /// Rows are written in the order of `messages`. Nothing is written if the
    /// strategy fails to encode any message.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] for an empty stream name
    /// - [`Error::Strategy`] / [`Error::TableNameEmpty`] for table resolution
    ///   or encoding failures
    /// - [`Error::ColumnCountMismatch`] if the encoded values do not fill
    ///   every column of every row
    /// - [`Error::Database`] if the insert fails
    #[tracing::instrument(skip(self, messages), fields(messages_len = messages.len()))]
    pub async fn append_to(
        &self,
        stream_name: &str,
        messages: NonEmpty<Message>,
    ) -> Result<(), Error> {
        if stream_name.is_empty() {
            return Err(Error::InvalidArgument("stream_name"));
        }

        let table = self.table_name(stream_name)?;
        let messages = Vec::from(messages);
        let values = self
            .strategy
            .prepare_data(&messages)
            .map_err(Error::Strategy)?;

        let columns = self.strategy.column_names();
        let expected = messages.len() * columns.len();
        if values.len() != expected {
            return Err(Error::ColumnCountMismatch {
                expected,
                actual: values.len(),
            });
        }

        let mut statement = statement::insert(&table, columns, values);
        let result = statement.query().execute(&self.pool).await?;

        tracing::trace!(rows = result.rows_affected(), "messages appended");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    extern crate alloc;

    use ledgerfold_core::message::{Message, Payload};
    use nonempty::nonempty;
    use serde_json::json;

    use crate::{
        Error, SqlValue,
        store::tests::{StubError, StubStrategy, stub_store},
    };

    fn message() -> Message {
        Message::new(Payload::new("m1", json!({ "name": "alice", "balance": 0 })))
            .with_metadata("type", "m1")
            .with_metadata("version", 1)
    }

    #[tokio::test]
    async fn append_rejects_empty_stream_name() {
        let store = stub_store(StubStrategy::default());

        let error = store.append_to("", nonempty![message()]).await.unwrap_err();

        assert!(matches!(error, Error::InvalidArgument("stream_name")));
    }

    #[tokio::test]
    async fn append_returns_encoding_failure_without_writing() {
        let store = stub_store(StubStrategy {
            data: Err("prepare data expected error"),
            ..StubStrategy::default()
        });

        let error = store.append_to("orders", nonempty![message()]).await.unwrap_err();

        let Error::Strategy(source) = error else {
            panic!("expected the strategy's error");
        };
        assert_eq!(source.to_string(), "prepare data expected error");
        assert!(source.downcast_ref::<StubError>().is_some());
    }

    #[tokio::test]
    async fn append_rejects_short_rows() {
        let store = stub_store(StubStrategy {
            data: Ok(vec![SqlValue::Text("only one".into())]),
            ..StubStrategy::default()
        });

        let error = store.append_to("orders", nonempty![message()]).await.unwrap_err();

        assert!(matches!(
            error,
            Error::ColumnCountMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[tokio::test]
    async fn append_surfaces_database_errors() {
        let store = stub_store(StubStrategy {
            data: Ok(vec![
                SqlValue::Text("a".into()),
                SqlValue::Text("b".into()),
                SqlValue::Text("c".into()),
                SqlValue::Text("d".into()),
            ]),
            ..StubStrategy::default()
        });

        let error = store
            .append_to("orders", nonempty![message(), message()])
            .await
            .unwrap_err();

        assert!(matches!(error, Error::Database(_)));
    }
}
