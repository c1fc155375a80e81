use ledgerfold_core::{message::EventStream, metadata::Matcher};
use tokio_stream::StreamExt as _;

use crate::{
    Error,
    factory::{MessageFactory, RowStream},
    statement::{self, LoadColumns},
    strategy::PersistenceStrategy,
};

use super::EventStore;

impl<S, F> EventStore<S, F>
where
    S: PersistenceStrategy,
    F: MessageFactory,
{
    /// Load messages of `stream_name` with positions at or after
    /// `from_position`, in ascending position order.
    ///
    /// `matcher` constraints are ANDed in order ahead of the position
    /// predicate; `limit` bounds the number of rows. Rows are read lazily:
    /// query failures are yielded by the returned stream.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] for an empty stream name
    /// - [`Error::Strategy`] / [`Error::TableNameEmpty`] if the table name
    ///   cannot be resolved
    /// - whatever the [`MessageFactory`] returns
    #[tracing::instrument(skip(self, matcher))]
    pub async fn load(
        &self,
        stream_name: &str,
        from_position: i64,
        limit: Option<u32>,
        matcher: Option<&Matcher>,
    ) -> Result<EventStream<'static, Error>, Error> {
        if stream_name.is_empty() {
            return Err(Error::InvalidArgument("stream_name"));
        }

        let table = self.table_name(stream_name)?;
        let columns = LoadColumns {
            position: self.strategy.position_column(),
            metadata: self.strategy.metadata_column(),
            select: self.strategy.column_names(),
        };
        let mut statement = statement::load(&table, &columns, from_position, limit, matcher);
        tracing::trace!(sql = statement.sql(), params = statement.params().len(), "loading stream");

        let pool = self.pool.clone();
        let rows: RowStream = Box::pin(async_stream::stream! {
            let mut rows = statement.query().fetch(&pool);
            while let Some(row) = rows.next().await {
                yield row;
            }
        });

        self.factory.create_event_stream(rows)
    }
}
