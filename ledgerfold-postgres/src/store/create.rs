use crate::{
    Error,
    factory::MessageFactory,
    strategy::PersistenceStrategy,
};

use super::EventStore;

impl<S, F> EventStore<S, F>
where
    S: PersistenceStrategy,
    F: MessageFactory,
{
    /// Create the table (and indexes) backing `stream_name`.
    ///
    /// All DDL runs in one transaction: if any statement fails the whole
    /// transaction is rolled back and that statement's error is returned.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] for an empty stream name
    /// - [`Error::Strategy`] / [`Error::TableNameEmpty`] if the table name
    ///   cannot be resolved
    /// - [`Error::TableAlreadyExists`] if the table exists; no DDL is issued
    /// - [`Error::NoCreateTableQueries`] if the strategy has no DDL
    /// - [`Error::Database`] if a statement fails
    #[tracing::instrument(skip(self))]
    pub async fn create(&self, stream_name: &str) -> Result<(), Error> {
        if stream_name.is_empty() {
            return Err(Error::InvalidArgument("stream_name"));
        }

        let table = self.table_name(stream_name)?;
        if self.table_exists(&table).await {
            return Err(Error::TableAlreadyExists);
        }

        let queries = self.strategy.create_schema(&table);
        if queries.is_empty() {
            return Err(Error::NoCreateTableQueries);
        }

        let mut tx = self.pool.begin().await?;
        for query in &queries {
            if let Err(error) = sqlx::query(query.as_str()).execute(&mut *tx).await {
                if let Err(rollback_error) = tx.rollback().await {
                    tracing::warn!(%rollback_error, "rollback of stream table creation failed");
                }
                return Err(Error::Database(error));
            }
        }
        tx.commit().await?;

        tracing::debug!(%table, statements = queries.len(), "stream table created");
        Ok(())
    }
}
