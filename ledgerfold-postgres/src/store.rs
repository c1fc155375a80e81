mod append;
mod create;
mod load;

use std::sync::Arc;

use sqlx::PgPool;

use crate::{
    Error,
    factory::{JsonMessageFactory, MessageFactory},
    statement,
    strategy::{JsonStrategy, PersistenceStrategy},
};

/// A PostgreSQL-backed append-only event log.
///
/// Each stream lives in its own table, laid out by the
/// [`PersistenceStrategy`] `S`. Loads hand their rows to the
/// [`MessageFactory`] `F`. Positions are the table's own monotonic sequence
/// numbers.
pub struct EventStore<S, F> {
    pub(crate) pool: PgPool,
    strategy: Arc<S>,
    factory: Arc<F>,
}

impl<S, F> Clone for EventStore<S, F> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            strategy: Arc::clone(&self.strategy),
            factory: Arc::clone(&self.factory),
        }
    }
}

impl<S, F> std::fmt::Debug for EventStore<S, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStore").finish_non_exhaustive()
    }
}

impl EventStore<JsonStrategy, JsonMessageFactory> {
    /// Event store using the provided JSON strategy and factory.
    #[must_use]
    pub fn json(pool: PgPool) -> Self {
        Self::new(pool, JsonStrategy::new(), JsonMessageFactory::new())
    }
}

impl<S, F> EventStore<S, F>
where
    S: PersistenceStrategy,
    F: MessageFactory,
{
    #[must_use]
    pub fn new(pool: PgPool, strategy: S, factory: F) -> Self {
        Self {
            pool,
            strategy: Arc::new(strategy),
            factory: Arc::new(factory),
        }
    }

    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[must_use]
    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Best-effort check for the stream's table.
    ///
    /// Returns `false` for an empty name without touching the database, and
    /// `false` whenever the check itself fails. Use [`create`](Self::create)'s
    /// own check where correctness depends on the answer.
    #[tracing::instrument(skip(self))]
    pub async fn has_stream(&self, stream_name: &str) -> bool {
        if stream_name.is_empty() {
            return false;
        }
        match self.table_name(stream_name) {
            Ok(table) => self.table_exists(&table).await,
            Err(error) => {
                tracing::debug!(%error, "cannot resolve stream table");
                false
            }
        }
    }

    /// Resolve the table for `stream_name` through the strategy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Strategy`] if name generation fails and
    /// [`Error::TableNameEmpty`] if it yields an empty name.
    pub fn table_name(&self, stream_name: &str) -> Result<String, Error> {
        let table = self
            .strategy
            .generate_table_name(stream_name)
            .map_err(Error::Strategy)?;
        if table.is_empty() {
            return Err(Error::TableNameEmpty);
        }
        Ok(table)
    }

    async fn table_exists(&self, table: &str) -> bool {
        let mut statement = statement::table_exists(table);
        match statement.query().fetch_one(&self.pool).await {
            Ok(row) => sqlx::Row::try_get::<bool, _>(&row, 0).unwrap_or(false),
            Err(error) => {
                tracing::debug!(%error, table, "table existence check failed");
                false
            }
        }
    }
}
