/// Boxed error returned by pluggable strategies and factories.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error type for `PostgreSQL` event store and projector operations.
///
/// Sentinel conditions are distinct variants so callers can match on them;
/// errors raised by a [`PersistenceStrategy`](crate::PersistenceStrategy),
/// a [`MessageFactory`](crate::MessageFactory) or a projection keep the
/// original error as their source.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required argument was empty.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// `create` was called for a stream whose table already exists.
    #[error("table already exists")]
    TableAlreadyExists,
    /// The persistence strategy produced no schema statements.
    #[error("persistence strategy returned no create table queries")]
    NoCreateTableQueries,
    /// The persistence strategy produced an empty table name.
    #[error("persistence strategy returned an empty table name")]
    TableNameEmpty,
    /// The persistence strategy failed (table naming or row encoding).
    #[error("persistence strategy error: {0}")]
    Strategy(#[source] BoxError),
    /// The message factory failed to materialise a row.
    #[error("message factory error: {0}")]
    Factory(#[source] BoxError),
    /// The strategy encoded a different number of values than its columns
    /// require.
    #[error("expected {expected} values for the insert, strategy produced {actual}")]
    ColumnCountMismatch { expected: usize, actual: usize },
    /// Query execution or transaction failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// A projection failed to apply the message at `position`.
    #[error("projection failed to apply message at position {position}: {source}")]
    Apply {
        position: i64,
        #[source]
        source: BoxError,
    },
    /// Projection state could not be converted to or from JSON.
    #[error("projection state serialisation error: {0}")]
    State(#[from] serde_json::Error),
    /// The stored checkpoint is already ahead of the position being written.
    #[error("checkpoint `{name}` is ahead of position {position}")]
    StaleCheckpoint { name: String, position: i64 },
    /// The wakeup subscription could not be re-established.
    #[error("listener unavailable after {attempts} attempts: {source}")]
    ListenerUnavailable {
        attempts: u32,
        #[source]
        source: sqlx::Error,
    },
    /// A spawned projector task panicked.
    #[error("projector task panicked")]
    TaskPanicked,
}
