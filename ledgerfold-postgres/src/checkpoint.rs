//! Projection checkpoints and the wakeup wiring a projector relies on.
//!
//! # Schema
//!
//! [`stream_projector_schema`] yields the checkpoint table:
//!
//! ```sql
//! CREATE TABLE "<projection_table>"(
//!     no       SERIAL,
//!     name     TEXT UNIQUE NOT NULL,
//!     position BIGINT NOT NULL DEFAULT 0,
//!     state    JSONB NULL,
//!     PRIMARY KEY (no)
//! )
//! ```
//!
//! followed by a trigger function and a statement-level `AFTER INSERT`
//! trigger on the event table that publish on [`notify_channel`]. The event
//! table carries one such trigger however many checkpoint tables follow it.

use ledgerfold_core::projection::Checkpoint;
use sqlx::{PgPool, Row, types::Json};

use crate::{
    Error,
    statement::{quote_ident, quote_literal},
    strategy::sanitize,
};

/// Wakeup channel for appends to `stream_name`.
#[must_use]
pub fn notify_channel(stream_name: &str) -> String {
    format!("ledgerfold_{}", sanitize(stream_name))
}

/// DDL provisioning a stream projector.
///
/// Creates the checkpoint table `projection_table`, then wires `event_table`
/// so that every insert statement notifies [`notify_channel`]`(stream_name)`.
/// The checkpoint table is created without an existence check, so run it
/// once per projection table. The trigger is replaced rather than added, so
/// several projection tables can follow one event table.
#[must_use]
pub fn stream_projector_schema(
    projection_table: &str,
    stream_name: &str,
    event_table: &str,
) -> Vec<String> {
    let checkpoints = quote_ident(projection_table);
    let events = quote_ident(event_table);
    let function = quote_ident(&format!("{event_table}_notify"));
    let channel = quote_literal(&notify_channel(stream_name));

    vec![
        format!(
            "CREATE TABLE {checkpoints}(
                no SERIAL,
                name TEXT UNIQUE NOT NULL,
                position BIGINT NOT NULL DEFAULT 0,
                state JSONB NULL,
                PRIMARY KEY (no)
            )"
        ),
        format!(
            "CREATE OR REPLACE FUNCTION {function}() RETURNS trigger AS $$
            BEGIN
                PERFORM pg_notify({channel}, '');
                RETURN NULL;
            END;
            $$ LANGUAGE plpgsql"
        ),
        format!("DROP TRIGGER IF EXISTS {function} ON {events}"),
        format!(
            "CREATE TRIGGER {function} AFTER INSERT ON {events}
                FOR EACH STATEMENT EXECUTE FUNCTION {function}()"
        ),
    ]
}

/// Reads and writes projection checkpoints in one table.
#[derive(Clone)]
pub struct CheckpointStore {
    pool: PgPool,
    table: String,
}

impl std::fmt::Debug for CheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointStore")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl CheckpointStore {
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `table` is empty.
    pub fn new(pool: PgPool, table: impl Into<String>) -> Result<Self, Error> {
        let table = table.into();
        if table.is_empty() {
            return Err(Error::InvalidArgument("projection_table"));
        }
        Ok(Self { pool, table })
    }

    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Run [`stream_projector_schema`] for this table in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for an empty stream or event table
    /// name, and [`Error::Database`] if any statement fails. Nothing is left
    /// behind on failure.
    #[tracing::instrument(skip(self))]
    pub async fn provision(&self, stream_name: &str, event_table: &str) -> Result<(), Error> {
        if stream_name.is_empty() {
            return Err(Error::InvalidArgument("stream_name"));
        }
        if event_table.is_empty() {
            return Err(Error::InvalidArgument("event_table"));
        }

        let mut tx = self.pool.begin().await?;
        for query in stream_projector_schema(&self.table, stream_name, event_table) {
            sqlx::query(query.as_str()).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Fetch the checkpoint for `name`, inserting `(name, 0, NULL)` first if
    /// it has never been stored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for an empty name and
    /// [`Error::Database`] if either query fails.
    #[tracing::instrument(skip(self))]
    pub async fn load_or_create(&self, name: &str) -> Result<Checkpoint, Error> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("name"));
        }
        let table = quote_ident(&self.table);

        sqlx::query(&format!(
            "INSERT INTO {table} (name, position, state) VALUES ($1, 0, NULL)
             ON CONFLICT (name) DO NOTHING"
        ))
        .bind(name)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(&format!(
            "SELECT position, state FROM {table} WHERE name = $1"
        ))
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        let position: i64 = row.try_get("position")?;
        let state: Option<Json<serde_json::Value>> = row.try_get("state")?;

        tracing::trace!(position, has_state = state.is_some(), "checkpoint loaded");
        Ok(Checkpoint {
            name: name.to_owned(),
            position,
            state: state.map(|state| state.0),
        })
    }

    /// Store `checkpoint` unless the stored position is already ahead of it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleCheckpoint`] if the row is missing or holds a
    /// greater position, and [`Error::Database`] if the update fails.
    #[tracing::instrument(skip(self, checkpoint), fields(name = %checkpoint.name, position = checkpoint.position))]
    pub async fn persist(&self, checkpoint: &Checkpoint) -> Result<(), Error> {
        let result = sqlx::query(&format!(
            "UPDATE {} SET position = $2, state = $3 WHERE name = $1 AND position <= $2",
            quote_ident(&self.table)
        ))
        .bind(&checkpoint.name)
        .bind(checkpoint.position)
        .bind(checkpoint.state.clone().map(Json))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::StaleCheckpoint {
                name: checkpoint.name.clone(),
                position: checkpoint.position,
            });
        }
        Ok(())
    }
}
