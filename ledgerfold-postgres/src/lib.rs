//! `PostgreSQL` backend for ledgerfold.
//!
//! - [`EventStore`] - append-only stream tables: create, check, append, load
//! - [`CheckpointStore`] - per-projection `(position, state)` rows
//! - [`StreamProjector`] - folds a stream into a projection, woken by
//!   `LISTEN`/`NOTIFY`
//!
//! Table layout and row encoding are pluggable through
//! [`PersistenceStrategy`] and [`MessageFactory`]; [`JsonStrategy`] and
//! [`JsonMessageFactory`] store one stream per table with `jsonb` payloads.

pub mod checkpoint;
mod error;
pub mod factory;
pub mod projector;
pub mod statement;
mod store;
pub mod strategy;

pub use checkpoint::{CheckpointStore, notify_channel, stream_projector_schema};
pub use error::{BoxError, Error};
pub use factory::{JsonMessageFactory, MessageFactory, RowStream};
pub use projector::{ProjectorHandle, StreamProjector};
pub use statement::{SqlValue, Statement, quote_ident, quote_literal};
pub use store::EventStore;
pub use strategy::{JsonStrategy, PersistenceStrategy, StrategyError};
