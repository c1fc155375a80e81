#![doc = include_str!("../README.md")]

pub use ledgerfold_core::{
    config,
    config::ProjectorConfig,
    event,
    event::{DomainEvent, EventKind},
    message,
    message::{EventStream, Message, Payload, PayloadError, StoredMessage},
    metadata,
    metadata::{Constraint, Matcher, Metadata, Operator},
    projection,
    projection::{
        Checkpoint, ErrorAction, ErrorHandler, FailureContext, FailureStage, Projection,
        fail_fast, retry_then_fail,
    },
};
// Batches passed to `append_to` are non-empty by construction.
pub use nonempty::{NonEmpty, nonempty};

#[cfg(feature = "postgres")]
#[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
pub mod postgres {
    pub use ledgerfold_postgres::{
        BoxError, CheckpointStore, Error, EventStore, JsonMessageFactory, JsonStrategy,
        MessageFactory, PersistenceStrategy, ProjectorHandle, RowStream, SqlValue, Statement,
        StrategyError, StreamProjector, notify_channel, quote_ident, quote_literal,
        stream_projector_schema,
    };
}
