//! Read-side primitives.
//!
//! A [`Projection`] folds messages one at a time into opaque state. Runners
//! persist that state together with the log position it covers as a
//! [`Checkpoint`], and consult an [`ErrorHandler`] whenever folding or
//! persisting fails.
use std::{fmt, sync::Arc};

use serde::{Serialize, de::DeserializeOwned};

use crate::{message::Message, metadata::Matcher};

/// User-defined fold over a stream.
///
/// Implementations should ignore messages whose payload kind they do not
/// recognise. Ignored messages still advance the checkpoint because positions
/// track raw log offsets, not the number of applied messages.
///
/// ```ignore
/// impl Projection for DepositedReport {
///     type State = Totals;
///     type Error = PayloadError;
///
///     fn name(&self) -> &str { "deposited_report" }
///     fn stream(&self) -> &str { "accounts" }
///     fn init(&self) -> Totals { Totals::default() }
///
///     fn apply(&self, state: &mut Totals, message: &Message) -> Result<(), PayloadError> {
///         if let Some(deposited) = message.payload.decode::<AccountDeposited>() {
///             state.total_amount += deposited?.amount;
///         }
///         Ok(())
///     }
/// }
/// ```
// ANCHOR: projection_trait
pub trait Projection: Send + Sync + 'static {
    /// Folded state, persisted as JSON alongside the checkpoint.
    type State: Serialize + DeserializeOwned + Clone + Send + Sync;
    /// Error raised when a message cannot be applied.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Unique checkpoint key for this projection.
    fn name(&self) -> &str;

    /// Stream the projection folds.
    fn stream(&self) -> &str;

    /// State before any message has been applied.
    fn init(&self) -> Self::State;

    /// Fold a single message into `state`.
    ///
    /// # Errors
    ///
    /// Returns `Self::Error` if the message cannot be applied. The runner
    /// discards any partial change to `state` before consulting its
    /// [`ErrorHandler`].
    fn apply(&self, state: &mut Self::State, message: &Message) -> Result<(), Self::Error>;

    /// Optional metadata filter applied to every load.
    fn matcher(&self) -> Option<Matcher> {
        None
    }
}
// ANCHOR_END: projection_trait

/// Persisted progress of a projection.
///
/// `state` is the fold of every log entry with a position at or below
/// `position`. `None` means nothing has been stored yet and the projection's
/// [`init`](Projection::init) state applies.
#[derive(Clone, Debug, PartialEq)]
pub struct Checkpoint {
    pub name: String,
    pub position: i64,
    pub state: Option<serde_json::Value>,
}

impl Checkpoint {
    /// A checkpoint that has not covered any message yet.
    #[must_use]
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            position: 0,
            state: None,
        }
    }

    /// Position the next load should start from.
    #[must_use]
    pub const fn next_position(&self) -> i64 {
        self.position.saturating_add(1)
    }
}

/// Decision returned by an [`ErrorHandler`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorAction {
    /// Abort the current run and return the error to the caller.
    Fail,
    /// Attempt the same unit of work again without advancing.
    Retry,
    /// Skip the failing unit and continue.
    Ignore,
}

/// Step of a catch-up pass that failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureStage {
    /// Loading messages from the event store.
    Load,
    /// Folding a message into the projection state.
    Apply,
    /// Writing the checkpoint.
    Persist,
    /// Maintaining the wakeup subscription.
    Listen,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Load => "load",
            Self::Apply => "apply",
            Self::Persist => "persist",
            Self::Listen => "listen",
        })
    }
}

/// Where and how often a failure happened.
#[derive(Clone, Copy, Debug)]
pub struct FailureContext<'a> {
    pub projection: &'a str,
    pub stage: FailureStage,
    /// Position of the message being applied, or the last applied position
    /// for stages that do not concern a single message.
    pub position: i64,
    /// Number of attempts made so far for this unit of work, starting at 1.
    pub attempt: u32,
}

/// Caller-supplied failure policy.
pub type ErrorHandler<E> = Arc<dyn Fn(&E, &FailureContext<'_>) -> ErrorAction + Send + Sync>;

/// Policy that fails on the first error.
#[must_use]
pub fn fail_fast<E: 'static>() -> ErrorHandler<E> {
    Arc::new(|_: &E, _: &FailureContext<'_>| ErrorAction::Fail)
}

/// Policy that retries up to `max_attempts` times, then fails.
#[must_use]
pub fn retry_then_fail<E: 'static>(max_attempts: u32) -> ErrorHandler<E> {
    Arc::new(move |_: &E, context: &FailureContext<'_>| {
        if context.attempt < max_attempts {
            ErrorAction::Retry
        } else {
            ErrorAction::Fail
        }
    })
}
