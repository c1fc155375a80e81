//! Incremental projection runner.
//!
//! A [`StreamProjector`] folds one stream into a [`Projection`]'s state,
//! persisting a [`Checkpoint`](ledgerfold_core::projection::Checkpoint) after
//! every batch. [`run`](StreamProjector::run) performs catch-up passes until
//! the stream is exhausted; [`run_and_listen`](StreamProjector::run_and_listen)
//! keeps going, woken by `LISTEN`/`NOTIFY` or an idle timeout.
//!
//! Only one loop runs per projector instance. Callers that find it busy return
//! `Ok(())` straight away.
//!
//! ```ignore
//! let projector = Arc::new(StreamProjector::new(
//!     store,
//!     DepositedReport,
//!     "projections",
//!     retry_then_fail(3),
//!     ProjectorConfig::default(),
//! )?);
//!
//! let handle = Arc::clone(&projector).spawn();
//! // ...
//! handle.stop().await?;
//! ```

mod catch_up;
mod guard;
mod handle;
mod listen;

use std::{
    future::{Future, pending},
    sync::atomic::{AtomicBool, AtomicI64, Ordering},
};

use ledgerfold_core::{
    config::ProjectorConfig,
    projection::{ErrorAction, ErrorHandler, FailureContext, FailureStage, Projection},
};

pub use self::handle::ProjectorHandle;
use self::guard::RunnerGuard;
use crate::{
    Error,
    checkpoint::CheckpointStore,
    factory::MessageFactory,
    store::EventStore,
    strategy::PersistenceStrategy,
};

/// Drives a [`Projection`] over its stream.
pub struct StreamProjector<P, S, F> {
    store: EventStore<S, F>,
    checkpoints: CheckpointStore,
    projection: P,
    error_handler: ErrorHandler<Error>,
    config: ProjectorConfig,
    running: AtomicBool,
    /// Last position seen by a pass, reported to the error policy for
    /// failures outside a batch.
    last_position: AtomicI64,
}

impl<P, S, F> std::fmt::Debug for StreamProjector<P, S, F>
where
    P: Projection,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamProjector")
            .field("projection", &self.projection.name())
            .field("stream", &self.projection.stream())
            .field("checkpoints", &self.checkpoints)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<P, S, F> StreamProjector<P, S, F>
where
    P: Projection,
    S: PersistenceStrategy,
    F: MessageFactory,
{
    /// Create a projector storing its checkpoint in `projection_table`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the projection's name or stream,
    /// or `projection_table`, is empty.
    pub fn new(
        store: EventStore<S, F>,
        projection: P,
        projection_table: impl Into<String>,
        error_handler: ErrorHandler<Error>,
        config: ProjectorConfig,
    ) -> Result<Self, Error> {
        if projection.name().is_empty() {
            return Err(Error::InvalidArgument("projection.name"));
        }
        if projection.stream().is_empty() {
            return Err(Error::InvalidArgument("projection.stream"));
        }
        let checkpoints = CheckpointStore::new(store.pool().clone(), projection_table)?;

        Ok(Self {
            store,
            checkpoints,
            projection,
            error_handler,
            config,
            running: AtomicBool::new(false),
            last_position: AtomicI64::new(0),
        })
    }

    #[must_use]
    pub const fn projection(&self) -> &P {
        &self.projection
    }

    #[must_use]
    pub const fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    #[must_use]
    pub const fn config(&self) -> &ProjectorConfig {
        &self.config
    }

    /// Whether a `run*` loop currently holds this projector.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Catch up with the stream, then return.
    ///
    /// # Errors
    ///
    /// Returns the first failure the error policy answers with
    /// [`ErrorAction::Fail`].
    pub async fn run(&self) -> Result<(), Error> {
        self.run_until(pending()).await
    }

    /// Like [`run`](Self::run), returning `Ok(())` early once `shutdown`
    /// completes.
    ///
    /// # Errors
    ///
    /// Returns the first failure the error policy answers with
    /// [`ErrorAction::Fail`].
    #[tracing::instrument(skip_all, fields(projection = self.projection.name()))]
    pub async fn run_until(&self, shutdown: impl Future<Output = ()>) -> Result<(), Error> {
        let Some(_guard) = RunnerGuard::acquire(&self.running) else {
            tracing::debug!("projector already running");
            return Ok(());
        };

        tokio::select! {
            result = self.catch_up() => result,
            () = shutdown => {
                tracing::debug!("catch-up cancelled");
                Ok(())
            }
        }
    }

    /// Ask the error policy what to do about `error`, logging the decision.
    fn decide(&self, error: &Error, stage: FailureStage, position: i64, attempt: u32) -> ErrorAction {
        let context = FailureContext {
            projection: self.projection.name(),
            stage,
            position,
            attempt,
        };
        let action = (self.error_handler)(error, &context);
        match action {
            ErrorAction::Fail => {
                tracing::error!(%error, %stage, position, attempt, "projector failed");
            }
            ErrorAction::Retry => {
                tracing::warn!(%error, %stage, position, attempt, "retrying after failure");
            }
            ErrorAction::Ignore => {
                tracing::warn!(%error, %stage, position, attempt, "ignoring failure");
            }
        }
        action
    }

    fn record_position(&self, position: i64) {
        self.last_position.store(position, Ordering::Release);
    }

    fn recorded_position(&self) -> i64 {
        self.last_position.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        future::pending,
        sync::{
            Arc, Mutex,
            atomic::{AtomicU32, Ordering},
        },
        time::Duration,
    };

    use ledgerfold_core::{
        message::Message,
        projection::{ErrorAction, FailureStage, Projection, fail_fast},
    };

    use super::*;
    use crate::store::tests::disconnected_pool;

    #[derive(Debug, thiserror::Error)]
    #[error("never")]
    struct Never;

    struct Named(&'static str, &'static str);

    impl Projection for Named {
        type Error = Never;
        type State = u64;

        fn name(&self) -> &str {
            self.0
        }

        fn stream(&self) -> &str {
            self.1
        }

        fn init(&self) -> u64 {
            0
        }

        fn apply(&self, state: &mut u64, _message: &Message) -> Result<(), Never> {
            *state += 1;
            Ok(())
        }
    }

    fn projector(
        projection: Named,
        handler: ErrorHandler<Error>,
    ) -> Result<
        StreamProjector<Named, crate::JsonStrategy, crate::JsonMessageFactory>,
        Error,
    > {
        StreamProjector::new(
            EventStore::json(disconnected_pool()),
            projection,
            "projections",
            handler,
            ProjectorConfig::default()
                .with_retry_delay(Duration::from_millis(1))
                .with_idle_timeout(Duration::from_millis(10)),
        )
    }

    #[tokio::test]
    async fn construction_rejects_empty_names() {
        assert!(matches!(
            projector(Named("", "accounts"), fail_fast()),
            Err(Error::InvalidArgument("projection.name"))
        ));
        assert!(matches!(
            projector(Named("report", ""), fail_fast()),
            Err(Error::InvalidArgument("projection.stream"))
        ));
    }

    #[tokio::test]
    async fn fail_policy_surfaces_checkpoint_load_error() {
        let projector = projector(Named("report", "accounts"), fail_fast()).unwrap();

        let error = projector.run().await.unwrap_err();

        assert!(matches!(error, Error::Database(_)));
        assert!(!projector.is_running());
    }

    #[tokio::test]
    async fn ignore_policy_ends_the_pass_quietly() {
        let seen = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&seen);
        let handler: ErrorHandler<Error> = Arc::new(move |_: &Error, context: &FailureContext<'_>| {
            assert_eq!(context.stage, FailureStage::Load);
            assert_eq!(context.projection, "report");
            counter.fetch_add(1, Ordering::SeqCst);
            ErrorAction::Ignore
        });
        let projector = projector(Named("report", "accounts"), handler).unwrap();

        projector.run().await.unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_policy_counts_attempts() {
        let attempts = Arc::new(AtomicU32::new(0));
        let recorded = Arc::clone(&attempts);
        let handler: ErrorHandler<Error> = Arc::new(move |_: &Error, context: &FailureContext<'_>| {
            recorded.store(context.attempt, Ordering::SeqCst);
            if context.attempt < 3 {
                ErrorAction::Retry
            } else {
                ErrorAction::Fail
            }
        });
        let projector = projector(Named("report", "accounts"), handler).unwrap();

        assert!(projector.run().await.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn busy_projector_returns_immediately() {
        let projector = projector(Named("report", "accounts"), fail_fast()).unwrap();
        let _held = RunnerGuard::acquire(&projector.running).unwrap();

        projector.run().await.unwrap();
        projector.run_and_listen(pending()).await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_interrupts_retry_wait() {
        let handler: ErrorHandler<Error> =
            Arc::new(|_: &Error, _: &FailureContext<'_>| ErrorAction::Retry);
        let projector = projector(Named("report", "accounts"), handler).unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            projector.run_until(tokio::time::sleep(Duration::from_millis(300))),
        )
        .await
        .expect("shutdown should stop the retry loop");

        assert!(result.is_ok());
        assert!(!projector.is_running());
    }

    /// Projector on an unreachable pool that gives up listening after two
    /// connection attempts.
    fn listening(
        handler: ErrorHandler<Error>,
    ) -> StreamProjector<Named, crate::JsonStrategy, crate::JsonMessageFactory> {
        StreamProjector::new(
            EventStore::json(disconnected_pool()),
            Named("report", "accounts"),
            "projections",
            handler,
            ProjectorConfig::default()
                .with_retry_delay(Duration::from_millis(1))
                .with_idle_timeout(Duration::from_millis(10))
                .with_reconnect_delay(Duration::from_millis(1))
                .with_max_reconnect_attempts(2),
        )
        .unwrap()
    }

    fn recording(
        answer: impl Fn(&FailureContext<'_>) -> ErrorAction + Send + Sync + 'static,
    ) -> (ErrorHandler<Error>, Arc<Mutex<Vec<(FailureStage, u32)>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&calls);
        let handler: ErrorHandler<Error> = Arc::new(move |_: &Error, context: &FailureContext<'_>| {
            seen.lock().unwrap().push((context.stage, context.attempt));
            answer(context)
        });
        (handler, calls)
    }

    #[tokio::test]
    async fn unavailable_listener_is_handed_to_the_policy() {
        let (handler, calls) = recording(|_| ErrorAction::Fail);
        let projector = listening(handler);

        let error = projector.run_and_listen(pending()).await.unwrap_err();

        assert!(matches!(error, Error::ListenerUnavailable { attempts: 2, .. }));
        assert_eq!(*calls.lock().unwrap(), vec![(FailureStage::Listen, 1)]);
        assert!(!projector.is_running());
    }

    #[tokio::test]
    async fn retrying_an_unavailable_listener_starts_a_new_round() {
        let (handler, calls) = recording(|context| {
            if context.attempt < 2 {
                ErrorAction::Retry
            } else {
                ErrorAction::Fail
            }
        });
        let projector = listening(handler);

        let error = projector.run_and_listen(pending()).await.unwrap_err();

        assert!(matches!(error, Error::ListenerUnavailable { attempts: 2, .. }));
        assert_eq!(
            *calls.lock().unwrap(),
            vec![(FailureStage::Listen, 1), (FailureStage::Listen, 2)]
        );
    }

    #[tokio::test]
    async fn ignoring_an_unavailable_listener_falls_back_to_polling() {
        let (handler, calls) = recording(|context| match context.stage {
            FailureStage::Listen => ErrorAction::Ignore,
            _ => ErrorAction::Fail,
        });
        let projector = listening(handler);

        let error = projector.run_and_listen(pending()).await.unwrap_err();

        assert!(matches!(error, Error::Database(_)));
        assert_eq!(
            *calls.lock().unwrap(),
            vec![(FailureStage::Listen, 1), (FailureStage::Load, 1)]
        );
    }
}
