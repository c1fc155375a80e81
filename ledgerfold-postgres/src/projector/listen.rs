use std::{future::Future, time::Duration};

use ledgerfold_core::projection::{ErrorAction, FailureStage, Projection};
use sqlx::postgres::PgListener;

use super::{RunnerGuard, StreamProjector};
use crate::{
    Error, checkpoint::notify_channel, factory::MessageFactory, strategy::PersistenceStrategy,
};

/// Why the wait step ended.
enum Wakeup {
    Notified,
    Idle,
    /// The listener lost its connection and has already reconnected and
    /// re-subscribed. Anything published meanwhile was dropped.
    ConnectionLost,
    Failed(sqlx::Error),
}

impl<P, S, F> StreamProjector<P, S, F>
where
    P: Projection,
    S: PersistenceStrategy,
    F: MessageFactory,
{
    /// Catch up, then keep catching up on every wakeup until `shutdown`
    /// completes.
    ///
    /// Wakeups are notifications on the stream's channel or, failing those,
    /// the configured idle timeout. A lost subscription is re-established and
    /// followed by an immediate catch-up pass. Returns `Ok(())` straight away
    /// if another loop already holds this projector.
    ///
    /// # Errors
    ///
    /// Returns the first failure the error policy answers with
    /// [`ErrorAction::Fail`], including [`Error::ListenerUnavailable`] once
    /// reconnecting has failed `max_reconnect_attempts` times in a row.
    #[tracing::instrument(skip_all, fields(projection = self.projection.name()))]
    pub async fn run_and_listen(&self, shutdown: impl Future<Output = ()>) -> Result<(), Error> {
        let Some(_guard) = RunnerGuard::acquire(&self.running) else {
            tracing::debug!("projector already running");
            return Ok(());
        };

        tokio::select! {
            result = self.listen_loop() => result,
            () = shutdown => {
                tracing::debug!("projector stopped");
                Ok(())
            }
        }
    }

    async fn listen_loop(&self) -> Result<(), Error> {
        let channel = notify_channel(self.projection.stream());
        let mut listener = self.subscribe(&channel, false).await?;
        self.catch_up().await?;

        loop {
            match wait(listener.as_mut(), self.config.idle_timeout()).await {
                Wakeup::Notified => tracing::trace!("wakeup received"),
                Wakeup::Idle => tracing::trace!("idle timeout elapsed"),
                Wakeup::ConnectionLost => {
                    tracing::warn!(%channel, "listener connection lost");
                }
                Wakeup::Failed(error) => {
                    tracing::warn!(%error, %channel, "listener failed, resubscribing");
                    drop(listener.take());
                    listener = self.subscribe(&channel, true).await?;
                }
            }
            self.catch_up().await?;
        }
    }

    /// Open a listener on `channel`, retrying with `reconnect_delay` between
    /// attempts.
    ///
    /// `None` means the error policy chose to ignore an unavailable listener;
    /// the loop then relies on the idle timeout alone.
    async fn subscribe(&self, channel: &str, reconnect: bool) -> Result<Option<PgListener>, Error> {
        let max_attempts = self.config.max_reconnect_attempts.max(1);
        let mut failures = 0_u32;
        let mut policy_attempt = 1_u32;
        let mut delay = reconnect;

        loop {
            if delay {
                tokio::time::sleep(self.config.reconnect_delay()).await;
            }
            delay = true;

            let source = match self.connect_listener(channel).await {
                Ok(listener) => {
                    tracing::debug!(channel, "listening for wakeups");
                    return Ok(Some(listener));
                }
                Err(source) => source,
            };

            failures += 1;
            tracing::warn!(error = %source, channel, failures, "listener connection failed");
            if failures < max_attempts {
                continue;
            }

            let error = Error::ListenerUnavailable {
                attempts: failures,
                source,
            };
            match self.decide(&error, FailureStage::Listen, self.recorded_position(), policy_attempt) {
                ErrorAction::Fail => return Err(error),
                ErrorAction::Ignore => return Ok(None),
                ErrorAction::Retry => {
                    failures = 0;
                    policy_attempt = policy_attempt.saturating_add(1);
                }
            }
        }
    }

    async fn connect_listener(&self, channel: &str) -> Result<PgListener, sqlx::Error> {
        let mut listener = PgListener::connect_with(self.store.pool()).await?;
        listener.listen(channel).await?;
        Ok(listener)
    }
}

async fn wait(listener: Option<&mut PgListener>, idle: Duration) -> Wakeup {
    let Some(listener) = listener else {
        tokio::time::sleep(idle).await;
        return Wakeup::Idle;
    };

    match tokio::time::timeout(idle, listener.try_recv()).await {
        Err(_elapsed) => Wakeup::Idle,
        Ok(Ok(Some(_notification))) => Wakeup::Notified,
        Ok(Ok(None)) => Wakeup::ConnectionLost,
        Ok(Err(error)) => Wakeup::Failed(error),
    }
}
