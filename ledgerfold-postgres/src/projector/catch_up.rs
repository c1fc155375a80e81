use std::future::{Future, ready};

use ledgerfold_core::{
    message::StoredMessage,
    metadata::Matcher,
    projection::{Checkpoint, ErrorAction, FailureStage, Projection},
};
use tokio_stream::StreamExt as _;

use super::StreamProjector;
use crate::{Error, factory::MessageFactory, strategy::PersistenceStrategy};

/// Outcome of a unit of work run under the error policy.
enum Step<T> {
    Done(T),
    Skipped,
}

impl<P, S, F> StreamProjector<P, S, F>
where
    P: Projection,
    S: PersistenceStrategy,
    F: MessageFactory,
{
    /// One catch-up pass: apply everything after the stored checkpoint, batch
    /// by batch, persisting after each batch.
    pub(super) async fn catch_up(&self) -> Result<(), Error> {
        let name = self.projection.name();

        let Step::Done((mut position, mut state)) = self
            .attempt(FailureStage::Load, || self.load_checkpoint(name))
            .await?
        else {
            return Ok(());
        };
        self.record_position(position);

        let matcher = self.projection.matcher();
        let batch_size = self.config.batch_size.max(1);
        let mut applied_total = 0_usize;

        loop {
            let from = position.saturating_add(1);
            let Step::Done(batch) = self
                .attempt_at(FailureStage::Load, position, || {
                    self.load_batch(from, batch_size, matcher.as_ref())
                })
                .await?
            else {
                break;
            };
            if batch.is_empty() {
                break;
            }

            for stored in &batch {
                let applied = self
                    .attempt_at(FailureStage::Apply, stored.position, || {
                        ready(self.apply_one(&state, stored))
                    })
                    .await?;
                if let Step::Done(next) = applied {
                    state = next;
                }
                position = stored.position;
            }
            applied_total += batch.len();

            self.attempt_at(FailureStage::Persist, position, || {
                self.persist(name, position, &state)
            })
            .await?;
            self.record_position(position);

            tracing::debug!(position, batch = batch.len(), "batch applied");
            if batch.len() < batch_size as usize {
                break;
            }
        }

        tracing::trace!(position, applied = applied_total, "catch-up complete");
        Ok(())
    }

    async fn load_checkpoint(&self, name: &str) -> Result<(i64, P::State), Error> {
        let Checkpoint {
            position, state, ..
        } = self.checkpoints.load_or_create(name).await?;
        let state = match state {
            Some(state) => serde_json::from_value(state)?,
            None => self.projection.init(),
        };
        Ok((position, state))
    }

    async fn load_batch(
        &self,
        from: i64,
        batch_size: u32,
        matcher: Option<&Matcher>,
    ) -> Result<Vec<StoredMessage>, Error> {
        let mut stream = self
            .store
            .load(self.projection.stream(), from, Some(batch_size), matcher)
            .await?;

        let mut batch = Vec::new();
        while let Some(stored) = stream.next().await {
            batch.push(stored?);
        }
        Ok(batch)
    }

    /// Apply one message to a copy of `state`, so a failure leaves no partial
    /// change behind.
    fn apply_one(&self, state: &P::State, stored: &StoredMessage) -> Result<P::State, Error> {
        let mut next = state.clone();
        self.projection
            .apply(&mut next, &stored.message)
            .map_err(|source| Error::Apply {
                position: stored.position,
                source: Box::new(source),
            })?;
        Ok(next)
    }

    async fn persist(&self, name: &str, position: i64, state: &P::State) -> Result<(), Error> {
        let checkpoint = Checkpoint {
            name: name.to_owned(),
            position,
            state: Some(serde_json::to_value(state)?),
        };
        self.checkpoints.persist(&checkpoint).await
    }

    async fn attempt<T, Fut>(
        &self,
        stage: FailureStage,
        op: impl FnMut() -> Fut,
    ) -> Result<Step<T>, Error>
    where
        Fut: Future<Output = Result<T, Error>>,
    {
        self.attempt_at(stage, self.recorded_position(), op).await
    }

    /// Run `op` until it succeeds or the error policy stops retrying.
    async fn attempt_at<T, Fut>(
        &self,
        stage: FailureStage,
        position: i64,
        mut op: impl FnMut() -> Fut,
    ) -> Result<Step<T>, Error>
    where
        Fut: Future<Output = Result<T, Error>>,
    {
        let mut attempt = 1_u32;
        loop {
            let error = match op().await {
                Ok(value) => return Ok(Step::Done(value)),
                Err(error) => error,
            };

            match self.decide(&error, stage, position, attempt) {
                ErrorAction::Fail => return Err(error),
                ErrorAction::Ignore => return Ok(Step::Skipped),
                ErrorAction::Retry => {
                    attempt = attempt.saturating_add(1);
                    tokio::time::sleep(self.config.retry_delay()).await;
                }
            }
        }
    }
}
