use std::sync::Arc;

use ledgerfold_core::projection::Projection;
use tokio::{sync::oneshot, task::JoinHandle};

use super::StreamProjector;
use crate::{Error, factory::MessageFactory, strategy::PersistenceStrategy};

/// Handle to a projector running on its own task.
///
/// Dropping the handle does **not** stop the projector. Call [`stop()`] for
/// graceful shutdown.
///
/// [`stop()`]: ProjectorHandle::stop
#[derive(Debug)]
pub struct ProjectorHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<(), Error>>,
}

impl ProjectorHandle {
    /// Stop the projector and wait for it to finish.
    ///
    /// # Errors
    ///
    /// Returns the projector's error if it failed before being stopped, or
    /// [`Error::TaskPanicked`] if its task panicked.
    pub async fn stop(mut self) -> Result<(), Error> {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        self.task.await.map_err(|_| Error::TaskPanicked)?
    }

    /// Check if the projector task is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl<P, S, F> StreamProjector<P, S, F>
where
    P: Projection,
    S: PersistenceStrategy + 'static,
    F: MessageFactory + 'static,
{
    /// Run [`run_and_listen`](Self::run_and_listen) on a new Tokio task.
    #[must_use]
    pub fn spawn(self: Arc<Self>) -> ProjectorHandle {
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            self.run_and_listen(async move {
                // A dropped handle leaves the projector running.
                if stop_rx.await.is_err() {
                    std::future::pending::<()>().await;
                }
            })
            .await
        });

        ProjectorHandle {
            stop_tx: Some(stop_tx),
            task,
        }
    }
}
