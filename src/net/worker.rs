//! The loop a remote worker process runs: fetch, evaluate, return, repeat.

use std::sync::Arc;

use tracing::{Instrument, error, info, warn};

use super::client::{NetworkClient, Retrieval};
use super::protocol;
use crate::consumer::{Evaluator, evaluate};
use crate::error::{Error, Result};
use crate::group::Interrupt;
use crate::model::WorkItem;
use crate::telemetry::spans;

/// Evaluates work handed out by a broker on another machine.
pub struct RemoteWorker<E> {
    client: NetworkClient,
    evaluator: Arc<E>,
}

impl<E: Evaluator> RemoteWorker<E> {
    pub fn new(client: NetworkClient, evaluator: Arc<E>) -> Self {
        Self { client, evaluator }
    }

    /// Run until interrupted or until the client gives up.
    ///
    /// Returns the number of results submitted on interrupt. Connection
    /// exhaustion and stall limits come back as errors; the caller decides
    /// whether to start over. A panicking evaluator costs only the item it
    /// was working on.
    pub async fn run(mut self, interrupt: Interrupt) -> Result<u64> {
        let endpoint = self
            .client
            .endpoints()
            .first()
            .map(ToString::to_string)
            .unwrap_or_default();
        let span = spans::worker_span(&endpoint);

        async move {
            let mut submitted: u64 = 0;
            loop {
                let retrieval = tokio::select! {
                    _ = interrupt.interrupted() => break,
                    retrieval = self.client.retrieve() => retrieval?,
                };
                let envelope = match retrieval {
                    Retrieval::Work(envelope) => envelope,
                    Retrieval::Retry => continue,
                };

                let (id, payload) = match protocol::unwrap(envelope) {
                    Ok(parts) => parts,
                    Err(e) => {
                        warn!("skipping malformed work: {e}");
                        continue;
                    }
                };

                let item = match evaluate(&self.evaluator, WorkItem::new(payload)).await {
                    Ok(item) => item,
                    Err(e) => {
                        error!(channel = %id, "evaluator crashed, item dropped: {e}");
                        continue;
                    }
                };
                let envelope = protocol::wrap(id, &item.payload);
                self.client.submit(item.fitness, item.dirty, &envelope).await?;
                submitted += 1;
            }

            info!(submitted, "remote worker interrupted");
            Ok::<u64, Error>(submitted)
        }
        .instrument(span)
        .await
    }
}
