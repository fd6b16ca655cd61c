//! In-process consumer: evaluates work on this machine's cores.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use super::{Consumer, Evaluator, evaluate};
use crate::broker::Broker;
use crate::error::Result;
use crate::group::Interrupt;

/// How long a local consumer waits on one channel before moving on to the next.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Pulls items from the broker, evaluates them, and puts the results back.
pub struct LocalConsumer<E> {
    evaluator: Arc<E>,
    poll_interval: Duration,
}

impl<E: Evaluator> LocalConsumer<E> {
    pub fn new(evaluator: Arc<E>) -> Self {
        Self {
            evaluator,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Bound each wait in `get`, so an idle channel cannot pin this consumer
    /// while other channels have work.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

impl<E: Evaluator> Consumer for LocalConsumer<E> {
    fn kind(&self) -> &'static str {
        "local"
    }

    async fn process(self: Arc<Self>, broker: Arc<Broker>, interrupt: Interrupt) -> Result<()> {
        let mut processed: u64 = 0;

        loop {
            let next = tokio::select! {
                _ = interrupt.interrupted() => break,
                next = broker.get_timeout(self.poll_interval) => next,
            };
            let Some((item, id)) = next else {
                continue;
            };

            let item = match evaluate(&self.evaluator, item).await {
                Ok(item) => item,
                Err(e) => {
                    error!(channel = %id, "evaluator crashed, item dropped: {e}");
                    continue;
                }
            };

            // Deliver first: an interrupt only wins if the put would block,
            // and then the evaluated item is lost.
            tokio::select! {
                biased;
                _ = broker.put(id, item) => processed += 1,
                _ = interrupt.interrupted() => {
                    warn!(channel = %id, "interrupted while delivering, result dropped");
                    break;
                }
            }
        }

        debug!(processed, "local consumer interrupted");
        Ok(())
    }
}
