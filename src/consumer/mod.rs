//! Consumers: whatever pulls work out of the broker and hands results back.
//!
//! Two kinds ship with the crate. [`LocalConsumer`] evaluates items in this
//! process. [`NetworkConsumer`] serves remote worker processes over TCP and
//! lets them do the evaluating.

pub mod local;
pub mod network;

pub use local::LocalConsumer;
pub use network::NetworkConsumer;

use std::future::Future;
use std::sync::Arc;

use tracing::warn;

use crate::broker::Broker;
use crate::error::Result;
use crate::group::Interrupt;
use crate::model::WorkItem;

/// Computes the fitness of a work item.
///
/// This is the only thing the broker layer needs from the payload: given
/// the bytes, produce a fitness and clear the dirty flag. Evaluation is
/// assumed to be CPU-bound and runs on the blocking thread pool.
pub trait Evaluator: Send + Sync + 'static {
    fn evaluate(&self, item: &mut WorkItem) -> Result<()>;
}

impl<F> Evaluator for F
where
    F: Fn(&mut WorkItem) -> Result<()> + Send + Sync + 'static,
{
    fn evaluate(&self, item: &mut WorkItem) -> Result<()> {
        self(item)
    }
}

/// A processing loop attached to a broker.
pub trait Consumer: Send + Sync + 'static {
    /// Short label used to name the consumer's task, e.g. "local".
    fn kind(&self) -> &'static str;

    /// Run until `interrupt` fires: take work from `broker`, get it
    /// evaluated, and put the results back.
    fn process(
        self: Arc<Self>,
        broker: Arc<Broker>,
        interrupt: Interrupt,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Evaluate `item` on the blocking pool.
///
/// A failed evaluation is logged and the item comes back still dirty, so the
/// producer sees it was not scored. Only a panicking evaluator loses the item.
pub(crate) async fn evaluate<E: Evaluator>(evaluator: &Arc<E>, mut item: WorkItem) -> Result<WorkItem> {
    let evaluator = Arc::clone(evaluator);
    let (item, outcome) = tokio::task::spawn_blocking(move || {
        let outcome = evaluator.evaluate(&mut item);
        (item, outcome)
    })
    .await?;

    if let Err(e) = outcome {
        warn!(bytes = item.payload.len(), "evaluation failed: {e}");
    }
    Ok(item)
}
