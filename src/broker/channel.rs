//! Producer-side channel: one raw queue going out, one processed queue coming back.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::model::{ChannelId, WorkItem};
use crate::queue::BoundedQueue;

/// The broker's view of a channel. Holds the queues but not the channel's life.
#[derive(Clone)]
pub(crate) struct ChannelLink {
    pub(crate) raw: Arc<BoundedQueue<WorkItem>>,
    pub(crate) processed: Arc<BoundedQueue<WorkItem>>,
    alive: Arc<AtomicBool>,
}

impl ChannelLink {
    /// False once the producer dropped its `ChannelPair`.
    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

/// A producer's channel into the broker.
///
/// The producer is the only owner. The broker keeps handles to the two queues
/// for routing, but the channel counts as retired the moment this value is
/// dropped: both queues are closed and the next enrollment reclaims the
/// broker's entries.
pub struct ChannelPair {
    raw: Arc<BoundedQueue<WorkItem>>,
    processed: Arc<BoundedQueue<WorkItem>>,
    alive: Arc<AtomicBool>,
}

impl ChannelPair {
    pub fn new(capacity: usize) -> Self {
        Self {
            raw: Arc::new(BoundedQueue::new(capacity)),
            processed: Arc::new(BoundedQueue::new(capacity)),
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    /// The id assigned at enrollment, if enrolled.
    pub fn id(&self) -> Option<ChannelId> {
        self.raw.id()
    }

    /// Queue an item for evaluation, waiting while the raw queue is full.
    pub async fn submit(&self, item: WorkItem) -> Result<()> {
        self.raw.push(item).await.map_err(|_| Error::QueueClosed)
    }

    /// Next evaluated item, waiting until one arrives.
    pub async fn next(&self) -> Option<WorkItem> {
        self.processed.pop().await
    }

    pub fn try_next(&self) -> Option<WorkItem> {
        self.processed.try_pop()
    }

    /// Gather up to `n` evaluated items, giving up at `timeout`.
    ///
    /// Returns whatever arrived before the deadline. Items lost with a
    /// crashed remote worker never come back, so callers regenerate the
    /// shortfall instead of waiting forever.
    pub async fn collect(&self, n: usize, timeout: Duration) -> Vec<WorkItem> {
        let deadline = Instant::now() + timeout;
        let mut items = Vec::with_capacity(n);
        while items.len() < n {
            match tokio::time::timeout_at(deadline, self.processed.pop()).await {
                Ok(Some(item)) => items.push(item),
                Ok(None) | Err(_) => break,
            }
        }
        items
    }

    /// Items still waiting for a consumer.
    pub fn pending(&self) -> usize {
        self.raw.len()
    }

    /// Evaluated items not yet collected.
    pub fn ready(&self) -> usize {
        self.processed.len()
    }

    pub fn capacity(&self) -> usize {
        self.raw.capacity()
    }

    /// Tag both queues. Fails if the pair was already enrolled somewhere.
    pub(crate) fn assign_id(&self, id: ChannelId) -> Result<()> {
        if !self.raw.assign_id(id) {
            let existing = self.raw.id().unwrap_or(id);
            return Err(Error::AlreadyEnrolled(existing));
        }
        self.processed.assign_id(id);
        Ok(())
    }

    pub(crate) fn link(&self) -> ChannelLink {
        ChannelLink {
            raw: Arc::clone(&self.raw),
            processed: Arc::clone(&self.processed),
            alive: Arc::clone(&self.alive),
        }
    }
}

impl Drop for ChannelPair {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Release);
        self.raw.close();
        self.processed.close();
    }
}

impl std::fmt::Debug for ChannelPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelPair")
            .field("id", &self.id())
            .field("pending", &self.pending())
            .field("ready", &self.ready())
            .finish()
    }
}
