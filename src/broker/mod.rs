//! The broker: hub between producers of work and the consumers evaluating it.
//!
//! Producers enroll a [`ChannelPair`] and talk only to their own queues.
//! Consumers call [`Broker::get`], which walks the enrolled raw queues round
//! robin, and hand results back with [`Broker::put`], which routes by channel
//! id. Neither side ever learns who is on the other end.
//!
//! The raw side and the processed side have separate locks, so waiting in
//! `get` never holds up an unrelated `put`. When both are needed the raw lock
//! is taken first. Locks are only held to read or mutate the channel
//! collections, never while waiting on a queue.

pub mod channel;

pub use channel::ChannelPair;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use opentelemetry::KeyValue;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::config::BrokerConfig;
use crate::consumer::{Consumer, Evaluator, LocalConsumer};
use crate::error::Result;
use crate::group::TaskGroup;
use crate::model::{ChannelId, WorkItem};
use crate::queue::BoundedQueue;
use crate::telemetry::metrics;
use channel::ChannelLink;

struct RawSide {
    /// Enrollment order. `cursor` points at the next channel `get` will try.
    links: Vec<(ChannelId, ChannelLink)>,
    cursor: usize,
    next_id: ChannelId,
}

struct ProcessedSide {
    links: HashMap<ChannelId, ChannelLink>,
    ever_enrolled: bool,
}

/// Dispatches work items from many producers to many consumers.
///
/// Construct one per process and pass the `Arc` to whoever needs it.
pub struct Broker {
    config: BrokerConfig,
    raw: Mutex<RawSide>,
    processed: Mutex<ProcessedSide>,
    raw_ready: Notify,
    processed_ready: Notify,
    consumers: TaskGroup,
    consumer_seq: AtomicUsize,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            raw: Mutex::new(RawSide {
                links: Vec::new(),
                cursor: 0,
                next_id: ChannelId(0),
            }),
            processed: Mutex::new(ProcessedSide {
                links: HashMap::new(),
                ever_enrolled: false,
            }),
            raw_ready: Notify::new(),
            processed_ready: Notify::new(),
            consumers: TaskGroup::new(),
            consumer_seq: AtomicUsize::new(0),
        })
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// A channel sized with the configured queue capacity. Not yet enrolled.
    pub fn channel(&self) -> ChannelPair {
        ChannelPair::new(self.config.queue_capacity)
    }

    /// Register a producer's channel and return its id.
    ///
    /// Reclaims the entries of every channel whose producer has gone away and
    /// restarts the round-robin walk at the first channel, so a newly joined
    /// producer is served promptly.
    ///
    /// Both sides are updated under the raw lock, so they always hold the
    /// same ids. The processed entry goes in before the raw entry becomes
    /// visible to `get`, so a result can never beat its channel's route.
    pub fn enroll(&self, pair: &ChannelPair) -> Result<ChannelId> {
        let link = pair.link();

        let (id, reclaimed) = {
            let mut raw = self.lock_raw();
            let id = raw.next_id;
            pair.assign_id(id)?;
            raw.next_id = id.next(self.config.max_channel_id);

            // One liveness read per channel; both sides drop exactly these.
            let mut dead = Vec::new();
            raw.links.retain(|(link_id, l)| {
                let alive = l.is_alive();
                if !alive {
                    dead.push(*link_id);
                }
                alive
            });

            {
                let mut processed = self.lock_processed();
                for id in &dead {
                    processed.links.remove(id);
                }
                processed.links.insert(id, link.clone());
                processed.ever_enrolled = true;
            }

            raw.links.push((id, link));
            raw.cursor = 0;
            (id, dead.len())
        };
        self.processed_ready.notify_waiters();
        self.raw_ready.notify_waiters();

        metrics::channels_enrolled().add(1, &[]);
        if reclaimed > 0 {
            metrics::channels_reclaimed().add(reclaimed as u64, &[]);
        }
        info!(channel = %id, reclaimed, "channel enrolled");
        Ok(id)
    }

    /// Take the next work item, round robin across enrolled channels.
    ///
    /// Waits until a channel exists, then waits on the selected channel until
    /// it yields an item. Channels whose producer is gone are skipped once
    /// their raw queue is drained.
    pub async fn get(&self) -> (WorkItem, ChannelId) {
        loop {
            let enrolled = self.raw_ready.notified();
            tokio::pin!(enrolled);
            enrolled.as_mut().enable();

            match self.select_raw() {
                Some((id, queue)) => {
                    if let Some(item) = queue.pop().await {
                        metrics::items_dispatched().add(1, &[]);
                        debug!(channel = %id, "work item dispatched");
                        return (item, id);
                    }
                    debug!(channel = %id, "channel retired while waiting, moving on");
                }
                None => enrolled.await,
            }
        }
    }

    /// Like [`get`](Self::get), but gives up after `timeout`.
    ///
    /// A timed-out call has still advanced the round-robin cursor, so the next
    /// call tries a different channel.
    pub async fn get_timeout(&self, timeout: Duration) -> Option<(WorkItem, ChannelId)> {
        tokio::time::timeout(timeout, self.get()).await.ok()
    }

    /// Route an evaluated item back to the channel it came from.
    ///
    /// Returns false if the item was discarded because that channel is gone.
    /// Waits while the target processed queue is full.
    pub async fn put(&self, id: ChannelId, item: WorkItem) -> bool {
        let queue = loop {
            let enrolled = self.processed_ready.notified();
            tokio::pin!(enrolled);
            enrolled.as_mut().enable();

            {
                let processed = self.lock_processed();
                if processed.ever_enrolled {
                    break processed
                        .links
                        .get(&id)
                        .map(|link| Arc::clone(&link.processed));
                }
            }

            enrolled.await;
        };

        let delivered = match queue {
            Some(queue) => queue.push(item).await.is_ok(),
            None => false,
        };

        if delivered {
            metrics::results_delivered().add(1, &[]);
            debug!(channel = %id, "result delivered");
        } else {
            metrics::results_discarded().add(1, &[KeyValue::new("channel", id.to_string())]);
            warn!(channel = %id, "no live channel for result, discarded");
        }
        delivered
    }

    /// Run a consumer's processing loop as a task owned by this broker.
    pub fn enroll_consumer<C: Consumer>(self: &Arc<Self>, consumer: Arc<C>) {
        let seq = self.consumer_seq.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-{seq}", consumer.kind());
        let broker = Arc::clone(self);
        let task_name = name.clone();

        self.consumers.add(name, move |interrupt| async move {
            info!(consumer = %task_name, "consumer started");
            match consumer.process(broker, interrupt).await {
                Ok(()) => info!(consumer = %task_name, "consumer stopped"),
                Err(e) => error!(consumer = %task_name, "consumer failed: {e}"),
            }
        });
    }

    /// Start `n` in-process consumers sharing one evaluator.
    pub fn enroll_local_workers<E: Evaluator>(self: &Arc<Self>, n: usize, evaluator: Arc<E>) {
        let poll = self.config.consumer_poll();
        for _ in 0..n {
            let consumer = LocalConsumer::new(Arc::clone(&evaluator)).with_poll_interval(poll);
            self.enroll_consumer(Arc::new(consumer));
        }
    }

    /// Stop the `n` most recently enrolled consumers. Returns how many stopped.
    pub async fn retire_consumers(&self, n: usize) -> usize {
        self.consumers.remove_last(n).await
    }

    /// Interrupt every consumer enrolled with this broker and wait for them.
    pub async fn shutdown(&self) {
        info!(consumers = self.consumers.len(), "broker shutting down");
        self.consumers.interrupt_all();
        self.consumers.join_all().await;
    }

    /// Channels currently known to the broker, retired-but-unreclaimed included.
    pub fn channel_count(&self) -> usize {
        self.lock_raw().links.len()
    }

    /// Ids known to the raw side and the processed side, each sorted.
    ///
    /// Both are read in one snapshot.
    pub fn channel_ids(&self) -> (Vec<ChannelId>, Vec<ChannelId>) {
        let raw_side = self.lock_raw();
        let mut raw: Vec<ChannelId> = raw_side.links.iter().map(|(id, _)| *id).collect();
        let mut processed: Vec<ChannelId> = self.lock_processed().links.keys().copied().collect();
        drop(raw_side);
        raw.sort();
        processed.sort();
        (raw, processed)
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    /// Pick the channel at the cursor and move the cursor past it.
    fn select_raw(&self) -> Option<(ChannelId, Arc<BoundedQueue<WorkItem>>)> {
        let mut raw = self.lock_raw();
        let len = raw.links.len();
        for step in 0..len {
            let pos = (raw.cursor + step) % len;
            let (id, link) = &raw.links[pos];
            if link.raw.is_closed() && link.raw.is_empty() {
                continue;
            }
            let picked = (*id, Arc::clone(&link.raw));
            raw.cursor = (pos + 1) % len;
            return Some(picked);
        }
        None
    }

    fn lock_raw(&self) -> MutexGuard<'_, RawSide> {
        self.raw.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_processed(&self) -> MutexGuard<'_, ProcessedSide> {
        self.processed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
