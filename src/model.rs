//! Core data model.
//!
//! A work item is a candidate solution waiting for (or returning from)
//! evaluation. The broker never looks inside the payload; it only moves
//! items between queues and carries the fitness and dirty flag along.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Work Item
// ---------------------------------------------------------------------------

/// A unit of work moving through the broker.
///
/// Deliberately not `Clone`: an item is owned by exactly one queue at a time
/// and moves from raw queue to consumer to processed queue.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Serialized candidate solution. Opaque to the broker.
    pub payload: Vec<u8>,

    /// Result of the last evaluation. Meaningless while `dirty` is set.
    pub fitness: f64,

    /// True until an evaluator has computed `fitness`.
    pub dirty: bool,
}

impl WorkItem {
    /// A fresh, unevaluated item.
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            fitness: 0.0,
            dirty: true,
        }
    }

    /// Record an evaluation result and clear the dirty flag.
    pub fn set_fitness(&mut self, fitness: f64) {
        self.fitness = fitness;
        self.dirty = false;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

// ---------------------------------------------------------------------------
// Channel ID
// ---------------------------------------------------------------------------

/// Identifies one producer's channel inside a broker.
///
/// Unique among live channels only: the counter wraps at the configured
/// ceiling, which is far above any realistic channel population.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub u64);

impl ChannelId {
    /// The id following `self`, wrapping to zero at `ceiling`.
    pub fn next(self, ceiling: u64) -> Self {
        let next = self.0.wrapping_add(1);
        if next >= ceiling { Self(0) } else { Self(next) }
    }

    pub fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_item_is_dirty() {
        let item = WorkItem::new("abc");
        assert!(item.is_dirty());
        assert_eq!(item.payload, b"abc");
    }

    #[test]
    fn set_fitness_clears_dirty() {
        let mut item = WorkItem::new(vec![1, 2, 3]);
        item.set_fitness(-2.25);
        assert!(!item.is_dirty());
        assert_eq!(item.fitness, -2.25);
    }

    #[test]
    fn channel_id_wraps_at_ceiling() {
        assert_eq!(ChannelId(0).next(3), ChannelId(1));
        assert_eq!(ChannelId(1).next(3), ChannelId(2));
        assert_eq!(ChannelId(2).next(3), ChannelId(0));
        assert_eq!(ChannelId(u64::MAX).next(u64::MAX), ChannelId(0));
    }
}
