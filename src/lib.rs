//! # courtier
//!
//! Work distribution for evolutionary optimization.
//!
//! Producers (optimization loops) enroll a channel with a [`Broker`] and
//! push candidate solutions into it. Consumers, either tasks in this process
//! or worker processes on other machines, pull candidates round robin across
//! all channels, evaluate them, and the broker routes each result back to
//! the channel it came from.

pub mod broker;
pub mod config;
pub mod consumer;
pub mod demo;
pub mod error;
pub mod group;
pub mod model;
pub mod net;
pub mod queue;
pub mod telemetry;

pub use broker::{Broker, ChannelPair};
pub use consumer::{Consumer, Evaluator, LocalConsumer, NetworkConsumer};
pub use error::{Error, Result};
pub use group::{Interrupt, TaskGroup};
pub use model::{ChannelId, WorkItem};
pub use queue::BoundedQueue;
