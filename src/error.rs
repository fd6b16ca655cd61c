//! Error types for courtier.

use thiserror::Error;

use crate::model::ChannelId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("channel already enrolled as {0}")]
    AlreadyEnrolled(ChannelId),

    #[error("queue is closed")]
    QueueClosed,

    #[error("could not connect after {attempts} attempt(s)")]
    ConnectionExhausted { attempts: u32 },

    #[error("server had no work {stalls} time(s) in a row")]
    StallLimit { stalls: u32 },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("evaluation failed: {0}")]
    Evaluation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("bad config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
