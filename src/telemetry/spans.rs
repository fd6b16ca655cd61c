//! Span helpers for network activity.

use std::net::SocketAddr;

use tracing::Span;
use uuid::Uuid;

/// Span wrapping one served worker connection.
///
/// `conn.outcome` is declared empty and can be filled via [`record_outcome`].
pub fn connection_span(peer: &SocketAddr) -> Span {
    tracing::info_span!(
        "net.connection",
        "conn.id" = %Uuid::new_v4(),
        "conn.peer" = %peer,
        "conn.outcome" = tracing::field::Empty,
    )
}

/// Span wrapping a remote worker's whole run against one broker.
pub fn worker_span(endpoint: &str) -> Span {
    tracing::info_span!(
        "net.worker",
        "worker.id" = %Uuid::new_v4(),
        "worker.endpoint" = endpoint,
    )
}

pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("conn.outcome", outcome);
}
