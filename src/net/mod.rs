//! TCP transport between the broker and remote worker processes.

pub mod client;
pub mod protocol;
pub mod server;
pub mod worker;

pub use client::{NetworkClient, Retrieval};
pub use protocol::Command;
pub use worker::RemoteWorker;

use std::io::ErrorKind;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::error;

/// Shut the connection down. Used on every exit path, success or not.
///
/// A peer that already tore the connection down is fine. Any other failure
/// means the socket is in a state we cannot account for, and the process
/// aborts rather than carry on with a possibly leaked connection.
pub(crate) async fn disconnect(stream: &mut TcpStream) {
    if let Err(e) = stream.shutdown().await {
        match e.kind() {
            ErrorKind::NotConnected | ErrorKind::ConnectionReset | ErrorKind::BrokenPipe => {}
            _ => {
                error!("socket shutdown failed, aborting: {e}");
                std::process::abort();
            }
        }
    }
}
