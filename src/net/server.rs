//! Broker-side end of the transport: answers one request per connection.

use std::sync::Arc;

use tokio::net::TcpStream;
use tracing::{Span, debug, error};

use super::disconnect;
use super::protocol::{self, Command};
use crate::broker::Broker;
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::group::Interrupt;
use crate::model::WorkItem;
use crate::telemetry::spans;

/// Serve a single accepted connection, then close it.
pub async fn serve_connection(
    mut stream: TcpStream,
    broker: Arc<Broker>,
    config: ServerConfig,
    interrupt: Interrupt,
) {
    let span = Span::current();
    let outcome = tokio::select! {
        _ = interrupt.interrupted() => None,
        outcome = handle_request(&mut stream, &broker, &config) => Some(outcome),
    };
    disconnect(&mut stream).await;

    match outcome {
        None => spans::record_outcome(&span, "interrupted"),
        Some(Ok(())) => spans::record_outcome(&span, "served"),
        Some(Err(e)) => {
            spans::record_outcome(&span, "failed");
            error!("connection failed: {e}");
        }
    }
}

async fn handle_request(stream: &mut TcpStream, broker: &Broker, config: &ServerConfig) -> Result<()> {
    let width = config.token_width;

    match protocol::read_command(stream, width).await? {
        Command::Ready => match broker.get_timeout(config.work_wait()).await {
            Some((item, id)) => {
                let envelope = protocol::wrap(id, &item.payload);
                protocol::write_work(stream, &envelope, width).await?;
                debug!(channel = %id, bytes = item.payload.len(), "work sent to remote worker");
            }
            None => {
                protocol::write_command(stream, Command::Idle, width).await?;
                debug!("no work for remote worker");
            }
        },
        Command::Result => {
            let fitness = protocol::parse_fitness(&protocol::read_token(stream, width).await?)?;
            let dirty = protocol::parse_dirty(&protocol::read_token(stream, width).await?)?;
            let envelope = protocol::read_payload(stream, width, config.max_payload_bytes).await?;
            let (id, payload) = protocol::unwrap(envelope)?;

            debug!(channel = %id, fitness, dirty, "result received from remote worker");
            broker
                .put(
                    id,
                    WorkItem {
                        payload,
                        fitness,
                        dirty,
                    },
                )
                .await;
        }
        other => {
            return Err(Error::Protocol(format!(
                "worker sent {other}, which only a server may send"
            )));
        }
    }
    Ok(())
}
