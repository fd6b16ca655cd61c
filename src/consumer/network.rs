//! Network consumer: lends broker work to remote worker processes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{Instrument, info, warn};

use super::Consumer;
use crate::broker::Broker;
use crate::config::ServerConfig;
use crate::error::Result;
use crate::group::{Interrupt, TaskGroup};
use crate::net::server::serve_connection;
use crate::telemetry::spans;

/// Accepts worker connections and serves each one on its own task.
pub struct NetworkConsumer {
    listener: TcpListener,
    config: ServerConfig,
    handlers: TaskGroup,
}

impl NetworkConsumer {
    /// Bind the listening socket now, so the address is known before `process` runs.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(&config.bind).await?;
        Ok(Self {
            listener,
            config,
            handlers: TaskGroup::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Connections currently being served.
    pub fn active_connections(&self) -> usize {
        self.handlers.reap();
        self.handlers.len()
    }
}

impl Consumer for NetworkConsumer {
    fn kind(&self) -> &'static str {
        "network"
    }

    async fn process(self: Arc<Self>, broker: Arc<Broker>, interrupt: Interrupt) -> Result<()> {
        info!(addr = %self.local_addr()?, "listening for remote workers");

        loop {
            let accepted = tokio::select! {
                _ = interrupt.interrupted() => break,
                accepted = self.listener.accept() => accepted,
            };
            let (stream, peer) = match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("accept failed: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };

            self.handlers.reap();
            let broker = Arc::clone(&broker);
            let config = self.config.clone();
            self.handlers.add(format!("conn-{peer}"), move |interrupt| {
                serve_connection(stream, broker, config, interrupt)
                    .instrument(spans::connection_span(&peer))
            });
        }

        info!(open = self.handlers.len(), "network consumer stopping");
        self.handlers.interrupt_all();
        self.handlers.join_all().await;
        Ok(())
    }
}
