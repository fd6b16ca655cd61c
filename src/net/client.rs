//! Worker-side end of the transport: fetch one item, return one result.

use std::net::SocketAddr;

use tokio::net::TcpStream;
use tracing::{debug, error, warn};

use super::disconnect;
use super::protocol::{self, Command};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::telemetry::metrics;

/// Outcome of a successful [`NetworkClient::retrieve`] call.
#[derive(Debug, PartialEq, Eq)]
pub enum Retrieval {
    /// The server handed out a payload.
    Work(Vec<u8>),
    /// The server had nothing. The client already backed off; call again.
    Retry,
}

/// Connects to a broker's network consumer, one connection per request.
///
/// The stall counter lives as long as the client: it counts how many
/// retrievals in a row came back empty, across calls.
pub struct NetworkClient {
    endpoints: Vec<SocketAddr>,
    config: ClientConfig,
    stalls: u32,
}

impl NetworkClient {
    /// Resolve the configured endpoint once, up front.
    pub async fn resolve(config: ClientConfig) -> Result<Self> {
        let endpoints: Vec<SocketAddr> = tokio::net::lookup_host(&config.endpoint).await?.collect();
        if endpoints.is_empty() {
            return Err(Error::Config(format!(
                "endpoint {} resolved to no addresses",
                config.endpoint
            )));
        }
        Ok(Self::with_endpoints(endpoints, config))
    }

    pub fn with_endpoints(endpoints: Vec<SocketAddr>, config: ClientConfig) -> Self {
        Self {
            endpoints,
            config,
            stalls: 0,
        }
    }

    /// Consecutive retrievals that found no work.
    pub fn stalls(&self) -> u32 {
        self.stalls
    }

    pub fn endpoints(&self) -> &[SocketAddr] {
        &self.endpoints
    }

    /// Ask the server for one work item.
    ///
    /// On "no work" the stall counter goes up, the client sleeps for the
    /// retry interval and returns [`Retrieval::Retry`]. Too many stalls in a
    /// row is [`Error::StallLimit`].
    pub async fn retrieve(&mut self) -> Result<Retrieval> {
        let mut stream = self.connect().await?;
        let response = self.request_work(&mut stream).await;
        disconnect(&mut stream).await;

        let payload = response.inspect_err(|e| error!("work retrieval failed: {e}"))?;
        if let Some(payload) = payload {
            self.stalls = 0;
            debug!(bytes = payload.len(), "work retrieved");
            return Ok(Retrieval::Work(payload));
        }

        self.stalls += 1;
        metrics::remote_stalls().add(1, &[]);
        if self.config.max_stalls > 0 && self.stalls > self.config.max_stalls {
            warn!(stalls = self.stalls, "server keeps having no work, giving up");
            return Err(Error::StallLimit {
                stalls: self.stalls,
            });
        }

        debug!(stalls = self.stalls, "no work available, backing off");
        tokio::time::sleep(self.config.retry_interval()).await;
        Ok(Retrieval::Retry)
    }

    /// Send one evaluated item back.
    pub async fn submit(&mut self, fitness: f64, dirty: bool, payload: &[u8]) -> Result<()> {
        let mut stream = self.connect().await?;
        let width = self.config.token_width;
        let sent = protocol::write_result(&mut stream, fitness, dirty, payload, width).await;
        disconnect(&mut stream).await;

        sent.inspect_err(|e| error!("result submission failed: {e}"))?;
        debug!(fitness, dirty, bytes = payload.len(), "result submitted");
        Ok(())
    }

    async fn request_work(&self, stream: &mut TcpStream) -> Result<Option<Vec<u8>>> {
        let width = self.config.token_width;
        protocol::write_command(stream, Command::Ready, width).await?;

        // Anything but "compute" means the server has nothing for us.
        let reply = protocol::read_token(stream, width).await?;
        if Command::parse(&reply) != Some(Command::Compute) {
            return Ok(None);
        }
        let payload = protocol::read_payload(stream, width, self.config.max_payload_bytes).await?;
        Ok(Some(payload))
    }

    /// Try every endpoint, then wait and try again, up to the attempt limit.
    async fn connect(&self) -> Result<TcpStream> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            for addr in &self.endpoints {
                match TcpStream::connect(addr).await {
                    Ok(stream) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(%addr, "could not disable nagle: {e}");
                        }
                        return Ok(stream);
                    }
                    Err(e) => {
                        metrics::connection_failures().add(1, &[]);
                        debug!(%addr, attempt, "connect failed: {e}");
                    }
                }
            }

            let limit = self.config.max_connection_attempts;
            if limit > 0 && attempt >= limit {
                error!(attempts = attempt, "could not reach any endpoint");
                return Err(Error::ConnectionExhausted { attempts: attempt });
            }
            tokio::time::sleep(self.config.retry_interval()).await;
        }
    }
}
