//! courtier CLI: run a broker with a demo producer, or a remote worker.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use courtier::config::Config;
use courtier::demo::{self, Parabola};
use courtier::net::{NetworkClient, RemoteWorker};
use courtier::telemetry::{TelemetryConfig, init_telemetry};
use courtier::{Broker, Interrupt, NetworkConsumer};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "courtier", about = "Work broker for evolutionary optimization")]
struct Cli {
    /// TOML config file (defaults to $COURTIER_CONFIG, then built-in defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a broker, serve remote workers, and optimize a demo parabola
    Serve {
        /// Address to accept remote workers on
        #[arg(long)]
        bind: Option<String>,
        /// In-process evaluation workers
        #[arg(long)]
        local_workers: Option<usize>,
        /// Candidates evaluated per round
        #[arg(long, default_value_t = 100)]
        candidates: usize,
        /// Optimization rounds
        #[arg(long, default_value_t = 20)]
        rounds: usize,
        /// Dimensions of the parabola
        #[arg(long, default_value_t = 3)]
        dimensions: usize,
    },
    /// Evaluate work handed out by a remote broker
    Worker {
        /// Broker address, host:port
        #[arg(long)]
        endpoint: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => Config::load(path)?,
        None => Config::from_env()?,
    };

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "courtier".to_string(),
        log_level: config.log_level.clone(),
    })?;

    match cli.command {
        Command::Serve {
            bind,
            local_workers,
            candidates,
            rounds,
            dimensions,
        } => {
            let mut config = config;
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(n) = local_workers {
                config.broker.local_workers = n;
            }
            cmd_serve(config, candidates, rounds, dimensions).await
        }
        Command::Worker { endpoint } => {
            let mut config = config;
            if let Some(endpoint) = endpoint {
                config.client.endpoint = endpoint;
            }
            cmd_worker(config).await
        }
    }
}

async fn cmd_serve(
    config: Config,
    candidates: usize,
    rounds: usize,
    dimensions: usize,
) -> anyhow::Result<()> {
    let broker = Broker::new(config.broker.clone());

    let network = NetworkConsumer::bind(config.server.clone()).await?;
    info!(addr = %network.local_addr()?, "accepting remote workers");
    broker.enroll_consumer(Arc::new(network));
    broker.enroll_local_workers(config.broker.local_workers, Arc::new(Parabola));

    let producer = tokio::spawn(optimize(
        Arc::clone(&broker),
        candidates,
        rounds,
        dimensions,
    ));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
        finished = producer => finished??,
    }

    broker.shutdown().await;
    Ok(())
}

async fn cmd_worker(config: Config) -> anyhow::Result<()> {
    let client = NetworkClient::resolve(config.client).await?;
    let worker = RemoteWorker::new(client, Arc::new(Parabola));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
        submitted = worker.run(Interrupt::never()) => {
            info!(submitted = submitted?, "worker finished");
        }
    }
    Ok(())
}

/// A minimal producer: sample around the best point so far, shrinking the
/// sampling radius each round.
async fn optimize(
    broker: Arc<Broker>,
    candidates: usize,
    rounds: usize,
    dimensions: usize,
) -> courtier::Result<()> {
    let channel = broker.channel();
    broker.enroll(&channel)?;

    let mut best = vec![5.0; dimensions];
    let mut best_fitness = f64::INFINITY;
    let mut radius = 5.0;

    for round in 0..rounds {
        for i in 0..candidates {
            let point: Vec<f64> = best
                .iter()
                .enumerate()
                .map(|(d, x)| x + radius * ((i * (d + 1) + round) as f64).sin())
                .collect();
            channel.submit(demo::candidate(&point)?).await?;
        }

        let results = channel.collect(candidates, Duration::from_secs(30)).await;
        if results.len() < candidates {
            warn!(round, missing = candidates - results.len(), "some candidates never came back");
        }

        if let Some(winner) = results
            .iter()
            .filter(|item| !item.dirty)
            .min_by(|a, b| a.fitness.total_cmp(&b.fitness))
            .filter(|item| item.fitness < best_fitness)
        {
            best_fitness = winner.fitness;
            best = demo::decode(&winner.payload)?;
        }
        radius *= 0.7;

        info!(round, best_fitness, evaluated = results.len(), "round complete");
    }

    info!(best_fitness, best = ?best, "optimization finished");
    Ok(())
}
