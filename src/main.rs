use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ringlimit::config::LimiterConfig;
use ringlimit::ratelimit::{CounterStatus, KeyedLimiter};

/// Drive synthetic traffic through a keyed sliding-window limiter.
#[derive(Debug, Parser)]
#[command(name = "ringlimit", version, about)]
struct Args {
    /// YAML limiter configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the hits admitted per window
    #[arg(long)]
    capacity: Option<usize>,

    /// Override the window length in milliseconds
    #[arg(long)]
    window_ms: Option<u64>,

    /// Override the idle sweep period in milliseconds
    #[arg(long)]
    sweep_interval_ms: Option<u64>,

    /// Number of distinct client keys
    #[arg(long, default_value_t = 16)]
    keys: usize,

    /// Number of concurrent workers
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Requests sent by each worker
    #[arg(long, default_value_t = 1000)]
    requests_per_worker: usize,

    /// Pause between a worker's requests in microseconds
    #[arg(long, default_value_t = 0)]
    pause_us: u64,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[derive(Debug, Default, Clone, Copy, Serialize)]
struct Tally {
    allowed: u64,
    limited: u64,
}

#[derive(Debug, Serialize)]
struct KeyReport {
    key: String,
    #[serde(flatten)]
    tally: Tally,
    status: Option<CounterStatus>,
}

#[derive(Debug, Serialize)]
struct Report {
    config: LimiterConfig,
    elapsed_ms: u64,
    #[serde(flatten)]
    totals: Tally,
    tracked_keys: usize,
    busiest_key: Option<KeyReport>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    info!("Starting ringlimit");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args)?;
    anyhow::ensure!(args.keys > 0, "--keys must be at least 1");
    info!(
        capacity = config.capacity,
        window_ms = config.window_ms,
        sweep_interval_ms = config.sweep_interval_ms,
        "Configuration loaded"
    );

    let limiter = Arc::new(KeyedLimiter::new(&config));

    let stop = CancellationToken::new();
    tokio::spawn({
        let stop = stop.clone();
        async move {
            shutdown_signal().await;
            stop.cancel();
        }
    });

    let started = Instant::now();
    let tallies = run_workers(&args, &limiter, &stop).await?;
    let elapsed = started.elapsed();

    let report = build_report(config, elapsed, &limiter, tallies);
    println!("{}", serde_json::to_string_pretty(&report)?);

    limiter.shutdown().await;
    info!("ringlimit stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Start from the config file (or defaults) and apply command-line overrides.
fn load_config(args: &Args) -> anyhow::Result<LimiterConfig> {
    let mut config = match &args.config {
        Some(path) => LimiterConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => LimiterConfig::default(),
    };

    if let Some(capacity) = args.capacity {
        config.capacity = capacity;
    }
    if let Some(window_ms) = args.window_ms {
        config.window_ms = window_ms;
    }
    if let Some(sweep_interval_ms) = args.sweep_interval_ms {
        config.sweep_interval_ms = sweep_interval_ms;
    }

    config.validate()?;
    Ok(config)
}

async fn run_workers(
    args: &Args,
    limiter: &Arc<KeyedLimiter>,
    stop: &CancellationToken,
) -> anyhow::Result<HashMap<String, Tally>> {
    let handles = (0..args.workers).map(|_| {
        let limiter = Arc::clone(limiter);
        let stop = stop.clone();
        let keys = args.keys;
        let requests = args.requests_per_worker;
        let pause = Duration::from_micros(args.pause_us);

        tokio::spawn(async move {
            let mut rng = StdRng::from_entropy();
            let mut tallies: HashMap<String, Tally> = HashMap::new();

            for _ in 0..requests {
                if stop.is_cancelled() {
                    break;
                }

                let key = format!("client-{}", rng.gen_range(0..keys));
                let allowed = limiter.allow(&key);
                let tally = tallies.entry(key).or_default();
                if allowed {
                    tally.allowed += 1;
                } else {
                    tally.limited += 1;
                }

                if pause.is_zero() {
                    tokio::task::yield_now().await;
                } else {
                    tokio::time::sleep(pause).await;
                }
            }
            tallies
        })
    });

    let mut merged: HashMap<String, Tally> = HashMap::new();
    for result in join_all(handles).await {
        for (key, tally) in result.context("worker task failed")? {
            let total = merged.entry(key).or_default();
            total.allowed += tally.allowed;
            total.limited += tally.limited;
        }
    }
    Ok(merged)
}

fn build_report(
    config: LimiterConfig,
    elapsed: Duration,
    limiter: &KeyedLimiter,
    tallies: HashMap<String, Tally>,
) -> Report {
    let totals = tallies.values().fold(Tally::default(), |acc, t| Tally {
        allowed: acc.allowed + t.allowed,
        limited: acc.limited + t.limited,
    });

    let busiest_key = tallies
        .into_iter()
        .max_by_key(|(_, t)| t.allowed + t.limited)
        .map(|(key, tally)| KeyReport {
            status: limiter.status(&key),
            key,
            tally,
        });

    Report {
        config,
        elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        totals,
        tracked_keys: limiter.tracked_keys(),
        busiest_key,
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping traffic");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping traffic");
        }
    }
}
