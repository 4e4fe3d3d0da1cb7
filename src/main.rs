use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rategate::config::{LogConfig, RateGateConfig};
use rategate::http::HttpServer;
use rategate::ratelimit::{RateLimiter, Sweeper};

/// Sliding-window admission control service.
#[derive(Parser, Debug)]
#[command(name = "rategate", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Address to serve the admission API on (overrides configuration)
    #[arg(long)]
    http_addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = RateGateConfig::load(args.config.as_deref())?.with_http_addr(args.http_addr);

    init_tracing(&config.log);

    info!("Starting Rategate Admission Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        http_addr = %config.server.http_addr,
        trust_forwarded_for = config.rate_limiting.trust_forwarded_for,
        "Configuration loaded"
    );

    // Invalid policies stop startup here.
    let policies = config.policy_catalog()?;
    let rate_limiter = Arc::new(RateLimiter::new(policies));
    info!("Rate limiter initialized");

    let sweeper = Sweeper::for_limiter(Arc::clone(&rate_limiter), config.sweep_interval());
    sweeper.start();

    let server = HttpServer::new(config.server.http_addr, rate_limiter);
    let served = server.serve_with_shutdown(shutdown_signal()).await;

    sweeper.stop().await;
    served?;

    info!("Rategate Admission Service stopped");
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));

    if log.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
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
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
