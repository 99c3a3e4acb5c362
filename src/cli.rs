//! Command-line interface and process wiring.

use std::io;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{
    Config, TargetSet, DEFAULT_DIAL_TIMEOUT_SECS, DEFAULT_IDLE_TIMEOUT_SECS,
    DEFAULT_POOL_CAPACITY, DEFAULT_RELAY_BUFFER_SIZE,
};
use crate::error::RelayError;
use crate::server::Server;

/// fanrelay CLI arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "fanrelay", version, about = "TCP relay with multi-target fan-out")]
pub struct Args {
    /// Listen address, e.g. 0.0.0.0:9000
    #[arg(short = 'l', long = "listen")]
    pub listen: String,

    /// Remote targets, comma separated; the first entry is the primary
    #[arg(short = 'r', long = "remote", value_name = "HOST:PORT[,HOST:PORT...]")]
    pub remote: TargetSet,

    /// Connect timeout for remote dials (seconds)
    #[arg(long, default_value_t = DEFAULT_DIAL_TIMEOUT_SECS)]
    pub dial_timeout_secs: u64,

    /// Idle timeout before a silent stream is closed (seconds)
    #[arg(long, default_value_t = DEFAULT_IDLE_TIMEOUT_SECS)]
    pub idle_timeout_secs: u64,

    /// Maximum concurrently running relay tasks
    #[arg(long, default_value_t = DEFAULT_POOL_CAPACITY)]
    pub pool_capacity: usize,

    /// Relay copy buffer size (bytes)
    #[arg(long, default_value_t = DEFAULT_RELAY_BUFFER_SIZE)]
    pub relay_buffer_size: usize,

    /// Log level (trace/debug/info/warn/error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Args {
    fn into_config(self) -> Result<Config, RelayError> {
        if self.pool_capacity == 0 {
            return Err(RelayError::Config("pool capacity must be at least 1".into()));
        }
        if self.relay_buffer_size == 0 {
            return Err(RelayError::Config(
                "relay buffer size must be at least 1".into(),
            ));
        }
        Ok(Config {
            listen: self.listen,
            targets: self.remote,
            dial_timeout: Duration::from_secs(self.dial_timeout_secs),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            pool_capacity: self.pool_capacity,
            relay_buffer_size: self.relay_buffer_size,
        })
    }
}

/// Run the relay with the given arguments.
///
/// Binds the listener, installs the signal handler, and serves until an
/// unrecoverable accept error or a shutdown signal.
pub async fn run(args: Args) -> Result<(), RelayError> {
    init_tracing(&args.log_level);
    let config = args.into_config()?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_token.cancel();
    });

    let server = Server::bind(config).await?;
    server.run_with_shutdown(shutdown).await
}

/// Wait for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Initialize the tracing subscriber; `RUST_LOG` overrides `--log-level`.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info")));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_required_flags() {
        let args =
            Args::try_parse_from(["fanrelay", "-l", "127.0.0.1:9000", "-r", "a:1,b:2"]).unwrap();
        assert_eq!(args.listen, "127.0.0.1:9000");
        assert!(args.remote.is_multi());
        assert_eq!(args.pool_capacity, DEFAULT_POOL_CAPACITY);

        let config = args.into_config().unwrap();
        assert_eq!(config.dial_timeout, Duration::from_secs(2));
        assert_eq!(config.idle_timeout, Duration::from_secs(20));
    }

    #[test]
    fn missing_required_flags_fail() {
        assert!(Args::try_parse_from(["fanrelay", "-l", "127.0.0.1:9000"]).is_err());
        assert!(Args::try_parse_from(["fanrelay", "-r", "a:1"]).is_err());
    }

    #[test]
    fn rejects_zero_capacity() {
        let args = Args::try_parse_from([
            "fanrelay",
            "-l",
            "127.0.0.1:9000",
            "-r",
            "a:1",
            "--pool-capacity",
            "0",
        ])
        .unwrap();
        assert!(matches!(args.into_config(), Err(RelayError::Config(_))));
    }
}
