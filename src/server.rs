//! Listener and accept loop.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::RelayError;
use crate::handler::handle_session;
use crate::pool::TaskPool;

/// A bound relay server, ready to accept connections.
pub struct Server {
    listener: TcpListener,
    config: Arc<Config>,
    pool: Arc<TaskPool>,
}

impl Server {
    /// Bind the listen address. Bind failure is fatal to the process.
    pub async fn bind(config: Config) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(&config.listen)
            .await
            .map_err(|source| RelayError::Bind {
                addr: config.listen.clone(),
                source,
            })?;
        let pool = Arc::new(TaskPool::new(config.pool_capacity));
        info!(
            listen = %config.listen,
            targets = %config.targets,
            pool_capacity = config.pool_capacity,
            "listening"
        );
        Ok(Self {
            listener,
            config: Arc::new(config),
            pool,
        })
    }

    /// The actual bound address (useful when binding port 0).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept until the token is cancelled or accept fails.
    ///
    /// An accept error ends the loop and is returned to the caller. Pool
    /// saturation drops the new connection: the rejected dispatch future
    /// owns the socket, so dropping it closes the descriptor.
    pub async fn run_with_shutdown(self, shutdown: CancellationToken) -> Result<(), RelayError> {
        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("shutdown signal received, stopping accept loop");
                    return Ok(());
                }

                result = self.listener.accept() => {
                    let (client, peer) = result?;
                    debug!(peer = %peer, "accepted connection");

                    let config = self.config.clone();
                    let session_pool = self.pool.clone();
                    let submitted = self.pool.try_spawn(async move {
                        if let Err(e) = handle_session(client, config, session_pool, peer).await {
                            warn!(peer = %peer, error = %e, "session aborted");
                        }
                    });
                    if submitted.is_err() {
                        warn!(peer = %peer, "task pool saturated, dropping connection");
                    }
                }
            }
        }
    }

    /// Accept until an accept error (no external shutdown).
    pub async fn run(self) -> Result<(), RelayError> {
        self.run_with_shutdown(CancellationToken::new()).await
    }
}
