//! Per-session dispatch: dial targets, wrap streams, run the relay.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::split;
use tokio::net::TcpStream;
use tokio::task::JoinError;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::RelayError;
use crate::fanout::FanoutWriter;
use crate::idle::IdleStream;
use crate::pool::TaskPool;
use crate::relay::copy_direction;

/// Dial `addr` with a bounded connect timeout.
async fn dial(addr: &str, timeout: Duration) -> Result<TcpStream, RelayError> {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(RelayError::Dial {
            addr: addr.to_string(),
            source,
        }),
        Err(_) => Err(RelayError::Dial {
            addr: addr.to_string(),
            source: io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
        }),
    }
}

/// Relay one accepted connection according to the configured target set.
///
/// Single target: plain bidirectional relay. Multiple targets: write-only
/// fan-out of the client stream to every live target, with only the
/// primary's responses relayed back. Returns once both directional tasks
/// have finished and every session stream has been released.
pub async fn handle_session(
    client: TcpStream,
    config: Arc<Config>,
    pool: Arc<TaskPool>,
    peer: SocketAddr,
) -> Result<(), RelayError> {
    if config.targets.is_multi() {
        handle_fanout(client, config, pool, peer).await
    } else {
        handle_single(client, config, pool, peer).await
    }
}

async fn handle_single(
    client: TcpStream,
    config: Arc<Config>,
    pool: Arc<TaskPool>,
    peer: SocketAddr,
) -> Result<(), RelayError> {
    let target = config.targets.primary();
    let remote = dial(target, config.dial_timeout).await?;
    debug!(peer = %peer, target = %target, "remote connected");

    let (client_r, client_w) = split(IdleStream::new(client, config.idle_timeout));
    let (remote_r, remote_w) = split(IdleStream::new(remote, config.idle_timeout));

    let up = pool.try_spawn(copy_direction(client_r, remote_w, config.relay_buffer_size))?;
    let down = match pool.try_spawn(copy_direction(remote_r, client_w, config.relay_buffer_size)) {
        Ok(handle) => handle,
        Err(e) => {
            // Never leave a half-duplex session running.
            up.abort();
            return Err(e);
        }
    };

    let (up_result, down_result) = tokio::join!(up, down);
    log_direction(peer, "client->remote", up_result);
    log_direction(peer, "remote->client", down_result);
    debug!(peer = %peer, "session finished");
    Ok(())
}

async fn handle_fanout(
    client: TcpStream,
    config: Arc<Config>,
    pool: Arc<TaskPool>,
    peer: SocketAddr,
) -> Result<(), RelayError> {
    // The primary must be up before anything else; without it the
    // session has no response stream and aborts before any copy.
    let primary_addr = config.targets.primary();
    let primary = dial(primary_addr, config.dial_timeout).await?;
    debug!(peer = %peer, target = %primary_addr, "primary connected");

    // Secondaries are best effort.
    let mut secondaries = Vec::new();
    for addr in config.targets.secondaries() {
        match dial(addr, config.dial_timeout).await {
            Ok(stream) => {
                debug!(peer = %peer, target = %addr, "secondary connected");
                secondaries.push((addr.clone(), stream));
            }
            Err(e) => warn!(peer = %peer, target = %addr, error = %e, "skipping secondary target"),
        }
    }

    let (client_r, client_w) = split(IdleStream::new(client, config.idle_timeout));
    let (primary_r, primary_w) = split(IdleStream::new(primary, config.idle_timeout));

    let mut sinks = vec![(primary_addr.to_string(), primary_w)];
    for (addr, stream) in secondaries {
        let (secondary_r, secondary_w) = split(IdleStream::new(stream, config.idle_timeout));
        // Secondary responses are never read back.
        drop(secondary_r);
        sinks.push((addr, secondary_w));
    }
    let fanout = FanoutWriter::new(sinks);

    let up = pool.try_spawn(copy_direction(client_r, fanout, config.relay_buffer_size))?;
    let down = match pool.try_spawn(copy_direction(primary_r, client_w, config.relay_buffer_size)) {
        Ok(handle) => handle,
        Err(e) => {
            up.abort();
            return Err(e);
        }
    };

    let (up_result, down_result) = tokio::join!(up, down);
    log_direction(peer, "client->targets", up_result);
    log_direction(peer, "primary->client", down_result);
    debug!(peer = %peer, "session finished");
    Ok(())
}

/// Copy errors end a direction the same way EOF does; they are logged
/// and never escalate past the session.
fn log_direction(peer: SocketAddr, direction: &str, result: Result<io::Result<u64>, JoinError>) {
    match result {
        Ok(Ok(bytes)) => debug!(peer = %peer, direction, bytes, "copy finished"),
        Ok(Err(e)) => debug!(peer = %peer, direction, error = %e, "copy ended with error"),
        Err(e) => warn!(peer = %peer, direction, error = %e, "copy task failed"),
    }
}
