//! TCP relay with optional multi-target fan-out.
//!
//! Accepts connections on one address and forwards bytes, unmodified, to
//! one or more remote targets. With multiple targets every client byte is
//! replicated to all live targets while only the primary's responses flow
//! back to the client. Payloads are opaque; there is no framing and no
//! protocol awareness.

pub mod cli;
mod config;
mod error;
mod fanout;
mod handler;
mod idle;
mod pool;
mod relay;
mod server;

pub use cli::Args;
pub use config::{Config, TargetSet};
pub use error::RelayError;
pub use fanout::FanoutWriter;
pub use idle::IdleStream;
pub use pool::TaskPool;
pub use relay::copy_direction;
pub use server::Server;
pub use tokio_util::sync::CancellationToken;
