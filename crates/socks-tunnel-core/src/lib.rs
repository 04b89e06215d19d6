//! Connection-relay engine for a local SOCKS5 tunnel endpoint.
//!
//! `socks-tunnel-core` accepts TCP connections on a local address and
//! forwards each one to a fixed destination through an upstream SOCKS5
//! proxy. Client applications connect to the local address as if it were
//! the destination itself.
//!
//! # Architecture
//!
//! ```text
//! Client application
//!       |
//!       v
//! Acceptor (local_addr)
//!       |
//!       +-- one task per accepted connection
//!              |
//!              v
//!       Connection handler
//!              |
//!              +-- UpstreamConnector --> SOCKS5 proxy (remote_addr) --> destination
//!              |
//!              +-- relay(client, upstream)
//!                     |
//!                     +-- client -> upstream task --+
//!                     +-- upstream -> client task --+--> first to finish cancels both
//! ```
//!
//! # Components
//!
//! - [`TunnelConfig`]: immutable, validated tunnel configuration
//! - [`UpstreamConnector`] / [`Socks5Connector`]: produce an established
//!   stream to the destination through the proxy
//! - [`relay`]: bidirectional copy with joint cancellation
//! - [`handle_connection`]: one session, from upstream connect to teardown
//! - [`Acceptor`]: accept loop with cooperative shutdown
//! - [`TunnelServer`] / [`TunnelHandle`]: binding and lifecycle control
//!
//! # Usage
//!
//! ```ignore
//! use socks_tunnel_core::{TunnelConfig, TunnelServer};
//!
//! let config = TunnelConfig::new("127.0.0.1:1080", "proxy.example.com:1080", "user", "secret")?;
//! let mut handle = TunnelServer::new(config).start().await?;
//! tokio::signal::ctrl_c().await?;
//! handle.shutdown().await?;
//! handle.wait_sessions().await;
//! ```

mod acceptor;
mod config;
mod handler;
mod relay;
mod server;
mod upstream;

pub use acceptor::Acceptor;
pub use config::{Credentials, TunnelConfig, DEFAULT_CONNECT_TIMEOUT};
pub use handler::handle_connection;
pub use relay::{relay, DirectionOutcome, RelayOutcome, Relayed};
pub use server::{TunnelHandle, TunnelServer};
pub use upstream::{Socks5Connector, UpstreamConnector, UpstreamError};

/// Result type for tunnel operations.
pub type Result<T> = std::result::Result<T, TunnelError>;

/// Errors that can occur in tunnel operations.
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    /// Failed to bind the local listening socket.
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// An address is not a valid `host:port` string.
    #[error("Invalid address {addr:?}: {reason}")]
    InvalidAddress { addr: String, reason: &'static str },

    /// Username or password outside the RFC 1929 limits.
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(&'static str),

    /// The upstream SOCKS5 session could not be established.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}
