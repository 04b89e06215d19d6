//! Upstream connector: an established stream to the destination via SOCKS5.
//!
//! The SOCKS5 exchange itself is delegated to `tokio-socks`; this module
//! only adapts it to the tunnel's contract and error taxonomy.
//!
//! # Connection Flow
//!
//! ```text
//! connect(config)
//!         |
//!         v
//! TCP dial remote_addr ----------------> Dial error
//!         |
//!         v
//! Method negotiation / RFC 1929 auth --> Auth error
//!         |
//!         v
//! CONNECT target_addr -----------------> Protocol error
//!         |
//!         v
//! Established TcpStream to the destination
//! ```
//!
//! The whole sequence is bounded by [`TunnelConfig::connect_timeout`].

use crate::TunnelConfig;
use std::future::Future;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_socks::tcp::Socks5Stream;
use tracing::debug;

/// Errors establishing the upstream session.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// The proxy rejected or could not perform authentication.
    #[error("SOCKS5 authentication with {proxy} failed: {source}")]
    Auth {
        proxy: String,
        #[source]
        source: tokio_socks::Error,
    },

    /// The proxy could not be reached, or the exchange timed out.
    #[error("Failed to reach SOCKS5 proxy {proxy}: {source}")]
    Dial {
        proxy: String,
        #[source]
        source: std::io::Error,
    },

    /// The proxy spoke invalid SOCKS5 or refused the CONNECT request.
    #[error("SOCKS5 exchange with {proxy} failed: {source}")]
    Protocol {
        proxy: String,
        #[source]
        source: tokio_socks::Error,
    },
}

impl UpstreamError {
    /// Sort a `tokio-socks` failure into the tunnel's error taxonomy.
    pub fn from_socks(proxy: &str, err: tokio_socks::Error) -> Self {
        use tokio_socks::Error as E;

        let proxy = proxy.to_string();
        match err {
            E::Io(source) => UpstreamError::Dial { proxy, source },
            E::ProxyServerUnreachable => UpstreamError::Dial {
                proxy,
                source: std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "proxy server unreachable",
                ),
            },
            source @ (E::NoAcceptableAuthMethods
            | E::PasswordAuthFailure(_)
            | E::InvalidAuthValues(_)) => UpstreamError::Auth { proxy, source },
            source => UpstreamError::Protocol { proxy, source },
        }
    }
}

/// Produces an established byte-stream to the tunnel's destination.
///
/// The stream returned on success must behave like a direct TCP
/// connection to the destination. [`Socks5Connector`] is the production
/// implementation; tests substitute in-process fakes.
pub trait UpstreamConnector: Send + Sync + 'static {
    /// Stream type handed to the relay.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Establish one upstream session for `config`.
    fn connect(
        &self,
        config: &TunnelConfig,
    ) -> impl Future<Output = Result<Self::Stream, UpstreamError>> + Send;
}

/// Connects through a SOCKS5 proxy using `tokio-socks`.
///
/// Offers username/password authentication when the config carries
/// credentials, otherwise no authentication.
#[derive(Debug, Clone, Copy, Default)]
pub struct Socks5Connector;

impl UpstreamConnector for Socks5Connector {
    type Stream = TcpStream;

    fn connect(
        &self,
        config: &TunnelConfig,
    ) -> impl Future<Output = Result<TcpStream, UpstreamError>> + Send {
        async move {
            let proxy = config.remote_addr();
            let target = config.target_addr();
            let timeout = config.connect_timeout();

            let handshake = async {
                match config.credentials() {
                    Some(creds) => {
                        Socks5Stream::connect_with_password(
                            proxy,
                            target,
                            &creds.username,
                            &creds.password,
                        )
                        .await
                    }
                    None => Socks5Stream::connect(proxy, target).await,
                }
            };

            match tokio::time::timeout(timeout, handshake).await {
                Ok(Ok(stream)) => {
                    debug!(proxy, target, "SOCKS5 session established");
                    Ok(stream.into_inner())
                }
                Ok(Err(e)) => Err(UpstreamError::from_socks(proxy, e)),
                Err(_) => Err(UpstreamError::Dial {
                    proxy: proxy.to_string(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("no SOCKS5 session within {timeout:?}"),
                    ),
                }),
            }
        }
    }
}
