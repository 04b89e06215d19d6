//! Tunnel server: binding and lifecycle control.
//!
//! # Lifecycle
//!
//! ```text
//! TunnelServer::new(config)
//!       |
//!       v
//! TunnelServer::start() --> TunnelHandle
//!       |                       |
//!       v                       |
//! Acceptor::run() on a task     |
//!       |                       v
//!       |               TunnelHandle::shutdown()
//!       |                       |
//!       v                       v
//! Listener closed <-------------+
//!       |
//!       v
//! In-flight sessions drain (TunnelHandle::wait_sessions)
//! ```

use crate::{Acceptor, Result, Socks5Connector, TunnelConfig, TunnelError, UpstreamConnector};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

/// Handle for controlling a running tunnel.
///
/// Dropping the handle does not stop the tunnel; call [`shutdown`](Self::shutdown)
/// or cancel the token from [`shutdown_token`](Self::shutdown_token).
pub struct TunnelHandle {
    /// Stops the accept loop when cancelled.
    shutdown: CancellationToken,

    /// Join handle for the accept loop task.
    join_handle: Option<tokio::task::JoinHandle<()>>,

    /// Address the listener actually bound to.
    local_addr: SocketAddr,

    sessions: TaskTracker,
    active: Arc<AtomicUsize>,
}

impl TunnelHandle {
    /// Check if the accept loop is still running.
    pub fn is_running(&self) -> bool {
        self.join_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Get the bound listen address.
    ///
    /// Reflects the OS-assigned port when the config asked for port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of sessions currently in flight.
    pub fn active_sessions(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Token that stops the accept loop when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop accepting new connections.
    ///
    /// Closes the listening socket and waits for the accept loop to exit.
    /// Sessions already in flight are not interrupted; use
    /// [`wait_sessions`](Self::wait_sessions) to wait for them. Calling this
    /// more than once is a no-op.
    ///
    /// # Errors
    /// * `TunnelError::Internal` - The accept loop task panicked.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.shutdown.cancel();

        if let Some(handle) = self.join_handle.take() {
            match handle.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {}
                Err(e) => {
                    return Err(TunnelError::Internal(format!("accept loop failed: {e}")));
                }
            }
        }

        Ok(())
    }

    /// Wait until every session has finished.
    ///
    /// Resolves only after the accept loop has exited, so call
    /// [`shutdown`](Self::shutdown) first.
    pub async fn wait_sessions(&self) {
        self.sessions.wait().await;
    }
}

/// Local tunnel endpoint.
///
/// Generic over the upstream connector so tests can substitute an
/// in-process fake; production code uses [`Socks5Connector`].
pub struct TunnelServer<C = Socks5Connector> {
    config: TunnelConfig,
    connector: C,
    shutdown: CancellationToken,
}

impl TunnelServer<Socks5Connector> {
    /// Create a tunnel that connects upstream through SOCKS5.
    ///
    /// # Example
    /// ```ignore
    /// let server = TunnelServer::new(config);
    /// let mut handle = server.start().await?;
    /// // ... later ...
    /// handle.shutdown().await?;
    /// ```
    pub fn new(config: TunnelConfig) -> Self {
        Self::with_connector(config, Socks5Connector)
    }
}

impl<C: UpstreamConnector> TunnelServer<C> {
    /// Create a tunnel with a custom upstream connector.
    pub fn with_connector(config: TunnelConfig, connector: C) -> Self {
        Self {
            config,
            connector,
            shutdown: CancellationToken::new(),
        }
    }

    /// Use an externally owned shutdown token.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Bind the listening socket and build the acceptor without running it.
    ///
    /// # Errors
    /// * `TunnelError::Bind` - Address in use, permission denied, or the
    ///   host could not be resolved.
    pub async fn bind(self) -> Result<Acceptor<C>> {
        let addr = self.config.local_addr().to_string();
        let bind_error = |source| TunnelError::Bind {
            addr: addr.clone(),
            source,
        };

        let listener = TcpListener::bind(addr.as_str()).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        info!(
            local = %local_addr,
            proxy = self.config.remote_addr(),
            target = self.config.target_addr(),
            "Tunnel listening"
        );

        Ok(Acceptor::new(
            listener,
            Arc::new(self.connector),
            Arc::new(self.config),
            self.shutdown,
        ))
    }

    /// Start the tunnel on a background task.
    ///
    /// The listener is bound before this returns, so bind failures surface
    /// here and the handle's address is immediately usable.
    ///
    /// # Errors
    /// * `TunnelError::Bind` - If binding to the configured address fails.
    pub async fn start(self) -> Result<TunnelHandle> {
        let shutdown = self.shutdown.clone();
        let acceptor = self.bind().await?;
        let local_addr = acceptor.local_addr().map_err(|e| TunnelError::Internal(e.to_string()))?;
        let sessions = acceptor.sessions();
        let active = acceptor.active_sessions();

        let join_handle = tokio::spawn(acceptor.run());

        Ok(TunnelHandle {
            shutdown,
            join_handle: Some(join_handle),
            local_addr,
            sessions,
            active,
        })
    }

    /// Run the tunnel until the shutdown token is cancelled, then wait for
    /// in-flight sessions to finish.
    ///
    /// Alternative to `start()` for blocking operation.
    ///
    /// # Errors
    /// * `TunnelError::Bind` - If binding to the configured address fails.
    pub async fn run(self) -> Result<()> {
        let acceptor = self.bind().await?;
        let sessions = acceptor.sessions();
        acceptor.run().await;
        sessions.wait().await;
        Ok(())
    }
}
