//! Accept loop with cooperative shutdown.
//!
//! The acceptor owns the listening socket. Each accepted connection is
//! handed to [`handle_connection`] on its own task and the loop goes
//! straight back to accepting. Cancelling the shutdown token drops the
//! listener; sessions already in flight keep running and are tracked so
//! a caller can wait for them to drain.

use crate::handler::handle_connection;
use crate::{TunnelConfig, UpstreamConnector};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Pause after a failed `accept` so a full descriptor table is not spun on.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Accepts inbound connections and dispatches one session per connection.
pub struct Acceptor<C> {
    listener: TcpListener,
    connector: Arc<C>,
    config: Arc<TunnelConfig>,
    shutdown: CancellationToken,
    sessions: TaskTracker,
    active: Arc<AtomicUsize>,
}

impl<C: UpstreamConnector> Acceptor<C> {
    /// Wrap an already-bound listener.
    ///
    /// # Arguments
    /// * `listener` - Bound listening socket, owned from here on
    /// * `connector` - Produces the upstream stream for each session
    /// * `config` - Shared read-only with every session
    /// * `shutdown` - Cancelling it stops the accept loop
    pub fn new(
        listener: TcpListener,
        connector: Arc<C>,
        config: Arc<TunnelConfig>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            listener,
            connector,
            config,
            shutdown,
            sessions: TaskTracker::new(),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Tracker for the sessions this acceptor spawns.
    pub fn sessions(&self) -> TaskTracker {
        self.sessions.clone()
    }

    /// Counter of sessions currently in flight.
    pub fn active_sessions(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.active)
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept until the shutdown token is cancelled.
    ///
    /// Accept errors are logged and the loop continues. On exit the
    /// listener is closed and the session tracker is closed, so
    /// `sessions().wait()` resolves once the last session ends.
    pub async fn run(self) {
        let Acceptor {
            listener,
            connector,
            config,
            shutdown,
            sessions,
            active,
        } = self;

        loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            let (client, client_addr) = match accepted {
                Ok(result) => result,
                Err(e) => {
                    warn!(error = %e, "TCP accept error");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => continue,
                    }
                }
            };

            if let Err(e) = client.set_nodelay(true) {
                debug!(client = %client_addr, error = %e, "Failed to set TCP_NODELAY");
            }

            let guard = SessionGuard::enter(&active);
            let connector = Arc::clone(&connector);
            let config = Arc::clone(&config);

            debug!(client = %client_addr, "Accepted connection");
            sessions.spawn(async move {
                let _guard = guard;
                match handle_connection(client, connector.as_ref(), &config).await {
                    Ok(outcome) => debug!(
                        client = %client_addr,
                        sent = outcome.a_to_b.bytes(),
                        received = outcome.b_to_a.bytes(),
                        "Session closed"
                    ),
                    Err(e) => warn!(client = %client_addr, error = %e, "Session failed"),
                }
            });
        }

        drop(listener);
        sessions.close();
        info!(
            in_flight = active.load(Ordering::Relaxed),
            "Listener closed"
        );
    }
}

/// Keeps the in-flight counter accurate even if a session panics.
struct SessionGuard {
    active: Arc<AtomicUsize>,
}

impl SessionGuard {
    fn enter(active: &Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::Relaxed);
        Self {
            active: Arc::clone(active),
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }
}
