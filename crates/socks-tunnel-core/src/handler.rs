//! One session: upstream connect, relay, teardown.
//!
//! ```text
//! client stream
//!       |
//!       v
//! connector.connect(config) --fail--> close client, return Upstream error
//!       |
//!       v
//! relay(client, upstream)
//!       |
//!       v
//! close client, close upstream (exactly once each)
//! ```

use crate::relay::{relay, RelayOutcome};
use crate::{Result, TunnelConfig, UpstreamConnector};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// Serve one accepted client connection to completion.
///
/// Never leaks a stream: the client is closed on every exit path, and the
/// upstream stream is closed once the relay has fully stopped.
///
/// # Errors
/// * `TunnelError::Upstream` - The upstream session could not be
///   established; the client was closed without any bytes relayed.
/// * `TunnelError::Internal` - A relay task failed unexpectedly.
pub async fn handle_connection<S, C>(
    mut client: S,
    connector: &C,
    config: &TunnelConfig,
) -> Result<RelayOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    C: UpstreamConnector,
{
    let upstream = match connector.connect(config).await {
        Ok(stream) => stream,
        Err(e) => {
            close(&mut client, "client").await;
            return Err(e.into());
        }
    };

    let relayed = relay(client, upstream, config.idle_timeout()).await?;
    let (mut client, mut upstream, outcome) = (relayed.a, relayed.b, relayed.outcome);

    close(&mut client, "client").await;
    close(&mut upstream, "upstream").await;

    if let Some(e) = outcome.a_to_b.error() {
        warn!(error = %e, "Relay error (client -> upstream)");
    }
    if let Some(e) = outcome.b_to_a.error() {
        warn!(error = %e, "Relay error (upstream -> client)");
    }

    Ok(outcome)
}

async fn close<S: AsyncWrite + Unpin>(stream: &mut S, side: &'static str) {
    // The peer may already be gone; NotConnected and friends are expected here.
    if let Err(e) = stream.shutdown().await {
        debug!(side, error = %e, "Shutdown after relay failed");
    }
}
