use std::path::PathBuf;

use socks_tunnel_core::TunnelServer;
use tracing::{info, warn};

use super::resolve::{build_tunnel_config, resolve_settings};
use crate::cli::RunArgs;
use crate::error::CliError;

pub async fn run(args: RunArgs, cwd: PathBuf) -> Result<(), CliError> {
    // 1. Resolve defaults < file < env < flags into a validated config.
    let resolved = resolve_settings(&args.source, &args.overrides, &cwd)?;
    if let Some(path) = &resolved.path {
        info!(path = %path.display(), "Loaded config file");
    }
    let config = build_tunnel_config(&resolved.settings)?;

    // 2. Bind and start accepting. Bind failure ends the process here.
    let mut handle = TunnelServer::new(config).start().await?;
    info!(local = %handle.local_addr(), "Tunnel ready, press Ctrl-C to stop");

    // 3. First interrupt closes the listener; in-flight sessions keep going.
    tokio::signal::ctrl_c().await?;
    info!("Interrupt received, no longer accepting connections");
    handle.shutdown().await?;

    // 4. Drain. A second interrupt abandons whatever is still open.
    let in_flight = handle.active_sessions();
    if in_flight > 0 {
        info!(sessions = in_flight, "Waiting for in-flight sessions (Ctrl-C again to abort)");
    }
    tokio::select! {
        _ = handle.wait_sessions() => info!("All sessions closed"),
        result = tokio::signal::ctrl_c() => {
            result?;
            warn!(sessions = handle.active_sessions(), "Second interrupt, abandoning open sessions");
        }
    }

    Ok(())
}
