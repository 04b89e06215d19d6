//! Settings resolution shared by `run` and `config show`.
//!
//! Layers, lowest priority first: defaults, config file, environment, flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use socks_tunnel_core::TunnelConfig;
use socks_tunnel_settings::{ConfigLoader, ConfigSource, TunnelSettings, DEFAULT_LOCAL_ADDR};

use crate::cli::{OverrideArgs, SourceArgs};
use crate::error::CliError;

pub struct Resolved {
    pub settings: TunnelSettings,
    /// Config file that contributed, if any.
    pub path: Option<PathBuf>,
}

pub fn resolve_settings(
    source: &SourceArgs,
    overrides: &OverrideArgs,
    cwd: &Path,
) -> Result<Resolved, CliError> {
    let source = match (&source.config, source.no_config) {
        (Some(path), _) => ConfigSource::Explicit(path),
        (None, true) => ConfigSource::Disabled,
        (None, false) => ConfigSource::Discover(cwd),
    };
    let loaded = ConfigLoader::load(source)?;
    let settings = loaded
        .settings
        .merge(TunnelSettings::from_env()?)
        .merge(overrides.to_settings());

    Ok(Resolved {
        settings,
        path: loaded.path,
    })
}

impl OverrideArgs {
    fn to_settings(&self) -> TunnelSettings {
        TunnelSettings {
            local_addr: self.local_addr.clone(),
            remote_addr: self.remote_addr.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            target_addr: self.target_addr.clone(),
            connect_timeout_secs: self.connect_timeout,
            idle_timeout_secs: self.idle_timeout,
        }
    }
}

/// Turn fully merged settings into a validated core configuration.
pub fn build_tunnel_config(settings: &TunnelSettings) -> Result<TunnelConfig, CliError> {
    let remote_addr = settings.require_remote_addr()?;
    let local_addr = settings.local_addr.as_deref().unwrap_or(DEFAULT_LOCAL_ADDR);

    let mut config = TunnelConfig::new(
        local_addr,
        remote_addr,
        settings.username.clone().unwrap_or_default(),
        settings.password.clone().unwrap_or_default(),
    )?;

    if let Some(target) = settings.target_addr.as_deref().filter(|t| !t.is_empty()) {
        config = config.with_target_addr(target)?;
    }

    if let Some(secs) = settings.connect_timeout_secs {
        if secs == 0 {
            return Err(CliError::Other(
                "connect_timeout_secs must be greater than 0".to_string(),
            ));
        }
        config = config.with_connect_timeout(Duration::from_secs(secs));
    }

    let idle = settings
        .idle_timeout_secs
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs);
    Ok(config.with_idle_timeout(idle))
}
