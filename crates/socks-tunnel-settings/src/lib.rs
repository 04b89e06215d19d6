//! Layered TOML configuration for socks-tunnel.
//!
//! Settings are resolved from up to four layers, later layers winning for
//! every field they set:
//! 1. Built-in defaults ([`TunnelSettings::defaults`])
//! 2. Config file (`socks-tunnel.toml`, see [`ConfigLoader`])
//! 3. `SOCKS_TUNNEL_*` environment variables ([`TunnelSettings::from_env`])
//! 4. Command-line flags (built by the binary)
//!
//! # Example
//!
//! ```no_run
//! use socks_tunnel_settings::{ConfigLoader, ConfigSource, TunnelSettings};
//!
//! let cwd = std::env::current_dir().unwrap();
//! let loaded = ConfigLoader::load(ConfigSource::Discover(&cwd)).unwrap();
//! let settings = loaded.settings.merge(TunnelSettings::from_env().unwrap());
//! println!("{:?}", settings.redacted());
//! ```

mod loader;

pub use loader::{ConfigLoader, ConfigSource, Loaded, CONFIG_FILE_NAME};

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Default listen address.
pub const DEFAULT_LOCAL_ADDR: &str = "127.0.0.1:1080";

pub const ENV_LOCAL_ADDR: &str = "SOCKS_TUNNEL_LOCAL_ADDR";
pub const ENV_REMOTE_ADDR: &str = "SOCKS_TUNNEL_REMOTE_ADDR";
pub const ENV_USERNAME: &str = "SOCKS_TUNNEL_USERNAME";
pub const ENV_PASSWORD: &str = "SOCKS_TUNNEL_PASSWORD";
pub const ENV_TARGET_ADDR: &str = "SOCKS_TUNNEL_TARGET_ADDR";
pub const ENV_CONNECT_TIMEOUT_SECS: &str = "SOCKS_TUNNEL_CONNECT_TIMEOUT_SECS";
pub const ENV_IDLE_TIMEOUT_SECS: &str = "SOCKS_TUNNEL_IDLE_TIMEOUT_SECS";

const MASK: &str = "********";

/// Commented starter file written by `socks-tunnel config init`.
pub const STARTER_CONFIG: &str = r#"# socks-tunnel configuration
#
# Values in this file are overridden by SOCKS_TUNNEL_* environment
# variables, which are in turn overridden by command-line flags.

# Address the tunnel listens on.
local_addr = "127.0.0.1:1080"

# Upstream SOCKS5 proxy.
remote_addr = "proxy.example.com:1080"

# Username/password for the proxy. Leave both empty for no authentication.
username = ""
password = ""

# Destination requested from the proxy. Defaults to remote_addr.
# target_addr = "db.internal:5432"

# Bound on dialing the proxy plus the SOCKS5 handshake.
# connect_timeout_secs = 30

# Close a session after this many seconds without traffic. 0 disables.
# idle_timeout_secs = 300
"#;

/// Errors from settings operations.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// TOML deserialization failed.
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// TOML serialization failed.
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// I/O error reading or writing a config file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An environment variable holds a value of the wrong type.
    #[error("Invalid value {value:?} for {var}: expected a whole number of seconds")]
    InvalidEnv { var: &'static str, value: String },

    /// A required setting is absent from every layer.
    #[error("Missing required setting `{0}` (set it in socks-tunnel.toml, {1}, or on the command line)")]
    Missing(&'static str, &'static str),
}

/// Top-level configuration, corresponding to `socks-tunnel.toml`.
///
/// Every field is optional so that partial layers can be merged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TunnelSettings {
    /// Listen address. Default: `127.0.0.1:1080`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_addr: Option<String>,

    /// Upstream SOCKS5 proxy address. Required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Destination requested from the proxy. Default: `remote_addr`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_addr: Option<String>,

    /// Dial plus handshake bound in seconds. Default: 30
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,

    /// Relay idle bound in seconds; 0 disables. Default: disabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout_secs: Option<u64>,
}

impl TunnelSettings {
    /// Built-in defaults, the bottom layer of every resolution.
    pub fn defaults() -> Self {
        Self {
            local_addr: Some(DEFAULT_LOCAL_ADDR.to_string()),
            ..Default::default()
        }
    }

    /// Parse settings from a TOML string.
    ///
    /// # Errors
    /// Returns `SettingsError::ParseError` if the TOML is malformed or
    /// contains unrecognised keys for this schema.
    pub fn parse(toml: &str) -> Result<Self, SettingsError> {
        toml::from_str(toml).map_err(SettingsError::ParseError)
    }

    /// Load settings from a file on disk.
    ///
    /// # Errors
    /// Returns `SettingsError::Io` on read failure, or
    /// `SettingsError::ParseError` if the file content is not valid TOML.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Serialize these settings to a TOML string.
    ///
    /// # Errors
    /// Returns `SettingsError::SerializeError` if serialization fails.
    pub fn to_toml(&self) -> Result<String, SettingsError> {
        toml::to_string_pretty(self).map_err(SettingsError::SerializeError)
    }

    /// Save these settings to a file, creating parent directories as needed.
    ///
    /// # Errors
    /// Returns `SettingsError::Io` on write failure, or
    /// `SettingsError::SerializeError` if serialization fails.
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = self.to_toml()?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Merge `other` (higher-priority layer) on top of `self`.
    ///
    /// Each field of `other` wins when explicitly set (`Some`).
    #[must_use]
    pub fn merge(self, other: TunnelSettings) -> TunnelSettings {
        TunnelSettings {
            local_addr: other.local_addr.or(self.local_addr),
            remote_addr: other.remote_addr.or(self.remote_addr),
            username: other.username.or(self.username),
            password: other.password.or(self.password),
            target_addr: other.target_addr.or(self.target_addr),
            connect_timeout_secs: other.connect_timeout_secs.or(self.connect_timeout_secs),
            idle_timeout_secs: other.idle_timeout_secs.or(self.idle_timeout_secs),
        }
    }

    /// Read the `SOCKS_TUNNEL_*` environment variables.
    ///
    /// # Errors
    /// Returns `SettingsError::InvalidEnv` if a timeout variable is not a
    /// whole number.
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_env_with(|name| std::env::var(name).ok())
    }

    /// Build the environment layer from an arbitrary variable lookup.
    ///
    /// Empty values are treated as unset.
    ///
    /// # Errors
    /// Returns `SettingsError::InvalidEnv` if a timeout variable is not a
    /// whole number.
    pub fn from_env_with<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());
        let secs = |var: &'static str| -> Result<Option<u64>, SettingsError> {
            get(var)
                .map(|value| {
                    value
                        .trim()
                        .parse::<u64>()
                        .map_err(|_| SettingsError::InvalidEnv { var, value })
                })
                .transpose()
        };

        Ok(Self {
            local_addr: get(ENV_LOCAL_ADDR),
            remote_addr: get(ENV_REMOTE_ADDR),
            username: get(ENV_USERNAME),
            password: get(ENV_PASSWORD),
            target_addr: get(ENV_TARGET_ADDR),
            connect_timeout_secs: secs(ENV_CONNECT_TIMEOUT_SECS)?,
            idle_timeout_secs: secs(ENV_IDLE_TIMEOUT_SECS)?,
        })
    }

    /// Copy with the password masked, for display.
    #[must_use]
    pub fn redacted(&self) -> TunnelSettings {
        let mut shown = self.clone();
        if let Some(password) = shown.password.as_mut() {
            if !password.is_empty() {
                *password = MASK.to_string();
            }
        }
        shown
    }

    /// The proxy address, which no layer defaults.
    ///
    /// # Errors
    /// Returns `SettingsError::Missing` if no layer set `remote_addr`.
    pub fn require_remote_addr(&self) -> Result<&str, SettingsError> {
        self.remote_addr
            .as_deref()
            .filter(|addr| !addr.is_empty())
            .ok_or(SettingsError::Missing("remote_addr", ENV_REMOTE_ADDR))
    }
}
