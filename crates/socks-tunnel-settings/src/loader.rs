//! Config file discovery and loading.
//!
//! Without an explicit path, the first existing file among these wins:
//! 1. `<cwd>/socks-tunnel.toml`
//! 2. `/etc/socks-tunnel/socks-tunnel.toml`
//! 3. `~/socks-tunnel.toml`
//!
//! Finding no file is not an error. A file that exists but cannot be read
//! or parsed is.

use crate::{SettingsError, TunnelSettings};
use std::path::{Path, PathBuf};

/// Config file name used at every search location.
pub const CONFIG_FILE_NAME: &str = "socks-tunnel.toml";

/// Where to take the file layer from.
#[derive(Debug, Clone, Copy)]
pub enum ConfigSource<'a> {
    /// Search the standard locations, starting from this working directory.
    Discover(&'a Path),
    /// Use exactly this file; it must exist.
    Explicit(&'a Path),
    /// Skip the file layer.
    Disabled,
}

/// Defaults merged with the file layer, plus where the file came from.
#[derive(Debug, Clone)]
pub struct Loaded {
    pub settings: TunnelSettings,
    pub path: Option<PathBuf>,
}

/// Locates and loads `socks-tunnel.toml`.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load defaults merged with the file layer selected by `source`.
    ///
    /// # Errors
    /// * `SettingsError::Io` - An explicit file is missing, or a found file
    ///   cannot be read.
    /// * `SettingsError::ParseError` - The file is not valid for this schema.
    pub fn load(source: ConfigSource<'_>) -> Result<Loaded, SettingsError> {
        let path = match source {
            ConfigSource::Discover(cwd) => Self::discover(cwd),
            ConfigSource::Explicit(path) => Some(path.to_path_buf()),
            ConfigSource::Disabled => None,
        };

        let file = match &path {
            Some(path) => TunnelSettings::load(path)?,
            None => TunnelSettings::default(),
        };

        Ok(Loaded {
            settings: TunnelSettings::defaults().merge(file),
            path,
        })
    }

    /// First existing config file in search order, if any.
    pub fn discover(cwd: &Path) -> Option<PathBuf> {
        first_existing(Self::search_paths(cwd))
    }

    /// Candidate config files, highest priority first.
    pub fn search_paths(cwd: &Path) -> Vec<PathBuf> {
        let mut paths = vec![Self::project_config_path(cwd), Self::system_config_path()];
        if let Some(home) = Self::home_config_path() {
            paths.push(home);
        }
        paths
    }

    /// Config file in the given working directory.
    pub fn project_config_path(cwd: &Path) -> PathBuf {
        cwd.join(CONFIG_FILE_NAME)
    }

    pub fn system_config_path() -> PathBuf {
        Path::new("/etc/socks-tunnel").join(CONFIG_FILE_NAME)
    }

    pub fn home_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(CONFIG_FILE_NAME))
    }
}

fn first_existing(paths: Vec<PathBuf>) -> Option<PathBuf> {
    paths.into_iter().find(|path| path.is_file())
}
