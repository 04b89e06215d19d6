#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Tunnel(#[from] socks_tunnel_core::TunnelError),

    #[error("{0}")]
    Settings(#[from] socks_tunnel_settings::SettingsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}
