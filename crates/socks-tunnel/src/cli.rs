use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(
    name = "socks-tunnel",
    version,
    about = "Forward local TCP connections through an authenticated SOCKS5 proxy"
)]
pub struct Cli {
    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the tunnel and serve until interrupted
    Run(RunArgs),
    /// Install and enable a systemd service for the tunnel
    Install(InstallArgs),
    /// Manage socks-tunnel configuration
    Config(ConfigArgs),
}

/// Where the file layer comes from.
#[derive(Args, Clone, Default)]
pub struct SourceArgs {
    /// Load this config file instead of searching the default locations
    #[arg(long = "config", value_name = "PATH", conflicts_with = "no_config")]
    pub config: Option<PathBuf>,

    /// Ignore config files; use only environment variables and flags
    #[arg(long)]
    pub no_config: bool,
}

/// Flags that override file and environment settings.
#[derive(Args, Clone, Default)]
pub struct OverrideArgs {
    /// Local listen address (host:port)
    #[arg(long, alias = "localAddr", value_name = "ADDR")]
    pub local_addr: Option<String>,

    /// Upstream SOCKS5 proxy address (host:port)
    #[arg(long, alias = "remoteAddr", value_name = "ADDR")]
    pub remote_addr: Option<String>,

    /// Username for the SOCKS5 proxy
    #[arg(long, value_name = "NAME")]
    pub username: Option<String>,

    /// Password for the SOCKS5 proxy
    #[arg(long, value_name = "PASSWORD")]
    pub password: Option<String>,

    /// Destination to request from the proxy (defaults to the proxy address)
    #[arg(long, alias = "targetAddr", value_name = "ADDR")]
    pub target_addr: Option<String>,

    /// Seconds allowed for dialing the proxy plus the SOCKS5 handshake
    #[arg(long, value_name = "SECS")]
    pub connect_timeout: Option<u64>,

    /// Close sessions idle for this many seconds (0 disables)
    #[arg(long, value_name = "SECS")]
    pub idle_timeout: Option<u64>,
}

#[derive(Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub overrides: OverrideArgs,
}

#[derive(Args)]
pub struct InstallArgs {
    /// System account the service runs as (created if missing)
    #[arg(long, default_value = crate::commands::install::DEFAULT_SERVICE_USER)]
    pub user: String,

    /// Where to write the unit file
    #[arg(long, value_name = "PATH", default_value = crate::commands::install::DEFAULT_UNIT_PATH)]
    pub unit_path: PathBuf,

    /// Write the unit but skip `systemctl daemon-reload` and `enable`
    #[arg(long)]
    pub no_enable: bool,

    /// Print the unit to stdout and change nothing
    #[arg(long)]
    pub print: bool,
}

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub subcommand: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Write a starter config file
    Init {
        /// Destination file (default: ./socks-tunnel.toml)
        #[arg(long, value_name = "PATH")]
        path: Option<PathBuf>,
    },
    /// Print the effective merged configuration
    Show {
        #[arg(long, value_enum, default_value = "toml")]
        format: OutputFormat,

        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        overrides: OverrideArgs,
    },
}

#[derive(ValueEnum, Clone, Copy)]
pub enum OutputFormat {
    Toml,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_accepts_original_flag_spelling() {
        let cli = Cli::try_parse_from([
            "socks-tunnel",
            "run",
            "--localAddr",
            "127.0.0.1:1081",
            "--remoteAddr",
            "proxy:1080",
        ])
        .unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.overrides.local_addr.as_deref(), Some("127.0.0.1:1081"));
        assert_eq!(args.overrides.remote_addr.as_deref(), Some("proxy:1080"));
    }

    #[test]
    fn test_config_and_no_config_conflict() {
        let result = Cli::try_parse_from([
            "socks-tunnel",
            "run",
            "--config",
            "x.toml",
            "--no-config",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_install_defaults() {
        let cli = Cli::try_parse_from(["socks-tunnel", "install"]).unwrap();
        let Command::Install(args) = cli.command else {
            panic!("expected install");
        };
        assert_eq!(args.user, "socks-tunnel-user");
        assert_eq!(args.unit_path, PathBuf::from("/etc/systemd/system/socks-tunnel.service"));
        assert!(!args.no_enable);
        assert!(!args.print);
    }

    #[test]
    fn test_verbose_is_global() {
        let cli = Cli::try_parse_from(["socks-tunnel", "run", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }
}
