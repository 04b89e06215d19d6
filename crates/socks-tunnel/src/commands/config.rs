use std::path::{Path, PathBuf};

use socks_tunnel_settings::{ConfigLoader, STARTER_CONFIG};

use super::resolve::resolve_settings;
use crate::cli::{ConfigArgs, ConfigSubcommand, OutputFormat, OverrideArgs, SourceArgs};
use crate::error::CliError;

pub fn config(args: ConfigArgs, cwd: PathBuf) -> Result<(), CliError> {
    match args.subcommand {
        ConfigSubcommand::Init { path } => init(path, &cwd),
        ConfigSubcommand::Show {
            format,
            source,
            overrides,
        } => show(format, &source, &overrides, &cwd),
    }
}

fn init(path: Option<PathBuf>, cwd: &Path) -> Result<(), CliError> {
    let path = path.unwrap_or_else(|| ConfigLoader::project_config_path(cwd));

    if path.exists() {
        return Err(CliError::Other(format!(
            "Config file already exists: {}",
            path.display()
        )));
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(&path, STARTER_CONFIG)?;
    println!("Created config: {}", path.display());
    Ok(())
}

fn show(
    format: OutputFormat,
    source: &SourceArgs,
    overrides: &OverrideArgs,
    cwd: &Path,
) -> Result<(), CliError> {
    let resolved = resolve_settings(source, overrides, cwd)?;
    let shown = resolved.settings.redacted();
    match format {
        OutputFormat::Toml => {
            if let Some(path) = &resolved.path {
                println!("# from {}", path.display());
            }
            let toml = shown.to_toml()?;
            print!("{toml}");
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&shown)
                .map_err(|e| CliError::Other(format!("JSON serialization failed: {e}")))?;
            println!("{json}");
        }
    }
    Ok(())
}
