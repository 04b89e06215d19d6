//! systemd service installation.
//!
//! Renders a unit that runs `socks-tunnel run` as a dedicated account,
//! creates the account if needed, writes the unit and enables it.

use std::path::Path;
use std::process::Command;

use tracing::info;

use crate::cli::InstallArgs;
use crate::error::CliError;

pub const DEFAULT_SERVICE_USER: &str = "socks-tunnel-user";
pub const DEFAULT_UNIT_PATH: &str = "/etc/systemd/system/socks-tunnel.service";
const SERVICE_NAME: &str = "socks-tunnel";

pub fn install(args: InstallArgs) -> Result<(), CliError> {
    validate_user_name(&args.user)?;
    let exe = std::env::current_exe()?;
    let unit = render_unit(&args.user, &exe);

    if args.print {
        print!("{unit}");
        return Ok(());
    }

    if !user_exists(&args.user)? {
        info!(user = %args.user, "Creating service account");
        run_checked("useradd", &["-m", args.user.as_str()])?;
    }

    if let Some(parent) = args.unit_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&args.unit_path, &unit)?;
    info!(path = %args.unit_path.display(), "Wrote unit file");

    if !args.no_enable {
        run_checked("systemctl", &["daemon-reload"])?;
        run_checked("systemctl", &["enable", SERVICE_NAME])?;
    }

    println!("Installed {} service: {}", SERVICE_NAME, args.unit_path.display());
    Ok(())
}

/// Unit file text for running `exe run` as `user`.
pub fn render_unit(user: &str, exe: &Path) -> String {
    let exe = exe.display().to_string();
    let exec = if exe.chars().any(char::is_whitespace) {
        format!("\"{exe}\"")
    } else {
        exe
    };

    format!(
        "[Unit]\n\
         Description=SOCKS Tunnel Service\n\
         After=network.target\n\
         \n\
         [Service]\n\
         User={user}\n\
         ExecStart={exec} run\n\
         Restart=on-failure\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n"
    )
}

fn validate_user_name(user: &str) -> Result<(), CliError> {
    if user.is_empty() || user.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(CliError::Other(format!("Invalid service user name: {user:?}")));
    }
    Ok(())
}

#[cfg(unix)]
fn user_exists(user: &str) -> Result<bool, CliError> {
    let name = std::ffi::CString::new(user)
        .map_err(|_| CliError::Other(format!("Invalid service user name: {user:?}")))?;
    // SAFETY: `name` is a valid NUL-terminated string that outlives the call;
    // the returned record is only checked for null, never dereferenced.
    let entry = unsafe { libc::getpwnam(name.as_ptr()) };
    Ok(!entry.is_null())
}

#[cfg(not(unix))]
fn user_exists(_user: &str) -> Result<bool, CliError> {
    Err(CliError::Other(
        "Service installation requires a Unix system with systemd".to_string(),
    ))
}

fn run_checked(program: &str, args: &[&str]) -> Result<(), CliError> {
    let status = Command::new(program).args(args).status().map_err(|e| {
        CliError::Other(format!("Failed to run `{program}`: {e}"))
    })?;
    if !status.success() {
        return Err(CliError::Other(format!(
            "`{program} {}` exited with {status}",
            args.join(" ")
        )));
    }
    Ok(())
}
