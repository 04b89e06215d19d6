//! Immutable tunnel configuration.
//!
//! A [`TunnelConfig`] is built once at startup, validated, and then shared
//! read-only with the acceptor and every connection handler.

use crate::{Result, TunnelError};
use std::net::{Ipv6Addr, SocketAddr};
use std::time::Duration;

/// Default bound on dialing the proxy plus the SOCKS5 handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Username/password pair for RFC 1929 authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

/// Configuration for one running tunnel.
///
/// Fields are private so a constructed value always satisfies its
/// invariants: every address is a syntactically valid `host:port`, and
/// credentials are either absent or within RFC 1929 limits.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    local_addr: String,
    remote_addr: String,
    credentials: Option<Credentials>,
    target_addr: Option<String>,
    connect_timeout: Duration,
    idle_timeout: Option<Duration>,
}

impl TunnelConfig {
    /// Create a validated configuration.
    ///
    /// Empty `username` and `password` select unauthenticated upstream
    /// access. If either is non-empty both must be 1 to 255 bytes long;
    /// a username with an empty password is refused because the SOCKS5
    /// client rejects it during the handshake anyway.
    ///
    /// # Errors
    /// * `TunnelError::InvalidAddress` - `local_addr` or `remote_addr` is not `host:port`
    /// * `TunnelError::InvalidCredentials` - credential lengths out of range
    pub fn new(
        local_addr: impl Into<String>,
        remote_addr: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        let local_addr = local_addr.into();
        let remote_addr = remote_addr.into();
        validate_host_port(&local_addr)?;
        validate_host_port(&remote_addr)?;

        let username = username.into();
        let password = password.into();
        let credentials = if username.is_empty() && password.is_empty() {
            None
        } else {
            if !(1..=255).contains(&username.len()) {
                return Err(TunnelError::InvalidCredentials(
                    "username must be 1 to 255 bytes",
                ));
            }
            if !(1..=255).contains(&password.len()) {
                return Err(TunnelError::InvalidCredentials(
                    "password must be 1 to 255 bytes (SOCKS5 username/password auth does not allow an empty password)",
                ));
            }
            Some(Credentials { username, password })
        };

        Ok(Self {
            local_addr,
            remote_addr,
            credentials,
            target_addr: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            idle_timeout: None,
        })
    }

    /// Request `target` from the proxy instead of `remote_addr`.
    ///
    /// # Errors
    /// Returns `TunnelError::InvalidAddress` if `target` is not `host:port`.
    pub fn with_target_addr(mut self, target: impl Into<String>) -> Result<Self> {
        let target = target.into();
        validate_host_port(&target)?;
        self.target_addr = Some(target);
        Ok(self)
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Cancel a relay once no bytes have moved in either direction for `timeout`.
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Address the acceptor listens on.
    pub fn local_addr(&self) -> &str {
        &self.local_addr
    }

    /// Address of the upstream SOCKS5 proxy.
    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    /// Destination requested with SOCKS5 CONNECT.
    ///
    /// Falls back to `remote_addr` when no explicit target was configured.
    pub fn target_addr(&self) -> &str {
        self.target_addr.as_deref().unwrap_or(&self.remote_addr)
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }
}

/// Check that `addr` has the shape `host:port`.
///
/// Accepts IPv4 and bracketed IPv6 socket addresses as well as
/// `hostname:port`. No name resolution happens here.
fn validate_host_port(addr: &str) -> Result<()> {
    if addr.parse::<SocketAddr>().is_ok() {
        return Ok(());
    }

    let invalid = |reason| TunnelError::InvalidAddress {
        addr: addr.to_string(),
        reason,
    };

    let (host, port) = addr.rsplit_once(':').ok_or_else(|| invalid("missing port"))?;
    if port.parse::<u16>().is_err() {
        return Err(invalid("port must be a number between 0 and 65535"));
    }
    if host.is_empty() {
        return Err(invalid("missing host"));
    }
    if let Some(inner) = host.strip_prefix('[') {
        let inner = inner
            .strip_suffix(']')
            .ok_or_else(|| invalid("unterminated IPv6 bracket"))?;
        inner
            .parse::<Ipv6Addr>()
            .map_err(|_| invalid("invalid IPv6 address"))?;
        return Ok(());
    }
    if host.contains(':') {
        return Err(invalid("IPv6 hosts must be written in brackets"));
    }
    if host.chars().any(char::is_whitespace) {
        return Err(invalid("host contains whitespace"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TunnelConfig {
        TunnelConfig::new("127.0.0.1:1080", "proxy.example.com:1080", "", "").unwrap()
    }

    // ========================================================================
    // Address validation
    // ========================================================================

    #[test]
    fn test_accepts_ipv4_socket_addr() {
        assert!(validate_host_port("127.0.0.1:1080").is_ok());
    }

    #[test]
    fn test_accepts_bracketed_ipv6() {
        assert!(validate_host_port("[::1]:1080").is_ok());
    }

    #[test]
    fn test_accepts_hostname() {
        assert!(validate_host_port("proxy.example.com:1080").is_ok());
        assert!(validate_host_port("localhost:0").is_ok());
    }

    #[test]
    fn test_rejects_missing_port() {
        let err = validate_host_port("proxy.example.com").unwrap_err();
        assert!(matches!(
            err,
            TunnelError::InvalidAddress { reason: "missing port", .. }
        ));
    }

    #[test]
    fn test_rejects_bad_port() {
        assert!(validate_host_port("host:http").is_err());
        assert!(validate_host_port("host:65536").is_err());
        assert!(validate_host_port("host:").is_err());
    }

    #[test]
    fn test_rejects_missing_host() {
        let err = validate_host_port(":1080").unwrap_err();
        assert!(matches!(
            err,
            TunnelError::InvalidAddress { reason: "missing host", .. }
        ));
    }

    #[test]
    fn test_rejects_unbracketed_ipv6() {
        assert!(validate_host_port("::1:1080").is_err());
    }

    #[test]
    fn test_rejects_bad_bracketed_ipv6() {
        assert!(validate_host_port("[not-ipv6]:1080").is_err());
        assert!(validate_host_port("[::1:1080").is_err());
    }

    #[test]
    fn test_rejects_whitespace_host() {
        assert!(validate_host_port("bad host:1080").is_err());
    }

    // ========================================================================
    // TunnelConfig construction
    // ========================================================================

    #[test]
    fn test_new_without_credentials() {
        let config = config();
        assert_eq!(config.local_addr(), "127.0.0.1:1080");
        assert_eq!(config.remote_addr(), "proxy.example.com:1080");
        assert!(config.credentials().is_none());
    }

    #[test]
    fn test_new_with_credentials() {
        let config = TunnelConfig::new("127.0.0.1:1080", "10.0.0.1:1080", "alice", "s3cret").unwrap();
        let creds = config.credentials().unwrap();
        assert_eq!(creds.username, "alice");
        assert_eq!(creds.password, "s3cret");
    }

    #[test]
    fn test_new_rejects_password_without_username() {
        let err = TunnelConfig::new("127.0.0.1:1080", "10.0.0.1:1080", "", "s3cret").unwrap_err();
        assert!(matches!(err, TunnelError::InvalidCredentials(_)));
    }

    #[test]
    fn test_new_rejects_username_without_password() {
        let err = TunnelConfig::new("127.0.0.1:1080", "10.0.0.1:1080", "alice", "").unwrap_err();
        assert!(matches!(err, TunnelError::InvalidCredentials(_)));
        assert!(err.to_string().contains("does not allow an empty password"));
    }

    #[test]
    fn test_new_rejects_overlong_username() {
        let long = "u".repeat(256);
        let err = TunnelConfig::new("127.0.0.1:1080", "10.0.0.1:1080", long, "pw").unwrap_err();
        assert!(matches!(err, TunnelError::InvalidCredentials(_)));
    }

    #[test]
    fn test_new_rejects_invalid_local_addr() {
        let err = TunnelConfig::new("1080", "10.0.0.1:1080", "", "").unwrap_err();
        assert!(matches!(err, TunnelError::InvalidAddress { .. }));
    }

    #[test]
    fn test_new_rejects_invalid_remote_addr() {
        let err = TunnelConfig::new("127.0.0.1:1080", "proxy", "", "").unwrap_err();
        assert!(matches!(err, TunnelError::InvalidAddress { .. }));
    }

    #[test]
    fn test_target_defaults_to_remote() {
        assert_eq!(config().target_addr(), "proxy.example.com:1080");
    }

    #[test]
    fn test_with_target_addr() {
        let config = config().with_target_addr("db.internal:5432").unwrap();
        assert_eq!(config.target_addr(), "db.internal:5432");
        assert_eq!(config.remote_addr(), "proxy.example.com:1080");
    }

    #[test]
    fn test_with_target_addr_rejects_invalid() {
        assert!(config().with_target_addr("db.internal").is_err());
    }

    #[test]
    fn test_default_timeouts() {
        let config = config();
        assert_eq!(config.connect_timeout(), Duration::from_secs(30));
        assert!(config.idle_timeout().is_none());
    }

    #[test]
    fn test_timeout_builders() {
        let config = config()
            .with_connect_timeout(Duration::from_secs(5))
            .with_idle_timeout(Some(Duration::from_secs(60)));
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_debug_masks_password() {
        let config = TunnelConfig::new("127.0.0.1:1080", "10.0.0.1:1080", "alice", "s3cret").unwrap();
        let debug = format!("{config:?}");
        assert!(debug.contains("alice"));
        assert!(!debug.contains("s3cret"));
    }
}
