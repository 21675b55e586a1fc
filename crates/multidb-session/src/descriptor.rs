//! Host connection parameters.

use std::fmt;

/// How TLS is negotiated when opening a session to a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsMode {
    /// Plaintext only; refuse to negotiate TLS.
    Disabled,
    /// Use TLS when the server offers it, fall back to plaintext otherwise.
    #[default]
    Preferred,
    /// Require TLS; fail the connection if it cannot be negotiated.
    Required,
}

/// Connection parameters for one registered host.
///
/// A descriptor is immutable once registered with the pool manager;
/// re-registering the same `host_id` overwrites the stored descriptor and
/// applies to sessions created afterwards.
#[derive(Clone)]
pub struct HostDescriptor {
    /// Stable identifier the pool routes on.
    pub host_id: String,

    /// Server hostname or IP address.
    pub address: String,

    /// Server port (default: 3306).
    pub port: u16,

    /// Login username.
    pub username: String,

    /// Login secret (password or token).
    pub secret: String,

    /// TLS negotiation mode.
    pub tls_mode: TlsMode,
}

impl HostDescriptor {
    /// Create a descriptor for `host_id` pointing at `address`, with
    /// default port, empty credentials, and [`TlsMode::Preferred`].
    pub fn new(host_id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            host_id: host_id.into(),
            address: address.into(),
            port: 3306,
            username: String::new(),
            secret: String::new(),
            tls_mode: TlsMode::default(),
        }
    }

    /// Set the server port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the login username.
    #[must_use]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    /// Set the login secret.
    #[must_use]
    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = secret.into();
        self
    }

    /// Set the TLS negotiation mode.
    #[must_use]
    pub fn tls_mode(mut self, mode: TlsMode) -> Self {
        self.tls_mode = mode;
        self
    }
}

// Secrets must not leak through debug logs.
impl fmt::Debug for HostDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostDescriptor")
            .field("host_id", &self.host_id)
            .field("address", &self.address)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .field("tls_mode", &self.tls_mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_defaults() {
        let desc = HostDescriptor::new("h1", "db.example.com");
        assert_eq!(desc.host_id, "h1");
        assert_eq!(desc.port, 3306);
        assert_eq!(desc.tls_mode, TlsMode::Preferred);
        assert!(desc.username.is_empty());
    }

    #[test]
    fn test_descriptor_fluent() {
        let desc = HostDescriptor::new("h1", "db.example.com")
            .port(3307)
            .username("app")
            .secret("hunter2")
            .tls_mode(TlsMode::Required);
        assert_eq!(desc.port, 3307);
        assert_eq!(desc.username, "app");
        assert_eq!(desc.secret, "hunter2");
        assert_eq!(desc.tls_mode, TlsMode::Required);
    }

    #[test]
    fn test_debug_redacts_secret() {
        let desc = HostDescriptor::new("h1", "db.example.com").secret("hunter2");
        let rendered = format!("{desc:?}");
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("hunter2"));
    }
}
