//! Pool configuration.

use std::time::Duration;

use crate::error::PoolError;

/// Configuration shared by every per-host pool under one manager.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum connections per host, checked out and idle combined.
    pub max_connections: u32,

    /// How long an `acquire` call waits for a free slot before failing
    /// with [`PoolError::Exhausted`].
    pub acquire_timeout: Duration,

    /// Idle connections older than this are closed by the reaper.
    pub max_idle_time: Duration,

    /// Interval between reaper scans.
    pub reap_interval: Duration,

    /// Time limit for establishing a new session.
    pub connect_timeout: Duration,

    /// Time limit for a liveness ping during validation.
    pub validate_timeout: Duration,

    /// Time limit for closing a session's transport.
    pub close_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(60),
            max_idle_time: Duration::from_secs(300),
            reap_interval: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(30),
            validate_timeout: Duration::from_secs(5),
            close_timeout: Duration::from_secs(5),
        }
    }
}

impl PoolConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-host connection cap.
    #[must_use]
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the acquire wait timeout.
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the maximum idle age before eviction.
    #[must_use]
    pub fn max_idle_time(mut self, max_idle: Duration) -> Self {
        self.max_idle_time = max_idle;
        self
    }

    /// Set the reaper scan interval.
    #[must_use]
    pub fn reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    /// Set the connection establishment timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the validation ping timeout.
    #[must_use]
    pub fn validate_timeout(mut self, timeout: Duration) -> Self {
        self.validate_timeout = timeout;
        self
    }

    /// Set the transport close timeout.
    #[must_use]
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Check the configuration for values the pool cannot operate with.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_connections == 0 {
            return Err(PoolError::Config(
                "max_connections must be at least 1".into(),
            ));
        }
        if self.reap_interval.is_zero() {
            return Err(PoolError::Config("reap_interval must be non-zero".into()));
        }
        for (name, value) in [
            ("connect_timeout", self.connect_timeout),
            ("validate_timeout", self.validate_timeout),
            ("close_timeout", self.close_timeout),
        ] {
            if value.is_zero() {
                return Err(PoolError::Config(format!("{name} must be non-zero")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(PoolConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_cap_rejected() {
        let config = PoolConfig::new().max_connections(0);
        assert!(matches!(config.validate(), Err(PoolError::Config(_))));
    }

    #[test]
    fn test_zero_network_timeout_rejected() {
        let config = PoolConfig::new().validate_timeout(Duration::ZERO);
        assert!(matches!(config.validate(), Err(PoolError::Config(_))));
    }

    #[test]
    fn test_fluent_setters() {
        let config = PoolConfig::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_millis(250))
            .max_idle_time(Duration::from_secs(30));
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.acquire_timeout, Duration::from_millis(250));
        assert_eq!(config.max_idle_time, Duration::from_secs(30));
    }
}
