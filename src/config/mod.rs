//! Channel configuration and connection profiles

use crate::core::guard::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Address and resilience parameters for one channel.
///
/// Immutable for the lifetime of the channel instance it configures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// HTTP base path or hub path, depending on the protocol
    pub path: String,
    /// Per-operation timeout in milliseconds
    pub timeout_ms: u64,
    /// Total attempts before a failure surfaces
    pub max_retries: u32,
    /// Base backoff delay in milliseconds (doubles per attempt)
    pub backoff_base_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5001,
            path: "/api".to_string(),
            timeout_ms: 1000,
            max_retries: 3,
            backoff_base_ms: 500,
        }
    }
}

impl ChannelConfig {
    /// Create a configuration for the given endpoint with default policy.
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            ..Self::default()
        }
    }

    /// Set the base/hub path.
    #[must_use]
    pub fn with_path(mut self, path: &str) -> Self {
        self.path = path.to_string();
        self
    }

    /// Set the per-operation timeout.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set the retry count and backoff base.
    #[must_use]
    pub fn with_retries(mut self, max_retries: u32, backoff_base_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.backoff_base_ms = backoff_base_ms;
        self
    }

    /// Operation timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Retry policy derived from this configuration.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.backoff_base_ms))
    }

    /// `host:port` authority string.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Named channel profile in a profile file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelProfile {
    /// Profile name
    pub name: String,
    /// Protocol tag (`http`, `modbus`, `signalr`)
    pub protocol: String,
    /// Channel parameters
    #[serde(flatten)]
    pub config: ChannelConfig,
}

/// TOML profile file holding saved channel definitions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileFile {
    /// Saved channel profiles
    #[serde(default)]
    pub channels: Vec<ChannelProfile>,
}

impl ProfileFile {
    /// Load profiles from a TOML file.
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Save profiles to a TOML file.
    pub fn save(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Look up a profile by name.
    pub fn find(&self, name: &str) -> Option<&ChannelProfile> {
        self.channels.iter().find(|p| p.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_chain() {
        let config = ChannelConfig::new("10.0.0.5", 502)
            .with_path("/signalhub")
            .with_timeout_ms(250)
            .with_retries(5, 100);

        assert_eq!(config.authority(), "10.0.0.5:502");
        assert_eq!(config.path, "/signalhub");
        assert_eq!(config.timeout(), Duration::from_millis(250));
        assert_eq!(config.retry_policy(), RetryPolicy::new(5, Duration::from_millis(100)));
    }

    #[test]
    fn test_profile_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("channels.toml");

        let file = ProfileFile {
            channels: vec![ChannelProfile {
                name: "plant-a".to_string(),
                protocol: "modbus".to_string(),
                config: ChannelConfig::new("192.168.1.20", 502).with_timeout_ms(2000),
            }],
        };
        file.save(&path).unwrap();

        let loaded = ProfileFile::load(&path).unwrap();
        let profile = loaded.find("plant-a").unwrap();
        assert_eq!(profile.protocol, "modbus");
        assert_eq!(profile.config.port, 502);
        assert_eq!(profile.config.timeout_ms, 2000);
    }

    #[test]
    fn test_missing_profile() {
        let file = ProfileFile::default();
        assert!(file.find("nope").is_none());
    }
}
