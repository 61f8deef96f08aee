//! Gateway configuration from environment variables.

use crate::error::{GatewayError, Result};
use crate::hub::HubConfig;
use external_services::azure::DEFAULT_MANAGEMENT_URL;
use normalizer::NormalizerConfig;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    pub http_port: u16,
    pub metrics_port: u16,
    pub rules_file: PathBuf,
    pub heartbeat_interval: Duration,
    pub connection_timeout: Duration,
    pub client_queue_size: usize,
    pub topology_timeout: Duration,
    pub azure_management_url: String,
    /// Bearer token for Resource Manager. Without it, enrichment is disabled.
    pub azure_access_token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            http_port: 3002,
            metrics_port: 9093,
            rules_file: PathBuf::from("eventslist.json"),
            heartbeat_interval: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(90),
            client_queue_size: 1000,
            topology_timeout: Duration::from_millis(5000),
            azure_management_url: DEFAULT_MANAGEMENT_URL.to_string(),
            azure_access_token: None,
        }
    }
}

impl GatewayConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`; unset keys take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let heartbeat_secs: u64 = parse_or(&lookup, "HEARTBEAT_INTERVAL_SECS", 30)?;
        if heartbeat_secs == 0 {
            return Err(GatewayError::Config(
                "HEARTBEAT_INTERVAL_SECS must be greater than zero".to_string(),
            ));
        }
        let client_queue_size: usize = parse_or(&lookup, "CLIENT_QUEUE_SIZE", 1000)?;
        if client_queue_size == 0 {
            return Err(GatewayError::Config(
                "CLIENT_QUEUE_SIZE must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            http_port: parse_or(&lookup, "HTTP_PORT", defaults.http_port)?,
            metrics_port: parse_or(&lookup, "METRICS_PORT", defaults.metrics_port)?,
            rules_file: lookup("RULES_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.rules_file),
            heartbeat_interval: Duration::from_secs(heartbeat_secs),
            connection_timeout: Duration::from_secs(parse_or(&lookup, "CONNECTION_TIMEOUT_SECS", 90)?),
            client_queue_size,
            topology_timeout: Duration::from_millis(parse_or(&lookup, "TOPOLOGY_TIMEOUT_MS", 5000)?),
            azure_management_url: lookup("AZURE_MANAGEMENT_URL")
                .unwrap_or(defaults.azure_management_url),
            azure_access_token: lookup("AZURE_ACCESS_TOKEN").filter(|t| !t.trim().is_empty()),
        })
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            heartbeat_interval: self.heartbeat_interval,
            connection_timeout: self.connection_timeout,
            queue_size: self.client_queue_size,
        }
    }

    pub fn normalizer_config(&self) -> NormalizerConfig {
        NormalizerConfig {
            topology_timeout: self.topology_timeout,
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| GatewayError::Config(format!("{} must be a number, got {:?}", key, raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = GatewayConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, GatewayConfig::default());
        assert_eq!(config.http_port, 3002);
        assert!(config.azure_access_token.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = GatewayConfig::from_lookup(lookup_from(&[
            ("HTTP_PORT", "8080"),
            ("RULES_FILE", "/etc/rules.json"),
            ("HEARTBEAT_INTERVAL_SECS", "5"),
            ("TOPOLOGY_TIMEOUT_MS", "250"),
            ("AZURE_ACCESS_TOKEN", "token"),
        ]))
        .unwrap();

        assert_eq!(config.http_port, 8080);
        assert_eq!(config.rules_file, PathBuf::from("/etc/rules.json"));
        assert_eq!(config.hub_config().heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.normalizer_config().topology_timeout, Duration::from_millis(250));
        assert_eq!(config.azure_access_token.as_deref(), Some("token"));
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        let err = GatewayConfig::from_lookup(lookup_from(&[("HTTP_PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));

        let err =
            GatewayConfig::from_lookup(lookup_from(&[("HEARTBEAT_INTERVAL_SECS", "0")])).unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }

    #[test]
    fn test_blank_token_is_unset() {
        let config = GatewayConfig::from_lookup(lookup_from(&[("AZURE_ACCESS_TOKEN", "  ")])).unwrap();
        assert!(config.azure_access_token.is_none());
    }
}
