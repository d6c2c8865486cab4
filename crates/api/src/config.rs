//! Application configuration loaded from environment variables.

use std::time::Duration;

use saga::SagaConfig;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `json` for JSON log lines, anything else for text
/// - `DATABASE_URL`: Postgres connection string (unset: in-memory store)
/// - `GATEWAY_URL`, `GATEWAY_API_KEY`: payment gateway (unset: sandbox gateway)
/// - `LOCATION_SEARCH_URL`: search service (unset: in-memory resolver)
/// - `LOCATION_TIMEOUT_MS`, `GATEWAY_TIMEOUT_MS`, `COMMIT_TIMEOUT_MS`
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub gateway: Option<GatewayConfig>,
    pub location_search_url: Option<String>,
    pub saga: SagaConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_key: String,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let millis = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|value| value.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(default)
        };

        let gateway = match (non_empty("GATEWAY_URL"), non_empty("GATEWAY_API_KEY")) {
            (Some(base_url), Some(api_key)) => Some(GatewayConfig { base_url, api_key }),
            _ => None,
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref() {
                Some("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            database_url: non_empty("DATABASE_URL"),
            gateway,
            location_search_url: non_empty("LOCATION_SEARCH_URL"),
            saga: SagaConfig {
                location_timeout: millis("LOCATION_TIMEOUT_MS", defaults.saga.location_timeout),
                gateway_timeout: millis("GATEWAY_TIMEOUT_MS", defaults.saga.gateway_timeout),
                commit_timeout: millis("COMMIT_TIMEOUT_MS", defaults.saga.commit_timeout),
            },
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            gateway: None,
            location_search_url: None,
            saga: SagaConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.database_url.is_none());
        assert!(config.gateway.is_none());
        assert_eq!(config.saga.gateway_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_reads_adapters_and_timeouts() {
        let config = from_pairs(&[
            ("PORT", "8080"),
            ("LOG_FORMAT", "json"),
            ("DATABASE_URL", "postgres://localhost/subscriptions"),
            ("GATEWAY_URL", "https://gateway.test"),
            ("GATEWAY_API_KEY", "secret"),
            ("LOCATION_TIMEOUT_MS", "250"),
        ]);
        assert_eq!(config.port, 8080);
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(config.database_url.is_some());
        assert_eq!(
            config.gateway.map(|g| g.base_url).as_deref(),
            Some("https://gateway.test")
        );
        assert_eq!(config.saga.location_timeout, Duration::from_millis(250));
        assert_eq!(config.saga.commit_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_gateway_needs_both_url_and_key() {
        let config = from_pairs(&[("GATEWAY_URL", "https://gateway.test")]);
        assert!(config.gateway.is_none());

        let config = from_pairs(&[("PORT", "not-a-port"), ("DATABASE_URL", " ")]);
        assert_eq!(config.port, 3000);
        assert!(config.database_url.is_none());
    }
}
