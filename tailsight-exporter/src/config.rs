//! Configuration for the exporter.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tailsight_common::{LineFormat, LoggingConfig};
use tailsight_tailer::TailerConfig;
use thiserror::Error;

use crate::mapping::sanitize_metric_name;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Prometheus exporter settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,

    /// Time window aggregation settings.
    #[serde(default)]
    pub window: WindowConfig,

    /// Default tailer timings for every source.
    #[serde(default)]
    pub tailer: TailerConfig,

    /// Log files to monitor.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Prometheus HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Address to listen on (default: "0.0.0.0:8002").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,

    /// Default labels to add to all metrics.
    #[serde(default)]
    pub default_labels: HashMap<String, String>,
}

fn default_listen() -> String {
    "0.0.0.0:8002".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
            default_labels: HashMap::new(),
        }
    }
}

/// Sliding window configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Width of one aggregation window in seconds.
    #[serde(default = "default_window_size")]
    pub size_secs: u64,

    /// Number of most recent windows kept per series.
    #[serde(default = "default_depth")]
    pub depth: usize,

    /// Lower bounds (ms) of every latency tier after the first.
    #[serde(default = "default_latency_tiers")]
    pub latency_tiers_ms: Vec<u64>,

    /// Status codes always exported, even before they are seen.
    #[serde(default = "default_known_status_codes")]
    pub known_status_codes: Vec<String>,

    /// Upper bound on distinct status code series (memory protection).
    #[serde(default = "default_max_status_codes")]
    pub max_status_codes: usize,
}

fn default_window_size() -> u64 {
    15
}

fn default_depth() -> usize {
    10
}

fn default_latency_tiers() -> Vec<u64> {
    vec![5_000, 10_000, 20_000]
}

fn default_known_status_codes() -> Vec<String> {
    [
        "200", "201", "204", "206", "301", "302", "304", "400", "401", "403", "404", "405", "409",
        "412", "500", "502", "503", "504",
    ]
    .iter()
    .map(|c| c.to_string())
    .collect()
}

fn default_max_status_codes() -> usize {
    1000
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            size_secs: default_window_size(),
            depth: default_depth(),
            latency_tiers_ms: default_latency_tiers(),
            known_status_codes: default_known_status_codes(),
            max_status_codes: default_max_status_codes(),
        }
    }
}

/// One monitored log file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Unique source name, exported as the `source` label of self metrics.
    pub name: String,

    /// Path of the log file.
    pub path: PathBuf,

    /// Line format of the file.
    pub format: LineFormat,

    /// Metric name prefix (default depends on the format).
    #[serde(default)]
    pub prefix: Option<String>,

    /// Labels added to every series of this source.
    #[serde(default)]
    pub labels: HashMap<String, String>,

    /// Substrings a pool line must contain to be counted.
    #[serde(default)]
    pub require_substrings: Vec<String>,

    /// Tailer timings overriding the global ones.
    #[serde(default)]
    pub tailer: Option<TailerConfig>,
}

impl SourceConfig {
    /// Create a source with default settings for its format.
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, format: LineFormat) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            format,
            prefix: None,
            labels: HashMap::new(),
            require_substrings: Vec::new(),
            tailer: None,
        }
    }

    /// Metric name prefix, falling back to the format's default.
    pub fn prefix(&self) -> &str {
        match &self.prefix {
            Some(prefix) => prefix,
            None => match self.format {
                LineFormat::Request => "artifactory",
                LineFormat::Pool => "s3_connection",
            },
        }
    }

    /// Tailer timings for this source.
    pub fn tailer_config(&self, defaults: &TailerConfig) -> TailerConfig {
        self.tailer.clone().unwrap_or_else(|| defaults.clone())
    }
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: ExporterConfig = json5::from_str(&content)?;
        Ok(config)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.size_secs == 0 {
            return Err(ConfigError::Validation(
                "window.size_secs must be > 0".to_string(),
            ));
        }

        if self.window.depth == 0 {
            return Err(ConfigError::Validation(
                "window.depth must be > 0".to_string(),
            ));
        }

        if self.window.latency_tiers_ms.is_empty() {
            return Err(ConfigError::Validation(
                "window.latency_tiers_ms must not be empty".to_string(),
            ));
        }

        if self
            .window
            .latency_tiers_ms
            .windows(2)
            .any(|pair| pair[0] >= pair[1])
            || self.window.latency_tiers_ms[0] == 0
        {
            return Err(ConfigError::Validation(
                "window.latency_tiers_ms must be strictly ascending and > 0".to_string(),
            ));
        }

        // Validate listen address format
        if self
            .prometheus
            .listen
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.prometheus.listen
            )));
        }

        // Validate path starts with /
        if !self.prometheus.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        if self.sources.is_empty() {
            return Err(ConfigError::Validation(
                "At least one source must be configured".to_string(),
            ));
        }

        let mut names = HashSet::new();
        let mut prefixes = HashSet::new();
        for source in &self.sources {
            if source.name.is_empty() {
                return Err(ConfigError::Validation(
                    "Source name must not be empty".to_string(),
                ));
            }
            if !names.insert(source.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate source name: {}",
                    source.name
                )));
            }
            let prefix = sanitize_metric_name(source.prefix());
            if !prefixes.insert(prefix.clone()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate metric prefix: {} (source {})",
                    prefix, source.name
                )));
            }
            if source.path.as_os_str().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Source {} has an empty path",
                    source.name
                )));
            }
            if source.tailer_config(&self.tailer).poll_interval_ms == 0 {
                return Err(ConfigError::Validation(format!(
                    "Source {}: poll_interval_ms must be > 0",
                    source.name
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE_SOURCE: &str = r#"{
        sources: [
            { name: "requests", path: "/var/log/request.log", format: "request" }
        ]
    }"#;

    #[test]
    fn test_parse_minimal_config() {
        let config = ExporterConfig::parse(ONE_SOURCE).unwrap();

        assert_eq!(config.prometheus.listen, "0.0.0.0:8002");
        assert_eq!(config.prometheus.path, "/metrics");
        assert_eq!(config.window.size_secs, 15);
        assert_eq!(config.window.depth, 10);
        assert_eq!(config.window.latency_tiers_ms, vec![5000, 10000, 20000]);
        assert_eq!(config.window.known_status_codes.len(), 18);
        assert_eq!(config.tailer.poll_interval_ms, 100);

        let source = &config.sources[0];
        assert_eq!(source.format, LineFormat::Request);
        assert_eq!(source.prefix(), "artifactory");
        assert_eq!(source.tailer_config(&config.tailer), config.tailer);
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            prometheus: {
                listen: "127.0.0.1:9091",
                path: "/prometheus/metrics",
                default_labels: {
                    environment: "production",
                }
            },
            window: {
                size_secs: 30,
                depth: 4,
                latency_tiers_ms: [1000, 2500],
                known_status_codes: ["200", "500"],
                max_status_codes: 50,
            },
            tailer: {
                poll_interval_ms: 250,
                missing_backoff_secs: 10,
            },
            sources: [
                {
                    name: "requests",
                    path: "/var/opt/jfrog/artifactory/log/artifactory-request.log",
                    format: "request",
                },
                {
                    name: "s3-pool",
                    path: "/var/opt/jfrog/artifactory/log/artifactory-connectionpool.log",
                    format: "pool",
                    labels: { source: "artifactory", target: "localhost:8046" },
                    require_substrings: ["Connection request"],
                    tailer: { poll_interval_ms: 1000 },
                },
            ],
            logging: {
                level: "debug",
                format: "json"
            }
        }"#;

        let config = ExporterConfig::parse(json).unwrap();

        assert_eq!(config.prometheus.listen, "127.0.0.1:9091");
        assert_eq!(config.prometheus.path, "/prometheus/metrics");
        assert_eq!(
            config.prometheus.default_labels.get("environment"),
            Some(&"production".to_string())
        );
        assert_eq!(config.window.size_secs, 30);
        assert_eq!(config.window.depth, 4);
        assert_eq!(config.window.latency_tiers_ms, vec![1000, 2500]);
        assert_eq!(config.window.max_status_codes, 50);
        assert_eq!(config.tailer.poll_interval_ms, 250);
        assert_eq!(config.tailer.missing_backoff_secs, 10);
        assert_eq!(config.tailer.error_backoff_ms, 1000);

        let pool = &config.sources[1];
        assert_eq!(pool.format, LineFormat::Pool);
        assert_eq!(pool.prefix(), "s3_connection");
        assert_eq!(pool.require_substrings, vec!["Connection request"]);
        assert_eq!(pool.tailer_config(&config.tailer).poll_interval_ms, 1000);
        assert_eq!(pool.tailer_config(&config.tailer).missing_backoff_secs, 5);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_validate_no_sources() {
        let result = ExporterConfig::parse("{}");
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("At least one source")
        );
    }

    #[test]
    fn test_validate_duplicate_source_names() {
        let json = r#"{
            sources: [
                { name: "a", path: "/tmp/a.log", format: "request" },
                { name: "a", path: "/tmp/b.log", format: "pool" },
            ]
        }"#;

        let result = ExporterConfig::parse(json);
        assert!(result.unwrap_err().to_string().contains("Duplicate source"));
    }

    #[test]
    fn test_validate_duplicate_prefix() {
        let json = r#"{
            sources: [
                { name: "local", path: "/tmp/a.log", format: "request" },
                { name: "remote", path: "/tmp/b.log", format: "request" },
            ]
        }"#;

        let err = ExporterConfig::parse(json).unwrap_err().to_string();
        assert!(err.contains("Duplicate metric prefix: artifactory"));

        // Prefixes that sanitize to the same name collide too
        let json = r#"{
            sources: [
                { name: "a", path: "/tmp/a.log", format: "request", prefix: "edge.requests" },
                { name: "b", path: "/tmp/b.log", format: "request", prefix: "edge_requests" },
            ]
        }"#;
        assert!(ExporterConfig::parse(json).is_err());

        let json = r#"{
            sources: [
                { name: "local", path: "/tmp/a.log", format: "request" },
                { name: "remote", path: "/tmp/b.log", format: "request", prefix: "remote" },
            ]
        }"#;
        assert!(ExporterConfig::parse(json).is_ok());
    }

    #[test]
    fn test_validate_invalid_listen() {
        let mut config = ExporterConfig::parse(ONE_SOURCE).unwrap();
        config.prometheus.listen = "not-an-address".to_string();

        let result = config.validate();
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Invalid listen address")
        );
    }

    #[test]
    fn test_validate_invalid_path() {
        let mut config = ExporterConfig::parse(ONE_SOURCE).unwrap();
        config.prometheus.path = "no-leading-slash".to_string();

        assert!(
            config
                .validate()
                .unwrap_err()
                .to_string()
                .contains("must start with /")
        );
    }

    #[test]
    fn test_validate_window() {
        let mut config = ExporterConfig::parse(ONE_SOURCE).unwrap();
        config.window.size_secs = 0;
        assert!(config.validate().is_err());

        let mut config = ExporterConfig::parse(ONE_SOURCE).unwrap();
        config.window.depth = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_latency_tiers() {
        let mut config = ExporterConfig::parse(ONE_SOURCE).unwrap();

        config.window.latency_tiers_ms = vec![];
        assert!(config.validate().is_err());

        config.window.latency_tiers_ms = vec![5000, 5000];
        assert!(config.validate().is_err());

        config.window.latency_tiers_ms = vec![0, 100];
        assert!(config.validate().is_err());

        config.window.latency_tiers_ms = vec![100];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_poll_interval() {
        let mut config = ExporterConfig::parse(ONE_SOURCE).unwrap();
        config.tailer.poll_interval_ms = 0;

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_source_config_new() {
        let source = SourceConfig::new("pool", "/tmp/pool.log", LineFormat::Pool);

        assert_eq!(source.prefix(), "s3_connection");
        assert!(source.labels.is_empty());
        assert!(source.tailer.is_none());
    }
}
