use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for the netprobed daemon.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    #[allow(dead_code)]
    pub log_level: String,

    /// Port for the JSON control plane. Default: 80.
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Port the passive TCP receiver listens on. Default: 4000.
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,

    /// Port the passive UDP receiver listens on. Default: 5000.
    #[serde(default = "default_udp_port")]
    pub udp_port: u16,

    /// Interval between latency measurements when a request leaves
    /// intervalMs at zero. Milliseconds. Default: 1000.
    #[serde(default = "default_interval_ms")]
    pub default_interval_ms: i64,

    /// Directory where probe series files are written. Default: cwd.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Identity of this server in run ids and sink tags. Defaults to
    /// $K8S_POD_NAME, else the OS hostname.
    #[serde(default)]
    pub id: String,

    /// Read buffer size for the passive TCP receiver. Default: 16KB.
    #[serde(default = "default_read_buffer_size")]
    pub tcp_read_buffer_size: usize,

    /// Read buffer size for the passive UDP receiver. Default: 16KB.
    #[serde(default = "default_read_buffer_size")]
    pub udp_read_buffer_size: usize,

    /// Metrics sink configuration.
    #[serde(default)]
    pub sink: SinkConfig,

    /// Prometheus health metrics server configuration.
    #[serde(default)]
    pub health: HealthConfig,
}

/// Metrics sink connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    /// Enable datapoint publication. Default: false.
    #[serde(default)]
    pub enabled: bool,

    /// Sink API endpoint. Default: "http://localhost:17123".
    #[serde(default = "default_sink_endpoint")]
    pub endpoint: String,

    /// Sink API key.
    #[serde(default)]
    pub api_key: String,

    /// Sink application key.
    #[serde(default)]
    pub app_key: String,

    /// Request timeout for datapoint publication. Default: 10s.
    #[serde(default = "default_sink_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

/// Prometheus health metrics server configuration.
#[derive(Debug, Deserialize)]
pub struct HealthConfig {
    /// Listen address. Default: ":9090".
    #[serde(default = "default_health_addr")]
    pub addr: String,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_http_port() -> u16 {
    80
}

fn default_tcp_port() -> u16 {
    4000
}

fn default_udp_port() -> u16 {
    5000
}

fn default_interval_ms() -> i64 {
    1000
}

fn default_data_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

fn default_read_buffer_size() -> usize {
    16 * 1024
}

fn default_sink_endpoint() -> String {
    "http://localhost:17123".to_string()
}

fn default_sink_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_health_addr() -> String {
    ":9090".to_string()
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            http_port: default_http_port(),
            tcp_port: default_tcp_port(),
            udp_port: default_udp_port(),
            default_interval_ms: default_interval_ms(),
            data_dir: default_data_dir(),
            id: String::new(),
            tcp_read_buffer_size: default_read_buffer_size(),
            udp_read_buffer_size: default_read_buffer_size(),
            sink: SinkConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_sink_endpoint(),
            api_key: String::new(),
            app_key: String::new(),
            timeout: default_sink_timeout(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            addr: default_health_addr(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.default_interval_ms <= 0 {
            bail!("default_interval_ms must be positive");
        }

        if self.tcp_read_buffer_size == 0 {
            bail!("tcp_read_buffer_size must be positive");
        }

        if self.udp_read_buffer_size == 0 {
            bail!("udp_read_buffer_size must be positive");
        }

        if self.sink.enabled && self.sink.endpoint.is_empty() {
            bail!("sink.endpoint is required when the sink is enabled");
        }

        Ok(())
    }

    /// Resolve the process identity: explicit id, else $K8S_POD_NAME, else
    /// the OS hostname.
    pub fn resolved_id(&self) -> String {
        if !self.id.is_empty() {
            return self.id.clone();
        }

        if let Ok(pod) = std::env::var("K8S_POD_NAME") {
            if !pod.is_empty() {
                return pod;
            }
        }

        match std::fs::read_to_string("/etc/hostname") {
            Ok(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => {
                tracing::warn!("unable to resolve local hostname, using 'unknown'");
                "unknown".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let cfg = Config::default();
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.http_port, 80);
        assert_eq!(cfg.tcp_port, 4000);
        assert_eq!(cfg.udp_port, 5000);
        assert_eq!(cfg.default_interval_ms, 1000);
        assert_eq!(cfg.tcp_read_buffer_size, 16 * 1024);
        assert_eq!(cfg.health.addr, ":9090");
        assert!(!cfg.sink.enabled);
        assert_eq!(cfg.sink.timeout, Duration::from_secs(10));
        cfg.validate().expect("defaults validate");
    }

    #[test]
    fn test_yaml_overrides() {
        let cfg: Config = serde_yaml::from_str(
            r#"
http_port: 8080
tcp_port: 14000
default_interval_ms: 250
id: node-3
sink:
  enabled: true
  endpoint: "http://sink.internal:17123"
  api_key: abc
  timeout: 5s
"#,
        )
        .expect("parse");

        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.tcp_port, 14000);
        assert_eq!(cfg.udp_port, 5000);
        assert_eq!(cfg.default_interval_ms, 250);
        assert_eq!(cfg.id, "node-3");
        assert!(cfg.sink.enabled);
        assert_eq!(cfg.sink.timeout, Duration::from_secs(5));
        cfg.validate().expect("validates");
    }

    #[test]
    fn test_validation_rejects_non_positive_interval() {
        let cfg = Config {
            default_interval_ms: 0,
            ..Default::default()
        };

        let err = cfg.validate().expect_err("should fail");
        assert!(err.to_string().contains("default_interval_ms"));
    }

    #[test]
    fn test_validation_rejects_enabled_sink_without_endpoint() {
        let cfg = Config {
            sink: SinkConfig {
                enabled: true,
                endpoint: String::new(),
                ..Default::default()
            },
            ..Default::default()
        };

        let err = cfg.validate().expect_err("should fail");
        assert!(err.to_string().contains("sink.endpoint"));
    }

    #[test]
    fn test_validation_rejects_zero_read_buffers() {
        let cfg = Config {
            udp_read_buffer_size: 0,
            ..Default::default()
        };

        let err = cfg.validate().expect_err("should fail");
        assert!(err.to_string().contains("udp_read_buffer_size"));
    }

    #[test]
    fn test_explicit_id_wins() {
        let cfg = Config {
            id: "explicit".to_string(),
            ..Default::default()
        };
        assert_eq!(cfg.resolved_id(), "explicit");
    }
}
