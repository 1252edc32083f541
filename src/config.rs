//! Configuration types for agent-checks.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::error::CheckError;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Seconds between two polls of the same instance.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// BIND/named instances.
    #[serde(default)]
    pub bind: Vec<BindInstance>,

    /// File content match instances.
    #[serde(default)]
    pub file_grep: Vec<FileGrepInstance>,

    /// Process exit code instances.
    #[serde(default)]
    pub status_process: Vec<StatusProcessInstance>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            telemetry: TelemetryConfig::default(),
            interval_secs: default_interval_secs(),
            bind: Vec::new(),
            file_grep: Vec::new(),
            status_process: Vec::new(),
        }
    }
}

impl Config {
    /// Poll interval as a `Duration`.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

fn default_interval_secs() -> u64 {
    15
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "debug", "agent_checks=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// One BIND/named server to poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindInstance {
    /// Host serving the statistics channel.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port of the statistics channel.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Timeout for the statistics request in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Resolver asked for the local view of each zone's SOA.
    #[serde(default = "default_resolver")]
    pub resolver: IpAddr,

    /// Port used for every DNS query, local and master.
    #[serde(default = "default_dns_port")]
    pub dns_port: u16,

    /// Timeout for each individual DNS query in milliseconds.
    #[serde(default = "default_dns_timeout_ms")]
    pub dns_timeout_ms: u64,

    /// Tags appended to everything this instance emits.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Default for BindInstance {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_ms: default_timeout_ms(),
            resolver: default_resolver(),
            dns_port: default_dns_port(),
            dns_timeout_ms: default_dns_timeout_ms(),
            tags: Vec::new(),
        }
    }
}

impl BindInstance {
    /// URL of the statistics document.
    pub fn url(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }

    /// Statistics request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Per-query DNS timeout.
    pub fn dns_timeout(&self) -> Duration {
        Duration::from_millis(self.dns_timeout_ms)
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8053
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_resolver() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_dns_port() -> u16 {
    53
}

fn default_dns_timeout_ms() -> u64 {
    2000
}

fn default_true() -> bool {
    true
}

/// A file that must contain a given string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileGrepInstance {
    /// Name reported in the `check_name` tag.
    pub name: String,

    /// Path of the file to search.
    pub file: String,

    /// Bytes to look for.
    pub search_string: String,

    /// Report the file size gauge alongside the match check.
    #[serde(default = "default_true")]
    pub additional_metrics: bool,

    /// Extra tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A shell command whose exit code is the health signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusProcessInstance {
    /// Name reported in the `check_name` tag.
    pub check_name: String,

    /// Command run through `sh -c`.
    pub command: String,

    /// Exit codes considered healthy.
    #[serde(default = "default_return_codes")]
    pub return_codes: Vec<i32>,

    /// Seconds before the command is killed and reported as timed out.
    #[serde(default = "default_process_timeout_secs")]
    pub timeout_secs: u64,

    /// Extra tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_return_codes() -> Vec<i32> {
    vec![0]
}

fn default_process_timeout_secs() -> u64 {
    5
}

/// Stable identity of a check instance, derived from its configuration.
///
/// Two configurations that are structurally equal map to the same id, whatever
/// the order their keys were written in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(String);

impl InstanceId {
    /// Derive the id from any serializable configuration.
    pub fn derive<T: Serialize>(config: &T) -> Result<Self, CheckError> {
        let value = serde_json::to_value(config)
            .map_err(|e| CheckError::Config(format!("cannot derive instance id: {}", e)))?;
        let mut rendered = String::new();
        write_canonical(&value, &mut rendered);
        Ok(Self(rendered))
    }

    /// Canonical rendering the id was built from.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Render `value` with object keys sorted at every depth.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            out.push('{');
            for (i, (key, value)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bind_defaults() {
        let instance: BindInstance = serde_json::from_value(json!({})).unwrap();
        assert_eq!(instance.host, "localhost");
        assert_eq!(instance.port, 8053);
        assert_eq!(instance.resolver, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(instance.dns_port, 53);
        assert_eq!(instance.url(), "http://localhost:8053/");
        assert_eq!(instance, BindInstance::default());
    }

    #[test]
    fn test_status_process_defaults() {
        let instance: StatusProcessInstance =
            serde_json::from_value(json!({"check_name": "true", "command": "/bin/true"}))
                .unwrap();
        assert_eq!(instance.return_codes, vec![0]);
        assert_eq!(instance.timeout_secs, 5);
    }

    #[test]
    fn test_instance_id_ignores_key_order() {
        let a = json!({"host": "ns1", "port": 8053, "extra": {"b": [1, 2], "a": {"y": 1, "x": 2}}});
        let b = json!({"extra": {"a": {"x": 2, "y": 1}, "b": [1, 2]}, "port": 8053, "host": "ns1"});
        assert_eq!(InstanceId::derive(&a).unwrap(), InstanceId::derive(&b).unwrap());
    }

    #[test]
    fn test_instance_id_sees_nested_differences() {
        let a = json!({"host": "ns1", "tags": ["a", "b"]});
        let b = json!({"host": "ns1", "tags": ["b", "a"]});
        assert_ne!(InstanceId::derive(&a).unwrap(), InstanceId::derive(&b).unwrap());
    }

    #[test]
    fn test_instance_id_from_typed_config() {
        let a = BindInstance::default();
        let b = BindInstance {
            port: 8054,
            ..BindInstance::default()
        };
        assert_eq!(InstanceId::derive(&a).unwrap(), InstanceId::derive(&a.clone()).unwrap());
        assert_ne!(InstanceId::derive(&a).unwrap(), InstanceId::derive(&b).unwrap());
    }

    #[test]
    fn test_config_parses_toml() {
        let raw = r#"
            interval_secs = 30

            [telemetry]
            log_level = "debug"

            [[bind]]
            host = "ns1.example.com"
            tags = ["env:prod"]

            [[file_grep]]
            name = "motd"
            file = "/etc/motd"
            search_string = "Welcome"

            [[status_process]]
            check_name = "false.passes"
            command = "/bin/false"
            return_codes = [0, 1]
        "#;
        let config: Config = ::config::Config::builder()
            .add_source(::config::File::from_str(raw, ::config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.interval(), Duration::from_secs(30));
        assert_eq!(config.telemetry.log_level, "debug");
        assert_eq!(config.bind[0].host, "ns1.example.com");
        assert_eq!(config.bind[0].port, 8053);
        assert_eq!(config.file_grep[0].search_string, "Welcome");
        assert_eq!(config.status_process[0].return_codes, vec![0, 1]);
    }
}
