//! Daemon configuration.
//!
//! Loaded from an optional JSON file. Every field has a default, so an empty
//! object (or no file at all) yields a host-only configuration.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::collector::host;
use crate::metrics::MetricType;

/// Subsystems the daemon knows how to build.
pub const SUBSYSTEMS: [&str; 2] = ["host", "perfcounter"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Prefix of every exported metric name.
    pub namespace: String,
    pub collectors: CollectorsConfig,
    pub host: HostConfig,
    pub perfcounter: PerfcounterConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: "windows".to_string(),
            collectors: CollectorsConfig::default(),
            host: HostConfig::default(),
            perfcounter: PerfcounterConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CollectorsConfig {
    /// Enabled subsystems.
    pub enabled: Vec<String>,
}

impl Default for CollectorsConfig {
    fn default() -> Self {
        Self {
            enabled: vec!["host".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostConfig {
    /// Enabled host sub-collectors.
    pub enabled: Vec<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            enabled: host::COLLECTORS.iter().map(|c| c.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PerfcounterConfig {
    pub objects: Vec<ObjectConfig>,
    /// Object names to collect; `None` enables every configured object.
    pub enabled: Option<Vec<String>>,
}

impl PerfcounterConfig {
    pub fn enabled_objects(&self) -> Vec<String> {
        match &self.enabled {
            Some(enabled) => enabled.clone(),
            None => self.objects.iter().map(|o| o.name.clone()).collect(),
        }
    }
}

/// One performance object collected by the `perfcounter` subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObjectConfig {
    /// Sub-collector name, also used in metric names.
    pub name: String,
    /// PDH object, e.g. `Hyper-V Dynamic Memory VM`.
    pub object: String,
    /// Instances to collect. Empty for objects without instances; `["*"]` for all.
    #[serde(default)]
    pub instances: Vec<String>,
    pub counters: Vec<CounterConfig>,
    #[serde(default = "default_instance_label")]
    pub instance_label: String,
}

fn default_instance_label() -> String {
    "instance".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CounterConfig {
    /// PDH counter name.
    pub name: String,
    /// Metric suffix; defaults to the counter name.
    #[serde(default)]
    pub metric: Option<String>,
    /// Overrides the type derived from the counter type code.
    #[serde(default, rename = "type")]
    pub metric_type: Option<MetricTypeConfig>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricTypeConfig {
    Counter,
    Gauge,
}

impl From<MetricTypeConfig> for MetricType {
    fn from(value: MetricTypeConfig) -> Self {
        match value {
            MetricTypeConfig::Counter => MetricType::Counter,
            MetricTypeConfig::Gauge => MetricType::Gauge,
        }
    }
}

impl Config {
    /// Loads and validates `path`, or returns the validated defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_json(&content)?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Parses without validating.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.is_empty() {
            return Err(ConfigError::Invalid("namespace must not be empty".to_string()));
        }
        if !is_metric_name(&self.namespace) {
            return Err(ConfigError::Invalid(format!(
                "namespace {:?} is not a valid metric name prefix",
                self.namespace
            )));
        }

        for subsystem in &self.collectors.enabled {
            if !SUBSYSTEMS.contains(&subsystem.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "unknown subsystem {:?} (known: {})",
                    subsystem,
                    SUBSYSTEMS.join(", ")
                )));
            }
        }

        let mut seen = HashSet::new();
        for object in &self.perfcounter.objects {
            if object.name.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "perfcounter object {:?} has an empty name",
                    object.object
                )));
            }
            if !seen.insert(object.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate perfcounter object name {:?}",
                    object.name
                )));
            }
            if object.counters.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "perfcounter object {:?} has no counters",
                    object.name
                )));
            }
        }

        Ok(())
    }

    pub fn is_enabled(&self, subsystem: &str) -> bool {
        self.collectors.enabled.iter().any(|s| s == subsystem)
    }
}

fn is_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::from_json("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.namespace, "windows");
        assert_eq!(config.collectors.enabled, vec!["host"]);
        assert_eq!(config.host.enabled, vec!["cpu", "memory", "system"]);
        assert!(config.perfcounter.objects.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn test_load_without_path_uses_defaults() {
        assert_eq!(Config::load(None).unwrap(), Config::default());
    }

    #[test]
    fn test_load_perfcounter_objects() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "namespace": "win",
                "collectors": {{ "enabled": ["host", "perfcounter"] }},
                "host": {{ "enabled": ["cpu"] }},
                "perfcounter": {{
                    "objects": [
                        {{
                            "name": "hyperv_memory",
                            "object": "Hyper-V Dynamic Memory VM",
                            "instances": ["*"],
                            "instance_label": "vm",
                            "counters": [
                                {{ "name": "Physical Memory", "metric": "physical_bytes", "type": "gauge" }},
                                {{ "name": "Average Pressure", "labels": {{ "unit": "percent" }} }}
                            ]
                        }}
                    ]
                }}
            }}"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.namespace, "win");
        assert!(config.is_enabled("perfcounter"));
        assert_eq!(config.host.enabled, vec!["cpu"]);

        let object = &config.perfcounter.objects[0];
        assert_eq!(object.instance_label, "vm");
        assert_eq!(object.counters[0].metric.as_deref(), Some("physical_bytes"));
        assert_eq!(object.counters[0].metric_type, Some(MetricTypeConfig::Gauge));
        assert_eq!(object.counters[1].labels["unit"], "percent");
        assert_eq!(config.perfcounter.enabled_objects(), vec!["hyperv_memory"]);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(Some(&dir.path().join("missing.json"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            Config::from_json("{ not json"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            Config::from_json(r#"{ "unknown_field": 1 }"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_configs() {
        let cases = [
            (r#"{ "namespace": "" }"#, "namespace"),
            (r#"{ "namespace": "9lives" }"#, "namespace"),
            (r#"{ "collectors": { "enabled": ["gpu"] } }"#, "gpu"),
            (
                r#"{ "perfcounter": { "objects": [
                    { "name": "a", "object": "X", "counters": [{ "name": "C" }] },
                    { "name": "a", "object": "Y", "counters": [{ "name": "C" }] }
                ] } }"#,
                "duplicate",
            ),
            (
                r#"{ "perfcounter": { "objects": [
                    { "name": "a", "object": "X", "counters": [] }
                ] } }"#,
                "no counters",
            ),
        ];

        for (json, needle) in cases {
            let err = Config::from_json(json).unwrap().validate().unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)));
            assert!(err.to_string().contains(needle), "{err} should mention {needle}");
        }
    }
}
