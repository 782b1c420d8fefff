//! Executor configuration
//!
//! [`ExecutorConfig`] bundles default run options and HTTP transport
//! settings. It loads from YAML (`.yaml`/`.yml`) or JSON, after which
//! `REQCHAIN_*` environment variables override individual options.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::executor::ExecuteOptions;
use crate::transport::HttpConfig;
use crate::{Error, Result};

pub const ENV_MAX_CONCURRENCY: &str = "REQCHAIN_MAX_CONCURRENCY";
pub const ENV_BATCH_SIZE: &str = "REQCHAIN_BATCH_SIZE";
pub const ENV_TIMEOUT: &str = "REQCHAIN_TIMEOUT";
pub const ENV_STOP_ON_ERROR: &str = "REQCHAIN_STOP_ON_ERROR";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Options used when the caller does not supply its own
    pub defaults: ExecuteOptions,
    pub http: HttpConfig,
}

impl ExecutorConfig {
    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_MAX_CONCURRENCY) {
            self.defaults.max_concurrency = Some(parse_usize(ENV_MAX_CONCURRENCY, &raw)?);
        }
        if let Some(raw) = lookup(ENV_BATCH_SIZE) {
            self.defaults.batch_size = parse_usize(ENV_BATCH_SIZE, &raw)?;
        }
        if let Some(raw) = lookup(ENV_TIMEOUT) {
            let ms = parse_duration_ms(&raw)
                .map_err(|e| Error::Config(format!("{}: {}", ENV_TIMEOUT, e)))?;
            self.defaults.timeout_ms = Some(ms);
        }
        if let Some(raw) = lookup(ENV_STOP_ON_ERROR) {
            self.defaults.stop_on_error = parse_bool(ENV_STOP_ON_ERROR, &raw)?;
        }
        self.defaults.validate()
    }
}

fn parse_usize(key: &str, raw: &str) -> Result<usize> {
    raw.trim()
        .parse()
        .map_err(|_| Error::Config(format!("{}: expected a positive integer, got '{}'", key, raw)))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(Error::Config(format!("{}: expected a boolean, got '{}'", key, raw))),
    }
}

/// Parse integer milliseconds or a humantime duration (`"250ms"`, `"1m 30s"`)
pub fn parse_duration_ms(raw: &str) -> std::result::Result<u64, String> {
    let raw = raw.trim();
    if let Ok(ms) = raw.parse::<u64>() {
        return Ok(ms);
    }
    humantime::parse_duration(raw)
        .map(|d| d.as_millis() as u64)
        .map_err(|e| format!("invalid duration '{}': {}", raw, e))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Millis(u64),
    Text(String),
}

impl RawDuration {
    fn into_ms<E: serde::de::Error>(self) -> std::result::Result<u64, E> {
        match self {
            RawDuration::Millis(ms) => Ok(ms),
            RawDuration::Text(s) => parse_duration_ms(&s).map_err(E::custom),
        }
    }
}

/// Serde adapter for `u64` millisecond fields that also accept humantime
/// strings. Serializes as a plain integer.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::RawDuration;

    pub fn serialize<S: Serializer>(ms: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(*ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        RawDuration::deserialize(deserializer)?.into_ms()
    }
}

/// [`duration_ms`] for `Option<u64>` fields
pub mod opt_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::RawDuration;

    pub fn serialize<S: Serializer>(ms: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
        match ms {
            Some(ms) => serializer.serialize_some(ms),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
        match Option::<RawDuration>::deserialize(deserializer)? {
            Some(raw) => raw.into_ms().map(Some),
            None => Ok(None),
        }
    }
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
        .unwrap_or(false)
}

/// Read and deserialize a YAML or JSON file, reporting failures as
/// configuration errors
pub(crate) fn read_document<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let raw = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;

    if is_yaml(path) {
        serde_yaml::from_str(&raw)
            .map_err(|e| Error::Config(format!("invalid YAML {} {}: {}", what, path.display(), e)))
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("invalid JSON {} {}: {}", what, path.display(), e)))
    }
}

/// Load a config file and apply environment overrides
pub fn load_config(path: &Path) -> Result<ExecutorConfig> {
    let mut config: ExecutorConfig = read_document(path, "config")?;
    config.apply_env()?;
    tracing::debug!(path = %path.display(), mode = %config.defaults.mode, "loaded executor config");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutionMode;
    use std::collections::HashMap;
    use std::io::Write;

    fn write_temp(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_parse_duration_ms() {
        assert_eq!(parse_duration_ms("1500"), Ok(1500));
        assert_eq!(parse_duration_ms("250ms"), Ok(250));
        assert_eq!(parse_duration_ms("2s"), Ok(2000));
        assert_eq!(parse_duration_ms("1m 30s"), Ok(90_000));
        assert!(parse_duration_ms("soon").is_err());
    }

    #[test]
    fn test_load_yaml() {
        let file = write_temp(
            ".yaml",
            r#"
defaults:
  mode: batch
  batch_size: 3
  delay_between_batches_ms: 100ms
  collect_metrics: true
http:
  user_agent: reqchain-test
  connect_timeout_ms: 2s
"#,
        );
        let mut config: ExecutorConfig = read_document(file.path(), "config").unwrap();
        config.apply_overrides(|_| None).unwrap();
        assert_eq!(config.defaults.mode, ExecutionMode::Batch);
        assert_eq!(config.defaults.batch_size, 3);
        assert_eq!(config.defaults.delay_between_batches_ms, Some(100));
        assert!(config.defaults.collect_metrics);
        assert_eq!(config.http.user_agent, "reqchain-test");
        assert_eq!(config.http.connect_timeout_ms, Some(2000));
    }

    #[test]
    fn test_load_json_defaults() {
        let file = write_temp(".json", r#"{"defaults": {"mode": "parallel", "max_concurrency": 4}}"#);
        let config: ExecutorConfig = read_document(file.path(), "config").unwrap();
        assert_eq!(config.defaults.mode, ExecutionMode::Parallel);
        assert_eq!(config.defaults.max_concurrency, Some(4));
        assert_eq!(config.defaults.batch_size, 10);
    }

    #[test]
    fn test_unknown_mode_is_config_error() {
        let file = write_temp(".yml", "defaults:\n  mode: turbo\n");
        assert!(matches!(load_config(file.path()), Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        assert!(matches!(
            load_config(Path::new("/nonexistent/reqchain.yaml")),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_MAX_CONCURRENCY, "8"),
            (ENV_BATCH_SIZE, "25"),
            (ENV_TIMEOUT, "3s"),
            (ENV_STOP_ON_ERROR, "true"),
        ]
        .into_iter()
        .collect();

        let mut config = ExecutorConfig::default();
        config
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.defaults.max_concurrency, Some(8));
        assert_eq!(config.defaults.batch_size, 25);
        assert_eq!(config.defaults.timeout_ms, Some(3000));
        assert!(config.defaults.stop_on_error);
    }

    #[test]
    fn test_invalid_overrides() {
        let mut config = ExecutorConfig::default();
        assert!(config
            .apply_overrides(|k| (k == ENV_BATCH_SIZE).then(|| "0".to_string()))
            .is_err());
        let mut config = ExecutorConfig::default();
        assert!(config
            .apply_overrides(|k| (k == ENV_STOP_ON_ERROR).then(|| "maybe".to_string()))
            .is_err());
        let mut config = ExecutorConfig::default();
        assert!(config
            .apply_overrides(|k| (k == ENV_TIMEOUT).then(|| "later".to_string()))
            .is_err());
    }
}
