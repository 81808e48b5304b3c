use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "Carelog";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prefix for every environment override read by [`AgentConfig::from_env`].
const ENV_PREFIX: &str = "CARELOG_";

/// Log filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "carelog_lib=info,carelog=info"
}

/// Get the application data directory
/// ~/Carelog/ on all platforms, falling back to the working directory.
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(APP_NAME))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Default location of the record database.
pub fn default_db_path() -> PathBuf {
    app_data_dir().join("carelog.db")
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// Runtime configuration for the agent and its collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Base URL of the Ollama instance serving completions.
    pub ollama_url: String,
    /// Model used for both decisions and extraction.
    pub model_name: String,
    /// Per-request timeout for the completion service.
    pub llm_timeout_secs: u64,
    /// Sampling temperature sent with each completion request.
    pub temperature: f32,
    /// Upper bound on think/act/reflect iterations per turn.
    pub max_iterations: u32,
    /// Items below this confidence are never saved and always need clarification.
    pub min_save_confidence: f32,
    /// Maximum number of per-user controllers kept in memory.
    pub registry_capacity: usize,
    /// Controllers idle for longer than this are evicted.
    pub registry_idle_secs: u64,
    pub db_path: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".to_string(),
            model_name: "medgemma:4b".to_string(),
            llm_timeout_secs: 60,
            temperature: 0.2,
            max_iterations: 10,
            min_save_confidence: 0.5,
            registry_capacity: 1024,
            registry_idle_secs: 3600,
            db_path: default_db_path(),
        }
    }
}

impl AgentConfig {
    /// Defaults overlaid with `CARELOG_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = Self::default();
        if let Some(url) = get("OLLAMA_URL") {
            config.ollama_url = url.trim_end_matches('/').to_string();
        }
        if let Some(model) = get("MODEL") {
            config.model_name = model;
        }
        if let Some(v) = get("LLM_TIMEOUT_SECS") {
            config.llm_timeout_secs = parse_value("LLM_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("TEMPERATURE") {
            config.temperature = parse_value("TEMPERATURE", &v)?;
        }
        if let Some(v) = get("MAX_ITERATIONS") {
            config.max_iterations = parse_value("MAX_ITERATIONS", &v)?;
        }
        if let Some(v) = get("MIN_SAVE_CONFIDENCE") {
            let value: f32 = parse_value("MIN_SAVE_CONFIDENCE", &v)?;
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    key: format!("{ENV_PREFIX}MIN_SAVE_CONFIDENCE"),
                    value: v,
                    reason: "must be within 0.0-1.0".to_string(),
                });
            }
            config.min_save_confidence = value;
        }
        if let Some(v) = get("REGISTRY_CAPACITY") {
            config.registry_capacity = parse_value("REGISTRY_CAPACITY", &v)?;
        }
        if let Some(v) = get("REGISTRY_IDLE_SECS") {
            config.registry_idle_secs = parse_value("REGISTRY_IDLE_SECS", &v)?;
        }
        if let Some(path) = get("DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        Ok(config)
    }
}

fn parse_value<T>(name: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
        key: format!("{ENV_PREFIX}{name}"),
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn db_path_under_app_data() {
        let path = default_db_path();
        assert!(path.starts_with(app_data_dir()));
        assert!(path.ends_with("carelog.db"));
    }

    #[test]
    fn app_name_is_carelog() {
        assert_eq!(APP_NAME, "Carelog");
    }

    #[test]
    fn defaults_match_agent_policy() {
        let config = AgentConfig::default();
        assert_eq!(config.max_iterations, 10);
        assert_eq!(config.min_save_confidence, 0.5);
        assert_eq!(config.ollama_url, "http://localhost:11434");
    }

    #[test]
    fn env_overrides_are_applied() {
        let config = AgentConfig::from_lookup(lookup(&[
            ("CARELOG_OLLAMA_URL", "http://gpu-box:11434/"),
            ("CARELOG_MODEL", "llama3.1:8b"),
            ("CARELOG_MAX_ITERATIONS", "4"),
            ("CARELOG_REGISTRY_CAPACITY", "16"),
            ("CARELOG_DB_PATH", "/tmp/carelog-test.db"),
        ]))
        .unwrap();

        assert_eq!(config.ollama_url, "http://gpu-box:11434");
        assert_eq!(config.model_name, "llama3.1:8b");
        assert_eq!(config.max_iterations, 4);
        assert_eq!(config.registry_capacity, 16);
        assert_eq!(config.db_path, PathBuf::from("/tmp/carelog-test.db"));
        // Untouched keys keep their defaults
        assert_eq!(config.llm_timeout_secs, 60);
    }

    #[test]
    fn blank_values_are_ignored() {
        let config = AgentConfig::from_lookup(lookup(&[("CARELOG_MODEL", "  ")])).unwrap();
        assert_eq!(config.model_name, "medgemma:4b");
    }

    #[test]
    fn malformed_number_is_an_error() {
        let err = AgentConfig::from_lookup(lookup(&[("CARELOG_MAX_ITERATIONS", "ten")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "CARELOG_MAX_ITERATIONS"));
    }

    #[test]
    fn confidence_outside_unit_interval_is_rejected() {
        let err = AgentConfig::from_lookup(lookup(&[("CARELOG_MIN_SAVE_CONFIDENCE", "1.5")]))
            .unwrap_err();
        assert!(err.to_string().contains("0.0-1.0"));
    }
}
