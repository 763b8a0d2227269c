//! Service configuration, read from a YAML file.
//!
//! ```yaml
//! server:
//!   addr: "0.0.0.0:8787"
//! llm:
//!   provider: qwen            # deepseek | qwen | custom
//!   timeout_secs: 60
//! detector:
//!   endpoint: "http://localhost:8500/detect"
//! query_executor:
//!   endpoint: "http://localhost:8600/query"
//! pipeline:
//!   reference_label: "夕阳"
//!   dispatch_timeout_secs: 10
//! ```
//!
//! API keys never live in the file: `llm.api_key_env` names the environment
//! variable to read them from.
use std::path::Path;
use std::time::Duration;

use geoloc_clients::{ChatClientConfig, DetectorConfig, QueryExecutorConfig};
use geoloc_core::context::{DEFAULT_MATCH_CONFIDENCE, DEFAULT_MAX_LOCATIONS, DEFAULT_REFERENCE_LABEL};
use geoloc_core::{GeolocError, PipelineOptions};
use serde::Deserialize;

pub const CONFIG_ENV: &str = "GEOLOC_CONFIG";
pub const ADDR_ENV: &str = "GEOLOC_ADDR";
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";
pub const DEFAULT_ADDR: &str = "0.0.0.0:8787";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub detector: DetectorConfig,
    pub query_executor: QueryExecutorConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Deepseek,
    Qwen,
    Custom,
}

/// Provider preset plus optional overrides.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key_env: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub timeout_secs: Option<u64>,
}

impl LlmConfig {
    pub fn client_config(&self) -> Result<ChatClientConfig, GeolocError> {
        let mut config = match self.provider {
            LlmProvider::Deepseek => ChatClientConfig::deepseek(),
            LlmProvider::Qwen => ChatClientConfig::qwen(),
            LlmProvider::Custom => {
                let (Some(base_url), Some(model)) = (&self.base_url, &self.model) else {
                    return Err(GeolocError::Config(
                        "llm.provider custom needs base_url and model".to_string(),
                    ));
                };
                ChatClientConfig::custom(base_url.clone(), model.clone(), "custom".to_string())
            }
        };

        if let Some(base_url) = &self.base_url {
            config.base_url = base_url.clone();
        }
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if self.api_key_env.is_some() {
            config.api_key_env = self.api_key_env.clone();
        }
        if self.temperature.is_some() {
            config.temperature = self.temperature;
        }
        if self.top_p.is_some() {
            config.top_p = self.top_p;
        }
        if let Some(timeout_secs) = self.timeout_secs {
            config.timeout_secs = timeout_secs;
        }
        Ok(config)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub reference_label: String,
    pub match_confidence_threshold: f64,
    pub max_locations: usize,
    pub dispatch_timeout_secs: Option<f64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            reference_label: DEFAULT_REFERENCE_LABEL.to_string(),
            match_confidence_threshold: DEFAULT_MATCH_CONFIDENCE,
            max_locations: DEFAULT_MAX_LOCATIONS,
            dispatch_timeout_secs: None,
        }
    }
}

impl PipelineConfig {
    pub fn options(&self) -> Result<PipelineOptions, GeolocError> {
        if !(0.0..=1.0).contains(&self.match_confidence_threshold) {
            return Err(GeolocError::Config(format!(
                "pipeline.match_confidence_threshold must be within [0, 1], got {}",
                self.match_confidence_threshold
            )));
        }
        if !(1..=DEFAULT_MAX_LOCATIONS).contains(&self.max_locations) {
            return Err(GeolocError::Config(format!(
                "pipeline.max_locations must be within 1..={}, got {}",
                DEFAULT_MAX_LOCATIONS, self.max_locations
            )));
        }
        let dispatch_timeout = match self.dispatch_timeout_secs {
            Some(secs) if secs > 0.0 => Some(Duration::try_from_secs_f64(secs).map_err(|e| {
                GeolocError::Config(format!("pipeline.dispatch_timeout_secs {}: {}", secs, e))
            })?),
            Some(secs) => {
                return Err(GeolocError::Config(format!(
                    "pipeline.dispatch_timeout_secs must be positive, got {}",
                    secs
                )))
            }
            None => None,
        };
        Ok(PipelineOptions {
            reference_label: self.reference_label.clone(),
            match_confidence_threshold: self.match_confidence_threshold,
            max_locations: self.max_locations,
            dispatch_timeout,
        })
    }
}

impl AppConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, GeolocError> {
        serde_yaml::from_str(yaml).map_err(|e| GeolocError::Config(e.to_string()))
    }

    /// Reads `path`; a missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GeolocError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| GeolocError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml(&content)
    }

    /// File named by `GEOLOC_CONFIG`, with `GEOLOC_ADDR` overriding the
    /// listen address.
    pub fn from_env() -> Result<Self, GeolocError> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::load(path)?;
        if let Ok(addr) = std::env::var(ADDR_ENV) {
            config.server.addr = addr;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = AppConfig::from_yaml("{}").unwrap();
        assert_eq!(config.server.addr, DEFAULT_ADDR);
        assert_eq!(config.llm.provider, LlmProvider::Deepseek);

        let options = config.pipeline.options().unwrap();
        assert_eq!(options.reference_label, "夕阳");
        assert_eq!(options.max_locations, 3);
        assert!(options.dispatch_timeout.is_none());
    }

    #[test]
    fn test_full_file() {
        let config = AppConfig::from_yaml(
            r#"
server:
  addr: "127.0.0.1:9000"
llm:
  provider: qwen
  api_key_env: MY_QWEN_KEY
  timeout_secs: 15
detector:
  endpoint: "http://vision:8500/detect"
query_executor:
  endpoint: "http://geo:8600/query"
  timeout_secs: 5
pipeline:
  max_locations: 2
  dispatch_timeout_secs: 2.5
"#,
        )
        .unwrap();

        let llm = config.llm.client_config().unwrap();
        assert_eq!(llm.model, "qwen2.5-72b-instruct");
        assert_eq!(llm.top_p, Some(0.8));
        assert_eq!(llm.api_key_env.as_deref(), Some("MY_QWEN_KEY"));
        assert_eq!(llm.timeout_secs, 15);

        assert_eq!(config.detector.endpoint, "http://vision:8500/detect");
        assert_eq!(config.detector.timeout_secs, 30);
        assert_eq!(config.query_executor.timeout_secs, 5);

        let options = config.pipeline.options().unwrap();
        assert_eq!(options.max_locations, 2);
        assert_eq!(options.dispatch_timeout, Some(Duration::from_millis(2500)));
    }

    #[test]
    fn test_custom_provider_needs_endpoint() {
        let config = AppConfig::from_yaml("llm:\n  provider: custom\n").unwrap();
        assert!(matches!(config.llm.client_config(), Err(GeolocError::Config(_))));

        let config = AppConfig::from_yaml(
            "llm:\n  provider: custom\n  base_url: http://localhost:1234/v1\n  model: local\n",
        )
        .unwrap();
        let llm = config.llm.client_config().unwrap();
        assert_eq!(llm.endpoint(), "http://localhost:1234/v1/chat/completions");
        assert!(llm.api_key_env.is_none());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(AppConfig::from_yaml("llm:\n  provider: openai\n").is_err());

        let config = AppConfig::from_yaml("pipeline:\n  dispatch_timeout_secs: -1\n").unwrap();
        assert!(config.pipeline.options().is_err());

        let config = AppConfig::from_yaml("pipeline:\n  match_confidence_threshold: 7\n").unwrap();
        assert!(config.pipeline.options().is_err());
    }

    #[test]
    fn test_location_cap_is_bounded() {
        for max_locations in [0, 4, 5] {
            let yaml = format!("pipeline:\n  max_locations: {}\n", max_locations);
            let config = AppConfig::from_yaml(&yaml).unwrap();
            assert!(matches!(config.pipeline.options(), Err(GeolocError::Config(_))));
        }

        let config = AppConfig::from_yaml("pipeline:\n  max_locations: 1\n").unwrap();
        assert_eq!(config.pipeline.options().unwrap().max_locations, 1);
    }

    #[test]
    fn test_oversized_timeout_is_rejected() {
        for secs in ["1.0e30", ".inf", ".nan"] {
            let yaml = format!("pipeline:\n  dispatch_timeout_secs: {}\n", secs);
            let config = AppConfig::from_yaml(&yaml).unwrap();
            assert!(matches!(config.pipeline.options(), Err(GeolocError::Config(_))));
        }
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = AppConfig::load("does/not/exist.yaml").unwrap();
        assert_eq!(config.server.addr, DEFAULT_ADDR);
    }
}
