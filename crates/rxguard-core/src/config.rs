//! Settings sourced from the process environment.
//!
//! Every key is optional. Only the two confidence thresholds and the
//! retrieval result count influence how a case flows through the pipeline.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::gate::DEFAULT_CONFIDENCE_THRESHOLD;
use crate::retry::RetryPolicy;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("CONFIG/{key}: cannot parse {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("CONFIG/{0}")]
    OutOfRange(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub api_key: String,
    pub reasoning_base_url: String,
    pub model_name: String,
    pub temperature: f32,
    pub reasoning_timeout_secs: u64,
    pub embedding_model: String,
    pub vector_store_path: PathBuf,
    pub guideline_dir: PathBuf,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub confidence_threshold: f64,
    pub extraction_confidence_threshold: f64,
    /// Attempt cap for every external call.
    pub max_iterations: u32,
    pub retry_backoff_ms: u64,
    pub log_level: String,
    pub log_format: LogFormat,
    pub listen_addr: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            reasoning_base_url: "https://api.groq.com/openai/v1".to_string(),
            model_name: "openai/gpt-oss-120b".to_string(),
            temperature: 0.1,
            reasoning_timeout_secs: 60,
            embedding_model: "hashing-384".to_string(),
            vector_store_path: PathBuf::from("./data/vectorstore"),
            guideline_dir: PathBuf::from("./data/guidelines"),
            chunk_size: 512,
            chunk_overlap: 50,
            top_k: 5,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            extraction_confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            max_iterations: 3,
            retry_backoff_ms: 250,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            listen_addr: "0.0.0.0:8000".to_string(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup, starting from defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut s = Settings::default();

        if let Some(v) = lookup("GROQ_API_KEY") {
            s.api_key = v;
        }
        if let Some(v) = lookup("REASONING_BASE_URL") {
            s.reasoning_base_url = v;
        }
        if let Some(v) = lookup("MODEL_NAME") {
            s.model_name = v;
        }
        if let Some(v) = lookup("EMBEDDING_MODEL") {
            s.embedding_model = v;
        }
        if let Some(v) = lookup("VECTOR_STORE_PATH") {
            s.vector_store_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("GUIDELINE_DIR") {
            s.guideline_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            s.log_level = v;
        }
        if let Some(v) = lookup("RXGUARD_ADDR") {
            s.listen_addr = v;
        }
        if let Some(v) = lookup("LOG_FORMAT") {
            s.log_format = match v.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" | "text" => LogFormat::Pretty,
                _ => return Err(ConfigError::Invalid { key: "LOG_FORMAT", value: v }),
            };
        }

        parse_into(&lookup, "TEMPERATURE", &mut s.temperature)?;
        parse_into(&lookup, "REASONING_TIMEOUT_SECS", &mut s.reasoning_timeout_secs)?;
        parse_into(&lookup, "CHUNK_SIZE", &mut s.chunk_size)?;
        parse_into(&lookup, "CHUNK_OVERLAP", &mut s.chunk_overlap)?;
        parse_into(&lookup, "TOP_K_RETRIEVAL", &mut s.top_k)?;
        parse_into(&lookup, "CONFIDENCE_THRESHOLD", &mut s.confidence_threshold)?;
        parse_into(
            &lookup,
            "EXTRACTION_CONFIDENCE_THRESHOLD",
            &mut s.extraction_confidence_threshold,
        )?;
        parse_into(&lookup, "MAX_ITERATIONS", &mut s.max_iterations)?;
        parse_into(&lookup, "RETRY_BACKOFF_MS", &mut s.retry_backoff_ms)?;

        s.validate()?;
        Ok(s)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("CONFIDENCE_THRESHOLD", self.confidence_threshold),
            ("EXTRACTION_CONFIDENCE_THRESHOLD", self.extraction_confidence_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfRange(format!("{} must be within [0, 1], got {}", name, value)));
            }
        }
        if self.chunk_size == 0 || self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::OutOfRange(format!(
                "CHUNK_OVERLAP ({}) must be smaller than a non-zero CHUNK_SIZE ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(ConfigError::OutOfRange("TOP_K_RETRIEVAL must be at least 1".to_string()));
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::OutOfRange("MAX_ITERATIONS must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Retry policy applied to each external collaborator.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_iterations, Duration::from_millis(self.retry_backoff_ms))
    }
}

fn parse_into<F, T>(lookup: &F, key: &'static str, slot: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw.clone() })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings_from(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let s = settings_from(&[]).unwrap();
        assert_eq!(s.chunk_size, 512);
        assert_eq!(s.chunk_overlap, 50);
        assert_eq!(s.top_k, 5);
        assert_eq!(s.confidence_threshold, 0.75);
        assert_eq!(s.extraction_confidence_threshold, 0.75);
        assert_eq!(s.log_format, LogFormat::Pretty);
        assert_eq!(s.retry_policy().max_attempts, 3);
    }

    #[test]
    fn test_overrides() {
        let s = settings_from(&[
            ("TOP_K_RETRIEVAL", "8"),
            ("CONFIDENCE_THRESHOLD", "0.6"),
            ("EXTRACTION_CONFIDENCE_THRESHOLD", "0.3"),
            ("LOG_FORMAT", "JSON"),
            ("VECTOR_STORE_PATH", "/tmp/index"),
        ])
        .unwrap();
        assert_eq!(s.top_k, 8);
        assert_eq!(s.confidence_threshold, 0.6);
        assert_eq!(s.extraction_confidence_threshold, 0.3);
        assert_eq!(s.log_format, LogFormat::Json);
        assert_eq!(s.vector_store_path, PathBuf::from("/tmp/index"));
    }

    #[test]
    fn test_unparseable_value() {
        let err = settings_from(&[("CHUNK_SIZE", "large")]).unwrap_err();
        assert_eq!(err, ConfigError::Invalid { key: "CHUNK_SIZE", value: "large".to_string() });
    }

    #[test]
    fn test_out_of_range_values() {
        assert!(settings_from(&[("CONFIDENCE_THRESHOLD", "1.5")]).is_err());
        assert!(settings_from(&[("CHUNK_OVERLAP", "600")]).is_err());
        assert!(settings_from(&[("TOP_K_RETRIEVAL", "0")]).is_err());
        assert!(settings_from(&[("MAX_ITERATIONS", "0")]).is_err());
    }
}
