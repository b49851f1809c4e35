//! Configuration management for evoprompt
//!
//! Handles API keys, model selection and call resilience settings.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::retry_provider::RetryConfig;

/// Error types for configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// API key (env: OPENAI_API_KEY)
    pub api_key: Option<String>,
    /// Endpoint (env: EVOPROMPT_BASE_URL)
    pub base_url: String,
    /// Model producing content (env: EVOPROMPT_GENERATOR_MODEL)
    pub generator_model: String,
    /// Model scoring content (env: EVOPROMPT_EVALUATOR_MODEL)
    pub evaluator_model: String,
    /// Model rewriting prompts (env: EVOPROMPT_OPTIMIZER_MODEL)
    pub optimizer_model: String,
    /// Per-attempt timeout in seconds (env: EVOPROMPT_TIMEOUT_SECS)
    pub timeout_secs: u64,
    /// Retries after the first attempt (env: EVOPROMPT_RETRIES)
    pub retries: u32,
    /// Initial backoff delay in milliseconds (env: EVOPROMPT_RETRY_DELAY_MS)
    pub retry_delay_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            generator_model: DEFAULT_MODEL.to_string(),
            evaluator_model: DEFAULT_MODEL.to_string(),
            optimizer_model: DEFAULT_MODEL.to_string(),
            timeout_secs: 60,
            retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl LlmConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Ok(Self {
            api_key: lookup("OPENAI_API_KEY").filter(|k| !k.trim().is_empty()),
            base_url: lookup("EVOPROMPT_BASE_URL").unwrap_or(defaults.base_url),
            generator_model: lookup("EVOPROMPT_GENERATOR_MODEL")
                .unwrap_or(defaults.generator_model),
            evaluator_model: lookup("EVOPROMPT_EVALUATOR_MODEL")
                .unwrap_or(defaults.evaluator_model),
            optimizer_model: lookup("EVOPROMPT_OPTIMIZER_MODEL")
                .unwrap_or(defaults.optimizer_model),
            timeout_secs: parse_number(&lookup, "EVOPROMPT_TIMEOUT_SECS", defaults.timeout_secs)?,
            retries: parse_number(&lookup, "EVOPROMPT_RETRIES", defaults.retries)?,
            retry_delay_ms: parse_number(
                &lookup,
                "EVOPROMPT_RETRY_DELAY_MS",
                defaults.retry_delay_ms,
            )?,
        })
    }

    /// Check if a remote provider can be built
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// The API key, or an error naming the variable to set
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| ConfigError::MissingEnvVar("OPENAI_API_KEY".to_string()))
    }

    /// Retry policy derived from this configuration
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            timeout: Duration::from_secs(self.timeout_secs),
            max_retries: self.retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            ..RetryConfig::default()
        }
    }
}

fn parse_number<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("{} must be a number, got '{}'", key, raw))),
        None => Ok(default),
    }
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
    fn test_default_config() {
        let config = LlmConfig::from_lookup(lookup(&[])).unwrap();
        assert!(!config.is_configured());
        assert_eq!(config.base_url, "https://api.openai.com");
        assert_eq!(config.retries, 3);
        assert!(config.require_api_key().is_err());
    }

    #[test]
    fn test_overrides() {
        let config = LlmConfig::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("EVOPROMPT_EVALUATOR_MODEL", "judge-model"),
            ("EVOPROMPT_RETRIES", "5"),
            ("EVOPROMPT_RETRY_DELAY_MS", "250"),
        ]))
        .unwrap();

        assert_eq!(config.require_api_key().unwrap(), "sk-test");
        assert_eq!(config.evaluator_model, "judge-model");

        let retry = config.retry_config();
        assert_eq!(retry.max_retries, 5);
        assert_eq!(retry.retry_delay, Duration::from_millis(250));
        assert_eq!(retry.backoff_factor, 1.5);
    }

    #[test]
    fn test_malformed_number_is_rejected() {
        let err = LlmConfig::from_lookup(lookup(&[("EVOPROMPT_TIMEOUT_SECS", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("EVOPROMPT_TIMEOUT_SECS")));
    }
}
