//! Environment-driven configuration.

use std::env;

use crate::error::{ChaperoneError, Result};

/// Settings for the semantic classifier backend.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub requests_per_minute: u32,
}

/// Top-level service configuration.
#[derive(Debug, Clone)]
pub struct ChaperoneConfig {
    /// Absent when no API key is configured; the service then runs with
    /// pattern filtering only.
    pub classifier: Option<ClassifierConfig>,
    pub port: u16,
    pub database_path: String,
}

impl ChaperoneConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let classifier = match env::var("OPENAI_API_KEY") {
            Ok(key) if !key.trim().is_empty() => Some(ClassifierConfig {
                api_key: key,
                base_url: env_or("OPENAI_BASE_URL", "https://api.openai.com/v1"),
                model: env_or("MODERATION_MODEL", "gpt-5-mini"),
                timeout_secs: parse_env("CLASSIFIER_TIMEOUT_SECS", 10)?,
                requests_per_minute: parse_env("CLASSIFIER_RPM", 60)?,
            }),
            _ => None,
        };

        Ok(Self {
            classifier,
            port: parse_env("PORT", 5000)?,
            database_path: env_or("DATABASE_PATH", "chaperone.db"),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(value) => value
            .parse()
            .map_err(|_| ChaperoneError::Config(format!("invalid value for {}: {}", key, value))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_env_falls_back_to_default() {
        let port: u16 = parse_env("CHAPERONE_TEST_UNSET_PORT", 5000).expect("should parse");
        assert_eq!(port, 5000);
    }

    #[test]
    fn parse_env_rejects_garbage() {
        env::set_var("CHAPERONE_TEST_BAD_PORT", "not-a-number");
        let result: Result<u16> = parse_env("CHAPERONE_TEST_BAD_PORT", 5000);
        assert!(result.is_err());
        env::remove_var("CHAPERONE_TEST_BAD_PORT");
    }
}
