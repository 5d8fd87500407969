//! Startup configuration.
//!
//! Values come from the process environment, which `main` seeds from a local
//! `.env` file through `dotenv`. Everything is read and validated once, then
//! handed to the message source and the classifier as an explicit `Config`.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

const DEFAULT_SESSION_FILE: &str = "paper_finder.session";
const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";
const DEFAULT_OLLAMA_MODEL: &str = "mistral-small:latest";
const DEFAULT_TIMEOUT_SECS: u64 = 20;
const DEFAULT_CONCURRENCY: usize = 4;
const MAX_CONCURRENCY: usize = 16;

/// Which classification service answers magazine relevance questions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiBackend {
    Gemini,
    Ollama,
}

impl AiBackend {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_lowercase().as_str() {
            "gemini" | "google" => Ok(AiBackend::Gemini),
            "ollama" => Ok(AiBackend::Ollama),
            other => Err(ConfigError::Invalid {
                name: "AI_BACKEND",
                reason: format!("unknown backend '{}', expected gemini or ollama", other),
            }),
        }
    }

    fn default_model(self) -> &'static str {
        match self {
            AiBackend::Gemini => DEFAULT_GEMINI_MODEL,
            AiBackend::Ollama => DEFAULT_OLLAMA_MODEL,
        }
    }
}

/// What to do with a message whose classification failed or timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Treat the message as not matching and keep going.
    #[default]
    Exclude,
    /// Report the message anyway and keep going.
    Include,
}

impl FailurePolicy {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_lowercase().as_str() {
            "exclude" | "open" => Ok(FailurePolicy::Exclude),
            "include" => Ok(FailurePolicy::Include),
            other => Err(ConfigError::Invalid {
                name: "AI_FAILURE_POLICY",
                reason: format!("unknown policy '{}', expected exclude or include", other),
            }),
        }
    }

    pub fn on_failure(self) -> bool {
        matches!(self, FailurePolicy::Include)
    }
}

/// Telegram API credentials and session location.
#[derive(Clone)]
pub struct TelegramConfig {
    pub api_id: i32,
    pub api_hash: String,
    pub session_file: PathBuf,
}

impl fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("api_id", &self.api_id)
            .field("api_hash", &"<redacted>")
            .field("session_file", &self.session_file)
            .finish()
    }
}

/// Classification backend settings.
#[derive(Clone)]
pub struct AiConfig {
    pub backend: AiBackend,
    pub api_key: Option<String>,
    pub model: String,
    /// Base URL override, mostly for pointing at a local mock.
    pub endpoint: Option<String>,
    pub timeout: Duration,
    pub concurrency: usize,
    pub failure_policy: FailurePolicy,
}

impl fmt::Debug for AiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AiConfig")
            .field("backend", &self.backend)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .field("concurrency", &self.concurrency)
            .field("failure_policy", &self.failure_policy)
            .finish()
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            backend: AiBackend::Gemini,
            api_key: None,
            model: DEFAULT_GEMINI_MODEL.to_string(),
            endpoint: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            concurrency: DEFAULT_CONCURRENCY,
            failure_policy: FailurePolicy::Exclude,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub ai: AiConfig,
}

impl Config {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup. Blank values count as missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_id = get("TG_API_ID")
            .ok_or(ConfigError::Missing("TG_API_ID"))?
            .trim()
            .parse::<i32>()
            .map_err(|e| ConfigError::Invalid {
                name: "TG_API_ID",
                reason: e.to_string(),
            })?;
        let api_hash = get("TG_API_HASH").ok_or(ConfigError::Missing("TG_API_HASH"))?;
        let session_file = get("TG_SESSION_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SESSION_FILE));

        let backend = match get("AI_BACKEND") {
            Some(value) => AiBackend::parse(&value)?,
            None => AiBackend::Gemini,
        };
        let api_key = get("GOOGLE_API_KEY");
        if backend == AiBackend::Gemini && api_key.is_none() {
            return Err(ConfigError::Missing("GOOGLE_API_KEY"));
        }
        let model = get("AI_MODEL").unwrap_or_else(|| backend.default_model().to_string());

        let timeout_secs = match get("AI_TIMEOUT_SECS") {
            Some(value) => parse_number::<u64>("AI_TIMEOUT_SECS", &value)?,
            None => DEFAULT_TIMEOUT_SECS,
        };
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "AI_TIMEOUT_SECS",
                reason: "must be greater than zero".to_string(),
            });
        }

        let concurrency = match get("AI_CONCURRENCY") {
            Some(value) => parse_number::<usize>("AI_CONCURRENCY", &value)?,
            None => DEFAULT_CONCURRENCY,
        };
        if concurrency == 0 || concurrency > MAX_CONCURRENCY {
            return Err(ConfigError::Invalid {
                name: "AI_CONCURRENCY",
                reason: format!("must be between 1 and {}", MAX_CONCURRENCY),
            });
        }

        let failure_policy = match get("AI_FAILURE_POLICY") {
            Some(value) => FailurePolicy::parse(&value)?,
            None => FailurePolicy::default(),
        };

        Ok(Config {
            telegram: TelegramConfig {
                api_id,
                api_hash,
                session_file,
            },
            ai: AiConfig {
                backend,
                api_key,
                model,
                endpoint: get("AI_ENDPOINT"),
                timeout: std::time::Duration::from_secs(timeout_secs),
                concurrency,
                failure_policy,
            },
        })
    }
}

fn parse_number<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        name,
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

    const BASE: &[(&str, &str)] = &[
        ("TG_API_ID", "12345"),
        ("TG_API_HASH", "abcdef"),
        ("GOOGLE_API_KEY", "key"),
    ];

    fn with(extra: &[(&'static str, &'static str)]) -> Vec<(&'static str, &'static str)> {
        let mut pairs = BASE.to_vec();
        pairs.extend_from_slice(extra);
        pairs
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(BASE)).unwrap();
        assert_eq!(config.telegram.api_id, 12345);
        assert_eq!(config.telegram.session_file, PathBuf::from(DEFAULT_SESSION_FILE));
        assert_eq!(config.ai.backend, AiBackend::Gemini);
        assert_eq!(config.ai.model, DEFAULT_GEMINI_MODEL);
        assert_eq!(config.ai.timeout, Duration::from_secs(20));
        assert_eq!(config.ai.concurrency, 4);
        assert_eq!(config.ai.failure_policy, FailurePolicy::Exclude);
    }

    #[test]
    fn test_missing_api_id() {
        let err = Config::from_lookup(lookup(&[("TG_API_HASH", "x"), ("GOOGLE_API_KEY", "k")]))
            .unwrap_err();
        assert_eq!(err, ConfigError::Missing("TG_API_ID"));
    }

    #[test]
    fn test_blank_value_counts_as_missing() {
        let err = Config::from_lookup(lookup(&[
            ("TG_API_ID", "1"),
            ("TG_API_HASH", "   "),
            ("GOOGLE_API_KEY", "k"),
        ]))
        .unwrap_err();
        assert_eq!(err, ConfigError::Missing("TG_API_HASH"));
    }

    #[test]
    fn test_non_numeric_api_id() {
        let err = Config::from_lookup(lookup(&[
            ("TG_API_ID", "abc"),
            ("TG_API_HASH", "x"),
            ("GOOGLE_API_KEY", "k"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "TG_API_ID", .. }));
    }

    #[test]
    fn test_gemini_requires_key() {
        let err = Config::from_lookup(lookup(&[("TG_API_ID", "1"), ("TG_API_HASH", "x")]))
            .unwrap_err();
        assert_eq!(err, ConfigError::Missing("GOOGLE_API_KEY"));
    }

    #[test]
    fn test_ollama_does_not_require_key() {
        let config = Config::from_lookup(lookup(&[
            ("TG_API_ID", "1"),
            ("TG_API_HASH", "x"),
            ("AI_BACKEND", "ollama"),
        ]))
        .unwrap();
        assert_eq!(config.ai.backend, AiBackend::Ollama);
        assert_eq!(config.ai.model, DEFAULT_OLLAMA_MODEL);
        assert!(config.ai.api_key.is_none());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = Config::from_lookup(lookup(&with(&[("AI_TIMEOUT_SECS", "0")]))).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "AI_TIMEOUT_SECS", .. }));
    }

    #[test]
    fn test_concurrency_bounds() {
        let err = Config::from_lookup(lookup(&with(&[("AI_CONCURRENCY", "0")]))).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "AI_CONCURRENCY", .. }));
        let err = Config::from_lookup(lookup(&with(&[("AI_CONCURRENCY", "64")]))).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "AI_CONCURRENCY", .. }));
        let config = Config::from_lookup(lookup(&with(&[("AI_CONCURRENCY", "8")]))).unwrap();
        assert_eq!(config.ai.concurrency, 8);
    }

    #[test]
    fn test_failure_policy_parsing() {
        let config =
            Config::from_lookup(lookup(&with(&[("AI_FAILURE_POLICY", "Include")]))).unwrap();
        assert_eq!(config.ai.failure_policy, FailurePolicy::Include);
        assert!(config.ai.failure_policy.on_failure());

        let err =
            Config::from_lookup(lookup(&with(&[("AI_FAILURE_POLICY", "retry")]))).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "AI_FAILURE_POLICY", .. }));
    }

    #[test]
    fn test_unknown_backend() {
        let err = Config::from_lookup(lookup(&with(&[("AI_BACKEND", "openai")]))).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "AI_BACKEND", .. }));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = Config::from_lookup(lookup(&[
            ("TG_API_ID", "1"),
            ("TG_API_HASH", "super-secret-hash"),
            ("GOOGLE_API_KEY", "super-secret-key"),
        ]))
        .unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("super-secret-hash"));
        assert!(!rendered.contains("super-secret-key"));
        assert!(rendered.contains("<redacted>"));
    }
}
