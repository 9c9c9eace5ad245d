//! Configuration management for the GloriaMundo model service.
//!
//! Configuration can be set via environment variables:
//! - `OPENROUTER_API_KEY` - Required. Your OpenRouter API key.
//! - `OPENROUTER_BASE_URL` - Optional. Defaults to `https://openrouter.ai/api/v1`.
//! - `DATABASE_PATH` - Optional. SQLite database file. Defaults to `gloriamundo.db`.
//! - `PRICE_MARKUP` - Optional. Multiplier applied to upstream prices. Defaults to `2.0`.
//! - `MODEL_SYNC_ENABLED` - Optional. Run the background updater. Defaults to `true`.
//! - `MODEL_SYNC_INTERVAL_SECS` - Optional. Updater poll interval. Defaults to `3600`.
//! - `MODEL_CACHE_TTL_SECS` - Optional. In-memory catalog TTL. Defaults to `3600`.
//! - `DEFAULT_MODEL` - Optional. Model used when a request names none.
//! - `FALLBACK_MODELS` - Optional. Comma-separated fallback chain.
//! - `ELO_THRESHOLD` - Optional. Minimum arena name match score used by `elo-import`.
//!   Defaults to `0.85`.
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `3000`.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::elo::DEFAULT_MATCH_THRESHOLD;
use crate::util::env_var_bool;

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "google/gemini-2.0-flash-001";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Background sync configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Whether the auto-updater runs at all
    pub enabled: bool,

    /// Delay between catalog checks
    pub interval: Duration,

    /// How long the in-memory catalog is served before reloading from the database
    pub cache_ttl: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(3600),
            cache_ttl: Duration::from_secs(3600),
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// OpenRouter API key
    pub api_key: String,

    /// OpenRouter API base URL (no trailing slash)
    pub base_url: String,

    /// SQLite database path
    pub database_path: PathBuf,

    /// Multiplier applied to upstream per-token prices
    pub price_markup: f64,

    /// Model used when a request does not name one
    pub default_model: String,

    /// Ordered fallback chain tried before ranking-based fallback
    pub fallback_models: Vec<String>,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    pub sync: SyncConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `OPENROUTER_API_KEY` is not set,
    /// and `ConfigError::InvalidValue` for malformed numbers or URLs.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("OPENROUTER_API_KEY".to_string()))?;

        let base_url = std::env::var("OPENROUTER_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let base_url = validate_base_url(&base_url)?;

        let database_path = std::env::var("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("gloriamundo.db"));

        let price_markup: f64 = parse_env("PRICE_MARKUP", "2.0")?;
        if !price_markup.is_finite() || price_markup < 1.0 {
            return Err(ConfigError::InvalidValue(
                "PRICE_MARKUP".to_string(),
                format!("{} (must be >= 1.0)", price_markup),
            ));
        }

        let default_model =
            std::env::var("DEFAULT_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        let fallback_models = std::env::var("FALLBACK_MODELS")
            .map(|raw| parse_model_list(&raw))
            .unwrap_or_else(|_| default_fallback_models());


        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = parse_env("PORT", "3000")?;

        let interval_secs: u64 = parse_env("MODEL_SYNC_INTERVAL_SECS", "3600")?;
        if interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "MODEL_SYNC_INTERVAL_SECS".to_string(),
                "0".to_string(),
            ));
        }
        let cache_ttl_secs: u64 = parse_env("MODEL_CACHE_TTL_SECS", "3600")?;

        let sync = SyncConfig {
            enabled: env_var_bool("MODEL_SYNC_ENABLED", true),
            interval: Duration::from_secs(interval_secs),
            cache_ttl: Duration::from_secs(cache_ttl_secs),
        };

        Ok(Self {
            api_key,
            base_url,
            database_path,
            price_markup,
            default_model,
            fallback_models,
            host,
            port,
            sync,
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(api_key: String, base_url: String, database_path: PathBuf) -> Self {
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            database_path,
            price_markup: 2.0,
            default_model: DEFAULT_MODEL.to_string(),
            fallback_models: default_fallback_models(),
            host: "127.0.0.1".to_string(),
            port: 3000,
            sync: SyncConfig::default(),
        }
    }
}

fn parse_env<T>(name: &str, default: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue(name.to_string(), e.to_string()))
}

/// Read `ELO_THRESHOLD`, falling back to the matcher default.
pub fn elo_threshold_from_env() -> Result<f64, ConfigError> {
    match std::env::var("ELO_THRESHOLD") {
        Ok(raw) => parse_elo_threshold(&raw),
        Err(_) => Ok(DEFAULT_MATCH_THRESHOLD),
    }
}

/// Parse a match threshold, which must lie within `0.0..=1.0`.
pub fn parse_elo_threshold(raw: &str) -> Result<f64, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidValue("ELO_THRESHOLD".to_string(), reason);
    let threshold: f64 = raw.trim().parse().map_err(|e| invalid(format!("{}", e)))?;
    if !(0.0..=1.0).contains(&threshold) {
        return Err(invalid(format!("{} (must be within 0.0..=1.0)", threshold)));
    }
    Ok(threshold)
}

fn validate_base_url(raw: &str) -> Result<String, ConfigError> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| ConfigError::InvalidValue("OPENROUTER_BASE_URL".to_string(), e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidValue(
            "OPENROUTER_BASE_URL".to_string(),
            format!("unsupported scheme '{}'", parsed.scheme()),
        ));
    }
    Ok(raw.trim_end_matches('/').to_string())
}

/// Split a comma-separated model list, dropping blanks and duplicates.
pub fn parse_model_list(raw: &str) -> Vec<String> {
    crate::util::dedup_trimmed(raw.split(',').map(str::to_string).collect())
}

fn default_fallback_models() -> Vec<String> {
    vec![
        "google/gemini-2.0-flash-001".to_string(),
        "openai/gpt-4o-mini".to_string(),
        "meta-llama/llama-3.3-70b-instruct:free".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_model_list() {
        assert_eq!(
            parse_model_list(" openai/gpt-4o , ,anthropic/claude-3.5-haiku,openai/gpt-4o"),
            vec!["openai/gpt-4o", "anthropic/claude-3.5-haiku"]
        );
        assert!(parse_model_list("").is_empty());
    }

    #[test]
    fn test_validate_base_url() {
        assert_eq!(
            validate_base_url("https://openrouter.ai/api/v1/").unwrap(),
            "https://openrouter.ai/api/v1"
        );
        assert!(validate_base_url("ftp://example.com").is_err());
        assert!(validate_base_url("not a url").is_err());
    }

    #[test]
    fn test_parse_elo_threshold() {
        assert_eq!(parse_elo_threshold(" 0.9 ").unwrap(), 0.9);
        assert_eq!(parse_elo_threshold("1").unwrap(), 1.0);
        assert!(matches!(
            parse_elo_threshold("1.5"),
            Err(ConfigError::InvalidValue(name, _)) if name == "ELO_THRESHOLD"
        ));
        assert!(parse_elo_threshold("-0.1").is_err());
        assert!(parse_elo_threshold("high").is_err());
        assert!(parse_elo_threshold("NaN").is_err());
    }

    #[test]
    fn test_new_trims_base_url() {
        let config = Config::new(
            "key".to_string(),
            "http://localhost:8080/api/v1/".to_string(),
            PathBuf::from("test.db"),
        );
        assert_eq!(config.base_url, "http://localhost:8080/api/v1");
        assert_eq!(config.price_markup, 2.0);
        assert!(config.sync.enabled);
    }
}
