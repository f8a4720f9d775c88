//! Configuration loading and representation.
//!
//! Everything comes from environment variables (main loads `.env` first). Unset values
//! fall back to defaults; values that are set but unparsable are errors.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use counsel_ai::{ModelSelection, OpenAiConfig};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} has an invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("{0} must be set when USE_PERSISTENT_STORES is enabled")]
    Missing(&'static str),
}

/// Timing knobs of the generation job lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationConfig {
    /// A `generating` job younger than this is reused instead of starting a new one.
    pub grace_period: Duration,
    /// A `generating` job whose heartbeat is older than this is reported as timed out.
    pub deadlock_threshold: Duration,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(30),
            deadlock_threshold: Duration::from_secs(180),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    pub openai: OpenAiConfig,
    pub models: ModelSelection,
    pub prompts_dir: PathBuf,
    pub generation: GenerationConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (the environment in production, a map in tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind_addr = parse_or(&get, "BIND_ADDR", "0.0.0.0:8080".parse().ok(), |v| {
            v.parse::<SocketAddr>().map_err(|e| e.to_string())
        })?;
        let use_persistent_stores = parse_or(&get, "USE_PERSISTENT_STORES", Some(false), parse_flag)?;
        let database_url = get("DATABASE_URL");
        if use_persistent_stores && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let defaults = OpenAiConfig::default();
        let openai = OpenAiConfig {
            api_key: get("OPENAI_API_KEY").unwrap_or_default(),
            base_url: get("OPENAI_BASE_URL").unwrap_or(defaults.base_url),
            timeout: Duration::from_secs(parse_or(
                &get,
                "OPENAI_TIMEOUT_SECONDS",
                Some(defaults.timeout.as_secs()),
                parse_seconds,
            )?),
        };

        let model_defaults = ModelSelection::default();
        let models = ModelSelection {
            recommendation: get("RECOMMENDATION_MODEL").unwrap_or(model_defaults.recommendation),
            link_search: get("LINK_SEARCH_MODEL").unwrap_or(model_defaults.link_search),
            format: get("FORMAT_MODEL").unwrap_or(model_defaults.format),
            profile: get("PROFILE_MODEL").unwrap_or(model_defaults.profile),
            mentor: get("MENTOR_MODEL").unwrap_or(model_defaults.mentor),
        };

        let generation_defaults = GenerationConfig::default();
        let generation = GenerationConfig {
            grace_period: Duration::from_secs(parse_or(
                &get,
                "GENERATION_GRACE_PERIOD_SECONDS",
                Some(generation_defaults.grace_period.as_secs()),
                parse_seconds,
            )?),
            deadlock_threshold: Duration::from_secs(parse_or(
                &get,
                "GENERATION_DEADLOCK_SECONDS",
                Some(generation_defaults.deadlock_threshold.as_secs()),
                parse_seconds,
            )?),
        };

        Ok(Self {
            bind_addr,
            use_persistent_stores,
            database_url,
            openai,
            models,
            prompts_dir: get("PROMPTS_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("prompts")),
            generation,
        })
    }
}

fn parse_or<T>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: Option<T>,
    parse: impl Fn(&str) -> Result<T, String>,
) -> Result<T, ConfigError> {
    match get(key) {
        Some(value) => parse(&value).map_err(|reason| ConfigError::Invalid { key, value, reason }),
        None => default.ok_or(ConfigError::Missing(key)),
    }
}

fn parse_flag(value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err("expected true or false".to_string()),
    }
}

fn parse_seconds(value: &str) -> Result<u64, String> {
    value.parse::<u64>().map_err(|e| e.to_string())
}
