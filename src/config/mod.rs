use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use crate::llm::LlmProvider;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub threat_db: ThreatDbConfig,
    pub llm: LlmConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatDbConfig {
    pub path: String,
    pub filter_by_resource_type: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    /// Overrides the primary provider's default model.
    pub model: Option<String>,
    #[serde(skip_serializing)]
    pub anthropic_api_key: Option<String>,
    #[serde(skip_serializing)]
    pub openai_api_key: Option<String>,
    pub anthropic_base_url: String,
    pub openai_base_url: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub enable_fallback: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub max_size: usize,
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub log_level: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        LlmConfig {
            provider: LlmProvider::Claude,
            model: None,
            anthropic_api_key: None,
            openai_api_key: None,
            anthropic_base_url: "https://api.anthropic.com".to_string(),
            openai_base_url: "https://api.openai.com".to_string(),
            max_tokens: 2048,
            temperature: 0.7,
            timeout_secs: 60,
            max_retries: 3,
            retry_base_delay_ms: 2000,
            enable_fallback: true,
        }
    }
}

impl LlmConfig {
    pub fn is_configured(&self) -> bool {
        self.anthropic_api_key.is_some() || self.openai_api_key.is_some()
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn parse_bool_or(value: Option<String>, default: bool) -> bool {
    match value.as_deref().map(|v| v.trim().to_lowercase()) {
        Some(v) if ["true", "1", "yes"].contains(&v.as_str()) => true,
        Some(v) if ["false", "0", "no"].contains(&v.as_str()) => false,
        _ => default,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        // Load .env.local first (local overrides), then .env
        dotenv::from_filename(".env.local").ok();
        dotenv::dotenv().ok();

        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build a configuration from any key lookup. Unparsable numbers fall
    /// back to their defaults.
    pub fn from_vars<F>(var: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = LlmConfig::default();
        let provider = match non_empty(var("LLM_PROVIDER")) {
            Some(name) => name.parse::<LlmProvider>().map_err(anyhow::Error::msg)?,
            None => defaults.provider,
        };

        Ok(Config {
            server: ServerConfig {
                host: var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: parse_or(var("PORT"), 3002),
                environment: var("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
            },
            threat_db: ThreatDbConfig {
                path: var("THREAT_DB_PATH").unwrap_or_else(|| "./threatdb".to_string()),
                filter_by_resource_type: parse_bool_or(var("FILTER_BY_RESOURCE_TYPE"), true),
            },
            llm: LlmConfig {
                provider,
                model: non_empty(var("LLM_MODEL")),
                anthropic_api_key: non_empty(var("ANTHROPIC_API_KEY")),
                openai_api_key: non_empty(var("OPENAI_API_KEY")),
                anthropic_base_url: non_empty(var("ANTHROPIC_BASE_URL")).unwrap_or(defaults.anthropic_base_url),
                openai_base_url: non_empty(var("OPENAI_BASE_URL")).unwrap_or(defaults.openai_base_url),
                max_tokens: parse_or(var("MAX_TOKENS"), defaults.max_tokens),
                temperature: parse_or(var("TEMPERATURE"), defaults.temperature),
                timeout_secs: parse_or(var("LLM_TIMEOUT_SECS"), defaults.timeout_secs),
                max_retries: parse_or(var("LLM_MAX_RETRIES"), defaults.max_retries),
                retry_base_delay_ms: parse_or(var("LLM_RETRY_BASE_MS"), defaults.retry_base_delay_ms),
                enable_fallback: parse_bool_or(var("LLM_ENABLE_FALLBACK"), defaults.enable_fallback),
            },
            cache: CacheConfig {
                max_size: parse_or(var("CACHE_MAX_SIZE"), 1000),
                ttl_secs: parse_or(var("CACHE_TTL_SECS"), 3600),
            },
            logging: LoggingConfig {
                log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.server.port, 3002);
        assert_eq!(config.threat_db.path, "./threatdb");
        assert!(config.threat_db.filter_by_resource_type);
        assert_eq!(config.llm.provider, LlmProvider::Claude);
        assert!(!config.llm.is_configured());
        assert_eq!(config.cache.max_size, 1000);
        assert_eq!(config.logging.log_level, "info");
    }

    #[test]
    fn test_overrides_and_bad_numbers() {
        let config = config_from(&[
            ("PORT", "not-a-port"),
            ("LLM_PROVIDER", "OpenAI"),
            ("OPENAI_API_KEY", "sk-test"),
            ("FILTER_BY_RESOURCE_TYPE", "false"),
            ("CACHE_TTL_SECS", "60"),
        ])
        .unwrap();
        assert_eq!(config.server.port, 3002);
        assert_eq!(config.llm.provider, LlmProvider::OpenAi);
        assert!(config.llm.is_configured());
        assert!(!config.threat_db.filter_by_resource_type);
        assert_eq!(config.cache.ttl_secs, 60);
    }

    #[test]
    fn test_unknown_provider_is_an_error() {
        assert!(config_from(&[("LLM_PROVIDER", "bard")]).is_err());
    }
}
