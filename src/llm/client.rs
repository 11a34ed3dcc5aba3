use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use crate::config::LlmConfig;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_CLAUDE_MODEL: &str = "claude-3-5-sonnet-20241022";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
const MAX_LOG_ENTRIES: usize = 1000;
const MAX_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("{0} API key not configured")]
    NotConfigured(LlmProvider),
    #[error("{0} rate limit exceeded")]
    RateLimited(LlmProvider),
    #[error("{0} request timed out")]
    Timeout(LlmProvider),
    #[error("{provider} API error: {message}")]
    Api { provider: LlmProvider, message: String },
    #[error("all providers failed. Primary: {primary}, Fallback: {fallback}")]
    AllProvidersFailed {
        primary: Box<LlmError>,
        fallback: Box<LlmError>,
    },
}

impl LlmError {
    fn is_retryable(&self) -> bool {
        matches!(self, LlmError::RateLimited(_) | LlmError::Timeout(_))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Claude,
    #[serde(rename = "openai")]
    OpenAi,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::Claude => "claude",
            LlmProvider::OpenAi => "openai",
        }
    }

    pub fn other(&self) -> LlmProvider {
        match self {
            LlmProvider::Claude => LlmProvider::OpenAi,
            LlmProvider::OpenAi => LlmProvider::Claude,
        }
    }
}

impl FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "claude" | "anthropic" => Ok(LlmProvider::Claude),
            "openai" => Ok(LlmProvider::OpenAi),
            other => Err(format!("Unknown LLM provider: {}", other)),
        }
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One prompt-in, text-out generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    /// Falls back to the client's configured value when unset.
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl LlmRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        LlmRequest {
            prompt: prompt.into(),
            system_prompt: None,
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn system(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Text-generation capability.
#[allow(async_fn_in_trait)]
pub trait TextGenerator {
    async fn generate(&self, request: &LlmRequest) -> Result<String, LlmError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestLogEntry {
    pub request_id: u64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub provider: LlmProvider,
    pub model: String,
    pub prompt_length: usize,
    pub response_length: usize,
    pub elapsed_secs: f64,
    pub tokens: u64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct LlmStatistics {
    pub total_requests: usize,
    pub active_requests: usize,
    pub total_elapsed_secs: f64,
    pub average_elapsed_secs: f64,
    pub total_tokens: u64,
    pub average_tokens: f64,
    pub provider_distribution: HashMap<String, usize>,
}

struct Completion {
    text: String,
    tokens: u64,
}

/// HTTP client for the Anthropic and OpenAI APIs with retry and fallback.
pub struct LlmClient {
    http: reqwest::Client,
    config: LlmConfig,
    request_count: AtomicU64,
    active_requests: AtomicUsize,
    request_log: Mutex<VecDeque<RequestLogEntry>>,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .user_agent("iac-threat-analyzer")
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Api {
                provider: config.provider,
                message: e.to_string(),
            })?;

        Ok(LlmClient {
            http,
            config,
            request_count: AtomicU64::new(0),
            active_requests: AtomicUsize::new(0),
            request_log: Mutex::new(VecDeque::new()),
        })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    fn model_for(&self, provider: LlmProvider) -> String {
        match (&self.config.model, provider) {
            (Some(model), p) if p == self.config.provider => model.clone(),
            (_, LlmProvider::Claude) => DEFAULT_CLAUDE_MODEL.to_string(),
            (_, LlmProvider::OpenAi) => DEFAULT_OPENAI_MODEL.to_string(),
        }
    }

    fn sampling(&self, request: &LlmRequest) -> (u32, f32) {
        (
            request.max_tokens.unwrap_or(self.config.max_tokens),
            request.temperature.unwrap_or(self.config.temperature),
        )
    }

    fn api_key(&self, provider: LlmProvider) -> Result<&str, LlmError> {
        let key = match provider {
            LlmProvider::Claude => self.config.anthropic_api_key.as_deref(),
            LlmProvider::OpenAi => self.config.openai_api_key.as_deref(),
        };
        key.ok_or(LlmError::NotConfigured(provider))
    }

    /// Call one provider, retrying rate limits and timeouts with exponential backoff.
    pub async fn call_provider(&self, provider: LlmProvider, request: &LlmRequest) -> Result<String, LlmError> {
        let attempts = self.config.max_retries.max(1);
        let mut delay = Duration::from_millis(self.config.retry_base_delay_ms);
        let mut attempt = 1;

        loop {
            match self.call_once(provider, request).await {
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!("{} (attempt {}/{}), retrying in {:?}", e, attempt, attempts, delay);
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(MAX_BACKOFF);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn call_once(&self, provider: LlmProvider, request: &LlmRequest) -> Result<String, LlmError> {
        let api_key = self.api_key(provider)?;
        let model = self.model_for(provider);
        let started = Instant::now();
        let request_id = self.request_count.fetch_add(1, Ordering::SeqCst) + 1;

        info!("Calling {} API (model: {})", provider, model);
        self.active_requests.fetch_add(1, Ordering::SeqCst);
        let result = match provider {
            LlmProvider::Claude => self.send_claude(api_key, &model, request).await,
            LlmProvider::OpenAi => self.send_openai(api_key, &model, request).await,
        };
        self.active_requests.fetch_sub(1, Ordering::SeqCst);

        let completion = result?;
        let elapsed = started.elapsed().as_secs_f64();
        info!("{} API call completed in {:.2}s", provider, elapsed);

        self.log_request(RequestLogEntry {
            request_id,
            timestamp: chrono::Utc::now(),
            provider,
            model,
            prompt_length: request.prompt.len(),
            response_length: completion.text.len(),
            elapsed_secs: elapsed,
            tokens: completion.tokens,
        });
        Ok(completion.text)
    }

    async fn send_claude(&self, api_key: &str, model: &str, request: &LlmRequest) -> Result<Completion, LlmError> {
        let provider = LlmProvider::Claude;
        let (max_tokens, temperature) = self.sampling(request);
        let mut body = json!({
            "model": model,
            "max_tokens": max_tokens,
            "temperature": temperature,
            "messages": [{"role": "user", "content": request.prompt}],
        });
        if let Some(system) = &request.system_prompt {
            body["system"] = json!(system);
        }

        let url = format!("{}/v1/messages", self.config.anthropic_base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(provider, e))?;
        let payload = read_payload(provider, response).await?;

        let text = payload["content"]
            .as_array()
            .and_then(|blocks| blocks.iter().find_map(|b| b["text"].as_str()))
            .ok_or_else(|| LlmError::Api {
                provider,
                message: "response has no text content".to_string(),
            })?;
        let tokens = payload["usage"]["input_tokens"].as_u64().unwrap_or(0)
            + payload["usage"]["output_tokens"].as_u64().unwrap_or(0);

        Ok(Completion { text: text.to_string(), tokens })
    }

    async fn send_openai(&self, api_key: &str, model: &str, request: &LlmRequest) -> Result<Completion, LlmError> {
        let provider = LlmProvider::OpenAi;
        let (max_tokens, temperature) = self.sampling(request);
        let mut messages = Vec::new();
        if let Some(system) = &request.system_prompt {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));

        let url = format!("{}/v1/chat/completions", self.config.openai_base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(url)
            .bearer_auth(api_key)
            .json(&json!({
                "model": model,
                "messages": messages,
                "max_tokens": max_tokens,
                "temperature": temperature,
            }))
            .send()
            .await
            .map_err(|e| transport_error(provider, e))?;
        let payload = read_payload(provider, response).await?;

        let text = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| LlmError::Api {
                provider,
                message: "response has no message content".to_string(),
            })?;
        let tokens = payload["usage"]["total_tokens"].as_u64().unwrap_or(0);

        Ok(Completion { text: text.to_string(), tokens })
    }

    fn log_request(&self, entry: RequestLogEntry) {
        let mut log = self.request_log.lock().unwrap_or_else(|p| p.into_inner());
        log.push_back(entry);
        while log.len() > MAX_LOG_ENTRIES {
            log.pop_front();
        }
    }

    pub fn request_log(&self) -> Vec<RequestLogEntry> {
        self.request_log
            .lock()
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn statistics(&self) -> LlmStatistics {
        let entries = self.request_log();
        let mut stats = LlmStatistics {
            total_requests: entries.len(),
            active_requests: self.active_requests.load(Ordering::SeqCst),
            ..Default::default()
        };
        if entries.is_empty() {
            return stats;
        }

        for entry in &entries {
            stats.total_elapsed_secs += entry.elapsed_secs;
            stats.total_tokens += entry.tokens;
            *stats
                .provider_distribution
                .entry(entry.provider.as_str().to_string())
                .or_insert(0) += 1;
        }
        stats.average_elapsed_secs = stats.total_elapsed_secs / entries.len() as f64;
        stats.average_tokens = stats.total_tokens as f64 / entries.len() as f64;
        stats
    }
}

impl TextGenerator for LlmClient {
    /// Try the configured provider, then the other one when fallback is on.
    async fn generate(&self, request: &LlmRequest) -> Result<String, LlmError> {
        let primary = self.config.provider;
        let primary_error = match self.call_provider(primary, request).await {
            Ok(text) => return Ok(text),
            Err(e) => e,
        };

        warn!("Primary provider {} failed: {}", primary, primary_error);
        if !self.config.enable_fallback {
            return Err(primary_error);
        }

        let fallback = primary.other();
        info!("Falling back to {}", fallback);
        self.call_provider(fallback, request).await.map_err(|fallback_error| {
            error!("Fallback provider also failed: {}", fallback_error);
            LlmError::AllProvidersFailed {
                primary: Box::new(primary_error),
                fallback: Box::new(fallback_error),
            }
        })
    }
}

fn transport_error(provider: LlmProvider, e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout(provider)
    } else {
        LlmError::Api {
            provider,
            message: e.to_string(),
        }
    }
}

async fn read_payload(provider: LlmProvider, response: reqwest::Response) -> Result<Value, LlmError> {
    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(LlmError::RateLimited(provider));
    }
    if status == reqwest::StatusCode::REQUEST_TIMEOUT || status == reqwest::StatusCode::GATEWAY_TIMEOUT {
        return Err(LlmError::Timeout(provider));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(LlmError::Api {
            provider,
            message: format!("status {}: {}", status, body),
        });
    }
    response.json::<Value>().await.map_err(|e| LlmError::Api {
        provider,
        message: e.to_string(),
    })
}
