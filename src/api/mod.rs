use actix_web::{web, HttpResponse, Responder};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use crate::config::Config;
use crate::dfd::DfdGenerator;
use crate::llm::{LlmClient, ResponseCache, ThreatNarrator};
use crate::threatdb::{ThreatDatabase, ThreatMatcher};

pub mod analysis;
pub mod cache;
pub mod server;
pub mod threats;

pub struct ApiState {
    pub threat_db: Arc<ThreatDatabase>,
    pub matcher: ThreatMatcher,
    pub dfd_generator: DfdGenerator,
    pub cache: Arc<ResponseCache>,
    /// Present only when an LLM provider key is configured.
    pub narrator: Option<ThreatNarrator<LlmClient>>,
    pub filter_by_resource_type: bool,
}

impl ApiState {
    pub fn new(config: &Config, threat_db: ThreatDatabase) -> Self {
        let cache = Arc::new(ResponseCache::new(
            config.cache.max_size,
            Duration::from_secs(config.cache.ttl_secs),
        ));

        let narrator = if config.llm.is_configured() {
            match LlmClient::new(config.llm.clone()) {
                Ok(client) => Some(ThreatNarrator::new(client).with_cache(cache.clone())),
                Err(e) => {
                    warn!("LLM client could not be created: {}", e);
                    None
                }
            }
        } else {
            info!("No LLM API key configured, narrative endpoints disabled");
            None
        };

        ApiState {
            threat_db: Arc::new(threat_db),
            matcher: ThreatMatcher::new(),
            dfd_generator: DfdGenerator::new(),
            cache,
            narrator,
            filter_by_resource_type: config.threat_db.filter_by_resource_type,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl ToString) -> Self {
        ErrorResponse { error: error.to_string() }
    }
}

// Health check endpoint
pub async fn health(state: web::Data<ApiState>) -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": "iac-threat-analyzer",
        "version": env!("CARGO_PKG_VERSION"),
        "threats_loaded": state.threat_db.len(),
        "llm_enabled": state.narrator.is_some(),
    }))
}
