use actix_web::{web, HttpResponse, Responder};
use log::info;
use crate::api::ApiState;
use crate::llm::ResponseStore;

pub async fn get_cache_statistics(state: web::Data<ApiState>) -> impl Responder {
    let llm = state.narrator.as_ref().map(|n| n.generator().statistics());
    HttpResponse::Ok().json(serde_json::json!({
        "cache": state.cache.statistics(),
        "llm": llm,
    }))
}

pub async fn clear_cache(state: web::Data<ApiState>) -> impl Responder {
    let removed = state.cache.len();
    state.cache.clear();
    info!("Cleared {} cached responses", removed);
    HttpResponse::Ok().json(serde_json::json!({
        "cleared": removed,
    }))
}
