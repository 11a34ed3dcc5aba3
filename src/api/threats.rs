use actix_web::{web, HttpResponse, Responder};
use serde::Deserialize;
use crate::api::{ApiState, ErrorResponse};
use crate::threatdb::{Severity, Threat};

#[derive(Debug, Default, Deserialize)]
pub struct ThreatQuery {
    pub resource_type: Option<String>,
    pub cloud_provider: Option<String>,
    pub category: Option<String>,
    pub severity: Option<String>,
}

pub async fn list_threats(
    state: web::Data<ApiState>,
    query: web::Query<ThreatQuery>,
) -> impl Responder {
    let severity = match query.severity.as_deref().map(str::parse::<Severity>) {
        Some(Err(e)) => return HttpResponse::BadRequest().json(ErrorResponse::new(e)),
        Some(Ok(severity)) => Some(severity),
        None => None,
    };

    let db = &state.threat_db;
    let mut threats: Vec<&Threat> = match query.resource_type.as_deref() {
        Some(resource_type) => db.by_resource_type(resource_type),
        None => db.threats().iter().collect(),
    };
    if let Some(provider) = query.cloud_provider.as_deref() {
        threats.retain(|t| t.applies_to_provider(provider));
    }
    if let Some(category) = query.category.as_deref() {
        threats.retain(|t| t.category.eq_ignore_ascii_case(category));
    }
    if let Some(severity) = severity {
        threats.retain(|t| t.severity == severity);
    }

    let scored: Vec<_> = threats.iter().map(|t| t.scored()).collect();
    HttpResponse::Ok().json(serde_json::json!({
        "total": scored.len(),
        "threats": scored,
    }))
}

pub async fn get_threat(
    state: web::Data<ApiState>,
    path: web::Path<String>,
) -> impl Responder {
    let id = path.into_inner();
    match state.threat_db.get_by_id(&id) {
        Some(threat) => HttpResponse::Ok().json(threat.scored()),
        None => HttpResponse::NotFound().json(ErrorResponse::new(format!("Threat not found: {}", id))),
    }
}

pub async fn get_threat_statistics(state: web::Data<ApiState>) -> impl Responder {
    HttpResponse::Ok().json(state.threat_db.statistics())
}
