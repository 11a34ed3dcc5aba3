use actix_web::{web, HttpResponse, Responder};
use log::{error, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::slice;
use crate::api::{ApiState, ErrorResponse};
use crate::infra::{validate_resources, CodeFlow};
use crate::llm::PromptKind;

#[derive(Debug, Deserialize)]
pub struct AnalyzeThreatsRequest {
    pub resources: Vec<Value>,
    pub filter_by_resource_type: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeDfdRequest {
    pub resources: Vec<Value>,
    pub code_flows: Option<Vec<CodeFlow>>,
}

#[derive(Debug, Deserialize)]
pub struct RemediationRequest {
    pub threat_id: String,
    pub resource: Value,
    #[serde(default)]
    pub kind: PromptKind,
}

#[derive(Debug, Serialize)]
pub struct RemediationResponse {
    pub threat_id: String,
    pub resource: String,
    pub kind: PromptKind,
    pub text: String,
}

pub async fn analyze_threats(
    state: web::Data<ApiState>,
    body: web::Json<AnalyzeThreatsRequest>,
) -> impl Responder {
    let resources = match validate_resources(&body.resources) {
        Ok(resources) => resources,
        Err(e) => return HttpResponse::BadRequest().json(ErrorResponse::new(e)),
    };

    let filter = body.filter_by_resource_type.unwrap_or(state.filter_by_resource_type);
    let result = state
        .matcher
        .match_threats(&resources, state.threat_db.threats(), filter);

    info!(
        "Threat analysis found {} matches across {} resources",
        result.total_matched(),
        resources.len()
    );
    HttpResponse::Ok().json(result)
}

pub async fn analyze_dfd(
    state: web::Data<ApiState>,
    body: web::Json<AnalyzeDfdRequest>,
) -> impl Responder {
    let resources = match validate_resources(&body.resources) {
        Ok(resources) => resources,
        Err(e) => return HttpResponse::BadRequest().json(ErrorResponse::new(e)),
    };

    let result = state
        .dfd_generator
        .build_all(&resources, body.code_flows.as_deref());
    HttpResponse::Ok().json(result)
}

pub async fn generate_remediation(
    state: web::Data<ApiState>,
    body: web::Json<RemediationRequest>,
) -> impl Responder {
    let narrator = match &state.narrator {
        Some(narrator) => narrator,
        None => {
            return HttpResponse::ServiceUnavailable()
                .json(ErrorResponse::new("No LLM provider configured"))
        }
    };

    let threat = match state.threat_db.get_by_id(&body.threat_id) {
        Some(threat) => threat,
        None => {
            return HttpResponse::NotFound()
                .json(ErrorResponse::new(format!("Threat not found: {}", body.threat_id)))
        }
    };

    let resource = match validate_resources(slice::from_ref(&body.resource)) {
        Ok(mut resources) if !resources.is_empty() => resources.remove(0),
        Ok(_) => return HttpResponse::BadRequest().json(ErrorResponse::new("resource is required")),
        Err(e) => return HttpResponse::BadRequest().json(ErrorResponse::new(e)),
    };

    match narrator.narrate(body.kind, threat, &resource).await {
        Ok(text) => HttpResponse::Ok().json(RemediationResponse {
            threat_id: threat.id.clone(),
            resource: resource.full_name.clone(),
            kind: body.kind,
            text,
        }),
        Err(e) => {
            error!("Text generation failed for {}: {}", threat.id, e);
            HttpResponse::BadGateway().json(ErrorResponse::new(e))
        }
    }
}
