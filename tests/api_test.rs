use actix_web::{test, web, App};
use iac_threat_analyzer::api::server::configure;
use iac_threat_analyzer::api::ApiState;
use iac_threat_analyzer::config::Config;
use iac_threat_analyzer::threatdb::load_threat_database;
use serde_json::{json, Value};
use std::path::PathBuf;

fn state() -> web::Data<ApiState> {
    let config = Config::from_vars(|_| None).unwrap();
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("threatdb");
    let db = load_threat_database(path).unwrap();
    web::Data::new(ApiState::new(&config, db))
}

macro_rules! app {
    () => {
        test::init_service(App::new().app_data(state()).configure(configure)).await
    };
}

#[actix_web::test]
async fn test_health_reports_loaded_threats() {
    let app = app!();
    let req = test::TestRequest::get().uri("/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["status"], "ok");
    assert_eq!(body["threats_loaded"], 13);
    assert_eq!(body["llm_enabled"], false);
}

#[actix_web::test]
async fn test_threat_listing_filters() {
    let app = app!();

    let req = test::TestRequest::get().uri("/api/v1/threats?cloud_provider=aws").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["total"], 4);

    let req = test::TestRequest::get()
        .uri("/api/v1/threats?resource_type=google_sql_database_instance&severity=critical")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["threats"][0]["id"], "GCP-SQL-001");
    assert_eq!(body["threats"][0]["risk_score"], 8.0);

    let req = test::TestRequest::get().uri("/api/v1/threats?severity=extreme").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
async fn test_threat_lookup_and_statistics() {
    let app = app!();

    let req = test::TestRequest::get().uri("/api/v1/threats/AWS-SG-001").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["name"], "Security group open to the world");

    let req = test::TestRequest::get().uri("/api/v1/threats/NOPE-1").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);

    let req = test::TestRequest::get().uri("/api/v1/threats/statistics").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["total_threats"], 13);
}

#[actix_web::test]
async fn test_analyze_threats() {
    let app = app!();
    let req = test::TestRequest::post()
        .uri("/api/v1/analyze/threats")
        .set_json(json!({
            "resources": [{
                "resource_type": "aws_security_group",
                "name": "web",
                "properties": {"ingress": [{"from_port": 22, "cidr_blocks": ["0.0.0.0/0"]}]}
            }]
        }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["total_matched"], 1);
    assert_eq!(body["total_resources_scanned"], 1);
    assert_eq!(body["matched_threats"][0]["threat"]["id"], "AWS-SG-001");
    assert_eq!(body["matched_threats"][0]["resource_id"], "aws_security_group.web");
}

#[actix_web::test]
async fn test_invalid_resources_are_rejected() {
    let app = app!();
    let req = test::TestRequest::post()
        .uri("/api/v1/analyze/threats")
        .set_json(json!({"resources": [{"name": "no-type"}]}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let req = test::TestRequest::post()
        .uri("/api/v1/analyze/dfd")
        .set_json(json!({"resources": [{"resource_type": "aws_s3_bucket", "name": "b", "properties": "oops"}]}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
async fn test_analyze_dfd() {
    let app = app!();
    let req = test::TestRequest::post()
        .uri("/api/v1/analyze/dfd")
        .set_json(json!({
            "resources": [
                {"resource_type": "aws_ecs_service", "name": "app", "properties": {"associate_public_ip_address": true}},
                {"resource_type": "aws_db_instance", "name": "users", "properties": {}}
            ],
            "code_flows": [{"function": "handler", "calls": ["save"]}]
        }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["service_level"]["level"], "service");
    assert_eq!(body["component_level"]["level"], "component");
    assert_eq!(body["code_level"]["level"], "code");
    assert_eq!(body["metadata"]["levels_generated"], json!(["service", "component", "code"]));
}

#[actix_web::test]
async fn test_remediation_unavailable_without_llm() {
    let app = app!();
    let req = test::TestRequest::post()
        .uri("/api/v1/analyze/remediation")
        .set_json(json!({
            "threat_id": "AWS-SG-001",
            "resource": {"resource_type": "aws_security_group", "name": "web"},
            "kind": "remediation"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 503);
}

#[actix_web::test]
async fn test_cache_endpoints() {
    let app = app!();

    let req = test::TestRequest::get().uri("/api/v1/cache/statistics").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["cache"]["size"], 0);
    assert_eq!(body["cache"]["max_size"], 1000);
    assert!(body["llm"].is_null());

    let req = test::TestRequest::delete().uri("/api/v1/cache").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["cleared"], 0);
}
