use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use log::info;
use crate::api::analysis::{analyze_dfd, analyze_threats, generate_remediation};
use crate::api::cache::{clear_cache, get_cache_statistics};
use crate::api::threats::{get_threat, get_threat_statistics, list_threats};
use crate::api::{health, ApiState};
use crate::config::Config;

/// Register every route. Shared by the server and the handler tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health)).service(
        web::scope("/api/v1")
            // Threat database
            .route("/threats", web::get().to(list_threats))
            .route("/threats/statistics", web::get().to(get_threat_statistics))
            .route("/threats/{id}", web::get().to(get_threat))
            // Analysis
            .route("/analyze/threats", web::post().to(analyze_threats))
            .route("/analyze/dfd", web::post().to(analyze_dfd))
            .route("/analyze/remediation", web::post().to(generate_remediation))
            // LLM response cache
            .route("/cache/statistics", web::get().to(get_cache_statistics))
            .route("/cache", web::delete().to(clear_cache)),
    );
}

pub async fn start_server(config: Config, state: ApiState) -> std::io::Result<()> {
    let api_state = web::Data::new(state);
    let production = config.server.environment == "production";

    info!(
        "Serving {} threats on {}:{}",
        api_state.threat_db.len(),
        config.server.host,
        config.server.port
    );

    HttpServer::new(move || {
        let cors = if production {
            Cors::default()
                .allow_any_origin()
                .allowed_methods(vec!["GET", "POST", "DELETE"])
                .allow_any_header()
                .max_age(3600)
        } else {
            Cors::permissive()
        };

        App::new()
            .wrap(cors)
            .wrap(Logger::default())
            .app_data(api_state.clone())
            .app_data(web::JsonConfig::default().limit(10 * 1024 * 1024))
            .configure(configure)
    })
    .bind(format!("{}:{}", config.server.host, config.server.port))?
    .run()
    .await
}
