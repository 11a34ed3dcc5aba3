use iac_threat_analyzer::api::server::start_server;
use iac_threat_analyzer::api::ApiState;
use iac_threat_analyzer::config::Config;
use iac_threat_analyzer::threatdb::load_threat_database;
use log::{error, info};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load configuration
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(config.logging.log_level.as_str()));

    info!("Starting IaC Threat Analyzer...");
    info!("Loading threat database from {}", config.threat_db.path);

    let threat_db = match load_threat_database(&config.threat_db.path) {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to load threat database: {:#}", e);
            std::process::exit(1);
        }
    };

    let state = ApiState::new(&config, threat_db);
    start_server(config, state).await
}
