use actix_web::{middleware as actix_middleware, web, App, HttpServer};
use anyhow::Context;

use community_server::{
    auth_token::TokenService,
    config::AppConfig,
    db::{DbManager, MongoConnector},
    handlers,
    middleware::TokenVerifier,
};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (for development)
    if dotenvy::dotenv().is_err() {
        dotenvy::from_filename("server/.env").ok();
    }

    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    log::info!("Starting community server...");

    let config = AppConfig::from_env().context("failed to load configuration")?;
    log::info!("Environment: {:?}", config.environment);

    let tokens = match &config.auth.jwt_secret {
        Some(secret) => {
            match TokenService::new(secret.as_bytes().to_vec(), config.auth.token_ttl()) {
                Ok(service) => Some(service),
                Err(err) => {
                    log::error!("JWT secret rejected: {}. Authenticated routes will fail.", err);
                    None
                }
            }
        }
        None => {
            log::error!("JWT_SECRET is not set. Authenticated routes will fail.");
            None
        }
    };
    let verifier = TokenVerifier::new(tokens, config.auth.verifier_settings());

    let db = DbManager::new(
        MongoConnector::new(&config.database),
        config.database.connection_settings(),
    );
    log::info!(
        "Database '{}' (reconnect policy {:?})",
        config.database.name,
        config.database.reconnect_policy()
    );

    // Connect in the background; requests that need the database wait at the gate.
    let initial = db.clone();
    tokio::spawn(async move {
        if let Err(err) = initial.connect().await {
            log::warn!("Initial database connection failed: {}", err);
        }
    });

    let server_host = config.server.host.clone();
    let server_port = config.server.port;
    log::info!("Starting HTTP server at {}:{}...", server_host, server_port);

    HttpServer::new(move || {
        App::new()
            // Shared state
            .app_data(web::Data::new(config.clone()))
            .app_data(web::Data::new(verifier.clone()))
            .app_data(web::Data::new(db.clone()))
            // Middleware
            .wrap(actix_middleware::Logger::default())
            .wrap(actix_middleware::Compress::default())
            .configure(handlers::configure)
    })
    .bind((server_host, server_port))?
    .run()
    .await?;

    Ok(())
}
