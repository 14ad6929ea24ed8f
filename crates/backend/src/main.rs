use axum::{
    http::{header, Method, StatusCode},
    routing::{delete, get, post, put},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    services::{ServeDir, ServeFile},
};

mod config;
mod db;
pub mod error;
mod handlers;
mod models;
mod scanner;
mod schema;
mod services;

use config::{AppConfig, ScanConfig};
use handlers::AppState;
use scanner::{GmailConnector, PgActivityLog, PgCredentialStore, Scanner};
use services::generator::GeminiGenerator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    dotenvy::dotenv().ok();

    let config = Arc::new(AppConfig::from_env()?);
    let scan_config = ScanConfig::from_env();

    // Establish database connection pool
    let pool = db::establish_connection_pool(&config.database_url)?;

    let credential_store = Arc::new(PgCredentialStore::new(pool.clone()));
    let connector = GmailConnector::new(
        config.google_client_id.clone(),
        config.google_client_secret.clone(),
        credential_store.clone(),
    );
    let generator = GeminiGenerator::new(
        config.generator_api_key.clone(),
        config.generator_model.clone(),
    );

    // One scanner serves both the interval task and the manual trigger, so
    // they contend on the same run lock.
    let scanner = Arc::new(Scanner::new(
        credential_store,
        Arc::new(PgActivityLog::new(pool.clone())),
        Arc::new(connector),
        Arc::new(generator),
        scan_config,
    ));

    let scan_task = scanner.clone();
    tokio::spawn(async move {
        scan_task.run_forever().await;
    });

    let state = AppState {
        pool,
        config: config.clone(),
        scanner,
    };

    let app = Router::new()
        .route("/health", get(health_check))
        // Account routes
        .route("/api/accounts", get(handlers::list_accounts))
        .route("/api/accounts", post(handlers::connect_account))
        .route("/api/accounts/:email", delete(handlers::delete_account))
        .route(
            "/api/accounts/:email/preferences",
            put(handlers::update_preferences),
        )
        // OAuth routes
        .route(
            "/api/accounts/oauth/callback",
            get(handlers::oauth_callback),
        )
        // Activity routes
        .route("/api/activity", get(handlers::list_activity))
        .route("/api/activity/stats", get(handlers::activity_stats))
        // Manual scan trigger
        .route("/api/scan", post(handlers::trigger_scan))
        .layer(build_cors_layer())
        .with_state(state);

    // Serve static frontend files if the directory exists
    let frontend_dir =
        std::env::var("FRONTEND_DIR").unwrap_or_else(|_| "frontend/dist".to_string());
    let app = if std::path::Path::new(&frontend_dir).exists() {
        tracing::info!("Serving frontend from {}", frontend_dir);
        let index_path = format!("{}/index.html", frontend_dir);
        let serve_dir = ServeDir::new(&frontend_dir).not_found_service(ServeFile::new(&index_path));
        app.fallback_service(serve_dir)
    } else {
        tracing::info!(
            "Frontend directory not found at {}, serving API only",
            frontend_dir
        );
        app
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> StatusCode {
    StatusCode::OK
}

/// Build CORS layer based on environment configuration.
///
/// If CORS_ALLOWED_ORIGINS is set, only those origins are allowed.
/// If not set, defaults to permissive CORS (for development only).
fn build_cors_layer() -> CorsLayer {
    let allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS").ok();

    match allowed_origins {
        Some(origins) => {
            let origins: Vec<_> = origins
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();

            if origins.is_empty() {
                tracing::warn!(
                    "CORS_ALLOWED_ORIGINS is set but empty, using permissive CORS (not recommended for production)"
                );
                CorsLayer::permissive()
            } else {
                tracing::info!("CORS configured for origins: {:?}", origins);
                CorsLayer::new()
                    .allow_origin(AllowOrigin::list(origins))
                    .allow_methods([
                        Method::GET,
                        Method::POST,
                        Method::PUT,
                        Method::DELETE,
                        Method::OPTIONS,
                    ])
                    .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
                    .allow_credentials(true)
            }
        }
        None => {
            tracing::warn!(
                "CORS_ALLOWED_ORIGINS not set, using permissive CORS (not recommended for production)"
            );
            CorsLayer::permissive()
        }
    }
}
