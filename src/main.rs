use axum::http::HeaderValue;
use std::panic;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use aula_colab::clients::portal_client;
use aula_colab::config::{self, Config};
use aula_colab::ws::profiles;
use aula_colab::{build_app, AppState};

fn cors_layer(config: &Config) -> CorsLayer {
    match &config.cors_origins {
        Some(origins) => {
            let origins: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|origin| origin.trim().parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        }
        None => CorsLayer::permissive(),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            // Default to info level, but allow debug for our app
            "aula_colab=debug,tower_http=debug,axum::rejection=trace,info".into()
        }))
        .init();

    info!("Starting server...");

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
        Config::default()
    });
    config::init_config(config.clone());

    // Presence entries are enriched from the portal when it is reachable
    profiles::init_profile_cache();
    match (&config.portal_api_url, &config.auth_jwt_secret) {
        (Some(portal_url), Some(secret)) => {
            match portal_client::init_portal_client(
                portal_url.clone(),
                secret.clone(),
                config.service_name.clone(),
            ) {
                Ok(()) => info!("Portal client initialized"),
                Err(e) => error!("Failed to initialize portal client: {}", e),
            }
        }
        _ => {
            warn!("No portal API configured - presence entries will use JWT claims only");
        }
    }
    if config.auth_jwt_secret.is_none() {
        warn!("No JWT secret configured - WebSocket connections will be rejected");
    }

    // Shared room registry
    let state = Arc::new(AppState::new());

    // Combine all routes
    let app_routes = build_app(state).layer(cors_layer(&config));

    // Start the HTTP server
    let listener = tokio::net::TcpListener::bind(config.server_address())
        .await
        .unwrap_or_else(|_| panic!("Failed to bind to {}", config.server_address()));

    info!("🚀 Server running on http://{}", config.server_address());
    info!("📡 Collaboration WebSocket at ws://{}/ws", config.server_address());
    info!("📚 Swagger UI available at http://{}/swagger", config.server_address());

    axum::serve(listener, app_routes)
        .await
        .expect("Server failed to start");
}
