mod api;
mod config;
mod error;
mod models;
mod services;

use crate::api::AppState;
use crate::config::Config;
use crate::models::AccountConfig;
use crate::services::{AccountRegistry, ClientCredentials};
use axum::{
    http::{header, HeaderValue, Method},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use validator::Validate;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,spotify_stats=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded");

    // Account registry shares one application credential pair
    let credentials = ClientCredentials::new(
        config.spotify_client_id.clone(),
        config.spotify_client_secret.clone(),
    );
    let registry = Arc::new(AccountRegistry::new(credentials));

    // Register accounts from the configured file on startup
    if let Some(path) = &config.accounts_file {
        match load_accounts(path) {
            Ok(accounts) => {
                tracing::info!("Loaded {} accounts from {}", accounts.len(), path);
                for account in accounts {
                    let username = account.username.clone();
                    if let Err(e) = account.validate() {
                        tracing::error!("Skipping invalid account {}: {}", username, e);
                        continue;
                    }
                    if let Err(e) = registry.register(account).await {
                        tracing::error!("Failed to register account {}: {:?}", username, e);
                    }
                }
            }
            Err(e) => tracing::error!("Failed to load accounts from {}: {:?}", path, e),
        }
    }

    let app_state = Arc::new(AppState {
        registry: registry.clone(),
    });

    // Build router
    let app = Router::new()
        .nest(
            "/api/v1",
            api::account_routes()
                .merge(api::export_routes())
                .with_state(app_state),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config));

    // Start server
    let addr = format!("{}:{}", config.server_host, config.server_port);
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn load_accounts(path: &str) -> anyhow::Result<Vec<AccountConfig>> {
    let contents = std::fs::read_to_string(path)?;
    let accounts = serde_json::from_str(&contents)?;
    Ok(accounts)
}

fn cors_layer(config: &Config) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    if config.cors_origins.iter().any(|origin| origin == "*") {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        layer.allow_origin(origins)
    }
}
