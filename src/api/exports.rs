use std::path::Path as FilePath;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use validator::Validate;

use crate::api::AppState;
// No `crate::error::Result` import here: the Validate derive expands to an
// unqualified `Result<(), ValidationErrors>` and must see std's Result.
use crate::error::AppError;
use crate::models::{TimeRange, TopKind};
use crate::services::exporter::{self, ExportSummary, RecentlyPlayedOptions};
use crate::services::StreamingGateway;

pub fn export_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/accounts/:username/exports/followed-artists",
            post(export_followed_artists),
        )
        .route(
            "/accounts/:username/exports/saved-library",
            post(export_saved_library),
        )
        .route(
            "/accounts/:username/exports/playlists",
            post(export_playlists),
        )
        .route(
            "/accounts/:username/exports/recently-played",
            post(export_recently_played),
        )
        .route(
            "/accounts/:username/exports/top-stats",
            post(export_top_stats),
        )
}

#[derive(Debug, Deserialize, Validate)]
struct ExportRequest {
    #[validate(length(min = 1))]
    filepath: String,
}

#[derive(Debug, Deserialize, Validate)]
struct RecentlyPlayedExportRequest {
    #[validate(length(min = 1))]
    filepath: String,
    /// Append new plays to an existing file instead of rewriting it.
    #[serde(default = "default_append")]
    append: bool,
    #[serde(default)]
    include_audio_features: bool,
}

fn default_append() -> bool {
    true
}

#[derive(Debug, Deserialize, Validate)]
struct TopStatsExportRequest {
    #[validate(length(min = 1))]
    filepath: String,
    kind: TopKind,
    #[serde(default)]
    time_range: TimeRange,
}

async fn gateway_for(
    state: &AppState,
    username: &str,
) -> Result<(String, Arc<dyn StreamingGateway>), AppError> {
    let poller = state.registry.get(username).await?;
    Ok((poller.username().to_string(), poller.gateway()))
}

async fn export_followed_artists(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
    Json(req): Json<ExportRequest>,
) -> Result<Json<ExportSummary>, AppError> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let (username, gateway) = gateway_for(&state, &username).await?;
    let summary =
        exporter::export_followed_artists(gateway.as_ref(), &username, FilePath::new(&req.filepath))
            .await?;
    Ok(Json(summary))
}

async fn export_saved_library(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
    Json(req): Json<ExportRequest>,
) -> Result<Json<ExportSummary>, AppError> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let (username, gateway) = gateway_for(&state, &username).await?;
    let summary =
        exporter::export_saved_library(gateway.as_ref(), &username, FilePath::new(&req.filepath))
            .await?;
    Ok(Json(summary))
}

async fn export_playlists(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
    Json(req): Json<ExportRequest>,
) -> Result<Json<ExportSummary>, AppError> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let (username, gateway) = gateway_for(&state, &username).await?;
    let summary =
        exporter::export_playlists(gateway.as_ref(), &username, FilePath::new(&req.filepath))
            .await?;
    Ok(Json(summary))
}

async fn export_recently_played(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
    Json(req): Json<RecentlyPlayedExportRequest>,
) -> Result<Json<ExportSummary>, AppError> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let (username, gateway) = gateway_for(&state, &username).await?;
    let options = RecentlyPlayedOptions {
        append: req.append,
        include_audio_features: req.include_audio_features,
    };
    let summary = exporter::export_recently_played_csv(
        gateway.as_ref(),
        &username,
        FilePath::new(&req.filepath),
        options,
    )
    .await?;
    Ok(Json(summary))
}

async fn export_top_stats(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
    Json(req): Json<TopStatsExportRequest>,
) -> Result<Json<ExportSummary>, AppError> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let (username, gateway) = gateway_for(&state, &username).await?;
    let summary = exporter::export_top_stats_csv(
        gateway.as_ref(),
        &username,
        FilePath::new(&req.filepath),
        req.kind,
        req.time_range,
    )
    .await?;
    Ok(Json(summary))
}
