use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::models::{AudioFeatures, PlayEvent, Playlist, PlaylistTrack, TimeRange, TopKind};
use crate::services::StreamingGateway;

/// History window Spotify exposes for recently-played.
const RECENT_EXPORT_LIMIT: usize = 50;
const TOP_EXPORT_LIMIT: usize = 50;

const RECENT_COLUMNS: [&str; 13] = [
    "play_id",
    "username",
    "played_at",
    "track_id",
    "track_name",
    "artist_id",
    "artist_name",
    "album_id",
    "album_name",
    "duration_ms",
    "popularity",
    "explicit",
    "track_url",
];

const FEATURE_COLUMNS: [&str; 11] = [
    "danceability",
    "energy",
    "key",
    "loudness",
    "mode",
    "speechiness",
    "acousticness",
    "instrumentalness",
    "liveness",
    "valence",
    "tempo",
];

#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    pub exported: usize,
    pub filepath: String,
}

#[derive(Debug, Clone, Copy)]
pub struct RecentlyPlayedOptions {
    pub append: bool,
    pub include_audio_features: bool,
}

#[derive(Debug, Serialize)]
struct PlaylistExport {
    #[serde(flatten)]
    playlist: Playlist,
    tracks: Vec<PlaylistTrack>,
}

/// Export all followed artists with full per-artist metadata to JSON.
pub async fn export_followed_artists(
    gateway: &dyn StreamingGateway,
    username: &str,
    filepath: &Path,
) -> Result<ExportSummary> {
    let artists = gateway.followed_artists().await?;

    let mut detailed = Vec::with_capacity(artists.len());
    for artist in artists {
        match gateway.artist(&artist.id).await {
            Ok(detail) => detailed.push(detail),
            Err(err) => {
                // Fall back to the listing data rather than losing the artist.
                tracing::warn!("Failed to fetch artist {}: {}", artist.id, err);
                detailed.push(artist.into());
            }
        }
    }

    let exported = detailed.len();
    let document = serde_json::json!({
        "exported_at": Utc::now().to_rfc3339(),
        "username": username,
        "total_count": exported,
        "artists": detailed,
    });

    write_json(filepath.to_path_buf(), document).await?;

    tracing::info!(
        "Exported {} followed artists for {} to {}",
        exported,
        username,
        filepath.display()
    );
    Ok(ExportSummary {
        exported,
        filepath: filepath.display().to_string(),
    })
}

/// Export the full saved library (tracks and albums) to JSON.
pub async fn export_saved_library(
    gateway: &dyn StreamingGateway,
    username: &str,
    filepath: &Path,
) -> Result<ExportSummary> {
    let (_, tracks) = gateway.saved_tracks().await?;
    let (_, albums) = gateway.saved_albums().await?;
    let track_count = tracks.len();
    let album_count = albums.len();
    let exported = track_count + album_count;

    let document = serde_json::json!({
        "exported_at": Utc::now().to_rfc3339(),
        "username": username,
        "tracks": tracks,
        "albums": albums,
    });

    write_json(filepath.to_path_buf(), document).await?;

    tracing::info!(
        "Exported library for {} ({} tracks, {} albums) to {}",
        username,
        track_count,
        album_count,
        filepath.display()
    );
    Ok(ExportSummary {
        exported,
        filepath: filepath.display().to_string(),
    })
}

/// Export every playlist with its full track listing to JSON.
///
/// A playlist whose tracks come back not-found or forbidden (deleted or made
/// private since the listing) is skipped with a warning; the export still
/// succeeds with the rest.
pub async fn export_playlists(
    gateway: &dyn StreamingGateway,
    username: &str,
    filepath: &Path,
) -> Result<ExportSummary> {
    let playlists = gateway.playlists().await?;

    let mut exports = Vec::with_capacity(playlists.len());
    for playlist in playlists {
        match gateway.playlist_tracks(&playlist.id).await {
            Ok(tracks) => exports.push(PlaylistExport { playlist, tracks }),
            Err(AppError::NotFound(_)) => {
                tracing::warn!(
                    "Playlist {} ({}) not found (deleted or private), skipping",
                    playlist.name,
                    playlist.id
                );
            }
            Err(err) => return Err(err),
        }
    }

    let exported = exports.len();
    let document = serde_json::json!({
        "exported_at": Utc::now().to_rfc3339(),
        "username": username,
        "total_count": exported,
        "playlists": exports,
    });

    write_json(filepath.to_path_buf(), document).await?;

    tracing::info!(
        "Exported {} playlists for {} to {}",
        exported,
        username,
        filepath.display()
    );
    Ok(ExportSummary {
        exported,
        filepath: filepath.display().to_string(),
    })
}

/// Export recently-played history to CSV.
///
/// In append mode the existing file's `play_id` column is read first and only
/// unseen plays are written, so re-exporting the same window is idempotent.
/// Appended rows keep the existing header's column layout: the audio-feature
/// columns follow the file, not the request, so the file never goes ragged.
/// Audio-feature enrichment queries the gateway once per unique track.
pub async fn export_recently_played_csv(
    gateway: &dyn StreamingGateway,
    username: &str,
    filepath: &Path,
    options: RecentlyPlayedOptions,
) -> Result<ExportSummary> {
    let events = gateway.recently_played(RECENT_EXPORT_LIMIT).await?;

    let existing = if options.append {
        let path = filepath.to_path_buf();
        run_blocking(move || inspect_existing_export(&path)).await?
    } else {
        ExistingExport::default()
    };

    let include_features = if existing.header_present {
        if existing.has_feature_columns != options.include_audio_features {
            tracing::warn!(
                "{} was written {} audio feature columns, keeping its layout",
                filepath.display(),
                if existing.has_feature_columns {
                    "with"
                } else {
                    "without"
                }
            );
        }
        existing.has_feature_columns
    } else {
        options.include_audio_features
    };

    let new_events: Vec<PlayEvent> = events
        .into_iter()
        .filter(|event| !existing.play_ids.contains(&event.play_id()))
        .collect();

    if new_events.is_empty() {
        tracing::info!("No new plays to export for {}", username);
        return Ok(ExportSummary {
            exported: 0,
            filepath: filepath.display().to_string(),
        });
    }

    let mut features: HashMap<String, AudioFeatures> = HashMap::new();
    if include_features {
        for event in &new_events {
            if features.contains_key(&event.track_id) {
                continue;
            }
            match gateway.audio_features(&event.track_id).await {
                Ok(vector) => {
                    features.insert(event.track_id.clone(), vector);
                }
                Err(AppError::NotFound(_)) => {
                    tracing::warn!("No audio features for track {}", event.track_id);
                }
                Err(err) => return Err(err),
            }
        }
    }

    let exported = new_events.len();
    let path = filepath.to_path_buf();
    let owner = username.to_string();
    let append = options.append;
    let write_header = !(append && existing.header_present);
    run_blocking(move || {
        write_recently_played(
            &path,
            &owner,
            &new_events,
            &features,
            append,
            write_header,
            include_features,
        )
    })
    .await?;

    tracing::info!(
        "Exported {} plays for {} to {}",
        exported,
        username,
        filepath.display()
    );
    Ok(ExportSummary {
        exported,
        filepath: filepath.display().to_string(),
    })
}

/// Export a top-stats snapshot (artists or tracks, one time range) to CSV.
pub async fn export_top_stats_csv(
    gateway: &dyn StreamingGateway,
    username: &str,
    filepath: &Path,
    kind: TopKind,
    range: TimeRange,
) -> Result<ExportSummary> {
    let export_date = Utc::now().date_naive().to_string();
    let owner = username.to_string();
    let path = filepath.to_path_buf();

    let exported = match kind {
        TopKind::Artists => {
            let artists = gateway.top_artists(range, TOP_EXPORT_LIMIT).await?;
            let count = artists.len();
            run_blocking(move || {
                let mut writer = truncating_csv_writer(&path)?;
                writer.write_record([
                    "username",
                    "export_date",
                    "rank",
                    "id",
                    "name",
                    "url",
                    "genres",
                    "popularity",
                ])?;
                for artist in &artists {
                    writer.write_record([
                        owner.as_str(),
                        export_date.as_str(),
                        &artist.rank.to_string(),
                        &artist.id,
                        &artist.name,
                        &artist.url,
                        &artist.genres.join(";"),
                        &artist.popularity.to_string(),
                    ])?;
                }
                writer.flush()?;
                Ok(())
            })
            .await?;
            count
        }
        TopKind::Tracks => {
            let tracks = gateway.top_tracks(range, TOP_EXPORT_LIMIT).await?;
            let count = tracks.len();
            run_blocking(move || {
                let mut writer = truncating_csv_writer(&path)?;
                writer.write_record([
                    "username",
                    "export_date",
                    "rank",
                    "id",
                    "name",
                    "artist_name",
                    "artist_id",
                    "album_name",
                    "url",
                    "popularity",
                ])?;
                for track in &tracks {
                    writer.write_record([
                        owner.as_str(),
                        export_date.as_str(),
                        &track.rank.to_string(),
                        &track.id,
                        &track.name,
                        &track.artist_name,
                        &track.artist_id,
                        &track.album_name,
                        &track.url,
                        &track.popularity.to_string(),
                    ])?;
                }
                writer.flush()?;
                Ok(())
            })
            .await?;
            count
        }
    };

    tracing::info!(
        "Exported top {:?} ({:?}) for {} to {}",
        kind,
        range,
        username,
        filepath.display()
    );
    Ok(ExportSummary {
        exported,
        filepath: filepath.display().to_string(),
    })
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("export task failed: {e}")))?
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    Ok(())
}

async fn write_json(filepath: PathBuf, document: serde_json::Value) -> Result<()> {
    run_blocking(move || {
        ensure_parent_dir(&filepath)?;
        let file = File::create(&filepath)?;
        serde_json::to_writer_pretty(BufWriter::new(file), &document)
            .map_err(|e| AppError::Write(e.to_string()))?;
        Ok(())
    })
    .await
}

fn truncating_csv_writer(path: &Path) -> Result<csv::Writer<BufWriter<File>>> {
    ensure_parent_dir(path)?;
    let file = File::create(path)?;
    Ok(csv::Writer::from_writer(BufWriter::new(file)))
}

/// What an existing export file already holds: the play identifiers for
/// deduplication, and whether its header carries the audio feature columns.
/// A missing or empty file reports no header at all.
#[derive(Debug, Default)]
struct ExistingExport {
    header_present: bool,
    has_feature_columns: bool,
    play_ids: HashSet<String>,
}

fn inspect_existing_export(path: &Path) -> Result<ExistingExport> {
    if !path.exists() {
        return Ok(ExistingExport::default());
    }

    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    if headers.is_empty() {
        return Ok(ExistingExport::default());
    }

    let has_feature_columns = headers.iter().any(|h| h == "danceability");
    let mut play_ids = HashSet::new();
    if let Some(idx) = headers.iter().position(|h| h == "play_id") {
        for record in reader.records() {
            let record = record?;
            if let Some(id) = record.get(idx) {
                play_ids.insert(id.to_string());
            }
        }
    }

    Ok(ExistingExport {
        header_present: true,
        has_feature_columns,
        play_ids,
    })
}

fn write_recently_played(
    path: &Path,
    username: &str,
    events: &[PlayEvent],
    features: &HashMap<String, AudioFeatures>,
    append: bool,
    write_header: bool,
    include_features: bool,
) -> Result<()> {
    ensure_parent_dir(path)?;

    let file = if append {
        OpenOptions::new().create(true).append(true).open(path)?
    } else {
        File::create(path)?
    };
    let mut writer = csv::Writer::from_writer(BufWriter::new(file));

    if write_header {
        let mut header: Vec<&str> = RECENT_COLUMNS.to_vec();
        if include_features {
            header.extend(FEATURE_COLUMNS);
        }
        writer.write_record(&header)?;
    }

    for event in events {
        let mut row = vec![
            event.play_id(),
            username.to_string(),
            event.played_at.to_rfc3339(),
            event.track_id.clone(),
            event.track_name.clone(),
            event.artist_id.clone(),
            event.artist_name.clone(),
            event.album_id.clone(),
            event.album_name.clone(),
            event.duration_ms.to_string(),
            event.popularity.to_string(),
            event.explicit.to_string(),
            event.track_url.clone(),
        ];

        if include_features {
            match features.get(&event.track_id) {
                Some(f) => row.extend([
                    f.danceability.to_string(),
                    f.energy.to_string(),
                    f.key.to_string(),
                    f.loudness.to_string(),
                    f.mode.to_string(),
                    f.speechiness.to_string(),
                    f.acousticness.to_string(),
                    f.instrumentalness.to_string(),
                    f.liveness.to_string(),
                    f.valence.to_string(),
                    f.tempo.to_string(),
                ]),
                None => row.extend(std::iter::repeat(String::new()).take(FEATURE_COLUMNS.len())),
            }
        }

        writer.write_record(&row)?;
    }

    writer.flush()?;
    Ok(())
}
