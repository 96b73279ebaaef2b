use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Playback detail for the currently playing track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NowPlaying {
    pub track_id: String,
    pub track_name: String,
    pub artist_id: String,
    pub artist_name: String,
    pub album_id: String,
    pub album_name: String,
    pub image_url: Option<String>,
    pub duration_ms: u64,
    pub progress_ms: u64,
    pub popularity: u32,
    pub track_url: String,
    pub is_playing: bool,
    pub shuffle_state: bool,
    pub repeat_state: String,
}

/// One entry from the listening history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayEvent {
    pub played_at: DateTime<Utc>,
    pub track_id: String,
    pub track_name: String,
    pub artist_id: String,
    pub artist_name: String,
    pub album_id: String,
    pub album_name: String,
    pub track_url: String,
    pub duration_ms: u64,
    pub popularity: u32,
    pub explicit: bool,
}

impl PlayEvent {
    /// Unique identifier for one play. The same track can recur in the
    /// history, so the timestamp alone does not identify a play.
    pub fn play_id(&self) -> String {
        format!("{}:{}", self.played_at.to_rfc3339(), self.track_id)
    }
}

/// One ranked entry from the top-tracks statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedTrack {
    pub id: String,
    pub name: String,
    pub artist_id: String,
    pub artist_name: String,
    pub album_name: String,
    pub url: String,
    pub rank: u32,
    pub popularity: u32,
}

/// The fixed 11-metric audio analysis vector Spotify computes per track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatures {
    pub danceability: f64,
    pub energy: f64,
    pub key: i32,
    pub loudness: f64,
    pub mode: i32,
    pub speechiness: f64,
    pub acousticness: f64,
    pub instrumentalness: f64,
    pub liveness: f64,
    pub valence: f64,
    pub tempo: f64,
}
