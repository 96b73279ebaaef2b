use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub url: String,
    pub uri: String,
    pub tracks_total: u32,
    pub description: String,
    pub public: bool,
    pub collaborative: bool,
    pub owner: String,
    pub owner_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistTrack {
    pub added_at: Option<DateTime<Utc>>,
    pub track_id: String,
    pub track_name: String,
    pub artist_id: String,
    pub artist_name: String,
    pub album_name: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedTrack {
    pub id: String,
    pub name: String,
    pub artist_id: String,
    pub artist_name: String,
    pub album_id: String,
    pub album_name: String,
    pub url: String,
    pub uri: String,
    pub duration_ms: u64,
    pub popularity: u32,
    pub added_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedAlbum {
    pub id: String,
    pub name: String,
    pub artist_id: String,
    pub artist_name: String,
    pub url: String,
    pub uri: String,
    pub total_tracks: u32,
    pub release_date: String,
    pub added_at: Option<DateTime<Utc>>,
}
