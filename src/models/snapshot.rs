use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Artist, NowPlaying, PlayEvent, Playlist, RankedArtist, RankedTrack, SavedAlbum, SavedTrack};

/// Statistics window for top artists and tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeRange {
    ShortTerm,
    MediumTerm,
    LongTerm,
}

impl Default for TimeRange {
    fn default() -> Self {
        TimeRange::MediumTerm
    }
}

impl TimeRange {
    pub const ALL: [TimeRange; 3] = [
        TimeRange::ShortTerm,
        TimeRange::MediumTerm,
        TimeRange::LongTerm,
    ];

    /// Wire value expected by the Spotify API.
    pub fn as_str(self) -> &'static str {
        match self {
            TimeRange::ShortTerm => "short_term",
            TimeRange::MediumTerm => "medium_term",
            TimeRange::LongTerm => "long_term",
        }
    }

    /// Human-facing label used in sensor names.
    pub fn label(self) -> &'static str {
        match self {
            TimeRange::ShortTerm => "4weeks",
            TimeRange::MediumTerm => "6months",
            TimeRange::LongTerm => "alltime",
        }
    }
}

/// Which ranked statistic to export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopKind {
    Artists,
    Tracks,
}

impl TopKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TopKind::Artists => "artists",
            TopKind::Tracks => "tracks",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            TopKind::Artists => "Artists",
            TopKind::Tracks => "Tracks",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStatus {
    Playing,
    Paused,
    Idle,
}

impl PlaybackStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PlaybackStatus::Playing => "playing",
            PlaybackStatus::Paused => "paused",
            PlaybackStatus::Idle => "idle",
        }
    }
}

/// Result of one now-playing fetch. `track` is None when nothing is playing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NowPlayingState {
    pub status: PlaybackStatus,
    pub track: Option<NowPlaying>,
}

impl NowPlayingState {
    pub fn from_playback(playback: Option<NowPlaying>) -> Self {
        match playback {
            Some(track) => Self {
                status: if track.is_playing {
                    PlaybackStatus::Playing
                } else {
                    PlaybackStatus::Paused
                },
                track: Some(track),
            },
            None => Self {
                status: PlaybackStatus::Idle,
                track: None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentlyPlayed {
    pub count: usize,
    pub tracks: Vec<PlayEvent>,
    pub last_played: Option<DateTime<Utc>>,
}

impl RecentlyPlayed {
    pub fn new(tracks: Vec<PlayEvent>) -> Self {
        Self {
            count: tracks.len(),
            last_played: tracks.first().map(|t| t.played_at),
            tracks,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowedArtists {
    pub count: usize,
    pub artists: Vec<Artist>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedArtists {
    pub period: TimeRange,
    pub count: usize,
    pub artists: Vec<RankedArtist>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedTracks {
    pub period: TimeRange,
    pub count: usize,
    pub tracks: Vec<RankedTrack>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistIndex {
    pub count: usize,
    pub playlists: Vec<Playlist>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedTracks {
    /// Library-wide total, not the fetched page size.
    pub total: u32,
    pub tracks: Vec<SavedTrack>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedAlbums {
    pub total: u32,
    pub albums: Vec<SavedAlbum>,
}

/// Latest fetch result per resource kind for one account.
///
/// Every field is either absent (never fetched) or the complete result of the
/// most recent successful fetch of that kind. Fields are replaced wholesale;
/// a failed fetch never touches them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    /// Cleared when polling halts on an unrecoverable auth failure.
    pub available: bool,
    /// Most recent cycle failure, kept for observability.
    pub last_error: Option<String>,
    pub now_playing: Option<NowPlayingState>,
    pub recently_played: Option<RecentlyPlayed>,
    pub followed_artists: Option<FollowedArtists>,
    pub top_artists: HashMap<TimeRange, RankedArtists>,
    pub top_tracks: HashMap<TimeRange, RankedTracks>,
    pub playlists: Option<PlaylistIndex>,
    pub saved_tracks: Option<SavedTracks>,
    pub saved_albums: Option<SavedAlbums>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            available: true,
            last_error: None,
            now_playing: None,
            recently_played: None,
            followed_artists: None,
            top_artists: HashMap::new(),
            top_tracks: HashMap::new(),
            playlists: None,
            saved_tracks: None,
            saved_albums: None,
        }
    }
}
