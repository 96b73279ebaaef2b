use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    Artist, ArtistDetail, AudioFeatures, NowPlaying, PlayEvent, Playlist, PlaylistTrack,
    RankedArtist, RankedTrack, SavedAlbum, SavedTrack, TimeRange,
};

/// Authenticated access to one account's Spotify data.
///
/// Implementations own token refresh, pagination and rate limiting; callers
/// see complete result sets and the error taxonomy in [`crate::error`].
#[async_trait]
pub trait StreamingGateway: Send + Sync {
    /// Current playback, or None when nothing is playing.
    async fn now_playing(&self) -> Result<Option<NowPlaying>>;

    async fn recently_played(&self, limit: usize) -> Result<Vec<PlayEvent>>;

    /// All followed artists, paginated internally.
    async fn followed_artists(&self) -> Result<Vec<Artist>>;

    /// Full metadata for a single artist.
    async fn artist(&self, id: &str) -> Result<ArtistDetail>;

    async fn top_artists(&self, range: TimeRange, limit: usize) -> Result<Vec<RankedArtist>>;

    async fn top_tracks(&self, range: TimeRange, limit: usize) -> Result<Vec<RankedTrack>>;

    /// All of the user's playlists, paginated internally.
    async fn playlists(&self) -> Result<Vec<Playlist>>;

    async fn playlist_tracks(&self, playlist_id: &str) -> Result<Vec<PlaylistTrack>>;

    /// Saved tracks: (library-wide total, all items).
    async fn saved_tracks(&self) -> Result<(u32, Vec<SavedTrack>)>;

    async fn saved_albums(&self) -> Result<(u32, Vec<SavedAlbum>)>;

    async fn audio_features(&self, track_id: &str) -> Result<AudioFeatures>;
}

#[cfg(test)]
pub mod test_fixtures {
    use chrono::{Duration, TimeZone, Utc};

    use crate::models::*;

    pub fn now_playing_track(name: &str) -> NowPlaying {
        NowPlaying {
            track_id: format!("track-{name}"),
            track_name: name.to_string(),
            artist_id: "artist-1".to_string(),
            artist_name: "Artist".to_string(),
            album_id: "album-1".to_string(),
            album_name: "Album".to_string(),
            image_url: None,
            duration_ms: 180_000,
            progress_ms: 30_000,
            popularity: 50,
            track_url: format!("https://open.spotify.com/track/{name}"),
            is_playing: true,
            shuffle_state: false,
            repeat_state: "off".to_string(),
        }
    }

    /// Play events with distinct timestamps, newest first like the API.
    pub fn play_event(n: u32) -> PlayEvent {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        PlayEvent {
            played_at: base - Duration::minutes(n as i64 * 5),
            track_id: format!("track-{n}"),
            track_name: format!("Track {n}"),
            artist_id: format!("artist-{n}"),
            artist_name: format!("Artist {n}"),
            album_id: format!("album-{n}"),
            album_name: format!("Album {n}"),
            track_url: format!("https://open.spotify.com/track/track-{n}"),
            duration_ms: 200_000,
            popularity: 40,
            explicit: false,
        }
    }

    pub fn artist(n: u32) -> Artist {
        Artist {
            id: format!("artist-{n}"),
            name: format!("Artist {n}"),
            url: format!("https://open.spotify.com/artist/artist-{n}"),
            image: None,
            genres: vec!["indie".to_string()],
            popularity: 60,
        }
    }

    pub fn ranked_artist(rank: u32) -> RankedArtist {
        RankedArtist {
            id: format!("artist-{rank}"),
            name: format!("Artist {rank}"),
            url: format!("https://open.spotify.com/artist/artist-{rank}"),
            rank,
            genres: vec!["electronic".to_string(), "ambient".to_string()],
            popularity: 70,
        }
    }

    pub fn ranked_track(rank: u32) -> RankedTrack {
        RankedTrack {
            id: format!("track-{rank}"),
            name: format!("Track {rank}"),
            artist_id: format!("artist-{rank}"),
            artist_name: format!("Artist {rank}"),
            album_name: format!("Album {rank}"),
            url: format!("https://open.spotify.com/track/track-{rank}"),
            rank,
            popularity: 65,
        }
    }

    pub fn playlist(n: u32) -> Playlist {
        Playlist {
            id: format!("playlist-{n}"),
            name: format!("Playlist {n}"),
            url: format!("https://open.spotify.com/playlist/playlist-{n}"),
            uri: format!("spotify:playlist:playlist-{n}"),
            tracks_total: 2,
            description: String::new(),
            public: true,
            collaborative: false,
            owner: "Ian".to_string(),
            owner_id: "ian".to_string(),
        }
    }

    pub fn playlist_track(n: u32) -> PlaylistTrack {
        PlaylistTrack {
            added_at: None,
            track_id: format!("track-{n}"),
            track_name: format!("Track {n}"),
            artist_id: format!("artist-{n}"),
            artist_name: format!("Artist {n}"),
            album_name: format!("Album {n}"),
            duration_ms: 210_000,
        }
    }

    pub fn saved_track(n: u32) -> SavedTrack {
        SavedTrack {
            id: format!("track-{n}"),
            name: format!("Track {n}"),
            artist_id: format!("artist-{n}"),
            artist_name: format!("Artist {n}"),
            album_id: format!("album-{n}"),
            album_name: format!("Album {n}"),
            url: format!("https://open.spotify.com/track/track-{n}"),
            uri: format!("spotify:track:track-{n}"),
            duration_ms: 190_000,
            popularity: 55,
            added_at: None,
        }
    }

    pub fn saved_album(n: u32) -> SavedAlbum {
        SavedAlbum {
            id: format!("album-{n}"),
            name: format!("Album {n}"),
            artist_id: format!("artist-{n}"),
            artist_name: format!("Artist {n}"),
            url: format!("https://open.spotify.com/album/album-{n}"),
            uri: format!("spotify:album:album-{n}"),
            total_tracks: 10,
            release_date: "2020-01-01".to_string(),
            added_at: None,
        }
    }

    pub fn audio_features() -> AudioFeatures {
        AudioFeatures {
            danceability: 0.7,
            energy: 0.8,
            key: 5,
            loudness: -6.5,
            mode: 1,
            speechiness: 0.05,
            acousticness: 0.1,
            instrumentalness: 0.0,
            liveness: 0.12,
            valence: 0.6,
            tempo: 120.0,
        }
    }
}

#[cfg(test)]
pub mod mock {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::error::AppError;

    /// Scriptable gateway for scheduler and export tests.
    ///
    /// Each endpoint serves from a fixed dataset; `fail_with` forces the next
    /// calls to return a given error instead.
    #[derive(Default)]
    pub struct MockGateway {
        pub now_playing: Mutex<Vec<Result<Option<NowPlaying>>>>,
        pub play_events: Mutex<Vec<PlayEvent>>,
        pub artists: Mutex<Vec<Artist>>,
        pub ranked_artists: Mutex<Vec<RankedArtist>>,
        pub ranked_tracks: Mutex<Vec<RankedTrack>>,
        pub playlists: Mutex<Vec<Playlist>>,
        pub playlist_tracks: Mutex<HashMap<String, Result<Vec<PlaylistTrack>>>>,
        pub saved_tracks: Mutex<Vec<SavedTrack>>,
        pub saved_albums: Mutex<Vec<SavedAlbum>>,
        pub features: Mutex<HashMap<String, AudioFeatures>>,
        pub feature_calls: AtomicUsize,
    }

    impl MockGateway {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a scripted outcome for the next now-playing call.
        pub fn push_now_playing(&self, outcome: Result<Option<NowPlaying>>) {
            self.now_playing.lock().unwrap().push(outcome);
        }
    }

    #[async_trait]
    impl StreamingGateway for MockGateway {
        async fn now_playing(&self) -> Result<Option<NowPlaying>> {
            let mut scripted = self.now_playing.lock().unwrap();
            if scripted.is_empty() {
                return Ok(None);
            }
            scripted.remove(0)
        }

        async fn recently_played(&self, limit: usize) -> Result<Vec<PlayEvent>> {
            let events = self.play_events.lock().unwrap();
            Ok(events.iter().take(limit).cloned().collect())
        }

        async fn followed_artists(&self) -> Result<Vec<Artist>> {
            Ok(self.artists.lock().unwrap().clone())
        }

        async fn artist(&self, id: &str) -> Result<ArtistDetail> {
            let artists = self.artists.lock().unwrap();
            artists
                .iter()
                .find(|a| a.id == id)
                .cloned()
                .map(ArtistDetail::from)
                .ok_or_else(|| AppError::NotFound(format!("artist {id}")))
        }

        async fn top_artists(&self, _range: TimeRange, limit: usize) -> Result<Vec<RankedArtist>> {
            let ranked = self.ranked_artists.lock().unwrap();
            Ok(ranked.iter().take(limit).cloned().collect())
        }

        async fn top_tracks(&self, _range: TimeRange, limit: usize) -> Result<Vec<RankedTrack>> {
            let ranked = self.ranked_tracks.lock().unwrap();
            Ok(ranked.iter().take(limit).cloned().collect())
        }

        async fn playlists(&self) -> Result<Vec<Playlist>> {
            Ok(self.playlists.lock().unwrap().clone())
        }

        async fn playlist_tracks(&self, playlist_id: &str) -> Result<Vec<PlaylistTrack>> {
            let scripted = self.playlist_tracks.lock().unwrap();
            match scripted.get(playlist_id) {
                Some(Ok(tracks)) => Ok(tracks.clone()),
                Some(Err(AppError::NotFound(msg))) => Err(AppError::NotFound(msg.clone())),
                Some(Err(_)) => Err(AppError::Upstream("scripted failure".into())),
                None => Ok(Vec::new()),
            }
        }

        async fn saved_tracks(&self) -> Result<(u32, Vec<SavedTrack>)> {
            let tracks = self.saved_tracks.lock().unwrap().clone();
            Ok((tracks.len() as u32, tracks))
        }

        async fn saved_albums(&self) -> Result<(u32, Vec<SavedAlbum>)> {
            let albums = self.saved_albums.lock().unwrap().clone();
            Ok((albums.len() as u32, albums))
        }

        async fn audio_features(&self, track_id: &str) -> Result<AudioFeatures> {
            self.feature_calls.fetch_add(1, Ordering::SeqCst);
            let features = self.features.lock().unwrap();
            features
                .get(track_id)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("audio features for {track_id}")))
        }
    }
}
