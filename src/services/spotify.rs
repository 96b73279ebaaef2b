use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::{
    Artist, ArtistDetail, ArtistImage, AudioFeatures, NowPlaying, PlayEvent, Playlist,
    PlaylistTrack, RankedArtist, RankedTrack, SavedAlbum, SavedTrack, TimeRange,
};
use crate::services::StreamingGateway;

const API_BASE: &str = "https://api.spotify.com/v1";
const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

/// Spotify returns at most 50 items per page on listing endpoints.
const PAGE_LIMIT: usize = 50;

/// Per-client request ceiling; Spotify enforces a rolling 30s window.
const REQUESTS_PER_SECOND: u32 = 10;

/// Cap honored for a Retry-After hint before giving up on a call.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);

const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Refresh tokens a minute before Spotify says they expire.
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl ClientCredentials {
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self {
            client_id,
            client_secret,
        }
    }
}

#[derive(Debug, Clone)]
struct TokenState {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Authenticated Spotify Web API client for a single account.
///
/// Token refresh is serialized behind a mutex: concurrent callers hitting an
/// expired token block on the same refresh instead of issuing duplicates.
pub struct SpotifyClient {
    http: reqwest::Client,
    credentials: ClientCredentials,
    refresh_token: String,
    token: Mutex<Option<TokenState>>,
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct Paging<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    next: Option<String>,
    total: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ExternalUrls {
    spotify: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiImage {
    url: String,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ApiArtistRef {
    id: Option<String>,
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiAlbumRef {
    id: Option<String>,
    name: String,
    #[serde(default)]
    images: Vec<ApiImage>,
}

#[derive(Debug, Deserialize)]
struct ApiTrack {
    id: Option<String>,
    name: String,
    #[serde(default)]
    duration_ms: u64,
    #[serde(default)]
    popularity: u32,
    #[serde(default)]
    explicit: bool,
    external_urls: ExternalUrls,
    #[serde(default)]
    artists: Vec<ApiArtistRef>,
    album: Option<ApiAlbumRef>,
}

#[derive(Debug, Deserialize)]
struct CurrentPlayback {
    is_playing: bool,
    progress_ms: Option<u64>,
    #[serde(default)]
    shuffle_state: bool,
    #[serde(default = "default_repeat_state")]
    repeat_state: String,
    item: Option<ApiTrack>,
}

fn default_repeat_state() -> String {
    "off".to_string()
}

#[derive(Debug, Deserialize)]
struct PlayHistoryItem {
    played_at: DateTime<Utc>,
    track: ApiTrack,
}

#[derive(Debug, Deserialize)]
struct FollowedArtistsPage {
    artists: CursorPaging,
}

#[derive(Debug, Deserialize)]
struct CursorPaging {
    #[serde(default = "Vec::new")]
    items: Vec<ApiFullArtist>,
    cursors: Option<Cursors>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Cursors {
    after: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Followers {
    #[serde(default)]
    total: u64,
}

#[derive(Debug, Deserialize)]
struct ApiFullArtist {
    id: String,
    name: String,
    uri: String,
    external_urls: ExternalUrls,
    followers: Option<Followers>,
    #[serde(default)]
    genres: Vec<String>,
    #[serde(default)]
    images: Vec<ApiImage>,
    #[serde(default)]
    popularity: u32,
}

#[derive(Debug, Deserialize)]
struct ApiPlaylistOwner {
    id: String,
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiPlaylistTracksRef {
    #[serde(default)]
    total: u32,
}

#[derive(Debug, Deserialize)]
struct ApiPlaylist {
    id: String,
    name: String,
    uri: String,
    external_urls: ExternalUrls,
    tracks: ApiPlaylistTracksRef,
    description: Option<String>,
    public: Option<bool>,
    #[serde(default)]
    collaborative: bool,
    owner: ApiPlaylistOwner,
}

#[derive(Debug, Deserialize)]
struct PlaylistTrackItem {
    added_at: Option<DateTime<Utc>>,
    track: Option<ApiTrack>,
}

#[derive(Debug, Deserialize)]
struct SavedTrackItem {
    added_at: Option<DateTime<Utc>>,
    track: Option<ApiTrack>,
}

#[derive(Debug, Deserialize)]
struct ApiAlbum {
    id: Option<String>,
    name: String,
    uri: String,
    external_urls: ExternalUrls,
    #[serde(default)]
    artists: Vec<ApiArtistRef>,
    #[serde(default)]
    total_tracks: u32,
    #[serde(default)]
    release_date: String,
}

#[derive(Debug, Deserialize)]
struct SavedAlbumItem {
    added_at: Option<DateTime<Utc>>,
    album: Option<ApiAlbum>,
}

impl SpotifyClient {
    pub fn new(credentials: ClientCredentials, refresh_token: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(CALL_TIMEOUT)
            .build()
            .expect("reqwest client");

        let quota = Quota::per_second(NonZeroU32::new(REQUESTS_PER_SECOND).unwrap());

        Self {
            http,
            credentials,
            refresh_token,
            token: Mutex::new(None),
            limiter: RateLimiter::direct(quota),
        }
    }

    /// Valid bearer token, refreshing through the shared mutex when expired.
    async fn access_token(&self) -> Result<String> {
        let mut token = self.token.lock().await;

        if let Some(state) = token.as_ref() {
            let margin = chrono::Duration::seconds(TOKEN_EXPIRY_MARGIN_SECS);
            if state.expires_at > Utc::now() + margin {
                return Ok(state.access_token.clone());
            }
        }

        let refreshed = self.refresh_access_token().await?;
        let access_token = refreshed.access_token.clone();
        *token = Some(refreshed);
        Ok(access_token)
    }

    /// Called after a 401. If another caller already swapped the token while
    /// we waited on the lock, reuse theirs instead of refreshing again.
    async fn token_after_unauthorized(&self, stale: &str) -> Result<String> {
        let mut token = self.token.lock().await;

        if let Some(state) = token.as_ref() {
            if state.access_token != stale {
                return Ok(state.access_token.clone());
            }
        }

        let refreshed = self.refresh_access_token().await?;
        let access_token = refreshed.access_token.clone();
        *token = Some(refreshed);
        Ok(access_token)
    }

    async fn refresh_access_token(&self) -> Result<TokenState> {
        tracing::debug!("Refreshing Spotify access token");

        let response = self
            .http
            .post(TOKEN_URL)
            .basic_auth(
                &self.credentials.client_id,
                Some(&self.credentials.client_secret),
            )
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", self.refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("Token request failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Auth(format!(
                "Token refresh rejected ({status}): {body}"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!(
                "Token endpoint returned {status}: {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("Failed to parse token response: {e}")))?;

        let lifetime = chrono::Duration::seconds(token.expires_in.max(TOKEN_EXPIRY_MARGIN_SECS));
        Ok(TokenState {
            access_token: token.access_token,
            expires_at: Utc::now() + lifetime,
        })
    }

    /// GET a JSON document. Returns None on 204 (nothing playing).
    ///
    /// One retry after a token refresh on 401 and one retry after honoring a
    /// Retry-After hint on 429; everything else maps straight to the error
    /// taxonomy.
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>> {
        let mut token = self.access_token().await?;
        let mut auth_retried = false;
        let mut rate_retried = false;

        loop {
            self.limiter.until_ready().await;

            let response = self
                .http
                .get(url)
                .query(query)
                .bearer_auth(&token)
                .send()
                .await
                .map_err(|e| AppError::Upstream(format!("Request failed: {e}")))?;

            let status = response.status();

            if status == StatusCode::NO_CONTENT {
                return Ok(None);
            }

            if status == StatusCode::UNAUTHORIZED {
                if auth_retried {
                    return Err(AppError::Auth(
                        "Access token rejected after refresh".to_string(),
                    ));
                }
                auth_retried = true;
                token = self.token_after_unauthorized(&token).await?;
                continue;
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(Duration::from_secs)
                    .unwrap_or(Duration::from_secs(1));

                if rate_retried || retry_after > MAX_RETRY_AFTER {
                    return Err(AppError::RateLimited(format!(
                        "Spotify asked to retry after {}s",
                        retry_after.as_secs()
                    )));
                }
                rate_retried = true;
                tracing::debug!("Rate limited, waiting {:?} before retry", retry_after);
                tokio::time::sleep(retry_after).await;
                continue;
            }

            if status == StatusCode::NOT_FOUND {
                return Err(AppError::NotFound(format!("{url} returned 404")));
            }
            if status == StatusCode::FORBIDDEN {
                return Err(AppError::NotFound(format!("{url} returned 403")));
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                tracing::error!("Spotify API error: {} - {}", status, body);
                return Err(AppError::Upstream(format!(
                    "API returned status: {status} - {body}"
                )));
            }

            let parsed = response
                .json::<T>()
                .await
                .map_err(|e| AppError::Upstream(format!("Failed to parse response: {e}")))?;
            return Ok(Some(parsed));
        }
    }

    /// Like [`get_json`] but for endpoints that always carry a body.
    async fn get_body<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        self.get_json(url, query)
            .await?
            .ok_or_else(|| AppError::Upstream(format!("{url} returned an empty response")))
    }
}

fn map_track_summary(track: ApiTrack) -> Option<(String, ApiTrack)> {
    match &track.id {
        Some(id) if !track.artists.is_empty() => Some((id.clone(), track)),
        _ => {
            tracing::warn!("Skipping track with missing data: {}", track.name);
            None
        }
    }
}

fn map_now_playing(playback: CurrentPlayback) -> Option<NowPlaying> {
    let track = playback.item?;
    let (id, track) = map_track_summary(track)?;
    let artist = &track.artists[0];
    let album = track.album.as_ref();

    Some(NowPlaying {
        track_id: id,
        track_name: track.name.clone(),
        artist_id: artist.id.clone().unwrap_or_default(),
        artist_name: artist.name.clone(),
        album_id: album.and_then(|a| a.id.clone()).unwrap_or_default(),
        album_name: album.map(|a| a.name.clone()).unwrap_or_default(),
        image_url: album.and_then(|a| a.images.first().map(|i| i.url.clone())),
        duration_ms: track.duration_ms,
        progress_ms: playback.progress_ms.unwrap_or(0),
        popularity: track.popularity,
        track_url: track.external_urls.spotify.clone().unwrap_or_default(),
        is_playing: playback.is_playing,
        shuffle_state: playback.shuffle_state,
        repeat_state: playback.repeat_state,
    })
}

fn map_play_event(item: PlayHistoryItem) -> Option<PlayEvent> {
    let (id, track) = map_track_summary(item.track)?;
    let artist = &track.artists[0];
    let album = track.album.as_ref();

    Some(PlayEvent {
        played_at: item.played_at,
        track_id: id,
        track_name: track.name.clone(),
        artist_id: artist.id.clone().unwrap_or_default(),
        artist_name: artist.name.clone(),
        album_id: album.and_then(|a| a.id.clone()).unwrap_or_default(),
        album_name: album.map(|a| a.name.clone()).unwrap_or_default(),
        track_url: track.external_urls.spotify.clone().unwrap_or_default(),
        duration_ms: track.duration_ms,
        popularity: track.popularity,
        explicit: track.explicit,
    })
}

fn map_artist(artist: ApiFullArtist) -> Artist {
    Artist {
        image: artist.images.first().map(|i| i.url.clone()),
        url: artist.external_urls.spotify.unwrap_or_default(),
        id: artist.id,
        name: artist.name,
        genres: artist.genres,
        popularity: artist.popularity,
    }
}

fn map_artist_detail(artist: ApiFullArtist) -> ArtistDetail {
    ArtistDetail {
        url: artist.external_urls.spotify.unwrap_or_default(),
        followers: artist.followers.map(|f| f.total).unwrap_or(0),
        images: artist
            .images
            .into_iter()
            .map(|i| ArtistImage {
                url: i.url,
                width: i.width,
                height: i.height,
            })
            .collect(),
        id: artist.id,
        name: artist.name,
        uri: artist.uri,
        genres: artist.genres,
        popularity: artist.popularity,
    }
}

fn map_playlist(playlist: ApiPlaylist) -> Playlist {
    Playlist {
        url: playlist.external_urls.spotify.unwrap_or_default(),
        tracks_total: playlist.tracks.total,
        description: playlist.description.unwrap_or_default(),
        public: playlist.public.unwrap_or(false),
        owner: playlist
            .owner
            .display_name
            .unwrap_or_else(|| playlist.owner.id.clone()),
        owner_id: playlist.owner.id,
        id: playlist.id,
        name: playlist.name,
        uri: playlist.uri,
        collaborative: playlist.collaborative,
    }
}

#[async_trait]
impl StreamingGateway for SpotifyClient {
    async fn now_playing(&self) -> Result<Option<NowPlaying>> {
        let url = format!("{API_BASE}/me/player");
        let playback: Option<CurrentPlayback> = self.get_json(&url, &[]).await?;
        Ok(playback.and_then(map_now_playing))
    }

    async fn recently_played(&self, limit: usize) -> Result<Vec<PlayEvent>> {
        let url = format!("{API_BASE}/me/player/recently-played");
        let limit = limit.min(PAGE_LIMIT);
        let page: Paging<PlayHistoryItem> = self
            .get_body(&url, &[("limit", limit.to_string())])
            .await?;
        Ok(page.items.into_iter().filter_map(map_play_event).collect())
    }

    async fn followed_artists(&self) -> Result<Vec<Artist>> {
        let url = format!("{API_BASE}/me/following");
        let mut artists = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let mut query = vec![
                ("type", "artist".to_string()),
                ("limit", PAGE_LIMIT.to_string()),
            ];
            if let Some(cursor) = &after {
                query.push(("after", cursor.clone()));
            }

            let page: FollowedArtistsPage = self.get_body(&url, &query).await?;
            artists.extend(page.artists.items.into_iter().map(map_artist));

            if page.artists.next.is_none() {
                break;
            }
            after = page.artists.cursors.and_then(|c| c.after);
            if after.is_none() {
                break;
            }
        }

        Ok(artists)
    }

    async fn artist(&self, id: &str) -> Result<ArtistDetail> {
        let url = format!("{API_BASE}/artists/{id}");
        let artist: ApiFullArtist = self.get_body(&url, &[]).await?;
        Ok(map_artist_detail(artist))
    }

    async fn top_artists(&self, range: TimeRange, limit: usize) -> Result<Vec<RankedArtist>> {
        let url = format!("{API_BASE}/me/top/artists");
        let limit = limit.min(PAGE_LIMIT);
        let page: Paging<ApiFullArtist> = self
            .get_body(
                &url,
                &[
                    ("time_range", range.as_str().to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        Ok(page
            .items
            .into_iter()
            .enumerate()
            .map(|(idx, artist)| RankedArtist {
                rank: idx as u32 + 1,
                url: artist.external_urls.spotify.unwrap_or_default(),
                id: artist.id,
                name: artist.name,
                genres: artist.genres,
                popularity: artist.popularity,
            })
            .collect())
    }

    async fn top_tracks(&self, range: TimeRange, limit: usize) -> Result<Vec<RankedTrack>> {
        let url = format!("{API_BASE}/me/top/tracks");
        let limit = limit.min(PAGE_LIMIT);
        let page: Paging<ApiTrack> = self
            .get_body(
                &url,
                &[
                    ("time_range", range.as_str().to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        Ok(page
            .items
            .into_iter()
            .filter_map(map_track_summary)
            .enumerate()
            .map(|(idx, (id, track))| RankedTrack {
                id,
                rank: idx as u32 + 1,
                artist_id: track.artists[0].id.clone().unwrap_or_default(),
                artist_name: track.artists[0].name.clone(),
                album_name: track.album.as_ref().map(|a| a.name.clone()).unwrap_or_default(),
                url: track.external_urls.spotify.unwrap_or_default(),
                name: track.name,
                popularity: track.popularity,
            })
            .collect())
    }

    async fn playlists(&self) -> Result<Vec<Playlist>> {
        let url = format!("{API_BASE}/me/playlists");
        let mut playlists = Vec::new();
        let mut offset = 0usize;

        loop {
            let page: Paging<ApiPlaylist> = self
                .get_body(
                    &url,
                    &[
                        ("limit", PAGE_LIMIT.to_string()),
                        ("offset", offset.to_string()),
                    ],
                )
                .await?;

            let fetched = page.items.len();
            playlists.extend(page.items.into_iter().map(map_playlist));

            if page.next.is_none() || fetched == 0 {
                break;
            }
            offset += fetched;
        }

        Ok(playlists)
    }

    async fn playlist_tracks(&self, playlist_id: &str) -> Result<Vec<PlaylistTrack>> {
        let url = format!("{API_BASE}/playlists/{playlist_id}/tracks");
        let mut tracks = Vec::new();
        let mut offset = 0usize;

        loop {
            let page: Paging<PlaylistTrackItem> = self
                .get_body(
                    &url,
                    &[
                        ("limit", "100".to_string()),
                        ("offset", offset.to_string()),
                    ],
                )
                .await?;

            let fetched = page.items.len();
            tracks.extend(page.items.into_iter().filter_map(|item| {
                let (id, track) = map_track_summary(item.track?)?;
                Some(PlaylistTrack {
                    added_at: item.added_at,
                    track_id: id,
                    artist_id: track.artists[0].id.clone().unwrap_or_default(),
                    artist_name: track.artists[0].name.clone(),
                    album_name: track.album.as_ref().map(|a| a.name.clone()).unwrap_or_default(),
                    track_name: track.name,
                    duration_ms: track.duration_ms,
                })
            }));

            if page.next.is_none() || fetched == 0 {
                break;
            }
            offset += fetched;
        }

        Ok(tracks)
    }

    async fn saved_tracks(&self) -> Result<(u32, Vec<SavedTrack>)> {
        let url = format!("{API_BASE}/me/tracks");
        let mut total = 0u32;
        let mut tracks = Vec::new();
        let mut offset = 0usize;

        loop {
            let page: Paging<SavedTrackItem> = self
                .get_body(
                    &url,
                    &[
                        ("limit", PAGE_LIMIT.to_string()),
                        ("offset", offset.to_string()),
                    ],
                )
                .await?;

            total = page.total.unwrap_or(total);
            let fetched = page.items.len();
            tracks.extend(page.items.into_iter().filter_map(|item| {
                let (id, track) = map_track_summary(item.track?)?;
                let album = track.album.as_ref();
                Some(SavedTrack {
                    uri: format!("spotify:track:{id}"),
                    id,
                    artist_id: track.artists[0].id.clone().unwrap_or_default(),
                    artist_name: track.artists[0].name.clone(),
                    album_id: album.and_then(|a| a.id.clone()).unwrap_or_default(),
                    album_name: album.map(|a| a.name.clone()).unwrap_or_default(),
                    url: track.external_urls.spotify.clone().unwrap_or_default(),
                    name: track.name,
                    duration_ms: track.duration_ms,
                    popularity: track.popularity,
                    added_at: item.added_at,
                })
            }));

            if page.next.is_none() || fetched == 0 {
                break;
            }
            offset += fetched;
        }

        Ok((total, tracks))
    }

    async fn saved_albums(&self) -> Result<(u32, Vec<SavedAlbum>)> {
        let url = format!("{API_BASE}/me/albums");
        let mut total = 0u32;
        let mut albums = Vec::new();
        let mut offset = 0usize;

        loop {
            let page: Paging<SavedAlbumItem> = self
                .get_body(
                    &url,
                    &[
                        ("limit", PAGE_LIMIT.to_string()),
                        ("offset", offset.to_string()),
                    ],
                )
                .await?;

            total = page.total.unwrap_or(total);
            let fetched = page.items.len();
            albums.extend(page.items.into_iter().filter_map(|item| {
                let album = item.album?;
                let id = match album.id {
                    Some(id) if !album.artists.is_empty() => id,
                    _ => {
                        tracing::warn!("Skipping saved album with missing data: {}", album.name);
                        return None;
                    }
                };
                Some(SavedAlbum {
                    artist_id: album.artists[0].id.clone().unwrap_or_default(),
                    artist_name: album.artists[0].name.clone(),
                    url: album.external_urls.spotify.unwrap_or_default(),
                    id,
                    name: album.name,
                    uri: album.uri,
                    total_tracks: album.total_tracks,
                    release_date: album.release_date,
                    added_at: item.added_at,
                })
            }));

            if page.next.is_none() || fetched == 0 {
                break;
            }
            offset += fetched;
        }

        Ok((total, albums))
    }

    async fn audio_features(&self, track_id: &str) -> Result<AudioFeatures> {
        let url = format!("{API_BASE}/audio-features/{track_id}");
        self.get_body(&url, &[]).await
    }
}
