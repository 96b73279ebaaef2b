use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

use crate::error::{AppError, Result};
use crate::models::{
    AccountConfig, FollowedArtists, NowPlayingState, PlaylistIndex, RankedArtists, RankedTracks,
    RecentlyPlayed, SavedAlbums, SavedTracks, Snapshot, TimeRange,
};
use crate::services::{ClientCredentials, SpotifyClient, StreamingGateway};

pub const DEFAULT_NOW_PLAYING_INTERVAL: u64 = 30;
pub const MIN_NOW_PLAYING_INTERVAL: u64 = 30;
pub const DEFAULT_RECENTLY_PLAYED_INTERVAL: u64 = 300;
pub const MIN_RECENTLY_PLAYED_INTERVAL: u64 = 300;
/// Followed artists and library listings refresh hourly.
pub const LIBRARY_INTERVAL: u64 = 3600;
/// Top artists/tracks statistics refresh daily.
pub const TOP_STATS_INTERVAL: u64 = 86_400;

/// How much listening history each recently-played cycle keeps.
const RECENTLY_PLAYED_LIMIT: usize = 50;
const TOP_LIMIT: usize = 50;

/// The four refresh cycles each account runs independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cycle {
    NowPlaying,
    RecentlyPlayed,
    Library,
    TopStats,
}

impl Cycle {
    fn name(self) -> &'static str {
        match self {
            Cycle::NowPlaying => "now_playing",
            Cycle::RecentlyPlayed => "recently_played",
            Cycle::Library => "library",
            Cycle::TopStats => "top_stats",
        }
    }
}

/// Per-account scheduler state: one gateway handle, one snapshot, four timers.
pub struct AccountPoller {
    username: String,
    gateway: Arc<dyn StreamingGateway>,
    snapshot: Arc<RwLock<Snapshot>>,
    now_playing_interval: watch::Sender<Duration>,
    recently_played_interval: watch::Sender<Duration>,
    library_interval: watch::Sender<Duration>,
    top_stats_interval: watch::Sender<Duration>,
    shutdown: watch::Sender<bool>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl AccountPoller {
    pub fn new(config: &AccountConfig, gateway: Arc<dyn StreamingGateway>) -> Self {
        let now_playing = config
            .now_playing_interval
            .unwrap_or(DEFAULT_NOW_PLAYING_INTERVAL)
            .max(MIN_NOW_PLAYING_INTERVAL);
        let recently_played = config
            .recently_played_interval
            .unwrap_or(DEFAULT_RECENTLY_PLAYED_INTERVAL)
            .max(MIN_RECENTLY_PLAYED_INTERVAL);

        let (now_playing_interval, _) = watch::channel(Duration::from_secs(now_playing));
        let (recently_played_interval, _) = watch::channel(Duration::from_secs(recently_played));
        let (library_interval, _) = watch::channel(Duration::from_secs(LIBRARY_INTERVAL));
        let (top_stats_interval, _) = watch::channel(Duration::from_secs(TOP_STATS_INTERVAL));
        let (shutdown, _) = watch::channel(false);

        Self {
            username: config.username.clone(),
            gateway,
            snapshot: Arc::new(RwLock::new(Snapshot::default())),
            now_playing_interval,
            recently_played_interval,
            library_interval,
            top_stats_interval,
            shutdown,
            tasks: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn gateway(&self) -> Arc<dyn StreamingGateway> {
        self.gateway.clone()
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.snapshot.read().await.clone()
    }

    /// Start the four polling tasks. Each runs an immediate fetch, then
    /// sleeps for its current interval.
    pub fn spawn(self: &Arc<Self>) {
        let cycles = [
            (Cycle::NowPlaying, self.now_playing_interval.subscribe()),
            (
                Cycle::RecentlyPlayed,
                self.recently_played_interval.subscribe(),
            ),
            (Cycle::Library, self.library_interval.subscribe()),
            (Cycle::TopStats, self.top_stats_interval.subscribe()),
        ];

        let mut tasks = self.tasks.lock().unwrap();
        for (cycle, interval) in cycles {
            tasks.push(tokio::spawn(self.clone().run_cycle(cycle, interval)));
        }
    }

    /// Stop all cycles for this account.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let mut tasks = self.tasks.lock().unwrap();
        for task in tasks.drain(..) {
            task.abort();
        }
    }

    /// Apply new intervals, clamped to their floors. Returns the applied
    /// (now_playing, recently_played) values in seconds. A changed timer
    /// refreshes immediately and then follows the new cadence; the other
    /// cycles are untouched.
    pub fn set_intervals(
        &self,
        now_playing: Option<u64>,
        recently_played: Option<u64>,
    ) -> (u64, u64) {
        if let Some(secs) = now_playing {
            let clamped = secs.max(MIN_NOW_PLAYING_INTERVAL);
            if clamped != secs {
                tracing::debug!(
                    "Clamped now_playing interval from {}s to {}s for {}",
                    secs,
                    clamped,
                    self.username
                );
            }
            self.now_playing_interval
                .send_replace(Duration::from_secs(clamped));
        }

        if let Some(secs) = recently_played {
            let clamped = secs.max(MIN_RECENTLY_PLAYED_INTERVAL);
            if clamped != secs {
                tracing::debug!(
                    "Clamped recently_played interval from {}s to {}s for {}",
                    secs,
                    clamped,
                    self.username
                );
            }
            self.recently_played_interval
                .send_replace(Duration::from_secs(clamped));
        }

        (
            self.now_playing_interval.borrow().as_secs(),
            self.recently_played_interval.borrow().as_secs(),
        )
    }

    async fn run_cycle(self: Arc<Self>, cycle: Cycle, interval: watch::Receiver<Duration>) {
        let mut interval = interval;
        let mut shutdown = self.shutdown.subscribe();

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.tick(cycle).await;

            if *shutdown.borrow() {
                break;
            }

            let period = *interval.borrow();
            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                // Interval changed: fall through to an immediate refresh on
                // the new cadence.
                changed = interval.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::debug!("{} cycle stopped for {}", cycle.name(), self.username);
    }

    async fn tick(&self, cycle: Cycle) {
        let result = match cycle {
            Cycle::NowPlaying => self.refresh_now_playing().await,
            Cycle::RecentlyPlayed => self.refresh_recently_played().await,
            Cycle::Library => self.refresh_library().await,
            Cycle::TopStats => self.refresh_top_stats().await,
        };

        // Errors were already recorded; a cycle failure is a no-op for the
        // snapshot and the next tick retries naturally.
        let _ = result;
    }

    /// Fetch current playback and replace the now-playing snapshot field.
    /// Also the forced-refresh control operation.
    pub async fn refresh_now_playing(&self) -> Result<()> {
        match self.gateway.now_playing().await {
            Ok(playback) => {
                let state = NowPlayingState::from_playback(playback);
                let mut snapshot = self.snapshot.write().await;
                snapshot.now_playing = Some(state);
                snapshot.last_error = None;
                Ok(())
            }
            Err(err) => Err(self.record_failure("now_playing", err).await),
        }
    }

    async fn refresh_recently_played(&self) -> Result<()> {
        match self.gateway.recently_played(RECENTLY_PLAYED_LIMIT).await {
            Ok(events) => {
                let recent = RecentlyPlayed::new(events);
                let mut snapshot = self.snapshot.write().await;
                snapshot.recently_played = Some(recent);
                snapshot.last_error = None;
                Ok(())
            }
            Err(err) => Err(self.record_failure("recently_played", err).await),
        }
    }

    /// Hourly cycle: followed artists, playlists, saved tracks and saved
    /// albums. Each of the four is written independently on its own success,
    /// so one failing listing leaves the other three fresh.
    async fn refresh_library(&self) -> Result<()> {
        match self.gateway.followed_artists().await {
            Ok(artists) => {
                let followed = FollowedArtists {
                    count: artists.len(),
                    artists,
                };
                self.snapshot.write().await.followed_artists = Some(followed);
            }
            Err(err) => return Err(self.record_failure("followed_artists", err).await),
        }

        match self.gateway.playlists().await {
            Ok(playlists) => {
                let index = PlaylistIndex {
                    count: playlists.len(),
                    playlists,
                };
                self.snapshot.write().await.playlists = Some(index);
            }
            Err(err) => return Err(self.record_failure("playlists", err).await),
        }

        match self.gateway.saved_tracks().await {
            Ok((total, tracks)) => {
                self.snapshot.write().await.saved_tracks = Some(SavedTracks { total, tracks });
            }
            Err(err) => return Err(self.record_failure("saved_tracks", err).await),
        }

        match self.gateway.saved_albums().await {
            Ok((total, albums)) => {
                let mut snapshot = self.snapshot.write().await;
                snapshot.saved_albums = Some(SavedAlbums { total, albums });
                snapshot.last_error = None;
            }
            Err(err) => return Err(self.record_failure("saved_albums", err).await),
        }

        Ok(())
    }

    /// Daily cycle: all six ranked lists, fetched completely before any of
    /// them is written. A failure partway through leaves the prior top stats
    /// untouched as one unit.
    async fn refresh_top_stats(&self) -> Result<()> {
        let mut top_artists = HashMap::new();
        let mut top_tracks = HashMap::new();

        for range in TimeRange::ALL {
            match self.gateway.top_artists(range, TOP_LIMIT).await {
                Ok(artists) => {
                    top_artists.insert(
                        range,
                        RankedArtists {
                            period: range,
                            count: artists.len(),
                            artists,
                        },
                    );
                }
                Err(err) => return Err(self.record_failure("top_artists", err).await),
            }

            match self.gateway.top_tracks(range, TOP_LIMIT).await {
                Ok(tracks) => {
                    top_tracks.insert(
                        range,
                        RankedTracks {
                            period: range,
                            count: tracks.len(),
                            tracks,
                        },
                    );
                }
                Err(err) => return Err(self.record_failure("top_tracks", err).await),
            }
        }

        let mut snapshot = self.snapshot.write().await;
        snapshot.top_artists = top_artists;
        snapshot.top_tracks = top_tracks;
        snapshot.last_error = None;
        Ok(())
    }

    /// Record a cycle failure. Auth failures are fatal for this account's
    /// polling; everything else is logged and retried on the next tick.
    async fn record_failure(&self, what: &str, err: AppError) -> AppError {
        if matches!(err, AppError::Auth(_)) {
            tracing::error!(
                "Authentication failed for {}, halting polling: {}",
                self.username,
                err
            );
            let mut snapshot = self.snapshot.write().await;
            snapshot.available = false;
            snapshot.last_error = Some(err.to_string());
            drop(snapshot);
            let _ = self.shutdown.send(true);
        } else {
            tracing::warn!("Failed to fetch {} for {}: {}", what, self.username, err);
            self.snapshot.write().await.last_error = Some(err.to_string());
        }
        err
    }
}

/// Registry keys and sensor identifiers use a lowercase username with
/// spaces and hyphens collapsed to underscores.
pub fn sanitize_username(username: &str) -> String {
    username.to_lowercase().replace([' ', '-'], "_")
}

type GatewayFactory = Box<dyn Fn(&AccountConfig) -> Arc<dyn StreamingGateway> + Send + Sync>;

/// Owns every tracked account's scheduler, keyed by sanitized username.
pub struct AccountRegistry {
    accounts: RwLock<HashMap<String, Arc<AccountPoller>>>,
    gateway_factory: GatewayFactory,
}

impl AccountRegistry {
    pub fn new(credentials: ClientCredentials) -> Self {
        Self::with_gateway_factory(Box::new(move |config: &AccountConfig| {
            Arc::new(SpotifyClient::new(
                credentials.clone(),
                config.refresh_token.clone(),
            )) as Arc<dyn StreamingGateway>
        }))
    }

    pub fn with_gateway_factory(gateway_factory: GatewayFactory) -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            gateway_factory,
        }
    }

    /// Register an account and start polling it. Re-registering an existing
    /// username replaces its scheduler (and revives one halted on an auth
    /// failure).
    pub async fn register(&self, config: AccountConfig) -> Result<()> {
        let key = sanitize_username(&config.username);
        let gateway = (self.gateway_factory)(&config);
        let poller = Arc::new(AccountPoller::new(&config, gateway));
        poller.spawn();

        let mut accounts = self.accounts.write().await;
        if let Some(previous) = accounts.insert(key, poller) {
            tracing::info!("Replacing scheduler for account {}", config.username);
            previous.shutdown();
        } else {
            tracing::info!("Registered account {}", config.username);
        }

        Ok(())
    }

    /// Stop polling and drop all state for an account.
    pub async fn remove(&self, username: &str) -> Result<()> {
        let key = sanitize_username(username);
        let mut accounts = self.accounts.write().await;
        match accounts.remove(&key) {
            Some(poller) => {
                poller.shutdown();
                tracing::info!("Removed account {}", username);
                Ok(())
            }
            None => Err(AppError::NotFound(format!(
                "No account registered for username: {username}"
            ))),
        }
    }

    pub async fn get(&self, username: &str) -> Result<Arc<AccountPoller>> {
        let key = sanitize_username(username);
        let accounts = self.accounts.read().await;
        accounts.get(&key).cloned().ok_or_else(|| {
            AppError::NotFound(format!("No account registered for username: {username}"))
        })
    }

    pub async fn usernames(&self) -> Vec<String> {
        let accounts = self.accounts.read().await;
        let mut names: Vec<String> = accounts
            .values()
            .map(|p| p.username().to_string())
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::gateway::mock::MockGateway;
    use crate::services::gateway::test_fixtures::{now_playing_track, play_event};

    fn test_account(username: &str) -> AccountConfig {
        AccountConfig {
            username: username.to_string(),
            refresh_token: "refresh".to_string(),
            now_playing_interval: None,
            recently_played_interval: None,
        }
    }

    fn poller_with(gateway: Arc<MockGateway>) -> AccountPoller {
        AccountPoller::new(&test_account("ian"), gateway)
    }

    #[tokio::test]
    async fn intervals_clamp_to_floor() {
        let poller = poller_with(Arc::new(MockGateway::new()));

        let (now_playing, recently_played) = poller.set_intervals(Some(10), Some(60));
        assert_eq!(now_playing, MIN_NOW_PLAYING_INTERVAL);
        assert_eq!(recently_played, MIN_RECENTLY_PLAYED_INTERVAL);

        // Values above the floor pass through untouched.
        let (now_playing, recently_played) = poller.set_intervals(Some(45), Some(900));
        assert_eq!(now_playing, 45);
        assert_eq!(recently_played, 900);
    }

    #[tokio::test]
    async fn unset_interval_leaves_other_timer_alone() {
        let poller = poller_with(Arc::new(MockGateway::new()));

        let (_, recently_played) = poller.set_intervals(Some(60), None);
        assert_eq!(recently_played, DEFAULT_RECENTLY_PLAYED_INTERVAL);
    }

    #[tokio::test]
    async fn failed_fetch_leaves_snapshot_untouched() {
        let gateway = Arc::new(MockGateway::new());
        gateway.push_now_playing(Ok(Some(now_playing_track("first"))));
        gateway.push_now_playing(Err(crate::error::AppError::Upstream("boom".into())));

        let poller = poller_with(gateway);
        poller.refresh_now_playing().await.unwrap();
        let before = poller.snapshot().await;

        let err = poller.refresh_now_playing().await.unwrap_err();
        assert!(matches!(err, AppError::Upstream(_)));

        let after = poller.snapshot().await;
        assert_eq!(after.now_playing, before.now_playing);
        assert!(after.available);
        assert!(after.last_error.is_some());
    }

    #[tokio::test]
    async fn auth_failure_marks_account_unavailable() {
        let gateway = Arc::new(MockGateway::new());
        gateway.push_now_playing(Err(crate::error::AppError::Auth("expired".into())));

        let poller = poller_with(gateway);
        let err = poller.refresh_now_playing().await.unwrap_err();
        assert!(matches!(err, AppError::Auth(_)));

        let snapshot = poller.snapshot().await;
        assert!(!snapshot.available);
        assert!(snapshot.last_error.is_some());
    }

    #[tokio::test]
    async fn concurrent_refreshes_never_interleave() {
        let gateway = Arc::new(MockGateway::new());
        let first = now_playing_track("first");
        let second = now_playing_track("second");
        gateway.push_now_playing(Ok(Some(first.clone())));
        gateway.push_now_playing(Ok(Some(second.clone())));

        let poller = Arc::new(poller_with(gateway));
        let a = poller.clone();
        let b = poller.clone();
        let (ra, rb) = tokio::join!(a.refresh_now_playing(), b.refresh_now_playing());
        ra.unwrap();
        rb.unwrap();

        let snapshot = poller.snapshot().await;
        let state = snapshot.now_playing.expect("now playing fetched");
        let track = state.track.expect("track set");
        assert!(track == first || track == second);
    }

    #[tokio::test]
    async fn recently_played_snapshot_carries_count_and_last_played() {
        let gateway = Arc::new(MockGateway::new());
        let events = vec![play_event(1), play_event(2), play_event(3)];
        *gateway.play_events.lock().unwrap() = events.clone();

        let poller = poller_with(gateway);
        poller.refresh_recently_played().await.unwrap();

        let snapshot = poller.snapshot().await;
        let recent = snapshot.recently_played.expect("recently played fetched");
        assert_eq!(recent.count, 3);
        assert_eq!(recent.tracks, events);
        assert_eq!(recent.last_played, Some(events[0].played_at));
    }

    #[tokio::test]
    async fn registry_lookup_is_case_insensitive() {
        let registry = AccountRegistry::with_gateway_factory(Box::new(|_| {
            Arc::new(MockGateway::new()) as Arc<dyn StreamingGateway>
        }));

        registry.register(test_account("Ian Smith")).await.unwrap();
        let poller = registry.get("ian smith").await.unwrap();
        assert_eq!(poller.username(), "Ian Smith");

        assert!(registry.get("nobody").await.is_err());
        registry.remove("IAN SMITH").await.unwrap();
        assert!(registry.get("ian smith").await.is_err());
    }
}
