use serde::Serialize;
use serde_json::{json, Value};

use crate::models::{Snapshot, TimeRange, TopKind};
use crate::services::poller::sanitize_username;

/// List attributes are capped so sensor payloads stay small; exports exist
/// for the full data.
const ATTRIBUTE_CAP: usize = 20;

const STATE_UNAVAILABLE: &str = "unavailable";
const STATE_UNKNOWN: &str = "unknown";

/// One sensor's externally visible state, derived from an account snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SensorRecord {
    /// Stable identifier, e.g. `ian_top_artists_4weeks`.
    pub id: String,
    pub name: String,
    pub state: Value,
    pub attributes: Value,
}

struct RecordSet<'a> {
    slug: String,
    username: &'a str,
    available: bool,
    records: Vec<SensorRecord>,
}

impl RecordSet<'_> {
    fn push(&mut self, key: &str, name: &str, state: Option<Value>, attributes: Value) {
        let state = if !self.available {
            Value::String(STATE_UNAVAILABLE.to_string())
        } else {
            state.unwrap_or_else(|| Value::String(STATE_UNKNOWN.to_string()))
        };
        self.records.push(SensorRecord {
            id: format!("{}_{}", self.slug, key),
            name: format!("{} {}", self.username, name),
            state,
            attributes,
        });
    }
}

/// Derive the twelve per-account sensors from a snapshot.
///
/// A sensor whose cycle has not completed yet reads `unknown`; every sensor
/// reads `unavailable` once the account's polling has been halted.
pub fn sensor_records(username: &str, snapshot: &Snapshot) -> Vec<SensorRecord> {
    let mut set = RecordSet {
        slug: sanitize_username(username),
        username,
        available: snapshot.available,
        records: Vec::with_capacity(12),
    };

    match &snapshot.now_playing {
        Some(playing) => {
            let mut attributes = serde_json::Map::new();
            attributes.insert("status".to_string(), json!(playing.status.as_str()));
            if let Some(track) = &playing.track {
                if let Value::Object(fields) = to_value(track) {
                    attributes.extend(fields);
                }
            }
            set.push(
                "now_playing",
                "Now Playing",
                Some(Value::String(playing.status.as_str().to_string())),
                Value::Object(attributes),
            );
        }
        None => set.push("now_playing", "Now Playing", None, json!({})),
    }

    match &snapshot.recently_played {
        Some(recent) => set.push(
            "recently_played",
            "Recently Played",
            recent
                .last_played
                .map(|at| Value::String(at.to_rfc3339())),
            json!({
                "count": recent.count,
                "tracks": capped(&recent.tracks),
            }),
        ),
        None => set.push(
            "recently_played",
            "Recently Played",
            None,
            json!({}),
        ),
    }

    match &snapshot.followed_artists {
        Some(followed) => set.push(
            "followed_artists",
            "Followed Artists",
            Some(json!(followed.count)),
            json!({
                "count": followed.count,
                "artists": capped(&followed.artists),
            }),
        ),
        None => set.push(
            "followed_artists",
            "Followed Artists",
            None,
            json!({}),
        ),
    }

    for kind in [TopKind::Artists, TopKind::Tracks] {
        for range in TimeRange::ALL {
            let key = format!("top_{}_{}", kind.as_str(), range.label());
            let name = format!("Top {} {}", kind.title(), range.label());
            let (state, attributes) = match kind {
                TopKind::Artists => match snapshot.top_artists.get(&range) {
                    Some(ranked) => (
                        Some(json!(ranked.count)),
                        json!({
                            "period": range.as_str(),
                            "count": ranked.count,
                            "artists": capped(&ranked.artists),
                        }),
                    ),
                    None => (None, json!({})),
                },
                TopKind::Tracks => match snapshot.top_tracks.get(&range) {
                    Some(ranked) => (
                        Some(json!(ranked.count)),
                        json!({
                            "period": range.as_str(),
                            "count": ranked.count,
                            "tracks": capped(&ranked.tracks),
                        }),
                    ),
                    None => (None, json!({})),
                },
            };
            set.push(&key, &name, state, attributes);
        }
    }

    match &snapshot.playlists {
        Some(index) => set.push(
            "playlists",
            "Playlists",
            Some(json!(index.count)),
            json!({
                "count": index.count,
                "playlists": capped(&index.playlists),
            }),
        ),
        None => set.push("playlists", "Playlists", None, json!({})),
    }

    match &snapshot.saved_tracks {
        Some(saved) => set.push(
            "saved_tracks",
            "Saved Tracks",
            Some(json!(saved.total)),
            json!({
                "total": saved.total,
                "tracks": capped(&saved.tracks),
            }),
        ),
        None => set.push(
            "saved_tracks",
            "Saved Tracks",
            None,
            json!({}),
        ),
    }

    match &snapshot.saved_albums {
        Some(saved) => set.push(
            "saved_albums",
            "Saved Albums",
            Some(json!(saved.total)),
            json!({
                "total": saved.total,
                "albums": capped(&saved.albums),
            }),
        ),
        None => set.push(
            "saved_albums",
            "Saved Albums",
            None,
            json!({}),
        ),
    }

    set.records
}

fn to_value<T: Serialize + ?Sized>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn capped<T: Serialize>(items: &[T]) -> Value {
    to_value(&items[..items.len().min(ATTRIBUTE_CAP)])
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::models::{
        FollowedArtists, NowPlayingState, RankedArtists, RecentlyPlayed, Snapshot,
    };
    use crate::services::gateway::test_fixtures::*;

    #[test]
    fn fresh_snapshot_reports_twelve_unknown_sensors() {
        let records = sensor_records("Ian Smith", &Snapshot::default());

        assert_eq!(records.len(), 12);
        for record in &records {
            assert!(record.id.starts_with("ian_smith_"));
            assert_eq!(record.state, "unknown");
        }
    }

    #[test]
    fn halted_account_reads_unavailable_everywhere() {
        let snapshot = Snapshot {
            available: false,
            now_playing: Some(NowPlayingState::from_playback(Some(now_playing_track(
                "one",
            )))),
            ..Snapshot::default()
        };

        let records = sensor_records("ian", &snapshot);
        for record in &records {
            assert_eq!(record.state, "unavailable");
        }
    }

    #[test]
    fn now_playing_state_is_the_playback_status() {
        let snapshot = Snapshot {
            now_playing: Some(NowPlayingState::from_playback(Some(now_playing_track(
                "one",
            )))),
            ..Snapshot::default()
        };

        let records = sensor_records("ian", &snapshot);
        let sensor = records.iter().find(|r| r.id == "ian_now_playing").unwrap();
        assert_eq!(sensor.state, "playing");
        assert_eq!(sensor.attributes["track_name"], "one");

        let idle = Snapshot {
            now_playing: Some(NowPlayingState::from_playback(None)),
            ..Snapshot::default()
        };
        let records = sensor_records("ian", &idle);
        let sensor = records.iter().find(|r| r.id == "ian_now_playing").unwrap();
        assert_eq!(sensor.state, "idle");
    }

    #[test]
    fn recently_played_state_is_the_last_play_timestamp() {
        let events = vec![play_event(1), play_event(2)];
        let last_played = events[0].played_at;
        let snapshot = Snapshot {
            recently_played: Some(RecentlyPlayed::new(events)),
            ..Snapshot::default()
        };

        let records = sensor_records("ian", &snapshot);
        let sensor = records
            .iter()
            .find(|r| r.id == "ian_recently_played")
            .unwrap();
        assert_eq!(sensor.state, last_played.to_rfc3339());
        assert_eq!(sensor.attributes["count"], 2);
    }

    #[test]
    fn list_attributes_are_capped_at_twenty() {
        let artists = (0..45).map(artist).collect::<Vec<_>>();
        let snapshot = Snapshot {
            followed_artists: Some(FollowedArtists {
                count: artists.len(),
                artists,
            }),
            ..Snapshot::default()
        };

        let records = sensor_records("ian", &snapshot);
        let sensor = records
            .iter()
            .find(|r| r.id == "ian_followed_artists")
            .unwrap();
        // State keeps the true total; only the attribute list is truncated.
        assert_eq!(sensor.state, 45);
        assert_eq!(sensor.attributes["artists"].as_array().unwrap().len(), 20);
    }

    #[test]
    fn top_stats_sensors_carry_their_period() {
        let ranked = RankedArtists {
            period: TimeRange::MediumTerm,
            count: 2,
            artists: vec![ranked_artist(1), ranked_artist(2)],
        };
        let snapshot = Snapshot {
            top_artists: HashMap::from([(TimeRange::MediumTerm, ranked)]),
            ..Snapshot::default()
        };

        let records = sensor_records("ian", &snapshot);
        let sensor = records
            .iter()
            .find(|r| r.id == "ian_top_artists_6months")
            .unwrap();
        assert_eq!(sensor.state, 2);
        assert_eq!(sensor.attributes["period"], "medium_term");

        // The other ranges exist but have no data yet.
        let other = records
            .iter()
            .find(|r| r.id == "ian_top_artists_alltime")
            .unwrap();
        assert_eq!(other.state, "unknown");
    }
}
