use serde::{Deserialize, Serialize};
use validator::Validate;

/// One configured end-user identity to poll.
///
/// Interval overrides below the floors are clamped when the account's
/// scheduler is created, not rejected.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AccountConfig {
    #[validate(length(min = 1, max = 100))]
    pub username: String,
    #[validate(length(min = 1))]
    pub refresh_token: String,
    /// Seconds between now-playing fetches. Default 30, floor 30.
    pub now_playing_interval: Option<u64>,
    /// Seconds between recently-played fetches. Default 300, floor 300.
    pub recently_played_interval: Option<u64>,
}
