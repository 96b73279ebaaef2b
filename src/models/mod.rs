pub mod account;
pub mod artist;
pub mod library;
pub mod snapshot;
pub mod track;

pub use account::AccountConfig;
pub use artist::{Artist, ArtistDetail, ArtistImage, RankedArtist};
pub use library::{Playlist, PlaylistTrack, SavedAlbum, SavedTrack};
pub use snapshot::{
    FollowedArtists, NowPlayingState, PlaylistIndex, RankedArtists, RankedTracks, RecentlyPlayed,
    SavedAlbums, SavedTracks, Snapshot, TimeRange, TopKind,
};
pub use track::{AudioFeatures, NowPlaying, PlayEvent, RankedTrack};
