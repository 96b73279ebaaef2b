use serde::{Deserialize, Serialize};

/// Artist summary as returned by the followed-artists listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artist {
    pub id: String,
    pub name: String,
    pub url: String,
    pub image: Option<String>,
    pub genres: Vec<String>,
    pub popularity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtistImage {
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Full artist metadata, fetched per artist for exports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtistDetail {
    pub id: String,
    pub name: String,
    pub url: String,
    pub uri: String,
    pub followers: u64,
    pub genres: Vec<String>,
    pub images: Vec<ArtistImage>,
    pub popularity: u32,
}

impl From<Artist> for ArtistDetail {
    /// Fallback when the per-artist detail fetch fails mid-export.
    fn from(artist: Artist) -> Self {
        Self {
            uri: format!("spotify:artist:{}", artist.id),
            followers: 0,
            images: artist
                .image
                .into_iter()
                .map(|url| ArtistImage {
                    url,
                    width: None,
                    height: None,
                })
                .collect(),
            id: artist.id,
            name: artist.name,
            url: artist.url,
            genres: artist.genres,
            popularity: artist.popularity,
        }
    }
}

/// One ranked entry from the top-artists statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedArtist {
    pub id: String,
    pub name: String,
    pub url: String,
    pub rank: u32,
    pub genres: Vec<String>,
    pub popularity: u32,
}
