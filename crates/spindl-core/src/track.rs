//! Track metadata as returned by the lookup endpoint.

use serde::{Deserialize, Serialize};

/// Metadata for one resolvable track.
///
/// Only `id` is guaranteed by the backend; every other field is best-effort
/// scraper output and may be absent. Wire names are `snake_case` and unknown
/// fields are ignored, so scraper-side additions do not break decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackMetadata {
    /// Backend track identifier, required for preparation requests.
    pub id: String,
    /// Artist identifier on the source platform.
    pub artist_id: Option<String>,
    /// Primary artist display name.
    pub artist_name: Option<String>,
    /// Album-level artist credit (may differ from `artist_name`).
    pub album_artist: Option<String>,
    /// Album title.
    pub album_name: Option<String>,
    /// Track title.
    pub audio_name: Option<String>,
    /// Cover art URL.
    pub image_url: Option<String>,
    /// Release year.
    pub release_year: Option<u32>,
    /// Disc number within the album.
    pub disc_number: Option<u32>,
    /// Track number within the disc.
    pub audio_number: Option<u32>,
    /// Identifier assigned by the scraping pipeline.
    pub scraped_song_id: Option<String>,
    /// Whether the source platform reports the track as playable.
    pub is_playable: Option<bool>,
    /// Full release date, as reported by the source platform.
    pub release_date: Option<String>,
}

impl TrackMetadata {
    /// Human-readable one-line description, falling back to the id when the
    /// scraper produced no names.
    #[must_use]
    pub fn summary(&self) -> String {
        match (self.audio_name.as_deref(), self.artist_name.as_deref()) {
            (Some(title), Some(artist)) => format!("{title} by {artist}"),
            (Some(title), None) => title.to_string(),
            (None, Some(artist)) => format!("track {} by {artist}", self.id),
            (None, None) => format!("track {}", self.id),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
