/*
    spotify-ratings-rs | Rust tool to capture Spotify tokens and sync track ratings.
    Copyright (C) 2025  Israel Alberto Roldan Vega

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A single user rating of a track inside a playlist.
///
/// Field names on the wire are `trackURI`, `playlistId` and `rating`, both in
/// the local cache and in the remote document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    #[serde(rename = "trackURI")]
    pub track_uri: String,
    #[serde(rename = "playlistId")]
    pub playlist_id: String,
    pub rating: f64,
}

impl Rating {
    pub fn new(track_uri: impl Into<String>, playlist_id: impl Into<String>, rating: f64) -> Self {
        Self {
            track_uri: track_uri.into(),
            playlist_id: playlist_id.into(),
            rating,
        }
    }

    /// True when both ratings refer to the same track in the same playlist.
    pub fn same_target(&self, other: &Rating) -> bool {
        self.track_uri == other.track_uri && self.playlist_id == other.playlist_id
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (playlist {}) -> {}",
            self.track_uri, self.playlist_id, self.rating
        )
    }
}

/// Replaces an existing rating for the same `(trackURI, playlistId)` pair, or
/// appends when there is none. Earlier duplicates are dropped so the latest
/// write is the only one left.
pub fn upsert_rating(ratings: &mut Vec<Rating>, rating: Rating) {
    ratings.retain(|r| !r.same_target(&rating));
    ratings.push(rating);
}

/// Envelope stored as the single remote ratings document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingsDocument {
    pub ratings: Vec<Rating>,
    #[serde(rename = "lastUpdated")]
    pub last_updated: String,
    #[serde(rename = "totalRatings")]
    pub total_ratings: usize,
}

impl RatingsDocument {
    /// Builds the envelope for a full-document write, stamped with the current time.
    pub fn new(ratings: Vec<Rating>) -> Self {
        let total_ratings = ratings.len();
        Self {
            ratings,
            last_updated: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            total_ratings,
        }
    }
}

/// How ratings are expressed in the UI. Stored under the `ratingSystem` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RatingSystem {
    #[default]
    #[serde(rename = "THUMBS")]
    Thumbs,
    #[serde(rename = "STARS5")]
    Stars5,
}

impl RatingSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            RatingSystem::Thumbs => "THUMBS",
            RatingSystem::Stars5 => "STARS5",
        }
    }

    /// Thumbs accept -1 or 1, five-star ratings accept whole numbers from 1 to 5.
    pub fn accepts(&self, value: f64) -> bool {
        match self {
            RatingSystem::Thumbs => value == 1.0 || value == -1.0,
            RatingSystem::Stars5 => value.fract() == 0.0 && (1.0..=5.0).contains(&value),
        }
    }
}

impl fmt::Display for RatingSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RatingSystem {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "THUMBS" => Ok(RatingSystem::Thumbs),
            "STARS5" => Ok(RatingSystem::Stars5),
            other => Err(format!("unknown rating system: {}", other)),
        }
    }
}

/// Summary of a playlist for listing purposes.
#[derive(Debug, Serialize, Deserialize)]
pub struct PlaylistSummary {
    pub id: String,
    pub name: String,
    pub total_tracks: u32,
    pub is_public: bool,
    pub is_collaborative: bool,
    pub owner_name: String,
}
