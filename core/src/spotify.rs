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

use crate::auth::AuthError;
use crate::models::PlaylistSummary;
use crate::storage::{AppStorage, KeyValueStore};
use chrono::{DateTime, Utc};
use futures::stream::TryStreamExt;
use log::debug;
use rspotify::{prelude::*, AuthCodeSpotify, Token};

/// Thin pass-through to the Spotify Web API using the stored bearer token.
pub struct SpotifyApi {
    spotify: AuthCodeSpotify,
}

impl SpotifyApi {
    /// Builds a client around a captured implicit-grant token. There is no
    /// refresh token, so an expired token surfaces as an API error.
    pub fn from_bearer_token(access_token: &str, expires_at: Option<DateTime<Utc>>) -> Self {
        let token = Token {
            access_token: access_token.to_string(),
            expires_at,
            ..Default::default()
        };
        Self {
            spotify: AuthCodeSpotify::from_token(token),
        }
    }

    pub fn from_storage<S: KeyValueStore>(storage: &AppStorage<S>) -> Result<Self, AuthError> {
        let token = storage.bearer_token()?.ok_or(AuthError::NotAuthenticated)?;
        Ok(Self::from_bearer_token(&token, storage.token_expires_at()?))
    }

    pub async fn current_user_id(&self) -> Result<String, AuthError> {
        let user = self.spotify.current_user().await?;
        Ok(user.id.id().to_string())
    }

    pub async fn list_playlists(&self) -> Result<Vec<PlaylistSummary>, AuthError> {
        let mut playlists = Vec::new();
        let mut stream = self.spotify.current_user_playlists();

        while let Some(pl) = stream.try_next().await? {
            let owner_name = pl.owner.display_name.unwrap_or(pl.owner.id.to_string());

            playlists.push(PlaylistSummary {
                id: pl.id.id().to_string(),
                name: pl.name,
                total_tracks: pl.tracks.total,
                is_public: pl.public.unwrap_or(false),
                is_collaborative: pl.collaborative,
                owner_name,
            });
        }

        debug!("Fetched {} playlists", playlists.len());
        Ok(playlists)
    }
}
