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

//! Bearer-token lifecycle for the implicit-grant flow.
//!
//! The authorization server sends the user back to the callback route with the
//! token in the URL fragment (`#/access_token=...&token_type=...&expires_in=...`).
//! [`TokenLifecycle`] captures it, persists it and decides where to navigate.

use crate::storage::{AppStorage, KeyValueStore, StorageError};
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use rspotify::{scopes, Credentials, OAuth};
use std::collections::HashSet;
use thiserror::Error;
use url::Url;

pub const AUTHORIZE_ENDPOINT: &str = "https://accounts.spotify.com/authorize";
pub const CALLBACK_ROUTE: &str = "callback";
pub const LOGIN_ROUTE: &str = "login";

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Failed to configure authorization: {0}")]
    ClientConfig(String),
    #[error("Invalid authorization URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Spotify API error: {0}")]
    Spotify(#[from] rspotify::ClientError),
    #[error("No bearer token stored; log in first")]
    NotAuthenticated,
}

/// Fields captured from the callback fragment. Missing keys stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenFragment {
    pub access_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<String>,
}

impl TokenFragment {
    /// Parses the part of a location after the `#/` marker.
    ///
    /// Accepts a full URL, a bare `#/...` hash or the already stripped
    /// fragment. The fragment is percent-decoded as a whole and then split on
    /// `&`; the first pair with an exactly matching key wins.
    pub fn parse(location: &str) -> Self {
        let fragment = fragment_of(location);
        if fragment.is_empty() {
            return Self::default();
        }

        let decoded = match urlencoding::decode(fragment) {
            Ok(decoded) => decoded.into_owned(),
            Err(e) => {
                warn!("Fragment is not valid UTF-8 once decoded ({}), using it raw", e);
                fragment.to_string()
            }
        };
        let pairs: Vec<&str> = decoded.split('&').collect();
        debug!("Fragment has {} pairs", pairs.len());

        Self {
            access_token: query_variable(&pairs, "access_token"),
            token_type: query_variable(&pairs, "token_type"),
            expires_in: query_variable(&pairs, "expires_in"),
        }
    }

    /// The advisory lifetime in seconds, if present and numeric.
    pub fn expires_in_secs(&self) -> Option<i64> {
        self.expires_in.as_deref()?.trim().parse().ok()
    }
}

/// Strips everything up to and including the `#/` marker. A lone `#` is
/// accepted too.
fn fragment_of(location: &str) -> &str {
    match location.find('#') {
        Some(idx) => {
            let hash = &location[idx + 1..];
            hash.strip_prefix('/').unwrap_or(hash)
        }
        None => location.strip_prefix('/').unwrap_or(location),
    }
}

fn query_variable(pairs: &[&str], variable: &str) -> Option<String> {
    let found = pairs.iter().find_map(|pair| {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next()?;
        if key == variable {
            Some(parts.next().unwrap_or_default().to_string())
        } else {
            None
        }
    });
    if found.is_none() {
        debug!("Query variable {} not found", variable);
    }
    found
}

/// Turns a location hash such as `#/playlists` into the route `playlists`.
pub fn route_of(location_hash: &str) -> &str {
    let hash = location_hash.strip_prefix('#').unwrap_or(location_hash);
    hash.trim_start_matches('/')
}

/// Where the application goes after the lifecycle has run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    /// Back to the route saved before the authorization redirect.
    SavedRoute(String),
    /// Application root.
    Root,
    /// Unauthenticated; the login entry point.
    Login,
    /// Already authenticated, stay where we are.
    Stay,
}

impl Navigation {
    /// The path the router should load, if navigation happens at all.
    pub fn path(&self) -> Option<String> {
        match self {
            Navigation::SavedRoute(route) => Some(format!("/{}", route)),
            Navigation::Root => Some("/".to_string()),
            Navigation::Login => Some(format!("/{}", LOGIN_ROUTE)),
            Navigation::Stay => None,
        }
    }
}

/// Outcome of running the lifecycle on one application load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackOutcome {
    pub fragment: TokenFragment,
    pub navigation: Navigation,
}

pub struct TokenLifecycle<'a, S> {
    storage: &'a AppStorage<S>,
}

impl<'a, S: KeyValueStore> TokenLifecycle<'a, S> {
    pub fn new(storage: &'a AppStorage<S>) -> Self {
        Self { storage }
    }

    /// Runs on every load of the callback view.
    ///
    /// A captured token is persisted before any navigation decision. Without
    /// one, the stored token (if any and not known to be expired) keeps the
    /// user where they are; otherwise they go to login.
    pub fn handle_callback(&self, location: &str) -> Result<CallbackOutcome, AuthError> {
        self.handle_callback_at(location, Utc::now())
    }

    pub fn handle_callback_at(
        &self,
        location: &str,
        now: DateTime<Utc>,
    ) -> Result<CallbackOutcome, AuthError> {
        let fragment = TokenFragment::parse(location);

        let navigation = match fragment.access_token.as_deref().filter(|t| !t.is_empty()) {
            Some(token) => {
                self.storage.set_bearer_token(token)?;
                if let Some(expires_at) = fragment
                    .expires_in_secs()
                    .and_then(Duration::try_seconds)
                    .and_then(|lifetime| now.checked_add_signed(lifetime))
                {
                    self.storage.set_token_expires_at(expires_at)?;
                }
                info!("Stored new bearer token");
                self.consume_saved_route()?
            }
            None => {
                debug!("No access token found in location");
                self.resolve_existing(now)?
            }
        };

        info!("Navigating to {:?}", navigation);
        Ok(CallbackOutcome {
            fragment,
            navigation,
        })
    }

    fn consume_saved_route(&self) -> Result<Navigation, AuthError> {
        match self.storage.saved_state()? {
            Some(route) => {
                self.storage.clear_saved_state()?;
                let route = route_of(&route).to_string();
                if route.is_empty() {
                    Ok(Navigation::Root)
                } else {
                    Ok(Navigation::SavedRoute(route))
                }
            }
            None => Ok(Navigation::Root),
        }
    }

    fn resolve_existing(&self, now: DateTime<Utc>) -> Result<Navigation, AuthError> {
        if self.storage.bearer_token()?.is_none() {
            return Ok(Navigation::Login);
        }
        match self.storage.token_expires_at()? {
            Some(expires_at) if expires_at <= now => {
                warn!("Stored bearer token expired at {}", expires_at);
                Ok(Navigation::Login)
            }
            _ => Ok(Navigation::Stay),
        }
    }

    /// True when a token is stored and not known to be expired.
    pub fn is_authenticated(&self) -> Result<bool, AuthError> {
        Ok(self.resolve_existing(Utc::now())? == Navigation::Stay)
    }

    /// Saves the current route right before leaving for the authorization
    /// server. Does nothing while on the callback route itself. Returns
    /// whether the route was saved.
    pub fn remember_location(&self, location_hash: &str) -> Result<bool, AuthError> {
        let route = route_of(location_hash);
        if route == CALLBACK_ROUTE || TokenFragment::parse(location_hash).access_token.is_some() {
            debug!("Not saving callback route as navigation state");
            return Ok(false);
        }
        self.storage.set_saved_state(route)?;
        debug!("Saved navigation state '{}'", route);
        Ok(true)
    }
}

/// Scopes requested for browsing playlists and controlling playback.
pub fn default_scopes() -> HashSet<String> {
    scopes!(
        "user-read-currently-playing",
        "user-read-playback-state",
        "user-read-recently-played",
        "user-modify-playback-state",
        "playlist-read-private",
        "playlist-modify-private",
        "playlist-modify-public",
        "streaming"
    )
}

/// Reads the client id from the environment (`RSPOTIFY_CLIENT_ID`).
pub fn credentials_from_env() -> Result<Credentials, AuthError> {
    Credentials::from_env()
        .ok_or_else(|| AuthError::ClientConfig("Missing RSPOTIFY_CLIENT_ID".to_string()))
}

/// Builds the implicit-grant authorization URL (`response_type=token`).
pub fn implicit_grant_url(creds: &Credentials, oauth: &OAuth) -> Result<Url, AuthError> {
    if creds.id.is_empty() {
        return Err(AuthError::ClientConfig("Empty client id".to_string()));
    }
    Url::parse(&oauth.redirect_uri)?;

    let mut scopes: Vec<&str> = oauth.scopes.iter().map(String::as_str).collect();
    scopes.sort_unstable();

    let url = Url::parse_with_params(
        AUTHORIZE_ENDPOINT,
        &[
            ("client_id", creds.id.as_str()),
            ("scope", scopes.join(" ").as_str()),
            ("response_type", "token"),
            ("show_dialog", "false"),
            ("redirect_uri", oauth.redirect_uri.as_str()),
        ],
    )?;
    Ok(url)
}
