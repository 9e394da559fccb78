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

//! Runtime configuration read from the environment.

use crate::auth::default_scopes;
use crate::sync::DocumentLocation;
use rspotify::OAuth;
use std::env;
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:4200/#/callback";
pub const DEFAULT_STORAGE_PATH: &str = ".ratings_storage.json";
pub const DEFAULT_DOCUMENTS_DIR: &str = ".ratings_documents";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must not be empty")]
    Empty(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Callback route the authorization server redirects back to.
    pub redirect_uri: String,
    /// File backing the persisted key/value storage.
    pub storage_path: PathBuf,
    /// Root directory of the file-backed document store.
    pub documents_dir: PathBuf,
    pub location: DocumentLocation,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            storage_path: PathBuf::from(DEFAULT_STORAGE_PATH),
            documents_dir: PathBuf::from(DEFAULT_DOCUMENTS_DIR),
            location: DocumentLocation::default(),
        }
    }
}

impl Config {
    /// Loads from `RSPOTIFY_REDIRECT_URI`, `RATINGS_STORAGE_PATH`,
    /// `RATINGS_DOCUMENTS_DIR`, `RATINGS_COLLECTION` and `RATINGS_DOCUMENT`.
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let read = |name: &'static str, default: String| -> Result<String, ConfigError> {
            match lookup(name) {
                Some(value) if value.trim().is_empty() => Err(ConfigError::Empty(name)),
                Some(value) => Ok(value.trim().to_string()),
                None => Ok(default),
            }
        };

        Ok(Self {
            redirect_uri: read("RSPOTIFY_REDIRECT_URI", defaults.redirect_uri)?,
            storage_path: read(
                "RATINGS_STORAGE_PATH",
                defaults.storage_path.display().to_string(),
            )?
            .into(),
            documents_dir: read(
                "RATINGS_DOCUMENTS_DIR",
                defaults.documents_dir.display().to_string(),
            )?
            .into(),
            location: DocumentLocation {
                collection: read("RATINGS_COLLECTION", defaults.location.collection)?,
                key: read("RATINGS_DOCUMENT", defaults.location.key)?,
            },
        })
    }

    /// OAuth settings for the authorization redirect.
    pub fn oauth(&self) -> OAuth {
        OAuth {
            redirect_uri: self.redirect_uri.clone(),
            scopes: default_scopes(),
            ..Default::default()
        }
    }
}
