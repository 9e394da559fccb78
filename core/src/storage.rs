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

//! Persisted key/value storage and the repository that owns its keys.
//!
//! The store behaves like browser local storage: synchronous, string keyed,
//! shared by every caller and last-writer-wins. Only [`AppStorage`] knows the
//! key names and value encodings.

use crate::models::{Rating, RatingSystem};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const BEARER_TOKEN_KEY: &str = "bearerToken";
pub const TOKEN_EXPIRES_AT_KEY: &str = "bearerTokenExpiresAt";
pub const SAVED_STATE_KEY: &str = "savedState";
pub const RATINGS_KEY: &str = "ratings";
pub const RATING_SYSTEM_KEY: &str = "ratingSystem";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Stored value for '{key}' is malformed: {source}")]
    Malformed {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("Storage file is not valid JSON: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Synchronous string-keyed store surviving across runs.
#[cfg_attr(test, mockall::automock)]
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// In-process store, lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.write().remove(key);
        Ok(())
    }
}

/// Store backed by a single JSON object file, rewritten on every mutation.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl FileStore {
    /// Opens the file at `path`, starting empty if it does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!("Opened storage file {} ({} keys)", path.display(), entries.len());
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    /// Writes `entries` to a sibling temp file and renames it over the
    /// storage file, so the file on disk is always a complete snapshot.
    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(entries)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.read().get(key).cloned())
    }

    // Memory only changes once the new snapshot is on disk.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.write();
        let mut updated = entries.clone();
        updated.insert(key.to_string(), value.to_string());
        self.flush(&updated)?;
        *entries = updated;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.write();
        if !entries.contains_key(key) {
            return Ok(());
        }
        let mut updated = entries.clone();
        updated.remove(key);
        self.flush(&updated)?;
        *entries = updated;
        Ok(())
    }
}

/// Typed access to every key the application persists.
pub struct AppStorage<S> {
    store: S,
}

impl<S: KeyValueStore> AppStorage<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bearer_token(&self) -> Result<Option<String>, StorageError> {
        Ok(self.store.get(BEARER_TOKEN_KEY)?.filter(|t| !t.is_empty()))
    }

    /// Overwrites the stored token. Any expiry recorded for the previous token
    /// is dropped; callers that know the new expiry set it afterwards.
    pub fn set_bearer_token(&self, token: &str) -> Result<(), StorageError> {
        self.store.set(BEARER_TOKEN_KEY, token)?;
        self.store.remove(TOKEN_EXPIRES_AT_KEY)
    }

    pub fn clear_bearer_token(&self) -> Result<(), StorageError> {
        self.store.remove(BEARER_TOKEN_KEY)?;
        self.store.remove(TOKEN_EXPIRES_AT_KEY)
    }

    /// Absolute expiry of the stored token, if one was recorded.
    /// An unreadable timestamp counts as unknown.
    pub fn token_expires_at(&self) -> Result<Option<DateTime<Utc>>, StorageError> {
        let Some(raw) = self.store.get(TOKEN_EXPIRES_AT_KEY)? else {
            return Ok(None);
        };
        match DateTime::parse_from_rfc3339(&raw) {
            Ok(at) => Ok(Some(at.with_timezone(&Utc))),
            Err(e) => {
                warn!("Ignoring unreadable token expiry '{}': {}", raw, e);
                Ok(None)
            }
        }
    }

    pub fn set_token_expires_at(&self, at: DateTime<Utc>) -> Result<(), StorageError> {
        self.store.set(TOKEN_EXPIRES_AT_KEY, &at.to_rfc3339())
    }

    pub fn saved_state(&self) -> Result<Option<String>, StorageError> {
        self.store.get(SAVED_STATE_KEY)
    }

    pub fn set_saved_state(&self, route: &str) -> Result<(), StorageError> {
        self.store.set(SAVED_STATE_KEY, route)
    }

    pub fn clear_saved_state(&self) -> Result<(), StorageError> {
        self.store.remove(SAVED_STATE_KEY)
    }

    /// The cached rating collection, or `None` when the key is absent.
    pub fn ratings(&self) -> Result<Option<Vec<Rating>>, StorageError> {
        self.store
            .get(RATINGS_KEY)?
            .map(|raw| {
                serde_json::from_str(&raw).map_err(|source| StorageError::Malformed {
                    key: RATINGS_KEY,
                    source,
                })
            })
            .transpose()
    }

    /// Replaces the whole cached collection.
    pub fn set_ratings(&self, ratings: &[Rating]) -> Result<(), StorageError> {
        let raw = serde_json::to_string(ratings).map_err(|source| StorageError::Malformed {
            key: RATINGS_KEY,
            source,
        })?;
        self.store.set(RATINGS_KEY, &raw)
    }

    pub fn has_ratings(&self) -> Result<bool, StorageError> {
        Ok(self.store.get(RATINGS_KEY)?.is_some())
    }

    pub fn clear_ratings(&self) -> Result<(), StorageError> {
        self.store.remove(RATINGS_KEY)
    }

    /// Falls back to the default system when unset or unrecognised.
    pub fn rating_system(&self) -> Result<RatingSystem, StorageError> {
        Ok(self
            .store
            .get(RATING_SYSTEM_KEY)?
            .and_then(|raw| raw.parse().ok())
            .unwrap_or_default())
    }

    pub fn set_rating_system(&self, system: RatingSystem) -> Result<(), StorageError> {
        self.store.set(RATING_SYSTEM_KEY, system.as_str())
    }
}
