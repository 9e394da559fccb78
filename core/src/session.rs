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

//! User-facing flows over the token lifecycle and the ratings synchronizer.
//!
//! Every explicit action reports its outcome through the [`Notifier`]; only
//! the startup load stays silent.

use crate::auth::{AuthError, CallbackOutcome, TokenLifecycle};
use crate::documents::DocumentStore;
use crate::models::{upsert_rating, Rating, RatingSystem};
use crate::notify::Notifier;
use crate::storage::{AppStorage, KeyValueStore, StorageError};
use crate::sync::{RatingsSync, SaveOutcome, SyncError};
use log::{info, warn};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Rating {value} is not valid for the {system} rating system")]
    InvalidRating { value: f64, system: RatingSystem },
    #[error("Local storage error: {0}")]
    Storage(#[from] StorageError),
}

pub struct Session<S, D, N> {
    storage: AppStorage<S>,
    sync: RatingsSync<D>,
    notifier: N,
}

impl<S, D, N> Session<S, D, N>
where
    S: KeyValueStore,
    D: DocumentStore,
    N: Notifier,
{
    pub fn new(storage: AppStorage<S>, sync: RatingsSync<D>, notifier: N) -> Self {
        Self {
            storage,
            sync,
            notifier,
        }
    }

    pub fn storage(&self) -> &AppStorage<S> {
        &self.storage
    }

    pub fn sync(&self) -> &RatingsSync<D> {
        &self.sync
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn tokens(&self) -> TokenLifecycle<'_, S> {
        TokenLifecycle::new(&self.storage)
    }

    /// Application load: token lifecycle first, then the automatic pull of
    /// the remote ratings. The pull runs whatever the token step returned and
    /// never fails the startup itself.
    pub async fn startup(&self, location: &str) -> Result<CallbackOutcome, AuthError> {
        let outcome = self.tokens().handle_callback(location);
        if let Err(e) = &outcome {
            warn!("Token step failed, still loading ratings: {}", e);
        }
        self.sync.load_ratings(&self.storage).await;
        outcome
    }

    /// Pushes the local cache to the remote document.
    pub async fn save_ratings(&self) -> Result<SaveOutcome, SyncError> {
        let ratings = match self.storage.ratings() {
            Ok(ratings) => ratings.unwrap_or_default(),
            Err(e) => {
                self.notifier
                    .error(&format!("Error reading local ratings: {}", e));
                return Err(e.into());
            }
        };

        match self.sync.save_ratings(&ratings).await {
            Ok(SaveOutcome::NothingToSave) => {
                self.notifier.info("No ratings found");
                Ok(SaveOutcome::NothingToSave)
            }
            Ok(SaveOutcome::Saved { count }) => {
                self.notifier.success(&format!("Saved {} ratings", count));
                Ok(SaveOutcome::Saved { count })
            }
            Err(e) => {
                self.notifier.error(&format!("Error saving ratings: {}", e));
                Err(e)
            }
        }
    }

    /// Explicit pull: reads the remote collection and replaces the local
    /// cache with it. On failure the cache is untouched.
    pub async fn fetch_ratings(&self) -> Result<Vec<Rating>, SyncError> {
        let ratings = match self.sync.get_ratings().await {
            Ok(ratings) => ratings,
            Err(e) => {
                self.notifier.error(&format!("Error loading ratings: {}", e));
                return Err(e);
            }
        };

        if let Err(e) = self.storage.set_ratings(&ratings) {
            self.notifier
                .error(&format!("Error updating local ratings: {}", e));
            return Err(e.into());
        }

        if ratings.is_empty() {
            self.notifier.info("No ratings found");
        } else {
            self.notifier
                .success(&format!("Loaded {} ratings", ratings.len()));
        }
        Ok(ratings)
    }

    /// Records a rating locally, replacing any earlier rating of the same
    /// track in the same playlist.
    pub fn rate(
        &self,
        track_uri: &str,
        playlist_id: &str,
        value: f64,
    ) -> Result<Vec<Rating>, SessionError> {
        let system = self.storage.rating_system()?;
        if !system.accepts(value) {
            return Err(SessionError::InvalidRating { value, system });
        }

        let mut ratings = self.storage.ratings()?.unwrap_or_default();
        upsert_rating(&mut ratings, Rating::new(track_uri, playlist_id, value));
        self.storage.set_ratings(&ratings)?;
        info!("Rated {} in {}: {}", track_uri, playlist_id, value);
        Ok(ratings)
    }

    pub fn clear_ratings(&self) -> Result<(), StorageError> {
        self.storage.clear_ratings()?;
        self.notifier.success("Cleared ratings");
        Ok(())
    }

    /// Replaces the stored bearer token by hand.
    pub fn set_bearer_token(&self, token: &str) -> Result<(), StorageError> {
        let token = token.trim();
        if token.is_empty() {
            self.notifier.warn("Empty token ignored");
            return Ok(());
        }
        self.storage.set_bearer_token(token)?;
        self.notifier.success("Updated bearer token");
        Ok(())
    }

    pub fn set_rating_system(&self, system: RatingSystem) -> Result<(), StorageError> {
        self.storage.set_rating_system(system)?;
        self.notifier
            .success(&format!("Rating system set to {}", system));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Navigation;
    use crate::documents::{MemoryDocumentStore, MockDocumentStore, StoreError};
    use crate::notify::{Notice, RecordingNotifier};
    use crate::storage::{MemoryStore, BEARER_TOKEN_KEY};
    use crate::sync::DocumentLocation;
    use std::io;

    /// Memory store whose bearer-token writes always fail.
    #[derive(Default)]
    struct TokenWriteFails(MemoryStore);

    impl KeyValueStore for TokenWriteFails {
        fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.0.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
            if key == BEARER_TOKEN_KEY {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only").into());
            }
            self.0.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<(), StorageError> {
            self.0.remove(key)
        }
    }

    type TestSession<D> = Session<MemoryStore, D, RecordingNotifier>;

    fn session() -> TestSession<MemoryDocumentStore> {
        session_with(MemoryDocumentStore::new())
    }

    fn session_with<D: DocumentStore>(store: D) -> TestSession<D> {
        Session::new(
            AppStorage::new(MemoryStore::new()),
            RatingsSync::new(store, DocumentLocation::default()),
            RecordingNotifier::new(),
        )
    }

    fn offline() -> MockDocumentStore {
        let mut store = MockDocumentStore::new();
        store
            .expect_first_document()
            .returning(|_| Err(StoreError::Unavailable("offline".to_string())));
        store
            .expect_set_document()
            .returning(|_, _, _| Err(StoreError::Unavailable("offline".to_string())));
        store
    }

    #[tokio::test]
    async fn test_save_with_empty_cache_is_informational() {
        let mut store = MockDocumentStore::new();
        store.expect_set_document().never();
        let session = session_with(store);

        assert_eq!(
            session.save_ratings().await.unwrap(),
            SaveOutcome::NothingToSave
        );
        assert_eq!(
            session.notifier().notices(),
            vec![Notice::Info("No ratings found".to_string())]
        );
    }

    #[tokio::test]
    async fn test_save_then_fetch_reports_counts() {
        let session = session();
        session.rate("a", "p", 1.0).unwrap();
        session.rate("b", "p", -1.0).unwrap();

        assert_eq!(
            session.save_ratings().await.unwrap(),
            SaveOutcome::Saved { count: 2 }
        );
        session.storage().clear_ratings().unwrap();

        let fetched = session.fetch_ratings().await.unwrap();
        assert_eq!(fetched.len(), 2);
        assert_eq!(session.storage().ratings().unwrap(), Some(fetched));
        assert_eq!(
            session.notifier().take(),
            vec![
                Notice::Success("Saved 2 ratings".to_string()),
                Notice::Success("Loaded 2 ratings".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_save_failure_is_notified_and_cache_kept() {
        let session = session_with(offline());
        session.rate("a", "p", 1.0).unwrap();

        assert!(session.save_ratings().await.is_err());
        assert_eq!(
            session.storage().ratings().unwrap(),
            Some(vec![Rating::new("a", "p", 1.0)])
        );

        let notices = session.notifier().notices();
        assert_eq!(notices.len(), 1);
        assert!(matches!(&notices[0], Notice::Error(m) if m.contains("offline")));
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_cache_untouched() {
        let session = session_with(offline());
        session.rate("a", "p", 1.0).unwrap();

        assert!(session.fetch_ratings().await.is_err());
        assert_eq!(
            session.storage().ratings().unwrap(),
            Some(vec![Rating::new("a", "p", 1.0)])
        );
        assert!(matches!(
            &session.notifier().notices()[0],
            Notice::Error(m) if m.starts_with("Error loading ratings")
        ));
    }

    #[tokio::test]
    async fn test_fetch_empty_overwrites_cache_and_informs() {
        let session = session();
        session.rate("a", "p", 1.0).unwrap();

        assert!(session.fetch_ratings().await.unwrap().is_empty());
        assert_eq!(session.storage().ratings().unwrap(), Some(vec![]));
        assert_eq!(
            session.notifier().notices(),
            vec![Notice::Info("No ratings found".to_string())]
        );
    }

    #[tokio::test]
    async fn test_startup_captures_token_and_seeds_cache_offline() {
        let session = session_with(offline());

        let outcome = session
            .startup("http://127.0.0.1:4200/#/access_token=T&token_type=Bearer&expires_in=3600")
            .await
            .unwrap();

        assert_eq!(outcome.navigation, Navigation::Root);
        assert_eq!(session.storage().bearer_token().unwrap().as_deref(), Some("T"));
        assert_eq!(session.storage().ratings().unwrap(), Some(vec![]));
        assert!(session.notifier().notices().is_empty());
    }

    #[tokio::test]
    async fn test_startup_loads_ratings_even_when_token_write_fails() {
        let documents = MemoryDocumentStore::new();
        let sync = RatingsSync::new(documents, DocumentLocation::default());
        sync.save_ratings(&[Rating::new("a", "p", 1.0)]).await.unwrap();

        let session = Session::new(
            AppStorage::new(TokenWriteFails::default()),
            sync,
            RecordingNotifier::new(),
        );

        let result = session.startup("#/access_token=T").await;
        assert!(matches!(result, Err(AuthError::Storage(_))));
        assert_eq!(
            session.storage().ratings().unwrap(),
            Some(vec![Rating::new("a", "p", 1.0)])
        );
    }

    #[test]
    fn test_rate_validates_against_rating_system() {
        let session = session();
        assert!(matches!(
            session.rate("a", "p", 4.0),
            Err(SessionError::InvalidRating { .. })
        ));

        session.set_rating_system(RatingSystem::Stars5).unwrap();
        session.rate("a", "p", 4.0).unwrap();
        let ratings = session.rate("a", "p", 2.0).unwrap();
        assert_eq!(ratings, vec![Rating::new("a", "p", 2.0)]);
    }

    #[test]
    fn test_clear_ratings_and_manual_token() {
        let session = session();
        session.rate("a", "p", 1.0).unwrap();
        session.clear_ratings().unwrap();
        assert_eq!(session.storage().ratings().unwrap(), None);

        session.set_bearer_token("  ").unwrap();
        assert_eq!(session.storage().bearer_token().unwrap(), None);
        session.set_bearer_token(" manual ").unwrap();
        assert_eq!(
            session.storage().bearer_token().unwrap().as_deref(),
            Some("manual")
        );

        assert_eq!(
            session.notifier().notices(),
            vec![
                Notice::Success("Cleared ratings".to_string()),
                Notice::Warn("Empty token ignored".to_string()),
                Notice::Success("Updated bearer token".to_string()),
            ]
        );
    }
}
