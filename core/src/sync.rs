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

use crate::documents::{DocumentStore, StoreError};
use crate::models::{Rating, RatingsDocument};
use crate::storage::{AppStorage, KeyValueStore, StorageError};
use log::{debug, info, warn};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Remote store error: {0}")]
    Store(#[from] StoreError),
    #[error("Remote ratings document is malformed: {0}")]
    MalformedDocument(#[source] serde_json::Error),
    #[error("Local storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result of an explicit save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Nothing in the collection, the remote store was not contacted.
    NothingToSave,
    Saved { count: usize },
}

/// Where the single ratings document lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentLocation {
    pub collection: String,
    pub key: String,
}

impl Default for DocumentLocation {
    fn default() -> Self {
        Self {
            collection: "test-ratings".to_string(),
            key: "local-user".to_string(),
        }
    }
}

/// Reconciles the local ratings cache with one remote document.
///
/// Each direction replaces the whole collection. There is no versioning, so
/// concurrent writers are last-writer-wins.
pub struct RatingsSync<D> {
    store: D,
    location: DocumentLocation,
}

impl<D: DocumentStore> RatingsSync<D> {
    pub fn new(store: D, location: DocumentLocation) -> Self {
        Self { store, location }
    }

    pub fn store(&self) -> &D {
        &self.store
    }

    pub fn location(&self) -> &DocumentLocation {
        &self.location
    }

    /// Startup pull. Replaces the local cache with the remote collection; on
    /// any failure keeps the cache, or seeds it with `[]` when absent.
    /// Failures are logged only.
    pub async fn load_ratings<S: KeyValueStore>(&self, cache: &AppStorage<S>) {
        info!("Loading ratings from {}", self.location.collection);
        let result = match self.get_ratings().await {
            Ok(ratings) => {
                info!("Loaded {} ratings", ratings.len());
                cache.set_ratings(&ratings).map_err(SyncError::from)
            }
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            warn!("Load failed, keeping existing local ratings: {}", e);
            match cache.has_ratings() {
                Ok(true) => {}
                Ok(false) => {
                    info!("No local ratings, initializing empty collection");
                    if let Err(e) = cache.set_ratings(&[]) {
                        warn!("Could not initialize local ratings: {}", e);
                    }
                }
                Err(e) => warn!("Could not inspect local ratings: {}", e),
            }
        }
    }

    /// Writes the full collection as the remote document, replacing it.
    pub async fn save_ratings(&self, ratings: &[Rating]) -> Result<SaveOutcome, SyncError> {
        if ratings.is_empty() {
            info!("No ratings found to save");
            return Ok(SaveOutcome::NothingToSave);
        }

        let document = RatingsDocument::new(ratings.to_vec());
        let count = document.total_ratings;
        let payload = serde_json::to_value(&document).map_err(SyncError::MalformedDocument)?;

        self.store
            .set_document(&self.location.collection, &self.location.key, payload)
            .await
            .map_err(|e| {
                warn!("Error saving ratings: {}", e);
                e
            })?;

        info!("Saved {} ratings", count);
        Ok(SaveOutcome::Saved { count })
    }

    /// Reads back the first document of the collection.
    ///
    /// An empty collection or a document without a `ratings` field yields an
    /// empty sequence. Store failures propagate.
    pub async fn get_ratings(&self) -> Result<Vec<Rating>, SyncError> {
        let snapshot = self
            .store
            .first_document(&self.location.collection)
            .await?;

        let Some(document) = snapshot.documents.into_iter().next() else {
            info!("No ratings found");
            return Ok(Vec::new());
        };
        debug!("Reading ratings document '{}'", document.id);

        match document.into_data() {
            Value::Object(mut fields) => match fields.remove("ratings") {
                Some(Value::Null) | None => Ok(Vec::new()),
                Some(ratings) => {
                    let ratings: Vec<Rating> =
                        serde_json::from_value(ratings).map_err(SyncError::MalformedDocument)?;
                    info!("Fetched {} ratings", ratings.len());
                    Ok(ratings)
                }
            },
            _ => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::{DocumentSnapshot, MemoryDocumentStore, MockDocumentStore, QuerySnapshot};
    use crate::storage::{MemoryStore, RATINGS_KEY};
    use serde_json::json;

    fn sync() -> RatingsSync<MemoryDocumentStore> {
        RatingsSync::new(MemoryDocumentStore::new(), DocumentLocation::default())
    }

    fn failing_store() -> MockDocumentStore {
        let mut store = MockDocumentStore::new();
        store
            .expect_first_document()
            .returning(|_| Err(StoreError::Unavailable("offline".to_string())));
        store
            .expect_set_document()
            .returning(|_, _, _| Err(StoreError::Unavailable("offline".to_string())));
        store
    }

    fn sample() -> Vec<Rating> {
        vec![
            Rating::new("spotify:track:test1", "playlist1", 5.0),
            Rating::new("spotify:track:test2", "playlist1", 3.0),
        ]
    }

    #[tokio::test]
    async fn test_save_empty_does_not_contact_store() {
        let mut store = MockDocumentStore::new();
        store.expect_set_document().never();
        store.expect_first_document().never();

        let sync = RatingsSync::new(store, DocumentLocation::default());
        assert_eq!(sync.save_ratings(&[]).await.unwrap(), SaveOutcome::NothingToSave);
    }

    #[tokio::test]
    async fn test_save_then_get_round_trip() {
        let sync = sync();
        let input = vec![Rating::new("a", "p", 5.0)];

        assert_eq!(
            sync.save_ratings(&input).await.unwrap(),
            SaveOutcome::Saved { count: 1 }
        );
        assert_eq!(sync.get_ratings().await.unwrap(), input);
    }

    #[tokio::test]
    async fn test_save_writes_envelope_to_fixed_key() {
        let sync = sync();
        sync.save_ratings(&sample()).await.unwrap();

        let doc = sync.store().document("test-ratings", "local-user").unwrap();
        assert_eq!(doc["totalRatings"], 2);
        assert_eq!(
            doc["ratings"][0],
            json!({"trackURI": "spotify:track:test1", "playlistId": "playlist1", "rating": 5.0})
        );
        assert!(doc["lastUpdated"].is_string());
    }

    #[tokio::test]
    async fn test_save_is_idempotent() {
        let sync = sync();
        let ratings = sample();

        for _ in 0..3 {
            sync.save_ratings(&ratings).await.unwrap();
        }

        let doc: RatingsDocument =
            serde_json::from_value(sync.store().document("test-ratings", "local-user").unwrap())
                .unwrap();
        assert_eq!(doc.ratings, ratings);
        assert_eq!(doc.total_ratings, ratings.len());
    }

    #[tokio::test]
    async fn test_save_keeps_duplicates() {
        let sync = sync();
        let ratings = vec![Rating::new("a", "p", 1.0), Rating::new("a", "p", -1.0)];
        sync.save_ratings(&ratings).await.unwrap();
        assert_eq!(sync.get_ratings().await.unwrap(), ratings);
    }

    #[tokio::test]
    async fn test_save_propagates_store_error() {
        let sync = RatingsSync::new(failing_store(), DocumentLocation::default());
        let err = sync.save_ratings(&sample()).await.unwrap_err();
        assert!(matches!(err, SyncError::Store(StoreError::Unavailable(_))));
        assert!(err.to_string().contains("offline"));
    }

    #[tokio::test]
    async fn test_get_from_empty_collection() {
        assert_eq!(sync().get_ratings().await.unwrap(), Vec::<Rating>::new());
    }

    #[tokio::test]
    async fn test_get_document_without_ratings_field() {
        let sync = sync();
        sync.store()
            .set_document("test-ratings", "local-user", json!({"lastUpdated": "x"}))
            .await
            .unwrap();
        assert!(sync.get_ratings().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_reads_first_document_of_collection() {
        let mut store = MockDocumentStore::new();
        store
            .expect_first_document()
            .withf(|collection| collection.to_string() == "test-ratings")
            .returning(|_| {
                Ok(QuerySnapshot {
                    documents: vec![DocumentSnapshot::new(
                        "someone-else",
                        json!({"ratings": [{"trackURI": "x", "playlistId": "y", "rating": 2}]}),
                    )],
                })
            });

        let sync = RatingsSync::new(store, DocumentLocation::default());
        assert_eq!(
            sync.get_ratings().await.unwrap(),
            vec![Rating::new("x", "y", 2.0)]
        );
    }

    #[tokio::test]
    async fn test_get_rejects_malformed_records() {
        let sync = sync();
        sync.store()
            .set_document("test-ratings", "local-user", json!({"ratings": [{"rating": 1}]}))
            .await
            .unwrap();
        assert!(matches!(
            sync.get_ratings().await,
            Err(SyncError::MalformedDocument(_))
        ));
    }

    #[tokio::test]
    async fn test_get_failure_propagates_and_leaves_cache() {
        let cache = AppStorage::new(MemoryStore::new());
        cache.set_ratings(&sample()).unwrap();

        let sync = RatingsSync::new(failing_store(), DocumentLocation::default());
        assert!(matches!(
            sync.get_ratings().await,
            Err(SyncError::Store(StoreError::Unavailable(_)))
        ));
        assert_eq!(cache.ratings().unwrap(), Some(sample()));
    }

    #[tokio::test]
    async fn test_load_replaces_cache_even_when_remote_empty() {
        let cache = AppStorage::new(MemoryStore::new());
        cache.set_ratings(&sample()).unwrap();

        sync().load_ratings(&cache).await;
        assert_eq!(cache.ratings().unwrap(), Some(vec![]));
    }

    #[tokio::test]
    async fn test_load_pulls_remote_collection() {
        let sync = sync();
        sync.save_ratings(&sample()).await.unwrap();

        let cache = AppStorage::new(MemoryStore::new());
        sync.load_ratings(&cache).await;
        assert_eq!(cache.ratings().unwrap(), Some(sample()));
    }

    #[tokio::test]
    async fn test_load_failure_keeps_populated_cache() {
        let cache = AppStorage::new(MemoryStore::new());
        cache.set_ratings(&sample()).unwrap();
        let before = cache.store().get(RATINGS_KEY).unwrap();

        RatingsSync::new(failing_store(), DocumentLocation::default())
            .load_ratings(&cache)
            .await;

        assert_eq!(cache.store().get(RATINGS_KEY).unwrap(), before);
    }

    #[tokio::test]
    async fn test_load_failure_initializes_absent_cache() {
        let cache = AppStorage::new(MemoryStore::new());

        RatingsSync::new(failing_store(), DocumentLocation::default())
            .load_ratings(&cache)
            .await;

        assert_eq!(cache.store().get(RATINGS_KEY).unwrap().as_deref(), Some("[]"));
    }
}
