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

//! Remote document store: one collection of JSON documents addressed by key.
//!
//! Writes replace the whole document. Queries return the first document of a
//! collection, ordered by key.

use async_trait::async_trait;
use log::debug;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Document store unavailable: {0}")]
    Unavailable(String),
    #[error("Document store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Document '{0}' is not valid JSON: {1}")]
    Json(String, #[source] serde_json::Error),
    #[error("Invalid document path segment: {0:?}")]
    InvalidName(String),
}

/// A single document returned by a query.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    pub id: String,
    payload: Value,
}

impl DocumentSnapshot {
    pub fn new(id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }

    pub fn data(&self) -> &Value {
        &self.payload
    }

    pub fn into_data(self) -> Value {
        self.payload
    }
}

/// Result of a collection query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySnapshot {
    pub documents: Vec<DocumentSnapshot>,
}

impl QuerySnapshot {
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Creates or fully replaces `collection/key` with `payload`.
    async fn set_document(
        &self,
        collection: &str,
        key: &str,
        payload: Value,
    ) -> Result<(), StoreError>;

    /// Returns at most one document: the first of `collection`.
    async fn first_document(&self, collection: &str) -> Result<QuerySnapshot, StoreError>;
}

/// Keeps every collection in memory.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: RwLock<BTreeMap<String, BTreeMap<String, Value>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct read of one document, bypassing the query API.
    pub fn document(&self, collection: &str, key: &str) -> Option<Value> {
        self.collections
            .read()
            .get(collection)
            .and_then(|docs| docs.get(key))
            .cloned()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn set_document(
        &self,
        collection: &str,
        key: &str,
        payload: Value,
    ) -> Result<(), StoreError> {
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), payload);
        Ok(())
    }

    async fn first_document(&self, collection: &str) -> Result<QuerySnapshot, StoreError> {
        let collections = self.collections.read();
        let documents = collections
            .get(collection)
            .and_then(|docs| docs.iter().next())
            .map(|(id, payload)| DocumentSnapshot::new(id.clone(), payload.clone()))
            .into_iter()
            .collect();
        Ok(QuerySnapshot { documents })
    }
}

/// Stores each document as `<root>/<collection>/<key>.json`.
#[derive(Debug, Clone)]
pub struct FileDocumentStore {
    root: PathBuf,
}

impl FileDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn collection_dir(&self, collection: &str) -> Result<PathBuf, StoreError> {
        Ok(self.root.join(checked_segment(collection)?))
    }
}

/// Rejects names that would escape the store root or hide as dotfiles.
fn checked_segment(name: &str) -> Result<&str, StoreError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\'])
        && name != "..";
    if valid {
        Ok(name)
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}

#[async_trait]
impl DocumentStore for FileDocumentStore {
    async fn set_document(
        &self,
        collection: &str,
        key: &str,
        payload: Value,
    ) -> Result<(), StoreError> {
        let dir = self.collection_dir(collection)?;
        let key = checked_segment(key)?;
        tokio::fs::create_dir_all(&dir).await?;

        let content = serde_json::to_vec_pretty(&payload)
            .map_err(|e| StoreError::Json(key.to_string(), e))?;

        // Readers only ever see the old or the new file, never a partial one.
        let tmp = dir.join(format!(".{}.json.tmp", key));
        let target = dir.join(format!("{}.json", key));
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &target).await?;

        debug!("Wrote document {}", target.display());
        Ok(())
    }

    async fn first_document(&self, collection: &str) -> Result<QuerySnapshot, StoreError> {
        let dir = self.collection_dir(collection)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(QuerySnapshot::default());
            }
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with('.') {
                continue;
            }
            if let Some(key) = name.strip_suffix(".json") {
                keys.push(key.to_string());
            }
        }
        keys.sort();

        let Some(key) = keys.into_iter().next() else {
            return Ok(QuerySnapshot::default());
        };
        let raw = tokio::fs::read(dir.join(format!("{}.json", key))).await?;
        let payload = serde_json::from_slice(&raw).map_err(|e| StoreError::Json(key.clone(), e))?;

        Ok(QuerySnapshot {
            documents: vec![DocumentSnapshot::new(key, payload)],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_store_upsert_replaces_document() {
        let store = MemoryDocumentStore::new();
        store
            .set_document("c", "k", json!({"a": 1, "b": 2}))
            .await
            .unwrap();
        store.set_document("c", "k", json!({"a": 3})).await.unwrap();

        assert_eq!(store.document("c", "k"), Some(json!({"a": 3})));
    }

    #[tokio::test]
    async fn test_memory_store_first_document() {
        let store = MemoryDocumentStore::new();
        assert!(store.first_document("c").await.unwrap().is_empty());

        store.set_document("c", "zeta", json!(2)).await.unwrap();
        store.set_document("c", "alpha", json!(1)).await.unwrap();
        store.set_document("other", "aaa", json!(0)).await.unwrap();

        let snapshot = store.first_document("c").await.unwrap();
        assert_eq!(snapshot.documents.len(), 1);
        assert_eq!(snapshot.documents[0].id, "alpha");
        assert_eq!(snapshot.documents[0].data(), &json!(1));
    }

    #[tokio::test]
    async fn test_file_store_round_trip_and_ordering() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDocumentStore::new(dir.path());

        assert!(store.first_document("ratings").await.unwrap().is_empty());

        store
            .set_document("ratings", "local-user", json!({"n": 1}))
            .await
            .unwrap();
        store
            .set_document("ratings", "local-user", json!({"n": 2}))
            .await
            .unwrap();
        store
            .set_document("ratings", "zz-user", json!({"n": 9}))
            .await
            .unwrap();

        let snapshot = store.first_document("ratings").await.unwrap();
        assert_eq!(snapshot.documents[0].id, "local-user");
        assert_eq!(snapshot.documents[0].data(), &json!({"n": 2}));
        assert!(!dir.path().join("ratings").join(".local-user.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_file_store_reports_corrupt_document() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("ratings")).unwrap();
        std::fs::write(dir.path().join("ratings").join("doc.json"), "{").unwrap();

        let store = FileDocumentStore::new(dir.path());
        assert!(matches!(
            store.first_document("ratings").await,
            Err(StoreError::Json(ref key, _)) if key == "doc"
        ));
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDocumentStore::new(dir.path());

        assert!(matches!(
            store.set_document("../escape", "k", json!(1)).await,
            Err(StoreError::InvalidName(_))
        ));
        assert!(matches!(
            store.set_document("c", "a/b", json!(1)).await,
            Err(StoreError::InvalidName(_))
        ));
    }
}
