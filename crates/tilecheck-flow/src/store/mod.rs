//! Durable per-collection state on object storage.
//!
//! A collection is either pending (a marker under `unprocessed/`) or resolved
//! (a result object under `processed/`). The existence of a result object is
//! the only record of "already processed"; markers are advisory and a stale
//! one is ignored once a result exists.
//!
//! ## Reprocessing
//!
//! Every write also records the result key in a per-collection pointer
//! object. A later write for the same collection reads the pointer and deletes
//! exactly that key before anything new is written, so no listing of the
//! collection's directory is needed and exactly one result remains.
//!
//! The pointer is written before the result body. A pointer therefore always
//! names every result object that may exist for its collection, even when the
//! body write that followed it failed.

pub mod keys;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use tilecheck_core::storage::{StorageBackend, WritePrecondition};

use crate::error::Result;
use crate::model::Assessment;
use keys::{validate_concept_id, ResultKey, StoreKeys};

/// Concurrent downloads when reading back all results.
const DOWNLOAD_CONCURRENCY: usize = 10;

/// Contents of a pointer object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultPointer {
    /// Key of the current result object.
    pub key: String,
    /// When the result was written.
    pub written_at: DateTime<Utc>,
}

/// Counts of collections by state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStatus {
    /// Collections with a marker and no result.
    pub pending: usize,
    /// Collections with a result.
    pub processed: usize,
    /// Results that tiled.
    pub successful: usize,
    /// Results by reason label (`none` for success and unprobed).
    pub by_reason: BTreeMap<String, usize>,
}

/// Result store over an object storage backend.
#[derive(Clone)]
pub struct ResultStore {
    backend: Arc<dyn StorageBackend>,
    keys: StoreKeys,
}

impl std::fmt::Debug for ResultStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultStore")
            .field("prefix", &self.keys.prefix())
            .finish_non_exhaustive()
    }
}

impl ResultStore {
    /// Creates a store rooted at `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefix is invalid.
    pub fn new(backend: Arc<dyn StorageBackend>, prefix: &str) -> Result<Self> {
        Ok(Self {
            backend,
            keys: StoreKeys::new(prefix)?,
        })
    }

    /// Returns the key layout.
    #[must_use]
    pub const fn keys(&self) -> &StoreKeys {
        &self.keys
    }

    /// Records a collection as pending. Idempotent.
    ///
    /// Returns true if the marker was created by this call.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is invalid or the write fails.
    pub async fn mark_pending(&self, concept_id: &str) -> Result<bool> {
        validate_concept_id(concept_id)?;
        let result = self
            .backend
            .put(
                &self.keys.pending(concept_id),
                Bytes::new(),
                WritePrecondition::DoesNotExist,
            )
            .await?;
        Ok(result.is_success())
    }

    /// Writes the terminal result of a collection and returns its key.
    ///
    /// The previously recorded result is deleted first; if that delete fails
    /// nothing is written. The pending marker is removed last and a failure
    /// to remove it is only logged, since a result supersedes its marker.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is invalid, the pointer cannot be read, the
    /// previous result cannot be deleted, or the new result cannot be written.
    pub async fn put_result(&self, assessment: &Assessment) -> Result<String> {
        let concept_id = assessment.collection_concept_id.as_str();
        validate_concept_id(concept_id)?;

        let key = self.keys.result(assessment);
        for previous in self.previous_keys(concept_id).await? {
            if previous != key {
                self.backend.delete(&previous).await?;
                tracing::debug!(concept_id, old_key = %previous, "superseded result removed");
            }
        }

        let pointer = ResultPointer {
            key: key.clone(),
            written_at: Utc::now(),
        };
        self.backend
            .put(
                &self.keys.pointer(concept_id),
                Bytes::from(serde_json::to_vec(&pointer)?),
                WritePrecondition::None,
            )
            .await?;

        let body = serde_json::to_vec_pretty(assessment)?;
        self.backend
            .put(&key, Bytes::from(body), WritePrecondition::None)
            .await?;

        if let Err(e) = self.backend.delete(&self.keys.pending(concept_id)).await {
            tracing::warn!(concept_id, error = %e, "failed to delete pending marker");
        }

        tracing::debug!(concept_id, %key, "result written");
        Ok(key)
    }

    /// Keys of results that may exist for a collection.
    ///
    /// Normally the one key named by the pointer. An unparseable pointer falls
    /// back to listing the collection's result directory.
    async fn previous_keys(&self, concept_id: &str) -> Result<Vec<String>> {
        let bytes = match self.backend.get(&self.keys.pointer(concept_id)).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice::<ResultPointer>(&bytes) {
            Ok(pointer) => Ok(vec![pointer.key]),
            Err(e) => {
                tracing::warn!(concept_id, error = %e, "unreadable result pointer; listing results");
                Ok(self
                    .backend
                    .list(&self.keys.processed_dir(concept_id))
                    .await?
                    .into_iter()
                    .map(|meta| meta.path)
                    .collect())
            }
        }
    }

    async fn pointer(&self, concept_id: &str) -> Result<Option<ResultPointer>> {
        match self.backend.get(&self.keys.pointer(concept_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Reads the current result of a collection, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the pointer or the result cannot be read or parsed.
    pub async fn get_result(&self, concept_id: &str) -> Result<Option<Assessment>> {
        let Some(pointer) = self.pointer(concept_id).await? else {
            return Ok(None);
        };
        match self.backend.get(&pointer.key).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Lists result keys, optionally filtered by status and reason. Reads no bodies.
    ///
    /// # Errors
    ///
    /// Returns an error if listing fails.
    pub async fn list_results(&self, success: Option<bool>, reason: Option<&str>) -> Result<Vec<ResultKey>> {
        let mut results: Vec<ResultKey> = self
            .backend
            .list(&self.keys.processed_root())
            .await?
            .into_iter()
            .filter_map(|meta| self.keys.parse_result(&meta.path))
            .filter(|k| success.map_or(true, |s| k.success == s))
            .filter(|k| reason.map_or(true, |r| k.reason == r))
            .collect();
        results.sort_by(|a, b| a.concept_id.cmp(&b.concept_id));
        Ok(results)
    }

    /// Lists concept ids with a result matching the filters.
    ///
    /// # Errors
    ///
    /// Returns an error if listing fails.
    pub async fn list_by_outcome(&self, success: Option<bool>, reason: Option<&str>) -> Result<Vec<String>> {
        let ids: BTreeSet<String> = self
            .list_results(success, reason)
            .await?
            .into_iter()
            .map(|k| k.concept_id)
            .collect();
        Ok(ids.into_iter().collect())
    }

    /// Lists concept ids with a marker and no result, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if listing fails.
    pub async fn unprocessed(&self) -> Result<Vec<String>> {
        let pending = self.pending_ids().await?;
        let resolved: BTreeSet<String> = self.list_by_outcome(None, None).await?.into_iter().collect();
        Ok(pending.difference(&resolved).cloned().collect())
    }

    async fn pending_ids(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .backend
            .list(&self.keys.unprocessed_root())
            .await?
            .into_iter()
            .filter_map(|meta| self.keys.parse_pending(&meta.path))
            .collect())
    }

    /// Counts collections by state.
    ///
    /// # Errors
    ///
    /// Returns an error if listing fails.
    pub async fn status(&self) -> Result<StoreStatus> {
        let results = self.list_results(None, None).await?;
        let resolved: BTreeSet<&str> = results.iter().map(|k| k.concept_id.as_str()).collect();
        let pending = self
            .pending_ids()
            .await?
            .iter()
            .filter(|id| !resolved.contains(id.as_str()))
            .count();

        let mut status = StoreStatus {
            pending,
            processed: resolved.len(),
            ..StoreStatus::default()
        };
        for key in &results {
            if key.success {
                status.successful += 1;
            }
            *status.by_reason.entry(key.reason.clone()).or_default() += 1;
        }
        Ok(status)
    }

    /// Downloads every result object. Unreadable objects are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if listing fails.
    pub async fn all_results(&self) -> Result<Vec<Assessment>> {
        let paths: Vec<String> = self
            .backend
            .list(&self.keys.processed_root())
            .await?
            .into_iter()
            .filter(|meta| self.keys.parse_result(&meta.path).is_some())
            .map(|meta| meta.path)
            .collect();

        let assessments = futures::stream::iter(paths)
            .map(|path| {
                let backend = Arc::clone(&self.backend);
                async move {
                    let parsed = match backend.get(&path).await {
                        Ok(bytes) => serde_json::from_slice::<Assessment>(&bytes).map_err(|e| e.to_string()),
                        Err(e) => Err(e.to_string()),
                    };
                    match parsed {
                        Ok(a) => Some(a),
                        Err(error) => {
                            tracing::error!(%path, %error, "skipping unreadable result");
                            None
                        }
                    }
                }
            })
            .buffer_unordered(DOWNLOAD_CONCURRENCY)
            .filter_map(|a| async move { a })
            .collect::<Vec<_>>()
            .await;

        Ok(assessments)
    }

    /// Returns true if the backend answers a listing of the store root.
    ///
    /// # Errors
    ///
    /// Returns the listing error.
    pub async fn ping(&self) -> Result<()> {
        self.backend
            .list(&format!("{}/", self.keys.prefix()))
            .await
            .map(|_| ())
            .map_err(Into::into)
    }
}
