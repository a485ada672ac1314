//! Storage backend abstraction for object storage (S3, local, memory).
//!
//! This module defines the storage contract that the result store builds on:
//! - Conditional writes with preconditions
//! - Object metadata including `last_modified` and `etag`
//! - Prefix listing that never reads object bodies
//!
//! ## Key layout
//!
//! Object stores match list prefixes on whole path segments, so callers should
//! always pass prefixes that end in `/`. [`MemoryBackend`] uses a plain string
//! prefix match, which agrees with that convention for segment-aligned prefixes.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutMode, PutOptions, PutPayload, UpdateVersion};

use crate::error::{Error, Result};

/// Precondition for conditional writes.
///
/// The version token is opaque; backends interpret it according to their semantics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WritePrecondition {
    /// Write only if object does not exist.
    DoesNotExist,
    /// Write only if object's version matches the given token.
    MatchesVersion(String),
    /// Write unconditionally.
    None,
}

/// Result of a conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// Write succeeded, returns new version token.
    Success {
        /// The new version token after the write.
        version: String,
    },
    /// Precondition failed, returns current version token.
    PreconditionFailed {
        /// The current version that caused the precondition to fail.
        current_version: String,
    },
}

impl WriteResult {
    /// Returns true if the write went through.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Metadata about a stored object.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    /// Object path (key).
    pub path: String,
    /// Object size in bytes.
    pub size: u64,
    /// Object version token.
    pub version: String,
    /// Last modification timestamp.
    pub last_modified: Option<DateTime<Utc>>,
    /// Entity tag for cache validation.
    pub etag: Option<String>,
}

/// Storage backend trait for object storage.
///
/// All storage backends (S3, local filesystem, memory) implement this trait.
/// The contract is designed for cloud object storage semantics: single-key
/// puts are atomic and there are no real directories.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Reads entire object.
    ///
    /// Returns `Error::NotFound` if object doesn't exist.
    async fn get(&self, path: &str) -> Result<Bytes>;

    /// Writes with optional precondition.
    ///
    /// Returns `WriteResult::PreconditionFailed` if precondition not met.
    /// Never returns error for precondition failure - that's a normal result.
    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult>;

    /// Deletes an object.
    ///
    /// Succeeds even if object doesn't exist (idempotent).
    async fn delete(&self, path: &str) -> Result<()>;

    /// Lists objects with the given prefix.
    ///
    /// Returns empty vec if no objects match. Results are returned in
    /// arbitrary order; callers requiring deterministic order should sort.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;

    /// Gets object metadata without reading content.
    ///
    /// Returns `None` if object doesn't exist.
    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>>;
}

/// In-memory storage backend for testing and dry runs.
///
/// Thread-safe via `RwLock`. Uses numeric versions internally (stored as strings).
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    version: i64,
    last_modified: DateTime<Utc>,
}

impl StoredObject {
    fn meta(&self, path: &str) -> ObjectMeta {
        ObjectMeta {
            path: path.to_string(),
            size: self.data.len() as u64,
            version: self.version.to_string(),
            last_modified: Some(self.last_modified),
            etag: Some(format!("\"{}\"", self.version)),
        }
    }
}

fn poisoned() -> Error {
    Error::Internal {
        message: "lock poisoned".into(),
    }
}

impl MemoryBackend {
    /// Creates a new empty memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored objects.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        Ok(self.objects.read().map_err(|_| poisoned())?.len())
    }

    /// Returns true if nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        let objects = self.objects.read().map_err(|_| poisoned())?;

        objects
            .get(path)
            .map(|o| o.data.clone())
            .ok_or_else(|| Error::NotFound(format!("object not found: {path}")))
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        let mut objects = self.objects.write().map_err(|_| poisoned())?;

        let current = objects.get(path);

        match precondition {
            WritePrecondition::DoesNotExist => {
                if let Some(obj) = current {
                    return Ok(WriteResult::PreconditionFailed {
                        current_version: obj.version.to_string(),
                    });
                }
            }
            WritePrecondition::MatchesVersion(expected) => {
                let expected_num: i64 = expected.parse().unwrap_or(-1);
                match current {
                    Some(obj) if obj.version != expected_num => {
                        return Ok(WriteResult::PreconditionFailed {
                            current_version: obj.version.to_string(),
                        });
                    }
                    None => {
                        return Ok(WriteResult::PreconditionFailed {
                            current_version: "0".to_string(),
                        });
                    }
                    _ => {}
                }
            }
            WritePrecondition::None => {}
        }

        let new_version = current.map_or(1, |o| o.version + 1);
        objects.insert(
            path.to_string(),
            StoredObject {
                data,
                version: new_version,
                last_modified: Utc::now(),
            },
        );
        drop(objects);

        Ok(WriteResult::Success {
            version: new_version.to_string(),
        })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.objects.write().map_err(|_| poisoned())?.remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let objects = self.objects.read().map_err(|_| poisoned())?;

        Ok(objects
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(path, obj)| obj.meta(path))
            .collect())
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        let objects = self.objects.read().map_err(|_| poisoned())?;
        Ok(objects.get(path).map(|obj| obj.meta(path)))
    }
}

/// Storage backend over any [`object_store::ObjectStore`] (S3, local filesystem).
#[derive(Debug, Clone)]
pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreBackend {
    /// Wraps an existing object store.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Creates an S3 backend for `bucket`, reading region and credentials
    /// from the standard `AWS_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the S3 client cannot be configured.
    pub fn s3(bucket: &str) -> Result<Self> {
        let store = object_store::aws::AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .build()
            .map_err(|e| Error::storage_with_source(format!("failed to configure s3 bucket {bucket}"), e))?;
        Ok(Self::new(Arc::new(store)))
    }

    /// Creates a local filesystem backend rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or canonicalized.
    pub fn local(root: &std::path::Path) -> Result<Self> {
        std::fs::create_dir_all(root).map_err(|e| {
            Error::storage_with_source(format!("failed to create {}", root.display()), e)
        })?;
        let store = object_store::local::LocalFileSystem::new_with_prefix(root)
            .map_err(|e| Error::storage_with_source("failed to open local store", e))?;
        Ok(Self::new(Arc::new(store)))
    }

    fn convert_meta(meta: object_store::ObjectMeta) -> ObjectMeta {
        let version = meta
            .version
            .clone()
            .or_else(|| meta.e_tag.clone())
            .unwrap_or_default();
        ObjectMeta {
            path: meta.location.to_string(),
            size: meta.size as u64,
            version,
            last_modified: Some(meta.last_modified),
            etag: meta.e_tag,
        }
    }

    async fn current_version(&self, location: &ObjectPath) -> String {
        match self.store.head(location).await {
            Ok(meta) => Self::convert_meta(meta).version,
            Err(_) => String::new(),
        }
    }
}

#[async_trait]
impl StorageBackend for ObjectStoreBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        let location = ObjectPath::from(path);
        match self.store.get(&location).await {
            Ok(result) => result
                .bytes()
                .await
                .map_err(|e| Error::storage_with_source(format!("failed to read {path}"), e)),
            Err(object_store::Error::NotFound { .. }) => {
                Err(Error::NotFound(format!("object not found: {path}")))
            }
            Err(e) => Err(Error::storage_with_source(format!("failed to get {path}"), e)),
        }
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        let location = ObjectPath::from(path);
        let mode = match precondition {
            WritePrecondition::DoesNotExist => PutMode::Create,
            WritePrecondition::MatchesVersion(version) => PutMode::Update(UpdateVersion {
                e_tag: Some(version),
                version: None,
            }),
            WritePrecondition::None => PutMode::Overwrite,
        };
        let opts = PutOptions {
            mode,
            ..PutOptions::default()
        };

        match self
            .store
            .put_opts(&location, PutPayload::from(data), opts)
            .await
        {
            Ok(result) => Ok(WriteResult::Success {
                version: result.version.or(result.e_tag).unwrap_or_default(),
            }),
            Err(
                object_store::Error::AlreadyExists { .. } | object_store::Error::Precondition { .. },
            ) => Ok(WriteResult::PreconditionFailed {
                current_version: self.current_version(&location).await,
            }),
            Err(e) => Err(Error::storage_with_source(format!("failed to put {path}"), e)),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let location = ObjectPath::from(path);
        match self.store.delete(&location).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(Error::storage_with_source(format!("failed to delete {path}"), e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let location = ObjectPath::from(prefix);
        self.store
            .list(Some(&location))
            .map_ok(Self::convert_meta)
            .try_collect()
            .await
            .map_err(|e| Error::storage_with_source(format!("failed to list {prefix}"), e))
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        let location = ObjectPath::from(path);
        match self.store.head(&location).await {
            Ok(meta) => Ok(Some(Self::convert_meta(meta))),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(Error::storage_with_source(format!("failed to head {path}"), e)),
        }
    }
}

/// Opens a storage backend from a location string.
///
/// Accepted forms:
/// - `memory://` - process-local, lost on exit
/// - `s3://bucket` - S3 bucket (credentials from the environment)
/// - `file:///abs/path` or a bare filesystem path
///
/// # Errors
///
/// Returns an error if the location is empty or the backend cannot be configured.
pub fn open_backend(location: &str) -> Result<Arc<dyn StorageBackend>> {
    let location = location.trim();
    if location.is_empty() {
        return Err(Error::InvalidInput("storage location must not be empty".into()));
    }

    if location == "memory://" {
        return Ok(Arc::new(MemoryBackend::new()));
    }

    if let Some(rest) = location.strip_prefix("s3://") {
        let bucket = rest.split('/').next().unwrap_or_default();
        if bucket.is_empty() {
            return Err(Error::InvalidInput(format!("missing bucket in {location}")));
        }
        return Ok(Arc::new(ObjectStoreBackend::s3(bucket)?));
    }

    let path = location.strip_prefix("file://").unwrap_or(location);
    Ok(Arc::new(ObjectStoreBackend::local(std::path::Path::new(path))?))
}
