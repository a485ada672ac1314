//! Dataset openers.
//!
//! An opener takes a data URL and reports the named fields of the file: bands
//! for raster files, variables for array files. Openers own whatever resource
//! they use to read the file and must release it when their future is dropped,
//! since the classifier abandons an open that outlives its timeout.

pub mod gdal;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::credentials::Credentials;
use crate::error::{Error, Result};
use crate::model::Backend;

/// What to open.
#[derive(Debug, Clone)]
pub struct OpenRequest<'a> {
    /// Data URL.
    pub url: &'a str,
    /// Provider (data center) the file belongs to.
    pub provider: Option<&'a str>,
    /// Credentials for the provider.
    pub credentials: &'a Credentials,
}

/// Field listing of an opened dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetInfo {
    /// Field names in file order.
    pub fields: Vec<String>,
}

/// Opens datasets of one backend family.
#[async_trait]
pub trait DatasetOpener: Send + Sync {
    /// Opens the dataset and lists its fields.
    async fn open(&self, request: &OpenRequest<'_>) -> Result<DatasetInfo>;
}

/// One opener per backend.
#[derive(Clone)]
pub struct OpenerSet {
    raster: Arc<dyn DatasetOpener>,
    array: Arc<dyn DatasetOpener>,
}

impl OpenerSet {
    /// Creates a set from per-backend openers.
    #[must_use]
    pub fn new(raster: Arc<dyn DatasetOpener>, array: Arc<dyn DatasetOpener>) -> Self {
        Self { raster, array }
    }

    /// Uses the same opener for every backend.
    #[must_use]
    pub fn uniform(opener: Arc<dyn DatasetOpener>) -> Self {
        Self {
            raster: Arc::clone(&opener),
            array: opener,
        }
    }

    /// Returns the opener for `backend`.
    #[must_use]
    pub fn for_backend(&self, backend: Backend) -> &dyn DatasetOpener {
        match backend {
            Backend::Raster => self.raster.as_ref(),
            Backend::Array => self.array.as_ref(),
        }
    }
}

impl std::fmt::Debug for OpenerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenerSet").finish_non_exhaustive()
    }
}

/// Opener answering from a fixed table, keyed by URL.
///
/// Unknown URLs fail to open. Counts calls and can delay every open.
#[derive(Debug, Clone, Default)]
pub struct StaticOpener {
    fields: HashMap<String, Vec<String>>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl StaticOpener {
    /// Creates an opener that knows no URLs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the fields of a URL.
    #[must_use]
    pub fn with_dataset<I, S>(mut self, url: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields
            .insert(url.into(), fields.into_iter().map(Into::into).collect());
        self
    }

    /// Delays every open by `delay`.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Returns the number of open calls.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatasetOpener for StaticOpener {
    async fn open(&self, request: &OpenRequest<'_>) -> Result<DatasetInfo> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.fields
            .get(request.url)
            .map(|fields| DatasetInfo {
                fields: fields.clone(),
            })
            .ok_or_else(|| Error::Open {
                url: request.url.to_string(),
                message: "no such dataset".into(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_opener_lists_fields() {
        let opener = StaticOpener::new().with_dataset("s3://b/a.tif", ["Red", "Green"]);
        let creds = Credentials::anonymous();
        let info = opener
            .open(&OpenRequest {
                url: "s3://b/a.tif",
                provider: None,
                credentials: &creds,
            })
            .await
            .unwrap();
        assert_eq!(info.fields, vec!["Red", "Green"]);

        let err = opener
            .open(&OpenRequest {
                url: "s3://b/missing.tif",
                provider: None,
                credentials: &creds,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Open { .. }));
        assert_eq!(opener.calls(), 2);
    }

    #[test]
    fn opener_set_routes_by_backend() {
        let raster = Arc::new(StaticOpener::new().with_dataset("r", ["Red"]));
        let array = Arc::new(StaticOpener::new());
        let set = OpenerSet::new(raster, array);
        let _ = set.for_backend(Backend::Raster);
        let _ = set.for_backend(Backend::Array);
    }
}
