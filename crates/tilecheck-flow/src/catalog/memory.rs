//! In-memory catalog for tests and dry runs.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::{CatalogClient, CollectionQuery, GranuleQuery, SearchPage};
use crate::error::{Error, Result};
use crate::model::{CollectionRef, GranuleRef};

#[derive(Debug, Default)]
struct Inner {
    collections: Vec<CollectionRef>,
    granules: HashMap<String, Vec<GranuleRef>>,
    failing_pages: HashSet<u64>,
    unreachable: bool,
}

/// Catalog backed by in-process vectors.
///
/// Collections are returned in insertion order. Granule searches honor
/// offsets. Specific collection pages can be made to fail.
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    inner: Arc<RwLock<Inner>>,
    collection_calls: Arc<AtomicUsize>,
    granule_calls: Arc<AtomicUsize>,
}

fn poisoned() -> Error {
    Error::catalog("memory catalog lock poisoned")
}

impl MemoryCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a collection with its granules.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn insert(&self, collection: CollectionRef, granules: Vec<GranuleRef>) -> Result<()> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        inner
            .granules
            .insert(collection.concept_id.clone(), granules);
        inner.collections.push(collection);
        Ok(())
    }

    /// Makes collection searches for `page_num` fail.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn fail_page(&self, page_num: u64) -> Result<()> {
        self.inner
            .write()
            .map_err(|_| poisoned())?
            .failing_pages
            .insert(page_num);
        Ok(())
    }

    /// Makes every search fail as if the catalog were unreachable.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn set_unreachable(&self, unreachable: bool) -> Result<()> {
        self.inner.write().map_err(|_| poisoned())?.unreachable = unreachable;
        Ok(())
    }

    /// Returns how many collection searches were served.
    #[must_use]
    pub fn collection_calls(&self) -> usize {
        self.collection_calls.load(Ordering::SeqCst)
    }

    /// Returns how many granule searches were served.
    #[must_use]
    pub fn granule_calls(&self) -> usize {
        self.granule_calls.load(Ordering::SeqCst)
    }
}

fn window<T: Clone>(items: &[T], start: usize, len: usize) -> Vec<T> {
    items.iter().skip(start).take(len).cloned().collect()
}

#[async_trait]
impl CatalogClient for MemoryCatalog {
    async fn search_collections(&self, query: &CollectionQuery) -> Result<SearchPage<CollectionRef>> {
        self.collection_calls.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.read().map_err(|_| poisoned())?;

        if inner.unreachable {
            return Err(Error::CatalogUnavailable {
                message: "memory catalog marked unreachable".into(),
            });
        }
        if inner.failing_pages.contains(&query.page_num) {
            return Err(Error::Catalog {
                message: format!("injected failure for page {}", query.page_num),
                status: Some(503),
                source: None,
            });
        }

        if let Some(id) = &query.concept_id {
            let items: Vec<_> = inner
                .collections
                .iter()
                .filter(|c| &c.concept_id == id)
                .cloned()
                .collect();
            return Ok(SearchPage {
                hits: items.len() as u64,
                items,
            });
        }

        let page_index = usize::try_from(query.page_num.saturating_sub(1)).unwrap_or(usize::MAX);
        let start = page_index.saturating_mul(query.page_size);
        Ok(SearchPage {
            hits: inner.collections.len() as u64,
            items: window(&inner.collections, start, query.page_size),
        })
    }

    async fn search_granules(&self, query: &GranuleQuery) -> Result<SearchPage<GranuleRef>> {
        self.granule_calls.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.read().map_err(|_| poisoned())?;

        if inner.unreachable {
            return Err(Error::CatalogUnavailable {
                message: "memory catalog marked unreachable".into(),
            });
        }

        match query {
            GranuleQuery::ByCollection {
                concept_id,
                offset,
                page_size,
            } => {
                let granules = inner.granules.get(concept_id).map_or(&[][..], Vec::as_slice);
                let start = usize::try_from(offset.unwrap_or(0)).unwrap_or(usize::MAX);
                Ok(SearchPage {
                    hits: granules.len() as u64,
                    items: window(granules, start, *page_size),
                })
            }
            GranuleQuery::ById { granule_id } => {
                let items: Vec<_> = inner
                    .granules
                    .values()
                    .flatten()
                    .filter(|g| &g.granule_id == granule_id)
                    .take(1)
                    .cloned()
                    .collect();
                Ok(SearchPage {
                    hits: items.len() as u64,
                    items,
                })
            }
        }
    }
}
