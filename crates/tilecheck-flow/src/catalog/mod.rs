//! Catalog client abstraction.
//!
//! The catalog answers two paged searches: collections (ranked, filtered to
//! processing levels 3 and 4) and granules (by collection with an offset, or
//! by granule id). Every response carries the total hit count alongside the
//! page of items.
//!
//! ## Implementations
//!
//! - [`cmr::CmrClient`]: HTTP client for a CMR-compatible search API
//! - [`memory::MemoryCatalog`]: in-process catalog for tests and dry runs

pub mod cmr;
pub mod memory;
pub mod umm;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{CollectionRef, GranuleRef};

/// Upper bound on granule search offsets accepted by the catalog.
pub const MAX_GRANULE_OFFSET: u64 = 1_000_000;

/// A page of search results plus the total hit count.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchPage<T> {
    /// Total number of matches across all pages.
    pub hits: u64,
    /// Items on this page.
    pub items: Vec<T>,
}

impl<T> SearchPage<T> {
    /// Creates an empty page.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            hits: 0,
            items: Vec::new(),
        }
    }
}

/// A collection search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionQuery {
    /// Page number, 1-indexed.
    pub page_num: u64,
    /// Items per page.
    pub page_size: usize,
    /// Restrict to one collection.
    pub concept_id: Option<String>,
}

impl CollectionQuery {
    /// Creates a query for one page of the ranked collection list.
    #[must_use]
    pub const fn page(page_num: u64, page_size: usize) -> Self {
        Self {
            page_num,
            page_size,
            concept_id: None,
        }
    }

    /// Creates a query for a single collection.
    #[must_use]
    pub fn by_id(concept_id: impl Into<String>) -> Self {
        Self {
            page_num: 1,
            page_size: 1,
            concept_id: Some(concept_id.into()),
        }
    }
}

/// A granule search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GranuleQuery {
    /// Granules of a collection, starting at `offset`.
    ByCollection {
        /// Collection concept id.
        concept_id: String,
        /// Zero-based offset of the first returned granule.
        offset: Option<u64>,
        /// Items per page.
        page_size: usize,
    },
    /// One granule by its concept id.
    ById {
        /// Granule concept id.
        granule_id: String,
    },
}

/// Client for the external catalog.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Searches collections.
    async fn search_collections(&self, query: &CollectionQuery) -> Result<SearchPage<CollectionRef>>;

    /// Searches granules.
    async fn search_granules(&self, query: &GranuleQuery) -> Result<SearchPage<GranuleRef>>;

    /// Returns the number of granules in a collection.
    async fn granule_count(&self, concept_id: &str) -> Result<u64> {
        let page = self
            .search_granules(&GranuleQuery::ByCollection {
                concept_id: concept_id.to_string(),
                offset: None,
                page_size: 1,
            })
            .await?;
        Ok(page.hits)
    }

    /// Returns the granule at `offset` within a collection, if any.
    async fn granule_at(&self, concept_id: &str, offset: u64) -> Result<Option<GranuleRef>> {
        let page = self
            .search_granules(&GranuleQuery::ByCollection {
                concept_id: concept_id.to_string(),
                offset: Some(offset),
                page_size: 1,
            })
            .await?;
        Ok(page.items.into_iter().next())
    }

    /// Looks up one granule by id.
    async fn granule_by_id(&self, granule_id: &str) -> Result<Option<GranuleRef>> {
        let page = self
            .search_granules(&GranuleQuery::ById {
                granule_id: granule_id.to_string(),
            })
            .await?;
        Ok(page.items.into_iter().next())
    }

    /// Looks up one collection by id.
    async fn collection_by_id(&self, concept_id: &str) -> Result<Option<CollectionRef>> {
        let page = self
            .search_collections(&CollectionQuery::by_id(concept_id))
            .await?;
        Ok(page.items.into_iter().next())
    }
}
