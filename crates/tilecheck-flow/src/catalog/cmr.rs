//! HTTP client for a CMR-compatible search API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::umm;
use super::{CatalogClient, CollectionQuery, GranuleQuery, SearchPage};
use crate::error::{Error, Result};
use crate::model::{CollectionRef, GranuleRef};

/// Default catalog root.
pub const DEFAULT_CMR_URL: &str = "https://cmr.earthdata.nasa.gov";

/// Media type requesting UMM JSON result envelopes.
pub const UMM_JSON_ACCEPT: &str = "application/vnd.nasa.cmr.umm_results+json";

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Catalog client over HTTP.
#[derive(Debug, Clone)]
pub struct CmrClient {
    client: Client,
    base_url: String,
}

impl CmrClient {
    /// Creates a client for the catalog rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::catalog_with_source("failed to create HTTP client", e))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn collections_url(&self) -> String {
        format!("{}/search/collections.umm_json", self.base_url)
    }

    fn granules_url(&self) -> String {
        format!("{}/search/granules.umm_json", self.base_url)
    }

    async fn fetch(&self, url: &str, params: &[(&str, String)]) -> Result<bytes::Bytes> {
        let response = self
            .client
            .get(url)
            .query(params)
            .header(reqwest::header::ACCEPT, UMM_JSON_ACCEPT)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    Error::CatalogUnavailable {
                        message: format!("{url}: {e}"),
                    }
                } else {
                    Error::catalog_with_source(format!("request to {url} failed"), e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Catalog {
                message: format!("catalog returned {status}: {body}"),
                status: Some(status.as_u16()),
                source: None,
            });
        }

        response
            .bytes()
            .await
            .map_err(|e| Error::catalog_with_source("failed to read catalog response", e))
    }
}

/// Builds the query string of a collection search.
#[must_use]
pub fn collection_params(query: &CollectionQuery) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("page_size", query.page_size.to_string()),
        ("page_num", query.page_num.max(1).to_string()),
        ("has_granules_or_cwic", "true".to_string()),
        ("sort_key[]", "-usage_score".to_string()),
        ("processing_level_id[]", "3".to_string()),
        ("processing_level_id[]", "4".to_string()),
    ];
    if let Some(id) = &query.concept_id {
        params.push(("concept_id", id.clone()));
    }
    params
}

/// Builds the query string of a granule search.
#[must_use]
pub fn granule_params(query: &GranuleQuery) -> Vec<(&'static str, String)> {
    match query {
        GranuleQuery::ByCollection {
            concept_id,
            offset,
            page_size,
        } => {
            let mut params = vec![
                ("collection_concept_id", concept_id.clone()),
                ("page_size", page_size.to_string()),
            ];
            if let Some(offset) = offset {
                params.push(("offset", offset.to_string()));
            }
            params
        }
        GranuleQuery::ById { granule_id } => vec![
            ("concept_id", granule_id.clone()),
            ("page_size", "1".to_string()),
        ],
    }
}

#[async_trait]
impl CatalogClient for CmrClient {
    async fn search_collections(&self, query: &CollectionQuery) -> Result<SearchPage<CollectionRef>> {
        let body = self
            .fetch(&self.collections_url(), &collection_params(query))
            .await?;
        let page = umm::parse_collection_page(&body)?;
        tracing::debug!(
            page_num = query.page_num,
            hits = page.hits,
            items = page.items.len(),
            "fetched collection page"
        );
        Ok(page)
    }

    async fn search_granules(&self, query: &GranuleQuery) -> Result<SearchPage<GranuleRef>> {
        let body = self.fetch(&self.granules_url(), &granule_params(query)).await?;
        umm::parse_granule_page(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_query_carries_ranking_filters() {
        let params = collection_params(&CollectionQuery::page(3, 100));
        assert!(params.contains(&("page_num", "3".to_string())));
        assert!(params.contains(&("sort_key[]", "-usage_score".to_string())));
        assert_eq!(
            params
                .iter()
                .filter(|(k, _)| *k == "processing_level_id[]")
                .count(),
            2
        );
        assert!(!params.iter().any(|(k, _)| *k == "concept_id"));

        let params = collection_params(&CollectionQuery::by_id("C1-P"));
        assert!(params.contains(&("concept_id", "C1-P".to_string())));
    }

    #[test]
    fn granule_query_offsets() {
        let params = granule_params(&GranuleQuery::ByCollection {
            concept_id: "C1-P".into(),
            offset: Some(17),
            page_size: 1,
        });
        assert!(params.contains(&("offset", "17".to_string())));

        let params = granule_params(&GranuleQuery::ById {
            granule_id: "G1-P".into(),
        });
        assert_eq!(params[0], ("concept_id", "G1-P".to_string()));
    }

    #[test]
    fn urls_trim_trailing_slash() {
        let client = CmrClient::new("https://cmr.example/", DEFAULT_REQUEST_TIMEOUT).unwrap();
        assert_eq!(
            client.collections_url(),
            "https://cmr.example/search/collections.umm_json"
        );
        assert_eq!(client.granules_url(), "https://cmr.example/search/granules.umm_json");
    }
}
