//! Tile backend for a titiler-cmr deployment.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;

use super::TileBackend;
use crate::credentials::Credentials;
use crate::error::{Error, Result};
use crate::model::TileRequest;

/// Default tiling endpoint.
pub const DEFAULT_TITILER_ENDPOINT: &str = "https://staging.openveda.cloud/api/titiler-cmr";

/// Renders tiles through the titiler-cmr HTTP API.
#[derive(Debug, Clone)]
pub struct TitilerBackend {
    client: Client,
    endpoint: String,
}

impl TitilerBackend {
    /// Creates a backend for `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| Error::Tile {
            message: format!("failed to create HTTP client: {e}"),
        })?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// Returns the endpoint tiles are requested from.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl TileBackend for TitilerBackend {
    async fn tile(&self, request: &TileRequest, credentials: &Credentials) -> Result<Bytes> {
        let url = format!(
            "{}/tiles/WebMercatorQuad/{}/{}/{}.png",
            self.endpoint.trim_end_matches('/'),
            request.z,
            request.x,
            request.y
        );

        let mut req = self.client.get(&url).query(&request.query_pairs());
        if let Some(token) = &credentials.token {
            req = req.bearer_auth(token.expose());
        }

        let response = req.send().await.map_err(|e| Error::Tile {
            message: format!("request failed: {e}"),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tile {
                message: format!("tiler returned {status}: {}", body.trim()),
            });
        }

        let image = response.bytes().await.map_err(|e| Error::Tile {
            message: format!("failed to read tile: {e}"),
        })?;
        if image.is_empty() {
            return Err(Error::Tile {
                message: "tiler returned an empty tile".into(),
            });
        }
        Ok(image)
    }
}
