//! Tile probing.
//!
//! The probe renders one tile for a classified assessment and upgrades its
//! outcome. It only ever changes the outcome and detail, through
//! [`Assessment::with_outcome`], and never retries.

pub mod titiler;

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::credentials::Credentials;
use crate::error::{Error, Result};
use crate::model::{Assessment, TileRequest};
use crate::outcome::Outcome;

/// A service that renders map tiles.
#[async_trait]
pub trait TileBackend: Send + Sync {
    /// Renders the tile described by `request`, returning image bytes.
    async fn tile(&self, request: &TileRequest, credentials: &Credentials) -> Result<Bytes>;
}

/// Runs the tile probe for assessments.
#[derive(Clone)]
pub struct ProbeRunner {
    backend: Arc<dyn TileBackend>,
}

impl std::fmt::Debug for ProbeRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeRunner").finish_non_exhaustive()
    }
}

impl ProbeRunner {
    /// Creates a probe runner over a tile backend.
    #[must_use]
    pub fn new(backend: Arc<dyn TileBackend>) -> Self {
        Self { backend }
    }

    /// Probes an assessment.
    ///
    /// Assessments without a tile request, or already carrying a
    /// classification verdict, are returned unchanged.
    pub async fn probe(&self, assessment: Assessment, credentials: &Credentials) -> Assessment {
        let concept_id = assessment.collection_concept_id.as_str();

        if let Some(outcome) = assessment.outcome.filter(Outcome::blocks_probe) {
            tracing::warn!(concept_id, %outcome, "refusing to probe a classified assessment");
            return assessment;
        }
        let Some(request) = &assessment.tile_request else {
            tracing::debug!(concept_id, "no tile request, probe skipped");
            return assessment;
        };

        match self.backend.tile(request, credentials).await {
            Ok(image) => {
                tracing::info!(concept_id, bytes = image.len(), "tile generated");
                assessment.with_outcome(Outcome::Success, None)
            }
            Err(e) => {
                tracing::info!(concept_id, error = %e, "tile generation failed");
                assessment.with_outcome(Outcome::TileGenerationFailed, Some(e.to_string()))
            }
        }
    }
}

/// Tile backend with canned answers, for tests and dry runs.
///
/// Succeeds for every collection except those marked failing. Counts calls
/// and can delay every request.
#[derive(Debug, Clone, Default)]
pub struct StaticTileBackend {
    failing: HashSet<String>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl StaticTileBackend {
    /// Creates a backend that renders every tile.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes tiles of `concept_id` fail.
    #[must_use]
    pub fn failing_for(mut self, concept_id: impl Into<String>) -> Self {
        self.failing.insert(concept_id.into());
        self
    }

    /// Delays every request by `delay`.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Returns the number of tile calls.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TileBackend for StaticTileBackend {
    async fn tile(&self, request: &TileRequest, _credentials: &Credentials) -> Result<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.contains(&request.concept_id) {
            return Err(Error::Tile {
                message: format!("no data for {} at z={}", request.concept_id, request.z),
            });
        }
        Ok(Bytes::from_static(b"\x89PNG"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Backend;

    fn ready(concept_id: &str) -> Assessment {
        let mut a = Assessment::new(concept_id);
        a.tile_request = Some(TileRequest::probe(concept_id, Backend::Raster, "Red", None));
        a
    }

    #[tokio::test]
    async fn success_and_failure() {
        let backend = Arc::new(StaticTileBackend::new().failing_for("C2-P"));
        let runner = ProbeRunner::new(backend.clone());
        let creds = Credentials::anonymous();

        let ok = runner.probe(ready("C1-P"), &creds).await;
        assert_eq!(ok.outcome, Some(Outcome::Success));
        assert!(ok.detail.is_none());

        let failed = runner.probe(ready("C2-P"), &creds).await;
        assert_eq!(failed.outcome, Some(Outcome::TileGenerationFailed));
        assert!(failed.detail.unwrap().contains("no data"));
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn probe_without_request_is_noop() {
        let backend = Arc::new(StaticTileBackend::new());
        let runner = ProbeRunner::new(backend.clone());
        let input = Assessment::new("C1-P");

        let output = runner.probe(input.clone(), &Credentials::anonymous()).await;
        assert_eq!(output, input);
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn classified_failures_are_never_probed() {
        let backend = Arc::new(StaticTileBackend::new());
        let runner = ProbeRunner::new(backend.clone());
        let input = ready("C1-P").with_outcome(Outcome::CantExtractVariables, None);

        let output = runner.probe(input.clone(), &Credentials::anonymous()).await;
        assert_eq!(output, input);
        assert_eq!(backend.calls(), 0);
    }
}
