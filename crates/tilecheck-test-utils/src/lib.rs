//! Shared test utilities for tilecheck integration tests.
//!
//! This crate provides:
//! - [`TracingMemoryBackend`]: In-memory storage with operation recording and
//!   injected failures
//! - [`TestContext`]: Catalog, stubs and store wired into a pipeline
//! - Factory functions for catalog records and UMM JSON bodies
//! - Custom assertion helpers
//!
//! # Example
//!
//! ```rust,ignore
//! use tilecheck_test_utils::{test_config, CatalogFactory, TestContext};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let mut ctx = TestContext::new();
//!     let (collection, granules, url) = CatalogFactory::cog("C1-TEST");
//!     ctx.add(collection, granules);
//!     ctx.dataset(&url, ["Red", "Green", "Blue"]);
//!     let summary = ctx.pipeline(test_config()).run(None, &mut Vec::new()).await.unwrap();
//!     // ... assert ...
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod assertions;
pub mod fixtures;
pub mod storage;

pub use assertions::*;
pub use fixtures::*;
pub use storage::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("tilecheck_flow=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
