//! # tilecheck-core
//!
//! Shared primitives for the tilecheck workspace.
//!
//! - **Error Types**: Shared error definitions and result types
//! - **Storage**: Object storage abstraction with conditional writes and
//!   prefix listing (S3, local filesystem, memory)
//! - **Observability**: Logging initialization, span helpers, secret redaction
//!
//! ## Example
//!
//! ```rust
//! use tilecheck_core::prelude::*;
//!
//! let backend = MemoryBackend::new();
//! assert!(backend.is_empty().unwrap_or(false));
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod observability;
pub mod storage;

pub use error::{Error, Result};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::observability::{LogFormat, Redacted};
    pub use crate::storage::{
        open_backend, MemoryBackend, ObjectMeta, ObjectStoreBackend, StorageBackend,
        WritePrecondition, WriteResult,
    };
}
