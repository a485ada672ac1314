//! Error types for the probe pipeline.
//!
//! Per-unit failures never surface as `Error`: the classifier and probe runner
//! fold them into an [`Outcome`](crate::outcome::Outcome). These errors cover
//! the seams around the units (catalog paging, persistence, export, config).

/// The result type used throughout tilecheck-flow.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A catalog request failed or returned an unusable response.
    #[error("catalog error: {message}")]
    Catalog {
        /// Description of the failure.
        message: String,
        /// HTTP status, when the catalog answered at all.
        status: Option<u16>,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The catalog could not be reached at all.
    #[error("catalog unavailable: {message}")]
    CatalogUnavailable {
        /// Description of the failure.
        message: String,
    },

    /// A dataset file could not be opened.
    #[error("failed to open {url}: {message}")]
    Open {
        /// The dataset URL.
        url: String,
        /// Description of the failure.
        message: String,
    },

    /// The tiling backend rejected or failed a tile request.
    #[error("tile request failed: {message}")]
    Tile {
        /// Description of the failure.
        message: String,
    },

    /// Credentials could not be acquired.
    #[error("credential error: {message}")]
    Credentials {
        /// Description of the failure.
        message: String,
    },

    /// Configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// An invalid state transition was attempted.
    #[error("invalid state transition: {from} -> {to} ({reason})")]
    InvalidStateTransition {
        /// The current state.
        from: String,
        /// The attempted target state.
        to: String,
        /// The reason the transition is invalid.
        reason: String,
    },

    /// Strict mode stopped the batch after a tile generation failure.
    #[error("strict mode abort on {concept_id}: {detail}")]
    StrictAbort {
        /// The collection whose tile failed.
        concept_id: String,
        /// The recorded failure detail.
        detail: String,
    },

    /// Writing the flat report failed.
    #[error("export error: {message}")]
    Export {
        /// Description of the failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// An error from tilecheck-core.
    #[error("core error: {0}")]
    Core(#[from] tilecheck_core::error::Error),
}

impl Error {
    /// Creates a catalog error without an HTTP status.
    #[must_use]
    pub fn catalog(message: impl Into<String>) -> Self {
        Self::Catalog {
            message: message.into(),
            status: None,
            source: None,
        }
    }

    /// Creates a catalog error with a source cause.
    #[must_use]
    pub fn catalog_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Catalog {
            message: message.into(),
            status: None,
            source: Some(Box::new(source)),
        }
    }

    /// Creates an export error.
    #[must_use]
    pub fn export(message: impl Into<String>) -> Self {
        Self::Export {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an export error with a source cause.
    #[must_use]
    pub fn export_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Export {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a credential error.
    #[must_use]
    pub fn credentials(message: impl Into<String>) -> Self {
        Self::Credentials {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Returns true if the error means the catalog is unreachable.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::CatalogUnavailable { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn state_transition_error_display() {
        let err = Error::InvalidStateTransition {
            from: "completed".into(),
            to: "running".into(),
            reason: "unit already terminal".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("completed"));
        assert!(msg.contains("running"));
        assert!(msg.contains("already terminal"));
    }

    #[test]
    fn catalog_error_with_source() {
        let source = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = Error::catalog_with_source("page 3 failed", source);
        assert!(err.to_string().contains("catalog error"));
        assert!(StdError::source(&err).is_some());
        assert!(!err.is_fatal());
    }

    #[test]
    fn unavailable_catalog_is_fatal() {
        let err = Error::CatalogUnavailable {
            message: "dns failure".into(),
        };
        assert!(err.is_fatal());
    }

    #[test]
    fn core_errors_convert() {
        let err: Error = tilecheck_core::Error::NotFound("x".into()).into();
        assert!(matches!(err, Error::Core(_)));
    }
}
