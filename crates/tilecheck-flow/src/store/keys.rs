//! Object key layout of the result store.
//!
//! ```text
//! {prefix}/unprocessed/{concept_id}/.marker
//! {prefix}/processed/{concept_id}/status={true|false}/reason={label|none}/result.json
//! {prefix}/pointers/{concept_id}.json
//! ```
//!
//! The `key=value` segments make outcome filters plain prefix or substring
//! matches on listed keys; no object body is read to answer them.

use crate::error::{Error, Result};
use crate::model::Assessment;

/// Reason segment value for assessments without a failure reason.
pub const NO_REASON: &str = "none";

const UNPROCESSED: &str = "unprocessed";
const PROCESSED: &str = "processed";
const POINTERS: &str = "pointers";
const MARKER: &str = ".marker";
const RESULT: &str = "result.json";

/// A result key decomposed into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultKey {
    /// Collection concept id.
    pub concept_id: String,
    /// Whether the collection tiled.
    pub success: bool,
    /// Outcome label, or [`NO_REASON`].
    pub reason: String,
}

/// Builds and parses store keys under a fixed prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreKeys {
    prefix: String,
}

impl StoreKeys {
    /// Creates a key layout rooted at `prefix`. Leading and trailing slashes are dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefix is empty or contains `..`.
    pub fn new(prefix: impl Into<String>) -> Result<Self> {
        let prefix = prefix.into().trim_matches('/').to_string();
        if prefix.is_empty() {
            return Err(Error::config("store prefix cannot be empty"));
        }
        if prefix.split('/').any(|segment| segment == ".." || segment.is_empty()) {
            return Err(Error::config(format!("invalid store prefix: {prefix}")));
        }
        Ok(Self { prefix })
    }

    /// Returns the prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns the listing prefix of pending markers.
    #[must_use]
    pub fn unprocessed_root(&self) -> String {
        format!("{}/{UNPROCESSED}/", self.prefix)
    }

    /// Returns the listing prefix of result objects.
    #[must_use]
    pub fn processed_root(&self) -> String {
        format!("{}/{PROCESSED}/", self.prefix)
    }

    /// Returns the listing prefix of one collection's result objects.
    #[must_use]
    pub fn processed_dir(&self, concept_id: &str) -> String {
        format!("{}{concept_id}/", self.processed_root())
    }

    /// Returns the pending marker key of a collection.
    #[must_use]
    pub fn pending(&self, concept_id: &str) -> String {
        format!("{}{concept_id}/{MARKER}", self.unprocessed_root())
    }

    /// Returns the pointer key of a collection.
    #[must_use]
    pub fn pointer(&self, concept_id: &str) -> String {
        format!("{}/{POINTERS}/{concept_id}.json", self.prefix)
    }

    /// Returns the result key for an assessment.
    #[must_use]
    pub fn result(&self, assessment: &Assessment) -> String {
        let reason = match assessment.outcome {
            Some(outcome) if !outcome.is_success() => outcome.as_label(),
            _ => NO_REASON,
        };
        format!(
            "{}{}/status={}/reason={reason}/{RESULT}",
            self.processed_root(),
            assessment.collection_concept_id,
            assessment.is_success(),
        )
    }

    /// Extracts the concept id from a pending marker key.
    #[must_use]
    pub fn parse_pending(&self, key: &str) -> Option<String> {
        let rest = key.strip_prefix(&self.unprocessed_root())?;
        let id = rest.strip_suffix(&format!("/{MARKER}"))?;
        (!id.is_empty() && !id.contains('/')).then(|| id.to_string())
    }

    /// Decomposes a result key.
    #[must_use]
    pub fn parse_result(&self, key: &str) -> Option<ResultKey> {
        let rest = key.strip_prefix(&self.processed_root())?;
        let mut parts = rest.split('/');
        let concept_id = parts.next().filter(|s| !s.is_empty())?;
        let success = match parts.next()?.strip_prefix("status=")? {
            "true" => true,
            "false" => false,
            _ => return None,
        };
        let reason = parts.next()?.strip_prefix("reason=")?;
        if parts.next()? != RESULT || parts.next().is_some() || reason.is_empty() {
            return None;
        }
        Some(ResultKey {
            concept_id: concept_id.to_string(),
            success,
            reason: reason.to_string(),
        })
    }
}

/// Validates a concept id for use as a key segment.
///
/// # Errors
///
/// Returns an error if the id is empty, contains path separators or control
/// characters, or is a relative path component.
pub fn validate_concept_id(concept_id: &str) -> Result<()> {
    let invalid = |reason: &str| {
        Err(Error::Core(tilecheck_core::Error::InvalidInput(format!(
            "concept id {concept_id:?} {reason}"
        ))))
    };
    if concept_id.trim().is_empty() {
        return invalid("is empty");
    }
    if concept_id.contains('/') || concept_id.contains('\\') {
        return invalid("contains a path separator");
    }
    if concept_id.chars().any(char::is_control) {
        return invalid("contains control characters");
    }
    if concept_id == "." || concept_id == ".." {
        return invalid("is a relative path component");
    }
    Ok(())
}
