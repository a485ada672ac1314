//! Custom assertion helpers for integration tests.

use tilecheck_flow::model::Assessment;
use tilecheck_flow::outcome::Outcome;
use tilecheck_flow::pipeline::RunSummary;

use crate::storage::StorageOp;

/// Asserts that every processed collection is accounted for exactly once.
///
/// # Panics
///
/// Panics if `processed` differs from successes plus failures plus unprobed.
pub fn assert_accounting(summary: &RunSummary) {
    assert_eq!(
        summary.processed,
        summary.successes() + summary.failures() + summary.unprobed(),
        "accounting identity broken: {summary:?}"
    );
}

/// Asserts the outcome of the assessment for `concept_id`.
///
/// # Panics
///
/// Panics if the assessment is missing or carries another outcome.
pub fn assert_outcome(rows: &[Assessment], concept_id: &str, expected: Option<Outcome>) {
    let assessment = rows
        .iter()
        .find(|a| a.collection_concept_id == concept_id)
        .unwrap_or_else(|| panic!("no assessment for {concept_id}"));
    assert_eq!(
        assessment.outcome, expected,
        "unexpected outcome for {concept_id}: {:?}",
        assessment.detail
    );
}

/// Asserts that classification verdicts never carry a probe-side outcome.
///
/// # Panics
///
/// Panics if an assessment without a tile request has a probe outcome.
pub fn assert_unprobed_never_tiled(rows: &[Assessment]) {
    for a in rows.iter().filter(|a| a.tile_request.is_none()) {
        assert!(
            !matches!(
                a.outcome,
                Some(Outcome::Success | Outcome::TileGenerationFailed)
            ),
            "{} has no tile request but outcome {:?}",
            a.collection_concept_id,
            a.outcome
        );
    }
}

/// Asserts that storage operations contain expected patterns.
///
/// # Panics
///
/// Panics if expected operations are not found.
pub fn assert_storage_ops_contain(ops: &[StorageOp], expected: &[(&str, &str)]) {
    for (op_type, path_prefix) in expected {
        let found = ops.iter().any(|op| {
            let actual_type = match op {
                StorageOp::Get { .. } => "get",
                StorageOp::Head { .. } => "head",
                StorageOp::Put { .. } => "put",
                StorageOp::Delete { .. } => "delete",
                StorageOp::List { .. } => "list",
            };
            actual_type == *op_type && op.path().starts_with(path_prefix)
        });
        assert!(
            found,
            "Expected {op_type} operation on path starting with '{path_prefix}', not found in {ops:?}",
        );
    }
}

/// Asserts that no object under a prefix was read.
///
/// Filters by outcome must be answered by listing alone; this checks that no
/// result body was fetched.
///
/// # Panics
///
/// Panics if a get touched the prefix.
pub fn assert_no_reads_under(ops: &[StorageOp], forbidden_prefix: &str) {
    for op in ops {
        if let StorageOp::Get { path } = op {
            assert!(
                !path.starts_with(forbidden_prefix),
                "read under forbidden prefix: {path} (prefix: {forbidden_prefix})",
            );
        }
    }
}
