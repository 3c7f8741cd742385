//! Joins the two pipelines' outcomes into classified, ranked records.

use std::collections::BTreeMap;

use tracing::warn;

use crate::{
    err_msg,
    result::{ExecutionResult, Status},
    SimParityError,
};

pub mod csv;
pub mod report;
pub mod taxonomy;

pub use report::Report;
pub use taxonomy::{FailureBin, TestClass};

/// One test, both outcomes, and what they mean together.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonRecord {
    pub test_id: String,
    pub class: TestClass,
    pub ground_truth: ExecutionResult,
    pub predicted: ExecutionResult,
    /// Predicted over ground-truth cycles, when both passed.
    pub ratio: Option<f64>,
    /// Cause of a model FAIL with a non-empty diagnostic.
    pub failure_bin: Option<FailureBin>,
}

impl ComparisonRecord {
    pub fn both_pass(&self) -> bool {
        self.ground_truth.is_pass() && self.predicted.is_pass()
    }
}

/// Ratio of predicted to ground-truth cycles. Undefined unless both passed
/// and the ground truth took at least one cycle.
pub fn cycle_ratio(ground_truth: &ExecutionResult, predicted: &ExecutionResult) -> Option<f64> {
    match (ground_truth.cycles(), predicted.cycles()) {
        (Some(actual), Some(estimate)) if actual > 0 => Some(estimate as f64 / actual as f64),
        _ => None,
    }
}

/// Builds one record per ground-truth id, ordered by id.
///
/// Both maps must cover the same ids. Every id must classify, and every
/// non-empty model failure must fall in a known bin.
pub fn compare(
    ground_truth: &BTreeMap<String, ExecutionResult>,
    predicted: &BTreeMap<String, ExecutionResult>,
) -> Result<Vec<ComparisonRecord>, SimParityError> {
    if let Some(extra) = predicted.keys().find(|id| !ground_truth.contains_key(*id)) {
        return Err(err_msg!(
            MissingResult,
            "{} has a model result but no ground-truth result",
            extra
        ));
    }

    let mut records = Vec::with_capacity(ground_truth.len());
    for (id, actual) in ground_truth {
        let estimate = predicted
            .get(id)
            .ok_or_else(|| err_msg!(MissingResult, "{} has no model result", id))?;
        let class = TestClass::classify(id)?;

        let failure_bin = match estimate.diagnostic() {
            Some(diagnostic) if estimate.status() == Status::Fail && !diagnostic.is_empty() => {
                Some(FailureBin::bin(id, diagnostic)?)
            }
            _ => None,
        };

        let ratio = cycle_ratio(actual, estimate);
        if ratio.is_none() && actual.cycles() == Some(0) && estimate.is_pass() {
            warn!(test = %id, "ground truth reports 0 cycles, ratio undefined");
        }

        records.push(ComparisonRecord {
            test_id: id.clone(),
            class,
            ground_truth: actual.clone(),
            predicted: estimate.clone(),
            ratio,
            failure_bin,
        });
    }
    Ok(records)
}

/// Flat per-test row, as written to the status table.
#[derive(Debug, Clone)]
pub struct StatusRow<'a> {
    pub test: &'a str,
    pub class: TestClass,
    pub ground_truth_status: Status,
    pub ground_truth_cycles: Option<u64>,
    pub model_status: Status,
    pub model_cycles: Option<u64>,
    pub ratio: Option<f64>,
    pub failure_bin: Option<String>,
    pub model_diagnostic: Option<&'a str>,
}

impl<'a> From<&'a ComparisonRecord> for StatusRow<'a> {
    fn from(record: &'a ComparisonRecord) -> Self {
        Self {
            test: &record.test_id,
            class: record.class,
            ground_truth_status: record.ground_truth.status(),
            ground_truth_cycles: record.ground_truth.cycles(),
            model_status: record.predicted.status(),
            model_cycles: record.predicted.cycles(),
            ratio: record.ratio,
            failure_bin: record.failure_bin.map(|bin| bin.label()),
            model_diagnostic: record.predicted.diagnostic(),
        }
    }
}
