//! Aggregates over a comparison record list.
//!
//! Every function here is pure and deterministic: same records in, same
//! report out.

use std::collections::BTreeMap;

use super::{ComparisonRecord, FailureBin, TestClass};
use crate::{engine::PipelineKind, result::Status};

/// `passed / total`, kept as counts so nothing is lost to rounding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassRate {
    pub passed: usize,
    pub total: usize,
}

impl PassRate {
    pub fn rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.passed as f64 / self.total as f64
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassSummary {
    pub total: usize,
    pub ground_truth_passed: usize,
    pub model_passed: usize,
    pub model_failed: usize,
    pub both_passed: usize,
    /// Records where either pipeline could not establish an outcome.
    pub unknown: usize,
    /// Model failure bin to the ids that landed in it.
    pub bins: BTreeMap<FailureBin, Vec<String>>,
}

impl ClassSummary {
    pub fn both_pass_rate(&self) -> PassRate {
        PassRate {
            passed: self.both_passed,
            total: self.total,
        }
    }

    /// Model PASS over model PASS + FAIL; UNKNOWN is left out.
    pub fn model_pass_rate(&self) -> PassRate {
        PassRate {
            passed: self.model_passed,
            total: self.model_passed + self.model_failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedRatio {
    pub test_id: String,
    pub class: TestClass,
    pub ratio: f64,
}

/// How many ratios fall within each band around 1.0.
#[derive(Debug, Clone, PartialEq)]
pub struct ToleranceSummary {
    pub total: usize,
    /// `(band, count of |r - 1| <= band)`, bands ascending.
    pub within: Vec<(f64, usize)>,
    /// Ratios at or below 1.0, meaning the model did not overestimate.
    pub at_most_one: usize,
}

impl ToleranceSummary {
    pub fn fraction(&self, count: usize) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            count as f64 / self.total as f64
        }
    }
}

/// Every aggregate, computed once.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub ground_truth: PassRate,
    pub model: PassRate,
    pub classes: BTreeMap<TestClass, ClassSummary>,
    pub ranked: Vec<RankedRatio>,
    pub tolerance: ToleranceSummary,
    pub ranked_by_class: BTreeMap<TestClass, Vec<RankedRatio>>,
    /// Raw model diagnostic to the ids that produced it.
    pub model_errors: BTreeMap<String, Vec<String>>,
}

impl Report {
    pub fn build(records: &[ComparisonRecord], bands: &[f64]) -> Self {
        let ranked = rank_ratios(records);
        Self {
            ground_truth: pass_rate(records, PipelineKind::GroundTruth),
            model: pass_rate(records, PipelineKind::Model),
            classes: class_summaries(records),
            tolerance: tolerance(&ranked, bands),
            ranked_by_class: ranked_by_class(&ranked),
            ranked,
            model_errors: model_errors(records),
        }
    }
}

// ============================================================================
// AGGREGATES
// ============================================================================

pub fn pass_rate(records: &[ComparisonRecord], pipeline: PipelineKind) -> PassRate {
    let passed = records
        .iter()
        .filter(|record| match pipeline {
            PipelineKind::GroundTruth => record.ground_truth.is_pass(),
            PipelineKind::Model => record.predicted.is_pass(),
        })
        .count();
    PassRate {
        passed,
        total: records.len(),
    }
}

pub fn class_summaries(records: &[ComparisonRecord]) -> BTreeMap<TestClass, ClassSummary> {
    let mut classes: BTreeMap<TestClass, ClassSummary> = BTreeMap::new();
    for record in records {
        let summary = classes.entry(record.class).or_default();
        summary.total += 1;
        if record.ground_truth.is_pass() {
            summary.ground_truth_passed += 1;
        }
        match record.predicted.status() {
            Status::Pass => summary.model_passed += 1,
            Status::Fail => summary.model_failed += 1,
            Status::Unknown => {}
        }
        if record.both_pass() {
            summary.both_passed += 1;
        }
        if record.ground_truth.status() == Status::Unknown
            || record.predicted.status() == Status::Unknown
        {
            summary.unknown += 1;
        }
        if let Some(bin) = record.failure_bin {
            summary
                .bins
                .entry(bin)
                .or_default()
                .push(record.test_id.clone());
        }
    }
    classes
}

/// Defined ratios, ascending, ties broken by id.
pub fn rank_ratios(records: &[ComparisonRecord]) -> Vec<RankedRatio> {
    let mut ranked: Vec<RankedRatio> = records
        .iter()
        .filter_map(|record| {
            record.ratio.map(|ratio| RankedRatio {
                test_id: record.test_id.clone(),
                class: record.class,
                ratio,
            })
        })
        .collect();
    ranked.sort_by(|a, b| {
        a.ratio
            .total_cmp(&b.ratio)
            .then_with(|| a.test_id.cmp(&b.test_id))
    });
    ranked
}

pub fn tolerance(ranked: &[RankedRatio], bands: &[f64]) -> ToleranceSummary {
    let within = bands
        .iter()
        .map(|band| {
            let count = ranked
                .iter()
                .filter(|r| within_band(r.ratio, *band))
                .count();
            (*band, count)
        })
        .collect();
    ToleranceSummary {
        total: ranked.len(),
        within,
        at_most_one: ranked.iter().filter(|r| r.ratio <= 1.0).count(),
    }
}

/// `|ratio - 1| <= band`, with a little slack so that a ratio of exactly
/// 1.1 counts as inside the 10% band despite float error.
fn within_band(ratio: f64, band: f64) -> bool {
    (ratio - 1.0).abs() <= band + 1e-9
}

pub fn ranked_by_class(ranked: &[RankedRatio]) -> BTreeMap<TestClass, Vec<RankedRatio>> {
    let mut by_class: BTreeMap<TestClass, Vec<RankedRatio>> = BTreeMap::new();
    for entry in ranked {
        by_class.entry(entry.class).or_default().push(entry.clone());
    }
    by_class
}

/// Model FAIL diagnostics grouped by their exact text.
pub fn model_errors(records: &[ComparisonRecord]) -> BTreeMap<String, Vec<String>> {
    let mut errors: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for record in records {
        if record.predicted.status() != Status::Fail {
            continue;
        }
        if let Some(diagnostic) = record.predicted.diagnostic() {
            errors
                .entry(diagnostic.to_string())
                .or_default()
                .push(record.test_id.clone());
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::ExecutionResult;

    fn record(id: &str, class: TestClass, gt: ExecutionResult, model: ExecutionResult) -> ComparisonRecord {
        let ratio = crate::compare::cycle_ratio(&gt, &model);
        let failure_bin = model.diagnostic().and_then(FailureBin::matching);
        ComparisonRecord {
            test_id: id.to_string(),
            class,
            ground_truth: gt,
            predicted: model,
            ratio,
            failure_bin,
        }
    }

    fn sample() -> Vec<ComparisonRecord> {
        vec![
            record("a-matmul", TestClass::Matmul, ExecutionResult::pass(100), ExecutionResult::pass(110)),
            record("b-matmul", TestClass::Matmul, ExecutionResult::pass(100), ExecutionResult::pass(75)),
            record("c-upk", TestClass::Upk, ExecutionResult::pass(100), ExecutionResult::pass(100)),
            record(
                "d-upk",
                TestClass::Upk,
                ExecutionResult::pass(100),
                ExecutionResult::fail("Timeout 9 reached for pipe 2"),
            ),
            record("e-upk", TestClass::Upk, ExecutionResult::not_found(), ExecutionResult::unknown("no inputs")),
        ]
    }

    #[test]
    fn test_pass_rates() {
        let report = Report::build(&sample(), &[0.1, 0.2, 0.3]);
        assert_eq!(report.ground_truth, PassRate { passed: 4, total: 5 });
        assert_eq!(report.model, PassRate { passed: 3, total: 5 });
        assert!((report.model.rate() - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_class_summary_histogram() {
        let classes = class_summaries(&sample());
        let upk = &classes[&TestClass::Upk];
        assert_eq!(upk.total, 3);
        assert_eq!(upk.both_passed, 1);
        assert_eq!(upk.unknown, 1);
        assert_eq!(upk.bins[&FailureBin::PipeTimeout], vec!["d-upk".to_string()]);
        assert_eq!(upk.model_pass_rate(), PassRate { passed: 1, total: 2 });
    }

    #[test]
    fn test_ranking_and_bands() {
        let ranked = rank_ratios(&sample());
        let order: Vec<&str> = ranked.iter().map(|r| r.test_id.as_str()).collect();
        assert_eq!(order, vec!["b-matmul", "c-upk", "a-matmul"]);

        let summary = tolerance(&ranked, &[0.1, 0.2, 0.3]);
        assert_eq!(summary.within, vec![(0.1, 2), (0.2, 2), (0.3, 3)]);
        assert_eq!(summary.at_most_one, 2);
        assert_eq!(summary.total, 3);
    }

    #[test]
    fn test_ties_break_by_id() {
        let records = vec![
            record("z-pck", TestClass::Pck, ExecutionResult::pass(10), ExecutionResult::pass(10)),
            record("y-pck", TestClass::Pck, ExecutionResult::pass(20), ExecutionResult::pass(20)),
        ];
        let ranked = rank_ratios(&records);
        assert_eq!(ranked[0].test_id, "y-pck");
    }

    #[test]
    fn test_model_errors_grouped() {
        let errors = model_errors(&sample());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors["Timeout 9 reached for pipe 2"], vec!["d-upk".to_string()]);
    }
}
