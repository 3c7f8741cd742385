//! Per-test outcomes and their persisted marker form.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Terminal status of one test in one pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Pass,
    Fail,
    Unknown,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pass => "PASS",
            Status::Fail => "FAIL",
            Status::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a pipeline measured: a cycle count on success, otherwise the opaque
/// diagnostic the simulator left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Metric {
    Cycles(u64),
    Diagnostic(String),
    Absent,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Cycles(cycles) => write!(f, "{cycles}"),
            Metric::Diagnostic(message) => f.write_str(message),
            Metric::Absent => Ok(()),
        }
    }
}

/// Outcome of one test in one pipeline.
///
/// Fields are private so the invariants hold by construction:
/// `Pass` always carries cycles, and `found == false` is always `Unknown`
/// with no metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    found: bool,
    status: Status,
    metric: Metric,
    note: Option<String>,
}

impl ExecutionResult {
    pub fn pass(cycles: u64) -> Self {
        Self {
            found: true,
            status: Status::Pass,
            metric: Metric::Cycles(cycles),
            note: None,
        }
    }

    pub fn fail(diagnostic: impl Into<String>) -> Self {
        Self {
            found: true,
            status: Status::Fail,
            metric: Metric::Diagnostic(diagnostic.into()),
            note: None,
        }
    }

    /// A record exists but its outcome could not be established.
    pub fn unknown(note: impl Into<String>) -> Self {
        Self {
            found: true,
            status: Status::Unknown,
            metric: Metric::Absent,
            note: Some(note.into()),
        }
    }

    /// No record for the test could be located at all.
    pub fn not_found() -> Self {
        Self {
            found: false,
            status: Status::Unknown,
            metric: Metric::Absent,
            note: None,
        }
    }

    /// Like [`not_found`](Self::not_found), but remembers why nothing could be
    /// located (e.g. the host was unreachable).
    pub fn unreachable(note: impl Into<String>) -> Self {
        Self {
            note: Some(note.into()),
            ..Self::not_found()
        }
    }

    pub fn found(&self) -> bool {
        self.found
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn metric(&self) -> &Metric {
        &self.metric
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    pub fn is_pass(&self) -> bool {
        self.status == Status::Pass
    }

    pub fn cycles(&self) -> Option<u64> {
        match self.metric {
            Metric::Cycles(cycles) => Some(cycles),
            _ => None,
        }
    }

    pub fn diagnostic(&self) -> Option<&str> {
        match &self.metric {
            Metric::Diagnostic(message) => Some(message),
            _ => None,
        }
    }

    pub fn to_marker(&self) -> ResultMarker {
        ResultMarker {
            found: self.found,
            result: self.status,
            total_cycles: self.cycles(),
            diagnostic: self.diagnostic().map(str::to_owned),
            note: self.note.clone(),
        }
    }
}

/// On-disk result marker shared with the RTL test bench (`sim_result.yml`).
///
/// The bench writes the status under `res`; simparity writes `result`. Both
/// are accepted when reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMarker {
    #[serde(default = "found_default", skip_serializing_if = "is_found")]
    pub found: bool,
    #[serde(alias = "res")]
    pub result: Status,
    #[serde(rename = "total-cycles", default, skip_serializing_if = "Option::is_none")]
    pub total_cycles: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

fn found_default() -> bool {
    true
}

fn is_found(found: &bool) -> bool {
    *found
}

impl ResultMarker {
    pub fn parse(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Converts the marker back into a result. A PASS without a cycle count is
    /// not trusted and comes back as `Unknown`.
    pub fn into_result(self) -> ExecutionResult {
        if !self.found {
            return match self.note {
                Some(note) => ExecutionResult::unreachable(note),
                None => ExecutionResult::not_found(),
            };
        }
        match (self.result, self.total_cycles) {
            (Status::Pass, Some(cycles)) => ExecutionResult::pass(cycles),
            (Status::Pass, None) => ExecutionResult::unknown("marker reports PASS without total-cycles"),
            (Status::Fail, _) => ExecutionResult::fail(self.diagnostic.unwrap_or_default()),
            (Status::Unknown, _) => {
                ExecutionResult::unknown(self.note.unwrap_or_else(|| "unknown".to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_unknown_without_metric() {
        let result = ExecutionResult::not_found();
        assert!(!result.found());
        assert_eq!(result.status(), Status::Unknown);
        assert_eq!(result.metric(), &Metric::Absent);
    }

    #[test]
    fn test_bench_marker_with_res_key() {
        let marker = ResultMarker::parse("res: PASS\ntotal-cycles: 1234\n").unwrap();
        assert_eq!(marker.into_result(), ExecutionResult::pass(1234));
    }

    #[test]
    fn test_pass_marker_without_cycles_is_untrusted() {
        let marker = ResultMarker::parse("result: PASS\n").unwrap();
        let result = marker.into_result();
        assert_eq!(result.status(), Status::Unknown);
        assert!(result.found());
    }

    #[test]
    fn test_unreachable_survives_persistence() {
        let written = ExecutionResult::unreachable("connection refused")
            .to_marker()
            .to_yaml()
            .unwrap();
        assert!(written.contains("found: false"));
        let back = ResultMarker::parse(&written).unwrap().into_result();
        assert!(!back.found());
        assert_eq!(back.note(), Some("connection refused"));
    }

    #[test]
    fn test_fail_marker_keeps_diagnostic() {
        let written = ExecutionResult::fail("Timeout 100 reached for pipe 3")
            .to_marker()
            .to_yaml()
            .unwrap();
        assert!(written.contains("result: FAIL"));
        let back = ResultMarker::parse(&written).unwrap().into_result();
        assert_eq!(back.diagnostic(), Some("Timeout 100 reached for pipe 3"));
    }
}
