//! Closed taxonomies: which class a test belongs to, and which known cause a
//! model failure falls under.
//!
//! Both tables are fixed. A test id or diagnostic that fits nowhere is an
//! error that aborts the comparison, so a new kind of test or failure cannot
//! slip into the report unnoticed.

use std::fmt;

use crate::{err_msg, SimParityError};

// ============================================================================
// TEST CLASSES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TestClass {
    Datacopy,
    Eltw,
    Matmul,
    Pck,
    Reduce,
    Sfpu,
    Upk,
}

impl TestClass {
    pub const ALL: [TestClass; 7] = [
        TestClass::Datacopy,
        TestClass::Eltw,
        TestClass::Matmul,
        TestClass::Pck,
        TestClass::Reduce,
        TestClass::Sfpu,
        TestClass::Upk,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TestClass::Datacopy => "DATACOPY",
            TestClass::Eltw => "ELTW",
            TestClass::Matmul => "MATMUL",
            TestClass::Pck => "PCK",
            TestClass::Reduce => "REDUCE",
            TestClass::Sfpu => "SFPU",
            TestClass::Upk => "UPK",
        }
    }

    /// Id words that place a test in this class.
    pub fn keywords(&self) -> &'static [&'static str] {
        match self {
            TestClass::Datacopy => &["datacopy"],
            TestClass::Eltw => &["elwmul", "elwadd", "elwsub"],
            TestClass::Matmul => &["matmul"],
            TestClass::Pck => &["pck"],
            TestClass::Reduce => &["reduce"],
            TestClass::Sfpu => &["lrelu", "tanh", "sqrt", "exp", "recip", "relu", "cast"],
            TestClass::Upk => &["upk"],
        }
    }

    /// Classifies a test id by its `-`-separated words. Exactly one class
    /// must claim the id.
    pub fn classify(test_id: &str) -> Result<Self, SimParityError> {
        let words: Vec<&str> = test_id.split('-').collect();
        let matched: Vec<TestClass> = Self::ALL
            .into_iter()
            .filter(|class| class.keywords().iter().any(|kw| words.contains(kw)))
            .collect();
        match matched.as_slice() {
            [class] => Ok(*class),
            [] => Err(err_msg!(
                Classification,
                "could not determine test class for {}",
                test_id
            )),
            many => Err(err_msg!(
                Classification,
                "test {} is ambiguous between classes {}",
                test_id,
                many.iter().map(TestClass::as_str).collect::<Vec<_>>().join(", ")
            )),
        }
    }
}

impl fmt::Display for TestClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// FAILURE BINS
// ============================================================================

/// Known causes of model failures, in match order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FailureBin {
    IndexError,
    PipeTimeout,
    ValidCheckTimeout,
    ResourceSelection,
    AttribMismatch,
}

impl FailureBin {
    pub const ALL: [FailureBin; 5] = [
        FailureBin::IndexError,
        FailureBin::PipeTimeout,
        FailureBin::ValidCheckTimeout,
        FailureBin::ResourceSelection,
        FailureBin::AttribMismatch,
    ];

    /// Every substring must occur in the diagnostic for the bin to match.
    pub fn substrings(&self) -> &'static [&'static str] {
        match self {
            FailureBin::IndexError => &["IndexError"],
            FailureBin::PipeTimeout => &["Timeout", "reached for pipe"],
            FailureBin::ValidCheckTimeout => &["Timeout", "reached for valid check"],
            FailureBin::ResourceSelection => &["Too many resources to select from"],
            FailureBin::AttribMismatch => &["attribs expected. Received"],
        }
    }

    /// Report label: the bin's substrings joined by a space.
    pub fn label(&self) -> String {
        self.substrings().join(" ")
    }

    /// First bin, in table order, whose substrings all occur in `diagnostic`.
    pub fn matching(diagnostic: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|bin| {
            bin.substrings()
                .iter()
                .all(|needle| diagnostic.contains(needle))
        })
    }

    /// Like [`matching`](Self::matching), but a diagnostic no bin claims is an
    /// error.
    pub fn bin(test_id: &str, diagnostic: &str) -> Result<Self, SimParityError> {
        Self::matching(diagnostic).ok_or_else(|| {
            err_msg!(
                UnbinnedFailure,
                "model failure of {} matches no known bin: {}",
                test_id,
                diagnostic
            )
        })
    }
}

impl fmt::Display for FailureBin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_word() {
        assert_eq!(TestClass::classify("t6-n1-matmul-4x4").unwrap(), TestClass::Matmul);
        assert_eq!(TestClass::classify("t6-n1-elwadd-fp16").unwrap(), TestClass::Eltw);
        assert_eq!(TestClass::classify("t6-n1-cast-int8").unwrap(), TestClass::Sfpu);
        assert_eq!(TestClass::classify("t6-n1-lrelu").unwrap(), TestClass::Sfpu);
    }

    #[test]
    fn test_keyword_must_be_a_whole_word() {
        let err = TestClass::classify("t6-n1-matmuls").unwrap_err();
        assert_eq!(err.class(), crate::ErrorClass::Classification);
    }

    #[test]
    fn test_ambiguous_id_is_an_error() {
        let err = TestClass::classify("t6-upk-pck").unwrap_err();
        assert!(err.message().contains("ambiguous"));
    }

    #[test]
    fn test_bins_in_order() {
        assert_eq!(
            FailureBin::matching("Timeout 5000 reached for pipe 3"),
            Some(FailureBin::PipeTimeout)
        );
        assert_eq!(
            FailureBin::matching("Timeout reached for valid check on UNPACK"),
            Some(FailureBin::ValidCheckTimeout)
        );
        assert_eq!(
            FailureBin::matching("IndexError: Timeout reached for pipe"),
            Some(FailureBin::IndexError)
        );
        assert_eq!(FailureBin::matching("reached for pipe"), None);
    }

    #[test]
    fn test_labels() {
        assert_eq!(FailureBin::PipeTimeout.label(), "Timeout reached for pipe");
        assert_eq!(
            FailureBin::AttribMismatch.to_string(),
            "attribs expected. Received"
        );
    }

    #[test]
    fn test_unbinned_is_an_error() {
        let err = FailureBin::bin("t6-n1-upk", "Segmentation fault").unwrap_err();
        assert_eq!(err.class(), crate::ErrorClass::UnbinnedFailure);
    }
}
