//! Unified, `miette`-based error type for simparity.
//!
//! Only run-aborting conditions live here: configuration problems, catalog
//! resolution failures, and taxonomy gaps found at comparison time. A test that
//! fails, crashes, or cannot be reached is *not* an error; it is recorded as an
//! [`ExecutionResult`](crate::result::ExecutionResult) and the run continues.
//!
//! # Error Construction
//!
//! - **Use `err_msg!` for message-only errors.**
//!   - `err_msg!(Config, "workers must be an integer")`
//!   - `err_msg!(Catalog, "could not find {} under {}", name, root.display())`
//!
//! - **Use `err_io!` when wrapping an I/O failure.** The cause is kept as the
//!   error source so the rendered report shows the full chain.

use miette::Diagnostic;
use thiserror::Error;

/// Boxed error cause carried by every variant.
pub type BoxedSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Type-safe error classification that mirrors the [`SimParityError`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Bad or incomplete configuration, detected before any execution.
    Config,
    /// A catalog document or the suite policy could not be resolved.
    Catalog,
    /// A test id matched no test class, or more than one.
    Classification,
    /// A model diagnostic matched no failure bin.
    UnbinnedFailure,
    /// The two pipelines were not run over the same id set.
    MissingResult,
    /// Filesystem failure outside of per-test execution.
    Io,
    /// Broken internal invariant.
    Internal,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Config => "config",
            ErrorClass::Catalog => "catalog",
            ErrorClass::Classification => "classification",
            ErrorClass::UnbinnedFailure => "unbinned_failure",
            ErrorClass::MissingResult => "missing_result",
            ErrorClass::Io => "io",
            ErrorClass::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Every failure mode that aborts a simparity run.
#[derive(Debug, Error)]
pub enum SimParityError {
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },
    #[error("Catalog error: {message}")]
    Catalog {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },
    #[error("Classification error: {message}")]
    Classification {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },
    #[error("Unbinned failure: {message}")]
    UnbinnedFailure {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },
    #[error("Missing result: {message}")]
    MissingResult {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },
}

impl SimParityError {
    /// Returns the type-safe classification for this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            SimParityError::Config { .. } => ErrorClass::Config,
            SimParityError::Catalog { .. } => ErrorClass::Catalog,
            SimParityError::Classification { .. } => ErrorClass::Classification,
            SimParityError::UnbinnedFailure { .. } => ErrorClass::UnbinnedFailure,
            SimParityError::MissingResult { .. } => ErrorClass::MissingResult,
            SimParityError::Io { .. } => ErrorClass::Io,
            SimParityError::Internal { .. } => ErrorClass::Internal,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            SimParityError::Config { message, .. }
            | SimParityError::Catalog { message, .. }
            | SimParityError::Classification { message, .. }
            | SimParityError::UnbinnedFailure { message, .. }
            | SimParityError::MissingResult { message, .. }
            | SimParityError::Io { message, .. }
            | SimParityError::Internal { message, .. } => message,
        }
    }

    /// Process exit code for the CLI. Every abort is a configuration-class
    /// failure from the caller's point of view.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

impl Diagnostic for SimParityError {
    fn code<'a>(&'a self) -> Option<Box<dyn std::fmt::Display + 'a>> {
        Some(Box::new(format!("simparity::{}", self.class())))
    }

    fn help<'a>(&'a self) -> Option<Box<dyn std::fmt::Display + 'a>> {
        let help = match self {
            SimParityError::Config { .. } => "check the simparity configuration file and CLI flags",
            SimParityError::Catalog { .. } => {
                "make sure the catalog root holds exactly one copy of each referenced document"
            }
            SimParityError::Classification { .. } => {
                "the test-class keyword table is out of date; add the new keyword to exactly one class"
            }
            SimParityError::UnbinnedFailure { .. } => {
                "the failure taxonomy is out of date; add a bin for this model diagnostic"
            }
            SimParityError::MissingResult { .. } => {
                "both pipelines must be collected over the same test ids before comparing"
            }
            SimParityError::Io { .. } | SimParityError::Internal { .. } => return None,
        };
        Some(Box::new(help))
    }
}

/// Constructs a [`SimParityError`] variant from a format string, with no source.
#[macro_export]
macro_rules! err_msg {
    ($variant:ident, $($arg:tt)+) => {
        $crate::SimParityError::$variant {
            message: format!($($arg)+),
            source: None,
        }
    };
}

/// Constructs a [`SimParityError::Io`] that keeps the underlying error as its source.
#[macro_export]
macro_rules! err_io {
    ($cause:expr, $($arg:tt)+) => {
        $crate::SimParityError::Io {
            message: format!($($arg)+),
            source: Some(Box::new($cause)),
        }
    };
}

#[cfg(test)]
mod diagnostics_tests {
    use miette::Report;

    use super::*;

    #[test]
    fn test_report_carries_code_and_help() {
        let err = crate::err_msg!(Catalog, "could not find {} under {}", "project.yml", "infra");
        assert_eq!(err.class(), ErrorClass::Catalog);
        assert_eq!(err.message(), "could not find project.yml under infra");
        let output = format!("{:?}", Report::new(err));
        assert!(output.contains("simparity::catalog"));
        assert!(output.contains("exactly one copy"));
    }

    #[test]
    fn test_io_error_chain() {
        let cause = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err = crate::err_io!(cause, "failed to read {}", "sim.yaml");
        assert_eq!(err.class(), ErrorClass::Io);
        let output = format!("{:?}", Report::new(err));
        assert!(output.contains("failed to read sim.yaml"));
        assert!(output.contains("no such file"));
    }

    #[test]
    fn test_source_is_optional() {
        use std::error::Error as _;

        let bare = crate::err_msg!(Config, "workers must be an integer");
        assert!(bare.source().is_none());
        let cause = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let wrapped = crate::err_io!(cause, "failed to write {}", "status.csv");
        assert_eq!(wrapped.source().map(|e| e.to_string()), Some("denied".to_string()));
    }

    #[test]
    fn test_every_abort_exits_nonzero() {
        let err = crate::err_msg!(UnbinnedFailure, "segfault");
        assert_ne!(err.exit_code(), 0);
        assert_eq!(err.to_string(), "Unbinned failure: segfault");
    }
}
