//! Command-line arguments and subcommands for simparity.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::{
    catalog::SelectionPolicy,
    config::{Overrides, PipelineSelection, DEFAULT_CONFIG_FILE},
};

#[derive(Debug, Parser)]
#[command(
    name = "simparity",
    version,
    about = "Runs regression tests through an RTL simulator and a performance model, then compares the two."
)]
pub struct SimParityArgs {
    /// Run configuration file.
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Log more (repeat for trace output).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Execute the selected pipelines, then compare and write reports.
    Run {
        #[command(flatten)]
        selection: SelectionArgs,
        /// Pipelines to execute; the others are read from their stores.
        #[arg(long, value_enum, default_value_t = PipelineArg::Both)]
        pipeline: PipelineArg,
        /// Re-run tests even when a PASS is cached.
        #[arg(long)]
        force: bool,
        /// Concurrent tests per pipeline.
        #[arg(short, long)]
        workers: Option<usize>,
        /// Directory the CSV reports are written into.
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Print the resolved test ids, one per line.
    Select {
        #[command(flatten)]
        selection: SelectionArgs,
    },
    /// Compare stored results without executing anything.
    Report {
        #[command(flatten)]
        selection: SelectionArgs,
        /// Directory the CSV reports are written into.
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
}

/// Replaces the configured policy of every document when any flag is given.
#[derive(Debug, Clone, Default, Args)]
pub struct SelectionArgs {
    /// Suite to select (repeatable).
    #[arg(long = "suite", value_name = "SUITE")]
    pub suites: Vec<String>,
    /// Tag regex to select (repeatable).
    #[arg(long = "tag", value_name = "REGEX")]
    pub tags: Vec<String>,
    /// Explicit test id to select (repeatable).
    #[arg(long = "test", value_name = "ID")]
    pub tests: Vec<String>,
}

impl SelectionArgs {
    pub fn policy(&self) -> Option<SelectionPolicy> {
        if self.suites.is_empty() && self.tags.is_empty() && self.tests.is_empty() {
            return None;
        }
        Some(SelectionPolicy::new(
            self.suites.iter().cloned(),
            self.tags.iter().cloned(),
            self.tests.iter().cloned(),
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PipelineArg {
    Both,
    GroundTruth,
    Model,
    /// Execute nothing; compare what is stored.
    #[value(name = "none")]
    CompareOnly,
}

impl From<PipelineArg> for PipelineSelection {
    fn from(arg: PipelineArg) -> Self {
        match arg {
            PipelineArg::Both => PipelineSelection::Both,
            PipelineArg::GroundTruth => PipelineSelection::GroundTruth,
            PipelineArg::Model => PipelineSelection::Model,
            PipelineArg::CompareOnly => PipelineSelection::CompareOnly,
        }
    }
}

impl Command {
    /// Config overrides carried by this subcommand.
    pub fn overrides(&self) -> Overrides {
        match self {
            Command::Run {
                selection,
                force,
                workers,
                out_dir,
                ..
            } => Overrides {
                policy: selection.policy(),
                force: *force,
                workers: *workers,
                out_dir: out_dir.clone(),
            },
            Command::Select { selection } => Overrides {
                policy: selection.policy(),
                ..Overrides::default()
            },
            Command::Report { selection, out_dir } => Overrides {
                policy: selection.policy(),
                out_dir: out_dir.clone(),
                ..Overrides::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_flags() {
        let args = SimParityArgs::try_parse_from([
            "simparity",
            "run",
            "--pipeline",
            "ground-truth",
            "--tag",
            "matmul",
            "--tag",
            "upk",
            "--force",
            "-w",
            "4",
        ])
        .unwrap();
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_FILE));
        let overrides = args.command.overrides();
        assert!(overrides.force);
        assert_eq!(overrides.workers, Some(4));
        assert_eq!(overrides.policy.unwrap().tags.len(), 2);
        match args.command {
            Command::Run { pipeline, .. } => assert_eq!(pipeline, PipelineArg::GroundTruth),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_no_selection_flags_keeps_configured_policy() {
        let args = SimParityArgs::try_parse_from(["simparity", "select", "-c", "x.yaml"]).unwrap();
        assert!(args.command.overrides().policy.is_none());
        assert_eq!(args.config, PathBuf::from("x.yaml"));
    }

    #[test]
    fn test_pipeline_none_value() {
        let args = SimParityArgs::try_parse_from(["simparity", "run", "--pipeline", "none"]).unwrap();
        match args.command {
            Command::Run { pipeline, .. } => {
                assert_eq!(PipelineSelection::from(pipeline), PipelineSelection::CompareOnly)
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
