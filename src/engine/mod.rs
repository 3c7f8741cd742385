//! Cache-aware, bounded-concurrency execution of tests through one pipeline.
//!
//! The engine is generic over a [`Pipeline`] strategy. It owns scheduling,
//! caching, persistence, and failure isolation; a pipeline only knows how to
//! look up a previous outcome and how to run a single test.
//!
//! # Guarantees
//!
//! - Every deduplicated input id has exactly one entry in the returned map.
//! - A cached PASS is never re-executed unless `force` is set.
//! - A failing, crashing, or unreachable test never stops the others.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use tracing::{debug, info, warn};

use crate::{
    config::EngineConfig,
    result::{ExecutionResult, Status},
    store::ArtifactStore,
    SimParityError,
};

pub mod ground_truth;
pub mod model;
pub mod pool;

pub use ground_truth::GroundTruthPipeline;
pub use model::ModelPipeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    GroundTruth,
    Model,
}

impl PipelineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineKind::GroundTruth => "ground-truth",
            PipelineKind::Model => "model",
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strategy for one execution pipeline.
pub trait Pipeline: Send + Sync {
    fn kind(&self) -> PipelineKind;

    /// Previous outcome available without touching any remote host.
    fn load_local(
        &self,
        id: &str,
        store: &dyn ArtifactStore,
    ) -> Result<Option<ExecutionResult>, SimParityError> {
        store.load(id)
    }

    /// Previous outcome from anywhere the pipeline can look. Only a PASS is
    /// treated as a cache hit by the engine.
    fn check_cached(
        &self,
        id: &str,
        store: &dyn ArtifactStore,
    ) -> Result<Option<ExecutionResult>, SimParityError> {
        self.load_local(id, store)
    }

    /// Runs one test. Must not fail: every problem becomes a FAIL or UNKNOWN.
    fn run_one(&self, id: &str, force: bool) -> ExecutionResult;
}

/// Complete outcome of one [`ExecutionEngine::execute_all`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionSummary {
    pub results: BTreeMap<String, ExecutionResult>,
    /// Ids answered by a cached PASS.
    pub cached: BTreeSet<String>,
    /// Ids that went through `run_one`.
    pub executed: BTreeSet<String>,
}

impl ExecutionSummary {
    pub fn count(&self, status: Status) -> usize {
        self.results.values().filter(|r| r.status() == status).count()
    }

    pub fn into_results(self) -> BTreeMap<String, ExecutionResult> {
        self.results
    }
}

pub struct ExecutionEngine<'a> {
    pipeline: &'a dyn Pipeline,
    store: &'a dyn ArtifactStore,
    config: EngineConfig,
}

impl<'a> ExecutionEngine<'a> {
    pub fn new(pipeline: &'a dyn Pipeline, store: &'a dyn ArtifactStore, config: EngineConfig) -> Self {
        Self {
            pipeline,
            store,
            config,
        }
    }

    /// Runs every id through the pipeline, reusing cached PASS results.
    pub fn execute_all<I, S>(&self, test_ids: I) -> ExecutionSummary
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let kind = self.pipeline.kind();
        let ids: Vec<String> = test_ids
            .into_iter()
            .map(Into::into)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let workers = self.config.workers.max(1);
        let mut summary = ExecutionSummary::default();

        let pending = if self.config.force {
            info!(pipeline = %kind, count = ids.len(), "force set, skipping cache checks");
            ids
        } else {
            let checks = pool::run_bounded(&ids, workers, |id| {
                self.pipeline.check_cached(id, self.store)
            });
            let mut pending = Vec::new();
            for (id, check) in ids.into_iter().zip(checks) {
                match check {
                    Ok(Ok(Some(result))) if result.is_pass() => {
                        debug!(pipeline = %kind, test = %id, "cache hit");
                        summary.results.insert(id.clone(), result);
                        summary.cached.insert(id);
                    }
                    Ok(Ok(_)) => pending.push(id),
                    Ok(Err(e)) => {
                        warn!(pipeline = %kind, test = %id, error = %e, "cache check failed, treating as miss");
                        pending.push(id);
                    }
                    Err(panic) => {
                        warn!(pipeline = %kind, test = %id, panic = %panic, "cache check panicked, treating as miss");
                        pending.push(id);
                    }
                }
            }
            pending
        };

        info!(
            pipeline = %kind,
            cached = summary.cached.len(),
            pending = pending.len(),
            workers = workers.min(pending.len().max(1)),
            "executing tests"
        );

        let force = self.config.force;
        let runs = pool::run_bounded(&pending, workers, |id| {
            let result = self.pipeline.run_one(id, force);
            if let Err(e) = self.store.persist(id, &result) {
                warn!(pipeline = %kind, test = %id, error = %e, "failed to persist result");
            }
            info!(pipeline = %kind, test = %id, status = %result.status(), "finished");
            result
        });

        for (id, run) in pending.into_iter().zip(runs) {
            let result = run.unwrap_or_else(|panic| {
                warn!(pipeline = %kind, test = %id, panic = %panic, "test execution panicked");
                let result = ExecutionResult::unknown(format!("execution panicked: {panic}"));
                if let Err(e) = self.store.persist(&id, &result) {
                    warn!(pipeline = %kind, test = %id, error = %e, "failed to persist result");
                }
                result
            });
            summary.results.insert(id.clone(), result);
            summary.executed.insert(id);
        }

        info!(
            pipeline = %kind,
            passed = summary.count(Status::Pass),
            failed = summary.count(Status::Fail),
            unknown = summary.count(Status::Unknown),
            "pipeline complete"
        );
        summary
    }

    /// Load-only collection: nothing is executed and no host is contacted.
    /// Ids without a local outcome come back as not found.
    pub fn collect_cached<I, S>(&self, test_ids: I) -> BTreeMap<String, ExecutionResult>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let kind = self.pipeline.kind();
        test_ids
            .into_iter()
            .map(Into::into)
            .collect::<BTreeSet<String>>()
            .into_iter()
            .map(|id| {
                let result = match self.pipeline.load_local(&id, self.store) {
                    Ok(Some(result)) => result,
                    Ok(None) => ExecutionResult::not_found(),
                    Err(e) => {
                        warn!(pipeline = %kind, test = %id, error = %e, "could not load result");
                        ExecutionResult::not_found()
                    }
                };
                (id, result)
            })
            .collect()
    }
}

/// Last non-blank line of a log, trimmed.
pub(crate) fn last_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).filter(|line| !line.is_empty()).last()
}
