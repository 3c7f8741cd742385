//! Ground-truth pipeline: the RTL bench on the simulation host.
//!
//! The bench leaves one directory per test under its debug dir, holding the
//! log, the ELF inputs, and a `sim_result.yml` marker. That directory is
//! mirrored locally after every run; the model pipeline reads its inputs from
//! the mirror.

use std::{
    fs, io,
    path::PathBuf,
    sync::Arc,
};

use tracing::{debug, info, warn};

use super::{last_line, Pipeline, PipelineKind};
use crate::{
    config::{join_host_path, GroundTruthConfig},
    result::{ExecutionResult, ResultMarker, Status},
    store::{ArtifactStore, MarkerStore},
    transport::{shell_quote, CommandOutput, Transport, TransportError},
    SimParityError,
};

pub struct GroundTruthPipeline {
    config: GroundTruthConfig,
    transport: Arc<dyn Transport>,
}

impl GroundTruthPipeline {
    pub fn new(config: GroundTruthConfig, transport: Arc<dyn Transport>) -> Self {
        Self { config, transport }
    }

    /// The store backed by the local mirror, in the bench's own layout.
    pub fn mirror_store(&self) -> MarkerStore {
        MarkerStore::new(
            &self.config.mirror,
            &self.config.dir_suffix,
            &self.config.marker_name,
        )
    }

    pub fn local_test_dir(&self, id: &str) -> PathBuf {
        self.config
            .mirror
            .join(format!("{id}{}", self.config.dir_suffix))
    }

    fn remote_marker(&self, id: &str) -> String {
        join_host_path(&self.config.remote_test_dir(id), &self.config.marker_name)
    }

    fn log_name(&self, id: &str) -> String {
        format!("{id}{}", self.config.log_suffix)
    }

    /// `cd <root> && <setup>... && mkdir -p <dir> && <bench> > <log> 2>&1`
    pub fn bench_command(&self, id: &str) -> String {
        let test_dir = self.config.remote_test_dir(id);
        let log = join_host_path(&test_dir, &self.log_name(id));
        let mut steps = Vec::new();
        if !self.config.bench_root.is_empty() {
            steps.push(format!("cd {}", shell_quote(&self.config.bench_root)));
        }
        steps.extend(self.config.setup.iter().cloned());
        steps.push(format!("mkdir -p {}", shell_quote(&test_dir)));
        steps.push(format!(
            "{} > {} 2>&1",
            self.config.command.replace("{test}", id),
            shell_quote(&log)
        ));
        steps.join(" && ")
    }

    /// Drops the marker and log an earlier run left in the mirror. The copy
    /// never deletes files, so they would otherwise outlive a bench that now
    /// writes nothing.
    fn clear_mirrored_outcome(&self, id: &str) {
        let dir = self.local_test_dir(id);
        for name in [self.config.marker_name.clone(), self.log_name(id)] {
            let path = dir.join(name);
            match fs::remove_file(&path) {
                Ok(()) => debug!(test = id, path = %path.display(), "removed stale mirrored file"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(test = id, path = %path.display(), error = %e, "could not remove stale mirrored file"),
            }
        }
    }

    fn mirror(&self, id: &str) -> Result<(), TransportError> {
        let remote = self.config.remote_test_dir(id);
        self.transport.copy(&remote, &self.local_test_dir(id))
    }

    /// Reads the mirrored directory and decides what the run produced.
    fn interpret(&self, id: &str, output: &CommandOutput) -> ExecutionResult {
        let dir = self.local_test_dir(id);
        let marker = fs::read_to_string(dir.join(&self.config.marker_name))
            .ok()
            .and_then(|text| match ResultMarker::parse(&text) {
                Ok(marker) => Some(marker),
                Err(e) => {
                    warn!(test = id, error = %e, "ignoring malformed bench marker");
                    None
                }
            });
        let log = fs::read_to_string(dir.join(self.log_name(id))).ok();
        let log_tail = log.as_deref().and_then(last_line).map(str::to_owned);

        match marker {
            Some(marker) if marker.result == Status::Pass => marker.into_result(),
            Some(marker) if marker.result == Status::Fail => {
                let diagnostic = log_tail
                    .or(marker.diagnostic)
                    .unwrap_or_default();
                ExecutionResult::fail(diagnostic)
            }
            _ if !output.success() => {
                let diagnostic = log_tail
                    .or_else(|| last_line(&output.stderr).map(str::to_owned))
                    .unwrap_or_else(|| match output.code {
                        Some(code) => format!("bench exited with code {code}"),
                        None => "bench terminated by signal".to_string(),
                    });
                ExecutionResult::fail(diagnostic)
            }
            _ if log.is_none() => ExecutionResult::unknown("bench left neither a marker nor a log"),
            _ => ExecutionResult::unknown("bench finished without writing a result marker"),
        }
    }
}

impl Pipeline for GroundTruthPipeline {
    fn kind(&self) -> PipelineKind {
        PipelineKind::GroundTruth
    }

    fn check_cached(
        &self,
        id: &str,
        store: &dyn ArtifactStore,
    ) -> Result<Option<ExecutionResult>, SimParityError> {
        let local = store.load(id)?;
        if local.as_ref().is_some_and(ExecutionResult::is_pass) {
            return Ok(local);
        }

        let remote = self
            .transport
            .read_marker(&self.remote_marker(id))
            .map_err(|e| crate::err_msg!(Io, "remote marker check for {} failed: {}", id, e))?;
        let Some(text) = remote else {
            return Ok(local);
        };
        let remote = match ResultMarker::parse(&text) {
            Ok(marker) => marker.into_result(),
            Err(e) => {
                warn!(test = id, error = %e, "ignoring malformed remote marker");
                return Ok(local);
            }
        };
        if remote.is_pass() {
            debug!(test = id, "remote PASS found, mirroring");
            if let Err(e) = self.mirror(id) {
                warn!(test = id, error = %e, "could not mirror cached test directory");
                return Ok(local);
            }
        }
        Ok(Some(remote))
    }

    fn run_one(&self, id: &str, force: bool) -> ExecutionResult {
        if force {
            let marker = self.remote_marker(id);
            let stale = match self.transport.exists(&marker) {
                Ok(stale) => stale,
                Err(TransportError::Unreachable(reason)) => return ExecutionResult::unreachable(reason),
                Err(e) => {
                    warn!(test = id, error = %e, "could not check for a remote marker");
                    true
                }
            };
            if stale {
                match self.transport.remove(&marker) {
                    Err(TransportError::Unreachable(reason)) => return ExecutionResult::unreachable(reason),
                    Err(e) => warn!(test = id, error = %e, "could not remove stale remote marker"),
                    Ok(()) => {}
                }
            }
        }
        self.clear_mirrored_outcome(id);

        info!(test = id, "running on bench");
        let output = match self.transport.run_remote(&self.bench_command(id)) {
            Ok(output) => output,
            Err(TransportError::Unreachable(reason)) => return ExecutionResult::unreachable(reason),
            Err(e) => return ExecutionResult::unknown(format!("bench command could not run: {e}")),
        };

        match self.mirror(id) {
            Ok(()) => {}
            Err(TransportError::Unreachable(reason)) => return ExecutionResult::unreachable(reason),
            Err(e) => debug!(test = id, error = %e, "nothing mirrored"),
        }

        self.interpret(id, &output)
    }
}
