//! Run configuration.
//!
//! One YAML file is read at startup and split into per-component sections.
//! CLI overrides are applied on top, then [`SimParityConfig::validate`] runs
//! once. Nothing mutates the configuration after that.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use tracing::warn;

use crate::{catalog::SelectionPolicy, err_io, err_msg, SimParityError};

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "simparity.yaml";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimParityConfig {
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub ground_truth: GroundTruthConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub comparison: ComparisonConfig,
}

// ============================================================================
// SECTIONS
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogConfig {
    /// Directory searched recursively for every document named below.
    pub root: PathBuf,
    #[serde(default = "default_project_document")]
    pub project_document: String,
    /// Document file name to its selection policy; `~` takes every test.
    #[serde(default)]
    pub documents: BTreeMap<String, Option<SelectionPolicy>>,
    /// Only ids containing this substring are kept (e.g. `n1`).
    #[serde(default)]
    pub require_substring: Option<String>,
}

/// Scheduler settings, one per pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub force: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            force: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroundTruthConfig {
    /// Simulation host. Without one, the bench runs on this machine.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub identity: Option<PathBuf>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Test-bench root on the host. Commands run from here.
    #[serde(default)]
    pub bench_root: String,
    /// Commands sourced before every run (environment setup scripts).
    #[serde(default)]
    pub setup: Vec<String>,
    /// Bench command; `{test}` is replaced with the test id.
    #[serde(default = "default_bench_command")]
    pub command: String,
    /// Per-test directories live under `<bench_root>/<debug_dir>`.
    #[serde(default = "default_debug_dir")]
    pub debug_dir: String,
    #[serde(default = "default_dir_suffix")]
    pub dir_suffix: String,
    #[serde(default = "default_marker_name")]
    pub marker_name: String,
    #[serde(default = "default_rtl_log_suffix")]
    pub log_suffix: String,
    /// Local directory the per-test directories are mirrored into.
    #[serde(default = "default_mirror")]
    pub mirror: PathBuf,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Default for GroundTruthConfig {
    fn default() -> Self {
        Self {
            host: None,
            user: None,
            port: None,
            identity: None,
            connect_timeout_secs: default_connect_timeout(),
            bench_root: String::new(),
            setup: Vec::new(),
            command: default_bench_command(),
            debug_dir: default_debug_dir(),
            dir_suffix: default_dir_suffix(),
            marker_name: default_marker_name(),
            log_suffix: default_rtl_log_suffix(),
            mirror: default_mirror(),
            engine: EngineConfig::default(),
        }
    }
}

impl GroundTruthConfig {
    /// Host path of the directory holding every test directory.
    pub fn remote_debug_dir(&self) -> String {
        join_host_path(&self.bench_root, &self.debug_dir)
    }

    pub fn remote_test_dir(&self, id: &str) -> String {
        join_host_path(&self.remote_debug_dir(), &format!("{id}{}", self.dir_suffix))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// Simulator command line. `{cfg}`, `{inputcfg}`, and `{test}` are
    /// replaced per test.
    #[serde(default = "default_model_command")]
    pub command: Vec<String>,
    /// Working directory for the simulator process.
    #[serde(default = "default_model_dir")]
    pub workdir: PathBuf,
    /// Base simulator configuration; per-test fields are layered on top.
    #[serde(default)]
    pub cfg_template: Option<PathBuf>,
    #[serde(default = "default_cfg_dir")]
    pub cfg_dir: PathBuf,
    #[serde(default = "default_model_odir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_model_log_suffix")]
    pub log_suffix: String,
    #[serde(default = "default_model_marker_name")]
    pub marker_name: String,
    #[serde(default = "default_start_function")]
    pub start_function: String,
    #[serde(default = "default_enable_sync")]
    pub enable_sync: u8,
    #[serde(default = "default_delay")]
    pub delay: u64,
    #[serde(default = "default_max_threads")]
    pub max_threads_per_core: usize,
    #[serde(default = "default_mop_base")]
    pub mop_cfg_start: String,
    /// Per-thread stack ranges (`[top, bottom]`), keyed by thread id.
    #[serde(default = "default_stack")]
    pub stack: BTreeMap<String, [String; 2]>,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            command: default_model_command(),
            workdir: default_model_dir(),
            cfg_template: None,
            cfg_dir: default_cfg_dir(),
            output_dir: default_model_odir(),
            log_suffix: default_model_log_suffix(),
            marker_name: default_model_marker_name(),
            start_function: default_start_function(),
            enable_sync: default_enable_sync(),
            delay: default_delay(),
            max_threads_per_core: default_max_threads(),
            mop_cfg_start: default_mop_base(),
            stack: default_stack(),
            engine: EngineConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComparisonConfig {
    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,
    /// Tolerance bands around a ratio of 1.0, as fractions.
    #[serde(default = "default_bands")]
    pub bands: Vec<f64>,
    /// Suffix for report file names. Defaults to seconds since the epoch.
    #[serde(default)]
    pub stamp: Option<String>,
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            out_dir: default_out_dir(),
            bands: default_bands(),
            stamp: None,
        }
    }
}

// ============================================================================
// OVERRIDES
// ============================================================================

/// Which pipelines actually execute in a `run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineSelection {
    Both,
    GroundTruth,
    Model,
    CompareOnly,
}

impl PipelineSelection {
    pub fn runs_ground_truth(self) -> bool {
        matches!(self, PipelineSelection::Both | PipelineSelection::GroundTruth)
    }

    pub fn runs_model(self) -> bool {
        matches!(self, PipelineSelection::Both | PipelineSelection::Model)
    }
}

/// Values from the command line that win over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub policy: Option<SelectionPolicy>,
    pub force: bool,
    pub workers: Option<usize>,
    pub out_dir: Option<PathBuf>,
}

// ============================================================================
// LOADING
// ============================================================================

impl SimParityConfig {
    pub fn load(path: &Path) -> Result<Self, SimParityError> {
        let text = fs::read_to_string(path)
            .map_err(|e| err_io!(e, "failed to read config {}", path.display()))?;
        let mut config = Self::parse(&text, &path.display().to_string())?;
        if let Some(base) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            config.rebase(base);
        }
        Ok(config)
    }

    pub fn parse(text: &str, origin: &str) -> Result<Self, SimParityError> {
        serde_yaml::from_str(text).map_err(|e| SimParityError::Config {
            message: format!("failed to parse {origin}"),
            source: Some(Box::new(e)),
        })
    }

    /// Resolves relative local paths against the directory holding the file.
    fn rebase(&mut self, base: &Path) {
        let fix = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        fix(&mut self.catalog.root);
        fix(&mut self.ground_truth.mirror);
        fix(&mut self.model.workdir);
        fix(&mut self.model.output_dir);
        fix(&mut self.model.cfg_dir);
        if let Some(template) = self.model.cfg_template.as_mut() {
            fix(template);
        }
        fix(&mut self.comparison.out_dir);
    }

    pub fn apply(mut self, overrides: &Overrides) -> Self {
        if let Some(policy) = &overrides.policy {
            for slot in self.catalog.documents.values_mut() {
                *slot = Some(policy.clone());
            }
        }
        if overrides.force {
            self.ground_truth.engine.force = true;
            self.model.engine.force = true;
        }
        if let Some(workers) = overrides.workers {
            self.ground_truth.engine.workers = workers;
            self.model.engine.workers = workers;
        }
        if let Some(out_dir) = &overrides.out_dir {
            self.comparison.out_dir = out_dir.clone();
        }
        self
    }

    /// Checks everything that can be checked before any test runs.
    pub fn validate(mut self) -> Result<Self, SimParityError> {
        if self.catalog.documents.is_empty() {
            return Err(err_msg!(Config, "catalog.documents must name at least one test document"));
        }
        if self.catalog.project_document.trim().is_empty() {
            return Err(err_msg!(Config, "catalog.project_document must not be empty"));
        }
        if self.catalog.require_substring.as_deref() == Some("") {
            self.catalog.require_substring = None;
        }

        for (name, engine) in [
            ("ground_truth", &mut self.ground_truth.engine),
            ("model", &mut self.model.engine),
        ] {
            if engine.workers == 0 {
                warn!(pipeline = name, "workers was 0, using 1");
                engine.workers = 1;
            }
        }

        let gt = &self.ground_truth;
        if gt.host.is_some() && gt.bench_root.trim().is_empty() {
            return Err(err_msg!(Config, "ground_truth.bench_root is required when a host is set"));
        }
        if !gt.command.contains("{test}") {
            return Err(err_msg!(Config, "ground_truth.command must contain {{test}}"));
        }
        if gt.marker_name.trim().is_empty() {
            return Err(err_msg!(Config, "ground_truth.marker_name must not be empty"));
        }

        let model = &self.model;
        if model.command.is_empty() {
            return Err(err_msg!(Config, "model.command must not be empty"));
        }
        if model.max_threads_per_core == 0 {
            return Err(err_msg!(Config, "model.max_threads_per_core must be at least 1"));
        }
        if model.log_suffix.is_empty() {
            return Err(err_msg!(Config, "model.log_suffix must not be empty"));
        }

        if let Some(bad) = self
            .comparison
            .bands
            .iter()
            .find(|band| !band.is_finite() || **band <= 0.0)
        {
            return Err(err_msg!(Config, "comparison band {} must be a positive fraction", bad));
        }
        self.comparison.bands.sort_by(f64::total_cmp);
        self.comparison.bands.dedup();
        if self.comparison.stamp.as_deref().is_some_and(|s| s.contains('/')) {
            return Err(err_msg!(Config, "comparison.stamp must not contain '/'"));
        }

        Ok(self)
    }
}

/// Joins host paths with `/` regardless of the local platform.
pub fn join_host_path(base: &str, child: &str) -> String {
    match (base.trim_end_matches('/'), child.trim_start_matches('/')) {
        ("", child) if base.starts_with('/') => format!("/{child}"),
        ("", child) => child.to_string(),
        (base, "") => base.to_string(),
        (base, child) => format!("{base}/{child}"),
    }
}

// ============================================================================
// DEFAULTS
// ============================================================================

fn default_project_document() -> String {
    "project.yaml".to_string()
}

fn default_workers() -> usize {
    1
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_bench_command() -> String {
    "rsim run_test --test {test}".to_string()
}

fn default_debug_dir() -> String {
    "rsim/debug".to_string()
}

fn default_dir_suffix() -> String {
    "_0".to_string()
}

fn default_marker_name() -> String {
    "sim_result.yml".to_string()
}

fn default_rtl_log_suffix() -> String {
    ".rtl_test.log".to_string()
}

fn default_mirror() -> PathBuf {
    PathBuf::from("rtl_mirror")
}

fn default_model_command() -> Vec<String> {
    ["python", "t3sim.py", "--cfg", "{cfg}", "--inputcfg", "{inputcfg}"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_model_dir() -> PathBuf {
    PathBuf::from("t3sim")
}

fn default_cfg_dir() -> PathBuf {
    PathBuf::from("t3sim/cfg")
}

fn default_model_odir() -> PathBuf {
    PathBuf::from("t3sim/logs")
}

fn default_model_log_suffix() -> String {
    ".t3sim_test.log".to_string()
}

fn default_model_marker_name() -> String {
    "model_result.yml".to_string()
}

fn default_start_function() -> String {
    "main".to_string()
}

fn default_enable_sync() -> u8 {
    1
}

fn default_delay() -> u64 {
    10
}

fn default_max_threads() -> usize {
    4
}

fn default_mop_base() -> String {
    "0x80d000".to_string()
}

fn default_stack() -> BTreeMap<String, [String; 2]> {
    [
        ("0", "0x8023FF", "0x802000"),
        ("1", "0x801FFF", "0x801C00"),
        ("2", "0x801BFF", "0x801800"),
        ("3", "0x8017FF", "0x801400"),
    ]
    .into_iter()
    .map(|(id, top, bottom)| (id.to_string(), [top.to_string(), bottom.to_string()]))
    .collect()
}

fn default_out_dir() -> PathBuf {
    PathBuf::from("reports")
}

fn default_bands() -> Vec<f64> {
    vec![0.1, 0.2, 0.3]
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = "\
catalog:
  root: infra
  documents:
    tests.yaml:
      suites: sanity
    more.yaml: ~
";

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config = SimParityConfig::parse(MINIMAL, "simparity.yaml")
            .unwrap()
            .validate()
            .unwrap();
        assert_eq!(config.catalog.project_document, "project.yaml");
        assert_eq!(config.ground_truth.marker_name, "sim_result.yml");
        assert_eq!(config.ground_truth.dir_suffix, "_0");
        assert_eq!(config.model.engine.workers, 1);
        assert_eq!(config.comparison.bands, vec![0.1, 0.2, 0.3]);
        assert!(config.catalog.documents["more.yaml"].is_none());
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let text = format!("{MINIMAL}bogus: 1\n");
        let err = SimParityConfig::parse(&text, "simparity.yaml").unwrap_err();
        assert_eq!(err.class(), crate::ErrorClass::Config);
    }

    #[test]
    fn test_overrides_win() {
        let overrides = Overrides {
            policy: Some(SelectionPolicy::new([], [], ["t1".to_string()])),
            force: true,
            workers: Some(0),
            out_dir: Some(PathBuf::from("/tmp/out")),
        };
        let config = SimParityConfig::parse(MINIMAL, "x")
            .unwrap()
            .apply(&overrides)
            .validate()
            .unwrap();
        assert!(config.model.engine.force && config.ground_truth.engine.force);
        assert_eq!(config.ground_truth.engine.workers, 1);
        assert_eq!(config.comparison.out_dir, PathBuf::from("/tmp/out"));
        assert!(config
            .catalog
            .documents
            .values()
            .all(|p| p.as_ref().is_some_and(|p| p.tests.contains("t1"))));
    }

    #[test]
    fn test_host_requires_bench_root() {
        let text = format!("{MINIMAL}ground_truth:\n  host: sim-host\n");
        let err = SimParityConfig::parse(&text, "x").unwrap().validate().unwrap_err();
        assert!(err.message().contains("bench_root"));
    }

    #[test]
    fn test_bad_band_rejected() {
        let text = format!("{MINIMAL}comparison:\n  bands: [0.1, -0.2]\n");
        assert!(SimParityConfig::parse(&text, "x").unwrap().validate().is_err());
    }

    #[test]
    fn test_host_paths() {
        assert_eq!(join_host_path("/proj/ws", "rsim/debug"), "/proj/ws/rsim/debug");
        assert_eq!(join_host_path("/", "x"), "/x");
        assert_eq!(join_host_path("", "x"), "x");
        let gt = GroundTruthConfig {
            bench_root: "/proj/ws/".into(),
            ..GroundTruthConfig::default()
        };
        assert_eq!(gt.remote_test_dir("t-n1-a"), "/proj/ws/rsim/debug/t-n1-a_0");
    }
}
