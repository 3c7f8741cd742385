//! Predictive pipeline: the local performance model.
//!
//! For each test the model needs two JSON documents. The input descriptor
//! lists, per core, the ELF binary of every thread. The simulator config is a
//! template with per-test fields layered on top. Both are derived from the
//! mirrored ground-truth test directory, so the model can only run tests the
//! bench has already produced inputs for.

use std::{
    collections::{BTreeMap, BTreeSet},
    fs::{self, File},
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::{last_line, Pipeline, PipelineKind};
use crate::{
    config::ModelConfig,
    err_msg,
    result::ExecutionResult,
    store::{ArtifactStore, MarkerStore},
    SimParityError,
};

static TOTAL_CYCLES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Total Cycles\s*=\s*([0-9]+(?:\.[0-9]*)?(?:[eE][+-]?[0-9]+)?)")
        .expect("total cycles regex")
});
static CORE_DIR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^neo_(\d+)$").expect("core dir regex"));
static THREAD_DIR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^thread_(\d+)$").expect("thread dir regex"));
static ELF_FILE: Lazy<Regex> = Lazy::new(|| Regex::new(r"_(\d+)\.elf$").expect("elf regex"));
static FIRST_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("number regex"));

/// Why the model inputs for a test could not be assembled.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("ground-truth test directory {0} is missing; run the ground-truth pipeline first")]
    MissingTestDir(PathBuf),
    #[error("no {prefix}<n> directories under {dir}")]
    NoDirectories { prefix: &'static str, dir: PathBuf },
    #[error("{prefix}<n> directories under {dir} are not contiguous from 0: {ids:?}")]
    NotContiguous {
        prefix: &'static str,
        dir: PathBuf,
        ids: Vec<usize>,
    },
    #[error("thread id {thread} in {elf} exceeds thread count {count}")]
    ThreadOutOfRange { thread: usize, count: usize, elf: PathBuf },
    #[error("failed to read {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

// ============================================================================
// LOG PARSING
// ============================================================================

/// Reads a model log. The first `Total Cycles = <n>` line means PASS; without
/// one, the last non-blank line is the failure diagnostic.
pub fn parse_model_log(text: &str) -> ExecutionResult {
    for line in text.lines().map(str::trim) {
        if let Some(captures) = TOTAL_CYCLES.captures(line) {
            if let Ok(value) = captures[1].parse::<f64>() {
                let rounded = value.round();
                if !rounded.is_finite() || rounded < 0.0 || rounded >= u64::MAX as f64 {
                    return ExecutionResult::fail(format!(
                        "Total Cycles value {} is out of range",
                        &captures[1]
                    ));
                }
                return ExecutionResult::pass(rounded as u64);
            }
        }
    }
    ExecutionResult::fail(last_line(text).unwrap_or_default())
}

// ============================================================================
// INPUT SYNTHESIS
// ============================================================================

/// Child directories of `dir` named `<prefix><n>`, as `n -> path`. The ids
/// must run 0, 1, 2, ... with no gaps.
fn numbered_dirs(
    dir: &Path,
    pattern: &Regex,
    prefix: &'static str,
) -> Result<BTreeMap<usize, PathBuf>, InputError> {
    let mut found = BTreeMap::new();
    for entry in WalkDir::new(dir).min_depth(1) {
        let entry = entry.map_err(|source| InputError::Walk {
            path: dir.to_path_buf(),
            source,
        })?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if let Some(id) = pattern
            .captures(&name)
            .and_then(|c| c[1].parse::<usize>().ok())
        {
            found.entry(id).or_insert_with(|| entry.path().to_path_buf());
        }
    }

    if found.is_empty() {
        return Err(InputError::NoDirectories {
            prefix,
            dir: dir.to_path_buf(),
        });
    }
    let ids: Vec<usize> = found.keys().copied().collect();
    if ids.iter().enumerate().any(|(expected, id)| expected != *id) {
        return Err(InputError::NotContiguous {
            prefix,
            dir: dir.to_path_buf(),
            ids,
        });
    }
    Ok(found)
}

/// Builds the model's input descriptor for one test.
///
/// Returns the descriptor and the number of cores found.
pub fn build_input_cfg(
    id: &str,
    test_dir: &Path,
    start_function: &str,
) -> Result<(Value, usize), InputError> {
    if !test_dir.is_dir() {
        return Err(InputError::MissingTestDir(test_dir.to_path_buf()));
    }

    let cores = numbered_dirs(test_dir, &CORE_DIR, "neo_")?;
    let mut input = Map::new();
    input.insert("syn".into(), json!(0));
    input.insert("name".into(), json!(id));

    for (core, core_dir) in &cores {
        let threads = numbered_dirs(core_dir, &THREAD_DIR, "thread_")?;
        let mut entry = Map::new();
        entry.insert("startFunction".into(), json!(start_function));
        entry.insert("numThreads".into(), json!(threads.len()));

        let mut elfs = Vec::new();
        for file in WalkDir::new(core_dir).sort_by_file_name() {
            let file = file.map_err(|source| InputError::Walk {
                path: core_dir.clone(),
                source,
            })?;
            if !file.file_type().is_file() {
                continue;
            }
            let name = file.file_name().to_string_lossy().into_owned();
            if let Some(thread) = ELF_FILE
                .captures(&name)
                .and_then(|c| c[1].parse::<usize>().ok())
            {
                elfs.push((thread, file.into_path(), name));
            }
        }

        for (thread, path, name) in elfs {
            if thread > threads.len() {
                return Err(InputError::ThreadOutOfRange {
                    thread,
                    count: threads.len(),
                    elf: path,
                });
            }
            let parent = path
                .parent()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            entry.insert(format!("th{thread}Path"), json!(parent));
            entry.insert(format!("th{thread}Elf"), json!(name));
        }

        input.insert(format!("tc{core}"), Value::Object(entry));
    }

    let descriptor = json!({
        "description": {},
        "input": Value::Object(input),
    });
    Ok((descriptor, cores.len()))
}

fn engine_name(engine: &Value) -> &str {
    engine["engineName"].as_str().unwrap_or_default()
}

fn engine_instructions(engine: &Value) -> Vec<String> {
    engine["engineInstructions"]
        .as_array()
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

/// First decimal number in an instruction mnemonic, if any.
fn instruction_unit(instruction: &str) -> Option<u64> {
    FIRST_NUMBER
        .find(instruction)
        .and_then(|m| m.as_str().parse().ok())
}

/// Replaces the engine named `name` with one `<prefix><n>` engine per unit
/// number found in its instructions. Each split engine keeps the instructions
/// for its unit plus every instruction that names no unit. An engine with no
/// numbered instructions is left alone.
fn split_engine(engines: &mut Vec<Value>, name: &str, prefix: &str) {
    let Some(index) = engines.iter().position(|e| engine_name(e) == name) else {
        return;
    };
    let instructions = engine_instructions(&engines[index]);
    let units: BTreeSet<u64> = instructions
        .iter()
        .filter_map(|i| instruction_unit(i))
        .collect();
    if units.is_empty() {
        return;
    }

    let original = engines.remove(index);
    for unit in units {
        let own: Vec<&String> = instructions
            .iter()
            .filter(|i| instruction_unit(i).map_or(true, |u| u == unit))
            .collect();
        let mut engine = original.as_object().cloned().unwrap_or_default();
        engine.insert("engineName".into(), json!(format!("{prefix}{unit}")));
        engine.insert("engineInstructions".into(), json!(own));
        engines.push(Value::Object(engine));
    }
}

/// Group an engine is scheduled under.
fn engine_group(name: &str) -> &str {
    if name.starts_with("UNPACKER") {
        "UNPACK"
    } else if name.starts_with("PACKER") {
        "PACK"
    } else if name == "INSTRISSUE" || name == "INSTISSUE" {
        "MATH"
    } else {
        name
    }
}

/// Layers the per-test fields onto the simulator config template.
///
/// The template's `engines` table may list `UNPACK` and `PACK` as single
/// engines; they are split into `UNPACKER<n>` / `PACKER<n>` by the unit
/// number in their instructions, and every engine gets its `engineGrp`.
pub fn build_sim_cfg(template: &Value, num_cores: usize, config: &ModelConfig) -> Value {
    let mut cfg = match template {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    cfg.insert("enableSync".into(), json!(config.enable_sync));
    cfg.insert("numTriscCores".into(), json!(num_cores));

    if let Some(Value::Array(engines)) = cfg.get_mut("engines") {
        split_engine(engines, "UNPACK", "UNPACKER");
        split_engine(engines, "PACK", "PACKER");
        for engine in engines.iter_mut() {
            let group = engine_group(engine_name(engine)).to_string();
            if let Some(engine) = engine.as_object_mut() {
                engine.insert("engineGrp".into(), json!(group));
                engine.insert("delay".into(), json!(config.delay));
            }
        }
    }

    let mop: Map<String, Value> = (0..config.max_threads_per_core)
        .map(|thread| (thread.to_string(), json!(config.mop_cfg_start)))
        .collect();
    cfg.insert("MOP_CFG_START".into(), Value::Object(mop));

    let stack: Map<String, Value> = config
        .stack
        .iter()
        .map(|(thread, range)| (thread.clone(), json!(range)))
        .collect();
    cfg.insert("stack".into(), Value::Object(stack));

    Value::Object(cfg)
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct ModelPipeline {
    config: ModelConfig,
    template: Value,
    /// Local mirror of the ground-truth test directories.
    gt_mirror: PathBuf,
    gt_dir_suffix: String,
}

impl ModelPipeline {
    /// Loads the config template up front so a bad template fails the run
    /// before any test is scheduled.
    pub fn new(
        config: ModelConfig,
        gt_mirror: impl Into<PathBuf>,
        gt_dir_suffix: impl Into<String>,
    ) -> Result<Self, SimParityError> {
        let template = match &config.cfg_template {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .map_err(|e| crate::err_io!(e, "failed to read model template {}", path.display()))?;
                let value: Value = serde_json::from_str(&text).map_err(|e| SimParityError::Config {
                    message: format!("model template {} is not valid JSON", path.display()),
                    source: Some(Box::new(e)),
                })?;
                if !value.is_object() {
                    return Err(err_msg!(
                        Config,
                        "model template {} must be a JSON object",
                        path.display()
                    ));
                }
                value
            }
            None => Value::Object(Map::new()),
        };
        Ok(Self {
            config,
            template,
            gt_mirror: gt_mirror.into(),
            gt_dir_suffix: gt_dir_suffix.into(),
        })
    }

    /// Result markers live next to the logs, one directory per test.
    pub fn store(&self) -> MarkerStore {
        MarkerStore::new(&self.config.output_dir, "", &self.config.marker_name)
    }

    pub fn log_path(&self, id: &str) -> PathBuf {
        self.config
            .output_dir
            .join(format!("{id}{}", self.config.log_suffix))
    }

    fn cfg_path(&self, id: &str) -> PathBuf {
        self.config.cfg_dir.join(format!("cfg_{id}.json"))
    }

    fn input_cfg_path(&self, id: &str) -> PathBuf {
        self.config.cfg_dir.join(format!("inputcfg_{id}.json"))
    }

    fn write_json(path: &Path, value: &Value) -> Result<(), String> {
        let text = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
        fs::write(path, text).map_err(|e| format!("failed to write {}: {e}", path.display()))
    }

    fn prepare(&self, id: &str) -> Result<(), String> {
        let test_dir = self.gt_mirror.join(format!("{id}{}", self.gt_dir_suffix));
        let (input_cfg, num_cores) =
            build_input_cfg(id, &test_dir, &self.config.start_function).map_err(|e| e.to_string())?;
        let cfg = build_sim_cfg(&self.template, num_cores, &self.config);

        fs::create_dir_all(&self.config.cfg_dir)
            .map_err(|e| format!("failed to create {}: {e}", self.config.cfg_dir.display()))?;
        Self::write_json(&self.input_cfg_path(id), &input_cfg)?;
        Self::write_json(&self.cfg_path(id), &cfg)?;
        debug!(test = id, cores = num_cores, "wrote model inputs");
        Ok(())
    }

    fn command_line(&self, id: &str) -> Vec<String> {
        let cfg = self.cfg_path(id).display().to_string();
        let input_cfg = self.input_cfg_path(id).display().to_string();
        self.config
            .command
            .iter()
            .map(|arg| {
                arg.replace("{cfg}", &cfg)
                    .replace("{inputcfg}", &input_cfg)
                    .replace("{test}", id)
            })
            .collect()
    }

    /// Spawns the simulator with stdout and stderr both going to the log.
    fn spawn(&self, id: &str) -> Result<(), String> {
        let args = self.command_line(id);
        let Some((program, rest)) = args.split_first() else {
            return Err("model command is empty".to_string());
        };
        fs::create_dir_all(&self.config.output_dir)
            .map_err(|e| format!("failed to create {}: {e}", self.config.output_dir.display()))?;
        let log_path = self.log_path(id);
        let log = File::create(&log_path)
            .map_err(|e| format!("failed to create {}: {e}", log_path.display()))?;
        let log_err = log
            .try_clone()
            .map_err(|e| format!("failed to share {}: {e}", log_path.display()))?;

        let status = Command::new(program)
            .args(rest)
            .current_dir(&self.config.workdir)
            .stdin(Stdio::null())
            .stdout(log)
            .stderr(log_err)
            .status()
            .map_err(|e| format!("failed to spawn {program}: {e}"))?;
        debug!(test = id, code = ?status.code(), "model exited");
        Ok(())
    }
}

impl Pipeline for ModelPipeline {
    fn kind(&self) -> PipelineKind {
        PipelineKind::Model
    }

    /// The stored marker, or else a log left by an earlier run that died
    /// before its result was persisted.
    fn load_local(
        &self,
        id: &str,
        store: &dyn ArtifactStore,
    ) -> Result<Option<ExecutionResult>, SimParityError> {
        if let Some(result) = store.load(id)? {
            return Ok(Some(result));
        }
        match fs::read_to_string(self.log_path(id)) {
            Ok(text) => Ok(Some(parse_model_log(&text))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(crate::err_io!(e, "failed to read {}", self.log_path(id).display())),
        }
    }

    fn run_one(&self, id: &str, _force: bool) -> ExecutionResult {
        if let Err(reason) = self.prepare(id) {
            warn!(test = id, reason = %reason, "model inputs unavailable");
            return ExecutionResult::unknown(reason);
        }
        info!(test = id, "running model");
        if let Err(reason) = self.spawn(id) {
            warn!(test = id, reason = %reason, "model did not start");
            return ExecutionResult::unknown(reason);
        }
        match fs::read_to_string(self.log_path(id)) {
            Ok(text) => parse_model_log(&text),
            Err(e) => ExecutionResult::unknown(format!("model log unreadable: {e}")),
        }
    }
}
