//! Shared fixtures: a throwaway workspace with a catalog, a local bench, and
//! a config file pointing at both.

#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
};

use tempfile::TempDir;

pub const PROJECT: &str = "\
suites:
  - suite-name: math
    tags: [matmul, elw]
  - suite-name: data
    tags: datacopy
";

pub const TESTS: &str = "\
tests:
  - test-name: t6-n1-matmul-a
    tags: [matmul, n1]
  - test-name: t6-n1-elwadd-b
    tags: elwadd
  - test-name: t6-n1-datacopy-c
    tags: [datacopy]
  - test-name: t6-n2-upk-d
    tags: [upk]
";

/// Bench script: records each invocation, then writes a PASS marker whose
/// cycle count is taken from `cycles/<id>` (default 1000).
pub const BENCH: &str = r#"echo "$1" >> calls.txt
cycles=1000
if [ -f "cycles/$1" ]; then cycles=$(cat "cycles/$1"); fi
echo "simulating $1"
printf 'res: PASS\ntotal-cycles: %s\n' "$cycles" > "debug/$1_0/sim_result.yml"
"#;

pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Catalog, bench script, and a config selecting every test.
    pub fn new() -> Self {
        let ws = Self {
            dir: tempfile::tempdir().unwrap(),
        };
        ws.write("catalog/project.yaml", PROJECT);
        ws.write("catalog/regress/t6.yaml", TESTS);
        ws.write("bench/bench.sh", BENCH);
        fs::create_dir_all(ws.path().join("bench/cycles")).unwrap();
        ws.write_config("");
        ws
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, rel: &str, contents: &str) -> PathBuf {
        let path = self.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, contents).unwrap();
        path
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.path().join(rel)).unwrap()
    }

    pub fn config_path(&self) -> PathBuf {
        self.path().join("simparity.yaml")
    }

    /// Writes `simparity.yaml`. `document_policy` goes after the document
    /// name, e.g. `"{ suites: math }"`; empty means every test.
    pub fn write_config(&self, document_policy: &str) -> PathBuf {
        let policy = if document_policy.is_empty() { "~" } else { document_policy };
        let config = format!(
            "\
catalog:
  root: catalog
  documents:
    t6.yaml: {policy}
ground_truth:
  bench_root: {bench}
  debug_dir: debug
  command: sh bench.sh {{test}}
  mirror: mirror
model:
  command: [sh, {model}, \"{{test}}\"]
  workdir: .
  cfg_dir: cfg
  output_dir: logs
comparison:
  out_dir: reports
  stamp: t1
",
            bench = self.path().join("bench").display(),
            model = self.path().join("model.sh").display(),
        );
        self.write("simparity.yaml", &config)
    }

    /// Number of times the bench ran `id`.
    pub fn bench_calls(&self, id: &str) -> usize {
        fs::read_to_string(self.path().join("bench/calls.txt"))
            .unwrap_or_default()
            .lines()
            .filter(|line| *line == id)
            .count()
    }

    pub fn set_cycles(&self, id: &str, cycles: u64) {
        self.write(&format!("bench/cycles/{id}"), &cycles.to_string());
    }

    /// Stores a model outcome the way the model pipeline persists it.
    pub fn seed_model(&self, id: &str, marker: &str) {
        self.write(&format!("logs/{id}/model_result.yml"), marker);
    }

    /// Stores a ground-truth outcome in the local mirror.
    pub fn seed_ground_truth(&self, id: &str, marker: &str) {
        self.write(&format!("mirror/{id}_0/sim_result.yml"), marker);
    }

    /// Lays out the inputs the model reads for `id`: one core, one thread.
    pub fn seed_model_inputs(&self, id: &str) {
        self.write(&format!("mirror/{id}_0/neo_0/thread_0/{id}_0.elf"), "");
    }
}

pub const ALL_IDS: [&str; 4] = [
    "t6-n1-datacopy-c",
    "t6-n1-elwadd-b",
    "t6-n1-matmul-a",
    "t6-n2-upk-d",
];
