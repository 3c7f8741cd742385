// End-to-end runs of the `simparity` binary against a local bench.

mod common;

use assert_cmd::Command;
use common::{Workspace, ALL_IDS};
use predicates::{prelude::PredicateBooleanExt, str::contains};

fn simparity(ws: &Workspace) -> Command {
    let mut cmd = Command::cargo_bin("simparity").unwrap();
    cmd.current_dir(ws.path()).env("SIMPARITY_LOG", "warn");
    cmd
}

#[test]
fn select_prints_resolved_ids() {
    let ws = Workspace::new();
    let expected = format!("{}\n", ALL_IDS.join("\n"));
    simparity(&ws).arg("select").assert().success().stdout(expected);

    simparity(&ws)
        .args(["select", "--suite", "data", "--test", "t6-n2-upk-d"])
        .assert()
        .success()
        .stdout("t6-n1-datacopy-c\nt6-n2-upk-d\n");
}

#[test]
fn select_uses_configured_policy() {
    let ws = Workspace::new();
    ws.write_config("{ suites: math }");
    simparity(&ws)
        .arg("select")
        .assert()
        .success()
        .stdout("t6-n1-elwadd-b\nt6-n1-matmul-a\n");
}

#[test]
fn missing_document_is_a_diagnostic() {
    let ws = Workspace::new();
    ws.write(
        "simparity.yaml",
        &ws.read("simparity.yaml").replace("t6.yaml", "t9.yaml"),
    );
    simparity(&ws)
        .arg("select")
        .assert()
        .failure()
        .stderr(contains("simparity::catalog").and(contains("t9.yaml")));
}

#[test]
fn bad_config_is_rejected_before_running() {
    let ws = Workspace::new();
    ws.write("simparity.yaml", "catalog:\n  root: catalog\n  documents: {}\n");
    simparity(&ws)
        .args(["run", "--pipeline", "none"])
        .assert()
        .failure()
        .stderr(contains("simparity::config"));
}

#[test]
fn report_compares_stored_results() {
    let ws = Workspace::new();
    for id in ALL_IDS {
        ws.seed_ground_truth(id, "res: PASS\ntotal-cycles: 1000\n");
        ws.seed_model(id, "result: PASS\ntotal-cycles: 1000\n");
    }
    ws.seed_model("t6-n1-matmul-a", "result: PASS\ntotal-cycles: 1100\n");
    ws.seed_model(
        "t6-n2-upk-d",
        "result: FAIL\ndiagnostic: 'Timeout 12 reached for valid check'\n",
    );

    simparity(&ws)
        .arg("report")
        .assert()
        .success()
        .stdout(contains("PM  3/4 passed").and(contains("within  10%: 3/3")));

    let status = ws.read("reports/status_t1.csv");
    assert!(status.contains("t6-n1-matmul-a,MATMUL,PASS,1000,PASS,1100,1.1000,,"));
    let pivot = ws.read("reports/failure_analysis_t1.csv");
    assert!(pivot.contains("UPK,1,1"));
    assert_eq!(ws.bench_calls("t6-n1-matmul-a"), 0);
}

#[test]
fn run_executes_ground_truth_then_reuses_it() {
    let ws = Workspace::new();
    ws.write_config("{ tests: [t6-n1-matmul-a] }");
    ws.set_cycles("t6-n1-matmul-a", 2000);
    ws.seed_model("t6-n1-matmul-a", "result: PASS\ntotal-cycles: 1800\n");

    simparity(&ws)
        .args(["run", "--pipeline", "ground-truth"])
        .assert()
        .success()
        .stdout(contains("1 tests, 0 cached, 1 executed"));
    simparity(&ws)
        .args(["run", "--pipeline", "ground-truth"])
        .assert()
        .success()
        .stdout(contains("1 tests, 1 cached, 0 executed"));

    assert_eq!(ws.bench_calls("t6-n1-matmul-a"), 1);
    let s_curve = ws.read("reports/s_curve_t1.csv");
    assert!(s_curve.contains("1,t6-n1-matmul-a,MATMUL,0.9000"));
}
