#![allow(missing_docs)]

use std::fs;
use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use serde_json::Value;
use tempfile::TempDir;

fn quadstore(dir: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("quadstore");
    cmd.env("QUADSTORE_CLI_CONFIG", dir.join("no-cli-config.toml"))
        .env_remove("RUST_LOG")
        .arg("--db")
        .arg(dir.join("db"));
    cmd
}

fn json(cmd: &mut Command) -> Value {
    let output = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).expect("valid json")
}

fn init(dir: &TempDir) {
    quadstore(dir.path())
        .args(["init", "--block-size", "512", "--no-sync"])
        .assert()
        .success();
}

#[test]
fn init_writes_config_and_refuses_to_overwrite() {
    let dir = TempDir::new().expect("tempdir");
    let report = json(quadstore(dir.path()).args([
        "--format", "json", "init", "--index", "spog", "--index", "gpos",
    ]));
    assert_eq!(report["recovery"]["fresh"], true);
    let config = fs::read_to_string(dir.path().join("db").join("quadstore.toml")).unwrap();
    assert!(config.contains("spog"));
    assert!(config.contains("gpos"));
    assert!(!config.contains("ospg"));

    quadstore(dir.path()).arg("init").assert().failure();
}

#[test]
fn add_find_remove_round_trip() {
    let dir = TempDir::new().expect("tempdir");
    init(&dir);

    let added = json(quadstore(dir.path()).args(["--format", "json", "add", "1", "2", "3", "4"]));
    assert_eq!(added["changed"], true);
    assert_eq!(added["phases"][0][1], 1);
    let again = json(quadstore(dir.path()).args(["--format", "json", "add", "1", "2", "3", "4"]));
    assert_eq!(again["changed"], false);
    quadstore(dir.path()).args(["add", "5", "2", "3", "4"]).assert().success();

    let found = json(quadstore(dir.path()).args(["--format", "json", "find", "0", "2", "3"]));
    let quads = found["quads"].as_array().unwrap();
    assert_eq!(quads.len(), 2);
    assert_eq!(quads[0]["subject"], 1);
    assert_eq!(found["phase"], 2);

    let limited = json(quadstore(dir.path()).args([
        "--format", "json", "find", "--index", "gosp", "--limit", "1",
    ]));
    assert_eq!(limited["index"], "GOSP");
    assert_eq!(limited["quads"].as_array().unwrap().len(), 1);

    let removed = json(quadstore(dir.path()).args(["--format", "json", "remove", "1", "2", "3", "4"]));
    assert_eq!(removed["changed"], true);
    let text = quadstore(dir.path())
        .args(["find"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert_eq!(String::from_utf8(text).unwrap().trim(), "5 2 3 4");
}

#[test]
fn wildcard_in_mutation_fails() {
    let dir = TempDir::new().expect("tempdir");
    init(&dir);
    quadstore(dir.path())
        .args(["add", "1", "0", "3", "4"])
        .assert()
        .failure();
}

#[test]
fn phases_stats_and_verify_report_json() {
    let dir = TempDir::new().expect("tempdir");
    init(&dir);
    for s in 1..=20 {
        quadstore(dir.path())
            .args(["add", &s.to_string(), "7", "8", "1"])
            .assert()
            .success();
    }

    let phases = json(quadstore(dir.path()).args(["--format", "json", "phases"]));
    assert_eq!(phases["recovery"]["fresh"], false);
    assert_eq!(phases["decision"]["state"], "completed");
    let statements = &phases["metaroots"][0];
    assert_eq!(statements["resource"], "statements");
    let valid: Vec<&Value> = statements["slots"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|s| s["status"] == "valid")
        .collect();
    assert_eq!(valid.len(), 1);
    assert_eq!(valid[0]["phase"], 20);

    let stats = json(quadstore(dir.path()).args(["--format", "json", "stats"]));
    assert_eq!(stats["resources"][0]["kind"], "statements");
    assert_eq!(stats["resources"][0]["nr_quads"], 20);
    assert_eq!(stats["resources"][0]["block_size"], 512);
    assert_eq!(stats["resources"][1]["kind"], "nodes");

    let verify = json(quadstore(dir.path()).args(["--format", "json", "verify", "--level", "full"]));
    assert_eq!(verify["success"], true);
    assert_eq!(verify["counts"]["keys_scanned"], 20 * 6);
}

#[test]
fn missing_database_is_an_error() {
    let dir = TempDir::new().expect("tempdir");
    quadstore(dir.path()).arg("stats").assert().failure();
    assert!(!dir.path().join("db").join("coordinator.log").exists());
}

#[test]
fn explicit_config_file_is_honoured() {
    let dir = TempDir::new().expect("tempdir");
    let db_dir = dir.path().join("elsewhere");
    let config = dir.path().join("custom.toml");
    fs::write(
        &config,
        "directory = \"elsewhere\"\nindexes = [\"spog\"]\nsync = false\n",
    )
    .unwrap();
    let mut cmd = cargo_bin_cmd!("quadstore");
    cmd.env("QUADSTORE_CLI_CONFIG", dir.path().join("none.toml"))
        .arg("--config")
        .arg(&config)
        .args(["--format", "json", "init"]);
    let report = json(&mut cmd);
    assert_eq!(report["recovery"]["fresh"], true);
    assert!(db_dir.join("coordinator.log").exists());
    let written = fs::read_to_string(db_dir.join("quadstore.toml")).unwrap();
    assert!(written.contains("spog"));
    assert!(!written.contains("posg"));
}
