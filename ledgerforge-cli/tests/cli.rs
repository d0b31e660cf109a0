//! End-to-end runs of the `ledgerforge` binary

use serde_json::Value;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn ledgerforge(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ledgerforge"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run ledgerforge")
}

/// Default topology rooted in `dir`
fn write_config(dir: &Path, extra: &str) -> String {
    let path = dir.join("network.toml");
    let contents = format!(
        "[paths]\ncrypto_config = {:?}\nresources = {:?}\n\n[timeouts]\nproposal_wait = \"2s\"\n{}",
        dir.join("crypto-config").display().to_string(),
        dir.display().to_string(),
        extra
    );
    fs::write(&path, contents).unwrap();
    path.display().to_string()
}

fn stdout_json(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "stdout is not JSON ({}): {}\nstderr: {}",
            e,
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        )
    })
}

#[test]
fn test_validate_prints_organizations() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "");

    let output = ledgerforge(&["validate", "--config", &config]);

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let summary = stdout_json(&output);
    assert_eq!(summary["channel"], "foo");
    assert_eq!(summary["organizations"][0]["name"], "peerOrg1");
    assert_eq!(summary["organizations"][0]["peers"].as_array().unwrap().len(), 2);
    assert_eq!(summary["organizations"][1]["msp_id"], "Org2MSP");
}

#[test]
fn test_validate_rejects_bad_locations() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("network.properties");
    fs::write(
        &path,
        "ledgerforge.org.peerOrg1.mspid = Org1MSP\n\
         ledgerforge.org.peerOrg1.domname = org1.example.com\n\
         ledgerforge.org.peerOrg1.ca_location = http://localhost:7054\n\
         ledgerforge.org.peerOrg1.peer_locations = peer0.org1.example.com\n\
         ledgerforge.org.peerOrg1.orderer_locations = orderer.example.com@grpc://localhost:7050\n",
    )
    .unwrap();

    let output = ledgerforge(&["validate", "--config", &path.display().to_string()]);

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}

#[test]
fn test_simulate_provisioned_network() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "");

    let output = ledgerforge(&[
        "--log-level",
        "debug",
        "simulate",
        "--config",
        &config,
        "--provision",
    ]);

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let report = stdout_json(&output);
    assert!(report["failure"].is_null());
    assert_eq!(report["channel"]["state"], "closed");
    assert_eq!(report["install"]["successful"], 2);
    assert_eq!(report["instantiate"]["successful"], 2);
}

#[test]
fn test_simulate_without_credentials_fails_channel_org() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "");
    let empty = TempDir::new().unwrap();

    let output = ledgerforge(&[
        "simulate",
        "--config",
        &config,
        "--credentials",
        &empty.path().display().to_string(),
    ]);

    assert!(!output.status.success());
    let report = stdout_json(&output);
    assert_eq!(report["enrollments"][0]["status"], "failed");
    assert_eq!(report["failure"]["step"], "channel");
}

#[test]
fn test_simulate_skip_install_json_logs() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "\n[lifecycle]\ninstall = false\n");

    let output = ledgerforge(&["--json-logs", "simulate", "--config", &config, "--provision"]);

    // Nothing is installed on the fresh network, so instantiate fails on every peer.
    assert!(!output.status.success());
    let report = stdout_json(&output);
    assert_eq!(report["install"]["skipped"], true);
    assert_eq!(report["failure"]["step"], "instantiate");
    assert_eq!(report["instantiate"]["successful"], 0);

    let stderr = String::from_utf8_lossy(&output.stderr);
    let first_log = stderr.lines().find(|l| l.starts_with('{')).unwrap();
    let log: Value = serde_json::from_str(first_log).unwrap();
    assert!(log["fields"]["message"].is_string());
}
