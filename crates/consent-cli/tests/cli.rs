use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;

fn consentctl(ledger: &Path) -> Command {
    let mut cmd = Command::cargo_bin("consentctl").unwrap();
    cmd.env_remove("CONSENT_LEDGER_CONFIG")
        .env("RUST_LOG", "warn")
        .arg("--ledger")
        .arg(ledger);
    cmd
}

fn json_output(cmd: &mut Command) -> Value {
    let out = cmd.arg("--output").arg("json").assert().success();
    serde_json::from_slice(&out.get_output().stdout).unwrap()
}

#[test]
fn request_grant_validate_revoke() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = dir.path().join("consent.jsonl");

    let req = json_output(consentctl(&ledger).args([
        "request",
        "--from",
        "SupplyChainBOT",
        "--to",
        "SOpLead",
        "--type",
        "data_access",
        "--scope",
        "inventory:*",
        "--purpose",
        "reconcile stock",
    ]));
    let request_id = req["id"].as_str().unwrap().to_string();
    assert!(request_id.starts_with("req_"));

    let grant = json_output(consentctl(&ledger).args(["grant", &request_id]));
    let grant_id = grant["id"].as_str().unwrap().to_string();
    assert_eq!(grant["status"], "active");

    consentctl(&ledger)
        .args([
            "validate",
            "SupplyChainBOT",
            "--type",
            "data_access",
            "--scope",
            "inventory:SKU123",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains(grant_id.as_str()));

    consentctl(&ledger)
        .args(["revoke", &grant_id, "--reason", "quarter closed"])
        .assert()
        .success();

    consentctl(&ledger)
        .args([
            "validate",
            "SupplyChainBOT",
            "--type",
            "data_access",
            "--scope",
            "inventory:SKU123",
        ])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("denied: revoked"));

    consentctl(&ledger)
        .args(["revoke", &grant_id])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("already revoked"));

    let entries = json_output(consentctl(&ledger).args(["audit", "SOpLead", "--limit", "2"]));
    let kinds: Vec<&str> = entries
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["event"]["kind"].as_str().unwrap())
        .collect();
    assert_eq!(kinds, vec!["grant_issued", "grant_revoked"]);

    consentctl(&ledger)
        .arg("verify")
        .assert()
        .success()
        .stdout(predicate::str::contains("3 entries verified"));
}

#[test]
fn unknown_request_reports_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = dir.path().join("consent.jsonl");

    consentctl(&ledger)
        .args(["grant", "req_missing"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("denied: not_found"));
}

#[test]
fn tampered_ledger_exits_with_integrity_status() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = dir.path().join("consent.jsonl");

    consentctl(&ledger)
        .args([
            "request", "--from", "a", "--to", "b", "--type", "learning", "--scope", "notes:*",
        ])
        .assert()
        .success();

    let raw = std::fs::read_to_string(&ledger).unwrap();
    std::fs::write(&ledger, raw.replace("notes:*", "notes:x")).unwrap();

    consentctl(&ledger)
        .arg("verify")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("seq 1"));
}
