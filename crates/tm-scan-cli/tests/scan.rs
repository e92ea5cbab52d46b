use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;

fn workspace_kb() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../kb")
}

#[test]
fn scan_writes_evidence_and_report_artifacts() {
    let repo = tempfile::tempdir().unwrap();
    fs::create_dir_all(repo.path().join("config")).unwrap();
    fs::write(
        repo.path().join("config/app.yaml"),
        "DB_PASSWORD=secret123\nurl: postgres://user:pw@dbhost:5432/app\n",
    )
    .unwrap();
    let out = tempfile::tempdir().unwrap();

    let mut cmd = Command::cargo_bin("tm-scan-cli").unwrap();
    cmd.args([
        "--kb-dir",
        workspace_kb().to_str().unwrap(),
        "scan",
        "--repo-root",
        repo.path().to_str().unwrap(),
        "--repo-name",
        "demo",
        "--out",
        out.path().to_str().unwrap(),
        "--report",
        "--org",
        "acme",
    ])
    .assert()
    .success()
    .stdout(predicate::str::contains("Scanned demo"));

    let evidence_raw = fs::read_to_string(out.path().join("evidence.json")).unwrap();
    let evidence: serde_json::Value = serde_json::from_str(&evidence_raw).unwrap();
    assert_eq!(evidence["repo_name"], "demo");
    assert_eq!(evidence["file_counts"]["config_files"], 1);
    assert!(evidence_raw.contains("postgres://<REDACTED>@dbhost/..."));
    assert!(!evidence_raw.contains("secret123"));
    assert!(!evidence_raw.contains("user:pw"));

    let summary = fs::read_to_string(out.path().join("evidence-summary.md")).unwrap();
    assert!(summary.contains("# Evidence Summary: demo"));

    let report = fs::read_to_string(out.path().join("threatmodel-report.md")).unwrap();
    assert!(report.contains("# Threat Model Report"));
    assert!(report.contains("**Organization:** acme"));
    assert!(report.contains("## Questions for Security Reviewers"));
    assert!(!report.contains("secret123"));
}

#[test]
fn scan_with_secrets_summary_raises_risk_level() {
    let repo = tempfile::tempdir().unwrap();
    fs::write(repo.path().join("readme.txt"), "nothing interesting").unwrap();
    let out = tempfile::tempdir().unwrap();
    let secrets = repo.path().join("secrets-summary.json");
    fs::write(
        &secrets,
        r#"{"status": "completed", "findings_count": 3, "findings_by_rule": {}}"#,
    )
    .unwrap();

    Command::cargo_bin("tm-scan-cli")
        .unwrap()
        .args([
            "--kb-dir",
            workspace_kb().to_str().unwrap(),
            "scan",
            "--repo-root",
            repo.path().to_str().unwrap(),
            "--repo-name",
            "quiet-repo",
            "--out",
            out.path().to_str().unwrap(),
            "--report",
            "--secrets-summary",
            secrets.to_str().unwrap(),
        ])
        .assert()
        .success();

    let report = fs::read_to_string(out.path().join("threatmodel-report.md")).unwrap();
    assert!(report.contains("**Overall Risk Level:** High"));
    assert!(report.contains("Remove 3 potential secret(s)"));
}

#[test]
fn scan_with_missing_kb_still_succeeds() {
    let repo = tempfile::tempdir().unwrap();
    fs::write(repo.path().join("main.rs"), "fn main() {}").unwrap();
    let out = tempfile::tempdir().unwrap();

    Command::cargo_bin("tm-scan-cli")
        .unwrap()
        .args([
            "--kb-dir",
            "/definitely/not/a/kb",
            "scan",
            "--repo-root",
            repo.path().to_str().unwrap(),
            "--repo-name",
            "bare",
            "--out",
            out.path().to_str().unwrap(),
        ])
        .assert()
        .success()
        .stderr(predicate::str::contains("reduced signal"));

    let evidence_raw = fs::read_to_string(out.path().join("evidence.json")).unwrap();
    let evidence: serde_json::Value = serde_json::from_str(&evidence_raw).unwrap();
    assert_eq!(evidence["keyword_hits"].as_array().unwrap().len(), 0);
}

#[test]
fn list_rules_prints_loaded_keywords() {
    Command::cargo_bin("tm-scan-cli")
        .unwrap()
        .args(["--kb-dir", workspace_kb().to_str().unwrap(), "list-rules"])
        .assert()
        .success()
        .stdout(predicate::str::contains("password"))
        .stdout(predicate::str::contains("rule(s) loaded"));
}

#[test]
fn list_rules_json_is_parseable() {
    let output = Command::cargo_bin("tm-scan-cli")
        .unwrap()
        .args([
            "--kb-dir",
            workspace_kb().to_str().unwrap(),
            "list-rules",
            "--json",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());
    let rules: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(rules.as_array().unwrap().iter().any(|r| r["keyword"] == "jwt"));
}
