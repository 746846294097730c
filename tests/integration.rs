use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn vault_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("vault");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_content = format!(
        r#"[store]
root = "{}"
"#,
        root.display()
    );

    let config_path = root.join("vault.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_vault(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = vault_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        // Isolate from the developer's real credentials.
        .env_remove("AWS_ACCESS_KEY_ID")
        .env_remove("AWS_SECRET_ACCESS_KEY")
        .env_remove("AWS_SESSION_TOKEN")
        .env_remove("SEARCH_API_KEY")
        .env_remove("ANTHROPIC_API_KEY")
        .env_remove("OPENAI_API_KEY")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run vault binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn write_record(root: &Path, rel: &str, content: &str) {
    let full = root.join(rel);
    fs::create_dir_all(full.parent().unwrap()).unwrap();
    fs::write(full, content).unwrap();
}

#[test]
fn test_init_scaffolds_store() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_vault(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("store initialized"));
    assert!(tmp.path().join("requirements").is_dir());
    assert!(tmp.path().join("session_summaries").is_dir());
    assert!(tmp.path().join(".vault").is_dir());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_vault(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_vault(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_save_no_llm_writes_local_record() {
    let (tmp, config_path) = setup_test_env();
    run_vault(&config_path, &["init"]);

    let (stdout, stderr, success) = run_vault(
        &config_path,
        &[
            "save",
            "--no-llm",
            "--text",
            "We reviewed the sync pipeline and agreed on the manifest commit ordering.",
        ],
    );
    assert!(success, "save failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("engine: local"));

    let summaries: Vec<_> = fs::read_dir(tmp.path().join("session_summaries"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(summaries.len(), 1, "expected exactly one summary record");

    let raw = fs::read_to_string(&summaries[0]).unwrap();
    assert!(raw.contains("kind = \"session-summary\""));
    assert!(raw.contains("engine = \"local\""));
}

#[test]
fn test_save_with_chapter_updates_state() {
    let (tmp, config_path) = setup_test_env();
    run_vault(&config_path, &["init"]);

    let (stdout, stderr, success) = run_vault(
        &config_path,
        &[
            "save",
            "--no-llm",
            "--chapter",
            "04",
            "--text",
            "Planning session for the chapter four milestone and roadmap.",
        ],
    );
    assert!(success, "save failed: stdout={}, stderr={}", stdout, stderr);

    let state = fs::read_to_string(tmp.path().join("chapters/04/chapter_state.toml")).unwrap();
    assert!(state.contains("kind = \"chapter-state\""));
    assert!(state.contains("artifacts_count = 1"));
}

const REQ_APPROVED_1: &str = r#"id = "RQ-001"
kind = "requirement"
status = "approved"
timestamp = "2026-08-01T10:00:00Z"
title = "Versioned records"
chapter = "04"
"#;

const REQ_APPROVED_2: &str = r#"id = "RQ-002"
kind = "requirement"
status = "approved"
timestamp = "2026-08-02T10:00:00Z"
title = "Idempotent sync"
chapter = "04"
"#;

const REQ_DRAFT: &str = r#"id = "RQ-003"
kind = "requirement"
status = "draft"
timestamp = "2026-08-03T10:00:00Z"
title = "Query citations"
chapter = "05"
"#;

const GATE_PASSED: &str = r#"id = "G-01"
kind = "gate"
status = "passed"
timestamp = "2026-08-04T10:00:00Z"
title = "Architecture gate"
chapter = "04"
"#;

const CHAPTER_STATE: &str = r#"id = "CH-04"
kind = "chapter-state"
timestamp = "2026-08-01T09:00:00Z"
title = "Chapter 04"
chapter = "04"

[progress]
progress_pct = 40
artifacts_count = 6
"#;

fn seed_scenario(root: &Path) {
    write_record(root, "requirements/rq-001.toml", REQ_APPROVED_1);
    write_record(root, "requirements/rq-002.toml", REQ_APPROVED_2);
    write_record(root, "requirements/rq-003.toml", REQ_DRAFT);
    write_record(root, "gates/g-01.toml", GATE_PASSED);
    write_record(root, "chapters/04/chapter_state.toml", CHAPTER_STATE);
}

#[test]
fn test_resume_reports_tallies() {
    let (tmp, config_path) = setup_test_env();
    run_vault(&config_path, &["init"]);
    seed_scenario(tmp.path());

    let (stdout, stderr, success) = run_vault(&config_path, &["resume"]);
    assert!(success, "resume failed: stderr={}", stderr);
    assert!(stdout.contains("Requirements: 2/3 approved"));
    assert!(stdout.contains("RQ-003 [draft]"));
    assert!(stdout.contains("Gates: 1/1 passed"));
    assert!(stdout.contains("Chapter 04: 40% complete"));
}

#[test]
fn test_resume_is_deterministic() {
    let (tmp, config_path) = setup_test_env();
    run_vault(&config_path, &["init"]);
    seed_scenario(tmp.path());

    let (first, _, _) = run_vault(&config_path, &["resume"]);
    let (second, _, _) = run_vault(&config_path, &["resume"]);
    assert_eq!(first, second, "unchanged store must digest identically");
}

#[test]
fn test_resume_chapter_filter() {
    let (tmp, config_path) = setup_test_env();
    run_vault(&config_path, &["init"]);
    seed_scenario(tmp.path());

    let (stdout, _, success) = run_vault(&config_path, &["resume", "--chapter", "04"]);
    assert!(success);
    assert!(stdout.contains("Requirements: 2/2 approved"));
    assert!(!stdout.contains("RQ-003"));
}

#[test]
fn test_resync_requires_blob_config() {
    let (_tmp, config_path) = setup_test_env();
    run_vault(&config_path, &["init"]);

    let (_, stderr, success) = run_vault(&config_path, &["resync"]);
    assert!(!success, "resync without [blob] config must fail");
    assert!(stderr.contains("[blob]"), "stderr: {}", stderr);
}

#[test]
fn test_resync_requires_credentials() {
    let (tmp, config_path) = setup_test_env();
    run_vault(&config_path, &["init"]);

    let config_content = format!(
        r#"[store]
root = "{}"

[blob]
bucket = "test-bucket"

[search]
endpoint = "https://search.invalid"
index = "vault-test"
"#,
        tmp.path().display()
    );
    fs::write(&config_path, config_content).unwrap();

    let (_, stderr, success) = run_vault(&config_path, &["resync"]);
    assert!(!success, "resync without credentials must fail");
    assert!(
        stderr.contains("AWS_ACCESS_KEY_ID") || stderr.contains("SEARCH_API_KEY"),
        "stderr: {}",
        stderr
    );
}

#[test]
fn test_query_requires_search_config() {
    let (_tmp, config_path) = setup_test_env();
    run_vault(&config_path, &["init"]);

    let (_, stderr, success) = run_vault(&config_path, &["query", "anything"]);
    assert!(!success, "query without [search] config must fail");
    assert!(stderr.contains("[search]"), "stderr: {}", stderr);
}

#[test]
fn test_quarantined_record_warns_but_does_not_fail() {
    let (tmp, config_path) = setup_test_env();
    run_vault(&config_path, &["init"]);
    seed_scenario(tmp.path());
    write_record(tmp.path(), "requirements/broken.toml", "not toml at all [");

    let (stdout, stderr, success) = run_vault(&config_path, &["resume"]);
    assert!(success, "resume must survive a malformed record");
    assert!(stderr.contains("quarantined"));
    assert!(stdout.contains("Requirements: 2/3 approved"));
}
