use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn ingestor_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("ingestor");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("alpha.md"),
        "Alpha Document. This is the alpha document about Rust programming. John Smith wrote it at Acme Corp.",
    )
    .unwrap();
    fs::write(
        files_dir.join("beta.txt"),
        "Beta plain text file. Contains notes about deployment and infrastructure in Seattle.",
    )
    .unwrap();

    let config_content = format!(
        r#"[storage]
dir = "{}/data"

[batch]
max_concurrency = 2
"#,
        root.display()
    );

    let config_path = config_dir.join("ingestor.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_ingestor(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = ingestor_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run ingestor binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn init_creates_database() {
    let (_tmp, config_path) = setup_test_env();
    let (stdout, stderr, success) = run_ingestor(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn init_is_idempotent() {
    let (_tmp, config_path) = setup_test_env();
    let (_, _, success1) = run_ingestor(&config_path, &["init"]);
    assert!(success1, "first init failed");
    let (_, _, success2) = run_ingestor(&config_path, &["init"]);
    assert!(success2, "second init failed (not idempotent)");
}

#[test]
fn ingest_and_get_round_trip() {
    let (tmp, config_path) = setup_test_env();
    run_ingestor(&config_path, &["init"]);

    let path = tmp.path().join("files").join("alpha.md");
    let (stdout, stderr, success) = run_ingestor(&config_path, &["ingest", path.to_str().unwrap()]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.starts_with("Ingested "));

    let id = stdout.trim_start_matches("Ingested ").split_whitespace().next().unwrap();
    let (stdout, _, success) = run_ingestor(&config_path, &["get", id]);
    assert!(success, "get failed");
    assert!(stdout.contains(id));
    assert!(stdout.contains("Chunks"));
}

#[test]
fn ingest_is_deduplicated_by_hash() {
    let (tmp, config_path) = setup_test_env();
    run_ingestor(&config_path, &["init"]);

    let path = tmp.path().join("files").join("alpha.md");
    let (first, _, _) = run_ingestor(&config_path, &["ingest", path.to_str().unwrap()]);
    let (second, _, _) = run_ingestor(&config_path, &["ingest", path.to_str().unwrap()]);
    assert!(second.contains("[deduplicated]"), "expected dedup marker, got: {}", second);

    let first_id = first.trim_start_matches("Ingested ").split_whitespace().next().unwrap();
    let second_id = second.trim_start_matches("Ingested ").split_whitespace().next().unwrap();
    assert_eq!(first_id, second_id, "deduplicated ingest should return the same content id");
}

#[test]
fn search_finds_ingested_content() {
    let (tmp, config_path) = setup_test_env();
    run_ingestor(&config_path, &["init"]);
    run_ingestor(&config_path, &["ingest", tmp.path().join("files").join("alpha.md").to_str().unwrap()]);

    let (stdout, _, success) = run_ingestor(&config_path, &["search", "Rust programming"]);
    assert!(success, "search failed");
    assert!(stdout.contains("id:"), "expected a result, got: {}", stdout);
}

#[test]
fn search_empty_query_reports_no_results() {
    let (_tmp, config_path) = setup_test_env();
    run_ingestor(&config_path, &["init"]);
    let (stdout, _, success) = run_ingestor(&config_path, &["search", "   "]);
    assert!(success, "empty query should not error");
    assert!(stdout.contains("No results"));
}

#[test]
fn search_nonmatching_query_reports_no_results() {
    let (tmp, config_path) = setup_test_env();
    run_ingestor(&config_path, &["init"]);
    run_ingestor(&config_path, &["ingest", tmp.path().join("files").join("alpha.md").to_str().unwrap()]);
    let (stdout, _, success) = run_ingestor(&config_path, &["search", "xyznonexistentterm"]);
    assert!(success);
    assert!(stdout.contains("No results"));
}

#[test]
fn get_missing_content_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_ingestor(&config_path, &["init"]);
    let (_, stderr, success) = run_ingestor(&config_path, &["get", "nonexistent-id"]);
    assert!(!success, "get with missing ID should fail");
    assert!(stderr.contains("not found"), "expected not-found error, got: {}", stderr);
}

#[test]
fn batch_ingests_a_directory_and_records_a_job() {
    let (tmp, config_path) = setup_test_env();
    run_ingestor(&config_path, &["init"]);

    let files_dir = tmp.path().join("files");
    let (stdout, stderr, success) = run_ingestor(&config_path, &["batch", files_dir.to_str().unwrap()]);
    assert!(success, "batch failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("2/2 succeeded"), "expected both files to succeed, got: {}", stdout);

    let job_id = stdout
        .rsplit("job ")
        .next()
        .unwrap()
        .trim_end_matches(')')
        .to_string();

    let (jobs_stdout, _, success) = run_ingestor(&config_path, &["jobs"]);
    assert!(success);
    assert!(jobs_stdout.contains(&job_id));

    let (job_stdout, _, success) = run_ingestor(&config_path, &["job", &job_id]);
    assert!(success);
    assert!(job_stdout.contains("completed"));
}

#[test]
fn cancel_unknown_job_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_ingestor(&config_path, &["init"]);
    let (_, stderr, success) = run_ingestor(&config_path, &["cancel", "nonexistent-job"]);
    assert!(!success);
    assert!(stderr.contains("not found"), "expected not-found error, got: {}", stderr);
}
