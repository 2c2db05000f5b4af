use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn rml_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("rml");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("rust.txt"),
        "Rust ownership rules prevent data races. The borrow checker enforces them at compile time.",
    )
    .unwrap();
    fs::write(
        files_dir.join("deploy.md"),
        "# Deployment\n\nDeployments roll out gradually. Rollbacks are automatic on failed health checks.",
    )
    .unwrap();
    fs::write(
        files_dir.join("inventory.csv"),
        "item,count\nwidget,42\ngadget,7\n",
    )
    .unwrap();

    let config_content = format!(
        r#"[storage]
data_dir = "{}/data"

[chunking]
chunk_size = 500
chunk_overlap = 50

[retrieval]
top_k = 5
similarity_threshold = 0.1

[generation]
api_key_env = "RAGMILL_TEST_KEY_THAT_IS_UNSET"
daily_token_quota = 1000000
"#,
        root.display()
    );

    let config_path = root.join("ragmill.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_rml(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = rml_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RAGMILL_TEST_KEY_THAT_IS_UNSET")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run rml binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_ingest_single_file() {
    let (tmp, config_path) = setup_test_env();

    let file = tmp.path().join("files/rust.txt");
    let (stdout, stderr, success) = run_rml(&config_path, &["ingest", file.to_str().unwrap()]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("chunks: "));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_ingest_directory_reports_counts() {
    let (tmp, config_path) = setup_test_env();

    let dir = tmp.path().join("files");
    let (stdout, _, success) = run_rml(&config_path, &["ingest", dir.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("files seen: 3"));
    assert!(stdout.contains("ingested: 3"));
    assert!(stdout.contains("failed: 0"));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_reingest_unchanged_is_skipped() {
    let (tmp, config_path) = setup_test_env();
    let dir = tmp.path().join("files");

    run_rml(&config_path, &["ingest", dir.to_str().unwrap()]);
    let (stdout, _, success) = run_rml(&config_path, &["ingest", dir.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("skipped unchanged: 3"));
    assert!(stdout.contains("ingested: 0"));
}

#[test]
fn test_search_returns_ranked_results() {
    let (tmp, config_path) = setup_test_env();
    let dir = tmp.path().join("files");

    run_rml(&config_path, &["ingest", dir.to_str().unwrap()]);
    let (stdout, _, success) = run_rml(&config_path, &["search", "borrow checker ownership"]);
    assert!(success);
    assert!(
        stdout.contains("rust.txt"),
        "expected rust.txt ranked in results, got: {}",
        stdout
    );
    // Best hit is printed first with its score.
    assert!(stdout.trim_start().starts_with("1."));
}

#[test]
fn test_search_empty_index() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_rml(&config_path, &["search", "anything"]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_ask_on_empty_corpus_needs_no_api_key() {
    let (_tmp, config_path) = setup_test_env();

    // No documents ingested: ask short-circuits with the fixed answer and
    // never reaches the generation API.
    let (stdout, _, success) = run_rml(&config_path, &["ask", "what is anything?"]);
    assert!(success);
    assert!(stdout.contains("could not find information"));

    // No token usage was recorded.
    let (usage_out, _, _) = run_rml(&config_path, &["usage"]);
    assert!(usage_out.contains("used: 0"));
}

#[test]
fn test_ask_with_context_fails_without_api_key() {
    let (tmp, config_path) = setup_test_env();
    let dir = tmp.path().join("files");
    run_rml(&config_path, &["ingest", dir.to_str().unwrap()]);

    // Relevant context exists, so a generation call is attempted and fails
    // on the missing key.
    let (_, stderr, success) = run_rml(
        &config_path,
        &["ask", "How do deployments roll out and roll back?"],
    );
    assert!(!success);
    assert!(stderr.contains("RAGMILL_TEST_KEY_THAT_IS_UNSET"));
}

#[test]
fn test_stats_reflect_ingested_corpus() {
    let (tmp, config_path) = setup_test_env();
    let dir = tmp.path().join("files");
    run_rml(&config_path, &["ingest", dir.to_str().unwrap()]);

    let (stdout, _, success) = run_rml(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("documents: 3"));
    assert!(stdout.contains("dimension: 512"));
}

#[test]
fn test_delete_removes_document_chunks() {
    let (tmp, config_path) = setup_test_env();
    let dir = tmp.path().join("files");
    run_rml(&config_path, &["ingest", dir.to_str().unwrap()]);

    // Recover the document id from search output.
    let (search_out, _, _) = run_rml(&config_path, &["search", "borrow checker"]);
    let doc_id = search_out
        .lines()
        .find_map(|line| line.trim().strip_prefix("document: "))
        .expect("search output should include a document id")
        .to_string();

    let (stdout, _, success) = run_rml(&config_path, &["delete", &doc_id]);
    assert!(success);
    assert!(stdout.contains("chunks removed: 1"));

    let (stats_out, _, _) = run_rml(&config_path, &["stats"]);
    assert!(stats_out.contains("documents: 2"));
}

#[test]
fn test_clear_empties_index() {
    let (tmp, config_path) = setup_test_env();
    let dir = tmp.path().join("files");
    run_rml(&config_path, &["ingest", dir.to_str().unwrap()]);

    let (stdout, _, success) = run_rml(&config_path, &["clear"]);
    assert!(success);
    assert!(stdout.contains("index cleared"));

    let (stats_out, _, _) = run_rml(&config_path, &["stats"]);
    assert!(stats_out.contains("vectors: 0"));
    assert!(stats_out.contains("documents: 0"));
}

#[test]
fn test_usage_reports_quota() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_rml(&config_path, &["usage"]);
    assert!(success);
    assert!(stdout.contains("quota: 1000000"));
    assert!(stdout.contains("remaining: 1000000"));
}

#[test]
fn test_config_set_rejects_invalid_applies_valid() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_rml(
        &config_path,
        &["config", "set", "top_k=8", "temperature=5.0"],
    );
    assert!(success);
    assert!(stdout.contains("applied: top_k"));
    assert!(stdout.contains("rejected: temperature"));
}

#[test]
fn test_config_show_prints_json() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_rml(&config_path, &["config", "show"]);
    assert!(success);
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["rag"]["chunk_size"], 500);
    assert_eq!(json["rag"]["top_k"], 5);
}

#[test]
fn test_index_persists_across_invocations() {
    let (tmp, config_path) = setup_test_env();
    let dir = tmp.path().join("files");
    run_rml(&config_path, &["ingest", dir.to_str().unwrap()]);

    // A fresh process loads the persisted index and can search it.
    let (stdout, _, success) = run_rml(&config_path, &["search", "automatic rollbacks"]);
    assert!(success);
    assert!(stdout.contains("deploy.md"));
}
