//! Integration tests for the HTTP surface (`ingestor serve`): ingest, batch, search, jobs, and
//! cancellation driven against a real running server rather than through the CLI.

use base64::Engine;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::process::{Child, Command};
use tempfile::TempDir;

fn ingestor_binary() -> std::path::PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    path.pop();
    path.push("ingestor");
    path
}

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn write_config(tmp: &TempDir, port: u16) -> std::path::PathBuf {
    let root = tmp.path();
    fs::create_dir_all(root.join("config")).unwrap();
    let config_content = format!(
        r#"[storage]
dir = "{}/data"

[server]
bind = "127.0.0.1:{}"
"#,
        root.display(),
        port
    );
    let config_path = root.join("config").join("ingestor.toml");
    fs::write(&config_path, config_content).unwrap();
    config_path
}

fn run_ingestor(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(ingestor_binary())
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap();
    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

struct ServerGuard(Child);

impl Drop for ServerGuard {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn spawn_server(config_path: &Path) -> ServerGuard {
    let child = Command::new(ingestor_binary())
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("serve")
        .spawn()
        .unwrap();
    ServerGuard(child)
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("server did not become ready within 5 seconds");
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let tmp = TempDir::new().unwrap();
    let port = find_free_port();
    let config_path = write_config(&tmp, port);
    run_ingestor(&config_path, &["init"]);
    let _server = spawn_server(&config_path);
    wait_for_server(port).await;

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("http://127.0.0.1:{}/health", port))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn content_ingest_and_get_round_trip() {
    let tmp = TempDir::new().unwrap();
    let port = find_free_port();
    let config_path = write_config(&tmp, port);
    run_ingestor(&config_path, &["init"]);
    let _server = spawn_server(&config_path);
    wait_for_server(port).await;

    let client = reqwest::Client::new();
    let data = base64::engine::general_purpose::STANDARD.encode("Jane Doe founded Acme Corp in Portland.");
    let resp = client
        .post(format!("http://127.0.0.1:{}/content", port))
        .json(&json!({"data": data, "content_type": "text/plain", "source": "http-test"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert!(body["success"].as_bool().unwrap());
    let id = body["content_id"].as_str().unwrap().to_string();

    let resp = client
        .get(format!("http://127.0.0.1:{}/content/{}", port, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["id"], id);
    assert_eq!(body["content_type"], "text/plain");
}

#[tokio::test]
async fn content_get_unknown_id_returns_404() {
    let tmp = TempDir::new().unwrap();
    let port = find_free_port();
    let config_path = write_config(&tmp, port);
    run_ingestor(&config_path, &["init"]);
    let _server = spawn_server(&config_path);
    wait_for_server(port).await;

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("http://127.0.0.1:{}/content/does-not-exist", port))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn search_requires_nonempty_query() {
    let tmp = TempDir::new().unwrap();
    let port = find_free_port();
    let config_path = write_config(&tmp, port);
    run_ingestor(&config_path, &["init"]);
    let _server = spawn_server(&config_path);
    wait_for_server(port).await;

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("http://127.0.0.1:{}/search?q=", port))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn search_finds_ingested_content_over_http() {
    let tmp = TempDir::new().unwrap();
    let port = find_free_port();
    let config_path = write_config(&tmp, port);
    run_ingestor(&config_path, &["init"]);
    let _server = spawn_server(&config_path);
    wait_for_server(port).await;

    let client = reqwest::Client::new();
    let data = base64::engine::general_purpose::STANDARD.encode("Vector databases enable semantic retrieval.");
    client
        .post(format!("http://127.0.0.1:{}/content", port))
        .json(&json!({"data": data, "content_type": "text/plain"}))
        .send()
        .await
        .unwrap();

    let resp = client
        .get(format!("http://127.0.0.1:{}/search?q=semantic+retrieval", port))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert!(!body["results"].as_array().unwrap().is_empty());
}

/// `POST /batch` must accept immediately with `202` and a job id, running the actual batch in
/// the background; this polls `/jobs/:id` until the job reaches a terminal state.
#[tokio::test]
async fn batch_accepts_immediately_and_completes_async() {
    let tmp = TempDir::new().unwrap();
    let port = find_free_port();
    let config_path = write_config(&tmp, port);
    run_ingestor(&config_path, &["init"]);
    let _server = spawn_server(&config_path);
    wait_for_server(port).await;

    let client = reqwest::Client::new();
    let items: Vec<Value> = (0..3)
        .map(|i| {
            json!({
                "id": format!("item-{}", i),
                "data": base64::engine::general_purpose::STANDARD.encode(format!("Document number {} about Rust.", i)),
                "content_type": "text/plain",
            })
        })
        .collect();

    let resp = client
        .post(format!("http://127.0.0.1:{}/batch", port))
        .json(&json!({"items": items}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202, "batch endpoint must accept immediately");
    let body: Value = resp.json().await.unwrap();
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let mut job_status = String::new();
    for _ in 0..50 {
        let resp = client
            .get(format!("http://127.0.0.1:{}/jobs/{}", port, job_id))
            .send()
            .await
            .unwrap();
        let body: Value = resp.json().await.unwrap();
        job_status = body["job"]["status"].as_str().unwrap().to_string();
        if job_status != "pending" && job_status != "running" {
            let items = body["items"].as_array().unwrap();
            assert_eq!(items.len(), 3);
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    assert_eq!(job_status, "completed", "batch job should finish successfully");
}

#[tokio::test]
async fn batch_rejects_empty_item_list() {
    let tmp = TempDir::new().unwrap();
    let port = find_free_port();
    let config_path = write_config(&tmp, port);
    run_ingestor(&config_path, &["init"]);
    let _server = spawn_server(&config_path);
    wait_for_server(port).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://127.0.0.1:{}/batch", port))
        .json(&json!({"items": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn cancel_unknown_batch_returns_404() {
    let tmp = TempDir::new().unwrap();
    let port = find_free_port();
    let config_path = write_config(&tmp, port);
    run_ingestor(&config_path, &["init"]);
    let _server = spawn_server(&config_path);
    wait_for_server(port).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://127.0.0.1:{}/batch/nonexistent/cancel", port))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn jobs_listing_reflects_completed_batches() {
    let tmp = TempDir::new().unwrap();
    let port = find_free_port();
    let config_path = write_config(&tmp, port);
    run_ingestor(&config_path, &["init"]);
    let _server = spawn_server(&config_path);
    wait_for_server(port).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://127.0.0.1:{}/batch", port))
        .json(&json!({"items": [{
            "id": "only-item",
            "data": base64::engine::general_purpose::STANDARD.encode("A single batch item."),
            "content_type": "text/plain",
        }]}))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    let job_id = body["job_id"].as_str().unwrap().to_string();

    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let resp = client
            .get(format!("http://127.0.0.1:{}/jobs?limit=10", port))
            .send()
            .await
            .unwrap();
        let body: Value = resp.json().await.unwrap();
        let jobs = body["jobs"].as_array().unwrap();
        if jobs.iter().any(|j| j["id"] == job_id && j["status"] == "completed") {
            return;
        }
    }
    panic!("job {} never appeared as completed in /jobs", job_id);
}
