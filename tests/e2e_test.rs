//! End-to-end tests against a running photomesh server.
//!
//! These tests require:
//! 1. The API server running (`cargo run`)
//! 2. Optionally the worker running (`cargo run --bin worker` with WORKER_URL set)
//!
//! Run with: cargo test --test e2e_test -- --ignored --nocapture
//!
//! Set API_BASE_URL to override default (http://localhost:8000)

use std::time::Duration;

use serde_json::Value;

/// Get base URL from env or default to localhost
fn get_base_url() -> String {
    std::env::var("API_BASE_URL").unwrap_or_else(|_| "http://localhost:8000".to_string())
}

fn tiny_png() -> Vec<u8> {
    let img = image::GrayImage::from_pixel(8, 8, image::Luma([0]));
    let mut buf = std::io::Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
    buf.into_inner()
}

async fn submit_photo(
    client: &reqwest::Client,
    base_url: &str,
    height_cm: Option<f64>,
) -> reqwest::Response {
    let mut form = reqwest::multipart::Form::new().part(
        "file",
        reqwest::multipart::Part::bytes(tiny_png())
            .file_name("photo.png")
            .mime_str("image/png")
            .unwrap(),
    );
    if let Some(h) = height_cm {
        form = form.text("height_cm", h.to_string());
    }
    client
        .post(format!("{base_url}/uploads"))
        .multipart(form)
        .send()
        .await
        .expect("upload request failed")
}

async fn wait_for_terminal(client: &reqwest::Client, base_url: &str, job_id: &str) -> Value {
    for _ in 0..60 {
        let body: Value = client
            .get(format!("{base_url}/jobs/{job_id}"))
            .send()
            .await
            .expect("status request failed")
            .json()
            .await
            .expect("status response not JSON");
        let status = body["status"].as_str().unwrap_or_default().to_string();
        if status == "completed" || status == "failed" {
            return body;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    panic!("job {job_id} never reached a terminal state");
}

#[tokio::test]
#[ignore] // Requires a running API server
async fn test_e2e_health_check() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{base_url}/healthz"))
        .send()
        .await
        .expect("health check failed");
    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("health response not JSON");
    assert_eq!(body["ok"], true);
    println!("✓ Health check passed, storage backend: {}", body["storage"]);
}

#[tokio::test]
#[ignore] // Requires a running API server
async fn test_e2e_submit_and_poll() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    let response = submit_photo(&client, &base_url, Some(170.0)).await;
    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "queued");
    let job_id = body["job_id"].as_str().unwrap().to_string();
    println!("✓ Upload accepted, job_id: {job_id}");

    let terminal = wait_for_terminal(&client, &base_url, &job_id).await;
    assert_eq!(terminal["status"], "completed");
    assert!(
        terminal["output_url"].is_string(),
        "completed job must expose an output_url"
    );
    println!("✓ Job completed, output_url: {}", terminal["output_url"]);
}

#[tokio::test]
#[ignore] // Requires a running API server
async fn test_e2e_height_validation() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    let response = submit_photo(&client, &base_url, Some(400.0)).await;
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    let body: Value = response.json().await.unwrap();
    assert!(body["error"].is_string());
    println!("✓ Out-of-range height rejected: {}", body["error"]);
}

#[tokio::test]
#[ignore] // Requires a running API server
async fn test_e2e_unknown_job_is_404() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{base_url}/jobs/no-such-job"))
        .send()
        .await
        .expect("status request failed");
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
#[ignore] // Requires a running API server
async fn test_e2e_enqueue_idempotence() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    let job_id = format!("e2e-{}", uuid::Uuid::new_v4());
    let payload = serde_json::json!({
        "job_id": job_id,
        "input_key": format!("inputs/{job_id}_photo.png"),
        "height_cm": 170.0
    });

    let first: Value = client
        .post(format!("{base_url}/enqueue"))
        .json(&payload)
        .send()
        .await
        .expect("enqueue failed")
        .json()
        .await
        .unwrap();
    assert_eq!(first["job_id"], job_id.as_str());

    let terminal = wait_for_terminal(&client, &base_url, &job_id).await;
    assert_eq!(terminal["status"], "completed");

    // A repeated enqueue of a completed job reports its current status
    // without re-dispatching.
    let again: Value = client
        .post(format!("{base_url}/enqueue"))
        .json(&payload)
        .send()
        .await
        .expect("enqueue failed")
        .json()
        .await
        .unwrap();
    assert_eq!(again["status"], "completed");
    println!("✓ Enqueue is idempotent for {job_id}");
}
