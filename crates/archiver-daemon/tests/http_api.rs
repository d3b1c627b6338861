//! Tests for the task API.
//!
//! Most tests invoke handlers directly with their extractors; the router
//! tests serve the real router on an ephemeral port and talk to it over
//! HTTP. Files are served by an in-memory fetcher.

use std::sync::Arc;
use std::time::Duration;

use archiver_core::{LimitsConfig, MemoryFetcher, TaskRegistry, TaskStatus};
use archiver_daemon::handlers::{
    AddFileRequest, CreateTaskRequest, TaskQuery, add_file_to_task, create_task,
    get_task_status,
};
use archiver_daemon::{ApiError, AppState, router};
use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tempfile::TempDir;
use tokio::sync::Semaphore;

const URLS: [&str; 3] = [
    "https://files.test/a.pdf",
    "https://files.test/b.png",
    "https://files.test/c.jpg",
];

struct Harness {
    state: AppState,
    dir: TempDir,
}

impl Harness {
    fn new(fetcher: MemoryFetcher, timeout: Duration) -> Self {
        for url in URLS {
            fetcher.insert(url, &b"payload"[..]);
        }
        let registry = TaskRegistry::new(LimitsConfig::default(), Arc::new(fetcher));
        Self {
            state: AppState::new(Arc::new(registry), timeout),
            dir: tempfile::tempdir().unwrap(),
        }
    }

    async fn create(&self, name: &str) -> Result<u64, ApiError> {
        let request = CreateTaskRequest {
            zip_archive_path: self.dir.path().display().to_string(),
            zip_archive_name: name.to_string(),
        };
        let Json(ack) = create_task(State(self.state.clone()), Ok(Json(request))).await?;
        Ok(ack.task_id.get())
    }

    async fn add(&self, task_id: u64, url: &str, name: &str) -> Result<(), ApiError> {
        let request = AddFileRequest {
            task_id,
            file_url: url.to_string(),
            file_name: name.to_string(),
        };
        add_file_to_task(State(self.state.clone()), Ok(Json(request)))
            .await
            .map(|_| ())
    }
}

async fn error_body(err: ApiError) -> (StatusCode, serde_json::Value) {
    let response = err.into_response();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_fourth_task_is_rejected_as_busy() {
    let harness = Harness::new(MemoryFetcher::new(), Duration::from_secs(4));
    for (expected, name) in (1..=3).zip(["a", "b", "c"]) {
        assert_eq!(harness.create(name).await.unwrap(), expected);
    }

    let err = harness.create("d").await.unwrap_err();
    let (status, body) = error_body(err).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("busy"));
}

#[tokio::test]
async fn test_archive_link_appears_only_on_completion() {
    let harness = Harness::new(MemoryFetcher::new(), Duration::from_secs(4));
    let id = harness.create("bundle").await.unwrap();

    for (i, url) in URLS.into_iter().enumerate() {
        let Json(status) =
            get_task_status(State(harness.state.clone()), Ok(Query(TaskQuery { task_id: id })))
                .await
                .unwrap();
        assert!(status.archive_link.is_none());
        assert_eq!(status.completed_files, i);

        harness.add(id, url, &format!("file{i}")).await.unwrap();
    }

    let Json(status) =
        get_task_status(State(harness.state.clone()), Ok(Query(TaskQuery { task_id: id })))
            .await
            .unwrap();
    assert_eq!(status.status, TaskStatus::Completed);
    assert_eq!(status.completed_files, 3);
    let link = status.archive_link.clone().unwrap();
    assert!(link.ends_with("bundle.zip"));
    assert!(std::path::Path::new(&link).is_file());

    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["status"], "completed");
    assert_eq!(json["archiveLink"], link.as_str());
}

#[tokio::test]
async fn test_error_kinds_map_to_statuses() {
    let harness = Harness::new(MemoryFetcher::new(), Duration::from_secs(4));
    let id = harness.create("bundle").await.unwrap();

    let err = get_task_status(State(harness.state.clone()), Ok(Query(TaskQuery { task_id: 99 })))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

    let err = harness
        .add(99, "https://files.test/notes.txt", "notes")
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

    let err = harness
        .add(id, "https://files.test/missing.pdf", "gone")
        .await
        .unwrap_err();
    let (status, body) = error_body(err).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "failed to fetch https://files.test/missing.pdf");

    for (i, url) in URLS.into_iter().enumerate() {
        harness.add(id, url, &format!("f{i}")).await.unwrap();
    }
    let err = harness.add(id, URLS[0], "extra").await.unwrap_err();
    assert_eq!(err.status_code(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_deadline_releases_file_slot() {
    let gate = Arc::new(Semaphore::new(0));
    let harness = Harness::new(
        MemoryFetcher::with_gate(Arc::clone(&gate)),
        Duration::from_millis(20),
    );
    let id = harness.create("slow").await.unwrap();

    for _ in 0..4 {
        let err = harness.add(id, URLS[0], "slow").await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
    }

    let view = harness
        .state
        .registry()
        .task_status(archiver_core::TaskId::new(id))
        .unwrap();
    assert_eq!(view.in_flight_files, 0);
    assert_eq!(view.completed_files, 0);
    assert_eq!(view.status, TaskStatus::Running);
}

/// Serve the real router on an ephemeral port and return its base URL.
async fn serve(state: AppState, base_path: &str) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(state, base_path);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

async fn send(request: reqwest::RequestBuilder) -> (StatusCode, String) {
    let response = request.send().await.unwrap();
    let status = StatusCode::from_u16(response.status().as_u16()).unwrap();
    (status, response.text().await.unwrap())
}

fn post_json(client: &reqwest::Client, url: String, body: String) -> reqwest::RequestBuilder {
    client
        .post(url)
        .header("content-type", "application/json")
        .body(body)
}

#[tokio::test]
async fn test_router_serves_task_lifecycle() {
    let harness = Harness::new(MemoryFetcher::new(), Duration::from_secs(4));
    let base = serve(harness.state.clone(), "/api-tasks").await;
    let client = http_client();

    let (status, body) = send(client.get(format!("{base}/health"))).await;
    assert_eq!((status, body.as_str()), (StatusCode::OK, "ok"));

    let create = serde_json::json!({
        "zipArchivePath": harness.dir.path().display().to_string(),
        "zipArchiveName": "bundle",
    });
    let (status, body) = send(post_json(
        &client,
        format!("{base}/api-tasks/create-task"),
        create.to_string(),
    ))
    .await;
    assert_eq!(status, StatusCode::OK);
    let ack: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(ack["taskID"], 1);

    for (i, url) in URLS.into_iter().enumerate() {
        let add = serde_json::json!({ "taskID": 1, "fileURL": url, "fileName": format!("f{i}") });
        let (status, _) = send(post_json(
            &client,
            format!("{base}/api-tasks/add-file-to-task"),
            add.to_string(),
        ))
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = send(client.get(format!("{base}/api-tasks/get?task-id=1"))).await;
    assert_eq!(status, StatusCode::OK);
    let view: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(view["taskID"], 1);
    assert_eq!(view["status"], "completed");
    assert_eq!(view["completedFiles"], 3);
    assert_eq!(view["files"], serde_json::json!(["f0.pdf", "f1.png", "f2.jpg"]));
    assert!(view["archiveLink"].as_str().unwrap().ends_with("bundle.zip"));

    // Task routes live only under the base path.
    let (status, _) = send(client.get(format!("{base}/get?task-id=1"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_router_rejects_malformed_requests_with_json_errors() {
    let harness = Harness::new(MemoryFetcher::new(), Duration::from_secs(4));
    let base = serve(harness.state.clone(), "/api-tasks").await;
    let client = http_client();

    let (status, body) = send(post_json(
        &client,
        format!("{base}/api-tasks/create-task"),
        "{\"zipArchivePath\": ".to_string(),
    ))
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert!(error["error"].as_str().unwrap().starts_with("malformed request"));

    for query in ["", "?task-id=abc"] {
        let (status, body) = send(client.get(format!("{base}/api-tasks/get{query}"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "query {query:?}");
        let error: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert!(error["error"].is_string());
    }

    let (status, body) = send(client.get(format!("{base}/api-tasks/get?task-id=7"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let error: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(error["error"], "task 7 not found");
}

#[tokio::test]
async fn test_router_duplicate_entry_is_conflict() {
    let harness = Harness::new(MemoryFetcher::new(), Duration::from_secs(4));
    let id = harness.create("bundle").await.unwrap();
    let base = serve(harness.state.clone(), "/").await;
    let client = http_client();

    let add = serde_json::json!({ "taskID": id, "fileURL": URLS[0], "fileName": "same" });
    let (status, _) =
        send(post_json(&client, format!("{base}/add-file-to-task"), add.to_string())).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) =
        send(post_json(&client, format!("{base}/add-file-to-task"), add.to_string())).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let error: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(error["error"], format!("task {id} already contains same.pdf"));

    let (status, body) = send(client.get(format!("{base}/health"))).await;
    assert_eq!((status, body.as_str()), (StatusCode::OK, "ok"));
}
