//! End-to-end tests for `/tts/generate` against a fake RVC queue backend.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::stream;
use http_body_util::BodyExt;
use ndarray::{ArrayD, IxDyn};
use serde::Deserialize;
use serde_json::{json, Value};
use tower::util::ServiceExt;

use tts_rvc_server::api::{DEFAULT_DESCRIPTION, DEFAULT_PROMPT};
use tts_rvc_server::rvc::{PollPolicy, RvcClient, RvcSettings};
use tts_rvc_server::tts::{
    RaceCoordinator, RetryPolicy, SpeechModel, SynthesisError, SynthesisWorker,
};
use tts_rvc_server::{create_router, AppState};

const CONVERTED: &[u8] = b"RIFF\x24\x00\x00\x00WAVEconverted-audio";

// ---------------------------------------------------------------------------
// Fake speech model
// ---------------------------------------------------------------------------

struct FakeModel {
    fail: bool,
    seen: Mutex<Vec<(String, String)>>,
}

impl FakeModel {
    fn healthy() -> Arc<Self> {
        Arc::new(Self {
            fail: false,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn broken() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            seen: Mutex::new(Vec::new()),
        })
    }
}

impl SpeechModel for FakeModel {
    fn generate(&self, description: &str, prompt: &str) -> Result<ArrayD<f32>, SynthesisError> {
        self.seen
            .lock()
            .unwrap()
            .push((description.to_string(), prompt.to_string()));
        if self.fail {
            Err(SynthesisError::Inference("device lost".into()))
        } else {
            Ok(ArrayD::from_elem(IxDyn(&[1, 256]), 0.2))
        }
    }

    fn sample_rate(&self) -> u32 {
        44100
    }
}

// ---------------------------------------------------------------------------
// Fake RVC backend
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
struct BackendBehavior {
    join_status: StatusCode,
    /// Per-session poll attempt from which `process_completed` is emitted.
    complete_on_poll: Option<u32>,
    download_status: StatusCode,
    relative_url: bool,
    /// Per-session polls answered with 503 before the stream is served.
    unavailable_polls: u32,
    /// Per-session polls whose stream breaks off mid-body.
    broken_polls: u32,
    /// Keep the stream open with heartbeat comments only.
    stall_stream: bool,
}

impl Default for BackendBehavior {
    fn default() -> Self {
        Self {
            join_status: StatusCode::OK,
            complete_on_poll: Some(1),
            download_status: StatusCode::OK,
            relative_url: false,
            unavailable_polls: 0,
            broken_polls: 0,
            stall_stream: false,
        }
    }
}

struct Backend {
    base_url: String,
    behavior: BackendBehavior,
    joins: Mutex<Vec<Value>>,
    /// Whether the submitted input file existed when the job was joined.
    input_existed: Mutex<Vec<bool>>,
    polled_sessions: Mutex<Vec<String>>,
    polls_by_session: Mutex<HashMap<String, u32>>,
    polls: AtomicU32,
}

#[derive(Deserialize)]
struct DataQuery {
    session_hash: String,
}

async fn join(State(backend): State<Arc<Backend>>, Json(body): Json<Value>) -> Response {
    let input = PathBuf::from(body["data"][1].as_str().unwrap_or_default());
    backend.input_existed.lock().unwrap().push(input.exists());
    backend.joins.lock().unwrap().push(body);
    (backend.behavior.join_status, Json(json!({"event_id": "evt"}))).into_response()
}

async fn data(State(backend): State<Arc<Backend>>, Query(query): Query<DataQuery>) -> Response {
    backend.polls.fetch_add(1, Ordering::SeqCst);
    let poll = {
        let mut counts = backend.polls_by_session.lock().unwrap();
        let count = counts.entry(query.session_hash.clone()).or_insert(0);
        *count += 1;
        *count
    };
    backend
        .polled_sessions
        .lock()
        .unwrap()
        .push(query.session_hash);

    let behavior = backend.behavior;
    if poll <= behavior.unavailable_polls {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    if poll <= behavior.unavailable_polls + behavior.broken_polls {
        let chunks = vec![
            Ok("data: {\"msg\": \"estimation\", \"rank\": 0}\n\n".to_string()),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ];
        return (
            [(header::CONTENT_TYPE, "text/event-stream")],
            Body::from_stream(stream::iter(chunks)),
        )
            .into_response();
    }
    if behavior.stall_stream {
        let heartbeats = stream::unfold((), |()| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Some((Ok::<_, std::io::Error>(": ping\n"), ()))
        });
        return (
            [(header::CONTENT_TYPE, "text/event-stream")],
            Body::from_stream(heartbeats),
        )
            .into_response();
    }

    let mut body = String::from("data: {\"msg\": \"estimation\", \"rank\": 0}\n\n");
    body.push_str("data: {\"msg\": \"process_starts\"}\n\n");

    if backend
        .behavior
        .complete_on_poll
        .is_some_and(|completes_on| poll >= completes_on)
    {
        let url = if backend.behavior.relative_url {
            "/download/out.wav".to_string()
        } else {
            format!("{}/download/out.wav", backend.base_url)
        };
        let event = json!({
            "msg": "process_completed",
            "success": true,
            "output": {"data": ["Success", {"path": "/tmp/out.wav", "url": url}]}
        });
        body.push_str(&format!("data: {}\n\n", event));
    }

    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}

async fn download(State(backend): State<Arc<Backend>>) -> Response {
    if backend.behavior.download_status.is_success() {
        ([(header::CONTENT_TYPE, "audio/wav")], CONVERTED).into_response()
    } else {
        backend.behavior.download_status.into_response()
    }
}

async fn spawn_backend(behavior: BackendBehavior) -> Arc<Backend> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let backend = Arc::new(Backend {
        base_url: format!("http://{}", addr),
        behavior,
        joins: Mutex::new(Vec::new()),
        input_existed: Mutex::new(Vec::new()),
        polled_sessions: Mutex::new(Vec::new()),
        polls_by_session: Mutex::new(HashMap::new()),
        polls: AtomicU32::new(0),
    });

    let app = Router::new()
        .route("/queue/join", post(join))
        .route("/queue/data", get(data))
        .route("/download/out.wav", get(download))
        .with_state(Arc::clone(&backend));

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    backend
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct TestApp {
    router: Router,
    backend: Arc<Backend>,
    shared_dir: tempfile::TempDir,
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        delay: Duration::from_millis(1),
    }
}

fn fast_poll() -> PollPolicy {
    PollPolicy {
        attempts: 10,
        interval: Duration::from_millis(5),
        read_timeout: Duration::from_secs(5),
    }
}

async fn create_test_app(models: Vec<Arc<FakeModel>>, behavior: BackendBehavior) -> TestApp {
    create_test_app_with(models, behavior, fast_poll()).await
}

async fn create_test_app_with(
    models: Vec<Arc<FakeModel>>,
    behavior: BackendBehavior,
    poll: PollPolicy,
) -> TestApp {
    let backend = spawn_backend(behavior).await;
    let shared_dir = tempfile::tempdir().unwrap();

    let workers = models
        .into_iter()
        .enumerate()
        .map(|(i, model)| {
            let model: Arc<dyn SpeechModel> = model;
            SynthesisWorker::new(format!("cuda:{}", i), model, fast_retry())
        })
        .collect();

    let rvc = RvcClient::new(RvcSettings {
        base_url: backend.base_url.clone(),
        shared_dir: shared_dir.path().to_path_buf(),
        poll,
        ..RvcSettings::default()
    })
    .unwrap();

    let state = Arc::new(AppState {
        coordinator: RaceCoordinator::new(workers),
        rvc,
    });

    TestApp {
        router: create_router(state),
        backend,
        shared_dir,
    }
}

fn generate_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/tts/generate")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

async fn body_bytes(response: Response) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_generate_returns_converted_audio() {
    let app = create_test_app(
        vec![FakeModel::healthy(), FakeModel::healthy()],
        BackendBehavior::default(),
    )
    .await;

    let response = app
        .router
        .clone()
        .oneshot(generate_request(json!({"prompt": "Hi there", "description": "A calm voice."})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/wav");
    let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap();
    assert!(disposition.starts_with("attachment"));
    assert!(disposition.contains("processed_output.wav"));
    assert_eq!(body_bytes(response).await, CONVERTED);

    // Submitted job
    let joins = app.backend.joins.lock().unwrap().clone();
    assert_eq!(joins.len(), 1);
    let job = &joins[0];
    assert_eq!(job["fn_index"], 2);
    assert_eq!(job["trigger_id"], 33);
    assert!(job["event_data"].is_null());
    assert_eq!(job["data"].as_array().unwrap().len(), 12);
    assert_eq!(job["data"][4], "rmvpe");

    // Same session for submit and poll, input file present only while in flight
    let session = job["session_hash"].as_str().unwrap().to_string();
    assert!(!session.is_empty());
    assert_eq!(*app.backend.polled_sessions.lock().unwrap(), vec![session]);
    assert_eq!(*app.backend.input_existed.lock().unwrap(), vec![true]);
    let input = PathBuf::from(job["data"][1].as_str().unwrap());
    assert!(input.starts_with(app.shared_dir.path()));
    assert!(!input.exists());
}

#[tokio::test]
async fn test_empty_body_uses_defaults() {
    let model = FakeModel::healthy();
    let app = create_test_app(vec![model.clone()], BackendBehavior::default()).await;

    let response = app.router.oneshot(generate_request(json!({}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let seen = model.seen.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![(DEFAULT_DESCRIPTION.to_string(), DEFAULT_PROMPT.to_string())]
    );
}

#[tokio::test]
async fn test_one_device_failing_is_tolerated() {
    let app = create_test_app(
        vec![FakeModel::broken(), FakeModel::healthy()],
        BackendBehavior::default(),
    )
    .await;

    let response = app.router.oneshot(generate_request(json!({}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, CONVERTED);
}

#[tokio::test]
async fn test_all_devices_failed_returns_500() {
    let broken = FakeModel::broken();
    let app = create_test_app(
        vec![broken.clone(), FakeModel::broken()],
        BackendBehavior::default(),
    )
    .await;

    let response = app.router.oneshot(generate_request(json!({}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let json = body_json(response).await;
    assert_eq!(json["code"], "ALL_DEVICES_FAILED");
    assert!(json["error"].as_str().unwrap().contains("Failed to generate audio"));

    // Full retry budget on each device, nothing sent downstream
    assert_eq!(broken.seen.lock().unwrap().len(), 5);
    assert!(app.backend.joins.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_completion_on_later_poll() {
    let app = create_test_app(
        vec![FakeModel::healthy()],
        BackendBehavior {
            complete_on_poll: Some(3),
            ..BackendBehavior::default()
        },
    )
    .await;

    let response = app.router.oneshot(generate_request(json!({}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.backend.polls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_relative_output_url_is_resolved() {
    let app = create_test_app(
        vec![FakeModel::healthy()],
        BackendBehavior {
            relative_url: true,
            ..BackendBehavior::default()
        },
    )
    .await;

    let response = app.router.oneshot(generate_request(json!({}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, CONVERTED);
}

#[tokio::test]
async fn test_submit_failure_returns_500() {
    let app = create_test_app(
        vec![FakeModel::healthy()],
        BackendBehavior {
            join_status: StatusCode::SERVICE_UNAVAILABLE,
            ..BackendBehavior::default()
        },
    )
    .await;

    let response = app.router.oneshot(generate_request(json!({}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let json = body_json(response).await;
    assert_eq!(json["code"], "CONVERSION_SUBMIT_FAILED");
    assert!(json["error"]
        .as_str()
        .unwrap()
        .contains("Failed to process with RVC"));
    assert_eq!(app.backend.polls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_poll_timeout_returns_500() {
    let app = create_test_app(
        vec![FakeModel::healthy()],
        BackendBehavior {
            complete_on_poll: None,
            ..BackendBehavior::default()
        },
    )
    .await;

    let response = app.router.oneshot(generate_request(json!({}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let json = body_json(response).await;
    assert_eq!(json["code"], "CONVERSION_TIMEOUT");
    assert!(json["error"]
        .as_str()
        .unwrap()
        .contains("Failed to retrieve processed file from RVC"));
    assert_eq!(app.backend.polls.load(Ordering::SeqCst), 10);
}

#[tokio::test]
async fn test_download_failure_returns_500() {
    let app = create_test_app(
        vec![FakeModel::healthy()],
        BackendBehavior {
            download_status: StatusCode::NOT_FOUND,
            ..BackendBehavior::default()
        },
    )
    .await;

    let response = app.router.oneshot(generate_request(json!({}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let json = body_json(response).await;
    assert_eq!(json["code"], "DOWNLOAD_FAILED");
    assert!(json["error"].as_str().unwrap().contains("404"));
}

#[tokio::test]
async fn test_concurrent_requests_use_distinct_sessions() {
    let app = create_test_app(
        vec![FakeModel::healthy(), FakeModel::healthy()],
        BackendBehavior::default(),
    )
    .await;

    let (a, b) = tokio::join!(
        app.router.clone().oneshot(generate_request(json!({"prompt": "one"}))),
        app.router.clone().oneshot(generate_request(json!({"prompt": "two"}))),
    );
    assert_eq!(a.unwrap().status(), StatusCode::OK);
    assert_eq!(b.unwrap().status(), StatusCode::OK);

    let joins = app.backend.joins.lock().unwrap().clone();
    assert_eq!(joins.len(), 2);
    assert_ne!(joins[0]["session_hash"], joins[1]["session_hash"]);
    assert_ne!(joins[0]["data"][1], joins[1]["data"][1]);
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_test_app(
        vec![FakeModel::healthy(), FakeModel::healthy()],
        BackendBehavior::default(),
    )
    .await;

    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["devices"], json!(["cuda:0", "cuda:1"]));
}

#[tokio::test]
async fn test_stalled_event_stream_times_out_each_attempt() {
    let app = create_test_app_with(
        vec![FakeModel::healthy()],
        BackendBehavior {
            stall_stream: true,
            ..BackendBehavior::default()
        },
        PollPolicy {
            attempts: 3,
            interval: Duration::from_millis(5),
            read_timeout: Duration::from_millis(200),
        },
    )
    .await;

    let started = Instant::now();
    let response = app.router.oneshot(generate_request(json!({}))).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert_eq!(json["code"], "CONVERSION_TIMEOUT");
    assert_eq!(app.backend.polls.load(Ordering::SeqCst), 3);

    // Bounded by attempts x (read timeout + interval), plus slack
    assert!(elapsed >= Duration::from_millis(600), "{:?}", elapsed);
    assert!(elapsed < Duration::from_secs(3), "{:?}", elapsed);
}

#[tokio::test]
async fn test_unavailable_event_stream_is_retried() {
    let app = create_test_app(
        vec![FakeModel::healthy()],
        BackendBehavior {
            unavailable_polls: 2,
            ..BackendBehavior::default()
        },
    )
    .await;

    let response = app.router.oneshot(generate_request(json!({}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, CONVERTED);
    assert_eq!(app.backend.polls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_broken_event_stream_consumes_one_attempt() {
    let app = create_test_app(
        vec![FakeModel::healthy()],
        BackendBehavior {
            broken_polls: 2,
            ..BackendBehavior::default()
        },
    )
    .await;

    let response = app.router.oneshot(generate_request(json!({}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, CONVERTED);
    assert_eq!(app.backend.polls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_broken_event_stream_exhausts_attempts() {
    let app = create_test_app_with(
        vec![FakeModel::healthy()],
        BackendBehavior {
            broken_polls: u32::MAX / 2,
            ..BackendBehavior::default()
        },
        PollPolicy {
            attempts: 4,
            ..fast_poll()
        },
    )
    .await;

    let response = app.router.oneshot(generate_request(json!({}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(response).await["code"], "CONVERSION_TIMEOUT");
    assert_eq!(app.backend.polls.load(Ordering::SeqCst), 4);
}

fn raw_request(content_type: Option<&str>, body: &'static str) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri("/tts/generate");
    if let Some(content_type) = content_type {
        builder = builder.header("content-type", content_type);
    }
    builder.body(Body::from(body)).unwrap()
}

async fn assert_rejected(request: Request<Body>, expected: StatusCode) {
    let app = create_test_app(vec![FakeModel::healthy()], BackendBehavior::default()).await;

    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), expected);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");

    let json = body_json(response).await;
    assert_eq!(json["code"], "BAD_REQUEST");
    assert!(!json["error"].as_str().unwrap().is_empty());

    // Nothing reaches the models or the RVC service
    assert!(app.backend.joins.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_null_body_is_rejected_as_json() {
    assert_rejected(
        raw_request(Some("application/json"), "null"),
        StatusCode::UNPROCESSABLE_ENTITY,
    )
    .await;
}

#[tokio::test]
async fn test_wrong_field_type_is_rejected_as_json() {
    assert_rejected(
        raw_request(Some("application/json"), r#"{"prompt": 5}"#),
        StatusCode::UNPROCESSABLE_ENTITY,
    )
    .await;
}

#[tokio::test]
async fn test_malformed_body_is_rejected_as_json() {
    assert_rejected(
        raw_request(Some("application/json"), ""),
        StatusCode::BAD_REQUEST,
    )
    .await;
}

#[tokio::test]
async fn test_missing_content_type_is_rejected_as_json() {
    assert_rejected(raw_request(None, "{}"), StatusCode::UNSUPPORTED_MEDIA_TYPE).await;
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let app = create_test_app(vec![FakeModel::healthy()], BackendBehavior::default()).await;

    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri("/openapi.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let doc = body_json(response).await;
    assert_eq!(doc["info"]["title"], "TTS API");

    let generate = &doc["paths"]["/tts/generate"]["post"];
    assert!(generate.is_object());
    assert_eq!(generate["tags"], json!(["tts"]));
    assert!(generate["responses"]["200"]["content"]["audio/wav"].is_object());

    let schema = &doc["components"]["schemas"]["GenerateRequest"]["properties"];
    assert_eq!(schema["prompt"]["default"], DEFAULT_PROMPT);
    assert_eq!(schema["description"]["default"], DEFAULT_DESCRIPTION);
}
