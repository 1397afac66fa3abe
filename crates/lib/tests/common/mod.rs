//! Mock Ollama server for integration tests: serves canned responses on a free loopback port.

#![allow(dead_code)]

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use parley::gateway::{GatewayOptions, ModelGateway};
use futures_util::{stream, StreamExt};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Canned responses and request log shared with the handlers.
#[derive(Default)]
pub struct MockState {
    pub tags: Mutex<Value>,
    pub generate_body: Mutex<String>,
    pub show: Mutex<HashMap<String, Value>>,
    pub last_generate: Mutex<Option<Value>>,
    pub deleted: Mutex<Vec<String>>,
    pub pulled: Mutex<Vec<String>>,
    pub tags_hits: AtomicUsize,
}

impl MockState {
    pub fn set_tags(&self, tags: Value) {
        *self.tags.lock().unwrap() = tags;
    }

    pub fn set_generate(&self, body: &str) {
        *self.generate_body.lock().unwrap() = body.to_string();
    }

    pub fn add_model(&self, name: &str, size: u64) {
        let mut tags = self.tags.lock().unwrap();
        if !tags["models"].is_array() {
            *tags = json!({ "models": [] });
        }
        if let Some(models) = tags["models"].as_array_mut() {
            models.push(json!({
                "name": name,
                "size": size,
                "digest": format!("sha256:{}", name),
                "modified_at": "2024-05-01T10:00:00Z"
            }));
        }
        self.show.lock().unwrap().insert(
            name.to_string(),
            json!({ "size": size, "digest": format!("sha256:{}", name), "modified_at": "2024-05-01T10:00:00Z" }),
        );
    }

    pub fn tags_hits(&self) -> usize {
        self.tags_hits.load(Ordering::SeqCst)
    }
}

pub struct MockOllama {
    pub base_url: String,
    pub state: Arc<MockState>,
}

impl MockOllama {
    /// Gateway against this server with a small retry budget and short timeouts.
    pub fn gateway(&self) -> ModelGateway {
        ModelGateway::new(GatewayOptions {
            base_url: self.base_url.clone(),
            timeout: Duration::from_secs(5),
            status_timeout: Duration::from_secs(2),
            max_concurrent: 3,
            max_retries: 1,
        })
    }
}

/// Gateway against this server with the given timeouts and no retries.
pub fn gateway_without_retries(base_url: &str, timeout: Duration) -> ModelGateway {
    ModelGateway::new(GatewayOptions {
        base_url: base_url.to_string(),
        timeout,
        status_timeout: timeout,
        max_concurrent: 1,
        max_retries: 0,
    })
}

/// Start a mock server with an empty model list. The server task runs until the test ends.
pub async fn spawn_mock() -> MockOllama {
    let state = Arc::new(MockState::default());
    state.set_tags(json!({ "models": [] }));

    let app = Router::new()
        .route("/api/tags", get(tags))
        .route("/api/generate", post(generate))
        .route("/api/show", post(show))
        .route("/api/pull", post(pull))
        .route("/api/delete", delete(remove))
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server");
    let port = listener.local_addr().expect("local_addr").port();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockOllama {
        base_url: format!("http://127.0.0.1:{}", port),
        state,
    }
}

/// A loopback port with nothing listening (connections are refused).
pub fn refused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

/// Gateway pointed at a port where nothing listens.
pub fn unreachable_gateway() -> ModelGateway {
    ModelGateway::new(GatewayOptions {
        base_url: format!("http://127.0.0.1:{}", refused_port()),
        timeout: Duration::from_secs(2),
        status_timeout: Duration::from_secs(1),
        max_concurrent: 3,
        max_retries: 1,
    })
}

async fn tags(State(state): State<Arc<MockState>>) -> Json<Value> {
    state.tags_hits.fetch_add(1, Ordering::SeqCst);
    Json(state.tags.lock().unwrap().clone())
}

async fn generate(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    let model = body["model"].as_str().unwrap_or_default().to_string();
    *state.last_generate.lock().unwrap() = Some(body);
    if model == "missing" {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "model 'missing' not found, try pulling it first" })),
        )
            .into_response();
    }
    if model == "stall" {
        // One chunk, then the connection stays open without sending anything more.
        let first = stream::once(async {
            Ok::<_, Infallible>(Bytes::from_static(b"{\"response\":\"a\"}\n"))
        });
        let body = Body::from_stream(first.chain(stream::pending()));
        return ([(header::CONTENT_TYPE, "application/x-ndjson")], body).into_response();
    }
    let ndjson = state.generate_body.lock().unwrap().clone();
    ([(header::CONTENT_TYPE, "application/x-ndjson")], ndjson).into_response()
}

async fn show(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    let name = body["name"].as_str().unwrap_or_default();
    match state.show.lock().unwrap().get(name) {
        Some(info) => Json(info.clone()).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("model '{}' not found", name) })),
        )
            .into_response(),
    }
}

async fn pull(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    let name = body["name"].as_str().unwrap_or_default().to_string();
    state.add_model(&name, 42);
    state.pulled.lock().unwrap().push(name);
    let progress = "{\"status\":\"pulling manifest\"}\n{\"status\":\"verifying sha256 digest\"}\n{\"status\":\"success\"}\n";
    ([(header::CONTENT_TYPE, "application/x-ndjson")], progress).into_response()
}

async fn remove(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> StatusCode {
    let name = body["name"].as_str().unwrap_or_default().to_string();
    {
        let mut tags = state.tags.lock().unwrap();
        if let Some(models) = tags["models"].as_array_mut() {
            models.retain(|m| m["name"] != name.as_str());
        }
    }
    state.show.lock().unwrap().remove(&name);
    state.deleted.lock().unwrap().push(name);
    StatusCode::OK
}
