#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use driving_coach_api::{
    config::Config,
    create_router,
    services::{
        gemini_client::{GenerationRequest, GenerativeModel, ModelError, UploadedFile},
        session_store::InMemorySessionStore,
        AppState,
    },
};
use http_body_util::BodyExt;
use serde_json::Value;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

pub const VALID_QUESTION: &str = r#"{
    "question": "What does a red traffic light mean?",
    "options": ["A) Stop", "B) Go", "C) Slow down", "D) Yield"],
    "correct": "A",
    "explanation": "A red light means stop and wait behind the line."
}"#;

pub const VALID_SCORE: &str = r#"{
    "overall_score": 78,
    "passed": true,
    "detailed_breakdown": {
        "mirror_checks": "Mirrors checked before the turn.",
        "blind_spot_checks": "Right blind spot checked before moving off.",
        "observation_timing": "Checks were made in good time."
    },
    "strengths": ["Consistent mirror use"],
    "improvements": ["Check the left blind spot at junctions"],
    "summary": "A safe drive with good observation."
}"#;

/// Model double that replays queued replies, then falls back to a fixed
/// reply. Every request is recorded.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String, ModelError>>>,
    fallback: String,
    upload: Option<UploadedFile>,
    pub requests: Mutex<Vec<GenerationRequest>>,
    pub uploads: Mutex<Vec<(usize, String)>>,
}

impl ScriptedModel {
    pub fn new(fallback: &str) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: fallback.to_string(),
            upload: None,
            requests: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
        }
    }

    pub fn questions() -> Self {
        Self::new(VALID_QUESTION)
    }

    pub fn scores() -> Self {
        Self::new(VALID_SCORE)
    }

    pub fn with_upload(mut self, uri: &str) -> Self {
        self.upload = Some(UploadedFile {
            name: "files/test-video".to_string(),
            uri: uri.to_string(),
            mime_type: "video/mp4".to_string(),
        });
        self
    }

    pub fn push_reply(&self, reply: &str) {
        self.replies
            .lock()
            .unwrap()
            .push_back(Ok(reply.to_string()));
    }

    pub fn push_error(&self, error: ModelError) {
        self.replies.lock().unwrap().push_back(Err(error));
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> GenerationRequest {
        self.requests
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no model request recorded")
    }
}

#[async_trait]
impl GenerativeModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted-model"
    }

    async fn generate(&self, request: GenerationRequest) -> Result<String, ModelError> {
        self.requests.lock().unwrap().push(request);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(self.fallback.clone()))
    }

    async fn upload_file(
        &self,
        data: Vec<u8>,
        mime_type: &str,
        _display_name: &str,
    ) -> Result<UploadedFile, ModelError> {
        self.uploads
            .lock()
            .unwrap()
            .push((data.len(), mime_type.to_string()));
        self.upload
            .clone()
            .ok_or(ModelError::Unsupported("file upload"))
    }
}

pub fn unavailable() -> ModelError {
    ModelError::Status {
        status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
        body: "overloaded".to_string(),
    }
}

/// Defaults with no backoff and an images directory that does not exist.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.generation.base_backoff_ms = 0;
    config.generation.max_backoff_ms = 0;
    config.images_path = missing_dir();
    config
}

pub fn missing_dir() -> PathBuf {
    std::env::temp_dir().join(format!("no-images-{}", uuid::Uuid::new_v4()))
}

pub fn create_test_app(config: Config, model: Arc<ScriptedModel>) -> Router {
    create_test_app_with_store(config, Arc::new(InMemorySessionStore::new()), model)
}

/// Same as `create_test_app`, but the caller keeps a handle on the store.
pub fn create_test_app_with_store(
    config: Config,
    store: Arc<InMemorySessionStore>,
    model: Arc<ScriptedModel>,
) -> Router {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let state = AppState::with_components(config, store, model);
    create_router(Arc::new(state))
}

pub async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            panic!(
                "non-JSON body for {} {}: {}",
                method,
                uri,
                String::from_utf8_lossy(&bytes)
            )
        })
    };
    (status, json)
}
