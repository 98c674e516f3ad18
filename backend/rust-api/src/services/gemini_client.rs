//! Client for Google's Gemini `generateContent` REST API.
//!
//! Two endpoint modes are supported:
//! - API key against the Generative Language API (supports the Files API,
//!   which video analysis needs)
//! - bearer token against Vertex AI, addressed by project and location
//!
//! Everything else in the crate talks to [`GenerativeModel`] so tests can
//! script model output without a network.

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::config::Config;
use crate::metrics::track_model_call;

const GENERATIVE_LANGUAGE_BASE: &str = "https://generativelanguage.googleapis.com";

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("model API returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("model returned no text ({0})")]
    EmptyResponse(String),
    #[error("file upload failed: {0}")]
    Upload(String),
    #[error("file {name} was not processed within {waited:?}")]
    ProcessingTimeout { name: String, waited: Duration },
    #[error("file {0} failed processing")]
    ProcessingFailed(String),
    #[error("{0} is not supported by this endpoint")]
    Unsupported(&'static str),
    #[error("invalid model configuration: {0}")]
    Config(String),
}

impl ModelError {
    /// Rate limits, server errors, timeouts and empty candidates are worth
    /// another attempt. Client errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ModelError::Transport(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            ModelError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            ModelError::EmptyResponse(_) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    InlineData { mime_type: String, data: Vec<u8> },
    FileData { mime_type: String, file_uri: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub parts: Vec<Part>,
    /// Ask the model for `application/json` output.
    pub json_output: bool,
}

impl GenerationRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            parts: vec![Part::Text(prompt.into())],
            json_output: true,
        }
    }

    pub fn with_part(mut self, part: Part) -> Self {
        self.parts.push(part);
        self
    }

    pub fn has_media(&self) -> bool {
        self.parts.iter().any(|part| !matches!(part, Part::Text(_)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub name: String,
    pub uri: String,
    pub mime_type: String,
}

#[async_trait]
pub trait GenerativeModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Sends the parts as one user turn and returns the response text.
    async fn generate(&self, request: GenerationRequest) -> Result<String, ModelError>;

    /// Uploads media and waits until the remote side has processed it.
    async fn upload_file(
        &self,
        data: Vec<u8>,
        mime_type: &str,
        display_name: &str,
    ) -> Result<UploadedFile, ModelError>;
}

#[derive(Debug, Clone)]
enum Endpoint {
    ApiKey {
        base: String,
        key: String,
    },
    Vertex {
        base: String,
        token: String,
        project: String,
        location: String,
    },
}

pub struct GeminiClient {
    http: Client,
    endpoint: Endpoint,
    model: String,
    poll_interval: Duration,
    processing_timeout: Duration,
}

// Wire types (REST uses camelCase)

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<WireGenerationConfig>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<WirePart<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
enum WirePart<'a> {
    #[serde(rename = "text")]
    Text(&'a str),
    InlineData(WireInlineData<'a>),
    FileData(WireFileData<'a>),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireInlineData<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireFileData<'a> {
    mime_type: &'a str,
    file_uri: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireGenerationConfig {
    response_mime_type: &'static str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct UploadResponse {
    file: RemoteFile,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteFile {
    name: String,
    #[serde(default)]
    uri: String,
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    state: Option<String>,
}

impl GeminiClient {
    pub fn from_config(config: &Config) -> Result<Self, ModelError> {
        let gemini = &config.gemini;
        let endpoint = match (&gemini.api_key, &gemini.access_token) {
            (Some(key), _) => Endpoint::ApiKey {
                base: gemini
                    .api_base
                    .clone()
                    .unwrap_or_else(|| GENERATIVE_LANGUAGE_BASE.to_string()),
                key: key.clone(),
            },
            (None, Some(token)) => Endpoint::Vertex {
                base: gemini.api_base.clone().unwrap_or_else(|| {
                    format!("https://{}-aiplatform.googleapis.com", config.gcp_location)
                }),
                token: token.clone(),
                project: config.gcp_project_id.clone(),
                location: config.gcp_location.clone(),
            },
            // Keep the service bootable; calls fail with 401/403 from the API.
            (None, None) => Endpoint::ApiKey {
                base: gemini
                    .api_base
                    .clone()
                    .unwrap_or_else(|| GENERATIVE_LANGUAGE_BASE.to_string()),
                key: String::new(),
            },
        };

        let base = match &endpoint {
            Endpoint::ApiKey { base, .. } | Endpoint::Vertex { base, .. } => base,
        };
        Url::parse(base).map_err(|e| ModelError::Config(format!("bad api base {}: {}", base, e)))?;

        let http = Client::builder()
            .timeout(Duration::from_secs(gemini.request_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            endpoint,
            model: gemini.model.clone(),
            poll_interval: config.analysis.poll_interval(),
            processing_timeout: config.analysis.processing_timeout(),
        })
    }

    fn base(&self) -> &str {
        match &self.endpoint {
            Endpoint::ApiKey { base, .. } | Endpoint::Vertex { base, .. } => {
                base.trim_end_matches('/')
            }
        }
    }

    fn generate_url(&self) -> String {
        match &self.endpoint {
            Endpoint::ApiKey { .. } => {
                format!("{}/v1beta/models/{}:generateContent", self.base(), self.model)
            }
            Endpoint::Vertex {
                project, location, ..
            } => format!(
                "{}/v1/projects/{}/locations/{}/publishers/google/models/{}:generateContent",
                self.base(),
                project,
                location,
                self.model
            ),
        }
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.endpoint {
            Endpoint::ApiKey { key, .. } => builder.header("x-goog-api-key", key),
            Endpoint::Vertex { token, .. } => builder.bearer_auth(token),
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ModelError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(ModelError::Status { status, body })
    }

    async fn send_generate(&self, request: &GenerationRequest) -> Result<String, ModelError> {
        let parts = request
            .parts
            .iter()
            .map(|part| match part {
                Part::Text(text) => WirePart::Text(text),
                Part::InlineData { mime_type, data } => WirePart::InlineData(WireInlineData {
                    mime_type,
                    data: general_purpose::STANDARD.encode(data),
                }),
                Part::FileData {
                    mime_type,
                    file_uri,
                } => WirePart::FileData(WireFileData {
                    mime_type,
                    file_uri,
                }),
            })
            .collect();

        let body = GenerateContentRequest {
            contents: vec![Content { role: "user", parts }],
            generation_config: request.json_output.then_some(WireGenerationConfig {
                response_mime_type: "application/json",
            }),
        };

        tracing::debug!(
            "Calling {} generateContent (media: {})",
            self.model,
            request.has_media()
        );

        let response = self
            .authorize(self.http.post(self.generate_url()))
            .json(&body)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        let parsed: GenerateContentResponse = response.json().await?;

        extract_text(parsed)
    }

    async fn start_upload(
        &self,
        size: usize,
        mime_type: &str,
        display_name: &str,
    ) -> Result<String, ModelError> {
        let url = format!("{}/upload/v1beta/files", self.base());
        let response = self
            .authorize(self.http.post(url))
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", size.to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&serde_json::json!({ "file": { "display_name": display_name } }))
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        response
            .headers()
            .get("x-goog-upload-url")
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string())
            .ok_or_else(|| ModelError::Upload("missing x-goog-upload-url header".to_string()))
    }

    async fn finish_upload(&self, upload_url: &str, data: Vec<u8>) -> Result<RemoteFile, ModelError> {
        let response = self
            .http
            .post(upload_url)
            .header(header::CONTENT_LENGTH, data.len().to_string())
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(data)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        let uploaded: UploadResponse = response.json().await?;
        Ok(uploaded.file)
    }

    async fn fetch_file(&self, name: &str) -> Result<RemoteFile, ModelError> {
        let url = format!("{}/v1beta/{}", self.base(), name);
        let response = self.authorize(self.http.get(url)).send().await?;
        let response = Self::check_status(response).await?;
        Ok(response.json().await?)
    }

    /// Polls at a fixed interval until the file is ACTIVE, FAILED, or the
    /// processing timeout elapses.
    async fn wait_until_active(&self, mut file: RemoteFile) -> Result<RemoteFile, ModelError> {
        let started = tokio::time::Instant::now();

        loop {
            let state = file.state.clone();
            match state.as_deref() {
                Some("ACTIVE") | None => return Ok(file),
                Some("FAILED") => return Err(ModelError::ProcessingFailed(file.name)),
                Some(state) => {
                    let waited = started.elapsed();
                    if waited >= self.processing_timeout {
                        return Err(ModelError::ProcessingTimeout {
                            name: file.name,
                            waited,
                        });
                    }
                    tracing::debug!("File {} is {}, polling again", file.name, state);
                    tokio::time::sleep(self.poll_interval).await;
                    file = self.fetch_file(&file.name).await?;
                }
            }
        }
    }
}

#[async_trait]
impl GenerativeModel for GeminiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: GenerationRequest) -> Result<String, ModelError> {
        track_model_call("generate", self.send_generate(&request)).await
    }

    async fn upload_file(
        &self,
        data: Vec<u8>,
        mime_type: &str,
        display_name: &str,
    ) -> Result<UploadedFile, ModelError> {
        if matches!(self.endpoint, Endpoint::Vertex { .. }) {
            return Err(ModelError::Unsupported("file upload"));
        }

        track_model_call("upload", async {
            let size = data.len();
            let upload_url = self.start_upload(size, mime_type, display_name).await?;
            let file = self.finish_upload(&upload_url, data).await?;
            tracing::info!("Uploaded {} ({} bytes) as {}", display_name, size, file.name);

            let file = self.wait_until_active(file).await?;
            Ok::<_, ModelError>(UploadedFile {
                mime_type: if file.mime_type.is_empty() {
                    mime_type.to_string()
                } else {
                    file.mime_type
                },
                name: file.name,
                uri: file.uri,
            })
        })
        .await
    }
}

fn extract_text(response: GenerateContentResponse) -> Result<String, ModelError> {
    if let Some(reason) = response
        .prompt_feedback
        .and_then(|feedback| feedback.block_reason)
    {
        return Err(ModelError::EmptyResponse(format!("prompt blocked: {}", reason)));
    }

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ModelError::EmptyResponse("no candidates".to_string()))?;

    let text: String = candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect()
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        let reason = candidate
            .finish_reason
            .unwrap_or_else(|| "no text parts".to_string());
        return Err(ModelError::EmptyResponse(reason));
    }

    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(raw: &str) -> GenerateContentResponse {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn joins_text_parts_of_first_candidate() {
        let parsed = response(
            r#"{"candidates":[{"content":{"parts":[{"text":"{\"a\":"},{"text":"1}"}]},"finishReason":"STOP"}]}"#,
        );
        assert_eq!(extract_text(parsed).unwrap(), "{\"a\":1}");
    }

    #[test]
    fn blocked_prompt_is_empty_response() {
        let parsed = response(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#);
        let err = extract_text(parsed).unwrap_err();
        assert!(matches!(err, ModelError::EmptyResponse(ref msg) if msg.contains("SAFETY")));
    }

    #[test]
    fn candidate_without_text_reports_finish_reason() {
        let parsed = response(r#"{"candidates":[{"finishReason":"MAX_TOKENS"}]}"#);
        let err = extract_text(parsed).unwrap_err();
        assert!(err.to_string().contains("MAX_TOKENS"));
    }

    #[test]
    fn wire_parts_use_rest_field_names() {
        let body = GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![
                    WirePart::Text("hi"),
                    WirePart::InlineData(WireInlineData {
                        mime_type: "image/png",
                        data: general_purpose::STANDARD.encode([1u8, 2, 3]),
                    }),
                ],
            }],
            generation_config: Some(WireGenerationConfig {
                response_mime_type: "application/json",
            }),
        };

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hi");
        assert_eq!(
            json["contents"][0]["parts"][1]["inlineData"]["mimeType"],
            "image/png"
        );
        assert_eq!(json["contents"][0]["parts"][1]["inlineData"]["data"], "AQID");
        assert_eq!(
            json["generationConfig"]["responseMimeType"],
            "application/json"
        );
    }

    #[test]
    fn retry_classification() {
        assert!(ModelError::Status {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: String::new()
        }
        .is_retryable());
        assert!(!ModelError::Status {
            status: StatusCode::BAD_REQUEST,
            body: String::new()
        }
        .is_retryable());
        assert!(!ModelError::Unsupported("file upload").is_retryable());
    }

    #[test]
    fn vertex_endpoint_is_addressed_by_project_and_location() {
        let mut config = Config::default();
        config.gemini.access_token = Some("token".into());
        config.gcp_project_id = "proj".into();
        config.gcp_location = "europe-west1".into();

        let client = GeminiClient::from_config(&config).unwrap();

        assert_eq!(
            client.generate_url(),
            "https://europe-west1-aiplatform.googleapis.com/v1/projects/proj/locations/europe-west1/publishers/google/models/gemini-2.0-flash:generateContent"
        );
    }
}
