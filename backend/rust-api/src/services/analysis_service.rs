//! Scores observation behaviour from a simulated drive.
//!
//! The recorded gaze and head-turn events are laid out chronologically in a
//! rubric prompt. When a video URL is supplied the clip is fetched, uploaded
//! to the model and attached so the grader can see when hazards appear.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use validator::Validate;

use super::gemini_client::{GenerationRequest, GenerativeModel, ModelError, Part};
use super::question_generator::extract_json;
use super::AppState;
use crate::config::AnalysisConfig;
use crate::metrics::DRIVING_ANALYSES_TOTAL;
use crate::models::analysis::{
    Action, ActionBreakdown, AnalysisMetadata, DrivingAnalysisRequest, DrivingAnalysisResponse,
    DrivingScore, SimpleDrivingAnalysisRequest,
};
use crate::utils::retry::{retry_async_when, RetryConfig};

pub const PASS_MARK: f64 = 70.0;

const VIDEO_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("invalid analysis request: {0}")]
    InvalidRequest(String),
    #[error("failed to fetch video {url}: {reason}")]
    VideoFetch { url: String, reason: String },
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("malformed analysis output: {0}")]
    Malformed(String),
}

impl AnalysisError {
    pub fn is_retryable(&self) -> bool {
        match self {
            AnalysisError::Model(err) => err.is_retryable(),
            AnalysisError::Malformed(_) => true,
            _ => false,
        }
    }
}

/// Everything the rubric prompt is built from.
pub struct RubricInput<'a> {
    pub video_type: &'a str,
    pub hazards: &'a [String],
    pub actions: &'a [Action],
    pub duration: Option<f64>,
    pub video_attached: bool,
}

pub fn rubric_prompt(input: &RubricInput<'_>) -> String {
    let mut actions: Vec<&Action> = input.actions.iter().collect();
    actions.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

    let hazards = if input.hazards.is_empty() {
        "- none listed".to_string()
    } else {
        input
            .hazards
            .iter()
            .map(|hazard| format!("- {}", hazard))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let timeline = if actions.is_empty() {
        "- none recorded".to_string()
    } else {
        actions
            .iter()
            .map(|action| {
                format!(
                    "- t={:.2}s (video {:.2}s): {} - {}",
                    action.timestamp,
                    action.video_time,
                    action.action_type,
                    action.action_type.describe()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let breakdown = ActionBreakdown::from_actions(input.actions);
    let duration = input
        .duration
        .map(|seconds| format!("Drive duration: {:.1} seconds\n", seconds))
        .unwrap_or_default();
    let video_note = if input.video_attached {
        "The attached video shows the drive. Use it to judge when each hazard appears.\n"
    } else {
        ""
    };

    format!(
        r#"You are an Irish Road Safety Authority (RSA) driving tester grading a learner's observation during a simulated drive.

Scenario: {video_type}
{duration}Potential hazards:
{hazards}

Observation actions in chronological order ({total} total: {mirrors} mirror checks, {blind_spots} blind spot checks):
{timeline}

{video_note}Grade against the RSA observation criteria:
1. Mirror checks: EYE_LEFT and EYE_RIGHT are mirror glances. Mirrors must be checked before any change of speed or direction and regularly while driving.
2. Blind spot checks: HEAD_LEFT and HEAD_RIGHT are head turns. A blind spot check toward the side of the manoeuvre is required before moving off, turning or changing lane.
3. Observation timing: checks must come before the hazard or manoeuvre. Late or missing checks are faults.
4. Hazard awareness: every potential hazard should be matched by observation before it is reached.
A score of {pass_mark:.0} or more is a pass.

Return ONLY this JSON (no markdown, no extra text):
{{
    "overall_score": 0-100,
    "passed": true or false,
    "detailed_breakdown": {{
        "mirror_checks": "assessment of mirror usage",
        "blind_spot_checks": "assessment of blind spot checks",
        "observation_timing": "assessment of timing"
    }},
    "strengths": ["..."],
    "improvements": ["..."],
    "summary": "one paragraph of feedback for the learner"
}}"#,
        video_type = input.video_type,
        duration = duration,
        hazards = hazards,
        total = input.actions.len(),
        mirrors = breakdown.mirror_checks(),
        blind_spots = breakdown.blind_spot_checks(),
        timeline = timeline,
        video_note = video_note,
        pass_mark = PASS_MARK,
    )
}

/// Parses and validates the scoring object. `passed` always follows the
/// pass mark so it cannot disagree with `overall_score`.
pub fn parse_score(text: &str) -> Result<DrivingScore, AnalysisError> {
    let json = extract_json(text)
        .ok_or_else(|| AnalysisError::Malformed("no JSON object in response".to_string()))?;

    let mut score: DrivingScore = serde_json::from_str(json)
        .map_err(|e| AnalysisError::Malformed(format!("unexpected score shape: {}", e)))?;
    score
        .validate()
        .map_err(|e| AnalysisError::Malformed(e.to_string()))?;

    let passed = score.overall_score >= PASS_MARK;
    if score.passed != passed {
        tracing::debug!(
            "Model reported passed={} for score {}, correcting",
            score.passed,
            score.overall_score
        );
        score.passed = passed;
    }

    Ok(score)
}

fn video_mime_type(url: &str, content_type: Option<&str>) -> String {
    if let Some(content_type) = content_type.filter(|value| value.starts_with("video/")) {
        return content_type
            .split(';')
            .next()
            .unwrap_or(content_type)
            .trim()
            .to_string();
    }

    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    if path.ends_with(".webm") {
        "video/webm".to_string()
    } else if path.ends_with(".mov") {
        "video/quicktime".to_string()
    } else {
        "video/mp4".to_string()
    }
}

pub struct AnalysisService {
    model: Arc<dyn GenerativeModel>,
    http: reqwest::Client,
    retry: RetryConfig,
    settings: AnalysisConfig,
}

impl AnalysisService {
    pub fn new(state: &AppState) -> Self {
        Self {
            model: state.model.clone(),
            http: reqwest::Client::new(),
            retry: state.config.generation.retry_config(),
            settings: state.config.analysis.clone(),
        }
    }

    pub async fn analyze(
        &self,
        request: DrivingAnalysisRequest,
    ) -> Result<DrivingAnalysisResponse, AnalysisError> {
        let result = self.analyze_full(request).await;
        record_outcome("full", &result);
        result
    }

    pub async fn analyze_simple(
        &self,
        request: SimpleDrivingAnalysisRequest,
    ) -> Result<DrivingAnalysisResponse, AnalysisError> {
        let result = self.analyze_actions_only(request).await;
        record_outcome("simple", &result);
        result
    }

    async fn analyze_full(
        &self,
        request: DrivingAnalysisRequest,
    ) -> Result<DrivingAnalysisResponse, AnalysisError> {
        request
            .validate()
            .map_err(|e| AnalysisError::InvalidRequest(e.to_string()))?;

        let video_url = request
            .video_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty());

        let video = match video_url {
            Some(url) if self.settings.attach_video => self.attach_video(url).await?,
            Some(url) => {
                tracing::debug!("Video attachment disabled, ignoring {}", url);
                None
            }
            None => None,
        };

        tracing::info!(
            "Analyzing driving: type={}, actions={}, hazards={}, video={}",
            request.video_type,
            request.actions.len(),
            request.potential_hazards.len(),
            video.is_some()
        );

        let prompt = rubric_prompt(&RubricInput {
            video_type: &request.video_type,
            hazards: &request.potential_hazards,
            actions: &request.actions,
            duration: None,
            video_attached: video.is_some(),
        });

        let video_attached = video.is_some();
        let score = self.score("analyze_driving", prompt, video).await?;

        Ok(DrivingAnalysisResponse {
            score,
            metadata: self.metadata(&request.video_type, &request.actions, None, video_attached),
        })
    }

    async fn analyze_actions_only(
        &self,
        request: SimpleDrivingAnalysisRequest,
    ) -> Result<DrivingAnalysisResponse, AnalysisError> {
        request
            .validate()
            .map_err(|e| AnalysisError::InvalidRequest(e.to_string()))?;

        tracing::info!(
            "Analyzing driving (simple): type={}, actions={}, duration={:.1}s",
            request.video_type,
            request.actions.len(),
            request.duration
        );

        let prompt = rubric_prompt(&RubricInput {
            video_type: &request.video_type,
            hazards: &[],
            actions: &request.actions,
            duration: Some(request.duration),
            video_attached: false,
        });

        let score = self.score("analyze_driving_simple", prompt, None).await?;

        Ok(DrivingAnalysisResponse {
            score,
            metadata: self.metadata(
                &request.video_type,
                &request.actions,
                Some(request.duration),
                false,
            ),
        })
    }

    async fn score(
        &self,
        operation: &str,
        prompt: String,
        video: Option<Part>,
    ) -> Result<DrivingScore, AnalysisError> {
        retry_async_when(operation, self.retry.clone(), AnalysisError::is_retryable, |_| {
            let request = match &video {
                Some(video) => GenerationRequest::text(prompt.clone()).with_part(video.clone()),
                None => GenerationRequest::text(prompt.clone()),
            };
            async move {
                let text = self.model.generate(request).await?;
                parse_score(&text)
            }
        })
        .await
    }

    fn metadata(
        &self,
        video_type: &str,
        actions: &[Action],
        duration_seconds: Option<f64>,
        video_attached: bool,
    ) -> AnalysisMetadata {
        AnalysisMetadata {
            analyzed_at: Utc::now(),
            video_type: video_type.to_string(),
            total_actions: actions.len(),
            action_breakdown: ActionBreakdown::from_actions(actions),
            duration_seconds,
            video_attached,
            model: self.model.model_name().to_string(),
        }
    }

    /// Turns a video URL into a part the model can read. `gs://` objects are
    /// referenced directly; http(s) videos are downloaded and uploaded.
    /// Returns `None` when the model endpoint cannot take uploads.
    async fn attach_video(&self, raw_url: &str) -> Result<Option<Part>, AnalysisError> {
        let url = Url::parse(raw_url)
            .map_err(|e| AnalysisError::InvalidRequest(format!("bad videoUrl: {}", e)))?;

        match url.scheme() {
            "gs" => {
                return Ok(Some(Part::FileData {
                    mime_type: video_mime_type(raw_url, None),
                    file_uri: raw_url.to_string(),
                }))
            }
            "http" | "https" => {}
            other => {
                return Err(AnalysisError::InvalidRequest(format!(
                    "unsupported videoUrl scheme: {}",
                    other
                )))
            }
        }

        let (bytes, mime_type) = self.fetch_video(url).await?;
        let display_name = raw_url
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or("driving-video");

        match self.model.upload_file(bytes, &mime_type, display_name).await {
            Ok(file) => Ok(Some(Part::FileData {
                mime_type: file.mime_type,
                file_uri: file.uri,
            })),
            Err(ModelError::Unsupported(what)) => {
                tracing::warn!("{} unavailable, analyzing without the video", what);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn fetch_video(&self, url: Url) -> Result<(Vec<u8>, String), AnalysisError> {
        let raw_url = url.to_string();
        let fetch_error = |reason: String| AnalysisError::VideoFetch {
            url: raw_url.clone(),
            reason,
        };
        let limit = self.settings.max_video_bytes;

        let mut response = self
            .http
            .get(url)
            .timeout(VIDEO_FETCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;

        if !response.status().is_success() {
            return Err(fetch_error(format!("status {}", response.status())));
        }
        if let Some(length) = response.content_length() {
            if length > limit as u64 {
                return Err(fetch_error(format!(
                    "video is {} bytes, limit is {}",
                    length, limit
                )));
            }
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        // Chunked bodies carry no length up front; stop reading once over the limit.
        let mut bytes = Vec::with_capacity(response.content_length().unwrap_or(0) as usize);
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| fetch_error(e.to_string()))?
        {
            if bytes.len() + chunk.len() > limit {
                return Err(fetch_error(format!(
                    "video exceeds the limit of {} bytes",
                    limit
                )));
            }
            bytes.extend_from_slice(&chunk);
        }

        tracing::debug!("Fetched {} bytes of video from {}", bytes.len(), raw_url);

        let mime_type = video_mime_type(&raw_url, content_type.as_deref());
        Ok((bytes, mime_type))
    }
}

fn record_outcome(mode: &str, result: &Result<DrivingAnalysisResponse, AnalysisError>) {
    let status = match result {
        Ok(_) => "success",
        Err(AnalysisError::InvalidRequest(_)) => "invalid",
        Err(e) => {
            tracing::error!("Driving analysis ({}) failed: {}", mode, e);
            "error"
        }
    };
    DRIVING_ANALYSES_TOTAL.with_label_values(&[mode, status]).inc();
}
