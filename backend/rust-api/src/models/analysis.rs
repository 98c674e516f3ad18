use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

/// Gaze or head-turn event detected by the simulator's face tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    EyeLeft,
    EyeRight,
    HeadLeft,
    HeadRight,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::EyeLeft => "EYE_LEFT",
            ActionType::EyeRight => "EYE_RIGHT",
            ActionType::HeadLeft => "HEAD_LEFT",
            ActionType::HeadRight => "HEAD_RIGHT",
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            ActionType::EyeLeft => "glanced at the left mirror",
            ActionType::EyeRight => "glanced at the right mirror",
            ActionType::HeadLeft => "turned head to check the left blind spot",
            ActionType::HeadRight => "turned head to check the right blind spot",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    /// Seconds since the simulation started
    #[validate(range(min = 0.0, message = "timestamp must be non-negative"))]
    pub timestamp: f64,
    /// Video playback position in seconds
    #[validate(range(min = 0.0, message = "videoTime must be non-negative"))]
    pub video_time: f64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DrivingAnalysisRequest {
    #[serde(default)]
    pub video_url: Option<String>,
    #[validate(length(min = 1, max = 64, message = "videoType must be 1-64 characters"))]
    pub video_type: String,
    #[serde(default)]
    pub potential_hazards: Vec<String>,
    #[validate(nested)]
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SimpleDrivingAnalysisRequest {
    #[validate(length(min = 1, max = 64, message = "videoType must be 1-64 characters"))]
    pub video_type: String,
    #[validate(nested)]
    pub actions: Vec<Action>,
    #[validate(range(min = 0.0, message = "duration must be non-negative"))]
    pub duration: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ActionBreakdown {
    pub eye_left: u32,
    pub eye_right: u32,
    pub head_left: u32,
    pub head_right: u32,
}

impl ActionBreakdown {
    pub fn from_actions(actions: &[Action]) -> Self {
        actions
            .iter()
            .fold(ActionBreakdown::default(), |mut acc, action| {
                match action.action_type {
                    ActionType::EyeLeft => acc.eye_left += 1,
                    ActionType::EyeRight => acc.eye_right += 1,
                    ActionType::HeadLeft => acc.head_left += 1,
                    ActionType::HeadRight => acc.head_right += 1,
                }
                acc
            })
    }

    pub fn mirror_checks(&self) -> u32 {
        self.eye_left + self.eye_right
    }

    pub fn blind_spot_checks(&self) -> u32 {
        self.head_left + self.head_right
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct DetailedBreakdown {
    #[validate(length(min = 1, message = "mirror_checks must not be empty"))]
    pub mirror_checks: String,
    #[validate(length(min = 1, message = "blind_spot_checks must not be empty"))]
    pub blind_spot_checks: String,
    #[validate(length(min = 1, message = "observation_timing must not be empty"))]
    pub observation_timing: String,
}

/// Scoring object the model returns for a driving session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct DrivingScore {
    #[validate(range(min = 0.0, max = 100.0, message = "overall_score must be 0-100"))]
    pub overall_score: f64,
    pub passed: bool,
    #[validate(nested)]
    pub detailed_breakdown: DetailedBreakdown,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub improvements: Vec<String>,
    #[validate(length(min = 1, message = "summary must not be empty"))]
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    pub analyzed_at: DateTime<Utc>,
    pub video_type: String,
    pub total_actions: usize,
    pub action_breakdown: ActionBreakdown,
    pub duration_seconds: Option<f64>,
    pub video_attached: bool,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrivingAnalysisResponse {
    #[serde(flatten)]
    pub score: DrivingScore,
    pub metadata: AnalysisMetadata,
}
