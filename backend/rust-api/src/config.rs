use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::utils::retry::RetryConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub bind_addr: String,
    pub cors_origins: Vec<String>,
    pub images_path: PathBuf,
    pub gcp_project_id: String,
    pub gcp_location: String,
    pub gemini: GeminiConfig,
    pub session: SessionConfig,
    pub quiz: QuizConfig,
    pub generation: GenerationConfig,
    pub analysis: AnalysisConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeminiConfig {
    /// Generative Language API key. Takes precedence over `access_token`.
    pub api_key: Option<String>,
    /// OAuth bearer token for Vertex AI (`gcloud auth print-access-token`).
    pub access_token: Option<String>,
    pub model: String,
    /// Overrides the endpoint host, e.g. for a local proxy.
    pub api_base: Option<String>,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub backend: SessionBackend,
    pub redis_uri: String,
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuizConfig {
    pub assessment_length: usize,
    pub session_length: usize,
    pub scenario_interval: usize,
    pub weak_min_attempts: u32,
    pub weak_accuracy_threshold: f64,
    pub avoid_repeat_categories: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerationConfig {
    pub max_attempts: usize,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    pub attach_video: bool,
    pub poll_interval_ms: u64,
    pub processing_timeout_secs: u64,
    pub max_video_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
            cors_origins: vec![
                "http://localhost:5173".to_string(),
                "http://localhost:3000".to_string(),
            ],
            images_path: PathBuf::from("./data/scenario_images"),
            gcp_project_id: "bgn-ie-hack25dub-707".to_string(),
            gcp_location: "us-central1".to_string(),
            gemini: GeminiConfig::default(),
            session: SessionConfig::default(),
            quiz: QuizConfig::default(),
            generation: GenerationConfig::default(),
            analysis: AnalysisConfig::default(),
        }
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            access_token: None,
            model: "gemini-2.0-flash".to_string(),
            api_base: None,
            request_timeout_secs: 60,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend: SessionBackend::Memory,
            redis_uri: "redis://127.0.0.1:6379/0".to_string(),
            ttl_seconds: 3600,
        }
    }
}

impl Default for QuizConfig {
    fn default() -> Self {
        Self {
            assessment_length: 5,
            session_length: 15,
            scenario_interval: 3,
            weak_min_attempts: 2,
            weak_accuracy_threshold: 70.0,
            avoid_repeat_categories: true,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 200,
            max_backoff_ms: 2000,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            attach_video: true,
            poll_interval_ms: 2000,
            processing_timeout_secs: 120,
            max_video_bytes: 50 * 1024 * 1024,
        }
    }
}

impl GenerationConfig {
    pub fn retry_config(&self) -> RetryConfig {
        let base_backoff = Duration::from_millis(self.base_backoff_ms);
        RetryConfig {
            max_attempts: self.max_attempts.max(1),
            base_backoff,
            max_backoff: Duration::from_millis(self.max_backoff_ms.max(self.base_backoff_ms)),
            jitter_max: Some(base_backoff / 2),
        }
    }
}

impl AnalysisConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn processing_timeout(&self) -> Duration {
        Duration::from_secs(self.processing_timeout_secs)
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Root .env first (two levels up), then the local one
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/*.toml + APP__ overrides
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", app_env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let defaults = Config::default();

        let bind_addr = match string_setting(&settings, "server.bind_addr", "BIND_ADDR") {
            Some(addr) => addr,
            None => match env::var("PORT") {
                Ok(port) => format!("0.0.0.0:{}", parse_value::<u16>("PORT", &port)?),
                Err(_) => defaults.bind_addr,
            },
        };

        let cors_origins = string_setting(&settings, "server.cors_origins", "CORS_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(|origin| origin.trim().to_string())
                    .filter(|origin| !origin.is_empty())
                    .collect()
            })
            .unwrap_or(defaults.cors_origins);

        let images_path = string_setting(&settings, "quiz.images_path", "IMAGES_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.images_path);

        let gcp_project_id = string_setting(&settings, "gcp.project_id", "GCP_PROJECT_ID")
            .unwrap_or(defaults.gcp_project_id);
        let gcp_location = string_setting(&settings, "gcp.location", "GCP_LOCATION")
            .unwrap_or(defaults.gcp_location);

        let gemini = GeminiConfig {
            api_key: string_setting(&settings, "gemini.api_key", "GEMINI_API_KEY")
                .filter(|key| !key.is_empty()),
            access_token: string_setting(&settings, "gemini.access_token", "GEMINI_ACCESS_TOKEN")
                .filter(|token| !token.is_empty()),
            model: string_setting(&settings, "gemini.model", "GEMINI_MODEL")
                .unwrap_or(defaults.gemini.model),
            api_base: string_setting(&settings, "gemini.api_base", "GEMINI_API_BASE"),
            request_timeout_secs: numeric_setting(
                &settings,
                "gemini.request_timeout_secs",
                "GEMINI_REQUEST_TIMEOUT_SECS",
                defaults.gemini.request_timeout_secs,
            )?,
        };

        let backend = match string_setting(&settings, "session.backend", "SESSION_BACKEND")
            .as_deref()
        {
            None | Some("memory") => SessionBackend::Memory,
            Some("redis") => SessionBackend::Redis,
            Some(other) => {
                return Err(config::ConfigError::Message(format!(
                    "unknown session backend '{}', expected 'memory' or 'redis'",
                    other
                )))
            }
        };

        let session = SessionConfig {
            backend,
            redis_uri: string_setting(&settings, "session.redis_uri", "REDIS_URI")
                .unwrap_or(defaults.session.redis_uri),
            ttl_seconds: numeric_setting(
                &settings,
                "session.ttl_seconds",
                "SESSION_TTL_SECONDS",
                defaults.session.ttl_seconds,
            )?,
        };

        let quiz = QuizConfig {
            assessment_length: numeric_setting(
                &settings,
                "quiz.assessment_length",
                "QUIZ_ASSESSMENT_LENGTH",
                defaults.quiz.assessment_length,
            )?,
            session_length: numeric_setting(
                &settings,
                "quiz.session_length",
                "QUIZ_SESSION_LENGTH",
                defaults.quiz.session_length,
            )?,
            scenario_interval: numeric_setting(
                &settings,
                "quiz.scenario_interval",
                "QUIZ_SCENARIO_INTERVAL",
                defaults.quiz.scenario_interval,
            )?,
            weak_min_attempts: numeric_setting(
                &settings,
                "quiz.weak_min_attempts",
                "QUIZ_WEAK_MIN_ATTEMPTS",
                defaults.quiz.weak_min_attempts,
            )?,
            weak_accuracy_threshold: numeric_setting(
                &settings,
                "quiz.weak_accuracy_threshold",
                "QUIZ_WEAK_ACCURACY_THRESHOLD",
                defaults.quiz.weak_accuracy_threshold,
            )?,
            avoid_repeat_categories: numeric_setting(
                &settings,
                "quiz.avoid_repeat_categories",
                "QUIZ_AVOID_REPEAT_CATEGORIES",
                defaults.quiz.avoid_repeat_categories,
            )?,
        };

        if quiz.scenario_interval == 0 {
            return Err(config::ConfigError::Message(
                "quiz.scenario_interval must be at least 1".to_string(),
            ));
        }
        if quiz.session_length == 0 {
            return Err(config::ConfigError::Message(
                "quiz.session_length must be at least 1".to_string(),
            ));
        }

        let generation = GenerationConfig {
            max_attempts: numeric_setting(
                &settings,
                "generation.max_attempts",
                "GENERATION_MAX_ATTEMPTS",
                defaults.generation.max_attempts,
            )?,
            base_backoff_ms: numeric_setting(
                &settings,
                "generation.base_backoff_ms",
                "GENERATION_BASE_BACKOFF_MS",
                defaults.generation.base_backoff_ms,
            )?,
            max_backoff_ms: numeric_setting(
                &settings,
                "generation.max_backoff_ms",
                "GENERATION_MAX_BACKOFF_MS",
                defaults.generation.max_backoff_ms,
            )?,
        };

        let analysis = AnalysisConfig {
            attach_video: numeric_setting(
                &settings,
                "analysis.attach_video",
                "ANALYSIS_ATTACH_VIDEO",
                defaults.analysis.attach_video,
            )?,
            poll_interval_ms: numeric_setting(
                &settings,
                "analysis.poll_interval_ms",
                "ANALYSIS_POLL_INTERVAL_MS",
                defaults.analysis.poll_interval_ms,
            )?,
            processing_timeout_secs: numeric_setting(
                &settings,
                "analysis.processing_timeout_secs",
                "ANALYSIS_PROCESSING_TIMEOUT_SECS",
                defaults.analysis.processing_timeout_secs,
            )?,
            max_video_bytes: numeric_setting(
                &settings,
                "analysis.max_video_bytes",
                "ANALYSIS_MAX_VIDEO_BYTES",
                defaults.analysis.max_video_bytes,
            )?,
        };

        if gemini.api_key.is_none() && gemini.access_token.is_none() {
            tracing::warn!(
                "Neither GEMINI_API_KEY nor GEMINI_ACCESS_TOKEN is set, model calls will fail"
            );
        }

        Ok(Config {
            bind_addr,
            cors_origins,
            images_path,
            gcp_project_id,
            gcp_location,
            gemini,
            session,
            quiz,
            generation,
            analysis,
        })
    }
}

/// Layered lookup: config file / `APP__` env first, then the flat legacy variable.
fn string_setting(settings: &config::Config, key: &str, env_key: &str) -> Option<String> {
    settings
        .get_string(key)
        .ok()
        .or_else(|| env::var(env_key).ok())
}

fn numeric_setting<T>(
    settings: &config::Config,
    key: &str,
    env_key: &str,
    default: T,
) -> Result<T, config::ConfigError>
where
    T: std::str::FromStr,
{
    match string_setting(settings, key, env_key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, config::ConfigError> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| config::ConfigError::Message(format!("invalid value '{}' for {}", raw, key)))
}
