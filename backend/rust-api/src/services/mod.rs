use std::sync::Arc;

use crate::config::{Config, SessionBackend};
use gemini_client::{GeminiClient, GenerativeModel};
use session_store::{InMemorySessionStore, RedisSessionStore, SessionStore};

pub struct AppState {
    pub config: Config,
    pub sessions: Arc<dyn SessionStore>,
    pub model: Arc<dyn GenerativeModel>,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let sessions: Arc<dyn SessionStore> = match config.session.backend {
            SessionBackend::Memory => {
                tracing::info!("Using in-memory session store");
                Arc::new(InMemorySessionStore::new())
            }
            SessionBackend::Redis => Arc::new(
                RedisSessionStore::connect(&config.session.redis_uri, config.session.ttl_seconds)
                    .await?,
            ),
        };

        let model = GeminiClient::from_config(&config)?;
        tracing::info!("Generative model client ready: {}", model.model_name());

        Ok(Self::with_components(config, sessions, Arc::new(model)))
    }

    /// Wires explicit components, used by tests to swap in fakes.
    pub fn with_components(
        config: Config,
        sessions: Arc<dyn SessionStore>,
        model: Arc<dyn GenerativeModel>,
    ) -> Self {
        Self {
            config,
            sessions,
            model,
        }
    }
}

pub mod analysis_service;
pub mod gemini_client;
pub mod question_generator;
pub mod quiz_engine;
pub mod quiz_service;
pub mod scenario_images;
pub mod session_store;
