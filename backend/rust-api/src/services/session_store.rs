use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::metrics::record_store_operation;
use crate::models::QuizSession;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("session store unavailable: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("corrupt session record: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("session store timed out after {0:?}")]
    Timeout(Duration),
}

/// Keyed repository for live quiz sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    async fn get(&self, session_id: &str) -> Result<Option<QuizSession>, StoreError>;

    /// Inserts or replaces the session under its `session_id`.
    async fn put(&self, session: &QuizSession) -> Result<(), StoreError>;

    /// Returns whether a session was removed.
    async fn remove(&self, session_id: &str) -> Result<bool, StoreError>;

    /// Number of live sessions, when the backend can count them.
    async fn len(&self) -> Result<Option<usize>, StoreError>;

    async fn health(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, QuizSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, session_id: &str) -> Result<Option<QuizSession>, StoreError> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn put(&self, session: &QuizSession) -> Result<(), StoreError> {
        self.sessions
            .write()
            .await
            .insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn remove(&self, session_id: &str) -> Result<bool, StoreError> {
        Ok(self.sessions.write().await.remove(session_id).is_some())
    }

    async fn len(&self) -> Result<Option<usize>, StoreError> {
        Ok(Some(self.sessions.read().await.len()))
    }
}

/// Sessions as JSON strings in Redis, refreshed with a TTL on every write.
pub struct RedisSessionStore {
    redis: ConnectionManager,
    ttl_seconds: u64,
}

const KEY_PREFIX: &str = "quiz_session:";

impl RedisSessionStore {
    pub async fn connect(redis_uri: &str, ttl_seconds: u64) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_uri)?;

        tracing::info!("Attempting to connect to Redis...");

        let redis = tokio::time::timeout(Duration::from_secs(30), ConnectionManager::new(client))
            .await
            .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

        let store = Self { redis, ttl_seconds };
        store.ping().await?;

        tracing::info!("Redis session store ready (ttl {}s)", ttl_seconds);

        Ok(store)
    }

    fn key(session_id: &str) -> String {
        format!("{}{}", KEY_PREFIX, session_id)
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        let timeout = Duration::from_secs(5);
        tokio::time::timeout(timeout, redis::cmd("PING").query_async::<String>(&mut conn))
            .await
            .map_err(|_| StoreError::Timeout(timeout))??;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, session_id: &str) -> Result<Option<QuizSession>, StoreError> {
        let mut conn = self.redis.clone();
        let raw: Result<Option<String>, _> = redis::cmd("GET")
            .arg(Self::key(session_id))
            .query_async(&mut conn)
            .await;
        record_store_operation("redis", "get", raw.is_ok());

        match raw? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, session: &QuizSession) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        let json = serde_json::to_string(session)?;
        let result = redis::cmd("SETEX")
            .arg(Self::key(&session.session_id))
            .arg(self.ttl_seconds)
            .arg(json)
            .query_async::<()>(&mut conn)
            .await;
        record_store_operation("redis", "setex", result.is_ok());
        Ok(result?)
    }

    async fn remove(&self, session_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.redis.clone();
        let deleted: Result<u64, _> = redis::cmd("DEL")
            .arg(Self::key(session_id))
            .query_async(&mut conn)
            .await;
        record_store_operation("redis", "del", deleted.is_ok());
        Ok(deleted? > 0)
    }

    /// Counts `quiz_session:*` keys with SCAN, so expired sessions drop out.
    async fn len(&self) -> Result<Option<usize>, StoreError> {
        let mut conn = self.redis.clone();
        let pattern = format!("{}*", KEY_PREFIX);
        let mut cursor = "0".to_string();
        let mut total = 0usize;

        loop {
            let page: Result<(String, Vec<String>), _> = redis::cmd("SCAN")
                .arg(&cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(1000)
                .query_async(&mut conn)
                .await;
            record_store_operation("redis", "scan", page.is_ok());
            let (next_cursor, keys) = page?;

            total += keys.len();

            if next_cursor == "0" {
                break;
            }

            cursor = next_cursor;
        }

        Ok(Some(total))
    }

    async fn health(&self) -> Result<(), StoreError> {
        self.ping().await
    }
}
