use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisResult};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Display;
use tokio::sync::mpsc;

use crate::error::AppError;
use crate::error::AppResult;

/// Keys for cached analytics query results, scoped by lookback window
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Engagement(u32),
    Journeys(u32),
    Trending { days: u32, limit: usize },
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::Engagement(days) => write!(f, "analytics:engagement:{}d", days),
            CacheKey::Journeys(days) => write!(f, "analytics:journeys:{}d", days),
            CacheKey::Trending { days, limit } => {
                write!(f, "analytics:trending:{}d:{}", days, limit)
            }
        }
    }
}

/// Creates a Redis client; no connection is opened until [`Cache::connect`]
pub fn create_redis_client(redis_url: &str) -> anyhow::Result<Client> {
    Ok(Client::open(redis_url)?)
}

/// Pending `SET key value EX ttl`
#[derive(Debug)]
struct PendingWrite {
    key: String,
    json: String,
    ttl: u64,
}

/// JSON cache in Redis with fire-and-forget writes
#[derive(Clone)]
pub struct Cache {
    conn: ConnectionManager,
    writes: mpsc::UnboundedSender<PendingWrite>,
}

/// Stops the background writer after flushing queued writes
pub struct CacheWriterHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl CacheWriterHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Cache writer task failed");
        }
        tracing::info!("Cache writer stopped");
    }
}

impl Cache {
    /// Connects to Redis and spawns the background writer
    pub async fn connect(client: Client) -> AppResult<(Self, CacheWriterHandle)> {
        let conn = ConnectionManager::new(client).await?;
        let (writes, write_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let task = tokio::spawn(Self::writer(conn.clone(), write_rx, shutdown_rx));
        tracing::info!("Cache writer started");

        Ok((Self { conn, writes }, CacheWriterHandle { shutdown_tx, task }))
    }

    async fn writer(
        mut conn: ConnectionManager,
        mut write_rx: mpsc::UnboundedReceiver<PendingWrite>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                Some(write) = write_rx.recv() => Self::apply(&mut conn, write).await,
                _ = shutdown_rx.recv() => break,
            }
        }

        // Live `Cache` clones keep the channel open, so drain without waiting
        let mut flushed = 0usize;
        while let Ok(write) = write_rx.try_recv() {
            Self::apply(&mut conn, write).await;
            flushed += 1;
        }
        tracing::info!(flushed, "Cache writer flushed pending writes");
    }

    async fn apply(conn: &mut ConnectionManager, write: PendingWrite) {
        let result: RedisResult<()> = conn.set_ex(&write.key, write.json, write.ttl).await;
        if let Err(e) = result {
            tracing::error!(key = %write.key, error = %e, "Failed to write to Redis cache");
        }
    }

    /// Deserialized value stored under `key`, if any
    pub async fn get_from_cache<T: DeserializeOwned>(&self, key: &CacheKey) -> AppResult<Option<T>> {
        let mut conn = self.conn.clone();
        let cached: Option<String> = conn.get(key.to_string()).await?;

        cached
            .map(|json| {
                serde_json::from_str(&json).map_err(|e| {
                    AppError::Internal(format!("Cache deserialization error for {}: {}", key, e))
                })
            })
            .transpose()
    }

    /// Queues a value for writing with the given TTL in seconds and returns immediately.
    ///
    /// Serialization and write failures are logged, never surfaced.
    pub fn set_in_background<T: Serialize>(&self, key: &CacheKey, value: &T, ttl: u64) {
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Cache serialization error");
                return;
            }
        };

        let write = PendingWrite {
            key: key.to_string(),
            json,
            ttl,
        };
        if self.writes.send(write).is_err() {
            tracing::warn!(key = %key, "Cache writer stopped, dropping write");
        }
    }
}
