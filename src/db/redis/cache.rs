use redis::AsyncCommands;
use redis::Client;
use std::fmt::Display;
use tokio::sync::mpsc;

use crate::error::AppError;
use crate::error::AppResult;
use crate::models::{JokeId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Similar-joke list for one joke, capped at `limit` edges
    SimilarJokes { joke_id: JokeId, limit: i64 },
    /// Top neighbors for one user, capped at `limit` edges
    SimilarUsers { user_id: UserId, limit: i64 },
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::SimilarJokes { joke_id, limit } => write!(f, "simjokes:{}:{}", joke_id, limit),
            CacheKey::SimilarUsers { user_id, limit } => write!(f, "simusers:{}:{}", user_id, limit),
        }
    }
}

/// Creates a Redis client for caching similarity lookups
pub fn create_redis_client(redis_url: &str) -> anyhow::Result<Client> {
    let client = Client::open(redis_url)?;
    Ok(client)
}

/// Pending write handed to the background writer
struct PendingWrite {
    key: String,
    payload: String,
    ttl: u64,
}

/// Read-through cache in front of the similarity tables
///
/// Reads go straight to Redis; writes are queued to a background task so a
/// slow Redis never adds latency to a recommendation.
#[derive(Clone)]
pub struct Cache {
    redis_client: Client,
    write_tx: mpsc::UnboundedSender<PendingWrite>,
}

/// Stops the background writer after draining queued writes
pub struct CacheWriterHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl CacheWriterHandle {
    /// Signals the writer and waits until every queued write is flushed
    ///
    /// Call this after the HTTP server has stopped accepting requests, so no
    /// new writes race the drain.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Cache writer task panicked during shutdown");
        }
        tracing::info!("Cache writer stopped");
    }
}

impl Cache {
    /// Creates the cache and spawns its writer task
    ///
    /// Must be called from inside a Tokio runtime. The returned handle owns the
    /// writer; dropping it without calling `shutdown` leaves queued writes to
    /// be lost when the runtime stops.
    pub fn new(redis_client: Client) -> (Self, CacheWriterHandle) {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let client = redis_client.clone();
        let task = tokio::spawn(async move {
            Self::run_writer(client, write_rx, shutdown_rx).await;
        });

        (
            Self {
                redis_client,
                write_tx,
            },
            CacheWriterHandle { shutdown_tx, task },
        )
    }

    async fn run_writer(
        client: Client,
        mut write_rx: mpsc::UnboundedReceiver<PendingWrite>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::debug!("Cache writer started");

        loop {
            tokio::select! {
                Some(write) = write_rx.recv() => {
                    if let Err(e) = Self::store(&client, write).await {
                        tracing::warn!(error = %e, "Failed to write similarity cache entry");
                    }
                }
                _ = shutdown_rx.recv() => {
                    // Stop accepting writes, then flush what is already queued
                    write_rx.close();
                    let mut flushed = 0usize;
                    while let Some(write) = write_rx.recv().await {
                        if let Err(e) = Self::store(&client, write).await {
                            tracing::warn!(error = %e, "Failed to flush cache entry during shutdown");
                        } else {
                            flushed += 1;
                        }
                    }
                    tracing::debug!(flushed, "Cache writer drained");
                    break;
                }
            }
        }
    }

    async fn store(client: &Client, write: PendingWrite) -> AppResult<()> {
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: () = conn.set_ex(write.key, write.payload, write.ttl).await?;
        Ok(())
    }

    /// Returns the cached value for `key`, or `None` on a miss
    ///
    /// A connection or read failure is an error, not a miss. An entry that no
    /// longer decodes as `T` surfaces as `Internal`.
    pub async fn get_from_cache<T: serde::de::DeserializeOwned>(
        &self,
        key: &CacheKey,
    ) -> AppResult<Option<T>> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let cached: Option<String> = conn.get(key.to_string()).await?;

        // Entries are stored as JSON text
        cached
            .map(|json| {
                serde_json::from_str(&json).map_err(|e| {
                    AppError::Internal(format!("Cache deserialization error: {}", e))
                })
            })
            .transpose()
    }

    /// Queues a value for writing without waiting on Redis
    ///
    /// Failures never reach the caller. They are logged here or by the
    /// writer task.
    pub fn set_in_background<T: serde::Serialize>(&self, key: &CacheKey, value: &T, ttl: u64) {
        let payload = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, key = %key, "Cache serialization error");
                return;
            }
        };

        let write = PendingWrite {
            key: key.to_string(),
            payload,
            ttl,
        };

        if self.write_tx.send(write).is_err() {
            tracing::warn!(key = %key, "Cache writer is gone, dropping write");
        }
    }
}
