//! Persistence drivers.
//!
//! The contract a driver must satisfy: initialize (load previous
//! snapshots), run a periodic snapshot loop, flush on close, and expose
//! the bot-wide and per-chat stores. The default driver keeps everything
//! in memory and writes nothing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::Connection;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::BotError;
use crate::store::{Store, Stores};

/// Snapshot interval floor; configuring below this is clamped up.
pub const MIN_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(30 * 60);

const BOT_NAMESPACE: &str = "bot";
const CHAT_PREFIX: &str = "chat:";

#[async_trait]
pub trait Persistence: Send + Sync + 'static {
    async fn initialize(&self) -> Result<(), BotError>;
    /// Snapshot loop; returns when `cancel` fires.
    async fn periodic_runner(&self, cancel: CancellationToken);
    /// Final flush.
    async fn close(&self) -> Result<(), BotError>;

    fn bot_data(&self) -> Store;
    fn chat_data(&self, key: &str) -> Store;
    fn del_chat_data(&self, key: &str);
}

/// In-memory only; the default.
#[derive(Default)]
pub struct NoopPersistence {
    stores: Stores,
}

impl NoopPersistence {
    pub fn new() -> Self {
        NoopPersistence::default()
    }
}

#[async_trait]
impl Persistence for NoopPersistence {
    async fn initialize(&self) -> Result<(), BotError> {
        Ok(())
    }

    async fn periodic_runner(&self, cancel: CancellationToken) {
        cancel.cancelled().await;
    }

    async fn close(&self) -> Result<(), BotError> {
        Ok(())
    }

    fn bot_data(&self) -> Store {
        self.stores.bot()
    }

    fn chat_data(&self, key: &str) -> Store {
        self.stores.chat(key)
    }

    fn del_chat_data(&self, key: &str) {
        self.stores.del_chat(key);
    }
}

/// SQLite snapshot driver: each namespace is one JSON blob row, written
/// on the snapshot interval and on close.
pub struct SqlitePersistence {
    stores: Stores,
    path: PathBuf,
    interval: Duration,
}

impl SqlitePersistence {
    pub fn new(path: &Path, interval: Duration) -> Self {
        SqlitePersistence {
            stores: Stores::new(),
            path: path.to_owned(),
            interval: interval.max(MIN_SNAPSHOT_INTERVAL),
        }
    }

    fn open(path: &Path) -> Result<Connection, BotError> {
        let conn = Connection::open(path).map_err(|e| BotError::Persistence(e.to_string()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv_snapshots (
                namespace  TEXT PRIMARY KEY,
                payload    TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )
        .map_err(|e| BotError::Persistence(e.to_string()))?;
        Ok(conn)
    }

    async fn snapshot(&self) -> Result<(), BotError> {
        let mut blobs: Vec<(String, String)> = Vec::new();
        let bot = serde_json::to_string(&self.stores.bot().snapshot())
            .map_err(|e| BotError::Persistence(e.to_string()))?;
        blobs.push((BOT_NAMESPACE.to_owned(), bot));
        for key in self.stores.chat_keys() {
            let payload = serde_json::to_string(&self.stores.chat(&key).snapshot())
                .map_err(|e| BotError::Persistence(e.to_string()))?;
            blobs.push((format!("{CHAT_PREFIX}{key}"), payload));
        }
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<(), BotError> {
            let mut conn = Self::open(&path)?;
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map_or(0, |d| d.as_secs() as i64);
            let tx = conn
                .transaction()
                .map_err(|e| BotError::Persistence(e.to_string()))?;
            for (namespace, payload) in blobs {
                tx.execute(
                    "INSERT OR REPLACE INTO kv_snapshots (namespace, payload, updated_at)
                     VALUES (?1, ?2, ?3)",
                    rusqlite::params![namespace, payload, now],
                )
                .map_err(|e| BotError::Persistence(e.to_string()))?;
            }
            tx.commit().map_err(|e| BotError::Persistence(e.to_string()))
        })
        .await
        .map_err(|e| BotError::Persistence(e.to_string()))??;
        debug!(path = %self.path.display(), "stores snapshotted");
        Ok(())
    }
}

#[async_trait]
impl Persistence for SqlitePersistence {
    async fn initialize(&self) -> Result<(), BotError> {
        let path = self.path.clone();
        let rows = tokio::task::spawn_blocking(move || -> Result<Vec<(String, String)>, BotError> {
            let conn = Self::open(&path)?;
            let mut stmt = conn
                .prepare("SELECT namespace, payload FROM kv_snapshots")
                .map_err(|e| BotError::Persistence(e.to_string()))?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(|e| BotError::Persistence(e.to_string()))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| BotError::Persistence(e.to_string()))?;
            Ok(rows)
        })
        .await
        .map_err(|e| BotError::Persistence(e.to_string()))??;

        for (namespace, payload) in rows {
            let map: HashMap<String, serde_json::Value> = match serde_json::from_str(&payload) {
                Ok(map) => map,
                Err(error) => {
                    warn!(namespace, %error, "discarding unreadable snapshot");
                    continue;
                }
            };
            if namespace == BOT_NAMESPACE {
                self.stores.bot().replace(map);
            } else if let Some(key) = namespace.strip_prefix(CHAT_PREFIX) {
                self.stores.chat(key).replace(map);
            }
        }
        info!(path = %self.path.display(), "persistence initialized");
        Ok(())
    }

    async fn periodic_runner(&self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.interval) => {
                    if let Err(error) = self.snapshot().await {
                        warn!(%error, "periodic snapshot failed");
                    }
                }
            }
        }
    }

    async fn close(&self) -> Result<(), BotError> {
        self.snapshot().await
    }

    fn bot_data(&self) -> Store {
        self.stores.bot()
    }

    fn chat_data(&self, key: &str) -> Store {
        self.stores.chat(key)
    }

    fn del_chat_data(&self, key: &str) {
        self.stores.del_chat(key);
    }
}
