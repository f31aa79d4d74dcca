//! Redis snapshot store.

use async_trait::async_trait;
use duel_shared::Player;
use redis::{aio::ConnectionManager, AsyncCommands};

use super::{LocalMirror, StorageError};

/// Default snapshot key
const SNAPSHOT_KEY: &str = "duel:player:snapshot";

/// Keeps the snapshot under a single Redis key with no expiry
#[derive(Clone)]
pub struct RedisMirror {
    conn: ConnectionManager,
    key: String,
}

impl RedisMirror {
    /// Connect to Redis
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            key: SNAPSHOT_KEY.to_string(),
        })
    }

    /// Use a per-profile key instead of the default one
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }
}

#[async_trait]
impl LocalMirror for RedisMirror {
    async fn read_snapshot(&self) -> Result<Option<Player>, StorageError> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn.get(&self.key).await?;

        match json {
            Some(json) => {
                let player: Player = serde_json::from_str(&json)?;
                Ok(Some(player.resync_level()))
            }
            None => Ok(None),
        }
    }

    async fn write_snapshot(&self, player: &Player) -> Result<(), StorageError> {
        let json = serde_json::to_string(player)?;

        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(&self.key, json).await?;

        Ok(())
    }
}
