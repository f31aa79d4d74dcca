//! Local durable mirror of the signed-in player.
//!
//! The mirror is a convenience copy, never the system of record: reads that
//! fail look like "no snapshot" and writes that fail are logged and dropped.
//! All writes go through one background task so they land in the order they
//! were requested. Queued saves collapse into the newest one.

mod file;
mod redis_store;

pub use file::JsonFileMirror;
pub use redis_store::RedisMirror;

use std::sync::Arc;

use async_trait::async_trait;
use duel_shared::Player;
use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot};

#[async_trait]
pub trait LocalMirror: Send + Sync {
    /// Read the stored snapshot, `Ok(None)` if there is none yet
    async fn read_snapshot(&self) -> Result<Option<Player>, StorageError>;

    /// Overwrite the stored snapshot
    async fn write_snapshot(&self, player: &Player) -> Result<(), StorageError>;

    /// Last known snapshot; any failure reads as none
    async fn load(&self) -> Option<Player> {
        match self.read_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Ignoring unreadable player snapshot: {}", e);
                None
            }
        }
    }

    /// Best-effort overwrite
    async fn save(&self, player: &Player) {
        if let Err(e) = self.write_snapshot(player).await {
            warn!("Failed to save player {} snapshot: {}", player.id, e);
        }
    }
}

/// Local storage errors
#[derive(Debug)]
pub enum StorageError {
    Unavailable(String),
    Malformed(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(e) => write!(f, "Local storage unavailable: {}", e),
            Self::Malformed(e) => write!(f, "Malformed snapshot: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::Unavailable(e.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        Self::Malformed(e.to_string())
    }
}

impl From<redis::RedisError> for StorageError {
    fn from(e: redis::RedisError) -> Self {
        Self::Unavailable(e.to_string())
    }
}

/// Commands sent to the mirror writer task
#[derive(Debug)]
pub enum MirrorCommand {
    /// Overwrite the snapshot; `ack` fires once the write has been attempted
    Save {
        player: Box<Player>,
        ack: Option<oneshot::Sender<()>>,
    },
    Load {
        response: oneshot::Sender<Option<Player>>,
    },
    Shutdown,
}

/// Handle for sending commands to the mirror writer task
#[derive(Clone)]
pub struct MirrorHandle {
    sender: mpsc::UnboundedSender<MirrorCommand>,
}

impl MirrorHandle {
    /// Start the writer task for `mirror`. Must be called inside a tokio runtime.
    pub fn spawn(mirror: Arc<dyn LocalMirror>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(mirror_task(mirror, rx));
        debug!("Mirror writer task started");
        Self { sender: tx }
    }

    /// Queue a snapshot write (fire and forget, never blocks)
    pub fn save(&self, player: Player) {
        let command = MirrorCommand::Save {
            player: Box::new(player),
            ack: None,
        };
        if self.sender.send(command).is_err() {
            warn!("Mirror writer is gone, snapshot not saved");
        }
    }

    /// Queue a snapshot write and wait until it has been attempted.
    /// Ordered after every earlier `save`.
    pub async fn save_and_wait(&self, player: Player) {
        let (tx, rx) = oneshot::channel();
        let command = MirrorCommand::Save {
            player: Box::new(player),
            ack: Some(tx),
        };
        if self.sender.send(command).is_err() {
            warn!("Mirror writer is gone, snapshot not saved");
            return;
        }
        let _ = rx.await;
    }

    /// Read the current snapshot
    pub async fn load(&self) -> Option<Player> {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(MirrorCommand::Load { response: tx }).is_err() {
            return None;
        }
        rx.await.ok().flatten()
    }

    /// Stop the writer after it drains queued writes
    pub async fn shutdown(&self) {
        let _ = self.sender.send(MirrorCommand::Shutdown);
    }
}

/// Background task that applies mirror commands one at a time
async fn mirror_task(mirror: Arc<dyn LocalMirror>, mut rx: mpsc::UnboundedReceiver<MirrorCommand>) {
    let mut next = rx.recv().await;

    while let Some(cmd) = next.take() {
        match cmd {
            MirrorCommand::Save { player, ack } => {
                let mut latest = player;
                let mut acks: Vec<_> = ack.into_iter().collect();
                loop {
                    match rx.try_recv() {
                        Ok(MirrorCommand::Save { player, ack }) => {
                            latest = player;
                            acks.extend(ack);
                        }
                        Ok(other) => {
                            next = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                mirror.save(&latest).await;
                for ack in acks {
                    let _ = ack.send(());
                }
            }

            MirrorCommand::Load { response } => {
                let _ = response.send(mirror.load().await);
            }

            MirrorCommand::Shutdown => {
                info!("Mirror writer shutting down");
                break;
            }
        }

        if next.is_none() {
            next = rx.recv().await;
        }
    }

    debug!("Mirror writer stopped");
}


#[cfg(test)]
mod tests {
    use super::testing::MemoryMirror;
    use super::*;

    fn at_experience(experience: u64) -> Player {
        let mut player = Player::new("p1");
        player.experience = experience;
        player.resync_level()
    }

    fn written(mirror: &MemoryMirror) -> Vec<u64> {
        mirror
            .writes
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.experience)
            .collect()
    }

    #[tokio::test]
    async fn test_writes_apply_in_order() {
        let mirror = Arc::new(MemoryMirror::default());
        let handle = MirrorHandle::spawn(mirror.clone());

        handle.save_and_wait(at_experience(10)).await;
        handle.save_and_wait(at_experience(20)).await;
        handle.save_and_wait(at_experience(30)).await;

        assert_eq!(written(&mirror), vec![10, 20, 30]);
        assert_eq!(handle.load().await.unwrap().experience, 30);
    }

    #[tokio::test]
    async fn test_burst_of_saves_keeps_the_newest() {
        let mirror = Arc::new(MemoryMirror::default());
        let handle = MirrorHandle::spawn(mirror.clone());

        for experience in 1..=500 {
            handle.save(at_experience(experience));
        }
        handle.save_and_wait(at_experience(501)).await;

        let writes = written(&mirror);
        assert_eq!(writes.last(), Some(&501));
        assert!(writes.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(handle.load().await.unwrap().experience, 501);
    }

    #[tokio::test]
    async fn test_failed_writes_are_swallowed() {
        let mirror = Arc::new(MemoryMirror::failing());
        let handle = MirrorHandle::spawn(mirror.clone());

        handle.save_and_wait(at_experience(100)).await;
        assert!(handle.load().await.is_none());
        assert_eq!(mirror.write_count(), 0);
    }

    #[tokio::test]
    async fn test_handle_after_shutdown() {
        let mirror = Arc::new(MemoryMirror::default());
        let handle = MirrorHandle::spawn(mirror.clone());
        handle.shutdown().await;

        // neither call may hang or panic once the writer is gone
        handle.save_and_wait(at_experience(5)).await;
        handle.save(at_experience(6));
        assert!(handle.load().await.is_none());
    }
}
