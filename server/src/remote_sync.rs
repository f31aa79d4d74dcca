//! Ordered background writer for remote progress.
//!
//! Progress persists run one at a time in the order they were queued. A run
//! of queued persists for the same player collapses into its newest one, so
//! an older record can never land after a newer one.

use std::sync::Arc;

use duel_shared::Player;
use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot};

use crate::gateway::PlayerGateway;

/// Commands sent to the remote sync task
#[derive(Debug)]
pub enum SyncCommand {
    Persist(Box<Player>),
    /// Fires once every persist queued before it has been attempted
    Flush { ack: oneshot::Sender<()> },
    Shutdown,
}

/// Handle for queueing remote progress writes
#[derive(Clone)]
pub struct SyncHandle {
    sender: mpsc::UnboundedSender<SyncCommand>,
}

impl SyncHandle {
    /// Start the sync task for `gateway`. Must be called inside a tokio runtime.
    pub fn spawn(gateway: Arc<dyn PlayerGateway>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(sync_task(gateway, rx));
        debug!("Remote sync task started");
        Self { sender: tx }
    }

    /// Queue a progress write (fire and forget)
    pub fn persist(&self, player: Player) {
        if self.sender.send(SyncCommand::Persist(Box::new(player))).is_err() {
            warn!("Remote sync task is gone, progress not queued");
        }
    }

    /// Wait until every queued write has been attempted
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(SyncCommand::Flush { ack: tx }).is_err() {
            return;
        }
        let _ = rx.await;
    }

    pub async fn shutdown(&self) {
        let _ = self.sender.send(SyncCommand::Shutdown);
    }
}

async fn sync_task(gateway: Arc<dyn PlayerGateway>, mut rx: mpsc::UnboundedReceiver<SyncCommand>) {
    let mut next = rx.recv().await;

    while let Some(cmd) = next.take() {
        match cmd {
            SyncCommand::Persist(player) => {
                let mut latest = player;
                loop {
                    match rx.try_recv() {
                        Ok(SyncCommand::Persist(newer)) if newer.id == latest.id => latest = newer,
                        Ok(other) => {
                            next = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                match gateway.persist_progress(&latest).await {
                    Ok(outcome) => debug!("Progress sync for {}: {:?}", latest.id, outcome),
                    Err(e) => warn!("Progress sync for {} failed: {}", latest.id, e),
                }
            }

            SyncCommand::Flush { ack } => {
                let _ = ack.send(());
            }

            SyncCommand::Shutdown => {
                info!("Remote sync shutting down");
                break;
            }
        }

        if next.is_none() {
            next = rx.recv().await;
        }
    }

    debug!("Remote sync stopped");
}
