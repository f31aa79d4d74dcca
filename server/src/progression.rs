//! The signed-in player's progression.
//!
//! Battle outcome → reducer → local mirror (awaited) → remote persist
//! (background, ordered, best effort) → player cache.

use std::sync::Arc;

use log::{debug, info};
use tokio::sync::Mutex;

use duel_shared::{apply, Player, ProgressionAction, ProgressionError};

use crate::cache::PlayerCache;
use crate::gateway::{IdentityHints, PlayerGateway};
use crate::persistence::MirrorHandle;
use crate::remote_sync::SyncHandle;

pub struct ProgressionService {
    current: Mutex<Option<Player>>,
    mirror: MirrorHandle,
    gateway: Arc<dyn PlayerGateway>,
    sync: SyncHandle,
    cache: PlayerCache,
}

impl ProgressionService {
    pub fn new(mirror: MirrorHandle, gateway: Arc<dyn PlayerGateway>, cache: PlayerCache) -> Self {
        Self {
            current: Mutex::new(None),
            mirror,
            sync: SyncHandle::spawn(Arc::clone(&gateway)),
            gateway,
            cache,
        }
    }

    /// Seed from the local snapshot, if any
    pub async fn start(&self) -> Option<Player> {
        let snapshot = self.mirror.load().await;
        match &snapshot {
            Some(player) => {
                info!("Resuming {} at level {}", player.id, player.level);
                self.cache.upsert_local(player.clone());
            }
            None => debug!("No local player snapshot"),
        }

        *self.current.lock().await = snapshot.clone();
        snapshot
    }

    pub async fn current(&self) -> Option<Player> {
        self.current.lock().await.clone()
    }

    pub fn cache(&self) -> &PlayerCache {
        &self.cache
    }

    /// Reconcile the local player with the remote record for `identity`.
    ///
    /// A local snapshot that belongs to a different identity is discarded.
    /// Without a remote record the local player is kept as is (or created).
    pub async fn sign_in(&self, identity: &IdentityHints) -> Player {
        let remote = self.gateway.ensure_record(identity).await;
        let mut current = self.current.lock().await;

        let local = current
            .clone()
            .filter(|p| p.matches(&identity.external_id))
            .unwrap_or_else(|| {
                let mut fresh = Player::new(identity.external_id.clone());
                fresh.name = duel_shared::normalize_name(identity.display_name.clone());
                fresh.avatar_url = identity.avatar_url.clone();
                fresh
            });

        let had_remote = remote.is_some();
        let player = match remote {
            Some(patch) => patch.merge_into(&local),
            None => {
                debug!("No remote record for {}, staying local", identity.external_id);
                local
            }
        };

        self.cache.upsert_local(player.clone());
        self.mirror.save_and_wait(player.clone()).await;
        // push any progress the remote missed while we were offline
        if had_remote {
            self.sync_remote(player.clone());
        }
        *current = Some(player.clone());

        player
    }

    /// Apply `action` to the current player.
    ///
    /// The local snapshot is written before this returns; the remote write
    /// runs in the background and its failures are only logged.
    pub async fn dispatch(&self, action: ProgressionAction) -> Result<Player, ServiceError> {
        let mut current = self.current.lock().await;

        let next = match (current.as_ref(), &action) {
            (Some(player), _) => apply(player, &action)?,
            (None, ProgressionAction::Hydrate(snapshot)) => apply(snapshot, &action)?,
            (None, _) => return Err(ServiceError::NoPlayer),
        };

        self.cache.upsert_local(next.clone());
        self.mirror.save_and_wait(next.clone()).await;
        // queued under the lock so remote writes follow dispatch order
        if action.changes_progress() {
            self.sync_remote(next.clone());
        }
        *current = Some(next.clone());

        Ok(next)
    }

    /// Wait for queued remote writes to be attempted
    pub async fn flush_remote(&self) {
        self.sync.flush().await;
    }

    /// Fire-and-forget remote persist, ordered after earlier ones
    fn sync_remote(&self, player: Player) {
        self.sync.persist(player);
    }
}

/// Progression service errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// No player has been loaded or signed in yet
    NoPlayer,
    Progression(ProgressionError),
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoPlayer => write!(f, "No player is signed in"),
            Self::Progression(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<ProgressionError> for ServiceError {
    fn from(e: ProgressionError) -> Self {
        Self::Progression(e)
    }
}
