//! Remote player gateway.
//!
//! The remote store owns the shared player collection and each player's
//! progress record. It can be missing, unreachable or rejecting writes at
//! any time, so every caller treats its errors as recoverable.

mod postgres;

pub use postgres::{PlayerRow, PostgresGateway};

use std::collections::BTreeSet;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use duel_shared::{ladder_order, Player, StatMap};

/// What the identity provider told us about the signed-in user
#[derive(Debug, Clone, Default)]
pub struct IdentityHints {
    /// Identity-provider subject, stored remotely as the row slug
    pub external_id: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
}

/// An authenticated remote session. Progress writes are skipped without one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSession {
    pub external_id: String,
}

/// Partial player as returned by `ensure_record`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerPatch {
    pub id: Option<String>,
    pub slug: Option<String>,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub experience: Option<u64>,
    pub defeated_enemies: Option<BTreeSet<String>>,
    pub stats: Option<StatMap>,
}

impl PlayerPatch {
    /// Reconcile a remote record with the local player.
    ///
    /// Identity and profile fields come from the remote record. Progress
    /// never goes backwards: experience takes the larger side, defeated
    /// enemies are unioned and each stat keeps its larger total.
    pub fn merge_into(self, local: &Player) -> Player {
        let mut merged = local.clone();

        if let Some(id) = self.id {
            merged.id = id;
        }
        if self.slug.is_some() {
            merged.slug = self.slug;
        }
        if let Some(name) = self.name {
            merged.name = duel_shared::normalize_name(Some(name));
        }
        if self.avatar_url.is_some() {
            merged.avatar_url = self.avatar_url;
        }
        if let Some(experience) = self.experience {
            merged.experience = merged.experience.max(experience);
        }
        if let Some(defeated) = self.defeated_enemies {
            merged.defeated_enemies.extend(defeated);
        }
        if let Some(stats) = self.stats {
            for (key, remote) in stats {
                let total = merged.stats.entry(key).or_insert(0);
                *total = (*total).max(remote);
            }
        }

        merged.resync_level()
    }
}

/// Which write path a progress persist ended up taking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// No authenticated session; nothing was written
    Skipped,
    UpdatedById,
    UpdatedBySlug,
    /// No row matched, a new one was upserted by slug
    Created,
    /// Kept in the in-memory fallback store
    StoredLocally,
}

#[async_trait]
pub trait PlayerGateway: Send + Sync {
    /// Ladder summaries, bounded by the gateway's limit. An empty store is
    /// an empty vector, not an error.
    async fn fetch_all(&self) -> Result<Vec<Player>, GatewayError>;

    /// Get-or-create the record for an external identity. `None` when the
    /// remote store is unreachable or not configured.
    async fn ensure_record(&self, identity: &IdentityHints) -> Option<PlayerPatch>;

    /// Best-effort write of experience, level and defeated enemies.
    /// Returns `Ok(PersistOutcome::Skipped)` without a session.
    async fn persist_progress(&self, player: &Player) -> Result<PersistOutcome, GatewayError>;
}

/// Remote gateway errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    NotConfigured,
    /// Transport failure: connection refused, timeout, pool closed
    Unavailable(String),
    /// The store refused the operation (constraint or policy)
    Rejected(String),
    Database(String),
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotConfigured => write!(f, "Remote player store is not configured"),
            Self::Unavailable(e) => write!(f, "Remote player store unavailable: {}", e),
            Self::Rejected(e) => write!(f, "Remote player store rejected the request: {}", e),
            Self::Database(e) => write!(f, "Database error: {}", e),
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<sqlx::Error> for GatewayError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Self::Unavailable(e.to_string()),
            sqlx::Error::Database(db) => Self::Rejected(db.message().to_string()),
            other => Self::Database(other.to_string()),
        }
    }
}

/// In-memory stand-in used when no remote store is configured or reachable.
/// Players only live as long as the process.
#[derive(Debug, Default)]
pub struct LocalOnlyGateway {
    players: RwLock<Vec<Player>>,
    limit: Option<usize>,
}

impl LocalOnlyGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_players(players: Vec<Player>) -> Self {
        Self {
            players: RwLock::new(players),
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[async_trait]
impl PlayerGateway for LocalOnlyGateway {
    async fn fetch_all(&self) -> Result<Vec<Player>, GatewayError> {
        let mut players = self
            .players
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(limit) = self.limit {
            players.sort_by(ladder_order);
            players.truncate(limit);
        }
        Ok(players)
    }

    async fn ensure_record(&self, _identity: &IdentityHints) -> Option<PlayerPatch> {
        None
    }

    async fn persist_progress(&self, player: &Player) -> Result<PersistOutcome, GatewayError> {
        let mut players = self.players.write().unwrap_or_else(PoisonError::into_inner);
        match players.iter_mut().find(|p| p.id == player.id) {
            Some(existing) => {
                existing.experience = player.experience;
                existing.level = player.level;
                existing.defeated_enemies = player.defeated_enemies.clone();
            }
            None => players.push(player.clone()),
        }
        Ok(PersistOutcome::StoredLocally)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_adopts_remote_identity() {
        let local = Player::new("github|7").with_name("Local");
        let patch = PlayerPatch {
            id: Some("17".to_string()),
            slug: Some("github|7".to_string()),
            name: Some("Remote".to_string()),
            ..Default::default()
        };

        let merged = patch.merge_into(&local);
        assert_eq!(merged.id, "17");
        assert!(merged.matches("github|7"));
        assert_eq!(merged.name, "Remote");
    }

    #[test]
    fn test_patch_never_loses_progress() {
        let mut local = Player::new("p");
        local.experience = 650;
        local.defeated_enemies.insert("goblin".to_string());
        local.stats.insert("battles_won".to_string(), 5);

        let patch = PlayerPatch {
            experience: Some(120),
            defeated_enemies: Some(["boss".to_string()].into_iter().collect()),
            stats: Some([("battles_won".to_string(), 2), ("damage_dealt".to_string(), 90)]
                .into_iter()
                .collect()),
            ..Default::default()
        };

        let merged = patch.merge_into(&local);
        assert_eq!(merged.experience, 650);
        assert_eq!(merged.level, 4);
        assert_eq!(merged.defeated_enemies.len(), 2);
        assert_eq!(merged.stats["battles_won"], 5);
        assert_eq!(merged.stats["damage_dealt"], 90);
    }

    #[test]
    fn test_sqlx_errors_are_classified() {
        assert!(matches!(
            GatewayError::from(sqlx::Error::PoolTimedOut),
            GatewayError::Unavailable(_)
        ));
        assert!(matches!(
            GatewayError::from(sqlx::Error::RowNotFound),
            GatewayError::Database(_)
        ));
    }

    #[tokio::test]
    async fn test_local_only_gateway_degrades_quietly() {
        let gateway = LocalOnlyGateway::new();
        assert!(gateway.fetch_all().await.unwrap().is_empty());
        assert!(gateway
            .ensure_record(&IdentityHints {
                external_id: "github|1".to_string(),
                ..Default::default()
            })
            .await
            .is_none());

        let mut player = Player::new("p1");
        player.experience = 100;
        player.level = 2;
        assert_eq!(
            gateway.persist_progress(&player).await.unwrap(),
            PersistOutcome::StoredLocally
        );

        player.experience = 300;
        player.level = 3;
        gateway.persist_progress(&player).await.unwrap();

        let players = gateway.fetch_all().await.unwrap();
        assert_eq!(players.len(), 1);
        assert_eq!(players[0].level, 3);
    }

    #[tokio::test]
    async fn test_local_only_limit_keeps_ladder_top() {
        let mut low = Player::new("low");
        low.level = 1;
        let mut high = Player::new("high");
        high.level = 5;
        let gateway = LocalOnlyGateway::with_players(vec![low, high]).with_limit(1);

        let players = gateway.fetch_all().await.unwrap();
        assert_eq!(players.len(), 1);
        assert_eq!(players[0].id, "high");
    }
}
