//! PostgreSQL-backed player gateway.
//!
//! Expects the `players` table from `migrations/001_players.sql`. The row's
//! `slug` holds the identity-provider subject, `id` is the store's own key.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use log::{debug, info, warn};
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, PgPool, Row};

use duel_shared::{normalize_name, try_experience_to_level, Player, ProgressionError, StatMap};

use super::{GatewayError, IdentityHints, PersistOutcome, PlayerGateway, PlayerPatch, RemoteSession};
use crate::activity::{ActivityGuard, ActivitySink};

const PLAYER_COLUMNS: &str =
    "id, slug, name, level, experience, avatar_url, defeated_enemies, stats";

/// Read projection of a `players` row
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerRow {
    pub id: i64,
    pub slug: Option<String>,
    pub name: Option<String>,
    pub level: i32,
    pub experience: i64,
    pub avatar_url: Option<String>,
    pub defeated_enemies: Option<Vec<String>>,
    pub stats: Option<serde_json::Value>,
}

impl PlayerRow {
    fn from_row(r: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: r.try_get("id")?,
            slug: r.try_get("slug")?,
            name: r.try_get("name")?,
            level: r.try_get("level")?,
            experience: r.try_get("experience")?,
            avatar_url: r.try_get("avatar_url")?,
            defeated_enemies: r.try_get("defeated_enemies")?,
            stats: r.try_get("stats")?,
        })
    }

    /// Translate to the domain shape. The stored level is ignored in favour
    /// of the one derived from experience.
    pub fn into_player(self) -> Result<Player, ProgressionError> {
        let level = try_experience_to_level(self.experience)?;
        if level as i64 != self.level as i64 {
            debug!(
                "Row {} has level {} but {} experience implies {}",
                self.id, self.level, self.experience, level
            );
        }

        let mut player = Player::new(self.id.to_string());
        player.slug = self.slug;
        player.name = normalize_name(self.name);
        player.avatar_url = self.avatar_url;
        player.experience = self.experience as u64;
        player.level = level;
        player.defeated_enemies = self.defeated_enemies.unwrap_or_default().into_iter().collect();
        player.stats = parse_stats(self.id, self.stats);
        Ok(player)
    }

    fn into_patch(self) -> Result<PlayerPatch, ProgressionError> {
        let player = self.into_player()?;
        Ok(PlayerPatch {
            id: Some(player.id),
            slug: player.slug,
            name: Some(player.name),
            avatar_url: player.avatar_url,
            experience: Some(player.experience),
            defeated_enemies: Some(player.defeated_enemies),
            stats: Some(player.stats),
        })
    }
}

/// Parse the `stats` JSONB column, keeping only non-negative integer counters
fn parse_stats(row_id: i64, json: Option<serde_json::Value>) -> StatMap {
    let mut stats = StatMap::new();

    match json {
        Some(serde_json::Value::Object(map)) => {
            for (key, value) in map {
                match value.as_u64() {
                    Some(total) => {
                        stats.insert(key, total);
                    }
                    None => warn!("Ignoring non-counter stat '{}' on row {}", key, row_id),
                }
            }
        }
        Some(serde_json::Value::Null) | None => {}
        Some(other) => warn!("Row {} has malformed stats: {}", row_id, other),
    }

    stats
}

/// Progress write payload
#[derive(Debug, Clone, PartialEq, Eq)]
struct ProgressWrite {
    /// Numeric remote id, if the player's id is one
    id: Option<i64>,
    /// Slug to match, or to create the row under
    slug: String,
    name: String,
    avatar_url: Option<String>,
    experience: i64,
    level: i32,
    defeated_enemies: Vec<String>,
}

impl ProgressWrite {
    fn for_player(player: &Player) -> Result<Self, GatewayError> {
        let experience = i64::try_from(player.experience).map_err(|_| {
            GatewayError::Rejected(format!("experience {} out of range", player.experience))
        })?;

        Ok(Self {
            id: player.id.parse().ok(),
            slug: player.slug.clone().unwrap_or_else(|| player.id.clone()),
            name: player.name.clone(),
            avatar_url: player.avatar_url.clone(),
            experience,
            level: player.level as i32,
            defeated_enemies: player.defeated_enemies.iter().cloned().collect(),
        })
    }
}

/// The three places a progress write can land
#[async_trait]
trait ProgressTarget: Send + Sync {
    /// `false` when no row has this id
    async fn update_by_id(&self, write: &ProgressWrite, id: i64) -> Result<bool, GatewayError>;

    /// `false` when no row has the write's slug
    async fn update_by_slug(&self, write: &ProgressWrite) -> Result<bool, GatewayError>;

    async fn upsert_by_slug(&self, write: &ProgressWrite) -> Result<(), GatewayError>;
}

/// Numeric id first, then slug, then create the row under the slug
async fn write_progress(
    target: &dyn ProgressTarget,
    write: &ProgressWrite,
) -> Result<PersistOutcome, GatewayError> {
    if let Some(id) = write.id {
        if target.update_by_id(write, id).await? {
            return Ok(PersistOutcome::UpdatedById);
        }
    }
    if target.update_by_slug(write).await? {
        return Ok(PersistOutcome::UpdatedBySlug);
    }

    target.upsert_by_slug(write).await?;
    info!("Created remote progress row for {}", write.slug);
    Ok(PersistOutcome::Created)
}

// Stored progress only moves forward, whatever order writes arrive in
const PROGRESS_UPDATE: &str = "UPDATE players SET
        experience = GREATEST(experience, $1),
        level = GREATEST(level, $2),
        defeated_enemies = ARRAY(SELECT DISTINCT unnest(defeated_enemies || $3::text[])),
        updated_at = NOW()";

/// Gateway over a Postgres connection pool
#[derive(Clone)]
pub struct PostgresGateway {
    pool: PgPool,
    limit: i64,
    session: Arc<RwLock<Option<RemoteSession>>>,
    activity: Option<Arc<dyn ActivitySink>>,
}

impl PostgresGateway {
    /// Connect to the database
    pub async fn connect(url: &str, limit: i64) -> Result<Self, GatewayError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;

        Ok(Self::from_pool(pool, limit))
    }

    pub fn from_pool(pool: PgPool, limit: i64) -> Self {
        Self {
            pool,
            limit,
            session: Arc::new(RwLock::new(None)),
            activity: None,
        }
    }

    /// Report every remote call to `sink`
    pub fn with_activity(mut self, sink: Arc<dyn ActivitySink>) -> Self {
        self.activity = Some(sink);
        self
    }

    pub fn session(&self) -> Option<RemoteSession> {
        self.session.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set_session(&self, session: Option<RemoteSession>) {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = session;
    }

    pub fn sign_out(&self) {
        self.set_session(None);
    }

    async fn ensure_row(&self, identity: &IdentityHints) -> Result<PlayerRow, GatewayError> {
        // Hints only fill empty columns so profile edits survive re-login
        let sql = format!(
            "INSERT INTO players (slug, name, email, avatar_url)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (slug) DO UPDATE SET
                name = COALESCE(players.name, EXCLUDED.name),
                email = COALESCE(players.email, EXCLUDED.email),
                avatar_url = COALESCE(players.avatar_url, EXCLUDED.avatar_url),
                updated_at = NOW()
             RETURNING {}",
            PLAYER_COLUMNS
        );

        let row = sqlx::query(&sql)
            .bind(&identity.external_id)
            .bind(&identity.display_name)
            .bind(&identity.email)
            .bind(&identity.avatar_url)
            .fetch_one(&self.pool)
            .await?;

        Ok(PlayerRow::from_row(&row)?)
    }
}

#[async_trait]
impl ProgressTarget for PostgresGateway {
    async fn update_by_id(&self, write: &ProgressWrite, id: i64) -> Result<bool, GatewayError> {
        let sql = format!("{} WHERE id = $4", PROGRESS_UPDATE);
        let result = sqlx::query(&sql)
            .bind(write.experience)
            .bind(write.level)
            .bind(&write.defeated_enemies)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_by_slug(&self, write: &ProgressWrite) -> Result<bool, GatewayError> {
        let sql = format!("{} WHERE slug = $4", PROGRESS_UPDATE);
        let result = sqlx::query(&sql)
            .bind(write.experience)
            .bind(write.level)
            .bind(&write.defeated_enemies)
            .bind(&write.slug)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn upsert_by_slug(&self, write: &ProgressWrite) -> Result<(), GatewayError> {
        sqlx::query(
            "INSERT INTO players (slug, name, avatar_url, experience, level, defeated_enemies)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (slug) DO UPDATE SET
                experience = GREATEST(players.experience, EXCLUDED.experience),
                level = GREATEST(players.level, EXCLUDED.level),
                defeated_enemies = ARRAY(
                    SELECT DISTINCT unnest(players.defeated_enemies || EXCLUDED.defeated_enemies)
                ),
                updated_at = NOW()",
        )
        .bind(&write.slug)
        .bind(&write.name)
        .bind(&write.avatar_url)
        .bind(write.experience)
        .bind(write.level)
        .bind(&write.defeated_enemies)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl PlayerGateway for PostgresGateway {
    async fn fetch_all(&self) -> Result<Vec<Player>, GatewayError> {
        let _busy = ActivityGuard::begin(self.activity.as_ref());

        let sql = format!(
            "SELECT {} FROM players ORDER BY level DESC, experience DESC LIMIT $1",
            PLAYER_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(self.limit)
            .fetch_all(&self.pool)
            .await?;

        let mut players = Vec::with_capacity(rows.len());
        for r in &rows {
            let row = PlayerRow::from_row(r)?;
            let id = row.id;
            match row.into_player() {
                Ok(player) => players.push(player),
                Err(e) => warn!("Skipping player row {}: {}", id, e),
            }
        }

        debug!("Fetched {} players", players.len());
        Ok(players)
    }

    async fn ensure_record(&self, identity: &IdentityHints) -> Option<PlayerPatch> {
        let _busy = ActivityGuard::begin(self.activity.as_ref());

        if identity.external_id.trim().is_empty() {
            warn!("Refusing to ensure a player record without an external id");
            return None;
        }

        let row = match self.ensure_row(identity).await {
            Ok(row) => row,
            Err(e) => {
                warn!("Failed to ensure player record for {}: {}", identity.external_id, e);
                return None;
            }
        };

        match row.into_patch() {
            Ok(patch) => {
                self.set_session(Some(RemoteSession {
                    external_id: identity.external_id.clone(),
                }));
                info!("Player record ready for {}", identity.external_id);
                Some(patch)
            }
            Err(e) => {
                warn!("Player record for {} is invalid: {}", identity.external_id, e);
                None
            }
        }
    }

    async fn persist_progress(&self, player: &Player) -> Result<PersistOutcome, GatewayError> {
        let Some(session) = self.session() else {
            debug!("No remote session, skipping progress sync for {}", player.id);
            return Ok(PersistOutcome::Skipped);
        };
        if !player.matches(&session.external_id) {
            return Err(GatewayError::Rejected(format!(
                "session for {} cannot write player {}",
                session.external_id, player.id
            )));
        }

        let _busy = ActivityGuard::begin(self.activity.as_ref());
        let write = ProgressWrite::for_player(player)?;
        write_progress(self, &write).await
    }
}
