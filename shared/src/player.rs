//! Player record shared by every layer.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Deserializer, Serialize};

use crate::progression::experience_to_level;

/// Display name used when a player has none
pub const DEFAULT_PLAYER_NAME: &str = "Player";

/// Named counters, e.g. `battles_won` or `damage_dealt`
pub type StatMap = BTreeMap<String, u64>;

/// Campaign position: the level being played and every level cleared so far.
/// Carried through merges untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CampaignProgress {
    pub current_level_id: Option<String>,
    pub completed_level_ids: BTreeSet<String>,
}

/// A player and their progression.
///
/// `level` is derived from `experience` and must only change through the
/// progression functions (`award_experience`, `resync_level`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    /// Identity-provider subject
    pub id: String,
    /// Secondary key when the remote primary key differs from `id`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default = "default_name", deserialize_with = "name_or_placeholder")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default = "default_level")]
    pub level: u32,
    #[serde(default)]
    pub experience: u64,
    #[serde(default)]
    pub defeated_enemies: BTreeSet<String>,
    #[serde(default)]
    pub stats: StatMap,
    #[serde(default)]
    pub characters: Vec<serde_json::Value>,
    #[serde(default)]
    pub inventory: Vec<serde_json::Value>,
    #[serde(default)]
    pub progress: CampaignProgress,
}

fn default_name() -> String {
    DEFAULT_PLAYER_NAME.to_string()
}

fn default_level() -> u32 {
    1
}

fn name_or_placeholder<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let name: Option<String> = Option::deserialize(deserializer)?;
    Ok(normalize_name(name))
}

/// Trim a display name, falling back to the placeholder when blank
pub fn normalize_name(name: Option<String>) -> String {
    match name {
        Some(n) if !n.trim().is_empty() => n.trim().to_string(),
        _ => default_name(),
    }
}

impl Player {
    /// Fresh level 1 player
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            slug: None,
            name: default_name(),
            avatar_url: None,
            level: 1,
            experience: 0,
            defeated_enemies: BTreeSet::new(),
            stats: StatMap::new(),
            characters: Vec::new(),
            inventory: Vec::new(),
            progress: CampaignProgress::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = normalize_name(Some(name.into()));
        self
    }

    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }

    /// True if `key` is this player's id or slug
    pub fn matches(&self, key: &str) -> bool {
        self.id == key || self.slug.as_deref() == Some(key)
    }

    pub fn has_defeated(&self, enemy_id: &str) -> bool {
        self.defeated_enemies.contains(enemy_id)
    }

    /// Recompute `level` from `experience`. Used on records that came from
    /// outside the progression functions (remote rows, old snapshots).
    pub fn resync_level(mut self) -> Self {
        self.level = experience_to_level(self.experience);
        self
    }
}

/// Find a player by id, then by slug.
///
/// Ids win over slugs: if one player's slug equals another player's id, the
/// id match is returned.
pub fn find_player<'a>(players: &'a [Player], key: &str) -> Option<&'a Player> {
    players
        .iter()
        .find(|p| p.id == key)
        .or_else(|| players.iter().find(|p| p.slug.as_deref() == Some(key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_fall_back_to_defaults() {
        let player: Player = serde_json::from_str(r#"{"id":"auth0|abc"}"#).unwrap();
        assert_eq!(player.name, DEFAULT_PLAYER_NAME);
        assert_eq!(player.level, 1);
        assert_eq!(player.experience, 0);
        assert!(player.defeated_enemies.is_empty());
        assert!(player.progress.completed_level_ids.is_empty());
    }

    #[test]
    fn test_blank_name_becomes_placeholder() {
        let player: Player = serde_json::from_str(r#"{"id":"x","name":"   "}"#).unwrap();
        assert_eq!(player.name, DEFAULT_PLAYER_NAME);

        let player: Player = serde_json::from_str(r#"{"id":"x","name":null}"#).unwrap();
        assert_eq!(player.name, DEFAULT_PLAYER_NAME);
    }

    #[test]
    fn test_snapshot_uses_camel_case_keys() {
        let mut player = Player::new("p1").with_name("Ada");
        player.avatar_url = Some("https://cdn.example.com/a.png".to_string());
        player.defeated_enemies.insert("boss".to_string());

        let json = serde_json::to_value(&player).unwrap();
        assert_eq!(json["avatarUrl"], "https://cdn.example.com/a.png");
        assert_eq!(json["defeatedEnemies"], serde_json::json!(["boss"]));
        assert!(json.get("slug").is_none());
    }

    #[test]
    fn test_structural_fields_survive_round_trip() {
        let raw = r#"{
            "id": "p1",
            "characters": [{"kind": "wizard", "skin": 3}],
            "inventory": [{"item": "potion", "qty": 2}],
            "progress": {"currentLevelId": "lvl-2", "completedLevelIds": ["lvl-1"]}
        }"#;
        let player: Player = serde_json::from_str(raw).unwrap();
        let back: Player = serde_json::from_value(serde_json::to_value(&player).unwrap()).unwrap();
        assert_eq!(back, player);
        assert_eq!(back.characters[0]["kind"], "wizard");
        assert_eq!(back.progress.current_level_id.as_deref(), Some("lvl-2"));
    }

    #[test]
    fn test_find_player_prefers_id_over_slug() {
        let players = vec![
            Player::new("42").with_slug("github|7"),
            Player::new("github|7"),
        ];
        assert_eq!(find_player(&players, "github|7").unwrap().id, "github|7");
        assert_eq!(find_player(&players, "42").unwrap().id, "42");
        assert!(find_player(&players, "nobody").is_none());
    }

    #[test]
    fn test_find_player_by_slug() {
        let players = vec![Player::new("17").with_slug("google-oauth2|99")];
        assert_eq!(find_player(&players, "google-oauth2|99").unwrap().id, "17");
    }

    #[test]
    fn test_resync_level_repairs_mismatch() {
        let mut player = Player::new("p");
        player.experience = 350;
        player.level = 7;
        assert_eq!(player.resync_level().level, 3);
    }
}
