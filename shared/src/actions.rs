//! Progression state transitions.
//!
//! Every change to the signed-in player goes through [`apply`], which maps a
//! tagged action onto a new `Player` value.

use serde::{Deserialize, Serialize};

use crate::error::ProgressionError;
use crate::player::{normalize_name, Player, StatMap};
use crate::progression::{award_experience, merge_stats, reconcile_progress};

/// Result of a finished battle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BattleOutcome {
    pub enemy_id: String,
    pub experience: u64,
    #[serde(default)]
    pub stats: StatMap,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressionAction {
    /// Load a snapshot. A snapshot of the current player is reconciled
    /// with it, any other player replaces it.
    Hydrate(Player),
    AwardExperience { enemy_id: String, amount: u64 },
    RecordStats(StatMap),
    /// Award plus stat increments in one step
    RecordBattle(BattleOutcome),
    SetCurrentLevel(String),
    CompleteLevel(String),
    /// `None` leaves the field as it is
    UpdateProfile {
        name: Option<String>,
        avatar_url: Option<String>,
    },
}

impl ProgressionAction {
    /// True if the action can change experience, level or defeated enemies
    pub fn changes_progress(&self) -> bool {
        matches!(
            self,
            Self::AwardExperience { .. } | Self::RecordBattle(_) | Self::Hydrate(_)
        )
    }
}

pub fn apply(player: &Player, action: &ProgressionAction) -> Result<Player, ProgressionError> {
    match action {
        ProgressionAction::Hydrate(snapshot) => {
            let same_player = player.matches(&snapshot.id)
                || snapshot.slug.as_deref().is_some_and(|slug| player.matches(slug));
            if same_player {
                Ok(reconcile_progress(player, snapshot))
            } else {
                Ok(snapshot.clone().resync_level())
            }
        }

        ProgressionAction::AwardExperience { enemy_id, amount } => {
            award_experience(player, enemy_id, *amount)
        }

        ProgressionAction::RecordStats(increments) => {
            let mut next = player.clone();
            next.stats = merge_stats(&player.stats, increments);
            Ok(next)
        }

        ProgressionAction::RecordBattle(outcome) => {
            let mut next = award_experience(player, &outcome.enemy_id, outcome.experience)?;
            next.stats = merge_stats(&next.stats, &outcome.stats);
            Ok(next)
        }

        ProgressionAction::SetCurrentLevel(level_id) => {
            let mut next = player.clone();
            next.progress.current_level_id = Some(level_id.clone());
            Ok(next)
        }

        ProgressionAction::CompleteLevel(level_id) => {
            let mut next = player.clone();
            next.progress.completed_level_ids.insert(level_id.clone());
            Ok(next)
        }

        ProgressionAction::UpdateProfile { name, avatar_url } => {
            let mut next = player.clone();
            if let Some(name) = name {
                next.name = normalize_name(Some(name.clone()));
            }
            if let Some(url) = avatar_url {
                if url.trim().is_empty() {
                    return Err(ProgressionError::invalid("avatar url must not be empty"));
                }
                next.avatar_url = Some(url.clone());
            }
            Ok(next)
        }
    }
}
