//! Experience curve and stat accumulation.
//!
//! Advancing from level `L` to `L + 1` costs `100 * L` experience, so the
//! cumulative cost of reaching level `L` is `50 * L * (L - 1)`. Levels stop
//! at [`MAX_LEVEL`] regardless of how much experience is left over.

use crate::error::ProgressionError;
use crate::player::{Player, StatMap};

/// Hard level ceiling
pub const MAX_LEVEL: u32 = 99;

/// Per-level multiplier of the advancement cost
pub const BASE_LEVEL_COST: u64 = 100;

/// Experience needed to advance from `level` to `level + 1`
pub fn level_cost(level: u32) -> u64 {
    BASE_LEVEL_COST * level as u64
}

/// Convert an experience total into a level in `[1, MAX_LEVEL]`
pub fn experience_to_level(total_experience: u64) -> u32 {
    let mut level = 1;
    let mut remaining = total_experience;

    while level < MAX_LEVEL && remaining >= level_cost(level) {
        remaining -= level_cost(level);
        level += 1;
    }

    level
}

/// Same as [`experience_to_level`] for values from untrusted sources, where
/// a negative total is possible and must be rejected.
pub fn try_experience_to_level(total_experience: i64) -> Result<u32, ProgressionError> {
    let total = u64::try_from(total_experience).map_err(|_| {
        ProgressionError::invalid(format!(
            "experience must be non-negative, got {}",
            total_experience
        ))
    })?;
    Ok(experience_to_level(total))
}

/// Cumulative experience required to reach `level` (clamped to `[1, MAX_LEVEL]`)
pub fn experience_for_level(level: u32) -> u64 {
    let level = level.clamp(1, MAX_LEVEL) as u64;
    BASE_LEVEL_COST * level * (level - 1) / 2
}

/// Where a player stands inside their current level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelProgress {
    pub level: u32,
    /// Experience earned since reaching `level`
    pub into_level: u64,
    /// Experience still needed for the next level; `None` at the cap
    pub to_next: Option<u64>,
}

pub fn level_progress(total_experience: u64) -> LevelProgress {
    let level = experience_to_level(total_experience);
    let into_level = total_experience - experience_for_level(level);
    let to_next = if level >= MAX_LEVEL {
        None
    } else {
        Some(level_cost(level) - into_level)
    };

    LevelProgress { level, into_level, to_next }
}

/// Grant `amount` experience for beating `enemy_id`.
///
/// Experience is always granted, even for an enemy that was already beaten;
/// the defeated set only records the id once.
pub fn award_experience(
    player: &Player,
    enemy_id: &str,
    amount: u64,
) -> Result<Player, ProgressionError> {
    if amount == 0 {
        return Err(ProgressionError::invalid("experience award must be positive"));
    }
    if enemy_id.trim().is_empty() {
        return Err(ProgressionError::invalid("enemy id must not be empty"));
    }

    let mut next = player.clone();
    next.experience = next.experience.saturating_add(amount);
    next.level = experience_to_level(next.experience);
    next.defeated_enemies.insert(enemy_id.to_string());

    Ok(next)
}

/// Add every counter in `increments` onto `current`.
/// Keys absent from `increments` keep their value.
pub fn merge_stats(current: &StatMap, increments: &StatMap) -> StatMap {
    let mut merged = current.clone();
    for (key, value) in increments {
        let total = merged.entry(key.clone()).or_insert(0);
        *total = total.saturating_add(*value);
    }
    merged
}

/// Fold an incoming copy of the same player into `current` without losing
/// progress. Identity stays with `current`. Profile and campaign position
/// come from `incoming`; experience
/// takes the larger side, defeated enemies and completed levels are unioned
/// and every stat keeps its larger total.
pub fn reconcile_progress(current: &Player, incoming: &Player) -> Player {
    let mut merged = incoming.clone();
    merged.id = current.id.clone();
    if merged.slug.is_none() {
        merged.slug = current.slug.clone();
    }
    merged.experience = current.experience.max(incoming.experience);
    merged
        .defeated_enemies
        .extend(current.defeated_enemies.iter().cloned());
    merged
        .progress
        .completed_level_ids
        .extend(current.progress.completed_level_ids.iter().cloned());
    for (key, value) in &current.stats {
        let total = merged.stats.entry(key.clone()).or_insert(0);
        *total = (*total).max(*value);
    }
    merged.resync_level()
}
