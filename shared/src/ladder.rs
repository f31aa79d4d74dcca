//! Ladder ordering.

use std::cmp::Ordering;

use crate::player::{find_player, Player};

/// Ladder comparison: level desc, experience desc, name asc
pub fn ladder_order(a: &Player, b: &Player) -> Ordering {
    b.level
        .cmp(&a.level)
        .then_with(|| b.experience.cmp(&a.experience))
        .then_with(|| a.name.cmp(&b.name))
}

/// Ranked copy of `players`. The sort is stable, so full ties keep their
/// input order, and the input slice is left alone.
pub fn sort_for_ladder(players: &[Player]) -> Vec<Player> {
    let mut ladder = players.to_vec();
    ladder.sort_by(ladder_order);
    ladder
}

/// First `n` ladder entries, or the whole ladder if it is shorter
pub fn top_n(players: &[Player], n: usize) -> Vec<Player> {
    let mut ladder = sort_for_ladder(players);
    ladder.truncate(n);
    ladder
}

/// 1-based ladder position of the player with id or slug `key`
pub fn rank_of(players: &[Player], key: &str) -> Option<usize> {
    let target = find_player(players, key)?;
    sort_for_ladder(players)
        .iter()
        .position(|p| p.id == target.id)
        .map(|index| index + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(id: &str, name: &str, level: u32, experience: u64) -> Player {
        let mut p = Player::new(id).with_name(name);
        p.level = level;
        p.experience = experience;
        p
    }

    fn ids(players: &[Player]) -> Vec<&str> {
        players.iter().map(|p| p.id.as_str()).collect()
    }

    #[test]
    fn test_level_then_experience() {
        let players = vec![
            player("a", "A", 2, 10),
            player("b", "B", 3, 5),
            player("c", "C", 3, 20),
        ];
        let ladder = sort_for_ladder(&players);
        assert_eq!(ids(&ladder), vec!["c", "b", "a"]);

        // input order preserved
        assert_eq!(ids(&players), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_name_breaks_ties() {
        let players = vec![
            player("1", "zed", 5, 1000),
            player("2", "amy", 5, 1000),
            player("3", "max", 5, 1000),
        ];
        assert_eq!(ids(&sort_for_ladder(&players)), vec!["2", "3", "1"]);
    }

    #[test]
    fn test_full_ties_keep_input_order() {
        let players = vec![
            player("first", "Same", 4, 700),
            player("second", "Same", 4, 700),
            player("top", "Same", 9, 5000),
            player("third", "Same", 4, 700),
        ];
        assert_eq!(
            ids(&sort_for_ladder(&players)),
            vec!["top", "first", "second", "third"]
        );
    }

    #[test]
    fn test_top_n() {
        let players = vec![
            player("a", "A", 1, 0),
            player("b", "B", 4, 650),
            player("c", "C", 2, 150),
        ];
        assert_eq!(ids(&top_n(&players, 2)), vec!["b", "c"]);
        assert_eq!(top_n(&players, 10).len(), 3);
        assert!(top_n(&players, 0).is_empty());
        assert!(top_n(&[], 5).is_empty());
    }

    #[test]
    fn test_rank_of_accepts_slug() {
        let players = vec![
            player("1", "A", 1, 0),
            player("2", "B", 3, 400).with_slug("github|b"),
        ];
        assert_eq!(rank_of(&players, "github|b"), Some(1));
        assert_eq!(rank_of(&players, "1"), Some(2));
        assert_eq!(rank_of(&players, "missing"), None);
    }
}
