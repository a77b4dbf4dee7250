//! Built-in mechanic catalogue.
//!
//! Each genre has a pool of mechanics ordered by complexity. Learning
//! weights re-rank the pool; the catalogue itself never changes at runtime.

use serde::Serialize;

/// A reusable gameplay mechanic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Mechanic {
    pub name: &'static str,
    pub complexity: u8,
    pub genres: &'static [&'static str],
}

const CATALOG: &[Mechanic] = &[
    Mechanic { name: "variable_jump", complexity: 1, genres: &["platformer", "runner"] },
    Mechanic { name: "moving_platforms", complexity: 2, genres: &["platformer"] },
    Mechanic { name: "wall_cling", complexity: 2, genres: &["platformer"] },
    Mechanic { name: "collectible_trail", complexity: 1, genres: &["platformer", "runner", "casual"] },
    Mechanic { name: "checkpoint_flags", complexity: 1, genres: &["platformer"] },
    Mechanic { name: "gravity_flip", complexity: 3, genres: &["platformer", "puzzle"] },
    Mechanic { name: "lane_switching", complexity: 1, genres: &["runner"] },
    Mechanic { name: "speed_ramp", complexity: 1, genres: &["runner"] },
    Mechanic { name: "obstacle_patterns", complexity: 2, genres: &["runner", "platformer"] },
    Mechanic { name: "magnet_powerup", complexity: 2, genres: &["runner", "casual"] },
    Mechanic { name: "slide_under", complexity: 1, genres: &["runner"] },
    Mechanic { name: "tile_swap", complexity: 1, genres: &["puzzle"] },
    Mechanic { name: "match_three", complexity: 1, genres: &["puzzle", "casual"] },
    Mechanic { name: "chain_reaction", complexity: 2, genres: &["puzzle"] },
    Mechanic { name: "rotating_grid", complexity: 2, genres: &["puzzle"] },
    Mechanic { name: "move_limit", complexity: 1, genres: &["puzzle"] },
    Mechanic { name: "path_connect", complexity: 2, genres: &["puzzle", "casual"] },
    Mechanic { name: "auto_fire", complexity: 1, genres: &["shooter"] },
    Mechanic { name: "wave_spawner", complexity: 2, genres: &["shooter"] },
    Mechanic { name: "weapon_upgrades", complexity: 2, genres: &["shooter"] },
    Mechanic { name: "bullet_patterns", complexity: 3, genres: &["shooter"] },
    Mechanic { name: "shield_pickup", complexity: 1, genres: &["shooter", "runner"] },
    Mechanic { name: "tap_targets", complexity: 1, genres: &["casual"] },
    Mechanic { name: "timed_rounds", complexity: 1, genres: &["casual", "puzzle"] },
    Mechanic { name: "combo_meter", complexity: 2, genres: &["casual", "shooter"] },
    Mechanic { name: "drag_and_drop", complexity: 1, genres: &["casual"] },
];

/// Mechanics tagged with `genre`, simplest first; unknown genres get the casual pool
pub fn mechanics_for(genre: &str) -> Vec<Mechanic> {
    let genre = genre.to_lowercase();
    let mut pool: Vec<Mechanic> = CATALOG
        .iter()
        .filter(|m| m.genres.contains(&genre.as_str()))
        .copied()
        .collect();
    if pool.is_empty() {
        pool = CATALOG
            .iter()
            .filter(|m| m.genres.contains(&"casual"))
            .copied()
            .collect();
    }
    pool.sort_by_key(|m| m.complexity);
    pool
}

/// Names of every mechanic available to `genre`
pub fn mechanic_pool(genre: &str) -> Vec<String> {
    mechanics_for(genre)
        .into_iter()
        .map(|m| m.name.to_string())
        .collect()
}

pub fn all_mechanics() -> &'static [Mechanic] {
    CATALOG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_known_genre_has_enough_mechanics() {
        for genre in ["platformer", "runner", "puzzle", "shooter", "casual"] {
            assert!(mechanics_for(genre).len() >= 5, "genre {}", genre);
        }
    }

    #[test]
    fn test_pool_sorted_by_complexity() {
        let pool = mechanics_for("puzzle");
        assert!(pool.windows(2).all(|w| w[0].complexity <= w[1].complexity));
    }

    #[test]
    fn test_unknown_genre_falls_back_to_casual() {
        assert_eq!(mechanic_pool("rhythm"), mechanic_pool("casual"));
    }
}
