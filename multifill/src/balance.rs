use hashbrown::HashMap;
use log::debug;
use multifill_game::{Item, LocationId, Multiworld, PlayerId};
use rand::distributions::WeightedIndex;
use rand::prelude::Distribution;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::VecDeque;

/// Round-robin allocation of `total` slots across buckets, each capped at
/// its bucket's size. Used to compute the equitable per-player share of
/// early fill candidates.
pub(crate) fn balanced_allocation(bucket_sizes: &[usize], total: usize) -> Vec<usize> {
    let mut shares = vec![0usize; bucket_sizes.len()];
    let mut handed_out = 0;
    while handed_out < total {
        let before = handed_out;
        for (i, &cap) in bucket_sizes.iter().enumerate() {
            if handed_out == total {
                break;
            }
            if shares[i] < cap {
                shares[i] += 1;
                handed_out += 1;
            }
        }
        if handed_out == before {
            break;
        }
    }
    shares
}

/// Shuffle the fill location queue, biased so each player's locations are
/// spread fairly through the early portion. At factor 0.0 this is a plain
/// shuffle; at 1.0 the first `progression_count` slots draw each player's
/// locations in proportion to an equal split rather than to that player's
/// share of the total location count. Large worlds otherwise dominate the
/// early queue and soak up most progression.
pub fn balanced_shuffle<R: Rng>(
    multiworld: &Multiworld,
    mut locations: Vec<LocationId>,
    item_pool: &[Item],
    factor: f64,
    rng: &mut R,
) -> Vec<LocationId> {
    locations.shuffle(rng);
    let progression_count = item_pool
        .iter()
        .filter(|item| item.flags.is_progression())
        .count();
    if factor == 0.0 || progression_count == 0 {
        return locations;
    }

    let mut buckets: HashMap<PlayerId, VecDeque<LocationId>> = HashMap::new();
    for &loc in &locations {
        buckets
            .entry(multiworld.locations[loc].player)
            .or_default()
            .push_back(loc);
    }
    let mut players: Vec<PlayerId> = buckets.keys().copied().collect();
    players.sort_unstable();
    players.shuffle(rng);

    let total = locations.len() as f64;
    let bucket_sizes: Vec<usize> = players.iter().map(|p| buckets[p].len()).collect();
    let balanced = balanced_allocation(&bucket_sizes, progression_count);

    // Per-player weight for the early draws: interpolate between that
    // player's natural share of a uniform shuffle and their equitable share.
    let mut weights: Vec<f64> = players
        .iter()
        .zip(&balanced)
        .map(|(p, &share)| {
            let expected_random = buckets[p].len() as f64 / total * progression_count as f64;
            expected_random + (share as f64 - expected_random) * factor
        })
        .collect();
    debug!(
        "balanced shuffle: factor {factor}, {progression_count} progression, weights {weights:?}"
    );

    let mut result: Vec<LocationId> = Vec::with_capacity(locations.len());
    while !players.is_empty() {
        let idx = match WeightedIndex::new(&weights) {
            Ok(dist) => dist.sample(rng),
            // All remaining weights are zero (or negative rounding residue):
            // drain buckets in order.
            Err(_) => 0,
        };
        let bucket = buckets.get_mut(&players[idx]).unwrap();
        result.push(bucket.pop_front().unwrap());
        if bucket.is_empty() {
            players.remove(idx);
            weights.remove(idx);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use multifill_game::{ItemFlags, MultiworldBuilder, Rule};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn two_player_world(locs_per_player: [usize; 2]) -> Result<Multiworld> {
        let mut builder = MultiworldBuilder::new();
        for (player, &n) in locs_per_player.iter().enumerate() {
            let p = builder.add_player("Test Game");
            assert_eq!(p, player);
            let menu = builder.add_region(player, "Menu")?;
            for i in 0..n {
                builder.add_location(
                    menu,
                    &format!("P{player} Loc {i}"),
                    (player * 100 + i) as i64,
                    Rule::Always,
                )?;
            }
            builder.set_completion_rule(player, Rule::Always);
        }
        builder.freeze()
    }

    fn rng_for(seed: u8) -> StdRng {
        StdRng::from_seed([seed; 32])
    }

    #[test]
    fn balanced_allocation_caps_at_bucket_size() {
        assert_eq!(balanced_allocation(&[5, 5], 8), vec![4, 4]);
        assert_eq!(balanced_allocation(&[3, 10], 9), vec![3, 6]);
        assert_eq!(balanced_allocation(&[2, 2], 10), vec![2, 2]);
        assert_eq!(balanced_allocation(&[], 4), Vec::<usize>::new());
    }

    #[test]
    fn shuffle_is_a_permutation() -> Result<()> {
        let multiworld = two_player_world([6, 14])?;
        let pool: Vec<Item> = (0..8)
            .map(|i| Item::new(&format!("Key {i}"), i, i as usize % 2, ItemFlags::PROGRESSION))
            .collect();
        let locations = multiworld.unfilled_locations();
        let mut expected = locations.clone();
        let shuffled =
            balanced_shuffle(&multiworld, locations, &pool, 0.7, &mut rng_for(3));
        let mut got = shuffled.clone();
        got.sort_unstable();
        expected.sort_unstable();
        assert_eq!(got, expected);
        Ok(())
    }

    #[test]
    fn factor_zero_skips_balancing() -> Result<()> {
        let multiworld = two_player_world([2, 18])?;
        let pool = vec![Item::new("Key", 1, 0, ItemFlags::PROGRESSION)];
        let locations = multiworld.unfilled_locations();
        let plain = {
            let mut v = locations.clone();
            v.shuffle(&mut rng_for(9));
            v
        };
        let shuffled =
            balanced_shuffle(&multiworld, locations, &pool, 0.0, &mut rng_for(9));
        assert_eq!(shuffled, plain);
        Ok(())
    }

    #[test]
    fn no_progression_skips_balancing() -> Result<()> {
        let multiworld = two_player_world([3, 3])?;
        let pool = vec![Item::new("Rupee", 1, 0, ItemFlags::FILLER)];
        let locations = multiworld.unfilled_locations();
        let plain = {
            let mut v = locations.clone();
            v.shuffle(&mut rng_for(4));
            v
        };
        let shuffled =
            balanced_shuffle(&multiworld, locations, &pool, 1.0, &mut rng_for(4));
        assert_eq!(shuffled, plain);
        Ok(())
    }

    #[test]
    fn full_factor_spreads_small_world_forward() -> Result<()> {
        // Player 0 has 2 of 22 locations. With 10 progression items and
        // factor 1.0, player 0's weight is 5x its uniform share, so its
        // locations should land well inside the early queue on most seeds.
        let multiworld = two_player_world([2, 20])?;
        let pool: Vec<Item> = (0..10)
            .map(|i| Item::new(&format!("Key {i}"), i, 1, ItemFlags::PROGRESSION))
            .collect();
        let mut hits = 0;
        for seed in 0..20u8 {
            let shuffled = balanced_shuffle(
                &multiworld,
                multiworld.unfilled_locations(),
                &pool,
                1.0,
                &mut rng_for(seed),
            );
            let first_p0 = shuffled
                .iter()
                .position(|&loc| multiworld.locations[loc].player == 0)
                .unwrap();
            if first_p0 < 10 {
                hits += 1;
            }
        }
        assert!(hits >= 13, "player 0 front-loaded in only {hits}/20 seeds");
        Ok(())
    }
}
