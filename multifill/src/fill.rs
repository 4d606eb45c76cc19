use anyhow::{bail, ensure, Result};
use hashbrown::HashSet;
use log::{debug, info};
use multifill_game::registry::WorldRegistry;
use multifill_game::{Item, ItemFlags, LocationId, Multiworld, Placement, PlayerId};
use multifill_logic::{sweep_from_pool, CollectionState};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::balance::balanced_shuffle;
use crate::policy::FillPolicy;
use crate::spheres::{compute_spheres, Sphere};

/// The item pool partitioned into placement tiers. Progression is placed
/// under full logic; useful and filler have no logical effect. Traps ride
/// the filler tier. The deprioritized split of progression is derived from
/// `ItemFlags` at priority-fill time, after hooks have run.
#[derive(Clone, Debug, Default)]
pub struct ItemPools {
    pub progression: Vec<Item>,
    pub useful: Vec<Item>,
    pub filler: Vec<Item>,
}

impl ItemPools {
    pub fn partition(items: Vec<Item>) -> Self {
        let mut pools = ItemPools::default();
        for item in items {
            if item.flags.is_progression() {
                pools.progression.push(item);
            } else if item.flags.is_useful() {
                pools.useful.push(item);
            } else {
                pools.filler.push(item);
            }
        }
        pools
    }

    pub fn total_len(&self) -> usize {
        self.progression.len() + self.useful.len() + self.filler.len()
    }
}

/// Knobs for one rung of restrictive fill.
#[derive(Clone, Copy, Debug)]
pub struct FillOptions<'a> {
    pub name: &'a str,
    /// Restrict candidate locations to one player's world.
    pub single_player: Option<PlayerId>,
    /// Allow evicting an earlier placement from this call to make room for
    /// a stuck item.
    pub swap: bool,
    /// Tentatively place at most one item per player per solver pass, so no
    /// player's needs starve the others.
    pub one_item_per_player: bool,
    /// Leftover items are not an error; they flow to the next rung.
    pub allow_partial: bool,
}

fn find_spot(
    multiworld: &Multiworld,
    max_state: &mut CollectionState,
    locations: &[LocationId],
    item: &Item,
    opts: &FillOptions,
) -> Option<usize> {
    for (pos, &loc) in locations.iter().enumerate() {
        if let Some(player) = opts.single_player {
            if multiworld.locations[loc].player != player {
                continue;
            }
        }
        if !multiworld.item_allowed_at(item, loc) {
            continue;
        }
        if max_state.location_accessible(multiworld, loc) {
            return Some(pos);
        }
    }
    None
}

/// Attempt to evict an earlier placement from this fill call to make room
/// for a stuck item. Placements are scanned oldest-first; the first location
/// that accepts the stuck item, stays reachable with the evicted item back
/// in the candidate pool, and is not locked, wins. The evicted item is
/// re-queued for placement.
///
/// Each (item, location) pair is tried at most once per fill call. Without
/// that bound, two items that jointly gate the last open location would
/// evict each other from the same spot forever; with it, the eviction
/// budget runs out and the stuck item falls through to `unplaced`, where
/// the normal failure path reports it.
fn try_swap(
    multiworld: &Multiworld,
    base_state: &CollectionState,
    item_pool: &mut Vec<Item>,
    unplaced: &[Item],
    placement: &mut Placement,
    placed_here: &mut Vec<LocationId>,
    swap_attempts: &mut HashSet<(PlayerId, String, LocationId)>,
    item: &Item,
    name: &str,
) -> Result<bool> {
    for i in 0..placed_here.len() {
        let loc = placed_here[i];
        if !multiworld.item_allowed_at(item, loc) {
            continue;
        }
        if !swap_attempts.insert((item.player, item.name.clone(), loc)) {
            continue;
        }
        let evicted = placement.remove(loc)?;
        let mut assumed: Vec<Item> = item_pool.clone();
        assumed.extend(unplaced.iter().cloned());
        assumed.push(evicted.clone());
        let mut swap_state = sweep_from_pool(base_state, multiworld, &assumed, placement);
        if swap_state.location_accessible(multiworld, loc) {
            debug!(
                "{}: swapping {} out of {} to place {}",
                name, evicted.name, multiworld.locations[loc].name, item.name
            );
            placement.place(loc, item.clone())?;
            item_pool.push(evicted);
            placed_here.remove(i);
            placed_here.push(loc);
            return Ok(true);
        }
        placement.place(loc, evicted)?;
    }
    Ok(false)
}

/// Restrictive (assumed) fill: repeatedly pick the next items from the tail
/// of the pool, compute the locations still reachable when everything *not*
/// being placed is assumed collected, and put each item at the first
/// compatible location in the queue. Items that fit nowhere are either
/// swapped in (when `opts.swap`) or returned to the pool; with
/// `allow_partial` that remainder is not an error.
pub fn fill_restrictive<R: Rng>(
    multiworld: &Multiworld,
    base_state: &CollectionState,
    locations: &mut Vec<LocationId>,
    item_pool: &mut Vec<Item>,
    placement: &mut Placement,
    _rng: &mut R,
    opts: &FillOptions,
) -> Result<()> {
    let mut unplaced: Vec<Item> = Vec::new();
    let mut placed_here: Vec<LocationId> = Vec::new();
    let mut swap_attempts: HashSet<(PlayerId, String, LocationId)> = HashSet::new();

    while !locations.is_empty() && !item_pool.is_empty() {
        let mut items_to_place: Vec<Item> = Vec::new();
        if opts.one_item_per_player {
            let mut players: Vec<PlayerId> =
                item_pool.iter().map(|item| item.player).collect();
            players.sort_unstable();
            players.dedup();
            for player in players {
                let idx = item_pool
                    .iter()
                    .rposition(|item| item.player == player)
                    .unwrap();
                items_to_place.push(item_pool.remove(idx));
            }
        } else {
            items_to_place.push(item_pool.pop().unwrap());
        }

        // Maximum exploration state: everything not being placed right now
        // is assumed collected, so a chosen spot stays reachable without the
        // item that lands there.
        let mut assumed: Vec<Item> = item_pool.clone();
        assumed.extend(unplaced.iter().cloned());
        let mut max_state = sweep_from_pool(base_state, multiworld, &assumed, placement);

        for item in items_to_place {
            match find_spot(multiworld, &mut max_state, locations, &item, opts) {
                Some(pos) => {
                    let loc = locations.remove(pos);
                    debug!(
                        "{}: placed {} (player {}) at {} (player {})",
                        opts.name,
                        item.name,
                        item.player,
                        multiworld.locations[loc].name,
                        multiworld.locations[loc].player
                    );
                    placement.place(loc, item)?;
                    placed_here.push(loc);
                }
                None => {
                    if opts.swap
                        && try_swap(
                            multiworld,
                            base_state,
                            item_pool,
                            &unplaced,
                            placement,
                            &mut placed_here,
                            &mut swap_attempts,
                            &item,
                            opts.name,
                        )?
                    {
                        continue;
                    }
                    debug!("{}: no spot for {} (player {})", opts.name, item.name, item.player);
                    unplaced.push(item);
                }
            }
        }
    }

    if !unplaced.is_empty() && !locations.is_empty() && !opts.allow_partial {
        let names: Vec<&str> = unplaced.iter().map(|item| item.name.as_str()).collect();
        bail!("{}: could not place items: {:?}", opts.name, names);
    }
    item_pool.extend(unplaced);
    Ok(())
}

/// Priority fill ladder. Priority locations prefer regular progression;
/// deprioritized progression is assumed collected so it cannot block early
/// reachability but still satisfies predicates. Each retry rung relaxes one
/// constraint and operates on the remainder of the previous rung, so the set
/// of filled priority locations only grows. The final rung has no partial
/// escape: leftover items there fail the whole generation.
pub fn priority_fill<R: Rng>(
    multiworld: &Multiworld,
    priority_locations: &mut Vec<LocationId>,
    progression_pool: &mut Vec<Item>,
    placement: &mut Placement,
    rng: &mut R,
    single_player: Option<PlayerId>,
) -> Result<()> {
    let mut regular: Vec<Item> = Vec::new();
    let mut deprioritized: Vec<Item> = Vec::new();
    for item in progression_pool.drain(..) {
        if item.flags.is_deprioritized() {
            deprioritized.push(item);
        } else {
            regular.push(item);
        }
    }
    let base = CollectionState::new(multiworld);

    let state = sweep_from_pool(&base, multiworld, &deprioritized, placement);
    fill_restrictive(
        multiworld,
        &state,
        priority_locations,
        &mut regular,
        placement,
        rng,
        &FillOptions {
            name: "Priority",
            single_player,
            swap: false,
            one_item_per_player: true,
            allow_partial: true,
        },
    )?;

    if !priority_locations.is_empty() && !regular.is_empty() {
        // The per-player fairness constraint can make filling some priority
        // locations impossible; retry without it.
        let state = sweep_from_pool(&base, multiworld, &deprioritized, placement);
        fill_restrictive(
            multiworld,
            &state,
            priority_locations,
            &mut regular,
            placement,
            rng,
            &FillOptions {
                name: "Priority Retry",
                single_player,
                swap: false,
                one_item_per_player: false,
                allow_partial: true,
            },
        )?;
    }

    if !priority_locations.is_empty() && !deprioritized.is_empty() {
        // No regular progression fits the remaining priority locations, but
        // deprioritized progression is still better there than filler. The
        // leftover regular progression moves into the assumed state.
        let state = sweep_from_pool(&base, multiworld, &regular, placement);
        fill_restrictive(
            multiworld,
            &state,
            priority_locations,
            &mut deprioritized,
            placement,
            rng,
            &FillOptions {
                name: "Priority Retry 2",
                single_player,
                swap: false,
                one_item_per_player: true,
                allow_partial: true,
            },
        )?;
    }

    if !priority_locations.is_empty() && !deprioritized.is_empty() {
        let state = sweep_from_pool(&base, multiworld, &regular, placement);
        fill_restrictive(
            multiworld,
            &state,
            priority_locations,
            &mut deprioritized,
            placement,
            rng,
            &FillOptions {
                name: "Priority Retry 3",
                single_player,
                swap: false,
                one_item_per_player: false,
                allow_partial: false,
            },
        )?;
    }

    progression_pool.extend(regular);
    progression_pool.extend(deprioritized);
    Ok(())
}

/// Place items marked early by their world into that player's sphere-zero
/// locations, before the priority ladder runs. The base state holds only
/// precollected items, so chosen spots are reachable from the start.
pub fn distribute_early_items<R: Rng>(
    multiworld: &Multiworld,
    fill_locations: &mut Vec<LocationId>,
    pools: &mut ItemPools,
    placement: &mut Placement,
    rng: &mut R,
) -> Result<()> {
    for player in 0..multiworld.num_players {
        let early = &multiworld.early_items[player];
        if early.is_empty() {
            continue;
        }
        let mut early_pool: Vec<Item> = Vec::new();
        for pool in [
            &mut pools.progression,
            &mut pools.useful,
            &mut pools.filler,
        ] {
            let mut i = 0;
            while i < pool.len() {
                if pool[i].player == player && early.contains(&pool[i].name) {
                    early_pool.push(pool.remove(i));
                } else {
                    i += 1;
                }
            }
        }
        if early_pool.is_empty() {
            continue;
        }
        info!(
            "placing {} early items for player {} ({})",
            early_pool.len(),
            player,
            multiworld.game_names[player]
        );
        let mut player_locations: Vec<LocationId> = fill_locations
            .iter()
            .copied()
            .filter(|&loc| multiworld.locations[loc].player == player)
            .collect();
        let base = CollectionState::new(multiworld);
        fill_restrictive(
            multiworld,
            &base,
            &mut player_locations,
            &mut early_pool,
            placement,
            rng,
            &FillOptions {
                name: "Early",
                single_player: Some(player),
                swap: false,
                one_item_per_player: false,
                allow_partial: false,
            },
        )?;
        fill_locations.retain(|&loc| !placement.is_filled(loc));
    }
    Ok(())
}

fn place_junk(
    multiworld: &Multiworld,
    locations: &mut Vec<LocationId>,
    pool: &mut Vec<Item>,
    placement: &mut Placement,
    name: &str,
) -> Result<()> {
    let mut placed_here: Vec<LocationId> = Vec::new();
    while let Some(item) = pool.pop() {
        if locations.is_empty() {
            bail!(
                "{}: ran out of locations with {} items unplaced",
                name,
                pool.len() + 1
            );
        }
        if let Some(pos) = locations
            .iter()
            .position(|&loc| multiworld.item_allowed_at(&item, loc))
        {
            let loc = locations.remove(pos);
            placement.place(loc, item)?;
            placed_here.push(loc);
            continue;
        }

        // No open location accepts this item; swap with an earlier junk
        // placement whose occupant fits one of the open locations.
        let mut swap_target: Option<(LocationId, usize)> = None;
        for &loc_j in &placed_here {
            if !multiworld.item_allowed_at(&item, loc_j) {
                continue;
            }
            let occupant = placement.item(loc_j).unwrap();
            if let Some(pos) = locations
                .iter()
                .position(|&l| multiworld.item_allowed_at(occupant, l))
            {
                swap_target = Some((loc_j, pos));
                break;
            }
        }
        match swap_target {
            Some((loc_j, pos)) => {
                let other = locations.remove(pos);
                let evicted = placement.remove(loc_j)?;
                placement.place(loc_j, item)?;
                placement.place(other, evicted)?;
                placed_here.push(other);
            }
            None => bail!(
                "{}: no location accepts {} (player {})",
                name,
                item.name,
                item.player
            ),
        }
    }
    Ok(())
}

/// Fill all remaining locations with the non-logical tiers, useful first,
/// then filler (and traps). The location queue is re-shuffled on entry so
/// the balanced ordering used for progression does not leak into junk
/// placement.
pub fn remaining_fill<R: Rng>(
    multiworld: &Multiworld,
    locations: &mut Vec<LocationId>,
    pools: &mut ItemPools,
    placement: &mut Placement,
    rng: &mut R,
) -> Result<()> {
    locations.shuffle(rng);
    place_junk(multiworld, locations, &mut pools.useful, placement, "Useful")?;
    place_junk(multiworld, locations, &mut pools.filler, placement, "Filler")?;
    Ok(())
}

/// Generation-wide configuration. The balancing factor interpolates the
/// location queue between a plain shuffle (0.0) and an equitable per-player
/// progression allocation (1.0). Policies run in order before fill.
pub struct GenerationConfig {
    pub balancing_factor: f64,
    pub policies: Vec<Box<dyn FillPolicy>>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        GenerationConfig {
            balancing_factor: 0.5,
            policies: vec![],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlacementEntry {
    pub location: String,
    pub location_player: PlayerId,
    pub item: String,
    pub item_player: PlayerId,
    pub flags: ItemFlags,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Generation {
    pub seed: usize,
    pub placements: Vec<PlacementEntry>,
    pub spheres: Vec<Sphere>,
}

/// Top-level fill pipeline: pools are assembled and partitioned, policy
/// stages and world fill hooks run, early items are placed, the priority
/// ladder fills priority locations, progression fills the rest under full
/// logic, junk fills whatever remains, and the result is verified sweepable
/// from an empty state. Any shortfall is a hard failure for the whole
/// multiworld: placements are interdependent, so no partial output exists.
pub fn distribute_items_restrictive(
    multiworld: &Multiworld,
    registry: &WorldRegistry,
    config: &GenerationConfig,
    seed: usize,
) -> Result<Generation> {
    let mut rng_seed = [0u8; 32];
    rng_seed[..std::mem::size_of::<usize>()].copy_from_slice(&seed.to_le_bytes());
    let mut rng = StdRng::from_seed(rng_seed);

    let mut placement = Placement::new(multiworld);
    let fill_locations = multiworld.unfilled_locations();
    let mut item_pool: Vec<Item> = multiworld.item_pool.clone();
    ensure!(
        item_pool.len() == fill_locations.len(),
        "item pool size ({}) does not match unfilled location count ({})",
        item_pool.len(),
        fill_locations.len()
    );
    info!(
        "[gen {seed}] filling {} locations across {} players",
        fill_locations.len(),
        multiworld.num_players
    );

    // Sort before shuffling so the outcome depends only on the seed, not on
    // pool assembly order.
    item_pool.sort_by(|a, b| {
        (a.player, &a.name, a.id).cmp(&(b.player, &b.name, b.id))
    });
    item_pool.shuffle(&mut rng);

    let mut fill_locations = balanced_shuffle(
        multiworld,
        fill_locations,
        &item_pool,
        config.balancing_factor,
        &mut rng,
    );

    let mut pools = ItemPools::partition(item_pool);
    for policy in &config.policies {
        debug!("[gen {seed}] applying fill policy {:?}", policy.name());
        policy.apply(multiworld, &mut pools, &mut fill_locations, &mut rng)?;
    }
    for (_player, world) in registry.worlds() {
        world.fill_hook(
            &mut pools.progression,
            &mut pools.useful,
            &mut pools.filler,
            &fill_locations,
        );
    }

    distribute_early_items(
        multiworld,
        &mut fill_locations,
        &mut pools,
        &mut placement,
        &mut rng,
    )?;

    let mut priority_locations: Vec<LocationId> = fill_locations
        .iter()
        .copied()
        .filter(|&loc| multiworld.locations[loc].priority)
        .collect();
    if !priority_locations.is_empty() {
        fill_locations.retain(|&loc| !multiworld.locations[loc].priority);
        info!(
            "[gen {seed}] priority fill: {} locations, {} progression items",
            priority_locations.len(),
            pools.progression.len()
        );
        priority_fill(
            multiworld,
            &mut priority_locations,
            &mut pools.progression,
            &mut placement,
            &mut rng,
            None,
        )?;
        // Priority locations that ended up without progression rejoin the
        // queue ahead of the rest.
        priority_locations.append(&mut fill_locations);
        fill_locations = priority_locations;
    }

    info!(
        "[gen {seed}] progression fill: {} items over {} locations",
        pools.progression.len(),
        fill_locations.len()
    );
    let base = CollectionState::new(multiworld);
    fill_restrictive(
        multiworld,
        &base,
        &mut fill_locations,
        &mut pools.progression,
        &mut placement,
        &mut rng,
        &FillOptions {
            name: "Progression",
            single_player: None,
            swap: true,
            one_item_per_player: true,
            allow_partial: false,
        },
    )?;
    if !pools.progression.is_empty() {
        let names: Vec<&str> = pools
            .progression
            .iter()
            .map(|item| item.name.as_str())
            .collect();
        bail!("progression items left over after fill: {:?}", names);
    }

    remaining_fill(
        multiworld,
        &mut fill_locations,
        &mut pools,
        &mut placement,
        &mut rng,
    )?;
    ensure!(
        fill_locations.is_empty(),
        "{} locations left unfilled",
        fill_locations.len()
    );

    let spheres = compute_spheres(multiworld, &placement)?;
    info!("[gen {seed}] fill complete in {} spheres", spheres.len());

    let placements: Vec<PlacementEntry> = (0..multiworld.locations.len())
        .map(|loc| {
            let location = &multiworld.locations[loc];
            let item = placement.item(loc).unwrap();
            PlacementEntry {
                location: location.name.clone(),
                location_player: location.player,
                item: item.name.clone(),
                item_player: item.player,
                flags: item.flags,
            }
        })
        .collect();

    Ok(Generation {
        seed,
        placements,
        spheres,
    })
}
