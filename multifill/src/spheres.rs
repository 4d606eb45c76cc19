use anyhow::{bail, ensure, Result};
use log::debug;
use multifill_game::{Multiworld, Placement, PlayerId};
use multifill_logic::CollectionState;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SphereEntry {
    pub location: String,
    pub location_player: PlayerId,
    pub item: String,
    pub item_player: PlayerId,
}

/// One step of the playthrough: every location that first becomes reachable
/// with the items collected in earlier spheres.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sphere {
    pub step: usize,
    pub collected: Vec<SphereEntry>,
}

/// Verify a complete placement by playing it forward from scratch. Each
/// iteration collects everything reachable; progress must be made every
/// sphere until all locations are collected and every player's completion
/// rule holds. This is the beatability check for the whole multiworld.
pub fn compute_spheres(multiworld: &Multiworld, placement: &Placement) -> Result<Vec<Sphere>> {
    for loc in 0..multiworld.locations.len() {
        ensure!(
            placement.is_filled(loc),
            "cannot compute spheres: {:?} is unfilled",
            multiworld.locations[loc].name
        );
    }

    let mut state = CollectionState::new(multiworld);
    let mut collected = vec![false; multiworld.locations.len()];
    let mut spheres: Vec<Sphere> = Vec::new();

    loop {
        let reachable: Vec<usize> = state
            .reachable_locations(multiworld)
            .into_iter()
            .filter(|&loc| !collected[loc])
            .collect();
        if reachable.is_empty() {
            break;
        }
        let mut sphere = Sphere {
            step: spheres.len(),
            collected: Vec::with_capacity(reachable.len()),
        };
        for loc in reachable {
            let location = &multiworld.locations[loc];
            let item = placement.item(loc).unwrap().clone();
            sphere.collected.push(SphereEntry {
                location: location.name.clone(),
                location_player: location.player,
                item: item.name.clone(),
                item_player: item.player,
            });
            collected[loc] = true;
            state.collect(multiworld, &item);
        }
        debug!("sphere {}: {} locations", sphere.step, sphere.collected.len());
        spheres.push(sphere);
    }

    let unreachable: Vec<&str> = (0..multiworld.locations.len())
        .filter(|&loc| !collected[loc])
        .map(|loc| multiworld.locations[loc].name.as_str())
        .collect();
    if !unreachable.is_empty() {
        bail!("placement is not beatable; unreachable locations: {unreachable:?}");
    }

    state.update_reachable_regions(multiworld);
    for player in 0..multiworld.num_players {
        if !state.eval_rule(&multiworld.compiled_completion[player], player) {
            bail!(
                "player {} ({}) cannot complete their goal",
                player,
                multiworld.game_names[player]
            );
        }
    }
    Ok(spheres)
}
