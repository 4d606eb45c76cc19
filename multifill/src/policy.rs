use anyhow::Result;
use hashbrown::{HashMap, HashSet};
use log::info;
use multifill_game::{ItemFlags, LocationId, Multiworld};
use rand::RngCore;

use crate::fill::ItemPools;

/// A named stage run over the partitioned pools and location queue before
/// placement. Stages compose in configuration order; each sees the effect
/// of the previous one.
pub trait FillPolicy {
    fn name(&self) -> &str;

    fn apply(
        &self,
        multiworld: &Multiworld,
        pools: &mut ItemPools,
        fill_locations: &mut Vec<LocationId>,
        rng: &mut dyn RngCore,
    ) -> Result<()>;
}

/// Flags the named progression items as deprioritized, steering them away
/// from priority locations: the priority ladder only falls back to them
/// after regular progression is exhausted. Keyed by game name so one policy
/// instance covers every player of that game.
pub struct DeprioritizeItems {
    pub items_by_game: HashMap<String, HashSet<String>>,
}

impl FillPolicy for DeprioritizeItems {
    fn name(&self) -> &str {
        "deprioritize-items"
    }

    fn apply(
        &self,
        multiworld: &Multiworld,
        pools: &mut ItemPools,
        _fill_locations: &mut Vec<LocationId>,
        _rng: &mut dyn RngCore,
    ) -> Result<()> {
        let mut flagged = 0;
        for item in &mut pools.progression {
            if let Some(names) = self.items_by_game.get(&multiworld.game_names[item.player]) {
                if names.contains(&item.name) {
                    item.flags.insert(ItemFlags::DEPRIORITIZED);
                    flagged += 1;
                }
            }
        }
        info!("deprioritized {flagged} progression items");
        Ok(())
    }
}

/// Promotes the named filler items to the useful tier, so they are placed
/// before plain filler and never displaced by junk swaps. Moves matching
/// items from the filler pool into the useful pool.
pub struct PromoteUseful {
    pub items_by_game: HashMap<String, HashSet<String>>,
}

impl FillPolicy for PromoteUseful {
    fn name(&self) -> &str {
        "promote-useful"
    }

    fn apply(
        &self,
        multiworld: &Multiworld,
        pools: &mut ItemPools,
        _fill_locations: &mut Vec<LocationId>,
        _rng: &mut dyn RngCore,
    ) -> Result<()> {
        let mut promoted = 0;
        let mut i = 0;
        while i < pools.filler.len() {
            let item = &pools.filler[i];
            let matches = self
                .items_by_game
                .get(&multiworld.game_names[item.player])
                .is_some_and(|names| names.contains(&item.name));
            if matches {
                let mut item = pools.filler.remove(i);
                item.flags.insert(ItemFlags::USEFUL);
                pools.useful.push(item);
                promoted += 1;
            } else {
                i += 1;
            }
        }
        info!("promoted {promoted} filler items to useful");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use multifill_game::{Item, Multiworld, MultiworldBuilder, Rule};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn one_player_world() -> Result<Multiworld> {
        let mut builder = MultiworldBuilder::new();
        let player = builder.add_player("Key Dungeon");
        let menu = builder.add_region(player, "Menu")?;
        builder.add_location(menu, "Chest", 1, Rule::Always)?;
        builder.set_completion_rule(player, Rule::Always);
        builder.freeze()
    }

    fn names(game: &str, items: &[&str]) -> HashMap<String, HashSet<String>> {
        let set: HashSet<String> = items.iter().map(|s| s.to_string()).collect();
        let mut map = HashMap::new();
        map.insert(game.to_string(), set);
        map
    }

    #[test]
    fn deprioritize_flags_only_named_progression() -> Result<()> {
        let multiworld = one_player_world()?;
        let mut pools = ItemPools::partition(vec![
            Item::new("Small Key", 1, 0, ItemFlags::PROGRESSION),
            Item::new("Boss Key", 2, 0, ItemFlags::PROGRESSION),
        ]);
        let policy = DeprioritizeItems {
            items_by_game: names("Key Dungeon", &["Small Key"]),
        };
        let mut rng = StdRng::from_seed([0; 32]);
        policy.apply(&multiworld, &mut pools, &mut vec![], &mut rng)?;
        let small = pools.progression.iter().find(|i| i.name == "Small Key").unwrap();
        let boss = pools.progression.iter().find(|i| i.name == "Boss Key").unwrap();
        assert!(small.flags.is_deprioritized());
        assert!(!boss.flags.is_deprioritized());
        assert!(small.flags.is_progression());
        Ok(())
    }

    #[test]
    fn deprioritize_ignores_other_games() -> Result<()> {
        let multiworld = one_player_world()?;
        let mut pools = ItemPools::partition(vec![Item::new(
            "Small Key",
            1,
            0,
            ItemFlags::PROGRESSION,
        )]);
        let policy = DeprioritizeItems {
            items_by_game: names("Other Game", &["Small Key"]),
        };
        let mut rng = StdRng::from_seed([0; 32]);
        policy.apply(&multiworld, &mut pools, &mut vec![], &mut rng)?;
        assert!(!pools.progression[0].flags.is_deprioritized());
        Ok(())
    }

    #[test]
    fn promote_moves_filler_to_useful() -> Result<()> {
        let multiworld = one_player_world()?;
        let mut pools = ItemPools::partition(vec![
            Item::new("Heart Piece", 1, 0, ItemFlags::FILLER),
            Item::new("Rupee", 2, 0, ItemFlags::FILLER),
        ]);
        let policy = PromoteUseful {
            items_by_game: names("Key Dungeon", &["Heart Piece"]),
        };
        let mut rng = StdRng::from_seed([0; 32]);
        policy.apply(&multiworld, &mut pools, &mut vec![], &mut rng)?;
        assert_eq!(pools.filler.len(), 1);
        assert_eq!(pools.useful.len(), 1);
        assert_eq!(pools.useful[0].name, "Heart Piece");
        assert!(pools.useful[0].flags.is_useful());
        Ok(())
    }
}
