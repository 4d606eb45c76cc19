use log::trace;
use multifill_game::{
    CompiledRule, Count, Item, LocationId, Multiworld, Placement, PlayerId, RegionId,
};

/// Monotonic accessibility frontier: per-player item counts plus the set of
/// reached regions. Instances are created fresh per solve pass and discarded;
/// they are accumulators, never persisted, and never error.
///
/// Within one pass, counts only increase under `collect` and the reached
/// region set only grows (`remove` exists solely to undo a matching
/// tentative `collect` during backtracking).
#[derive(Clone, Debug)]
pub struct CollectionState {
    counts: Vec<Vec<Count>>,
    reachable_regions: Vec<bool>,
    collected_locations: Vec<bool>,
    stale: bool,
}

impl CollectionState {
    /// Fresh state holding only the precollected items.
    pub fn new(multiworld: &Multiworld) -> Self {
        let mut state = CollectionState {
            counts: vec![vec![0; multiworld.item_name_isv.len()]; multiworld.num_players],
            reachable_regions: vec![false; multiworld.regions.len()],
            collected_locations: vec![false; multiworld.locations.len()],
            stale: true,
        };
        for item in &multiworld.precollected {
            state.collect(multiworld, item);
        }
        state
    }

    pub fn count(&self, multiworld: &Multiworld, name: &str, player: PlayerId) -> Count {
        match multiworld.item_name_id(name) {
            Some(name_id) => self.counts[player][name_id],
            None => 0,
        }
    }

    pub fn has(&self, multiworld: &Multiworld, name: &str, player: PlayerId) -> bool {
        self.count(multiworld, name, player) >= 1
    }

    pub fn has_count(
        &self,
        multiworld: &Multiworld,
        name: &str,
        player: PlayerId,
        count: Count,
    ) -> bool {
        self.count(multiworld, name, player) >= count
    }

    pub fn has_all(&self, multiworld: &Multiworld, names: &[&str], player: PlayerId) -> bool {
        names.iter().all(|name| self.has(multiworld, name, player))
    }

    pub fn has_any(&self, multiworld: &Multiworld, names: &[&str], player: PlayerId) -> bool {
        names.iter().any(|name| self.has(multiworld, name, player))
    }

    /// Add an item to the state. Returns whether the collect can change
    /// reachability (i.e. the item is progression), in which case the
    /// cached reachable-region set is marked stale.
    pub fn collect(&mut self, multiworld: &Multiworld, item: &Item) -> bool {
        let Some(name_id) = multiworld.item_name_id(&item.name) else {
            return false;
        };
        self.counts[item.player][name_id] += 1;
        if item.flags.is_progression() {
            self.stale = true;
            true
        } else {
            false
        }
    }

    /// Undo a tentative `collect` (used when backtracking a placement).
    pub fn remove(&mut self, multiworld: &Multiworld, item: &Item) {
        let Some(name_id) = multiworld.item_name_id(&item.name) else {
            return;
        };
        if self.counts[item.player][name_id] > 0 {
            self.counts[item.player][name_id] -= 1;
            if item.flags.is_progression() {
                self.stale = true;
            }
        }
    }

    fn eval_with(
        &self,
        rule: &CompiledRule,
        player: PlayerId,
        reached: &[bool],
    ) -> bool {
        match rule {
            CompiledRule::Always => true,
            CompiledRule::Never => false,
            CompiledRule::Has { item, count } => self.counts[player][*item] >= *count,
            CompiledRule::HasAll(items) => items.iter().all(|&i| self.counts[player][i] >= 1),
            CompiledRule::HasAny(items) => items.iter().any(|&i| self.counts[player][i] >= 1),
            CompiledRule::CanReach { region } => reached[*region],
            CompiledRule::And(children) => children
                .iter()
                .all(|c| self.eval_with(c, player, reached)),
            CompiledRule::Or(children) => children
                .iter()
                .any(|c| self.eval_with(c, player, reached)),
        }
    }

    /// Evaluate a compiled rule against the current state. The reachable
    /// region cache must be fresh; use the `&mut self` accessors below when
    /// unsure.
    pub fn eval_rule(&self, rule: &CompiledRule, player: PlayerId) -> bool {
        self.eval_with(rule, player, &self.reachable_regions)
    }

    /// Recompute the reached-region set for every player: fixed-point
    /// expansion from each Menu region, following entrances whose rule holds
    /// under the current counts. `CanReach` terms are evaluated against the
    /// set as it grows, so mutually-gated entrances converge. Entrances are
    /// scanned in id order; the result is independent of hash iteration
    /// order.
    pub fn update_reachable_regions(&mut self, multiworld: &Multiworld) {
        let mut reached = vec![false; multiworld.regions.len()];
        for &menu in &multiworld.menu_region {
            reached[menu] = true;
        }
        loop {
            let mut changed = false;
            for (i, entrance) in multiworld.entrances.iter().enumerate() {
                if reached[entrance.from] && !reached[entrance.to] {
                    let player = multiworld.regions[entrance.from].player;
                    if self.eval_with(&multiworld.compiled_entrance[i], player, &reached) {
                        reached[entrance.to] = true;
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }
        self.reachable_regions = reached;
        self.stale = false;
    }

    pub fn can_reach_region(&mut self, multiworld: &Multiworld, region: RegionId) -> bool {
        if self.stale {
            self.update_reachable_regions(multiworld);
        }
        self.reachable_regions[region]
    }

    /// Whether the location's region is reached and its access rule holds.
    pub fn location_accessible(&mut self, multiworld: &Multiworld, loc: LocationId) -> bool {
        if self.stale {
            self.update_reachable_regions(multiworld);
        }
        let location = &multiworld.locations[loc];
        self.reachable_regions[location.region]
            && self.eval_rule(&multiworld.compiled_access[loc], location.player)
    }

    /// All currently accessible locations, in id order.
    pub fn reachable_locations(&mut self, multiworld: &Multiworld) -> Vec<LocationId> {
        if self.stale {
            self.update_reachable_regions(multiworld);
        }
        (0..multiworld.locations.len())
            .filter(|&loc| {
                let location = &multiworld.locations[loc];
                self.reachable_regions[location.region]
                    && self.eval_rule(&multiworld.compiled_access[loc], location.player)
            })
            .collect()
    }

    /// Fixed-point event sweep: alternate between expanding the reached
    /// region set and collecting placed progression items at newly
    /// accessible filled locations, until neither changes. Applying this
    /// twice in a row leaves the state unchanged. Never errors; a placement
    /// with unreachable locations simply converges without them.
    pub fn sweep_for_events(&mut self, multiworld: &Multiworld, placement: &Placement) {
        loop {
            self.update_reachable_regions(multiworld);
            let mut collected_any = false;
            for loc in 0..multiworld.locations.len() {
                if self.collected_locations[loc] {
                    continue;
                }
                let Some(item) = placement.item(loc) else {
                    continue;
                };
                if !item.flags.is_progression() {
                    continue;
                }
                let location = &multiworld.locations[loc];
                if self.reachable_regions[location.region]
                    && self.eval_rule(&multiworld.compiled_access[loc], location.player)
                {
                    trace!("sweep: collecting {} at {}", item.name, location.name);
                    let item = item.clone();
                    self.collected_locations[loc] = true;
                    self.collect(multiworld, &item);
                    collected_any = true;
                }
            }
            if !collected_any {
                break;
            }
        }
    }

    pub fn collected_location(&self, loc: LocationId) -> bool {
        self.collected_locations[loc]
    }
}

/// Clone `base`, collect every item in `pool`, then sweep placed events to a
/// fixed point. This is how each fill rung builds the state in which the
/// left-out item tiers are assumed already obtained.
pub fn sweep_from_pool(
    base: &CollectionState,
    multiworld: &Multiworld,
    pool: &[Item],
    placement: &Placement,
) -> CollectionState {
    let mut state = base.clone();
    for item in pool {
        state.collect(multiworld, item);
    }
    state.sweep_for_events(multiworld, placement);
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use multifill_game::{Item, ItemFlags, MultiworldBuilder, Rule};

    // Menu holds two open locations; the Vault is gated on a Key and holds
    // one location, where a locked Gem event sits. A second Treasury region
    // is gated on reaching the Vault.
    fn build_fixture() -> (Multiworld, Placement) {
        let mut builder = MultiworldBuilder::new();
        let player = builder.add_player("Fixture Game");
        let menu = builder.add_region(player, "Menu").unwrap();
        let vault = builder.add_region(player, "Vault").unwrap();
        let treasury = builder.add_region(player, "Treasury").unwrap();
        builder.add_entrance(menu, vault, Rule::has("Key")).unwrap();
        builder
            .add_entrance(menu, treasury, Rule::can_reach("Vault"))
            .unwrap();
        builder
            .add_location(menu, "Menu Chest 1", 1, Rule::Always)
            .unwrap();
        builder
            .add_location(menu, "Menu Chest 2", 2, Rule::Always)
            .unwrap();
        let vault_chest = builder
            .add_location(vault, "Vault Chest", 3, Rule::Always)
            .unwrap();
        builder
            .add_location(treasury, "Treasury Chest", 4, Rule::has("Gem"))
            .unwrap();
        builder.add_item(Item::new("Key", 10, player, ItemFlags::PROGRESSION));
        builder
            .place_locked(
                vault_chest,
                Item::new("Gem", 11, player, ItemFlags::PROGRESSION),
            )
            .unwrap();
        let multiworld = builder.freeze().unwrap();
        let placement = Placement::new(&multiworld);
        (multiworld, placement)
    }

    #[test]
    fn reachability_is_monotonic_under_collect() {
        let (multiworld, _placement) = build_fixture();
        let player = 0;
        let vault = 1;
        let treasury = 2;
        let mut state = CollectionState::new(&multiworld);

        assert!(state.can_reach_region(&multiworld, 0));
        assert!(!state.can_reach_region(&multiworld, vault));
        assert!(!state.can_reach_region(&multiworld, treasury));
        let before: Vec<LocationId> = state.reachable_locations(&multiworld);

        let key = Item::new("Key", 10, player, ItemFlags::PROGRESSION);
        assert!(state.collect(&multiworld, &key));
        assert!(state.can_reach_region(&multiworld, vault));
        // Treasury is gated on CanReach(Vault), resolved in the same pass.
        assert!(state.can_reach_region(&multiworld, treasury));
        let after: Vec<LocationId> = state.reachable_locations(&multiworld);
        for loc in &before {
            assert!(after.contains(loc));
        }
        assert!(after.len() > before.len());
        assert!(state.has(&multiworld, "Key", player));
    }

    #[test]
    fn filler_collect_does_not_mark_stale() {
        let (multiworld, _placement) = build_fixture();
        let mut state = CollectionState::new(&multiworld);
        state.update_reachable_regions(&multiworld);
        let junk = Item::new("Key", 10, 0, ItemFlags::FILLER);
        assert!(!state.collect(&multiworld, &junk));
    }

    #[test]
    fn sweep_reaches_fixed_point() {
        let (multiworld, placement) = build_fixture();
        let player = 0;
        let mut state = CollectionState::new(&multiworld);
        let key = Item::new("Key", 10, player, ItemFlags::PROGRESSION);
        state.collect(&multiworld, &key);

        // The sweep should open the Vault, collect the locked Gem, and then
        // expose the Treasury chest.
        state.sweep_for_events(&multiworld, &placement);
        assert!(state.has(&multiworld, "Gem", player));
        let reachable = state.reachable_locations(&multiworld);
        assert!(reachable.contains(&3));

        // A second sweep immediately after the first changes nothing.
        let snapshot = state.clone();
        state.sweep_for_events(&multiworld, &placement);
        assert_eq!(snapshot.counts, state.counts);
        assert_eq!(snapshot.collected_locations, state.collected_locations);
        assert_eq!(
            snapshot.reachable_regions,
            state.reachable_regions
        );
    }

    #[test]
    fn sweep_converges_without_unreachable_locations() {
        let (multiworld, placement) = build_fixture();
        // No Key collected: the Vault never opens and the sweep terminates
        // with the Gem uncollected rather than hanging.
        let mut state = CollectionState::new(&multiworld);
        state.sweep_for_events(&multiworld, &placement);
        assert!(!state.has(&multiworld, "Gem", 0));
        assert!(!state.collected_location(2));
    }

    #[test]
    fn sweep_from_pool_leaves_base_untouched() {
        let (multiworld, placement) = build_fixture();
        let base = CollectionState::new(&multiworld);
        let pool = vec![Item::new("Key", 10, 0, ItemFlags::PROGRESSION)];
        let swept = sweep_from_pool(&base, &multiworld, &pool, &placement);
        assert!(swept.has(&multiworld, "Key", 0));
        assert!(swept.has(&multiworld, "Gem", 0));
        assert!(!base.has(&multiworld, "Key", 0));
    }

    #[test]
    fn remove_undoes_collect() {
        let (multiworld, _placement) = build_fixture();
        let mut state = CollectionState::new(&multiworld);
        let key = Item::new("Key", 10, 0, ItemFlags::PROGRESSION);
        state.collect(&multiworld, &key);
        state.remove(&multiworld, &key);
        assert_eq!(state.count(&multiworld, "Key", 0), 0);
        assert!(!state.can_reach_region(&multiworld, 1));
    }

    #[test]
    fn unknown_item_names_count_zero() {
        let (multiworld, _placement) = build_fixture();
        let mut state = CollectionState::new(&multiworld);
        let phantom = Item::new("Phantom", 999, 0, ItemFlags::PROGRESSION);
        assert!(!state.collect(&multiworld, &phantom));
        assert_eq!(state.count(&multiworld, "Phantom", 0), 0);
    }
}
