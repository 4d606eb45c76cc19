pub mod registry;
pub mod util;

use std::fmt::{self, Debug, Formatter};
use std::ops::{BitOr, BitOrAssign};

use anyhow::{bail, ensure, Result};
use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};

use crate::util::IndexedVec;

pub type PlayerId = usize;
pub type RegionId = usize;
pub type EntranceId = usize;
pub type LocationId = usize;
pub type ItemNameId = usize;
pub type Count = i32;

/// Closed set of item classification flags. The empty set is filler.
/// These are fixed at definition time; fill hooks and policy stages may OR
/// flags onto an item before fill runs, but no new bits exist beyond these.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemFlags(u8);

impl ItemFlags {
    pub const FILLER: ItemFlags = ItemFlags(0);
    pub const PROGRESSION: ItemFlags = ItemFlags(1 << 0);
    pub const USEFUL: ItemFlags = ItemFlags(1 << 1);
    pub const TRAP: ItemFlags = ItemFlags(1 << 2);
    pub const DEPRIORITIZED: ItemFlags = ItemFlags(1 << 3);

    pub fn contains(self, other: ItemFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: ItemFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: ItemFlags) {
        self.0 &= !other.0;
    }

    pub fn is_progression(self) -> bool {
        self.contains(ItemFlags::PROGRESSION)
    }

    pub fn is_useful(self) -> bool {
        self.contains(ItemFlags::USEFUL)
    }

    pub fn is_trap(self) -> bool {
        self.contains(ItemFlags::TRAP)
    }

    pub fn is_deprioritized(self) -> bool {
        self.contains(ItemFlags::DEPRIORITIZED)
    }

    /// Filler for placement purposes: no logical effect. Traps ride this tier.
    pub fn is_filler(self) -> bool {
        self.0 & (ItemFlags::PROGRESSION.0 | ItemFlags::USEFUL.0) == 0
    }
}

impl BitOr for ItemFlags {
    type Output = ItemFlags;

    fn bitor(self, rhs: ItemFlags) -> ItemFlags {
        ItemFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for ItemFlags {
    fn bitor_assign(&mut self, rhs: ItemFlags) {
        self.0 |= rhs.0;
    }
}

impl Debug for ItemFlags {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let mut names: Vec<&str> = vec![];
        if self.is_progression() {
            names.push("progression");
        }
        if self.is_useful() {
            names.push("useful");
        }
        if self.is_trap() {
            names.push("trap");
        }
        if self.is_deprioritized() {
            names.push("deprioritized");
        }
        if names.is_empty() {
            names.push("filler");
        }
        write!(f, "{}", names.join("|"))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub name: String,
    pub id: i64,
    pub player: PlayerId,
    pub flags: ItemFlags,
}

impl Item {
    pub fn new(name: &str, id: i64, player: PlayerId, flags: ItemFlags) -> Self {
        Item {
            name: name.to_string(),
            id,
            player,
            flags,
        }
    }
}

/// Access rules are plain data evaluated against a `CollectionState`, rather
/// than closures, so they can be serialized and tested in isolation. Item and
/// region references are by name at build time and compiled to interned ids
/// when the multiworld is frozen.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Rule {
    Always,
    Never,
    Has { item: String, count: Count },
    HasAll(Vec<String>),
    HasAny(Vec<String>),
    CanReach { region: String },
    And(Vec<Rule>),
    Or(Vec<Rule>),
}

impl Rule {
    pub fn has(item: &str) -> Rule {
        Rule::Has {
            item: item.to_string(),
            count: 1,
        }
    }

    pub fn has_count(item: &str, count: Count) -> Rule {
        Rule::Has {
            item: item.to_string(),
            count,
        }
    }

    pub fn has_all(items: &[&str]) -> Rule {
        Rule::HasAll(items.iter().map(|s| s.to_string()).collect())
    }

    pub fn has_any(items: &[&str]) -> Rule {
        Rule::HasAny(items.iter().map(|s| s.to_string()).collect())
    }

    pub fn can_reach(region: &str) -> Rule {
        Rule::CanReach {
            region: region.to_string(),
        }
    }
}

/// Compiled form of `Rule`: item names interned, regions resolved to ids.
/// Rules are evaluated only against the owning player's state, so the player
/// is not stored here.
#[derive(Clone, Debug, PartialEq)]
pub enum CompiledRule {
    Always,
    Never,
    Has { item: ItemNameId, count: Count },
    HasAll(Vec<ItemNameId>),
    HasAny(Vec<ItemNameId>),
    CanReach { region: RegionId },
    And(Vec<CompiledRule>),
    Or(Vec<CompiledRule>),
}

/// Per-location restriction on which items may be placed there.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ItemRule {
    Any,
    Disallow(Vec<String>),
    AllowOnly(Vec<String>),
    OwnWorldOnly,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    pub id: i64,
    pub player: PlayerId,
    pub region: RegionId,
    pub access_rule: Rule,
    pub item_rule: ItemRule,
    pub priority: bool,
    /// Locked/pre-placed: holds an event item or a pre-placed real item,
    /// never re-filled or swapped.
    pub event: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Region {
    pub name: String,
    pub player: PlayerId,
    pub locations: Vec<LocationId>,
    pub exits: Vec<EntranceId>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Entrance {
    pub from: RegionId,
    pub to: RegionId,
    pub rule: Rule,
}

/// Frozen multiworld topology plus the item pool. Structure never mutates
/// after `MultiworldBuilder::freeze`; all fill-time state lives elsewhere
/// (`Placement`, `CollectionState`).
#[derive(Clone, Debug)]
pub struct Multiworld {
    pub num_players: usize,
    pub game_names: Vec<String>,
    pub menu_region: Vec<RegionId>,
    pub regions: Vec<Region>,
    pub entrances: Vec<Entrance>,
    pub locations: Vec<Location>,
    pub item_pool: Vec<Item>,
    pub precollected: Vec<Item>,
    pub locked_items: Vec<Option<Item>>,
    pub completion_rules: Vec<Rule>,
    pub early_items: Vec<HashSet<String>>,
    pub item_name_isv: IndexedVec<String>,
    pub compiled_access: Vec<CompiledRule>,
    pub compiled_entrance: Vec<CompiledRule>,
    pub compiled_completion: Vec<CompiledRule>,
}

impl Multiworld {
    pub fn item_name_id(&self, name: &str) -> Option<ItemNameId> {
        self.item_name_isv.index_by_key.get(name).copied()
    }

    /// Whether `item` is allowed at `loc` by the location's item rule.
    pub fn item_allowed_at(&self, item: &Item, loc: LocationId) -> bool {
        let location = &self.locations[loc];
        match &location.item_rule {
            ItemRule::Any => true,
            ItemRule::Disallow(names) => !names.iter().any(|n| n == &item.name),
            ItemRule::AllowOnly(names) => names.iter().any(|n| n == &item.name),
            ItemRule::OwnWorldOnly => item.player == location.player,
        }
    }

    /// Locations not pre-filled by a locked placement, in id order.
    pub fn unfilled_locations(&self) -> Vec<LocationId> {
        (0..self.locations.len())
            .filter(|&i| self.locked_items[i].is_none())
            .collect()
    }
}

/// The mutable output of fill: one optional item per location. Locked
/// placements are seeded from the multiworld and cannot be replaced or
/// removed.
#[derive(Clone, Debug)]
pub struct Placement {
    items: Vec<Option<Item>>,
    locked: Vec<bool>,
}

impl Placement {
    pub fn new(multiworld: &Multiworld) -> Self {
        let items: Vec<Option<Item>> = multiworld.locked_items.clone();
        let locked: Vec<bool> = items.iter().map(|x| x.is_some()).collect();
        Placement { items, locked }
    }

    pub fn item(&self, loc: LocationId) -> Option<&Item> {
        self.items[loc].as_ref()
    }

    pub fn is_filled(&self, loc: LocationId) -> bool {
        self.items[loc].is_some()
    }

    pub fn is_locked(&self, loc: LocationId) -> bool {
        self.locked[loc]
    }

    pub fn place(&mut self, loc: LocationId, item: Item) -> Result<()> {
        ensure!(
            self.items[loc].is_none(),
            "location {} is already filled",
            loc
        );
        self.items[loc] = Some(item);
        Ok(())
    }

    /// Remove a tentative placement (for swap-based backtracking).
    pub fn remove(&mut self, loc: LocationId) -> Result<Item> {
        ensure!(!self.locked[loc], "location {} is locked", loc);
        match self.items[loc].take() {
            Some(item) => Ok(item),
            None => bail!("location {} is not filled", loc),
        }
    }

    pub fn num_filled(&self) -> usize {
        self.items.iter().filter(|x| x.is_some()).count()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

struct PlayerBuild {
    game_name: String,
    menu_region: Option<RegionId>,
    completion_rule: Rule,
    early_items: HashSet<String>,
    region_names: HashMap<String, RegionId>,
    location_names: HashSet<String>,
}

/// Builder for a `Multiworld`. Worlds add their regions, entrances,
/// locations, and items here; `freeze` validates the topology and compiles
/// all rules.
pub struct MultiworldBuilder {
    players: Vec<PlayerBuild>,
    regions: Vec<Region>,
    entrances: Vec<Entrance>,
    locations: Vec<Location>,
    item_pool: Vec<Item>,
    precollected: Vec<Item>,
    locked_items: Vec<Option<Item>>,
}

impl Default for MultiworldBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiworldBuilder {
    pub fn new() -> Self {
        MultiworldBuilder {
            players: vec![],
            regions: vec![],
            entrances: vec![],
            locations: vec![],
            item_pool: vec![],
            precollected: vec![],
            locked_items: vec![],
        }
    }

    pub fn add_player(&mut self, game_name: &str) -> PlayerId {
        let player = self.players.len();
        self.players.push(PlayerBuild {
            game_name: game_name.to_string(),
            menu_region: None,
            completion_rule: Rule::Always,
            early_items: HashSet::new(),
            region_names: HashMap::new(),
            location_names: HashSet::new(),
        });
        player
    }

    pub fn add_region(&mut self, player: PlayerId, name: &str) -> Result<RegionId> {
        ensure!(player < self.players.len(), "unknown player {}", player);
        let build = &mut self.players[player];
        if build.region_names.contains_key(name) {
            bail!("duplicate region {:?} for player {}", name, player);
        }
        let region_id = self.regions.len();
        build.region_names.insert(name.to_string(), region_id);
        if name == "Menu" {
            build.menu_region = Some(region_id);
        }
        self.regions.push(Region {
            name: name.to_string(),
            player,
            locations: vec![],
            exits: vec![],
        });
        Ok(region_id)
    }

    pub fn add_entrance(&mut self, from: RegionId, to: RegionId, rule: Rule) -> Result<EntranceId> {
        ensure!(from < self.regions.len(), "unknown region {}", from);
        ensure!(to < self.regions.len(), "unknown region {}", to);
        ensure!(
            self.regions[from].player == self.regions[to].player,
            "entrance crosses players: {:?} -> {:?}",
            self.regions[from].name,
            self.regions[to].name
        );
        let entrance_id = self.entrances.len();
        self.regions[from].exits.push(entrance_id);
        self.entrances.push(Entrance { from, to, rule });
        Ok(entrance_id)
    }

    pub fn add_location(
        &mut self,
        region: RegionId,
        name: &str,
        id: i64,
        access_rule: Rule,
    ) -> Result<LocationId> {
        ensure!(region < self.regions.len(), "unknown region {}", region);
        let player = self.regions[region].player;
        if !self.players[player].location_names.insert(name.to_string()) {
            bail!("duplicate location {:?} for player {}", name, player);
        }
        let location_id = self.locations.len();
        self.regions[region].locations.push(location_id);
        self.locations.push(Location {
            name: name.to_string(),
            id,
            player,
            region,
            access_rule,
            item_rule: ItemRule::Any,
            priority: false,
            event: false,
        });
        self.locked_items.push(None);
        Ok(location_id)
    }

    pub fn set_item_rule(&mut self, loc: LocationId, item_rule: ItemRule) {
        self.locations[loc].item_rule = item_rule;
    }

    pub fn set_priority(&mut self, loc: LocationId) {
        self.locations[loc].priority = true;
    }

    pub fn add_item(&mut self, item: Item) {
        self.item_pool.push(item);
    }

    pub fn precollect(&mut self, item: Item) {
        self.precollected.push(item);
    }

    /// Pre-place an item at a location, marking the location as a locked
    /// event: the fill engine will never move it, and sweeps collect it.
    pub fn place_locked(&mut self, loc: LocationId, item: Item) -> Result<()> {
        ensure!(loc < self.locations.len(), "unknown location {}", loc);
        ensure!(
            self.locked_items[loc].is_none(),
            "location {:?} already has a locked item",
            self.locations[loc].name
        );
        self.locations[loc].event = true;
        self.locked_items[loc] = Some(item);
        Ok(())
    }

    pub fn mark_early(&mut self, player: PlayerId, item_name: &str) {
        self.players[player].early_items.insert(item_name.to_string());
    }

    pub fn set_completion_rule(&mut self, player: PlayerId, rule: Rule) {
        self.players[player].completion_rule = rule;
    }

    pub fn freeze(self) -> Result<Multiworld> {
        let mut item_name_isv: IndexedVec<String> = IndexedVec::default();

        // Intern every item name that appears anywhere. Names referenced by
        // rules but absent from the pool stay at count 0, making such rules
        // unsatisfiable at solve time (detected then as a generation
        // failure, not here).
        for item in self
            .item_pool
            .iter()
            .chain(self.precollected.iter())
            .chain(self.locked_items.iter().flatten())
        {
            item_name_isv.add(&item.name);
        }
        fn intern_rule_names(rule: &Rule, isv: &mut IndexedVec<String>) {
            match rule {
                Rule::Has { item, .. } => {
                    isv.add(item.as_str());
                }
                Rule::HasAll(items) | Rule::HasAny(items) => {
                    for item in items {
                        isv.add(item.as_str());
                    }
                }
                Rule::And(children) | Rule::Or(children) => {
                    for child in children {
                        intern_rule_names(child, isv);
                    }
                }
                _ => {}
            }
        }
        for location in &self.locations {
            intern_rule_names(&location.access_rule, &mut item_name_isv);
        }
        for entrance in &self.entrances {
            intern_rule_names(&entrance.rule, &mut item_name_isv);
        }
        for build in &self.players {
            intern_rule_names(&build.completion_rule, &mut item_name_isv);
        }

        let mut menu_region: Vec<RegionId> = vec![];
        for (player, build) in self.players.iter().enumerate() {
            match build.menu_region {
                Some(region_id) => menu_region.push(region_id),
                None => bail!(
                    "player {} ({}) has no Menu region",
                    player,
                    build.game_name
                ),
            }
        }

        fn compile_rule(
            rule: &Rule,
            build: &PlayerBuild,
            isv: &IndexedVec<String>,
        ) -> Result<CompiledRule> {
            Ok(match rule {
                Rule::Always => CompiledRule::Always,
                Rule::Never => CompiledRule::Never,
                Rule::Has { item, count } => CompiledRule::Has {
                    item: isv.index_by_key[item],
                    count: *count,
                },
                Rule::HasAll(items) => {
                    CompiledRule::HasAll(items.iter().map(|i| isv.index_by_key[i]).collect())
                }
                Rule::HasAny(items) => {
                    CompiledRule::HasAny(items.iter().map(|i| isv.index_by_key[i]).collect())
                }
                Rule::CanReach { region } => match build.region_names.get(region) {
                    Some(&region_id) => CompiledRule::CanReach { region: region_id },
                    None => bail!(
                        "rule references unknown region {:?} in {}",
                        region,
                        build.game_name
                    ),
                },
                Rule::And(children) => CompiledRule::And(
                    children
                        .iter()
                        .map(|c| compile_rule(c, build, isv))
                        .collect::<Result<Vec<_>>>()?,
                ),
                Rule::Or(children) => CompiledRule::Or(
                    children
                        .iter()
                        .map(|c| compile_rule(c, build, isv))
                        .collect::<Result<Vec<_>>>()?,
                ),
            })
        }

        let mut compiled_access: Vec<CompiledRule> = vec![];
        for location in &self.locations {
            compiled_access.push(compile_rule(
                &location.access_rule,
                &self.players[location.player],
                &item_name_isv,
            )?);
        }
        let mut compiled_entrance: Vec<CompiledRule> = vec![];
        for entrance in &self.entrances {
            let player = self.regions[entrance.from].player;
            compiled_entrance.push(compile_rule(
                &entrance.rule,
                &self.players[player],
                &item_name_isv,
            )?);
        }
        let mut compiled_completion: Vec<CompiledRule> = vec![];
        for build in &self.players {
            compiled_completion.push(compile_rule(&build.completion_rule, build, &item_name_isv)?);
        }

        Ok(Multiworld {
            num_players: self.players.len(),
            game_names: self.players.iter().map(|p| p.game_name.clone()).collect(),
            menu_region,
            regions: self.regions,
            entrances: self.entrances,
            locations: self.locations,
            item_pool: self.item_pool,
            precollected: self.precollected,
            locked_items: self.locked_items,
            completion_rules: self
                .players
                .iter()
                .map(|p| p.completion_rule.clone())
                .collect(),
            early_items: self.players.into_iter().map(|p| p.early_items).collect(),
            item_name_isv,
            compiled_access,
            compiled_entrance,
            compiled_completion,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_flags_combine() {
        let mut flags = ItemFlags::PROGRESSION;
        assert!(flags.is_progression());
        assert!(!flags.is_filler());
        flags |= ItemFlags::DEPRIORITIZED;
        assert!(flags.is_progression());
        assert!(flags.is_deprioritized());

        let trap = ItemFlags::TRAP;
        assert!(trap.is_filler());
        assert!(!ItemFlags::USEFUL.is_filler());
        assert_eq!(format!("{:?}", ItemFlags::FILLER), "filler");
        assert_eq!(
            format!("{:?}", ItemFlags::PROGRESSION | ItemFlags::USEFUL),
            "progression|useful"
        );
    }

    #[test]
    fn freeze_requires_menu_region() {
        let mut builder = MultiworldBuilder::new();
        let player = builder.add_player("No Menu Game");
        builder.add_region(player, "Overworld").unwrap();
        assert!(builder.freeze().is_err());
    }

    #[test]
    fn freeze_rejects_unknown_rule_region() {
        let mut builder = MultiworldBuilder::new();
        let player = builder.add_player("Game");
        let menu = builder.add_region(player, "Menu").unwrap();
        builder
            .add_location(menu, "Spot", 1, Rule::can_reach("Nowhere"))
            .unwrap();
        assert!(builder.freeze().is_err());
    }

    #[test]
    fn freeze_interns_rule_only_item_names() {
        let mut builder = MultiworldBuilder::new();
        let player = builder.add_player("Game");
        let menu = builder.add_region(player, "Menu").unwrap();
        builder
            .add_location(menu, "Spot", 1, Rule::has("Phantom Item"))
            .unwrap();
        builder.add_item(Item::new("Real Item", 2, player, ItemFlags::FILLER));
        let multiworld = builder.freeze().unwrap();
        assert!(multiworld.item_name_id("Phantom Item").is_some());
        assert!(multiworld.item_name_id("Real Item").is_some());
        assert!(multiworld.item_name_id("Missing").is_none());
    }

    #[test]
    fn entrances_stay_within_one_player() {
        let mut builder = MultiworldBuilder::new();
        let p1 = builder.add_player("Game A");
        let p2 = builder.add_player("Game B");
        let menu1 = builder.add_region(p1, "Menu").unwrap();
        let menu2 = builder.add_region(p2, "Menu").unwrap();
        assert!(builder.add_entrance(menu1, menu2, Rule::Always).is_err());
    }

    #[test]
    fn item_rules_restrict_placement() {
        let mut builder = MultiworldBuilder::new();
        let p1 = builder.add_player("Game A");
        let p2 = builder.add_player("Game B");
        let menu1 = builder.add_region(p1, "Menu").unwrap();
        builder.add_region(p2, "Menu").unwrap();
        let own_only = builder
            .add_location(menu1, "Own Only", 1, Rule::Always)
            .unwrap();
        builder.set_item_rule(own_only, ItemRule::OwnWorldOnly);
        let no_sword = builder
            .add_location(menu1, "No Sword", 2, Rule::Always)
            .unwrap();
        builder.set_item_rule(no_sword, ItemRule::Disallow(vec!["Sword".to_string()]));
        let multiworld = builder.freeze().unwrap();

        let own_item = Item::new("Shield", 10, p1, ItemFlags::PROGRESSION);
        let other_item = Item::new("Shield", 10, p2, ItemFlags::PROGRESSION);
        assert!(multiworld.item_allowed_at(&own_item, own_only));
        assert!(!multiworld.item_allowed_at(&other_item, own_only));

        let sword = Item::new("Sword", 11, p1, ItemFlags::PROGRESSION);
        assert!(!multiworld.item_allowed_at(&sword, no_sword));
        assert!(multiworld.item_allowed_at(&own_item, no_sword));
    }

    #[test]
    fn placement_respects_locks() {
        let mut builder = MultiworldBuilder::new();
        let player = builder.add_player("Game");
        let menu = builder.add_region(player, "Menu").unwrap();
        let goal = builder
            .add_location(menu, "Goal", 1, Rule::Always)
            .unwrap();
        let open = builder
            .add_location(menu, "Open", 2, Rule::Always)
            .unwrap();
        builder
            .place_locked(goal, Item::new("Victory", 99, player, ItemFlags::PROGRESSION))
            .unwrap();
        let multiworld = builder.freeze().unwrap();

        let mut placement = Placement::new(&multiworld);
        assert!(placement.is_filled(goal));
        assert!(placement.is_locked(goal));
        assert!(placement.remove(goal).is_err());
        assert!(placement
            .place(goal, Item::new("Junk", 1, player, ItemFlags::FILLER))
            .is_err());

        placement
            .place(open, Item::new("Junk", 1, player, ItemFlags::FILLER))
            .unwrap();
        let removed = placement.remove(open).unwrap();
        assert_eq!(removed.name, "Junk");
        assert!(!placement.is_filled(open));
    }
}
