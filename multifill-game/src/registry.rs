use anyhow::Result;

use crate::{Item, LocationId, Multiworld, MultiworldBuilder, PlayerId};

/// A game plugin: declares one player's regions, entrances, locations, and
/// item pool. Registered once at startup with `WorldRegistry`; the registry
/// is the only discovery mechanism (no global mutable state).
pub trait World {
    fn game_name(&self) -> &str;

    /// Populate the builder with this player's topology, pool, and
    /// completion rule.
    fn create(&self, builder: &mut MultiworldBuilder, player: PlayerId) -> Result<()>;

    /// Invoked once per player partway through fill, with the partitioned
    /// candidate pools and the candidate location queue. May amend item
    /// classifications in place (e.g. deprioritize progression, promote
    /// filler to useful) before placement proceeds. This is the sole
    /// supported extension point for cross-cutting placement policy.
    fn fill_hook(
        &self,
        _progression: &mut Vec<Item>,
        _useful: &mut Vec<Item>,
        _filler: &mut Vec<Item>,
        _fill_locations: &[LocationId],
    ) {
    }
}

/// Explicit plugin registration, consumed once into a frozen `Multiworld`.
/// Player ids are assigned in registration order.
#[derive(Default)]
pub struct WorldRegistry {
    worlds: Vec<Box<dyn World>>,
}

impl WorldRegistry {
    pub fn new() -> Self {
        WorldRegistry { worlds: vec![] }
    }

    pub fn register(&mut self, world: Box<dyn World>) {
        self.worlds.push(world);
    }

    pub fn num_players(&self) -> usize {
        self.worlds.len()
    }

    pub fn world(&self, player: PlayerId) -> &dyn World {
        self.worlds[player].as_ref()
    }

    pub fn worlds(&self) -> impl Iterator<Item = (PlayerId, &dyn World)> {
        self.worlds.iter().enumerate().map(|(i, w)| (i, w.as_ref()))
    }

    pub fn build(&self) -> Result<Multiworld> {
        let mut builder = MultiworldBuilder::new();
        for world in &self.worlds {
            let player = builder.add_player(world.game_name());
            world.create(&mut builder, player)?;
        }
        builder.freeze()
    }
}
