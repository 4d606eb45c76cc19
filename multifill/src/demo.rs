use anyhow::Result;
use multifill_game::registry::World;
use multifill_game::{Item, ItemFlags, MultiworldBuilder, PlayerId, Rule};

const ID_BASE: i64 = 319872598000;

/// A small self-contained game for exercising the pipeline end to end: two
/// key-gated rooms off a starting room, with the goal event locked behind
/// one of them. Ten progression keys plus one filler item match the eleven
/// open locations exactly.
pub struct KeyDungeonWorld;

const LEFT_KEYS: [&str; 5] = [
    "Left Room Key 1",
    "Left Room Key 2",
    "Left Room Key 3",
    "Left Room Key 4",
    "Left Room Key 5",
];
const RIGHT_KEYS: [&str; 5] = [
    "Right Room Key 1",
    "Right Room Key 2",
    "Right Room Key 3",
    "Right Room Key 4",
    "Right Room Key 5",
];

impl World for KeyDungeonWorld {
    fn game_name(&self) -> &str {
        "Key Dungeon"
    }

    fn create(&self, builder: &mut MultiworldBuilder, player: PlayerId) -> Result<()> {
        let menu = builder.add_region(player, "Menu")?;
        let starting_room = builder.add_region(player, "Starting Room")?;
        let left_room = builder.add_region(player, "Left Room")?;
        let right_room = builder.add_region(player, "Right Room")?;

        builder.add_entrance(menu, starting_room, Rule::Always)?;
        builder.add_entrance(starting_room, left_room, Rule::has_all(&LEFT_KEYS))?;
        builder.add_entrance(starting_room, right_room, Rule::has_all(&RIGHT_KEYS))?;

        for i in 0..5 {
            builder.add_location(
                starting_room,
                &format!("Starting Room Location {}", i + 1),
                ID_BASE + i,
                Rule::Always,
            )?;
        }
        builder.add_location(left_room, "Left Room Location 1", ID_BASE + 5, Rule::Always)?;
        for i in 0..5 {
            builder.add_location(
                right_room,
                &format!("Right Room Location {}", i + 1),
                ID_BASE + 6 + i,
                Rule::Always,
            )?;
        }
        let final_location =
            builder.add_location(right_room, "Final Location", ID_BASE + 50, Rule::Always)?;

        for (i, name) in LEFT_KEYS.iter().chain(RIGHT_KEYS.iter()).enumerate() {
            builder.add_item(Item::new(name, ID_BASE + i as i64, player, ItemFlags::PROGRESSION));
        }
        builder.add_item(Item::new("Useless", ID_BASE + 10, player, ItemFlags::FILLER));
        builder.place_locked(
            final_location,
            Item::new("Victory", ID_BASE + 50, player, ItemFlags::PROGRESSION),
        )?;
        builder.set_completion_rule(player, Rule::has("Victory"));
        Ok(())
    }
}
