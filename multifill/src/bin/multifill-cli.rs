use anyhow::Result;
use clap::Parser;
use log::info;
use multifill::demo::KeyDungeonWorld;
use multifill::fill::{distribute_items_restrictive, GenerationConfig};
use multifill_game::registry::WorldRegistry;
use std::path::PathBuf;

#[derive(Parser)]
struct Args {
    #[arg(long)]
    seed: Option<usize>,
    #[arg(long, default_value_t = 2)]
    players: usize,
    #[arg(long, default_value_t = 0.5)]
    balancing_factor: f64,
    /// Write the placement and playthrough spheres as JSON.
    #[arg(long)]
    output_spoiler: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut registry = WorldRegistry::new();
    for _ in 0..args.players {
        registry.register(Box::new(KeyDungeonWorld));
    }
    let multiworld = registry.build()?;

    let seed = args.seed.unwrap_or_else(rand::random);
    let config = GenerationConfig {
        balancing_factor: args.balancing_factor,
        ..GenerationConfig::default()
    };
    let generation = distribute_items_restrictive(&multiworld, &registry, &config, seed)?;

    for sphere in &generation.spheres {
        for entry in &sphere.collected {
            info!(
                "sphere {}: {} (player {}) <- {} (player {})",
                sphere.step, entry.location, entry.location_player, entry.item, entry.item_player
            );
        }
    }
    if let Some(path) = &args.output_spoiler {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, &generation)?;
        info!("wrote spoiler to {}", path.display());
    }
    Ok(())
}
