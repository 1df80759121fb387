//! Towngen - headless town generator.
//!
//! Runs the generation pipeline inside a minimal Bevy app, one resolver
//! tick per frame, logs the result and exits.

use bevy::app::ScheduleRunnerPlugin;
use bevy::log::LogPlugin;
use bevy::prelude::*;
use std::time::Duration;

use towngen::pipeline::TownGenerationFailed;
use towngen::{TownConfig, TownGenPlugin, TownGenerated, TownLayout};

fn main() {
    let config = TownConfig {
        dump_path: std::env::args().nth(1).map(Into::into),
        ..default()
    };

    App::new()
        .add_plugins(
            MinimalPlugins.set(ScheduleRunnerPlugin::run_loop(Duration::from_millis(1))),
        )
        .add_plugins(LogPlugin::default())
        .insert_resource(config)
        .add_plugins(TownGenPlugin)
        .add_systems(Update, (report_town, exit_on_failure))
        .run();
}

fn report_town(
    mut generated: EventReader<TownGenerated>,
    layout: Option<Res<TownLayout>>,
    config: Res<TownConfig>,
    mut exit: EventWriter<AppExit>,
) {
    let (Some(event), Some(layout)) = (generated.read().next(), layout) else {
        return;
    };

    let stats = &event.stats;
    info!(
        "Seed ({}, {}): {} road cells from {} islands, {} segments, {} intersections",
        layout.seed.x,
        layout.seed.y,
        stats.road_cells,
        stats.initial_islands,
        stats.segments,
        stats.intersections
    );
    info!(
        "{} markers settled in {} ticks ({} stalled); {} closures, {} abandoned",
        stats.markers,
        stats.relax_ticks,
        stats.stalled_markers,
        stats.closures,
        stats.abandoned_closures
    );
    info!(
        "{} parcels subdivided into {} lots ({} unsplittable)",
        stats.parcels, stats.lots, stats.unsplittable_lots
    );
    if let Some((min, max)) = layout.bounds() {
        info!("Lot extents: {} to {}", min, max);
    }

    if let Some(path) = &config.dump_path {
        match layout.write_dump(path) {
            Ok(()) => info!("Road mask written to {}", path.display()),
            Err(e) => error!("Could not write road mask to {}: {}", path.display(), e),
        }
    }

    exit.send(AppExit::Success);
}

fn exit_on_failure(
    mut failed: EventReader<TownGenerationFailed>,
    mut exit: EventWriter<AppExit>,
) {
    if let Some(TownGenerationFailed(e)) = failed.read().next() {
        error!("Aborting: {}", e);
        exit.send(AppExit::error());
    }
}
