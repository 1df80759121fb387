//! Town generation from seed to lots, headless or inside a Bevy app.
//!
//! Stages run in order: noise mask, connectivity repair, road graph, parcel
//! resolution, subdivision. Parcel resolution is the only stage that takes
//! more than one step; [`TownGenPlugin`] advances it one tick per frame.

use bevy::prelude::*;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use crate::procgen::connectivity::{resolve_connectivity, ConnectivityReport};
use crate::procgen::lot_geometry::polygon_bounds;
use crate::procgen::markers::{MarkerArena, Parcel};
use crate::procgen::noise_field::{NoiseFieldSampler, SeedConfig, SeedOffsets};
use crate::procgen::occlusion::{Occluder, RoadOccluder, SurfaceClass};
use crate::procgen::parcel_resolver::{ParcelConfig, ParcelResolver, ResolverPhase};
use crate::procgen::parcels::{Lot, ParcelSubdivider, SubdivisionConfig};
use crate::procgen::road_generator::build_road_network;
use crate::procgen::road_mask::{generate_road_mask, RoadMaskConfig};
use crate::procgen::roads::RoadNetwork;
use crate::world::grid::RoadMask;
use crate::world::WorldConfig;

/// Settings for a whole generation run.
#[derive(Resource, Clone, Debug, Default)]
pub struct TownConfig {
    pub mask: RoadMaskConfig,
    pub seed: SeedConfig,
    pub world: WorldConfig,
    pub parcel: ParcelConfig,
    pub subdivision: SubdivisionConfig,
    /// Write the road mask here once generated.
    pub dump_path: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ConfigError {
    EmptyGrid { width: usize, length: usize },
    Resolution(f64),
    Threshold(f64),
    /// A length or distance that must be positive and finite.
    NotPositive { field: &'static str, value: f32 },
    /// A step or tick bound of zero.
    ZeroBound(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::EmptyGrid { width, length } => {
                write!(f, "grid of {width} x {length} cells has no area")
            }
            ConfigError::Resolution(r) => write!(f, "noise resolution {r} must be positive"),
            ConfigError::Threshold(t) => write!(f, "road threshold {t} is outside [0, 1]"),
            ConfigError::NotPositive { field, value } => {
                write!(f, "{field} must be positive, got {value}")
            }
            ConfigError::ZeroBound(field) => write!(f, "{field} must be at least 1"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl TownConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mask = &self.mask;
        if mask.width == 0 || mask.length == 0 {
            return Err(ConfigError::EmptyGrid {
                width: mask.width,
                length: mask.length,
            });
        }
        if !(mask.resolution.is_finite() && mask.resolution > 0.0) {
            return Err(ConfigError::Resolution(mask.resolution));
        }
        if !(0.0..=1.0).contains(&mask.threshold) {
            return Err(ConfigError::Threshold(mask.threshold));
        }

        let positive = [
            ("cell_size", self.world.cell_size),
            ("road_half_width", self.world.road_half_width),
            ("marker_offset", self.parcel.marker_offset),
            ("end_cap_depth", self.parcel.end_cap_depth),
            ("max_link_distance", self.parcel.max_link_distance),
            ("max_closure_distance", self.parcel.max_closure_distance),
            ("min_lot_area", self.subdivision.min_lot_area),
            ("cut_buffer", self.subdivision.cut_buffer),
        ];
        for (field, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::NotPositive { field, value });
            }
        }

        if self.parcel.max_cycle_steps == 0 {
            return Err(ConfigError::ZeroBound("max_cycle_steps"));
        }
        if self.parcel.max_ticks == 0 {
            return Err(ConfigError::ZeroBound("max_ticks"));
        }
        if self.parcel.stall_patience == 0 {
            return Err(ConfigError::ZeroBound("stall_patience"));
        }

        Ok(())
    }
}

/// Counters gathered across all stages.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GenerationStats {
    pub road_cells: usize,
    pub initial_islands: usize,
    pub connectivity_rounds: usize,
    pub paths_carved: usize,
    pub cells_carved: usize,
    pub segments: usize,
    pub intersections: usize,
    pub markers: usize,
    pub stalled_markers: usize,
    pub relax_ticks: u32,
    pub closures: usize,
    pub abandoned_closures: usize,
    pub parcels: usize,
    pub lots: usize,
    pub unsplittable_lots: usize,
}

/// A town whose parcel boundaries are still being resolved.
#[derive(Resource)]
pub struct PendingTown {
    seed: SeedOffsets,
    mask: RoadMask,
    connectivity: ConnectivityReport,
    resolver: ParcelResolver,
    subdivision: SubdivisionConfig,
}

impl PendingTown {
    /// Run every stage up to parcel resolution.
    pub fn start(config: &TownConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let seed = config.seed.resolve();
        info!("Generating town with seed offsets ({}, {})", seed.x, seed.y);

        let sampler = NoiseFieldSampler::new(seed);
        let mask = generate_road_mask(&config.mask, &sampler);
        Ok(Self::from_mask(mask, seed, config))
    }

    /// Continue from an existing mask, repairing its connectivity first.
    pub fn from_mask(mut mask: RoadMask, seed: SeedOffsets, config: &TownConfig) -> Self {
        let connectivity = resolve_connectivity(&mut mask);
        let network = build_road_network(&mask, &config.world);
        let occluder = RoadOccluder::from_network(
            &network,
            config.world.cell_size,
            config.world.road_half_width,
            config.parcel.stub_length(),
        );
        let resolver = ParcelResolver::new(network, occluder, config.parcel.clone());

        Self {
            seed,
            mask,
            connectivity,
            resolver,
            subdivision: config.subdivision.clone(),
        }
    }

    pub fn advance_tick(&mut self) -> ResolverPhase {
        self.resolver.advance_tick()
    }

    pub fn is_resolved(&self) -> bool {
        self.resolver.is_complete()
    }

    pub fn resolver(&self) -> &ParcelResolver {
        &self.resolver
    }

    /// Materialize parcels and subdivide them. Resolution is driven to
    /// completion first if it has not finished.
    pub fn finish(mut self) -> TownLayout {
        self.resolver.run_to_completion();

        let parcels = self.resolver.materialize();
        let context = self.resolver.context().clone();
        let (roads, occluder, mut markers) = self.resolver.into_parts();
        let placed_markers = markers.len();

        let lots = ParcelSubdivider::new(&mut markers, &self.subdivision).subdivide_all(&parcels);

        let stats = GenerationStats {
            road_cells: self.mask.road_count(),
            initial_islands: self.connectivity.initial_islands,
            connectivity_rounds: self.connectivity.rounds,
            paths_carved: self.connectivity.paths_carved,
            cells_carved: self.connectivity.cells_carved,
            segments: roads.segment_count(),
            intersections: roads.intersection_count(),
            markers: placed_markers,
            stalled_markers: context.stalled.len(),
            relax_ticks: context.tick,
            closures: context.closures,
            abandoned_closures: context.abandoned,
            parcels: parcels.len(),
            lots: lots.len(),
            unsplittable_lots: lots.iter().filter(|l| !l.is_split_cleanly()).count(),
        };

        info!(
            "Town ready: {} road cells, {} parcels, {} lots",
            stats.road_cells, stats.parcels, stats.lots
        );

        TownLayout {
            seed: self.seed,
            mask: self.mask,
            roads,
            markers,
            parcels,
            lots,
            occluder,
            stats,
        }
    }
}

/// Finished town layout.
#[derive(Resource)]
pub struct TownLayout {
    pub seed: SeedOffsets,
    pub mask: RoadMask,
    pub roads: RoadNetwork,
    /// Every marker, including the cut markers added by subdivision.
    pub markers: MarkerArena,
    /// Parcels as closed by the resolver, before subdivision.
    pub parcels: Vec<Parcel>,
    pub lots: Vec<Lot>,
    pub occluder: RoadOccluder,
    pub stats: GenerationStats,
}

impl TownLayout {
    /// Generate a town with no host loop, stepping the resolver until done.
    pub fn generate(config: &TownConfig) -> Result<Self, ConfigError> {
        Ok(PendingTown::start(config)?.finish())
    }

    /// Min and max corners over all lot polygons.
    pub fn bounds(&self) -> Option<(Vec2, Vec2)> {
        let points: Vec<Vec2> = self.lots.iter().flat_map(|l| l.polygon.iter().copied()).collect();
        (!points.is_empty()).then(|| polygon_bounds(&points))
    }

    pub fn surface_at(&self, point: Vec2) -> SurfaceClass {
        self.occluder.classify(point)
    }

    pub fn write_dump(&self, path: impl AsRef<Path>) -> io::Result<()> {
        self.mask.write_dump(path)
    }
}

/// Sent once the layout resource is in place.
#[derive(Event, Clone, Debug)]
pub struct TownGenerated {
    pub stats: GenerationStats,
}

/// Sent instead of [`TownGenerated`] when the configuration is rejected.
#[derive(Event, Clone, Debug)]
pub struct TownGenerationFailed(pub ConfigError);

pub struct TownGenPlugin;

impl Plugin for TownGenPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<TownConfig>()
            .add_event::<TownGenerated>()
            .add_event::<TownGenerationFailed>()
            .add_systems(Startup, begin_generation)
            .add_systems(
                Update,
                (
                    advance_parcel_resolution.run_if(resource_exists::<PendingTown>),
                    finalize_town.run_if(should_finalize),
                )
                    .chain(),
            );
    }
}

fn begin_generation(
    mut commands: Commands,
    config: Res<TownConfig>,
    mut failed: EventWriter<TownGenerationFailed>,
) {
    match PendingTown::start(&config) {
        Ok(pending) => commands.insert_resource(pending),
        Err(e) => {
            error!("Town generation not started: {}", e);
            failed.send(TownGenerationFailed(e));
        }
    }
}

fn advance_parcel_resolution(mut pending: ResMut<PendingTown>) {
    pending.advance_tick();
}

fn should_finalize(pending: Option<Res<PendingTown>>) -> bool {
    pending.is_some_and(|p| p.is_resolved())
}

fn finalize_town(world: &mut World) {
    let Some(pending) = world.remove_resource::<PendingTown>() else {
        return;
    };
    let layout = pending.finish();
    let stats = layout.stats.clone();
    world.insert_resource(layout);
    world.send_event(TownGenerated { stats });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procgen::bounding_box::{is_convex, minimum_bounding_box};
    use crate::procgen::connectivity::find_islands;
    use crate::procgen::fixtures::u_mask;
    use crate::procgen::lot_geometry::{polygon_area, self_crossing};
    use crate::procgen::parcels::LotOutcome;
    use petgraph::unionfind::UnionFind;

    fn scenario_config() -> TownConfig {
        TownConfig {
            mask: RoadMaskConfig {
                width: 16,
                length: 16,
                resolution: 4.0,
                threshold: 0.5,
            },
            seed: SeedConfig::specific(3, 7),
            ..Default::default()
        }
    }

    #[test]
    fn seeded_scenario_resolves_to_one_island_and_valid_parcels() {
        let mut pending = PendingTown::start(&scenario_config()).unwrap();
        assert_eq!(find_islands(&pending.mask).len(), 1);

        let mut guard = 0;
        while !pending.is_resolved() {
            pending.advance_tick();
            guard += 1;
            assert!(guard < 1000, "resolver did not complete");
        }

        let parcels = pending.resolver().materialize();
        let markers = pending.resolver().markers();
        for parcel in &parcels {
            assert!(parcel.validate(markers).is_ok());
            if parcel.markers.len() >= 4 {
                assert!(minimum_bounding_box(&parcel.polygon(markers)).area > 0.0);
            }
        }

        let parcel = parcels
            .iter()
            .find(|p| p.markers.len() >= 4)
            .cloned()
            .expect("a parcel with at least four markers");
        let parent_area = parcel.area(markers);
        assert!(parent_area > 0.0);

        let (_, _, mut arena) = pending.resolver.into_parts();
        let config = SubdivisionConfig {
            min_lot_area: parent_area * 0.5,
            ..Default::default()
        };
        let halves = ParcelSubdivider::new(&mut arena, &config)
            .split_once(&parcel.markers)
            .unwrap();
        let sum: f32 = halves
            .into_iter()
            .map(|markers| {
                Parcel {
                    markers,
                    is_left_cycle: parcel.is_left_cycle,
                }
                .area(&arena)
            })
            .sum();
        assert!((sum - parent_area).abs() < 1e-2 * parent_area.max(1.0));
    }

    #[test]
    fn parcels_are_simple_and_splits_conserve_area_across_seeds() {
        for size in [16, 32] {
            for rng_seed in 0..24 {
                let config = TownConfig {
                    mask: RoadMaskConfig {
                        width: size,
                        length: size,
                        ..Default::default()
                    },
                    seed: SeedConfig {
                        rng_seed,
                        ..Default::default()
                    },
                    ..Default::default()
                };
                let label = format!("size {size} seed {rng_seed}");

                let mut pending = PendingTown::start(&config).unwrap();
                pending.resolver.run_to_completion();
                let parcels = pending.resolver().materialize();
                let markers = pending.resolver().markers();

                for parcel in &parcels {
                    assert_eq!(parcel.validate(markers), Ok(()), "{label}");
                    assert!(self_crossing(&parcel.polygon(markers)).is_none(), "{label}");
                }

                // One cut per parcel, each on its own copy of the arena.
                for parcel in &parcels {
                    let mut arena = markers.clone();
                    let parent_area = parcel.area(&arena);
                    let parent_box = minimum_bounding_box(&parcel.polygon(&arena)).area;
                    let subdivision = SubdivisionConfig::default();
                    let split = ParcelSubdivider::new(&mut arena, &subdivision)
                        .split_once(&parcel.markers);
                    let Ok(halves) = split else {
                        continue;
                    };

                    let polygons: Vec<Vec<Vec2>> = halves
                        .iter()
                        .map(|c| c.iter().map(|&id| arena.position(id)).collect())
                        .collect();
                    let sum: f32 = polygons.iter().map(|p| polygon_area(p)).sum();
                    assert!(
                        (sum - parent_area).abs() < 1e-2 * parent_area.max(1.0),
                        "{label}: {sum} vs {parent_area}"
                    );
                    for polygon in polygons.iter().filter(|p| is_convex(p)) {
                        assert!(minimum_bounding_box(polygon).area < parent_box, "{label}");
                    }
                }

                let layout = pending.finish();
                let parcel_area: f32 = layout.parcels.iter().map(|p| p.area(&layout.markers)).sum();
                let lot_area: f32 = layout.lots.iter().map(|l| l.area).sum();
                assert!(
                    (parcel_area - lot_area).abs() < 1e-3 * parcel_area.max(1.0),
                    "{label}: parcels {parcel_area} vs lots {lot_area}"
                );
            }
        }
    }

    #[test]
    fn generation_is_deterministic() {
        let config = scenario_config();
        let a = TownLayout::generate(&config).unwrap();
        let b = TownLayout::generate(&config).unwrap();

        assert_eq!(a.seed, SeedOffsets::new(3, 7));
        assert_eq!(a.mask.to_text(), b.mask.to_text());
        assert_eq!(a.stats, b.stats);
        assert_eq!(a.stats.lots, a.lots.len());
    }

    #[test]
    fn road_mask_is_connected_per_union_find() {
        let layout = TownLayout::generate(&TownConfig {
            seed: SeedConfig {
                rng_seed: 11,
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap();

        let mask = &layout.mask;
        let index = |r: usize, c: usize| r * mask.width + c;
        let mut sets = UnionFind::<usize>::new(mask.length * mask.width);
        for cell in mask.iter_roads() {
            for n in mask.neighbors8(cell) {
                if mask.is_road(n) {
                    sets.union(index(cell.row, cell.col), index(n.row, n.col));
                }
            }
        }
        let mut roots: Vec<usize> = mask
            .iter_roads()
            .map(|c| sets.find(index(c.row, c.col)))
            .collect();
        roots.sort_unstable();
        roots.dedup();
        assert!(roots.len() <= 1);
        assert_eq!(layout.stats.segments, mask.road_count());
    }

    #[test]
    fn u_layout_reports_lots_bounds_and_surfaces() {
        let config = TownConfig::default();
        let layout = PendingTown::from_mask(u_mask(), SeedOffsets::new(0, 0), &config).finish();

        assert_eq!(layout.stats.initial_islands, 1);
        assert_eq!(layout.stats.paths_carved, 0);
        assert_eq!(layout.stats.parcels, 5);
        assert_eq!(layout.stats.closures, 5);
        assert_eq!(layout.stats.stalled_markers, 0);
        assert!(layout.stats.lots >= 16);
        assert!(layout
            .lots
            .iter()
            .filter(|l| l.outcome == LotOutcome::MinimumArea)
            .count()
            >= 16);

        let (min, max) = layout.bounds().unwrap();
        assert!((min - Vec2::new(20.0, 22.0)).length() < 1.5);
        assert!(max.x > 116.0 && max.y > 96.0);

        assert_eq!(layout.surface_at(Vec2::new(50.0, 21.0)), SurfaceClass::Road);
        assert_eq!(layout.surface_at(Vec2::new(50.0, 60.0)), SurfaceClass::Ground);
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let mut config = TownConfig::default();
        config.mask.width = 0;
        assert!(matches!(config.validate(), Err(ConfigError::EmptyGrid { .. })));

        let mut config = TownConfig::default();
        config.mask.threshold = 1.5;
        assert_eq!(config.validate(), Err(ConfigError::Threshold(1.5)));

        let mut config = TownConfig::default();
        config.parcel.max_link_distance = -1.0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::NotPositive {
                field: "max_link_distance",
                value: -1.0
            })
        );

        let mut config = TownConfig::default();
        config.parcel.stall_patience = 0;
        assert!(TownLayout::generate(&config).is_err());
    }

    #[test]
    fn plugin_advances_one_tick_per_frame() {
        let mut app = App::new();
        app.insert_resource(scenario_config())
            .add_plugins(TownGenPlugin);

        app.update();
        let first_tick = app
            .world()
            .get_resource::<PendingTown>()
            .map(|p| p.resolver().context().tick);
        assert_eq!(first_tick, Some(1));

        let mut frames = 1;
        while !app.world().contains_resource::<TownLayout>() {
            app.update();
            frames += 1;
            assert!(frames < 1000, "plugin never finished");
        }

        let layout = app.world().resource::<TownLayout>();
        assert_eq!(frames, layout.stats.relax_ticks + 1);
        assert!(!app.world().contains_resource::<PendingTown>());
        assert!(!app.world().resource::<Events<TownGenerated>>().is_empty());

        let headless = TownLayout::generate(&scenario_config()).unwrap();
        assert_eq!(layout.stats, headless.stats);
    }

    #[test]
    fn plugin_reports_rejected_config() {
        let mut config = scenario_config();
        config.mask.length = 0;

        let mut app = App::new();
        app.insert_resource(config).add_plugins(TownGenPlugin);
        app.update();

        assert!(!app.world().contains_resource::<PendingTown>());
        assert!(!app
            .world()
            .resource::<Events<TownGenerationFailed>>()
            .is_empty());
    }
}
