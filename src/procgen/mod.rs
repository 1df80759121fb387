//! Procedural town generation.
//!
//! - Seeded noise thresholded into a road mask, repaired to one island
//! - Road segment graph from a depth-first walk of the mask
//! - Parcel boundaries resolved by tick-driven marker relaxation
//! - Minimum bounding boxes and recursive lot subdivision

pub mod bounding_box;
pub mod connectivity;
pub mod lot_geometry;
pub mod markers;
pub mod noise_field;
pub mod occlusion;
pub mod parcel_resolver;
pub mod parcels;
pub mod road_generator;
pub mod road_mask;
pub mod roads;

#[cfg(test)]
pub(crate) mod fixtures {
    use super::markers::{MarkerArena, Parcel};
    use super::occlusion::RoadOccluder;
    use super::parcel_resolver::{ParcelConfig, ParcelResolver};
    use super::road_generator::build_road_network;
    use crate::world::grid::{GridPoint, RoadMask};
    use crate::world::WorldConfig;

    /// Two horizontal roads joined on the right, open on the left.
    pub fn u_mask() -> RoadMask {
        let mut mask = RoadMask::new(16, 16);
        for col in 2..=12 {
            mask.set(GridPoint::new(2, col), true);
            mask.set(GridPoint::new(10, col), true);
        }
        for row in 2..=10 {
            mask.set(GridPoint::new(row, 12), true);
        }
        mask
    }

    /// Markers and parcels of a fully resolved mask, default settings.
    pub fn resolved(mask: &RoadMask) -> (MarkerArena, Vec<Parcel>) {
        let world = WorldConfig::default();
        let config = ParcelConfig::default();
        let network = build_road_network(mask, &world);
        let occluder = RoadOccluder::from_network(
            &network,
            world.cell_size,
            world.road_half_width,
            config.stub_length(),
        );

        let mut resolver = ParcelResolver::new(network, occluder, config);
        resolver.run_to_completion();
        let parcels = resolver.materialize();
        let (_, _, markers) = resolver.into_parts();
        (markers, parcels)
    }
}
