//! Towngen - procedural town layouts.
//!
//! A seeded noise field is thresholded into roads, repaired into a single
//! connected network, bordered with closed parcels and cut into lots.

pub mod pipeline;
pub mod procgen;
pub mod world;

pub use pipeline::{
    ConfigError, GenerationStats, TownConfig, TownGenPlugin, TownGenerated, TownLayout,
};
