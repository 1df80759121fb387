//! Seeded coherent noise sampling for the road mask.

use noise::{NoiseFn, Perlin};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Offset pair shifting the sampled window of the noise field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SeedOffsets {
    pub x: i32,
    pub y: i32,
}

impl SeedOffsets {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// How the seed offsets are chosen.
#[derive(Clone, Debug)]
pub struct SeedConfig {
    /// Use exactly these offsets when set.
    pub specific: Option<SeedOffsets>,
    /// Exclusive upper bound for randomly drawn offsets.
    pub max_offset: (i32, i32),
    /// Seed for the offset generator so random layouts are reproducible.
    pub rng_seed: u64,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            specific: None,
            max_offset: (10_000, 10_000),
            rng_seed: 42,
        }
    }
}

impl SeedConfig {
    pub fn specific(x: i32, y: i32) -> Self {
        Self {
            specific: Some(SeedOffsets::new(x, y)),
            ..Default::default()
        }
    }

    /// Pick the offsets for this run.
    pub fn resolve(&self) -> SeedOffsets {
        if let Some(offsets) = self.specific {
            return offsets;
        }

        let mut rng = StdRng::seed_from_u64(self.rng_seed);
        SeedOffsets::new(
            rng.gen_range(0..self.max_offset.0.max(1)),
            rng.gen_range(0..self.max_offset.1.max(1)),
        )
    }
}

/// Deterministic 2D noise in `[0, 1]`, shifted by the seed offsets.
#[derive(Clone, Copy, Debug)]
pub struct NoiseFieldSampler {
    perlin: Perlin,
    offsets: SeedOffsets,
}

impl NoiseFieldSampler {
    pub fn new(offsets: SeedOffsets) -> Self {
        Self {
            perlin: Perlin::new(Perlin::DEFAULT_SEED),
            offsets,
        }
    }

    pub fn sample(&self, x: f64, y: f64) -> f64 {
        let value = self
            .perlin
            .get([x + self.offsets.x as f64, y + self.offsets.y as f64]);
        ((value + 1.0) * 0.5).clamp(0.0, 1.0)
    }
}
