//! Point-like primitives and their per-frame projection.

pub mod changes;
pub mod projection;

pub use changes::ChangeSet;
pub use projection::{CpuProjector, ProjectionProvider, ProjectionRecord};

use glam::Vec3;
use rand::{rngs::SmallRng, Rng, SeedableRng};

/// One world-space splat. `radius` is the standard deviation of the
/// isotropic footprint in world units.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Splat {
    pub position: Vec3,
    pub radius: f32,
    pub opacity: f32,
    pub color: [f32; 3],
}

#[derive(Clone, Debug, Default)]
pub struct SplatCloud {
    splats: Vec<Splat>,
}

impl SplatCloud {
    pub fn new(splats: Vec<Splat>) -> Self {
        Self { splats }
    }

    /// Seeded cloud of `count` splats inside a cube of half extent
    /// `half_size` around the origin.
    pub fn random(count: usize, half_size: f32, seed: u64) -> Self {
        let mut rng = SmallRng::seed_from_u64(seed);
        let splats = (0..count)
            .map(|_| Splat {
                position: Vec3::new(
                    rng.gen_range(-half_size..half_size),
                    rng.gen_range(-half_size..half_size),
                    rng.gen_range(-half_size..half_size),
                ),
                radius: rng.gen_range(0.01..0.08) * half_size,
                opacity: rng.gen_range(0.2..1.0),
                color: [rng.gen(), rng.gen(), rng.gen()],
            })
            .collect();
        Self { splats }
    }

    pub fn splats(&self) -> &[Splat] {
        &self.splats
    }

    pub fn len(&self) -> usize {
        self.splats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.splats.is_empty()
    }
}
