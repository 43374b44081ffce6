use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3};
use rayon::prelude::*;

use super::{Splat, SplatCloud};
use crate::camera::Camera;
use crate::error::{SortError, SortResult};
use crate::tiles::{ScreenRect, TileGrid};

/// Footprint extent in standard deviations.
const FOOTPRINT_SIGMAS: f32 = 3.0;

/// Fixed-width per-primitive payload written by the projection step.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ProjectionRecord {
    pub mean: [f32; 2],          // 8 bytes, pixels
    pub depth: f32,              // 4 bytes, view-space distance
    pub radius: f32,             // 4 bytes, pixels
    pub conic_opacity: [f32; 4], // 16 bytes
    pub color: [f32; 3],         // 12 bytes
    pub visible: u32,            // 4 bytes (48 byte stride)
}

impl ProjectionRecord {
    pub fn is_visible(&self) -> bool {
        self.visible != 0
    }
}

/// Source of per-frame projection records.
///
/// `project` fills exactly `primitive_count()` records and rects for the
/// given camera. Implementations must reject malformed cameras with
/// [`SortError::InvalidCamera`].
pub trait ProjectionProvider: Send + Sync {
    fn primitive_count(&self) -> usize;

    fn project(
        &self,
        camera: &Camera,
        grid: &TileGrid,
        records: &mut [ProjectionRecord],
        rects: &mut [ScreenRect],
    ) -> SortResult<()>;
}

/// In-process projection of a [`SplatCloud`] with isotropic footprints.
pub struct CpuProjector {
    cloud: SplatCloud,
}

impl CpuProjector {
    pub fn new(cloud: SplatCloud) -> Self {
        Self { cloud }
    }

    pub fn cloud(&self) -> &SplatCloud {
        &self.cloud
    }
}

struct FrameTransform {
    view: Mat4,
    view_proj: Mat4,
    focal: f32,
    near: f32,
    far: f32,
    size: Vec2,
}

impl ProjectionProvider for CpuProjector {
    fn primitive_count(&self) -> usize {
        self.cloud.len()
    }

    fn project(
        &self,
        camera: &Camera,
        grid: &TileGrid,
        records: &mut [ProjectionRecord],
        rects: &mut [ScreenRect],
    ) -> SortResult<()> {
        camera.validate()?;
        let expected = self.cloud.len();
        if records.len() != expected || rects.len() != expected {
            return Err(SortError::PrimitiveCountMismatch {
                expected,
                actual: records.len().min(rects.len()),
            });
        }

        let transform = FrameTransform {
            view: camera.view(),
            view_proj: camera.view_proj(grid.aspect()),
            focal: camera.focal_y(grid.height()),
            near: camera.near,
            far: camera.far,
            size: Vec2::new(grid.width() as f32, grid.height() as f32),
        };

        self.cloud
            .splats()
            .par_iter()
            .zip(records.par_iter_mut())
            .zip(rects.par_iter_mut())
            .for_each(|((splat, record), rect)| {
                let (projected, bounds) = project_splat(splat, &transform, grid);
                *record = projected;
                *rect = bounds;
            });

        Ok(())
    }
}

fn project_splat(
    splat: &Splat,
    transform: &FrameTransform,
    grid: &TileGrid,
) -> (ProjectionRecord, ScreenRect) {
    let culled = (ProjectionRecord::default(), ScreenRect::EMPTY);

    // Right-handed view space, camera looks down -Z.
    let view_pos: Vec3 = transform.view.transform_point3(splat.position);
    let depth = -view_pos.z;
    if depth <= transform.near || depth > transform.far {
        return culled;
    }

    let clip = transform.view_proj * splat.position.extend(1.0);
    if clip.w <= 0.0 {
        return culled;
    }
    let ndc = clip.truncate() / clip.w;
    // NDC (+Y up) to pixels (origin top-left).
    let mean = Vec2::new(
        (ndc.x * 0.5 + 0.5) * transform.size.x,
        (0.5 - ndc.y * 0.5) * transform.size.y,
    );

    let sigma = (transform.focal * splat.radius / depth).max(0.3);
    let radius = (FOOTPRINT_SIGMAS * sigma).ceil();
    let rect = grid.rect_for_disc(mean, radius);
    if rect.is_empty() {
        return culled;
    }

    let inv_var = 1.0 / (sigma * sigma);
    let record = ProjectionRecord {
        mean: mean.to_array(),
        depth,
        radius,
        conic_opacity: [inv_var, 0.0, inv_var, splat.opacity],
        color: splat.color,
        visible: 1,
    };
    (record, rect)
}
