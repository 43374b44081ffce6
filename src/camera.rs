use glam::{Mat4, Vec3};

use crate::error::{SortError, SortResult};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fov_y_radians: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera {
    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.target, self.up)
    }
    pub fn proj(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov_y_radians, aspect, self.near, self.far)
    }
    pub fn view_proj(&self, aspect: f32) -> Mat4 {
        self.proj(aspect) * self.view()
    }

    /// Focal length in pixels along y for an image `height` pixels tall.
    pub fn focal_y(&self, height: u32) -> f32 {
        height as f32 / (2.0 * (self.fov_y_radians * 0.5).tan())
    }

    /// Rejects cameras a frame cannot be rendered from. A frame with an
    /// invalid camera is skipped, never rendered against stale state.
    pub fn validate(&self) -> SortResult<()> {
        if !(self.eye.is_finite() && self.target.is_finite() && self.up.is_finite()) {
            return Err(SortError::InvalidCamera(
                "eye, target and up must be finite".into(),
            ));
        }
        if !self.fov_y_radians.is_finite()
            || self.fov_y_radians <= 0.0
            || self.fov_y_radians >= std::f32::consts::PI
        {
            return Err(SortError::InvalidCamera(format!(
                "vertical fov {} is outside (0, pi)",
                self.fov_y_radians
            )));
        }
        if !(self.near.is_finite() && self.far.is_finite()) || self.near <= 0.0 {
            return Err(SortError::InvalidCamera(format!(
                "near plane {} must be positive and finite",
                self.near
            )));
        }
        if self.far <= self.near {
            return Err(SortError::InvalidCamera(format!(
                "far plane {} must lie beyond near plane {}",
                self.far, self.near
            )));
        }
        let forward = self.target - self.eye;
        if forward.length_squared() <= f32::EPSILON {
            return Err(SortError::InvalidCamera(
                "eye and target coincide".into(),
            ));
        }
        if forward.normalize().cross(self.up).length_squared() <= f32::EPSILON {
            return Err(SortError::InvalidCamera(
                "up vector is parallel to the view direction".into(),
            ));
        }
        Ok(())
    }

    /// Same camera with eye and target moved by `offset`. Offsets
    /// perpendicular to the view direction leave every view depth unchanged.
    pub fn translated(&self, offset: Vec3) -> Self {
        Self {
            eye: self.eye + offset,
            target: self.target + offset,
            ..*self
        }
    }

    /// Camera on a horizontal circle of `radius` around `target`, at `angle`
    /// radians.
    pub fn orbit(target: Vec3, radius: f32, height: f32, angle: f32) -> Self {
        Self {
            eye: target + Vec3::new(radius * angle.cos(), height, radius * angle.sin()),
            target,
            ..Self::default()
        }
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            eye: Vec3::new(0.0, 0.0, 3.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov_y_radians: 60f32.to_radians(),
            near: 0.1,
            far: 100.0,
        }
    }
}
