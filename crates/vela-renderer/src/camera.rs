//! Perspective camera and its GPU uniform.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use vela_core::Frustum;

/// Perspective camera looking at a target point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 2.0, 8.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov_y: 60f32.to_radians(),
            near: 0.1,
            far: 200.0,
        }
    }
}

impl Camera {
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    /// Projection with a `[0, 1]` depth range.
    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, aspect.max(f32::EPSILON), self.near, self.far)
    }

    pub fn view_proj(&self, aspect: f32) -> Mat4 {
        self.projection_matrix(aspect) * self.view_matrix()
    }

    pub fn frustum(&self, aspect: f32) -> Frustum {
        Frustum::from_view_proj(&self.view_proj(aspect))
    }
}

/// Camera uniform shared by geometry passes and the culling shaders.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CameraUniform {
    pub view_proj: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    /// Inward-facing frustum planes, `xyz` normal and `w` distance
    pub planes: [[f32; 4]; 6],
    /// World-space eye position, `w` unused
    pub position: [f32; 4],
    /// `(width, height, 1/width, 1/height)` of the render target
    pub viewport: [f32; 4],
    /// `x` = Hi-Z level count, `y` = Hi-Z enabled
    pub hiz: [u32; 4],
}

impl Default for CameraUniform {
    fn default() -> Self {
        Self {
            view_proj: Mat4::IDENTITY.to_cols_array_2d(),
            view: Mat4::IDENTITY.to_cols_array_2d(),
            planes: [[0.0; 4]; 6],
            position: [0.0; 4],
            viewport: [1.0, 1.0, 1.0, 1.0],
            hiz: [0; 4],
        }
    }
}

impl CameraUniform {
    pub fn new(camera: &Camera, width: u32, height: u32, hiz_levels: u32, hiz_enabled: bool) -> Self {
        let (w, h) = (width.max(1) as f32, height.max(1) as f32);
        let view_proj = camera.view_proj(w / h);
        let frustum = Frustum::from_view_proj(&view_proj);
        Self {
            view_proj: view_proj.to_cols_array_2d(),
            view: camera.view_matrix().to_cols_array_2d(),
            planes: frustum.to_arrays(),
            position: camera.position.extend(1.0).to_array(),
            viewport: [w, h, 1.0 / w, 1.0 / h],
            hiz: [hiz_levels, u32::from(hiz_enabled), 0, 0],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use vela_core::BoundingBox;

    #[test]
    fn test_uniform_size_is_16_byte_aligned() {
        assert_eq!(std::mem::size_of::<CameraUniform>() % 16, 0);
    }

    #[test]
    fn test_uniform_viewport_and_planes() {
        let camera = Camera::default();
        let uniform = CameraUniform::new(&camera, 512, 256, 10, true);
        assert_relative_eq!(uniform.viewport[0], 512.0);
        assert_relative_eq!(uniform.viewport[3], 1.0 / 256.0);
        assert_eq!(uniform.hiz, [10, 1, 0, 0]);
        assert_eq!(uniform.planes, camera.frustum(2.0).to_arrays());
    }

    #[test]
    fn test_target_is_in_frustum() {
        let camera = Camera::default();
        let frustum = camera.frustum(16.0 / 9.0);
        assert!(frustum.intersects_box(&BoundingBox::default()));
        let behind = BoundingBox::new(Vec3::new(-1.0, -1.0, 20.0), Vec3::new(1.0, 1.0, 22.0));
        assert!(!frustum.intersects_box(&behind));
    }
}
