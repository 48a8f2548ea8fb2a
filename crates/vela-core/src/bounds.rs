//! Bounding volumes and view frustum tests.
//!
//! The frustum test here is the CPU mirror of the compute cull shader in
//! `vela-renderer`; both use the same plane layout and the same
//! center/extent box test so the two stay interchangeable.

use glam::{Mat4, Vec3, Vec4};
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Minimum corner.
    pub min: Vec3,
    /// Maximum corner.
    pub max: Vec3,
}

impl BoundingBox {
    /// Creates a bounding box from its corners.
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// An inverted box that any `union` will replace.
    pub fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::INFINITY),
            max: Vec3::splat(f32::NEG_INFINITY),
        }
    }

    /// Builds the tightest box around a set of points.
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        points.into_iter().fold(Self::empty(), |b, p| Self {
            min: b.min.min(p),
            max: b.max.max(p),
        })
    }

    /// Returns true if the box contains no volume (no points were added).
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Half-size along each axis.
    pub fn extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// Returns the union of two boxes.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Transforms the box and returns the axis-aligned box enclosing the result.
    pub fn transform(&self, matrix: &Mat4) -> BoundingBox {
        if self.is_empty() {
            return *self;
        }
        let center = matrix.transform_point3(self.center());
        let extents = self.extents();
        let abs_x = matrix.x_axis.truncate().abs() * extents.x;
        let abs_y = matrix.y_axis.truncate().abs() * extents.y;
        let abs_z = matrix.z_axis.truncate().abs() * extents.z;
        let new_extents = abs_x + abs_y + abs_z;
        BoundingBox::new(center - new_extents, center + new_extents)
    }

    /// The eight corners of the box.
    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::new(Vec3::splat(-0.5), Vec3::splat(0.5))
    }
}

/// Index of each plane inside [`Frustum::planes`].
pub mod plane {
    pub const LEFT: usize = 0;
    pub const RIGHT: usize = 1;
    pub const BOTTOM: usize = 2;
    pub const TOP: usize = 3;
    pub const NEAR: usize = 4;
    pub const FAR: usize = 5;
}

/// Six inward-facing planes `(normal.xyz, distance)` of a view frustum.
///
/// Planes are extracted for a `[0, 1]` clip depth range, matching wgpu.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    pub planes: [Vec4; 6],
}

impl Frustum {
    /// Extracts planes from a combined view-projection matrix.
    pub fn from_view_proj(view_proj: &Mat4) -> Self {
        let r0 = view_proj.row(0);
        let r1 = view_proj.row(1);
        let r2 = view_proj.row(2);
        let r3 = view_proj.row(3);

        let mut planes = [
            r3 + r0, // left
            r3 - r0, // right
            r3 + r1, // bottom
            r3 - r1, // top
            r2,      // near
            r3 - r2, // far
        ];
        for p in &mut planes {
            let len = p.truncate().length();
            if len > f32::EPSILON {
                *p /= len;
            }
        }
        Self { planes }
    }

    /// Returns true if a world-space box is at least partially inside.
    pub fn intersects_box(&self, bounds: &BoundingBox) -> bool {
        let center = bounds.center();
        let extents = bounds.extents();
        self.planes.iter().all(|p| {
            let normal = p.truncate();
            let distance = normal.dot(center) + p.w;
            let radius = normal.abs().dot(extents);
            distance + radius >= 0.0
        })
    }

    /// Returns true if a point is inside all six planes.
    pub fn contains_point(&self, point: Vec3) -> bool {
        self.planes
            .iter()
            .all(|p| p.truncate().dot(point) + p.w >= 0.0)
    }

    /// Planes as plain arrays, in the layout the cull shader expects.
    pub fn to_arrays(&self) -> [[f32; 4]; 6] {
        self.planes.map(|p| p.to_array())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn camera() -> Mat4 {
        let proj = Mat4::perspective_rh(60f32.to_radians(), 1.0, 0.1, 100.0);
        let view = Mat4::look_at_rh(Vec3::ZERO, Vec3::new(0.0, 0.0, -1.0), Vec3::Y);
        proj * view
    }

    #[test]
    fn test_transform_box_translation() {
        let b = BoundingBox::new(Vec3::splat(-1.0), Vec3::splat(1.0));
        let t = b.transform(&Mat4::from_translation(Vec3::new(5.0, 0.0, 0.0)));
        assert_relative_eq!(t.min.x, 4.0);
        assert_relative_eq!(t.max.x, 6.0);
    }

    #[test]
    fn test_transform_box_rotation_grows() {
        let b = BoundingBox::new(Vec3::splat(-1.0), Vec3::splat(1.0));
        let t = b.transform(&Mat4::from_rotation_y(45f32.to_radians()));
        assert_relative_eq!(t.max.x, 2f32.sqrt(), epsilon = 1e-5);
        assert_relative_eq!(t.max.y, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_from_points_and_union() {
        let a = BoundingBox::from_points([Vec3::ZERO, Vec3::ONE]);
        let b = BoundingBox::from_points([Vec3::splat(-2.0)]);
        let u = a.union(&b);
        assert_eq!(u.min, Vec3::splat(-2.0));
        assert_eq!(u.max, Vec3::ONE);
        assert!(BoundingBox::empty().is_empty());
    }

    #[test]
    fn test_frustum_accepts_box_in_front() {
        let frustum = Frustum::from_view_proj(&camera());
        let b = BoundingBox::new(Vec3::new(-1.0, -1.0, -11.0), Vec3::new(1.0, 1.0, -9.0));
        assert!(frustum.intersects_box(&b));
    }

    #[test]
    fn test_frustum_rejects_box_behind() {
        let frustum = Frustum::from_view_proj(&camera());
        let b = BoundingBox::new(Vec3::new(-1.0, -1.0, 9.0), Vec3::new(1.0, 1.0, 11.0));
        assert!(!frustum.intersects_box(&b));
    }

    #[test]
    fn test_frustum_rejects_beyond_far() {
        let frustum = Frustum::from_view_proj(&camera());
        let b = BoundingBox::new(Vec3::new(-1.0, -1.0, -202.0), Vec3::new(1.0, 1.0, -200.0));
        assert!(!frustum.intersects_box(&b));
    }

    #[test]
    fn test_frustum_accepts_straddling_box() {
        let frustum = Frustum::from_view_proj(&camera());
        // Crosses the left plane.
        let b = BoundingBox::new(Vec3::new(-30.0, -0.5, -10.5), Vec3::new(-4.0, 0.5, -9.5));
        assert!(frustum.intersects_box(&b));
        assert!(frustum.contains_point(Vec3::new(0.0, 0.0, -5.0)));
        assert!(!frustum.contains_point(Vec3::new(0.0, 0.0, -0.01)));
    }
}
