//! Inverse spherical-to-fisheye projection
//!
//! A point of the destination plane `[-1, 1]²` is read as a longitude and
//! latitude on the unit sphere, turned into a direction vector, rotated by
//! the lens orientation and finally expressed as a polar coordinate inside
//! the fisheye circle. The lens looks down the +Y axis.

use nalgebra::{Rotation3, Vector3};
use std::f64::consts::{FRAC_PI_2, PI};

use crate::lens::FishLensDescriptor;

/// UV emitted for samples outside the lens cone
pub const SENTINEL_UV: [f32; 2] = [2.0, 2.0];

/// Slack on the unit-circle radius before a sample counts as out of cone
pub const DEFAULT_CONE_TOLERANCE: f64 = 1e-3;

/// Normalized radius of the fisheye circle edge
const EDGE_RADIUS: f64 = 0.5;

/// Returns true when `uv` is the out-of-cone marker
#[inline]
pub fn is_sentinel(uv: [f32; 2]) -> bool {
    uv == SENTINEL_UV
}

/// Projection for one lens with its orientation precomputed
#[derive(Debug, Clone)]
pub struct FisheyeProjector {
    center: [f64; 2],
    scale: [f64; 2],
    roll: f64,
    field_of_view: f64,
    orientation: Rotation3<f64>,
    max_radius: f64,
}

impl FisheyeProjector {
    /// Create a projector; the descriptor is expected to be validated
    pub fn new(lens: &FishLensDescriptor, tolerance: f64) -> Self {
        // Pitch first, then yaw
        let pitch = Rotation3::from_axis_angle(&Vector3::x_axis(), lens.rotation.pitch);
        let yaw = Rotation3::from_axis_angle(&Vector3::y_axis(), lens.rotation.yaw);

        Self {
            center: [lens.center.x, lens.center.y],
            scale: [lens.aspect_scale.x, lens.aspect_scale.y],
            roll: lens.rotation.roll,
            field_of_view: lens.field_of_view,
            orientation: yaw * pitch,
            max_radius: EDGE_RADIUS + tolerance.max(0.0),
        }
    }

    /// Viewing direction for a plane point, before the lens orientation
    #[inline]
    pub fn direction(&self, x: f64, y: f64) -> Vector3<f64> {
        let longitude = PI * x + self.roll;
        let latitude = FRAC_PI_2 * -y;

        Vector3::new(
            latitude.cos() * longitude.sin(),
            latitude.cos() * longitude.cos(),
            latitude.sin(),
        )
    }

    /// Fisheye UV for a plane point, or `None` when outside the lens cone
    pub fn project(&self, x: f64, y: f64) -> Option<[f64; 2]> {
        let d = self.orientation * self.direction(x, y);

        let phi = (d.x * d.x + d.z * d.z).sqrt().atan2(d.y);
        let theta = d.z.atan2(d.x);

        let r = phi / self.field_of_view;
        if r > self.max_radius {
            return None;
        }

        // Samples inside the tolerance band are snapped onto the circle edge
        let r = r.min(EDGE_RADIUS);

        Some([
            self.center[0] + r * theta.cos() * self.scale[0],
            self.center[1] + r * theta.sin() * self.scale[1],
        ])
    }

    /// Same as `project`, packed for a GPU attribute buffer
    #[inline]
    pub fn project_uv(&self, x: f64, y: f64) -> [f32; 2] {
        match self.project(x, y) {
            Some([u, v]) => [u as f32, v as f32],
            None => SENTINEL_UV,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Point;
    use crate::lens::{AspectScale, LensRotation};

    fn hemisphere() -> FishLensDescriptor {
        FishLensDescriptor::default()
    }

    #[test]
    fn test_center_maps_to_lens_center() {
        let projector = FisheyeProjector::new(&hemisphere(), DEFAULT_CONE_TOLERANCE);
        let [u, v] = projector.project(0.0, 0.0).unwrap();
        assert!((u - 0.5).abs() < 1e-12);
        assert!((v - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_corners_stay_in_unit_square() {
        let projector = FisheyeProjector::new(&hemisphere(), DEFAULT_CONE_TOLERANCE);
        for (x, y) in [(-1.0, -1.0), (1.0, -1.0), (-1.0, 1.0), (1.0, 1.0)] {
            let uv = projector.project_uv(x, y);
            assert!(!uv[0].is_nan() && !uv[1].is_nan());
            if !is_sentinel(uv) {
                assert!((0.0..=1.0).contains(&uv[0]), "u out of range: {:?}", uv);
                assert!((0.0..=1.0).contains(&uv[1]), "v out of range: {:?}", uv);
            }
        }
    }

    #[test]
    fn test_behind_hemisphere_is_sentinel() {
        let projector = FisheyeProjector::new(&hemisphere(), DEFAULT_CONE_TOLERANCE);
        // Longitude π looks straight backwards
        assert_eq!(projector.project_uv(1.0, 0.0), SENTINEL_UV);
        assert_eq!(projector.project_uv(-1.0, 0.0), SENTINEL_UV);
        // A quarter turn sits on the circle edge and is kept
        assert!(!is_sentinel(projector.project_uv(0.5, 0.0)));
    }

    #[test]
    fn test_wide_lens_sees_behind() {
        let lens = FishLensDescriptor {
            field_of_view: 11.0 * PI / 9.0,
            ..hemisphere()
        };
        let projector = FisheyeProjector::new(&lens, DEFAULT_CONE_TOLERANCE);
        // 100 degrees off axis is inside a 220 degree lens
        let x = 100.0 / 180.0;
        assert!(projector.project(x, 0.0).is_some());
        assert!(projector.project(1.0, 0.0).is_none());
    }

    #[test]
    fn test_aspect_scale_squeezes_u() {
        let lens = FishLensDescriptor {
            center: Point::new(0.25, 0.5),
            aspect_scale: AspectScale::new(0.5, 1.0),
            ..hemisphere()
        };
        let projector = FisheyeProjector::new(&lens, DEFAULT_CONE_TOLERANCE);
        let [u, v] = projector.project(0.5, 0.0).unwrap();
        assert!((u - 0.5).abs() < 1e-9);
        assert!((v - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_pitch_moves_optical_axis() {
        let lens = FishLensDescriptor {
            rotation: LensRotation::new(FRAC_PI_2, 0.0, 0.0),
            ..hemisphere()
        };
        let projector = FisheyeProjector::new(&lens, DEFAULT_CONE_TOLERANCE);
        // Straight ahead is now on the rim of the circle
        let [u, v] = projector.project(0.0, 0.0).unwrap();
        let r = ((u - 0.5).powi(2) + (v - 0.5).powi(2)).sqrt();
        assert!((r - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_roll_offsets_longitude() {
        let lens = FishLensDescriptor {
            rotation: LensRotation::new(0.0, 0.0, PI),
            ..hemisphere()
        };
        let projector = FisheyeProjector::new(&lens, DEFAULT_CONE_TOLERANCE);
        // The back of the sphere is now centred in the circle
        let [u, v] = projector.project(1.0, 0.0).unwrap();
        assert!((u - 0.5).abs() < 1e-9);
        assert!((v - 0.5).abs() < 1e-9);
        assert!(projector.project(0.0, 0.0).is_none());
    }
}
