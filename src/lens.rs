//! Fisheye lens descriptors
//!
//! A lens descriptor says how one circular fisheye image is laid out in the
//! source texture and where on the sphere the lens is aimed. One descriptor
//! drives single-fisheye unwrapping; two descriptors drive dual-fisheye
//! unwrapping of a side-by-side capture.

use serde::{Deserialize, Serialize};

use crate::config::Point;
use crate::mesh::MeshError;

/// Lens orientation in radians
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LensRotation {
    /// Rotation about the X axis
    pub pitch: f64,
    /// Rotation about the Y (optical) axis
    pub yaw: f64,
    /// Offset added to the longitude before the direction vector is built
    pub roll: f64,
}

impl LensRotation {
    pub fn new(pitch: f64, yaw: f64, roll: f64) -> Self {
        Self { pitch, yaw, roll }
    }
}

/// Per-axis scale applied to the normalized fisheye radius
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AspectScale {
    pub x: f64,
    pub y: f64,
}

impl AspectScale {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl Default for AspectScale {
    fn default() -> Self {
        Self { x: 1.0, y: 1.0 }
    }
}

/// Immutable description of one fisheye lens
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FishLensDescriptor {
    /// UV-space centre of the fisheye circle
    pub center: Point,
    pub rotation: LensRotation,
    /// Edge-to-edge angular extent of the circle, in radians
    pub field_of_view: f64,
    pub aspect_scale: AspectScale,
}

impl Default for FishLensDescriptor {
    fn default() -> Self {
        Self {
            center: Point::new(0.5, 0.5),
            rotation: LensRotation::default(),
            field_of_view: std::f64::consts::PI,
            aspect_scale: AspectScale::default(),
        }
    }
}

impl FishLensDescriptor {
    pub fn new(
        center: Point,
        rotation: LensRotation,
        field_of_view: f64,
        aspect_scale: AspectScale,
    ) -> Self {
        Self {
            center,
            rotation,
            field_of_view,
            aspect_scale,
        }
    }

    /// Check the descriptor invariants
    pub fn validate(&self) -> Result<(), MeshError> {
        if !(self.field_of_view.is_finite() && self.field_of_view > 0.0) {
            return Err(MeshError::InvalidLens(format!(
                "field of view must be positive and finite, got {}",
                self.field_of_view
            )));
        }

        let scale = self.aspect_scale;
        if !(scale.x.is_finite() && scale.x > 0.0 && scale.y.is_finite() && scale.y > 0.0) {
            return Err(MeshError::InvalidLens(format!(
                "aspect scale components must be positive, got ({}, {})",
                scale.x, scale.y
            )));
        }

        let finite = [
            self.center.x,
            self.center.y,
            self.rotation.pitch,
            self.rotation.yaw,
            self.rotation.roll,
        ];
        if finite.iter().any(|v| !v.is_finite()) {
            return Err(MeshError::InvalidLens(
                "center and rotation must be finite".to_string(),
            ));
        }

        Ok(())
    }
}

/// Which lens layout a mesh is generated for
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MeshMode {
    SingleLens(FishLensDescriptor),
    DualLens(FishLensDescriptor, FishLensDescriptor),
}

impl MeshMode {
    /// Build a mode from a descriptor list (one or two lenses)
    pub fn from_lenses(lenses: &[FishLensDescriptor]) -> Result<Self, MeshError> {
        match lenses {
            [single] => Ok(MeshMode::SingleLens(*single)),
            [first, second] => Ok(MeshMode::DualLens(*first, *second)),
            other => Err(MeshError::LensCount(other.len())),
        }
    }

    /// Lenses in attribute order
    pub fn lenses(&self) -> Vec<&FishLensDescriptor> {
        match self {
            MeshMode::SingleLens(lens) => vec![lens],
            MeshMode::DualLens(first, second) => vec![first, second],
        }
    }

    pub fn lens_count(&self) -> usize {
        match self {
            MeshMode::SingleLens(_) => 1,
            MeshMode::DualLens(..) => 2,
        }
    }

    pub fn validate(&self) -> Result<(), MeshError> {
        self.lenses().into_iter().try_for_each(|lens| lens.validate())
    }
}
