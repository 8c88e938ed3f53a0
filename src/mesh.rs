//! Projection mesh generation
//!
//! The mesh is a regular quad grid over the destination plane `[-1, 1]²`.
//! Every vertex carries one fisheye UV per lens, computed on the host so the
//! renderer only has to interpolate. Samples outside a lens cone get
//! [`SENTINEL_UV`](crate::projection::SENTINEL_UV) and are discarded by the
//! consumer.
//!
//! Attribute layout handed to the renderer:
//! - positions: 3 × f32 per vertex, z = 0
//! - uvs: 2 × f32 per vertex, one array per lens
//! - indices: u16 triangle list, two triangles per cell

use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::lens::MeshMode;
use crate::projection::{is_sentinel, FisheyeProjector};

/// Largest vertex count addressable by 16-bit indices
pub const MAX_VERTICES: usize = u16::MAX as usize + 1;

/// Invalid mesh configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeshError {
    #[error("grid needs at least one step per axis, got {x_steps}x{y_steps}")]
    EmptyGrid { x_steps: usize, y_steps: usize },
    #[error("grid {x_steps}x{y_steps} has {vertices} vertices, more than 16-bit indices can address")]
    TooManyVertices {
        x_steps: usize,
        y_steps: usize,
        vertices: usize,
    },
    #[error("expected one or two lens descriptors, got {0}")]
    LensCount(usize),
    #[error("invalid lens descriptor: {0}")]
    InvalidLens(String),
}

/// Triangulated grid with per-lens UVs
#[derive(Debug, Clone, Serialize)]
pub struct MeshGrid {
    x_steps: usize,
    y_steps: usize,
    vertices: Vec<[f32; 3]>,
    uv_sets: Vec<Vec<[f32; 2]>>,
    indices: Vec<u16>,
}

impl MeshGrid {
    pub fn x_steps(&self) -> usize {
        self.x_steps
    }

    pub fn y_steps(&self) -> usize {
        self.y_steps
    }

    pub fn vertices(&self) -> &[[f32; 3]] {
        &self.vertices
    }

    /// All UV arrays, in lens order
    pub fn uv_sets(&self) -> &[Vec<[f32; 2]>] {
        &self.uv_sets
    }

    /// UV array of one lens
    pub fn uvs(&self, lens: usize) -> Option<&[[f32; 2]]> {
        self.uv_sets.get(lens).map(Vec::as_slice)
    }

    pub fn indices(&self) -> &[u16] {
        &self.indices
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Linear vertex index of grid sample (i, j)
    #[inline]
    pub fn index_of(&self, i: usize, j: usize) -> usize {
        i + j * (self.x_steps + 1)
    }

    /// Positions as a tightly packed float array
    pub fn flat_vertices(&self) -> Vec<f32> {
        self.vertices.iter().flatten().copied().collect()
    }

    /// UVs of one lens as a tightly packed float array
    pub fn flat_uvs(&self, lens: usize) -> Option<Vec<f32>> {
        self.uvs(lens)
            .map(|uvs| uvs.iter().flatten().copied().collect())
    }

    /// Number of out-of-cone samples for one lens
    pub fn sentinel_count(&self, lens: usize) -> usize {
        self.uvs(lens)
            .map(|uvs| uvs.iter().filter(|uv| is_sentinel(**uv)).count())
            .unwrap_or(0)
    }
}

/// Generate the projection mesh for a lens layout
///
/// `tolerance` widens the accepted fisheye radius past 0.5 to avoid seams
/// at the circle edge.
pub fn generate(
    mode: &MeshMode,
    x_steps: usize,
    y_steps: usize,
    tolerance: f64,
) -> Result<MeshGrid, MeshError> {
    if x_steps == 0 || y_steps == 0 {
        return Err(MeshError::EmptyGrid { x_steps, y_steps });
    }

    let vertex_count = (x_steps + 1)
        .checked_mul(y_steps + 1)
        .filter(|count| *count <= MAX_VERTICES)
        .ok_or(MeshError::TooManyVertices {
            x_steps,
            y_steps,
            vertices: (x_steps + 1).saturating_mul(y_steps + 1),
        })?;

    mode.validate()?;

    let vertices = grid_vertices(x_steps, y_steps);
    debug_assert_eq!(vertices.len(), vertex_count);

    let uv_sets: Vec<Vec<[f32; 2]>> = mode
        .lenses()
        .into_iter()
        .map(|lens| {
            let projector = FisheyeProjector::new(lens, tolerance);
            vertices
                .par_iter()
                .map(|v| projector.project_uv(v[0] as f64, v[1] as f64))
                .collect()
        })
        .collect();

    let indices = triangulate(x_steps, y_steps);

    debug!(
        "Generated {}x{} mesh: {} vertices, {} triangles, {} lens(es)",
        x_steps,
        y_steps,
        vertex_count,
        indices.len() / 3,
        uv_sets.len()
    );

    Ok(MeshGrid {
        x_steps,
        y_steps,
        vertices,
        uv_sets,
        indices,
    })
}

/// Uniform grid over [-1, 1]², row by row
fn grid_vertices(x_steps: usize, y_steps: usize) -> Vec<[f32; 3]> {
    let x_step = 2.0 / x_steps as f64;
    let y_step = 2.0 / y_steps as f64;

    let mut vertices = Vec::with_capacity((x_steps + 1) * (y_steps + 1));
    for j in 0..=y_steps {
        let y = -1.0 + j as f64 * y_step;
        for i in 0..=x_steps {
            let x = -1.0 + i as f64 * x_step;
            vertices.push([x as f32, y as f32, 0.0]);
        }
    }
    vertices
}

/// Two triangles per cell with the same winding
fn triangulate(x_steps: usize, y_steps: usize) -> Vec<u16> {
    let row = x_steps + 1;
    let mut indices = Vec::with_capacity(6 * x_steps * y_steps);

    for j in 0..y_steps {
        for i in 0..x_steps {
            // Vertex count was checked against MAX_VERTICES
            let top_left = (i + j * row) as u16;
            let top_right = top_left + 1;
            let bottom_left = (i + (j + 1) * row) as u16;
            let bottom_right = bottom_left + 1;

            indices.extend_from_slice(&[
                bottom_left,
                top_left,
                top_right,
                bottom_left,
                top_right,
                bottom_right,
            ]);
        }
    }

    indices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Point;
    use crate::lens::{AspectScale, FishLensDescriptor, LensRotation};
    use crate::projection::{DEFAULT_CONE_TOLERANCE, SENTINEL_UV};
    use std::f64::consts::PI;

    fn single() -> MeshMode {
        MeshMode::SingleLens(FishLensDescriptor::default())
    }

    fn front_lens() -> FishLensDescriptor {
        FishLensDescriptor::new(
            Point::new(0.25, 0.5),
            LensRotation::default(),
            PI,
            AspectScale::new(0.5, 1.0),
        )
    }

    fn back_lens() -> FishLensDescriptor {
        FishLensDescriptor::new(
            Point::new(0.75, 0.5),
            LensRotation::new(0.0, 0.0, PI),
            PI,
            AspectScale::new(0.5, 1.0),
        )
    }

    #[test]
    fn test_index_invariants() {
        for (xs, ys) in [(1, 1), (2, 3), (7, 4), (16, 16)] {
            let mesh = generate(&single(), xs, ys, DEFAULT_CONE_TOLERANCE).unwrap();
            let vertex_count = (xs + 1) * (ys + 1);

            assert_eq!(mesh.vertex_count(), vertex_count);
            assert_eq!(mesh.uvs(0).unwrap().len(), vertex_count);
            assert_eq!(mesh.indices().len(), 6 * xs * ys);
            assert!(mesh.indices().iter().all(|&i| (i as usize) < vertex_count));

            for tri in mesh.indices().chunks_exact(3) {
                assert!(tri[0] != tri[1] && tri[1] != tri[2] && tri[0] != tri[2]);
            }
        }
    }

    #[test]
    fn test_vertex_layout() {
        let mesh = generate(&single(), 4, 2, DEFAULT_CONE_TOLERANCE).unwrap();
        assert_eq!(mesh.vertices()[0], [-1.0, -1.0, 0.0]);
        assert_eq!(mesh.vertices()[mesh.index_of(4, 0)], [1.0, -1.0, 0.0]);
        assert_eq!(mesh.vertices()[mesh.index_of(2, 1)], [0.0, 0.0, 0.0]);
        assert_eq!(mesh.vertices()[mesh.index_of(4, 2)], [1.0, 1.0, 0.0]);
        assert!(mesh.vertices().iter().all(|v| v[2] == 0.0));
    }

    #[test]
    fn test_consistent_winding() {
        let mesh = generate(&single(), 5, 3, DEFAULT_CONE_TOLERANCE).unwrap();
        let v = mesh.vertices();
        for tri in mesh.indices().chunks_exact(3) {
            let (a, b, c) = (v[tri[0] as usize], v[tri[1] as usize], v[tri[2] as usize]);
            let cross = (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0]);
            // Counter-clockwise with y pointing up
            assert!(cross > 0.0);
        }
    }

    #[test]
    fn test_first_cell_triangles() {
        let mesh = generate(&single(), 2, 2, DEFAULT_CONE_TOLERANCE).unwrap();
        assert_eq!(&mesh.indices()[..6], &[3, 0, 1, 3, 1, 4]);
    }

    #[test]
    fn test_rejects_bad_grid() {
        assert_eq!(
            generate(&single(), 0, 4, DEFAULT_CONE_TOLERANCE).unwrap_err(),
            MeshError::EmptyGrid { x_steps: 0, y_steps: 4 }
        );
        assert!(matches!(
            generate(&single(), 256, 256, DEFAULT_CONE_TOLERANCE),
            Err(MeshError::TooManyVertices { .. })
        ));
        // 255x255 is the largest square grid that still fits
        assert!(generate(&single(), 255, 255, DEFAULT_CONE_TOLERANCE).is_ok());
    }

    #[test]
    fn test_rejects_bad_lens() {
        let lens = FishLensDescriptor {
            field_of_view: -1.0,
            ..Default::default()
        };
        assert!(matches!(
            generate(&MeshMode::SingleLens(lens), 4, 4, DEFAULT_CONE_TOLERANCE),
            Err(MeshError::InvalidLens(_))
        ));
    }

    #[test]
    fn test_uvs_inside_circle() {
        let lens = FishLensDescriptor {
            center: Point::new(0.4, 0.6),
            rotation: LensRotation::new(0.3, -0.2, 0.5),
            field_of_view: 200f64.to_radians(),
            aspect_scale: AspectScale::new(0.8, 0.6),
        };
        let mesh = generate(&MeshMode::SingleLens(lens), 40, 30, DEFAULT_CONE_TOLERANCE).unwrap();
        let uvs = mesh.uvs(0).unwrap();

        let mut inside = 0;
        for uv in uvs {
            if is_sentinel(*uv) {
                continue;
            }
            inside += 1;
            let du = (uv[0] as f64 - 0.4) / 0.8;
            let dv = (uv[1] as f64 - 0.6) / 0.6;
            assert!((du * du + dv * dv).sqrt() <= 0.5 + 1e-5, "uv {:?} outside circle", uv);
        }
        assert!(inside > 0);
        assert_eq!(inside + mesh.sentinel_count(0), mesh.vertex_count());
    }

    #[test]
    fn test_out_of_cone_is_sentinel() {
        let mesh = generate(&single(), 8, 4, DEFAULT_CONE_TOLERANCE).unwrap();
        let uvs = mesh.uvs(0).unwrap();
        // x = ±1 at the equator looks straight back
        assert_eq!(uvs[mesh.index_of(0, 2)], SENTINEL_UV);
        assert_eq!(uvs[mesh.index_of(8, 2)], SENTINEL_UV);
        assert!(!is_sentinel(uvs[mesh.index_of(4, 2)]));
    }

    #[test]
    fn test_dual_lens_mirror() {
        let (xs, ys) = (16, 8);
        let mode = MeshMode::DualLens(front_lens(), back_lens());
        let mesh = generate(&mode, xs, ys, DEFAULT_CONE_TOLERANCE).unwrap();
        let front = mesh.uvs(0).unwrap();
        let back = mesh.uvs(1).unwrap();
        assert_eq!(mesh.uv_sets().len(), 2);

        // A half turn of longitude is half the grid width
        let half = xs / 2;
        for j in 0..=ys {
            for i in 0..=xs {
                let shifted = if i >= half { i - half } else { i + half };
                let b = back[mesh.index_of(i, j)];
                let f = front[mesh.index_of(shifted, j)];

                assert_eq!(is_sentinel(b), is_sentinel(f), "cell ({}, {})", i, j);
                if !is_sentinel(b) {
                    assert!((b[0] - (f[0] + 0.5)).abs() < 1e-4, "cell ({}, {})", i, j);
                    assert!((b[1] - f[1]).abs() < 1e-4, "cell ({}, {})", i, j);
                }
            }
        }
    }

    #[test]
    fn test_dual_lens_covers_sphere() {
        let mode = MeshMode::DualLens(front_lens(), back_lens());
        let mesh = generate(&mode, 32, 16, DEFAULT_CONE_TOLERANCE).unwrap();
        let front = mesh.uvs(0).unwrap();
        let back = mesh.uvs(1).unwrap();
        for (f, b) in front.iter().zip(back) {
            assert!(!is_sentinel(*f) || !is_sentinel(*b));
        }
    }

    #[test]
    fn test_flat_arrays() {
        let mesh = generate(&single(), 3, 2, DEFAULT_CONE_TOLERANCE).unwrap();
        assert_eq!(mesh.flat_vertices().len(), mesh.vertex_count() * 3);
        assert_eq!(mesh.flat_uvs(0).unwrap().len(), mesh.vertex_count() * 2);
        assert!(mesh.flat_uvs(1).is_none());
    }
}
