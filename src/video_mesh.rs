//! Video-plane mesh builder
//!
//! Lays out a grid of vertices in the X-Y plane, one per sampled source pixel,
//! so the camera image can be textured onto real scene geometry. The grid is
//! rebuilt only when the source dimensions change.

use bytemuck::{Pod, Zeroable};
use log::info;

/// One grid point of the video plane
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct PlaneVertex {
    pub position: [f32; 3],
    pub tex_coord: [f32; 2],
}

impl PlaneVertex {
    pub const ATTRIBUTES: [wgpu::VertexAttribute; 2] =
        wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x2];

    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<PlaneVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

/// Triangulated grid covering the source image exactly once.
#[derive(Clone, Debug)]
pub struct VideoPlaneMesh {
    pub vertices: Vec<PlaneVertex>,
    pub indices: Vec<u32>,
    /// Grid points per row
    pub columns: u32,
    /// Grid points per column
    pub rows: u32,
    pub source_size: (u32, u32),
    pub stride: u32,
}

impl VideoPlaneMesh {
    /// Build the grid for a `width` x `height` source sampled every `stride`
    /// pixels. The plane is centred on the origin and spans `plane_height`
    /// world units vertically, keeping the source aspect ratio.
    pub fn build(width: u32, height: u32, stride: u32, plane_height: f32) -> Self {
        let stride = stride.max(1);
        let columns = width / stride;
        let rows = height / stride;

        let aspect = if height > 0 { width as f32 / height as f32 } else { 0.0 };
        let plane_width = plane_height * aspect;

        let mut vertices = Vec::with_capacity((columns * rows) as usize);
        for row in 0..rows {
            let v = normalized(row, rows);
            for col in 0..columns {
                let u = normalized(col, columns);
                // Row 0 is the top of the image, so v grows downwards.
                vertices.push(PlaneVertex {
                    position: [(u - 0.5) * plane_width, (0.5 - v) * plane_height, 0.0],
                    tex_coord: [u, v],
                });
            }
        }

        let quads = columns.saturating_sub(1) as usize * rows.saturating_sub(1) as usize;
        let mut indices = Vec::with_capacity(quads * 6);
        for row in 0..rows.saturating_sub(1) {
            for col in 0..columns.saturating_sub(1) {
                let top_left = row * columns + col;
                let top_right = top_left + 1;
                let bottom_left = top_left + columns;
                let bottom_right = bottom_left + 1;

                // Counter-clockwise seen from +Z
                indices.extend_from_slice(&[top_left, bottom_left, bottom_right]);
                indices.extend_from_slice(&[top_left, bottom_right, top_right]);
            }
        }

        Self {
            vertices,
            indices,
            columns,
            rows,
            source_size: (width, height),
            stride,
        }
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Vertex at grid position (`col`, `row`)
    pub fn vertex(&self, col: u32, row: u32) -> Option<&PlaneVertex> {
        if col >= self.columns || row >= self.rows {
            return None;
        }
        self.vertices.get((row * self.columns + col) as usize)
    }
}

/// Grid coordinate `i` of `count` mapped onto [0, 1], corners included.
fn normalized(i: u32, count: u32) -> f32 {
    if count > 1 {
        i as f32 / (count - 1) as f32
    } else {
        0.0
    }
}

/// Keeps the current video-plane mesh and rebuilds it when the source size changes.
pub struct VideoPlane {
    stride: u32,
    plane_height: f32,
    mesh: Option<VideoPlaneMesh>,
    rebuilds: u64,
}

impl VideoPlane {
    pub fn new(stride: u32, plane_height: f32) -> Self {
        Self {
            stride: stride.max(1),
            plane_height,
            mesh: None,
            rebuilds: 0,
        }
    }

    /// Returns the freshly built mesh if `size` differs from the current one,
    /// `None` when the existing mesh is still valid.
    pub fn update(&mut self, size: (u32, u32)) -> Option<&VideoPlaneMesh> {
        if self.mesh.as_ref().map(|m| m.source_size) == Some(size) {
            return None;
        }

        let mesh = VideoPlaneMesh::build(size.0, size.1, self.stride, self.plane_height);
        info!(
            "Video plane rebuilt for {}x{} (stride {}): {} vertices, {} triangles",
            size.0,
            size.1,
            self.stride,
            mesh.vertices.len(),
            mesh.triangle_count()
        );
        self.rebuilds += 1;
        self.mesh = Some(mesh);
        self.mesh.as_ref()
    }

    pub fn mesh(&self) -> Option<&VideoPlaneMesh> {
        self.mesh.as_ref()
    }

    /// How many times the mesh has been (re)built
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_area(mesh: &VideoPlaneMesh, tri: &[u32]) -> f32 {
        let a = mesh.vertices[tri[0] as usize].position;
        let b = mesh.vertices[tri[1] as usize].position;
        let c = mesh.vertices[tri[2] as usize].position;
        (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
    }

    #[test]
    fn vertex_count_matches_grid() {
        for &(w, h, dx) in &[(640, 480, 1), (640, 480, 4), (17, 9, 2), (5, 7, 3), (3, 3, 5)] {
            let mesh = VideoPlaneMesh::build(w, h, dx, 2.0);
            assert_eq!(mesh.vertices.len() as u32, (w / dx) * (h / dx), "{w}x{h} / {dx}");
            let quads = (w / dx).saturating_sub(1) * (h / dx).saturating_sub(1);
            assert_eq!(mesh.triangle_count() as u32, quads * 2);
        }
    }

    #[test]
    fn every_triangle_is_counter_clockwise() {
        let mesh = VideoPlaneMesh::build(32, 24, 3, 2.0);
        assert!(!mesh.is_empty());
        for tri in mesh.indices.chunks(3) {
            assert!(signed_area(&mesh, tri) > 0.0, "clockwise triangle {tri:?}");
        }
    }

    #[test]
    fn corner_texture_coordinates() {
        let mesh = VideoPlaneMesh::build(640, 480, 1, 2.0);
        let corners = [
            (0, 0, [0.0, 0.0]),
            (mesh.columns - 1, 0, [1.0, 0.0]),
            (0, mesh.rows - 1, [0.0, 1.0]),
            (mesh.columns - 1, mesh.rows - 1, [1.0, 1.0]),
        ];
        for (col, row, expected) in corners {
            let uv = mesh.vertex(col, row).unwrap().tex_coord;
            assert!((uv[0] - expected[0]).abs() < 1e-5 && (uv[1] - expected[1]).abs() < 1e-5);
        }
    }

    #[test]
    fn plane_is_centred_with_source_aspect() {
        let mesh = VideoPlaneMesh::build(640, 480, 1, 3.0);
        let (mut min, mut max) = ([f32::MAX; 2], [f32::MIN; 2]);
        for v in &mesh.vertices {
            assert_eq!(v.position[2], 0.0);
            for k in 0..2 {
                min[k] = min[k].min(v.position[k]);
                max[k] = max[k].max(v.position[k]);
            }
        }
        assert!((min[0] + max[0]).abs() < 1e-5);
        assert!((min[1] + max[1]).abs() < 1e-5);
        assert!((max[1] - min[1] - 3.0).abs() < 1e-5);
        assert!((max[0] - min[0] - 4.0).abs() < 1e-5);
    }

    #[test]
    fn top_row_samples_top_of_image() {
        let mesh = VideoPlaneMesh::build(8, 8, 1, 2.0);
        let top = mesh.vertex(0, 0).unwrap();
        let bottom = mesh.vertex(0, 7).unwrap();
        assert!(top.position[1] > bottom.position[1]);
        assert!(top.tex_coord[1] < bottom.tex_coord[1]);
    }

    #[test]
    fn degenerate_sources_produce_no_triangles() {
        assert!(VideoPlaneMesh::build(0, 480, 1, 2.0).vertices.is_empty());
        let line = VideoPlaneMesh::build(1, 10, 1, 2.0);
        assert_eq!(line.vertices.len(), 10);
        assert!(line.is_empty());
        assert_eq!(line.vertices[0].tex_coord[0], 0.0);
    }

    #[test]
    fn rebuilds_only_on_size_change() {
        let mut plane = VideoPlane::new(2, 2.0);
        assert!(plane.update((64, 48)).is_some());
        assert!(plane.update((64, 48)).is_none());
        assert!(plane.update((64, 48)).is_none());
        assert_eq!(plane.rebuilds(), 1);
        assert!(plane.update((32, 32)).is_some());
        assert_eq!(plane.rebuilds(), 2);
        assert_eq!(plane.mesh().unwrap().source_size, (32, 32));
    }
}
