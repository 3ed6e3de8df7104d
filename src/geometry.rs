//! CPU-side geometry: named vertex attributes and optional indices.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

pub const POSITION: &str = "a_position";
pub const NORMAL: &str = "a_normal";
pub const UV: &str = "a_uv";

/// Interleaving-free vertex attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub data: Vec<f32>,
    pub components: u32,
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Vertex data plus an identity that changes whenever the data does.
/// Contexts key their GPU buffers on [`Geometry::id`]; clones share it until
/// one of them is edited.
#[derive(Debug, Clone)]
pub struct Geometry {
    id: u64,
    attributes: BTreeMap<String, Attribute>,
    indices: Option<Vec<u32>>,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            id: next_id(),
            attributes: BTreeMap::new(),
            indices: None,
        }
    }
}

impl PartialEq for Geometry {
    fn eq(&self, other: &Self) -> bool {
        self.attributes == other.attributes && self.indices == other.indices
    }
}

impl Geometry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn with_attribute(mut self, name: impl Into<String>, components: u32, data: Vec<f32>) -> Self {
        self.set_attribute(name, components, data);
        self
    }

    pub fn with_indices(mut self, indices: Vec<u32>) -> Self {
        self.set_indices(Some(indices));
        self
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, components: u32, data: Vec<f32>) {
        self.attributes.insert(name.into(), Attribute { data, components });
        self.id = next_id();
    }

    pub fn set_indices(&mut self, indices: Option<Vec<u32>>) {
        self.indices = indices;
        self.id = next_id();
    }

    /// Number of vertices described by `name`.
    pub fn vertex_count(&self, name: &str) -> u32 {
        self.attributes
            .get(name)
            .filter(|a| a.components > 0)
            .map_or(0, |a| (a.data.len() / a.components as usize) as u32)
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &Attribute)> {
        self.attributes.iter().map(|(name, attribute)| (name.as_str(), attribute))
    }

    pub fn indices(&self) -> Option<&[u32]> {
        self.indices.as_deref()
    }

    pub fn is_indexed(&self) -> bool {
        self.indices.is_some()
    }

    /// Index count when indexed, otherwise the number of positions.
    pub fn element_count(&self) -> u32 {
        match &self.indices {
            Some(indices) => indices.len() as u32,
            None => self.vertex_count(POSITION),
        }
    }

    /// Two triangles spanning `[-half, half]` on the XY plane, facing +Z.
    pub fn quad(half: f32) -> Self {
        Geometry::new()
            .with_attribute(
                POSITION,
                3,
                vec![
                    -half, -half, 0.0, half, -half, 0.0, half, half, 0.0, -half, half, 0.0,
                ],
            )
            .with_attribute(NORMAL, 3, [0.0, 0.0, 1.0].repeat(4))
            .with_attribute(UV, 2, vec![0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0])
            .with_indices(vec![0, 1, 2, 0, 2, 3])
    }

    /// Cube centred on the origin with half extent `half`, one quad per face.
    pub fn cube(half: f32) -> Self {
        let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
            ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
            ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
            ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
            ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ];
        let mut positions = Vec::with_capacity(6 * 4 * 3);
        let mut normals = Vec::with_capacity(6 * 4 * 3);
        let mut indices = Vec::with_capacity(6 * 6);
        for (face, (normal, u, v)) in faces.iter().enumerate() {
            for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
                for axis in 0..3 {
                    positions.push((normal[axis] + u[axis] * su + v[axis] * sv) * half);
                }
                normals.extend_from_slice(normal);
            }
            let base = face as u32 * 4;
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        Geometry::new()
            .with_attribute(POSITION, 3, positions)
            .with_attribute(NORMAL, 3, normals)
            .with_indices(indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_count() {
        let lines = Geometry::new().with_attribute(POSITION, 3, vec![0.0; 12]);
        assert_eq!(lines.element_count(), 4);
        assert!(!lines.is_indexed());

        assert_eq!(Geometry::quad(1.0).element_count(), 6);
        assert_eq!(Geometry::cube(0.5).element_count(), 36);
        assert_eq!(Geometry::new().element_count(), 0);
    }

    #[test]
    fn test_cube_vertices_lie_on_faces() {
        let cube = Geometry::cube(0.5);
        let positions = &cube.attribute(POSITION).unwrap().data;
        assert_eq!(positions.len(), 72);
        for vertex in positions.chunks(3) {
            assert!(vertex.iter().all(|c| (c.abs() - 0.5).abs() < 1e-6));
        }
    }

    #[test]
    fn test_identity_follows_edits() {
        let quad = Geometry::quad(1.0);
        let mut copy = quad.clone();
        assert_eq!(copy.id(), quad.id());
        assert_eq!(copy, quad);

        copy.set_attribute(UV, 2, vec![0.0; 8]);
        assert_ne!(copy.id(), quad.id());
        assert_ne!(Geometry::quad(1.0).id(), quad.id());
        assert_eq!(Geometry::quad(1.0), quad);
    }
}
