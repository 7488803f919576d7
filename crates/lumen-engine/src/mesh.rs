//! CPU-side indexed triangle meshes.
//!
//! Vertices are interleaved `f32`s described by a `VertexLayout`; indices are
//! `u32` triangle lists. GPU upload lives in `driver::GpuMesh`.

use thiserror::Error;

/// One attribute inside an interleaved vertex. Sizes and offsets are in floats.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct VertexAttribute {
    pub location: u32,
    pub components: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct VertexLayout {
    /// Floats per vertex.
    pub stride: u32,
    pub attributes: Vec<VertexAttribute>,
}

impl VertexLayout {
    /// A single `vec3` position at location 0.
    pub fn position_only() -> Self {
        Self {
            stride: 3,
            attributes: vec![VertexAttribute { location: 0, components: 3, offset: 0 }],
        }
    }

    pub fn attribute(&self, location: u32) -> Option<&VertexAttribute> {
        self.attributes.iter().find(|a| a.location == location)
    }

    pub fn stride_bytes(&self) -> u64 {
        u64::from(self.stride) * std::mem::size_of::<f32>() as u64
    }
}

#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum MeshError {
    #[error("vertex stride must be non-zero")]
    ZeroStride,

    #[error("attribute at location {location} does not fit in a {stride}-float vertex")]
    AttributeOutOfBounds { location: u32, stride: u32 },

    #[error("attribute has {0} components (expected 1..=4)")]
    AttributeComponents(u32),

    #[error("vertex data length {len} is not a multiple of the stride {stride}")]
    RaggedVertices { len: usize, stride: u32 },

    #[error("index count {0} is not a multiple of 3")]
    RaggedIndices(usize),

    #[error("index {index} out of range for {vertices} vertices")]
    IndexOutOfRange { index: u32, vertices: usize },
}

/// Indexed triangle list.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    layout: VertexLayout,
    vertices: Vec<f32>,
    indices: Vec<u32>,
}

impl Mesh {
    pub fn new(layout: VertexLayout, vertices: Vec<f32>, indices: Vec<u32>) -> Result<Self, MeshError> {
        if layout.stride == 0 {
            return Err(MeshError::ZeroStride);
        }
        for a in &layout.attributes {
            if a.components == 0 || a.components > 4 {
                return Err(MeshError::AttributeComponents(a.components));
            }
            if a.offset.checked_add(a.components).is_none_or(|end| end > layout.stride) {
                return Err(MeshError::AttributeOutOfBounds {
                    location: a.location,
                    stride: layout.stride,
                });
            }
        }
        if vertices.len() % layout.stride as usize != 0 {
            return Err(MeshError::RaggedVertices { len: vertices.len(), stride: layout.stride });
        }
        if indices.len() % 3 != 0 {
            return Err(MeshError::RaggedIndices(indices.len()));
        }

        let vertex_count = vertices.len() / layout.stride as usize;
        if let Some(&index) = indices.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(MeshError::IndexOutOfRange { index, vertices: vertex_count });
        }

        Ok(Self { layout, vertices, indices })
    }

    /// Positions-only mesh, three floats per vertex.
    pub fn from_positions(positions: &[[f32; 3]], indices: Vec<u32>) -> Result<Self, MeshError> {
        let vertices = positions.iter().flatten().copied().collect();
        Self::new(VertexLayout::position_only(), vertices, indices)
    }

    /// Four-sided pyramid: three base corners plus an apex.
    pub fn pyramid() -> Self {
        const VERTICES: [[f32; 3]; 4] = [
            [-0.67, -0.33, 0.0],
            [0.0, 0.0, 1.0],
            [0.67, -0.33, 0.0],
            [0.0, 0.67, 0.0],
        ];
        const INDICES: [u32; 12] = [0, 3, 1, 1, 3, 2, 2, 3, 0, 0, 1, 2];

        let vertices = VERTICES.iter().flatten().copied().collect();
        Self {
            layout: VertexLayout::position_only(),
            vertices,
            indices: INDICES.to_vec(),
        }
    }

    pub fn layout(&self) -> &VertexLayout {
        &self.layout
    }

    pub fn vertices(&self) -> &[f32] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len() / self.layout.stride as usize
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    /// Components of `attribute` for vertex `vertex`.
    pub fn attribute_values(&self, vertex: usize, attribute: &VertexAttribute) -> &[f32] {
        let start = vertex * self.layout.stride as usize + attribute.offset as usize;
        &self.vertices[start..start + attribute.components as usize]
    }

    pub fn triangles(&self) -> impl Iterator<Item = [u32; 3]> + '_ {
        self.indices.chunks_exact(3).map(|t| [t[0], t[1], t[2]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pyramid_is_well_formed() {
        let p = Mesh::pyramid();
        assert_eq!(p.vertex_count(), 4);
        assert_eq!(p.index_count(), 12);
        assert_eq!(p.triangles().count(), 4);
        let rebuilt = Mesh::new(p.layout().clone(), p.vertices().to_vec(), p.indices().to_vec());
        assert_eq!(rebuilt, Ok(p));
    }

    #[test]
    fn attribute_values_follow_layout() {
        let layout = VertexLayout {
            stride: 5,
            attributes: vec![
                VertexAttribute { location: 0, components: 3, offset: 0 },
                VertexAttribute { location: 1, components: 2, offset: 3 },
            ],
        };
        let mesh = Mesh::new(
            layout,
            vec![0.0, 1.0, 2.0, 0.5, 0.5, 3.0, 4.0, 5.0, 1.0, 0.0, 6.0, 7.0, 8.0, 0.0, 1.0],
            vec![0, 1, 2],
        )
        .unwrap();

        let uv = *mesh.layout().attribute(1).unwrap();
        assert_eq!(mesh.attribute_values(1, &uv), &[1.0, 0.0]);
        assert_eq!(mesh.layout().stride_bytes(), 20);
    }

    #[test]
    fn rejects_bad_indices() {
        let err = Mesh::from_positions(&[[0.0; 3]; 3], vec![0, 1, 3]).unwrap_err();
        assert_eq!(err, MeshError::IndexOutOfRange { index: 3, vertices: 3 });
        assert_eq!(
            Mesh::from_positions(&[[0.0; 3]; 3], vec![0, 1]).unwrap_err(),
            MeshError::RaggedIndices(2)
        );
    }

    #[test]
    fn rejects_attribute_past_stride() {
        let layout = VertexLayout {
            stride: 3,
            attributes: vec![VertexAttribute { location: 0, components: 4, offset: 0 }],
        };
        assert!(matches!(
            Mesh::new(layout, vec![0.0; 3], vec![]),
            Err(MeshError::AttributeOutOfBounds { location: 0, stride: 3 })
        ));
    }

    #[test]
    fn rejects_attribute_offset_overflow() {
        let layout = VertexLayout {
            stride: 3,
            attributes: vec![VertexAttribute { location: 0, components: 3, offset: u32::MAX }],
        };
        let err = Mesh::new(layout, vec![0.0; 3], vec![]).unwrap_err();
        assert_eq!(err, MeshError::AttributeOutOfBounds { location: 0, stride: 3 });
    }
}
