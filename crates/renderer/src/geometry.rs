//! Static full-screen quad.
//!
//! Positions and texture coordinates live in one buffer as two separate runs,
//! read through two vertex buffer slots: slot 0 sees positions, slot 1 sees
//! texture coordinates.

use std::collections::BTreeMap;

use wgpu::naga::{Scalar, TypeInner, VectorSize};

/// Corners in order: top-left, bottom-right, bottom-left, top-right.
pub const QUAD_POSITIONS: [[f32; 3]; 4] = [
    [-1.0, 1.0, 0.0],
    [1.0, -1.0, 0.0],
    [-1.0, -1.0, 0.0],
    [1.0, 1.0, 0.0],
];

/// Texture coordinate of each corner; the top-left corner samples texel (0, 0).
pub const QUAD_TEXCOORDS: [[f32; 2]; 4] = [[0.0, 0.0], [1.0, 1.0], [0.0, 1.0], [1.0, 0.0]];

pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 0, 3, 1];

pub const POSITION_LOCATION: u32 = 0;
pub const TEXCOORD_LOCATION: u32 = 1;

const POSITION_STRIDE: u64 = std::mem::size_of::<[f32; 3]>() as u64;
const TEXCOORD_STRIDE: u64 = std::mem::size_of::<[f32; 2]>() as u64;

/// Byte offset of the texture coordinate run inside the vertex buffer.
pub const TEXCOORD_OFFSET: u64 = POSITION_STRIDE * QUAD_POSITIONS.len() as u64;

const POSITION_ATTRIBUTES: [wgpu::VertexAttribute; 1] = [wgpu::VertexAttribute {
    format: wgpu::VertexFormat::Float32x3,
    offset: 0,
    shader_location: POSITION_LOCATION,
}];

const TEXCOORD_ATTRIBUTES: [wgpu::VertexAttribute; 1] = [wgpu::VertexAttribute {
    format: wgpu::VertexFormat::Float32x2,
    offset: 0,
    shader_location: TEXCOORD_LOCATION,
}];

/// Layouts for slot 0 (position) and slot 1 (texcoord).
pub fn vertex_layouts() -> [wgpu::VertexBufferLayout<'static>; 2] {
    [
        wgpu::VertexBufferLayout {
            array_stride: POSITION_STRIDE,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &POSITION_ATTRIBUTES,
        },
        wgpu::VertexBufferLayout {
            array_stride: TEXCOORD_STRIDE,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &TEXCOORD_ATTRIBUTES,
        },
    ]
}

/// Attribute types the geometry feeds, keyed by shader location.
pub fn supplied_attributes() -> BTreeMap<u32, TypeInner> {
    BTreeMap::from([
        (
            POSITION_LOCATION,
            TypeInner::Vector {
                size: VectorSize::Tri,
                scalar: Scalar::F32,
            },
        ),
        (
            TEXCOORD_LOCATION,
            TypeInner::Vector {
                size: VectorSize::Bi,
                scalar: Scalar::F32,
            },
        ),
    ])
}

/// Vertex buffer contents: all positions, then all texture coordinates.
pub fn vertex_bytes() -> Vec<u8> {
    let mut bytes = Vec::with_capacity((TEXCOORD_OFFSET + TEXCOORD_STRIDE * 4) as usize);
    bytes.extend_from_slice(bytemuck::cast_slice(&QUAD_POSITIONS));
    bytes.extend_from_slice(bytemuck::cast_slice(&QUAD_TEXCOORDS));
    bytes
}

pub fn index_bytes() -> &'static [u8] {
    bytemuck::cast_slice(&QUAD_INDICES)
}

pub fn index_count() -> u32 {
    QUAD_INDICES.len() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangles() -> Vec<[[f32; 2]; 3]> {
        QUAD_INDICES
            .chunks(3)
            .map(|tri| {
                let corner = |i: u16| {
                    let p = QUAD_POSITIONS[i as usize];
                    [p[0], p[1]]
                };
                [corner(tri[0]), corner(tri[1]), corner(tri[2])]
            })
            .collect()
    }

    fn signed_area(tri: &[[f32; 2]; 3]) -> f32 {
        let [a, b, c] = tri;
        ((b[0] - a[0]) * (c[1] - a[1]) - (c[0] - a[0]) * (b[1] - a[1])) * 0.5
    }

    fn contains(tri: &[[f32; 2]; 3], point: [f32; 2]) -> bool {
        let [a, b, c] = *tri;
        let area = signed_area(tri).signum();
        [signed_area(&[a, b, point]), signed_area(&[b, c, point]), signed_area(&[c, a, point])]
            .iter()
            .all(|edge| edge * area >= 0.0)
    }

    #[test]
    fn two_triangles_cover_the_whole_clip_square() {
        let tris = triangles();
        assert_eq!(tris.len(), 2);
        let total: f32 = tris.iter().map(|t| signed_area(t).abs()).sum();
        assert_eq!(total, 4.0);

        for x in [-0.99, -0.5, 0.0, 0.5, 0.99] {
            for y in [-0.99, -0.5, 0.0, 0.5, 0.99] {
                assert!(
                    tris.iter().any(|t| contains(t, [x, y])),
                    "({x}, {y}) not covered"
                );
            }
        }
    }

    #[test]
    fn triangles_share_winding() {
        let tris = triangles();
        assert_eq!(signed_area(&tris[0]).signum(), signed_area(&tris[1]).signum());
    }

    #[test]
    fn corners_map_to_texture_corners() {
        for (position, texcoord) in QUAD_POSITIONS.iter().zip(QUAD_TEXCOORDS.iter()) {
            let u = (position[0] + 1.0) * 0.5;
            let v = (1.0 - position[1]) * 0.5;
            assert_eq!([u, v], *texcoord);
        }
        assert_eq!(QUAD_TEXCOORDS[0], [0.0, 0.0]);
        assert_eq!(QUAD_TEXCOORDS[1], [1.0, 1.0]);
    }

    #[test]
    fn vertex_buffer_places_texcoords_after_positions() {
        let bytes = vertex_bytes();
        assert_eq!(TEXCOORD_OFFSET, 48);
        assert_eq!(bytes.len(), 48 + 32);
        let texcoords: &[u8] = bytemuck::cast_slice(&QUAD_TEXCOORDS);
        assert_eq!(&bytes[48..], texcoords);
        assert_eq!(index_bytes().len(), 12);
        assert_eq!(index_count(), 6);
    }

    #[test]
    fn layouts_bind_slot_zero_to_position() {
        let [position, texcoord] = vertex_layouts();
        assert_eq!(position.attributes[0].shader_location, POSITION_LOCATION);
        assert_eq!(texcoord.attributes[0].shader_location, TEXCOORD_LOCATION);
        assert_eq!(supplied_attributes().len(), 2);
    }
}
