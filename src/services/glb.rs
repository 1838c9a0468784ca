//! Minimal binary glTF (.glb) container writer.
//!
//! Emits a single-mesh document: one buffer holding vertex positions and
//! triangle indices, wrapped in the standard header + JSON chunk + BIN chunk
//! layout. Enough for viewers to load provider output; materials and normals
//! are left to real mesh pipelines.

use std::path::Path;

use serde_json::json;

const GLB_MAGIC: u32 = 0x4654_6C67; // "glTF"
const CHUNK_JSON: u32 = 0x4E4F_534A;
const CHUNK_BIN: u32 = 0x004E_4942;

pub const GLTF_CONTENT_TYPE: &str = "model/gltf-binary";

/// Encode a triangle mesh as a GLB byte stream.
pub fn encode(positions: &[[f32; 3]], indices: &[u32]) -> Result<Vec<u8>, serde_json::Error> {
    let mut bin = Vec::with_capacity(positions.len() * 12 + indices.len() * 4);
    for p in positions {
        for c in p {
            bin.extend_from_slice(&c.to_le_bytes());
        }
    }
    let positions_len = bin.len();
    for i in indices {
        bin.extend_from_slice(&i.to_le_bytes());
    }
    let indices_len = bin.len() - positions_len;
    while bin.len() % 4 != 0 {
        bin.push(0);
    }

    let (min, max) = bounds(positions);
    let doc = json!({
        "asset": { "version": "2.0", "generator": "photomesh" },
        "buffers": [{ "byteLength": bin.len() }],
        "bufferViews": [
            { "buffer": 0, "byteOffset": 0, "byteLength": positions_len, "target": 34962 },
            { "buffer": 0, "byteOffset": positions_len, "byteLength": indices_len, "target": 34963 }
        ],
        "accessors": [
            {
                "bufferView": 0,
                "componentType": 5126,
                "count": positions.len(),
                "type": "VEC3",
                "min": min,
                "max": max
            },
            {
                "bufferView": 1,
                "componentType": 5125,
                "count": indices.len(),
                "type": "SCALAR"
            }
        ],
        "meshes": [{ "primitives": [{ "attributes": { "POSITION": 0 }, "indices": 1 }] }],
        "nodes": [{ "mesh": 0 }],
        "scenes": [{ "nodes": [0] }],
        "scene": 0
    });

    let mut json_bytes = serde_json::to_vec(&doc)?;
    while json_bytes.len() % 4 != 0 {
        json_bytes.push(b' ');
    }

    let total = 12 + 8 + json_bytes.len() + 8 + bin.len();
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&GLB_MAGIC.to_le_bytes());
    out.extend_from_slice(&2u32.to_le_bytes());
    out.extend_from_slice(&(total as u32).to_le_bytes());
    out.extend_from_slice(&(json_bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(&CHUNK_JSON.to_le_bytes());
    out.extend_from_slice(&json_bytes);
    out.extend_from_slice(&(bin.len() as u32).to_le_bytes());
    out.extend_from_slice(&CHUNK_BIN.to_le_bytes());
    out.extend_from_slice(&bin);
    Ok(out)
}

/// Encode and write a triangle mesh to `path`.
pub fn write_mesh(
    path: &Path,
    positions: &[[f32; 3]],
    indices: &[u32],
) -> Result<(), std::io::Error> {
    let bytes = encode(positions, indices).map_err(std::io::Error::other)?;
    std::fs::write(path, bytes)
}

/// A small valid mesh (octahedron) used wherever a stand-in object must exist
/// at an output key before real provider output is available.
pub fn placeholder_bytes() -> Vec<u8> {
    let positions: [[f32; 3]; 6] = [
        [0.0, 0.5, 0.0],
        [0.25, 0.0, 0.0],
        [0.0, 0.0, 0.25],
        [-0.25, 0.0, 0.0],
        [0.0, 0.0, -0.25],
        [0.0, -0.5, 0.0],
    ];
    let indices: [u32; 24] = [
        0, 1, 2, 0, 2, 3, 0, 3, 4, 0, 4, 1, //
        5, 2, 1, 5, 3, 2, 5, 4, 3, 5, 1, 4,
    ];
    // Static geometry cannot fail to serialize.
    encode(&positions, &indices).unwrap_or_default()
}

fn bounds(positions: &[[f32; 3]]) -> ([f32; 3], [f32; 3]) {
    let mut min = [f32::MAX; 3];
    let mut max = [f32::MIN; 3];
    for p in positions {
        for axis in 0..3 {
            min[axis] = min[axis].min(p[axis]);
            max[axis] = max[axis].max(p[axis]);
        }
    }
    if positions.is_empty() {
        return ([0.0; 3], [0.0; 3]);
    }
    (min, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u32_at(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    #[test]
    fn placeholder_has_valid_container_layout() {
        let bytes = placeholder_bytes();
        assert!(bytes.len() > 20);
        assert_eq!(&bytes[0..4], b"glTF");
        assert_eq!(u32_at(&bytes, 4), 2);
        assert_eq!(u32_at(&bytes, 8) as usize, bytes.len());

        let json_len = u32_at(&bytes, 12) as usize;
        assert_eq!(json_len % 4, 0);
        assert_eq!(&bytes[16..20], b"JSON");

        let doc: serde_json::Value = serde_json::from_slice(&bytes[20..20 + json_len]).unwrap();
        assert_eq!(doc["asset"]["version"], "2.0");
        assert_eq!(doc["accessors"][0]["count"], 6);

        let bin_offset = 20 + json_len;
        assert_eq!(&bytes[bin_offset + 4..bin_offset + 7], b"BIN");
    }

    #[test]
    fn accessor_bounds_cover_geometry() {
        let positions = [[-1.0, 0.0, 2.0], [3.0, -4.0, 0.5]];
        let bytes = encode(&positions, &[0, 1, 0]).unwrap();
        let json_len = u32_at(&bytes, 12) as usize;
        let doc: serde_json::Value = serde_json::from_slice(&bytes[20..20 + json_len]).unwrap();
        assert_eq!(doc["accessors"][0]["min"][0], -1.0);
        assert_eq!(doc["accessors"][0]["max"][1], 0.0);
        assert_eq!(doc["accessors"][0]["max"][0], 3.0);
    }
}
