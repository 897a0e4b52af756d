//! Binary mesh file codec.
//!
//! Layout, little-endian throughout:
//!
//! | offset | size | field |
//! |---|---|---|
//! | 0 | 4 | magic number |
//! | 4 | 4 | vertex buffer count (always 1) |
//! | 8 | 4 | attribute count |
//! | 12 | 4 | bytes per index (2 or 4) |
//! | 16 | 4 | vertex count |
//! | 20 | 4 | index count |
//! | 24 | 4 | topology |
//! | 28 | 12 | AABB min |
//! | 40 | 12 | AABB max |
//! | 52 | 12 each | vertex buffer bindings `(binding, stride, input_rate)` |
//! | | 16 each | attributes `(location, binding, format, offset)` |
//! | | V x stride | vertex data |
//! | | I x bytes per index | index data |

use crate::error::{Error, Result};
use crate::math::Aabb;
use crate::mesh_format::MeshFormat;
use ash::vk;
use glam::Vec3;
use std::io::{Read, Write};
use std::path::Path;

/// "MESH" read as a little-endian u32.
pub const MESH_FILE_MAGIC: u32 = 0x4853_454D;

/// Size of the fixed header in bytes.
pub const HEADER_SIZE: usize = 52;
const BINDING_SIZE: usize = 12;
const ATTRIBUTE_SIZE: usize = 16;

/// Fixed-size header at the start of every mesh file.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeshFileHeader {
    pub magic_number: u32,
    pub vertex_buffer_count: u32,
    pub attribute_count: u32,
    pub bytes_per_index: u32,
    pub vertex_count: u32,
    pub index_count: u32,
    pub topology: vk::PrimitiveTopology,
    pub aabb: Aabb,
}

/// A decoded mesh file.
#[derive(Clone, Debug)]
pub struct MeshFile {
    pub header: MeshFileHeader,
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
    pub vertices: Vec<u8>,
    pub indices: Vec<u8>,
}

/// Index width for a mesh with `vertex_count` vertices: 16-bit up to 65536 vertices, else 32-bit.
#[inline]
pub const fn bytes_per_index_for(vertex_count: usize) -> u32 {
    if vertex_count <= 0x1_0000 {
        2
    } else {
        4
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| {
                Error::InvalidData(format!(
                    "mesh file truncated: needed {n} bytes at offset {}, file has {}",
                    self.pos,
                    self.bytes.len()
                ))
            })?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f32(&mut self) -> Result<f32> {
        self.u32().map(f32::from_bits)
    }

    fn vec3(&mut self) -> Result<Vec3> {
        Ok(Vec3::new(self.f32()?, self.f32()?, self.f32()?))
    }
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_vec3(out: &mut Vec<u8>, v: Vec3) {
    for c in v.to_array() {
        out.extend_from_slice(&c.to_le_bytes());
    }
}

impl MeshFile {
    /// Assemble a mesh file, filling the header counts from the data.
    pub fn new(
        mesh_format: &MeshFormat,
        aabb: Aabb,
        vertices: Vec<u8>,
        indices: Vec<u8>,
        bytes_per_index: u32,
    ) -> Result<Self> {
        if bytes_per_index != 2 && bytes_per_index != 4 {
            return Err(Error::InvalidData(format!(
                "bytes_per_index must be 2 or 4, got {bytes_per_index}"
            )));
        }
        let stride = mesh_format
            .bindings
            .first()
            .map(|b| b.stride)
            .ok_or_else(|| Error::InvalidData("mesh format has no vertex buffer binding".into()))?;
        if stride == 0 || vertices.len() % stride as usize != 0 {
            return Err(Error::InvalidData(format!(
                "vertex data ({} bytes) is not a multiple of stride {stride}",
                vertices.len()
            )));
        }
        if indices.len() % bytes_per_index as usize != 0 {
            return Err(Error::InvalidData(format!(
                "index data ({} bytes) is not a multiple of {bytes_per_index}",
                indices.len()
            )));
        }
        let header = MeshFileHeader {
            magic_number: MESH_FILE_MAGIC,
            vertex_buffer_count: mesh_format.bindings.len() as u32,
            attribute_count: mesh_format.attributes.len() as u32,
            bytes_per_index,
            vertex_count: (vertices.len() / stride as usize) as u32,
            index_count: (indices.len() / bytes_per_index as usize) as u32,
            topology: mesh_format.topology,
            aabb,
        };
        Ok(Self {
            header,
            bindings: mesh_format.bindings.clone(),
            attributes: mesh_format.attributes.clone(),
            vertices,
            indices,
        })
    }

    /// Stride of the first (and only) vertex buffer.
    pub fn stride(&self) -> u32 {
        self.bindings.first().map_or(0, |b| b.stride)
    }

    /// The mesh format described by the file's bindings and attributes.
    pub fn mesh_format(&self) -> MeshFormat {
        MeshFormat {
            bindings: self.bindings.clone(),
            attributes: self.attributes.clone(),
            topology: self.header.topology,
            primitive_restart_enable: false,
        }
    }

    /// Encode to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let h = &self.header;
        let mut out = Vec::with_capacity(
            HEADER_SIZE
                + self.bindings.len() * BINDING_SIZE
                + self.attributes.len() * ATTRIBUTE_SIZE
                + self.vertices.len()
                + self.indices.len(),
        );
        put_u32(&mut out, h.magic_number);
        put_u32(&mut out, h.vertex_buffer_count);
        put_u32(&mut out, h.attribute_count);
        put_u32(&mut out, h.bytes_per_index);
        put_u32(&mut out, h.vertex_count);
        put_u32(&mut out, h.index_count);
        put_u32(&mut out, h.topology.as_raw() as u32);
        put_vec3(&mut out, h.aabb.min);
        put_vec3(&mut out, h.aabb.max);
        for b in &self.bindings {
            put_u32(&mut out, b.binding);
            put_u32(&mut out, b.stride);
            put_u32(&mut out, b.input_rate.as_raw() as u32);
        }
        for a in &self.attributes {
            put_u32(&mut out, a.location);
            put_u32(&mut out, a.binding);
            put_u32(&mut out, a.format.as_raw() as u32);
            put_u32(&mut out, a.offset);
        }
        out.extend_from_slice(&self.vertices);
        out.extend_from_slice(&self.indices);
        out
    }

    /// Decode from bytes, validating magic and sizes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader { bytes, pos: 0 };
        let magic_number = r.u32()?;
        if magic_number != MESH_FILE_MAGIC {
            return Err(Error::InvalidData(format!(
                "bad mesh file magic 0x{magic_number:08X}"
            )));
        }
        let vertex_buffer_count = r.u32()?;
        let attribute_count = r.u32()?;
        let bytes_per_index = r.u32()?;
        let vertex_count = r.u32()?;
        let index_count = r.u32()?;
        let topology = vk::PrimitiveTopology::from_raw(r.u32()? as i32);
        let min = r.vec3()?;
        let max = r.vec3()?;
        if vertex_buffer_count != 1 {
            return Err(Error::InvalidData(format!(
                "expected 1 vertex buffer, found {vertex_buffer_count}"
            )));
        }
        if bytes_per_index != 2 && bytes_per_index != 4 {
            return Err(Error::InvalidData(format!(
                "bytes_per_index must be 2 or 4, got {bytes_per_index}"
            )));
        }

        let mut bindings = Vec::with_capacity(vertex_buffer_count as usize);
        for _ in 0..vertex_buffer_count {
            bindings.push(vk::VertexInputBindingDescription {
                binding: r.u32()?,
                stride: r.u32()?,
                input_rate: vk::VertexInputRate::from_raw(r.u32()? as i32),
            });
        }
        let mut attributes = Vec::new();
        for _ in 0..attribute_count {
            attributes.push(vk::VertexInputAttributeDescription {
                location: r.u32()?,
                binding: r.u32()?,
                format: vk::Format::from_raw(r.u32()? as i32),
                offset: r.u32()?,
            });
        }

        let stride = bindings[0].stride as usize;
        let vertices = r.take(vertex_count as usize * stride)?.to_vec();
        let indices = r
            .take(index_count as usize * bytes_per_index as usize)?
            .to_vec();

        Ok(Self {
            header: MeshFileHeader {
                magic_number,
                vertex_buffer_count,
                attribute_count,
                bytes_per_index,
                vertex_count,
                index_count,
                topology,
                aabb: Aabb::new(min, max),
            },
            bindings,
            attributes,
            vertices,
            indices,
        })
    }

    /// Write the encoded file to `writer`.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.to_bytes())?;
        Ok(())
    }

    /// Read a whole mesh file from `reader`.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Self::from_bytes(&bytes)
    }

    /// Write to `path`, replacing any existing file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_bytes())?;
        Ok(())
    }

    /// Load from `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_bytes(&std::fs::read(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MeshFile {
        let format = MeshFormat::position_normal_texcoord();
        let mut vertices = Vec::new();
        for v in 0..3u32 {
            for c in 0..8u32 {
                vertices.extend_from_slice(&((v * 8 + c) as f32 * 0.5).to_le_bytes());
            }
        }
        let indices: Vec<u8> = [0u16, 1, 2].iter().flat_map(|i| i.to_le_bytes()).collect();
        let aabb = Aabb::new(Vec3::new(-1.0, 0.0, 0.25), Vec3::new(3.5, 2.0, 9.0));
        MeshFile::new(&format, aabb, vertices, indices, 2).unwrap()
    }

    #[test]
    fn header_layout_is_fixed() {
        let bytes = sample().to_bytes();
        assert_eq!(&bytes[0..4], b"MESH");
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 1);
        assert_eq!(u32::from_le_bytes(bytes[8..12].try_into().unwrap()), 3);
        assert_eq!(u32::from_le_bytes(bytes[12..16].try_into().unwrap()), 2);
        assert_eq!(u32::from_le_bytes(bytes[16..20].try_into().unwrap()), 3);
        assert_eq!(u32::from_le_bytes(bytes[20..24].try_into().unwrap()), 3);
        assert_eq!(
            u32::from_le_bytes(bytes[24..28].try_into().unwrap()),
            vk::PrimitiveTopology::TRIANGLE_LIST.as_raw() as u32
        );
        assert_eq!(f32::from_le_bytes(bytes[28..32].try_into().unwrap()), -1.0);
        assert_eq!(f32::from_le_bytes(bytes[48..52].try_into().unwrap()), 9.0);
        // binding stride
        assert_eq!(u32::from_le_bytes(bytes[56..60].try_into().unwrap()), 32);
        assert_eq!(bytes.len(), HEADER_SIZE + 12 + 3 * 16 + 3 * 32 + 3 * 2);
    }

    #[test]
    fn reads_back_what_was_written() {
        let mesh = sample();
        let mut encoded = Vec::new();
        mesh.write_to(&mut encoded).unwrap();
        let decoded = MeshFile::read_from(&mut encoded.as_slice()).unwrap();
        assert_eq!(decoded.header.vertex_count, 3);
        assert_eq!(decoded.header.index_count, 3);
        assert_eq!(decoded.header.aabb, mesh.header.aabb);
        assert_eq!(decoded.vertices, mesh.vertices);
        assert_eq!(decoded.indices, mesh.indices);
        let layout = |f: &MeshFormat| -> Vec<_> {
            f.attributes
                .iter()
                .map(|a| (a.location, a.binding, a.format, a.offset))
                .collect()
        };
        let format = decoded.mesh_format();
        assert_eq!(format.bindings[0].stride, 32);
        assert_eq!(
            layout(&format),
            layout(&MeshFormat::position_normal_texcoord())
        );
    }

    #[test]
    fn rejects_bad_magic_and_truncation() {
        let mut bytes = sample().to_bytes();
        let truncated = &bytes[..bytes.len() - 1];
        assert!(MeshFile::from_bytes(truncated).is_err());
        bytes[0] = b'X';
        assert!(MeshFile::from_bytes(&bytes).is_err());
    }

    #[test]
    fn index_width_threshold() {
        assert_eq!(bytes_per_index_for(4), 2);
        assert_eq!(bytes_per_index_for(65536), 2);
        assert_eq!(bytes_per_index_for(65537), 4);
    }
}
