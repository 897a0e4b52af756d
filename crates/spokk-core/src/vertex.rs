//! Vertex layouts and conversion between them.
//!
//! Attributes are matched by shader location. Every component is decoded to
//! `f32` and re-encoded in the destination format, except when both sides use
//! the same format, in which case the bytes are copied verbatim.

use crate::error::{Error, Result};
use crate::mesh_format::MeshFormat;
use ash::vk;
use half::f16;

/// Shader input locations used by the engine's standard vertex attributes.
pub mod location {
    pub const POSITION: u32 = 0;
    pub const NORMAL: u32 = 1;
    pub const TANGENT: u32 = 2;
    pub const BITANGENT: u32 = 3;
    pub const BONE_INDEX: u32 = 4;
    pub const BONE_WEIGHT: u32 = 5;
    pub const COLOR0: u32 = 6;
    pub const COLOR1: u32 = 7;
    pub const COLOR2: u32 = 8;
    pub const COLOR3: u32 = 9;
    pub const TEXCOORD0: u32 = 10;
    pub const TEXCOORD1: u32 = 11;
    pub const TEXCOORD2: u32 = 12;
    pub const TEXCOORD3: u32 = 13;
}

/// One attribute inside an interleaved vertex.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttributeInfo {
    pub location: u32,
    pub format: vk::Format,
    pub offset: u32,
}

/// Interleaved vertex layout: a list of attributes and the stride between vertices.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VertexLayout {
    pub stride: u32,
    pub attributes: Vec<AttributeInfo>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Numeric {
    Unorm,
    Snorm,
    Uint,
    Sint,
    Sfloat,
}

#[derive(Clone, Copy, Debug)]
struct AttributeFormat {
    components: u32,
    component_bytes: u32,
    numeric: Numeric,
}

impl AttributeFormat {
    const fn size(self) -> u32 {
        self.components * self.component_bytes
    }
}

fn attribute_format(format: vk::Format) -> Option<AttributeFormat> {
    use vk::Format as F;
    use Numeric::{Sfloat, Sint, Snorm, Uint, Unorm};
    let (components, component_bytes, numeric) = match format {
        F::R8_UNORM => (1, 1, Unorm),
        F::R8_SNORM => (1, 1, Snorm),
        F::R8_UINT => (1, 1, Uint),
        F::R8_SINT => (1, 1, Sint),
        F::R8G8_UNORM => (2, 1, Unorm),
        F::R8G8_SNORM => (2, 1, Snorm),
        F::R8G8_UINT => (2, 1, Uint),
        F::R8G8_SINT => (2, 1, Sint),
        F::R8G8B8_UNORM => (3, 1, Unorm),
        F::R8G8B8_SNORM => (3, 1, Snorm),
        F::R8G8B8_UINT => (3, 1, Uint),
        F::R8G8B8_SINT => (3, 1, Sint),
        F::R8G8B8A8_UNORM => (4, 1, Unorm),
        F::R8G8B8A8_SNORM => (4, 1, Snorm),
        F::R8G8B8A8_UINT => (4, 1, Uint),
        F::R8G8B8A8_SINT => (4, 1, Sint),
        F::R16_UNORM => (1, 2, Unorm),
        F::R16_SNORM => (1, 2, Snorm),
        F::R16_UINT => (1, 2, Uint),
        F::R16_SINT => (1, 2, Sint),
        F::R16_SFLOAT => (1, 2, Sfloat),
        F::R16G16_UNORM => (2, 2, Unorm),
        F::R16G16_SNORM => (2, 2, Snorm),
        F::R16G16_UINT => (2, 2, Uint),
        F::R16G16_SINT => (2, 2, Sint),
        F::R16G16_SFLOAT => (2, 2, Sfloat),
        F::R16G16B16_UNORM => (3, 2, Unorm),
        F::R16G16B16_SNORM => (3, 2, Snorm),
        F::R16G16B16_UINT => (3, 2, Uint),
        F::R16G16B16_SINT => (3, 2, Sint),
        F::R16G16B16_SFLOAT => (3, 2, Sfloat),
        F::R16G16B16A16_UNORM => (4, 2, Unorm),
        F::R16G16B16A16_SNORM => (4, 2, Snorm),
        F::R16G16B16A16_UINT => (4, 2, Uint),
        F::R16G16B16A16_SINT => (4, 2, Sint),
        F::R16G16B16A16_SFLOAT => (4, 2, Sfloat),
        F::R32_UINT => (1, 4, Uint),
        F::R32_SINT => (1, 4, Sint),
        F::R32_SFLOAT => (1, 4, Sfloat),
        F::R32G32_UINT => (2, 4, Uint),
        F::R32G32_SINT => (2, 4, Sint),
        F::R32G32_SFLOAT => (2, 4, Sfloat),
        F::R32G32B32_UINT => (3, 4, Uint),
        F::R32G32B32_SINT => (3, 4, Sint),
        F::R32G32B32_SFLOAT => (3, 4, Sfloat),
        F::R32G32B32A32_UINT => (4, 4, Uint),
        F::R32G32B32A32_SINT => (4, 4, Sint),
        F::R32G32B32A32_SFLOAT => (4, 4, Sfloat),
        _ => return None,
    };
    Some(AttributeFormat {
        components,
        component_bytes,
        numeric,
    })
}

/// Byte size of one attribute of `format`, or `None` if it is not a vertex format.
pub fn attribute_format_size(format: vk::Format) -> Option<u32> {
    attribute_format(format).map(AttributeFormat::size)
}

impl VertexLayout {
    /// Build a tightly packed layout. The stride is the highest attribute offset plus
    /// that attribute's size.
    pub fn new(attributes: impl IntoIterator<Item = AttributeInfo>) -> Result<Self> {
        let attributes: Vec<AttributeInfo> = attributes.into_iter().collect();
        let mut stride = 0;
        let mut highest_offset = None;
        for attr in &attributes {
            let size =
                attribute_format_size(attr.format).ok_or(Error::UnsupportedFormat(attr.format))?;
            if highest_offset.map_or(true, |o| attr.offset >= o) {
                highest_offset = Some(attr.offset);
                stride = attr.offset + size;
            }
        }
        Ok(Self { stride, attributes })
    }

    /// Layout of the vertex buffer bound at `binding` in `mesh_format`.
    ///
    /// `binding` is the buffer bind point, not an index into the bindings array.
    pub fn from_mesh_format(mesh_format: &MeshFormat, binding: u32) -> Result<Self> {
        let desc = mesh_format
            .bindings
            .iter()
            .find(|b| b.binding == binding)
            .ok_or_else(|| Error::InvalidData(format!("no vertex buffer binding {binding}")))?;
        let attributes = mesh_format
            .attributes
            .iter()
            .filter(|a| a.binding == binding)
            .map(|a| AttributeInfo {
                location: a.location,
                format: a.format,
                offset: a.offset,
            })
            .collect();
        Ok(Self {
            stride: desc.stride,
            attributes,
        })
    }

    /// Attribute bound to `location`, if any.
    pub fn attribute(&self, location: u32) -> Option<&AttributeInfo> {
        self.attributes.iter().find(|a| a.location == location)
    }
}

fn decode(bytes: &[u8], fmt: AttributeFormat) -> [f32; 4] {
    let mut out = [0.0f32; 4];
    let width = fmt.component_bytes as usize;
    for (i, value) in out.iter_mut().enumerate().take(fmt.components as usize) {
        let c = &bytes[i * width..(i + 1) * width];
        *value = match (width, fmt.numeric) {
            (1, Numeric::Unorm) => f32::from(c[0]) / 255.0,
            (1, Numeric::Snorm) => (f32::from(c[0] as i8) / 127.0).max(-1.0),
            (1, Numeric::Uint) => f32::from(c[0]),
            (1, Numeric::Sint) => f32::from(c[0] as i8),
            (2, numeric) => {
                let raw = u16::from_le_bytes([c[0], c[1]]);
                match numeric {
                    Numeric::Unorm => f32::from(raw) / 65535.0,
                    Numeric::Snorm => (f32::from(raw as i16) / 32767.0).max(-1.0),
                    Numeric::Uint => f32::from(raw),
                    Numeric::Sint => f32::from(raw as i16),
                    Numeric::Sfloat => f16::from_bits(raw).to_f32(),
                }
            }
            (_, numeric) => {
                let raw = u32::from_le_bytes([c[0], c[1], c[2], c[3]]);
                match numeric {
                    Numeric::Sfloat => f32::from_bits(raw),
                    Numeric::Sint => raw as i32 as f32,
                    _ => raw as f32,
                }
            }
        };
    }
    out
}

fn encode(values: [f32; 4], fmt: AttributeFormat, bytes: &mut [u8]) {
    let width = fmt.component_bytes as usize;
    for (i, &v) in values.iter().enumerate().take(fmt.components as usize) {
        let c = &mut bytes[i * width..(i + 1) * width];
        match (width, fmt.numeric) {
            (1, Numeric::Unorm) => c[0] = (v.clamp(0.0, 1.0) * 255.0).round() as u8,
            (1, Numeric::Snorm) => c[0] = (v.clamp(-1.0, 1.0) * 127.0).round() as i8 as u8,
            (1, Numeric::Uint) => c[0] = v.clamp(0.0, 255.0) as u8,
            (1, Numeric::Sint) => c[0] = v.clamp(-128.0, 127.0) as i8 as u8,
            (2, numeric) => {
                let raw = match numeric {
                    Numeric::Unorm => (v.clamp(0.0, 1.0) * 65535.0).round() as u16,
                    Numeric::Snorm => (v.clamp(-1.0, 1.0) * 32767.0).round() as i16 as u16,
                    Numeric::Uint => v.clamp(0.0, 65535.0) as u16,
                    Numeric::Sint => v.clamp(-32768.0, 32767.0) as i16 as u16,
                    Numeric::Sfloat => f16::from_f32(v).to_bits(),
                };
                c.copy_from_slice(&raw.to_le_bytes());
            }
            (_, numeric) => {
                // Float to int casts saturate.
                let raw = match numeric {
                    Numeric::Sfloat => v.to_bits(),
                    Numeric::Sint => v as i32 as u32,
                    _ => v as u32,
                };
                c.copy_from_slice(&raw.to_le_bytes());
            }
        }
    }
}

/// Convert `vertex_count` vertices from `src_layout` to `dst_layout`.
///
/// Each destination attribute takes its value from the source attribute with the
/// same location. Destination attributes with no source counterpart are zeroed;
/// source attributes with no destination counterpart are dropped.
pub fn convert_vertex_buffer(
    src: &[u8],
    src_layout: &VertexLayout,
    dst: &mut [u8],
    dst_layout: &VertexLayout,
    vertex_count: usize,
) -> Result<()> {
    let span = |layout: &VertexLayout| {
        if vertex_count == 0 {
            0
        } else {
            (vertex_count - 1) * layout.stride as usize
                + layout
                    .attributes
                    .iter()
                    .filter_map(|a| {
                        attribute_format_size(a.format).map(|s| (a.offset + s) as usize)
                    })
                    .max()
                    .unwrap_or(0)
        }
    };
    let src_needed = span(src_layout);
    if src.len() < src_needed {
        return Err(Error::BufferTooSmall {
            needed: src_needed,
            actual: src.len(),
        });
    }
    let dst_needed = span(dst_layout);
    if dst.len() < dst_needed {
        return Err(Error::BufferTooSmall {
            needed: dst_needed,
            actual: dst.len(),
        });
    }

    for dst_attr in &dst_layout.attributes {
        let dst_fmt =
            attribute_format(dst_attr.format).ok_or(Error::UnsupportedFormat(dst_attr.format))?;
        let dst_size = dst_fmt.size() as usize;
        let source = match src_layout.attribute(dst_attr.location) {
            Some(a) => Some((
                a,
                attribute_format(a.format).ok_or(Error::UnsupportedFormat(a.format))?,
            )),
            None => None,
        };

        for v in 0..vertex_count {
            let d = v * dst_layout.stride as usize + dst_attr.offset as usize;
            let out = &mut dst[d..d + dst_size];
            match source {
                None => out.fill(0),
                Some((src_attr, src_fmt)) => {
                    let s = v * src_layout.stride as usize + src_attr.offset as usize;
                    let input = &src[s..s + src_fmt.size() as usize];
                    if src_attr.format == dst_attr.format {
                        out.copy_from_slice(input);
                    } else {
                        encode(decode(input, src_fmt), dst_fmt, out);
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn attr(location: u32, format: vk::Format, offset: u32) -> AttributeInfo {
        AttributeInfo {
            location,
            format,
            offset,
        }
    }

    #[test]
    fn stride_follows_highest_offset() {
        let layout = VertexLayout::new([
            attr(location::POSITION, vk::Format::R32G32B32_SFLOAT, 0),
            attr(location::TEXCOORD0, vk::Format::R32G32_SFLOAT, 24),
            attr(location::NORMAL, vk::Format::R32G32B32_SFLOAT, 12),
        ])
        .unwrap();
        assert_eq!(layout.stride, 32);
        assert!(VertexLayout::new([attr(0, vk::Format::BC1_RGB_UNORM_BLOCK, 0)]).is_err());
    }

    #[test]
    fn float_to_half_and_unorm() {
        let src_layout = VertexLayout::new([
            attr(location::POSITION, vk::Format::R32G32B32_SFLOAT, 0),
            attr(location::COLOR0, vk::Format::R32G32B32A32_SFLOAT, 12),
        ])
        .unwrap();
        let dst_layout = VertexLayout::new([
            attr(location::POSITION, vk::Format::R16G16B16_SFLOAT, 0),
            attr(location::COLOR0, vk::Format::R8G8B8A8_UNORM, 8),
        ])
        .unwrap();
        assert_eq!(dst_layout.stride, 12);

        let src: Vec<f32> = vec![1.5, -2.0, 0.25, 1.0, 0.0, 0.5, 1.0];
        let src_bytes: &[u8] = bytemuck::cast_slice(&src);
        let mut dst = vec![0xAAu8; 12];
        convert_vertex_buffer(src_bytes, &src_layout, &mut dst, &dst_layout, 1).unwrap();

        let x = f16::from_bits(u16::from_le_bytes([dst[0], dst[1]])).to_f32();
        let y = f16::from_bits(u16::from_le_bytes([dst[2], dst[3]])).to_f32();
        assert_relative_eq!(x, 1.5);
        assert_relative_eq!(y, -2.0);
        assert_eq!(&dst[8..12], &[255, 0, 128, 255]);
        // Padding between attributes is untouched.
        assert_eq!(&dst[6..8], &[0xAA, 0xAA]);
    }

    #[test]
    fn missing_source_attribute_is_zeroed() {
        let src_layout =
            VertexLayout::new([attr(location::POSITION, vk::Format::R32G32B32_SFLOAT, 0)]).unwrap();
        let dst_layout = VertexLayout::new([
            attr(location::POSITION, vk::Format::R32G32B32_SFLOAT, 0),
            attr(location::NORMAL, vk::Format::R32G32B32_SFLOAT, 12),
        ])
        .unwrap();
        let src: Vec<f32> = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let mut dst = vec![0xFFu8; 48];
        convert_vertex_buffer(bytemuck::cast_slice(&src), &src_layout, &mut dst, &dst_layout, 2)
            .unwrap();
        let out: &[f32] = bytemuck::cast_slice(&dst);
        assert_eq!(out, &[1.0, 2.0, 3.0, 0.0, 0.0, 0.0, 4.0, 5.0, 6.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn subset_round_trip_restores_bytes() {
        let a = VertexLayout::new([
            attr(location::POSITION, vk::Format::R32G32B32_SFLOAT, 0),
            attr(location::BONE_INDEX, vk::Format::R32_UINT, 12),
        ])
        .unwrap();
        let b = VertexLayout::new([
            attr(location::BONE_INDEX, vk::Format::R32_UINT, 0),
            attr(location::NORMAL, vk::Format::R8G8B8A8_SNORM, 4),
            attr(location::POSITION, vk::Format::R32G32B32_SFLOAT, 8),
        ])
        .unwrap();
        let mut original = Vec::new();
        for v in 0..3u32 {
            for c in [0.1f32, -7.25, 1e6] {
                original.extend_from_slice(&(c * (v as f32 + 1.0)).to_le_bytes());
            }
            original.extend_from_slice(&(0xDEAD_BEEF_u32 + v).to_le_bytes());
        }
        let mut middle = vec![0u8; 3 * b.stride as usize];
        convert_vertex_buffer(&original, &a, &mut middle, &b, 3).unwrap();
        let mut back = vec![0u8; original.len()];
        convert_vertex_buffer(&middle, &b, &mut back, &a, 3).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn rejects_short_buffers() {
        let layout =
            VertexLayout::new([attr(location::POSITION, vk::Format::R32G32B32_SFLOAT, 0)]).unwrap();
        let src = [0u8; 20];
        let mut dst = [0u8; 24];
        let err = convert_vertex_buffer(&src, &layout, &mut dst, &layout, 2).unwrap_err();
        assert!(matches!(err, Error::BufferTooSmall { needed: 24, actual: 20 }));
    }
}
