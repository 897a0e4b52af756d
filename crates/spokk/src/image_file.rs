//! Decoding of image files into per-subresource texel data.
//!
//! DDS (legacy and DX10 headers) and ASTC files keep their block-compressed
//! payload and full mip chains. Everything else goes through the `image` crate
//! and becomes a single RGBA8 level.

use crate::error::{GpuError, Result};
use ash::vk;
use bitflags::bitflags;
use spokk_core::format::{format_info, mip_dimension};
use std::path::Path;

bitflags! {
    /// Properties of a decoded image file.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ImageFileFlags: u32 {
        /// Array layers are cube faces, six per cube.
        const CUBE = 1;
    }
}

/// Texel encoding of a decoded image file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageFileDataFormat {
    R8Unorm,
    R8G8Unorm,
    R8G8B8A8Unorm,
    R8G8B8A8Srgb,
    B8G8R8A8Unorm,
    B8G8R8A8Srgb,
    R16G16B16A16Float,
    R32Float,
    R32G32B32A32Float,
    Bc1Unorm,
    Bc1Srgb,
    Bc2Unorm,
    Bc2Srgb,
    Bc3Unorm,
    Bc3Srgb,
    Bc4Unorm,
    Bc5Unorm,
    Bc6hUfloat,
    Bc6hSfloat,
    Bc7Unorm,
    Bc7Srgb,
    Astc { block_width: u8, block_height: u8 },
}

impl ImageFileDataFormat {
    /// GPU format holding this data.
    pub fn to_vk_format(self) -> Option<vk::Format> {
        use vk::Format as F;
        Some(match self {
            Self::R8Unorm => F::R8_UNORM,
            Self::R8G8Unorm => F::R8G8_UNORM,
            Self::R8G8B8A8Unorm => F::R8G8B8A8_UNORM,
            Self::R8G8B8A8Srgb => F::R8G8B8A8_SRGB,
            Self::B8G8R8A8Unorm => F::B8G8R8A8_UNORM,
            Self::B8G8R8A8Srgb => F::B8G8R8A8_SRGB,
            Self::R16G16B16A16Float => F::R16G16B16A16_SFLOAT,
            Self::R32Float => F::R32_SFLOAT,
            Self::R32G32B32A32Float => F::R32G32B32A32_SFLOAT,
            Self::Bc1Unorm => F::BC1_RGBA_UNORM_BLOCK,
            Self::Bc1Srgb => F::BC1_RGBA_SRGB_BLOCK,
            Self::Bc2Unorm => F::BC2_UNORM_BLOCK,
            Self::Bc2Srgb => F::BC2_SRGB_BLOCK,
            Self::Bc3Unorm => F::BC3_UNORM_BLOCK,
            Self::Bc3Srgb => F::BC3_SRGB_BLOCK,
            Self::Bc4Unorm => F::BC4_UNORM_BLOCK,
            Self::Bc5Unorm => F::BC5_UNORM_BLOCK,
            Self::Bc6hUfloat => F::BC6H_UFLOAT_BLOCK,
            Self::Bc6hSfloat => F::BC6H_SFLOAT_BLOCK,
            Self::Bc7Unorm => F::BC7_UNORM_BLOCK,
            Self::Bc7Srgb => F::BC7_SRGB_BLOCK,
            Self::Astc {
                block_width,
                block_height,
            } => match (block_width, block_height) {
                (4, 4) => F::ASTC_4X4_UNORM_BLOCK,
                (5, 4) => F::ASTC_5X4_UNORM_BLOCK,
                (5, 5) => F::ASTC_5X5_UNORM_BLOCK,
                (6, 5) => F::ASTC_6X5_UNORM_BLOCK,
                (6, 6) => F::ASTC_6X6_UNORM_BLOCK,
                (8, 5) => F::ASTC_8X5_UNORM_BLOCK,
                (8, 6) => F::ASTC_8X6_UNORM_BLOCK,
                (8, 8) => F::ASTC_8X8_UNORM_BLOCK,
                (10, 5) => F::ASTC_10X5_UNORM_BLOCK,
                (10, 6) => F::ASTC_10X6_UNORM_BLOCK,
                (10, 8) => F::ASTC_10X8_UNORM_BLOCK,
                (10, 10) => F::ASTC_10X10_UNORM_BLOCK,
                (12, 10) => F::ASTC_12X10_UNORM_BLOCK,
                (12, 12) => F::ASTC_12X12_UNORM_BLOCK,
                _ => return None,
            },
        })
    }

    fn from_dxgi(code: u32) -> Option<Self> {
        Some(match code {
            2 => Self::R32G32B32A32Float,
            10 => Self::R16G16B16A16Float,
            28 => Self::R8G8B8A8Unorm,
            29 => Self::R8G8B8A8Srgb,
            41 => Self::R32Float,
            49 => Self::R8G8Unorm,
            61 => Self::R8Unorm,
            71 => Self::Bc1Unorm,
            72 => Self::Bc1Srgb,
            74 => Self::Bc2Unorm,
            75 => Self::Bc2Srgb,
            77 => Self::Bc3Unorm,
            78 => Self::Bc3Srgb,
            80 => Self::Bc4Unorm,
            83 => Self::Bc5Unorm,
            87 => Self::B8G8R8A8Unorm,
            91 => Self::B8G8R8A8Srgb,
            95 => Self::Bc6hUfloat,
            96 => Self::Bc6hSfloat,
            98 => Self::Bc7Unorm,
            99 => Self::Bc7Srgb,
            _ => return None,
        })
    }
}

/// A decoded image file.
///
/// Texel data is stored layer-major: every mip of layer 0 (largest first), then
/// every mip of layer 1, and so on.
#[derive(Clone, Debug)]
pub struct ImageFile {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_levels: u32,
    /// Counts cube faces, not whole cubes, when `flags` contains `CUBE`.
    pub array_layers: u32,
    pub flags: ImageFileFlags,
    pub data_format: ImageFileDataFormat,
    data: Vec<u8>,
}

const DDS_MAGIC: &[u8; 4] = b"DDS ";
const DDS_HEADER_SIZE: u32 = 124;
const DDSD_MIPMAPCOUNT: u32 = 0x2_0000;
const DDSD_DEPTH: u32 = 0x80_0000;
const DDPF_ALPHA: u32 = 0x2;
const DDPF_FOURCC: u32 = 0x4;
const DDPF_RGB: u32 = 0x40;
const DDPF_LUMINANCE: u32 = 0x2_0000;
const DDSCAPS2_CUBEMAP: u32 = 0x200;
const DDSCAPS2_VOLUME: u32 = 0x20_0000;
const DX10_MISC_TEXTURECUBE: u32 = 0x4;
const DX10_DIMENSION_TEXTURE3D: u32 = 4;

const ASTC_MAGIC: u32 = 0x5CA1_AB13;
const ASTC_HEADER_SIZE: usize = 16;

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32> {
    bytes
        .get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| GpuError::ImageFile(format!("truncated header at byte {offset}")))
}

fn read_u24(bytes: &[u8], offset: usize) -> u32 {
    u32::from(bytes[offset])
        | (u32::from(bytes[offset + 1]) << 8)
        | (u32::from(bytes[offset + 2]) << 16)
}

impl ImageFile {
    /// Read and decode the file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|e| GpuError::ImageFile(format!("{}: {e}", path.display())))?;
        Self::from_bytes(&bytes)
            .map_err(|e| GpuError::ImageFile(format!("{}: {e}", path.display())))
    }

    /// Decode an in-memory image file, detecting its container from the leading bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.starts_with(DDS_MAGIC) {
            Self::from_dds(bytes)
        } else if bytes.len() >= 4 && read_u32(bytes, 0)? == ASTC_MAGIC {
            Self::from_astc(bytes)
        } else {
            Self::from_generic(bytes)
        }
    }

    fn from_dds(bytes: &[u8]) -> Result<Self> {
        if read_u32(bytes, 4)? != DDS_HEADER_SIZE {
            return Err(GpuError::ImageFile("bad DDS header size".to_string()));
        }
        let header_flags = read_u32(bytes, 8)?;
        let height = read_u32(bytes, 12)?;
        let width = read_u32(bytes, 16)?;
        let depth_field = read_u32(bytes, 24)?;
        let mip_field = read_u32(bytes, 28)?;
        let pf_flags = read_u32(bytes, 80)?;
        let four_cc = bytes.get(84..88).unwrap_or_default();
        let bit_count = read_u32(bytes, 88)?;
        let r_mask = read_u32(bytes, 92)?;
        let caps2 = read_u32(bytes, 112)?;

        let mip_levels = if header_flags & DDSD_MIPMAPCOUNT != 0 && mip_field > 0 {
            mip_field
        } else {
            1
        };
        let mut depth = if header_flags & DDSD_DEPTH != 0 && caps2 & DDSCAPS2_VOLUME != 0 {
            depth_field.max(1)
        } else {
            1
        };
        let mut flags = ImageFileFlags::empty();
        let mut array_layers = 1;
        let mut data_offset = 128;

        let data_format = if pf_flags & DDPF_FOURCC != 0 {
            match four_cc {
                b"DXT1" => ImageFileDataFormat::Bc1Unorm,
                b"DXT2" | b"DXT3" => ImageFileDataFormat::Bc2Unorm,
                b"DXT4" | b"DXT5" => ImageFileDataFormat::Bc3Unorm,
                b"ATI1" | b"BC4U" => ImageFileDataFormat::Bc4Unorm,
                b"ATI2" | b"BC5U" => ImageFileDataFormat::Bc5Unorm,
                b"DX10" => {
                    let dxgi = read_u32(bytes, 128)?;
                    let dimension = read_u32(bytes, 132)?;
                    let misc = read_u32(bytes, 136)?;
                    array_layers = read_u32(bytes, 140)?.max(1);
                    data_offset = 148;
                    if misc & DX10_MISC_TEXTURECUBE != 0 {
                        flags |= ImageFileFlags::CUBE;
                        array_layers *= 6;
                    }
                    if dimension == DX10_DIMENSION_TEXTURE3D {
                        depth = depth_field.max(1);
                    }
                    ImageFileDataFormat::from_dxgi(dxgi).ok_or_else(|| {
                        GpuError::ImageFile(format!("unsupported DXGI format {dxgi}"))
                    })?
                }
                other => {
                    return Err(GpuError::ImageFile(format!(
                        "unsupported DDS fourCC {:?}",
                        String::from_utf8_lossy(other)
                    )))
                }
            }
        } else if pf_flags & DDPF_RGB != 0 && bit_count == 32 {
            match r_mask {
                0x0000_00FF => ImageFileDataFormat::R8G8B8A8Unorm,
                0x00FF_0000 => ImageFileDataFormat::B8G8R8A8Unorm,
                _ => {
                    return Err(GpuError::ImageFile(format!(
                        "unsupported 32-bit DDS channel mask {r_mask:#x}"
                    )))
                }
            }
        } else if pf_flags & (DDPF_LUMINANCE | DDPF_ALPHA) != 0 && bit_count == 8 {
            ImageFileDataFormat::R8Unorm
        } else {
            return Err(GpuError::ImageFile(format!(
                "unsupported DDS pixel format (flags {pf_flags:#x}, {bit_count} bits)"
            )));
        };

        if data_offset == 128 && caps2 & DDSCAPS2_CUBEMAP != 0 {
            flags |= ImageFileFlags::CUBE;
            array_layers = 6;
        }

        let file = Self {
            width,
            height,
            depth,
            mip_levels,
            array_layers,
            flags,
            data_format,
            data: bytes.get(data_offset..).unwrap_or_default().to_vec(),
        };
        file.check_payload()?;
        Ok(file)
    }

    fn from_astc(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < ASTC_HEADER_SIZE {
            return Err(GpuError::ImageFile("truncated ASTC header".to_string()));
        }
        let data_format = ImageFileDataFormat::Astc {
            block_width: bytes[4],
            block_height: bytes[5],
        };
        if bytes[6] != 1 || data_format.to_vk_format().is_none() {
            return Err(GpuError::ImageFile(format!(
                "unsupported ASTC block {}x{}x{}",
                bytes[4], bytes[5], bytes[6]
            )));
        }
        let file = Self {
            width: read_u24(bytes, 7),
            height: read_u24(bytes, 10),
            depth: read_u24(bytes, 13).max(1),
            mip_levels: 1,
            array_layers: 1,
            flags: ImageFileFlags::empty(),
            data_format,
            data: bytes[ASTC_HEADER_SIZE..].to_vec(),
        };
        file.check_payload()?;
        Ok(file)
    }

    fn from_generic(bytes: &[u8]) -> Result<Self> {
        let decoded = image::load_from_memory(bytes)
            .map_err(|e| GpuError::ImageFile(e.to_string()))?
            .to_rgba8();
        let (width, height) = decoded.dimensions();
        Ok(Self {
            width,
            height,
            depth: 1,
            mip_levels: 1,
            array_layers: 1,
            flags: ImageFileFlags::empty(),
            data_format: ImageFileDataFormat::R8G8B8A8Unorm,
            data: decoded.into_raw(),
        })
    }

    fn check_payload(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(GpuError::ImageFile("zero image extent".to_string()));
        }
        let needed = self.layer_size()? * self.array_layers as usize;
        if self.data.len() < needed {
            return Err(GpuError::ImageFile(format!(
                "texel data holds {} bytes, expected {needed}",
                self.data.len()
            )));
        }
        Ok(())
    }

    /// GPU format of the texel data.
    pub fn vk_format(&self) -> Result<vk::Format> {
        self.data_format.to_vk_format().ok_or_else(|| {
            GpuError::ImageFile(format!("no GPU format for {:?}", self.data_format))
        })
    }

    /// Bytes in one row of texel blocks at `mip`.
    pub fn row_pitch_bytes(&self, mip: u32) -> Result<usize> {
        let format = self.vk_format()?;
        let info = format_info(format).ok_or(GpuError::UnsupportedFormat(format))?;
        let blocks = mip_dimension(self.width, mip).div_ceil(info.texel_block_width);
        Ok(blocks as usize * info.texel_block_bytes as usize)
    }

    /// Bytes of one layer's data at `mip`, covering every depth slice.
    pub fn subresource_size(&self, mip: u32) -> Result<usize> {
        let format = self.vk_format()?;
        let info = format_info(format).ok_or(GpuError::UnsupportedFormat(format))?;
        let rows = mip_dimension(self.height, mip).div_ceil(info.texel_block_height) as usize;
        Ok(self.row_pitch_bytes(mip)? * rows * mip_dimension(self.depth, mip) as usize)
    }

    fn layer_size(&self) -> Result<usize> {
        (0..self.mip_levels).map(|m| self.subresource_size(m)).sum()
    }

    /// Byte offset of `(mip, layer)` within the texel data.
    pub fn subresource_offset(&self, mip: u32, layer: u32) -> Result<usize> {
        if mip >= self.mip_levels || layer >= self.array_layers {
            return Err(GpuError::InvalidArgument(format!(
                "subresource mip {mip} layer {layer} out of range"
            )));
        }
        let within_layer: usize = (0..mip)
            .map(|m| self.subresource_size(m))
            .sum::<Result<usize>>()?;
        Ok(layer as usize * self.layer_size()? + within_layer)
    }

    /// Texel data of `(mip, layer)`.
    pub fn subresource(&self, mip: u32, layer: u32) -> Result<&[u8]> {
        let offset = self.subresource_offset(mip, layer)?;
        let size = self.subresource_size(mip)?;
        self.data
            .get(offset..offset + size)
            .ok_or_else(|| GpuError::ImageFile("subresource past end of data".to_string()))
    }

    /// Base extent as a 3D extent.
    pub fn extent(&self) -> vk::Extent3D {
        vk::Extent3D {
            width: self.width,
            height: self.height,
            depth: self.depth,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn put(buf: &mut [u8], offset: usize, value: u32) {
        buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Legacy-header DDS with the given fourCC and `payload` bytes of data.
    pub(crate) fn dds(width: u32, height: u32, mips: u32, four_cc: &[u8; 4], payload: usize) -> Vec<u8> {
        let mut buf = vec![0_u8; 128 + payload];
        buf[0..4].copy_from_slice(DDS_MAGIC);
        put(&mut buf, 4, DDS_HEADER_SIZE);
        put(&mut buf, 8, 0x1007 | DDSD_MIPMAPCOUNT);
        put(&mut buf, 12, height);
        put(&mut buf, 16, width);
        put(&mut buf, 28, mips);
        put(&mut buf, 76, 32);
        put(&mut buf, 80, DDPF_FOURCC);
        buf[84..88].copy_from_slice(four_cc);
        for (i, b) in buf[128..].iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        buf
    }

    #[test]
    fn decodes_dxt1_mip_chain() {
        // 8x8 BC1: 4 blocks, then 1, then 1 (4x4 minimum block footprint).
        let bytes = dds(8, 8, 4, b"DXT1", (4 + 1 + 1 + 1) * 8);
        let file = ImageFile::from_bytes(&bytes).unwrap();
        assert_eq!(file.data_format, ImageFileDataFormat::Bc1Unorm);
        assert_eq!(file.mip_levels, 4);
        assert_eq!(file.vk_format().unwrap(), vk::Format::BC1_RGBA_UNORM_BLOCK);
        assert_eq!(file.subresource_size(0).unwrap(), 32);
        assert_eq!(file.subresource_size(1).unwrap(), 8);
        assert_eq!(file.subresource_size(3).unwrap(), 8);
        assert_eq!(file.subresource_offset(2, 0).unwrap(), 40);
        assert_eq!(file.row_pitch_bytes(0).unwrap(), 16);
        assert_eq!(file.subresource(1, 0).unwrap()[0], 32);
    }

    #[test]
    fn decodes_dx10_cube_array() {
        let mut bytes = dds(4, 4, 1, b"DX10", 0);
        bytes.resize(148 + 12 * 16, 0);
        put(&mut bytes, 128, 28);
        put(&mut bytes, 132, 3);
        put(&mut bytes, 136, DX10_MISC_TEXTURECUBE);
        put(&mut bytes, 140, 2);
        let file = ImageFile::from_bytes(&bytes).unwrap();
        assert!(file.flags.contains(ImageFileFlags::CUBE));
        assert_eq!(file.array_layers, 12);
        assert_eq!(file.data_format, ImageFileDataFormat::R8G8B8A8Unorm);
        assert_eq!(file.subresource_offset(0, 5).unwrap(), 5 * 64);
        assert!(file.subresource_offset(0, 12).is_err());
    }

    #[test]
    fn rejects_truncated_payload() {
        let bytes = dds(8, 8, 1, b"DXT5", 16);
        assert!(matches!(
            ImageFile::from_bytes(&bytes),
            Err(GpuError::ImageFile(_))
        ));
    }

    #[test]
    fn rejects_unknown_four_cc() {
        let bytes = dds(4, 4, 1, b"XYZW", 64);
        assert!(ImageFile::from_bytes(&bytes).is_err());
    }

    #[test]
    fn decodes_astc_header() {
        let mut bytes = vec![0_u8; ASTC_HEADER_SIZE + 4 * 16];
        bytes[0..4].copy_from_slice(&ASTC_MAGIC.to_le_bytes());
        bytes[4] = 6;
        bytes[5] = 6;
        bytes[6] = 1;
        bytes[7] = 12;
        bytes[10] = 10;
        bytes[13] = 1;
        let file = ImageFile::from_bytes(&bytes).unwrap();
        assert_eq!(file.vk_format().unwrap(), vk::Format::ASTC_6X6_UNORM_BLOCK);
        assert_eq!((file.width, file.height, file.depth), (12, 10, 1));
        assert_eq!(file.subresource_size(0).unwrap(), 64);
    }

    #[test]
    fn decodes_png_as_rgba8() {
        let img = image::RgbaImage::from_fn(3, 2, |x, y| image::Rgba([x as u8, y as u8, 7, 255]));
        let mut png = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        let file = ImageFile::from_bytes(&png).unwrap();
        assert_eq!((file.width, file.height, file.mip_levels), (3, 2, 1));
        assert_eq!(file.data_format, ImageFileDataFormat::R8G8B8A8Unorm);
        let texels = file.subresource(0, 0).unwrap();
        assert_eq!(texels.len(), 24);
        assert_eq!(&texels[4..8], &[1, 0, 7, 255]);
    }
}
