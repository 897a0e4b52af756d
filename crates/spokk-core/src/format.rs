//! Texel-block format table and image dimension helpers.
//!
//! Every copy into an image is described in texel blocks: a block is 1x1 for
//! ordinary formats and wider for compressed ones (4x4 for BC/ETC2/EAC, NxM for ASTC).

use ash::vk;

/// Byte size and dimensions of one texel block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FormatInfo {
    /// Bytes occupied by one texel block
    pub texel_block_bytes: u32,
    /// Block width in texels
    pub texel_block_width: u32,
    /// Block height in texels
    pub texel_block_height: u32,
}

impl FormatInfo {
    const fn plain(bytes: u32) -> Self {
        Self {
            texel_block_bytes: bytes,
            texel_block_width: 1,
            texel_block_height: 1,
        }
    }

    const fn block(bytes: u32, width: u32, height: u32) -> Self {
        Self {
            texel_block_bytes: bytes,
            texel_block_width: width,
            texel_block_height: height,
        }
    }

    /// True for formats whose blocks span more than one texel.
    #[inline]
    pub const fn is_compressed(&self) -> bool {
        self.texel_block_width > 1 || self.texel_block_height > 1
    }

    /// Number of texels covered by one block.
    #[inline]
    pub const fn texels_per_block(&self) -> u32 {
        self.texel_block_width * self.texel_block_height
    }

    /// Bytes needed to hold a `row_length` x `image_height` x `depth` region from
    /// which a `width` x `height` x `depth` rectangle is read.
    ///
    /// Rows and heights are aligned up to whole blocks. The size is the tight span
    /// from the first texel to the last, so trailing row padding is not counted.
    pub fn copy_size_bytes(
        &self,
        row_length: u32,
        image_height: u32,
        width: u32,
        height: u32,
        depth: u32,
    ) -> u64 {
        let bw = self.texel_block_width;
        let bh = self.texel_block_height;
        let row_blocks = u64::from(row_length.max(width).div_ceil(bw));
        let slice_rows = u64::from(image_height.max(height).div_ceil(bh));
        let width_blocks = u64::from(width.div_ceil(bw));
        let height_rows = u64::from(height.div_ceil(bh));
        if width_blocks == 0 || height_rows == 0 || depth == 0 {
            return 0;
        }
        let last_slice = (height_rows - 1) * row_blocks + width_blocks;
        let blocks = u64::from(depth - 1) * slice_rows * row_blocks + last_slice;
        blocks * u64::from(self.texel_block_bytes)
    }
}

/// Look up the texel-block description for `format`.
///
/// Returns `None` for formats outside the table (including `UNDEFINED`).
pub fn format_info(format: vk::Format) -> Option<FormatInfo> {
    use vk::Format as F;
    let info = match format {
        F::R4G4_UNORM_PACK8 | F::R8_UNORM | F::R8_SNORM | F::R8_UINT | F::R8_SINT | F::R8_SRGB
        | F::S8_UINT => FormatInfo::plain(1),

        F::R4G4B4A4_UNORM_PACK16
        | F::B4G4R4A4_UNORM_PACK16
        | F::R5G6B5_UNORM_PACK16
        | F::B5G6R5_UNORM_PACK16
        | F::R5G5B5A1_UNORM_PACK16
        | F::B5G5R5A1_UNORM_PACK16
        | F::A1R5G5B5_UNORM_PACK16
        | F::R8G8_UNORM
        | F::R8G8_SNORM
        | F::R8G8_UINT
        | F::R8G8_SINT
        | F::R8G8_SRGB
        | F::R16_UNORM
        | F::R16_SNORM
        | F::R16_UINT
        | F::R16_SINT
        | F::R16_SFLOAT
        | F::D16_UNORM => FormatInfo::plain(2),

        F::R8G8B8_UNORM
        | F::R8G8B8_SNORM
        | F::R8G8B8_UINT
        | F::R8G8B8_SINT
        | F::R8G8B8_SRGB
        | F::B8G8R8_UNORM
        | F::B8G8R8_SRGB
        | F::D16_UNORM_S8_UINT => FormatInfo::plain(3),

        F::R8G8B8A8_UNORM
        | F::R8G8B8A8_SNORM
        | F::R8G8B8A8_UINT
        | F::R8G8B8A8_SINT
        | F::R8G8B8A8_SRGB
        | F::B8G8R8A8_UNORM
        | F::B8G8R8A8_SRGB
        | F::A8B8G8R8_UNORM_PACK32
        | F::A8B8G8R8_SRGB_PACK32
        | F::A2R10G10B10_UNORM_PACK32
        | F::A2B10G10R10_UNORM_PACK32
        | F::A2B10G10R10_UINT_PACK32
        | F::R16G16_UNORM
        | F::R16G16_SNORM
        | F::R16G16_UINT
        | F::R16G16_SINT
        | F::R16G16_SFLOAT
        | F::R32_UINT
        | F::R32_SINT
        | F::R32_SFLOAT
        | F::B10G11R11_UFLOAT_PACK32
        | F::E5B9G9R9_UFLOAT_PACK32
        | F::X8_D24_UNORM_PACK32
        | F::D24_UNORM_S8_UINT
        | F::D32_SFLOAT => FormatInfo::plain(4),

        F::R16G16B16_UNORM
        | F::R16G16B16_SNORM
        | F::R16G16B16_UINT
        | F::R16G16B16_SINT
        | F::R16G16B16_SFLOAT => FormatInfo::plain(6),

        F::R16G16B16A16_UNORM
        | F::R16G16B16A16_SNORM
        | F::R16G16B16A16_UINT
        | F::R16G16B16A16_SINT
        | F::R16G16B16A16_SFLOAT
        | F::R32G32_UINT
        | F::R32G32_SINT
        | F::R32G32_SFLOAT
        | F::D32_SFLOAT_S8_UINT => FormatInfo::plain(8),

        F::R32G32B32_UINT | F::R32G32B32_SINT | F::R32G32B32_SFLOAT => FormatInfo::plain(12),

        F::R32G32B32A32_UINT | F::R32G32B32A32_SINT | F::R32G32B32A32_SFLOAT => {
            FormatInfo::plain(16)
        }

        F::BC1_RGB_UNORM_BLOCK
        | F::BC1_RGB_SRGB_BLOCK
        | F::BC1_RGBA_UNORM_BLOCK
        | F::BC1_RGBA_SRGB_BLOCK
        | F::BC4_UNORM_BLOCK
        | F::BC4_SNORM_BLOCK
        | F::ETC2_R8G8B8_UNORM_BLOCK
        | F::ETC2_R8G8B8_SRGB_BLOCK
        | F::ETC2_R8G8B8A1_UNORM_BLOCK
        | F::ETC2_R8G8B8A1_SRGB_BLOCK
        | F::EAC_R11_UNORM_BLOCK
        | F::EAC_R11_SNORM_BLOCK => FormatInfo::block(8, 4, 4),

        F::BC2_UNORM_BLOCK
        | F::BC2_SRGB_BLOCK
        | F::BC3_UNORM_BLOCK
        | F::BC3_SRGB_BLOCK
        | F::BC5_UNORM_BLOCK
        | F::BC5_SNORM_BLOCK
        | F::BC6H_UFLOAT_BLOCK
        | F::BC6H_SFLOAT_BLOCK
        | F::BC7_UNORM_BLOCK
        | F::BC7_SRGB_BLOCK
        | F::ETC2_R8G8B8A8_UNORM_BLOCK
        | F::ETC2_R8G8B8A8_SRGB_BLOCK
        | F::EAC_R11G11_UNORM_BLOCK
        | F::EAC_R11G11_SNORM_BLOCK => FormatInfo::block(16, 4, 4),

        F::ASTC_4X4_UNORM_BLOCK | F::ASTC_4X4_SRGB_BLOCK => FormatInfo::block(16, 4, 4),
        F::ASTC_5X4_UNORM_BLOCK | F::ASTC_5X4_SRGB_BLOCK => FormatInfo::block(16, 5, 4),
        F::ASTC_5X5_UNORM_BLOCK | F::ASTC_5X5_SRGB_BLOCK => FormatInfo::block(16, 5, 5),
        F::ASTC_6X5_UNORM_BLOCK | F::ASTC_6X5_SRGB_BLOCK => FormatInfo::block(16, 6, 5),
        F::ASTC_6X6_UNORM_BLOCK | F::ASTC_6X6_SRGB_BLOCK => FormatInfo::block(16, 6, 6),
        F::ASTC_8X5_UNORM_BLOCK | F::ASTC_8X5_SRGB_BLOCK => FormatInfo::block(16, 8, 5),
        F::ASTC_8X6_UNORM_BLOCK | F::ASTC_8X6_SRGB_BLOCK => FormatInfo::block(16, 8, 6),
        F::ASTC_8X8_UNORM_BLOCK | F::ASTC_8X8_SRGB_BLOCK => FormatInfo::block(16, 8, 8),
        F::ASTC_10X5_UNORM_BLOCK | F::ASTC_10X5_SRGB_BLOCK => FormatInfo::block(16, 10, 5),
        F::ASTC_10X6_UNORM_BLOCK | F::ASTC_10X6_SRGB_BLOCK => FormatInfo::block(16, 10, 6),
        F::ASTC_10X8_UNORM_BLOCK | F::ASTC_10X8_SRGB_BLOCK => FormatInfo::block(16, 10, 8),
        F::ASTC_10X10_UNORM_BLOCK | F::ASTC_10X10_SRGB_BLOCK => FormatInfo::block(16, 10, 10),
        F::ASTC_12X10_UNORM_BLOCK | F::ASTC_12X10_SRGB_BLOCK => FormatInfo::block(16, 12, 10),
        F::ASTC_12X12_UNORM_BLOCK | F::ASTC_12X12_SRGB_BLOCK => FormatInfo::block(16, 12, 12),

        _ => return None,
    };
    Some(info)
}

/// True for formats with a depth component.
pub fn is_depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::X8_D24_UNORM_PACK32
            | vk::Format::D32_SFLOAT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// True for formats with a stencil component.
pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// Aspect mask covering every component of `format`.
pub fn image_aspect_flags(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::UNDEFINED => vk::ImageAspectFlags::empty(),
        vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
        f if is_depth_format(f) && has_stencil(f) => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        f if is_depth_format(f) => vk::ImageAspectFlags::DEPTH,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// Round `value` up to a multiple of `alignment`. An alignment of 0 leaves it unchanged.
#[inline]
pub const fn align_to(value: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        value
    } else {
        value.div_ceil(alignment) * alignment
    }
}

/// Extent of one axis at `level`, clamped to 1.
#[inline]
pub const fn mip_dimension(base: u32, level: u32) -> u32 {
    if level >= 32 {
        1
    } else {
        let d = base >> level;
        if d == 0 {
            1
        } else {
            d
        }
    }
}

/// Extent of mip `level` of an image whose base level is `base`.
#[inline]
pub const fn mip_extent(base: vk::Extent3D, level: u32) -> vk::Extent3D {
    vk::Extent3D {
        width: mip_dimension(base.width, level),
        height: mip_dimension(base.height, level),
        depth: mip_dimension(base.depth, level),
    }
}

/// Length of a full mip chain: `floor(log2(max(w, h, d))) + 1`.
#[inline]
pub const fn max_mip_levels(extent: vk::Extent3D) -> u32 {
    let mut largest = extent.width;
    if extent.height > largest {
        largest = extent.height;
    }
    if extent.depth > largest {
        largest = extent.depth;
    }
    if largest == 0 {
        1
    } else {
        u32::BITS - largest.leading_zeros()
    }
}
