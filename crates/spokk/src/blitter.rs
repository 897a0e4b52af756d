//! Pipelined staging for host-to-image copies.

use crate::buffer::PipelinedBuffer;
use crate::device::Device;
use crate::error::{GpuError, Result};
use crate::memory::AllocationScope;
use ash::vk;
use spokk_core::format::{align_to, format_info, FormatInfo};
use std::ptr::NonNull;

/// Where the source bytes of one copy live in the staging ring.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    /// Source already lies in the current pframe's staging memory at `offset`.
    Reuse { offset: u64 },
    /// Source must be copied into the current pframe's staging memory at `offset`.
    Copy { offset: u64 },
}

impl Placement {
    pub fn offset(self) -> u64 {
        match self {
            Self::Reuse { offset } | Self::Copy { offset } => offset,
        }
    }
}

/// Cursor bookkeeping for a ring of equally sized staging regions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagingRing {
    pframe_count: u32,
    bytes_per_pframe: u64,
    current_pframe: u32,
    current_offset: u64,
}

impl StagingRing {
    pub fn new(pframe_count: u32, bytes_per_pframe: u64) -> Self {
        Self {
            pframe_count: pframe_count.max(1),
            bytes_per_pframe,
            current_pframe: 0,
            current_offset: 0,
        }
    }

    pub fn current_pframe(&self) -> u32 {
        self.current_pframe
    }

    pub fn current_offset(&self) -> u64 {
        self.current_offset
    }

    pub fn bytes_per_pframe(&self) -> u64 {
        self.bytes_per_pframe
    }

    /// Move to the next pframe in ring order and reset the cursor.
    pub fn advance(&mut self) {
        self.current_pframe = (self.current_pframe + 1) % self.pframe_count;
        self.current_offset = 0;
    }

    /// Decide where `len` bytes starting at host address `src_addr` are staged.
    ///
    /// `pframe_bases` holds the host base address of each pframe's staging memory.
    /// The cursor only advances for [`Placement::Copy`].
    pub fn place(
        &mut self,
        src_addr: usize,
        len: u64,
        pframe_bases: &[usize],
        alignment: u64,
    ) -> Result<Placement> {
        let size = self.bytes_per_pframe as usize;
        let owner = pframe_bases
            .iter()
            .position(|&base| src_addr >= base && src_addr < base + size);
        if let Some(pframe) = owner {
            if pframe as u32 != self.current_pframe {
                return Err(GpuError::StalePframePointer {
                    pframe: pframe as u32,
                    current: self.current_pframe,
                });
            }
            let offset = (src_addr - pframe_bases[pframe]) as u64;
            if offset + len > self.bytes_per_pframe {
                return Err(GpuError::StagingTooSmall {
                    requested: offset + len,
                    available: self.bytes_per_pframe,
                });
            }
            return Ok(Placement::Reuse { offset });
        }

        let offset = align_to(self.current_offset, alignment);
        if offset + len > self.bytes_per_pframe {
            return Err(GpuError::StagingTooSmall {
                requested: len,
                available: self.bytes_per_pframe.saturating_sub(offset),
            });
        }
        self.current_offset = offset + len;
        Ok(Placement::Copy { offset })
    }
}

/// Bytes read from staging memory by `copy`, from its first texel block to its last.
pub fn staging_copy_size(info: FormatInfo, copy: &vk::BufferImageCopy) -> u64 {
    info.copy_size_bytes(
        copy.buffer_row_length,
        copy.buffer_image_height,
        copy.image_extent.width,
        copy.image_extent.height,
        copy.image_extent.depth,
    )
}

/// Staging offsets must satisfy both the 4-byte copy rule and the texel block size.
fn staging_alignment(info: FormatInfo) -> u64 {
    let block = u64::from(info.texel_block_bytes);
    let gcd = {
        let (mut a, mut b) = (4_u64, block);
        while b != 0 {
            (a, b) = (b, a % b);
        }
        a
    };
    4 * block / gcd
}

fn check_block_alignment(info: FormatInfo, copy: &vk::BufferImageCopy) -> Result<()> {
    let bw = info.texel_block_width as i32;
    let bh = info.texel_block_height as i32;
    let off = copy.image_offset;
    let ext = copy.image_extent;
    if off.x % bw != 0
        || off.y % bh != 0
        || ext.width % info.texel_block_width != 0
        || ext.height % info.texel_block_height != 0
        || copy.buffer_row_length % info.texel_block_width != 0
        || copy.buffer_image_height % info.texel_block_height != 0
    {
        return Err(GpuError::InvalidArgument(format!(
            "copy region is not aligned to {}x{} texel blocks",
            bw, bh
        )));
    }
    Ok(())
}

/// Ring of host-visible staging buffers used to copy host memory into images.
///
/// Call [`ImageBlitter::next_pframe`] once the GPU has consumed the previous
/// pframe's copies.
#[derive(Debug)]
pub struct ImageBlitter {
    ring: StagingRing,
    staging: PipelinedBuffer,
}

impl ImageBlitter {
    pub fn new(device: &Device, pframe_count: u32, bytes_per_pframe: u64) -> Result<Self> {
        let ci = vk::BufferCreateInfo::default()
            .size(bytes_per_pframe)
            .usage(vk::BufferUsageFlags::TRANSFER_SRC)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let staging = PipelinedBuffer::new(
            device,
            pframe_count,
            &ci,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            AllocationScope::Device,
        )?;
        Ok(Self {
            ring: StagingRing::new(pframe_count, bytes_per_pframe),
            staging,
        })
    }

    pub fn current_pframe(&self) -> u32 {
        self.ring.current_pframe()
    }

    /// Advance to the next staging pframe.
    pub fn next_pframe(&mut self) {
        self.ring.advance();
    }

    /// Mapped staging memory of the current pframe and its size.
    ///
    /// Callers may decode directly into this memory; passing a pointer into it to
    /// [`ImageBlitter::copy_memory_to_image`] skips the copy.
    pub fn current_staging_memory(&self) -> Result<(NonNull<u8>, usize)> {
        let ptr = self
            .staging
            .mapped_ptr(self.ring.current_pframe())
            .ok_or(GpuError::NotInitialized("ImageBlitter"))?;
        Ok((ptr, self.ring.bytes_per_pframe() as usize))
    }

    fn pframe_bases(&self) -> Vec<usize> {
        (0..self.staging.depth())
            .filter_map(|p| self.staging.mapped_ptr(p))
            .map(|p| p.as_ptr() as usize)
            .collect()
    }

    /// Record a copy of `src` into one layer of `dst_image`.
    ///
    /// `copy.buffer_offset` is ignored and replaced by the staging offset. The image
    /// must already be in `TRANSFER_DST_OPTIMAL`. Nothing is recorded on error.
    pub fn copy_memory_to_image(
        &mut self,
        device: &Device,
        cb: vk::CommandBuffer,
        dst_image: vk::Image,
        src: &[u8],
        format: vk::Format,
        copy: &vk::BufferImageCopy,
    ) -> Result<()> {
        let info = format_info(format).ok_or(GpuError::UnsupportedFormat(format))?;
        if copy.image_subresource.layer_count != 1 {
            return Err(GpuError::InvalidArgument(
                "blitter copies one array layer at a time".to_string(),
            ));
        }
        check_block_alignment(info, copy)?;
        let size = staging_copy_size(info, copy);
        if (src.len() as u64) < size {
            return Err(GpuError::InvalidArgument(format!(
                "source holds {} bytes, copy reads {size}",
                src.len()
            )));
        }

        let bases = self.pframe_bases();
        let placement = self.ring.place(
            src.as_ptr() as usize,
            size,
            &bases,
            staging_alignment(info),
        )?;
        let pframe = self.ring.current_pframe();
        let staging = self.staging.buffer(pframe);
        let offset = placement.offset();
        if let Placement::Copy { offset } = placement {
            let base = staging
                .mapped_ptr()
                .ok_or(GpuError::NotInitialized("ImageBlitter"))?;
            unsafe {
                std::ptr::copy_nonoverlapping(
                    src.as_ptr(),
                    base.as_ptr().add(offset as usize),
                    size as usize,
                );
            }
        }
        staging.flush(device, offset, size)?;

        let logical = device.logical();
        let to_transfer = vk::BufferMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::HOST_WRITE | vk::AccessFlags::HOST_READ)
            .dst_access_mask(vk::AccessFlags::TRANSFER_READ)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(staging.handle())
            .offset(offset)
            .size(size);
        let to_host = vk::BufferMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::TRANSFER_READ)
            .dst_access_mask(vk::AccessFlags::HOST_WRITE | vk::AccessFlags::HOST_READ)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(staging.handle())
            .offset(offset)
            .size(size);
        let mut region = *copy;
        region.buffer_offset = offset;

        unsafe {
            logical.cmd_pipeline_barrier(
                cb,
                vk::PipelineStageFlags::HOST,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[to_transfer],
                &[],
            );
            logical.cmd_copy_buffer_to_image(
                cb,
                staging.handle(),
                dst_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
            logical.cmd_pipeline_barrier(
                cb,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::HOST,
                vk::DependencyFlags::empty(),
                &[],
                &[to_host],
                &[],
            );
        }
        Ok(())
    }

    /// Destroy the staging buffers.
    ///
    /// # Safety
    /// No submitted copy may still read from staging memory.
    pub unsafe fn destroy(&mut self, device: &Device) {
        unsafe { self.staging.destroy(device) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1 << 20;

    fn rgba8_copy(width: u32, height: u32) -> vk::BufferImageCopy {
        vk::BufferImageCopy {
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_extent: vk::Extent3D {
                width,
                height,
                depth: 1,
            },
            ..Default::default()
        }
    }

    #[test]
    fn copy_size_matches_pixels() {
        let rgba8 = format_info(vk::Format::R8G8B8A8_UNORM).unwrap();
        assert_eq!(staging_copy_size(rgba8, &rgba8_copy(256, 256)), 256 * 256 * 4);

        let bc1 = format_info(vk::Format::BC1_RGB_UNORM_BLOCK).unwrap();
        let mut copy = rgba8_copy(8, 8);
        copy.buffer_row_length = 16;
        // one full 4-block row plus the 2 blocks of the last row, 8 bytes each
        assert_eq!(staging_copy_size(bc1, &copy), 48);

        // 3 layers of 4x4 RGBA8 with a 6-row image height: trailing padding is not read
        let mut layered = rgba8_copy(4, 4);
        layered.buffer_image_height = 6;
        layered.image_extent.depth = 3;
        assert_eq!(staging_copy_size(rgba8, &layered), (2 * 6 * 4 + 4 * 4) * 4);
    }

    #[test]
    fn staging_alignment_covers_block_size() {
        let rgb8 = format_info(vk::Format::R8G8B8_UNORM).unwrap();
        assert_eq!(staging_alignment(rgb8), 12);
        let bc3 = format_info(vk::Format::BC3_UNORM_BLOCK).unwrap();
        assert_eq!(staging_alignment(bc3), 16);
        let r8 = format_info(vk::Format::R8_UNORM).unwrap();
        assert_eq!(staging_alignment(r8), 4);
    }

    #[test]
    fn copies_advance_cursor() {
        let bases = [0x10_0000, 0x20_0000];
        let mut ring = StagingRing::new(2, 0x1000);
        let p = ring.place(0x9000_0000, 100, &bases, 4).unwrap();
        assert_eq!(p, Placement::Copy { offset: 0 });
        let p = ring.place(0x9000_0000, 100, &bases, 4).unwrap();
        assert_eq!(p, Placement::Copy { offset: 100 });
        let p = ring.place(0x9000_0000, 8, &bases, 16).unwrap();
        assert_eq!(p, Placement::Copy { offset: 208 });
        assert_eq!(ring.current_offset(), 216);
    }

    #[test]
    fn pointer_into_current_pframe_is_reused() {
        let bases = [0x10_0000, 0x20_0000];
        let mut ring = StagingRing::new(2, 0x1000);
        let p = ring.place(0x10_0040, 64, &bases, 4).unwrap();
        assert_eq!(p, Placement::Reuse { offset: 0x40 });
        assert_eq!(ring.current_offset(), 0);
    }

    #[test]
    fn pointer_into_other_pframe_is_stale() {
        let bases = [0x10_0000, 0x20_0000];
        let mut ring = StagingRing::new(2, 0x1000);
        let err = ring.place(0x20_0010, 16, &bases, 4).unwrap_err();
        assert!(matches!(
            err,
            GpuError::StalePframePointer {
                pframe: 1,
                current: 0
            }
        ));
        ring.advance();
        assert_eq!(
            ring.place(0x20_0010, 16, &bases, 4).unwrap(),
            Placement::Reuse { offset: 0x10 }
        );
    }

    #[test]
    fn oversized_copy_fails_without_moving_cursor() {
        let bases = [0x1000_0000, 0x2000_0000];
        let mut ring = StagingRing::new(2, MIB);
        let err = ring.place(0x9000_0000, 2 * MIB, &bases, 4).unwrap_err();
        assert!(matches!(err, GpuError::StagingTooSmall { requested, available }
            if requested == 2 * MIB && available == MIB));
        assert_eq!(ring.current_offset(), 0);
    }

    #[test]
    fn advance_wraps_and_resets() {
        let mut ring = StagingRing::new(3, 64);
        ring.place(0x9000, 32, &[], 4).unwrap();
        ring.advance();
        ring.advance();
        assert_eq!(ring.current_pframe(), 2);
        ring.advance();
        assert_eq!(ring.current_pframe(), 0);
        assert_eq!(ring.current_offset(), 0);
    }
}
