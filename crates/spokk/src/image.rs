//! Images: creation, file loading, subresource uploads and mip-chain generation.

use crate::blitter::ImageBlitter;
use crate::command::submit_one_shot;
use crate::device::{Device, DeviceQueue};
use crate::error::{GpuError, Result};
use crate::image_file::{ImageFile, ImageFileFlags};
use crate::memory::{Allocation, AllocationScope};
use ash::vk;
use spokk_core::format::{
    align_to, format_info, image_aspect_flags, max_mip_levels, mip_dimension, mip_extent,
    FormatInfo,
};
use std::path::Path;
use tracing::{debug, warn};

/// Layout, access and pipeline stages an image subresource is in (or moves to).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageState {
    pub layout: vk::ImageLayout,
    pub access: vk::AccessFlags,
    pub stages: vk::PipelineStageFlags,
}

impl ImageState {
    /// Contents are undefined and may be discarded.
    pub const UNDEFINED: Self = Self {
        layout: vk::ImageLayout::UNDEFINED,
        access: vk::AccessFlags::empty(),
        stages: vk::PipelineStageFlags::TOP_OF_PIPE,
    };

    /// Written by a transfer command.
    pub const TRANSFER_DST: Self = Self {
        layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        access: vk::AccessFlags::TRANSFER_WRITE,
        stages: vk::PipelineStageFlags::TRANSFER,
    };

    /// Sampled by any shader stage.
    pub const SHADER_READ: Self = Self {
        layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        access: vk::AccessFlags::SHADER_READ,
        stages: vk::PipelineStageFlags::ALL_COMMANDS,
    };

    /// Final state with the given layout and access, reached before all later commands.
    pub const fn new(layout: vk::ImageLayout, access: vk::AccessFlags) -> Self {
        Self {
            layout,
            access,
            stages: vk::PipelineStageFlags::ALL_COMMANDS,
        }
    }
}

/// An image with its memory and a default view.
#[derive(Debug, Default)]
pub struct Image {
    handle: vk::Image,
    view: vk::ImageView,
    allocation: Allocation,
    image_ci: vk::ImageCreateInfo<'static>,
}

/// Copy of `ci` without queue family pointers or extension chains.
fn owned_create_info(ci: &vk::ImageCreateInfo<'_>) -> vk::ImageCreateInfo<'static> {
    vk::ImageCreateInfo::default()
        .flags(ci.flags)
        .image_type(ci.image_type)
        .format(ci.format)
        .extent(ci.extent)
        .mip_levels(ci.mip_levels)
        .array_layers(ci.array_layers)
        .samples(ci.samples)
        .tiling(ci.tiling)
        .usage(ci.usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(ci.initial_layout)
}

/// View covering every mip and layer of an image created from `ci`.
pub fn image_view_create_info(
    image: vk::Image,
    ci: &vk::ImageCreateInfo<'_>,
) -> vk::ImageViewCreateInfo<'static> {
    let layers = ci.array_layers;
    let view_type = match ci.image_type {
        vk::ImageType::TYPE_1D if layers > 1 => vk::ImageViewType::TYPE_1D_ARRAY,
        vk::ImageType::TYPE_1D => vk::ImageViewType::TYPE_1D,
        vk::ImageType::TYPE_3D => vk::ImageViewType::TYPE_3D,
        _ if ci.flags.contains(vk::ImageCreateFlags::CUBE_COMPATIBLE) && layers % 6 == 0 => {
            if layers > 6 {
                vk::ImageViewType::CUBE_ARRAY
            } else {
                vk::ImageViewType::CUBE
            }
        }
        _ if layers > 1 => vk::ImageViewType::TYPE_2D_ARRAY,
        _ => vk::ImageViewType::TYPE_2D,
    };
    vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(view_type)
        .format(ci.format)
        .components(vk::ComponentMapping::default())
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: image_aspect_flags(ci.format),
            base_mip_level: 0,
            level_count: ci.mip_levels,
            base_array_layer: 0,
            layer_count: layers,
        })
}

/// Create info for an image holding `file`.
///
/// With `generate_mips` the mip count is extended to a full chain and the image
/// can be a blit source.
pub fn image_create_info_from_file(
    file: &ImageFile,
    format: vk::Format,
    generate_mips: bool,
) -> vk::ImageCreateInfo<'static> {
    let extent = file.extent();
    let image_type = if extent.depth == 1 && extent.height == 1 {
        vk::ImageType::TYPE_1D
    } else if extent.depth == 1 {
        vk::ImageType::TYPE_2D
    } else {
        vk::ImageType::TYPE_3D
    };
    let mut usage = vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED;
    let mut mip_levels = file.mip_levels;
    if generate_mips {
        mip_levels = max_mip_levels(extent);
        usage |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    let flags = if file.flags.contains(ImageFileFlags::CUBE) {
        vk::ImageCreateFlags::CUBE_COMPATIBLE
    } else {
        vk::ImageCreateFlags::empty()
    };
    vk::ImageCreateInfo::default()
        .flags(flags)
        .image_type(image_type)
        .format(format)
        .extent(extent)
        .mip_levels(mip_levels)
        .array_layers(file.array_layers)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
}

/// Buffer-to-image copy for one `(mip, layer)` whose source rows are `row_pitch_bytes` apart.
///
/// Extents are aligned up to whole texel blocks and are not clamped to the mip
/// extent, so a 2x2 mip of a 4x4-block format copies a 4x4 region.
pub fn file_copy_region(
    base: vk::Extent3D,
    info: FormatInfo,
    aspect: vk::ImageAspectFlags,
    row_pitch_bytes: u32,
    mip: u32,
    layer: u32,
) -> vk::BufferImageCopy {
    let bw = info.texel_block_width;
    let bh = info.texel_block_height;
    let row_length = row_pitch_bytes * bw / info.texel_block_bytes;
    let width = align_to(u64::from(mip_dimension(base.width, mip)), u64::from(bw)) as u32;
    let height = align_to(u64::from(mip_dimension(base.height, mip)), u64::from(bh)) as u32;
    vk::BufferImageCopy {
        buffer_offset: 0,
        buffer_row_length: align_to(u64::from(row_length), u64::from(bw)) as u32,
        buffer_image_height: height,
        image_subresource: vk::ImageSubresourceLayers {
            aspect_mask: aspect,
            mip_level: mip,
            base_array_layer: layer,
            layer_count: 1,
        },
        image_offset: vk::Offset3D::default(),
        image_extent: vk::Extent3D {
            width,
            height,
            depth: mip_dimension(base.depth, mip),
        },
    }
}

/// Number of mips to generate below `src_mip`, or `None` when there is nothing to do.
///
/// `vk::REMAINING_MIP_LEVELS` extends to the end of the chain.
pub fn plan_mip_generation(mip_levels: u32, src_mip: u32, mips_to_gen: u32) -> Result<Option<u32>> {
    if mips_to_gen == 0 {
        return Ok(None);
    }
    if src_mip >= mip_levels {
        return Err(GpuError::InvalidArgument(format!(
            "source mip {src_mip} is outside a {mip_levels}-level image"
        )));
    }
    if src_mip == mip_levels - 1 {
        return Ok(None);
    }
    let available = mip_levels - src_mip - 1;
    let count = if mips_to_gen == vk::REMAINING_MIP_LEVELS {
        available
    } else {
        mips_to_gen
    };
    if count > available {
        return Err(GpuError::InvalidArgument(format!(
            "cannot generate {count} mips below level {src_mip} of {mip_levels}"
        )));
    }
    Ok(Some(count))
}

fn offset_of(extent: vk::Extent3D) -> vk::Offset3D {
    vk::Offset3D {
        x: extent.width as i32,
        y: extent.height as i32,
        z: extent.depth as i32,
    }
}

/// Blits producing mips `src_mip + 1 ..= src_mip + count`, each from the level above it.
pub fn mip_blit_regions(
    base: vk::Extent3D,
    aspect: vk::ImageAspectFlags,
    layer: u32,
    src_mip: u32,
    count: u32,
) -> Vec<vk::ImageBlit> {
    (src_mip + 1..=src_mip + count)
        .map(|dst_mip| {
            let subresource = |mip_level| vk::ImageSubresourceLayers {
                aspect_mask: aspect,
                mip_level,
                base_array_layer: layer,
                layer_count: 1,
            };
            vk::ImageBlit {
                src_subresource: subresource(dst_mip - 1),
                src_offsets: [
                    vk::Offset3D::default(),
                    offset_of(mip_extent(base, dst_mip - 1)),
                ],
                dst_subresource: subresource(dst_mip),
                dst_offsets: [vk::Offset3D::default(), offset_of(mip_extent(base, dst_mip))],
            }
        })
        .collect()
}

fn mip_range(aspect: vk::ImageAspectFlags, layer: u32, base: u32, count: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: base,
        level_count: count,
        base_array_layer: layer,
        layer_count: 1,
    }
}

fn layout_barrier(
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    from: (vk::ImageLayout, vk::AccessFlags),
    to: (vk::ImageLayout, vk::AccessFlags),
) -> vk::ImageMemoryBarrier<'static> {
    vk::ImageMemoryBarrier::default()
        .src_access_mask(from.1)
        .dst_access_mask(to.1)
        .old_layout(from.0)
        .new_layout(to.0)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(range)
}

impl Image {
    /// Create an image, bind memory and create a view of every mip and layer.
    pub fn new(
        device: &Device,
        ci: &vk::ImageCreateInfo<'_>,
        property_mask: vk::MemoryPropertyFlags,
        scope: AllocationScope,
    ) -> Result<Self> {
        let logical = device.logical();
        let handle = unsafe { logical.create_image(ci, None) }?;
        let requirements = unsafe { logical.get_image_memory_requirements(handle) };
        let linear = ci.tiling == vk::ImageTiling::LINEAR;

        let mut allocation =
            match device.device_alloc(requirements, property_mask, scope, linear, "image") {
                Ok(a) => a,
                Err(e) => {
                    unsafe { logical.destroy_image(handle, None) };
                    return Err(e);
                }
            };
        let view_ci = image_view_create_info(handle, ci);
        let bound = unsafe {
            logical
                .bind_image_memory(handle, allocation.block.handle(), allocation.offset)
                .and_then(|()| logical.create_image_view(&view_ci, None))
        };
        match bound {
            Ok(view) => Ok(Self {
                handle,
                view,
                allocation,
                image_ci: owned_create_info(ci),
            }),
            Err(e) => {
                device.device_free(&mut allocation);
                unsafe { logical.destroy_image(handle, None) };
                Err(e.into())
            }
        }
    }

    /// Create a sampled image from an image file and upload its contents.
    ///
    /// With `generate_mips` and a format the device can blit, only the base level is
    /// read from the file and the rest of the chain is generated. Otherwise every mip in
    /// the file is loaded and `image_ci().mip_levels` matches the file. Blocks until
    /// the upload has completed; every subresource is then in `final_state.layout`.
    pub fn create_from_file(
        device: &Device,
        queue: &DeviceQueue,
        path: impl AsRef<Path>,
        generate_mips: bool,
        final_state: ImageState,
    ) -> Result<Self> {
        let path = path.as_ref();
        let file = ImageFile::load(path)?;
        let format = file.vk_format()?;
        let info = format_info(format).ok_or(GpuError::UnsupportedFormat(format))?;

        let blittable = device.is_format_blittable(format, vk::ImageTiling::OPTIMAL);
        if generate_mips && !blittable {
            warn!(
                "{}: format {format:?} does not support blits, skipping mip generation",
                path.display()
            );
        }
        let generate = generate_mips && blittable;
        let ci = image_create_info_from_file(&file, format, generate);
        let loaded_mips = if generate { 1 } else { file.mip_levels };

        let mut staging_bytes = 0_u64;
        for mip in 0..loaded_mips {
            let mip_bytes = align_to(file.subresource_size(mip)? as u64, 16) + 16;
            staging_bytes += mip_bytes * u64::from(file.array_layers);
        }

        let mut image = Self::new(
            device,
            &ci,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            AllocationScope::Device,
        )?;
        let mut blitter = match ImageBlitter::new(device, 1, staging_bytes) {
            Ok(b) => b,
            Err(e) => {
                unsafe { image.destroy(device) };
                return Err(e);
            }
        };

        let aspect = image_aspect_flags(format);
        let result = submit_one_shot(device, queue, |cb| {
            let logical = device.logical();
            let all = vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: ci.mip_levels,
                base_array_layer: 0,
                layer_count: ci.array_layers,
            };
            let host_to_transfer = vk::MemoryBarrier::default()
                .src_access_mask(vk::AccessFlags::HOST_WRITE)
                .dst_access_mask(vk::AccessFlags::TRANSFER_READ);
            let to_dst = layout_barrier(
                image.handle,
                all,
                (vk::ImageLayout::UNDEFINED, vk::AccessFlags::empty()),
                (
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::AccessFlags::TRANSFER_WRITE,
                ),
            );
            unsafe {
                logical.cmd_pipeline_barrier(
                    cb,
                    vk::PipelineStageFlags::HOST,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::DependencyFlags::empty(),
                    &[host_to_transfer],
                    &[],
                    &[to_dst],
                );
            }

            for layer in 0..file.array_layers {
                for mip in 0..loaded_mips {
                    let region = file_copy_region(
                        file.extent(),
                        info,
                        aspect,
                        file.row_pitch_bytes(mip)? as u32,
                        mip,
                        layer,
                    );
                    blitter.copy_memory_to_image(
                        device,
                        cb,
                        image.handle,
                        file.subresource(mip, layer)?,
                        format,
                        &region,
                    )?;
                }
            }

            if generate {
                for layer in 0..file.array_layers {
                    image.record_mip_generation(
                        logical,
                        cb,
                        layer,
                        0,
                        vk::REMAINING_MIP_LEVELS,
                        ImageState::TRANSFER_DST,
                        final_state,
                    )?;
                }
            } else {
                let to_final = layout_barrier(
                    image.handle,
                    all,
                    (
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        vk::AccessFlags::TRANSFER_WRITE,
                    ),
                    (final_state.layout, final_state.access),
                );
                unsafe {
                    logical.cmd_pipeline_barrier(
                        cb,
                        vk::PipelineStageFlags::TRANSFER,
                        final_state.stages,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[],
                        &[to_final],
                    );
                }
            }
            Ok(())
        });

        unsafe { blitter.destroy(device) };
        if let Err(e) = result {
            unsafe { image.destroy(device) };
            return Err(e);
        }
        debug!(
            "loaded {} ({}x{}x{}, {} mips, {:?})",
            path.display(),
            ci.extent.width,
            ci.extent.height,
            ci.extent.depth,
            ci.mip_levels,
            format
        );
        Ok(image)
    }

    /// Upload one subresource from host memory and move it to `final_state`.
    ///
    /// `src_row_bytes` must be a multiple of the format's block size and
    /// `src_layer_height` a multiple of its block height. Blocks until complete.
    pub fn load_subresource(
        &self,
        device: &Device,
        queue: &DeviceQueue,
        src: &[u8],
        src_row_bytes: u32,
        src_layer_height: u32,
        subresource: vk::ImageSubresource,
        final_state: ImageState,
    ) -> Result<()> {
        if self.handle == vk::Image::null() {
            return Err(GpuError::NotInitialized("Image"));
        }
        let format = self.image_ci.format;
        let info = format_info(format).ok_or(GpuError::UnsupportedFormat(format))?;
        if src_row_bytes % info.texel_block_bytes != 0 {
            return Err(GpuError::InvalidArgument(format!(
                "row size {src_row_bytes} is not a multiple of the {}-byte texel block",
                info.texel_block_bytes
            )));
        }
        if src_layer_height % info.texel_block_height != 0 {
            return Err(GpuError::InvalidArgument(format!(
                "layer height {src_layer_height} is not a multiple of the texel block height {}",
                info.texel_block_height
            )));
        }
        let base = self.image_ci.extent;
        let mip = subresource.mip_level;
        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: src_row_bytes * info.texel_block_width / info.texel_block_bytes,
            buffer_image_height: src_layer_height,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: subresource.aspect_mask,
                mip_level: mip,
                base_array_layer: subresource.array_layer,
                layer_count: 1,
            },
            image_offset: vk::Offset3D::default(),
            image_extent: vk::Extent3D {
                width: align_to(
                    u64::from(mip_dimension(base.width, mip)),
                    u64::from(info.texel_block_width),
                ) as u32,
                height: align_to(
                    u64::from(mip_dimension(base.height, mip)),
                    u64::from(info.texel_block_height),
                ) as u32,
                depth: mip_dimension(base.depth, mip),
            },
        };

        let mut blitter = ImageBlitter::new(device, 1, align_to(src.len() as u64, 16) + 16)?;
        let range = vk::ImageSubresourceRange {
            aspect_mask: subresource.aspect_mask,
            base_mip_level: mip,
            level_count: 1,
            base_array_layer: subresource.array_layer,
            layer_count: 1,
        };
        let result = submit_one_shot(device, queue, |cb| {
            let logical = device.logical();
            let to_dst = layout_barrier(
                self.handle,
                range,
                (vk::ImageLayout::UNDEFINED, vk::AccessFlags::empty()),
                (
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::AccessFlags::TRANSFER_WRITE,
                ),
            );
            unsafe {
                logical.cmd_pipeline_barrier(
                    cb,
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[to_dst],
                );
            }
            blitter.copy_memory_to_image(device, cb, self.handle, src, format, &region)?;
            let to_final = layout_barrier(
                self.handle,
                range,
                (
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::AccessFlags::TRANSFER_WRITE,
                ),
                (final_state.layout, final_state.access),
            );
            unsafe {
                logical.cmd_pipeline_barrier(
                    cb,
                    vk::PipelineStageFlags::TRANSFER,
                    final_state.stages,
                    vk::DependencyFlags::BY_REGION,
                    &[],
                    &[],
                    &[to_final],
                );
            }
            Ok(())
        });
        unsafe { blitter.destroy(device) };
        result
    }

    /// Fill mips below `src_mip` of one layer by successive linear blits. Blocks until complete.
    ///
    /// `current` describes the state of every affected mip; afterwards they are all in `final_state`.
    pub fn generate_mipmaps(
        &self,
        device: &Device,
        queue: &DeviceQueue,
        layer: u32,
        src_mip: u32,
        mips_to_gen: u32,
        current: ImageState,
        final_state: ImageState,
    ) -> Result<()> {
        if self.handle == vk::Image::null() {
            return Err(GpuError::NotInitialized("Image"));
        }
        if plan_mip_generation(self.image_ci.mip_levels, src_mip, mips_to_gen)?.is_none() {
            return Ok(());
        }
        submit_one_shot(device, queue, |cb| {
            self.record_mip_generation(
                device.logical(),
                cb,
                layer,
                src_mip,
                mips_to_gen,
                current,
                final_state,
            )
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn record_mip_generation(
        &self,
        logical: &ash::Device,
        cb: vk::CommandBuffer,
        layer: u32,
        src_mip: u32,
        mips_to_gen: u32,
        current: ImageState,
        final_state: ImageState,
    ) -> Result<()> {
        let Some(count) = plan_mip_generation(self.image_ci.mip_levels, src_mip, mips_to_gen)?
        else {
            return Ok(());
        };
        let aspect = image_aspect_flags(self.image_ci.format);
        let transfer_src = (
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::AccessFlags::TRANSFER_READ,
        );
        let transfer_dst = (
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::AccessFlags::TRANSFER_WRITE,
        );
        let start = [
            layout_barrier(
                self.handle,
                mip_range(aspect, layer, src_mip, 1),
                (current.layout, current.access),
                transfer_src,
            ),
            layout_barrier(
                self.handle,
                mip_range(aspect, layer, src_mip + 1, count),
                (vk::ImageLayout::UNDEFINED, vk::AccessFlags::empty()),
                transfer_dst,
            ),
        ];
        unsafe {
            logical.cmd_pipeline_barrier(
                cb,
                current.stages | vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &start,
            );
        }

        let blits = mip_blit_regions(self.image_ci.extent, aspect, layer, src_mip, count);
        let last = src_mip + count;
        for blit in &blits {
            let dst_mip = blit.dst_subresource.mip_level;
            unsafe {
                logical.cmd_blit_image(
                    cb,
                    self.handle,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    self.handle,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    std::slice::from_ref(blit),
                    vk::Filter::LINEAR,
                );
            }
            if dst_mip != last {
                let next_src = layout_barrier(
                    self.handle,
                    mip_range(aspect, layer, dst_mip, 1),
                    transfer_dst,
                    transfer_src,
                );
                unsafe {
                    logical.cmd_pipeline_barrier(
                        cb,
                        vk::PipelineStageFlags::TRANSFER,
                        vk::PipelineStageFlags::TRANSFER,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[],
                        &[next_src],
                    );
                }
            }
        }

        let finish = [
            layout_barrier(
                self.handle,
                mip_range(aspect, layer, src_mip, count),
                transfer_src,
                (final_state.layout, final_state.access),
            ),
            layout_barrier(
                self.handle,
                mip_range(aspect, layer, last, 1),
                transfer_dst,
                (final_state.layout, final_state.access),
            ),
        ];
        unsafe {
            logical.cmd_pipeline_barrier(
                cb,
                vk::PipelineStageFlags::TRANSFER,
                final_state.stages,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &finish,
            );
        }
        Ok(())
    }

    pub fn handle(&self) -> vk::Image {
        self.handle
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn allocation(&self) -> &Allocation {
        &self.allocation
    }

    /// Create info the image was built from.
    pub fn image_ci(&self) -> &vk::ImageCreateInfo<'static> {
        &self.image_ci
    }

    /// Free memory, destroy the view and the image.
    ///
    /// # Safety
    /// The GPU must no longer be using the image.
    pub unsafe fn destroy(&mut self, device: &Device) {
        device.device_free(&mut self.allocation);
        unsafe {
            if self.view != vk::ImageView::null() {
                device.logical().destroy_image_view(self.view, None);
            }
            if self.handle != vk::Image::null() {
                device.logical().destroy_image(self.handle, None);
            }
        }
        self.view = vk::ImageView::null();
        self.handle = vk::Image::null();
    }
}

/// Viewport covering `extent` with a negative height, so +Y points up in clip space.
pub fn extent_to_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: extent.height as f32,
        width: extent.width as f32,
        height: -(extent.height as f32),
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// Rectangle covering `extent` from the origin.
pub fn extent_to_rect2d(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D::default(),
        extent,
    }
}

/// Sampler create info with one filter and address mode for every axis.
pub fn sampler_create_info(
    filter: vk::Filter,
    mipmap_mode: vk::SamplerMipmapMode,
    address_mode: vk::SamplerAddressMode,
) -> vk::SamplerCreateInfo<'static> {
    vk::SamplerCreateInfo::default()
        .mag_filter(filter)
        .min_filter(filter)
        .mipmap_mode(mipmap_mode)
        .address_mode_u(address_mode)
        .address_mode_v(address_mode)
        .address_mode_w(address_mode)
        .mip_lod_bias(0.0)
        .anisotropy_enable(false)
        .max_anisotropy(1.0)
        .compare_enable(false)
        .compare_op(vk::CompareOp::NEVER)
        .min_lod(0.0)
        .max_lod(vk::LOD_CLAMP_NONE)
        .border_color(vk::BorderColor::FLOAT_TRANSPARENT_BLACK)
        .unnormalized_coordinates(false)
}
