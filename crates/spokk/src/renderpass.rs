//! Render pass construction from attachment descriptions, subpasses and dependencies.

use crate::device::Device;
use crate::error::{GpuError, Result};
use ash::vk;
use spokk_core::format::{image_aspect_flags, is_depth_format};
use std::fmt;

/// Depth format used by the presets.
pub const PRESET_DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;
/// Format of the intermediate color target in the post-processing presets.
pub const PRESET_SCENE_COLOR_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Attachment references used by one subpass.
#[derive(Clone, Debug, Default)]
pub struct SubpassAttachments {
    pub input_refs: Vec<vk::AttachmentReference>,
    pub color_refs: Vec<vk::AttachmentReference>,
    /// Empty, or one per color ref.
    pub resolve_refs: Vec<vk::AttachmentReference>,
    pub depth_stencil_ref: Option<vk::AttachmentReference>,
    pub preserve_indices: Vec<u32>,
}

impl SubpassAttachments {
    fn references(&self) -> impl Iterator<Item = &vk::AttachmentReference> {
        self.input_refs
            .iter()
            .chain(&self.color_refs)
            .chain(&self.resolve_refs)
            .chain(&self.depth_stencil_ref)
    }
}

/// Common render pass shapes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderPassPreset {
    /// One subpass: color (clear -> store), presented.
    Color,
    /// One subpass: color (clear -> store), depth (clear -> don't care).
    ColorDepth,
    /// Scene color (clear -> don't care), then a subpass reading it as an input attachment
    /// and writing the final color (don't care -> store).
    ColorPost,
    /// As `ColorPost`, with a depth attachment in the scene subpass.
    ColorDepthPost,
    /// As `ColorDepth`, but the color target ends up sampled by a later pass instead of presented.
    ColorDepthOffscreen,
    /// One subpass writing the final color (don't care -> store), presented.
    Post,
}

fn attachment(
    format: vk::Format,
    load_op: vk::AttachmentLoadOp,
    store_op: vk::AttachmentStoreOp,
    final_layout: vk::ImageLayout,
) -> vk::AttachmentDescription {
    vk::AttachmentDescription::default()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(load_op)
        .store_op(store_op)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(final_layout)
}

const fn color_ref(attachment: u32) -> vk::AttachmentReference {
    vk::AttachmentReference {
        attachment,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }
}

const fn depth_ref(attachment: u32) -> vk::AttachmentReference {
    vk::AttachmentReference {
        attachment,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    }
}

const fn input_ref(attachment: u32) -> vk::AttachmentReference {
    vk::AttachmentReference {
        attachment,
        layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    }
}

fn memory_dependency(src_subpass: u32, dst_subpass: u32) -> vk::SubpassDependency {
    let access = vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE;
    vk::SubpassDependency::default()
        .src_subpass(src_subpass)
        .dst_subpass(dst_subpass)
        .src_stage_mask(vk::PipelineStageFlags::ALL_COMMANDS)
        .dst_stage_mask(vk::PipelineStageFlags::ALL_COMMANDS)
        .src_access_mask(access)
        .dst_access_mask(access)
        .dependency_flags(vk::DependencyFlags::BY_REGION)
}

fn input_attachment_dependency(src_subpass: u32, dst_subpass: u32) -> vk::SubpassDependency {
    vk::SubpassDependency::default()
        .src_subpass(src_subpass)
        .dst_subpass(dst_subpass)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
        .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        .dst_access_mask(vk::AccessFlags::INPUT_ATTACHMENT_READ)
        .dependency_flags(vk::DependencyFlags::BY_REGION)
}

/// Render pass description plus the handle and per-subpass state derived from it.
///
/// Fill the public vectors by hand or with [`RenderPass::from_preset`], then call
/// [`RenderPass::finalize`].
#[derive(Default)]
pub struct RenderPass {
    pub attachment_descs: Vec<vk::AttachmentDescription>,
    pub subpass_attachments: Vec<SubpassAttachments>,
    pub subpass_dependencies: Vec<vk::SubpassDependency>,

    handle: vk::RenderPass,
    clear_values: Vec<vk::ClearValue>,
    subpass_samples: Vec<vk::SampleCountFlags>,
}

impl fmt::Debug for RenderPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderPass")
            .field("attachment_descs", &self.attachment_descs)
            .field("subpass_attachments", &self.subpass_attachments)
            .field("subpass_dependencies", &self.subpass_dependencies)
            .field("handle", &self.handle)
            .field("clear_value_count", &self.clear_values.len())
            .field("subpass_samples", &self.subpass_samples)
            .finish()
    }
}

impl RenderPass {
    /// Describe a preset pass. `output_color_format` is the format of the final color target,
    /// usually the swapchain format.
    pub fn from_preset(preset: RenderPassPreset, output_color_format: vk::Format) -> Self {
        use vk::AttachmentLoadOp as Load;
        use vk::AttachmentStoreOp as Store;
        use vk::ImageLayout as Layout;
        let external = vk::SUBPASS_EXTERNAL;

        let mut pass = Self::default();
        match preset {
            RenderPassPreset::Color => {
                pass.attachment_descs = vec![attachment(
                    output_color_format,
                    Load::CLEAR,
                    Store::STORE,
                    Layout::PRESENT_SRC_KHR,
                )];
                pass.subpass_attachments = vec![SubpassAttachments {
                    color_refs: vec![color_ref(0)],
                    ..Default::default()
                }];
                pass.subpass_dependencies =
                    vec![memory_dependency(external, 0), memory_dependency(0, external)];
            }
            RenderPassPreset::ColorDepth | RenderPassPreset::ColorDepthOffscreen => {
                let color_final = if preset == RenderPassPreset::ColorDepthOffscreen {
                    Layout::SHADER_READ_ONLY_OPTIMAL
                } else {
                    Layout::PRESENT_SRC_KHR
                };
                pass.attachment_descs = vec![
                    attachment(output_color_format, Load::CLEAR, Store::STORE, color_final),
                    attachment(
                        PRESET_DEPTH_FORMAT,
                        Load::CLEAR,
                        Store::DONT_CARE,
                        Layout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                    ),
                ];
                pass.subpass_attachments = vec![SubpassAttachments {
                    color_refs: vec![color_ref(0)],
                    depth_stencil_ref: Some(depth_ref(1)),
                    ..Default::default()
                }];
                let outgoing = if preset == RenderPassPreset::ColorDepthOffscreen {
                    vk::SubpassDependency::default()
                        .src_subpass(0)
                        .dst_subpass(external)
                        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                        .dst_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
                        .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                        .dst_access_mask(vk::AccessFlags::SHADER_READ)
                        .dependency_flags(vk::DependencyFlags::BY_REGION)
                } else {
                    memory_dependency(0, external)
                };
                pass.subpass_dependencies = vec![memory_dependency(external, 0), outgoing];
            }
            RenderPassPreset::ColorPost | RenderPassPreset::ColorDepthPost => {
                let with_depth = preset == RenderPassPreset::ColorDepthPost;
                pass.attachment_descs.push(attachment(
                    PRESET_SCENE_COLOR_FORMAT,
                    Load::CLEAR,
                    Store::DONT_CARE,
                    Layout::COLOR_ATTACHMENT_OPTIMAL,
                ));
                if with_depth {
                    pass.attachment_descs.push(attachment(
                        PRESET_DEPTH_FORMAT,
                        Load::CLEAR,
                        Store::DONT_CARE,
                        Layout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                    ));
                }
                let output = pass.attachment_descs.len() as u32;
                pass.attachment_descs.push(attachment(
                    output_color_format,
                    Load::DONT_CARE,
                    Store::STORE,
                    Layout::PRESENT_SRC_KHR,
                ));
                pass.subpass_attachments = vec![
                    SubpassAttachments {
                        color_refs: vec![color_ref(0)],
                        depth_stencil_ref: with_depth.then(|| depth_ref(1)),
                        ..Default::default()
                    },
                    SubpassAttachments {
                        input_refs: vec![input_ref(0)],
                        color_refs: vec![color_ref(output)],
                        ..Default::default()
                    },
                ];
                pass.subpass_dependencies = vec![
                    memory_dependency(external, 0),
                    input_attachment_dependency(0, 1),
                    memory_dependency(1, external),
                ];
            }
            RenderPassPreset::Post => {
                pass.attachment_descs = vec![attachment(
                    output_color_format,
                    Load::DONT_CARE,
                    Store::STORE,
                    Layout::PRESENT_SRC_KHR,
                )];
                pass.subpass_attachments = vec![SubpassAttachments {
                    color_refs: vec![color_ref(0)],
                    ..Default::default()
                }];
                pass.subpass_dependencies =
                    vec![memory_dependency(external, 0), memory_dependency(0, external)];
            }
        }
        pass
    }

    /// Check attachment indices and per-subpass reference counts.
    pub fn validate(&self) -> Result<()> {
        let attachment_count = self.attachment_descs.len() as u32;
        for (i, subpass) in self.subpass_attachments.iter().enumerate() {
            if let Some(r) = subpass
                .references()
                .find(|r| r.attachment != vk::ATTACHMENT_UNUSED && r.attachment >= attachment_count)
            {
                return Err(GpuError::InvalidArgument(format!(
                    "subpass {i} references attachment {} of {attachment_count}",
                    r.attachment
                )));
            }
            if let Some(p) = subpass
                .preserve_indices
                .iter()
                .find(|&&p| p >= attachment_count)
            {
                return Err(GpuError::InvalidArgument(format!(
                    "subpass {i} preserves attachment {p} of {attachment_count}"
                )));
            }
            if !subpass.resolve_refs.is_empty()
                && subpass.resolve_refs.len() != subpass.color_refs.len()
            {
                return Err(GpuError::InvalidArgument(format!(
                    "subpass {i} has {} resolve refs for {} color refs",
                    subpass.resolve_refs.len(),
                    subpass.color_refs.len()
                )));
            }
        }
        Ok(())
    }

    /// Sample count a subpass rasterizes at: the largest among its color and depth attachments.
    fn subpass_sample_count(&self, subpass: &SubpassAttachments) -> vk::SampleCountFlags {
        subpass
            .color_refs
            .iter()
            .chain(&subpass.depth_stencil_ref)
            .filter_map(|r| self.attachment_descs.get(r.attachment as usize))
            .map(|a| a.samples)
            .max_by_key(|s| s.as_raw())
            .unwrap_or(vk::SampleCountFlags::TYPE_1)
    }

    /// Clear values up to the last attachment that clears. Depth attachments clear to 1.0.
    fn default_clear_values(&self) -> Vec<vk::ClearValue> {
        let count = self
            .attachment_descs
            .iter()
            .rposition(|a| {
                a.load_op == vk::AttachmentLoadOp::CLEAR
                    || a.stencil_load_op == vk::AttachmentLoadOp::CLEAR
            })
            .map_or(0, |i| i + 1);
        self.attachment_descs[..count]
            .iter()
            .map(|a| {
                if is_depth_format(a.format) {
                    vk::ClearValue {
                        depth_stencil: vk::ClearDepthStencilValue {
                            depth: 1.0,
                            stencil: 0,
                        },
                    }
                } else {
                    vk::ClearValue {
                        color: vk::ClearColorValue {
                            float32: [0.0, 0.0, 0.0, 0.0],
                        },
                    }
                }
            })
            .collect()
    }

    /// Create the render pass and derive the per-subpass multisample state and clear values.
    pub fn finalize(&mut self, device: &Device) -> Result<()> {
        self.finalize_with(
            device,
            vk::PipelineBindPoint::GRAPHICS,
            vk::SubpassDescriptionFlags::empty(),
        )
    }

    pub fn finalize_with(
        &mut self,
        device: &Device,
        bind_point: vk::PipelineBindPoint,
        flags: vk::SubpassDescriptionFlags,
    ) -> Result<()> {
        if self.handle != vk::RenderPass::null() {
            return Err(GpuError::AlreadyFinalized("RenderPass"));
        }
        self.validate()?;

        let subpass_descs: Vec<vk::SubpassDescription<'_>> = self
            .subpass_attachments
            .iter()
            .map(|s| {
                let mut desc = vk::SubpassDescription::default()
                    .flags(flags)
                    .pipeline_bind_point(bind_point)
                    .input_attachments(&s.input_refs)
                    .color_attachments(&s.color_refs)
                    .preserve_attachments(&s.preserve_indices);
                if !s.resolve_refs.is_empty() {
                    desc = desc.resolve_attachments(&s.resolve_refs);
                }
                if let Some(depth) = &s.depth_stencil_ref {
                    desc = desc.depth_stencil_attachment(depth);
                }
                desc
            })
            .collect();

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&self.attachment_descs)
            .subpasses(&subpass_descs)
            .dependencies(&self.subpass_dependencies);
        let handle = unsafe { device.logical().create_render_pass(&create_info, None) }?;

        self.subpass_samples = self
            .subpass_attachments
            .iter()
            .map(|s| self.subpass_sample_count(s))
            .collect();
        self.clear_values = self.default_clear_values();
        self.handle = handle;
        Ok(())
    }

    pub fn handle(&self) -> vk::RenderPass {
        self.handle
    }

    pub fn subpass_count(&self) -> u32 {
        self.subpass_attachments.len() as u32
    }

    /// Whether `subpass` writes a depth/stencil attachment.
    pub fn subpass_has_depth(&self, subpass: u32) -> bool {
        self.subpass_attachments
            .get(subpass as usize)
            .is_some_and(|s| s.depth_stencil_ref.is_some())
    }

    pub fn color_attachment_count(&self, subpass: u32) -> usize {
        self.subpass_attachments
            .get(subpass as usize)
            .map_or(0, |s| s.color_refs.len())
    }

    /// Multisample state matching `subpass`'s attachments.
    pub fn multisample_state(&self, subpass: u32) -> vk::PipelineMultisampleStateCreateInfo<'static> {
        let samples = self
            .subpass_samples
            .get(subpass as usize)
            .copied()
            .unwrap_or(vk::SampleCountFlags::TYPE_1);
        vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(samples)
            .sample_shading_enable(false)
            .min_sample_shading(1.0)
            .alpha_to_coverage_enable(false)
            .alpha_to_one_enable(false)
    }

    /// Clear values by attachment index; editable before recording.
    pub fn clear_values(&self) -> &[vk::ClearValue] {
        &self.clear_values
    }

    pub fn clear_values_mut(&mut self) -> &mut [vk::ClearValue] {
        &mut self.clear_values
    }

    /// Begin info for `framebuffer` covering `render_area` from the origin.
    pub fn begin_info(
        &self,
        framebuffer: vk::Framebuffer,
        render_area: vk::Extent2D,
    ) -> vk::RenderPassBeginInfo<'_> {
        vk::RenderPassBeginInfo::default()
            .render_pass(self.handle)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: render_area,
            })
            .clear_values(&self.clear_values)
    }

    /// Create info for an image backing `attachment_index` at `render_area`.
    ///
    /// Usage covers every role the attachment plays across subpasses, plus `SAMPLED` when the
    /// pass leaves it ready for shader reads. Attachments that are neither loaded nor stored are
    /// `TRANSIENT`.
    pub fn attachment_image_create_info(
        &self,
        attachment_index: u32,
        render_area: vk::Extent2D,
    ) -> Result<vk::ImageCreateInfo<'static>> {
        let desc = self
            .attachment_descs
            .get(attachment_index as usize)
            .ok_or_else(|| {
                GpuError::InvalidArgument(format!("no attachment {attachment_index}"))
            })?;

        let mut usage = vk::ImageUsageFlags::empty();
        for subpass in &self.subpass_attachments {
            let uses = |refs: &[vk::AttachmentReference]| {
                refs.iter().any(|r| r.attachment == attachment_index)
            };
            if uses(&subpass.color_refs) || uses(&subpass.resolve_refs) {
                usage |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
            }
            if uses(&subpass.input_refs) {
                usage |= vk::ImageUsageFlags::INPUT_ATTACHMENT;
            }
            if subpass
                .depth_stencil_ref
                .is_some_and(|r| r.attachment == attachment_index)
            {
                usage |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
            }
        }
        let sampled = desc.final_layout == vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
        if sampled {
            usage |= vk::ImageUsageFlags::SAMPLED;
        }
        let loads = desc.load_op == vk::AttachmentLoadOp::LOAD
            || desc.stencil_load_op == vk::AttachmentLoadOp::LOAD;
        let stores = desc.store_op == vk::AttachmentStoreOp::STORE
            || desc.stencil_store_op == vk::AttachmentStoreOp::STORE;
        if !loads && !stores && !sampled {
            usage |= vk::ImageUsageFlags::TRANSIENT_ATTACHMENT;
        }

        Ok(vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: render_area.width,
                height: render_area.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(desc.samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(desc.initial_layout))
    }

    /// View create info for `image` used as `attachment_index`.
    pub fn attachment_view_create_info(
        &self,
        attachment_index: u32,
        image: vk::Image,
    ) -> Result<vk::ImageViewCreateInfo<'static>> {
        let desc = self
            .attachment_descs
            .get(attachment_index as usize)
            .ok_or_else(|| {
                GpuError::InvalidArgument(format!("no attachment {attachment_index}"))
            })?;
        Ok(vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .components(vk::ComponentMapping::default())
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(image_aspect_flags(desc.format))
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            ))
    }

    /// Framebuffer create info for this pass; the caller supplies one view per attachment.
    pub fn framebuffer_create_info<'a>(
        &self,
        attachments: &'a [vk::ImageView],
        render_area: vk::Extent2D,
    ) -> Result<vk::FramebufferCreateInfo<'a>> {
        if self.handle == vk::RenderPass::null() {
            return Err(GpuError::NotInitialized("RenderPass"));
        }
        if attachments.len() != self.attachment_descs.len() {
            return Err(GpuError::InvalidArgument(format!(
                "framebuffer needs {} views, got {}",
                self.attachment_descs.len(),
                attachments.len()
            )));
        }
        Ok(vk::FramebufferCreateInfo::default()
            .render_pass(self.handle)
            .attachments(attachments)
            .width(render_area.width)
            .height(render_area.height)
            .layers(1))
    }

    /// # Safety
    /// No framebuffer or pipeline using this pass may still be in use.
    pub unsafe fn destroy(&mut self, device: &Device) {
        if self.handle != vk::RenderPass::null() {
            unsafe { device.logical().destroy_render_pass(self.handle, None) };
        }
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SWAPCHAIN: vk::Format = vk::Format::B8G8R8A8_SRGB;
    const AREA: vk::Extent2D = vk::Extent2D {
        width: 1280,
        height: 720,
    };

    #[test]
    fn presets_are_well_formed() {
        for preset in [
            RenderPassPreset::Color,
            RenderPassPreset::ColorDepth,
            RenderPassPreset::ColorPost,
            RenderPassPreset::ColorDepthPost,
            RenderPassPreset::ColorDepthOffscreen,
            RenderPassPreset::Post,
        ] {
            let pass = RenderPass::from_preset(preset, SWAPCHAIN);
            pass.validate().unwrap();
            assert!(
                pass.attachment_descs.iter().any(|a| a.format == SWAPCHAIN),
                "{preset:?}"
            );
            assert!(pass.subpass_dependencies.len() >= 2);
        }
    }

    #[test]
    fn color_depth_post_layout() {
        let pass = RenderPass::from_preset(RenderPassPreset::ColorDepthPost, SWAPCHAIN);
        assert_eq!(pass.attachment_descs.len(), 3);
        assert_eq!(pass.subpass_count(), 2);
        assert!(pass.subpass_has_depth(0));
        assert!(!pass.subpass_has_depth(1));
        assert_eq!(pass.subpass_attachments[1].input_refs[0].attachment, 0);
        assert_eq!(pass.subpass_attachments[1].color_refs[0].attachment, 2);
        assert_eq!(
            pass.attachment_descs[2].final_layout,
            vk::ImageLayout::PRESENT_SRC_KHR
        );
        assert_eq!(pass.subpass_dependencies.len(), 3);
        assert_eq!(
            pass.subpass_dependencies[1].dst_access_mask,
            vk::AccessFlags::INPUT_ATTACHMENT_READ
        );
    }

    #[test]
    fn attachment_usage_follows_roles() {
        let pass = RenderPass::from_preset(RenderPassPreset::ColorDepthPost, SWAPCHAIN);

        let scene = pass.attachment_image_create_info(0, AREA).unwrap();
        assert_eq!(
            scene.usage,
            vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::INPUT_ATTACHMENT
                | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT
        );
        assert_eq!(scene.extent.width, 1280);
        assert_eq!(scene.format, PRESET_SCENE_COLOR_FORMAT);

        let depth = pass.attachment_image_create_info(1, AREA).unwrap();
        assert!(depth
            .usage
            .contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT));

        let output = pass.attachment_image_create_info(2, AREA).unwrap();
        assert_eq!(output.usage, vk::ImageUsageFlags::COLOR_ATTACHMENT);
        assert!(pass.attachment_image_create_info(3, AREA).is_err());
    }

    #[test]
    fn offscreen_color_is_sampled() {
        let pass = RenderPass::from_preset(RenderPassPreset::ColorDepthOffscreen, SWAPCHAIN);
        let color = pass.attachment_image_create_info(0, AREA).unwrap();
        assert!(color.usage.contains(vk::ImageUsageFlags::SAMPLED));
        assert_eq!(
            pass.subpass_dependencies[1].dst_stage_mask,
            vk::PipelineStageFlags::FRAGMENT_SHADER
        );
    }

    #[test]
    fn depth_view_uses_depth_aspect() {
        let pass = RenderPass::from_preset(RenderPassPreset::ColorDepth, SWAPCHAIN);
        let view = pass
            .attachment_view_create_info(1, vk::Image::null())
            .unwrap();
        assert_eq!(view.subresource_range.aspect_mask, vk::ImageAspectFlags::DEPTH);
        assert_eq!(view.format, PRESET_DEPTH_FORMAT);
    }

    #[test]
    fn clear_values_stop_at_last_cleared_attachment() {
        let pass = RenderPass::from_preset(RenderPassPreset::ColorDepthPost, SWAPCHAIN);
        let clears = pass.default_clear_values();
        assert_eq!(clears.len(), 2);
        let depth = unsafe { clears[1].depth_stencil };
        assert_eq!(depth.depth, 1.0);

        let post = RenderPass::from_preset(RenderPassPreset::Post, SWAPCHAIN);
        assert!(post.default_clear_values().is_empty());
    }

    #[test]
    fn sample_count_is_max_of_subpass_attachments() {
        let mut pass = RenderPass::from_preset(RenderPassPreset::ColorDepth, SWAPCHAIN);
        pass.attachment_descs[1].samples = vk::SampleCountFlags::TYPE_4;
        assert_eq!(
            pass.subpass_sample_count(&pass.subpass_attachments[0]),
            vk::SampleCountFlags::TYPE_4
        );
        let empty = SubpassAttachments::default();
        assert_eq!(pass.subpass_sample_count(&empty), vk::SampleCountFlags::TYPE_1);
    }

    #[test]
    fn validation_catches_bad_references() {
        let mut pass = RenderPass::from_preset(RenderPassPreset::Color, SWAPCHAIN);
        pass.subpass_attachments[0].color_refs.push(color_ref(4));
        assert!(pass.validate().is_err());

        let mut pass = RenderPass::from_preset(RenderPassPreset::Color, SWAPCHAIN);
        pass.subpass_attachments[0].resolve_refs = vec![color_ref(0), color_ref(0)];
        assert!(pass.validate().is_err());
    }

    #[test]
    fn framebuffer_requires_finalized_pass() {
        let pass = RenderPass::from_preset(RenderPassPreset::Color, SWAPCHAIN);
        assert!(matches!(
            pass.framebuffer_create_info(&[vk::ImageView::null()], AREA),
            Err(GpuError::NotInitialized(_))
        ));
    }
}
