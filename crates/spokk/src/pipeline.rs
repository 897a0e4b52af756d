//! Graphics and compute pipelines built from a finalized [`ShaderProgram`].

use crate::device::Device;
use crate::error::{GpuError, Result};
use crate::program::ShaderProgram;
use crate::renderpass::RenderPass;
use ash::vk;
use spokk_core::MeshFormat;
use tracing::debug;

/// Graphics pipeline state for one program, mesh format and render-pass subpass.
///
/// The state structs are public so callers can adjust blending, depth compare, culling and so on
/// before [`GraphicsPipeline::finalize`]. The pipeline borrows its program, mesh format and render
/// pass; all three must outlive it.
#[derive(Debug)]
pub struct GraphicsPipeline<'a> {
    program: &'a ShaderProgram,
    mesh_format: &'a MeshFormat,
    render_pass: &'a RenderPass,
    subpass: u32,

    /// Defaults to `VIEWPORT` and `SCISSOR`.
    pub dynamic_states: Vec<vk::DynamicState>,
    /// Static viewports; ignored while `VIEWPORT` is dynamic.
    pub viewports: Vec<vk::Viewport>,
    /// Static scissors; ignored while `SCISSOR` is dynamic.
    pub scissors: Vec<vk::Rect2D>,
    pub input_assembly: vk::PipelineInputAssemblyStateCreateInfo<'static>,
    pub rasterization: vk::PipelineRasterizationStateCreateInfo<'static>,
    pub multisample: vk::PipelineMultisampleStateCreateInfo<'static>,
    pub depth_stencil: vk::PipelineDepthStencilStateCreateInfo<'static>,
    /// One per color attachment of the subpass.
    pub color_blend_attachments: Vec<vk::PipelineColorBlendAttachmentState>,
    pub blend_constants: [f32; 4],

    handle: vk::Pipeline,
}

impl<'a> GraphicsPipeline<'a> {
    pub fn new(
        program: &'a ShaderProgram,
        mesh_format: &'a MeshFormat,
        render_pass: &'a RenderPass,
        subpass: u32,
    ) -> Self {
        // Rasterization
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false)
            .line_width(1.0);

        // Depth stencil
        let has_depth = render_pass.subpass_has_depth(subpass);
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(has_depth)
            .depth_write_enable(has_depth)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false)
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0);

        // Color blending
        let color_blend_attachments = (0..render_pass.color_attachment_count(subpass))
            .map(|_| {
                vk::PipelineColorBlendAttachmentState::default()
                    .blend_enable(false)
                    .color_write_mask(vk::ColorComponentFlags::RGBA)
            })
            .collect();

        Self {
            program,
            mesh_format,
            render_pass,
            subpass,
            dynamic_states: vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR],
            viewports: Vec::new(),
            scissors: Vec::new(),
            input_assembly: mesh_format.input_assembly_state(),
            rasterization,
            multisample: render_pass.multisample_state(subpass),
            depth_stencil,
            color_blend_attachments,
            blend_constants: [0.0; 4],
            handle: vk::Pipeline::null(),
        }
    }

    pub fn subpass(&self) -> u32 {
        self.subpass
    }

    /// Vertex attributes the program's vertex stage reads, taken from the mesh format.
    pub fn vertex_attributes(&self) -> Result<Vec<vk::VertexInputAttributeDescription>> {
        let locations = self.program.vertex_input_locations();
        let attributes = self.mesh_format.attributes_for_locations(locations);
        if let Some(missing) = locations
            .iter()
            .find(|&&l| !attributes.iter().any(|a| a.location == l))
        {
            return Err(GpuError::InvalidArgument(format!(
                "mesh format has no attribute for vertex input location {missing}"
            )));
        }
        Ok(attributes)
    }

    fn check_ready(&self) -> Result<()> {
        if self.handle != vk::Pipeline::null() {
            return Err(GpuError::AlreadyFinalized("GraphicsPipeline"));
        }
        if !self.program.is_finalized() {
            return Err(GpuError::NotInitialized("ShaderProgram"));
        }
        if self.program.active_stages().contains(vk::ShaderStageFlags::COMPUTE) {
            return Err(GpuError::InvalidStageCombination(self.program.active_stages()));
        }
        if self.render_pass.handle() == vk::RenderPass::null() {
            return Err(GpuError::NotInitialized("RenderPass"));
        }
        if self.subpass >= self.render_pass.subpass_count() {
            return Err(GpuError::InvalidArgument(format!(
                "subpass {} out of range for a pass with {} subpasses",
                self.subpass,
                self.render_pass.subpass_count()
            )));
        }
        Ok(())
    }

    /// Create the pipeline from the current state.
    pub fn finalize(&mut self, device: &Device) -> Result<()> {
        self.check_ready()?;

        let stages = self.program.stage_create_infos();

        // Vertex input
        let attributes = self.vertex_attributes()?;
        let vertex_input = self.mesh_format.vertex_input_state(&attributes);

        // Viewport
        let mut viewport_state = vk::PipelineViewportStateCreateInfo::default();
        if self.dynamic_states.contains(&vk::DynamicState::VIEWPORT) || self.viewports.is_empty() {
            viewport_state = viewport_state.viewport_count(1);
        } else {
            viewport_state = viewport_state.viewports(&self.viewports);
        }
        if self.dynamic_states.contains(&vk::DynamicState::SCISSOR) || self.scissors.is_empty() {
            viewport_state = viewport_state.scissor_count(1);
        } else {
            viewport_state = viewport_state.scissors(&self.scissors);
        }

        // Color blending
        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&self.color_blend_attachments)
            .blend_constants(self.blend_constants);

        // Dynamic state
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&self.dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&self.input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&self.rasterization)
            .multisample_state(&self.multisample)
            .depth_stencil_state(&self.depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(self.program.pipeline_layout())
            .render_pass(self.render_pass.handle())
            .subpass(self.subpass);

        let pipelines = unsafe {
            device.logical().create_graphics_pipelines(
                device.pipeline_cache(),
                std::slice::from_ref(&pipeline_info),
                None,
            )
        }
        .map_err(|(_pipelines, e)| GpuError::PipelineCreation(e.to_string()))?;
        self.handle = pipelines
            .into_iter()
            .next()
            .ok_or_else(|| GpuError::PipelineCreation("no pipeline returned".into()))?;
        debug!(
            "created graphics pipeline for subpass {} with {} stages",
            self.subpass,
            stages.len()
        );
        Ok(())
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.handle
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.program.pipeline_layout()
    }

    /// Destroy the pipeline.
    ///
    /// # Safety
    /// The pipeline must not be in use.
    pub unsafe fn destroy(&mut self, device: &Device) {
        if self.handle != vk::Pipeline::null() {
            unsafe { device.logical().destroy_pipeline(self.handle, None) };
            self.handle = vk::Pipeline::null();
        }
    }
}

/// Compute pipeline for a program holding exactly one compute stage.
#[derive(Debug)]
pub struct ComputePipeline<'a> {
    program: &'a ShaderProgram,
    handle: vk::Pipeline,
}

impl<'a> ComputePipeline<'a> {
    pub fn new(program: &'a ShaderProgram) -> Self {
        Self {
            program,
            handle: vk::Pipeline::null(),
        }
    }

    fn check_ready(&self) -> Result<()> {
        if self.handle != vk::Pipeline::null() {
            return Err(GpuError::AlreadyFinalized("ComputePipeline"));
        }
        if self.program.active_stages() != vk::ShaderStageFlags::COMPUTE {
            return Err(GpuError::InvalidStageCombination(self.program.active_stages()));
        }
        if !self.program.is_finalized() {
            return Err(GpuError::NotInitialized("ShaderProgram"));
        }
        Ok(())
    }

    pub fn finalize(&mut self, device: &Device) -> Result<()> {
        self.check_ready()?;
        let stages = self.program.stage_create_infos();
        let [stage] = stages.as_slice() else {
            return Err(GpuError::InvalidStageCombination(self.program.active_stages()));
        };

        let pipeline_info = vk::ComputePipelineCreateInfo::default()
            .stage(*stage)
            .layout(self.program.pipeline_layout());

        let pipelines = unsafe {
            device.logical().create_compute_pipelines(
                device.pipeline_cache(),
                std::slice::from_ref(&pipeline_info),
                None,
            )
        }
        .map_err(|(_pipelines, e)| GpuError::PipelineCreation(e.to_string()))?;
        self.handle = pipelines
            .into_iter()
            .next()
            .ok_or_else(|| GpuError::PipelineCreation("no pipeline returned".into()))?;
        Ok(())
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.handle
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.program.pipeline_layout()
    }

    /// Destroy the pipeline.
    ///
    /// # Safety
    /// The pipeline must not be in use.
    pub unsafe fn destroy(&mut self, device: &Device) {
        if self.handle != vk::Pipeline::null() {
            unsafe { device.logical().destroy_pipeline(self.handle, None) };
            self.handle = vk::Pipeline::null();
        }
    }
}
