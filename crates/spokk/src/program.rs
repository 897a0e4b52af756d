//! Shader programs: several stages sharing one pipeline layout.

use crate::device::Device;
use crate::error::{GpuError, Result};
use crate::shader::{
    merge_push_constant_ranges, merge_set_layouts, override_binding_type, DescriptorSetLayoutInfo,
    Shader,
};
use ash::vk;
use std::ffi::CString;
use tracing::debug;

/// Stage sets a program may be finalized with.
pub const VALID_STAGE_COMBINATIONS: [vk::ShaderStageFlags; 5] = [
    vk::ShaderStageFlags::COMPUTE,
    vk::ShaderStageFlags::VERTEX,
    vk::ShaderStageFlags::from_raw(
        vk::ShaderStageFlags::VERTEX.as_raw() | vk::ShaderStageFlags::FRAGMENT.as_raw(),
    ),
    vk::ShaderStageFlags::from_raw(
        vk::ShaderStageFlags::VERTEX.as_raw() | vk::ShaderStageFlags::GEOMETRY.as_raw(),
    ),
    vk::ShaderStageFlags::from_raw(
        vk::ShaderStageFlags::VERTEX.as_raw()
            | vk::ShaderStageFlags::GEOMETRY.as_raw()
            | vk::ShaderStageFlags::FRAGMENT.as_raw(),
    ),
];

/// Fail unless `stages` is one of [`VALID_STAGE_COMBINATIONS`].
pub fn validate_stage_combination(stages: vk::ShaderStageFlags) -> Result<()> {
    if VALID_STAGE_COMBINATIONS.contains(&stages) {
        Ok(())
    } else {
        Err(GpuError::InvalidStageCombination(stages))
    }
}

#[derive(Debug)]
struct ProgramStage {
    stage: vk::ShaderStageFlags,
    module: vk::ShaderModule,
    entry_point: CString,
}

/// Shaders merged into one pipeline layout.
///
/// Shader modules are only referenced; the shaders may be destroyed once every
/// pipeline using the program has been created.
#[derive(Debug, Default)]
pub struct ShaderProgram {
    stages: Vec<ProgramStage>,
    dset_layout_infos: Vec<DescriptorSetLayoutInfo>,
    push_constant_range: vk::PushConstantRange,
    active_stages: vk::ShaderStageFlags,
    vertex_input_locations: Vec<u32>,
    dset_layouts: Vec<vk::DescriptorSetLayout>,
    pipeline_layout: vk::PipelineLayout,
}

impl ShaderProgram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finalized(&self) -> bool {
        self.pipeline_layout != vk::PipelineLayout::null()
    }

    /// Add a stage and merge its bindings and push constants into the program.
    ///
    /// The program is unchanged on error.
    pub fn add_shader(&mut self, shader: &Shader) -> Result<()> {
        if self.is_finalized() {
            return Err(GpuError::AlreadyFinalized("ShaderProgram"));
        }
        let stage = shader.stage();
        if stage.is_empty() {
            return Err(GpuError::NotInitialized("Shader"));
        }
        if self.active_stages.intersects(stage) {
            return Err(GpuError::InvalidStageCombination(self.active_stages | stage));
        }
        let entry_point = CString::new(shader.entry_point()).map_err(|_| {
            GpuError::InvalidArgument(format!(
                "entry point {:?} contains a NUL byte",
                shader.entry_point()
            ))
        })?;
        let merged = merge_set_layouts(&self.dset_layout_infos, shader.dset_layout_infos())?;

        self.dset_layout_infos = merged;
        self.push_constant_range =
            merge_push_constant_ranges(self.push_constant_range, shader.push_constant_range());
        self.active_stages |= stage;
        if stage == vk::ShaderStageFlags::VERTEX {
            self.vertex_input_locations = shader.input_locations().to_vec();
        }
        self.stages.push(ProgramStage {
            stage,
            module: shader.handle(),
            entry_point,
        });
        Ok(())
    }

    /// Switch a merged buffer binding between static and dynamic. Must precede finalize.
    pub fn override_descriptor_type(
        &mut self,
        set: u32,
        binding: u32,
        new_type: vk::DescriptorType,
    ) -> Result<()> {
        if self.is_finalized() {
            return Err(GpuError::AlreadyFinalized("ShaderProgram"));
        }
        override_binding_type(&mut self.dset_layout_infos, set, binding, new_type)
    }

    /// Make every program's layout identical: the union of all their bindings and
    /// push-constant ranges. Nothing changes on error.
    pub fn merge_layouts(programs: &mut [&mut Self]) -> Result<()> {
        let Some((first, rest)) = programs.split_first() else {
            return Ok(());
        };
        if programs.iter().any(|p| p.is_finalized()) {
            return Err(GpuError::AlreadyFinalized("ShaderProgram"));
        }
        let mut layouts = first.dset_layout_infos.clone();
        let mut range = first.push_constant_range;
        for program in rest {
            layouts = merge_set_layouts(&layouts, &program.dset_layout_infos)?;
            range = merge_push_constant_ranges(range, program.push_constant_range);
        }
        for program in programs.iter_mut() {
            program.dset_layout_infos.clone_from(&layouts);
            program.push_constant_range = range;
        }
        Ok(())
    }

    /// Merge layouts across `programs` so pipelines can share descriptor sets, then finalize each.
    pub fn force_compatible_layouts_and_finalize(
        device: &Device,
        programs: &mut [&mut Self],
    ) -> Result<()> {
        Self::merge_layouts(programs)?;
        for program in programs.iter_mut() {
            program.finalize(device)?;
        }
        Ok(())
    }

    /// Validate the stage set and create the descriptor-set and pipeline layouts.
    pub fn finalize(&mut self, device: &Device) -> Result<()> {
        if self.is_finalized() {
            return Err(GpuError::AlreadyFinalized("ShaderProgram"));
        }
        validate_stage_combination(self.active_stages)?;
        if self
            .stages
            .iter()
            .any(|s| s.module == vk::ShaderModule::null())
        {
            return Err(GpuError::NotInitialized("Shader module"));
        }

        let logical = device.logical();
        let mut dset_layouts = Vec::with_capacity(self.dset_layout_infos.len());
        let created = (|| -> Result<vk::PipelineLayout> {
            for info in &self.dset_layout_infos {
                let bindings = info.layout_bindings();
                let ci = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
                dset_layouts.push(unsafe { logical.create_descriptor_set_layout(&ci, None) }?);
            }
            let ranges = self.push_constant_ranges();
            let ci = vk::PipelineLayoutCreateInfo::default()
                .set_layouts(&dset_layouts)
                .push_constant_ranges(ranges);
            Ok(unsafe { logical.create_pipeline_layout(&ci, None) }?)
        })();

        match created {
            Ok(layout) => {
                self.pipeline_layout = layout;
                self.dset_layouts = dset_layouts;
                debug!(
                    "finalized {:?} program with {} descriptor sets",
                    self.active_stages,
                    self.dset_layouts.len()
                );
                Ok(())
            }
            Err(e) => {
                for layout in dset_layouts {
                    unsafe { logical.destroy_descriptor_set_layout(layout, None) };
                }
                Err(e)
            }
        }
    }

    /// Stage create infos for pipeline creation. Entry-point names borrow from the program.
    pub fn stage_create_infos(&self) -> Vec<vk::PipelineShaderStageCreateInfo<'_>> {
        self.stages
            .iter()
            .map(|s| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(s.stage)
                    .module(s.module)
                    .name(s.entry_point.as_c_str())
            })
            .collect()
    }

    pub fn active_stages(&self) -> vk::ShaderStageFlags {
        self.active_stages
    }

    /// Input locations read by the vertex stage, if any.
    pub fn vertex_input_locations(&self) -> &[u32] {
        &self.vertex_input_locations
    }

    pub fn dset_layout_infos(&self) -> &[DescriptorSetLayoutInfo] {
        &self.dset_layout_infos
    }

    /// The merged range, or nothing when no stage uses push constants.
    pub fn push_constant_ranges(&self) -> &[vk::PushConstantRange] {
        if self.push_constant_range.size == 0 {
            &[]
        } else {
            std::slice::from_ref(&self.push_constant_range)
        }
    }

    pub fn dset_layouts(&self) -> &[vk::DescriptorSetLayout] {
        &self.dset_layouts
    }

    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    /// Destroy the layouts and reset the program to empty.
    ///
    /// # Safety
    /// No pipeline or descriptor set created from the layouts may still be in use.
    pub unsafe fn destroy(&mut self, device: &Device) {
        let logical = device.logical();
        for &layout in &self.dset_layouts {
            unsafe { logical.destroy_descriptor_set_layout(layout, None) };
        }
        if self.pipeline_layout != vk::PipelineLayout::null() {
            unsafe { logical.destroy_pipeline_layout(self.pipeline_layout, None) };
        }
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spirv::tests::Asm;

    fn vertex_shader() -> Shader {
        let words = Asm::new()
            .entry(0)
            .base_types()
            .uniform_block(20, 22, "A", 0, 0)
            .finish();
        Shader::from_spirv(words).unwrap()
    }

    fn fragment_shader() -> Shader {
        let words = Asm::new()
            .entry(4)
            .base_types()
            .uniform_block(20, 22, "A", 0, 0)
            .sampled_image(40, 0, 1)
            .finish();
        Shader::from_spirv(words).unwrap()
    }

    #[test]
    fn merges_bindings_across_stages() {
        let mut program = ShaderProgram::new();
        program.add_shader(&vertex_shader()).unwrap();
        program.add_shader(&fragment_shader()).unwrap();

        assert_eq!(
            program.active_stages(),
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
        let set0 = &program.dset_layout_infos()[0];
        assert_eq!(set0.bindings.len(), 2);
        let ubo = set0.binding(0).unwrap();
        assert_eq!(ubo.descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(ubo.count, 1);
        assert_eq!(
            ubo.stage_flags,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
        let image = set0.binding(1).unwrap();
        assert_eq!(image.descriptor_type, vk::DescriptorType::SAMPLED_IMAGE);
        assert_eq!(image.count, 1);
        assert_eq!(image.stage_flags, vk::ShaderStageFlags::FRAGMENT);
        assert!(program.push_constant_ranges().is_empty());
    }

    #[test]
    fn rejects_duplicate_stage() {
        let mut program = ShaderProgram::new();
        program.add_shader(&vertex_shader()).unwrap();
        assert!(matches!(
            program.add_shader(&vertex_shader()),
            Err(GpuError::InvalidStageCombination(_))
        ));
        assert_eq!(program.stage_create_infos().len(), 1);
    }

    #[test]
    fn stage_combinations() {
        use vk::ShaderStageFlags as S;
        for ok in [
            S::COMPUTE,
            S::VERTEX,
            S::VERTEX | S::FRAGMENT,
            S::VERTEX | S::GEOMETRY,
            S::VERTEX | S::GEOMETRY | S::FRAGMENT,
        ] {
            assert!(validate_stage_combination(ok).is_ok(), "{ok:?}");
        }
        for bad in [
            S::FRAGMENT,
            S::COMPUTE | S::VERTEX,
            S::VERTEX | S::TESSELLATION_CONTROL | S::FRAGMENT,
            S::empty(),
        ] {
            assert!(validate_stage_combination(bad).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn compatible_layouts_are_broadcast() {
        let mut a = ShaderProgram::new();
        a.add_shader(&vertex_shader()).unwrap();
        let mut b = ShaderProgram::new();
        b.add_shader(&fragment_shader()).unwrap();
        ShaderProgram::merge_layouts(&mut [&mut a, &mut b]).unwrap();
        assert_eq!(a.dset_layout_infos(), b.dset_layout_infos());
        assert_eq!(a.dset_layout_infos()[0].bindings.len(), 2);
        assert_eq!(
            a.dset_layout_infos()[0].binding(0).unwrap().stage_flags,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
    }

    #[test]
    fn identical_shaders_give_identical_layouts() {
        let build = || {
            let mut p = ShaderProgram::new();
            p.add_shader(&vertex_shader()).unwrap();
            p.add_shader(&fragment_shader()).unwrap();
            p.dset_layout_infos().to_vec()
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn entry_points_outlive_program_moves() {
        let mut program = ShaderProgram::new();
        program.add_shader(&vertex_shader()).unwrap();
        let moved = Box::new(program);
        let infos = moved.stage_create_infos();
        let name = unsafe { std::ffi::CStr::from_ptr(infos[0].p_name) };
        assert_eq!(name.to_str().unwrap(), "main");
    }
}
