//! Shader modules and their reflected descriptor-set layouts.

use crate::device::Device;
use crate::error::{GpuError, Result};
use crate::spirv::{reflect, words_from_bytes, ReflectedModule};
use ash::vk;
use hashbrown::HashMap;
use std::path::Path;
use tracing::{debug, error};

/// One binding of a descriptor-set layout, merged across stages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DescriptorBindingInfo {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub stage_flags: vk::ShaderStageFlags,
    /// Name of the resource in each stage that declares it. Diagnostics only.
    pub stage_names: Vec<(vk::ShaderStageFlags, String)>,
}

impl DescriptorBindingInfo {
    pub fn layout_binding(&self) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(self.binding)
            .descriptor_type(self.descriptor_type)
            .descriptor_count(self.count)
            .stage_flags(self.stage_flags)
    }
}

/// Bindings of one descriptor set, in declaration order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DescriptorSetLayoutInfo {
    pub bindings: Vec<DescriptorBindingInfo>,
}

impl DescriptorSetLayoutInfo {
    pub fn binding(&self, binding: u32) -> Option<&DescriptorBindingInfo> {
        self.bindings.iter().find(|b| b.binding == binding)
    }

    fn binding_mut(&mut self, binding: u32) -> Option<&mut DescriptorBindingInfo> {
        self.bindings.iter_mut().find(|b| b.binding == binding)
    }

    /// Add `incoming`, or OR its stages into an existing binding with the same index.
    ///
    /// Type and array size of a shared binding must agree exactly.
    pub fn merge_binding(&mut self, set: u32, incoming: &DescriptorBindingInfo) -> Result<()> {
        let Some(existing) = self.binding_mut(incoming.binding) else {
            self.bindings.push(incoming.clone());
            return Ok(());
        };
        if existing.descriptor_type != incoming.descriptor_type {
            return Err(GpuError::DescriptorMismatch {
                set,
                binding: incoming.binding,
                reason: format!(
                    "type {:?} vs {:?}",
                    existing.descriptor_type, incoming.descriptor_type
                ),
            });
        }
        if existing.count != incoming.count {
            return Err(GpuError::DescriptorMismatch {
                set,
                binding: incoming.binding,
                reason: format!("array size {} vs {}", existing.count, incoming.count),
            });
        }
        existing.stage_flags |= incoming.stage_flags;
        existing.stage_names.extend(incoming.stage_names.iter().cloned());
        Ok(())
    }

    /// Layout bindings ready for `vkCreateDescriptorSetLayout`.
    pub fn layout_bindings(&self) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
        self.bindings
            .iter()
            .map(DescriptorBindingInfo::layout_binding)
            .collect()
    }
}

/// Merge `src` set layouts into a copy of `dst`, growing it with empty sets as needed.
///
/// `dst` is unchanged on error.
pub fn merge_set_layouts(
    dst: &[DescriptorSetLayoutInfo],
    src: &[DescriptorSetLayoutInfo],
) -> Result<Vec<DescriptorSetLayoutInfo>> {
    let mut merged = dst.to_vec();
    if src.len() > merged.len() {
        merged.resize(src.len(), DescriptorSetLayoutInfo::default());
    }
    for (set, layout) in src.iter().enumerate() {
        for binding in &layout.bindings {
            merged[set].merge_binding(set as u32, binding)?;
        }
    }
    Ok(merged)
}

/// Union of two push-constant ranges. A range of size 0 contributes nothing.
pub fn merge_push_constant_ranges(
    a: vk::PushConstantRange,
    b: vk::PushConstantRange,
) -> vk::PushConstantRange {
    if a.size == 0 {
        return b;
    }
    if b.size == 0 {
        return a;
    }
    let start = a.offset.min(b.offset);
    let end = (a.offset + a.size).max(b.offset + b.size);
    vk::PushConstantRange {
        stage_flags: a.stage_flags | b.stage_flags,
        offset: start,
        size: end - start,
    }
}

/// Switch a buffer binding between its static and dynamic descriptor type.
pub fn override_binding_type(
    layouts: &mut [DescriptorSetLayoutInfo],
    set: u32,
    binding: u32,
    new_type: vk::DescriptorType,
) -> Result<()> {
    use vk::DescriptorType as D;
    let info = layouts
        .get_mut(set as usize)
        .and_then(|l| l.binding_mut(binding))
        .ok_or_else(|| {
            GpuError::InvalidArgument(format!("set {set} binding {binding} does not exist"))
        })?;
    let allowed = matches!(
        (info.descriptor_type, new_type),
        (D::UNIFORM_BUFFER, D::UNIFORM_BUFFER_DYNAMIC)
            | (D::UNIFORM_BUFFER_DYNAMIC, D::UNIFORM_BUFFER)
            | (D::STORAGE_BUFFER, D::STORAGE_BUFFER_DYNAMIC)
            | (D::STORAGE_BUFFER_DYNAMIC, D::STORAGE_BUFFER)
    );
    if !allowed && info.descriptor_type != new_type {
        return Err(GpuError::InvalidDescriptorOverride {
            from: info.descriptor_type,
            to: new_type,
        });
    }
    info.descriptor_type = new_type;
    Ok(())
}

/// Location of a named resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DescriptorBindPoint {
    pub set: u32,
    pub binding: u32,
}

/// A SPIR-V shader, its reflected interface and (once created) its module.
#[derive(Debug, Default)]
pub struct Shader {
    handle: vk::ShaderModule,
    spirv: Vec<u32>,
    stage: vk::ShaderStageFlags,
    entry_point: String,
    dset_layout_infos: Vec<DescriptorSetLayoutInfo>,
    push_constant_range: vk::PushConstantRange,
    input_locations: Vec<u32>,
    bind_points: HashMap<String, DescriptorBindPoint>,
}

impl Shader {
    /// Reflect `spirv` without creating a module.
    pub fn from_spirv(spirv: Vec<u32>) -> Result<Self> {
        let ReflectedModule {
            stage,
            entry_point,
            bindings,
            push_constant,
            input_locations,
        } = reflect(&spirv)?;

        let mut dset_layout_infos: Vec<DescriptorSetLayoutInfo> = Vec::new();
        let mut bind_points = HashMap::new();
        for b in bindings {
            let set = b.set as usize;
            if set >= dset_layout_infos.len() {
                dset_layout_infos.resize(set + 1, DescriptorSetLayoutInfo::default());
            }
            let info = DescriptorBindingInfo {
                binding: b.binding,
                descriptor_type: b.descriptor_type,
                count: b.count,
                stage_flags: stage,
                stage_names: vec![(stage, b.name.clone())],
            };
            if dset_layout_infos[set].binding(b.binding).is_some() {
                error!("set {} binding {} declared twice in one shader", b.set, b.binding);
            }
            dset_layout_infos[set].merge_binding(b.set, &info)?;
            if !b.name.is_empty() {
                bind_points.insert(
                    b.name,
                    DescriptorBindPoint {
                        set: b.set,
                        binding: b.binding,
                    },
                );
            }
        }

        let push_constant_range = match push_constant {
            Some((offset, size)) => vk::PushConstantRange {
                stage_flags: stage,
                offset,
                size,
            },
            None => vk::PushConstantRange {
                stage_flags: stage,
                offset: 0,
                size: 0,
            },
        };
        debug!(
            "reflected {stage:?} shader '{entry_point}': {} sets, push constants {:?}",
            dset_layout_infos.len(),
            push_constant
        );

        Ok(Self {
            handle: vk::ShaderModule::null(),
            spirv,
            stage,
            entry_point,
            dset_layout_infos,
            push_constant_range,
            input_locations,
            bind_points,
        })
    }

    /// Reflect a SPIR-V binary held in bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_spirv(words_from_bytes(bytes)?)
    }

    /// Reflect a SPIR-V file and create its module.
    pub fn load(device: &Device, path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        let mut shader = Self::from_bytes(&bytes)?;
        shader.create_module(device)?;
        Ok(shader)
    }

    /// Reflect `spirv` and create its module.
    pub fn create(device: &Device, spirv: Vec<u32>) -> Result<Self> {
        let mut shader = Self::from_spirv(spirv)?;
        shader.create_module(device)?;
        Ok(shader)
    }

    /// Create the shader module from the retained SPIR-V.
    pub fn create_module(&mut self, device: &Device) -> Result<()> {
        if self.spirv.is_empty() {
            return Err(GpuError::NotInitialized("Shader SPIR-V"));
        }
        let ci = vk::ShaderModuleCreateInfo::default().code(&self.spirv);
        self.handle = unsafe { device.logical().create_shader_module(&ci, None) }?;
        Ok(())
    }

    /// Drop the SPIR-V words once the module exists.
    pub fn unload_spirv(&mut self) {
        self.spirv = Vec::new();
    }

    /// Switch a buffer binding between static and dynamic.
    pub fn override_descriptor_type(
        &mut self,
        set: u32,
        binding: u32,
        new_type: vk::DescriptorType,
    ) -> Result<()> {
        override_binding_type(&mut self.dset_layout_infos, set, binding, new_type)
    }

    /// Set and binding of the resource called `name`.
    pub fn descriptor_bind_point(&self, name: &str) -> Option<DescriptorBindPoint> {
        self.bind_points.get(name).copied()
    }

    pub fn handle(&self) -> vk::ShaderModule {
        self.handle
    }

    pub fn spirv(&self) -> &[u32] {
        &self.spirv
    }

    pub fn stage(&self) -> vk::ShaderStageFlags {
        self.stage
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn dset_layout_infos(&self) -> &[DescriptorSetLayoutInfo] {
        &self.dset_layout_infos
    }

    /// `size == 0` when the stage uses no push constants.
    pub fn push_constant_range(&self) -> vk::PushConstantRange {
        self.push_constant_range
    }

    /// Vertex input locations read by a vertex shader.
    pub fn input_locations(&self) -> &[u32] {
        &self.input_locations
    }

    /// Destroy the module and forget the reflection.
    ///
    /// # Safety
    /// No pipeline may be under construction from this module.
    pub unsafe fn destroy(&mut self, device: &Device) {
        if self.handle != vk::ShaderModule::null() {
            unsafe { device.logical().destroy_shader_module(self.handle, None) };
        }
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spirv::tests::Asm;

    fn binding(
        index: u32,
        ty: vk::DescriptorType,
        count: u32,
        stage: vk::ShaderStageFlags,
    ) -> DescriptorBindingInfo {
        DescriptorBindingInfo {
            binding: index,
            descriptor_type: ty,
            count,
            stage_flags: stage,
            stage_names: vec![(stage, format!("b{index}"))],
        }
    }

    #[test]
    fn shader_reflects_sets_and_names() {
        let words = Asm::new()
            .entry(4)
            .base_types()
            .uniform_block(20, 22, "A", 0, 0)
            .sampled_image(40, 2, 1)
            .finish();
        let shader = Shader::from_spirv(words).unwrap();
        assert_eq!(shader.stage(), vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(shader.dset_layout_infos().len(), 3);
        assert!(shader.dset_layout_infos()[1].bindings.is_empty());
        let sampled = shader.dset_layout_infos()[2].binding(1).unwrap();
        assert_eq!(sampled.descriptor_type, vk::DescriptorType::SAMPLED_IMAGE);
        assert_eq!(sampled.stage_flags, vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(
            shader.descriptor_bind_point("A"),
            Some(DescriptorBindPoint { set: 0, binding: 0 })
        );
        assert_eq!(shader.push_constant_range().size, 0);
        assert_eq!(shader.handle(), vk::ShaderModule::null());
    }

    #[test]
    fn merge_ors_stage_flags() {
        let mut layout = DescriptorSetLayoutInfo::default();
        let ubo = vk::DescriptorType::UNIFORM_BUFFER;
        layout
            .merge_binding(0, &binding(0, ubo, 1, vk::ShaderStageFlags::VERTEX))
            .unwrap();
        layout
            .merge_binding(0, &binding(0, ubo, 1, vk::ShaderStageFlags::FRAGMENT))
            .unwrap();
        assert_eq!(layout.bindings.len(), 1);
        assert_eq!(
            layout.bindings[0].stage_flags,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
        assert_eq!(layout.bindings[0].stage_names.len(), 2);
    }

    #[test]
    fn merge_rejects_type_and_size_mismatch() {
        let mut layout = DescriptorSetLayoutInfo::default();
        let stage = vk::ShaderStageFlags::VERTEX;
        layout
            .merge_binding(1, &binding(3, vk::DescriptorType::UNIFORM_BUFFER, 1, stage))
            .unwrap();
        let err = layout
            .merge_binding(1, &binding(3, vk::DescriptorType::STORAGE_BUFFER, 1, stage))
            .unwrap_err();
        assert!(matches!(err, GpuError::DescriptorMismatch { set: 1, binding: 3, .. }));
        let err = layout
            .merge_binding(1, &binding(3, vk::DescriptorType::UNIFORM_BUFFER, 2, stage))
            .unwrap_err();
        assert!(matches!(err, GpuError::DescriptorMismatch { .. }));
    }

    #[test]
    fn set_merge_is_transactional() {
        let stage = vk::ShaderStageFlags::VERTEX;
        let dst = vec![DescriptorSetLayoutInfo {
            bindings: vec![binding(0, vk::DescriptorType::SAMPLER, 1, stage)],
        }];
        let src = vec![
            DescriptorSetLayoutInfo {
                bindings: vec![binding(0, vk::DescriptorType::SAMPLED_IMAGE, 1, stage)],
            },
            DescriptorSetLayoutInfo::default(),
        ];
        assert!(merge_set_layouts(&dst, &src).is_err());
        assert_eq!(dst.len(), 1);

        let merged = merge_set_layouts(&dst, &src[1..]).unwrap();
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn push_constant_union() {
        let a = vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX,
            offset: 16,
            size: 16,
        };
        let b = vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
            offset: 0,
            size: 8,
        };
        let none = vk::PushConstantRange::default();
        let merged = merge_push_constant_ranges(a, b);
        assert_eq!((merged.offset, merged.size), (0, 32));
        assert_eq!(
            merged.stage_flags,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
        assert_eq!(merge_push_constant_ranges(none, a).offset, 16);
        assert_eq!(merge_push_constant_ranges(a, none).size, 16);
    }

    #[test]
    fn override_only_toggles_dynamic_buffers() {
        let stage = vk::ShaderStageFlags::VERTEX;
        let mut layouts = vec![DescriptorSetLayoutInfo {
            bindings: vec![
                binding(0, vk::DescriptorType::UNIFORM_BUFFER, 1, stage),
                binding(1, vk::DescriptorType::SAMPLED_IMAGE, 1, stage),
            ],
        }];
        override_binding_type(&mut layouts, 0, 0, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
            .unwrap();
        assert_eq!(
            layouts[0].bindings[0].descriptor_type,
            vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
        );
        override_binding_type(&mut layouts, 0, 0, vk::DescriptorType::UNIFORM_BUFFER).unwrap();
        assert!(matches!(
            override_binding_type(&mut layouts, 0, 0, vk::DescriptorType::STORAGE_BUFFER_DYNAMIC),
            Err(GpuError::InvalidDescriptorOverride { .. })
        ));
        assert!(override_binding_type(
            &mut layouts,
            0,
            1,
            vk::DescriptorType::STORAGE_IMAGE
        )
        .is_err());
        assert!(override_binding_type(&mut layouts, 4, 0, vk::DescriptorType::UNIFORM_BUFFER)
            .is_err());
    }
}
