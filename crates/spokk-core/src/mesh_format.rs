//! Vertex buffer bindings, attributes and topology of a mesh.

use crate::vertex::location;
use ash::vk;

/// Describes how a mesh's vertex buffers feed the input assembler.
///
/// Used when converting vertex data at import time and when describing vertex
/// input to a graphics pipeline.
#[derive(Clone, Debug)]
pub struct MeshFormat {
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
    pub topology: vk::PrimitiveTopology,
    pub primitive_restart_enable: bool,
}

impl Default for MeshFormat {
    fn default() -> Self {
        Self {
            bindings: Vec::new(),
            attributes: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            primitive_restart_enable: false,
        }
    }
}

impl MeshFormat {
    /// Interleaved position/normal/texcoord layout written by the asset builder.
    ///
    /// `{POSITION R32G32B32_SFLOAT @ 0, NORMAL R32G32B32_SFLOAT @ 12, TEXCOORD0 R32G32_SFLOAT @ 24}`, stride 32.
    pub fn position_normal_texcoord() -> Self {
        Self {
            bindings: vec![vk::VertexInputBindingDescription {
                binding: 0,
                stride: 32,
                input_rate: vk::VertexInputRate::VERTEX,
            }],
            attributes: vec![
                vk::VertexInputAttributeDescription {
                    location: location::POSITION,
                    binding: 0,
                    format: vk::Format::R32G32B32_SFLOAT,
                    offset: 0,
                },
                vk::VertexInputAttributeDescription {
                    location: location::NORMAL,
                    binding: 0,
                    format: vk::Format::R32G32B32_SFLOAT,
                    offset: 12,
                },
                vk::VertexInputAttributeDescription {
                    location: location::TEXCOORD0,
                    binding: 0,
                    format: vk::Format::R32G32_SFLOAT,
                    offset: 24,
                },
            ],
            ..Self::default()
        }
    }

    /// Attributes whose location is consumed by a vertex shader.
    ///
    /// Pipelines only describe the attributes the shader reads; extra mesh data is ignored.
    pub fn attributes_for_locations(
        &self,
        locations: &[u32],
    ) -> Vec<vk::VertexInputAttributeDescription> {
        self.attributes
            .iter()
            .filter(|a| locations.contains(&a.location))
            .copied()
            .collect()
    }

    /// Input-assembly state for this topology.
    pub fn input_assembly_state(&self) -> vk::PipelineInputAssemblyStateCreateInfo<'static> {
        vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(self.topology)
            .primitive_restart_enable(self.primitive_restart_enable)
    }

    /// Vertex-input state borrowing this format's bindings and the given attributes.
    pub fn vertex_input_state<'a>(
        &'a self,
        attributes: &'a [vk::VertexInputAttributeDescription],
    ) -> vk::PipelineVertexInputStateCreateInfo<'a> {
        vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&self.bindings)
            .vertex_attribute_descriptions(attributes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_layout() {
        let fmt = MeshFormat::position_normal_texcoord();
        assert_eq!(fmt.bindings[0].stride, 32);
        assert_eq!(fmt.attributes.len(), 3);
        assert_eq!(fmt.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
    }

    #[test]
    fn filters_unused_attributes() {
        let fmt = MeshFormat::position_normal_texcoord();
        let used = fmt.attributes_for_locations(&[location::POSITION, location::TEXCOORD0]);
        assert_eq!(used.len(), 2);
        assert_eq!(used[1].offset, 24);
        let state = fmt.vertex_input_state(&used);
        assert_eq!(state.vertex_attribute_description_count, 2);
        assert_eq!(state.vertex_binding_description_count, 1);
    }
}
