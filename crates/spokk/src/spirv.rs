//! SPIR-V reflection: entry stage, descriptor bindings, push constants and
//! vertex input locations, read through `spirq`.

use crate::error::{GpuError, Result};
use ash::vk;
use spirq::constant::ConstantValue;
use spirq::entry_point::{EntryPoint, ExecutionModel};
use spirq::parse::Instr;
use spirq::reflect::ReflectIntermediate;
use spirq::spirv::Op;
use spirq::ty::{DescriptorType, ScalarType, StorageClass, StructType, Type, VectorType};
use spirq::var::Variable;
use spirq::ReflectConfig;
use tracing::{debug, warn};

/// First word of every SPIR-V module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

const HEADER_WORDS: usize = 5;

/// One descriptor binding declared by a module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReflectedBinding {
    pub set: u32,
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    /// Number of descriptors at the binding; 1 for scalars and runtime arrays.
    pub count: u32,
    pub name: String,
}

/// Everything the loader needs to know about a module's interface.
#[derive(Clone, Debug)]
pub struct ReflectedModule {
    pub stage: vk::ShaderStageFlags,
    pub entry_point: String,
    pub bindings: Vec<ReflectedBinding>,
    /// `(offset, size)` spanning the push-constant members the module reads,
    /// if it has a push-constant block.
    pub push_constant: Option<(u32, u32)>,
    /// Locations consumed by non-builtin vertex inputs, sorted. Matrices and
    /// arrays occupy one location per column or element.
    pub input_locations: Vec<u32>,
}

/// Reinterpret a byte buffer as SPIR-V words, swapping if the module is big-endian.
pub fn words_from_bytes(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.len() % 4 != 0 || bytes.len() < HEADER_WORDS * 4 {
        return Err(GpuError::InvalidSpirv(format!(
            "byte length {} is not a whole module",
            bytes.len()
        )));
    }
    let mut words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    if words[0] == SPIRV_MAGIC.swap_bytes() {
        for w in &mut words {
            *w = w.swap_bytes();
        }
    }
    if words[0] != SPIRV_MAGIC {
        return Err(GpuError::InvalidSpirv("bad magic number".to_string()));
    }
    Ok(words)
}

/// Header, instruction framing and opcodes. `spirq` stops quietly at a
/// truncated instruction and panics on unknown opcodes.
fn check_framing(words: &[u32]) -> Result<()> {
    if words.len() < HEADER_WORDS || words[0] != SPIRV_MAGIC {
        return Err(GpuError::InvalidSpirv("bad magic number".to_string()));
    }
    let mut i = HEADER_WORDS;
    while i < words.len() {
        let word_count = (words[i] >> 16) as usize;
        let opcode = words[i] & 0xFFFF;
        if word_count == 0 || i + word_count > words.len() {
            return Err(GpuError::InvalidSpirv(format!(
                "malformed instruction at word {i}"
            )));
        }
        if Op::from_u32(opcode).is_none() {
            return Err(GpuError::InvalidSpirv(format!(
                "unknown opcode {opcode} at word {i}"
            )));
        }
        i += word_count;
    }
    Ok(())
}

fn stage_for_execution_model(model: ExecutionModel) -> Result<vk::ShaderStageFlags> {
    Ok(match model {
        ExecutionModel::Vertex => vk::ShaderStageFlags::VERTEX,
        ExecutionModel::TessellationControl => vk::ShaderStageFlags::TESSELLATION_CONTROL,
        ExecutionModel::TessellationEvaluation => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
        ExecutionModel::Geometry => vk::ShaderStageFlags::GEOMETRY,
        ExecutionModel::Fragment => vk::ShaderStageFlags::FRAGMENT,
        ExecutionModel::GLCompute => vk::ShaderStageFlags::COMPUTE,
        other => {
            return Err(GpuError::InvalidSpirv(format!(
                "unsupported execution model {other:?}"
            )))
        }
    })
}

const fn descriptor_type(desc_ty: &DescriptorType) -> vk::DescriptorType {
    match desc_ty {
        DescriptorType::Sampler() => vk::DescriptorType::SAMPLER,
        DescriptorType::CombinedImageSampler() => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        DescriptorType::SampledImage() => vk::DescriptorType::SAMPLED_IMAGE,
        DescriptorType::StorageImage(_) => vk::DescriptorType::STORAGE_IMAGE,
        DescriptorType::UniformTexelBuffer() => vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
        DescriptorType::StorageTexelBuffer(_) => vk::DescriptorType::STORAGE_TEXEL_BUFFER,
        DescriptorType::UniformBuffer() => vk::DescriptorType::UNIFORM_BUFFER,
        DescriptorType::StorageBuffer(_) => vk::DescriptorType::STORAGE_BUFFER,
        DescriptorType::InputAttachment(_) => vk::DescriptorType::INPUT_ATTACHMENT,
        DescriptorType::AccelStruct() => vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
    }
}

/// Which members of the push-constant block the module's functions touch.
#[derive(Debug, Default)]
struct PushConstantAccess {
    members: Vec<usize>,
    whole_block: bool,
}

impl PushConstantAccess {
    fn inspect(&mut self, itm: &ReflectIntermediate<'_>, instr: &Instr) {
        let is_push_constant = |id: u32| {
            itm.var_reg
                .get(id)
                .is_ok_and(|var| var.store_cls == StorageClass::PushConstant)
        };
        match instr.op() {
            Op::AccessChain | Op::InBoundsAccessChain => {
                // result type, result id, base, indices...
                let mut operands = instr.operands().skip(2);
                let Some(base) = operands.next() else {
                    return;
                };
                if !is_push_constant(base) {
                    return;
                }
                let member = operands
                    .next()
                    .and_then(|id| itm.interp.get_value(id).ok())
                    .and_then(member_index);
                match member {
                    Some(index) => self.members.push(index),
                    None => self.whole_block = true,
                }
            }
            _ => {
                if instr.operands().any(is_push_constant) {
                    self.whole_block = true;
                }
            }
        }
    }

    /// `[min offset, max end)` of the accessed members, or of every member
    /// when the block is used as a whole or never indexed.
    fn span(&self, block: &StructType) -> Result<Option<(u32, u32)>> {
        let use_all = self.whole_block || self.members.is_empty();
        let mut start = u32::MAX;
        let mut end = 0_u32;
        for (index, member) in block.members.iter().enumerate() {
            if !use_all && !self.members.contains(&index) {
                continue;
            }
            let offset = member.offset.unwrap_or(0);
            let size = member.ty.nbyte().ok_or_else(|| {
                GpuError::InvalidSpirv(format!("push constant member {index} has no size"))
            })?;
            let member_end = u32::try_from(offset)
                .ok()
                .zip(u32::try_from(size).ok())
                .and_then(|(offset, size)| Some((offset, offset.checked_add(size)?)));
            let Some((offset, member_end)) = member_end else {
                return Err(GpuError::InvalidSpirv(format!(
                    "push constant member {index} at offset {offset} overflows"
                )));
            };
            start = start.min(offset);
            end = end.max(member_end);
        }
        Ok((end > start).then(|| (start, end - start)))
    }
}

fn member_index(value: &ConstantValue) -> Option<usize> {
    match *value {
        ConstantValue::S32(x) => usize::try_from(x).ok(),
        ConstantValue::U32(x) => usize::try_from(x).ok(),
        ConstantValue::S64(x) => usize::try_from(x).ok(),
        ConstantValue::U64(x) => usize::try_from(x).ok(),
        _ => None,
    }
}

const fn vector_locations(vector: &VectorType) -> u32 {
    match vector.scalar_ty {
        ScalarType::Float { bits: 64 } | ScalarType::Integer { bits: 64, .. }
            if vector.nscalar > 2 =>
        {
            2
        }
        _ => 1,
    }
}

/// Consecutive locations an input of type `ty` occupies.
fn location_count(ty: &Type) -> u32 {
    match ty {
        Type::Vector(vector) => vector_locations(vector),
        Type::Matrix(matrix) => matrix
            .nvector
            .saturating_mul(vector_locations(&matrix.vector_ty)),
        Type::Array(array) => array
            .nelement
            .unwrap_or(1)
            .saturating_mul(location_count(&array.element_ty)),
        _ => 1,
    }
}

fn choose_entry_point(mut entry_points: Vec<EntryPoint>) -> Result<EntryPoint> {
    if entry_points.len() > 1 {
        entry_points.sort_by(|a, b| (a.name != "main", &a.name).cmp(&(b.name != "main", &b.name)));
        warn!(
            "module has {} entry points, reflecting only '{}'",
            entry_points.len(),
            entry_points[0].name
        );
    }
    entry_points
        .into_iter()
        .next()
        .ok_or_else(|| GpuError::InvalidSpirv("module has no entry point".to_string()))
}

/// Reflect a SPIR-V module.
///
/// Fails on malformed modules, modules without an entry point and kernels.
pub fn reflect(words: &[u32]) -> Result<ReflectedModule> {
    check_framing(words)?;

    let mut push_constant_access = PushConstantAccess::default();
    let entry_points = ReflectConfig::new()
        .spv(words)
        .ref_all_rscs(true)
        .reflect_inspect_by(|itm, instr| push_constant_access.inspect(itm, instr))
        .map_err(|e| GpuError::InvalidSpirv(format!("{e:#}")))?;
    let entry_point = choose_entry_point(entry_points)?;
    let stage = stage_for_execution_model(entry_point.exec_model)?;

    let mut bindings = Vec::new();
    let mut push_constant = None;
    let mut input_locations = Vec::new();
    for var in &entry_point.vars {
        match var {
            Variable::Descriptor {
                name,
                desc_bind,
                desc_ty,
                ty,
                nbind,
            } => {
                let count = if *nbind == 0 {
                    warn!("binding {desc_bind} is a runtime-sized array, reflecting it as 1 descriptor");
                    1
                } else {
                    *nbind
                };
                // Blocks are usually named on the type rather than the variable.
                let name = match (name, ty) {
                    (Some(n), _) => n.clone(),
                    (None, Type::Struct(block)) => block.name().unwrap_or_default().to_string(),
                    (None, _) => String::new(),
                };
                bindings.push(ReflectedBinding {
                    set: desc_bind.set(),
                    binding: desc_bind.bind(),
                    descriptor_type: descriptor_type(desc_ty),
                    count,
                    name,
                });
            }
            Variable::PushConstant { ty, .. } => {
                let Type::Struct(block) = ty else {
                    return Err(GpuError::InvalidSpirv(
                        "push constant block is not a struct".to_string(),
                    ));
                };
                push_constant = push_constant_access.span(block)?;
            }
            Variable::Input { location, ty, .. } if stage == vk::ShaderStageFlags::VERTEX => {
                for i in 0..location_count(ty) {
                    let loc = location.loc().checked_add(i).ok_or_else(|| {
                        GpuError::InvalidSpirv(format!("input location {location} overflows"))
                    })?;
                    input_locations.push(loc);
                }
            }
            other => debug!("not reflecting {other:?}"),
        }
    }
    bindings.sort_by_key(|b| (b.set, b.binding));
    input_locations.sort_unstable();
    input_locations.dedup();

    Ok(ReflectedModule {
        stage,
        entry_point: entry_point.name,
        bindings,
        push_constant,
        input_locations,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) mod op {
        pub const NAME: u32 = 5;
        pub const ENTRY_POINT: u32 = 15;
        pub const TYPE_VOID: u32 = 19;
        pub const TYPE_INT: u32 = 21;
        pub const TYPE_FLOAT: u32 = 22;
        pub const TYPE_VECTOR: u32 = 23;
        pub const TYPE_MATRIX: u32 = 24;
        pub const TYPE_IMAGE: u32 = 25;
        pub const TYPE_SAMPLER: u32 = 26;
        pub const TYPE_SAMPLED_IMAGE: u32 = 27;
        pub const TYPE_ARRAY: u32 = 28;
        pub const TYPE_RUNTIME_ARRAY: u32 = 29;
        pub const TYPE_STRUCT: u32 = 30;
        pub const TYPE_POINTER: u32 = 32;
        pub const TYPE_FUNCTION: u32 = 33;
        pub const CONSTANT: u32 = 43;
        pub const SPEC_CONSTANT: u32 = 50;
        pub const FUNCTION: u32 = 54;
        pub const FUNCTION_END: u32 = 56;
        pub const VARIABLE: u32 = 59;
        pub const LOAD: u32 = 61;
        pub const ACCESS_CHAIN: u32 = 65;
        pub const DECORATE: u32 = 71;
        pub const MEMBER_DECORATE: u32 = 72;
        pub const LABEL: u32 = 248;
        pub const RETURN: u32 = 253;
    }

    pub(crate) mod decoration {
        pub const SPEC_ID: u32 = 1;
        pub const BLOCK: u32 = 2;
        pub const BUFFER_BLOCK: u32 = 3;
        pub const MATRIX_STRIDE: u32 = 7;
        pub const BUILT_IN: u32 = 11;
        pub const LOCATION: u32 = 30;
        pub const BINDING: u32 = 33;
        pub const DESCRIPTOR_SET: u32 = 34;
        pub const OFFSET: u32 = 35;
    }

    pub(crate) mod storage {
        pub const UNIFORM_CONSTANT: u32 = 0;
        pub const INPUT: u32 = 1;
        pub const UNIFORM: u32 = 2;
        pub const PUSH_CONSTANT: u32 = 9;
        pub const STORAGE_BUFFER: u32 = 12;
    }

    const DIM_BUFFER: u32 = 5;
    const DIM_SUBPASS_DATA: u32 = 6;

    /// Hand assembler for test modules. Instructions may be emitted in any
    /// order; `finish` lays them out in module section order.
    #[derive(Default)]
    pub(crate) struct Asm {
        entry_points: Vec<u32>,
        debug: Vec<u32>,
        annotations: Vec<u32>,
        globals: Vec<u32>,
        functions: Vec<u32>,
    }

    fn string_words(s: &str) -> Vec<u32> {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        while bytes.len() % 4 != 0 {
            bytes.push(0);
        }
        bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    impl Asm {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn op(&mut self, opcode: u32, operands: &[u32]) -> &mut Self {
            let section = match opcode {
                op::ENTRY_POINT => &mut self.entry_points,
                op::NAME => &mut self.debug,
                op::DECORATE | op::MEMBER_DECORATE => &mut self.annotations,
                op::FUNCTION
                | op::FUNCTION_END
                | op::LABEL
                | op::RETURN
                | op::LOAD
                | op::ACCESS_CHAIN => &mut self.functions,
                _ => &mut self.globals,
            };
            section.push(((operands.len() as u32 + 1) << 16) | opcode);
            section.extend_from_slice(operands);
            self
        }

        pub(crate) fn op_str(&mut self, opcode: u32, before: &[u32], s: &str, after: &[u32]) -> &mut Self {
            let mut operands = before.to_vec();
            operands.extend(string_words(s));
            operands.extend_from_slice(after);
            self.op(opcode, &operands)
        }

        /// Entry point `main` for function %1.
        pub(crate) fn entry(&mut self, model: u32) -> &mut Self {
            self.op_str(op::ENTRY_POINT, &[model, 1], "main", &[])
        }

        pub(crate) fn name(&mut self, id: u32, s: &str) -> &mut Self {
            self.op_str(op::NAME, &[id], s, &[])
        }

        pub(crate) fn decorate(&mut self, id: u32, deco: u32, literal: &[u32]) -> &mut Self {
            let mut operands = vec![id, deco];
            operands.extend_from_slice(literal);
            self.op(op::DECORATE, &operands)
        }

        pub(crate) fn member_decorate(&mut self, id: u32, member: u32, deco: u32, literal: u32) -> &mut Self {
            self.op(op::MEMBER_DECORATE, &[id, member, deco, literal])
        }

        pub(crate) fn binding(&mut self, id: u32, set: u32, binding: u32) -> &mut Self {
            self.decorate(id, decoration::DESCRIPTOR_SET, &[set])
                .decorate(id, decoration::BINDING, &[binding])
        }

        /// `float` as %10, `vec4` as %11, `mat4` as %12, `uint 4` constant as %13.
        pub(crate) fn base_types(&mut self) -> &mut Self {
            self.op(op::TYPE_FLOAT, &[10, 32])
                .op(op::TYPE_VECTOR, &[11, 10, 4])
                .op(op::TYPE_MATRIX, &[12, 11, 4])
                .op(op::TYPE_INT, &[14, 32, 0])
                .op(op::CONSTANT, &[14, 13, 4])
        }

        /// Uniform block `name` (struct %sid, pointer %sid+1) bound as variable %vid.
        pub(crate) fn uniform_block(&mut self, sid: u32, vid: u32, name: &str, set: u32, binding: u32) -> &mut Self {
            self.name(sid, name)
                .decorate(sid, decoration::BLOCK, &[])
                .member_decorate(sid, 0, decoration::OFFSET, 0)
                .member_decorate(sid, 0, decoration::MATRIX_STRIDE, 16)
                .op(op::TYPE_STRUCT, &[sid, 12])
                .op(op::TYPE_POINTER, &[sid + 1, storage::UNIFORM, sid])
                .op(op::VARIABLE, &[sid + 1, vid, storage::UNIFORM])
                .binding(vid, set, binding)
        }

        /// Separate sampled 2D image (`texture2D`, %30) bound as variable %vid.
        pub(crate) fn sampled_image(&mut self, vid: u32, set: u32, binding: u32) -> &mut Self {
            self.op(op::TYPE_IMAGE, &[30, 10, 1, 0, 0, 0, 1, 0])
                .op(op::TYPE_POINTER, &[32, storage::UNIFORM_CONSTANT, 30])
                .op(op::VARIABLE, &[32, vid, storage::UNIFORM_CONSTANT])
                .binding(vid, set, binding)
        }

        /// `vec4` inputs (pointer %90) as `(variable, location)` pairs. Needs `base_types`.
        pub(crate) fn vertex_inputs(&mut self, inputs: &[(u32, u32)]) -> &mut Self {
            self.op(op::TYPE_POINTER, &[90, storage::INPUT, 11]);
            for &(vid, location) in inputs {
                self.op(op::VARIABLE, &[90, vid, storage::INPUT])
                    .decorate(vid, decoration::LOCATION, &[location]);
            }
            self
        }

        /// Function %1 with `body` between its label and return. Uses ids 2 to 4.
        pub(crate) fn main_function(&mut self, body: &[(u32, &[u32])]) -> &mut Self {
            self.op(op::TYPE_VOID, &[2])
                .op(op::TYPE_FUNCTION, &[3, 2])
                .op(op::FUNCTION, &[2, 1, 0, 3])
                .op(op::LABEL, &[4]);
            for &(opcode, operands) in body {
                self.op(opcode, operands);
            }
            self.op(op::RETURN, &[]).op(op::FUNCTION_END, &[])
        }

        pub(crate) fn finish(&self) -> Vec<u32> {
            let mut words = vec![SPIRV_MAGIC, 0x0001_0000, 0, 200, 0];
            for section in [
                &self.entry_points,
                &self.debug,
                &self.annotations,
                &self.globals,
                &self.functions,
            ] {
                words.extend_from_slice(section);
            }
            words
        }
    }

    /// Push-constant block %80 `{ mat4 @0; vec4 @64 }` as variable %82,
    /// `int 1` as %16 and a `vec4` push-constant pointer as %83.
    fn push_constant_block(asm: &mut Asm) -> &mut Asm {
        asm.decorate(80, decoration::BLOCK, &[])
            .member_decorate(80, 0, decoration::OFFSET, 0)
            .member_decorate(80, 0, decoration::MATRIX_STRIDE, 16)
            .member_decorate(80, 1, decoration::OFFSET, 64)
            .op(op::TYPE_STRUCT, &[80, 12, 11])
            .op(op::TYPE_POINTER, &[81, storage::PUSH_CONSTANT, 80])
            .op(op::VARIABLE, &[81, 82, storage::PUSH_CONSTANT])
            .op(op::TYPE_INT, &[15, 32, 1])
            .op(op::CONSTANT, &[15, 16, 1])
            .op(op::TYPE_POINTER, &[83, storage::PUSH_CONSTANT, 11])
    }

    #[test]
    fn reflects_uniform_block_and_stage() {
        let words = Asm::new()
            .entry(0)
            .base_types()
            .uniform_block(20, 22, "A", 0, 0)
            .finish();
        let module = reflect(&words).unwrap();
        assert_eq!(module.stage, vk::ShaderStageFlags::VERTEX);
        assert_eq!(module.entry_point, "main");
        assert_eq!(
            module.bindings,
            vec![ReflectedBinding {
                set: 0,
                binding: 0,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                count: 1,
                name: "A".to_string(),
            }]
        );
        assert!(module.push_constant.is_none());
    }

    #[test]
    fn reflects_image_classes_and_arrays() {
        let words = Asm::new()
            .entry(4)
            .base_types()
            // sampler2D[4] at set 1 binding 2
            .op(op::TYPE_IMAGE, &[30, 10, 1, 0, 0, 0, 1, 0])
            .op(op::TYPE_SAMPLED_IMAGE, &[31, 30])
            .op(op::TYPE_ARRAY, &[33, 31, 13])
            .op(op::TYPE_POINTER, &[34, storage::UNIFORM_CONSTANT, 33])
            .op(op::VARIABLE, &[34, 40, storage::UNIFORM_CONSTANT])
            .binding(40, 1, 2)
            .name(40, "textures")
            // samplerBuffer
            .op(op::TYPE_IMAGE, &[50, 10, DIM_BUFFER, 0, 0, 0, 1, 0])
            .op(op::TYPE_SAMPLED_IMAGE, &[51, 50])
            .op(op::TYPE_POINTER, &[52, storage::UNIFORM_CONSTANT, 51])
            .op(op::VARIABLE, &[52, 53, storage::UNIFORM_CONSTANT])
            .binding(53, 0, 1)
            // imageBuffer (storage)
            .op(op::TYPE_IMAGE, &[54, 10, DIM_BUFFER, 0, 0, 0, 2, 1])
            .op(op::TYPE_POINTER, &[55, storage::UNIFORM_CONSTANT, 54])
            .op(op::VARIABLE, &[55, 56, storage::UNIFORM_CONSTANT])
            .binding(56, 0, 2)
            // subpassInput
            .op(op::TYPE_IMAGE, &[57, 10, DIM_SUBPASS_DATA, 0, 0, 0, 2, 0])
            .op(op::TYPE_POINTER, &[58, storage::UNIFORM_CONSTANT, 57])
            .op(op::VARIABLE, &[58, 59, storage::UNIFORM_CONSTANT])
            .binding(59, 0, 3)
            // separate sampler
            .op(op::TYPE_SAMPLER, &[60])
            .op(op::TYPE_POINTER, &[61, storage::UNIFORM_CONSTANT, 60])
            .op(op::VARIABLE, &[61, 62, storage::UNIFORM_CONSTANT])
            .binding(62, 0, 4)
            // storage image2D
            .op(op::TYPE_IMAGE, &[63, 10, 1, 0, 0, 0, 2, 1])
            .op(op::TYPE_POINTER, &[64, storage::UNIFORM_CONSTANT, 63])
            .op(op::VARIABLE, &[64, 65, storage::UNIFORM_CONSTANT])
            .binding(65, 0, 5)
            .finish();
        let module = reflect(&words).unwrap();
        let types: Vec<_> = module
            .bindings
            .iter()
            .map(|b| (b.set, b.binding, b.descriptor_type, b.count))
            .collect();
        assert_eq!(
            types,
            vec![
                (0, 1, vk::DescriptorType::UNIFORM_TEXEL_BUFFER, 1),
                (0, 2, vk::DescriptorType::STORAGE_TEXEL_BUFFER, 1),
                (0, 3, vk::DescriptorType::INPUT_ATTACHMENT, 1),
                (0, 4, vk::DescriptorType::SAMPLER, 1),
                (0, 5, vk::DescriptorType::STORAGE_IMAGE, 1),
                (1, 2, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 4),
            ]
        );
        assert_eq!(module.bindings[5].name, "textures");
    }

    #[test]
    fn arrays_sized_by_specialization_constants() {
        // layout(constant_id = 0) const uint N = 4; uniform sampler2D tex[N];
        let words = Asm::new()
            .entry(4)
            .base_types()
            .decorate(70, decoration::SPEC_ID, &[0])
            .op(op::SPEC_CONSTANT, &[14, 70, 4])
            .op(op::TYPE_IMAGE, &[30, 10, 1, 0, 0, 0, 1, 0])
            .op(op::TYPE_SAMPLED_IMAGE, &[31, 30])
            .op(op::TYPE_ARRAY, &[33, 31, 70])
            .op(op::TYPE_POINTER, &[34, storage::UNIFORM_CONSTANT, 33])
            .op(op::VARIABLE, &[34, 40, storage::UNIFORM_CONSTANT])
            .binding(40, 0, 0)
            .finish();
        let module = reflect(&words).unwrap();
        assert_eq!(module.bindings.len(), 1);
        assert_eq!(
            module.bindings[0].descriptor_type,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
        assert_eq!(module.bindings[0].count, 4);
    }

    #[test]
    fn storage_buffers_from_either_encoding() {
        let words = Asm::new()
            .entry(5)
            .base_types()
            // SPIR-V 1.3+ StorageBuffer storage class
            .decorate(70, decoration::BLOCK, &[])
            .member_decorate(70, 0, decoration::OFFSET, 0)
            .op(op::TYPE_RUNTIME_ARRAY, &[69, 11])
            .op(op::TYPE_STRUCT, &[70, 69])
            .op(op::TYPE_POINTER, &[71, storage::STORAGE_BUFFER, 70])
            .op(op::VARIABLE, &[71, 72, storage::STORAGE_BUFFER])
            .binding(72, 0, 0)
            // legacy BufferBlock in Uniform storage
            .decorate(73, decoration::BUFFER_BLOCK, &[])
            .member_decorate(73, 0, decoration::OFFSET, 0)
            .op(op::TYPE_STRUCT, &[73, 11])
            .op(op::TYPE_POINTER, &[74, storage::UNIFORM, 73])
            .op(op::VARIABLE, &[74, 75, storage::UNIFORM])
            .binding(75, 0, 1)
            .finish();
        let module = reflect(&words).unwrap();
        assert_eq!(module.stage, vk::ShaderStageFlags::COMPUTE);
        assert!(module
            .bindings
            .iter()
            .all(|b| b.descriptor_type == vk::DescriptorType::STORAGE_BUFFER));
        assert_eq!(module.bindings.len(), 2);
    }

    #[test]
    fn push_constant_span_covers_members() {
        let words = Asm::new()
            .entry(4)
            .base_types()
            .decorate(80, decoration::BLOCK, &[])
            .member_decorate(80, 0, decoration::OFFSET, 16)
            .member_decorate(80, 1, decoration::OFFSET, 32)
            .op(op::TYPE_STRUCT, &[80, 11, 10])
            .op(op::TYPE_POINTER, &[81, storage::PUSH_CONSTANT, 80])
            .op(op::VARIABLE, &[81, 82, storage::PUSH_CONSTANT])
            .finish();
        let module = reflect(&words).unwrap();
        assert_eq!(module.push_constant, Some((16, 20)));
        assert!(module.bindings.is_empty());
    }

    #[test]
    fn push_constant_span_covers_only_accessed_members() {
        // Only `b` of `{ mat4 a; vec4 b; }` is read.
        let words = push_constant_block(Asm::new().entry(4).base_types())
            .main_function(&[
                (op::ACCESS_CHAIN, &[83, 5, 82, 16][..]),
                (op::LOAD, &[11, 6, 5][..]),
            ])
            .finish();
        assert_eq!(reflect(&words).unwrap().push_constant, Some((64, 16)));

        let words = push_constant_block(Asm::new().entry(4).base_types())
            .main_function(&[(op::LOAD, &[80, 6, 82][..])])
            .finish();
        assert_eq!(reflect(&words).unwrap().push_constant, Some((0, 80)));
    }

    #[test]
    fn push_constant_offset_overflow_is_an_error() {
        let words = Asm::new()
            .entry(4)
            .base_types()
            .decorate(80, decoration::BLOCK, &[])
            .member_decorate(80, 0, decoration::OFFSET, 0xFFFF_FFF0)
            .op(op::TYPE_STRUCT, &[80, 11])
            .op(op::TYPE_POINTER, &[81, storage::PUSH_CONSTANT, 80])
            .op(op::VARIABLE, &[81, 82, storage::PUSH_CONSTANT])
            .finish();
        assert!(matches!(reflect(&words), Err(GpuError::InvalidSpirv(_))));
    }

    #[test]
    fn vertex_inputs_skip_builtins() {
        let words = Asm::new()
            .entry(0)
            .base_types()
            .op(op::TYPE_POINTER, &[90, storage::INPUT, 11])
            .op(op::VARIABLE, &[90, 91, storage::INPUT])
            .decorate(91, decoration::LOCATION, &[10])
            .op(op::VARIABLE, &[90, 92, storage::INPUT])
            .decorate(92, decoration::LOCATION, &[0])
            .op(op::VARIABLE, &[90, 93, storage::INPUT])
            .decorate(93, decoration::BUILT_IN, &[42])
            .finish();
        assert_eq!(reflect(&words).unwrap().input_locations, vec![0, 10]);
    }

    #[test]
    fn matrix_and_array_inputs_take_several_locations() {
        let words = Asm::new()
            .entry(0)
            .base_types()
            .vertex_inputs(&[(91, 0)])
            // mat4 at location 4
            .op(op::TYPE_POINTER, &[95, storage::INPUT, 12])
            .op(op::VARIABLE, &[95, 96, storage::INPUT])
            .decorate(96, decoration::LOCATION, &[4])
            // vec4[4] at location 8
            .op(op::TYPE_ARRAY, &[97, 11, 13])
            .op(op::TYPE_POINTER, &[98, storage::INPUT, 97])
            .op(op::VARIABLE, &[98, 99, storage::INPUT])
            .decorate(99, decoration::LOCATION, &[8])
            .finish();
        assert_eq!(
            reflect(&words).unwrap().input_locations,
            vec![0, 4, 5, 6, 7, 8, 9, 10, 11]
        );
    }

    #[test]
    fn rejects_bad_modules() {
        assert!(matches!(
            reflect(&[0xDEAD_BEEF, 0, 0, 0, 0]),
            Err(GpuError::InvalidSpirv(_))
        ));
        assert!(reflect(&Asm::new().finish()).is_err());
        // kernel execution model
        assert!(reflect(&Asm::new().entry(6).finish()).is_err());
        let mut truncated = Asm::new().entry(0).finish();
        truncated.push((9 << 16) | op::NAME);
        assert!(reflect(&truncated).is_err());
        let mut unknown = Asm::new().entry(0).finish();
        unknown.push((1 << 16) | 0xFFFF);
        assert!(matches!(reflect(&unknown), Err(GpuError::InvalidSpirv(_))));
    }

    #[test]
    fn bytes_to_words_handles_endianness() {
        let words = Asm::new().entry(4).finish();
        let le: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        let be: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
        assert_eq!(words_from_bytes(&le).unwrap(), words);
        assert_eq!(words_from_bytes(&be).unwrap(), words);
        assert!(words_from_bytes(&le[..le.len() - 1]).is_err());
    }
}
