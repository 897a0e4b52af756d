//! Descriptor pool sizing and batched descriptor set updates.

use crate::device::Device;
use crate::error::{GpuError, Result};
use crate::program::ShaderProgram;
use ash::vk;
use tracing::warn;

/// Descriptor pool sized by accumulating the layouts it will serve.
#[derive(Debug, Default)]
pub struct DescriptorPool {
    pool: vk::DescriptorPool,
    flags: vk::DescriptorPoolCreateFlags,
    type_counts: Vec<(vk::DescriptorType, u32)>,
    max_sets: u32,
}

impl DescriptorPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve room for `count` sets with the given layout bindings.
    pub fn add(&mut self, bindings: &[vk::DescriptorSetLayoutBinding<'_>], count: u32) {
        for binding in bindings {
            let total = binding.descriptor_count * count;
            match self
                .type_counts
                .iter_mut()
                .find(|(ty, _)| *ty == binding.descriptor_type)
            {
                Some((_, n)) => *n += total,
                None => self.type_counts.push((binding.descriptor_type, total)),
            }
        }
        self.max_sets += count;
    }

    /// Reserve room for `count` copies of every descriptor set in `program`.
    pub fn add_program(&mut self, program: &ShaderProgram, count: u32) {
        for info in program.dset_layout_infos() {
            self.add(&info.layout_bindings(), count);
        }
    }

    /// Pool sizes in first-seen order. Types that accumulated zero descriptors are omitted.
    pub fn pool_sizes(&self) -> Vec<vk::DescriptorPoolSize> {
        self.type_counts
            .iter()
            .filter(|(_, n)| *n > 0)
            .map(|&(ty, n)| {
                vk::DescriptorPoolSize::default()
                    .ty(ty)
                    .descriptor_count(n)
            })
            .collect()
    }

    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }

    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    /// Create the pool from the accumulated sizes.
    pub fn finalize(&mut self, device: &Device, flags: vk::DescriptorPoolCreateFlags) -> Result<()> {
        if self.pool != vk::DescriptorPool::null() {
            return Err(GpuError::AlreadyFinalized("DescriptorPool"));
        }
        let sizes = self.pool_sizes();
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .flags(flags)
            .max_sets(self.max_sets)
            .pool_sizes(&sizes);
        self.pool = unsafe { device.logical().create_descriptor_pool(&create_info, None) }?;
        self.flags = flags;
        Ok(())
    }

    /// Allocate one set per layout.
    pub fn allocate_sets(
        &self,
        device: &Device,
        layouts: &[vk::DescriptorSetLayout],
    ) -> Result<Vec<vk::DescriptorSet>> {
        if self.pool == vk::DescriptorPool::null() {
            return Err(GpuError::NotInitialized("DescriptorPool"));
        }
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);
        Ok(unsafe { device.logical().allocate_descriptor_sets(&alloc_info) }?)
    }

    pub fn allocate_set(
        &self,
        device: &Device,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet> {
        let sets = self.allocate_sets(device, std::slice::from_ref(&layout))?;
        sets.into_iter()
            .next()
            .ok_or(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_POOL_MEMORY))
    }

    /// Return sets to the pool. Only pools created with `FREE_DESCRIPTOR_SET` can free sets;
    /// for other pools this logs a warning and does nothing.
    pub fn free_sets(&self, device: &Device, sets: &[vk::DescriptorSet]) -> Result<()> {
        if !self
            .flags
            .contains(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
        {
            warn!("free_sets on a descriptor pool without FREE_DESCRIPTOR_SET is ignored");
            return Ok(());
        }
        unsafe { device.logical().free_descriptor_sets(self.pool, sets) }?;
        Ok(())
    }

    /// Reset the pool, freeing all descriptor sets.
    ///
    /// # Safety
    /// No descriptor set from this pool may be in use.
    pub unsafe fn reset(&self, device: &Device) -> Result<()> {
        unsafe {
            device
                .logical()
                .reset_descriptor_pool(self.pool, vk::DescriptorPoolResetFlags::empty())
        }?;
        Ok(())
    }

    /// # Safety
    /// No descriptor set from this pool may be in use.
    pub unsafe fn destroy(&mut self, device: &Device) {
        if self.pool != vk::DescriptorPool::null() {
            unsafe { device.logical().destroy_descriptor_pool(self.pool, None) };
        }
        *self = Self::default();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DescriptorClass {
    Image,
    Buffer,
    TexelBuffer,
}

fn descriptor_class(ty: vk::DescriptorType) -> Option<DescriptorClass> {
    match ty {
        vk::DescriptorType::SAMPLER
        | vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        | vk::DescriptorType::SAMPLED_IMAGE
        | vk::DescriptorType::STORAGE_IMAGE
        | vk::DescriptorType::INPUT_ATTACHMENT => Some(DescriptorClass::Image),
        vk::DescriptorType::UNIFORM_BUFFER
        | vk::DescriptorType::STORAGE_BUFFER
        | vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
        | vk::DescriptorType::STORAGE_BUFFER_DYNAMIC => Some(DescriptorClass::Buffer),
        vk::DescriptorType::UNIFORM_TEXEL_BUFFER | vk::DescriptorType::STORAGE_TEXEL_BUFFER => {
            Some(DescriptorClass::TexelBuffer)
        }
        _ => None,
    }
}

#[derive(Clone, Copy, Debug)]
struct WriterEntry {
    binding: u32,
    descriptor_type: vk::DescriptorType,
    count: u32,
    class: DescriptorClass,
    /// First element in the class array.
    start: usize,
}

/// Collects descriptor contents for one set layout and writes them in a single update.
#[derive(Clone, Debug, Default)]
pub struct DescriptorSetWriter {
    entries: Vec<WriterEntry>,
    image_infos: Vec<vk::DescriptorImageInfo>,
    buffer_infos: Vec<vk::DescriptorBufferInfo>,
    texel_buffer_views: Vec<vk::BufferView>,
}

impl DescriptorSetWriter {
    pub fn new(bindings: &[vk::DescriptorSetLayoutBinding<'_>]) -> Result<Self> {
        let mut writer = Self::default();
        for b in bindings {
            let class = descriptor_class(b.descriptor_type).ok_or_else(|| {
                GpuError::InvalidArgument(format!(
                    "binding {} has unsupported descriptor type {:?}",
                    b.binding, b.descriptor_type
                ))
            })?;
            let count = b.descriptor_count as usize;
            let start = match class {
                DescriptorClass::Image => {
                    let start = writer.image_infos.len();
                    writer
                        .image_infos
                        .resize(start + count, vk::DescriptorImageInfo::default());
                    start
                }
                DescriptorClass::Buffer => {
                    let start = writer.buffer_infos.len();
                    writer
                        .buffer_infos
                        .resize(start + count, vk::DescriptorBufferInfo::default());
                    start
                }
                DescriptorClass::TexelBuffer => {
                    let start = writer.texel_buffer_views.len();
                    writer
                        .texel_buffer_views
                        .resize(start + count, vk::BufferView::null());
                    start
                }
            };
            writer.entries.push(WriterEntry {
                binding: b.binding,
                descriptor_type: b.descriptor_type,
                count: b.descriptor_count,
                class,
                start,
            });
        }
        Ok(writer)
    }

    fn slot(&self, binding: u32, element: u32, class: DescriptorClass) -> Result<usize> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.binding == binding)
            .ok_or_else(|| GpuError::InvalidArgument(format!("no binding {binding} in layout")))?;
        if entry.class != class {
            return Err(GpuError::InvalidArgument(format!(
                "binding {binding} is {:?}, not a {class:?} descriptor",
                entry.descriptor_type
            )));
        }
        if element >= entry.count {
            return Err(GpuError::InvalidArgument(format!(
                "element {element} out of range for binding {binding} with {} elements",
                entry.count
            )));
        }
        Ok(entry.start + element as usize)
    }

    pub fn bind_image(
        &mut self,
        binding: u32,
        element: u32,
        view: vk::ImageView,
        layout: vk::ImageLayout,
    ) -> Result<()> {
        let i = self.slot(binding, element, DescriptorClass::Image)?;
        self.image_infos[i].image_view = view;
        self.image_infos[i].image_layout = layout;
        Ok(())
    }

    pub fn bind_sampler(&mut self, binding: u32, element: u32, sampler: vk::Sampler) -> Result<()> {
        let i = self.slot(binding, element, DescriptorClass::Image)?;
        self.image_infos[i].sampler = sampler;
        Ok(())
    }

    pub fn bind_combined_image_sampler(
        &mut self,
        binding: u32,
        element: u32,
        view: vk::ImageView,
        layout: vk::ImageLayout,
        sampler: vk::Sampler,
    ) -> Result<()> {
        let i = self.slot(binding, element, DescriptorClass::Image)?;
        self.image_infos[i] = vk::DescriptorImageInfo::default()
            .sampler(sampler)
            .image_view(view)
            .image_layout(layout);
        Ok(())
    }

    /// Bind `range` bytes of `buffer` from `offset`. Use `vk::WHOLE_SIZE` for the rest of the buffer.
    pub fn bind_buffer(
        &mut self,
        binding: u32,
        element: u32,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) -> Result<()> {
        let i = self.slot(binding, element, DescriptorClass::Buffer)?;
        self.buffer_infos[i] = vk::DescriptorBufferInfo::default()
            .buffer(buffer)
            .offset(offset)
            .range(range);
        Ok(())
    }

    pub fn bind_texel_buffer(&mut self, binding: u32, element: u32, view: vk::BufferView) -> Result<()> {
        let i = self.slot(binding, element, DescriptorClass::TexelBuffer)?;
        self.texel_buffer_views[i] = view;
        Ok(())
    }

    fn write_for(&self, entry: &WriterEntry, dset: vk::DescriptorSet, first: u32, count: u32) -> vk::WriteDescriptorSet<'_> {
        let start = entry.start + first as usize;
        let end = start + count as usize;
        let write = vk::WriteDescriptorSet::default()
            .dst_set(dset)
            .dst_binding(entry.binding)
            .dst_array_element(first)
            .descriptor_type(entry.descriptor_type);
        match entry.class {
            DescriptorClass::Image => write.image_info(&self.image_infos[start..end]),
            DescriptorClass::Buffer => write.buffer_info(&self.buffer_infos[start..end]),
            DescriptorClass::TexelBuffer => {
                write.texel_buffer_view(&self.texel_buffer_views[start..end])
            }
        }
    }

    /// One write per binding, all targeting `dset`.
    pub fn writes(&self, dset: vk::DescriptorSet) -> Vec<vk::WriteDescriptorSet<'_>> {
        self.entries
            .iter()
            .filter(|e| e.count > 0)
            .map(|e| self.write_for(e, dset, 0, e.count))
            .collect()
    }

    /// Write every binding to `dset` in one update.
    pub fn write_all(&self, device: &Device, dset: vk::DescriptorSet) {
        let writes = self.writes(dset);
        unsafe { device.logical().update_descriptor_sets(&writes, &[]) };
    }

    /// Write a single array element of one binding.
    pub fn write_one(
        &self,
        device: &Device,
        dset: vk::DescriptorSet,
        binding: u32,
        element: u32,
    ) -> Result<()> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.binding == binding)
            .ok_or_else(|| GpuError::InvalidArgument(format!("no binding {binding} in layout")))?;
        if element >= entry.count {
            return Err(GpuError::InvalidArgument(format!(
                "element {element} out of range for binding {binding}"
            )));
        }
        let write = self.write_for(entry, dset, element, 1);
        unsafe { device.logical().update_descriptor_sets(&[write], &[]) };
        Ok(())
    }
}
