//! Device memory: blocks, allocations and the pluggable allocator interface.

use crate::error::{GpuError, Result};
use ash::vk;
use gpu_allocator::vulkan as ga;
use gpu_allocator::MemoryLocation;
use hashbrown::HashMap;
use parking_lot::Mutex;
use spokk_core::format::align_to;
use std::ptr::NonNull;

/// How long an allocation is expected to live. Allocators may pool by scope.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AllocationScope {
    /// Transient, released within a few frames (staging buffers).
    Frame,
    /// Lives as long as the device.
    #[default]
    Device,
}

/// One `VkDeviceMemory` object.
///
/// Host-visible blocks are mapped once for their whole lifetime; `mapped` is
/// `Some` exactly when the memory type is host-visible.
#[derive(Clone, Copy, Debug, Default)]
pub struct MemoryBlock {
    handle: vk::DeviceMemory,
    size: u64,
    memory_type_index: u32,
    property_flags: vk::MemoryPropertyFlags,
    mapped: Option<NonNull<u8>>,
    non_coherent_atom_size: u64,
}

// The mapped pointer stays valid until the block is freed, and all writes through
// it go through `&mut` slices or raw copies owned by the caller.
unsafe impl Send for MemoryBlock {}
unsafe impl Sync for MemoryBlock {}

/// Expand `[offset, offset + size)` to whole non-coherent atoms.
///
/// Returns `(offset, size)` where `size` is `vk::WHOLE_SIZE` when the aligned end
/// would reach or pass the end of the block.
pub fn atom_aligned_range(offset: u64, size: u64, atom: u64, block_size: u64) -> (u64, u64) {
    let atom = atom.max(1);
    let start = offset - offset % atom;
    let end = align_to(offset.saturating_add(size), atom);
    if end >= block_size {
        (start, vk::WHOLE_SIZE)
    } else {
        (start, end - start)
    }
}

impl MemoryBlock {
    /// Describe an already allocated (and, if host-visible, mapped) memory object.
    ///
    /// # Safety
    /// `mapped` must point at offset 0 of `handle`'s mapping and stay valid until the block is freed.
    pub unsafe fn from_raw(
        handle: vk::DeviceMemory,
        size: u64,
        memory_type_index: u32,
        property_flags: vk::MemoryPropertyFlags,
        mapped: Option<NonNull<u8>>,
        non_coherent_atom_size: u64,
    ) -> Self {
        Self {
            handle,
            size,
            memory_type_index,
            property_flags,
            mapped,
            non_coherent_atom_size,
        }
    }

    pub fn handle(&self) -> vk::DeviceMemory {
        self.handle
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn memory_type_index(&self) -> u32 {
        self.memory_type_index
    }

    pub fn property_flags(&self) -> vk::MemoryPropertyFlags {
        self.property_flags
    }

    /// Base of the persistent mapping, if host-visible.
    pub fn mapped(&self) -> Option<NonNull<u8>> {
        self.mapped
    }

    pub fn is_null(&self) -> bool {
        self.handle == vk::DeviceMemory::null()
    }

    fn needs_cache_maintenance(&self) -> bool {
        self.mapped.is_some()
            && !self
                .property_flags
                .contains(vk::MemoryPropertyFlags::HOST_COHERENT)
    }

    fn range(&self, offset: u64, size: u64) -> vk::MappedMemoryRange<'static> {
        let (offset, size) =
            atom_aligned_range(offset, size, self.non_coherent_atom_size, self.size);
        vk::MappedMemoryRange::default()
            .memory(self.handle)
            .offset(offset)
            .size(size)
    }

    /// Make device writes in `[offset, offset + size)` visible to the host.
    /// No-op for unmapped or host-coherent memory.
    ///
    /// # Safety
    /// The device must be the one that owns this block.
    pub unsafe fn invalidate(&self, device: &ash::Device, offset: u64, size: u64) -> Result<()> {
        if self.needs_cache_maintenance() {
            unsafe { device.invalidate_mapped_memory_ranges(&[self.range(offset, size)]) }?;
        }
        Ok(())
    }

    /// Make host writes in `[offset, offset + size)` visible to the device.
    /// No-op for unmapped or host-coherent memory.
    ///
    /// # Safety
    /// The device must be the one that owns this block.
    pub unsafe fn flush(&self, device: &ash::Device, offset: u64, size: u64) -> Result<()> {
        if self.needs_cache_maintenance() {
            unsafe { device.flush_mapped_memory_ranges(&[self.range(offset, size)]) }?;
        }
        Ok(())
    }
}

/// A range of a [`MemoryBlock`] owned by one buffer or image.
///
/// The default value is the zeroed allocation; freeing it is a no-op.
#[derive(Clone, Copy, Debug, Default)]
pub struct Allocation {
    pub block: MemoryBlock,
    pub offset: u64,
    pub size: u64,
    pub scope: AllocationScope,
    /// Opaque value owned by the allocator that produced this allocation.
    pub allocator_data: u64,
}

impl Allocation {
    pub fn is_null(&self) -> bool {
        self.block.is_null()
    }

    /// Host pointer to the first byte of this allocation, if mapped.
    pub fn mapped_ptr(&self) -> Option<NonNull<u8>> {
        self.block
            .mapped()
            .and_then(|base| NonNull::new(base.as_ptr().wrapping_add(self.offset as usize)))
    }

    /// Invalidate `[offset, offset + size)` relative to the allocation start.
    ///
    /// # Safety
    /// The device must be the one that owns this allocation.
    pub unsafe fn invalidate(&self, device: &ash::Device, offset: u64, size: u64) -> Result<()> {
        let size = size.min(self.size.saturating_sub(offset));
        unsafe { self.block.invalidate(device, self.offset + offset, size) }
    }

    /// Flush `[offset, offset + size)` relative to the allocation start.
    ///
    /// # Safety
    /// The device must be the one that owns this allocation.
    pub unsafe fn flush(&self, device: &ash::Device, offset: u64, size: u64) -> Result<()> {
        let size = size.min(self.size.saturating_sub(offset));
        unsafe { self.block.flush(device, self.offset + offset, size) }
    }
}

/// What an allocator is asked for.
#[derive(Clone, Copy, Debug)]
pub struct MemoryRequest<'a> {
    pub requirements: vk::MemoryRequirements,
    pub property_mask: vk::MemoryPropertyFlags,
    pub scope: AllocationScope,
    /// Buffers and linear images; lets suballocators respect buffer-image granularity.
    pub linear: bool,
    pub name: &'a str,
}

/// Device state an allocator may use. Allocators never see the resource handle
/// the memory is for.
#[derive(Clone, Copy)]
pub struct MemoryContext<'a> {
    pub device: &'a ash::Device,
    pub memory_properties: &'a vk::PhysicalDeviceMemoryProperties,
    pub non_coherent_atom_size: u64,
}

/// Pluggable device memory allocator.
pub trait DeviceAllocator: Send + Sync {
    /// Allocate memory satisfying `request`.
    fn allocate(&self, ctx: &MemoryContext<'_>, request: &MemoryRequest<'_>) -> Result<Allocation>;

    /// Release an allocation. Must accept the zeroed allocation.
    fn free(&self, ctx: &MemoryContext<'_>, allocation: &Allocation);
}

/// Lowest memory type allowed by `type_bits` whose flags contain `property_mask`.
pub fn find_memory_type_index(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    property_mask: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..memory_properties.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32)).find(|&i| {
        type_bits & (1 << i) != 0
            && memory_properties.memory_types[i as usize]
                .property_flags
                .contains(property_mask)
    })
}

/// Round size and alignment up to the non-coherent atom for host-visible,
/// non-coherent requests so flush/invalidate ranges never spill into a neighbor.
pub fn padded_requirements(
    requirements: vk::MemoryRequirements,
    property_mask: vk::MemoryPropertyFlags,
    non_coherent_atom_size: u64,
) -> vk::MemoryRequirements {
    if property_mask.contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
        && !property_mask.contains(vk::MemoryPropertyFlags::HOST_COHERENT)
    {
        vk::MemoryRequirements {
            size: align_to(requirements.size, non_coherent_atom_size),
            alignment: align_to(requirements.alignment, non_coherent_atom_size),
            memory_type_bits: requirements.memory_type_bits,
        }
    } else {
        requirements
    }
}

fn map_allocation_error(e: vk::Result) -> GpuError {
    match e {
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
            GpuError::OutOfDeviceMemory(e.to_string())
        }
        other => GpuError::Vulkan(other),
    }
}

/// Default allocator: one `VkDeviceMemory` per allocation, mapped if host-visible.
#[derive(Debug, Default)]
pub struct BlockAllocator;

impl DeviceAllocator for BlockAllocator {
    fn allocate(&self, ctx: &MemoryContext<'_>, request: &MemoryRequest<'_>) -> Result<Allocation> {
        let requirements = request.requirements;
        let memory_type_index = find_memory_type_index(
            ctx.memory_properties,
            requirements.memory_type_bits,
            request.property_mask,
        )
        .ok_or(GpuError::NoSuitableMemoryType {
            type_bits: requirements.memory_type_bits,
            properties: request.property_mask,
        })?;
        let property_flags =
            ctx.memory_properties.memory_types[memory_type_index as usize].property_flags;

        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);
        let handle = unsafe { ctx.device.allocate_memory(&alloc_info, None) }
            .map_err(map_allocation_error)?;

        let mapped = if property_flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            match unsafe {
                ctx.device
                    .map_memory(handle, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
            } {
                Ok(ptr) => NonNull::new(ptr.cast::<u8>()),
                Err(e) => {
                    unsafe { ctx.device.free_memory(handle, None) };
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        Ok(Allocation {
            block: MemoryBlock {
                handle,
                size: requirements.size,
                memory_type_index,
                property_flags,
                mapped,
                non_coherent_atom_size: ctx.non_coherent_atom_size,
            },
            offset: 0,
            size: requirements.size,
            scope: request.scope,
            allocator_data: 0,
        })
    }

    fn free(&self, ctx: &MemoryContext<'_>, allocation: &Allocation) {
        if allocation.is_null() {
            return;
        }
        unsafe {
            if allocation.block.mapped.is_some() {
                ctx.device.unmap_memory(allocation.block.handle);
            }
            ctx.device.free_memory(allocation.block.handle, None);
        }
    }
}

/// `gpu-allocator` location for a property mask.
pub fn memory_location_for(property_mask: vk::MemoryPropertyFlags) -> MemoryLocation {
    if property_mask.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
        if property_mask.contains(vk::MemoryPropertyFlags::HOST_CACHED) {
            MemoryLocation::GpuToCpu
        } else {
            MemoryLocation::CpuToGpu
        }
    } else {
        MemoryLocation::GpuOnly
    }
}

struct SuballocState {
    allocator: ga::Allocator,
    live: HashMap<u64, ga::Allocation>,
    next_id: u64,
}

/// Allocator that carves allocations out of large pooled blocks via `gpu-allocator`.
pub struct SuballocatingAllocator {
    state: Mutex<SuballocState>,
}

impl SuballocatingAllocator {
    /// Create a suballocator for `device`.
    pub fn new(
        instance: &ash::Instance,
        device: &ash::Device,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let allocator = ga::Allocator::new(&ga::AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: false,
            allocation_sizes: gpu_allocator::AllocationSizes::default(),
        })
        .map_err(|e| GpuError::OutOfDeviceMemory(e.to_string()))?;

        Ok(Self {
            state: Mutex::new(SuballocState {
                allocator,
                live: HashMap::new(),
                next_id: 1,
            }),
        })
    }
}

impl DeviceAllocator for SuballocatingAllocator {
    fn allocate(&self, ctx: &MemoryContext<'_>, request: &MemoryRequest<'_>) -> Result<Allocation> {
        let mut state = self.state.lock();
        let inner = state
            .allocator
            .allocate(&ga::AllocationCreateDesc {
                name: request.name,
                requirements: request.requirements,
                location: memory_location_for(request.property_mask),
                linear: request.linear,
                allocation_scheme: ga::AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| GpuError::OutOfDeviceMemory(e.to_string()))?;

        let property_flags = inner.memory_properties();
        if !property_flags.contains(request.property_mask) {
            let _ = state.allocator.free(inner);
            return Err(GpuError::NoSuitableMemoryType {
                type_bits: request.requirements.memory_type_bits,
                properties: request.property_mask,
            });
        }

        let offset = inner.offset();
        let size = inner.size();
        // gpu-allocator hands out a pointer to the suballocation; the block keeps the base.
        let mapped = inner
            .mapped_ptr()
            .and_then(|p| NonNull::new(p.as_ptr().cast::<u8>().wrapping_sub(offset as usize)));
        let memory_type_index = find_memory_type_index(
            ctx.memory_properties,
            request.requirements.memory_type_bits,
            property_flags,
        )
        .unwrap_or(0);

        let block = MemoryBlock {
            handle: unsafe { inner.memory() },
            // Pool block sizes are private to gpu-allocator; this is the known extent.
            size: offset + size,
            memory_type_index,
            property_flags,
            mapped,
            non_coherent_atom_size: ctx.non_coherent_atom_size,
        };

        let id = state.next_id;
        state.next_id += 1;
        state.live.insert(id, inner);

        Ok(Allocation {
            block,
            offset,
            size,
            scope: request.scope,
            allocator_data: id,
        })
    }

    fn free(&self, _ctx: &MemoryContext<'_>, allocation: &Allocation) {
        if allocation.is_null() {
            return;
        }
        let mut state = self.state.lock();
        if let Some(inner) = state.live.remove(&allocation.allocator_data) {
            if let Err(e) = state.allocator.free(inner) {
                tracing::error!("Failed to free suballocation: {e}");
            }
        } else {
            tracing::warn!(
                "Freeing unknown suballocation {}",
                allocation.allocator_data
            );
        }
    }
}

impl Drop for SuballocatingAllocator {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let leaked: Vec<ga::Allocation> = state.live.drain().map(|(_, a)| a).collect();
        if !leaked.is_empty() {
            tracing::warn!("{} device allocations still live at shutdown", leaked.len());
        }
        for allocation in leaked {
            let _ = state.allocator.free(allocation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (i, flags) in types.iter().enumerate() {
            props.memory_types[i].property_flags = *flags;
        }
        props
    }

    #[test]
    fn picks_lowest_matching_type() {
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT
                | vk::MemoryPropertyFlags::HOST_CACHED,
        ]);
        assert_eq!(
            find_memory_type_index(&props, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            Some(0)
        );
        assert_eq!(
            find_memory_type_index(&props, 0b111, vk::MemoryPropertyFlags::HOST_VISIBLE),
            Some(1)
        );
        // Type 1 excluded by the requirement bits.
        assert_eq!(
            find_memory_type_index(&props, 0b101, vk::MemoryPropertyFlags::HOST_VISIBLE),
            Some(2)
        );
        assert_eq!(
            find_memory_type_index(&props, 0b001, vk::MemoryPropertyFlags::HOST_VISIBLE),
            None
        );
    }

    #[test]
    fn pads_non_coherent_host_memory() {
        let req = vk::MemoryRequirements {
            size: 100,
            alignment: 16,
            memory_type_bits: 1,
        };
        let padded = padded_requirements(req, vk::MemoryPropertyFlags::HOST_VISIBLE, 64);
        assert_eq!((padded.size, padded.alignment), (128, 64));
        let coherent = padded_requirements(
            req,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            64,
        );
        assert_eq!(coherent.size, 100);
        let device_local = padded_requirements(req, vk::MemoryPropertyFlags::DEVICE_LOCAL, 64);
        assert_eq!(device_local.alignment, 16);
    }

    #[test]
    fn flush_ranges_cover_whole_atoms() {
        assert_eq!(atom_aligned_range(70, 10, 64, 1024), (64, 64));
        assert_eq!(atom_aligned_range(0, 64, 64, 1024), (0, 64));
        assert_eq!(atom_aligned_range(1000, 10, 64, 1024), (960, vk::WHOLE_SIZE));
    }

    #[test]
    fn zeroed_allocation_is_inert() {
        let alloc = Allocation::default();
        assert!(alloc.is_null());
        assert!(alloc.mapped_ptr().is_none());
        assert_eq!(alloc.scope, AllocationScope::Device);
    }

    #[test]
    fn location_from_mask() {
        assert_eq!(
            memory_location_for(vk::MemoryPropertyFlags::DEVICE_LOCAL),
            MemoryLocation::GpuOnly
        );
        assert_eq!(
            memory_location_for(vk::MemoryPropertyFlags::HOST_VISIBLE),
            MemoryLocation::CpuToGpu
        );
        assert_eq!(
            memory_location_for(
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_CACHED
            ),
            MemoryLocation::GpuToCpu
        );
    }
}
