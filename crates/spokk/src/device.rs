//! Vulkan instance, physical/logical device and queue management.

use crate::error::{GpuError, Result};
use crate::memory::{
    find_memory_type_index, padded_requirements, Allocation, AllocationScope, BlockAllocator,
    DeviceAllocator, MemoryContext, MemoryRequest, SuballocatingAllocator,
};
use ash::vk;
use std::ffi::{CStr, CString};
use std::mem::ManuallyDrop;

/// A queue retrieved from the logical device.
#[derive(Clone, Copy, Debug)]
pub struct DeviceQueue {
    pub handle: vk::Queue,
    pub family: u32,
    pub flags: vk::QueueFlags,
    pub priority: f32,
    /// Surface this queue can present to, or null.
    pub present_surface: vk::SurfaceKHR,
    pub min_image_transfer_granularity: vk::Extent3D,
}

/// Find a queue supporting `flags`. An exact flag match wins over a superset.
///
/// When `present_surface` is non-null, graphics queues must also present to it.
pub fn select_queue(
    queues: &[DeviceQueue],
    flags: vk::QueueFlags,
    present_surface: vk::SurfaceKHR,
) -> Option<&DeviceQueue> {
    let presents = |q: &DeviceQueue| {
        present_surface == vk::SurfaceKHR::null()
            || !flags.contains(vk::QueueFlags::GRAPHICS)
            || q.present_surface == present_surface
    };
    queues
        .iter()
        .find(|q| q.flags == flags && presents(q))
        .or_else(|| queues.iter().find(|q| q.flags.contains(flags) && presents(q)))
}

/// Logical device plus everything needed to allocate resources on it.
///
/// Immutable after creation. Objects created from a `Device` must be destroyed
/// before it is dropped.
pub struct Device {
    // Entry must be kept alive for the lifetime of the device
    #[allow(dead_code)]
    entry: ash::Entry,
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    device: ash::Device,
    queues: Vec<DeviceQueue>,
    pipeline_cache: vk::PipelineCache,
    allocator: ManuallyDrop<Box<dyn DeviceAllocator>>,
}

impl Device {
    /// Get the logical device.
    pub fn logical(&self) -> &ash::Device {
        &self.device
    }

    /// Get the Vulkan instance.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the physical device handle.
    pub fn physical(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    pub fn pipeline_cache(&self) -> vk::PipelineCache {
        self.pipeline_cache
    }

    pub fn queues(&self) -> &[DeviceQueue] {
        &self.queues
    }

    /// Find a queue supporting `flags`, preferring an exact match.
    pub fn find_queue(&self, flags: vk::QueueFlags) -> Result<&DeviceQueue> {
        select_queue(&self.queues, flags, vk::SurfaceKHR::null())
            .ok_or(GpuError::NoSuitableQueue(flags))
    }

    /// Lowest memory type allowed by `type_bits` with all of `property_mask`.
    pub fn find_memory_type_index(
        &self,
        type_bits: u32,
        property_mask: vk::MemoryPropertyFlags,
    ) -> Option<u32> {
        find_memory_type_index(&self.memory_properties, type_bits, property_mask)
    }

    /// Format features for `format`.
    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, format)
        }
    }

    /// True if images of `format` and `tiling` can be both blit source and destination.
    pub fn is_format_blittable(&self, format: vk::Format, tiling: vk::ImageTiling) -> bool {
        let props = self.format_properties(format);
        let features = if tiling == vk::ImageTiling::LINEAR {
            props.linear_tiling_features
        } else {
            props.optimal_tiling_features
        };
        features.contains(vk::FormatFeatureFlags::BLIT_SRC | vk::FormatFeatureFlags::BLIT_DST)
    }

    /// Memory state handed to the allocator.
    pub fn memory_context(&self) -> MemoryContext<'_> {
        MemoryContext {
            device: &self.device,
            memory_properties: &self.memory_properties,
            non_coherent_atom_size: self.properties.limits.non_coherent_atom_size,
        }
    }

    /// Allocate device memory through the installed allocator.
    pub fn device_alloc(
        &self,
        requirements: vk::MemoryRequirements,
        property_mask: vk::MemoryPropertyFlags,
        scope: AllocationScope,
        linear: bool,
        name: &str,
    ) -> Result<Allocation> {
        let ctx = self.memory_context();
        let request = MemoryRequest {
            requirements: padded_requirements(
                requirements,
                property_mask,
                ctx.non_coherent_atom_size,
            ),
            property_mask,
            scope,
            linear,
            name,
        };
        self.allocator.allocate(&ctx, &request)
    }

    /// Return an allocation to the allocator and zero it.
    pub fn device_free(&self, allocation: &mut Allocation) {
        if !allocation.is_null() {
            self.allocator.free(&self.memory_context(), allocation);
        }
        *allocation = Allocation::default();
    }

    /// Wait for device to be idle.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_pipeline_cache(self.pipeline_cache, None);

            // Pooled allocators free their blocks on drop and need the device for it.
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

/// Which allocator the device installs.
enum AllocatorChoice {
    Block,
    Suballocating,
    Custom(Box<dyn DeviceAllocator>),
}

/// Builder for creating a [`Device`].
pub struct DeviceBuilder {
    app_name: String,
    enable_validation: bool,
    allocator: AllocatorChoice,
    required_queue_flags: vk::QueueFlags,
}

impl Default for DeviceBuilder {
    fn default() -> Self {
        Self {
            app_name: "spokk".to_string(),
            enable_validation: cfg!(debug_assertions),
            allocator: AllocatorChoice::Block,
            required_queue_flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
        }
    }
}

impl DeviceBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Suballocate from pooled blocks with `gpu-allocator` instead of one block per allocation.
    pub fn suballocate(mut self, enable: bool) -> Self {
        self.allocator = if enable {
            AllocatorChoice::Suballocating
        } else {
            AllocatorChoice::Block
        };
        self
    }

    /// Install a custom device allocator.
    pub fn allocator(mut self, allocator: Box<dyn DeviceAllocator>) -> Self {
        self.allocator = AllocatorChoice::Custom(allocator);
        self
    }

    /// Queue capabilities the chosen physical device must offer.
    pub fn required_queue_flags(mut self, flags: vk::QueueFlags) -> Self {
        self.required_queue_flags = flags;
        self
    }

    /// Build the device.
    pub fn build(self) -> Result<Device> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| GpuError::Loading(e.to_string()))?;

        let instance = unsafe { create_instance(&entry, &self.app_name, self.enable_validation) }?;

        let physical_device =
            match unsafe { select_physical_device(&instance, self.required_queue_flags) } {
                Ok(pd) => pd,
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            };

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };
        let device_name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
        tracing::info!("Selected GPU: {}", device_name.to_string_lossy());

        let (device, queues) = match unsafe { create_device(&instance, physical_device) } {
            Ok(d) => d,
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        };

        let cache_ci = vk::PipelineCacheCreateInfo::default();
        let pipeline_cache = unsafe { device.create_pipeline_cache(&cache_ci, None) }
            .unwrap_or_else(|e| {
                tracing::warn!("Pipeline cache unavailable: {e}");
                vk::PipelineCache::null()
            });

        let allocator: Box<dyn DeviceAllocator> = match self.allocator {
            AllocatorChoice::Block => Box::new(BlockAllocator),
            AllocatorChoice::Custom(a) => a,
            AllocatorChoice::Suballocating => {
                match SuballocatingAllocator::new(&instance, &device, physical_device) {
                    Ok(a) => Box::new(a),
                    Err(e) => {
                        unsafe {
                            device.destroy_pipeline_cache(pipeline_cache, None);
                            device.destroy_device(None);
                            instance.destroy_instance(None);
                        }
                        return Err(e);
                    }
                }
            }
        };

        Ok(Device {
            entry,
            instance,
            physical_device,
            properties,
            memory_properties,
            device,
            queues,
            pipeline_cache,
            allocator: ManuallyDrop::new(allocator),
        })
    }
}

/// Validation layers to enable in debug builds.
fn validation_layers() -> Vec<&'static CStr> {
    vec![c"VK_LAYER_KHRONOS_validation"]
}

/// Create a Vulkan instance.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
unsafe fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    enable_validation: bool,
) -> Result<ash::Instance> {
    let app_name = CString::new(app_name)
        .map_err(|e| GpuError::InvalidArgument(format!("application name: {e}")))?;

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"spokk")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_1);

    let requested = if enable_validation {
        validation_layers()
    } else {
        vec![]
    };

    // Drop layers the loader doesn't know about rather than failing instance creation
    let available_layers = unsafe { entry.enumerate_instance_layer_properties() }?;
    let layers: Vec<&CStr> = requested
        .into_iter()
        .filter(|layer| {
            let found = available_layers
                .iter()
                .any(|props| props.layer_name_as_c_str().ok() == Some(*layer));
            if !found {
                tracing::warn!("Validation layer {} not available", layer.to_string_lossy());
            }
            found
        })
        .collect();
    let layer_names: Vec<*const std::ffi::c_char> = layers.iter().map(|l| l.as_ptr()).collect();

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_layer_names(&layer_names);

    let instance = unsafe { entry.create_instance(&create_info, None) }?;
    Ok(instance)
}

/// Select the best physical device with a queue family covering `required_flags`.
///
/// # Safety
/// The instance must be valid.
unsafe fn select_physical_device(
    instance: &ash::Instance,
    required_flags: vk::QueueFlags,
) -> Result<vk::PhysicalDevice> {
    let devices = unsafe { instance.enumerate_physical_devices() }?;

    devices
        .into_iter()
        .filter(|&pd| {
            let families = unsafe { instance.get_physical_device_queue_family_properties(pd) };
            families
                .iter()
                .any(|f| f.queue_count > 0 && f.queue_flags.contains(required_flags))
        })
        .max_by_key(|&pd| {
            let properties = unsafe { instance.get_physical_device_properties(pd) };
            match properties.device_type {
                vk::PhysicalDeviceType::DISCRETE_GPU => 3,
                vk::PhysicalDeviceType::INTEGRATED_GPU => 2,
                vk::PhysicalDeviceType::VIRTUAL_GPU => 1,
                _ => 0,
            }
        })
        .ok_or(GpuError::NoSuitableDevice)
}

/// Create the logical device with one queue from every queue family.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<(ash::Device, Vec<DeviceQueue>)> {
    let families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    let queue_priority = [1.0_f32];
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = families
        .iter()
        .enumerate()
        .filter(|(_, f)| f.queue_count > 0)
        .map(|(i, _)| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(i as u32)
                .queue_priorities(&queue_priority)
        })
        .collect();

    let supported = unsafe { instance.get_physical_device_features(physical_device) };
    let features = vk::PhysicalDeviceFeatures::default()
        .sampler_anisotropy(supported.sampler_anisotropy == vk::TRUE)
        .texture_compression_bc(supported.texture_compression_bc == vk::TRUE)
        .texture_compression_etc2(supported.texture_compression_etc2 == vk::TRUE)
        .texture_compression_astc_ldr(supported.texture_compression_astc_ldr == vk::TRUE)
        .geometry_shader(supported.geometry_shader == vk::TRUE);

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_features(&features);

    let device = unsafe { instance.create_device(physical_device, &device_create_info, None) }?;

    let queues = queue_create_infos
        .iter()
        .map(|ci| {
            let family = ci.queue_family_index;
            let props = &families[family as usize];
            DeviceQueue {
                handle: unsafe { device.get_device_queue(family, 0) },
                family,
                flags: props.queue_flags,
                priority: queue_priority[0],
                present_surface: vk::SurfaceKHR::null(),
                min_image_transfer_granularity: props.min_image_transfer_granularity,
            }
        })
        .collect();

    Ok((device, queues))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn queue(family: u32, flags: vk::QueueFlags) -> DeviceQueue {
        DeviceQueue {
            handle: vk::Queue::null(),
            family,
            flags,
            priority: 1.0,
            present_surface: vk::SurfaceKHR::null(),
            min_image_transfer_granularity: vk::Extent3D {
                width: 1,
                height: 1,
                depth: 1,
            },
        }
    }

    #[test]
    fn exact_queue_match_wins() {
        let all = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER;
        let queues = [
            queue(0, all),
            queue(1, vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            queue(2, vk::QueueFlags::TRANSFER),
        ];
        let null = vk::SurfaceKHR::null();
        assert_eq!(select_queue(&queues, vk::QueueFlags::TRANSFER, null).unwrap().family, 2);
        assert_eq!(select_queue(&queues, vk::QueueFlags::COMPUTE, null).unwrap().family, 1);
        assert_eq!(select_queue(&queues, vk::QueueFlags::GRAPHICS, null).unwrap().family, 0);
        assert!(select_queue(&queues[1..], vk::QueueFlags::GRAPHICS, null).is_none());
    }

    #[test]
    fn graphics_queue_must_present_to_surface() {
        let surface = vk::SurfaceKHR::from_raw(0x1234);
        let mut presenting = queue(1, vk::QueueFlags::GRAPHICS);
        presenting.present_surface = surface;
        let queues = [queue(0, vk::QueueFlags::GRAPHICS), presenting];
        assert_eq!(
            select_queue(&queues, vk::QueueFlags::GRAPHICS, surface)
                .unwrap()
                .family,
            1
        );
    }
}
