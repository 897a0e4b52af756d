//! One-shot command buffers for blocking setup work.

use crate::device::{Device, DeviceQueue};
use crate::error::Result;
use ash::vk;
use parking_lot::Mutex;

/// Transient command pool for short, blocking submissions (uploads, layout transitions).
///
/// Allocation and submission are serialized by an internal lock, so one pool can
/// be shared between threads.
pub struct OneShotCommandPool {
    pool: Mutex<vk::CommandPool>,
    queue: vk::Queue,
    queue_family: u32,
}

impl OneShotCommandPool {
    /// Create a pool submitting to `queue`.
    pub fn new(device: &Device, queue: &DeviceQueue) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue.family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let pool = unsafe { device.logical().create_command_pool(&create_info, None) }?;
        Ok(Self {
            pool: Mutex::new(pool),
            queue: queue.handle,
            queue_family: queue.family,
        })
    }

    /// Get the queue family index.
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Allocate a primary command buffer and begin recording with ONE_TIME_SUBMIT.
    pub fn allocate_and_begin(&self, device: &Device) -> Result<vk::CommandBuffer> {
        let pool = self.pool.lock();
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(*pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cb = unsafe { device.logical().allocate_command_buffers(&alloc_info) }?[0];

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        if let Err(e) = unsafe { device.logical().begin_command_buffer(cb, &begin_info) } {
            unsafe { device.logical().free_command_buffers(*pool, &[cb]) };
            return Err(e.into());
        }
        Ok(cb)
    }

    /// End `cb`, submit it, block until it completes, then free it.
    pub fn end_submit_and_free(&self, device: &Device, cb: vk::CommandBuffer) -> Result<()> {
        let pool = self.pool.lock();
        let logical = device.logical();
        let result = (|| -> Result<()> {
            unsafe {
                logical.end_command_buffer(cb)?;
                let fence = logical.create_fence(&vk::FenceCreateInfo::default(), None)?;
                let cbs = [cb];
                let submit = vk::SubmitInfo::default().command_buffers(&cbs);
                let submitted = logical
                    .queue_submit(self.queue, &[submit], fence)
                    .and_then(|()| logical.wait_for_fences(&[fence], true, u64::MAX));
                logical.destroy_fence(fence, None);
                submitted?;
            }
            Ok(())
        })();
        unsafe { logical.free_command_buffers(*pool, &[cb]) };
        result
    }

    /// End `cb` without submitting it and free it.
    pub fn end_abort_and_free(&self, device: &Device, cb: vk::CommandBuffer) {
        let pool = self.pool.lock();
        unsafe {
            let _ = device.logical().end_command_buffer(cb);
            device.logical().free_command_buffers(*pool, &[cb]);
        }
    }

    /// Record with `f`, then submit and wait. If `f` fails nothing is submitted.
    pub fn execute<T>(
        &self,
        device: &Device,
        f: impl FnOnce(vk::CommandBuffer) -> Result<T>,
    ) -> Result<T> {
        let cb = self.allocate_and_begin(device)?;
        match f(cb) {
            Ok(value) => {
                self.end_submit_and_free(device, cb)?;
                Ok(value)
            }
            Err(e) => {
                self.end_abort_and_free(device, cb);
                Err(e)
            }
        }
    }

    /// Destroy the command pool.
    ///
    /// # Safety
    /// No command buffer from this pool may be pending.
    pub unsafe fn destroy(&self, device: &Device) {
        unsafe { device.logical().destroy_command_pool(*self.pool.lock(), None) };
    }
}

/// Create a throwaway pool on `queue`, run `f` in one submission and wait for it.
pub fn submit_one_shot<T>(
    device: &Device,
    queue: &DeviceQueue,
    f: impl FnOnce(vk::CommandBuffer) -> Result<T>,
) -> Result<T> {
    let pool = OneShotCommandPool::new(device, queue)?;
    let result = pool.execute(device, f);
    // The submission was waited on (or never made), so nothing is pending.
    unsafe { pool.destroy(device) };
    result
}
