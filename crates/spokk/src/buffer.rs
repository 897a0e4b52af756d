//! Buffers and per-frame buffer rings.

use crate::command::submit_one_shot;
use crate::device::Device;
use crate::error::{GpuError, Result};
use crate::memory::{Allocation, AllocationScope};
use ash::vk;
use bytemuck::Pod;
use std::ptr::NonNull;

/// Largest upload recorded inline with `vkCmdUpdateBuffer`.
pub const MAX_INLINE_UPDATE_BYTES: usize = 65536;

/// A buffer, its memory and an optional typed view.
#[derive(Debug, Default)]
pub struct Buffer {
    handle: vk::Buffer,
    view: vk::BufferView,
    allocation: Allocation,
    size: u64,
}

/// How [`Buffer::load`] moves bytes to the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadPath {
    /// memcpy into mapped memory
    Mapped,
    /// `vkCmdUpdateBuffer` in a one-shot command buffer
    Inline,
    /// copy through a temporary host-visible staging buffer
    Staged,
}

/// Choose the upload path for `len` bytes at `dst_offset`.
pub fn load_path(mapped: bool, len: usize, dst_offset: u64) -> LoadPath {
    if mapped {
        LoadPath::Mapped
    } else if len <= MAX_INLINE_UPDATE_BYTES && len % 4 == 0 && dst_offset % 4 == 0 {
        LoadPath::Inline
    } else {
        LoadPath::Staged
    }
}

/// Run `f` with a temporary resource, then `release` it whether `f` succeeded or not.
fn with_temporary<T, R>(
    temp: Option<T>,
    f: impl FnOnce(Option<&T>) -> Result<R>,
    release: impl FnOnce(T),
) -> Result<R> {
    let result = f(temp.as_ref());
    if let Some(temp) = temp {
        release(temp);
    }
    result
}

fn memory_barrier(
    device: &ash::Device,
    cb: vk::CommandBuffer,
    src: (vk::PipelineStageFlags, vk::AccessFlags),
    dst: (vk::PipelineStageFlags, vk::AccessFlags),
) {
    let barrier = vk::MemoryBarrier::default()
        .src_access_mask(src.1)
        .dst_access_mask(dst.1);
    unsafe {
        device.cmd_pipeline_barrier(
            cb,
            src.0,
            dst.0,
            vk::DependencyFlags::empty(),
            &[barrier],
            &[],
            &[],
        );
    }
}

impl Buffer {
    /// Create a buffer and bind freshly allocated memory matching `property_mask`.
    pub fn new(
        device: &Device,
        ci: &vk::BufferCreateInfo<'_>,
        property_mask: vk::MemoryPropertyFlags,
        scope: AllocationScope,
    ) -> Result<Self> {
        let logical = device.logical();
        let handle = unsafe { logical.create_buffer(ci, None) }?;
        let requirements = unsafe { logical.get_buffer_memory_requirements(handle) };

        let mut allocation =
            match device.device_alloc(requirements, property_mask, scope, true, "buffer") {
                Ok(a) => a,
                Err(e) => {
                    unsafe { logical.destroy_buffer(handle, None) };
                    return Err(match e {
                        GpuError::NoSuitableMemoryType { .. } | GpuError::OutOfDeviceMemory(_) => {
                            e
                        }
                        other => GpuError::OutOfDeviceMemory(other.to_string()),
                    });
                }
            };

        if let Err(e) = unsafe {
            logical.bind_buffer_memory(handle, allocation.block.handle(), allocation.offset)
        } {
            device.device_free(&mut allocation);
            unsafe { logical.destroy_buffer(handle, None) };
            return Err(e.into());
        }

        Ok(Self {
            handle,
            view: vk::BufferView::null(),
            allocation,
            size: ci.size,
        })
    }

    /// Create a typed view over the whole buffer.
    pub fn create_view(&mut self, device: &Device, format: vk::Format) -> Result<()> {
        if self.handle == vk::Buffer::null() {
            return Err(GpuError::NotInitialized("Buffer"));
        }
        let view_ci = vk::BufferViewCreateInfo::default()
            .buffer(self.handle)
            .format(format)
            .offset(0)
            .range(vk::WHOLE_SIZE);
        self.view = unsafe { device.logical().create_buffer_view(&view_ci, None) }?;
        Ok(())
    }

    pub fn handle(&self) -> vk::Buffer {
        self.handle
    }

    /// Typed view, if one was created.
    pub fn view(&self) -> Option<vk::BufferView> {
        (self.view != vk::BufferView::null()).then_some(self.view)
    }

    pub fn allocation(&self) -> &Allocation {
        &self.allocation
    }

    /// Size requested at creation.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Persistent host pointer for host-visible buffers. Stable for the buffer's lifetime.
    pub fn mapped_ptr(&self) -> Option<NonNull<u8>> {
        self.allocation.mapped_ptr()
    }

    fn check_range(&self, offset: u64, len: usize) -> Result<()> {
        if self.handle == vk::Buffer::null() {
            return Err(GpuError::NotInitialized("Buffer"));
        }
        let end = offset
            .checked_add(len as u64)
            .ok_or_else(|| GpuError::InvalidArgument("offset overflow".to_string()))?;
        if end > self.size {
            return Err(GpuError::InvalidArgument(format!(
                "range {offset}..{end} exceeds buffer size {}",
                self.size
            )));
        }
        Ok(())
    }

    /// Copy `data` into mapped memory at `offset` and flush it.
    pub fn write_bytes(&self, device: &Device, offset: u64, data: &[u8]) -> Result<()> {
        self.check_range(offset, data.len())?;
        let ptr = self
            .mapped_ptr()
            .ok_or_else(|| GpuError::InvalidArgument("buffer is not host-visible".to_string()))?;
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                ptr.as_ptr().add(offset as usize),
                data.len(),
            );
            self.allocation
                .flush(device.logical(), offset, data.len() as u64)
        }
    }

    /// Upload `src` to `dst_offset`.
    ///
    /// Host-visible buffers are written directly (invalidate, copy, flush). Otherwise a
    /// one-shot transfer is submitted and waited on: small 4-byte aligned uploads are
    /// recorded inline, anything else goes through a temporary staging buffer.
    pub fn load(&self, device: &Device, src: &[u8], dst_offset: u64) -> Result<()> {
        self.check_range(dst_offset, src.len())?;
        if src.is_empty() {
            return Ok(());
        }
        let logical = device.logical();
        match load_path(self.mapped_ptr().is_some(), src.len(), dst_offset) {
            LoadPath::Mapped => unsafe {
                self.allocation
                    .invalidate(logical, dst_offset, src.len() as u64)?;
                if let Some(ptr) = self.mapped_ptr() {
                    std::ptr::copy_nonoverlapping(
                        src.as_ptr(),
                        ptr.as_ptr().add(dst_offset as usize),
                        src.len(),
                    );
                }
                self.allocation.flush(logical, dst_offset, src.len() as u64)
            },
            path => {
                let queue = *device.find_queue(vk::QueueFlags::TRANSFER)?;
                let staging = if path == LoadPath::Staged {
                    let ci = vk::BufferCreateInfo::default()
                        .size(src.len() as u64)
                        .usage(vk::BufferUsageFlags::TRANSFER_SRC)
                        .sharing_mode(vk::SharingMode::EXCLUSIVE);
                    Some(Self::new(
                        device,
                        &ci,
                        vk::MemoryPropertyFlags::HOST_VISIBLE,
                        AllocationScope::Frame,
                    )?)
                } else {
                    None
                };

                // Staging is released after the one-shot submission has completed or failed.
                with_temporary(
                    staging,
                    |staging| -> Result<()> {
                        if let Some(staging) = staging {
                            staging.write_bytes(device, 0, src)?;
                        }
                        submit_one_shot(device, &queue, |cb| {
                            memory_barrier(
                                logical,
                                cb,
                                (
                                    vk::PipelineStageFlags::ALL_COMMANDS,
                                    vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
                                ),
                                (
                                    vk::PipelineStageFlags::TRANSFER,
                                    vk::AccessFlags::TRANSFER_WRITE,
                                ),
                            );
                            match staging {
                                None => unsafe {
                                    logical.cmd_update_buffer(cb, self.handle, dst_offset, src);
                                },
                                Some(staging) => {
                                    memory_barrier(
                                        logical,
                                        cb,
                                        (vk::PipelineStageFlags::HOST, vk::AccessFlags::HOST_WRITE),
                                        (
                                            vk::PipelineStageFlags::TRANSFER,
                                            vk::AccessFlags::TRANSFER_READ,
                                        ),
                                    );
                                    let region = vk::BufferCopy {
                                        src_offset: 0,
                                        dst_offset,
                                        size: src.len() as u64,
                                    };
                                    unsafe {
                                        logical.cmd_copy_buffer(cb, staging.handle, self.handle, &[region]);
                                    }
                                }
                            }
                            memory_barrier(
                                logical,
                                cb,
                                (
                                    vk::PipelineStageFlags::TRANSFER,
                                    vk::AccessFlags::TRANSFER_WRITE,
                                ),
                                (
                                    vk::PipelineStageFlags::ALL_COMMANDS,
                                    vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
                                ),
                            );
                            Ok(())
                        })
                    },
                    |mut staging| unsafe { staging.destroy(device) },
                )
            }
        }
    }

    /// [`Buffer::load`] for a slice of plain-old-data values.
    pub fn load_slice<T: Pod>(&self, device: &Device, src: &[T], dst_offset: u64) -> Result<()> {
        self.load(device, bytemuck::cast_slice(src), dst_offset)
    }

    /// Invalidate a range of host-visible memory before reading it.
    pub fn invalidate(&self, device: &Device, offset: u64, size: u64) -> Result<()> {
        unsafe { self.allocation.invalidate(device.logical(), offset, size) }
    }

    /// Flush a range of host-visible memory after writing it.
    pub fn flush(&self, device: &Device, offset: u64, size: u64) -> Result<()> {
        unsafe { self.allocation.flush(device.logical(), offset, size) }
    }

    /// Free memory, destroy the view (if any) and the buffer.
    ///
    /// # Safety
    /// The GPU must no longer be using the buffer.
    pub unsafe fn destroy(&mut self, device: &Device) {
        device.device_free(&mut self.allocation);
        unsafe {
            if self.view != vk::BufferView::null() {
                device.logical().destroy_buffer_view(self.view, None);
            }
            if self.handle != vk::Buffer::null() {
                device.logical().destroy_buffer(self.handle, None);
            }
        }
        self.view = vk::BufferView::null();
        self.handle = vk::Buffer::null();
        self.size = 0;
    }
}

/// `N` identical buffers, one per in-flight frame.
///
/// Either every pframe buffer exists or none do.
#[derive(Debug, Default)]
pub struct PipelinedBuffer {
    buffers: Vec<Buffer>,
}

impl PipelinedBuffer {
    /// Create `pframe_count` buffers from the same create info. On failure nothing is left alive.
    pub fn new(
        device: &Device,
        pframe_count: u32,
        ci: &vk::BufferCreateInfo<'_>,
        property_mask: vk::MemoryPropertyFlags,
        scope: AllocationScope,
    ) -> Result<Self> {
        if pframe_count == 0 {
            return Err(GpuError::InvalidArgument(
                "pframe count must be at least 1".to_string(),
            ));
        }
        let mut this = Self {
            buffers: Vec::with_capacity(pframe_count as usize),
        };
        for _ in 0..pframe_count {
            match Buffer::new(device, ci, property_mask, scope) {
                Ok(b) => this.buffers.push(b),
                Err(e) => {
                    unsafe { this.destroy(device) };
                    return Err(e);
                }
            }
        }
        Ok(this)
    }

    /// Create a typed view on every pframe buffer.
    pub fn create_views(&mut self, device: &Device, format: vk::Format) -> Result<()> {
        if self.buffers.is_empty() {
            return Err(GpuError::NotInitialized("PipelinedBuffer"));
        }
        for b in &mut self.buffers {
            b.create_view(device, format)?;
        }
        Ok(())
    }

    pub fn depth(&self) -> u32 {
        self.buffers.len() as u32
    }

    /// Buffer for `pframe`. Panics if out of range.
    pub fn buffer(&self, pframe: u32) -> &Buffer {
        &self.buffers[pframe as usize]
    }

    pub fn handle(&self, pframe: u32) -> vk::Buffer {
        self.buffer(pframe).handle()
    }

    pub fn view(&self, pframe: u32) -> Option<vk::BufferView> {
        self.buffer(pframe).view()
    }

    pub fn mapped_ptr(&self, pframe: u32) -> Option<NonNull<u8>> {
        self.buffer(pframe).mapped_ptr()
    }

    /// Upload into one pframe's buffer.
    pub fn load(&self, device: &Device, pframe: u32, src: &[u8], dst_offset: u64) -> Result<()> {
        self.buffer(pframe).load(device, src, dst_offset)
    }

    /// Flush host writes to one pframe's buffer.
    pub fn flush_pframe(&self, device: &Device, pframe: u32, offset: u64, size: u64) -> Result<()> {
        self.buffer(pframe).flush(device, offset, size)
    }

    /// Invalidate one pframe's buffer before host reads.
    pub fn invalidate_pframe(
        &self,
        device: &Device,
        pframe: u32,
        offset: u64,
        size: u64,
    ) -> Result<()> {
        self.buffer(pframe).invalidate(device, offset, size)
    }

    /// Destroy every pframe buffer.
    ///
    /// # Safety
    /// The GPU must no longer be using any of the buffers.
    pub unsafe fn destroy(&mut self, device: &Device) {
        for b in &mut self.buffers {
            unsafe { b.destroy(device) };
        }
        self.buffers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chooses_upload_path() {
        assert_eq!(load_path(true, 1 << 20, 3), LoadPath::Mapped);
        assert_eq!(load_path(false, 256, 0), LoadPath::Inline);
        assert_eq!(load_path(false, MAX_INLINE_UPDATE_BYTES, 64), LoadPath::Inline);
        assert_eq!(load_path(false, MAX_INLINE_UPDATE_BYTES + 4, 0), LoadPath::Staged);
        assert_eq!(load_path(false, 6, 0), LoadPath::Staged);
        assert_eq!(load_path(false, 8, 2), LoadPath::Staged);
    }

    #[test]
    fn default_buffer_is_uninitialized() {
        let b = Buffer::default();
        assert!(matches!(
            b.check_range(0, 4),
            Err(GpuError::NotInitialized("Buffer"))
        ));
        assert!(b.view().is_none());
        assert!(b.mapped_ptr().is_none());
    }

    #[test]
    fn temporary_is_released_on_every_exit() {
        use std::cell::Cell;

        let released = Cell::new(0);
        let failed: Result<()> = with_temporary(
            Some(7_u32),
            |t| {
                assert_eq!(t, Some(&7));
                Err(GpuError::InvalidArgument("write failed".into()))
            },
            |t| released.set(released.get() + t),
        );
        assert!(failed.is_err());
        assert_eq!(released.get(), 7);

        let ok = with_temporary(Some(1_u32), |_| Ok(3), |t| released.set(released.get() + t));
        assert_eq!(ok.unwrap(), 3);
        assert_eq!(released.get(), 8);

        let none = with_temporary(None::<u32>, |t| Ok(t.is_none()), |_| released.set(0));
        assert!(none.unwrap());
        assert_eq!(released.get(), 8);
    }
}
