//! Meshes uploaded to device-local vertex and index buffers.

use crate::buffer::Buffer;
use crate::device::Device;
use crate::error::{GpuError, Result};
use crate::memory::AllocationScope;
use ash::vk;
use spokk_core::{Aabb, MeshFile, MeshFormat};
use std::path::Path;
use tracing::debug;

/// Index type for a mesh file's `bytes_per_index`.
pub fn index_type_for(bytes_per_index: u32) -> Result<vk::IndexType> {
    match bytes_per_index {
        2 => Ok(vk::IndexType::UINT16),
        4 => Ok(vk::IndexType::UINT32),
        other => Err(GpuError::InvalidArgument(format!(
            "invalid index size {other}"
        ))),
    }
}

/// Checks a decoded mesh file can be uploaded and returns its index type.
fn check_uploadable(file: &MeshFile) -> Result<vk::IndexType> {
    let index_type = index_type_for(file.header.bytes_per_index)?;
    if file.bindings.len() != 1 {
        return Err(GpuError::InvalidArgument(format!(
            "mesh has {} vertex buffers, expected 1",
            file.bindings.len()
        )));
    }
    if file.vertices.is_empty() || file.indices.is_empty() {
        return Err(GpuError::InvalidArgument(
            "mesh has no vertices or no indices".to_string(),
        ));
    }
    Ok(index_type)
}

/// A mesh whose vertex and index data live in device-local buffers.
#[derive(Debug, Default)]
pub struct Mesh {
    vertex_buffers: Vec<Buffer>,
    index_buffer: Buffer,
    mesh_format: MeshFormat,
    aabb: Aabb,
    vertex_count: u32,
    index_count: u32,
    index_type: vk::IndexType,
}

impl Mesh {
    /// Read a mesh file and upload it.
    pub fn load(device: &Device, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = MeshFile::load(path)?;
        debug!(
            "loaded mesh {}: {} vertices, {} indices",
            path.display(),
            file.header.vertex_count,
            file.header.index_count
        );
        Self::from_mesh_file(device, &file)
    }

    /// Create the buffers for a decoded mesh file and upload its data.
    /// On failure nothing is left alive.
    pub fn from_mesh_file(device: &Device, file: &MeshFile) -> Result<Self> {
        let index_type = check_uploadable(file)?;
        let mut mesh = Self {
            mesh_format: file.mesh_format(),
            aabb: file.header.aabb,
            vertex_count: file.header.vertex_count,
            index_count: file.header.index_count,
            index_type,
            ..Self::default()
        };
        if let Err(e) = mesh.upload(device, file) {
            unsafe { mesh.destroy(device) };
            return Err(e);
        }
        Ok(mesh)
    }

    fn upload(&mut self, device: &Device, file: &MeshFile) -> Result<()> {
        let buffer_ci = |size: usize, usage: vk::BufferUsageFlags| {
            vk::BufferCreateInfo::default()
                .size(size as u64)
                .usage(vk::BufferUsageFlags::TRANSFER_DST | usage)
                .sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        self.index_buffer = Buffer::new(
            device,
            &buffer_ci(file.indices.len(), vk::BufferUsageFlags::INDEX_BUFFER),
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            AllocationScope::Device,
        )?;
        self.index_buffer.load(device, &file.indices, 0)?;

        for _ in &file.bindings {
            let vertex_buffer = Buffer::new(
                device,
                &buffer_ci(file.vertices.len(), vk::BufferUsageFlags::VERTEX_BUFFER),
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
                AllocationScope::Device,
            )?;
            self.vertex_buffers.push(vertex_buffer);
            if let Some(vb) = self.vertex_buffers.last() {
                vb.load(device, &file.vertices, 0)?;
            }
        }
        Ok(())
    }

    pub fn mesh_format(&self) -> &MeshFormat {
        &self.mesh_format
    }

    pub fn aabb(&self) -> Aabb {
        self.aabb
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn index_type(&self) -> vk::IndexType {
        self.index_type
    }

    pub fn vertex_buffers(&self) -> &[Buffer] {
        &self.vertex_buffers
    }

    pub fn index_buffer(&self) -> &Buffer {
        &self.index_buffer
    }

    /// Bind every vertex buffer at its format binding, and the index buffer.
    pub fn bind_buffers(&self, device: &Device, cb: vk::CommandBuffer) -> Result<()> {
        if self.vertex_buffers.len() != self.mesh_format.bindings.len() {
            return Err(GpuError::NotInitialized("Mesh"));
        }
        let logical = device.logical();
        for (binding, buffer) in self.mesh_format.bindings.iter().zip(&self.vertex_buffers) {
            unsafe {
                logical.cmd_bind_vertex_buffers(cb, binding.binding, &[buffer.handle()], &[0]);
            }
        }
        unsafe {
            logical.cmd_bind_index_buffer(cb, self.index_buffer.handle(), 0, self.index_type);
        }
        Ok(())
    }

    /// Bind the buffers and draw every index `instance_count` times.
    pub fn bind_buffers_and_draw(
        &self,
        device: &Device,
        cb: vk::CommandBuffer,
        instance_count: u32,
    ) -> Result<()> {
        self.bind_buffers(device, cb)?;
        unsafe {
            device
                .logical()
                .cmd_draw_indexed(cb, self.index_count, instance_count, 0, 0, 0);
        }
        Ok(())
    }

    /// Destroy the vertex and index buffers.
    ///
    /// # Safety
    /// The GPU must no longer be using the buffers.
    pub unsafe fn destroy(&mut self, device: &Device) {
        for vb in &mut self.vertex_buffers {
            unsafe { vb.destroy(device) };
        }
        self.vertex_buffers.clear();
        unsafe { self.index_buffer.destroy(device) };
        self.vertex_count = 0;
        self.index_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle(bytes_per_index: u32) -> MeshFile {
        let indices: Vec<u8> = if bytes_per_index == 2 {
            [0_u16, 1, 2].iter().flat_map(|i| i.to_le_bytes()).collect()
        } else {
            [0_u32, 1, 2].iter().flat_map(|i| i.to_le_bytes()).collect()
        };
        MeshFile::new(
            &MeshFormat::position_normal_texcoord(),
            Aabb::default(),
            vec![0; 3 * 32],
            indices,
            bytes_per_index,
        )
        .unwrap()
    }

    #[test]
    fn index_type_follows_bytes_per_index() {
        assert_eq!(index_type_for(2).unwrap(), vk::IndexType::UINT16);
        assert_eq!(index_type_for(4).unwrap(), vk::IndexType::UINT32);
        assert!(matches!(index_type_for(1), Err(GpuError::InvalidArgument(_))));
        assert!(index_type_for(8).is_err());

        assert_eq!(check_uploadable(&triangle(2)).unwrap(), vk::IndexType::UINT16);
        assert_eq!(check_uploadable(&triangle(4)).unwrap(), vk::IndexType::UINT32);
    }

    #[test]
    fn rejects_files_it_cannot_upload() {
        let mut corrupt = triangle(2);
        corrupt.header.bytes_per_index = 3;
        assert!(check_uploadable(&corrupt).is_err());

        let mut empty = triangle(4);
        empty.indices.clear();
        assert!(check_uploadable(&empty).is_err());

        let mut two_streams = triangle(4);
        two_streams.bindings.push(two_streams.bindings[0]);
        assert!(check_uploadable(&two_streams).is_err());
    }

    #[test]
    fn default_mesh_is_empty() {
        let mesh = Mesh::default();
        assert_eq!(mesh.index_count(), 0);
        assert!(mesh.vertex_buffers().is_empty());
    }
}
