//! Scene import into the engine's mesh file format.
//!
//! Wavefront OBJ files are loaded with `tobj`, cleaned up (degenerate triangles
//! removed, smooth normals generated when missing, tangent frames computed when
//! normals and UVs exist, identical vertices joined, vertices ordered by first
//! use) and converted to the interleaved position/normal/texcoord layout.

use crate::error::{AssetError, Result};
use ash::vk;
use glam::{Vec2, Vec3};
use hashbrown::HashMap;
use spokk_core::vertex::{convert_vertex_buffer, location, AttributeInfo, VertexLayout};
use spokk_core::{bytes_per_index_for, Aabb, MeshFile, MeshFormat};
use std::path::Path;
use tracing::{debug, warn};

/// Normals of faces meeting at more than this angle are not averaged together.
pub const MAX_SMOOTHING_ANGLE_DEGREES: f32 = 80.0;

/// Color and texcoord sets beyond this count are dropped.
pub const MAX_ATTRIBUTE_SETS: usize = 4;

/// One triangle-list mesh with planar attribute arrays.
///
/// Every non-empty attribute array has one entry per vertex.
#[derive(Clone, Debug, Default)]
pub struct SourceMesh {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub tangents: Vec<Vec3>,
    pub bitangents: Vec<Vec3>,
    pub colors: Vec<Vec<[f32; 4]>>,
    pub texcoords: Vec<Vec<Vec2>>,
    pub indices: Vec<u32>,
}

fn vec3s(flat: &[f32]) -> Vec<Vec3> {
    flat.chunks_exact(3).map(Vec3::from_slice).collect()
}

impl SourceMesh {
    /// Load the single mesh of an OBJ file. Point and line elements are ignored.
    pub fn load_obj(path: &Path) -> Result<Self> {
        let options = tobj::LoadOptions {
            single_index: true,
            triangulate: true,
            ignore_points: true,
            ignore_lines: true,
            ..Default::default()
        };
        let (models, materials) = tobj::load_obj(path, &options)
            .map_err(|e| AssetError::MeshImport(format!("{}: {e}", path.display())))?;
        if let Err(e) = materials {
            debug!("{}: materials not loaded: {e}", path.display());
        }
        let [model] = models.as_slice() else {
            return Err(AssetError::MeshImport(format!(
                "{}: expected exactly one mesh, found {}",
                path.display(),
                models.len()
            )));
        };
        let mesh = &model.mesh;

        let mut colors = Vec::new();
        if !mesh.vertex_color.is_empty() {
            colors.push(
                mesh.vertex_color
                    .chunks_exact(3)
                    .map(|c| [c[0], c[1], c[2], 1.0])
                    .collect(),
            );
        }
        let mut texcoords = Vec::new();
        if !mesh.texcoords.is_empty() {
            texcoords.push(
                mesh.texcoords
                    .chunks_exact(2)
                    .map(Vec2::from_slice)
                    .collect(),
            );
        }

        Ok(Self {
            positions: vec3s(&mesh.positions),
            normals: vec3s(&mesh.normals),
            tangents: Vec::new(),
            bitangents: Vec::new(),
            colors,
            texcoords,
            indices: mesh.indices.clone(),
        })
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    fn triangle(&self, tri: &[u32]) -> [Vec3; 3] {
        [
            self.positions[tri[0] as usize],
            self.positions[tri[1] as usize],
            self.positions[tri[2] as usize],
        ]
    }

    /// Check that every index refers to a vertex and the index count is a whole number of triangles.
    pub fn validate(&self) -> Result<()> {
        if self.indices.len() % 3 != 0 {
            return Err(AssetError::MeshImport(format!(
                "index count {} is not a multiple of 3",
                self.indices.len()
            )));
        }
        let count = self.vertex_count();
        if let Some(bad) = self.indices.iter().find(|&&i| i as usize >= count) {
            return Err(AssetError::MeshImport(format!(
                "index {bad} out of range for {count} vertices"
            )));
        }
        let arrays = [
            ("normals", self.normals.len()),
            ("tangents", self.tangents.len()),
            ("bitangents", self.bitangents.len()),
        ];
        let sets = self
            .colors
            .iter()
            .map(|c| ("colors", c.len()))
            .chain(self.texcoords.iter().map(|t| ("texcoords", t.len())));
        for (name, len) in arrays.into_iter().chain(sets) {
            if len != 0 && len != count {
                return Err(AssetError::MeshImport(format!(
                    "{name} has {len} entries for {count} vertices"
                )));
            }
        }
        Ok(())
    }

    /// Drop triangles that repeat a vertex or have zero area.
    pub fn remove_degenerate_triangles(&mut self) -> usize {
        let before = self.indices.len() / 3;
        let kept: Vec<u32> = self
            .indices
            .chunks_exact(3)
            .filter(|tri| {
                if tri[0] == tri[1] || tri[1] == tri[2] || tri[0] == tri[2] {
                    return false;
                }
                let [a, b, c] = self.triangle(tri);
                (b - a).cross(c - a) != Vec3::ZERO
            })
            .flatten()
            .copied()
            .collect();
        self.indices = kept;
        before - self.indices.len() / 3
    }

    /// Area-weighted smooth normals. At each vertex, faces bent more than
    /// `max_angle_degrees` away from the averaged normal are left out.
    pub fn generate_smooth_normals(&mut self, max_angle_degrees: f32) {
        let count = self.vertex_count();
        let face_normals: Vec<Vec3> = self
            .indices
            .chunks_exact(3)
            .map(|tri| {
                let [a, b, c] = self.triangle(tri);
                (b - a).cross(c - a)
            })
            .collect();

        let mut faces_of_vertex = vec![Vec::new(); count];
        for (face, tri) in self.indices.chunks_exact(3).enumerate() {
            for &i in tri {
                faces_of_vertex[i as usize].push(face);
            }
        }

        let cos_limit = max_angle_degrees.to_radians().cos();
        self.normals = faces_of_vertex
            .iter()
            .map(|faces| {
                let average = faces
                    .iter()
                    .map(|&f| face_normals[f])
                    .sum::<Vec3>()
                    .normalize_or_zero();
                if average == Vec3::ZERO {
                    return faces
                        .first()
                        .map_or(Vec3::Z, |&f| face_normals[f].normalize_or(Vec3::Z));
                }
                let smoothed = faces
                    .iter()
                    .map(|&f| face_normals[f])
                    .filter(|n| n.normalize_or_zero().dot(average) >= cos_limit)
                    .sum::<Vec3>()
                    .normalize_or_zero();
                if smoothed == Vec3::ZERO {
                    average
                } else {
                    smoothed
                }
            })
            .collect();
    }

    /// Per-vertex tangent and bitangent from the first UV set, orthogonalized
    /// against the normal.
    pub fn compute_tangent_frames(&mut self) {
        let Some(uvs) = self.texcoords.first() else {
            return;
        };
        if self.normals.is_empty() {
            return;
        }
        let count = self.vertex_count();
        let mut tangents = vec![Vec3::ZERO; count];
        let mut bitangents = vec![Vec3::ZERO; count];
        for tri in self.indices.chunks_exact(3) {
            let [p0, p1, p2] = self.triangle(tri);
            let (t0, t1, t2) = (
                uvs[tri[0] as usize],
                uvs[tri[1] as usize],
                uvs[tri[2] as usize],
            );
            let (e1, e2) = (p1 - p0, p2 - p0);
            let (d1, d2) = (t1 - t0, t2 - t0);
            let det = d1.x * d2.y - d2.x * d1.y;
            if det.abs() <= f32::EPSILON {
                continue;
            }
            let r = det.recip();
            let tangent = (e1 * d2.y - e2 * d1.y) * r;
            let bitangent = (e2 * d1.x - e1 * d2.x) * r;
            for &i in tri {
                tangents[i as usize] += tangent;
                bitangents[i as usize] += bitangent;
            }
        }

        for (i, normal) in self.normals.iter().enumerate() {
            let t = (tangents[i] - *normal * normal.dot(tangents[i])).normalize_or_zero();
            let t = if t == Vec3::ZERO { normal.any_orthonormal_vector() } else { t };
            let b = normal.cross(t);
            // Keep the handedness implied by the UV mapping.
            bitangents[i] = if b.dot(bitangents[i]) < 0.0 { -b } else { b };
            tangents[i] = t;
        }
        self.tangents = tangents;
        self.bitangents = bitangents;
    }

    fn vertex_key(&self, v: usize) -> Vec<u32> {
        let mut key = Vec::with_capacity(16);
        let mut push3 = |a: &[Vec3]| {
            if let Some(x) = a.get(v) {
                key.extend(x.to_array().map(f32::to_bits));
            }
        };
        push3(&self.positions);
        push3(&self.normals);
        push3(&self.tangents);
        push3(&self.bitangents);
        for set in &self.colors {
            key.extend(set[v].map(f32::to_bits));
        }
        for set in &self.texcoords {
            key.extend(set[v].to_array().map(f32::to_bits));
        }
        key
    }

    /// Merge vertices whose attributes are bitwise identical.
    pub fn join_identical_vertices(&mut self) {
        let mut first_of: HashMap<Vec<u32>, u32> = HashMap::new();
        let remap: Vec<u32> = (0..self.vertex_count())
            .map(|v| *first_of.entry(self.vertex_key(v)).or_insert(v as u32))
            .collect();
        for index in &mut self.indices {
            *index = remap[*index as usize];
        }
        self.reorder_by_first_use();
    }

    /// Renumber vertices in the order the index buffer first touches them and
    /// drop vertices no triangle uses.
    pub fn reorder_by_first_use(&mut self) {
        let mut new_index = vec![u32::MAX; self.vertex_count()];
        let mut order = Vec::with_capacity(self.vertex_count());
        for index in &mut self.indices {
            let slot = &mut new_index[*index as usize];
            if *slot == u32::MAX {
                *slot = order.len() as u32;
                order.push(*index as usize);
            }
            *index = *slot;
        }
        fn gather<T: Copy>(values: &mut Vec<T>, order: &[usize]) {
            if !values.is_empty() {
                *values = order.iter().map(|&i| values[i]).collect();
            }
        }
        gather(&mut self.positions, &order);
        gather(&mut self.normals, &order);
        gather(&mut self.tangents, &order);
        gather(&mut self.bitangents, &order);
        for set in &mut self.colors {
            gather(set, &order);
        }
        for set in &mut self.texcoords {
            gather(set, &order);
        }
    }

    /// Run the full cleanup used for imported meshes.
    pub fn prepare(&mut self) -> Result<()> {
        self.validate()?;
        let removed = self.remove_degenerate_triangles();
        if removed > 0 {
            debug!("Removed {removed} degenerate triangles");
        }
        if self.normals.is_empty() {
            self.generate_smooth_normals(MAX_SMOOTHING_ANGLE_DEGREES);
        }
        self.compute_tangent_frames();
        self.join_identical_vertices();
        Ok(())
    }

    /// Interleave every present attribute into one buffer, matched to shader locations.
    fn interleaved(&self) -> Result<(VertexLayout, Vec<u8>)> {
        let mut attributes = Vec::new();
        let mut streams: Vec<Vec<f32>> = Vec::new();
        let mut offset = 0u32;
        let mut add = |location: u32, format: vk::Format, components: u32, data: Vec<f32>| {
            attributes.push(AttributeInfo {
                location,
                format,
                offset,
            });
            offset += components * 4;
            streams.push(data);
        };
        let flat3 = |v: &[Vec3]| v.iter().flat_map(|x| x.to_array()).collect::<Vec<f32>>();

        add(
            location::POSITION,
            vk::Format::R32G32B32_SFLOAT,
            3,
            flat3(&self.positions),
        );
        for (loc, data) in [
            (location::NORMAL, &self.normals),
            (location::TANGENT, &self.tangents),
            (location::BITANGENT, &self.bitangents),
        ] {
            if !data.is_empty() {
                add(loc, vk::Format::R32G32B32_SFLOAT, 3, flat3(data));
            }
        }
        if self.colors.len() > MAX_ATTRIBUTE_SETS {
            warn!(
                "Mesh has {} color sets; only the first {MAX_ATTRIBUTE_SETS} are kept",
                self.colors.len()
            );
        }
        for (set, colors) in self.colors.iter().take(MAX_ATTRIBUTE_SETS).enumerate() {
            add(
                location::COLOR0 + set as u32,
                vk::Format::R32G32B32A32_SFLOAT,
                4,
                colors.iter().flatten().copied().collect(),
            );
        }
        if self.texcoords.len() > MAX_ATTRIBUTE_SETS {
            warn!(
                "Mesh has {} texcoord sets; only the first {MAX_ATTRIBUTE_SETS} are kept",
                self.texcoords.len()
            );
        }
        for (set, uvs) in self.texcoords.iter().take(MAX_ATTRIBUTE_SETS).enumerate() {
            add(
                location::TEXCOORD0 + set as u32,
                vk::Format::R32G32_SFLOAT,
                2,
                uvs.iter().flat_map(|uv| uv.to_array()).collect(),
            );
        }

        let layout = VertexLayout::new(attributes)?;
        let mut bytes = Vec::with_capacity(layout.stride as usize * self.vertex_count());
        for v in 0..self.vertex_count() {
            for stream in &streams {
                let components = stream.len() / self.vertex_count().max(1);
                let start = v * components;
                bytes.extend_from_slice(bytemuck::cast_slice(&stream[start..start + components]));
            }
        }
        Ok((layout, bytes))
    }

    /// Convert into a mesh file with the given single-binding format.
    pub fn to_mesh_file(&self, mesh_format: &MeshFormat) -> Result<MeshFile> {
        self.validate()?;
        let vertex_count = self.vertex_count();
        let (src_layout, src) = self.interleaved()?;
        let dst_layout = VertexLayout::from_mesh_format(mesh_format, 0)?;
        let mut vertices = vec![0u8; dst_layout.stride as usize * vertex_count];
        convert_vertex_buffer(&src, &src_layout, &mut vertices, &dst_layout, vertex_count)?;

        let bytes_per_index = bytes_per_index_for(vertex_count);
        let triangles = self.indices.chunks_exact(3).flatten();
        let indices: Vec<u8> = if bytes_per_index == 2 {
            triangles
                .flat_map(|&i| (i as u16).to_le_bytes())
                .collect()
        } else {
            triangles.flat_map(|&i| i.to_le_bytes()).collect()
        };

        let aabb = Aabb::from_points(self.positions.iter().copied());
        Ok(MeshFile::new(
            mesh_format,
            aabb,
            vertices,
            indices,
            bytes_per_index,
        )?)
    }
}

/// Import the scene at `input` and write a position/normal/texcoord mesh file to `output`.
pub fn import_mesh(input: &Path, output: &Path) -> Result<MeshFile> {
    let mut mesh = SourceMesh::load_obj(input)?;
    mesh.prepare()?;
    let file = mesh.to_mesh_file(&MeshFormat::position_normal_texcoord())?;
    file.save(output)?;
    debug!(
        "Imported {}: {} vertices, {} indices",
        input.display(),
        file.header.vertex_count,
        file.header.index_count
    );
    Ok(file)
}
