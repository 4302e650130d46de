use std::collections::{HashMap, HashSet};

use crate::{
    data_structures::model::{Primitive, PrimitiveId, TextureId},
    resources::{mesh::GpuMesh, texture::TextureCache},
    shader::TextureFlags,
};

/**
 * This module contains the GPU upload caches for scene payloads.
 *
 * Primitives and material textures are uploaded on first use and keyed by their
 * process-unique ids, so a payload shared by many nodes is uploaded once.
 * Uploads of payloads that left the scene are dropped after each frame.
 */
pub mod mesh;
pub mod pick;
pub mod texture;

#[derive(Debug, Default)]
pub struct GpuResources {
    meshes: HashMap<PrimitiveId, GpuMesh>,
    pub textures: TextureCache,
}

impl GpuResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mesh(&mut self, device: &wgpu::Device, primitive: &Primitive) -> &GpuMesh {
        self.meshes.entry(primitive.id()).or_insert_with(|| {
            log::debug!(
                "uploading primitive {:?} ({} vertices)",
                primitive.id(),
                primitive.vertex_count()
            );
            GpuMesh::new(device, primitive)
        })
    }

    pub fn get_mesh(&self, id: PrimitiveId) -> Option<&GpuMesh> {
        self.meshes.get(&id)
    }

    /// Keeps only the uploads referenced by `primitives`.
    pub fn retain<'a>(&mut self, primitives: impl IntoIterator<Item = &'a Primitive>) {
        let mut live_meshes = HashSet::new();
        let mut live_textures: HashSet<TextureId> = HashSet::new();
        for primitive in primitives {
            live_meshes.insert(primitive.id());
            for (slot, _, _) in TextureFlags::SLOTS {
                if let Some(texture) = texture::material_texture(&primitive.material, slot) {
                    live_textures.insert(texture.id());
                }
            }
        }
        let before = self.meshes.len();
        self.meshes.retain(|id, _| live_meshes.contains(id));
        if self.meshes.len() < before {
            log::debug!("dropped {} stale primitive uploads", before - self.meshes.len());
        }
        self.textures.retain(|id| live_textures.contains(&id));
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    pub fn clear(&mut self) {
        self.meshes.clear();
        self.textures.clear();
    }
}
