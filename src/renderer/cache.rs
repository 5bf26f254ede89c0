//! GPU resources retained across frames.
//!
//! Output textures live in a generational arena: a [`TextureId`] handed out
//! before a node was invalidated never resolves to a texture created later
//! in the same slot.

use std::{collections::HashMap, fmt, marker::PhantomData, sync::Arc};

use anyhow::Result;

use crate::{
    material::{FilterMode, NodeId, SocketAddr},
    renderer::{
        gpu::GpuTexture,
        painter::Painter,
        program::{Program, ProgramCache, ProgramKey},
    },
    schema::NodeSpec,
};

pub struct ArenaId<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for ArenaId<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ArenaId<T> {}

impl<T> PartialEq for ArenaId<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for ArenaId<T> {}

impl<T> std::hash::Hash for ArenaId<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for ArenaId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArenaId({}v{})", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }
}

impl<T> Arena<T> {
    pub fn insert(&mut self, value: T) -> ArenaId<T> {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return ArenaId {
                index,
                generation: slot.generation,
                _marker: PhantomData,
            };
        }
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        ArenaId {
            index: (self.slots.len() - 1) as u32,
            generation: 0,
            _marker: PhantomData,
        }
    }

    pub fn get(&self, id: ArenaId<T>) -> Option<&T> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.value.as_ref()
    }

    pub fn remove(&mut self, id: ArenaId<T>) -> Option<T> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub type TextureId = ArenaId<GpuTexture>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutputKey {
    pub node_id: NodeId,
    pub socket_id: String,
}

impl OutputKey {
    pub fn new(node_id: NodeId, socket_id: impl Into<String>) -> Self {
        Self {
            node_id,
            socket_id: socket_id.into(),
        }
    }
}

impl From<&SocketAddr> for OutputKey {
    fn from(addr: &SocketAddr) -> Self {
        OutputKey::new(addr.node_id, addr.socket_id.clone())
    }
}

/// Textures per output socket, programs per source hash, painters per node.
#[derive(Default)]
pub struct ResourceCache {
    textures: Arena<GpuTexture>,
    outputs: HashMap<OutputKey, TextureId>,
    programs: ProgramCache,
    painters: HashMap<NodeId, CachedPainter>,
}

struct CachedPainter {
    type_path: String,
    painter: Box<dyn Painter>,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache-or-populate. Size and filter only apply when the texture is
    /// created; a cached texture keeps its original size.
    pub fn get_or_create_output_texture(
        &mut self,
        device: &wgpu::Device,
        node_id: NodeId,
        socket_id: &str,
        size: [u32; 2],
        filter: FilterMode,
    ) -> TextureId {
        let key = OutputKey::new(node_id, socket_id);
        if let Some(id) = self.outputs.get(&key) {
            return *id;
        }
        let texture = GpuTexture::new(
            device,
            &format!("node.{node_id}.{socket_id}"),
            size,
            filter,
            GpuTexture::output_usage(),
        );
        let id = self.textures.insert(texture);
        self.outputs.insert(key, id);
        id
    }

    pub fn texture(&self, id: TextureId) -> Option<&GpuTexture> {
        self.textures.get(id)
    }

    pub fn output_texture_id(&self, addr: &SocketAddr) -> Option<TextureId> {
        self.outputs.get(&OutputKey::from(addr)).copied()
    }

    pub fn output_texture(&self, addr: &SocketAddr) -> Option<&GpuTexture> {
        self.output_texture_id(addr)
            .and_then(|id| self.textures.get(id))
    }

    pub fn get_program(
        &mut self,
        key: ProgramKey,
        build: impl FnOnce() -> Result<Program>,
    ) -> Result<Arc<Program>> {
        self.programs.get_or_build(key, build)
    }

    pub fn programs(&self) -> &ProgramCache {
        &self.programs
    }

    /// Returns the node's painter, building one when the node has none or
    /// its cached painter was built for another node type.
    pub fn get_or_create_painter(
        &mut self,
        node_id: NodeId,
        spec: &NodeSpec,
        build: impl FnOnce(&mut ProgramCache) -> Result<Box<dyn Painter>>,
    ) -> Result<&mut Box<dyn Painter>> {
        let stale = self.painters.get(&node_id).is_some_and(|cached| {
            cached.type_path != spec.type_path || cached.painter.kind() != spec.painter
        });
        if stale {
            log::debug!("node {node_id} changed type; rebuilding its painter");
            self.painters.remove(&node_id);
        }
        if !self.painters.contains_key(&node_id) {
            let painter = build(&mut self.programs)?;
            self.painters.insert(
                node_id,
                CachedPainter {
                    type_path: spec.type_path.clone(),
                    painter,
                },
            );
        }
        self.painters
            .get_mut(&node_id)
            .map(|cached| &mut cached.painter)
            .ok_or_else(|| anyhow::anyhow!("painter for node {node_id} vanished"))
    }

    /// Split borrow for job execution: the node's painter alongside
    /// read access to every texture.
    pub(crate) fn painter_and_textures(
        &mut self,
        node_id: NodeId,
    ) -> (Option<&mut Box<dyn Painter>>, &Arena<GpuTexture>) {
        let ResourceCache {
            textures, painters, ..
        } = self;
        (
            painters.get_mut(&node_id).map(|cached| &mut cached.painter),
            textures,
        )
    }

    pub fn has_painter(&self, node_id: NodeId) -> bool {
        self.painters.contains_key(&node_id)
    }

    /// Drops the node's output textures and painter. Programs are shared per
    /// node type and stay cached.
    pub fn invalidate_node(&mut self, node_id: NodeId) {
        let keys: Vec<OutputKey> = self
            .outputs
            .keys()
            .filter(|k| k.node_id == node_id)
            .cloned()
            .collect();
        for key in keys {
            if let Some(id) = self.outputs.remove(&key)
                && let Some(texture) = self.textures.remove(id)
            {
                texture.texture.destroy();
            }
        }
        if self.painters.remove(&node_id).is_some() {
            log::debug!("dropped painter of node {node_id}");
        }
    }

    /// Drops every output texture, e.g. after the output size changed.
    pub fn invalidate_textures(&mut self) {
        for (_, id) in self.outputs.drain() {
            if let Some(texture) = self.textures.remove(id) {
                texture.texture.destroy();
            }
        }
    }

    pub fn texture_count(&self) -> usize {
        self.outputs.len()
    }
}
