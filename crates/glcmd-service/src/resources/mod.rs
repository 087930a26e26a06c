//! Client-id to service-object tables.
//!
//! Every object kind lives in an [`ObjectMap`]: a `slotmap` arena of entries
//! plus an index from the client's id to the arena key. Keys are versioned, so
//! state that still holds the key of a destroyed object resolves to nothing
//! instead of to a recycled slot.
//!
//! Deletion is deferred: [`ObjectMap::remove`] unregisters the client id and
//! marks the entry deleted, and the entry is only dropped (and its service id
//! handed back for driver deletion) once no attachment, vertex array, program
//! or in-flight transfer references it.

mod buffer;
mod framebuffer;
mod group;
mod program;
mod query;
mod renderbuffer;
mod texture;
mod value_buffer;
mod vertex_array;

use hashbrown::HashMap;
use slotmap::{new_key_type, Key, SlotMap};
use thiserror::Error;

pub use buffer::Buffer;
pub use framebuffer::{
    is_attachment_point, Attachment, AttachmentInfo, Completeness, Framebuffer,
    DEFAULT_FRAMEBUFFER_PLANES,
};
pub use group::{ResourceGroup, SharedResourceGroup};
pub use program::{is_sampler, Program, Shader, Uniform};
pub use query::{Query, QueryError, QueryManager, QueryState};
pub use renderbuffer::{estimate_size, Renderbuffer, RenderbufferSizeError};
pub use texture::{LevelInfo, Texture, TextureUpload};
pub use value_buffer::{is_subscription_target, ValueState, Valuebuffer};
pub use vertex_array::{VertexArray, VertexAttrib};

new_key_type! {
    pub struct BufferKey;
    pub struct TextureKey;
    pub struct RenderbufferKey;
    pub struct FramebufferKey;
    pub struct ShaderKey;
    pub struct ProgramKey;
    pub struct QueryKey;
    pub struct VertexArrayKey;
    pub struct ValuebufferKey;
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum ResourceError {
    #[error("client id 0 is reserved")]
    ReservedId,
    #[error("client id {0} already exists")]
    DuplicateId(u32),
}

#[derive(Debug)]
pub struct Entry<T> {
    pub client_id: u32,
    pub service_id: u32,
    ref_count: u32,
    deleted: bool,
    pub object: T,
}

impl<T> Entry<T> {
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }
}

/// An object whose last reference went away; the caller deletes `service_id`.
#[derive(Debug)]
pub struct Destroyed<T> {
    pub client_id: u32,
    pub service_id: u32,
    pub object: T,
}

#[derive(Debug)]
pub struct ObjectMap<K: Key, T> {
    arena: SlotMap<K, Entry<T>>,
    by_client: HashMap<u32, K>,
}

impl<K: Key, T> Default for ObjectMap<K, T> {
    fn default() -> Self {
        Self {
            arena: SlotMap::with_key(),
            by_client: HashMap::new(),
        }
    }
}

impl<K: Key, T> ObjectMap<K, T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, client_id: u32, service_id: u32, object: T) -> Result<K, ResourceError> {
        if client_id == 0 {
            return Err(ResourceError::ReservedId);
        }
        if self.by_client.contains_key(&client_id) {
            return Err(ResourceError::DuplicateId(client_id));
        }
        let key = self.arena.insert(Entry {
            client_id,
            service_id,
            ref_count: 0,
            deleted: false,
            object,
        });
        self.by_client.insert(client_id, key);
        Ok(key)
    }

    /// Key of the live object registered under `client_id`.
    pub fn get(&self, client_id: u32) -> Option<K> {
        self.by_client.get(&client_id).copied()
    }

    pub fn contains_client(&self, client_id: u32) -> bool {
        self.by_client.contains_key(&client_id)
    }

    pub fn entry(&self, key: K) -> Option<&Entry<T>> {
        self.arena.get(key)
    }

    pub fn object(&self, key: K) -> Option<&T> {
        self.arena.get(key).map(|e| &e.object)
    }

    pub fn object_mut(&mut self, key: K) -> Option<&mut T> {
        self.arena.get_mut(key).map(|e| &mut e.object)
    }

    pub fn service_id(&self, key: K) -> Option<u32> {
        self.arena.get(key).map(|e| e.service_id)
    }

    pub fn client_id(&self, key: K) -> Option<u32> {
        self.arena.get(key).map(|e| e.client_id)
    }

    /// Unregisters the client id and marks the object deleted.
    ///
    /// Returns the object when nothing references it any more; otherwise it
    /// stays in the arena until the last [`ObjectMap::release`].
    pub fn remove(&mut self, key: K) -> Option<Destroyed<T>> {
        let entry = self.arena.get_mut(key)?;
        if entry.deleted {
            return None;
        }
        entry.deleted = true;
        let client_id = entry.client_id;
        if self.by_client.get(&client_id) == Some(&key) {
            self.by_client.remove(&client_id);
        }
        if entry.ref_count == 0 {
            return self.destroy(key);
        }
        None
    }

    pub fn add_ref(&mut self, key: K) {
        if let Some(entry) = self.arena.get_mut(key) {
            entry.ref_count += 1;
        }
    }

    /// Drops one reference; returns the object if it was the last reference
    /// to an already-deleted object.
    pub fn release(&mut self, key: K) -> Option<Destroyed<T>> {
        let entry = self.arena.get_mut(key)?;
        entry.ref_count = entry.ref_count.saturating_sub(1);
        if entry.deleted && entry.ref_count == 0 {
            return self.destroy(key);
        }
        None
    }

    fn destroy(&mut self, key: K) -> Option<Destroyed<T>> {
        let entry = self.arena.remove(key)?;
        Some(Destroyed {
            client_id: entry.client_id,
            service_id: entry.service_id,
            object: entry.object,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, &Entry<T>)> {
        self.arena.iter()
    }

    pub fn for_each_mut(&mut self, mut f: impl FnMut(K, &mut T)) {
        for (key, entry) in self.arena.iter_mut() {
            f(key, &mut entry.object);
        }
    }

    /// Live (not deleted) objects.
    pub fn len(&self) -> usize {
        self.by_client.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_client.is_empty()
    }

    /// Empties the map, returning every entry including deleted ones that were
    /// still referenced.
    pub fn drain(&mut self) -> Vec<Destroyed<T>> {
        self.by_client.clear();
        let keys: Vec<K> = self.arena.keys().collect();
        keys.into_iter().filter_map(|key| self.destroy(key)).collect()
    }
}
