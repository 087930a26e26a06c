//! The GL command decoder.
//!
//! A [`Decoder`] owns one client context: its bindings and capabilities,
//! framebuffers, vertex arrays, queries and transfer queues. Buffers,
//! textures, renderbuffers, shaders and programs live in the
//! [`crate::resources::ResourceGroup`] shared with the other decoders of the same share group.
//!
//! Handlers are split by area into the submodules below; each one is an
//! `impl Decoder` block reached from the dispatch table in
//! [`crate::dispatch`]. A handler returns `Ok(())` after recording a GL error
//! (the client sees it through `GetError`) and `Err` only for protocol
//! failures, which stop the batch.

mod buffers;
mod common;
mod draw;
mod framebuffers;
mod misc;
mod programs;
mod queries;
mod state_cmds;
mod textures;
mod transfers;

use std::rc::Rc;
use std::sync::Arc;

use glcmd_protocol::gl;
use hashbrown::HashMap;

use crate::async_transfer::AsyncPixelTransferManager;
use crate::config::{DecoderConfig, DriverLimits};
use crate::context_lost::{ContextLossState, LossObserver, LossReason};
use crate::driver::{Driver, GlImage};
use crate::error::{CommandError, ErrorState, GlError};
use crate::resources::{
    Completeness, Framebuffer, FramebufferKey, LevelInfo, ObjectMap, QueryManager,
    SharedResourceGroup, TextureKey, Valuebuffer, ValuebufferKey, VertexArray, VertexArrayKey,
};
use crate::shared_memory::{Buckets, SharedMemory, SharedMemoryError, SharedMemoryRegistry};
use crate::state::ContextState;
use crate::stats::DecoderStats;

pub(crate) use draw::Attrib0Cache;

/// Tells the decoder whether a cross-context sync point has been released.
pub trait SyncPointOracle {
    fn is_released(&self, sync_point: u32) -> bool;
}

impl<F: Fn(u32) -> bool> SyncPointOracle for F {
    fn is_released(&self, sync_point: u32) -> bool {
        self(sync_point)
    }
}

pub struct Decoder {
    pub(crate) config: DecoderConfig,
    pub(crate) limits: DriverLimits,
    pub(crate) driver: Box<dyn Driver>,
    pub(crate) group: SharedResourceGroup,
    pub(crate) shm: SharedMemoryRegistry,
    pub(crate) buckets: Buckets,
    pub(crate) state: ContextState,
    pub(crate) framebuffers: ObjectMap<FramebufferKey, Framebuffer>,
    pub(crate) queries: QueryManager,
    pub(crate) vertex_arrays: ObjectMap<VertexArrayKey, VertexArray>,
    pub(crate) default_vertex_array: VertexArray,
    pub(crate) valuebuffers: ObjectMap<ValuebufferKey, Valuebuffer>,
    pub(crate) transfers: AsyncPixelTransferManager,
    pub(crate) errors: ErrorState,
    pub(crate) loss: ContextLossState,
    loss_observer: Option<Box<dyn LossObserver>>,
    sync_points: Option<Rc<dyn SyncPointOracle>>,
    pub(crate) images: HashMap<u32, Rc<dyn GlImage>>,
    pub(crate) attrib0: Attrib0Cache,
    /// Driver buffer holding converted `GL_FIXED` attributes.
    pub(crate) fixed_attrib_buffer: Option<u32>,
    pub(crate) stats: Arc<DecoderStats>,
    pub(crate) last_token: u32,
    /// Commands executed over the decoder's lifetime.
    pub(crate) commands_issued: u64,
    destroyed: bool,
}

impl std::fmt::Debug for Decoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoder")
            .field("loss", &self.loss)
            .field("last_token", &self.last_token)
            .field("commands_issued", &self.commands_issued)
            .field("pending_uploads", &self.transfers.pending_uploads())
            .finish_non_exhaustive()
    }
}

impl Decoder {
    pub fn new(config: DecoderConfig, driver: Box<dyn Driver>, group: SharedResourceGroup) -> Self {
        let limits = driver.limits();
        let surface = driver.surface_size();
        group.borrow_mut().join();
        tracing::debug!(?limits, ?surface, "decoder created");
        Self {
            config,
            limits,
            driver,
            group,
            shm: SharedMemoryRegistry::default(),
            buckets: Buckets::default(),
            state: ContextState::new(limits.max_texture_units, limits.max_vertex_attribs, surface),
            framebuffers: ObjectMap::new(),
            queries: QueryManager::default(),
            vertex_arrays: ObjectMap::new(),
            default_vertex_array: VertexArray::new(limits.max_vertex_attribs),
            valuebuffers: ObjectMap::new(),
            transfers: AsyncPixelTransferManager::default(),
            errors: ErrorState::default(),
            loss: ContextLossState::Live,
            loss_observer: None,
            sync_points: None,
            images: HashMap::new(),
            attrib0: Attrib0Cache::default(),
            fixed_attrib_buffer: None,
            stats: Arc::new(DecoderStats::new()),
            last_token: 0,
            commands_issued: 0,
            destroyed: false,
        }
    }

    pub fn register_shared_memory(
        &mut self,
        id: u32,
        region: Rc<dyn SharedMemory>,
    ) -> Result<(), SharedMemoryError> {
        self.shm.register(id, region)
    }

    pub fn unregister_shared_memory(&mut self, id: u32) -> bool {
        self.shm.unregister(id).is_some()
    }

    pub fn shared_memory(&self) -> &SharedMemoryRegistry {
        &self.shm
    }

    pub fn set_loss_observer(&mut self, observer: Box<dyn LossObserver>) {
        self.loss_observer = Some(observer);
    }

    pub fn set_sync_point_oracle(&mut self, oracle: Rc<dyn SyncPointOracle>) {
        self.sync_points = Some(oracle);
    }

    /// Makes `image` available to `BindTexImage2D` under `id`.
    pub fn register_image(&mut self, id: u32, image: Rc<dyn GlImage>) {
        self.images.insert(id, image);
    }

    pub fn unregister_image(&mut self, id: u32) -> bool {
        self.images.remove(&id).is_some()
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    pub fn group(&self) -> &SharedResourceGroup {
        &self.group
    }

    pub fn stats(&self) -> Arc<DecoderStats> {
        Arc::clone(&self.stats)
    }

    /// Token of the most recent `SetToken` executed.
    pub fn last_token(&self) -> u32 {
        self.last_token
    }

    pub fn loss_state(&self) -> ContextLossState {
        self.loss
    }

    pub fn is_lost(&self) -> bool {
        self.loss.is_lost()
    }

    /// Lowest pending GL error, without consuming it.
    pub fn pending_gl_error(&self) -> Option<GlError> {
        self.errors.peek()
    }

    pub fn bucket(&self, id: u32) -> Option<&[u8]> {
        self.buckets.get(id)
    }

    /// Level bookkeeping of the texture the client knows as `texture`.
    pub fn texture_level(&self, texture: u32, target: u32, level: u32) -> Option<LevelInfo> {
        let group = self.group.borrow();
        let key = group.textures.get(texture)?;
        group.textures.object(key)?.level(target, level).copied()
    }

    pub fn texture_service_id(&self, texture: u32) -> Option<u32> {
        let group = self.group.borrow();
        group.textures.service_id(group.textures.get(texture)?)
    }

    pub fn buffer_service_id(&self, buffer: u32) -> Option<u32> {
        let group = self.group.borrow();
        group.buffers.service_id(group.buffers.get(buffer)?)
    }

    pub fn program_service_id(&self, program: u32) -> Option<u32> {
        let group = self.group.borrow();
        group.programs.service_id(group.programs.get(program)?)
    }

    /// Remembered completeness of framebuffer `framebuffer`.
    pub fn framebuffer_completeness(&self, framebuffer: u32) -> Option<Completeness> {
        let key = self.framebuffers.get(framebuffer)?;
        let generation = self.group.borrow().attachment_generation();
        Some(self.framebuffers.object(key)?.completeness(generation))
    }

    /// Client id of the query active on `target`.
    pub fn active_query(&self, target: u32) -> Option<u32> {
        self.queries.queries.client_id(self.queries.active(target)?)
    }

    /// Async uploads submitted but not yet executed.
    pub fn pending_async_uploads(&self) -> usize {
        self.transfers.pending_uploads()
    }

    /// Whether anything is waiting for idle-time processing.
    pub fn has_pending_work(&self) -> bool {
        !self.loss.is_lost()
            && (self.transfers.has_pending_uploads()
                || self.transfers.has_pending_readbacks()
                || self.queries.has_pending())
    }

    /// Records a GL error and lets the batch continue.
    pub(crate) fn gl_error(
        &mut self,
        error: GlError,
        function: &'static str,
        msg: &str,
    ) -> Result<(), CommandError> {
        self.errors.record(error, function, msg);
        Ok(())
    }

    /// [`Decoder::gl_error`] for validation helpers that return `Option`.
    pub(crate) fn reject<T>(&mut self, error: GlError, function: &'static str, msg: &str) -> Option<T> {
        self.errors.record(error, function, msg);
        None
    }

    /// Folds driver-reported errors into the error state. Returns `false` when
    /// one of them was `OUT_OF_MEMORY`, after escalating it to context loss if
    /// configured to.
    pub(crate) fn allocation_succeeded(&mut self) -> bool {
        let mut out_of_memory = false;
        loop {
            let code = self.driver.get_error();
            if code == gl::NO_ERROR {
                break;
            }
            if self.errors.record_driver_error(code) == Some(GlError::OutOfMemory) {
                out_of_memory = true;
            }
        }
        if out_of_memory && self.config.lose_context_when_out_of_memory {
            self.lose_context(LossReason::OutOfMemory, LossReason::Unknown);
        }
        !out_of_memory
    }

    /// Moves to the lost state, tells the observer and marks the group so the
    /// other members follow with `others`.
    pub(crate) fn lose_context(&mut self, reason: LossReason, others: LossReason) {
        if !self.loss.lose(reason) {
            return;
        }
        tracing::warn!(?reason, "context lost");
        self.stats.inc_context_losses();
        self.group.borrow_mut().mark_lost(others);
        if let Some(observer) = self.loss_observer.as_mut() {
            observer.context_lost(reason);
        }
    }

    /// Checks everything that can lose the context before a batch runs.
    /// Returns `false` when the context is (now) lost.
    pub(crate) fn begin_batch(&mut self) -> bool {
        if self.loss.is_lost() {
            return false;
        }
        let group_lost = self.group.borrow().lost_reason();
        if let Some(reason) = group_lost {
            self.lose_context(reason, reason);
            return false;
        }
        if !self.driver.make_current() {
            tracing::warn!("failed to make the driver context current");
            self.lose_context(LossReason::Unknown, LossReason::Unknown);
            return false;
        }
        self.check_reset_status()
    }

    pub(crate) fn check_reset_status(&mut self) -> bool {
        if let Some(reason) = LossReason::from_reset_status(self.driver.reset_status()) {
            self.lose_context(reason, LossReason::Unknown);
            return false;
        }
        true
    }

    /// Idle work run at the end of every batch.
    pub(crate) fn end_batch(&mut self) {
        if self.loss.is_lost() {
            return;
        }
        self.process_readbacks(false);
        self.process_pending_transfers();
        self.process_pending_queries();
        self.check_reset_status();
    }

    /// Runs idle work outside a batch: due read-backs, a bounded number of
    /// async uploads and available query results.
    pub fn perform_idle_work(&mut self) {
        if self.loss.is_lost() || !self.driver.make_current() {
            return;
        }
        self.end_batch();
    }

    /// Blocks until every queued asynchronous read-back has landed in client
    /// memory.
    pub fn wait_for_pending_reads(&mut self) {
        if self.loss.is_lost() {
            return;
        }
        self.process_readbacks(true);
    }

    pub(crate) fn sync_point_released(&self, sync_point: u32) -> bool {
        self.sync_points
            .as_ref()
            .map_or(true, |oracle| oracle.is_released(sync_point))
    }

    pub(crate) fn current_vertex_array(&self) -> &VertexArray {
        self.state
            .vertex_array
            .and_then(|key| self.vertex_arrays.object(key))
            .unwrap_or(&self.default_vertex_array)
    }

    pub(crate) fn current_vertex_array_mut(&mut self) -> &mut VertexArray {
        match self
            .state
            .vertex_array
            .and_then(|key| self.vertex_arrays.object_mut(key))
        {
            Some(vao) => vao,
            None => &mut self.default_vertex_array,
        }
    }

    /// Runs `f` with `texture` bound to `binding` on the active unit, then
    /// restores the client's binding.
    pub(crate) fn with_texture_bound<R>(
        &mut self,
        texture: TextureKey,
        binding: u32,
        f: impl FnOnce(&mut dyn Driver) -> R,
    ) -> Option<R> {
        let (service, previous) = {
            let group = self.group.borrow();
            let service = group.textures.service_id(texture)?;
            let previous = self
                .state
                .active_unit()
                .binding(binding)
                .and_then(|key| group.textures.service_id(key))
                .unwrap_or(0);
            (service, previous)
        };
        self.driver.bind_texture(binding, service);
        let out = f(self.driver.as_mut());
        self.driver.bind_texture(binding, previous);
        Some(out)
    }

    /// Tears the decoder down. With `have_context` the driver objects owned
    /// by this decoder (and, for the last member, by the group) are deleted;
    /// without it they are only forgotten.
    pub fn destroy(&mut self, have_context: bool) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        let have_context = have_context && !self.loss.is_lost() && self.driver.make_current();
        tracing::debug!(have_context, "destroying decoder");

        if have_context {
            // Pending uploads still hold texture references.
            self.complete_all_uploads();
            self.process_readbacks(true);
        } else {
            self.drop_transfers();
        }

        let mut driver = live_driver(have_context, &mut self.driver);
        let mut group = self.group.borrow_mut();

        for dead in self.framebuffers.drain() {
            for (_, attachment) in dead.object.attachments() {
                group.release_attachment(&attachment, driver.as_deref_mut());
            }
            if let Some(d) = driver.as_deref_mut() {
                d.delete_framebuffer(dead.service_id);
            }
        }
        for dead in self.vertex_arrays.drain() {
            for buffer in dead.object.all_buffer_refs() {
                group.release_buffer(buffer, driver.as_deref_mut());
            }
            if let Some(d) = driver.as_deref_mut() {
                d.delete_vertex_array(dead.service_id);
            }
        }
        for buffer in self.default_vertex_array.all_buffer_refs() {
            group.release_buffer(buffer, driver.as_deref_mut());
        }
        self.default_vertex_array = VertexArray::new(self.limits.max_vertex_attribs);
        if let Some(program) = self.state.current_program.take() {
            group.release_program(program, driver.as_deref_mut());
        }
        for dead in self.queries.queries.drain() {
            if let Some(d) = driver.as_deref_mut() {
                d.delete_query(dead.service_id);
            }
        }
        self.valuebuffers.drain();
        if let Some(d) = driver.as_deref_mut() {
            for id in [self.attrib0.buffer.take(), self.fixed_attrib_buffer.take()]
                .into_iter()
                .flatten()
            {
                d.delete_buffer(id);
            }
        }

        if group.leave() {
            group.destroy(driver);
        }
    }
}

/// Ids carried by a `Gen*Immediate` or `Delete*Immediate` command.
pub(crate) fn immediate_ids(n: u32, immediate: &[u32]) -> Result<&[u32], CommandError> {
    immediate.get(..n as usize).ok_or_else(|| {
        CommandError::invalid(format!(
            "{n} ids announced but only {} entries of immediate data",
            immediate.len()
        ))
    })
}

/// Client-generated ids must be non-zero, distinct and unused.
pub(crate) fn check_new_ids(ids: &[u32], exists: impl Fn(u32) -> bool) -> Result<(), CommandError> {
    for (i, &id) in ids.iter().enumerate() {
        if id == 0 || exists(id) || ids[..i].contains(&id) {
            return Err(CommandError::invalid(format!("id {id} cannot be generated")));
        }
    }
    Ok(())
}

/// The driver when it may still be called, for code paths shared between
/// normal operation and teardown after context loss.
pub(crate) fn live_driver(live: bool, driver: &mut Box<dyn Driver>) -> Option<&mut dyn Driver> {
    if live {
        Some(driver.as_mut())
    } else {
        None
    }
}

impl Drop for Decoder {
    fn drop(&mut self) {
        self.destroy(true);
    }
}
