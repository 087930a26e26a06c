//! Framebuffers, renderbuffers, completeness and lazy clears.

use glcmd_protocol::cmd::{
    BindFramebuffer, BindRenderbuffer, CheckFramebufferStatus, DeleteFramebuffersImmediate,
    DeleteRenderbuffersImmediate, FramebufferRenderbuffer, FramebufferTexture2D,
    GenFramebuffersImmediate, GenRenderbuffersImmediate, RenderbufferStorage,
    RenderbufferStorageMultisample,
};
use glcmd_protocol::gl::{self, FormatPlanes};

use super::{check_new_ids, immediate_ids, Decoder};
use crate::error::{CommandError, GlError};
use crate::resources::{
    estimate_size, is_attachment_point, Attachment, Completeness, Framebuffer, FramebufferKey,
    Renderbuffer, RenderbufferKey, RenderbufferSizeError, DEFAULT_FRAMEBUFFER_PLANES,
};
use crate::state::{Capabilities, ClearMask};

fn is_framebuffer_target(target: u32) -> bool {
    matches!(
        target,
        gl::FRAMEBUFFER | gl::READ_FRAMEBUFFER | gl::DRAW_FRAMEBUFFER
    )
}

fn clear_mask_for_point(point: u32) -> ClearMask {
    match point {
        gl::COLOR_ATTACHMENT0 => ClearMask::COLOR,
        gl::DEPTH_ATTACHMENT => ClearMask::DEPTH,
        gl::STENCIL_ATTACHMENT => ClearMask::STENCIL,
        _ => ClearMask::DEPTH | ClearMask::STENCIL,
    }
}

impl Decoder {
    pub(crate) fn handle_gen_framebuffers(
        &mut self,
        c: GenFramebuffersImmediate,
        immediate: &[u32],
    ) -> Result<(), CommandError> {
        let ids = immediate_ids(c.n, immediate)?;
        check_new_ids(ids, |id| self.framebuffers.contains_client(id))?;
        for &id in ids {
            let service = self.driver.gen_framebuffer();
            self.framebuffers
                .create(id, service, Framebuffer::default())
                .map_err(|e| CommandError::invalid(e.to_string()))?;
        }
        Ok(())
    }

    pub(crate) fn handle_delete_framebuffers(
        &mut self,
        c: DeleteFramebuffersImmediate,
        immediate: &[u32],
    ) -> Result<(), CommandError> {
        let ids = immediate_ids(c.n, immediate)?;
        for &id in ids {
            let Some(key) = self.framebuffers.get(id) else {
                continue;
            };
            if self.state.draw_framebuffer == Some(key) {
                self.state.draw_framebuffer = None;
                self.state.shape.mark_dirty();
                self.driver.bind_framebuffer(gl::DRAW_FRAMEBUFFER, 0);
            }
            if self.state.read_framebuffer == Some(key) {
                self.state.read_framebuffer = None;
                self.driver.bind_framebuffer(gl::READ_FRAMEBUFFER, 0);
            }
            let Some(dead) = self.framebuffers.remove(key) else {
                continue;
            };
            let mut group = self.group.borrow_mut();
            for (_, attachment) in dead.object.attachments() {
                group.release_attachment(&attachment, Some(self.driver.as_mut()));
            }
            self.driver.delete_framebuffer(dead.service_id);
        }
        Ok(())
    }

    pub(crate) fn handle_gen_renderbuffers(
        &mut self,
        c: GenRenderbuffersImmediate,
        immediate: &[u32],
    ) -> Result<(), CommandError> {
        let ids = immediate_ids(c.n, immediate)?;
        {
            let group = self.group.borrow();
            check_new_ids(ids, |id| group.renderbuffers.contains_client(id))?;
        }
        for &id in ids {
            let service = self.driver.gen_renderbuffer();
            self.group
                .borrow_mut()
                .renderbuffers
                .create(id, service, Renderbuffer::default())
                .map_err(|e| CommandError::invalid(e.to_string()))?;
        }
        Ok(())
    }

    pub(crate) fn handle_delete_renderbuffers(
        &mut self,
        c: DeleteRenderbuffersImmediate,
        immediate: &[u32],
    ) -> Result<(), CommandError> {
        let ids = immediate_ids(c.n, immediate)?;
        for &id in ids {
            let Some(key) = self.group.borrow().renderbuffers.get(id) else {
                continue;
            };
            self.forget_renderbuffer(key);
            let dead = self.group.borrow_mut().renderbuffers.remove(key);
            if let Some(dead) = dead {
                self.driver.delete_renderbuffer(dead.service_id);
            }
        }
        Ok(())
    }

    fn forget_renderbuffer(&mut self, renderbuffer: RenderbufferKey) {
        let attached: Vec<_> = self
            .framebuffers
            .iter()
            .map(|(fb, entry)| (fb, entry.object.points_with_renderbuffer(renderbuffer)))
            .filter(|(_, points)| !points.is_empty())
            .collect();
        for (fb, points) in attached {
            self.detach_points(fb, &points);
        }
        if self.state.renderbuffer == Some(renderbuffer) {
            self.state.renderbuffer = None;
            self.driver.bind_renderbuffer(gl::RENDERBUFFER, 0);
        }
    }

    fn framebuffer_service(&self, key: Option<FramebufferKey>) -> u32 {
        key.and_then(|k| self.framebuffers.service_id(k)).unwrap_or(0)
    }

    /// Empties attachment points of `fb`, which need not be bound.
    pub(crate) fn detach_points(&mut self, fb: FramebufferKey, points: &[u32]) {
        let Some(service) = self.framebuffers.service_id(fb) else {
            return;
        };
        let is_draw = self.state.draw_framebuffer == Some(fb);
        if !is_draw {
            self.driver.bind_framebuffer(gl::DRAW_FRAMEBUFFER, service);
        }
        for &point in points {
            let old = self
                .framebuffers
                .object_mut(fb)
                .and_then(|f| f.attach(point, None));
            self.driver
                .framebuffer_renderbuffer(gl::DRAW_FRAMEBUFFER, point, 0);
            if let Some(old) = old {
                self.group
                    .borrow_mut()
                    .release_attachment(&old, Some(self.driver.as_mut()));
            }
        }
        if is_draw {
            self.state.shape.mark_dirty();
        } else {
            let current = self.framebuffer_service(self.state.draw_framebuffer);
            self.driver.bind_framebuffer(gl::DRAW_FRAMEBUFFER, current);
        }
    }

    pub(crate) fn handle_bind_framebuffer(&mut self, c: BindFramebuffer) -> Result<(), CommandError> {
        const FUNC: &str = "glBindFramebuffer";
        if !is_framebuffer_target(c.target) {
            return self.gl_error(GlError::InvalidEnum, FUNC, "invalid target");
        }
        let key = if c.framebuffer == 0 {
            None
        } else {
            match self.framebuffers.get(c.framebuffer) {
                Some(key) => Some(key),
                None if self.group.borrow().bind_generates_resource() => {
                    let service = self.driver.gen_framebuffer();
                    self.framebuffers
                        .create(c.framebuffer, service, Framebuffer::default())
                        .ok()
                }
                None => None,
            }
        };
        if c.framebuffer != 0 && key.is_none() {
            return self.gl_error(GlError::InvalidOperation, FUNC, "framebuffer was not generated");
        }
        if c.target != gl::READ_FRAMEBUFFER && self.state.draw_framebuffer != key {
            self.state.draw_framebuffer = key;
            self.state.shape.mark_dirty();
        }
        if c.target != gl::DRAW_FRAMEBUFFER {
            self.state.read_framebuffer = key;
        }
        let service = self.framebuffer_service(key);
        self.driver.bind_framebuffer(c.target, service);
        Ok(())
    }

    pub(crate) fn handle_bind_renderbuffer(&mut self, c: BindRenderbuffer) -> Result<(), CommandError> {
        const FUNC: &str = "glBindRenderbuffer";
        if c.target != gl::RENDERBUFFER {
            return self.gl_error(GlError::InvalidEnum, FUNC, "invalid target");
        }
        let key = if c.renderbuffer == 0 {
            None
        } else {
            let (existing, generate) = {
                let group = self.group.borrow();
                (group.renderbuffers.get(c.renderbuffer), group.bind_generates_resource())
            };
            match existing {
                Some(key) => Some(key),
                None if generate => {
                    let service = self.driver.gen_renderbuffer();
                    self.group
                        .borrow_mut()
                        .renderbuffers
                        .create(c.renderbuffer, service, Renderbuffer::default())
                        .ok()
                }
                None => {
                    return self.gl_error(
                        GlError::InvalidOperation,
                        FUNC,
                        "renderbuffer was not generated",
                    )
                }
            }
        };
        let service = key
            .and_then(|k| self.group.borrow().renderbuffers.service_id(k))
            .unwrap_or(0);
        self.state.renderbuffer = key;
        self.driver.bind_renderbuffer(c.target, service);
        Ok(())
    }

    pub(crate) fn handle_renderbuffer_storage(
        &mut self,
        c: RenderbufferStorage,
    ) -> Result<(), CommandError> {
        self.renderbuffer_storage(
            "glRenderbufferStorage",
            c.target,
            0,
            c.internal_format,
            c.width,
            c.height,
        )
    }

    pub(crate) fn handle_renderbuffer_storage_multisample(
        &mut self,
        c: RenderbufferStorageMultisample,
    ) -> Result<(), CommandError> {
        self.renderbuffer_storage(
            "glRenderbufferStorageMultisample",
            c.target,
            c.samples,
            c.internal_format,
            c.width,
            c.height,
        )
    }

    fn renderbuffer_storage(
        &mut self,
        func: &'static str,
        target: u32,
        samples: i32,
        internal_format: u32,
        width: i32,
        height: i32,
    ) -> Result<(), CommandError> {
        if target != gl::RENDERBUFFER {
            return self.gl_error(GlError::InvalidEnum, func, "invalid target");
        }
        if samples < 0 || width < 0 || height < 0 {
            return self.gl_error(GlError::InvalidValue, func, "negative size or sample count");
        }
        let (samples, width, height) = (samples as u32, width as u32, height as u32);
        let max = self.limits.max_renderbuffer_size;
        if width > max || height > max {
            return self.gl_error(GlError::InvalidValue, func, "size exceeds the renderbuffer limit");
        }
        if samples > self.limits.max_samples {
            return self.gl_error(GlError::InvalidValue, func, "too many samples");
        }
        let Some(key) = self.state.renderbuffer else {
            return self.gl_error(GlError::InvalidOperation, func, "no renderbuffer bound");
        };
        match estimate_size(width, height, samples, internal_format) {
            Ok(_) => {}
            Err(RenderbufferSizeError::UnknownFormat(_)) => {
                return self.gl_error(GlError::InvalidEnum, func, "invalid internal format")
            }
            Err(err @ RenderbufferSizeError::Overflow { .. }) => {
                return self.gl_error(GlError::OutOfMemory, func, &err.to_string())
            }
        }
        self.driver
            .renderbuffer_storage(target, samples, internal_format, width, height);
        if !self.allocation_succeeded() {
            return Ok(());
        }
        let mut group = self.group.borrow_mut();
        if let Some(rb) = group.renderbuffers.object_mut(key) {
            rb.set_storage(internal_format, width, height, samples);
        }
        group.bump_attachment_generation();
        Ok(())
    }

    /// Bound non-default framebuffer for an attachment command.
    fn framebuffer_for_attach(&mut self, func: &'static str, target: u32) -> Option<FramebufferKey> {
        if !is_framebuffer_target(target) {
            return self.reject(GlError::InvalidEnum, func, "invalid target");
        }
        match self.state.framebuffer(target) {
            Some(key) => Some(key),
            None => self.reject(GlError::InvalidOperation, func, "default framebuffer bound"),
        }
    }

    /// Installs (or with `None` removes) an attachment, moving the attachment
    /// references over.
    fn set_attachment(&mut self, fb: FramebufferKey, point: u32, attachment: Option<Attachment>) {
        let mut group = self.group.borrow_mut();
        match attachment {
            Some(Attachment::Texture { texture, .. }) => group.textures.add_ref(texture),
            Some(Attachment::Renderbuffer(rb)) => group.renderbuffers.add_ref(rb),
            None => {}
        }
        let old = self
            .framebuffers
            .object_mut(fb)
            .and_then(|f| f.attach(point, attachment));
        if let Some(old) = old {
            group.release_attachment(&old, Some(self.driver.as_mut()));
        }
        drop(group);
        if self.state.draw_framebuffer == Some(fb) {
            self.state.shape.mark_dirty();
        }
    }

    pub(crate) fn handle_framebuffer_renderbuffer(
        &mut self,
        c: FramebufferRenderbuffer,
    ) -> Result<(), CommandError> {
        const FUNC: &str = "glFramebufferRenderbuffer";
        let Some(fb) = self.framebuffer_for_attach(FUNC, c.target) else {
            return Ok(());
        };
        if !is_attachment_point(c.attachment) || c.renderbuffer_target != gl::RENDERBUFFER {
            return self.gl_error(GlError::InvalidEnum, FUNC, "invalid attachment or target");
        }
        let (key, service) = if c.renderbuffer == 0 {
            (None, 0)
        } else {
            let found = {
                let group = self.group.borrow();
                group
                    .renderbuffers
                    .get(c.renderbuffer)
                    .and_then(|k| Some((k, group.renderbuffers.service_id(k)?)))
            };
            match found {
                Some((key, service)) => (Some(key), service),
                None => return self.gl_error(GlError::InvalidOperation, FUNC, "unknown renderbuffer"),
            }
        };
        self.set_attachment(fb, c.attachment, key.map(Attachment::Renderbuffer));
        self.driver
            .framebuffer_renderbuffer(c.target, c.attachment, service);
        Ok(())
    }

    pub(crate) fn handle_framebuffer_texture_2d(
        &mut self,
        c: FramebufferTexture2D,
    ) -> Result<(), CommandError> {
        const FUNC: &str = "glFramebufferTexture2D";
        let Some(fb) = self.framebuffer_for_attach(FUNC, c.target) else {
            return Ok(());
        };
        if !is_attachment_point(c.attachment) {
            return self.gl_error(GlError::InvalidEnum, FUNC, "invalid attachment");
        }
        let Some(binding) = gl::texture_binding_target(c.textarget) else {
            return self.gl_error(GlError::InvalidEnum, FUNC, "invalid texture target");
        };
        if c.level != 0 {
            return self.gl_error(GlError::InvalidValue, FUNC, "level must be 0");
        }
        let (attachment, service) = if c.texture == 0 {
            (None, 0)
        } else {
            let found = {
                let group = self.group.borrow();
                group.textures.get(c.texture).and_then(|k| {
                    let entry = group.textures.entry(k)?;
                    Some((k, entry.service_id, entry.object.target))
                })
            };
            match found {
                Some((texture, service, target)) if target == Some(binding) => (
                    Some(Attachment::Texture {
                        texture,
                        target: c.textarget,
                        level: 0,
                    }),
                    service,
                ),
                Some(_) => {
                    return self.gl_error(
                        GlError::InvalidOperation,
                        FUNC,
                        "texture target does not match",
                    )
                }
                None => return self.gl_error(GlError::InvalidOperation, FUNC, "unknown texture"),
            }
        };
        self.set_attachment(fb, c.attachment, attachment);
        self.driver
            .framebuffer_texture_2d(c.target, c.attachment, c.textarget, service, 0);
        Ok(())
    }

    pub(crate) fn handle_check_framebuffer_status(
        &mut self,
        c: CheckFramebufferStatus,
    ) -> Result<(), CommandError> {
        self.shm.check(c.result_shm_id, c.result_shm_offset, 4)?;
        if !is_framebuffer_target(c.target) {
            self.shm.write_u32(c.result_shm_id, c.result_shm_offset, 0)?;
            return self.gl_error(GlError::InvalidEnum, "glCheckFramebufferStatus", "invalid target");
        }
        let status = self.framebuffer_status(c.target);
        self.shm
            .write_u32(c.result_shm_id, c.result_shm_offset, status)?;
        Ok(())
    }

    /// `FRAMEBUFFER_*` status of the framebuffer bound to `target`.
    ///
    /// A `Complete` verdict is remembered until an attachment changes or the
    /// group's attachment generation moves; anything else is re-checked.
    pub(crate) fn framebuffer_status(&mut self, target: u32) -> u32 {
        let Some(key) = self.state.framebuffer(target) else {
            return gl::FRAMEBUFFER_COMPLETE;
        };
        let generation = self.group.borrow().attachment_generation();
        let checked = {
            let Some(fb) = self.framebuffers.object(key) else {
                return gl::FRAMEBUFFER_UNSUPPORTED;
            };
            if fb.completeness(generation) == Completeness::Complete {
                return gl::FRAMEBUFFER_COMPLETE;
            }
            let group = self.group.borrow();
            fb.static_check(|a| group.attachment_info(a))
        };
        let Some(fb) = self.framebuffers.object_mut(key) else {
            return gl::FRAMEBUFFER_UNSUPPORTED;
        };
        if let Err(status) = checked {
            fb.set_completeness(Completeness::Incomplete(status), generation);
            return status;
        }
        fb.set_completeness(Completeness::PossiblyComplete, generation);

        let status = self.driver.check_framebuffer_status(target);
        let Some(fb) = self.framebuffers.object_mut(key) else {
            return status;
        };
        fb.set_completeness(Completeness::DriverQueried, generation);
        let verdict = if status == gl::FRAMEBUFFER_COMPLETE {
            Completeness::Complete
        } else {
            tracing::debug!(status, "driver reports framebuffer incomplete");
            Completeness::Incomplete(status)
        };
        fb.set_completeness(verdict, generation);
        status
    }

    /// Records `INVALID_FRAMEBUFFER_OPERATION` unless the framebuffer bound
    /// to `target` is complete.
    pub(crate) fn check_framebuffer_complete(&mut self, func: &'static str, target: u32) -> bool {
        if self.framebuffer_status(target) == gl::FRAMEBUFFER_COMPLETE {
            return true;
        }
        self.errors
            .record(GlError::InvalidFramebufferOperation, func, "framebuffer incomplete");
        false
    }

    pub(crate) fn draw_framebuffer_planes(&self) -> FormatPlanes {
        match self
            .state
            .draw_framebuffer
            .and_then(|key| self.framebuffers.object(key))
        {
            Some(fb) => {
                let group = self.group.borrow();
                fb.planes(|a| group.attachment_info(a))
            }
            None => DEFAULT_FRAMEBUFFER_PLANES,
        }
    }

    /// Pushes pending shape-dependent state to the driver.
    pub(crate) fn resolve_shape(&mut self) {
        if !self.state.shape.is_dirty() {
            return;
        }
        let desired = self.state.desired_shape(self.draw_framebuffer_planes());
        self.state.shape.resolve(desired, self.driver.as_mut());
    }

    /// Clears attachments of the framebuffer bound to `target` whose storage
    /// has never been written, with the configured clear values. The client's
    /// clear values, masks and scissor are restored afterwards.
    pub(crate) fn clear_uncleared_attachments(&mut self, target: u32) {
        let Some(key) = self.state.framebuffer(target) else {
            return;
        };
        let uncleared: Vec<(u32, Attachment)> = {
            let Some(fb) = self.framebuffers.object(key) else {
                return;
            };
            let group = self.group.borrow();
            fb.attachments()
                .filter(|(_, a)| {
                    group
                        .attachment_info(a)
                        .is_some_and(|info| info.defined && !info.cleared)
                })
                .collect()
        };
        if uncleared.is_empty() {
            return;
        }
        let mask = uncleared
            .iter()
            .fold(ClearMask::empty(), |m, (point, _)| m | clear_mask_for_point(*point));
        let is_draw = self.state.draw_framebuffer == Some(key);
        if !is_draw {
            let service = self.framebuffer_service(Some(key));
            self.driver.bind_framebuffer(gl::DRAW_FRAMEBUFFER, service);
        }
        tracing::trace!(?mask, target, "lazily clearing attachments");

        let driver = self.driver.as_mut();
        driver.clear_color(self.config.lazy_clear_color);
        driver.clear_depth(self.config.lazy_clear_depth);
        driver.clear_stencil(self.config.lazy_clear_stencil);
        driver.color_mask([true; 4]);
        driver.depth_mask(true);
        driver.stencil_mask(u32::MAX);
        driver.disable(gl::SCISSOR_TEST);
        driver.clear(mask.bits());

        driver.clear_color(self.state.clear_color);
        driver.clear_depth(self.state.clear_depth);
        driver.clear_stencil(self.state.clear_stencil);
        if self.state.enabled.contains(Capabilities::SCISSOR_TEST) {
            driver.enable(gl::SCISSOR_TEST);
        }
        if !is_draw {
            let current = self.framebuffer_service(self.state.draw_framebuffer);
            self.driver.bind_framebuffer(gl::DRAW_FRAMEBUFFER, current);
        }
        // The masks were overwritten behind the tracker's back.
        self.state.shape.invalidate();
        self.resolve_shape();

        let mut group = self.group.borrow_mut();
        for (_, attachment) in &uncleared {
            group.set_attachment_cleared(attachment);
        }
        self.stats.inc_lazy_clears();
    }
}
