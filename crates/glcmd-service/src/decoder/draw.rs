//! Vertex arrays, attribute state and draw calls.
//!
//! A draw is validated completely before the driver sees it: program,
//! framebuffer completeness, then every enabled attribute the vertices read
//! must fit its buffer. Only then are pending uploads for sampled textures
//! flushed, uncleared images cleared and the emulated attributes (a constant
//! attribute 0, `GL_FIXED` arrays) set up. Emulation is undone after the draw.

use glcmd_protocol::cmd::{
    BindVertexArray, Clear, DeleteVertexArraysImmediate, DisableVertexAttribArray, DrawArrays,
    DrawElements, EnableVertexAttribArray, GenVertexArraysImmediate, GetVertexAttribfv,
    GetVertexAttribiv, VertexAttrib4f, VertexAttribPointer,
};
use glcmd_protocol::gl;

use super::{check_new_ids, immediate_ids, Decoder};
use crate::error::{CommandError, GlError};
use crate::resources::{Attachment, ProgramKey, TextureKey, VertexArray, VertexAttrib};
use crate::state::ClearMask;

const VEC4_BYTES: u32 = 16;

/// Driver buffer holding a constant attribute 0 replicated per vertex.
#[derive(Debug, Default)]
pub(crate) struct Attrib0Cache {
    pub(crate) buffer: Option<u32>,
    /// Vertices the buffer has room for.
    vertices: u32,
    /// Value the buffer is filled with; `None` when it must be refilled.
    value: Option<[f32; 4]>,
}

impl Attrib0Cache {
    pub(crate) fn invalidate(&mut self) {
        self.value = None;
    }
}

#[derive(Clone, Copy, Debug)]
enum DrawKind {
    Arrays { first: u32, count: u32 },
    Elements { count: u32, index_type: u32, offset: u32 },
}

fn is_draw_mode(mode: u32) -> bool {
    (gl::POINTS..=gl::TRIANGLE_FAN).contains(&mode)
}

fn sampler_binding(sampler_type: u32) -> u32 {
    if sampler_type == gl::SAMPLER_CUBE {
        gl::TEXTURE_CUBE_MAP
    } else {
        gl::TEXTURE_2D
    }
}

/// 16.16 fixed point to float.
fn fixed_to_float(bits: [u8; 4]) -> f32 {
    i32::from_le_bytes(bits) as f32 / 65536.0
}

impl Decoder {
    pub(crate) fn handle_gen_vertex_arrays(
        &mut self,
        c: GenVertexArraysImmediate,
        immediate: &[u32],
    ) -> Result<(), CommandError> {
        let ids = immediate_ids(c.n, immediate)?;
        check_new_ids(ids, |id| self.vertex_arrays.contains_client(id))?;
        for &id in ids {
            let service = self.driver.gen_vertex_array();
            self.vertex_arrays
                .create(id, service, VertexArray::new(self.limits.max_vertex_attribs))
                .map_err(|e| CommandError::invalid(e.to_string()))?;
        }
        Ok(())
    }

    pub(crate) fn handle_delete_vertex_arrays(
        &mut self,
        c: DeleteVertexArraysImmediate,
        immediate: &[u32],
    ) -> Result<(), CommandError> {
        let ids = immediate_ids(c.n, immediate)?;
        for &id in ids {
            let Some(key) = self.vertex_arrays.get(id) else {
                continue;
            };
            if self.state.vertex_array == Some(key) {
                self.state.vertex_array = None;
                self.driver.bind_vertex_array(0);
            }
            let Some(dead) = self.vertex_arrays.remove(key) else {
                continue;
            };
            let mut group = self.group.borrow_mut();
            for buffer in dead.object.all_buffer_refs() {
                group.release_buffer(buffer, Some(self.driver.as_mut()));
            }
            self.driver.delete_vertex_array(dead.service_id);
        }
        Ok(())
    }

    pub(crate) fn handle_bind_vertex_array(&mut self, c: BindVertexArray) -> Result<(), CommandError> {
        let key = if c.array == 0 {
            None
        } else {
            match self.vertex_arrays.get(c.array) {
                Some(key) => Some(key),
                None => {
                    return self.gl_error(
                        GlError::InvalidOperation,
                        "glBindVertexArray",
                        "vertex array was not generated",
                    )
                }
            }
        };
        self.state.vertex_array = key;
        let service = key
            .and_then(|k| self.vertex_arrays.service_id(k))
            .unwrap_or(0);
        self.driver.bind_vertex_array(service);
        Ok(())
    }

    fn attrib_index(&mut self, func: &'static str, index: u32) -> Option<u32> {
        if index < self.limits.max_vertex_attribs {
            Some(index)
        } else {
            self.reject(GlError::InvalidValue, func, "index out of range")
        }
    }

    pub(crate) fn handle_enable_vertex_attrib_array(
        &mut self,
        c: EnableVertexAttribArray,
    ) -> Result<(), CommandError> {
        let Some(index) = self.attrib_index("glEnableVertexAttribArray", c.index) else {
            return Ok(());
        };
        if let Some(attrib) = self.current_vertex_array_mut().attrib_mut(index) {
            attrib.enabled = true;
        }
        self.driver.enable_vertex_attrib_array(index);
        Ok(())
    }

    pub(crate) fn handle_disable_vertex_attrib_array(
        &mut self,
        c: DisableVertexAttribArray,
    ) -> Result<(), CommandError> {
        let Some(index) = self.attrib_index("glDisableVertexAttribArray", c.index) else {
            return Ok(());
        };
        if let Some(attrib) = self.current_vertex_array_mut().attrib_mut(index) {
            attrib.enabled = false;
        }
        self.driver.disable_vertex_attrib_array(index);
        Ok(())
    }

    pub(crate) fn handle_vertex_attrib_pointer(
        &mut self,
        c: VertexAttribPointer,
    ) -> Result<(), CommandError> {
        const FUNC: &str = "glVertexAttribPointer";
        let Some(index) = self.attrib_index(FUNC, c.index) else {
            return Ok(());
        };
        if !(1..=4).contains(&c.size) {
            return self.gl_error(GlError::InvalidValue, FUNC, "size must be 1 to 4");
        }
        let Some(type_size) = gl::attrib_type_size(c.attrib_type) else {
            return self.gl_error(GlError::InvalidEnum, FUNC, "invalid type");
        };
        if !(0..=255).contains(&c.stride) {
            return self.gl_error(GlError::InvalidValue, FUNC, "stride out of range");
        }
        let stride = c.stride as u32;
        if c.offset % type_size != 0 || stride % type_size != 0 {
            return self.gl_error(
                GlError::InvalidOperation,
                FUNC,
                "offset or stride not a multiple of the type size",
            );
        }
        let buffer = self.state.array_buffer;
        if buffer.is_none() && c.offset != 0 {
            return self.gl_error(GlError::InvalidValue, FUNC, "client-side arrays are not supported");
        }
        let old = {
            let vao = self.current_vertex_array_mut();
            let Some(attrib) = vao.attrib_mut(index) else {
                return Ok(());
            };
            let old = attrib.buffer;
            *attrib = VertexAttrib {
                enabled: attrib.enabled,
                buffer,
                size: c.size as u32,
                ty: c.attrib_type,
                normalized: c.normalized,
                stride,
                offset: c.offset,
            };
            old
        };
        if old != buffer {
            let mut group = self.group.borrow_mut();
            if let Some(new) = buffer {
                group.buffers.add_ref(new);
            }
            if let Some(old) = old {
                group.release_buffer(old, Some(self.driver.as_mut()));
            }
        }
        // Emulated fixed-point arrays are pointed at converted data per draw.
        if c.attrib_type != gl::FIXED || !self.config.emulate_fixed_attribs {
            self.driver.vertex_attrib_pointer(
                index,
                c.size as u32,
                c.attrib_type,
                c.normalized,
                stride,
                c.offset,
            );
        }
        Ok(())
    }

    pub(crate) fn handle_vertex_attrib_4f(&mut self, c: VertexAttrib4f) -> Result<(), CommandError> {
        let Some(index) = self.attrib_index("glVertexAttrib4f", c.index) else {
            return Ok(());
        };
        let value = [c.x, c.y, c.z, c.w];
        if let Some(slot) = self.state.attrib_values.get_mut(index as usize) {
            *slot = value;
        }
        self.driver.vertex_attrib_4f(index, value);
        Ok(())
    }

    /// Values of `pname` for attribute `index`, or `None` for an unknown
    /// `pname`.
    fn vertex_attrib_values(&self, index: u32, pname: u32) -> Option<Vec<f64>> {
        let attrib = self.current_vertex_array().attrib(index).copied().unwrap_or_default();
        let scalar = |v: u32| Some(vec![f64::from(v)]);
        match pname {
            gl::VERTEX_ATTRIB_ARRAY_ENABLED => scalar(attrib.enabled as u32),
            gl::VERTEX_ATTRIB_ARRAY_SIZE => scalar(attrib.size),
            gl::VERTEX_ATTRIB_ARRAY_STRIDE => scalar(attrib.stride),
            gl::VERTEX_ATTRIB_ARRAY_TYPE => scalar(attrib.ty),
            gl::VERTEX_ATTRIB_ARRAY_NORMALIZED => scalar(attrib.normalized as u32),
            gl::VERTEX_ATTRIB_ARRAY_BUFFER_BINDING => {
                let group = self.group.borrow();
                scalar(attrib.buffer.and_then(|b| group.buffers.client_id(b)).unwrap_or(0))
            }
            gl::CURRENT_VERTEX_ATTRIB => {
                let value = self
                    .state
                    .attrib_values
                    .get(index as usize)
                    .copied()
                    .unwrap_or_default();
                Some(value.iter().map(|v| f64::from(*v)).collect())
            }
            _ => None,
        }
    }

    fn get_vertex_attrib(
        &mut self,
        func: &'static str,
        index: u32,
        pname: u32,
        result: (u32, u32),
    ) -> Result<Option<Vec<f64>>, CommandError> {
        let count = if pname == gl::CURRENT_VERTEX_ATTRIB { 4 } else { 1 };
        self.check_sized_result(result.0, result.1, count * 4)?;
        if self.attrib_index(func, index).is_none() {
            return Ok(None);
        }
        match self.vertex_attrib_values(index, pname) {
            Some(values) => Ok(Some(values)),
            None => {
                self.errors.record(GlError::InvalidEnum, func, "invalid pname");
                Ok(None)
            }
        }
    }

    pub(crate) fn handle_get_vertex_attribfv(
        &mut self,
        c: GetVertexAttribfv,
    ) -> Result<(), CommandError> {
        let result = (c.result_shm_id, c.result_shm_offset);
        let Some(values) = self.get_vertex_attrib("glGetVertexAttribfv", c.index, c.pname, result)?
        else {
            return Ok(());
        };
        let values: Vec<f32> = values.into_iter().map(|v| v as f32).collect();
        self.write_sized_result(c.result_shm_id, c.result_shm_offset, &values)
    }

    pub(crate) fn handle_get_vertex_attribiv(
        &mut self,
        c: GetVertexAttribiv,
    ) -> Result<(), CommandError> {
        let result = (c.result_shm_id, c.result_shm_offset);
        let Some(values) = self.get_vertex_attrib("glGetVertexAttribiv", c.index, c.pname, result)?
        else {
            return Ok(());
        };
        let values: Vec<i32> = values.into_iter().map(|v| v as i32).collect();
        self.write_sized_result(c.result_shm_id, c.result_shm_offset, &values)
    }

    pub(crate) fn handle_clear(&mut self, c: Clear) -> Result<(), CommandError> {
        const FUNC: &str = "glClear";
        let Some(mask) = ClearMask::from_gl(c.mask) else {
            return self.gl_error(GlError::InvalidValue, FUNC, "invalid mask bits");
        };
        if !self.check_framebuffer_complete(FUNC, gl::DRAW_FRAMEBUFFER) {
            return Ok(());
        }
        self.clear_uncleared_attachments(gl::DRAW_FRAMEBUFFER);
        self.resolve_shape();
        self.driver.clear(mask.bits());
        Ok(())
    }

    /// The current program, if it is usable for drawing.
    fn draw_program(&mut self, func: &'static str) -> Option<ProgramKey> {
        let program = self.state.current_program.filter(|key| {
            self.group
                .borrow()
                .programs
                .object(*key)
                .is_some_and(|p| p.linked)
        });
        match program {
            Some(key) => Some(key),
            None => self.reject(GlError::InvalidOperation, func, "no valid program in use"),
        }
    }

    pub(crate) fn handle_draw_arrays(&mut self, c: DrawArrays) -> Result<(), CommandError> {
        const FUNC: &str = "glDrawArrays";
        if !is_draw_mode(c.mode) {
            return self.gl_error(GlError::InvalidEnum, FUNC, "invalid mode");
        }
        if c.first < 0 || c.count < 0 {
            return self.gl_error(GlError::InvalidValue, FUNC, "negative first or count");
        }
        let Some(program) = self.draw_program(FUNC) else {
            return Ok(());
        };
        if !self.check_framebuffer_complete(FUNC, gl::DRAW_FRAMEBUFFER) || c.count == 0 {
            return Ok(());
        }
        let (first, count) = (c.first as u32, c.count as u32);
        let max_vertex = first + (count - 1);
        self.draw(FUNC, program, c.mode, max_vertex, DrawKind::Arrays { first, count });
        Ok(())
    }

    pub(crate) fn handle_draw_elements(&mut self, c: DrawElements) -> Result<(), CommandError> {
        const FUNC: &str = "glDrawElements";
        if !is_draw_mode(c.mode) {
            return self.gl_error(GlError::InvalidEnum, FUNC, "invalid mode");
        }
        if c.count < 0 {
            return self.gl_error(GlError::InvalidValue, FUNC, "negative count");
        }
        let Some(index_size) = gl::index_type_size(c.index_type) else {
            return self.gl_error(GlError::InvalidEnum, FUNC, "invalid index type");
        };
        let Some(program) = self.draw_program(FUNC) else {
            return Ok(());
        };
        if !self.check_framebuffer_complete(FUNC, gl::DRAW_FRAMEBUFFER) || c.count == 0 {
            return Ok(());
        }
        let Some(element_buffer) = self.current_vertex_array().element_buffer else {
            return self.gl_error(GlError::InvalidOperation, FUNC, "no element array buffer bound");
        };
        if c.index_offset % index_size != 0 {
            return self.gl_error(GlError::InvalidOperation, FUNC, "offset not aligned to the index type");
        }
        let count = c.count as u32;
        let max_index = self
            .group
            .borrow_mut()
            .buffers
            .object_mut(element_buffer)
            .and_then(|b| b.max_index(c.index_type, c.index_offset, count));
        let Some(max_vertex) = max_index else {
            return self.gl_error(GlError::InvalidOperation, FUNC, "indices outside the buffer");
        };
        let kind = DrawKind::Elements {
            count,
            index_type: c.index_type,
            offset: c.index_offset,
        };
        self.draw(FUNC, program, c.mode, max_vertex, kind);
        Ok(())
    }

    fn draw(&mut self, func: &'static str, program: ProgramKey, mode: u32, max_vertex: u32, kind: DrawKind) {
        if !self.prepare_draw(func, program, max_vertex) {
            self.stats.inc_draws_rejected();
            return;
        }
        let Some(attrib0) = self.simulate_attrib0(func, program, max_vertex) else {
            self.stats.inc_draws_rejected();
            return;
        };
        let Some(fixed) = self.simulate_fixed_attribs(func, program, max_vertex) else {
            if attrib0 {
                self.restore_attrib_pointers(&[0]);
            }
            self.stats.inc_draws_rejected();
            return;
        };

        match kind {
            DrawKind::Arrays { first, count } => self.driver.draw_arrays(mode, first, count),
            DrawKind::Elements {
                count,
                index_type,
                offset,
            } => self.driver.draw_elements(mode, count, index_type, offset),
        }
        self.stats.inc_draws();

        let mut restore = fixed;
        if attrib0 {
            restore.push(0);
        }
        if !restore.is_empty() {
            self.restore_attrib_pointers(&restore);
        }
    }

    /// Validation and lazy work shared by every draw. Returns `false` after
    /// recording an error.
    fn prepare_draw(&mut self, func: &'static str, program: ProgramKey, max_vertex: u32) -> bool {
        if let Err(msg) = self.check_attrib_coverage(program, max_vertex) {
            self.errors.record(GlError::InvalidOperation, func, &msg);
            return false;
        }
        let sampled = self.sampled_textures(program);
        if self.renders_to_sampled_texture(&sampled) {
            self.errors.record(
                GlError::InvalidOperation,
                func,
                "texture is both sampled and a render target",
            );
            return false;
        }
        for &texture in &sampled {
            self.complete_uploads_through(texture);
            if !self.clear_texture(texture) {
                self.errors
                    .record(GlError::OutOfMemory, func, "cannot clear a sampled texture");
                return false;
            }
        }
        self.clear_uncleared_attachments(gl::DRAW_FRAMEBUFFER);
        self.resolve_shape();
        true
    }

    /// Every enabled attribute array the program reads must supply vertices
    /// `0..=max_vertex`.
    fn check_attrib_coverage(&self, program: ProgramKey, max_vertex: u32) -> Result<(), String> {
        let group = self.group.borrow();
        let program = group.programs.object(program);
        for (index, attrib) in self.current_vertex_array().attribs.iter().enumerate() {
            if !attrib.enabled || !program.is_some_and(|p| p.uses_attrib(index as u32)) {
                continue;
            }
            let Some(buffer) = attrib.buffer.and_then(|b| group.buffers.object(b)) else {
                return Err(format!("attribute {index} is enabled but has no buffer"));
            };
            if !attrib.can_access(max_vertex, buffer.size()) {
                return Err(format!(
                    "attribute {index} reads past the end of its buffer at vertex {max_vertex}"
                ));
            }
        }
        Ok(())
    }

    fn sampled_textures(&self, program: ProgramKey) -> Vec<TextureKey> {
        let group = self.group.borrow();
        let Some(program) = group.programs.object(program) else {
            return Vec::new();
        };
        let mut textures: Vec<TextureKey> = Vec::new();
        for (sampler_type, unit) in program.samplers() {
            let bound = self
                .state
                .texture_units
                .get(unit as usize)
                .and_then(|u| u.binding(sampler_binding(sampler_type)));
            if let Some(texture) = bound {
                if !textures.contains(&texture) {
                    textures.push(texture);
                }
            }
        }
        textures
    }

    fn renders_to_sampled_texture(&self, sampled: &[TextureKey]) -> bool {
        let Some(fb) = self
            .state
            .draw_framebuffer
            .and_then(|key| self.framebuffers.object(key))
        else {
            return false;
        };
        fb.attachments().any(|(_, attachment)| {
            matches!(attachment, Attachment::Texture { texture, .. } if sampled.contains(&texture))
        })
    }

    fn array_buffer_service(&self) -> u32 {
        self.state
            .array_buffer
            .and_then(|key| self.group.borrow().buffers.service_id(key))
            .unwrap_or(0)
    }

    /// Points attribute 0 at a buffer holding its constant value when the
    /// client has no array enabled there. `Some(true)` when the driver state
    /// must be restored after the draw; `None` after recording an error.
    fn simulate_attrib0(&mut self, func: &'static str, program: ProgramKey, max_vertex: u32) -> Option<bool> {
        if !self.config.emulate_attrib0 {
            return Some(false);
        }
        let enabled = self.current_vertex_array().attrib(0).is_some_and(|a| a.enabled);
        let used = self
            .group
            .borrow()
            .programs
            .object(program)
            .is_some_and(|p| p.uses_attrib(0));
        if enabled && used {
            return Some(false);
        }
        let vertices = max_vertex.checked_add(1);
        let size = vertices.and_then(|v| v.checked_mul(VEC4_BYTES));
        let (Some(vertices), Some(size)) = (vertices, size) else {
            return self.reject(GlError::OutOfMemory, func, "emulating attribute 0");
        };
        if size > self.config.max_attrib0_bytes {
            return self.reject(GlError::OutOfMemory, func, "emulating attribute 0");
        }

        let service = match self.attrib0.buffer {
            Some(id) => id,
            None => {
                let id = self.driver.gen_buffer();
                self.attrib0.buffer = Some(id);
                id
            }
        };
        self.driver.bind_buffer(gl::ARRAY_BUFFER, service);
        let grow = vertices > self.attrib0.vertices;
        if grow {
            self.driver
                .buffer_data(gl::ARRAY_BUFFER, size as usize, None, gl::DYNAMIC_DRAW);
            if !self.allocation_succeeded() {
                self.attrib0 = Attrib0Cache {
                    buffer: self.attrib0.buffer,
                    ..Default::default()
                };
                let array_buffer = self.array_buffer_service();
                self.driver.bind_buffer(gl::ARRAY_BUFFER, array_buffer);
                return self.reject(GlError::OutOfMemory, func, "emulating attribute 0");
            }
            self.attrib0.vertices = vertices;
            self.attrib0.value = None;
        }

        let value = self.state.attrib_values.first().copied().unwrap_or([0.0, 0.0, 0.0, 1.0]);
        if grow || (used && self.attrib0.value != Some(value)) {
            let mut data = Vec::new();
            let bytes = self.attrib0.vertices as usize * VEC4_BYTES as usize;
            if data.try_reserve_exact(bytes).is_err() {
                let array_buffer = self.array_buffer_service();
                self.driver.bind_buffer(gl::ARRAY_BUFFER, array_buffer);
                return self.reject(GlError::OutOfMemory, func, "emulating attribute 0");
            }
            let vertex: Vec<u8> = value.iter().flat_map(|v| v.to_le_bytes()).collect();
            for _ in 0..self.attrib0.vertices {
                data.extend_from_slice(&vertex);
            }
            self.driver.buffer_sub_data(gl::ARRAY_BUFFER, 0, &data);
            self.attrib0.value = Some(value);
            self.stats.inc_attrib0_emulations();
        } else {
            self.stats.inc_attrib0_cache_hits();
        }
        self.driver
            .vertex_attrib_pointer(0, 4, gl::FLOAT, false, 0, 0);
        if !enabled {
            self.driver.enable_vertex_attrib_array(0);
        }
        Some(true)
    }

    /// Converts every enabled `GL_FIXED` array the program reads to floats in
    /// a scratch buffer. Returns the attributes to restore after the draw.
    fn simulate_fixed_attribs(
        &mut self,
        func: &'static str,
        program: ProgramKey,
        max_vertex: u32,
    ) -> Option<Vec<u32>> {
        if !self.config.emulate_fixed_attribs {
            return Some(Vec::new());
        }
        let fixed: Vec<(u32, VertexAttrib)> = {
            let group = self.group.borrow();
            let program = group.programs.object(program);
            self.current_vertex_array()
                .attribs
                .iter()
                .enumerate()
                .filter(|(i, a)| {
                    a.enabled && a.ty == gl::FIXED && program.is_some_and(|p| p.uses_attrib(*i as u32))
                })
                .map(|(i, a)| (i as u32, *a))
                .collect()
        };
        if fixed.is_empty() {
            return Some(Vec::new());
        }

        let vertices = u64::from(max_vertex) + 1;
        let total: u64 = fixed
            .iter()
            .map(|(_, a)| vertices * u64::from(a.size) * 4)
            .sum();
        if total > u64::from(self.config.max_fixed_attrib_bytes) {
            return self.reject(GlError::OutOfMemory, func, "converting fixed-point attributes");
        }
        let mut converted = Vec::new();
        if converted.try_reserve_exact(total as usize).is_err() {
            return self.reject(GlError::OutOfMemory, func, "converting fixed-point attributes");
        }
        let mut placements = Vec::with_capacity(fixed.len());
        {
            let group = self.group.borrow();
            for (index, attrib) in &fixed {
                let Some(src) = attrib.buffer.and_then(|b| group.buffers.object(b)) else {
                    continue;
                };
                let src = src.data();
                placements.push((*index, attrib.size, converted.len() as u32));
                for vertex in 0..vertices as usize {
                    let start = attrib.offset as usize + vertex * attrib.real_stride() as usize;
                    for component in 0..attrib.size as usize {
                        let at = start + component * 4;
                        let bits = src
                            .get(at..at + 4)
                            .and_then(|b| <[u8; 4]>::try_from(b).ok())
                            .unwrap_or_default();
                        converted.extend_from_slice(&fixed_to_float(bits).to_le_bytes());
                    }
                }
            }
        }

        let service = match self.fixed_attrib_buffer {
            Some(id) => id,
            None => {
                let id = self.driver.gen_buffer();
                self.fixed_attrib_buffer = Some(id);
                id
            }
        };
        self.driver.bind_buffer(gl::ARRAY_BUFFER, service);
        self.driver
            .buffer_data(gl::ARRAY_BUFFER, converted.len(), Some(&converted), gl::STREAM_DRAW);
        if !self.allocation_succeeded() {
            let array_buffer = self.array_buffer_service();
            self.driver.bind_buffer(gl::ARRAY_BUFFER, array_buffer);
            return self.reject(GlError::OutOfMemory, func, "converting fixed-point attributes");
        }
        for &(index, size, offset) in &placements {
            self.driver
                .vertex_attrib_pointer(index, size, gl::FLOAT, false, 0, offset);
        }
        self.stats.inc_fixed_attrib_conversions();
        Some(placements.into_iter().map(|(index, _, _)| index).collect())
    }

    /// Puts the client's pointers for `indices` back into the driver and
    /// rebinds the client's `ARRAY_BUFFER`.
    fn restore_attrib_pointers(&mut self, indices: &[u32]) {
        for &index in indices {
            let Some(attrib) = self.current_vertex_array().attrib(index).copied() else {
                continue;
            };
            let service = attrib
                .buffer
                .and_then(|b| self.group.borrow().buffers.service_id(b))
                .unwrap_or(0);
            self.driver.bind_buffer(gl::ARRAY_BUFFER, service);
            if attrib.ty != gl::FIXED || !self.config.emulate_fixed_attribs {
                self.driver.vertex_attrib_pointer(
                    index,
                    attrib.size,
                    attrib.ty,
                    attrib.normalized,
                    attrib.stride,
                    attrib.offset,
                );
            }
            if !attrib.enabled {
                self.driver.disable_vertex_attrib_array(index);
            }
        }
        let array_buffer = self.array_buffer_service();
        self.driver.bind_buffer(gl::ARRAY_BUFFER, array_buffer);
    }
}
