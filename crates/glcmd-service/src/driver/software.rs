//! In-memory reference driver.
//!
//! Keeps just enough GL state to answer the decoder's queries and to let tests
//! observe what reached the driver: object tables, texture and renderbuffer
//! pixels (clears and uploads are applied, draws are recorded but not
//! rasterised), the draw-call log and per-entry-point call counts.
//!
//! `SoftwareDriver` is a cheap handle; clones share the same state, so a test
//! can hand one clone to the decoder and inspect the other.

use std::cell::RefCell;
use std::rc::Rc;

use glcmd_protocol::gl;
use hashbrown::HashMap;

use super::{
    ActiveVariable, CompileOutput, Driver, FenceId, GlImage, LinkOutput, ResetStatus,
    ShaderVariable,
};
use crate::config::DriverLimits;

/// Attribute state captured at draw time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttribSnapshot {
    pub index: u32,
    pub buffer: u32,
    pub size: u32,
    pub ty: u32,
    pub normalized: bool,
    pub stride: u32,
    pub offset: u32,
    /// Contents of `buffer` when the draw was issued.
    pub buffer_data: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DrawCall {
    pub mode: u32,
    pub first: u32,
    pub count: u32,
    pub index_type: Option<u32>,
    pub index_offset: u32,
    pub program: u32,
    pub framebuffer: u32,
    /// Enabled attribute arrays, ordered by index.
    pub attribs: Vec<AttribSnapshot>,
}

/// Number of live driver objects per kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LiveObjects {
    pub buffers: usize,
    pub textures: usize,
    pub renderbuffers: usize,
    pub framebuffers: usize,
    pub shaders: usize,
    pub programs: usize,
    pub queries: usize,
    pub vertex_arrays: usize,
}

#[derive(Clone, Debug, Default, PartialEq)]
struct Image {
    width: u32,
    height: u32,
    bpp: u32,
    data: Vec<u8>,
}

impl Image {
    fn new(width: u32, height: u32, bpp: u32) -> Self {
        let len = width as usize * height as usize * bpp as usize;
        Self {
            width,
            height,
            bpp,
            data: vec![0; len],
        }
    }

    fn pixel_mut(&mut self, x: u32, y: u32) -> &mut [u8] {
        let bpp = self.bpp as usize;
        let start = (y as usize * self.width as usize + x as usize) * bpp;
        &mut self.data[start..start + bpp]
    }

    fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let bpp = self.bpp as usize;
        let start = (y as usize * self.width as usize + x as usize) * bpp;
        &self.data[start..start + bpp]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Attachment {
    Texture { id: u32, target: u32, level: u32 },
    Renderbuffer(u32),
}

#[derive(Clone, Debug, Default)]
struct Attrib {
    enabled: bool,
    buffer: u32,
    size: u32,
    ty: u32,
    normalized: bool,
    stride: u32,
    offset: u32,
}

#[derive(Clone, Debug, Default)]
struct VertexArray {
    attribs: Vec<Attrib>,
    element_buffer: u32,
}

#[derive(Clone, Debug)]
struct Shader {
    ty: u32,
    compiled: Option<CompileOutput>,
}

#[derive(Clone, Debug, Default)]
struct Program {
    shaders: Vec<u32>,
    bindings: HashMap<String, u32>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum UniformValue {
    Int(Vec<i32>),
    Float(Vec<f32>),
}

#[derive(Clone, Debug, Default)]
struct Query {
    samples_passed: bool,
    result: Option<u64>,
}

#[derive(Debug)]
struct State {
    limits: DriverLimits,
    next_id: u32,
    errors: Vec<u32>,
    reset: ResetStatus,
    make_current_fails: bool,
    fail_next_allocation: bool,
    force_unsupported: bool,
    calls: HashMap<&'static str, usize>,
    draws: Vec<DrawCall>,

    buffers: HashMap<u32, Vec<u8>>,
    bound_array_buffer: u32,

    textures: HashMap<u32, HashMap<(u32, u32), Image>>,
    active_unit: u32,
    unit_bindings: HashMap<(u32, u32), u32>,
    pack_alignment: u32,
    unpack_alignment: u32,

    renderbuffers: HashMap<u32, Image>,
    bound_renderbuffer: u32,

    framebuffers: HashMap<u32, HashMap<u32, Attachment>>,
    draw_framebuffer: u32,
    read_framebuffer: u32,
    surface: Image,

    shaders: HashMap<u32, Shader>,
    programs: HashMap<u32, Program>,
    current_program: u32,
    uniforms: HashMap<(u32, i32), UniformValue>,

    vertex_arrays: HashMap<u32, VertexArray>,
    bound_vertex_array: u32,
    attrib_values: HashMap<u32, [f32; 4]>,

    caps: HashMap<u32, bool>,
    clear_color: [f32; 4],
    clear_depth: f32,
    clear_stencil: i32,
    color_mask: [bool; 4],
    depth_mask: bool,
    stencil_mask: u32,
    scissor: [i32; 4],
    viewport: [i32; 4],

    queries: HashMap<u32, Query>,
    active_queries: HashMap<u32, u32>,

    next_fence: FenceId,
    fence_latency: u32,
    fences: HashMap<FenceId, u32>,
}

impl State {
    fn new(width: u32, height: u32, limits: DriverLimits) -> Self {
        let mut vertex_arrays = HashMap::new();
        vertex_arrays.insert(
            0,
            VertexArray {
                attribs: vec![Attrib::default(); limits.max_vertex_attribs as usize],
                element_buffer: 0,
            },
        );
        let mut caps = HashMap::new();
        caps.insert(gl::DITHER, true);
        Self {
            limits,
            next_id: 1,
            errors: Vec::new(),
            reset: ResetStatus::NoError,
            make_current_fails: false,
            fail_next_allocation: false,
            force_unsupported: false,
            calls: HashMap::new(),
            draws: Vec::new(),
            buffers: HashMap::new(),
            bound_array_buffer: 0,
            textures: HashMap::new(),
            active_unit: 0,
            unit_bindings: HashMap::new(),
            pack_alignment: 4,
            unpack_alignment: 4,
            renderbuffers: HashMap::new(),
            bound_renderbuffer: 0,
            framebuffers: HashMap::new(),
            draw_framebuffer: 0,
            read_framebuffer: 0,
            surface: Image::new(width, height, 4),
            shaders: HashMap::new(),
            programs: HashMap::new(),
            current_program: 0,
            uniforms: HashMap::new(),
            vertex_arrays,
            bound_vertex_array: 0,
            attrib_values: HashMap::new(),
            caps,
            clear_color: [0.0; 4],
            clear_depth: 1.0,
            clear_stencil: 0,
            color_mask: [true; 4],
            depth_mask: true,
            stencil_mask: u32::MAX,
            scissor: [0, 0, width as i32, height as i32],
            viewport: [0, 0, width as i32, height as i32],
            queries: HashMap::new(),
            active_queries: HashMap::new(),
            next_fence: 1,
            fence_latency: 0,
            fences: HashMap::new(),
        }
    }

    fn log(&mut self, name: &'static str) {
        *self.calls.entry(name).or_default() += 1;
    }

    fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Consumes an injected allocation failure.
    fn allocation_fails(&mut self) -> bool {
        if std::mem::take(&mut self.fail_next_allocation) {
            self.errors.push(gl::OUT_OF_MEMORY);
            return true;
        }
        false
    }

    fn vertex_array(&mut self) -> &mut VertexArray {
        let max = self.limits.max_vertex_attribs as usize;
        let vao = self.vertex_arrays.entry(self.bound_vertex_array).or_default();
        if vao.attribs.len() < max {
            vao.attribs.resize(max, Attrib::default());
        }
        vao
    }

    fn bound_texture(&self, target: u32) -> u32 {
        let binding = gl::texture_binding_target(target).unwrap_or(target);
        self.unit_bindings
            .get(&(self.active_unit, binding))
            .copied()
            .unwrap_or(0)
    }

    fn framebuffer_for(&self, target: u32) -> u32 {
        if target == gl::READ_FRAMEBUFFER {
            self.read_framebuffer
        } else {
            self.draw_framebuffer
        }
    }

    fn attachment_image_mut(&mut self, attachment: Attachment) -> Option<&mut Image> {
        match attachment {
            Attachment::Texture { id, target, level } => {
                self.textures.get_mut(&id)?.get_mut(&(target, level))
            }
            Attachment::Renderbuffer(id) => self.renderbuffers.get_mut(&id),
        }
    }

    fn attachment_image(&self, attachment: Attachment) -> Option<&Image> {
        match attachment {
            Attachment::Texture { id, target, level } => {
                self.textures.get(&id)?.get(&(target, level))
            }
            Attachment::Renderbuffer(id) => self.renderbuffers.get(&id),
        }
    }

    fn color_image_mut(&mut self, fb: u32) -> Option<&mut Image> {
        if fb == 0 {
            return Some(&mut self.surface);
        }
        let attachment = *self.framebuffers.get(&fb)?.get(&gl::COLOR_ATTACHMENT0)?;
        self.attachment_image_mut(attachment)
    }

    fn color_image(&self, fb: u32) -> Option<&Image> {
        if fb == 0 {
            return Some(&self.surface);
        }
        let attachment = *self.framebuffers.get(&fb)?.get(&gl::COLOR_ATTACHMENT0)?;
        self.attachment_image(attachment)
    }

    fn cap(&self, cap: u32) -> bool {
        self.caps.get(&cap).copied().unwrap_or(false)
    }
}

fn row_stride(width: u32, bpp: u32, alignment: u32) -> usize {
    let unpadded = width as usize * bpp as usize;
    let alignment = alignment.max(1) as usize;
    unpadded.div_ceil(alignment) * alignment
}

fn to_unorm8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn glsl_type(name: &str) -> Option<u32> {
    Some(match name {
        "float" => gl::FLOAT,
        "vec2" => gl::FLOAT_VEC2,
        "vec3" => gl::FLOAT_VEC3,
        "vec4" => gl::FLOAT_VEC4,
        "int" => gl::INT,
        "ivec2" => gl::INT_VEC2,
        "mat4" => gl::FLOAT_MAT4,
        "sampler2D" => gl::SAMPLER_2D,
        "samplerCube" => gl::SAMPLER_CUBE,
        _ => return None,
    })
}

/// Collects `attribute`/`uniform` declarations. Only simple one-variable
/// declarations are recognised.
fn scan_declarations(source: &str, shader_type: u32) -> (Vec<ShaderVariable>, Vec<ShaderVariable>) {
    let mut attribs = Vec::new();
    let mut uniforms = Vec::new();
    for statement in source.split([';', '{', '}']) {
        let tokens: Vec<&str> = statement
            .split_whitespace()
            .filter(|t| !matches!(*t, "lowp" | "mediump" | "highp"))
            .collect();
        let [qualifier, ty, name] = tokens.as_slice() else {
            continue;
        };
        let Some(ty) = glsl_type(ty) else {
            continue;
        };
        let name = name.split('[').next().unwrap_or(name).to_string();
        match *qualifier {
            "attribute" | "in" if shader_type == gl::VERTEX_SHADER => {
                attribs.push(ShaderVariable { name, ty })
            }
            "uniform" => uniforms.push(ShaderVariable { name, ty }),
            _ => {}
        }
    }
    (attribs, uniforms)
}

/// Reference [`Driver`] backed by plain memory.
#[derive(Clone)]
pub struct SoftwareDriver {
    state: Rc<RefCell<State>>,
}

impl std::fmt::Debug for SoftwareDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("SoftwareDriver")
            .field("surface", &(state.surface.width, state.surface.height))
            .field("draws", &state.draws.len())
            .field("reset", &state.reset)
            .finish()
    }
}

impl Default for SoftwareDriver {
    fn default() -> Self {
        Self::new(64, 64)
    }
}

impl SoftwareDriver {
    /// Creates a driver whose default framebuffer is a `width`x`height` RGBA8 surface.
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_limits(width, height, DriverLimits::default())
    }

    pub fn with_limits(width: u32, height: u32, limits: DriverLimits) -> Self {
        Self {
            state: Rc::new(RefCell::new(State::new(width, height, limits))),
        }
    }

    /* ----------------------------- Fault injection ---------------------------- */

    pub fn set_reset_status(&self, status: ResetStatus) {
        self.state.borrow_mut().reset = status;
    }

    pub fn set_make_current_fails(&self, fails: bool) {
        self.state.borrow_mut().make_current_fails = fails;
    }

    /// Queues an error returned by the next `get_error`.
    pub fn inject_error(&self, code: u32) {
        self.state.borrow_mut().errors.push(code);
    }

    /// Makes the next storage allocation fail with `GL_OUT_OF_MEMORY`.
    pub fn fail_next_allocation(&self) {
        self.state.borrow_mut().fail_next_allocation = true;
    }

    /// Number of `fence_signaled` polls a new fence stays unsignalled for.
    pub fn set_fence_latency(&self, polls: u32) {
        self.state.borrow_mut().fence_latency = polls;
    }

    /// Makes `check_framebuffer_status` report `FRAMEBUFFER_UNSUPPORTED`.
    pub fn set_framebuffer_unsupported(&self, unsupported: bool) {
        self.state.borrow_mut().force_unsupported = unsupported;
    }

    /* ------------------------------- Inspection ------------------------------- */

    pub fn draw_calls(&self) -> Vec<DrawCall> {
        self.state.borrow().draws.clone()
    }

    pub fn call_count(&self, entry_point: &str) -> usize {
        self.state
            .borrow()
            .calls
            .get(entry_point)
            .copied()
            .unwrap_or(0)
    }

    pub fn reset_call_counts(&self) {
        self.state.borrow_mut().calls.clear();
    }

    pub fn live_objects(&self) -> LiveObjects {
        let s = self.state.borrow();
        LiveObjects {
            buffers: s.buffers.len(),
            textures: s.textures.len(),
            renderbuffers: s.renderbuffers.len(),
            framebuffers: s.framebuffers.len(),
            shaders: s.shaders.len(),
            programs: s.programs.len(),
            queries: s.queries.len(),
            vertex_arrays: s.vertex_arrays.len().saturating_sub(1),
        }
    }

    pub fn buffer_contents(&self, id: u32) -> Option<Vec<u8>> {
        self.state.borrow().buffers.get(&id).cloned()
    }

    /// Tightly packed pixels of one texture level.
    pub fn texture_level(&self, id: u32, target: u32, level: u32) -> Option<Vec<u8>> {
        let s = self.state.borrow();
        Some(s.textures.get(&id)?.get(&(target, level))?.data.clone())
    }

    pub fn is_enabled(&self, cap: u32) -> bool {
        self.state.borrow().cap(cap)
    }

    pub fn clear_color_value(&self) -> [f32; 4] {
        self.state.borrow().clear_color
    }

    pub fn color_mask_value(&self) -> [bool; 4] {
        self.state.borrow().color_mask
    }

    pub fn depth_mask_value(&self) -> bool {
        self.state.borrow().depth_mask
    }

    pub fn scissor_value(&self) -> [i32; 4] {
        self.state.borrow().scissor
    }

    pub fn uniform(&self, program: u32, location: i32) -> Option<UniformValue> {
        self.state.borrow().uniforms.get(&(program, location)).cloned()
    }
}

impl Driver for SoftwareDriver {
    fn limits(&self) -> DriverLimits {
        self.state.borrow().limits
    }

    fn surface_size(&self) -> (u32, u32) {
        let s = self.state.borrow();
        (s.surface.width, s.surface.height)
    }

    fn make_current(&mut self) -> bool {
        let mut s = self.state.borrow_mut();
        s.log("make_current");
        !s.make_current_fails
    }

    fn reset_status(&mut self) -> ResetStatus {
        self.state.borrow().reset
    }

    fn get_error(&mut self) -> u32 {
        let mut s = self.state.borrow_mut();
        if s.errors.is_empty() {
            gl::NO_ERROR
        } else {
            s.errors.remove(0)
        }
    }

    fn flush(&mut self) {
        self.state.borrow_mut().log("flush");
    }

    fn finish(&mut self) {
        let mut s = self.state.borrow_mut();
        s.log("finish");
        for remaining in s.fences.values_mut() {
            *remaining = 0;
        }
    }

    fn gen_buffer(&mut self) -> u32 {
        let mut s = self.state.borrow_mut();
        let id = s.alloc_id();
        s.buffers.insert(id, Vec::new());
        id
    }

    fn delete_buffer(&mut self, id: u32) {
        let mut s = self.state.borrow_mut();
        s.log("delete_buffer");
        s.buffers.remove(&id);
        if s.bound_array_buffer == id {
            s.bound_array_buffer = 0;
        }
    }

    fn bind_buffer(&mut self, target: u32, id: u32) {
        let mut s = self.state.borrow_mut();
        s.log("bind_buffer");
        if target == gl::ELEMENT_ARRAY_BUFFER {
            s.vertex_array().element_buffer = id;
        } else {
            s.bound_array_buffer = id;
        }
    }

    fn buffer_data(&mut self, target: u32, size: usize, data: Option<&[u8]>, _usage: u32) {
        let mut s = self.state.borrow_mut();
        s.log("buffer_data");
        if s.allocation_fails() {
            return;
        }
        let id = if target == gl::ELEMENT_ARRAY_BUFFER {
            s.vertex_array().element_buffer
        } else {
            s.bound_array_buffer
        };
        let contents = match data {
            Some(data) => data[..size.min(data.len())].to_vec(),
            None => vec![0; size],
        };
        if let Some(buffer) = s.buffers.get_mut(&id) {
            *buffer = contents;
        }
    }

    fn buffer_sub_data(&mut self, target: u32, offset: usize, data: &[u8]) {
        let mut s = self.state.borrow_mut();
        s.log("buffer_sub_data");
        let id = if target == gl::ELEMENT_ARRAY_BUFFER {
            s.vertex_array().element_buffer
        } else {
            s.bound_array_buffer
        };
        if let Some(dst) = s
            .buffers
            .get_mut(&id)
            .and_then(|b| b.get_mut(offset..offset + data.len()))
        {
            dst.copy_from_slice(data);
        }
    }

    fn gen_texture(&mut self) -> u32 {
        let mut s = self.state.borrow_mut();
        let id = s.alloc_id();
        s.textures.insert(id, HashMap::new());
        id
    }

    fn delete_texture(&mut self, id: u32) {
        let mut s = self.state.borrow_mut();
        s.log("delete_texture");
        s.textures.remove(&id);
        s.unit_bindings.retain(|_, bound| *bound != id);
    }

    fn active_texture(&mut self, unit: u32) {
        let mut s = self.state.borrow_mut();
        s.log("active_texture");
        s.active_unit = unit;
    }

    fn bind_texture(&mut self, target: u32, id: u32) {
        let mut s = self.state.borrow_mut();
        s.log("bind_texture");
        let unit = s.active_unit;
        s.unit_bindings.insert((unit, target), id);
    }

    fn tex_image_2d(
        &mut self,
        target: u32,
        level: u32,
        _internal_format: u32,
        width: u32,
        height: u32,
        format: u32,
        ty: u32,
        pixels: Option<&[u8]>,
    ) {
        let mut s = self.state.borrow_mut();
        s.log("tex_image_2d");
        if s.allocation_fails() {
            return;
        }
        let id = s.bound_texture(target);
        let bpp = gl::bytes_per_pixel(format, ty).unwrap_or(4);
        let mut image = Image::new(width, height, bpp);
        if let Some(pixels) = pixels {
            let stride = row_stride(width, bpp, s.unpack_alignment);
            let row = width as usize * bpp as usize;
            for y in 0..height as usize {
                let src = pixels.get(y * stride..y * stride + row);
                if let Some(src) = src {
                    image.data[y * row..(y + 1) * row].copy_from_slice(src);
                }
            }
        }
        if let Some(levels) = s.textures.get_mut(&id) {
            levels.insert((target, level), image);
        }
    }

    fn tex_sub_image_2d(
        &mut self,
        target: u32,
        level: u32,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        _format: u32,
        _ty: u32,
        pixels: &[u8],
    ) {
        let mut s = self.state.borrow_mut();
        s.log("tex_sub_image_2d");
        let id = s.bound_texture(target);
        let alignment = s.unpack_alignment;
        let Some(image) = s
            .textures
            .get_mut(&id)
            .and_then(|levels| levels.get_mut(&(target, level)))
        else {
            return;
        };
        let bpp = image.bpp as usize;
        let stride = row_stride(width, image.bpp, alignment);
        for row in 0..height {
            for col in 0..width {
                let (dx, dy) = (x + col, y + row);
                if dx >= image.width || dy >= image.height {
                    continue;
                }
                let src_start = row as usize * stride + col as usize * bpp;
                if let Some(src) = pixels.get(src_start..src_start + bpp) {
                    image.pixel_mut(dx, dy).copy_from_slice(src);
                }
            }
        }
    }

    fn tex_storage_2d(
        &mut self,
        target: u32,
        levels: u32,
        internal_format: u32,
        width: u32,
        height: u32,
    ) {
        let mut s = self.state.borrow_mut();
        s.log("tex_storage_2d");
        if s.allocation_fails() {
            return;
        }
        let id = s.bound_texture(target);
        let bpp = gl::sized_texture_format(internal_format)
            .and_then(|(format, ty)| gl::bytes_per_pixel(format, ty))
            .unwrap_or(4);
        let faces: Vec<u32> = if target == gl::TEXTURE_CUBE_MAP {
            gl::CUBE_MAP_FACES.to_vec()
        } else {
            vec![target]
        };
        let Some(tex) = s.textures.get_mut(&id) else {
            return;
        };
        for face in faces {
            for level in 0..levels {
                let w = (width >> level).max(1);
                let h = (height >> level).max(1);
                tex.insert((face, level), Image::new(w, h, bpp));
            }
        }
    }

    fn tex_parameter_i(&mut self, _target: u32, _pname: u32, _param: i32) {
        self.state.borrow_mut().log("tex_parameter_i");
    }

    fn bind_tex_image(&mut self, target: u32, image: &dyn GlImage) -> bool {
        let mut s = self.state.borrow_mut();
        s.log("bind_tex_image");
        let Some(pixels) = image.read_pixels() else {
            return false;
        };
        let (width, height) = image.size();
        let id = s.bound_texture(target);
        let mut level = Image::new(width, height, 4);
        let len = level.data.len().min(pixels.len());
        level.data[..len].copy_from_slice(&pixels[..len]);
        match s.textures.get_mut(&id) {
            Some(tex) => {
                tex.insert((target, 0), level);
                true
            }
            None => false,
        }
    }

    fn release_tex_image(&mut self, target: u32, _image: &dyn GlImage) {
        let mut s = self.state.borrow_mut();
        s.log("release_tex_image");
        let id = s.bound_texture(target);
        if let Some(tex) = s.textures.get_mut(&id) {
            tex.remove(&(target, 0));
        }
    }

    fn pixel_store_i(&mut self, pname: u32, param: i32) {
        let mut s = self.state.borrow_mut();
        s.log("pixel_store_i");
        match pname {
            gl::PACK_ALIGNMENT => s.pack_alignment = param as u32,
            gl::UNPACK_ALIGNMENT => s.unpack_alignment = param as u32,
            _ => {}
        }
    }

    fn gen_renderbuffer(&mut self) -> u32 {
        let mut s = self.state.borrow_mut();
        let id = s.alloc_id();
        s.renderbuffers.insert(id, Image::default());
        id
    }

    fn delete_renderbuffer(&mut self, id: u32) {
        let mut s = self.state.borrow_mut();
        s.log("delete_renderbuffer");
        s.renderbuffers.remove(&id);
    }

    fn bind_renderbuffer(&mut self, _target: u32, id: u32) {
        let mut s = self.state.borrow_mut();
        s.log("bind_renderbuffer");
        s.bound_renderbuffer = id;
    }

    fn renderbuffer_storage(
        &mut self,
        _target: u32,
        _samples: u32,
        internal_format: u32,
        width: u32,
        height: u32,
    ) {
        let mut s = self.state.borrow_mut();
        s.log("renderbuffer_storage");
        if s.allocation_fails() {
            return;
        }
        let bpp = gl::renderbuffer_bytes_per_pixel(internal_format).unwrap_or(4);
        let id = s.bound_renderbuffer;
        if let Some(rb) = s.renderbuffers.get_mut(&id) {
            *rb = Image::new(width, height, bpp);
        }
    }

    fn gen_framebuffer(&mut self) -> u32 {
        let mut s = self.state.borrow_mut();
        let id = s.alloc_id();
        s.framebuffers.insert(id, HashMap::new());
        id
    }

    fn delete_framebuffer(&mut self, id: u32) {
        let mut s = self.state.borrow_mut();
        s.log("delete_framebuffer");
        s.framebuffers.remove(&id);
        if s.draw_framebuffer == id {
            s.draw_framebuffer = 0;
        }
        if s.read_framebuffer == id {
            s.read_framebuffer = 0;
        }
    }

    fn bind_framebuffer(&mut self, target: u32, id: u32) {
        let mut s = self.state.borrow_mut();
        s.log("bind_framebuffer");
        match target {
            gl::READ_FRAMEBUFFER => s.read_framebuffer = id,
            gl::DRAW_FRAMEBUFFER => s.draw_framebuffer = id,
            _ => {
                s.read_framebuffer = id;
                s.draw_framebuffer = id;
            }
        }
    }

    fn framebuffer_texture_2d(
        &mut self,
        target: u32,
        attachment: u32,
        textarget: u32,
        texture: u32,
        level: u32,
    ) {
        let mut s = self.state.borrow_mut();
        s.log("framebuffer_texture_2d");
        let fb = s.framebuffer_for(target);
        if let Some(attachments) = s.framebuffers.get_mut(&fb) {
            if texture == 0 {
                attachments.remove(&attachment);
            } else {
                attachments.insert(
                    attachment,
                    Attachment::Texture {
                        id: texture,
                        target: textarget,
                        level,
                    },
                );
            }
        }
    }

    fn framebuffer_renderbuffer(&mut self, target: u32, attachment: u32, renderbuffer: u32) {
        let mut s = self.state.borrow_mut();
        s.log("framebuffer_renderbuffer");
        let fb = s.framebuffer_for(target);
        if let Some(attachments) = s.framebuffers.get_mut(&fb) {
            if renderbuffer == 0 {
                attachments.remove(&attachment);
            } else {
                attachments.insert(attachment, Attachment::Renderbuffer(renderbuffer));
            }
        }
    }

    fn check_framebuffer_status(&mut self, target: u32) -> u32 {
        let mut s = self.state.borrow_mut();
        s.log("check_framebuffer_status");
        let fb = s.framebuffer_for(target);
        if fb == 0 {
            return gl::FRAMEBUFFER_COMPLETE;
        }
        if s.force_unsupported {
            return gl::FRAMEBUFFER_UNSUPPORTED;
        }
        let Some(attachments) = s.framebuffers.get(&fb) else {
            return gl::FRAMEBUFFER_UNSUPPORTED;
        };
        if attachments.is_empty() {
            return gl::FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT;
        }
        let all_backed = attachments.values().all(|a| {
            s.attachment_image(*a)
                .is_some_and(|img| img.width > 0 && img.height > 0)
        });
        if all_backed {
            gl::FRAMEBUFFER_COMPLETE
        } else {
            gl::FRAMEBUFFER_INCOMPLETE_ATTACHMENT
        }
    }

    fn create_shader(&mut self, ty: u32) -> u32 {
        let mut s = self.state.borrow_mut();
        let id = s.alloc_id();
        s.shaders.insert(id, Shader { ty, compiled: None });
        id
    }

    fn delete_shader(&mut self, id: u32) {
        let mut s = self.state.borrow_mut();
        s.log("delete_shader");
        s.shaders.remove(&id);
    }

    fn compile_shader(&mut self, id: u32, source: &str) -> CompileOutput {
        let mut s = self.state.borrow_mut();
        s.log("compile_shader");
        let Some(shader) = s.shaders.get_mut(&id) else {
            return CompileOutput::default();
        };
        let output = if source.contains("void main") {
            let (attribs, uniforms) = scan_declarations(source, shader.ty);
            CompileOutput {
                success: true,
                info_log: String::new(),
                attribs,
                uniforms,
            }
        } else {
            CompileOutput {
                success: false,
                info_log: "ERROR: 0:1: 'main' : function not defined\n".to_string(),
                ..CompileOutput::default()
            }
        };
        shader.compiled = Some(output.clone());
        output
    }

    fn create_program(&mut self) -> u32 {
        let mut s = self.state.borrow_mut();
        let id = s.alloc_id();
        s.programs.insert(id, Program::default());
        id
    }

    fn delete_program(&mut self, id: u32) {
        let mut s = self.state.borrow_mut();
        s.log("delete_program");
        s.programs.remove(&id);
        s.uniforms.retain(|(program, _), _| *program != id);
    }

    fn attach_shader(&mut self, program: u32, shader: u32) {
        let mut s = self.state.borrow_mut();
        if let Some(p) = s.programs.get_mut(&program) {
            p.shaders.push(shader);
        }
    }

    fn detach_shader(&mut self, program: u32, shader: u32) {
        let mut s = self.state.borrow_mut();
        if let Some(p) = s.programs.get_mut(&program) {
            p.shaders.retain(|id| *id != shader);
        }
    }

    fn bind_attrib_location(&mut self, program: u32, index: u32, name: &str) {
        let mut s = self.state.borrow_mut();
        if let Some(p) = s.programs.get_mut(&program) {
            p.bindings.insert(name.to_string(), index);
        }
    }

    fn link_program(&mut self, program: u32) -> LinkOutput {
        let mut s = self.state.borrow_mut();
        s.log("link_program");
        let Some(p) = s.programs.get(&program) else {
            return LinkOutput::default();
        };
        let compiled = |ty: u32| {
            p.shaders.iter().find_map(|id| {
                let shader = s.shaders.get(id)?;
                let output = shader.compiled.as_ref()?;
                (shader.ty == ty && output.success).then_some(output)
            })
        };
        let (Some(vertex), Some(fragment)) =
            (compiled(gl::VERTEX_SHADER), compiled(gl::FRAGMENT_SHADER))
        else {
            return LinkOutput {
                success: false,
                info_log: "error: compiled vertex and fragment shaders must be attached\n"
                    .to_string(),
                ..LinkOutput::default()
            };
        };

        let mut used: Vec<u32> = p.bindings.values().copied().collect();
        let mut attribs = Vec::new();
        for var in &vertex.attribs {
            let location = match p.bindings.get(&var.name) {
                Some(bound) => *bound,
                None => {
                    let free = (0..).find(|i| !used.contains(i)).unwrap_or(0);
                    used.push(free);
                    free
                }
            };
            attribs.push(ActiveVariable {
                name: var.name.clone(),
                ty: var.ty,
                location: location as i32,
            });
        }

        let mut uniforms: Vec<ActiveVariable> = Vec::new();
        for var in vertex.uniforms.iter().chain(&fragment.uniforms) {
            if uniforms.iter().any(|u| u.name == var.name) {
                continue;
            }
            uniforms.push(ActiveVariable {
                name: var.name.clone(),
                ty: var.ty,
                location: uniforms.len() as i32,
            });
        }

        LinkOutput {
            success: true,
            info_log: String::new(),
            attribs,
            uniforms,
        }
    }

    fn use_program(&mut self, id: u32) {
        let mut s = self.state.borrow_mut();
        s.log("use_program");
        s.current_program = id;
    }

    fn uniform_1i(&mut self, location: i32, value: i32) {
        let mut s = self.state.borrow_mut();
        s.log("uniform_1i");
        let program = s.current_program;
        s.uniforms
            .insert((program, location), UniformValue::Int(vec![value]));
    }

    fn uniform_4f(&mut self, location: i32, value: [f32; 4]) {
        let mut s = self.state.borrow_mut();
        s.log("uniform_4f");
        let program = s.current_program;
        s.uniforms
            .insert((program, location), UniformValue::Float(value.to_vec()));
    }

    fn uniform_iv(&mut self, location: i32, values: &[i32]) {
        let mut s = self.state.borrow_mut();
        s.log("uniform_iv");
        let program = s.current_program;
        s.uniforms
            .insert((program, location), UniformValue::Int(values.to_vec()));
    }

    fn gen_vertex_array(&mut self) -> u32 {
        let mut s = self.state.borrow_mut();
        let id = s.alloc_id();
        let attribs = vec![Attrib::default(); s.limits.max_vertex_attribs as usize];
        s.vertex_arrays.insert(
            id,
            VertexArray {
                attribs,
                element_buffer: 0,
            },
        );
        id
    }

    fn delete_vertex_array(&mut self, id: u32) {
        let mut s = self.state.borrow_mut();
        s.log("delete_vertex_array");
        if id != 0 {
            s.vertex_arrays.remove(&id);
        }
        if s.bound_vertex_array == id {
            s.bound_vertex_array = 0;
        }
    }

    fn bind_vertex_array(&mut self, id: u32) {
        let mut s = self.state.borrow_mut();
        s.log("bind_vertex_array");
        s.bound_vertex_array = id;
    }

    fn enable_vertex_attrib_array(&mut self, index: u32) {
        let mut s = self.state.borrow_mut();
        s.log("enable_vertex_attrib_array");
        if let Some(attrib) = s.vertex_array().attribs.get_mut(index as usize) {
            attrib.enabled = true;
        }
    }

    fn disable_vertex_attrib_array(&mut self, index: u32) {
        let mut s = self.state.borrow_mut();
        s.log("disable_vertex_attrib_array");
        if let Some(attrib) = s.vertex_array().attribs.get_mut(index as usize) {
            attrib.enabled = false;
        }
    }

    fn vertex_attrib_pointer(
        &mut self,
        index: u32,
        size: u32,
        ty: u32,
        normalized: bool,
        stride: u32,
        offset: u32,
    ) {
        let mut s = self.state.borrow_mut();
        s.log("vertex_attrib_pointer");
        let buffer = s.bound_array_buffer;
        if let Some(attrib) = s.vertex_array().attribs.get_mut(index as usize) {
            attrib.buffer = buffer;
            attrib.size = size;
            attrib.ty = ty;
            attrib.normalized = normalized;
            attrib.stride = stride;
            attrib.offset = offset;
        }
    }

    fn vertex_attrib_4f(&mut self, index: u32, value: [f32; 4]) {
        let mut s = self.state.borrow_mut();
        s.log("vertex_attrib_4f");
        s.attrib_values.insert(index, value);
    }

    fn enable(&mut self, cap: u32) {
        let mut s = self.state.borrow_mut();
        s.log("enable");
        s.caps.insert(cap, true);
    }

    fn disable(&mut self, cap: u32) {
        let mut s = self.state.borrow_mut();
        s.log("disable");
        s.caps.insert(cap, false);
    }

    fn clear_color(&mut self, rgba: [f32; 4]) {
        let mut s = self.state.borrow_mut();
        s.log("clear_color");
        s.clear_color = rgba;
    }

    fn clear_depth(&mut self, depth: f32) {
        let mut s = self.state.borrow_mut();
        s.log("clear_depth");
        s.clear_depth = depth;
    }

    fn clear_stencil(&mut self, value: i32) {
        let mut s = self.state.borrow_mut();
        s.log("clear_stencil");
        s.clear_stencil = value;
    }

    fn color_mask(&mut self, mask: [bool; 4]) {
        let mut s = self.state.borrow_mut();
        s.log("color_mask");
        s.color_mask = mask;
    }

    fn depth_mask(&mut self, flag: bool) {
        let mut s = self.state.borrow_mut();
        s.log("depth_mask");
        s.depth_mask = flag;
    }

    fn stencil_mask(&mut self, mask: u32) {
        let mut s = self.state.borrow_mut();
        s.log("stencil_mask");
        s.stencil_mask = mask;
    }

    fn scissor(&mut self, x: i32, y: i32, width: i32, height: i32) {
        let mut s = self.state.borrow_mut();
        s.log("scissor");
        s.scissor = [x, y, width, height];
    }

    fn viewport(&mut self, x: i32, y: i32, width: i32, height: i32) {
        let mut s = self.state.borrow_mut();
        s.log("viewport");
        s.viewport = [x, y, width, height];
    }

    fn clear(&mut self, mask: u32) {
        let mut s = self.state.borrow_mut();
        s.log("clear");
        if mask & gl::COLOR_BUFFER_BIT == 0 {
            return;
        }
        let color = s.clear_color.map(to_unorm8);
        let color_mask = s.color_mask;
        let scissor = s.cap(gl::SCISSOR_TEST).then_some(s.scissor);
        let fb = s.draw_framebuffer;
        let Some(image) = s.color_image_mut(fb) else {
            return;
        };
        let (x0, y0, x1, y1) = match scissor {
            Some([x, y, w, h]) => (
                x.clamp(0, image.width as i32) as u32,
                y.clamp(0, image.height as i32) as u32,
                (x.saturating_add(w)).clamp(0, image.width as i32) as u32,
                (y.saturating_add(h)).clamp(0, image.height as i32) as u32,
            ),
            None => (0, 0, image.width, image.height),
        };
        let channels = image.bpp.min(4) as usize;
        let packed = !matches!(image.bpp, 3 | 4);
        for y in y0..y1 {
            for x in x0..x1 {
                let px = image.pixel_mut(x, y);
                if packed {
                    px.fill(0);
                    continue;
                }
                for c in 0..channels {
                    if color_mask[c] {
                        px[c] = color[c];
                    }
                }
            }
        }
    }

    fn draw_arrays(&mut self, mode: u32, first: u32, count: u32) {
        let mut s = self.state.borrow_mut();
        s.log("draw_arrays");
        record_draw(&mut s, mode, first, count, None, 0);
    }

    fn draw_elements(&mut self, mode: u32, count: u32, index_type: u32, offset: u32) {
        let mut s = self.state.borrow_mut();
        s.log("draw_elements");
        record_draw(&mut s, mode, 0, count, Some(index_type), offset);
    }

    fn read_pixels(
        &mut self,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        format: u32,
        ty: u32,
    ) -> Vec<u8> {
        let mut s = self.state.borrow_mut();
        s.log("read_pixels");
        let out_bpp = gl::bytes_per_pixel(format, ty).unwrap_or(4);
        let stride = row_stride(width, out_bpp, s.pack_alignment);
        let mut out = vec![0u8; stride * height as usize];
        let fb = s.read_framebuffer;
        let Some(image) = s.color_image(fb) else {
            return out;
        };
        for row in 0..height {
            for col in 0..width {
                let (sx, sy) = (x + col as i32, y + row as i32);
                if sx < 0 || sy < 0 || sx as u32 >= image.width || sy as u32 >= image.height {
                    continue;
                }
                let src = image.pixel(sx as u32, sy as u32);
                let dst_start = row as usize * stride + col as usize * out_bpp as usize;
                let dst = &mut out[dst_start..dst_start + out_bpp as usize];
                if src.len() == dst.len() {
                    dst.copy_from_slice(src);
                } else if src.len() == 3 && dst.len() == 4 {
                    dst[..3].copy_from_slice(src);
                    dst[3] = 255;
                }
            }
        }
        out
    }

    fn gen_query(&mut self) -> u32 {
        let mut s = self.state.borrow_mut();
        let id = s.alloc_id();
        s.queries.insert(id, Query::default());
        id
    }

    fn delete_query(&mut self, id: u32) {
        let mut s = self.state.borrow_mut();
        s.log("delete_query");
        s.queries.remove(&id);
        s.active_queries.retain(|_, active| *active != id);
    }

    fn begin_query(&mut self, target: u32, id: u32) {
        let mut s = self.state.borrow_mut();
        s.log("begin_query");
        if let Some(q) = s.queries.get_mut(&id) {
            *q = Query::default();
        }
        s.active_queries.insert(target, id);
    }

    fn end_query(&mut self, target: u32) {
        let mut s = self.state.borrow_mut();
        s.log("end_query");
        if let Some(id) = s.active_queries.remove(&target) {
            if let Some(q) = s.queries.get_mut(&id) {
                q.result = Some(q.samples_passed as u64);
            }
        }
    }

    fn query_result(&mut self, id: u32) -> Option<u64> {
        self.state.borrow().queries.get(&id)?.result
    }

    fn insert_fence(&mut self) -> FenceId {
        let mut s = self.state.borrow_mut();
        s.log("insert_fence");
        let fence = s.next_fence;
        s.next_fence += 1;
        let latency = s.fence_latency;
        s.fences.insert(fence, latency);
        fence
    }

    fn fence_signaled(&mut self, fence: FenceId) -> bool {
        let mut s = self.state.borrow_mut();
        match s.fences.get_mut(&fence) {
            Some(0) | None => true,
            Some(remaining) => {
                *remaining -= 1;
                false
            }
        }
    }

    fn wait_fence(&mut self, fence: FenceId) {
        let mut s = self.state.borrow_mut();
        s.log("wait_fence");
        s.fences.insert(fence, 0);
    }
}

fn record_draw(
    s: &mut State,
    mode: u32,
    first: u32,
    count: u32,
    index_type: Option<u32>,
    index_offset: u32,
) {
    let attribs: Vec<AttribSnapshot> = s
        .vertex_arrays
        .get(&s.bound_vertex_array)
        .map(|vao| {
            vao.attribs
                .iter()
                .enumerate()
                .filter(|(_, a)| a.enabled)
                .map(|(index, a)| AttribSnapshot {
                    index: index as u32,
                    buffer: a.buffer,
                    size: a.size,
                    ty: a.ty,
                    normalized: a.normalized,
                    stride: a.stride,
                    offset: a.offset,
                    buffer_data: s.buffers.get(&a.buffer).cloned().unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default();
    let draw = DrawCall {
        mode,
        first,
        count,
        index_type,
        index_offset,
        program: s.current_program,
        framebuffer: s.draw_framebuffer,
        attribs,
    };
    s.draws.push(draw);
    if count > 0 {
        let active: Vec<u32> = s.active_queries.values().copied().collect();
        for id in active {
            if let Some(q) = s.queries.get_mut(&id) {
                q.samples_passed = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_respects_scissor_and_mask() {
        let mut driver = SoftwareDriver::new(4, 4);
        driver.clear_color([1.0, 0.0, 0.0, 1.0]);
        driver.enable(gl::SCISSOR_TEST);
        driver.scissor(0, 0, 2, 4);
        driver.color_mask([true, true, true, false]);
        driver.clear(gl::COLOR_BUFFER_BIT);

        let pixels = driver.read_pixels(0, 0, 4, 1, gl::RGBA, gl::UNSIGNED_BYTE);
        assert_eq!(&pixels[0..4], &[255, 0, 0, 0]);
        assert_eq!(&pixels[8..12], &[0, 0, 0, 0]);
    }

    #[test]
    fn declarations_are_scanned_from_source() {
        let (attribs, uniforms) = scan_declarations(
            "attribute highp vec4 a_position; uniform sampler2D u_tex; void main() {}",
            gl::VERTEX_SHADER,
        );
        assert_eq!(attribs.len(), 1);
        assert_eq!(attribs[0].name, "a_position");
        assert_eq!(uniforms[0].ty, gl::SAMPLER_2D);
    }

    #[test]
    fn link_honours_attrib_bindings() {
        let mut driver = SoftwareDriver::default();
        let vs = driver.create_shader(gl::VERTEX_SHADER);
        let fs = driver.create_shader(gl::FRAGMENT_SHADER);
        assert!(
            driver
                .compile_shader(vs, "attribute vec4 a; attribute vec4 b; void main() {}")
                .success
        );
        assert!(driver.compile_shader(fs, "void main() {}").success);
        let program = driver.create_program();
        driver.attach_shader(program, vs);
        driver.attach_shader(program, fs);
        driver.bind_attrib_location(program, 0, "b");

        let link = driver.link_program(program);
        assert!(link.success);
        let loc = |name: &str| link.attribs.iter().find(|a| a.name == name).unwrap().location;
        assert_eq!(loc("b"), 0);
        assert_eq!(loc("a"), 1);
    }

    #[test]
    fn fences_signal_after_latency() {
        let mut driver = SoftwareDriver::default();
        driver.set_fence_latency(2);
        let fence = driver.insert_fence();
        assert!(!driver.fence_signaled(fence));
        assert!(!driver.fence_signaled(fence));
        assert!(driver.fence_signaled(fence));
    }
}
