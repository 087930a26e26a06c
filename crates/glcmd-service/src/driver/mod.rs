//! The native graphics API the decoder drives.
//!
//! [`Driver`] is a thin GL-shaped interface: every call has already been
//! validated by the decoder, and all object handles are *service ids* (driver
//! handles), never client ids. [`software::SoftwareDriver`] is an in-memory
//! implementation used by tests and headless tooling.

pub mod software;

use crate::config::DriverLimits;

pub use software::SoftwareDriver;

/// Driver-reported graphics reset status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResetStatus {
    #[default]
    NoError,
    Guilty,
    Innocent,
    Unknown,
}

pub type FenceId = u64;

/// A shader-level declaration reported by the driver after compilation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderVariable {
    pub name: String,
    pub ty: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompileOutput {
    pub success: bool,
    pub info_log: String,
    pub attribs: Vec<ShaderVariable>,
    pub uniforms: Vec<ShaderVariable>,
}

/// An active attribute or uniform of a linked program.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActiveVariable {
    pub name: String,
    pub ty: u32,
    pub location: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LinkOutput {
    pub success: bool,
    pub info_log: String,
    pub attribs: Vec<ActiveVariable>,
    pub uniforms: Vec<ActiveVariable>,
}

/// An externally owned surface that can back texture level 0 without a copy
/// on drivers that support it.
pub trait GlImage {
    fn size(&self) -> (u32, u32);
    fn internal_format(&self) -> u32;
    /// RGBA8 contents, for drivers that bind by copying.
    fn read_pixels(&self) -> Option<Vec<u8>>;
}

pub trait Driver {
    fn limits(&self) -> DriverLimits;
    /// Size of the window-system framebuffer.
    fn surface_size(&self) -> (u32, u32);

    /// Makes the driver context current on the calling thread.
    fn make_current(&mut self) -> bool;
    fn reset_status(&mut self) -> ResetStatus;
    /// Pops one pending driver error, `GL_NO_ERROR` when none.
    fn get_error(&mut self) -> u32;
    fn flush(&mut self);
    fn finish(&mut self);

    fn gen_buffer(&mut self) -> u32;
    fn delete_buffer(&mut self, id: u32);
    fn bind_buffer(&mut self, target: u32, id: u32);
    fn buffer_data(&mut self, target: u32, size: usize, data: Option<&[u8]>, usage: u32);
    fn buffer_sub_data(&mut self, target: u32, offset: usize, data: &[u8]);

    fn gen_texture(&mut self) -> u32;
    fn delete_texture(&mut self, id: u32);
    fn active_texture(&mut self, unit: u32);
    fn bind_texture(&mut self, target: u32, id: u32);
    #[allow(clippy::too_many_arguments)]
    fn tex_image_2d(
        &mut self,
        target: u32,
        level: u32,
        internal_format: u32,
        width: u32,
        height: u32,
        format: u32,
        ty: u32,
        pixels: Option<&[u8]>,
    );
    #[allow(clippy::too_many_arguments)]
    fn tex_sub_image_2d(
        &mut self,
        target: u32,
        level: u32,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        format: u32,
        ty: u32,
        pixels: &[u8],
    );
    fn tex_storage_2d(
        &mut self,
        target: u32,
        levels: u32,
        internal_format: u32,
        width: u32,
        height: u32,
    );
    fn tex_parameter_i(&mut self, target: u32, pname: u32, param: i32);
    fn bind_tex_image(&mut self, target: u32, image: &dyn GlImage) -> bool;
    fn release_tex_image(&mut self, target: u32, image: &dyn GlImage);
    fn pixel_store_i(&mut self, pname: u32, param: i32);

    fn gen_renderbuffer(&mut self) -> u32;
    fn delete_renderbuffer(&mut self, id: u32);
    fn bind_renderbuffer(&mut self, target: u32, id: u32);
    fn renderbuffer_storage(
        &mut self,
        target: u32,
        samples: u32,
        internal_format: u32,
        width: u32,
        height: u32,
    );

    fn gen_framebuffer(&mut self) -> u32;
    fn delete_framebuffer(&mut self, id: u32);
    fn bind_framebuffer(&mut self, target: u32, id: u32);
    fn framebuffer_texture_2d(
        &mut self,
        target: u32,
        attachment: u32,
        textarget: u32,
        texture: u32,
        level: u32,
    );
    fn framebuffer_renderbuffer(&mut self, target: u32, attachment: u32, renderbuffer: u32);
    fn check_framebuffer_status(&mut self, target: u32) -> u32;

    fn create_shader(&mut self, ty: u32) -> u32;
    fn delete_shader(&mut self, id: u32);
    fn compile_shader(&mut self, id: u32, source: &str) -> CompileOutput;
    fn create_program(&mut self) -> u32;
    fn delete_program(&mut self, id: u32);
    fn attach_shader(&mut self, program: u32, shader: u32);
    fn detach_shader(&mut self, program: u32, shader: u32);
    fn bind_attrib_location(&mut self, program: u32, index: u32, name: &str);
    fn link_program(&mut self, program: u32) -> LinkOutput;
    fn use_program(&mut self, id: u32);
    fn uniform_1i(&mut self, location: i32, value: i32);
    fn uniform_4f(&mut self, location: i32, value: [f32; 4]);
    fn uniform_iv(&mut self, location: i32, values: &[i32]);

    fn gen_vertex_array(&mut self) -> u32;
    fn delete_vertex_array(&mut self, id: u32);
    fn bind_vertex_array(&mut self, id: u32);
    fn enable_vertex_attrib_array(&mut self, index: u32);
    fn disable_vertex_attrib_array(&mut self, index: u32);
    /// Points attribute `index` at the buffer currently bound to `ARRAY_BUFFER`.
    fn vertex_attrib_pointer(
        &mut self,
        index: u32,
        size: u32,
        ty: u32,
        normalized: bool,
        stride: u32,
        offset: u32,
    );
    fn vertex_attrib_4f(&mut self, index: u32, value: [f32; 4]);

    fn enable(&mut self, cap: u32);
    fn disable(&mut self, cap: u32);
    fn clear_color(&mut self, rgba: [f32; 4]);
    fn clear_depth(&mut self, depth: f32);
    fn clear_stencil(&mut self, s: i32);
    fn color_mask(&mut self, mask: [bool; 4]);
    fn depth_mask(&mut self, flag: bool);
    fn stencil_mask(&mut self, mask: u32);
    fn scissor(&mut self, x: i32, y: i32, width: i32, height: i32);
    fn viewport(&mut self, x: i32, y: i32, width: i32, height: i32);
    fn clear(&mut self, mask: u32);
    fn draw_arrays(&mut self, mode: u32, first: u32, count: u32);
    fn draw_elements(&mut self, mode: u32, count: u32, index_type: u32, offset: u32);
    fn read_pixels(
        &mut self,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        format: u32,
        ty: u32,
    ) -> Vec<u8>;

    fn gen_query(&mut self) -> u32;
    fn delete_query(&mut self, id: u32);
    fn begin_query(&mut self, target: u32, id: u32);
    fn end_query(&mut self, target: u32);
    /// `Some(result)` once the query result is available.
    fn query_result(&mut self, id: u32) -> Option<u64>;

    fn insert_fence(&mut self) -> FenceId;
    fn fence_signaled(&mut self, fence: FenceId) -> bool;
    fn wait_fence(&mut self, fence: FenceId);
}
