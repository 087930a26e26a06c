//! GL enum values carried on the wire.
//!
//! Only the subset the service understands is listed. Values match the Khronos
//! registry so client libraries can pass their own constants straight through.

pub type GLenum = u32;

// Errors.
pub const NO_ERROR: GLenum = 0;
pub const INVALID_ENUM: GLenum = 0x0500;
pub const INVALID_VALUE: GLenum = 0x0501;
pub const INVALID_OPERATION: GLenum = 0x0502;
pub const OUT_OF_MEMORY: GLenum = 0x0505;
pub const INVALID_FRAMEBUFFER_OPERATION: GLenum = 0x0506;
pub const CONTEXT_LOST: GLenum = 0x0507;

// Booleans.
pub const FALSE: u32 = 0;
pub const TRUE: u32 = 1;

// Buffer targets and usages.
pub const ARRAY_BUFFER: GLenum = 0x8892;
pub const ELEMENT_ARRAY_BUFFER: GLenum = 0x8893;
pub const STREAM_DRAW: GLenum = 0x88E0;
pub const STATIC_DRAW: GLenum = 0x88E4;
pub const DYNAMIC_DRAW: GLenum = 0x88E8;

// Texture targets.
pub const TEXTURE_2D: GLenum = 0x0DE1;
pub const TEXTURE_CUBE_MAP: GLenum = 0x8513;
pub const TEXTURE_CUBE_MAP_POSITIVE_X: GLenum = 0x8515;
pub const TEXTURE_CUBE_MAP_NEGATIVE_X: GLenum = 0x8516;
pub const TEXTURE_CUBE_MAP_POSITIVE_Y: GLenum = 0x8517;
pub const TEXTURE_CUBE_MAP_NEGATIVE_Y: GLenum = 0x8518;
pub const TEXTURE_CUBE_MAP_POSITIVE_Z: GLenum = 0x8519;
pub const TEXTURE_CUBE_MAP_NEGATIVE_Z: GLenum = 0x851A;
pub const TEXTURE0: GLenum = 0x84C0;

// Texture parameters.
pub const TEXTURE_MAG_FILTER: GLenum = 0x2800;
pub const TEXTURE_MIN_FILTER: GLenum = 0x2801;
pub const TEXTURE_WRAP_S: GLenum = 0x2802;
pub const TEXTURE_WRAP_T: GLenum = 0x2803;
pub const NEAREST: GLenum = 0x2600;
pub const LINEAR: GLenum = 0x2601;
pub const NEAREST_MIPMAP_NEAREST: GLenum = 0x2700;
pub const LINEAR_MIPMAP_NEAREST: GLenum = 0x2701;
pub const NEAREST_MIPMAP_LINEAR: GLenum = 0x2702;
pub const LINEAR_MIPMAP_LINEAR: GLenum = 0x2703;
pub const REPEAT: GLenum = 0x2901;
pub const CLAMP_TO_EDGE: GLenum = 0x812F;
pub const MIRRORED_REPEAT: GLenum = 0x8370;

// Pixel formats and types.
pub const ALPHA: GLenum = 0x1906;
pub const RGB: GLenum = 0x1907;
pub const RGBA: GLenum = 0x1908;
pub const LUMINANCE: GLenum = 0x1909;
pub const LUMINANCE_ALPHA: GLenum = 0x190A;
pub const DEPTH_COMPONENT: GLenum = 0x1902;
pub const UNSIGNED_BYTE: GLenum = 0x1401;
pub const UNSIGNED_SHORT: GLenum = 0x1403;
pub const UNSIGNED_INT: GLenum = 0x1405;
pub const UNSIGNED_SHORT_4_4_4_4: GLenum = 0x8033;
pub const UNSIGNED_SHORT_5_5_5_1: GLenum = 0x8034;
pub const UNSIGNED_SHORT_5_6_5: GLenum = 0x8363;

// Sized internal formats.
pub const RGBA4: GLenum = 0x8056;
pub const RGB5_A1: GLenum = 0x8057;
pub const RGB565: GLenum = 0x8D62;
pub const RGBA8: GLenum = 0x8058;
pub const RGB8: GLenum = 0x8051;
pub const DEPTH_COMPONENT16: GLenum = 0x81A5;
pub const DEPTH_COMPONENT24: GLenum = 0x81A6;
pub const STENCIL_INDEX8: GLenum = 0x8D48;
pub const DEPTH24_STENCIL8: GLenum = 0x88F0;

// Vertex attribute types.
pub const BYTE: GLenum = 0x1400;
pub const SHORT: GLenum = 0x1402;
pub const FLOAT: GLenum = 0x1406;
pub const FIXED: GLenum = 0x140C;

// Pixel store.
pub const UNPACK_ALIGNMENT: GLenum = 0x0CF5;
pub const PACK_ALIGNMENT: GLenum = 0x0D05;

// Framebuffers and renderbuffers.
pub const FRAMEBUFFER: GLenum = 0x8D40;
pub const READ_FRAMEBUFFER: GLenum = 0x8CA8;
pub const DRAW_FRAMEBUFFER: GLenum = 0x8CA9;
pub const RENDERBUFFER: GLenum = 0x8D41;
pub const COLOR_ATTACHMENT0: GLenum = 0x8CE0;
pub const DEPTH_ATTACHMENT: GLenum = 0x8D00;
pub const STENCIL_ATTACHMENT: GLenum = 0x8D20;
pub const DEPTH_STENCIL_ATTACHMENT: GLenum = 0x821A;
pub const FRAMEBUFFER_COMPLETE: GLenum = 0x8CD5;
pub const FRAMEBUFFER_INCOMPLETE_ATTACHMENT: GLenum = 0x8CD6;
pub const FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT: GLenum = 0x8CD7;
pub const FRAMEBUFFER_INCOMPLETE_DIMENSIONS: GLenum = 0x8CD9;
pub const FRAMEBUFFER_UNSUPPORTED: GLenum = 0x8CDD;
pub const FRAMEBUFFER_INCOMPLETE_MULTISAMPLE: GLenum = 0x8D56;

// Clear mask bits.
pub const DEPTH_BUFFER_BIT: u32 = 0x0000_0100;
pub const STENCIL_BUFFER_BIT: u32 = 0x0000_0400;
pub const COLOR_BUFFER_BIT: u32 = 0x0000_4000;

// Capabilities.
pub const CULL_FACE: GLenum = 0x0B44;
pub const DEPTH_TEST: GLenum = 0x0B71;
pub const STENCIL_TEST: GLenum = 0x0B90;
pub const DITHER: GLenum = 0x0BD0;
pub const BLEND: GLenum = 0x0BE2;
pub const SCISSOR_TEST: GLenum = 0x0C11;
pub const POLYGON_OFFSET_FILL: GLenum = 0x8037;
pub const SAMPLE_ALPHA_TO_COVERAGE: GLenum = 0x809E;
pub const SAMPLE_COVERAGE: GLenum = 0x80A0;

// Primitive modes.
pub const POINTS: GLenum = 0x0000;
pub const LINES: GLenum = 0x0001;
pub const LINE_LOOP: GLenum = 0x0002;
pub const LINE_STRIP: GLenum = 0x0003;
pub const TRIANGLES: GLenum = 0x0004;
pub const TRIANGLE_STRIP: GLenum = 0x0005;
pub const TRIANGLE_FAN: GLenum = 0x0006;

// Shaders and programs.
pub const FRAGMENT_SHADER: GLenum = 0x8B30;
pub const VERTEX_SHADER: GLenum = 0x8B31;
pub const SHADER_TYPE: GLenum = 0x8B4F;
pub const DELETE_STATUS: GLenum = 0x8B80;
pub const COMPILE_STATUS: GLenum = 0x8B81;
pub const LINK_STATUS: GLenum = 0x8B82;
pub const INFO_LOG_LENGTH: GLenum = 0x8B84;
pub const ATTACHED_SHADERS: GLenum = 0x8B85;
pub const ACTIVE_UNIFORMS: GLenum = 0x8B86;
pub const ACTIVE_ATTRIBUTES: GLenum = 0x8B89;
pub const SHADER_SOURCE_LENGTH: GLenum = 0x8B88;
pub const FLOAT_VEC2: GLenum = 0x8B50;
pub const FLOAT_VEC3: GLenum = 0x8B51;
pub const FLOAT_VEC4: GLenum = 0x8B52;
pub const INT_VEC2: GLenum = 0x8B53;
pub const FLOAT_MAT4: GLenum = 0x8B5C;
pub const SAMPLER_2D: GLenum = 0x8B5E;
pub const SAMPLER_CUBE: GLenum = 0x8B60;
pub const INT: GLenum = 0x1404;

// Vertex attribute queries.
pub const VERTEX_ATTRIB_ARRAY_ENABLED: GLenum = 0x8622;
pub const VERTEX_ATTRIB_ARRAY_SIZE: GLenum = 0x8623;
pub const VERTEX_ATTRIB_ARRAY_STRIDE: GLenum = 0x8624;
pub const VERTEX_ATTRIB_ARRAY_TYPE: GLenum = 0x8625;
pub const CURRENT_VERTEX_ATTRIB: GLenum = 0x8626;
pub const VERTEX_ATTRIB_ARRAY_NORMALIZED: GLenum = 0x886A;
pub const VERTEX_ATTRIB_ARRAY_BUFFER_BINDING: GLenum = 0x889F;

// Queries.
pub const ANY_SAMPLES_PASSED: GLenum = 0x8C2F;
pub const ANY_SAMPLES_PASSED_CONSERVATIVE: GLenum = 0x8D6A;
pub const COMMANDS_ISSUED: GLenum = 0x84F2;
pub const GET_ERROR_QUERY: GLenum = 0x84F3;
pub const ASYNC_PIXEL_UNPACK_COMPLETED: GLenum = 0x84EE;

// Value buffers.
pub const SUBSCRIBED_VALUES_BUFFER: GLenum = 0x924B;
pub const MOUSE_POSITION: GLenum = 0x924C;

// Context reset notification (GL_KHR_robustness).
pub const GUILTY_CONTEXT_RESET: GLenum = 0x8253;
pub const INNOCENT_CONTEXT_RESET: GLenum = 0x8254;
pub const UNKNOWN_CONTEXT_RESET: GLenum = 0x8255;

/// Returns the six cube-map face targets in GL order.
pub const CUBE_MAP_FACES: [GLenum; 6] = [
    TEXTURE_CUBE_MAP_POSITIVE_X,
    TEXTURE_CUBE_MAP_NEGATIVE_X,
    TEXTURE_CUBE_MAP_POSITIVE_Y,
    TEXTURE_CUBE_MAP_NEGATIVE_Y,
    TEXTURE_CUBE_MAP_POSITIVE_Z,
    TEXTURE_CUBE_MAP_NEGATIVE_Z,
];

/// Bytes per pixel for an unsized `format`/`type` pair, or `None` when the
/// combination is not valid for `TexImage2D`/`ReadPixels`.
pub fn bytes_per_pixel(format: GLenum, ty: GLenum) -> Option<u32> {
    match ty {
        UNSIGNED_BYTE => match format {
            ALPHA | LUMINANCE => Some(1),
            LUMINANCE_ALPHA => Some(2),
            RGB => Some(3),
            RGBA => Some(4),
            _ => None,
        },
        UNSIGNED_SHORT_5_6_5 if format == RGB => Some(2),
        UNSIGNED_SHORT_4_4_4_4 | UNSIGNED_SHORT_5_5_5_1 if format == RGBA => Some(2),
        _ => None,
    }
}

/// Size in bytes of one component of a vertex attribute type.
pub fn attrib_type_size(ty: GLenum) -> Option<u32> {
    match ty {
        BYTE | UNSIGNED_BYTE => Some(1),
        SHORT | UNSIGNED_SHORT => Some(2),
        FLOAT | FIXED => Some(4),
        _ => None,
    }
}

/// Size in bytes of one element of an index type.
pub fn index_type_size(ty: GLenum) -> Option<u32> {
    match ty {
        UNSIGNED_BYTE => Some(1),
        UNSIGNED_SHORT => Some(2),
        UNSIGNED_INT => Some(4),
        _ => None,
    }
}

/// Maps a cube-map face (or `TEXTURE_2D`) to the binding target it lives on.
pub fn texture_binding_target(target: GLenum) -> Option<GLenum> {
    match target {
        TEXTURE_2D => Some(TEXTURE_2D),
        t if CUBE_MAP_FACES.contains(&t) => Some(TEXTURE_CUBE_MAP),
        _ => None,
    }
}

/// Unsized `(format, type)` pair that a sized texture storage format maps to.
pub fn sized_texture_format(internal_format: GLenum) -> Option<(GLenum, GLenum)> {
    match internal_format {
        RGBA8 => Some((RGBA, UNSIGNED_BYTE)),
        RGB8 => Some((RGB, UNSIGNED_BYTE)),
        RGBA4 => Some((RGBA, UNSIGNED_SHORT_4_4_4_4)),
        RGB5_A1 => Some((RGBA, UNSIGNED_SHORT_5_5_5_1)),
        RGB565 => Some((RGB, UNSIGNED_SHORT_5_6_5)),
        _ => None,
    }
}

/// Planes carried by a renderable format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FormatPlanes {
    pub color: bool,
    pub alpha: bool,
    pub depth: bool,
    pub stencil: bool,
}

/// Planes of a renderbuffer or texture internal format, or `None` when the
/// format cannot be rendered to.
pub fn format_planes(internal_format: GLenum) -> Option<FormatPlanes> {
    let color = |alpha| FormatPlanes {
        color: true,
        alpha,
        ..FormatPlanes::default()
    };
    match internal_format {
        RGBA | RGBA4 | RGB5_A1 | RGBA8 => Some(color(true)),
        RGB | RGB565 | RGB8 => Some(color(false)),
        DEPTH_COMPONENT16 | DEPTH_COMPONENT24 => Some(FormatPlanes {
            depth: true,
            ..FormatPlanes::default()
        }),
        STENCIL_INDEX8 => Some(FormatPlanes {
            stencil: true,
            ..FormatPlanes::default()
        }),
        DEPTH24_STENCIL8 => Some(FormatPlanes {
            depth: true,
            stencil: true,
            ..FormatPlanes::default()
        }),
        _ => None,
    }
}

/// Bytes per sample of a renderbuffer internal format.
pub fn renderbuffer_bytes_per_pixel(internal_format: GLenum) -> Option<u32> {
    match internal_format {
        RGBA4 | RGB5_A1 | RGB565 | DEPTH_COMPONENT16 => Some(2),
        STENCIL_INDEX8 => Some(1),
        RGB8 => Some(3),
        RGBA8 | DEPTH_COMPONENT24 | DEPTH24_STENCIL8 => Some(4),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_per_pixel_rejects_mismatched_packed_types() {
        assert_eq!(bytes_per_pixel(RGBA, UNSIGNED_BYTE), Some(4));
        assert_eq!(bytes_per_pixel(RGB, UNSIGNED_SHORT_5_6_5), Some(2));
        assert_eq!(bytes_per_pixel(RGBA, UNSIGNED_SHORT_5_6_5), None);
        assert_eq!(bytes_per_pixel(RGB, UNSIGNED_SHORT_4_4_4_4), None);
        assert_eq!(bytes_per_pixel(DEPTH_COMPONENT, UNSIGNED_BYTE), None);
    }

    #[test]
    fn cube_faces_bind_to_cube_map() {
        for face in CUBE_MAP_FACES {
            assert_eq!(texture_binding_target(face), Some(TEXTURE_CUBE_MAP));
        }
        assert_eq!(texture_binding_target(TEXTURE_2D), Some(TEXTURE_2D));
        assert_eq!(texture_binding_target(TEXTURE_CUBE_MAP), None);
    }

    #[test]
    fn depth_stencil_formats_report_both_planes() {
        let planes = format_planes(DEPTH24_STENCIL8).unwrap();
        assert!(planes.depth && planes.stencil && !planes.color);
        assert!(format_planes(RGB565).is_some_and(|p| p.color && !p.alpha));
        assert_eq!(format_planes(LUMINANCE), None);
    }
}
