use glcmd_protocol::gl;
use thiserror::Error;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Renderbuffer {
    pub internal_format: u32,
    pub width: u32,
    pub height: u32,
    pub samples: u32,
    /// Storage has been allocated at least once.
    pub allocated: bool,
    pub cleared: bool,
}

impl Renderbuffer {
    pub fn set_storage(&mut self, internal_format: u32, width: u32, height: u32, samples: u32) {
        *self = Renderbuffer {
            internal_format,
            width,
            height,
            samples,
            allocated: true,
            cleared: width == 0 || height == 0,
        };
    }
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum RenderbufferSizeError {
    #[error("unsupported renderbuffer format {0:#x}")]
    UnknownFormat(u32),
    #[error("{width}x{height}x{samples} renderbuffer of format {format:#x} overflows 32-bit size")]
    Overflow {
        width: u32,
        height: u32,
        samples: u32,
        format: u32,
    },
}

/// Bytes of storage needed by a renderbuffer, computed in 32 bits.
///
/// A combination whose size does not fit `u32` is rejected rather than
/// wrapped; the driver would otherwise be asked for a tiny allocation that
/// later writes run past.
pub fn estimate_size(
    width: u32,
    height: u32,
    samples: u32,
    internal_format: u32,
) -> Result<u32, RenderbufferSizeError> {
    let bpp = gl::renderbuffer_bytes_per_pixel(internal_format)
        .ok_or(RenderbufferSizeError::UnknownFormat(internal_format))?;
    width
        .checked_mul(height)
        .and_then(|px| px.checked_mul(samples.max(1)))
        .and_then(|n| n.checked_mul(bpp))
        .ok_or(RenderbufferSizeError::Overflow {
            width,
            height,
            samples,
            format: internal_format,
        })
}
