//! Decoder configuration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative "time to yield" flag shared with an external scheduler.
///
/// The decoder checks it after every command and stops the batch when it is
/// raised. Slow handlers raise it themselves.
#[derive(Clone, Debug, Default)]
pub struct YieldSignal(Arc<AtomicBool>);

impl YieldSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Clears the flag, returning whether it was set.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// Tunables and workaround flags for one decoder instance.
#[derive(Clone, Debug)]
pub struct DecoderConfig {
    /// Upper bound on commands executed by one `process_commands` call.
    pub max_commands_per_batch: usize,
    /// Emit a `trace!` event for every command.
    pub trace_commands: bool,
    /// Emit a `warn!` event for every protocol error.
    pub log_invalid_commands: bool,
    /// Synthesize a constant buffer for attribute 0 when it is not array-backed.
    pub emulate_attrib0: bool,
    /// Convert `GL_FIXED` attributes to floats before drawing.
    pub emulate_fixed_attribs: bool,
    /// Escalate `GL_OUT_OF_MEMORY` to context loss.
    pub lose_context_when_out_of_memory: bool,
    /// Colour used when lazily clearing freshly allocated attachments.
    pub lazy_clear_color: [f32; 4],
    pub lazy_clear_depth: f32,
    pub lazy_clear_stencil: i32,
    /// Asynchronous uploads completed during idle processing per batch.
    pub async_uploads_per_batch: usize,
    /// Uploads larger than this raise the yield signal.
    pub slow_upload_bytes: usize,
    pub max_bucket_size: usize,
    /// Cap on the synthesized attribute 0 buffer.
    pub max_attrib0_bytes: u32,
    /// Cap on the scratch buffer used for fixed-point conversion.
    pub max_fixed_attrib_bytes: u32,
    pub yield_signal: YieldSignal,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_commands_per_batch: 4096,
            trace_commands: false,
            log_invalid_commands: true,
            emulate_attrib0: true,
            emulate_fixed_attribs: true,
            lose_context_when_out_of_memory: false,
            lazy_clear_color: [0.0; 4],
            lazy_clear_depth: 1.0,
            lazy_clear_stencil: 0,
            async_uploads_per_batch: 4,
            slow_upload_bytes: 4 * 1024 * 1024,
            max_bucket_size: 16 * 1024 * 1024,
            max_attrib0_bytes: 64 * 1024 * 1024,
            max_fixed_attrib_bytes: 64 * 1024 * 1024,
            yield_signal: YieldSignal::new(),
        }
    }
}

impl DecoderConfig {
    /// Defaults overridden by `GLCMD_*` environment variables.
    ///
    /// Boolean variables accept `1`/`true`/`yes`/`on` and `0`/`false`/`no`/`off`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_var_flag("GLCMD_TRACE_COMMANDS") {
            config.trace_commands = v;
        }
        if let Some(v) = env_var_flag("GLCMD_LOG_INVALID_COMMANDS") {
            config.log_invalid_commands = v;
        }
        if let Some(v) = env_var_flag("GLCMD_EMULATE_ATTRIB0") {
            config.emulate_attrib0 = v;
        }
        if let Some(v) = env_var_flag("GLCMD_EMULATE_FIXED_ATTRIBS") {
            config.emulate_fixed_attribs = v;
        }
        if let Some(v) = env_var_flag("GLCMD_LOSE_CONTEXT_ON_OOM") {
            config.lose_context_when_out_of_memory = v;
        }
        if let Some(v) = env_var_usize("GLCMD_MAX_COMMANDS_PER_BATCH") {
            config.max_commands_per_batch = v.max(1);
        }
        if let Some(v) = env_var_usize("GLCMD_ASYNC_UPLOADS_PER_BATCH") {
            config.async_uploads_per_batch = v;
        }
        config
    }
}

fn env_var_flag(name: &str) -> Option<bool> {
    let raw = std::env::var(name).ok()?;
    let v = raw.trim();
    if v == "1"
        || v.eq_ignore_ascii_case("true")
        || v.eq_ignore_ascii_case("yes")
        || v.eq_ignore_ascii_case("on")
    {
        Some(true)
    } else if v == "0"
        || v.eq_ignore_ascii_case("false")
        || v.eq_ignore_ascii_case("no")
        || v.eq_ignore_ascii_case("off")
    {
        Some(false)
    } else {
        tracing::warn!(name, value = v, "ignoring unrecognised boolean environment value");
        None
    }
}

fn env_var_usize(name: &str) -> Option<usize> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(name, value = raw.trim(), "ignoring non-numeric environment value");
            None
        }
    }
}

/// Implementation limits reported by the driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DriverLimits {
    pub max_texture_size: u32,
    pub max_cube_map_texture_size: u32,
    pub max_renderbuffer_size: u32,
    pub max_samples: u32,
    pub max_vertex_attribs: u32,
    pub max_texture_units: u32,
}

impl Default for DriverLimits {
    fn default() -> Self {
        Self {
            max_texture_size: 4096,
            max_cube_map_texture_size: 4096,
            max_renderbuffer_size: 4096,
            max_samples: 4,
            max_vertex_attribs: 16,
            max_texture_units: 16,
        }
    }
}

impl DriverLimits {
    /// Number of mip levels a texture of `max_size` can have.
    pub fn max_levels(max_size: u32) -> u32 {
        32 - max_size.max(1).leading_zeros()
    }
}
