//! Unit-test harness: a decoder over a [`SoftwareDriver`] with one region of
//! shared memory registered.

use std::rc::Rc;

use glcmd_protocol::cmd::{
    AttachShader, CompileShader, CreateProgram, CreateShader, GetUniformLocation, LinkProgram,
};
use glcmd_protocol::{gl, CmdWriter};

use crate::config::{DecoderConfig, DriverLimits};
use crate::decoder::Decoder;
use crate::dispatch::ProcessOutcome;
use crate::driver::SoftwareDriver;
use crate::error::{ErrorCode, GlError};
use crate::resources::ResourceGroup;
use crate::shared_memory::VecSharedMemory;

pub(crate) const VERTEX_SOURCE: &str = "attribute vec4 a_position; attribute vec2 a_texcoord; \
     uniform vec4 u_color; void main() { gl_Position = a_position; }";
pub(crate) const FRAGMENT_SOURCE: &str = "uniform sampler2D u_texture; void main() { }";

const SHM_SIZE: usize = 64 * 1024;
/// Offset the helpers below use for their own results.
const SCRATCH: u32 = 0xF000;
const SCRATCH_BUCKET: u32 = 0xFFFF;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub(crate) struct Harness {
    pub decoder: Decoder,
    pub driver: SoftwareDriver,
    pub shm_id: u32,
    shm: Rc<VecSharedMemory>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_limits(DriverLimits::default())
    }

    pub fn with_limits(limits: DriverLimits) -> Self {
        init_tracing();
        let driver = SoftwareDriver::with_limits(64, 64, limits);
        let group = ResourceGroup::shared(true);
        let mut decoder = Decoder::new(DecoderConfig::default(), Box::new(driver.clone()), group);
        let shm = Rc::new(VecSharedMemory::new(SHM_SIZE));
        let shm_id = 1;
        decoder
            .register_shared_memory(shm_id, shm.clone())
            .expect("fresh shared memory id");
        Self {
            decoder,
            driver,
            shm_id,
            shm,
        }
    }

    pub fn run(&mut self, w: &CmdWriter) -> ProcessOutcome {
        self.decoder.process_commands(w.as_entries())
    }

    /// Runs `w` and expects every command to be consumed without a protocol
    /// error.
    pub fn run_ok(&mut self, w: &CmdWriter) {
        let outcome = self.run(w);
        assert_eq!(outcome.result, ErrorCode::NoError, "batch failed: {outcome:?}");
        assert_eq!(outcome.entries_processed, w.len_entries());
    }

    /// Consumes the pending GL error, as `GetError` would.
    pub fn take_error(&mut self) -> u32 {
        self.decoder.errors.take().map_or(gl::NO_ERROR, GlError::to_gl)
    }

    pub fn read_u32(&self, offset: u32) -> u32 {
        let bytes = self.read_bytes(offset, 4);
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    pub fn read_bytes(&self, offset: u32, len: usize) -> Vec<u8> {
        let start = offset as usize;
        self.shm.as_slice()[start..start + len].to_vec()
    }

    pub fn write_bytes(&self, offset: u32, bytes: &[u8]) {
        let start = offset as usize;
        self.shm.as_mut_slice()[start..start + bytes.len()].copy_from_slice(bytes);
    }

    /// Creates, compiles and links program `id` from two shaders whose ids
    /// are derived from it.
    pub fn build_program(&mut self, id: u32, vertex: &str, fragment: &str) {
        let (vs, fs) = (1000 + 2 * id, 1001 + 2 * id);
        let mut w = CmdWriter::new();
        w.push(CreateShader {
            shader_type: gl::VERTEX_SHADER,
            client_id: vs,
        });
        w.push(CreateShader {
            shader_type: gl::FRAGMENT_SHADER,
            client_id: fs,
        });
        w.shader_source(vs, SCRATCH_BUCKET, vertex);
        w.push(CompileShader { shader: vs });
        w.shader_source(fs, SCRATCH_BUCKET, fragment);
        w.push(CompileShader { shader: fs });
        w.push(CreateProgram { client_id: id });
        w.push(AttachShader {
            program: id,
            shader: vs,
        });
        w.push(AttachShader {
            program: id,
            shader: fs,
        });
        w.push(LinkProgram { program: id });
        self.run_ok(&w);
    }

    pub fn uniform_location(&mut self, program: u32, name: &str) -> i32 {
        self.write_bytes(SCRATCH, &(-1i32).to_le_bytes());
        let mut w = CmdWriter::new();
        w.set_bucket_data_immediate(SCRATCH_BUCKET, name.as_bytes());
        w.push(GetUniformLocation {
            program,
            name_bucket_id: SCRATCH_BUCKET,
            result_shm_id: self.shm_id,
            result_shm_offset: SCRATCH,
        });
        self.run_ok(&w);
        self.read_u32(SCRATCH) as i32
    }
}
