#![allow(dead_code)]

//! End-to-end client: builds command buffers with [`CmdWriter`], runs them
//! through a [`Decoder`] over the [`SoftwareDriver`] and reads results back
//! out of shared memory, the way a client process would.

use std::rc::Rc;

use anyhow::{bail, Result};
use glcmd::protocol::cmd::{
    AttachShader, CompileShader, CreateProgram, CreateShader, GetError, LinkProgram,
};
use glcmd::protocol::{gl, CmdWriter};
use glcmd::service::{
    Decoder, DecoderConfig, ErrorCode, ProcessOutcome, ResourceGroup, SharedResourceGroup,
    SoftwareDriver, VecSharedMemory,
};

pub const SHM_ID: u32 = 7;
const SHM_SIZE: usize = 64 * 1024;
/// Offset reserved for `GetError` results.
const ERROR_SLOT: u32 = 0xFFF0;
const SOURCE_BUCKET: u32 = 0x100;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct Client {
    pub decoder: Decoder,
    pub driver: SoftwareDriver,
    shm: Rc<VecSharedMemory>,
}

impl Client {
    pub fn new(config: DecoderConfig) -> Result<Self> {
        Self::in_group(config, ResourceGroup::shared(true))
    }

    pub fn in_group(config: DecoderConfig, group: SharedResourceGroup) -> Result<Self> {
        init_tracing();
        let driver = SoftwareDriver::new(16, 16);
        let mut decoder = Decoder::new(config, Box::new(driver.clone()), group);
        let shm = Rc::new(VecSharedMemory::new(SHM_SIZE));
        decoder.register_shared_memory(SHM_ID, shm.clone())?;
        Ok(Self {
            decoder,
            driver,
            shm,
        })
    }

    pub fn run(&mut self, w: &CmdWriter) -> ProcessOutcome {
        self.decoder.process_commands(w.as_entries())
    }

    /// Runs `w`, failing unless every entry was consumed cleanly.
    pub fn submit(&mut self, w: &CmdWriter) -> Result<()> {
        let outcome = self.run(w);
        if outcome.result != ErrorCode::NoError || outcome.entries_processed != w.len_entries() {
            bail!("batch stopped early: {outcome:?}");
        }
        Ok(())
    }

    /// Issues `GetError` and returns the code it wrote.
    pub fn get_error(&mut self) -> Result<u32> {
        let mut w = CmdWriter::new();
        w.push(GetError {
            result_shm_id: SHM_ID,
            result_shm_offset: ERROR_SLOT,
        });
        self.submit(&w)?;
        Ok(self.read_u32(ERROR_SLOT))
    }

    pub fn read(&self, offset: u32, len: usize) -> Vec<u8> {
        let start = offset as usize;
        self.shm.as_slice()[start..start + len].to_vec()
    }

    pub fn read_u32(&self, offset: u32) -> u32 {
        let b = self.read(offset, 4);
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    pub fn write(&self, offset: u32, bytes: &[u8]) {
        let start = offset as usize;
        self.shm.as_mut_slice()[start..start + bytes.len()].copy_from_slice(bytes);
    }

    /// Builds and links program `id` with shaders `id + 1` and `id + 2`.
    pub fn link_program(&mut self, id: u32, vertex: &str, fragment: &str) -> Result<()> {
        let (vs, fs) = (id + 1, id + 2);
        let mut w = CmdWriter::new();
        w.push(CreateShader {
            shader_type: gl::VERTEX_SHADER,
            client_id: vs,
        });
        w.push(CreateShader {
            shader_type: gl::FRAGMENT_SHADER,
            client_id: fs,
        });
        w.shader_source(vs, SOURCE_BUCKET, vertex);
        w.push(CompileShader { shader: vs });
        w.shader_source(fs, SOURCE_BUCKET, fragment);
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
        self.submit(&w)
    }
}
