//! Safe command buffer builder.
//!
//! Intended for tests, fixtures and tooling that need canonical command
//! buffers (correct header sizes, immediate data padded to whole entries).

use crate::cmd::{
    self, entries_for_bytes, CmdHeader, Command, ENTRY_SIZE_BYTES, MAX_COMMAND_SIZE_ENTRIES,
};

#[derive(Debug, Default, Clone)]
pub struct CmdWriter {
    entries: Vec<u32>,
}

impl CmdWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len_entries(&self) -> usize {
        self.entries.len()
    }

    pub fn as_entries(&self) -> &[u32] {
        &self.entries
    }

    pub fn finish(self) -> Vec<u32> {
        self.entries
    }

    /// Appends a fixed-size command.
    pub fn push<C: Command>(&mut self, cmd: C) -> &mut Self {
        self.push_with_data::<C>(cmd, &[])
    }

    /// Appends a command followed by immediate entries.
    pub fn push_with_data<C: Command>(&mut self, cmd: C, data: &[u32]) -> &mut Self {
        let size = 1 + C::ARG_COUNT as usize + data.len();
        assert!(
            size <= MAX_COMMAND_SIZE_ENTRIES as usize,
            "command too large for the 21-bit size field"
        );
        self.entries.push(
            CmdHeader {
                size: size as u32,
                command: C::ID,
            }
            .to_entry(),
        );
        cmd.encode(&mut self.entries);
        self.entries.extend_from_slice(data);
        self
    }

    /// Appends a command followed by immediate bytes, zero-padded to a whole entry.
    pub fn push_with_bytes<C: Command>(&mut self, cmd: C, bytes: &[u8]) -> &mut Self {
        let mut data = vec![0u32; entries_for_bytes(bytes.len())];
        for (i, chunk) in bytes.chunks(ENTRY_SIZE_BYTES).enumerate() {
            let mut word = [0u8; ENTRY_SIZE_BYTES];
            word[..chunk.len()].copy_from_slice(chunk);
            data[i] = u32::from_le_bytes(word);
        }
        self.push_with_data::<C>(cmd, &data)
    }

    /// Appends an arbitrary header and payload. Used to build malformed buffers.
    pub fn push_raw(&mut self, header: CmdHeader, payload: &[u32]) -> &mut Self {
        self.entries.push(header.to_entry());
        self.entries.extend_from_slice(payload);
        self
    }

    pub fn set_token(&mut self, token: u32) -> &mut Self {
        self.push(cmd::SetToken { token })
    }

    pub fn set_bucket_data_immediate(&mut self, bucket_id: u32, bytes: &[u8]) -> &mut Self {
        self.push(cmd::SetBucketSize {
            bucket_id,
            size: bytes.len() as u32,
        });
        self.push_with_bytes(
            cmd::SetBucketDataImmediate {
                bucket_id,
                offset: 0,
                size: bytes.len() as u32,
            },
            bytes,
        )
    }

    pub fn gen_buffers(&mut self, ids: &[u32]) -> &mut Self {
        self.push_with_data(cmd::GenBuffersImmediate { n: ids.len() as u32 }, ids)
    }

    pub fn delete_buffers(&mut self, ids: &[u32]) -> &mut Self {
        self.push_with_data(cmd::DeleteBuffersImmediate { n: ids.len() as u32 }, ids)
    }

    pub fn gen_textures(&mut self, ids: &[u32]) -> &mut Self {
        self.push_with_data(cmd::GenTexturesImmediate { n: ids.len() as u32 }, ids)
    }

    pub fn delete_textures(&mut self, ids: &[u32]) -> &mut Self {
        self.push_with_data(cmd::DeleteTexturesImmediate { n: ids.len() as u32 }, ids)
    }

    pub fn gen_framebuffers(&mut self, ids: &[u32]) -> &mut Self {
        self.push_with_data(cmd::GenFramebuffersImmediate { n: ids.len() as u32 }, ids)
    }

    pub fn delete_framebuffers(&mut self, ids: &[u32]) -> &mut Self {
        self.push_with_data(cmd::DeleteFramebuffersImmediate { n: ids.len() as u32 }, ids)
    }

    pub fn gen_renderbuffers(&mut self, ids: &[u32]) -> &mut Self {
        self.push_with_data(cmd::GenRenderbuffersImmediate { n: ids.len() as u32 }, ids)
    }

    pub fn delete_renderbuffers(&mut self, ids: &[u32]) -> &mut Self {
        self.push_with_data(cmd::DeleteRenderbuffersImmediate { n: ids.len() as u32 }, ids)
    }

    pub fn gen_queries(&mut self, ids: &[u32]) -> &mut Self {
        self.push_with_data(cmd::GenQueriesImmediate { n: ids.len() as u32 }, ids)
    }

    pub fn delete_queries(&mut self, ids: &[u32]) -> &mut Self {
        self.push_with_data(cmd::DeleteQueriesImmediate { n: ids.len() as u32 }, ids)
    }

    pub fn gen_vertex_arrays(&mut self, ids: &[u32]) -> &mut Self {
        self.push_with_data(cmd::GenVertexArraysImmediate { n: ids.len() as u32 }, ids)
    }

    pub fn delete_vertex_arrays(&mut self, ids: &[u32]) -> &mut Self {
        self.push_with_data(cmd::DeleteVertexArraysImmediate { n: ids.len() as u32 }, ids)
    }

    pub fn gen_valuebuffers(&mut self, ids: &[u32]) -> &mut Self {
        self.push_with_data(cmd::GenValuebuffersImmediate { n: ids.len() as u32 }, ids)
    }

    pub fn delete_valuebuffers(&mut self, ids: &[u32]) -> &mut Self {
        self.push_with_data(cmd::DeleteValuebuffersImmediate { n: ids.len() as u32 }, ids)
    }

    /// Uploads `source` through bucket `bucket_id` and issues `ShaderSourceBucket`.
    pub fn shader_source(&mut self, shader: u32, bucket_id: u32, source: &str) -> &mut Self {
        self.set_bucket_data_immediate(bucket_id, source.as_bytes());
        self.push(cmd::ShaderSourceBucket {
            shader,
            str_bucket_id: bucket_id,
        })
    }
}
