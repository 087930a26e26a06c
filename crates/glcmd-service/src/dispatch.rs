//! Command dispatch: header parsing, the handler table and the batch loop.
//!
//! Every command id resolves through a table of [`CommandInfo`] built once
//! per process. Ids below [`FIRST_GL_COMMAND`] are common commands; ids in
//! the GL range index the GL table, where retired slots stay empty; ids past
//! the GL range are forwarded to the common table, which does not know them
//! either.

use std::sync::OnceLock;

use glcmd_protocol::cmd::{self, Command};
use glcmd_protocol::{ArgFlags, CmdHeader, FIRST_GL_COMMAND, GL_COMMAND_SLOTS};

use crate::decoder::Decoder;
use crate::error::{CommandError, ErrorCode};

pub type Handler = fn(&mut Decoder, &[u32], &[u32]) -> Result<(), CommandError>;

/// Static description of one command.
#[derive(Clone, Copy)]
pub struct CommandInfo {
    pub id: u32,
    pub name: &'static str,
    pub arg_flags: ArgFlags,
    /// Fixed argument entries after the header.
    pub arg_count: u32,
    /// Called with the fixed arguments and the trailing immediate data.
    pub handler: Handler,
}

impl std::fmt::Debug for CommandInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandInfo")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("arg_flags", &self.arg_flags)
            .field("arg_count", &self.arg_count)
            .finish()
    }
}

impl CommandInfo {
    /// Whether `args` (header excluded) satisfies the argument-count policy.
    pub fn accepts(&self, args: usize) -> bool {
        match self.arg_flags {
            ArgFlags::Fixed => args == self.arg_count as usize,
            ArgFlags::AtLeastN => args >= self.arg_count as usize,
        }
    }
}

/// Result of one [`Decoder::process_commands`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// Entries consumed from the front of the buffer. A deferred command and
    /// everything after it are not consumed.
    pub entries_processed: usize,
    pub commands_processed: usize,
    /// `NoError`, or the reason the batch stopped early.
    pub result: ErrorCode,
    /// The batch stopped because the yield signal was raised.
    pub yielded: bool,
}

struct CommandTable {
    common: Vec<Option<CommandInfo>>,
    gl: Vec<Option<CommandInfo>>,
}

macro_rules! command_table {
    (
        fixed { $($cmd:ident => $method:ident),* $(,)? }
        immediate { $($icmd:ident => $imethod:ident),* $(,)? }
    ) => {
        fn all_commands() -> Vec<CommandInfo> {
            vec![
                $(CommandInfo {
                    id: cmd::$cmd::ID,
                    name: cmd::$cmd::NAME,
                    arg_flags: cmd::$cmd::ARG_FLAGS,
                    arg_count: cmd::$cmd::ARG_COUNT,
                    handler: |dec, args, _| {
                        let c = cmd::$cmd::decode(args)?;
                        dec.$method(c)
                    },
                },)*
                $(CommandInfo {
                    id: cmd::$icmd::ID,
                    name: cmd::$icmd::NAME,
                    arg_flags: cmd::$icmd::ARG_FLAGS,
                    arg_count: cmd::$icmd::ARG_COUNT,
                    handler: |dec, args, imm| {
                        let c = cmd::$icmd::decode(args)?;
                        dec.$imethod(c, imm)
                    },
                },)*
            ]
        }
    };
}

command_table! {
    fixed {
        SetToken => handle_set_token,
        SetBucketSize => handle_set_bucket_size,
        SetBucketData => handle_set_bucket_data,
        GetBucketStart => handle_get_bucket_start,
        GetBucketData => handle_get_bucket_data,
        DeleteBucket => handle_delete_bucket,

        ActiveTexture => handle_active_texture,
        AttachShader => handle_attach_shader,
        BindAttribLocationBucket => handle_bind_attrib_location_bucket,
        BindBuffer => handle_bind_buffer,
        BindFramebuffer => handle_bind_framebuffer,
        BindRenderbuffer => handle_bind_renderbuffer,
        BindTexture => handle_bind_texture,
        BufferData => handle_buffer_data,
        BufferSubData => handle_buffer_sub_data,
        CheckFramebufferStatus => handle_check_framebuffer_status,
        Clear => handle_clear,
        ClearColor => handle_clear_color,
        ClearDepthf => handle_clear_depthf,
        ClearStencil => handle_clear_stencil,
        ColorMask => handle_color_mask,
        CompileShader => handle_compile_shader,
        CreateProgram => handle_create_program,
        CreateShader => handle_create_shader,
        DeleteProgram => handle_delete_program,
        DeleteShader => handle_delete_shader,
        DepthMask => handle_depth_mask,
        DetachShader => handle_detach_shader,
        Disable => handle_disable,
        DisableVertexAttribArray => handle_disable_vertex_attrib_array,
        DrawArrays => handle_draw_arrays,
        DrawElements => handle_draw_elements,
        Enable => handle_enable,
        EnableVertexAttribArray => handle_enable_vertex_attrib_array,
        Finish => handle_finish,
        Flush => handle_flush,
        FramebufferRenderbuffer => handle_framebuffer_renderbuffer,
        FramebufferTexture2D => handle_framebuffer_texture_2d,
        GetError => handle_get_error,
        GetProgramiv => handle_get_programiv,
        GetShaderiv => handle_get_shaderiv,
        GetShaderInfoLog => handle_get_shader_info_log,
        GetProgramInfoLog => handle_get_program_info_log,
        GetAttribLocation => handle_get_attrib_location,
        GetUniformLocation => handle_get_uniform_location,
        GetVertexAttribfv => handle_get_vertex_attribfv,
        GetVertexAttribiv => handle_get_vertex_attribiv,
        LinkProgram => handle_link_program,
        PixelStorei => handle_pixel_storei,
        ReadPixels => handle_read_pixels,
        RenderbufferStorage => handle_renderbuffer_storage,
        RenderbufferStorageMultisample => handle_renderbuffer_storage_multisample,
        Scissor => handle_scissor,
        ShaderSourceBucket => handle_shader_source_bucket,
        StencilMask => handle_stencil_mask,
        TexImage2D => handle_tex_image_2d,
        TexParameteri => handle_tex_parameteri,
        TexStorage2D => handle_tex_storage_2d,
        TexSubImage2D => handle_tex_sub_image_2d,
        Uniform1i => handle_uniform_1i,
        Uniform4f => handle_uniform_4f,
        UseProgram => handle_use_program,
        VertexAttrib4f => handle_vertex_attrib_4f,
        VertexAttribPointer => handle_vertex_attrib_pointer,
        Viewport => handle_viewport,
        BeginQuery => handle_begin_query,
        EndQuery => handle_end_query,
        BindVertexArray => handle_bind_vertex_array,
        AsyncTexImage2D => handle_async_tex_image_2d,
        AsyncTexSubImage2D => handle_async_tex_sub_image_2d,
        WaitAsyncTexImage2D => handle_wait_async_tex_image_2d,
        WaitAllAsyncTexImage2D => handle_wait_all_async_tex_image_2d,
        BindTexImage2D => handle_bind_tex_image_2d,
        ReleaseTexImage2D => handle_release_tex_image_2d,
        BindValuebuffer => handle_bind_valuebuffer,
        SubscribeValue => handle_subscribe_value,
        PopulateSubscribedValues => handle_populate_subscribed_values,
        UniformValuebuffer => handle_uniform_valuebuffer,
        WaitSyncPoint => handle_wait_sync_point,
        LoseContext => handle_lose_context,
    }
    immediate {
        Noop => handle_noop,
        SetBucketDataImmediate => handle_set_bucket_data_immediate,
        DeleteBuffersImmediate => handle_delete_buffers,
        DeleteFramebuffersImmediate => handle_delete_framebuffers,
        DeleteRenderbuffersImmediate => handle_delete_renderbuffers,
        DeleteTexturesImmediate => handle_delete_textures,
        GenBuffersImmediate => handle_gen_buffers,
        GenFramebuffersImmediate => handle_gen_framebuffers,
        GenRenderbuffersImmediate => handle_gen_renderbuffers,
        GenTexturesImmediate => handle_gen_textures,
        GenQueriesImmediate => handle_gen_queries,
        DeleteQueriesImmediate => handle_delete_queries,
        GenVertexArraysImmediate => handle_gen_vertex_arrays,
        DeleteVertexArraysImmediate => handle_delete_vertex_arrays,
        GenValuebuffersImmediate => handle_gen_valuebuffers,
        DeleteValuebuffersImmediate => handle_delete_valuebuffers,
    }
}

fn table() -> &'static CommandTable {
    static TABLE: OnceLock<CommandTable> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = CommandTable {
            common: vec![None; FIRST_GL_COMMAND as usize],
            gl: vec![None; GL_COMMAND_SLOTS as usize],
        };
        for info in all_commands() {
            let slot = if info.id < FIRST_GL_COMMAND {
                &mut table.common[info.id as usize]
            } else {
                &mut table.gl[(info.id - FIRST_GL_COMMAND) as usize]
            };
            *slot = Some(info);
        }
        table
    })
}

/// Handler metadata for `id`, if any command is assigned to it.
pub fn lookup(id: u32) -> Option<&'static CommandInfo> {
    let table = table();
    if id < FIRST_GL_COMMAND {
        return table.common[id as usize].as_ref();
    }
    let slot = id - FIRST_GL_COMMAND;
    if slot < GL_COMMAND_SLOTS {
        return table.gl[slot as usize].as_ref();
    }
    // Past the GL range: the common table is the only other place an id
    // could live, and it only covers low ids.
    table.common.get(id as usize).and_then(Option::as_ref)
}

impl Decoder {
    /// Executes commands from the front of `entries` until the buffer is
    /// exhausted, a command fails, the yield signal is raised or the
    /// per-batch command limit is reached.
    ///
    /// A command with size 0 or running past the end of `entries` is
    /// rejected without consuming anything. Any other failure consumes the
    /// failing command and stops the batch, except `Deferred`, which leaves
    /// the command for resubmission.
    pub fn process_commands(&mut self, entries: &[u32]) -> ProcessOutcome {
        let span = tracing::debug_span!("process_commands", entries = entries.len());
        let _enter = span.enter();
        self.stats.inc_batches();

        let mut outcome = ProcessOutcome::default();
        if !self.begin_batch() {
            outcome.result = ErrorCode::LostContext;
            return outcome;
        }

        let mut pos = 0usize;
        while pos < entries.len() {
            if outcome.commands_processed >= self.config.max_commands_per_batch {
                break;
            }
            let header = CmdHeader::from_entry(entries[pos]);
            let size = header.size as usize;
            if size == 0 {
                self.protocol_error(header.command, &CommandError::invalid("zero-sized command"));
                outcome.result = ErrorCode::InvalidArguments;
                break;
            }
            if size > entries.len() - pos {
                tracing::warn!(
                    command = header.command,
                    size,
                    remaining = entries.len() - pos,
                    "command runs past the end of the buffer"
                );
                self.stats.inc_protocol_errors();
                outcome.result = ErrorCode::OutOfBounds;
                break;
            }

            let args = &entries[pos + 1..pos + size];
            let result = self.execute(header.command, args);
            if let Err(CommandError::Deferred) = result {
                tracing::trace!(command = header.command, "command deferred");
                self.stats.inc_deferrals();
                outcome.result = ErrorCode::Deferred;
                break;
            }

            pos += size;
            outcome.commands_processed += 1;
            self.commands_issued += 1;

            if let Err(err) = result {
                self.protocol_error(header.command, &err);
                outcome.result = err.code();
                break;
            }
            if self.loss.is_lost() {
                outcome.result = ErrorCode::LostContext;
                break;
            }
            if self.config.yield_signal.take() {
                tracing::trace!(commands = outcome.commands_processed, "yielding");
                self.stats.inc_yields();
                outcome.yielded = true;
                break;
            }
        }

        self.stats.add_commands(outcome.commands_processed as u64);
        outcome.entries_processed = pos;
        self.end_batch();
        if self.loss.is_lost() {
            outcome.result = ErrorCode::LostContext;
        }
        outcome
    }

    fn execute(&mut self, id: u32, args: &[u32]) -> Result<(), CommandError> {
        let info = lookup(id).ok_or(CommandError::UnknownCommand(id))?;
        if !info.accepts(args.len()) {
            return Err(CommandError::invalid(format!(
                "{} takes {} argument entries, got {}",
                info.name,
                info.arg_count,
                args.len()
            )));
        }
        if self.config.trace_commands {
            tracing::trace!(command = info.name, entries = args.len() + 1, "execute");
        }
        let (fixed, immediate) = args.split_at(info.arg_count as usize);
        (info.handler)(self, fixed, immediate)
    }

    fn protocol_error(&self, id: u32, err: &CommandError) {
        self.stats.inc_protocol_errors();
        if self.config.log_invalid_commands {
            let name = cmd::command_name(id).unwrap_or("<unknown>");
            tracing::warn!(command = name, id, error = %err, "command failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_protocol_command_has_a_handler() {
        for (id, name) in cmd::ALL_COMMANDS {
            let info = lookup(*id).unwrap_or_else(|| panic!("{name} has no handler"));
            assert_eq!(info.name, *name);
        }
    }

    #[test]
    fn retired_and_out_of_range_ids_are_unknown() {
        assert!(lookup(0x112).is_none());
        assert!(lookup(0x140).is_none());
        assert!(lookup(FIRST_GL_COMMAND + GL_COMMAND_SLOTS).is_none());
        assert!(lookup(0x7FF).is_none());
        assert!(lookup(0x050).is_none());
    }

    #[test]
    fn argument_policy() {
        let draw = lookup(cmd::DrawArrays::ID).unwrap();
        assert!(draw.accepts(3));
        assert!(!draw.accepts(4));
        let gen = lookup(cmd::GenBuffersImmediate::ID).unwrap();
        assert!(gen.accepts(1));
        assert!(gen.accepts(5));
        assert!(!gen.accepts(0));
    }
}
