//! Wire format of the glcmd command buffer.
//!
//! - [`cmd`]: entry/header encoding, the command set and client-visible result layouts.
//! - [`gl`]: GL enum values carried in command arguments.
//! - [`writer`]: a safe builder for canonical command buffers.

pub mod cmd;
pub mod gl;
pub mod writer;

pub use cmd::{
    ArgFlags, CmdArg, CmdDecodeError, CmdHeader, Command, ENTRY_SIZE_BYTES, FIRST_GL_COMMAND,
    GL_COMMAND_SLOTS,
};
pub use writer::CmdWriter;
