//! Result codes and GL error bookkeeping.

use bitflags::bitflags;
use glcmd_protocol::{gl, CmdDecodeError};
use thiserror::Error;

use crate::shared_memory::SharedMemoryError;

/// Result code of a command batch, as surfaced to the owner of the decoder.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize)]
pub enum ErrorCode {
    #[default]
    NoError,
    InvalidArguments,
    OutOfBounds,
    /// The command cannot run yet; resubmit it later.
    Deferred,
    LostContext,
    UnknownCommand,
    GenericError,
}

impl ErrorCode {
    pub fn is_error(self) -> bool {
        !matches!(self, ErrorCode::NoError)
    }
}

/// Protocol-level failure of a single command.
///
/// GL validation failures are not `CommandError`s: they are recorded in the
/// decoder's [`ErrorState`] and processing continues.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error(transparent)]
    OutOfBounds(#[from] SharedMemoryError),

    #[error("command deferred")]
    Deferred,

    #[error("context lost")]
    LostContext,

    #[error("unknown command id {0:#x}")]
    UnknownCommand(u32),

    #[error("{0}")]
    Generic(String),
}

impl CommandError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        CommandError::InvalidArguments(msg.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            CommandError::InvalidArguments(_) => ErrorCode::InvalidArguments,
            CommandError::OutOfBounds(_) => ErrorCode::OutOfBounds,
            CommandError::Deferred => ErrorCode::Deferred,
            CommandError::LostContext => ErrorCode::LostContext,
            CommandError::UnknownCommand(_) => ErrorCode::UnknownCommand,
            CommandError::Generic(_) => ErrorCode::GenericError,
        }
    }
}

impl From<CmdDecodeError> for CommandError {
    fn from(err: CmdDecodeError) -> Self {
        CommandError::InvalidArguments(err.to_string())
    }
}

/// A GL error that can be recorded on the context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GlError {
    InvalidEnum,
    InvalidValue,
    InvalidOperation,
    OutOfMemory,
    InvalidFramebufferOperation,
}

impl GlError {
    pub fn to_gl(self) -> u32 {
        match self {
            GlError::InvalidEnum => gl::INVALID_ENUM,
            GlError::InvalidValue => gl::INVALID_VALUE,
            GlError::InvalidOperation => gl::INVALID_OPERATION,
            GlError::OutOfMemory => gl::OUT_OF_MEMORY,
            GlError::InvalidFramebufferOperation => gl::INVALID_FRAMEBUFFER_OPERATION,
        }
    }

    pub fn from_gl(code: u32) -> Option<Self> {
        match code {
            gl::INVALID_ENUM => Some(GlError::InvalidEnum),
            gl::INVALID_VALUE => Some(GlError::InvalidValue),
            gl::INVALID_OPERATION => Some(GlError::InvalidOperation),
            gl::OUT_OF_MEMORY => Some(GlError::OutOfMemory),
            gl::INVALID_FRAMEBUFFER_OPERATION => Some(GlError::InvalidFramebufferOperation),
            _ => None,
        }
    }

    fn flag(self) -> GlErrorFlags {
        match self {
            GlError::InvalidEnum => GlErrorFlags::INVALID_ENUM,
            GlError::InvalidValue => GlErrorFlags::INVALID_VALUE,
            GlError::InvalidOperation => GlErrorFlags::INVALID_OPERATION,
            GlError::OutOfMemory => GlErrorFlags::OUT_OF_MEMORY,
            GlError::InvalidFramebufferOperation => GlErrorFlags::INVALID_FRAMEBUFFER_OPERATION,
        }
    }
}

bitflags! {
    /// Pending GL errors. Bits are ordered by GL error code.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct GlErrorFlags: u32 {
        const INVALID_ENUM = 1 << 0;
        const INVALID_VALUE = 1 << 1;
        const INVALID_OPERATION = 1 << 2;
        const OUT_OF_MEMORY = 1 << 3;
        const INVALID_FRAMEBUFFER_OPERATION = 1 << 4;
    }
}

const FLAG_ORDER: [GlError; 5] = [
    GlError::InvalidEnum,
    GlError::InvalidValue,
    GlError::InvalidOperation,
    GlError::OutOfMemory,
    GlError::InvalidFramebufferOperation,
];

/// GL errors recorded on a context and not yet fetched by `GetError`.
#[derive(Debug, Default)]
pub struct ErrorState {
    pending: GlErrorFlags,
    recorded: u64,
}

impl ErrorState {
    pub fn record(&mut self, error: GlError, function: &str, msg: &str) {
        tracing::debug!(code = error.to_gl(), function, "GL error: {msg}");
        self.pending |= error.flag();
        self.recorded += 1;
    }

    /// Folds an error reported by the driver itself.
    pub fn record_driver_error(&mut self, code: u32) -> Option<GlError> {
        let error = GlError::from_gl(code)?;
        self.record(error, "driver", "error reported by the driver");
        Some(error)
    }

    /// Returns and clears the lowest pending error.
    pub fn take(&mut self) -> Option<GlError> {
        let error = FLAG_ORDER
            .into_iter()
            .find(|e| self.pending.contains(e.flag()))?;
        self.pending.remove(error.flag());
        Some(error)
    }

    pub fn peek(&self) -> Option<GlError> {
        FLAG_ORDER
            .into_iter()
            .find(|e| self.pending.contains(e.flag()))
    }

    pub fn pending(&self) -> GlErrorFlags {
        self.pending
    }

    /// Total errors recorded over the lifetime of the context.
    pub fn recorded(&self) -> u64 {
        self.recorded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_returns_lowest_code_first() {
        let mut state = ErrorState::default();
        state.record(GlError::InvalidOperation, "glTest", "op");
        state.record(GlError::InvalidEnum, "glTest", "enum");
        state.record(GlError::InvalidEnum, "glTest", "enum again");

        assert_eq!(state.take(), Some(GlError::InvalidEnum));
        assert_eq!(state.take(), Some(GlError::InvalidOperation));
        assert_eq!(state.take(), None);
        assert_eq!(state.recorded(), 3);
    }

    #[test]
    fn driver_errors_fold_into_pending_set() {
        let mut state = ErrorState::default();
        assert_eq!(
            state.record_driver_error(gl::OUT_OF_MEMORY),
            Some(GlError::OutOfMemory)
        );
        assert_eq!(state.record_driver_error(gl::NO_ERROR), None);
        assert_eq!(state.pending(), GlErrorFlags::OUT_OF_MEMORY);
    }

    #[test]
    fn command_errors_map_to_codes() {
        assert_eq!(CommandError::Deferred.code(), ErrorCode::Deferred);
        assert_eq!(
            CommandError::from(CmdDecodeError::TooFewArgs {
                expected: 2,
                found: 1
            })
            .code(),
            ErrorCode::InvalidArguments
        );
        assert_eq!(
            CommandError::UnknownCommand(0x1ff).to_string(),
            "unknown command id 0x1ff"
        );
    }
}
