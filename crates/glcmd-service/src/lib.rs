//! Service side of the glcmd command buffer.
//!
//! A client process writes GL commands into a ring of 32-bit entries and
//! bulk data into shared memory. The [`Decoder`] validates every command
//! against its own shadow of the GL state before forwarding it to a
//! [`Driver`], so a misbehaving client can produce GL errors or lose its own
//! context but never reach undefined driver behaviour.
//!
//! - [`dispatch`]: header parsing and the batch loop.
//! - [`decoder`]: per-context state and the command handlers.
//! - [`resources`]: objects shared between decoders of one share group.
//! - [`driver`]: the driver abstraction and a software implementation.
//! - [`async_transfer`]: deferred texture uploads and fenced read-backs.

pub mod async_transfer;
pub mod config;
pub mod context_lost;
pub mod decoder;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod resources;
pub mod shared_memory;
pub mod state;
pub mod stats;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{DecoderConfig, DriverLimits, YieldSignal};
pub use context_lost::{ContextLossState, LossObserver, LossReason};
pub use decoder::{Decoder, SyncPointOracle};
pub use dispatch::ProcessOutcome;
pub use driver::{Driver, ResetStatus, SoftwareDriver};
pub use error::{CommandError, ErrorCode, GlError};
pub use resources::{ResourceGroup, SharedResourceGroup};
pub use shared_memory::{SharedMemory, SharedMemoryError, VecSharedMemory};
pub use stats::{DecoderStats, DecoderStatsSnapshot};
