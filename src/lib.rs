//! glcmd: a validating decoder for a GL command buffer.
//!
//! [`protocol`] holds the wire format shared with clients and [`service`]
//! holds the decoder that replays it against a driver.

pub use glcmd_protocol as protocol;
pub use glcmd_service as service;

pub use glcmd_protocol::CmdWriter;
pub use glcmd_service::{
    Decoder, DecoderConfig, Driver, ErrorCode, ProcessOutcome, ResourceGroup, SoftwareDriver,
};
