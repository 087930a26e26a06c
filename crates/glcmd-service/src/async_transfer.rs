//! Deferred texture uploads and fenced read-backs.
//!
//! Uploads are queued with their pixels already copied out of client memory
//! and executed by the decoder at idle points (end of batch, bounded per
//! batch) or when something needs the texture: a draw sampling it,
//! `WaitAsyncTexImage2D`, `WaitAllAsyncTexImage2D`. Completion always happens
//! in submission order so the tokens the client sees only ever grow.

use std::collections::VecDeque;

use glcmd_protocol::cmd::ReadPixelsResult;
use thiserror::Error;

use crate::driver::FenceId;
use crate::resources::{TextureKey, TextureUpload};
use crate::shared_memory::{SharedMemoryError, SharedMemoryRegistry};

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum TransferError {
    #[error("an asynchronous upload is already in progress for this texture")]
    AlreadyInProgress,
}

/// Runs once the upload has landed, typically to publish a token to the client.
pub type CompletionCallback =
    Box<dyn FnOnce(&SharedMemoryRegistry) -> Result<(), SharedMemoryError>>;

#[derive(Debug)]
pub struct UploadParams {
    /// `TEXTURE_2D` or a cube face.
    pub target: u32,
    pub level: u32,
    pub format: u32,
    pub ty: u32,
    pub upload: TextureUpload,
    pub pixels: Vec<u8>,
    /// `UNPACK_ALIGNMENT` the pixels were copied with.
    pub unpack_alignment: u32,
}

pub struct PendingUpload {
    pub texture: TextureKey,
    pub params: UploadParams,
    pub serial: u64,
    pub on_complete: Option<CompletionCallback>,
}

impl std::fmt::Debug for PendingUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingUpload")
            .field("texture", &self.texture)
            .field("target", &self.params.target)
            .field("level", &self.params.level)
            .field("bytes", &self.params.pixels.len())
            .field("serial", &self.serial)
            .finish()
    }
}

/// A `ReadPixels` whose pixels wait behind a driver fence.
#[derive(Debug)]
pub struct PendingReadback {
    pub fence: FenceId,
    pub pixels: Vec<u8>,
    pub pixels_shm_id: u32,
    pub pixels_shm_offset: u32,
    pub result_shm_id: u32,
    pub result_shm_offset: u32,
    pub result: ReadPixelsResult,
}

#[derive(Debug, Default)]
pub struct AsyncPixelTransferManager {
    uploads: VecDeque<PendingUpload>,
    readbacks: VecDeque<PendingReadback>,
    last_serial: u64,
    completed_serial: u64,
}

impl AsyncPixelTransferManager {
    pub fn is_in_flight(&self, texture: TextureKey) -> bool {
        self.uploads.iter().any(|u| u.texture == texture)
    }

    pub fn has_pending_uploads(&self) -> bool {
        !self.uploads.is_empty()
    }

    pub fn pending_uploads(&self) -> usize {
        self.uploads.len()
    }

    /// Queues an upload. A texture has at most one upload in flight.
    pub fn submit(
        &mut self,
        texture: TextureKey,
        params: UploadParams,
        on_complete: Option<CompletionCallback>,
    ) -> Result<u64, TransferError> {
        if self.is_in_flight(texture) {
            return Err(TransferError::AlreadyInProgress);
        }
        self.last_serial += 1;
        self.uploads.push_back(PendingUpload {
            texture,
            params,
            serial: self.last_serial,
            on_complete,
        });
        Ok(self.last_serial)
    }

    /// Serial of the most recently submitted upload.
    pub fn last_serial(&self) -> u64 {
        self.last_serial
    }

    /// Every upload with a serial up to this one has completed.
    pub fn completed_serial(&self) -> u64 {
        self.completed_serial
    }

    /// Next upload to execute, oldest first.
    pub fn next_upload(&mut self) -> Option<PendingUpload> {
        self.uploads.pop_front()
    }

    /// Uploads that must run before `texture` is usable: its own and every
    /// older one.
    pub fn uploads_through(&mut self, texture: TextureKey) -> Vec<PendingUpload> {
        let Some(pos) = self.uploads.iter().position(|u| u.texture == texture) else {
            return Vec::new();
        };
        self.uploads.drain(..=pos).collect()
    }

    pub fn take_all_uploads(&mut self) -> Vec<PendingUpload> {
        self.uploads.drain(..).collect()
    }

    pub fn mark_completed(&mut self, serial: u64) {
        self.completed_serial = self.completed_serial.max(serial);
    }

    pub fn queue_readback(&mut self, readback: PendingReadback) {
        self.readbacks.push_back(readback);
    }

    pub fn has_pending_readbacks(&self) -> bool {
        !self.readbacks.is_empty()
    }

    /// Pops the oldest read-back if `ready` says its fence has passed.
    pub fn pop_readback_if(
        &mut self,
        ready: impl FnOnce(FenceId) -> bool,
    ) -> Option<PendingReadback> {
        let fence = self.readbacks.front()?.fence;
        if ready(fence) {
            self.readbacks.pop_front()
        } else {
            None
        }
    }

    pub fn take_all_readbacks(&mut self) -> Vec<PendingReadback> {
        self.readbacks.drain(..).collect()
    }
}
