//! Asynchronous texture uploads and pixel read-back.

use glcmd_protocol::cmd::{
    AsyncTexImage2D, AsyncTexSubImage2D, AsyncUploadSync, ReadPixels, ReadPixelsResult,
    WaitAllAsyncTexImage2D, WaitAsyncTexImage2D,
};
use glcmd_protocol::gl;

use super::textures::image_size;
use super::Decoder;
use crate::async_transfer::{CompletionCallback, PendingReadback, PendingUpload, UploadParams};
use crate::driver::Driver;
use crate::error::{CommandError, GlError};
use crate::resources::{Attachment, TextureKey, TextureUpload};

/// Runs `f` with the driver's `UNPACK_ALIGNMENT` at `upload`, then puts the
/// client's `current` value back.
fn with_unpack_alignment<R>(
    driver: &mut dyn Driver,
    upload: u32,
    current: u32,
    f: impl FnOnce(&mut dyn Driver) -> R,
) -> R {
    if upload == current {
        return f(driver);
    }
    driver.pixel_store_i(gl::UNPACK_ALIGNMENT, upload as i32);
    let out = f(&mut *driver);
    driver.pixel_store_i(gl::UNPACK_ALIGNMENT, current as i32);
    out
}

/// Publishes `token` into the client's sync block once the upload lands.
fn token_writer(shm_id: u32, shm_offset: u32, token: u32) -> CompletionCallback {
    Box::new(move |shm| {
        let sync = AsyncUploadSync {
            async_upload_token: token,
            reserved0: 0,
        };
        shm.write(shm_id, shm_offset, &sync.to_le_bytes())
    })
}

impl Decoder {
    fn submit_upload(
        &mut self,
        func: &'static str,
        texture: TextureKey,
        params: UploadParams,
        on_complete: CompletionCallback,
    ) -> Result<(), CommandError> {
        match self.transfers.submit(texture, params, Some(on_complete)) {
            Ok(serial) => {
                tracing::trace!(serial, "async upload queued");
                self.group.borrow_mut().textures.add_ref(texture);
                Ok(())
            }
            Err(e) => self.gl_error(GlError::InvalidOperation, func, &e.to_string()),
        }
    }

    pub(crate) fn handle_async_tex_image_2d(&mut self, c: AsyncTexImage2D) -> Result<(), CommandError> {
        const FUNC: &str = "glAsyncTexImage2DCHROMIUM";
        self.shm
            .check(c.sync_shm_id, c.sync_shm_offset, AsyncUploadSync::SIZE_BYTES)?;
        let Some(checked) = self.validate_level_upload(
            FUNC,
            c.target,
            c.level,
            c.internal_format,
            c.width,
            c.height,
            c.format,
            c.pixel_type,
        ) else {
            return Ok(());
        };
        let pixels = if c.pixels_shm_id != 0 {
            Some(self.shm.read(c.pixels_shm_id, c.pixels_shm_offset, checked.size)?)
        } else {
            None
        };
        let params = UploadParams {
            target: checked.target,
            level: checked.level,
            format: checked.format,
            ty: checked.ty,
            upload: checked.define(pixels.is_some()),
            pixels: pixels.unwrap_or_default(),
            unpack_alignment: self.state.unpack_alignment,
        };
        let on_complete = token_writer(c.sync_shm_id, c.sync_shm_offset, c.async_upload_token);
        self.submit_upload(FUNC, checked.texture, params, on_complete)
    }

    pub(crate) fn handle_async_tex_sub_image_2d(
        &mut self,
        c: AsyncTexSubImage2D,
    ) -> Result<(), CommandError> {
        const FUNC: &str = "glAsyncTexSubImage2DCHROMIUM";
        self.shm
            .check(c.sync_shm_id, c.sync_shm_offset, AsyncUploadSync::SIZE_BYTES)?;
        let Some(checked) = self.validate_sub_upload(
            FUNC,
            c.target,
            c.level,
            c.xoffset,
            c.yoffset,
            c.width,
            c.height,
            c.format,
            c.pixel_type,
        ) else {
            return Ok(());
        };
        let pixels = self.shm.read(c.pixels_shm_id, c.pixels_shm_offset, checked.size)?;
        let params = UploadParams {
            target: checked.target,
            level: checked.level,
            format: checked.format,
            ty: checked.ty,
            upload: checked.upload(),
            pixels,
            unpack_alignment: self.state.unpack_alignment,
        };
        let on_complete = token_writer(c.sync_shm_id, c.sync_shm_offset, c.async_upload_token);
        self.submit_upload(FUNC, checked.texture, params, on_complete)
    }

    pub(crate) fn handle_wait_async_tex_image_2d(
        &mut self,
        c: WaitAsyncTexImage2D,
    ) -> Result<(), CommandError> {
        const FUNC: &str = "glWaitAsyncTexImage2DCHROMIUM";
        if !matches!(c.target, gl::TEXTURE_2D | gl::TEXTURE_CUBE_MAP) {
            return self.gl_error(GlError::InvalidEnum, FUNC, "invalid target");
        }
        let Some(texture) = self.state.bound_texture(c.target) else {
            return self.gl_error(GlError::InvalidOperation, FUNC, "no texture bound");
        };
        self.complete_uploads_through(texture);
        Ok(())
    }

    pub(crate) fn handle_wait_all_async_tex_image_2d(
        &mut self,
        _c: WaitAllAsyncTexImage2D,
    ) -> Result<(), CommandError> {
        self.complete_all_uploads();
        Ok(())
    }

    /// Runs one queued upload against the driver and publishes its token.
    fn complete_upload(&mut self, upload: PendingUpload) {
        let PendingUpload {
            texture,
            params,
            serial,
            on_complete,
        } = upload;
        let binding = gl::texture_binding_target(params.target).unwrap_or(gl::TEXTURE_2D);
        let (alignment, client_alignment) = (params.unpack_alignment, self.state.unpack_alignment);
        let landed = match params.upload {
            TextureUpload::Define {
                internal_format,
                width,
                height,
                format,
                ty,
                has_pixels,
            } => {
                let pixels = has_pixels.then_some(params.pixels.as_slice());
                self.with_texture_bound(texture, binding, |driver| {
                    with_unpack_alignment(driver, alignment, client_alignment, |driver| {
                        driver.tex_image_2d(
                            params.target,
                            params.level,
                            internal_format,
                            width,
                            height,
                            format,
                            ty,
                            pixels,
                        )
                    })
                });
                self.allocation_succeeded()
            }
            TextureUpload::Sub {
                x,
                y,
                width,
                height,
            } => {
                let covers = self
                    .group
                    .borrow()
                    .textures
                    .object(texture)
                    .and_then(|t| t.level(params.target, params.level).copied())
                    .is_some_and(|info| {
                        info.cleared || (x == 0 && y == 0 && width == info.width && height == info.height)
                    });
                if covers || self.clear_texture_level(texture, params.target, params.level) {
                    self.with_texture_bound(texture, binding, |driver| {
                        with_unpack_alignment(driver, alignment, client_alignment, |driver| {
                            driver.tex_sub_image_2d(
                                params.target,
                                params.level,
                                x,
                                y,
                                width,
                                height,
                                params.format,
                                params.ty,
                                &params.pixels,
                            )
                        })
                    });
                    self.allocation_succeeded()
                } else {
                    tracing::warn!(serial, "cannot clear level before async sub-upload");
                    false
                }
            }
        };
        if landed {
            self.record_texture_upload(texture, params.target, params.level, &params.upload);
        }
        self.transfers.mark_completed(serial);
        if let Some(callback) = on_complete {
            if let Err(err) = callback(&self.shm) {
                tracing::warn!(%err, serial, "cannot publish async upload token");
            }
        }
        self.group
            .borrow_mut()
            .release_texture(texture, Some(self.driver.as_mut()));
        self.stats.inc_async_uploads_completed();
        self.maybe_yield_after_upload(params.pixels.len());
    }

    /// Completes `texture`'s pending upload and every one queued before it.
    pub(crate) fn complete_uploads_through(&mut self, texture: TextureKey) {
        for upload in self.transfers.uploads_through(texture) {
            self.complete_upload(upload);
        }
    }

    pub(crate) fn complete_all_uploads(&mut self) {
        for upload in self.transfers.take_all_uploads() {
            self.complete_upload(upload);
        }
    }

    /// Idle-time uploads, bounded per batch.
    pub(crate) fn process_pending_transfers(&mut self) {
        for _ in 0..self.config.async_uploads_per_batch {
            let Some(upload) = self.transfers.next_upload() else {
                break;
            };
            self.complete_upload(upload);
            if self.config.yield_signal.is_raised() {
                break;
            }
        }
    }

    /// Forgets queued work without touching the driver (context lost).
    pub(crate) fn drop_transfers(&mut self) {
        let uploads = self.transfers.take_all_uploads();
        let mut group = self.group.borrow_mut();
        for upload in uploads {
            group.release_texture(upload.texture, None);
        }
        let dropped = self.transfers.take_all_readbacks().len();
        if dropped > 0 {
            tracing::debug!(dropped, "dropping pending read-backs");
        }
    }

    pub(crate) fn handle_read_pixels(&mut self, c: ReadPixels) -> Result<(), CommandError> {
        const FUNC: &str = "glReadPixels";
        self.shm
            .check(c.result_shm_id, c.result_shm_offset, ReadPixelsResult::SIZE_BYTES)?;
        if self.shm.read_u32(c.result_shm_id, c.result_shm_offset)? != 0 {
            return Err(CommandError::invalid("read pixels result was not zeroed"));
        }
        if c.width < 0 || c.height < 0 {
            return self.gl_error(GlError::InvalidValue, FUNC, "negative size");
        }
        let Some(bpp) = gl::bytes_per_pixel(c.format, c.pixel_type) else {
            return self.gl_error(GlError::InvalidEnum, FUNC, "invalid format or type");
        };
        if c.format != gl::RGBA || c.pixel_type != gl::UNSIGNED_BYTE {
            return self.gl_error(
                GlError::InvalidOperation,
                FUNC,
                "only RGBA/UNSIGNED_BYTE can be read",
            );
        }
        let (width, height) = (c.width as u32, c.height as u32);
        let Some(size) = image_size(width, height, bpp, self.state.pack_alignment) else {
            return self.gl_error(GlError::InvalidValue, FUNC, "image size overflows");
        };
        self.shm.check(c.pixels_shm_id, c.pixels_shm_offset, size)?;
        if !self.check_framebuffer_complete(FUNC, gl::READ_FRAMEBUFFER) {
            return Ok(());
        }
        for texture in self.read_framebuffer_textures() {
            self.complete_uploads_through(texture);
        }
        self.clear_uncleared_attachments(gl::READ_FRAMEBUFFER);

        let mut pixels = self
            .driver
            .read_pixels(c.x, c.y, width, height, c.format, c.pixel_type);
        pixels.truncate(size);
        let result = ReadPixelsResult {
            success: 1,
            row_length: width,
            num_rows: height,
        };
        if c.is_async {
            let fence = self.driver.insert_fence();
            self.transfers.queue_readback(PendingReadback {
                fence,
                pixels,
                pixels_shm_id: c.pixels_shm_id,
                pixels_shm_offset: c.pixels_shm_offset,
                result_shm_id: c.result_shm_id,
                result_shm_offset: c.result_shm_offset,
                result,
            });
            return Ok(());
        }
        self.shm.write(c.pixels_shm_id, c.pixels_shm_offset, &pixels)?;
        self.shm
            .write(c.result_shm_id, c.result_shm_offset, &result.to_le_bytes())?;
        self.stats.inc_readbacks_completed();
        Ok(())
    }

    fn read_framebuffer_textures(&self) -> Vec<TextureKey> {
        self.state
            .read_framebuffer
            .and_then(|key| self.framebuffers.object(key))
            .map(|fb| {
                fb.attachments()
                    .filter_map(|(_, attachment)| match attachment {
                        Attachment::Texture { texture, .. } => Some(texture),
                        Attachment::Renderbuffer(_) => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Copies finished asynchronous read-backs into client memory. With
    /// `force` every one is waited for.
    pub(crate) fn process_readbacks(&mut self, force: bool) {
        loop {
            let driver = &mut self.driver;
            let ready = self.transfers.pop_readback_if(|fence| {
                if force {
                    driver.wait_fence(fence);
                    true
                } else {
                    driver.fence_signaled(fence)
                }
            });
            let Some(readback) = ready else {
                break;
            };
            let written = self
                .shm
                .write(readback.pixels_shm_id, readback.pixels_shm_offset, &readback.pixels)
                .and_then(|()| {
                    self.shm.write(
                        readback.result_shm_id,
                        readback.result_shm_offset,
                        &readback.result.to_le_bytes(),
                    )
                });
            match written {
                Ok(()) => self.stats.inc_readbacks_completed(),
                Err(err) => tracing::warn!(%err, "cannot deliver async read-back"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use glcmd_protocol::cmd::{
        AsyncTexImage2D, AsyncTexSubImage2D, AsyncUploadSync, BindTexture, PixelStorei,
        ReadPixels, ReadPixelsResult, TexImage2D, WaitAsyncTexImage2D,
    };
    use glcmd_protocol::{gl, CmdWriter};

    use crate::error::ErrorCode;
    use crate::testing::Harness;

    const PIXELS: u32 = 0;
    const SYNC: u32 = 512;
    const RESULT: u32 = 600;

    fn bind_texture(w: &mut CmdWriter, texture: u32) {
        w.gen_textures(&[texture]);
        w.push(BindTexture {
            target: gl::TEXTURE_2D,
            texture,
        });
    }

    fn async_image(h: &Harness, token: u32) -> AsyncTexImage2D {
        AsyncTexImage2D {
            target: gl::TEXTURE_2D,
            level: 0,
            internal_format: gl::RGBA,
            width: 2,
            height: 2,
            format: gl::RGBA,
            pixel_type: gl::UNSIGNED_BYTE,
            pixels_shm_id: h.shm_id,
            pixels_shm_offset: PIXELS,
            async_upload_token: token,
            sync_shm_id: h.shm_id,
            sync_shm_offset: SYNC,
        }
    }

    fn token(h: &Harness) -> u32 {
        let bytes = h.read_bytes(SYNC, AsyncUploadSync::SIZE_BYTES);
        let mut buf = [0u8; AsyncUploadSync::SIZE_BYTES];
        buf.copy_from_slice(&bytes);
        AsyncUploadSync::from_le_bytes(&buf).async_upload_token
    }

    #[test]
    fn second_upload_while_in_flight_is_rejected() {
        let mut h = Harness::new();
        h.decoder.config.async_uploads_per_batch = 0;
        h.write_bytes(PIXELS, &[7; 16]);
        let mut w = CmdWriter::new();
        bind_texture(&mut w, 1);
        w.push(async_image(&h, 1));
        w.push(async_image(&h, 2));
        h.run_ok(&w);

        assert_eq!(h.take_error(), gl::INVALID_OPERATION);
        assert_eq!(h.decoder.pending_async_uploads(), 1);
        assert!(h
            .decoder
            .texture_level(1, gl::TEXTURE_2D, 0)
            .map_or(true, |level| !level.defined));
        assert_eq!(token(&h), 0);

        let mut w = CmdWriter::new();
        w.push(WaitAsyncTexImage2D {
            target: gl::TEXTURE_2D,
        });
        h.run_ok(&w);
        assert_eq!(h.decoder.pending_async_uploads(), 0);
        assert_eq!(token(&h), 1);
        let level = h.decoder.texture_level(1, gl::TEXTURE_2D, 0).unwrap();
        assert!(level.defined && level.cleared);
    }

    #[test]
    fn async_and_sync_uploads_record_the_same_level_state() {
        let mut h = Harness::new();
        h.write_bytes(PIXELS, &[9; 16]);
        let mut w = CmdWriter::new();
        bind_texture(&mut w, 1);
        w.push(TexImage2D {
            target: gl::TEXTURE_2D,
            level: 0,
            internal_format: gl::RGBA,
            width: 2,
            height: 2,
            format: gl::RGBA,
            pixel_type: gl::UNSIGNED_BYTE,
            pixels_shm_id: 0,
            pixels_shm_offset: 0,
        });
        bind_texture(&mut w, 2);
        w.push(AsyncTexImage2D {
            pixels_shm_id: 0,
            ..async_image(&h, 5)
        });
        h.run_ok(&w);
        // End of batch idle work ran the async upload.
        assert_eq!(h.decoder.pending_async_uploads(), 0);

        let sync = h.decoder.texture_level(1, gl::TEXTURE_2D, 0).unwrap();
        let queued = h.decoder.texture_level(2, gl::TEXTURE_2D, 0).unwrap();
        assert_eq!(sync, queued);
        assert!(!queued.cleared);

        let mut w = CmdWriter::new();
        w.push(AsyncTexSubImage2D {
            target: gl::TEXTURE_2D,
            level: 0,
            xoffset: 0,
            yoffset: 0,
            width: 1,
            height: 1,
            format: gl::RGBA,
            pixel_type: gl::UNSIGNED_BYTE,
            pixels_shm_id: h.shm_id,
            pixels_shm_offset: PIXELS,
            async_upload_token: 6,
            sync_shm_id: h.shm_id,
            sync_shm_offset: SYNC,
        });
        h.run_ok(&w);
        assert_eq!(token(&h), 6);
        let level = h.decoder.texture_level(2, gl::TEXTURE_2D, 0).unwrap();
        assert!(level.cleared);
    }

    #[test]
    fn async_upload_keeps_the_alignment_it_was_submitted_with() {
        let mut h = Harness::new();
        h.decoder.config.async_uploads_per_batch = 0;
        // Two RGB rows of one pixel, each padded to 4 bytes.
        h.write_bytes(PIXELS, &[1, 2, 3, 0xEE, 4, 5, 6, 0xEE]);
        let mut w = CmdWriter::new();
        bind_texture(&mut w, 1);
        w.push(AsyncTexImage2D {
            internal_format: gl::RGB,
            width: 1,
            height: 2,
            format: gl::RGB,
            ..async_image(&h, 1)
        });
        w.push(PixelStorei {
            pname: gl::UNPACK_ALIGNMENT,
            param: 1,
        });
        w.push(WaitAsyncTexImage2D {
            target: gl::TEXTURE_2D,
        });
        h.run_ok(&w);
        let service = h.decoder.texture_service_id(1).unwrap();
        assert_eq!(
            h.driver.texture_level(service, gl::TEXTURE_2D, 0),
            Some(vec![1, 2, 3, 4, 5, 6])
        );

        // The client's alignment of 1 is back in effect for later uploads.
        h.write_bytes(PIXELS, &[7, 8, 9, 10, 11, 12]);
        let mut w = CmdWriter::new();
        bind_texture(&mut w, 2);
        w.push(TexImage2D {
            target: gl::TEXTURE_2D,
            level: 0,
            internal_format: gl::RGB,
            width: 1,
            height: 2,
            format: gl::RGB,
            pixel_type: gl::UNSIGNED_BYTE,
            pixels_shm_id: h.shm_id,
            pixels_shm_offset: PIXELS,
        });
        h.run_ok(&w);
        let service = h.decoder.texture_service_id(2).unwrap();
        assert_eq!(
            h.driver.texture_level(service, gl::TEXTURE_2D, 0),
            Some(vec![7, 8, 9, 10, 11, 12])
        );
    }

    fn read_pixels(h: &Harness, is_async: bool) -> ReadPixels {
        ReadPixels {
            x: 0,
            y: 0,
            width: 2,
            height: 2,
            format: gl::RGBA,
            pixel_type: gl::UNSIGNED_BYTE,
            pixels_shm_id: h.shm_id,
            pixels_shm_offset: PIXELS,
            result_shm_id: h.shm_id,
            result_shm_offset: RESULT,
            is_async,
        }
    }

    fn read_result(h: &Harness) -> ReadPixelsResult {
        let bytes = h.read_bytes(RESULT, ReadPixelsResult::SIZE_BYTES);
        let mut buf = [0u8; ReadPixelsResult::SIZE_BYTES];
        buf.copy_from_slice(&bytes);
        ReadPixelsResult::from_le_bytes(&buf)
    }

    #[test]
    fn sync_read_fills_the_result() {
        let mut h = Harness::new();
        let mut w = CmdWriter::new();
        w.push(read_pixels(&h, false));
        h.run_ok(&w);
        let result = read_result(&h);
        assert_eq!((result.success, result.row_length, result.num_rows), (1, 2, 2));
    }

    #[test]
    fn async_read_lands_after_its_fence() {
        let mut h = Harness::new();
        h.driver.set_fence_latency(2);
        let mut w = CmdWriter::new();
        w.push(read_pixels(&h, true));
        h.run_ok(&w);
        assert_eq!(read_result(&h).success, 0);
        assert!(h.decoder.has_pending_work());

        h.decoder.wait_for_pending_reads();
        assert_eq!(read_result(&h).success, 1);
        assert!(!h.decoder.has_pending_work());
    }

    #[test]
    fn dirty_result_block_is_a_protocol_error() {
        let mut h = Harness::new();
        h.write_bytes(RESULT, &[1, 0, 0, 0]);
        let mut w = CmdWriter::new();
        w.push(read_pixels(&h, false));
        assert_eq!(h.run(&w).result, ErrorCode::InvalidArguments);
        assert_eq!(h.driver.call_count("read_pixels"), 0);
    }
}
