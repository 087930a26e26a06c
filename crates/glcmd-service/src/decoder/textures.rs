//! Texture objects, level uploads and external images.

use glcmd_protocol::cmd::{
    ActiveTexture, BindTexImage2D, BindTexture, DeleteTexturesImmediate, GenTexturesImmediate,
    PixelStorei, ReleaseTexImage2D, TexImage2D, TexParameteri, TexStorage2D, TexSubImage2D,
};
use glcmd_protocol::gl;

use super::{check_new_ids, immediate_ids, Decoder};
use crate::config::DriverLimits;
use crate::error::{CommandError, GlError};
use crate::resources::{Texture, TextureKey, TextureUpload};

/// Bytes a client image occupies, with every row but the last padded to
/// `alignment`. Computed in 32 bits; `None` on overflow.
pub(crate) fn image_size(width: u32, height: u32, bpp: u32, alignment: u32) -> Option<usize> {
    if width == 0 || height == 0 {
        return Some(0);
    }
    let row = width.checked_mul(bpp)?;
    let padded = row.checked_next_multiple_of(alignment.max(1))?;
    let size = padded.checked_mul(height - 1)?.checked_add(row)?;
    Some(size as usize)
}

/// A validated whole-level upload.
#[derive(Clone, Copy, Debug)]
pub(crate) struct CheckedLevel {
    pub texture: TextureKey,
    pub target: u32,
    pub level: u32,
    pub internal_format: u32,
    pub width: u32,
    pub height: u32,
    pub format: u32,
    pub ty: u32,
    /// Client bytes to read, row padding included.
    pub size: usize,
}

impl CheckedLevel {
    pub fn define(&self, has_pixels: bool) -> TextureUpload {
        TextureUpload::Define {
            internal_format: self.internal_format,
            width: self.width,
            height: self.height,
            format: self.format,
            ty: self.ty,
            has_pixels,
        }
    }
}

/// A validated upload into part of an existing level.
#[derive(Clone, Copy, Debug)]
pub(crate) struct CheckedRegion {
    pub texture: TextureKey,
    pub target: u32,
    pub level: u32,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub format: u32,
    pub ty: u32,
    pub size: usize,
    /// The upload overwrites the whole level.
    pub covers_level: bool,
    pub level_cleared: bool,
}

impl CheckedRegion {
    pub fn upload(&self) -> TextureUpload {
        TextureUpload::Sub {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
        }
    }
}

impl Decoder {
    fn max_texture_size(&self, binding: u32) -> u32 {
        if binding == gl::TEXTURE_CUBE_MAP {
            self.limits.max_cube_map_texture_size
        } else {
            self.limits.max_texture_size
        }
    }

    pub(crate) fn handle_gen_textures(
        &mut self,
        c: GenTexturesImmediate,
        immediate: &[u32],
    ) -> Result<(), CommandError> {
        let ids = immediate_ids(c.n, immediate)?;
        {
            let group = self.group.borrow();
            check_new_ids(ids, |id| group.textures.contains_client(id))?;
        }
        for &id in ids {
            let service = self.driver.gen_texture();
            self.group
                .borrow_mut()
                .textures
                .create(id, service, Texture::default())
                .map_err(|e| CommandError::invalid(e.to_string()))?;
        }
        Ok(())
    }

    pub(crate) fn handle_delete_textures(
        &mut self,
        c: DeleteTexturesImmediate,
        immediate: &[u32],
    ) -> Result<(), CommandError> {
        let ids = immediate_ids(c.n, immediate)?;
        for &id in ids {
            let Some(key) = self.group.borrow().textures.get(id) else {
                continue;
            };
            self.forget_texture(key);
            let dead = self.group.borrow_mut().textures.remove(key);
            if let Some(dead) = dead {
                self.driver.delete_texture(dead.service_id);
            }
        }
        Ok(())
    }

    /// Detaches `texture` from this decoder's framebuffers and unbinds it
    /// from every texture unit.
    fn forget_texture(&mut self, texture: TextureKey) {
        let attached: Vec<_> = self
            .framebuffers
            .iter()
            .map(|(fb, entry)| (fb, entry.object.points_with_texture(texture)))
            .filter(|(_, points)| !points.is_empty())
            .collect();
        for (fb, points) in attached {
            self.detach_points(fb, &points);
        }

        let mut slots = Vec::new();
        for (unit, bindings) in self.state.texture_units.iter().enumerate() {
            for binding in [gl::TEXTURE_2D, gl::TEXTURE_CUBE_MAP] {
                if bindings.binding(binding) == Some(texture) {
                    slots.push((unit as u32, binding));
                }
            }
        }
        if !self.state.unbind_texture(texture) {
            return;
        }
        for (unit, binding) in slots {
            self.driver.active_texture(unit);
            self.driver.bind_texture(binding, 0);
        }
        self.driver.active_texture(self.state.active_texture_unit);
    }

    fn texture_for_bind(&mut self, client_id: u32) -> Option<TextureKey> {
        let (existing, generate) = {
            let group = self.group.borrow();
            (group.textures.get(client_id), group.bind_generates_resource())
        };
        if existing.is_some() || !generate {
            return existing;
        }
        let service = self.driver.gen_texture();
        self.group
            .borrow_mut()
            .textures
            .create(client_id, service, Texture::default())
            .ok()
    }

    pub(crate) fn handle_active_texture(&mut self, c: ActiveTexture) -> Result<(), CommandError> {
        let unit = c.texture.wrapping_sub(gl::TEXTURE0);
        if unit as usize >= self.state.texture_units.len() {
            return self.gl_error(GlError::InvalidEnum, "glActiveTexture", "texture unit out of range");
        }
        self.state.active_texture_unit = unit;
        self.driver.active_texture(unit);
        Ok(())
    }

    pub(crate) fn handle_bind_texture(&mut self, c: BindTexture) -> Result<(), CommandError> {
        const FUNC: &str = "glBindTexture";
        if !matches!(c.target, gl::TEXTURE_2D | gl::TEXTURE_CUBE_MAP) {
            return self.gl_error(GlError::InvalidEnum, FUNC, "invalid target");
        }
        let key = if c.texture == 0 {
            None
        } else {
            match self.texture_for_bind(c.texture) {
                Some(key) => Some(key),
                None => {
                    return self.gl_error(GlError::InvalidOperation, FUNC, "texture was not generated")
                }
            }
        };
        let max_levels = DriverLimits::max_levels(self.max_texture_size(c.target));
        let service = match key {
            Some(key) => {
                let mut group = self.group.borrow_mut();
                let conflict = match group.textures.object_mut(key) {
                    Some(tex) => match tex.target {
                        Some(target) => target != c.target,
                        None => {
                            tex.set_target(c.target, max_levels);
                            false
                        }
                    },
                    None => true,
                };
                let service = group.textures.service_id(key).unwrap_or(0);
                drop(group);
                if conflict {
                    return self.gl_error(
                        GlError::InvalidOperation,
                        FUNC,
                        "texture was bound to another target",
                    );
                }
                service
            }
            None => 0,
        };
        if let Some(slot) = self.state.active_unit_mut().binding_mut(c.target) {
            *slot = key;
        }
        self.driver.bind_texture(c.target, service);
        Ok(())
    }

    /// Shared validation of `TexImage2D` and `AsyncTexImage2D`. Records the
    /// GL error and returns `None` on failure.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn validate_level_upload(
        &mut self,
        func: &'static str,
        target: u32,
        level: i32,
        internal_format: u32,
        width: i32,
        height: i32,
        format: u32,
        ty: u32,
    ) -> Option<CheckedLevel> {
        let Some(binding) = gl::texture_binding_target(target) else {
            return self.reject(GlError::InvalidEnum, func, "invalid target");
        };
        if level < 0 || width < 0 || height < 0 {
            return self.reject(GlError::InvalidValue, func, "negative level or size");
        }
        let (level, width, height) = (level as u32, width as u32, height as u32);
        let max_size = self.max_texture_size(binding);
        if level >= DriverLimits::max_levels(max_size)
            || width > max_size >> level
            || height > max_size >> level
        {
            return self.reject(GlError::InvalidValue, func, "level or size out of range");
        }
        if binding == gl::TEXTURE_CUBE_MAP && width != height {
            return self.reject(GlError::InvalidValue, func, "cube map faces must be square");
        }
        let Some(bpp) = gl::bytes_per_pixel(format, ty) else {
            return self.reject(GlError::InvalidEnum, func, "invalid format or type");
        };
        if internal_format != format {
            return self.reject(GlError::InvalidOperation, func, "internal format must match format");
        }
        let Some(texture) = self.state.bound_texture(binding) else {
            return self.reject(GlError::InvalidOperation, func, "no texture bound");
        };
        let (immutable, has_image) = self
            .group
            .borrow()
            .textures
            .object(texture)
            .map_or((true, false), |t| (t.immutable, t.image.is_some()));
        if immutable {
            return self.reject(GlError::InvalidOperation, func, "texture storage is immutable");
        }
        if has_image {
            return self.reject(GlError::InvalidOperation, func, "texture is backed by an image");
        }
        if self.transfers.is_in_flight(texture) {
            return self.reject(
                GlError::InvalidOperation,
                func,
                "asynchronous upload already in progress",
            );
        }
        let Some(size) = image_size(width, height, bpp, self.state.unpack_alignment) else {
            return self.reject(GlError::InvalidValue, func, "image size overflows");
        };
        Some(CheckedLevel {
            texture,
            target,
            level,
            internal_format,
            width,
            height,
            format,
            ty,
            size,
        })
    }

    /// Shared validation of `TexSubImage2D` and `AsyncTexSubImage2D`.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn validate_sub_upload(
        &mut self,
        func: &'static str,
        target: u32,
        level: i32,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        format: u32,
        ty: u32,
    ) -> Option<CheckedRegion> {
        let Some(binding) = gl::texture_binding_target(target) else {
            return self.reject(GlError::InvalidEnum, func, "invalid target");
        };
        if level < 0 || x < 0 || y < 0 || width < 0 || height < 0 {
            return self.reject(GlError::InvalidValue, func, "negative level, offset or size");
        }
        let (level, x, y, width, height) =
            (level as u32, x as u32, y as u32, width as u32, height as u32);
        let Some(bpp) = gl::bytes_per_pixel(format, ty) else {
            return self.reject(GlError::InvalidEnum, func, "invalid format or type");
        };
        let Some(texture) = self.state.bound_texture(binding) else {
            return self.reject(GlError::InvalidOperation, func, "no texture bound");
        };
        let info = self
            .group
            .borrow()
            .textures
            .object(texture)
            .and_then(|t| t.level(target, level).copied())
            .filter(|info| info.defined);
        let Some(info) = info else {
            return self.reject(GlError::InvalidOperation, func, "level has no storage");
        };
        let fits = x.checked_add(width).is_some_and(|end| end <= info.width)
            && y.checked_add(height).is_some_and(|end| end <= info.height);
        if !fits {
            return self.reject(GlError::InvalidValue, func, "region outside the level");
        }
        if info.format != format || info.ty != ty {
            return self.reject(GlError::InvalidOperation, func, "format does not match the level");
        }
        if self.transfers.is_in_flight(texture) {
            return self.reject(
                GlError::InvalidOperation,
                func,
                "asynchronous upload already in progress",
            );
        }
        let Some(size) = image_size(width, height, bpp, self.state.unpack_alignment) else {
            return self.reject(GlError::InvalidValue, func, "image size overflows");
        };
        Some(CheckedRegion {
            texture,
            target,
            level,
            x,
            y,
            width,
            height,
            format,
            ty,
            size,
            covers_level: x == 0 && y == 0 && width == info.width && height == info.height,
            level_cleared: info.cleared,
        })
    }

    /// Level bookkeeping for an upload that reached the driver. Both the
    /// synchronous and asynchronous paths end here.
    pub(crate) fn record_texture_upload(
        &mut self,
        texture: TextureKey,
        target: u32,
        level: u32,
        upload: &TextureUpload,
    ) {
        let mut group = self.group.borrow_mut();
        if let Some(tex) = group.textures.object_mut(texture) {
            tex.record_upload(target, level, upload);
        }
        if matches!(upload, TextureUpload::Define { .. }) {
            group.bump_attachment_generation();
        }
    }

    /// Writes zeros over a defined, uncleared level. Returns `false` when the
    /// scratch allocation failed.
    pub(crate) fn clear_texture_level(&mut self, texture: TextureKey, target: u32, level: u32) -> bool {
        let info = self
            .group
            .borrow()
            .textures
            .object(texture)
            .and_then(|t| t.level(target, level).copied());
        let Some(info) = info.filter(|i| i.defined && !i.cleared) else {
            return true;
        };
        let Some(binding) = gl::texture_binding_target(target) else {
            return true;
        };
        let bpp = gl::bytes_per_pixel(info.format, info.ty).unwrap_or(4);
        let Some(size) = image_size(info.width, info.height, bpp, self.state.unpack_alignment) else {
            return false;
        };
        let mut zeros = Vec::new();
        if zeros.try_reserve_exact(size).is_err() {
            return false;
        }
        zeros.resize(size, 0);
        tracing::trace!(target, level, width = info.width, height = info.height, "clearing texture level");
        self.with_texture_bound(texture, binding, |driver| {
            driver.tex_sub_image_2d(
                target,
                level,
                0,
                0,
                info.width,
                info.height,
                info.format,
                info.ty,
                &zeros,
            )
        });
        if let Some(tex) = self.group.borrow_mut().textures.object_mut(texture) {
            tex.set_level_cleared(target, level, true);
        }
        true
    }

    /// Clears every uncleared level of `texture`.
    pub(crate) fn clear_texture(&mut self, texture: TextureKey) -> bool {
        let levels = self
            .group
            .borrow()
            .textures
            .object(texture)
            .map(Texture::uncleared_levels)
            .unwrap_or_default();
        levels
            .into_iter()
            .all(|(target, level, _)| self.clear_texture_level(texture, target, level))
    }

    pub(crate) fn maybe_yield_after_upload(&self, bytes: usize) {
        if bytes > self.config.slow_upload_bytes {
            tracing::trace!(bytes, "slow upload, requesting a yield");
            self.config.yield_signal.raise();
        }
    }

    pub(crate) fn handle_tex_image_2d(&mut self, c: TexImage2D) -> Result<(), CommandError> {
        let Some(checked) = self.validate_level_upload(
            "glTexImage2D",
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
        self.driver.tex_image_2d(
            checked.target,
            checked.level,
            checked.internal_format,
            checked.width,
            checked.height,
            checked.format,
            checked.ty,
            pixels.as_deref(),
        );
        if !self.allocation_succeeded() {
            return Ok(());
        }
        self.record_texture_upload(
            checked.texture,
            checked.target,
            checked.level,
            &checked.define(pixels.is_some()),
        );
        self.maybe_yield_after_upload(checked.size);
        Ok(())
    }

    pub(crate) fn handle_tex_sub_image_2d(&mut self, c: TexSubImage2D) -> Result<(), CommandError> {
        const FUNC: &str = "glTexSubImage2D";
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
        if !checked.covers_level
            && !checked.level_cleared
            && !self.clear_texture_level(checked.texture, checked.target, checked.level)
        {
            return self.gl_error(GlError::OutOfMemory, FUNC, "cannot clear the level");
        }
        self.driver.tex_sub_image_2d(
            checked.target,
            checked.level,
            checked.x,
            checked.y,
            checked.width,
            checked.height,
            checked.format,
            checked.ty,
            &pixels,
        );
        if !self.allocation_succeeded() {
            return Ok(());
        }
        self.record_texture_upload(checked.texture, checked.target, checked.level, &checked.upload());
        self.maybe_yield_after_upload(checked.size);
        Ok(())
    }

    pub(crate) fn handle_tex_storage_2d(&mut self, c: TexStorage2D) -> Result<(), CommandError> {
        const FUNC: &str = "glTexStorage2D";
        if !matches!(c.target, gl::TEXTURE_2D | gl::TEXTURE_CUBE_MAP) {
            return self.gl_error(GlError::InvalidEnum, FUNC, "invalid target");
        }
        if c.levels < 1 || c.width < 1 || c.height < 1 {
            return self.gl_error(GlError::InvalidValue, FUNC, "levels and size must be positive");
        }
        let (levels, width, height) = (c.levels as u32, c.width as u32, c.height as u32);
        let Some((format, ty)) = gl::sized_texture_format(c.internal_format) else {
            return self.gl_error(GlError::InvalidEnum, FUNC, "invalid internal format");
        };
        let max_size = self.max_texture_size(c.target);
        if width > max_size || height > max_size {
            return self.gl_error(GlError::InvalidValue, FUNC, "size out of range");
        }
        if c.target == gl::TEXTURE_CUBE_MAP && width != height {
            return self.gl_error(GlError::InvalidValue, FUNC, "cube map faces must be square");
        }
        if levels > DriverLimits::max_levels(width.max(height)) {
            return self.gl_error(GlError::InvalidOperation, FUNC, "too many levels for the size");
        }
        let Some(texture) = self.state.bound_texture(c.target) else {
            return self.gl_error(GlError::InvalidOperation, FUNC, "no texture bound");
        };
        let immutable = self
            .group
            .borrow()
            .textures
            .object(texture)
            .map_or(true, |t| t.immutable);
        if immutable {
            return self.gl_error(GlError::InvalidOperation, FUNC, "texture storage is immutable");
        }
        if self.transfers.is_in_flight(texture) {
            return self.gl_error(
                GlError::InvalidOperation,
                FUNC,
                "asynchronous upload already in progress",
            );
        }
        self.driver
            .tex_storage_2d(c.target, levels, c.internal_format, width, height);
        if !self.allocation_succeeded() {
            return Ok(());
        }
        let mut group = self.group.borrow_mut();
        if let Some(tex) = group.textures.object_mut(texture) {
            tex.define_storage(levels, c.internal_format, format, ty, width, height);
        }
        group.bump_attachment_generation();
        Ok(())
    }

    pub(crate) fn handle_tex_parameteri(&mut self, c: TexParameteri) -> Result<(), CommandError> {
        const FUNC: &str = "glTexParameteri";
        if !matches!(c.target, gl::TEXTURE_2D | gl::TEXTURE_CUBE_MAP) {
            return self.gl_error(GlError::InvalidEnum, FUNC, "invalid target");
        }
        let Some(texture) = self.state.bound_texture(c.target) else {
            return self.gl_error(GlError::InvalidOperation, FUNC, "no texture bound");
        };
        let accepted = self
            .group
            .borrow_mut()
            .textures
            .object_mut(texture)
            .is_some_and(|t| t.set_parameter(c.pname, c.param as u32));
        if !accepted {
            return self.gl_error(GlError::InvalidEnum, FUNC, "invalid parameter or value");
        }
        self.driver.tex_parameter_i(c.target, c.pname, c.param);
        Ok(())
    }

    pub(crate) fn handle_pixel_storei(&mut self, c: PixelStorei) -> Result<(), CommandError> {
        const FUNC: &str = "glPixelStorei";
        if !matches!(c.pname, gl::PACK_ALIGNMENT | gl::UNPACK_ALIGNMENT) {
            return self.gl_error(GlError::InvalidEnum, FUNC, "invalid pname");
        }
        if !matches!(c.param, 1 | 2 | 4 | 8) {
            return self.gl_error(GlError::InvalidValue, FUNC, "alignment must be 1, 2, 4 or 8");
        }
        if c.pname == gl::PACK_ALIGNMENT {
            self.state.pack_alignment = c.param as u32;
        } else {
            self.state.unpack_alignment = c.param as u32;
        }
        self.driver.pixel_store_i(c.pname, c.param);
        Ok(())
    }

    pub(crate) fn handle_bind_tex_image_2d(&mut self, c: BindTexImage2D) -> Result<(), CommandError> {
        const FUNC: &str = "glBindTexImage2D";
        if c.target != gl::TEXTURE_2D {
            return self.gl_error(GlError::InvalidEnum, FUNC, "invalid target");
        }
        let Some(texture) = self.state.bound_texture(c.target) else {
            return self.gl_error(GlError::InvalidOperation, FUNC, "no texture bound");
        };
        let Some(image) = self.images.get(&c.image_id).cloned() else {
            return self.gl_error(GlError::InvalidOperation, FUNC, "no image with that id");
        };
        let immutable = self
            .group
            .borrow()
            .textures
            .object(texture)
            .map_or(true, |t| t.immutable);
        if immutable || self.transfers.is_in_flight(texture) {
            return self.gl_error(GlError::InvalidOperation, FUNC, "texture cannot take an image");
        }
        if !self.driver.bind_tex_image(c.target, image.as_ref()) {
            return self.gl_error(GlError::InvalidOperation, FUNC, "driver could not bind the image");
        }
        let (width, height) = image.size();
        let internal_format = image.internal_format();
        self.record_texture_upload(
            texture,
            c.target,
            0,
            &TextureUpload::Define {
                internal_format,
                width,
                height,
                format: internal_format,
                ty: gl::UNSIGNED_BYTE,
                has_pixels: true,
            },
        );
        if let Some(tex) = self.group.borrow_mut().textures.object_mut(texture) {
            tex.image = Some(c.image_id);
        }
        Ok(())
    }

    pub(crate) fn handle_release_tex_image_2d(
        &mut self,
        c: ReleaseTexImage2D,
    ) -> Result<(), CommandError> {
        const FUNC: &str = "glReleaseTexImage2D";
        if c.target != gl::TEXTURE_2D {
            return self.gl_error(GlError::InvalidEnum, FUNC, "invalid target");
        }
        let Some(texture) = self.state.bound_texture(c.target) else {
            return self.gl_error(GlError::InvalidOperation, FUNC, "no texture bound");
        };
        let Some(image) = self.images.get(&c.image_id).cloned() else {
            return self.gl_error(GlError::InvalidOperation, FUNC, "no image with that id");
        };
        let bound = self
            .group
            .borrow()
            .textures
            .object(texture)
            .is_some_and(|t| t.image == Some(c.image_id));
        if !bound {
            return Ok(());
        }
        self.driver.release_tex_image(c.target, image.as_ref());
        let internal_format = image.internal_format();
        self.record_texture_upload(
            texture,
            c.target,
            0,
            &TextureUpload::Define {
                internal_format,
                width: 0,
                height: 0,
                format: internal_format,
                ty: gl::UNSIGNED_BYTE,
                has_pixels: false,
            },
        );
        if let Some(tex) = self.group.borrow_mut().textures.object_mut(texture) {
            tex.image = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use glcmd_protocol::cmd::{BindTexture, TexImage2D, TexStorage2D, TexSubImage2D};
    use glcmd_protocol::{gl, CmdWriter};

    use super::image_size;
    use crate::testing::Harness;

    fn tex_image(width: i32, height: i32, shm: Option<u32>) -> TexImage2D {
        TexImage2D {
            target: gl::TEXTURE_2D,
            level: 0,
            internal_format: gl::RGBA,
            width,
            height,
            format: gl::RGBA,
            pixel_type: gl::UNSIGNED_BYTE,
            pixels_shm_id: shm.unwrap_or(0),
            pixels_shm_offset: 0,
        }
    }

    fn bind(w: &mut CmdWriter, texture: u32) {
        w.push(BindTexture {
            target: gl::TEXTURE_2D,
            texture,
        });
    }

    #[test]
    fn image_size_pads_all_rows_but_the_last() {
        assert_eq!(image_size(3, 2, 1, 4), Some(7));
        assert_eq!(image_size(3, 2, 4, 4), Some(24));
        assert_eq!(image_size(0, 100, 4, 8), Some(0));
        assert_eq!(image_size(65536, 65536, 4, 4), None);
    }

    #[test]
    fn null_upload_defines_an_uncleared_level() {
        let mut h = Harness::new();
        let mut w = CmdWriter::new();
        w.gen_textures(&[1]);
        bind(&mut w, 1);
        w.push(tex_image(4, 4, None));
        h.run_ok(&w);

        let info = h.decoder.texture_level(1, gl::TEXTURE_2D, 0).unwrap();
        assert!(info.defined);
        assert!(!info.cleared);
        assert_eq!((info.width, info.height), (4, 4));
    }

    #[test]
    fn partial_sub_upload_clears_the_rest_first() {
        let mut h = Harness::new();
        h.write_bytes(0, &[9; 4]);
        let mut w = CmdWriter::new();
        w.gen_textures(&[1]);
        bind(&mut w, 1);
        w.push(tex_image(2, 1, None));
        w.push(TexSubImage2D {
            target: gl::TEXTURE_2D,
            level: 0,
            xoffset: 1,
            yoffset: 0,
            width: 1,
            height: 1,
            format: gl::RGBA,
            pixel_type: gl::UNSIGNED_BYTE,
            pixels_shm_id: h.shm_id,
            pixels_shm_offset: 0,
        });
        h.run_ok(&w);

        assert!(h.decoder.texture_level(1, gl::TEXTURE_2D, 0).unwrap().cleared);
        let service = h.decoder.texture_service_id(1).unwrap();
        assert_eq!(
            h.driver.texture_level(service, gl::TEXTURE_2D, 0).unwrap(),
            vec![0, 0, 0, 0, 9, 9, 9, 9]
        );
    }

    #[test]
    fn immutable_storage_rejects_redefinition() {
        let mut h = Harness::new();
        let mut w = CmdWriter::new();
        w.gen_textures(&[1]);
        bind(&mut w, 1);
        w.push(TexStorage2D {
            target: gl::TEXTURE_2D,
            levels: 2,
            internal_format: gl::RGBA8,
            width: 4,
            height: 4,
        });
        h.run_ok(&w);
        assert_eq!(h.take_error(), gl::NO_ERROR);

        let mut w = CmdWriter::new();
        w.push(tex_image(4, 4, None));
        h.run_ok(&w);
        assert_eq!(h.take_error(), gl::INVALID_OPERATION);
        assert_eq!(h.decoder.texture_level(1, gl::TEXTURE_2D, 1).unwrap().width, 2);
    }

    #[test]
    fn texture_target_is_fixed_on_first_bind() {
        let mut h = Harness::new();
        let mut w = CmdWriter::new();
        w.gen_textures(&[1]);
        bind(&mut w, 1);
        w.push(BindTexture {
            target: gl::TEXTURE_CUBE_MAP,
            texture: 1,
        });
        h.run_ok(&w);
        assert_eq!(h.take_error(), gl::INVALID_OPERATION);
    }

    #[test]
    fn internal_format_must_match_format() {
        let mut h = Harness::new();
        let mut w = CmdWriter::new();
        w.gen_textures(&[1]);
        bind(&mut w, 1);
        w.push(TexImage2D {
            internal_format: gl::RGB,
            ..tex_image(4, 4, None)
        });
        h.run_ok(&w);
        assert_eq!(h.take_error(), gl::INVALID_OPERATION);
        assert!(!h.decoder.texture_level(1, gl::TEXTURE_2D, 0).unwrap().defined);
    }

    #[test]
    fn driver_out_of_memory_on_sub_upload_loses_the_context() {
        let mut h = Harness::new();
        h.decoder.config.lose_context_when_out_of_memory = true;
        h.write_bytes(0, &[3; 8]);
        let mut w = CmdWriter::new();
        w.gen_textures(&[1]);
        bind(&mut w, 1);
        w.push(tex_image(2, 1, Some(h.shm_id)));
        h.run_ok(&w);

        h.driver.inject_error(gl::OUT_OF_MEMORY);
        let mut w = CmdWriter::new();
        w.push(TexSubImage2D {
            target: gl::TEXTURE_2D,
            level: 0,
            xoffset: 0,
            yoffset: 0,
            width: 2,
            height: 1,
            format: gl::RGBA,
            pixel_type: gl::UNSIGNED_BYTE,
            pixels_shm_id: h.shm_id,
            pixels_shm_offset: 0,
        });
        let outcome = h.run(&w);
        assert_eq!(outcome.result, crate::error::ErrorCode::LostContext);
        assert_eq!(
            h.decoder.loss_state().reason(),
            Some(crate::context_lost::LossReason::OutOfMemory)
        );
    }
}
