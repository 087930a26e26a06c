use glcmd_protocol::gl;

/// Bookkeeping for one mip level of one face.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LevelInfo {
    /// Storage exists for the level.
    pub defined: bool,
    /// Every texel has been written (by an upload or by a lazy clear).
    pub cleared: bool,
    pub internal_format: u32,
    pub width: u32,
    pub height: u32,
    pub format: u32,
    pub ty: u32,
}

/// A pixel upload, as seen by level bookkeeping.
///
/// Synchronous uploads and completed asynchronous uploads both go through
/// [`Texture::record_upload`] with one of these, so the two paths cannot
/// diverge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureUpload {
    Define {
        internal_format: u32,
        width: u32,
        height: u32,
        format: u32,
        ty: u32,
        /// `false` when the level is allocated without initial contents.
        has_pixels: bool,
    },
    Sub {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
}

#[derive(Debug)]
pub struct Texture {
    /// Set on first bind; a texture never changes target afterwards.
    pub target: Option<u32>,
    faces: Vec<Vec<LevelInfo>>,
    /// Storage was fixed by `TexStorage2D`; redefinition is rejected.
    pub immutable: bool,
    pub min_filter: u32,
    pub mag_filter: u32,
    pub wrap_s: u32,
    pub wrap_t: u32,
    /// External image currently backing level 0.
    pub image: Option<u32>,
}

impl Default for Texture {
    fn default() -> Self {
        Self {
            target: None,
            faces: Vec::new(),
            immutable: false,
            min_filter: gl::NEAREST_MIPMAP_LINEAR,
            mag_filter: gl::LINEAR,
            wrap_s: gl::REPEAT,
            wrap_t: gl::REPEAT,
            image: None,
        }
    }
}

impl Texture {
    /// Fixes the target and sizes the level tables.
    pub fn set_target(&mut self, target: u32, max_levels: u32) {
        let faces = if target == gl::TEXTURE_CUBE_MAP { 6 } else { 1 };
        self.target = Some(target);
        self.faces = vec![vec![LevelInfo::default(); max_levels as usize]; faces];
    }

    /// Face-level targets this texture has (`TEXTURE_2D` or the six cube faces).
    pub fn face_targets(&self) -> Vec<u32> {
        match self.target {
            Some(gl::TEXTURE_CUBE_MAP) => gl::CUBE_MAP_FACES.to_vec(),
            Some(target) => vec![target],
            None => Vec::new(),
        }
    }

    fn face_index(&self, target: u32) -> Option<usize> {
        match self.target? {
            gl::TEXTURE_CUBE_MAP => gl::CUBE_MAP_FACES.iter().position(|f| *f == target),
            own if own == target => Some(0),
            _ => None,
        }
    }

    pub fn level_count(&self) -> u32 {
        self.faces.first().map_or(0, |levels| levels.len() as u32)
    }

    pub fn level(&self, target: u32, level: u32) -> Option<&LevelInfo> {
        self.faces.get(self.face_index(target)?)?.get(level as usize)
    }

    fn level_mut(&mut self, target: u32, level: u32) -> Option<&mut LevelInfo> {
        let face = self.face_index(target)?;
        self.faces.get_mut(face)?.get_mut(level as usize)
    }

    /// Applies an upload to the level tables. Returns whether the level is
    /// cleared afterwards, or `None` for an unknown target or level.
    ///
    /// A partial `Sub` upload leaves the cleared bit alone: callers clear the
    /// level before writing part of it.
    pub fn record_upload(&mut self, target: u32, level: u32, upload: &TextureUpload) -> Option<bool> {
        let info = self.level_mut(target, level)?;
        match *upload {
            TextureUpload::Define {
                internal_format,
                width,
                height,
                format,
                ty,
                has_pixels,
            } => {
                *info = LevelInfo {
                    defined: true,
                    cleared: has_pixels || width == 0 || height == 0,
                    internal_format,
                    width,
                    height,
                    format,
                    ty,
                };
            }
            TextureUpload::Sub {
                x,
                y,
                width,
                height,
            } => {
                if x == 0 && y == 0 && width == info.width && height == info.height {
                    info.cleared = true;
                }
            }
        }
        Some(info.cleared)
    }

    pub fn set_level_cleared(&mut self, target: u32, level: u32, cleared: bool) {
        if let Some(info) = self.level_mut(target, level) {
            info.cleared = cleared;
        }
    }

    /// Allocates immutable storage for `levels` levels of every face.
    pub fn define_storage(
        &mut self,
        levels: u32,
        internal_format: u32,
        format: u32,
        ty: u32,
        width: u32,
        height: u32,
    ) {
        for face in &mut self.faces {
            for (level, info) in face.iter_mut().enumerate() {
                *info = if (level as u32) < levels {
                    LevelInfo {
                        defined: true,
                        cleared: false,
                        internal_format,
                        width: (width >> level).max(1),
                        height: (height >> level).max(1),
                        format,
                        ty,
                    }
                } else {
                    LevelInfo::default()
                };
            }
        }
        self.immutable = true;
    }

    /// Defined levels that have never been written, as `(face target, level)`.
    pub fn uncleared_levels(&self) -> Vec<(u32, u32, LevelInfo)> {
        let targets = self.face_targets();
        let mut out = Vec::new();
        for (face, levels) in self.faces.iter().enumerate() {
            let Some(target) = targets.get(face) else {
                continue;
            };
            for (level, info) in levels.iter().enumerate() {
                if info.defined && !info.cleared {
                    out.push((*target, level as u32, *info));
                }
            }
        }
        out
    }

    pub fn set_parameter(&mut self, pname: u32, param: u32) -> bool {
        let valid_filter = |v| matches!(v, gl::NEAREST | gl::LINEAR);
        let valid_min = |v| {
            valid_filter(v)
                || matches!(
                    v,
                    gl::NEAREST_MIPMAP_NEAREST
                        | gl::LINEAR_MIPMAP_NEAREST
                        | gl::NEAREST_MIPMAP_LINEAR
                        | gl::LINEAR_MIPMAP_LINEAR
                )
        };
        let valid_wrap = |v| matches!(v, gl::REPEAT | gl::CLAMP_TO_EDGE | gl::MIRRORED_REPEAT);
        match pname {
            gl::TEXTURE_MIN_FILTER if valid_min(param) => self.min_filter = param,
            gl::TEXTURE_MAG_FILTER if valid_filter(param) => self.mag_filter = param,
            gl::TEXTURE_WRAP_S if valid_wrap(param) => self.wrap_s = param,
            gl::TEXTURE_WRAP_T if valid_wrap(param) => self.wrap_t = param,
            _ => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn define(has_pixels: bool) -> TextureUpload {
        TextureUpload::Define {
            internal_format: gl::RGBA,
            width: 4,
            height: 4,
            format: gl::RGBA,
            ty: gl::UNSIGNED_BYTE,
            has_pixels,
        }
    }

    #[test]
    fn null_define_leaves_level_uncleared() {
        let mut tex = Texture::default();
        tex.set_target(gl::TEXTURE_2D, 4);
        assert_eq!(tex.record_upload(gl::TEXTURE_2D, 0, &define(false)), Some(false));
        assert_eq!(tex.uncleared_levels().len(), 1);

        let partial = TextureUpload::Sub {
            x: 1,
            y: 0,
            width: 3,
            height: 4,
        };
        assert_eq!(tex.record_upload(gl::TEXTURE_2D, 0, &partial), Some(false));

        let full = TextureUpload::Sub {
            x: 0,
            y: 0,
            width: 4,
            height: 4,
        };
        assert_eq!(tex.record_upload(gl::TEXTURE_2D, 0, &full), Some(true));
        assert!(tex.uncleared_levels().is_empty());
    }

    #[test]
    fn cube_faces_are_tracked_separately() {
        let mut tex = Texture::default();
        tex.set_target(gl::TEXTURE_CUBE_MAP, 2);
        tex.record_upload(gl::TEXTURE_CUBE_MAP_NEGATIVE_Y, 1, &define(true));
        assert!(tex.level(gl::TEXTURE_CUBE_MAP_NEGATIVE_Y, 1).unwrap().defined);
        assert!(!tex.level(gl::TEXTURE_CUBE_MAP_POSITIVE_Y, 1).unwrap().defined);
        assert!(tex.level(gl::TEXTURE_2D, 0).is_none());
        assert!(tex.record_upload(gl::TEXTURE_CUBE_MAP_POSITIVE_X, 2, &define(true)).is_none());
    }

    #[test]
    fn storage_defines_mip_chain() {
        let mut tex = Texture::default();
        tex.set_target(gl::TEXTURE_2D, 13);
        tex.define_storage(3, gl::RGBA8, gl::RGBA, gl::UNSIGNED_BYTE, 8, 2);
        assert!(tex.immutable);
        let sizes: Vec<_> = (0..4)
            .map(|l| {
                let info = tex.level(gl::TEXTURE_2D, l).unwrap();
                (info.defined, info.width, info.height)
            })
            .collect();
        assert_eq!(sizes, vec![(true, 8, 2), (true, 4, 1), (true, 2, 1), (false, 0, 0)]);
        assert_eq!(tex.uncleared_levels().len(), 3);
    }
}
