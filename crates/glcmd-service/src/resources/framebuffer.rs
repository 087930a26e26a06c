use std::collections::BTreeMap;

use glcmd_protocol::gl::{self, FormatPlanes};

use super::{RenderbufferKey, TextureKey};

/// Planes of the window-system framebuffer (client id 0).
pub const DEFAULT_FRAMEBUFFER_PLANES: FormatPlanes = FormatPlanes {
    color: true,
    alpha: true,
    depth: true,
    stencil: true,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Attachment {
    Texture {
        texture: TextureKey,
        /// `TEXTURE_2D` or a cube face.
        target: u32,
        level: u32,
    },
    Renderbuffer(RenderbufferKey),
}

/// What the framebuffer checks need to know about an attached image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttachmentInfo {
    pub internal_format: u32,
    pub width: u32,
    pub height: u32,
    pub samples: u32,
    pub defined: bool,
    pub cleared: bool,
    /// `None` when the format cannot be rendered to.
    pub planes: Option<FormatPlanes>,
}

/// Completeness of a framebuffer.
///
/// `Unknown -> PossiblyComplete` after the static attachment checks,
/// `-> DriverQueried` once the driver has been asked, then `Complete` or
/// `Incomplete(status)`. Any attachment change, or a change of the group's
/// attachment generation, sends it back to `Unknown`. Only `Complete` is
/// remembered across checks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Completeness {
    #[default]
    Unknown,
    PossiblyComplete,
    DriverQueried,
    Complete,
    Incomplete(u32),
}

#[derive(Debug, Default)]
pub struct Framebuffer {
    attachments: BTreeMap<u32, Attachment>,
    completeness: Completeness,
    generation: u64,
}

pub fn is_attachment_point(point: u32) -> bool {
    matches!(
        point,
        gl::COLOR_ATTACHMENT0
            | gl::DEPTH_ATTACHMENT
            | gl::STENCIL_ATTACHMENT
            | gl::DEPTH_STENCIL_ATTACHMENT
    )
}

impl Framebuffer {
    /// Sets or clears an attachment point, returning what was there.
    pub fn attach(&mut self, point: u32, attachment: Option<Attachment>) -> Option<Attachment> {
        self.completeness = Completeness::Unknown;
        match attachment {
            Some(a) => self.attachments.insert(point, a),
            None => self.attachments.remove(&point),
        }
    }

    pub fn attachment(&self, point: u32) -> Option<Attachment> {
        self.attachments.get(&point).copied()
    }

    pub fn attachments(&self) -> impl Iterator<Item = (u32, Attachment)> + '_ {
        self.attachments.iter().map(|(p, a)| (*p, *a))
    }

    pub fn is_empty(&self) -> bool {
        self.attachments.is_empty()
    }

    /// Attachment points referencing `texture`.
    pub fn points_with_texture(&self, texture: TextureKey) -> Vec<u32> {
        self.attachments()
            .filter(|(_, a)| matches!(a, Attachment::Texture { texture: t, .. } if *t == texture))
            .map(|(p, _)| p)
            .collect()
    }

    pub fn points_with_renderbuffer(&self, renderbuffer: RenderbufferKey) -> Vec<u32> {
        self.attachments()
            .filter(|(_, a)| *a == Attachment::Renderbuffer(renderbuffer))
            .map(|(p, _)| p)
            .collect()
    }

    /// Current state, as seen under attachment generation `generation`.
    pub fn completeness(&self, generation: u64) -> Completeness {
        if self.generation != generation {
            return Completeness::Unknown;
        }
        self.completeness
    }

    pub fn set_completeness(&mut self, completeness: Completeness, generation: u64) {
        self.completeness = completeness;
        self.generation = generation;
    }

    /// Checks that need no driver round trip. `Err` carries the
    /// `FRAMEBUFFER_*` status.
    pub fn static_check(
        &self,
        resolve: impl Fn(&Attachment) -> Option<AttachmentInfo>,
    ) -> Result<(), u32> {
        if self.attachments.is_empty() {
            return Err(gl::FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT);
        }
        let mut size = None;
        let mut samples = None;
        for (point, attachment) in &self.attachments {
            let info = resolve(attachment)
                .filter(|info| info.defined && info.width > 0 && info.height > 0)
                .ok_or(gl::FRAMEBUFFER_INCOMPLETE_ATTACHMENT)?;
            let planes = info.planes.ok_or(gl::FRAMEBUFFER_INCOMPLETE_ATTACHMENT)?;
            let renderable = match *point {
                gl::COLOR_ATTACHMENT0 => planes.color,
                gl::DEPTH_ATTACHMENT => planes.depth,
                gl::STENCIL_ATTACHMENT => planes.stencil,
                gl::DEPTH_STENCIL_ATTACHMENT => planes.depth && planes.stencil,
                _ => false,
            };
            if !renderable {
                return Err(gl::FRAMEBUFFER_INCOMPLETE_ATTACHMENT);
            }
            if *size.get_or_insert((info.width, info.height)) != (info.width, info.height) {
                return Err(gl::FRAMEBUFFER_INCOMPLETE_DIMENSIONS);
            }
            if *samples.get_or_insert(info.samples) != info.samples {
                return Err(gl::FRAMEBUFFER_INCOMPLETE_MULTISAMPLE);
            }
        }
        Ok(())
    }

    /// Union of the planes of every attachment.
    pub fn planes(&self, resolve: impl Fn(&Attachment) -> Option<AttachmentInfo>) -> FormatPlanes {
        let mut planes = FormatPlanes::default();
        for (point, attachment) in &self.attachments {
            let Some(p) = resolve(attachment).and_then(|info| info.planes) else {
                continue;
            };
            match *point {
                gl::COLOR_ATTACHMENT0 => {
                    planes.color |= p.color;
                    planes.alpha |= p.alpha;
                }
                gl::DEPTH_ATTACHMENT => planes.depth |= p.depth,
                gl::STENCIL_ATTACHMENT => planes.stencil |= p.stencil,
                _ => {
                    planes.depth |= p.depth;
                    planes.stencil |= p.stencil;
                }
            }
        }
        planes
    }
}

#[cfg(test)]
mod tests {
    use slotmap::SlotMap;

    use super::*;

    fn info(format: u32, w: u32, h: u32) -> AttachmentInfo {
        AttachmentInfo {
            internal_format: format,
            width: w,
            height: h,
            samples: 0,
            defined: true,
            cleared: false,
            planes: gl::format_planes(format),
        }
    }

    #[test]
    fn static_check_reports_first_problem() {
        let mut rbs: SlotMap<RenderbufferKey, AttachmentInfo> = SlotMap::with_key();
        let color = rbs.insert(info(gl::RGBA4, 4, 4));
        let depth = rbs.insert(info(gl::DEPTH_COMPONENT16, 4, 4));
        let small = rbs.insert(info(gl::DEPTH_COMPONENT16, 2, 2));
        let resolve = |a: &Attachment| match a {
            Attachment::Renderbuffer(k) => rbs.get(*k).copied(),
            Attachment::Texture { .. } => None,
        };

        let mut fb = Framebuffer::default();
        assert_eq!(
            fb.static_check(resolve),
            Err(gl::FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT)
        );

        fb.attach(gl::COLOR_ATTACHMENT0, Some(Attachment::Renderbuffer(color)));
        fb.attach(gl::DEPTH_ATTACHMENT, Some(Attachment::Renderbuffer(depth)));
        assert_eq!(fb.static_check(resolve), Ok(()));

        fb.attach(gl::DEPTH_ATTACHMENT, Some(Attachment::Renderbuffer(small)));
        assert_eq!(
            fb.static_check(resolve),
            Err(gl::FRAMEBUFFER_INCOMPLETE_DIMENSIONS)
        );

        // A depth format on the colour point is not renderable there.
        fb.attach(gl::COLOR_ATTACHMENT0, Some(Attachment::Renderbuffer(depth)));
        fb.attach(gl::DEPTH_ATTACHMENT, None);
        assert_eq!(
            fb.static_check(resolve),
            Err(gl::FRAMEBUFFER_INCOMPLETE_ATTACHMENT)
        );
    }

    #[test]
    fn only_matching_generation_is_remembered() {
        let mut rbs: SlotMap<RenderbufferKey, ()> = SlotMap::with_key();
        let rb = rbs.insert(());
        let mut fb = Framebuffer::default();
        fb.attach(gl::COLOR_ATTACHMENT0, Some(Attachment::Renderbuffer(rb)));
        fb.set_completeness(Completeness::Complete, 3);
        assert_eq!(fb.completeness(3), Completeness::Complete);
        assert_eq!(fb.completeness(4), Completeness::Unknown);

        fb.attach(gl::COLOR_ATTACHMENT0, None);
        assert_eq!(fb.completeness(3), Completeness::Unknown);
        assert_eq!(fb.points_with_renderbuffer(rb), Vec::<u32>::new());
    }
}
