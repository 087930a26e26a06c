use std::cell::RefCell;
use std::rc::Rc;

use glcmd_protocol::gl;

use super::{
    Attachment, AttachmentInfo, Buffer, BufferKey, Destroyed, ObjectMap, Program, ProgramKey,
    Renderbuffer, RenderbufferKey, Shader, ShaderKey, Texture, TextureKey, ValueState,
};
use crate::context_lost::LossReason;
use crate::driver::Driver;

/// Objects shared by every decoder of one share group.
///
/// Decoders of a group run on one thread, one batch at a time, so the group
/// is shared as `Rc<RefCell<_>>` and never borrowed across a batch boundary.
#[derive(Debug)]
pub struct ResourceGroup {
    pub buffers: ObjectMap<BufferKey, Buffer>,
    pub textures: ObjectMap<TextureKey, Texture>,
    pub renderbuffers: ObjectMap<RenderbufferKey, Renderbuffer>,
    pub shaders: ObjectMap<ShaderKey, Shader>,
    pub programs: ObjectMap<ProgramKey, Program>,
    pub values: ValueState,
    bind_generates_resource: bool,
    attachment_generation: u64,
    lost: Option<LossReason>,
    members: usize,
}

pub type SharedResourceGroup = Rc<RefCell<ResourceGroup>>;

impl ResourceGroup {
    /// `bind_generates_resource`: binding an id that was never generated
    /// creates the object instead of failing with `INVALID_OPERATION`.
    pub fn new(bind_generates_resource: bool) -> Self {
        Self {
            buffers: ObjectMap::new(),
            textures: ObjectMap::new(),
            renderbuffers: ObjectMap::new(),
            shaders: ObjectMap::new(),
            programs: ObjectMap::new(),
            values: ValueState::default(),
            bind_generates_resource,
            attachment_generation: 0,
            lost: None,
            members: 0,
        }
    }

    pub fn shared(bind_generates_resource: bool) -> SharedResourceGroup {
        Rc::new(RefCell::new(Self::new(bind_generates_resource)))
    }

    pub fn bind_generates_resource(&self) -> bool {
        self.bind_generates_resource
    }

    /// Bumped whenever a texture level or renderbuffer storage is redefined,
    /// which invalidates every remembered framebuffer verdict.
    pub fn attachment_generation(&self) -> u64 {
        self.attachment_generation
    }

    pub fn bump_attachment_generation(&mut self) {
        self.attachment_generation = self.attachment_generation.wrapping_add(1);
    }

    /// Records that a member lost its context; every other member follows at
    /// its next batch.
    pub fn mark_lost(&mut self, reason: LossReason) {
        self.lost.get_or_insert(reason);
    }

    pub fn lost_reason(&self) -> Option<LossReason> {
        self.lost
    }

    pub fn join(&mut self) {
        self.members += 1;
    }

    /// Returns `true` when the last member left.
    pub fn leave(&mut self) -> bool {
        self.members = self.members.saturating_sub(1);
        self.members == 0
    }

    pub fn attachment_info(&self, attachment: &Attachment) -> Option<AttachmentInfo> {
        match *attachment {
            Attachment::Texture {
                texture,
                target,
                level,
            } => {
                let info = self.textures.object(texture)?.level(target, level)?;
                Some(AttachmentInfo {
                    internal_format: info.internal_format,
                    width: info.width,
                    height: info.height,
                    samples: 0,
                    defined: info.defined,
                    cleared: info.cleared,
                    planes: gl::format_planes(info.internal_format),
                })
            }
            Attachment::Renderbuffer(key) => {
                let rb = self.renderbuffers.object(key)?;
                Some(AttachmentInfo {
                    internal_format: rb.internal_format,
                    width: rb.width,
                    height: rb.height,
                    samples: rb.samples,
                    defined: rb.allocated,
                    cleared: rb.cleared,
                    planes: gl::format_planes(rb.internal_format),
                })
            }
        }
    }

    pub fn set_attachment_cleared(&mut self, attachment: &Attachment) {
        match *attachment {
            Attachment::Texture {
                texture,
                target,
                level,
            } => {
                if let Some(tex) = self.textures.object_mut(texture) {
                    tex.set_level_cleared(target, level, true);
                }
            }
            Attachment::Renderbuffer(key) => {
                if let Some(rb) = self.renderbuffers.object_mut(key) {
                    rb.cleared = true;
                }
            }
        }
    }

    /// Drops a reference taken by an attachment, deleting the object from the
    /// driver when it was the last one.
    pub fn release_attachment(&mut self, attachment: &Attachment, driver: Option<&mut (dyn Driver + '_)>) {
        match *attachment {
            Attachment::Texture { texture, .. } => {
                if let Some(dead) = self.textures.release(texture) {
                    if let Some(driver) = driver {
                        driver.delete_texture(dead.service_id);
                    }
                }
            }
            Attachment::Renderbuffer(key) => {
                if let Some(dead) = self.renderbuffers.release(key) {
                    if let Some(driver) = driver {
                        driver.delete_renderbuffer(dead.service_id);
                    }
                }
            }
        }
    }

    /// Deletes a dead program and drops its references on attached shaders.
    pub fn retire_program(&mut self, dead: Destroyed<Program>, mut driver: Option<&mut (dyn Driver + '_)>) {
        if let Some(driver) = driver.as_deref_mut() {
            driver.delete_program(dead.service_id);
        }
        for shader in [dead.object.vertex_shader, dead.object.fragment_shader]
            .into_iter()
            .flatten()
        {
            self.release_shader(shader, driver.as_deref_mut());
        }
    }

    pub fn release_shader(&mut self, shader: ShaderKey, driver: Option<&mut (dyn Driver + '_)>) {
        if let Some(dead) = self.shaders.release(shader) {
            if let Some(driver) = driver {
                driver.delete_shader(dead.service_id);
            }
        }
    }

    pub fn release_buffer(&mut self, buffer: BufferKey, driver: Option<&mut (dyn Driver + '_)>) {
        if let Some(dead) = self.buffers.release(buffer) {
            if let Some(driver) = driver {
                driver.delete_buffer(dead.service_id);
            }
        }
    }

    pub fn release_texture(&mut self, texture: TextureKey, driver: Option<&mut (dyn Driver + '_)>) {
        if let Some(dead) = self.textures.release(texture) {
            if let Some(driver) = driver {
                driver.delete_texture(dead.service_id);
            }
        }
    }

    pub fn release_program(&mut self, program: ProgramKey, driver: Option<&mut (dyn Driver + '_)>) {
        if let Some(dead) = self.programs.release(program) {
            self.retire_program(dead, driver);
        }
    }

    /// Releases every object. With a usable driver the service ids are
    /// deleted; after context loss they are just forgotten.
    pub fn destroy(&mut self, mut driver: Option<&mut (dyn Driver + '_)>) {
        let buffers = self.buffers.drain();
        let textures = self.textures.drain();
        let renderbuffers = self.renderbuffers.drain();
        let programs = self.programs.drain();
        let shaders = self.shaders.drain();
        let Some(driver) = driver.as_deref_mut() else {
            return;
        };
        for dead in buffers {
            driver.delete_buffer(dead.service_id);
        }
        for dead in textures {
            driver.delete_texture(dead.service_id);
        }
        for dead in renderbuffers {
            driver.delete_renderbuffer(dead.service_id);
        }
        for dead in programs {
            driver.delete_program(dead.service_id);
        }
        for dead in shaders {
            driver.delete_shader(dead.service_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::SoftwareDriver;

    #[test]
    fn destroy_deletes_with_driver_and_forgets_without() {
        let mut driver = SoftwareDriver::default();
        let mut group = ResourceGroup::new(true);
        let id = driver.gen_buffer();
        group.buffers.create(1, id, Buffer::default()).unwrap();
        group.destroy(Some(&mut driver));
        assert_eq!(driver.live_objects().buffers, 0);

        let id = driver.gen_texture();
        group.textures.create(1, id, Texture::default()).unwrap();
        group.destroy(None);
        assert!(group.textures.is_empty());
        assert_eq!(driver.live_objects().textures, 1);
    }

    #[test]
    fn program_retirement_releases_shaders() {
        let mut driver = SoftwareDriver::default();
        let mut group = ResourceGroup::new(false);
        let vs = group
            .shaders
            .create(1, driver.create_shader(gl::VERTEX_SHADER), Shader::new(gl::VERTEX_SHADER))
            .unwrap();
        let program = group
            .programs
            .create(2, driver.create_program(), Program::default())
            .unwrap();
        group.shaders.add_ref(vs);
        if let Some(p) = group.programs.object_mut(program) {
            p.vertex_shader = Some(vs);
        }

        // Shader deleted while attached: it lingers.
        assert!(group.shaders.remove(vs).is_none());
        let dead = group.programs.remove(program).unwrap();
        group.retire_program(dead, Some(&mut driver));
        assert!(group.shaders.object(vs).is_none());
        assert_eq!(driver.live_objects().shaders, 0);
        assert_eq!(driver.live_objects().programs, 0);
    }

    #[test]
    fn loss_reason_is_sticky() {
        let mut group = ResourceGroup::new(false);
        group.mark_lost(LossReason::Guilty);
        group.mark_lost(LossReason::Innocent);
        assert_eq!(group.lost_reason(), Some(LossReason::Guilty));
    }
}
