//! Per-decoder context state.

use bitflags::bitflags;
use glcmd_protocol::gl::{self, FormatPlanes};

use crate::driver::Driver;
use crate::resources::{
    BufferKey, FramebufferKey, ProgramKey, RenderbufferKey, TextureKey, ValuebufferKey,
    VertexArrayKey,
};

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Capabilities: u32 {
        const BLEND = 1 << 0;
        const CULL_FACE = 1 << 1;
        const DEPTH_TEST = 1 << 2;
        const DITHER = 1 << 3;
        const POLYGON_OFFSET_FILL = 1 << 4;
        const SAMPLE_ALPHA_TO_COVERAGE = 1 << 5;
        const SAMPLE_COVERAGE = 1 << 6;
        const SCISSOR_TEST = 1 << 7;
        const STENCIL_TEST = 1 << 8;
    }
}

impl Capabilities {
    pub fn from_gl(cap: u32) -> Option<Self> {
        Some(match cap {
            gl::BLEND => Capabilities::BLEND,
            gl::CULL_FACE => Capabilities::CULL_FACE,
            gl::DEPTH_TEST => Capabilities::DEPTH_TEST,
            gl::DITHER => Capabilities::DITHER,
            gl::POLYGON_OFFSET_FILL => Capabilities::POLYGON_OFFSET_FILL,
            gl::SAMPLE_ALPHA_TO_COVERAGE => Capabilities::SAMPLE_ALPHA_TO_COVERAGE,
            gl::SAMPLE_COVERAGE => Capabilities::SAMPLE_COVERAGE,
            gl::SCISSOR_TEST => Capabilities::SCISSOR_TEST,
            gl::STENCIL_TEST => Capabilities::STENCIL_TEST,
            _ => return None,
        })
    }

    /// Capabilities whose driver state depends on the framebuffer's planes.
    pub fn shape_dependent(self) -> bool {
        self.intersects(Capabilities::DEPTH_TEST | Capabilities::STENCIL_TEST)
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ClearMask: u32 {
        const COLOR = gl::COLOR_BUFFER_BIT;
        const DEPTH = gl::DEPTH_BUFFER_BIT;
        const STENCIL = gl::STENCIL_BUFFER_BIT;
    }
}

impl ClearMask {
    /// Rejects unknown bits.
    pub fn from_gl(mask: u32) -> Option<Self> {
        Self::from_bits(mask)
    }

    /// Buffers a framebuffer with `planes` actually has.
    pub fn for_planes(planes: FormatPlanes) -> Self {
        let mut mask = ClearMask::empty();
        mask.set(ClearMask::COLOR, planes.color);
        mask.set(ClearMask::DEPTH, planes.depth);
        mask.set(ClearMask::STENCIL, planes.stencil);
        mask
    }
}

/// Driver-side write masks and tests that depend on the draw framebuffer.
///
/// Writing alpha into an RGB attachment, or enabling the depth test without a
/// depth plane, must look to the driver as if the plane were absent. The
/// values the client asked for stay in [`ContextState`]; this is what the
/// driver was last told.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AppliedShape {
    pub color_mask: [bool; 4],
    pub depth_mask: bool,
    pub stencil_mask: u32,
    pub depth_test: bool,
    pub stencil_test: bool,
}

/// Dirty-flag tracker for [`AppliedShape`].
///
/// Handlers that touch masks, the depth/stencil tests or the draw
/// framebuffer only call [`FramebufferShapeState::mark_dirty`]. The driver is
/// updated by [`FramebufferShapeState::resolve`] at draw, clear and read
/// checkpoints, with only the fields that changed.
#[derive(Clone, Copy, Debug, Default)]
pub struct FramebufferShapeState {
    dirty: bool,
    applied: Option<AppliedShape>,
}

impl FramebufferShapeState {
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Forgets what the driver holds, forcing every field out at the next
    /// resolve.
    pub fn invalidate(&mut self) {
        self.dirty = true;
        self.applied = None;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Applies `desired`. Returns the number of driver calls issued; a second
    /// call with the same input issues none.
    pub fn resolve(&mut self, desired: AppliedShape, driver: &mut dyn Driver) -> usize {
        if !self.dirty && self.applied == Some(desired) {
            return 0;
        }
        let old = self.applied;
        let changed = |f: fn(&AppliedShape) -> bool| old.map_or(true, |o| f(&o) != f(&desired));
        let mut calls = 0;
        if old.map_or(true, |o| o.color_mask != desired.color_mask) {
            driver.color_mask(desired.color_mask);
            calls += 1;
        }
        if changed(|s| s.depth_mask) {
            driver.depth_mask(desired.depth_mask);
            calls += 1;
        }
        if old.map_or(true, |o| o.stencil_mask != desired.stencil_mask) {
            driver.stencil_mask(desired.stencil_mask);
            calls += 1;
        }
        if changed(|s| s.depth_test) {
            set_cap(driver, gl::DEPTH_TEST, desired.depth_test);
            calls += 1;
        }
        if changed(|s| s.stencil_test) {
            set_cap(driver, gl::STENCIL_TEST, desired.stencil_test);
            calls += 1;
        }
        self.applied = Some(desired);
        self.dirty = false;
        calls
    }
}

fn set_cap(driver: &mut dyn Driver, cap: u32, on: bool) {
    if on {
        driver.enable(cap);
    } else {
        driver.disable(cap);
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TextureUnit {
    pub texture_2d: Option<TextureKey>,
    pub cube_map: Option<TextureKey>,
}

impl TextureUnit {
    pub fn binding(&self, target: u32) -> Option<TextureKey> {
        match target {
            gl::TEXTURE_2D => self.texture_2d,
            gl::TEXTURE_CUBE_MAP => self.cube_map,
            _ => None,
        }
    }

    pub fn binding_mut(&mut self, target: u32) -> Option<&mut Option<TextureKey>> {
        match target {
            gl::TEXTURE_2D => Some(&mut self.texture_2d),
            gl::TEXTURE_CUBE_MAP => Some(&mut self.cube_map),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct ContextState {
    pub array_buffer: Option<BufferKey>,
    pub draw_framebuffer: Option<FramebufferKey>,
    pub read_framebuffer: Option<FramebufferKey>,
    pub renderbuffer: Option<RenderbufferKey>,
    pub texture_units: Vec<TextureUnit>,
    pub active_texture_unit: u32,
    pub current_program: Option<ProgramKey>,
    /// `None` is the decoder's default vertex array.
    pub vertex_array: Option<VertexArrayKey>,
    pub valuebuffer: Option<ValuebufferKey>,

    pub enabled: Capabilities,
    pub clear_color: [f32; 4],
    pub clear_depth: f32,
    pub clear_stencil: i32,
    pub color_mask: [bool; 4],
    pub depth_mask: bool,
    pub stencil_mask: u32,
    pub scissor: [i32; 4],
    pub viewport: [i32; 4],
    pub pack_alignment: u32,
    pub unpack_alignment: u32,
    /// Generic values of disabled attribute arrays.
    pub attrib_values: Vec<[f32; 4]>,

    pub shape: FramebufferShapeState,
}

impl ContextState {
    pub fn new(max_texture_units: u32, max_vertex_attribs: u32, surface: (u32, u32)) -> Self {
        let (w, h) = (surface.0 as i32, surface.1 as i32);
        Self {
            array_buffer: None,
            draw_framebuffer: None,
            read_framebuffer: None,
            renderbuffer: None,
            texture_units: vec![TextureUnit::default(); max_texture_units as usize],
            active_texture_unit: 0,
            current_program: None,
            vertex_array: None,
            valuebuffer: None,
            enabled: Capabilities::DITHER,
            clear_color: [0.0; 4],
            clear_depth: 1.0,
            clear_stencil: 0,
            color_mask: [true; 4],
            depth_mask: true,
            stencil_mask: u32::MAX,
            scissor: [0, 0, w, h],
            viewport: [0, 0, w, h],
            pack_alignment: 4,
            unpack_alignment: 4,
            attrib_values: vec![[0.0, 0.0, 0.0, 1.0]; max_vertex_attribs as usize],
            shape: FramebufferShapeState::default(),
        }
    }

    pub fn active_unit(&self) -> &TextureUnit {
        &self.texture_units[self.active_texture_unit as usize]
    }

    pub fn active_unit_mut(&mut self) -> &mut TextureUnit {
        &mut self.texture_units[self.active_texture_unit as usize]
    }

    pub fn bound_texture(&self, target: u32) -> Option<TextureKey> {
        let binding = gl::texture_binding_target(target).unwrap_or(target);
        self.active_unit().binding(binding)
    }

    pub fn framebuffer(&self, target: u32) -> Option<FramebufferKey> {
        if target == gl::READ_FRAMEBUFFER {
            self.read_framebuffer
        } else {
            self.draw_framebuffer
        }
    }

    /// Driver shape for the client's state on a framebuffer with `planes`.
    pub fn desired_shape(&self, planes: FormatPlanes) -> AppliedShape {
        let mut color_mask = self.color_mask;
        color_mask[3] &= planes.alpha;
        AppliedShape {
            color_mask,
            depth_mask: self.depth_mask && planes.depth,
            stencil_mask: if planes.stencil { self.stencil_mask } else { 0 },
            depth_test: self.enabled.contains(Capabilities::DEPTH_TEST) && planes.depth,
            stencil_test: self.enabled.contains(Capabilities::STENCIL_TEST) && planes.stencil,
        }
    }

    /// Forgets every binding of `texture` on every unit. Returns `true` when
    /// something was unbound.
    pub fn unbind_texture(&mut self, texture: TextureKey) -> bool {
        let mut unbound = false;
        for unit in &mut self.texture_units {
            for slot in [&mut unit.texture_2d, &mut unit.cube_map] {
                if *slot == Some(texture) {
                    *slot = None;
                    unbound = true;
                }
            }
        }
        unbound
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::SoftwareDriver;

    fn planes(alpha: bool, depth: bool) -> FormatPlanes {
        FormatPlanes {
            color: true,
            alpha,
            depth,
            stencil: false,
        }
    }

    #[test]
    fn resolve_is_idempotent() {
        let mut driver = SoftwareDriver::default();
        let state = ContextState::new(2, 4, (8, 8));
        let mut shape = FramebufferShapeState::default();
        shape.mark_dirty();

        let desired = state.desired_shape(planes(true, true));
        assert_eq!(shape.resolve(desired, &mut driver), 5);
        assert_eq!(shape.resolve(desired, &mut driver), 0);

        // Marked dirty with nothing changed: still no driver calls beyond the
        // fields that differ.
        shape.mark_dirty();
        assert_eq!(shape.resolve(desired, &mut driver), 0);
        assert!(!shape.is_dirty());
    }

    #[test]
    fn missing_planes_mask_driver_state() {
        let mut driver = SoftwareDriver::default();
        let mut state = ContextState::new(2, 4, (8, 8));
        state.enabled |= Capabilities::DEPTH_TEST;
        let mut shape = FramebufferShapeState::default();

        shape.resolve(state.desired_shape(planes(false, false)), &mut driver);
        assert_eq!(driver.color_mask_value(), [true, true, true, false]);
        assert!(!driver.depth_mask_value());
        assert!(!driver.is_enabled(gl::DEPTH_TEST));

        shape.mark_dirty();
        assert_eq!(
            shape.resolve(state.desired_shape(planes(true, true)), &mut driver),
            3
        );
        assert!(driver.is_enabled(gl::DEPTH_TEST));
        assert_eq!(state.color_mask, [true; 4]);
    }

    #[test]
    fn clear_mask_rejects_unknown_bits() {
        assert_eq!(
            ClearMask::from_gl(gl::COLOR_BUFFER_BIT | gl::DEPTH_BUFFER_BIT),
            Some(ClearMask::COLOR | ClearMask::DEPTH)
        );
        assert_eq!(ClearMask::from_gl(0x1), None);
        assert_eq!(Capabilities::from_gl(gl::TRIANGLES), None);
    }
}
