//! Capabilities, clear values, write masks and the viewport.
//!
//! Masks and the depth/stencil tests depend on the draw framebuffer's planes,
//! so they only update [`crate::state::ContextState`] and mark the shape
//! dirty; the driver sees them at the next draw, clear or read.

use glcmd_protocol::cmd::{
    ClearColor, ClearDepthf, ClearStencil, ColorMask, DepthMask, Disable, Enable, Scissor,
    StencilMask, Viewport,
};

use super::Decoder;
use crate::error::{CommandError, GlError};
use crate::state::Capabilities;

impl Decoder {
    fn set_capability(&mut self, func: &'static str, cap: u32, on: bool) -> Result<(), CommandError> {
        let Some(flag) = Capabilities::from_gl(cap) else {
            return self.gl_error(GlError::InvalidEnum, func, "invalid capability");
        };
        if self.state.enabled.contains(flag) == on {
            return Ok(());
        }
        self.state.enabled.set(flag, on);
        if flag.shape_dependent() {
            self.state.shape.mark_dirty();
        } else if on {
            self.driver.enable(cap);
        } else {
            self.driver.disable(cap);
        }
        Ok(())
    }

    pub(crate) fn handle_enable(&mut self, c: Enable) -> Result<(), CommandError> {
        self.set_capability("glEnable", c.cap, true)
    }

    pub(crate) fn handle_disable(&mut self, c: Disable) -> Result<(), CommandError> {
        self.set_capability("glDisable", c.cap, false)
    }

    pub(crate) fn handle_clear_color(&mut self, c: ClearColor) -> Result<(), CommandError> {
        let rgba = [c.red, c.green, c.blue, c.alpha];
        self.state.clear_color = rgba;
        self.driver.clear_color(rgba);
        Ok(())
    }

    pub(crate) fn handle_clear_depthf(&mut self, c: ClearDepthf) -> Result<(), CommandError> {
        let depth = c.depth.clamp(0.0, 1.0);
        self.state.clear_depth = depth;
        self.driver.clear_depth(depth);
        Ok(())
    }

    pub(crate) fn handle_clear_stencil(&mut self, c: ClearStencil) -> Result<(), CommandError> {
        self.state.clear_stencil = c.s;
        self.driver.clear_stencil(c.s);
        Ok(())
    }

    pub(crate) fn handle_color_mask(&mut self, c: ColorMask) -> Result<(), CommandError> {
        self.state.color_mask = [c.red, c.green, c.blue, c.alpha];
        self.state.shape.mark_dirty();
        Ok(())
    }

    pub(crate) fn handle_depth_mask(&mut self, c: DepthMask) -> Result<(), CommandError> {
        self.state.depth_mask = c.flag;
        self.state.shape.mark_dirty();
        Ok(())
    }

    pub(crate) fn handle_stencil_mask(&mut self, c: StencilMask) -> Result<(), CommandError> {
        self.state.stencil_mask = c.mask;
        self.state.shape.mark_dirty();
        Ok(())
    }

    pub(crate) fn handle_scissor(&mut self, c: Scissor) -> Result<(), CommandError> {
        if c.width < 0 || c.height < 0 {
            return self.gl_error(GlError::InvalidValue, "glScissor", "negative size");
        }
        self.state.scissor = [c.x, c.y, c.width, c.height];
        self.driver.scissor(c.x, c.y, c.width, c.height);
        Ok(())
    }

    pub(crate) fn handle_viewport(&mut self, c: Viewport) -> Result<(), CommandError> {
        if c.width < 0 || c.height < 0 {
            return self.gl_error(GlError::InvalidValue, "glViewport", "negative size");
        }
        self.state.viewport = [c.x, c.y, c.width, c.height];
        self.driver.viewport(c.x, c.y, c.width, c.height);
        Ok(())
    }
}
