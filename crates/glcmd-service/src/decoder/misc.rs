//! Errors, synchronization, context loss and value buffers.

use glcmd_protocol::cmd::{
    BindValuebuffer, DeleteValuebuffersImmediate, Finish, Flush, GenValuebuffersImmediate,
    GetError, LoseContext, PopulateSubscribedValues, SubscribeValue, UniformValuebuffer,
    WaitSyncPoint,
};
use glcmd_protocol::gl;

use super::{check_new_ids, immediate_ids, Decoder};
use crate::context_lost::LossReason;
use crate::error::{CommandError, GlError};
use crate::resources::{is_subscription_target, Valuebuffer, ValuebufferKey};

impl Decoder {
    /// Moves errors the driver has raised into the decoder's error state.
    pub(crate) fn poll_driver_errors(&mut self) {
        loop {
            let code = self.driver.get_error();
            if code == gl::NO_ERROR {
                break;
            }
            self.errors.record_driver_error(code);
        }
    }

    pub(crate) fn handle_get_error(&mut self, c: GetError) -> Result<(), CommandError> {
        self.shm.check(c.result_shm_id, c.result_shm_offset, 4)?;
        self.poll_driver_errors();
        let code = self.errors.take().map_or(gl::NO_ERROR, GlError::to_gl);
        self.shm.write_u32(c.result_shm_id, c.result_shm_offset, code)?;
        Ok(())
    }

    pub(crate) fn handle_finish(&mut self, _c: Finish) -> Result<(), CommandError> {
        self.driver.finish();
        self.process_readbacks(true);
        self.process_pending_queries();
        Ok(())
    }

    pub(crate) fn handle_flush(&mut self, _c: Flush) -> Result<(), CommandError> {
        self.driver.flush();
        Ok(())
    }

    /// Leaves the command unconsumed until the sync point is released.
    pub(crate) fn handle_wait_sync_point(&mut self, c: WaitSyncPoint) -> Result<(), CommandError> {
        if self.sync_point_released(c.sync_point) {
            Ok(())
        } else {
            Err(CommandError::Deferred)
        }
    }

    pub(crate) fn handle_lose_context(&mut self, c: LoseContext) -> Result<(), CommandError> {
        let (Some(current), Some(other)) = (LossReason::from_gl(c.current), LossReason::from_gl(c.other))
        else {
            return self.gl_error(GlError::InvalidEnum, "glLoseContextCHROMIUM", "invalid reset status");
        };
        tracing::info!(?current, ?other, "client requested context loss");
        self.lose_context(current, other);
        Ok(())
    }

    pub(crate) fn handle_gen_valuebuffers(
        &mut self,
        c: GenValuebuffersImmediate,
        immediate: &[u32],
    ) -> Result<(), CommandError> {
        let ids = immediate_ids(c.n, immediate)?;
        check_new_ids(ids, |id| self.valuebuffers.contains_client(id))?;
        for &id in ids {
            // Value buffers have no driver object.
            self.valuebuffers
                .create(id, id, Valuebuffer::default())
                .map_err(|e| CommandError::invalid(e.to_string()))?;
        }
        Ok(())
    }

    pub(crate) fn handle_delete_valuebuffers(
        &mut self,
        c: DeleteValuebuffersImmediate,
        immediate: &[u32],
    ) -> Result<(), CommandError> {
        let ids = immediate_ids(c.n, immediate)?;
        for &id in ids {
            let Some(key) = self.valuebuffers.get(id) else {
                continue;
            };
            if self.state.valuebuffer == Some(key) {
                self.state.valuebuffer = None;
            }
            self.valuebuffers.remove(key);
        }
        Ok(())
    }

    fn check_valuebuffer_target(&mut self, func: &'static str, target: u32) -> bool {
        if target == gl::SUBSCRIBED_VALUES_BUFFER {
            true
        } else {
            self.errors.record(GlError::InvalidEnum, func, "invalid target");
            false
        }
    }

    fn bound_valuebuffer(&mut self, func: &'static str) -> Option<ValuebufferKey> {
        match self.state.valuebuffer {
            Some(key) => Some(key),
            None => self.reject(GlError::InvalidOperation, func, "no value buffer bound"),
        }
    }

    pub(crate) fn handle_bind_valuebuffer(&mut self, c: BindValuebuffer) -> Result<(), CommandError> {
        const FUNC: &str = "glBindValuebufferCHROMIUM";
        if !self.check_valuebuffer_target(FUNC, c.target) {
            return Ok(());
        }
        if c.valuebuffer == 0 {
            self.state.valuebuffer = None;
            return Ok(());
        }
        match self.valuebuffers.get(c.valuebuffer) {
            Some(key) => {
                self.state.valuebuffer = Some(key);
                Ok(())
            }
            None => self.gl_error(GlError::InvalidOperation, FUNC, "value buffer was not generated"),
        }
    }

    pub(crate) fn handle_subscribe_value(&mut self, c: SubscribeValue) -> Result<(), CommandError> {
        const FUNC: &str = "glSubscribeValueCHROMIUM";
        if !self.check_valuebuffer_target(FUNC, c.target) {
            return Ok(());
        }
        if !is_subscription_target(c.subscription) {
            return self.gl_error(GlError::InvalidEnum, FUNC, "invalid subscription");
        }
        let Some(key) = self.bound_valuebuffer(FUNC) else {
            return Ok(());
        };
        if let Some(vb) = self.valuebuffers.object_mut(key) {
            vb.subscribe(c.subscription);
        }
        Ok(())
    }

    pub(crate) fn handle_populate_subscribed_values(
        &mut self,
        c: PopulateSubscribedValues,
    ) -> Result<(), CommandError> {
        const FUNC: &str = "glPopulateSubscribedValuesCHROMIUM";
        if !self.check_valuebuffer_target(FUNC, c.target) {
            return Ok(());
        }
        let Some(key) = self.bound_valuebuffer(FUNC) else {
            return Ok(());
        };
        let group = self.group.borrow();
        if let Some(vb) = self.valuebuffers.object_mut(key) {
            vb.populate(&group.values);
        }
        Ok(())
    }

    pub(crate) fn handle_uniform_valuebuffer(
        &mut self,
        c: UniformValuebuffer,
    ) -> Result<(), CommandError> {
        const FUNC: &str = "glUniformValuebufferCHROMIUM";
        if !self.check_valuebuffer_target(FUNC, c.target) {
            return Ok(());
        }
        if !is_subscription_target(c.subscription) {
            return self.gl_error(GlError::InvalidEnum, FUNC, "invalid subscription");
        }
        let Some(key) = self.bound_valuebuffer(FUNC) else {
            return Ok(());
        };
        let value = match self.valuebuffers.object(key) {
            Some(vb) if vb.is_subscribed(c.subscription) => vb.value(c.subscription),
            _ => return self.gl_error(GlError::InvalidOperation, FUNC, "not subscribed"),
        };
        let Some(ty) = self.uniform_type(FUNC, c.location) else {
            return Ok(());
        };
        if ty != gl::INT_VEC2 {
            return self.gl_error(GlError::InvalidOperation, FUNC, "uniform type mismatch");
        }
        let Some(value) = value else {
            return self.gl_error(GlError::InvalidOperation, FUNC, "no value populated");
        };
        self.driver.uniform_iv(c.location, &value[..2]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use glcmd_protocol::cmd::{
        BindValuebuffer, GetError, LoseContext, PopulateSubscribedValues, SubscribeValue,
        WaitSyncPoint,
    };
    use glcmd_protocol::{gl, CmdWriter};

    use crate::context_lost::LossReason;
    use crate::error::ErrorCode;
    use crate::testing::Harness;

    #[test]
    fn get_error_returns_the_lowest_pending_code_once() {
        let mut h = Harness::new();
        let mut w = CmdWriter::new();
        w.push(glcmd_protocol::cmd::Enable { cap: 0xFFFF });
        w.push(glcmd_protocol::cmd::Scissor {
            x: 0,
            y: 0,
            width: -1,
            height: -1,
        });
        w.push(GetError {
            result_shm_id: h.shm_id,
            result_shm_offset: 0,
        });
        w.push(GetError {
            result_shm_id: h.shm_id,
            result_shm_offset: 4,
        });
        h.run_ok(&w);
        assert_eq!(h.read_u32(0), gl::INVALID_ENUM);
        assert_eq!(h.read_u32(4), gl::INVALID_VALUE);
    }

    #[test]
    fn unreleased_sync_point_defers_the_batch() {
        let mut h = Harness::new();
        let released = std::rc::Rc::new(std::cell::Cell::new(false));
        let flag = std::rc::Rc::clone(&released);
        h.decoder
            .set_sync_point_oracle(std::rc::Rc::new(move |_sync_point: u32| flag.get()));

        let mut w = CmdWriter::new();
        w.set_token(1);
        w.push(WaitSyncPoint { sync_point: 9 });
        w.set_token(2);
        let outcome = h.run(&w);
        assert_eq!(outcome.result, ErrorCode::Deferred);
        assert_eq!(outcome.commands_processed, 1);
        assert_eq!(h.decoder.last_token(), 1);

        released.set(true);
        assert_eq!(h.run(&w).result, ErrorCode::NoError);
        assert_eq!(h.decoder.last_token(), 2);
    }

    #[test]
    fn lose_context_stops_the_batch() {
        let mut h = Harness::new();
        let mut w = CmdWriter::new();
        w.push(LoseContext {
            current: gl::GUILTY_CONTEXT_RESET,
            other: gl::INNOCENT_CONTEXT_RESET,
        });
        w.set_token(5);
        let outcome = h.run(&w);
        assert_eq!(outcome.result, ErrorCode::LostContext);
        assert_eq!(outcome.commands_processed, 1);
        assert_eq!(h.decoder.loss_state().reason(), Some(LossReason::Guilty));
        assert_eq!(h.decoder.group().borrow().lost_reason(), Some(LossReason::Innocent));
    }

    #[test]
    fn subscribed_value_reaches_the_uniform() {
        let mut h = Harness::new();
        h.build_program(
            1,
            "uniform ivec2 u_mouse; attribute vec4 a_position; void main() { }",
            "void main() { }",
        );
        h.decoder
            .group()
            .borrow_mut()
            .values
            .set(gl::MOUSE_POSITION, [12, 34, 0, 0]);

        let mut w = CmdWriter::new();
        w.push(glcmd_protocol::cmd::UseProgram { program: 1 });
        w.gen_valuebuffers(&[3]);
        w.push(BindValuebuffer {
            target: gl::SUBSCRIBED_VALUES_BUFFER,
            valuebuffer: 3,
        });
        w.push(SubscribeValue {
            target: gl::SUBSCRIBED_VALUES_BUFFER,
            subscription: gl::MOUSE_POSITION,
        });
        w.push(PopulateSubscribedValues {
            target: gl::SUBSCRIBED_VALUES_BUFFER,
        });
        w.push(glcmd_protocol::cmd::UniformValuebuffer {
            location: 0,
            target: gl::SUBSCRIBED_VALUES_BUFFER,
            subscription: gl::MOUSE_POSITION,
        });
        h.run_ok(&w);
        assert_eq!(h.decoder.pending_gl_error(), None);
        assert_eq!(
            h.driver.uniform(h.decoder.program_service_id(1).unwrap(), 0),
            Some(crate::driver::software::UniformValue::Int(vec![12, 34]))
        );
    }
}
