use glcmd_protocol::cmd::{
    BindBuffer, BufferData, BufferSubData, DeleteBuffersImmediate, GenBuffersImmediate,
};
use glcmd_protocol::gl;

use super::{check_new_ids, immediate_ids, Decoder};
use crate::error::{CommandError, GlError};
use crate::resources::{Buffer, BufferKey};

fn is_buffer_target(target: u32) -> bool {
    matches!(target, gl::ARRAY_BUFFER | gl::ELEMENT_ARRAY_BUFFER)
}

impl Decoder {
    pub(crate) fn handle_gen_buffers(
        &mut self,
        c: GenBuffersImmediate,
        immediate: &[u32],
    ) -> Result<(), CommandError> {
        let ids = immediate_ids(c.n, immediate)?;
        {
            let group = self.group.borrow();
            check_new_ids(ids, |id| group.buffers.contains_client(id))?;
        }
        for &id in ids {
            let service = self.driver.gen_buffer();
            self.group
                .borrow_mut()
                .buffers
                .create(id, service, Buffer::default())
                .map_err(|e| CommandError::invalid(e.to_string()))?;
        }
        Ok(())
    }

    pub(crate) fn handle_delete_buffers(
        &mut self,
        c: DeleteBuffersImmediate,
        immediate: &[u32],
    ) -> Result<(), CommandError> {
        let ids = immediate_ids(c.n, immediate)?;
        for &id in ids {
            let Some(key) = self.group.borrow().buffers.get(id) else {
                continue;
            };
            self.forget_buffer(key);
            let dead = self.group.borrow_mut().buffers.remove(key);
            if let Some(dead) = dead {
                self.driver.delete_buffer(dead.service_id);
            }
        }
        Ok(())
    }

    /// Drops every binding and vertex-array reference this decoder holds on
    /// `buffer`.
    fn forget_buffer(&mut self, buffer: BufferKey) {
        if self.state.array_buffer == Some(buffer) {
            self.state.array_buffer = None;
            self.driver.bind_buffer(gl::ARRAY_BUFFER, 0);
        }
        let mut dropped = self.default_vertex_array.detach_buffer(buffer);
        self.vertex_arrays
            .for_each_mut(|_, vao| dropped += vao.detach_buffer(buffer));
        let mut group = self.group.borrow_mut();
        for _ in 0..dropped {
            group.buffers.release(buffer);
        }
    }

    /// Resolves `client_id` for a bind, creating the buffer when the group
    /// allows binding ungenerated ids.
    fn buffer_for_bind(&mut self, client_id: u32) -> Option<BufferKey> {
        let (existing, generate) = {
            let group = self.group.borrow();
            (group.buffers.get(client_id), group.bind_generates_resource())
        };
        if existing.is_some() || !generate {
            return existing;
        }
        let service = self.driver.gen_buffer();
        self.group
            .borrow_mut()
            .buffers
            .create(client_id, service, Buffer::default())
            .ok()
    }

    pub(crate) fn bound_buffer(&self, target: u32) -> Option<BufferKey> {
        match target {
            gl::ARRAY_BUFFER => self.state.array_buffer,
            gl::ELEMENT_ARRAY_BUFFER => self.current_vertex_array().element_buffer,
            _ => None,
        }
    }

    pub(crate) fn handle_bind_buffer(&mut self, c: BindBuffer) -> Result<(), CommandError> {
        const FUNC: &str = "glBindBuffer";
        if !is_buffer_target(c.target) {
            return self.gl_error(GlError::InvalidEnum, FUNC, "invalid target");
        }
        let key = if c.buffer == 0 {
            None
        } else {
            match self.buffer_for_bind(c.buffer) {
                Some(key) => Some(key),
                None => {
                    return self.gl_error(GlError::InvalidOperation, FUNC, "buffer was not generated")
                }
            }
        };
        let service = match key {
            Some(key) => {
                let mut group = self.group.borrow_mut();
                let conflict = match group.buffers.object_mut(key) {
                    Some(buffer) if buffer.target.is_some_and(|t| t != c.target) => true,
                    Some(buffer) => {
                        buffer.target = Some(c.target);
                        false
                    }
                    None => true,
                };
                let service = group.buffers.service_id(key).unwrap_or(0);
                drop(group);
                if conflict {
                    return self.gl_error(
                        GlError::InvalidOperation,
                        FUNC,
                        "buffer was bound to another target",
                    );
                }
                service
            }
            None => 0,
        };

        if c.target == gl::ARRAY_BUFFER {
            self.state.array_buffer = key;
        } else {
            let vao = self.current_vertex_array_mut();
            let old = std::mem::replace(&mut vao.element_buffer, key);
            if old != key {
                let mut group = self.group.borrow_mut();
                if let Some(new) = key {
                    group.buffers.add_ref(new);
                }
                if let Some(old) = old {
                    group.release_buffer(old, Some(self.driver.as_mut()));
                }
            }
        }
        self.driver.bind_buffer(c.target, service);
        Ok(())
    }

    pub(crate) fn handle_buffer_data(&mut self, c: BufferData) -> Result<(), CommandError> {
        const FUNC: &str = "glBufferData";
        if !is_buffer_target(c.target) {
            return self.gl_error(GlError::InvalidEnum, FUNC, "invalid target");
        }
        if !matches!(c.usage, gl::STREAM_DRAW | gl::STATIC_DRAW | gl::DYNAMIC_DRAW) {
            return self.gl_error(GlError::InvalidEnum, FUNC, "invalid usage");
        }
        let Some(key) = self.bound_buffer(c.target) else {
            return self.gl_error(GlError::InvalidOperation, FUNC, "no buffer bound");
        };
        let size = c.size as usize;
        let data = if c.data_shm_id != 0 {
            Some(self.shm.read(c.data_shm_id, c.data_shm_offset, size)?)
        } else {
            None
        };
        let shadow = match data {
            Some(data) => data,
            None => {
                let mut zeroed = Vec::new();
                if zeroed.try_reserve_exact(size).is_err() {
                    return self.gl_error(GlError::OutOfMemory, FUNC, "cannot allocate shadow copy");
                }
                zeroed.resize(size, 0);
                zeroed
            }
        };
        let initial = (c.data_shm_id != 0).then_some(shadow.as_slice());
        self.driver.buffer_data(c.target, size, initial, c.usage);
        if !self.allocation_succeeded() {
            return Ok(());
        }
        if let Some(buffer) = self.group.borrow_mut().buffers.object_mut(key) {
            buffer.set_data(shadow, c.usage);
        }
        Ok(())
    }

    pub(crate) fn handle_buffer_sub_data(&mut self, c: BufferSubData) -> Result<(), CommandError> {
        const FUNC: &str = "glBufferSubData";
        if !is_buffer_target(c.target) {
            return self.gl_error(GlError::InvalidEnum, FUNC, "invalid target");
        }
        let Some(key) = self.bound_buffer(c.target) else {
            return self.gl_error(GlError::InvalidOperation, FUNC, "no buffer bound");
        };
        let size = self
            .group
            .borrow()
            .buffers
            .object(key)
            .map_or(0, Buffer::size);
        let fits = (c.offset as usize)
            .checked_add(c.size as usize)
            .is_some_and(|end| end <= size);
        if !fits {
            return self.gl_error(GlError::InvalidValue, FUNC, "range outside the buffer");
        }
        let data = self.shm.read(c.data_shm_id, c.data_shm_offset, c.size as usize)?;
        self.driver.buffer_sub_data(c.target, c.offset as usize, &data);
        if let Some(buffer) = self.group.borrow_mut().buffers.object_mut(key) {
            buffer.sub_data(c.offset as usize, &data);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use glcmd_protocol::cmd::{BindBuffer, BufferData, BufferSubData};
    use glcmd_protocol::{gl, CmdWriter};

    use crate::error::{ErrorCode, GlError};
    use crate::testing::Harness;

    #[test]
    fn gen_rejects_reused_ids() {
        let mut h = Harness::new();
        let mut w = CmdWriter::new();
        w.gen_buffers(&[1, 2]);
        h.run_ok(&w);

        let mut w = CmdWriter::new();
        w.gen_buffers(&[3, 2]);
        assert_eq!(h.run(&w).result, ErrorCode::InvalidArguments);
        assert!(h.decoder.buffer_service_id(3).is_none());
    }

    #[test]
    fn bind_is_idempotent_and_target_is_sticky() {
        let mut h = Harness::new();
        let mut w = CmdWriter::new();
        w.gen_buffers(&[5]);
        w.push(BindBuffer {
            target: gl::ARRAY_BUFFER,
            buffer: 5,
        });
        w.push(BindBuffer {
            target: gl::ARRAY_BUFFER,
            buffer: 5,
        });
        h.run_ok(&w);
        assert_eq!(h.decoder.pending_gl_error(), None);

        let mut w = CmdWriter::new();
        w.push(BindBuffer {
            target: gl::ELEMENT_ARRAY_BUFFER,
            buffer: 5,
        });
        h.run_ok(&w);
        assert_eq!(h.take_error(), gl::INVALID_OPERATION);
    }

    #[test]
    fn data_and_sub_data_reach_driver_and_shadow() {
        let mut h = Harness::new();
        h.write_bytes(0, &[1, 2, 3, 4, 5, 6, 7, 8]);
        let mut w = CmdWriter::new();
        w.gen_buffers(&[1]);
        w.push(BindBuffer {
            target: gl::ARRAY_BUFFER,
            buffer: 1,
        });
        w.push(BufferData {
            target: gl::ARRAY_BUFFER,
            size: 8,
            data_shm_id: h.shm_id,
            data_shm_offset: 0,
            usage: gl::STATIC_DRAW,
        });
        w.push(BufferSubData {
            target: gl::ARRAY_BUFFER,
            offset: 6,
            size: 4,
            data_shm_id: h.shm_id,
            data_shm_offset: 0,
        });
        h.run_ok(&w);
        assert_eq!(h.take_error(), gl::INVALID_VALUE);

        let service = h.decoder.buffer_service_id(1).unwrap();
        assert_eq!(
            h.driver.buffer_contents(service).unwrap(),
            vec![1, 2, 3, 4, 5, 6, 7, 8]
        );
    }

    #[test]
    fn failed_allocation_records_out_of_memory() {
        let mut h = Harness::new();
        h.driver.fail_next_allocation();
        let mut w = CmdWriter::new();
        w.gen_buffers(&[1]);
        w.push(BindBuffer {
            target: gl::ARRAY_BUFFER,
            buffer: 1,
        });
        w.push(BufferData {
            target: gl::ARRAY_BUFFER,
            size: 64,
            data_shm_id: 0,
            data_shm_offset: 0,
            usage: gl::STATIC_DRAW,
        });
        h.run_ok(&w);
        assert_eq!(h.decoder.pending_gl_error(), Some(GlError::OutOfMemory));
        assert!(!h.decoder.is_lost());
    }

    #[test]
    fn deleting_bound_buffer_unbinds_it() {
        let mut h = Harness::new();
        let mut w = CmdWriter::new();
        w.gen_buffers(&[1]);
        w.push(BindBuffer {
            target: gl::ARRAY_BUFFER,
            buffer: 1,
        });
        w.delete_buffers(&[1, 99]);
        h.run_ok(&w);
        assert!(h.decoder.buffer_service_id(1).is_none());
        assert_eq!(h.driver.live_objects().buffers, 0);
    }
}
