//! Asynchronous queries.
//!
//! Sample queries are forwarded to the driver. `COMMANDS_ISSUED`,
//! `GET_ERROR_QUERY` and `ASYNC_PIXEL_UNPACK_COMPLETED` are answered by the
//! decoder itself. Results are published in `EndQuery` order into the
//! [`QuerySync`] block the client named in `BeginQuery`.

use glcmd_protocol::cmd::{BeginQuery, DeleteQueriesImmediate, EndQuery, GenQueriesImmediate, QuerySync};
use glcmd_protocol::gl;

use super::{check_new_ids, immediate_ids, Decoder};
use crate::error::{CommandError, GlError};
use crate::resources::{Query, QueryKey, QueryState};

fn is_query_target(target: u32) -> bool {
    matches!(
        target,
        gl::ANY_SAMPLES_PASSED
            | gl::ANY_SAMPLES_PASSED_CONSERVATIVE
            | gl::COMMANDS_ISSUED
            | gl::GET_ERROR_QUERY
            | gl::ASYNC_PIXEL_UNPACK_COMPLETED
    )
}

/// Targets whose results come from the driver.
fn is_driver_target(target: u32) -> bool {
    matches!(target, gl::ANY_SAMPLES_PASSED | gl::ANY_SAMPLES_PASSED_CONSERVATIVE)
}

impl Decoder {
    pub(crate) fn handle_gen_queries(
        &mut self,
        c: GenQueriesImmediate,
        immediate: &[u32],
    ) -> Result<(), CommandError> {
        let ids = immediate_ids(c.n, immediate)?;
        check_new_ids(ids, |id| self.queries.queries.contains_client(id))?;
        for &id in ids {
            self.create_query(id)?;
        }
        Ok(())
    }

    fn create_query(&mut self, id: u32) -> Result<QueryKey, CommandError> {
        let service = self.driver.gen_query();
        self.queries
            .queries
            .create(id, service, Query::default())
            .map_err(|e| CommandError::invalid(e.to_string()))
    }

    pub(crate) fn handle_delete_queries(
        &mut self,
        c: DeleteQueriesImmediate,
        immediate: &[u32],
    ) -> Result<(), CommandError> {
        let ids = immediate_ids(c.n, immediate)?;
        for &id in ids {
            let Some(key) = self.queries.queries.get(id) else {
                continue;
            };
            let (active_on, _) = self.queries.forget(key);
            if let Some(target) = active_on.filter(|t| is_driver_target(*t)) {
                self.driver.end_query(target);
            }
            if let Some(dead) = self.queries.queries.remove(key) {
                self.driver.delete_query(dead.service_id);
            }
        }
        Ok(())
    }

    pub(crate) fn handle_begin_query(&mut self, c: BeginQuery) -> Result<(), CommandError> {
        const FUNC: &str = "glBeginQueryEXT";
        if !is_query_target(c.target) {
            return self.gl_error(GlError::InvalidEnum, FUNC, "invalid target");
        }
        if c.id == 0 {
            return self.gl_error(GlError::InvalidOperation, FUNC, "query id 0");
        }
        self.shm
            .check(c.sync_shm_id, c.sync_shm_offset, QuerySync::SIZE_BYTES)?;
        if self.queries.active(c.target).is_some() {
            return self.gl_error(GlError::InvalidOperation, FUNC, "query already active on target");
        }
        let key = match self.queries.queries.get(c.id) {
            Some(key) => key,
            None if self.group.borrow().bind_generates_resource() => self.create_query(c.id)?,
            None => return self.gl_error(GlError::InvalidOperation, FUNC, "query was not generated"),
        };
        if let Err(e) = self.queries.begin(c.target, key) {
            return self.gl_error(GlError::InvalidOperation, FUNC, &e.to_string());
        }

        let serial = self.transfers.last_serial();
        let commands = self.commands_issued;
        let Some(query) = self.queries.queries.object_mut(key) else {
            return Ok(());
        };
        query.sync_shm_id = c.sync_shm_id;
        query.sync_shm_offset = c.sync_shm_offset;
        query.begin_commands = commands;
        query.transfer_serial = serial;
        if is_driver_target(c.target) {
            let service = self.queries.queries.service_id(key).unwrap_or(0);
            self.driver.begin_query(c.target, service);
        }
        Ok(())
    }

    pub(crate) fn handle_end_query(&mut self, c: EndQuery) -> Result<(), CommandError> {
        const FUNC: &str = "glEndQueryEXT";
        if !is_query_target(c.target) {
            return self.gl_error(GlError::InvalidEnum, FUNC, "invalid target");
        }
        let key = match self.queries.end(c.target, c.submit_count) {
            Ok(key) => key,
            Err(e) => return self.gl_error(GlError::InvalidOperation, FUNC, &e.to_string()),
        };

        let result = match c.target {
            gl::COMMANDS_ISSUED => {
                let begin = self
                    .queries
                    .queries
                    .object(key)
                    .map_or(self.commands_issued, |q| q.begin_commands);
                Some(self.commands_issued - begin)
            }
            gl::GET_ERROR_QUERY => {
                self.poll_driver_errors();
                Some(u64::from(self.errors.take().map_or(gl::NO_ERROR, |e| e.to_gl())))
            }
            gl::ASYNC_PIXEL_UNPACK_COMPLETED => {
                // Waits for every upload submitted before the end, not just
                // those inside the query.
                let serial = self.transfers.last_serial();
                if let Some(query) = self.queries.queries.object_mut(key) {
                    query.transfer_serial = serial;
                }
                None
            }
            target => {
                self.driver.end_query(target);
                None
            }
        };
        if let Some(query) = self.queries.queries.object_mut(key) {
            query.result = result;
        }
        Ok(())
    }

    /// Result of a pending query if it is available.
    fn query_result(&mut self, key: QueryKey) -> Option<u64> {
        let query = self.queries.queries.object(key)?;
        match query.target? {
            gl::ASYNC_PIXEL_UNPACK_COMPLETED => {
                (self.transfers.completed_serial() >= query.transfer_serial).then_some(1)
            }
            target if is_driver_target(target) => {
                let service = self.queries.queries.service_id(key)?;
                self.driver.query_result(service)
            }
            _ => query.result,
        }
    }

    /// Publishes available results in `EndQuery` order, stopping at the first
    /// one that is not ready.
    pub(crate) fn process_pending_queries(&mut self) {
        while let Some(key) = self.queries.front_pending() {
            let Some(result) = self.query_result(key) else {
                break;
            };
            if let Some(query) = self.queries.queries.object(key) {
                let QueryState::Pending { submit_count } = query.state else {
                    break;
                };
                let sync = QuerySync {
                    process_count: submit_count,
                    reserved0: 0,
                    result,
                };
                if let Err(err) = self
                    .shm
                    .write(query.sync_shm_id, query.sync_shm_offset, &sync.to_le_bytes())
                {
                    tracing::warn!(%err, "cannot publish query result");
                }
            }
            if let Some((_, Some(dead))) = self.queries.pop_pending() {
                self.driver.delete_query(dead.service_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use glcmd_protocol::cmd::{BeginQuery, EndQuery, QuerySync};
    use glcmd_protocol::{gl, CmdWriter};

    use crate::testing::Harness;

    const SYNC: u32 = 256;

    fn begin(h: &Harness, target: u32, id: u32, sync: u32) -> BeginQuery {
        BeginQuery {
            target,
            id,
            sync_shm_id: h.shm_id,
            sync_shm_offset: sync,
        }
    }

    fn sync_at(h: &Harness, offset: u32) -> QuerySync {
        let bytes = h.read_bytes(offset, QuerySync::SIZE_BYTES);
        let mut buf = [0u8; QuerySync::SIZE_BYTES];
        buf.copy_from_slice(&bytes);
        QuerySync::from_le_bytes(&buf)
    }

    #[test]
    fn second_begin_on_active_target_changes_nothing() {
        let mut h = Harness::new();
        let mut w = CmdWriter::new();
        w.gen_queries(&[1, 2]);
        w.push(begin(&h, gl::ANY_SAMPLES_PASSED, 1, SYNC));
        w.push(begin(&h, gl::ANY_SAMPLES_PASSED, 2, SYNC + 16));
        h.run_ok(&w);

        assert_eq!(h.take_error(), gl::INVALID_OPERATION);
        assert_eq!(h.decoder.active_query(gl::ANY_SAMPLES_PASSED), Some(1));
        assert_eq!(h.driver.call_count("begin_query"), 1);
    }

    #[test]
    fn end_without_begin_is_invalid_operation() {
        let mut h = Harness::new();
        let mut w = CmdWriter::new();
        w.push(EndQuery {
            target: gl::COMMANDS_ISSUED,
            submit_count: 1,
        });
        h.run_ok(&w);
        assert_eq!(h.take_error(), gl::INVALID_OPERATION);
    }

    #[test]
    fn decoder_side_results_are_published_in_order() {
        let mut h = Harness::new();
        let mut w = CmdWriter::new();
        w.gen_queries(&[1, 2]);
        w.push(begin(&h, gl::COMMANDS_ISSUED, 1, SYNC));
        w.set_token(1);
        w.set_token(2);
        w.push(EndQuery {
            target: gl::COMMANDS_ISSUED,
            submit_count: 7,
        });
        w.push(glcmd_protocol::cmd::Enable { cap: 0xFFFF });
        w.push(begin(&h, gl::GET_ERROR_QUERY, 2, SYNC + 16));
        w.push(EndQuery {
            target: gl::GET_ERROR_QUERY,
            submit_count: 8,
        });
        h.run_ok(&w);

        let commands = sync_at(&h, SYNC);
        assert_eq!(commands.process_count, 7);
        assert_eq!(commands.result, 3);
        let error = sync_at(&h, SYNC + 16);
        assert_eq!(error.process_count, 8);
        assert_eq!(error.result, u64::from(gl::INVALID_ENUM));
        // The query consumed the error.
        assert_eq!(h.decoder.pending_gl_error(), None);
    }

    #[test]
    fn bad_sync_location_is_a_protocol_error() {
        let mut h = Harness::new();
        let mut w = CmdWriter::new();
        w.gen_queries(&[1]);
        w.push(BeginQuery {
            target: gl::COMMANDS_ISSUED,
            id: 1,
            sync_shm_id: 99,
            sync_shm_offset: 0,
        });
        let outcome = h.run(&w);
        assert_eq!(outcome.result, crate::error::ErrorCode::OutOfBounds);
        assert_eq!(h.decoder.active_query(gl::COMMANDS_ISSUED), None);
    }
}
