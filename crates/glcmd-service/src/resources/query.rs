use std::collections::VecDeque;

use hashbrown::HashMap;
use thiserror::Error;

use super::{Destroyed, ObjectMap, QueryKey};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum QueryState {
    #[default]
    Idle,
    Active,
    /// Ended; the result is written once available.
    Pending { submit_count: u32 },
}

#[derive(Debug, Default)]
pub struct Query {
    /// Fixed by the first `BeginQuery`.
    pub target: Option<u32>,
    pub state: QueryState,
    pub sync_shm_id: u32,
    pub sync_shm_offset: u32,
    /// Decoder counters captured at `BeginQuery`, for targets computed by the
    /// decoder rather than the driver.
    pub begin_commands: u64,
    /// Async transfer serial that must complete for
    /// `ASYNC_PIXEL_UNPACK_COMPLETED`.
    pub transfer_serial: u64,
    /// Result computed at `EndQuery` for decoder-side targets.
    pub result: Option<u64>,
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("a query is already active on target {0:#x}")]
    TargetActive(u32),
    #[error("query is already active")]
    QueryActive,
    #[error("query was created for target {created:#x}, not {requested:#x}")]
    TargetMismatch { created: u32, requested: u32 },
    #[error("no query active on target {0:#x}")]
    NotActive(u32),
}

/// Queries of one decoder: the active query per target and the FIFO of ended
/// queries waiting for results.
///
/// A query holds a reference on itself while active or pending, so deleting
/// it mid-flight defers the driver deletion until its result is retired.
#[derive(Debug, Default)]
pub struct QueryManager {
    pub queries: ObjectMap<QueryKey, Query>,
    active: HashMap<u32, QueryKey>,
    pending: VecDeque<QueryKey>,
}

impl QueryManager {
    pub fn active(&self, target: u32) -> Option<QueryKey> {
        self.active.get(&target).copied()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn front_pending(&self) -> Option<QueryKey> {
        self.pending.front().copied()
    }

    /// Validates and records a `BeginQuery`. Leaves everything untouched on
    /// error.
    pub fn begin(&mut self, target: u32, key: QueryKey) -> Result<(), QueryError> {
        if self.active.contains_key(&target) {
            return Err(QueryError::TargetActive(target));
        }
        let Some(query) = self.queries.object_mut(key) else {
            return Err(QueryError::NotActive(target));
        };
        match query.target {
            Some(created) if created != target => {
                return Err(QueryError::TargetMismatch {
                    created,
                    requested: target,
                })
            }
            _ => {}
        }
        let was_pending = match query.state {
            QueryState::Active => return Err(QueryError::QueryActive),
            QueryState::Pending { .. } => true,
            QueryState::Idle => false,
        };
        query.target = Some(target);
        query.state = QueryState::Active;
        query.result = None;
        if was_pending {
            // Re-begun before its result arrived: the old result is dropped
            // and the pending reference carries over to the active one.
            self.pending.retain(|k| *k != key);
        } else {
            self.queries.add_ref(key);
        }
        self.active.insert(target, key);
        Ok(())
    }

    pub fn end(&mut self, target: u32, submit_count: u32) -> Result<QueryKey, QueryError> {
        let key = self
            .active
            .remove(&target)
            .ok_or(QueryError::NotActive(target))?;
        if let Some(query) = self.queries.object_mut(key) {
            query.state = QueryState::Pending { submit_count };
        }
        self.pending.push_back(key);
        Ok(key)
    }

    /// Retires the oldest pending query.
    pub fn pop_pending(&mut self) -> Option<(QueryKey, Option<Destroyed<Query>>)> {
        let key = self.pending.pop_front()?;
        if let Some(query) = self.queries.object_mut(key) {
            query.state = QueryState::Idle;
        }
        Some((key, self.queries.release(key)))
    }

    /// Drops `key` from the active set and the pending queue. Returns the
    /// target it was active on, if any.
    pub fn forget(&mut self, key: QueryKey) -> (Option<u32>, Option<Destroyed<Query>>) {
        let target = self
            .active
            .iter()
            .find(|(_, k)| **k == key)
            .map(|(t, _)| *t);
        let in_flight = target.is_some() || self.pending.contains(&key);
        if let Some(target) = target {
            self.active.remove(&target);
        }
        self.pending.retain(|k| *k != key);
        if let Some(query) = self.queries.object_mut(key) {
            query.state = QueryState::Idle;
        }
        let destroyed = if in_flight {
            self.queries.release(key)
        } else {
            None
        };
        (target, destroyed)
    }
}

#[cfg(test)]
mod tests {
    use glcmd_protocol::gl;

    use super::*;

    fn manager_with(ids: &[u32]) -> (QueryManager, Vec<QueryKey>) {
        let mut m = QueryManager::default();
        let keys = ids
            .iter()
            .map(|id| m.queries.create(*id, *id + 100, Query::default()).unwrap())
            .collect();
        (m, keys)
    }

    #[test]
    fn second_begin_on_target_is_rejected_without_side_effects() {
        let (mut m, keys) = manager_with(&[1, 2]);
        m.begin(gl::ANY_SAMPLES_PASSED, keys[0]).unwrap();

        assert_eq!(
            m.begin(gl::ANY_SAMPLES_PASSED, keys[1]),
            Err(QueryError::TargetActive(gl::ANY_SAMPLES_PASSED))
        );
        assert_eq!(m.active(gl::ANY_SAMPLES_PASSED), Some(keys[0]));
        assert_eq!(m.queries.object(keys[1]).unwrap().state, QueryState::Idle);
        assert_eq!(m.queries.object(keys[1]).unwrap().target, None);
    }

    #[test]
    fn query_target_is_fixed_on_first_use() {
        let (mut m, keys) = manager_with(&[1]);
        m.begin(gl::ANY_SAMPLES_PASSED, keys[0]).unwrap();
        m.end(gl::ANY_SAMPLES_PASSED, 1).unwrap();
        assert_eq!(
            m.begin(gl::COMMANDS_ISSUED, keys[0]),
            Err(QueryError::TargetMismatch {
                created: gl::ANY_SAMPLES_PASSED,
                requested: gl::COMMANDS_ISSUED
            })
        );
    }

    #[test]
    fn pending_queries_retire_in_order_and_release_deferred_deletes() {
        let (mut m, keys) = manager_with(&[1, 2]);
        m.begin(gl::COMMANDS_ISSUED, keys[0]).unwrap();
        m.end(gl::COMMANDS_ISSUED, 1).unwrap();
        m.begin(gl::COMMANDS_ISSUED, keys[1]).unwrap();
        m.end(gl::COMMANDS_ISSUED, 2).unwrap();

        // Deleted while pending: kept until retired.
        assert!(m.queries.remove(keys[0]).is_none());

        let (first, destroyed) = m.pop_pending().unwrap();
        assert_eq!(first, keys[0]);
        assert_eq!(destroyed.unwrap().service_id, 101);
        let (second, destroyed) = m.pop_pending().unwrap();
        assert_eq!(second, keys[1]);
        assert!(destroyed.is_none());
        assert!(!m.has_pending());
    }
}
