//! Context-loss state machine.
//!
//! `Live -> Lost(reason)` is the only transition; a lost decoder never comes
//! back and every later batch short-circuits to `ErrorCode::LostContext`.

use glcmd_protocol::gl;

use crate::driver::ResetStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub enum LossReason {
    /// This context caused the reset.
    Guilty,
    /// Another context caused the reset.
    Innocent,
    Unknown,
    /// An allocation failed and the decoder treats that as fatal.
    OutOfMemory,
}

impl LossReason {
    pub fn from_reset_status(status: ResetStatus) -> Option<Self> {
        match status {
            ResetStatus::NoError => None,
            ResetStatus::Guilty => Some(LossReason::Guilty),
            ResetStatus::Innocent => Some(LossReason::Innocent),
            ResetStatus::Unknown => Some(LossReason::Unknown),
        }
    }

    /// Decodes a `*_CONTEXT_RESET` enum as carried by `LoseContext`.
    pub fn from_gl(value: u32) -> Option<Self> {
        match value {
            gl::GUILTY_CONTEXT_RESET => Some(LossReason::Guilty),
            gl::INNOCENT_CONTEXT_RESET => Some(LossReason::Innocent),
            gl::UNKNOWN_CONTEXT_RESET => Some(LossReason::Unknown),
            _ => None,
        }
    }

    pub fn to_gl(self) -> u32 {
        match self {
            LossReason::Guilty => gl::GUILTY_CONTEXT_RESET,
            LossReason::Innocent => gl::INNOCENT_CONTEXT_RESET,
            LossReason::Unknown | LossReason::OutOfMemory => gl::UNKNOWN_CONTEXT_RESET,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ContextLossState {
    #[default]
    Live,
    Lost(LossReason),
}

impl ContextLossState {
    pub fn is_lost(&self) -> bool {
        matches!(self, ContextLossState::Lost(_))
    }

    pub fn reason(&self) -> Option<LossReason> {
        match self {
            ContextLossState::Live => None,
            ContextLossState::Lost(reason) => Some(*reason),
        }
    }

    /// Moves to `Lost(reason)`. Returns `false` when already lost; the first
    /// reason sticks.
    pub fn lose(&mut self, reason: LossReason) -> bool {
        if self.is_lost() {
            return false;
        }
        *self = ContextLossState::Lost(reason);
        true
    }
}

/// Told once when a decoder loses its context.
pub trait LossObserver {
    fn context_lost(&mut self, reason: LossReason);
}

impl<F: FnMut(LossReason)> LossObserver for F {
    fn context_lost(&mut self, reason: LossReason) {
        self(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loss_is_irreversible_and_first_reason_wins() {
        let mut state = ContextLossState::default();
        assert!(!state.is_lost());
        assert!(state.lose(LossReason::Innocent));
        assert!(!state.lose(LossReason::Guilty));
        assert_eq!(state.reason(), Some(LossReason::Innocent));
    }

    #[test]
    fn reset_status_maps_to_reason() {
        assert_eq!(LossReason::from_reset_status(ResetStatus::NoError), None);
        assert_eq!(
            LossReason::from_reset_status(ResetStatus::Guilty),
            Some(LossReason::Guilty)
        );
        assert_eq!(
            LossReason::from_gl(gl::INNOCENT_CONTEXT_RESET),
            Some(LossReason::Innocent)
        );
        assert_eq!(LossReason::from_gl(0), None);
    }
}
