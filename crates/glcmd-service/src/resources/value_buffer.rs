use std::collections::BTreeSet;

use glcmd_protocol::gl;
use hashbrown::HashMap;

/// Values published by the owner of a resource group (for example the
/// current mouse position) that clients can subscribe to.
#[derive(Debug, Default)]
pub struct ValueState {
    values: HashMap<u32, [i32; 4]>,
}

impl ValueState {
    pub fn set(&mut self, target: u32, value: [i32; 4]) {
        self.values.insert(target, value);
    }

    pub fn get(&self, target: u32) -> Option<[i32; 4]> {
        self.values.get(&target).copied()
    }
}

pub fn is_subscription_target(target: u32) -> bool {
    target == gl::MOUSE_POSITION
}

#[derive(Debug, Default)]
pub struct Valuebuffer {
    subscriptions: BTreeSet<u32>,
    values: HashMap<u32, [i32; 4]>,
}

impl Valuebuffer {
    pub fn subscribe(&mut self, target: u32) {
        self.subscriptions.insert(target);
    }

    pub fn is_subscribed(&self, target: u32) -> bool {
        self.subscriptions.contains(&target)
    }

    /// Snapshots every subscribed value currently published in `state`.
    pub fn populate(&mut self, state: &ValueState) {
        for target in &self.subscriptions {
            if let Some(value) = state.get(*target) {
                self.values.insert(*target, value);
            }
        }
    }

    pub fn value(&self, target: u32) -> Option<[i32; 4]> {
        self.values.get(&target).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn populate_snapshots_only_subscribed_values() {
        let mut state = ValueState::default();
        state.set(gl::MOUSE_POSITION, [10, 20, 0, 0]);

        let mut vb = Valuebuffer::default();
        vb.populate(&state);
        assert_eq!(vb.value(gl::MOUSE_POSITION), None);

        vb.subscribe(gl::MOUSE_POSITION);
        vb.populate(&state);
        state.set(gl::MOUSE_POSITION, [11, 21, 0, 0]);
        assert_eq!(vb.value(gl::MOUSE_POSITION), Some([10, 20, 0, 0]));
    }
}
