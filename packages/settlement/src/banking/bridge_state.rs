//! Bridge stop/resume tracking
//!
//! One watermark per bridged chain. An update applies only if its
//! `(block, log_index)` is strictly newer than the watermark, so a replayed or
//! reordered event can never roll the state back.

use borsh::{BorshDeserialize, BorshSerialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BridgeState {
    pub active: bool,
    pub block: u64,
    pub log_index: u64,
}

impl Default for BridgeState {
    fn default() -> Self {
        Self {
            active: true,
            block: 0,
            log_index: 0,
        }
    }
}

impl BridgeState {
    pub fn is_stopped(&self) -> bool {
        !self.active
    }

    fn is_newer(&self, block: u64, log_index: u64) -> bool {
        (block, log_index) > (self.block, self.log_index)
    }

    /// Returns true if the update was applied.
    pub fn new_bridge_stopped(&mut self, block: u64, log_index: u64) -> bool {
        self.update(false, block, log_index)
    }

    /// Returns true if the update was applied.
    pub fn new_bridge_resumed(&mut self, block: u64, log_index: u64) -> bool {
        self.update(true, block, log_index)
    }

    fn update(&mut self, active: bool, block: u64, log_index: u64) -> bool {
        if !self.is_newer(block, log_index) {
            return false;
        }
        self.active = active;
        self.block = block;
        self.log_index = log_index;
        true
    }
}
