//! Per-cycle work coalescing
//!
//! Mutations only raise flags here. The reflector's `cycle()` consumes the
//! flags, so any number of mutations between two cycles cost one change
//! check and one transmission.

/// Work requested for the next cycle
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    change_pending: bool,
    send_dirty: bool,
}

impl Schedule {
    /// Ask for a change check
    pub fn request_change(&mut self) {
        self.change_pending = true;
    }

    /// Mark the send packet modified; also asks for a change check
    pub fn mark_send_dirty(&mut self) {
        if !self.send_dirty {
            self.request_change();
            self.send_dirty = true;
        }
    }

    /// Claim a pending change check
    pub fn take_change(&mut self) -> bool {
        std::mem::take(&mut self.change_pending)
    }

    /// Claim a pending transmission
    pub fn take_send(&mut self) -> bool {
        std::mem::take(&mut self.send_dirty)
    }

    /// Anything waiting for the next cycle
    pub fn is_pending(&self) -> bool {
        self.change_pending || self.send_dirty
    }
}
