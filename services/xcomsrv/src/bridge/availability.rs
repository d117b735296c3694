//! Serial-link liveness flag.

use parking_lot::Mutex;

/// Shared link liveness state with debounced transitions.
///
/// Goes online on the first successful transaction since startup (or since
/// the last failure) and offline on the first failed transaction since the
/// last success; like outcomes in between never report a transition. The
/// lock is held only for the read-modify-write of the flag, never across
/// I/O.
#[derive(Debug, Default)]
pub struct LinkAvailability {
    online: Mutex<bool>,
}

impl LinkAvailability {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful transaction. Returns true when this call
    /// transitioned the link offline → online.
    pub fn mark_online(&self) -> bool {
        let mut online = self.online.lock();
        if *online {
            false
        } else {
            *online = true;
            true
        }
    }

    /// Record a failed transaction. Returns true when this call
    /// transitioned the link online → offline.
    pub fn mark_offline(&self) -> bool {
        let mut online = self.online.lock();
        if *online {
            *online = false;
            true
        } else {
            false
        }
    }

    /// Force the next success to re-announce the online marker. Used after
    /// broker reconnection, since the broker may have lost retained state.
    pub fn reset(&self) {
        *self.online.lock() = false;
    }

    pub fn is_online(&self) -> bool {
        *self.online.lock()
    }
}
