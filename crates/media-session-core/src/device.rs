//! Sound device ownership
//!
//! The process owns at most one active playback and one active capture
//! device. Calls share a [`DeviceArbiter`] and check availability before
//! claiming a device instead of contending for it.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

#[derive(Debug, Default)]
struct Owners {
    playback: Option<String>,
    capture: Option<String>,
}

/// Shared playback/capture ownership
#[derive(Debug, Clone, Default)]
pub struct DeviceArbiter {
    owners: Arc<Mutex<Owners>>,
}

impl DeviceArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `owner` could take the devices it asks for right now
    pub fn is_available(&self, owner: &str, playback: bool, capture: bool) -> bool {
        let owners = self.owners.lock();
        let free = |slot: &Option<String>| slot.as_deref().map_or(true, |o| o == owner);
        (!playback || free(&owners.playback)) && (!capture || free(&owners.capture))
    }

    /// Claim the requested devices for `owner`
    ///
    /// All or nothing: returns `false` without claiming anything if one of
    /// them belongs to someone else. Claiming again is a no-op.
    pub fn acquire(&self, owner: &str, playback: bool, capture: bool) -> bool {
        let mut owners = self.owners.lock();
        let free = |slot: &Option<String>| slot.as_deref().map_or(true, |o| o == owner);
        if (playback && !free(&owners.playback)) || (capture && !free(&owners.capture)) {
            debug!("Sound devices busy, {} falls back to non-device I/O", owner);
            return false;
        }
        if playback {
            owners.playback = Some(owner.to_string());
        }
        if capture {
            owners.capture = Some(owner.to_string());
        }
        true
    }

    /// Release every device held by `owner`; returns whether anything was held
    pub fn release(&self, owner: &str) -> bool {
        let mut guard = self.owners.lock();
        let owners = &mut *guard;
        let mut released = false;
        for slot in [&mut owners.playback, &mut owners.capture] {
            if slot.as_deref() == Some(owner) {
                *slot = None;
                released = true;
            }
        }
        released
    }

    pub fn holds_any(&self, owner: &str) -> bool {
        let owners = self.owners.lock();
        owners.playback.as_deref() == Some(owner) || owners.capture.as_deref() == Some(owner)
    }
}
