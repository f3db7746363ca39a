//! Singleton slot registry for process-global diagnostic resources.
//!
//! Some diagnostic resources are global to the process: a fixed listening
//! port, runtime profiler knobs. The registry hands out at most one guard
//! per named slot; the claim is released when the guard is dropped. An
//! explicit registry type (rather than implicit module state) keeps tests
//! isolated; only the debug server uses the process-wide [`global`]
//! instance.

use crate::diag::DiagError;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Tracks which singleton slots are currently claimed.
#[derive(Debug, Default, Clone)]
pub struct SingletonRegistry {
    claimed: Arc<Mutex<HashSet<String>>>,
}

impl SingletonRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a slot. Fails if the slot is already held by another owner.
    pub fn claim(&self, slot: impl Into<String>) -> Result<SingletonGuard, DiagError> {
        let slot = slot.into();
        let mut claimed = self.claimed.lock();
        if !claimed.insert(slot.clone()) {
            return Err(DiagError::AlreadyClaimed(slot));
        }
        Ok(SingletonGuard {
            slot,
            claimed: Arc::clone(&self.claimed),
        })
    }

    /// Whether a slot is currently held (diagnostic use only; racy by
    /// nature).
    pub fn is_claimed(&self, slot: &str) -> bool {
        self.claimed.lock().contains(slot)
    }
}

/// Ownership of one singleton slot; released on drop.
#[derive(Debug)]
pub struct SingletonGuard {
    slot: String,
    claimed: Arc<Mutex<HashSet<String>>>,
}

impl SingletonGuard {
    pub fn slot(&self) -> &str {
        &self.slot
    }
}

impl Drop for SingletonGuard {
    fn drop(&mut self) {
        self.claimed.lock().remove(&self.slot);
    }
}

/// The process-wide registry used by diagnostic extensions.
pub fn global() -> &'static SingletonRegistry {
    static GLOBAL: Lazy<SingletonRegistry> = Lazy::new(SingletonRegistry::new);
    &GLOBAL
}
