//! Per-key single-flight gate for `get_or_load`.
//!
//! The first caller for a key takes the key's async mutex and runs the
//! loader; later callers queue on the same mutex and, once admitted,
//! re-check the cache before loading themselves. Each slot counts its
//! holder and waiters and is dropped when the last of them leaves, whether
//! it finished or was cancelled while waiting.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Gate = Arc<AsyncMutex<()>>;

#[derive(Debug)]
struct Slot {
    gate: Gate,
    /// Holder plus waiters.
    users: usize,
}

#[derive(Debug, Default)]
pub(crate) struct InFlightLoads {
    gates: Mutex<HashMap<String, Slot>>,
}

impl InFlightLoads {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.gates
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wait until no other caller holds `key`, then hold it.
    pub(crate) async fn acquire(&self, key: &str) -> LoadPermit<'_> {
        let gate = {
            let mut slots = self.slots();
            let slot = slots.entry(key.to_string()).or_insert_with(|| Slot {
                gate: Arc::new(AsyncMutex::new(())),
                users: 0,
            });
            slot.users += 1;
            slot.gate.clone()
        };
        // Registered from here on: dropping this future while it waits
        // drops the permit and releases the slot.
        let mut permit = LoadPermit {
            loads: self,
            key: key.to_string(),
            guard: None,
        };
        permit.guard = Some(gate.lock_owned().await);
        permit
    }

    /// Keys with a holder or waiter.
    pub(crate) fn pending(&self) -> usize {
        self.slots().len()
    }
}

/// Registration on a key's gate; exclusive once `guard` is set. Released on drop.
pub(crate) struct LoadPermit<'a> {
    loads: &'a InFlightLoads,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for LoadPermit<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut slots = self.loads.slots();
        let last = match slots.get_mut(&self.key) {
            Some(slot) => {
                slot.users = slot.users.saturating_sub(1);
                slot.users == 0
            }
            None => false,
        };
        if last {
            slots.remove(&self.key);
        }
    }
}
