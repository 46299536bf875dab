//! Cancel-and-restart task slots for cosmetic work (counter easing, marker
//! stagger, row emphasis).
//!
//! Each widget key owns at most one running task. Restarting a key bumps its
//! epoch before aborting the old task, and tasks only touch a renderer
//! through [`Ticket::run`], which checks the epoch under the same lock. A
//! superseded task therefore cannot render again, even if it is mid-frame on
//! another worker thread when the restart happens.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;

/// Permission for one task generation to render.
#[derive(Clone)]
pub struct Ticket {
    epoch: Arc<Mutex<u64>>,
    mine: u64,
}

impl Ticket {
    /// Run `f` if this ticket is still current. Returns `None` once superseded.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let current = self.epoch.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != self.mine {
            return None;
        }
        Some(f())
    }

    #[cfg(test)]
    fn is_current(&self) -> bool {
        *self.epoch.lock().unwrap_or_else(PoisonError::into_inner) == self.mine
    }
}

struct Slot {
    epoch: Arc<Mutex<u64>>,
    handle: Option<JoinHandle<()>>,
}

impl Slot {
    fn invalidate(&mut self) -> u64 {
        let mut epoch = self.epoch.lock().unwrap_or_else(PoisonError::into_inner);
        *epoch += 1;
        let next = *epoch;
        drop(epoch);
        if let Some(h) = self.handle.take() {
            h.abort();
        }
        next
    }
}

/// Keyed set of restartable tasks. Dropping the set cancels every task.
pub struct TaskSlots<K: Eq + Hash> {
    slots: HashMap<K, Slot>,
}

impl<K: Eq + Hash> Default for TaskSlots<K> {
    fn default() -> Self {
        Self {
            slots: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash> TaskSlots<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Supersede whatever runs under `key` and spawn `make(ticket)` in its
    /// place. Must be called from within a tokio runtime.
    pub fn restart<F, Fut>(&mut self, key: K, make: F)
    where
        F: FnOnce(Ticket) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let slot = self.slots.entry(key).or_insert_with(|| Slot {
            epoch: Arc::new(Mutex::new(0)),
            handle: None,
        });
        let mine = slot.invalidate();
        let ticket = Ticket {
            epoch: Arc::clone(&slot.epoch),
            mine,
        };
        slot.handle = Some(tokio::spawn(make(ticket)));
    }

    /// Cancel the task under `key`, if any.
    pub fn cancel(&mut self, key: &K) {
        if let Some(slot) = self.slots.get_mut(key) {
            slot.invalidate();
        }
    }

    pub fn cancel_all(&mut self) {
        for slot in self.slots.values_mut() {
            slot.invalidate();
        }
    }

    pub(crate) fn is_running(&self, key: &K) -> bool {
        self.slots
            .get(key)
            .and_then(|s| s.handle.as_ref())
            .is_some_and(|h| !h.is_finished())
    }
}

impl<K: Eq + Hash> Drop for TaskSlots<K> {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
