//! Per-target FIFO that forces modifications to the same normalized DN to
//! execute one at a time, so CSN assignment and event emission stay
//! race-free for a given entry.
//!
//! Modeled as an ordered sequence with push-tail/pop-head and a per-key
//! mutex rather than a manual intrusive linked list — the linkage in a
//! C implementation is an allocation optimization, not an observable
//! contract. The outer key→queue map is a `DashMap` rather than
//! `Mutex<HashMap>`, for per-bucket locking on fine-grained concurrent
//! access; the map's internal ordering is not observable externally.

use super::types::Ndn;
use crate::error::{Result, SyncProviderError};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::trace;

type Waiters = Arc<Mutex<VecDeque<Arc<Notify>>>>;

#[derive(Clone)]
pub struct ModSerializer {
    keys: Arc<DashMap<Ndn, Waiters>>,
}

impl Default for ModSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl ModSerializer {
    pub fn new() -> Self {
        Self {
            keys: Arc::new(DashMap::new()),
        }
    }

    /// Number of DNs currently serialized on (non-empty FIFOs). Mostly
    /// useful for tests and diagnostics.
    pub fn active_keys(&self) -> usize {
        self.keys.len()
    }

    fn waiters_for(&self, key: &Ndn) -> Waiters {
        self.keys
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(VecDeque::new())))
            .clone()
    }

    /// Enter the FIFO for `key` and wait until this call becomes the head.
    /// Returns a guard that promotes the next waiter (if any) and reaps the
    /// map entry once the FIFO drains, matching the manager's documented
    /// cleanup step.
    pub async fn acquire(&self, key: Ndn) -> ModTicket {
        let my_notify = Arc::new(Notify::new());
        let waiters = self.waiters_for(&key);

        let is_head = {
            let mut q = waiters.lock();
            q.push_back(my_notify.clone());
            q.len() == 1
        };

        if !is_head {
            trace!(dn = %key, "mod serializer: waiting for head of FIFO");
            my_notify.notified().await;
        }

        ModTicket {
            key,
            waiters,
            keys: self.keys.clone(),
            my_notify,
            released: false,
        }
    }

    /// Like `acquire`, but resolves to `Err(Cancelled)` if `cancelled`
    /// completes before this waiter reaches the head of the FIFO. The
    /// waiter removes itself from the queue on cancellation.
    pub async fn acquire_cancellable<F>(&self, key: Ndn, cancelled: F) -> Result<ModTicket>
    where
        F: Future<Output = ()>,
    {
        let my_notify = Arc::new(Notify::new());
        let waiters = self.waiters_for(&key);

        let is_head = {
            let mut q = waiters.lock();
            q.push_back(my_notify.clone());
            q.len() == 1
        };

        if !is_head {
            tokio::select! {
                _ = my_notify.notified() => {}
                _ = cancelled => {
                    let mut q = waiters.lock();
                    let before = q.len();
                    q.retain(|n| !Arc::ptr_eq(n, &my_notify));
                    let removed = before != q.len();
                    drop(q);
                    if removed {
                        return Err(SyncProviderError::Cancelled);
                    }
                    // Raced with being granted the head: fall through and
                    // treat this as a normal acquisition rather than leave
                    // the FIFO in an inconsistent state.
                }
            }
        }

        Ok(ModTicket {
            key,
            waiters,
            keys: self.keys.clone(),
            my_notify,
            released: false,
        })
    }
}

/// RAII guard for one FIFO slot. Dropping it pops the head, wakes the next
/// waiter (if any), and erases the map entry once the FIFO is empty.
pub struct ModTicket {
    key: Ndn,
    waiters: Waiters,
    keys: Arc<DashMap<Ndn, Waiters>>,
    my_notify: Arc<Notify>,
    released: bool,
}

impl ModTicket {
    pub fn dn(&self) -> &Ndn {
        &self.key
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let mut q = self.waiters.lock();
        match q.front() {
            Some(front) if Arc::ptr_eq(front, &self.my_notify) => {
                q.pop_front();
            }
            _ => q.retain(|n| !Arc::ptr_eq(n, &self.my_notify)),
        }
        if let Some(next) = q.front() {
            next.notify_one();
        }
        let now_empty = q.is_empty();
        drop(q);

        if now_empty {
            self.keys.remove_if(&self.key, |_, w| w.lock().is_empty());
        }
        trace!(dn = %self.key, "mod serializer: released");
    }
}

impl Drop for ModTicket {
    fn drop(&mut self) {
        self.release_inner();
    }
}
