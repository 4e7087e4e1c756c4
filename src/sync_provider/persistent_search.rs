//! A persistent search record: one per live subscriber.
//!
//! Reference counting is modeled as ordinary `Arc` shared ownership rather
//! than a manual counter: the persistent-search list, the event matcher
//! (via `OpCookie::pre_matches`) and the drainer task each hold a clone of
//! the `Arc<PersistentSearch>`; the record is freed once the last clone
//! drops.

use super::base_tracker::BaseTracker;
use super::cookie::Rid;
use super::scope::Filter;
use super::types::{Ndn, PendingEvent, Scope};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

static NEXT_SEARCH_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Default, Clone, Copy)]
pub struct SearchFlags {
    pub refreshing: bool,
    pub detached: bool,
    pub wrote_base: bool,
    /// Set while the search's base has never successfully resolved (the
    /// entry doesn't exist yet, or existed before the search registered but
    /// hasn't been observed by a matcher pass). Cleared once
    /// `base_tracker::check` first succeeds.
    pub find_base_pending: bool,
}

pub struct PersistentSearch {
    pub id: u64,
    pub rid: Rid,
    pub base_ndn: Ndn,
    pub scope: Scope,
    pub filter: Filter,
    pub filter_text: String,

    pub base_tracker: BaseTracker,
    flags: Mutex<SearchFlags>,
    abandoned: AtomicBool,

    events: Mutex<VecDeque<PendingEvent>>,
    drain_scheduled: AtomicBool,
    pub(crate) drain_wake: Notify,
}

impl PersistentSearch {
    pub fn new(rid: Rid, base_ndn: Ndn, scope: Scope, filter: Filter, filter_text: String) -> Self {
        Self {
            id: NEXT_SEARCH_ID.fetch_add(1, Ordering::Relaxed),
            rid,
            base_tracker: BaseTracker::new(base_ndn.clone()),
            base_ndn,
            scope,
            filter,
            filter_text,
            flags: Mutex::new(SearchFlags {
                refreshing: true,
                find_base_pending: true,
                ..Default::default()
            }),
            abandoned: AtomicBool::new(false),
            events: Mutex::new(VecDeque::new()),
            drain_scheduled: AtomicBool::new(false),
            drain_wake: Notify::new(),
        }
    }

    pub fn flags(&self) -> SearchFlags {
        *self.flags.lock()
    }

    pub fn set_refreshing(&self, v: bool) {
        self.flags.lock().refreshing = v;
    }

    pub fn set_wrote_base(&self, v: bool) {
        self.flags.lock().wrote_base = v;
    }

    pub fn take_wrote_base(&self) -> bool {
        let mut f = self.flags.lock();
        std::mem::replace(&mut f.wrote_base, false)
    }

    pub fn set_find_base_pending(&self, v: bool) {
        self.flags.lock().find_base_pending = v;
    }

    /// Detach the search so it survives past its originating request,
    /// entering the persist phase. Idempotent.
    pub fn detach(&self) {
        self.flags.lock().detached = true;
    }

    pub fn is_detached(&self) -> bool {
        self.flags.lock().detached
    }

    pub fn abandon(&self) {
        self.abandoned.store(true, Ordering::Release);
        self.drain_wake.notify_one();
    }

    pub fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::Acquire)
    }

    /// Push an event to the tail of this subscriber's FIFO. Returns
    /// whether a drainer run should be scheduled now (detached and no run
    /// is currently pending).
    pub fn enqueue(&self, event: PendingEvent) -> bool {
        self.events.lock().push_back(event);
        self.drain_wake.notify_one();
        if self.is_detached() && !self.drain_scheduled.swap(true, Ordering::AcqRel) {
            true
        } else {
            false
        }
    }

    pub fn dequeue(&self) -> Option<PendingEvent> {
        self.events.lock().pop_front()
    }

    pub fn pending_count(&self) -> usize {
        self.events.lock().len()
    }

    pub fn mark_drain_idle(&self) {
        self.drain_scheduled.store(false, Ordering::Release);
    }
}

/// The process-wide list of live persistent searches. A `DashMap` gives
/// per-bucket locking for registration/removal while
/// `list()` snapshots the current set for the matcher to iterate without
/// holding any lock across the (potentially store-calling) matching work.
#[derive(Default)]
pub struct PersistentSearchRegistry {
    searches: DashMap<u64, Arc<PersistentSearch>>,
}

impl PersistentSearchRegistry {
    pub fn new() -> Self {
        Self {
            searches: DashMap::new(),
        }
    }

    pub fn register(&self, search: Arc<PersistentSearch>) {
        self.searches.insert(search.id, search);
    }

    pub fn unregister(&self, id: u64) -> Option<Arc<PersistentSearch>> {
        self.searches.remove(&id).map(|(_, v)| v)
    }

    pub fn list(&self) -> Vec<Arc<PersistentSearch>> {
        self.searches.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.searches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.searches.is_empty()
    }
}
