//! Bounded FIFO of recent UUID/CSN/tag records, used to accelerate catch-up
//! without a full present-phase scan.

use super::types::{Csn, EntryUuid, OpTag};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use tracing::debug;

#[derive(Debug, Clone)]
struct SlogEntry {
    uuid: EntryUuid,
    csn: Csn,
    tag: OpTag,
}

struct Inner {
    entries: VecDeque<SlogEntry>,
    min_csn: Option<Csn>,
    capacity: usize,
}

/// The result of replaying the log for a given cookie: UUIDs to report as
/// deleted (sent first) and UUIDs that are still candidates for
/// a present-phase re-add (a delete shadows any earlier non-delete for the
/// same UUID).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplayResult {
    pub delete_uuids: Vec<EntryUuid>,
    pub candidate_uuids: Vec<EntryUuid>,
}

pub struct SessionLog {
    inner: Mutex<Inner>,
}

impl SessionLog {
    /// `capacity == 0` disables the session log (config key `sessionlog`);
    /// callers should check `is_enabled()` before relying on it.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: VecDeque::new(),
                min_csn: None,
                capacity,
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.lock().capacity > 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The CSN of the oldest record still held, or `None` if the log is
    /// empty (nothing has ever been evicted and nothing is stored).
    pub fn min_csn(&self) -> Option<Csn> {
        self.inner.lock().min_csn.clone()
    }

    /// Append a record to the tail, evicting from the head while over
    /// capacity. `min_csn` tracks the most recently evicted record's CSN
    /// (invariant: it is the CSN of the oldest record the log can still
    /// answer for).
    pub fn append(&self, uuid: EntryUuid, csn: Csn, tag: OpTag) {
        if !self.is_enabled() {
            return;
        }
        let mut inner = self.inner.lock();
        inner.entries.push_back(SlogEntry { uuid, csn, tag });
        while inner.entries.len() > inner.capacity {
            if let Some(evicted) = inner.entries.pop_front() {
                debug!(uuid = %evicted.uuid, csn = %evicted.csn, "session log eviction");
                inner.min_csn = Some(evicted.csn);
            }
        }
    }

    /// Partition records with CSN in `(old_csn, ctxcsn]` into deletes and
    /// non-deletes, collapsing duplicate UUIDs: a delete anywhere in the
    /// window wins over any non-delete for the same UUID, and repeated
    /// non-deletes for the same UUID collapse to one candidate.
    pub fn replay_since(&self, old_csn: &Csn, ctxcsn: &Csn) -> ReplayResult {
        let inner = self.inner.lock();
        let mut deletes: Vec<EntryUuid> = Vec::new();
        let mut delete_set: HashSet<EntryUuid> = HashSet::new();
        let mut candidates: Vec<EntryUuid> = Vec::new();
        let mut candidate_set: HashSet<EntryUuid> = HashSet::new();

        for entry in inner.entries.iter() {
            if &entry.csn <= old_csn || &entry.csn > ctxcsn {
                continue;
            }
            if entry.tag == OpTag::Delete {
                candidate_set.remove(&entry.uuid);
                candidates.retain(|u| u != &entry.uuid);
                if delete_set.insert(entry.uuid) {
                    deletes.push(entry.uuid);
                }
            } else if !delete_set.contains(&entry.uuid) && candidate_set.insert(entry.uuid) {
                candidates.push(entry.uuid);
            }
        }

        ReplayResult {
            delete_uuids: deletes,
            candidate_uuids: candidates,
        }
    }

    /// Whether the log can serve a consumer whose cookie CSN is `cookie_csn`:
    /// the log cannot serve a cookie older than its tracked minimum.
    pub fn can_serve(&self, cookie_csn: &Csn) -> bool {
        if !self.is_enabled() {
            return false;
        }
        match self.min_csn() {
            Some(min) => cookie_csn >= &min,
            // Nothing has ever been evicted: the log holds everything
            // since it was created, so any cookie within that span works.
            None => true,
        }
    }
}
