//! The contract the core requires from the directory entry store. The
//! store itself — wire decoding, ACL evaluation, on-disk format — is out
//! of scope; this trait is the seam.

use super::scope::Filter;
use super::types::{Csn, EntrySnapshot, EntryUuid, Ndn, Scope};
use async_trait::async_trait;

/// Opaque, store-assigned identity for an entry, stable across renames of
/// its DN but not across delete+re-add (base-tracker invalidation
/// relies on this).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(pub u64);

#[derive(Debug, Clone)]
pub struct BaseEntry {
    pub id: EntryId,
    pub ndn: Ndn,
}

/// Read/write contract the sync provider needs from the entry store.
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Resolve `base_ndn` to its current entry id and normalized DN, as a
    /// scope-base search would.
    async fn resolve_base(&self, base_ndn: &Ndn) -> Option<BaseEntry>;

    /// Fetch the current snapshot of the entry at `ndn`, or `None` if it no
    /// longer exists.
    async fn fetch_by_ndn(&self, ndn: &Ndn) -> Option<EntrySnapshot>;

    /// UUID-equality search, used both to probe whether a session-log
    /// candidate is still present and to serve the drainer.
    async fn find_by_uuid(&self, uuid: EntryUuid) -> Option<EntrySnapshot>;

    /// `entryCSN=csn` equality search.
    async fn find_by_csn_equal(&self, csn: &Csn) -> Option<EntrySnapshot>;

    /// `entryCSN<=csn` search, tolerating the unchecked-scan limit — the
    /// store is free to return the first match it finds rather than an
    /// exhaustive scan.
    async fn find_by_csn_at_most(&self, csn: &Csn) -> Option<EntrySnapshot>;

    /// Bounded filtered scan under `base`/`scope` matching `filter`,
    /// returning entries in no particular order. Used for the present-phase
    /// scan and the initial-refresh entries dispatch.
    async fn scan(&self, base: &Ndn, scope: Scope, filter: &Filter) -> Vec<EntrySnapshot>;

    /// Write the context CSN back to the suffix entry's `contextCSN`
    /// operational attribute via a `replace` modification that bypasses
    /// the sync-provider hook. Failures are logged by the caller,
    /// not propagated as fatal.
    async fn checkpoint_write_back(&self, suffix_dn: &Ndn, ctxcsn: &Csn) -> crate::Result<()>;
}

/// A minimal in-memory `EntryStore`, standing in for the real directory
/// backend: used by this crate's own tests and by the
/// `syncprovd` demo binary to exercise the full pipeline without a real
/// store.
pub struct InMemoryEntryStore {
    entries: dashmap::DashMap<Ndn, EntrySnapshot>,
    next_id: std::sync::atomic::AtomicU64,
    ids: dashmap::DashMap<Ndn, EntryId>,
    written_back: parking_lot::Mutex<Option<(Ndn, Csn)>>,
}

impl Default for InMemoryEntryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEntryStore {
    pub fn new() -> Self {
        Self {
            entries: dashmap::DashMap::new(),
            next_id: std::sync::atomic::AtomicU64::new(1),
            ids: dashmap::DashMap::new(),
            written_back: parking_lot::Mutex::new(None),
        }
    }

    /// Insert or replace the entry at its normalized DN, assigning it a
    /// fresh entry id if this DN has never been seen before.
    pub fn put(&self, entry: EntrySnapshot) {
        self.ids.entry(entry.ndn.clone()).or_insert_with(|| {
            EntryId(self.next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed))
        });
        self.entries.insert(entry.ndn.clone(), entry);
    }

    /// Remove the entry at `ndn`. Its entry id is retired, not reused, so a
    /// later re-add at the same DN gets a fresh id (base-tracker
    /// invalidation relies on this).
    pub fn remove(&self, ndn: &Ndn) {
        self.entries.remove(ndn);
        self.ids.remove(ndn);
    }

    pub fn rename(&self, old_ndn: &Ndn, new_entry: EntrySnapshot) {
        self.entries.remove(old_ndn);
        let id = self.ids.remove(old_ndn).map(|(_, id)| id);
        if let Some(id) = id {
            self.ids.insert(new_entry.ndn.clone(), id);
        }
        self.entries.insert(new_entry.ndn.clone(), new_entry);
    }

    pub fn last_checkpoint(&self) -> Option<(Ndn, Csn)> {
        self.written_back.lock().clone()
    }
}

#[async_trait]
impl EntryStore for InMemoryEntryStore {
    async fn resolve_base(&self, base_ndn: &Ndn) -> Option<BaseEntry> {
        self.ids.get(base_ndn).map(|id| BaseEntry {
            id: *id,
            ndn: base_ndn.clone(),
        })
    }

    async fn fetch_by_ndn(&self, ndn: &Ndn) -> Option<EntrySnapshot> {
        self.entries.get(ndn).map(|e| e.clone())
    }

    async fn find_by_uuid(&self, uuid: EntryUuid) -> Option<EntrySnapshot> {
        self.entries.iter().find(|e| e.uuid == uuid).map(|e| e.clone())
    }

    async fn find_by_csn_equal(&self, csn: &Csn) -> Option<EntrySnapshot> {
        self.entries
            .iter()
            .find(|e| &e.entry_csn == csn)
            .map(|e| e.clone())
    }

    async fn find_by_csn_at_most(&self, csn: &Csn) -> Option<EntrySnapshot> {
        self.entries
            .iter()
            .find(|e| &e.entry_csn <= csn)
            .map(|e| e.clone())
    }

    async fn scan(&self, base: &Ndn, scope: Scope, filter: &Filter) -> Vec<EntrySnapshot> {
        self.entries
            .iter()
            .filter(|e| super::scope::matches(scope, base, filter, e.value()))
            .map(|e| e.clone())
            .collect()
    }

    async fn checkpoint_write_back(&self, suffix_dn: &Ndn, ctxcsn: &Csn) -> crate::Result<()> {
        *self.written_back.lock() = Some((suffix_dn.clone(), ctxcsn.clone()));
        Ok(())
    }
}
