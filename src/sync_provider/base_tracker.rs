//! Resolves and re-validates a persistent search's base entry.
//!
//! The first event after a search registers triggers a scope-base search
//! ("find-base") that captures the resolved entry's id. Every subsequent
//! event re-asserts that the base DN still resolves to that same id; a
//! mismatch means the base moved or was replaced (delete+re-add with a new
//! UUID, a rename) and the search can no longer be trusted to have seen
//! everything in its scope — it must be torn down with refresh-required.

use super::store::{EntryId, EntryStore};
use super::types::Ndn;
use crate::error::{Result, SyncProviderError};
use parking_lot::Mutex;
use tracing::warn;

pub struct BaseTracker {
    base_ndn: Ndn,
    resolved: Mutex<Option<EntryId>>,
}

impl BaseTracker {
    pub fn new(base_ndn: Ndn) -> Self {
        Self {
            base_ndn,
            resolved: Mutex::new(None),
        }
    }

    pub fn base_ndn(&self) -> &Ndn {
        &self.base_ndn
    }

    /// Resolve (if unresolved) or re-validate (if already resolved) the
    /// base against the store. Returns `Err(RefreshRequired)` if the base
    /// identity changed since it was first resolved.
    pub async fn check(&self, store: &dyn EntryStore) -> Result<()> {
        let current = store.resolve_base(&self.base_ndn).await;

        let mut resolved = self.resolved.lock();
        match (&*resolved, current) {
            (None, Some(base)) => {
                *resolved = Some(base.id);
                Ok(())
            }
            (None, None) => {
                // Base doesn't exist yet (search registered before the
                // entry was created); nothing to invalidate, nothing to
                // pin either. Caller treats this as "not yet resolvable".
                Err(SyncProviderError::NoSuchObject(self.base_ndn.clone()))
            }
            (Some(prev_id), Some(base)) if *prev_id == base.id => Ok(()),
            (Some(_), _) => {
                warn!(base = %self.base_ndn, "persistent search base invalidated");
                Err(SyncProviderError::RefreshRequired)
            }
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.lock().is_some()
    }
}
