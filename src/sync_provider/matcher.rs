//! Event matcher: classifies a completed write as add/modify/delete for
//! each live persistent search.
//!
//! Invoked twice per write that is not a pure Add (`pre_write` before the
//! store executes it, `post_write_non_delete`/`post_write_delete` after);
//! for Add only the post-write path runs, and for Delete only the
//! pre-computed `pre_matches` list is consulted since the entry can no
//! longer be fetched.

use super::persistent_search::{PersistentSearch, PersistentSearchRegistry};
use super::scope;
use super::store::EntryStore;
use super::types::{Csn, Dn, EntrySnapshot, EntryUuid, EventMode, Ndn, PendingEvent};
use std::sync::Arc;
use tracing::{debug, trace};

/// Per-write snapshot, alive only for the duration of one write.
pub struct OpCookie {
    pub dn: Dn,
    pub ndn: Ndn,
    pub uuid: EntryUuid,
    pub is_reference: bool,
    pub csn: Option<Csn>,
    pub pre_matches: Vec<Arc<PersistentSearch>>,
}

impl OpCookie {
    pub fn new(dn: Dn, ndn: Ndn, uuid: EntryUuid, is_reference: bool) -> Self {
        Self {
            dn,
            ndn,
            uuid,
            is_reference,
            csn: None,
            pre_matches: Vec::new(),
        }
    }
}

fn take_pre_match(pre_matches: &mut Vec<Arc<PersistentSearch>>, id: u64) -> bool {
    if let Some(pos) = pre_matches.iter().position(|s| s.id == id) {
        pre_matches.remove(pos);
        true
    } else {
        false
    }
}

/// Drop a search whose base turned out to be invalid.
/// Returns the searches that were invalidated, so the caller can notify
/// their subscribers with refresh-required.
async fn refresh_bases(
    registry: &PersistentSearchRegistry,
    store: &dyn EntryStore,
    candidates: Vec<Arc<PersistentSearch>>,
) -> (Vec<Arc<PersistentSearch>>, Vec<Arc<PersistentSearch>>) {
    let mut valid = Vec::new();
    let mut invalidated = Vec::new();
    for search in candidates {
        if search.take_wrote_base() {
            trace!(rid = search.rid, base = %search.base_ndn, "search's own base was written, re-verifying identity");
        }
        match search.base_tracker.check(store).await {
            Ok(()) => {
                search.set_find_base_pending(false);
                valid.push(search);
            }
            Err(e) => {
                if matches!(e, crate::error::SyncProviderError::RefreshRequired) {
                    registry.unregister(search.id);
                    invalidated.push(search);
                } else {
                    // Base not resolvable yet (no-such-object): leave the
                    // search registered, flagged pending, just skip it for
                    // this event.
                    search.set_find_base_pending(true);
                }
            }
        }
    }
    (valid, invalidated)
}

/// Pre-write pass (`saveit=true`): record which live searches the
/// about-to-be-overwritten entry currently matches.
pub async fn pre_write(
    registry: &PersistentSearchRegistry,
    store: &dyn EntryStore,
    op: &mut OpCookie,
    entry_before: &EntrySnapshot,
) -> Vec<Arc<PersistentSearch>> {
    let (valid, invalidated) = refresh_bases(registry, store, registry.list()).await;
    for search in valid {
        if scope::matches(search.scope, &search.base_ndn, &search.filter, entry_before) {
            op.pre_matches.push(search);
        }
    }
    invalidated
}

/// Post-write pass for Add/Modify/ModRdn (`saveit=false`): evaluate the new
/// entry snapshot (post-rename DN for ModRdn) against every live search and
/// produce the (search, event) pairs to enqueue.
pub async fn post_write_non_delete(
    registry: &PersistentSearchRegistry,
    store: &dyn EntryStore,
    op: &mut OpCookie,
    entry_after: &EntrySnapshot,
) -> (Vec<(Arc<PersistentSearch>, PendingEvent)>, Vec<Arc<PersistentSearch>>) {
    let csn = op.csn.clone().expect("csn must be assigned before post_write");
    let (valid, invalidated) = refresh_bases(registry, store, registry.list()).await;

    let mut results = Vec::new();
    for search in valid {
        if entry_after.ndn == search.base_ndn {
            search.set_wrote_base(true);
        }
        let was_pre = take_pre_match(&mut op.pre_matches, search.id);
        let now_matches = scope::matches(search.scope, &search.base_ndn, &search.filter, entry_after);

        let mode = if now_matches {
            Some(if was_pre { EventMode::Modify } else { EventMode::Add })
        } else if was_pre {
            Some(EventMode::Delete)
        } else {
            None
        };

        if let Some(mode) = mode {
            debug!(rid = search.rid, uuid = %entry_after.uuid, ?mode, "event matcher classified write");
            results.push((
                search.clone(),
                PendingEvent {
                    dn: entry_after.dn.clone(),
                    ndn: entry_after.ndn.clone(),
                    uuid: entry_after.uuid,
                    csn: csn.clone(),
                    mode,
                    is_reference: op.is_reference,
                },
            ));
        }
    }
    (results, invalidated)
}

/// Post-write pass for Delete: the entry is gone, so every search that
/// matched pre-write unconditionally gets a delete.
pub fn post_write_delete(op: &mut OpCookie) -> Vec<(Arc<PersistentSearch>, PendingEvent)> {
    let csn = op.csn.clone().expect("csn must be assigned before post_write");
    op.pre_matches
        .drain(..)
        .map(|search| {
            debug!(rid = search.rid, uuid = %op.uuid, "event matcher classified delete");
            (
                search.clone(),
                PendingEvent {
                    dn: op.dn.clone(),
                    ndn: op.ndn.clone(),
                    uuid: op.uuid,
                    csn: csn.clone(),
                    mode: EventMode::Delete,
                    is_reference: op.is_reference,
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync_provider::scope::Filter;
    use crate::sync_provider::store::{BaseEntry, EntryId};
    use crate::sync_provider::types::Scope;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use uuid::Uuid;

    struct FakeStore;

    #[async_trait]
    impl EntryStore for FakeStore {
        async fn resolve_base(&self, base_ndn: &Ndn) -> Option<BaseEntry> {
            Some(BaseEntry {
                id: EntryId(1),
                ndn: base_ndn.clone(),
            })
        }
        async fn fetch_by_ndn(&self, _ndn: &Ndn) -> Option<EntrySnapshot> {
            None
        }
        async fn find_by_uuid(&self, _uuid: EntryUuid) -> Option<EntrySnapshot> {
            None
        }
        async fn find_by_csn_equal(&self, _csn: &Csn) -> Option<EntrySnapshot> {
            None
        }
        async fn find_by_csn_at_most(&self, _csn: &Csn) -> Option<EntrySnapshot> {
            None
        }
        async fn scan(&self, _base: &Ndn, _scope: Scope, _filter: &Filter) -> Vec<EntrySnapshot> {
            Vec::new()
        }
        async fn checkpoint_write_back(&self, _suffix_dn: &Ndn, _ctxcsn: &Csn) -> crate::Result<()> {
            Ok(())
        }
    }

    fn entry(ndn: &str, uuid: EntryUuid, csn: &str) -> EntrySnapshot {
        EntrySnapshot {
            dn: ndn.to_string(),
            ndn: ndn.to_string(),
            uuid,
            entry_csn: csn.into(),
            attrs: HashMap::new(),
        }
    }

    fn make_search(scope: Scope) -> Arc<PersistentSearch> {
        Arc::new(PersistentSearch::new(
            1,
            "ou=people,dc=example,dc=com".to_string(),
            scope,
            Filter::present_objectclass(),
            "(objectClass=*)".to_string(),
        ))
    }

    #[tokio::test]
    async fn add_in_scope_enqueues_add() {
        let registry = PersistentSearchRegistry::new();
        let search = make_search(Scope::Subtree);
        registry.register(search.clone());
        let store = FakeStore;
        let uuid = Uuid::new_v4();
        let mut op = OpCookie::new(
            "cn=a,ou=people,dc=example,dc=com".to_string(),
            "cn=a,ou=people,dc=example,dc=com".to_string(),
            uuid,
            false,
        );
        op.csn = Some("c1".into());
        let e = entry("cn=a,ou=people,dc=example,dc=com", uuid, "c1");
        let (events, invalidated) = post_write_non_delete(&registry, &store, &mut op, &e).await;
        assert!(invalidated.is_empty());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1.mode, EventMode::Add);
    }

    #[tokio::test]
    async fn modify_still_in_scope_enqueues_modify() {
        let registry = PersistentSearchRegistry::new();
        let search = make_search(Scope::Subtree);
        registry.register(search.clone());
        let store = FakeStore;
        let uuid = Uuid::new_v4();
        let ndn = "cn=a,ou=people,dc=example,dc=com".to_string();
        let e = entry(&ndn, uuid, "c0");

        let mut op = OpCookie::new(ndn.clone(), ndn.clone(), uuid, false);
        let invalidated = pre_write(&registry, &store, &mut op, &e).await;
        assert!(invalidated.is_empty());
        assert_eq!(op.pre_matches.len(), 1);

        op.csn = Some("c1".into());
        let e_after = entry(&ndn, uuid, "c1");
        let (events, _) = post_write_non_delete(&registry, &store, &mut op, &e_after).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1.mode, EventMode::Modify);
    }

    #[tokio::test]
    async fn modrdn_leaving_scope_enqueues_exactly_one_delete() {
        let registry = PersistentSearchRegistry::new();
        let search = make_search(Scope::Subtree);
        registry.register(search.clone());
        let store = FakeStore;
        let uuid = Uuid::new_v4();
        let old_ndn = "cn=a,ou=people,dc=example,dc=com".to_string();
        let new_ndn = "cn=a,ou=other,dc=example,dc=com".to_string();
        let before = entry(&old_ndn, uuid, "c0");

        let mut op = OpCookie::new(old_ndn.clone(), old_ndn.clone(), uuid, false);
        pre_write(&registry, &store, &mut op, &before).await;
        assert_eq!(op.pre_matches.len(), 1);

        op.csn = Some("c1".into());
        op.dn = new_ndn.clone();
        op.ndn = new_ndn.clone();
        let after = entry(&new_ndn, uuid, "c1");
        let (events, _) = post_write_non_delete(&registry, &store, &mut op, &after).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1.mode, EventMode::Delete);
    }

    #[tokio::test]
    async fn delete_of_previously_matched_entry_enqueues_delete() {
        let registry = PersistentSearchRegistry::new();
        let search = make_search(Scope::Subtree);
        registry.register(search.clone());
        let store = FakeStore;
        let uuid = Uuid::new_v4();
        let ndn = "cn=a,ou=people,dc=example,dc=com".to_string();
        let before = entry(&ndn, uuid, "c0");

        let mut op = OpCookie::new(ndn.clone(), ndn.clone(), uuid, false);
        pre_write(&registry, &store, &mut op, &before).await;
        assert_eq!(op.pre_matches.len(), 1);

        op.csn = Some("c1".into());
        let events = post_write_delete(&mut op);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1.mode, EventMode::Delete);
        assert!(op.pre_matches.is_empty());
    }

    #[tokio::test]
    async fn out_of_scope_write_produces_no_event() {
        let registry = PersistentSearchRegistry::new();
        let search = make_search(Scope::Subtree);
        registry.register(search.clone());
        let store = FakeStore;
        let uuid = Uuid::new_v4();
        let ndn = "cn=a,ou=elsewhere,dc=example,dc=com".to_string();
        let mut op = OpCookie::new(ndn.clone(), ndn.clone(), uuid, false);
        op.csn = Some("c1".into());
        let e = entry(&ndn, uuid, "c1");
        let (events, _) = post_write_non_delete(&registry, &store, &mut op, &e).await;
        assert!(events.is_empty());
    }

    struct MissingThenPresentStore {
        base_present: parking_lot::Mutex<bool>,
    }

    #[async_trait]
    impl EntryStore for MissingThenPresentStore {
        async fn resolve_base(&self, base_ndn: &Ndn) -> Option<crate::sync_provider::store::BaseEntry> {
            if *self.base_present.lock() {
                Some(crate::sync_provider::store::BaseEntry {
                    id: crate::sync_provider::store::EntryId(1),
                    ndn: base_ndn.clone(),
                })
            } else {
                None
            }
        }
        async fn fetch_by_ndn(&self, _ndn: &Ndn) -> Option<EntrySnapshot> {
            None
        }
        async fn find_by_uuid(&self, _uuid: EntryUuid) -> Option<EntrySnapshot> {
            None
        }
        async fn find_by_csn_equal(&self, _csn: &Csn) -> Option<EntrySnapshot> {
            None
        }
        async fn find_by_csn_at_most(&self, _csn: &Csn) -> Option<EntrySnapshot> {
            None
        }
        async fn scan(&self, _base: &Ndn, _scope: Scope, _filter: &Filter) -> Vec<EntrySnapshot> {
            Vec::new()
        }
        async fn checkpoint_write_back(&self, _suffix_dn: &Ndn, _ctxcsn: &Csn) -> crate::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn unresolvable_base_flags_find_base_pending_and_keeps_search_registered() {
        let registry = PersistentSearchRegistry::new();
        let search = make_search(Scope::Subtree);
        registry.register(search.clone());
        let store = MissingThenPresentStore {
            base_present: parking_lot::Mutex::new(false),
        };
        assert!(search.flags().find_base_pending);

        let uuid = Uuid::new_v4();
        let ndn = "cn=a,ou=people,dc=example,dc=com".to_string();
        let mut op = OpCookie::new(ndn.clone(), ndn.clone(), uuid, false);
        op.csn = Some("c1".into());
        let e = entry(&ndn, uuid, "c1");
        let (events, invalidated) = post_write_non_delete(&registry, &store, &mut op, &e).await;
        assert!(events.is_empty());
        assert!(invalidated.is_empty());
        assert!(search.flags().find_base_pending);
        assert_eq!(registry.len(), 1, "search must stay registered while unresolvable");

        *store.base_present.lock() = true;
        let mut op = OpCookie::new(ndn.clone(), ndn.clone(), uuid, false);
        op.csn = Some("c2".into());
        let e = entry(&ndn, uuid, "c2");
        let (events, _) = post_write_non_delete(&registry, &store, &mut op, &e).await;
        assert_eq!(events.len(), 1);
        assert!(!search.flags().find_base_pending);
    }
}
