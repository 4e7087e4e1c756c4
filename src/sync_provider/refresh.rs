//! Refresh engine: services initial and catch-up requests via session-log
//! replay, a CSN-existence probe, and a present-phase scan, then hands off
//! to persist mode for refresh-and-persist requests.

use super::config::SyncProviderConfig;
use super::control::{SyncDoneControl, SyncInfo, SyncRequestControl, SyncRequestMode};
use super::cookie::{Cookie, Rid};
use super::csn::CsnClock;
use super::scope::Filter;
use super::session_log::{ReplayResult, SessionLog};
use super::store::EntryStore;
use super::types::{EntrySnapshot, EntryUuid, Ndn, Scope};
use crate::error::{Result, SyncProviderError};
use tracing::info;

/// What the refresh engine produced, for the caller to turn into wire
/// messages (out of scope here).
#[derive(Debug, Clone, Default)]
pub struct RefreshOutcome {
    /// Entries to deliver as full `add` (or re-add, for session-log
    /// catch-up) sync-state messages.
    pub add_entries: Vec<EntrySnapshot>,
    /// Intermediate sync-info messages, in emission order.
    pub sync_info: Vec<SyncInfo>,
    /// `Some` for `refresh-only` requests; `None` for `refresh-and-persist`,
    /// which instead ends with a `SyncInfo::RefreshDelete` phase-transition
    /// message in `sync_info`.
    pub done: Option<SyncDoneControl>,
    /// Whether the caller should now register this search and detach the
    /// operation.
    pub persist: bool,
}

/// Probe each session-log candidate against the store and promote any that
/// are actually gone into the delete set. The surviving candidates
/// need no special handling here: being modified since the cookie, they
/// fall out of the normal entryCSN>=cookieCSN scan below like any other
/// changed entry.
async fn resolve_session_log_deletes(store: &dyn EntryStore, replay: ReplayResult) -> Vec<EntryUuid> {
    let mut deletes = replay.delete_uuids;
    for uuid in replay.candidate_uuids {
        if store.find_by_uuid(uuid).await.is_none() {
            deletes.push(uuid);
        }
    }
    deletes
}

/// Run a refresh for one request. `base_ndn`/`scope`/`filter` describe the
/// persistent search (or plain search) this refresh serves; `rid` is the
/// subscriber's replica id used to compose outgoing cookies.
#[allow(clippy::too_many_arguments)]
pub async fn refresh(
    store: &dyn EntryStore,
    clock: &CsnClock,
    session_log: &SessionLog,
    config: &SyncProviderConfig,
    base_ndn: &Ndn,
    scope: Scope,
    filter: &Filter,
    rid: Rid,
    request: &SyncRequestControl,
) -> Result<RefreshOutcome> {
    let snapshot = clock.get_context_csn();

    if let Some(cookie) = &request.cookie {
        // A cookie from the future shouldn't be possible unless the consumer
        // is talking to the wrong provider or state was lost; reject rather
        // than silently clamping.
        if cookie.csn > snapshot {
            return Err(SyncProviderError::Protocol(
                "cookie csn is newer than the provider's context csn".to_string(),
            ));
        }

        if cookie.csn == snapshot && request.mode == SyncRequestMode::RefreshOnly {
            info!(rid, "refresh: cookie already current, nothing to send");
            return Ok(RefreshOutcome {
                done: Some(SyncDoneControl {
                    cookie: Some(Cookie::new(rid, snapshot)),
                    refresh_deletes: true,
                }),
                ..Default::default()
            });
        }
    }

    let mut outcome = RefreshOutcome::default();
    let mut present_phase_ran = false;

    if let Some(cookie) = &request.cookie {
        let mut do_present = true;

        if session_log.is_enabled() && session_log.can_serve(&cookie.csn) {
            let replay = session_log.replay_since(&cookie.csn, &snapshot);
            let delete_uuids = resolve_session_log_deletes(store, replay).await;

            if !delete_uuids.is_empty() {
                outcome.sync_info.push(SyncInfo::SyncIdSet {
                    cookie: Some(Cookie::new(rid, snapshot.clone())),
                    refresh_deletes: true,
                    uuids: delete_uuids,
                });
            }

            do_present = false;
            present_phase_ran = true; // log replay stands in for the present phase
        } else {
            let found = store.find_by_csn_equal(&cookie.csn).await.is_some()
                || store.find_by_csn_at_most(&cookie.csn).await.is_some();
            if !found && !(config.reloadhint && request.reload_hint) {
                return Err(SyncProviderError::RefreshRequired);
            }
        }

        if do_present && !config.nopresent {
            present_phase_ran = true;
            let unchanged_filter = Filter::entry_csn_le(cookie.csn.as_str()).and(filter.clone());
            let unchanged = store.scan(base_ndn, scope, &unchanged_filter).await;
            for batch in unchanged.chunks(config.uuid_set_batch_size.max(1)) {
                outcome.sync_info.push(SyncInfo::SyncIdSet {
                    cookie: Some(Cookie::new(rid, snapshot.clone())),
                    refresh_deletes: false,
                    uuids: batch.iter().map(|e| e.uuid).collect(),
                });
            }
        }

        let new_filter = Filter::entry_csn_ge(cookie.csn.as_str()).and(filter.clone());
        let scanned = store.scan(base_ndn, scope, &new_filter).await;
        for entry in scanned {
            if entry.entry_csn > snapshot {
                continue; // Invariant 4: never show CSNs past the snapshot.
            }
            if entry.entry_csn == cookie.csn {
                continue; // already known to the consumer.
            }
            outcome.add_entries.push(entry);
        }
    } else {
        // Initial refresh: nothing to diff against, just the full set.
        outcome.add_entries = store.scan(base_ndn, scope, filter).await;
    }

    info!(
        rid,
        mode = ?request.mode,
        entries = outcome.add_entries.len(),
        "refresh completed"
    );

    if request.mode == SyncRequestMode::RefreshAndPersist {
        outcome.sync_info.push(SyncInfo::RefreshDelete {
            cookie: Some(Cookie::new(rid, snapshot)),
            refresh_done: true,
        });
        outcome.persist = true;
    } else {
        outcome.done = Some(SyncDoneControl {
            cookie: Some(Cookie::new(rid, snapshot)),
            refresh_deletes: !present_phase_ran,
        });
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync_provider::types::Csn;
    use async_trait::async_trait;
    use dashmap::DashMap;
    use std::collections::HashMap;
    use uuid::Uuid;

    struct FakeStore {
        entries: Vec<EntrySnapshot>,
        by_uuid: DashMap<EntryUuid, ()>,
    }

    impl FakeStore {
        fn new(entries: Vec<EntrySnapshot>) -> Self {
            let by_uuid = DashMap::new();
            for e in &entries {
                by_uuid.insert(e.uuid, ());
            }
            Self { entries, by_uuid }
        }
    }

    #[async_trait]
    impl EntryStore for FakeStore {
        async fn resolve_base(&self, _base_ndn: &Ndn) -> Option<super::super::store::BaseEntry> {
            None
        }
        async fn fetch_by_ndn(&self, ndn: &Ndn) -> Option<EntrySnapshot> {
            self.entries.iter().find(|e| &e.ndn == ndn).cloned()
        }
        async fn find_by_uuid(&self, uuid: EntryUuid) -> Option<EntrySnapshot> {
            if self.by_uuid.contains_key(&uuid) {
                self.entries.iter().find(|e| e.uuid == uuid).cloned()
            } else {
                None
            }
        }
        async fn find_by_csn_equal(&self, csn: &Csn) -> Option<EntrySnapshot> {
            self.entries.iter().find(|e| &e.entry_csn == csn).cloned()
        }
        async fn find_by_csn_at_most(&self, csn: &Csn) -> Option<EntrySnapshot> {
            self.entries.iter().find(|e| &e.entry_csn <= csn).cloned()
        }
        async fn scan(&self, base_ndn: &Ndn, scope: Scope, filter: &Filter) -> Vec<EntrySnapshot> {
            self.entries
                .iter()
                .filter(|e| crate::sync_provider::scope::matches(scope, base_ndn, filter, e))
                .cloned()
                .collect()
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

    fn req(mode: SyncRequestMode, cookie: Option<Cookie>) -> SyncRequestControl {
        SyncRequestControl {
            mode,
            cookie,
            reload_hint: false,
        }
    }

    #[tokio::test]
    async fn scenario_1_initial_refresh_returns_all_three_adds() {
        let (ua, ub, uc) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let store = FakeStore::new(vec![
            entry("cn=a,dc=example,dc=com", ua, "A"),
            entry("cn=b,dc=example,dc=com", ub, "B"),
            entry("cn=c,dc=example,dc=com", uc, "C"),
        ]);
        let clock = CsnClock::new(Csn::from("C"));
        let session_log = SessionLog::new(0);
        let config = SyncProviderConfig::default();

        let outcome = refresh(
            &store,
            &clock,
            &session_log,
            &config,
            &"dc=example,dc=com".to_string(),
            Scope::Subtree,
            &Filter::present_objectclass(),
            1,
            &req(SyncRequestMode::RefreshOnly, None),
        )
        .await
        .unwrap();

        assert_eq!(outcome.add_entries.len(), 3);
        assert!(outcome.sync_info.is_empty());
        let done = outcome.done.unwrap();
        assert_eq!(done.cookie.unwrap().csn, Csn::from("C"));
        assert!(done.refresh_deletes);
    }

    #[tokio::test]
    async fn scenario_2_catchup_via_session_log() {
        let (ua, ub) = (Uuid::new_v4(), Uuid::new_v4());
        // Only A survives (modified to csn E); B was deleted.
        let store = FakeStore::new(vec![entry("cn=a,dc=example,dc=com", ua, "E")]);
        let clock = CsnClock::new(Csn::from("E"));
        let session_log = SessionLog::new(10);
        session_log.append(
            ub,
            Csn::from("D"),
            crate::sync_provider::types::OpTag::Delete,
        );
        session_log.append(
            ua,
            Csn::from("E"),
            crate::sync_provider::types::OpTag::Modify,
        );
        let config = SyncProviderConfig::default();

        let outcome = refresh(
            &store,
            &clock,
            &session_log,
            &config,
            &"dc=example,dc=com".to_string(),
            Scope::Subtree,
            &Filter::present_objectclass(),
            1,
            &req(
                SyncRequestMode::RefreshOnly,
                Some(Cookie::new(1, Csn::from("C"))),
            ),
        )
        .await
        .unwrap();

        assert_eq!(outcome.sync_info.len(), 1);
        match &outcome.sync_info[0] {
            SyncInfo::SyncIdSet {
                refresh_deletes,
                uuids,
                ..
            } => {
                assert!(refresh_deletes);
                assert_eq!(uuids, &vec![ub]);
            }
            other => panic!("unexpected sync-info: {other:?}"),
        }
        assert_eq!(outcome.add_entries.len(), 1);
        assert_eq!(outcome.add_entries[0].uuid, ua);
        assert_eq!(outcome.done.unwrap().cookie.unwrap().csn, Csn::from("E"));
    }

    #[tokio::test]
    async fn scenario_3_refresh_and_persist_detaches_with_no_entries() {
        let store = FakeStore::new(vec![]);
        let clock = CsnClock::new(Csn::from("E"));
        let session_log = SessionLog::new(0);
        let config = SyncProviderConfig::default();

        let outcome = refresh(
            &store,
            &clock,
            &session_log,
            &config,
            &"dc=example,dc=com".to_string(),
            Scope::Subtree,
            &Filter::present_objectclass(),
            1,
            &req(
                SyncRequestMode::RefreshAndPersist,
                Some(Cookie::new(1, Csn::from("E"))),
            ),
        )
        .await
        .unwrap();

        assert!(outcome.add_entries.is_empty());
        assert!(outcome.persist);
        assert!(outcome.done.is_none());
        assert!(matches!(
            outcome.sync_info.as_slice(),
            [SyncInfo::RefreshDelete { refresh_done: true, .. }]
        ));
    }

    #[tokio::test]
    async fn scenario_6_stale_cookie_without_reloadhint_is_refresh_required() {
        let store = FakeStore::new(vec![]);
        let clock = CsnClock::new(Csn::from("Z"));
        let session_log = SessionLog::new(1);
        session_log.append(
            Uuid::new_v4(),
            Csn::from("M"),
            crate::sync_provider::types::OpTag::Add,
        );
        session_log.append(
            Uuid::new_v4(),
            Csn::from("N"),
            crate::sync_provider::types::OpTag::Add,
        );
        let config = SyncProviderConfig::default();

        let err = refresh(
            &store,
            &clock,
            &session_log,
            &config,
            &"dc=example,dc=com".to_string(),
            Scope::Subtree,
            &Filter::present_objectclass(),
            1,
            &req(
                SyncRequestMode::RefreshOnly,
                Some(Cookie::new(1, Csn::from("A"))),
            ),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, SyncProviderError::RefreshRequired));
    }

    #[tokio::test]
    async fn scenario_6_reloadhint_allows_present_phase_fallback() {
        let u = Uuid::new_v4();
        let store = FakeStore::new(vec![entry("cn=a,dc=example,dc=com", u, "Z")]);
        let clock = CsnClock::new(Csn::from("Z"));
        let session_log = SessionLog::new(0);
        let mut config = SyncProviderConfig::default();
        config.reloadhint = true;

        let mut request = req(
            SyncRequestMode::RefreshOnly,
            Some(Cookie::new(1, Csn::from("A"))),
        );
        request.reload_hint = true;

        let outcome = refresh(
            &store,
            &clock,
            &session_log,
            &config,
            &"dc=example,dc=com".to_string(),
            Scope::Subtree,
            &Filter::present_objectclass(),
            1,
            &request,
        )
        .await
        .unwrap();

        assert!(!outcome.add_entries.is_empty() || !outcome.sync_info.is_empty());
    }

    #[tokio::test]
    async fn cookie_newer_than_context_csn_is_protocol_error() {
        let store = FakeStore::new(vec![]);
        let clock = CsnClock::new(Csn::from("A"));
        let session_log = SessionLog::new(0);
        let config = SyncProviderConfig::default();

        let err = refresh(
            &store,
            &clock,
            &session_log,
            &config,
            &"dc=example,dc=com".to_string(),
            Scope::Subtree,
            &Filter::present_objectclass(),
            1,
            &req(
                SyncRequestMode::RefreshOnly,
                Some(Cookie::new(1, Csn::from("Z"))),
            ),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, SyncProviderError::Protocol(_)));
    }

    #[tokio::test]
    async fn matching_cookie_refresh_only_short_circuits() {
        let store = FakeStore::new(vec![]);
        let clock = CsnClock::new(Csn::from("C"));
        let session_log = SessionLog::new(0);
        let config = SyncProviderConfig::default();

        let outcome = refresh(
            &store,
            &clock,
            &session_log,
            &config,
            &"dc=example,dc=com".to_string(),
            Scope::Subtree,
            &Filter::present_objectclass(),
            1,
            &req(
                SyncRequestMode::RefreshOnly,
                Some(Cookie::new(1, Csn::from("C"))),
            ),
        )
        .await
        .unwrap();

        assert!(outcome.add_entries.is_empty());
        assert!(outcome.sync_info.is_empty());
        assert!(outcome.done.unwrap().refresh_deletes);
    }
}
