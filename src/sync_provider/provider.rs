//! Top-level façade tying the write-path hook and search-path hook together
//! over the component set built in the sibling modules.

use super::checkpoint::{self, CheckpointPolicy};
use super::config::SyncProviderConfig;
use super::control::{SyncRequestControl, SyncRequestMode};
use super::cookie::Rid;
use super::csn::{CsnClock, CsnGenerator};
use super::matcher::{self, OpCookie};
use super::mod_serializer::ModSerializer;
use super::persistent_search::{PersistentSearch, PersistentSearchRegistry};
use super::queue;
use super::refresh::{self, RefreshOutcome};
use super::scope::Filter;
use super::session_log::SessionLog;
use super::store::EntryStore;
use super::types::{Csn, Dn, EntrySnapshot, EntryUuid, Ndn, OpTag, Scope};
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// The kind of completed write the caller is reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Add,
    Modify,
    ModRdn,
    Delete,
}

impl From<WriteKind> for OpTag {
    fn from(k: WriteKind) -> Self {
        match k {
            WriteKind::Add => OpTag::Add,
            WriteKind::Modify => OpTag::Modify,
            WriteKind::ModRdn => OpTag::ModRdn,
            WriteKind::Delete => OpTag::Delete,
        }
    }
}

/// The engine: one instance per backend suffix.
pub struct SyncProvider {
    store: Arc<dyn EntryStore>,
    csn_clock: Arc<CsnClock>,
    csn_generator: CsnGenerator,
    session_log: SessionLog,
    mod_serializer: ModSerializer,
    searches: PersistentSearchRegistry,
    checkpoint_policy: CheckpointPolicy,
    config: SyncProviderConfig,
    suffix_dn: Ndn,
}

impl SyncProvider {
    pub fn new(
        suffix_dn: Ndn,
        store: Arc<dyn EntryStore>,
        config: SyncProviderConfig,
        initial_context_csn: Csn,
    ) -> Self {
        Self {
            store,
            csn_clock: Arc::new(CsnClock::new(initial_context_csn)),
            csn_generator: CsnGenerator::new(config.replica_id),
            session_log: SessionLog::new(config.sessionlog_capacity),
            mod_serializer: ModSerializer::new(),
            searches: PersistentSearchRegistry::new(),
            checkpoint_policy: CheckpointPolicy::new(
                config.checkpoint_ops,
                config.checkpoint_interval(),
            ),
            suffix_dn,
            config,
        }
    }

    pub fn context_csn(&self) -> Csn {
        self.csn_clock.get_context_csn()
    }

    /// A compare against the suffix entry's `contextCSN` is answered
    /// synthetically from the in-memory clock, never reaching the store.
    pub fn compare_context_csn(&self, claimed: &Csn) -> bool {
        self.csn_clock.get_context_csn() == *claimed
    }

    pub fn active_persistent_searches(&self) -> usize {
        self.searches.len()
    }

    /// Write-path hook: serializes on the target DN, runs the event matcher
    /// around the caller-supplied before/after snapshots, advances the
    /// context CSN, appends to the session log, enqueues subscriber events,
    /// and triggers a checkpoint if due.
    ///
    /// `entry_before` is required for every kind but `Add`; `entry_after`
    /// is required for every kind but `Delete`.
    pub async fn handle_write(
        &self,
        kind: WriteKind,
        dn: Dn,
        ndn: Ndn,
        uuid: EntryUuid,
        is_reference: bool,
        entry_before: Option<EntrySnapshot>,
        entry_after: Option<EntrySnapshot>,
    ) -> Result<Csn> {
        let _ticket = self.mod_serializer.acquire(ndn.clone()).await;

        let mut op = OpCookie::new(dn, ndn, uuid, is_reference);

        if kind != WriteKind::Add {
            let before = entry_before
                .as_ref()
                .expect("pre-write requires a before-snapshot for non-Add writes");
            matcher::pre_write(&self.searches, self.store.as_ref(), &mut op, before).await;
        }

        let csn = self.csn_generator.mint();
        self.csn_clock.advance(&csn);
        op.csn = Some(csn.clone());
        self.session_log.append(uuid, csn.clone(), kind.into());

        let matched = match kind {
            WriteKind::Delete => matcher::post_write_delete(&mut op),
            _ => {
                let after = entry_after
                    .as_ref()
                    .expect("post-write requires an after-snapshot for non-Delete writes");
                op.dn = after.dn.clone();
                op.ndn = after.ndn.clone();
                let (events, _invalidated) =
                    matcher::post_write_non_delete(&self.searches, self.store.as_ref(), &mut op, after)
                        .await;
                events
            }
        };

        for (search, event) in matched {
            debug!(rid = search.rid, uuid = %event.uuid, mode = ?event.mode, "write hook enqueued event");
            if search.enqueue(event) {
                self.schedule_drain(search);
            }
        }

        if self.checkpoint_policy.note_write() {
            checkpoint::run_checkpoint(
                &self.checkpoint_policy,
                &self.csn_clock,
                self.store.as_ref(),
                &self.suffix_dn,
            )
            .await;
        }

        Ok(csn)
    }

    /// Search-path hook: runs the refresh engine and, for
    /// `refresh-and-persist` requests, registers and detaches a new
    /// persistent search whose drainer is already running by the time this
    /// returns.
    pub async fn handle_search(
        &self,
        rid: Rid,
        base_ndn: Ndn,
        scope: Scope,
        filter: Filter,
        filter_text: String,
        request: SyncRequestControl,
    ) -> Result<(RefreshOutcome, Option<Arc<PersistentSearch>>)> {
        let outcome = refresh::refresh(
            self.store.as_ref(),
            &self.csn_clock,
            &self.session_log,
            &self.config,
            &base_ndn,
            scope,
            &filter,
            rid,
            &request,
        )
        .await?;

        if !outcome.persist {
            return Ok((outcome, None));
        }

        debug_assert_eq!(request.mode, SyncRequestMode::RefreshAndPersist);
        let search = Arc::new(PersistentSearch::new(rid, base_ndn, scope, filter, filter_text));
        search.set_refreshing(false);
        search.detach();
        self.searches.register(search.clone());
        self.schedule_drain(search.clone());
        Ok((outcome, Some(search)))
    }

    /// Force a final checkpoint write-back if the clock is dirty. The
    /// explicit dirty flag is what makes this possible to check directly,
    /// rather than inferring it from the checkpoint op counter.
    pub async fn shutdown(&self) {
        checkpoint::run_checkpoint(
            &self.checkpoint_policy,
            &self.csn_clock,
            self.store.as_ref(),
            &self.suffix_dn,
        )
        .await;
    }

    /// Spawn the long-lived drain loop for a freshly detached search. The
    /// loop keeps redraining on every wake-up and re-arms itself at an idle
    /// interval until the search is abandoned.
    fn schedule_drain(&self, search: Arc<PersistentSearch>) {
        let store = self.store.clone();
        let csn_clock = self.csn_clock.clone();
        tokio::spawn(async move {
            const IDLE_INTERVAL: Duration = Duration::from_secs(60);
            loop {
                let messages = queue::drain_once(&search, store.as_ref(), &csn_clock).await;
                for message in &messages {
                    debug!(dn = %message.dn, state = ?message.control.state, "drainer: message ready");
                }
                if search.is_abandoned() {
                    break;
                }
                let _ = tokio::time::timeout(IDLE_INTERVAL, search.drain_wake.notified()).await;
                if search.is_abandoned() {
                    break;
                }
            }
        });
    }
}
