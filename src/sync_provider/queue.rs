//! Per-subscriber drainer: drains one persistent search's pending event
//! FIFO into protocol messages.

use super::control::{SyncState, SyncStateControl};
use super::csn::CsnClock;
use super::persistent_search::PersistentSearch;
use super::store::EntryStore;
use super::types::{Dn, EventMode};
use tracing::warn;

/// One message the caller (out-of-scope protocol layer) should write to
/// the wire for this subscriber.
#[derive(Debug, Clone)]
pub struct DrainedMessage {
    pub dn: Dn,
    pub control: SyncStateControl,
}

/// Run one drainer pass: pop events until the queue is empty or the search
/// is abandoned, skipping add/modify events whose entry has since
/// disappeared — a later delete event will reconcile it.
/// Always re-arms the search for its next scheduled run before returning.
pub async fn drain_once(
    search: &PersistentSearch,
    store: &dyn EntryStore,
    csn_clock: &CsnClock,
) -> Vec<DrainedMessage> {
    let mut out = Vec::new();

    while !search.is_abandoned() {
        let Some(event) = search.dequeue() else {
            break;
        };

        match event.mode {
            EventMode::Delete => {
                out.push(DrainedMessage {
                    dn: event.dn,
                    control: SyncStateControl {
                        state: SyncState::Delete,
                        entry_uuid: event.uuid,
                        cookie: Some(csn_clock.compose_cookie(search.rid)),
                    },
                });
            }
            EventMode::Add | EventMode::Modify => {
                if store.fetch_by_ndn(&event.ndn).await.is_none() {
                    warn!(dn = %event.dn, "drainer: entry vanished before delivery, skipping event");
                    continue;
                }
                let state = if event.mode == EventMode::Add {
                    SyncState::Add
                } else {
                    SyncState::Modify
                };
                out.push(DrainedMessage {
                    dn: event.dn,
                    control: SyncStateControl {
                        state,
                        entry_uuid: event.uuid,
                        cookie: Some(csn_clock.compose_cookie(search.rid)),
                    },
                });
            }
        }
    }

    search.mark_drain_idle();
    out
}
