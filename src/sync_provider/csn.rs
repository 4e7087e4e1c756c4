//! CSN clock and context-CSN store.
//!
//! Mints CSNs and holds the authoritative context CSN under a single mutex;
//! readers copy under the lock. Monotonicity is
//! enforced by comparing before overwrite in `advance`.

use super::cookie::{Cookie, Rid};
use super::types::Csn;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tracing::debug;

/// Mints CSNs in the OpenLDAP-style format
/// `<timestamp>.<usec>Z#<mod_counter>#<replica_id>#<local_counter>`, which
/// sorts lexicographically in commit order as long as the clock does not
/// run backwards within the same microsecond (`mod_counter` disambiguates
/// that case).
pub struct CsnGenerator {
    replica_id: u16,
    last_micros: AtomicU64,
    mod_counter: AtomicU32,
}

impl CsnGenerator {
    pub fn new(replica_id: u16) -> Self {
        Self {
            replica_id,
            last_micros: AtomicU64::new(0),
            mod_counter: AtomicU32::new(0),
        }
    }

    /// Mint a new CSN. Guaranteed to be strictly greater than any CSN
    /// previously minted by this generator.
    pub fn mint(&self) -> Csn {
        let now_micros = Utc::now().timestamp_micros().max(0) as u64;
        let prev = self.last_micros.fetch_max(now_micros, Ordering::AcqRel);
        let (micros, counter) = if now_micros > prev {
            self.mod_counter.store(0, Ordering::Release);
            (now_micros, 0)
        } else {
            // Clock did not advance (or went backwards): stay on the
            // previous microsecond and bump the disambiguating counter.
            let c = self.mod_counter.fetch_add(1, Ordering::AcqRel) + 1;
            (prev, c)
        };

        let secs = (micros / 1_000_000) as i64;
        let usec = micros % 1_000_000;
        let dt = chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now);
        Csn(format!(
            "{}.{:06}Z#{:06}#{:03}#{:06}",
            dt.format("%Y%m%d%H%M%S"),
            usec,
            counter,
            self.replica_id,
            0,
        ))
    }
}

/// The authoritative, server-wide context CSN, plus an explicit dirty flag
/// used to force a checkpoint write-back on close without depending on the
/// checkpoint op counter reaching its threshold.
pub struct CsnClock {
    inner: Mutex<Csn>,
    dirty: std::sync::atomic::AtomicBool,
}

impl CsnClock {
    pub fn new(initial: Csn) -> Self {
        Self {
            inner: Mutex::new(initial),
            dirty: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Snapshot the current context CSN.
    pub fn get_context_csn(&self) -> Csn {
        self.inner.lock().clone()
    }

    /// Advance the context CSN to `max(current, c)`. Returns `true` if the
    /// stored CSN actually moved.
    pub fn advance(&self, c: &Csn) -> bool {
        let mut guard = self.inner.lock();
        if *c > *guard {
            *guard = c.clone();
            self.dirty.store(true, Ordering::Release);
            debug!(csn = %c, "context csn advanced");
            true
        } else {
            false
        }
    }

    pub fn compose_cookie(&self, rid: Rid) -> Cookie {
        Cookie::new(rid, self.get_context_csn())
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Called by the checkpoint writer after a successful write-back.
    pub fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Release);
    }
}
