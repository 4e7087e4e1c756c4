//! Checkpointing: periodically write the in-memory context CSN back
//! to the suffix entry's `contextCSN` operational attribute.

use super::csn::CsnClock;
use super::store::EntryStore;
use super::types::Ndn;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

struct State {
    ops_since: u64,
    last_checkpoint: Instant,
}

/// Thresholds and counters the write hook consults after every committed
/// write: an op count since the last checkpoint, and a wall-clock deadline.
pub struct CheckpointPolicy {
    ops_threshold: u64,
    time_threshold: Duration,
    state: Mutex<State>,
}

impl CheckpointPolicy {
    pub fn new(ops_threshold: u64, time_threshold: Duration) -> Self {
        Self {
            ops_threshold,
            time_threshold,
            state: Mutex::new(State {
                ops_since: 0,
                last_checkpoint: Instant::now(),
            }),
        }
    }

    /// Record one committed write. Returns whether either threshold is now
    /// exceeded and a checkpoint should be attempted.
    pub fn note_write(&self) -> bool {
        let mut s = self.state.lock();
        s.ops_since += 1;
        s.ops_since >= self.ops_threshold || s.last_checkpoint.elapsed() >= self.time_threshold
    }

    fn reset(&self) {
        let mut s = self.state.lock();
        s.ops_since = 0;
        s.last_checkpoint = Instant::now();
    }

    #[cfg(test)]
    fn ops_since(&self) -> u64 {
        self.state.lock().ops_since
    }
}

/// Attempt a write-back if the clock is dirty. Failures are logged and
/// non-fatal: the in-memory CSN stays authoritative and the
/// next due checkpoint retries implicitly.
pub async fn run_checkpoint(
    policy: &CheckpointPolicy,
    clock: &CsnClock,
    store: &dyn EntryStore,
    suffix_dn: &Ndn,
) {
    if !clock.is_dirty() {
        policy.reset();
        return;
    }
    let csn = clock.get_context_csn();
    match store.checkpoint_write_back(suffix_dn, &csn).await {
        Ok(()) => {
            clock.clear_dirty();
            policy.reset();
            info!(csn = %csn, "checkpoint written back");
        }
        Err(e) => {
            warn!(error = %e, "checkpoint write-back failed, will retry");
        }
    }
}
