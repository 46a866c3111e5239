//! Per-identity submission locks.
//!
//! The router chain rejects a tx whose sequence is not the account's next
//! one, so at most one submission per identity may be in flight. Locks are
//! keyed by router address; unrelated identities submit in parallel.

use crate::key_store::SigningIdentity;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// No sequence observed yet.
const UNKNOWN_SEQUENCE: u64 = u64::MAX;

/// Lock state for one identity.
pub struct LockSlot {
    submit_lock: Arc<AsyncMutex<()>>,
    /// Waiting + running submissions.
    in_flight: AtomicU32,
    /// Last sequence used for a broadcast. Advisory only; the chain's value wins.
    last_sequence: AtomicU64,
    submissions: AtomicU64,
}

impl LockSlot {
    fn new() -> Self {
        Self {
            submit_lock: Arc::new(AsyncMutex::new(())),
            in_flight: AtomicU32::new(0),
            last_sequence: AtomicU64::new(UNKNOWN_SEQUENCE),
            submissions: AtomicU64::new(0),
        }
    }
}

/// Counts a waiting or running submission until dropped, so a caller
/// cancelled while queued doesn't leak the count.
struct InFlight(Arc<LockSlot>);

impl InFlight {
    fn enter(slot: Arc<LockSlot>) -> Self {
        slot.in_flight.fetch_add(1, Ordering::Relaxed);
        Self(slot)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

/// RAII guard from [`SubmitLocks::acquire`]. Holding it grants exclusive use
/// of the identity's router-chain sequence; dropping it (on any exit path,
/// unwinding included) releases the lock.
pub struct SubmitGuard {
    _permit: OwnedMutexGuard<()>,
    slot: InFlight,
    key: String,
}

impl SubmitGuard {
    /// Router address this guard serializes.
    pub fn identity_key(&self) -> &str {
        &self.key
    }

    pub fn holds(&self, identity: &SigningIdentity) -> bool {
        self.key == identity.router_address()
    }

    /// Sequence used by the previous submission, if any.
    pub fn last_sequence(&self) -> Option<u64> {
        match self.slot.0.last_sequence.load(Ordering::Acquire) {
            UNKNOWN_SEQUENCE => None,
            seq => Some(seq),
        }
    }

    pub fn record_sequence(&self, sequence: u64) {
        self.slot.0.last_sequence.store(sequence, Ordering::Release);
        self.slot.0.submissions.fetch_add(1, Ordering::Relaxed);
    }
}

impl Drop for SubmitGuard {
    fn drop(&mut self) {
        debug!(router_address = %self.key, "Submission lock released");
    }
}

/// Concurrency-safe map from identity to its lock.
#[derive(Default)]
pub struct SubmitLocks {
    slots: RwLock<HashMap<String, Arc<LockSlot>>>,
}

impl SubmitLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate one lock per identity.
    pub fn with_identities<'a>(identities: impl IntoIterator<Item = &'a SigningIdentity>) -> Self {
        let locks = Self::new();
        for identity in identities {
            locks.slot(identity.router_address());
        }
        locks
    }

    /// Get or lazily create the slot. Runs before, never inside, the
    /// critical section the slot protects.
    fn slot(&self, key: &str) -> Arc<LockSlot> {
        if let Some(slot) = self
            .slots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
        {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            slots
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(LockSlot::new())),
        )
    }

    /// Wait for exclusive ownership of `identity`'s sequence.
    pub async fn acquire(&self, identity: &SigningIdentity) -> SubmitGuard {
        let key = identity.router_address().to_string();
        let slot = InFlight::enter(self.slot(&key));
        let permit = Arc::clone(&slot.0.submit_lock).lock_owned().await;
        debug!(router_address = %key, "Submission lock acquired");
        SubmitGuard {
            _permit: permit,
            slot,
            key,
        }
    }

    /// Run `f` with `identity`'s guard. The lock is released when the
    /// future `f` returns finishes, fails, panics or is dropped.
    pub async fn with_lock<F, Fut, T>(&self, identity: &SigningIdentity, f: F) -> T
    where
        F: FnOnce(SubmitGuard) -> Fut,
        Fut: Future<Output = T>,
    {
        let guard = self.acquire(identity).await;
        f(guard).await
    }

    // --- Diagnostics ---

    pub fn identity_count(&self) -> usize {
        self.slots.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn total_in_flight(&self) -> u32 {
        self.slots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|s| s.in_flight.load(Ordering::Relaxed))
            .sum()
    }

    pub fn total_submissions(&self) -> u64 {
        self.slots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|s| s.submissions.load(Ordering::Relaxed))
            .sum()
    }
}
