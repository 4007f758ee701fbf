//! Pending sign-action cache (§4.2 `sign`, §9 "Pending sign-action
//! cache"): a per-reference, TTL-expiring record bridging `create` and
//! `sign` so the signer can rebuild the exact transaction it agreed to
//! fund without re-deriving anything from the (still unsigned, still
//! mutable) storage row.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::types::{OutPoint, OutputId, Satoshis, TransactionId, TxId, UserId};

#[derive(Debug, Clone)]
pub enum PendingVin {
    /// Resolvable to a source satoshis/locking-script pair, either one of
    /// our own output rows (`output_id` set) or a caller-supplied input
    /// BEEF entry (`output_id` absent).
    Known {
        outpoint: OutPoint,
        output_id: Option<OutputId>,
        locking_script: Vec<u8>,
        satoshis: Satoshis,
    },
    /// Caller-supplied input this daemon cannot resolve at all; the caller
    /// is solely responsible for its unlocking script and we cannot verify
    /// the amount it spends.
    Unknown { outpoint: OutPoint },
}

impl PendingVin {
    pub fn outpoint(&self) -> &OutPoint {
        match self {
            PendingVin::Known { outpoint, .. } => outpoint,
            PendingVin::Unknown { outpoint } => outpoint,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PendingVout {
    pub locking_script: Vec<u8>,
    pub satoshis: Satoshis,
    /// Non-change outputs' locking scripts are verified byte-for-byte
    /// against the signed transaction (§4.2 `sign`); change and
    /// commission outputs are not caller-supplied so are exempt.
    pub verify_locking_script: bool,
}

#[derive(Debug, Clone)]
pub struct PendingSignAction {
    pub user_id: UserId,
    pub transaction_id: TransactionId,
    pub version: u32,
    pub lock_time: u32,
    pub vins: Vec<PendingVin>,
    pub vouts: Vec<PendingVout>,
    pub is_no_send: bool,
    pub is_delayed: bool,
    pub commission_vout: Option<u32>,
}

struct Entry {
    action: PendingSignAction,
    inserted_at: Instant,
}

/// Reference keyed, TTL-expiring cache. Reads perform lazy expiry — an
/// entry older than `ttl` is treated as absent and removed on lookup —
/// matching §9's "arena with a monotonic sequence and a background
/// reaper" design without needing a dedicated reaper task for a map this
/// small; `reap_expired` is still exposed for a periodic sweep to bound
/// memory when callers never `sign` a `create`d action.
pub struct PendingSignCache {
    entries: DashMap<String, Entry>,
    ttl: Duration,
}

impl PendingSignCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn insert(&self, reference: String, action: PendingSignAction) {
        self.entries.insert(
            reference,
            Entry {
                action,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn take(&self, reference: &str) -> Option<PendingSignAction> {
        let (_, entry) = self.entries.remove(reference)?;
        if entry.inserted_at.elapsed() > self.ttl {
            None
        } else {
            Some(entry.action)
        }
    }

    pub fn reap_expired(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, e| e.inserted_at.elapsed() <= ttl);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(user_id: UserId, transaction_id: TransactionId) -> PendingSignAction {
        PendingSignAction {
            user_id,
            transaction_id,
            version: 1,
            lock_time: 0,
            vins: vec![],
            vouts: vec![],
            is_no_send: false,
            is_delayed: false,
            commission_vout: None,
        }
    }

    #[test]
    fn insert_then_take_returns_and_consumes() {
        let cache = PendingSignCache::new(Duration::from_secs(60));
        cache.insert("ref1".to_string(), sample(1, 1));
        assert!(cache.take("ref1").is_some());
        assert!(cache.take("ref1").is_none());
    }

    #[test]
    fn expired_entry_is_not_returned() {
        let cache = PendingSignCache::new(Duration::from_millis(1));
        cache.insert("ref1".to_string(), sample(1, 1));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.take("ref1").is_none());
    }

    #[test]
    fn reap_expired_drops_stale_entries_without_lookup() {
        let cache = PendingSignCache::new(Duration::from_millis(1));
        cache.insert("ref1".to_string(), sample(1, 1));
        std::thread::sleep(Duration::from_millis(5));
        cache.reap_expired();
        assert_eq!(cache.len(), 0);
    }
}
