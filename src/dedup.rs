//! Broadcast deduplication: a time-bucketed Bloom filter backed by an
//! exact-match set, preventing the background broadcaster from
//! resubmitting a txid it already sent within the configured window
//! (§4.5). Adapted from this daemon's earlier dual-window network-message
//! deduplicator, generalized to many small buckets instead of two, so the
//! window slides smoothly rather than jumping in one large rotation.
//!
//! The Bloom filter alone is a fast negative lookup, not a correctness
//! mechanism: a false positive there must never cause a never-before-seen
//! item to be silently treated as a duplicate, so every "maybe present"
//! Bloom result is confirmed against the bucket's exact-match set before
//! anything is reported as a duplicate.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::config::DedupConfig;

/// Simple multi-hash Bloom filter, sized for one bucket's worth of items.
struct BloomFilter {
    bits: Vec<bool>,
    hash_count: usize,
    size: usize,
}

impl BloomFilter {
    fn new(approx_items: usize) -> Self {
        let size = (approx_items * 10).max(1024);
        Self {
            bits: vec![false; size],
            hash_count: 7,
            size,
        }
    }

    fn hash(&self, data: &[u8], seed: u32) -> u64 {
        const FNV_OFFSET: u64 = 0xcbf29ce484222325;
        const FNV_PRIME: u64 = 0x100000001b3;
        let mut hash = FNV_OFFSET ^ (seed as u64);
        for &byte in data {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        hash
    }

    fn contains(&self, item: &[u8]) -> bool {
        (0..self.hash_count).all(|i| self.bits[(self.hash(item, i as u32) as usize) % self.size])
    }

    fn insert(&mut self, item: &[u8]) {
        for i in 0..self.hash_count {
            let idx = (self.hash(item, i as u32) as usize) % self.size;
            self.bits[idx] = true;
        }
    }

    fn clear(&mut self) {
        self.bits.iter_mut().for_each(|b| *b = false);
    }
}

struct Bucket {
    filter: BloomFilter,
    exact: HashSet<Vec<u8>>,
    opened_at: Instant,
}

impl Bucket {
    fn new() -> Self {
        Self {
            filter: BloomFilter::new(256),
            exact: HashSet::new(),
            opened_at: Instant::now(),
        }
    }

    /// First check the Bloom bits (fast, no allocation on a miss); a
    /// "maybe present" is only ever a hint, confirmed here against the
    /// exact set so a hash collision in the Bloom filter can never count
    /// as a duplicate for an item this bucket has not actually seen.
    fn contains(&self, item: &[u8]) -> bool {
        self.filter.contains(item) && self.exact.contains(item)
    }

    fn insert(&mut self, item: &[u8]) {
        self.filter.insert(item);
        self.exact.insert(item.to_vec());
    }

    fn clear(&mut self) {
        self.filter.clear();
        self.exact.clear();
    }
}

/// Time-partitioned dedup map: `window_secs / bucket_secs` rotating
/// buckets, each covering `bucket_secs` of wall time. An item is
/// considered a duplicate if it appears in any live bucket.
pub struct DedupMap {
    buckets: RwLock<Vec<Bucket>>,
    bucket_len: Duration,
    bucket_count: usize,
    head: AtomicUsize,
}

impl DedupMap {
    pub fn new(config: &DedupConfig) -> Self {
        let bucket_len = Duration::from_secs(config.bucket_secs.max(1));
        let bucket_count = (config.window_secs.max(config.bucket_secs) / config.bucket_secs.max(1)).max(1) as usize;
        let buckets = (0..bucket_count).map(|_| Bucket::new()).collect();
        Self {
            buckets: RwLock::new(buckets),
            bucket_len,
            bucket_count,
            head: AtomicUsize::new(0),
        }
    }

    /// Returns true if `item` was already seen within the window; inserts
    /// it regardless (so the very next check also reports a duplicate).
    pub async fn check_and_insert(&self, item: &[u8]) -> bool {
        {
            let buckets = self.buckets.read().await;
            if buckets.iter().any(|b| b.contains(item)) {
                return true;
            }
        }

        self.maybe_rotate().await;

        let mut buckets = self.buckets.write().await;
        // Double-checked: another writer may have inserted this exact item
        // while we waited for the write lock.
        if buckets.iter().any(|b| b.contains(item)) {
            return true;
        }
        let head = self.head.load(Ordering::Acquire);
        buckets[head].insert(item);
        false
    }

    async fn maybe_rotate(&self) {
        let head = self.head.load(Ordering::Acquire);
        let needs_rotation = {
            let buckets = self.buckets.read().await;
            buckets[head].opened_at.elapsed() >= self.bucket_len
        };
        if !needs_rotation {
            return;
        }

        let mut buckets = self.buckets.write().await;
        if buckets[head].opened_at.elapsed() < self.bucket_len {
            return; // lost the race, someone else already rotated
        }
        let next = (head + 1) % self.bucket_count;
        buckets[next].clear();
        buckets[next].opened_at = Instant::now();
        self.head.store(next, Ordering::Release);
    }

    pub async fn reset(&self) {
        let mut buckets = self.buckets.write().await;
        for bucket in buckets.iter_mut() {
            bucket.clear();
            bucket.opened_at = Instant::now();
        }
        self.head.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> DedupConfig {
        DedupConfig {
            window_secs: 3,
            bucket_secs: 1,
        }
    }

    #[tokio::test]
    async fn first_seen_is_not_a_duplicate_second_is() {
        let map = DedupMap::new(&test_config());
        assert!(!map.check_and_insert(b"tx1").await);
        assert!(map.check_and_insert(b"tx1").await);
    }

    #[test]
    fn bloom_maybe_present_without_an_exact_match_is_not_a_duplicate() {
        // Simulates a Bloom false positive: the bits say "maybe present"
        // (because we set them directly) but the item was never actually
        // inserted into this bucket's exact-match set.
        let mut bucket = Bucket::new();
        bucket.filter.insert(b"never-really-inserted");
        assert!(!bucket.contains(b"never-really-inserted"));
    }

    #[tokio::test]
    async fn distinct_items_do_not_collide() {
        let map = DedupMap::new(&test_config());
        assert!(!map.check_and_insert(b"tx1").await);
        assert!(!map.check_and_insert(b"tx2").await);
    }

    #[tokio::test]
    async fn item_expires_once_its_bucket_rotates_out_of_the_window() {
        let map = DedupMap::new(&DedupConfig {
            window_secs: 2,
            bucket_secs: 1,
        });
        assert!(!map.check_and_insert(b"tx1").await);
        tokio::time::sleep(Duration::from_millis(1100)).await;
        map.maybe_rotate().await;
        tokio::time::sleep(Duration::from_millis(1100)).await;
        map.maybe_rotate().await;
        tokio::time::sleep(Duration::from_millis(1100)).await;
        map.maybe_rotate().await;
        assert!(!map.check_and_insert(b"tx1").await);
    }
}
