// This file is part of TRINCI.
//
// Copyright (C) 2021 Affidaty Spa.
//
// TRINCI is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the
// Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// TRINCI is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License
// for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with TRINCI. If not, see <https://www.gnu.org/licenses/>.

//! Short lived cache of recently seen entity hashes.
//!
//! Used by the hash check stages to cheaply drop entities that were already
//! received a moment ago. A hash seen again refreshes its timestamp.

use crate::{
    base::{ReaderWriterLock, TimeSupplier, Timestamp},
    config::HashCheckConfig,
    crypto::Hash,
};
use std::{collections::HashMap, sync::Arc, time::Duration};

/// Recent hash cache options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashCheckOptions {
    /// A hash is retained for this long after it was last seen.
    pub cache_duration: Duration,
    /// Min time between two prunes.
    pub prune_interval: Duration,
    /// Max number of retained hashes.
    pub max_cache_size: usize,
}

impl HashCheckOptions {
    pub fn new(cache_duration: Duration, prune_interval: Duration, max_cache_size: usize) -> Self {
        HashCheckOptions {
            cache_duration,
            prune_interval,
            max_cache_size,
        }
    }

    /// Options for the block hashes cache.
    pub fn for_blocks(config: &HashCheckConfig) -> Self {
        Self::new(config.block_duration(), config.prune_interval(), config.max_cache_size)
    }

    /// Options for the transaction hashes cache.
    pub fn for_transactions(config: &HashCheckConfig) -> Self {
        Self::new(
            config.transaction_duration(),
            config.prune_interval(),
            config.max_cache_size,
        )
    }
}

struct RecentHashData {
    hashes: HashMap<Hash, Timestamp>,
    last_prune: Timestamp,
}

/// Time windowed set of hashes.
pub struct RecentHashCache {
    options: HashCheckOptions,
    time_supplier: Arc<dyn TimeSupplier>,
    data: ReaderWriterLock<RecentHashData>,
}

impl RecentHashCache {
    pub fn new(time_supplier: Arc<dyn TimeSupplier>, options: HashCheckOptions) -> Self {
        let last_prune = time_supplier();
        RecentHashCache {
            options,
            time_supplier,
            data: ReaderWriterLock::new(RecentHashData {
                hashes: HashMap::new(),
                last_prune,
            }),
        }
    }

    /// Number of retained hashes.
    pub fn size(&self) -> usize {
        self.data.acquire_reader().hashes.len()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.data.acquire_reader().hashes.contains_key(hash)
    }

    /// Records a hash.
    ///
    /// Returns true if the hash was unknown. A known hash gets its time
    /// refreshed. An unknown hash is not retained when the cache is full,
    /// the caller still sees it as unknown.
    pub fn add(&self, hash: &Hash) -> bool {
        let now = (self.time_supplier)();
        let mut data = self.data.acquire_writer();
        let known = match data.hashes.get_mut(hash) {
            Some(timestamp) => {
                *timestamp = now;
                true
            }
            None => false,
        };
        self.prune_if_due(&mut data, now);

        if known {
            return false;
        }
        if data.hashes.len() < self.options.max_cache_size {
            data.hashes.insert(*hash, now);
        }
        true
    }

    fn prune_if_due(&self, data: &mut RecentHashData, now: Timestamp) {
        if now.since(data.last_prune) < self.options.prune_interval {
            return;
        }
        let duration = self.options.cache_duration;
        let old_size = data.hashes.len();
        data.hashes
            .retain(|_, timestamp| now.since(*timestamp) <= duration);
        data.last_prune = now;
        trace!("pruned {} recent hashes", old_size - data.hashes.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::schema::tests::create_test_tx_info;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DEFAULT_OPTIONS: HashCheckOptions = HashCheckOptions {
        cache_duration: Duration::from_secs(600),
        prune_interval: Duration::from_secs(60),
        max_cache_size: 1_000,
    };

    /// Supplies the given times (in seconds) in sequence, repeating the last one.
    fn create_time_supplier(times: &[u64]) -> Arc<dyn TimeSupplier> {
        let times = times.to_vec();
        let index = AtomicUsize::new(0);
        Arc::new(move || {
            let i = index.fetch_add(1, Ordering::SeqCst).min(times.len() - 1);
            Timestamp(times[i] * 1000)
        })
    }

    fn create_hashes(count: u32) -> Vec<Hash> {
        (0..count).map(|i| create_test_tx_info(i).entity_hash).collect()
    }

    #[test]
    fn add_unknown_hashes() {
        let cache = RecentHashCache::new(create_time_supplier(&[1]), DEFAULT_OPTIONS);
        let hashes = create_hashes(5);

        let results: Vec<_> = hashes.iter().map(|hash| cache.add(hash)).collect();

        assert!(results.iter().all(|res| *res));
        assert_eq!(cache.size(), 5);
        assert!(hashes.iter().all(|hash| cache.contains(hash)));
    }

    #[test]
    fn known_hash_is_not_added() {
        let cache = RecentHashCache::new(create_time_supplier(&[1]), DEFAULT_OPTIONS);
        let hash = create_hashes(1)[0];
        cache.add(&hash);

        let result = cache.add(&hash);

        assert!(!result);
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn hash_is_kept_at_cache_duration() {
        let cache = RecentHashCache::new(create_time_supplier(&[10, 11, 611]), DEFAULT_OPTIONS);
        let hashes = create_hashes(2);

        cache.add(&hashes[0]);
        cache.add(&hashes[1]);

        assert_eq!(cache.size(), 2);
        assert!(cache.contains(&hashes[0]));
    }

    #[test]
    fn hash_is_evicted_after_cache_duration() {
        let cache = RecentHashCache::new(create_time_supplier(&[10, 11, 612]), DEFAULT_OPTIONS);
        let hashes = create_hashes(2);

        cache.add(&hashes[0]);
        cache.add(&hashes[1]);

        assert_eq!(cache.size(), 1);
        assert!(!cache.contains(&hashes[0]));
        assert!(cache.contains(&hashes[1]));
    }

    #[test]
    fn seen_hash_refreshes_its_time() {
        let cache = RecentHashCache::new(create_time_supplier(&[10, 11, 612]), DEFAULT_OPTIONS);
        let hash = create_hashes(1)[0];

        let first = cache.add(&hash);
        let second = cache.add(&hash);

        assert!(first);
        assert!(!second);
        assert!(cache.contains(&hash));
    }

    #[test]
    fn prune_is_not_repeated_within_interval() {
        let cache =
            RecentHashCache::new(create_time_supplier(&[10, 11, 553, 612]), DEFAULT_OPTIONS);
        let hashes = create_hashes(2);

        cache.add(&hashes[0]);
        cache.add(&hashes[1]);
        cache.add(&hashes[1]);

        assert_eq!(cache.size(), 2);
        assert!(cache.contains(&hashes[0]));
    }

    #[test]
    fn full_cache_does_not_retain_unknown_hash() {
        let options = HashCheckOptions::new(Duration::from_secs(600), Duration::from_secs(60), 2);
        let cache = RecentHashCache::new(create_time_supplier(&[10, 11, 12, 13]), options);
        let hashes = create_hashes(3);
        cache.add(&hashes[0]);
        cache.add(&hashes[1]);

        let result = cache.add(&hashes[2]);

        assert!(result);
        assert_eq!(cache.size(), 2);
        assert!(!cache.contains(&hashes[2]));
    }

    #[test]
    fn concurrent_adds_and_lookups() {
        let cache = Arc::new(RecentHashCache::new(create_time_supplier(&[1]), DEFAULT_OPTIONS));
        let hashes = Arc::new(create_hashes(40));

        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let cache = cache.clone();
                let hashes = hashes.clone();
                std::thread::spawn(move || {
                    hashes
                        .iter()
                        .skip(worker * 10)
                        .take(10)
                        .filter(|hash| cache.add(hash) && cache.contains(hash))
                        .count()
                })
            })
            .collect();
        let added: usize = workers.into_iter().map(|worker| worker.join().unwrap()).sum();

        assert_eq!(added, 40);
        assert_eq!(cache.size(), 40);
    }
}
