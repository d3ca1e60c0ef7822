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

//! Unconfirmed transactions cache.
//!
//! Transactions are kept in insertion order: each accepted transaction gets a
//! monotonic id (starting from 1) that never gets reused.

use super::{log_sizes, MemoryCacheOptions};
use crate::{
    base::{
        lock::{PromotableGuard, ReaderGuard, WriterGuard},
        ReaderWriterLock, Timestamp, TransactionInfo,
    },
    crypto::{Hash, PublicKey, ShortHash},
};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    ops::Deref,
};

const CACHE_NAME: &str = "unconfirmed transactions";

/// Cache content, reachable only through a view or a modifier.
pub struct UtCacheData {
    options: MemoryCacheOptions,
    next_id: u64,
    /// Transactions by insertion id.
    entries: BTreeMap<u64, TransactionInfo>,
    /// Insertion id by transaction hash.
    ids: HashMap<Hash, u64>,
    /// Deadline index used by the prune.
    deadlines: BTreeSet<(Timestamp, Hash)>,
    /// Number of cached transactions per signer.
    counters: HashMap<PublicKey, usize>,
}

impl UtCacheData {
    fn new(options: MemoryCacheOptions) -> Self {
        UtCacheData {
            options,
            next_id: 1,
            entries: BTreeMap::new(),
            ids: HashMap::new(),
            deadlines: BTreeSet::new(),
            counters: HashMap::new(),
        }
    }

    /// Number of cached transactions.
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Max number of cached transactions.
    pub fn max_size(&self) -> usize {
        self.options.max_cache_size
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.ids.contains_key(hash)
    }

    /// Looks up a transaction by hash.
    pub fn find(&self, hash: &Hash) -> Option<&TransactionInfo> {
        self.ids.get(hash).and_then(|id| self.entries.get(id))
    }

    /// Insertion id of a cached transaction.
    pub fn id_of(&self, hash: &Hash) -> Option<u64> {
        self.ids.get(hash).copied()
    }

    /// Number of cached transactions submitted by `signer`.
    pub fn count(&self, signer: &PublicKey) -> usize {
        self.counters.get(signer).copied().unwrap_or_default()
    }

    /// Visits the cached transactions in insertion order until `func` returns false.
    pub fn for_each<F>(&self, mut func: F)
    where
        F: FnMut(&TransactionInfo) -> bool,
    {
        for info in self.entries.values() {
            if !func(info) {
                break;
            }
        }
    }

    /// Short hashes of all the cached transactions, in insertion order.
    pub fn short_hashes(&self) -> Vec<ShortHash> {
        self.entries
            .values()
            .map(|info| info.entity_hash.short_hash())
            .collect()
    }

    /// Transactions not known by a peer.
    ///
    /// Transactions paying less than `min_fee_multiplier` per byte are
    /// skipped. The response is filled in insertion order and stops as soon
    /// as the next transaction would exceed the max response size.
    pub fn unknown_transactions(
        &self,
        min_fee_multiplier: u64,
        known_short_hashes: &HashSet<ShortHash>,
    ) -> Vec<TransactionInfo> {
        let mut total_size = 0u64;
        let mut unknown = Vec::new();
        for info in self.entries.values() {
            if known_short_hashes.contains(&info.entity_hash.short_hash()) {
                continue;
            }
            let size = info.transaction.size();
            if info.transaction.max_fee < min_fee_multiplier.saturating_mul(size) {
                continue;
            }
            total_size += size;
            if total_size > self.options.max_response_size {
                break;
            }
            unknown.push(info.clone());
        }
        unknown
    }

    fn add(&mut self, info: &TransactionInfo) -> bool {
        if self.entries.len() >= self.options.max_cache_size || self.contains(&info.entity_hash) {
            return false;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.ids.insert(info.entity_hash, id);
        self.deadlines
            .insert((info.transaction.deadline, info.entity_hash));
        *self.counters.entry(info.transaction.signer).or_default() += 1;
        self.entries.insert(id, info.clone());
        true
    }

    fn remove(&mut self, hash: &Hash) -> Option<TransactionInfo> {
        let id = self.ids.remove(hash)?;
        let info = self.entries.remove(&id)?;
        self.deadlines.remove(&(info.transaction.deadline, *hash));
        let signer = info.transaction.signer;
        if let Some(count) = self.counters.get_mut(&signer) {
            *count -= 1;
            if *count == 0 {
                self.counters.remove(&signer);
            }
        }
        Some(info)
    }
}

/// Unconfirmed transactions cache.
pub struct MemoryUtCache {
    data: ReaderWriterLock<UtCacheData>,
}

impl MemoryUtCache {
    pub fn new(options: MemoryCacheOptions) -> Self {
        MemoryUtCache {
            data: ReaderWriterLock::new(UtCacheData::new(options)),
        }
    }

    /// Read only access.
    pub fn view(&self) -> UtCacheView<'_> {
        UtCacheView(self.data.acquire_reader())
    }

    /// Read access that can be turned into a modifier without giving up
    /// the lock in between.
    pub fn promotable_view(&self) -> PromotableUtCacheView<'_> {
        PromotableUtCacheView(self.data.acquire_promotable())
    }

    /// Write access.
    pub fn modifier(&self) -> UtCacheModifier<'_> {
        UtCacheModifier(self.data.acquire_writer())
    }
}

/// Read only access to the cache.
pub struct UtCacheView<'a>(ReaderGuard<'a, UtCacheData>);

impl<'a> Deref for UtCacheView<'a> {
    type Target = UtCacheData;

    fn deref(&self) -> &UtCacheData {
        &self.0
    }
}

/// Read access with write intent.
pub struct PromotableUtCacheView<'a>(PromotableGuard<'a, UtCacheData>);

impl<'a> PromotableUtCacheView<'a> {
    /// Waits for the other readers and turns the view into a modifier.
    pub fn promote(self) -> UtCacheModifier<'a> {
        UtCacheModifier(self.0.promote())
    }
}

impl<'a> Deref for PromotableUtCacheView<'a> {
    type Target = UtCacheData;

    fn deref(&self) -> &UtCacheData {
        &self.0
    }
}

/// Write access to the cache.
pub struct UtCacheModifier<'a>(WriterGuard<'a, UtCacheData>);

impl<'a> UtCacheModifier<'a> {
    /// Adds a transaction.
    /// Returns false if the transaction is already cached or the cache is full.
    pub fn add(&mut self, info: &TransactionInfo) -> bool {
        let old_size = self.0.size();
        let added = self.0.add(info);
        if added {
            log_sizes(CACHE_NAME, old_size, self.0.size(), self.0.max_size());
        }
        added
    }

    /// Removes a transaction by hash.
    pub fn remove(&mut self, hash: &Hash) -> Option<TransactionInfo> {
        self.0.remove(hash)
    }

    /// Removes all the transactions, returned in insertion order.
    pub fn remove_all(&mut self) -> Vec<TransactionInfo> {
        let data = &mut *self.0;
        data.ids.clear();
        data.deadlines.clear();
        data.counters.clear();
        std::mem::take(&mut data.entries).into_values().collect()
    }

    /// Removes all the transactions with a deadline at or before `timestamp`.
    pub fn prune(&mut self, timestamp: Timestamp) -> Vec<TransactionInfo> {
        let mut pruned = Vec::new();
        loop {
            let (deadline, hash) = match self.0.deadlines.iter().next().copied() {
                Some(oldest) if oldest.0 <= timestamp => oldest,
                _ => break,
            };
            match self.0.remove(&hash) {
                Some(info) => pruned.push(info),
                None => {
                    self.0.deadlines.remove(&(deadline, hash));
                }
            }
        }
        pruned
    }

    /// Removes all the transactions whose hash matches `predicate`.
    pub fn prune_matching<F>(&mut self, predicate: F) -> Vec<TransactionInfo>
    where
        F: Fn(&Hash) -> bool,
    {
        let matching: Vec<Hash> = self
            .0
            .entries
            .values()
            .map(|info| info.entity_hash)
            .filter(|hash| predicate(hash))
            .collect();
        matching
            .iter()
            .filter_map(|hash| self.0.remove(hash))
            .collect()
    }
}

impl<'a> Deref for UtCacheModifier<'a> {
    type Target = UtCacheData;

    fn deref(&self) -> &UtCacheData {
        &self.0
    }
}
