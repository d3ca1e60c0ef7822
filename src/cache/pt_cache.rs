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

//! Partial (multi-signature) transactions cache.
//!
//! A partial transaction stays here while collecting cosignatures. The
//! cosignatures of each entry are kept sorted by signer, thus two nodes that
//! received the same set in a different order compute the same cosignatures
//! hash and can reconcile through short hash pairs.

use super::{log_sizes, MemoryCacheOptions};
use crate::{
    base::{
        lock::{ReaderGuard, WriterGuard},
        Cosignature, CosignedTransactionInfo, ReaderWriterLock, Timestamp, Transaction,
        TransactionInfo,
    },
    crypto::{Hash, Hashable, PublicKey, ShortHash, ShortHashPair},
};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    ops::Deref,
    sync::Arc,
};

const CACHE_NAME: &str = "partial transactions";

/// Partial transaction with its cosignatures.
#[derive(Debug, Clone)]
pub struct PtEntry {
    info: TransactionInfo,
    cosignatures: Vec<Cosignature>,
    cosignatures_hash: Hash,
}

impl PtEntry {
    fn new(info: TransactionInfo) -> Self {
        PtEntry {
            info,
            cosignatures: Vec::new(),
            cosignatures_hash: Hash::default(),
        }
    }

    /// Partial transaction.
    pub fn transaction(&self) -> &Arc<Transaction> {
        &self.info.transaction
    }

    /// Partial transaction paired with its hash.
    pub fn info(&self) -> &TransactionInfo {
        &self.info
    }

    /// Cosignatures sorted by signer.
    pub fn cosignatures(&self) -> &[Cosignature] {
        &self.cosignatures
    }

    /// Hash of the sorted cosignatures, zero when there are none.
    pub fn cosignatures_hash(&self) -> &Hash {
        &self.cosignatures_hash
    }

    /// Returns true if `signer` already cosigned the transaction.
    pub fn has_cosigner(&self, signer: &PublicKey) -> bool {
        self.cosignatures.iter().any(|cosig| cosig.signer == *signer)
    }

    fn short_hash_pair(&self) -> ShortHashPair {
        ShortHashPair {
            transaction: self.info.entity_hash.short_hash(),
            cosignatures: self.cosignatures_hash.short_hash(),
        }
    }

    fn add(&mut self, cosignature: &Cosignature) -> bool {
        let pos = match self
            .cosignatures
            .binary_search_by(|cosig| cosig.signer.cmp(&cosignature.signer))
        {
            Ok(_) => return false,
            Err(pos) => pos,
        };
        self.cosignatures.insert(pos, cosignature.clone());
        self.cosignatures_hash = self.cosignatures.primary_hash();
        true
    }
}

/// Cache content, reachable only through a view or a modifier.
pub struct PtCacheData {
    options: MemoryCacheOptions,
    next_id: u64,
    /// Partial transactions by insertion id.
    entries: BTreeMap<u64, PtEntry>,
    /// Insertion id by transaction hash.
    ids: HashMap<Hash, u64>,
    /// Deadline index used by the prune.
    deadlines: BTreeSet<(Timestamp, Hash)>,
}

impl PtCacheData {
    fn new(options: MemoryCacheOptions) -> Self {
        PtCacheData {
            options,
            next_id: 1,
            entries: BTreeMap::new(),
            ids: HashMap::new(),
            deadlines: BTreeSet::new(),
        }
    }

    /// Number of cached partial transactions.
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Max number of cached partial transactions.
    pub fn max_size(&self) -> usize {
        self.options.max_cache_size
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.ids.contains_key(hash)
    }

    /// Looks up a partial transaction, bundled with its cosignatures.
    pub fn find(&self, hash: &Hash) -> Option<&PtEntry> {
        self.ids.get(hash).and_then(|id| self.entries.get(id))
    }

    /// Insertion id of a cached partial transaction.
    pub fn id_of(&self, hash: &Hash) -> Option<u64> {
        self.ids.get(hash).copied()
    }

    /// Short hash pairs of all the cached partial transactions, in insertion order.
    pub fn short_hash_pairs(&self) -> Vec<ShortHashPair> {
        self.entries.values().map(PtEntry::short_hash_pair).collect()
    }

    /// Partial transactions data not known by a peer.
    ///
    /// `known_pairs` maps a transaction short hash to the cosignatures short
    /// hash known by the peer. The full transaction is returned only when it
    /// is unknown, only the cosignatures when the peer knows a different set.
    /// Transactions expiring before `min_deadline` are skipped. Entries are
    /// visited in insertion order until the response size is exhausted.
    pub fn unknown_transactions(
        &self,
        min_deadline: Timestamp,
        known_pairs: &HashMap<ShortHash, ShortHash>,
    ) -> Vec<CosignedTransactionInfo> {
        let mut total_size = 0u64;
        let mut unknown = Vec::new();
        for entry in self.entries.values() {
            let pair = entry.short_hash_pair();
            let known_cosignatures = known_pairs.get(&pair.transaction);
            if known_cosignatures == Some(&pair.cosignatures) {
                continue;
            }
            if entry.transaction().deadline < min_deadline {
                continue;
            }

            let mut entry_size = entry.info.entity_hash.to_bytes().len() as u64
                + entry.cosignatures.iter().map(Cosignature::size).sum::<u64>();
            let transaction = match known_cosignatures {
                Some(_) => None,
                None => {
                    entry_size += entry.transaction().size();
                    Some(entry.transaction().clone())
                }
            };
            total_size += entry_size;
            if total_size > self.options.max_response_size {
                break;
            }
            unknown.push(CosignedTransactionInfo {
                entity_hash: entry.info.entity_hash,
                transaction,
                cosignatures: entry.cosignatures.clone(),
            });
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
        self.entries.insert(id, PtEntry::new(info.clone()));
        true
    }

    fn find_mut(&mut self, hash: &Hash) -> Option<&mut PtEntry> {
        let id = self.ids.get(hash)?;
        self.entries.get_mut(id)
    }

    fn remove(&mut self, hash: &Hash) -> Option<TransactionInfo> {
        let id = self.ids.remove(hash)?;
        let entry = self.entries.remove(&id)?;
        self.deadlines
            .remove(&(entry.transaction().deadline, *hash));
        Some(entry.info)
    }
}

/// Partial transactions cache.
pub struct MemoryPtCache {
    data: ReaderWriterLock<PtCacheData>,
}

impl MemoryPtCache {
    pub fn new(options: MemoryCacheOptions) -> Self {
        MemoryPtCache {
            data: ReaderWriterLock::new(PtCacheData::new(options)),
        }
    }

    /// Read only access.
    pub fn view(&self) -> PtCacheView<'_> {
        PtCacheView(self.data.acquire_reader())
    }

    /// Write access.
    pub fn modifier(&self) -> PtCacheModifier<'_> {
        PtCacheModifier(self.data.acquire_writer())
    }
}

/// Read only access to the cache.
pub struct PtCacheView<'a>(ReaderGuard<'a, PtCacheData>);

impl<'a> Deref for PtCacheView<'a> {
    type Target = PtCacheData;

    fn deref(&self) -> &PtCacheData {
        &self.0
    }
}

/// Write access to the cache.
pub struct PtCacheModifier<'a>(WriterGuard<'a, PtCacheData>);

impl<'a> PtCacheModifier<'a> {
    /// Adds a partial transaction without cosignatures.
    /// Returns false if the transaction is already cached or the cache is full.
    pub fn add(&mut self, info: &TransactionInfo) -> bool {
        let old_size = self.0.size();
        let added = self.0.add(info);
        if added {
            log_sizes(CACHE_NAME, old_size, self.0.size(), self.0.max_size());
        }
        added
    }

    /// Attaches a cosignature to a cached partial transaction.
    ///
    /// Returns the parent transaction when the cosignature was added, `None`
    /// if the parent is unknown or the signer already cosigned it.
    /// The capacity limit does not apply, otherwise partial transactions could
    /// never complete while the cache is full.
    pub fn add_cosignature(
        &mut self,
        parent_hash: &Hash,
        cosignature: &Cosignature,
    ) -> Option<TransactionInfo> {
        let entry = self.0.find_mut(parent_hash)?;
        if !entry.add(cosignature) {
            return None;
        }
        Some(entry.info.clone())
    }

    /// Removes a partial transaction by hash.
    pub fn remove(&mut self, hash: &Hash) -> Option<TransactionInfo> {
        self.0.remove(hash)
    }

    /// Removes all the partial transactions with a deadline at or before
    /// `timestamp`.
    pub fn prune(&mut self, timestamp: Timestamp) -> Vec<TransactionInfo> {
        let data = &mut *self.0;
        let expired: Vec<Hash> = data
            .deadlines
            .iter()
            .take_while(|(deadline, _)| *deadline <= timestamp)
            .map(|(_, hash)| *hash)
            .collect();
        expired.iter().filter_map(|hash| data.remove(hash)).collect()
    }

    /// Removes all the partial transactions whose hash matches `predicate`.
    pub fn prune_matching<F>(&mut self, predicate: F) -> Vec<TransactionInfo>
    where
        F: Fn(&Hash) -> bool,
    {
        let data = &mut *self.0;
        let matching: Vec<Hash> = data
            .entries
            .values()
            .map(|entry| entry.info.entity_hash)
            .filter(|hash| predicate(hash))
            .collect();
        matching.iter().filter_map(|hash| data.remove(hash)).collect()
    }
}

impl<'a> Deref for PtCacheModifier<'a> {
    type Target = PtCacheData;

    fn deref(&self) -> &PtCacheData {
        &self.0
    }
}
