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

//! Unconfirmed transactions cache updater.
//!
//! New transactions enter the cache through the spam throttle and the
//! stateful validation. Chain changes remove the confirmed transactions and
//! give back the ones of the undone blocks.

use super::{
    handlers::{StatefulValidator, TransactionStatusSink},
    throttle::SpamThrottle,
};
use crate::{
    base::{TimeSupplier, TransactionInfo},
    cache::{MemoryUtCache, UtCacheModifier},
    crypto::Hash,
    pipeline::ResultCode,
};
use std::{collections::HashSet, sync::Arc};

/// Origin of a transaction entering the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdateMode {
    /// Received from the network or submitted locally.
    New,
    /// Released by an undone block.
    Reverted,
}

/// Updates the unconfirmed transactions cache.
pub struct UtUpdater {
    cache: Arc<MemoryUtCache>,
    validator: Arc<dyn StatefulValidator>,
    status_sink: Arc<dyn TransactionStatusSink>,
    throttle: SpamThrottle,
    time_supplier: Arc<dyn TimeSupplier>,
}

impl UtUpdater {
    pub fn new(
        cache: Arc<MemoryUtCache>,
        validator: Arc<dyn StatefulValidator>,
        status_sink: Arc<dyn TransactionStatusSink>,
        throttle: SpamThrottle,
        time_supplier: Arc<dyn TimeSupplier>,
    ) -> Self {
        UtUpdater {
            cache,
            validator,
            status_sink,
            throttle,
            time_supplier,
        }
    }

    /// Adds new transactions, every rejection is reported to the status sink.
    /// Returns the number of added transactions.
    pub fn update_new(&self, infos: &[TransactionInfo]) -> usize {
        let mut modifier = self.cache.modifier();
        let added = infos
            .iter()
            .filter(|info| self.apply(&mut modifier, info, UpdateMode::New))
            .count();
        debug!("{} of {} new transactions added to the cache", added, infos.len());
        added
    }

    /// Applies a chain change: removes `confirmed` transactions and re-adds the
    /// `reverted` ones that were not confirmed again.
    pub fn update_chain(&self, confirmed: &[Hash], reverted: &[TransactionInfo]) {
        let mut modifier = self.cache.modifier();
        for hash in confirmed {
            modifier.remove(hash);
        }
        let confirmed: HashSet<&Hash> = confirmed.iter().collect();
        let readded = reverted
            .iter()
            .filter(|info| !confirmed.contains(&info.entity_hash))
            .filter(|info| self.apply(&mut modifier, info, UpdateMode::Reverted))
            .count();
        debug!(
            "chain update: {} confirmed, {} of {} reverted back in the cache",
            confirmed.len(),
            readded,
            reverted.len()
        );
    }

    fn apply(
        &self,
        modifier: &mut UtCacheModifier<'_>,
        info: &TransactionInfo,
        mode: UpdateMode,
    ) -> bool {
        if modifier.contains(&info.entity_hash) {
            return false;
        }
        if info.transaction.deadline <= (self.time_supplier)() {
            self.reject(info, ResultCode::Expired);
            return false;
        }
        if mode == UpdateMode::New && self.throttle.is_filtered(info, &**modifier) {
            self.reject(info, ResultCode::SpamThrottled);
            return false;
        }
        let result = self.validator.validate_transaction(info);
        if !result.is_success() {
            self.reject(info, result.code());
            return false;
        }
        if !modifier.add(info) {
            self.reject(info, ResultCode::CacheRejected);
            return false;
        }
        true
    }

    fn reject(&self, info: &TransactionInfo, code: ResultCode) {
        trace!("transaction {} rejected: {}", info.entity_hash, code);
        self.status_sink
            .notify(&info.entity_hash, &info.transaction, code);
    }
}
