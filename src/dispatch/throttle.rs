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

//! Unconfirmed transactions spam throttle.
//!
//! When the unconfirmed cache fills up, every signer gets a share of the
//! free slots proportional to its importance, boosted by the offered fee.
//! The share shrinks exponentially with the cache fill level.

use super::handlers::ImportanceLookup;
use crate::{base::TransactionInfo, cache::ut_cache::UtCacheData, config::SpamThrottleConfig};
use std::sync::Arc;

/// Spam throttle admission filter.
#[derive(Clone)]
pub struct SpamThrottle {
    config: SpamThrottleConfig,
    importance: Arc<dyn ImportanceLookup>,
}

impl SpamThrottle {
    pub fn new(config: SpamThrottleConfig, importance: Arc<dyn ImportanceLookup>) -> Self {
        SpamThrottle { config, importance }
    }

    /// Returns true if the transaction shall not enter the cache.
    pub fn is_filtered(&self, info: &TransactionInfo, cache: &UtCacheData) -> bool {
        if !self.config.enabled {
            return false;
        }
        let size = cache.size();
        let max_size = cache.max_size();
        if size < self.config.max_block_transactions {
            return false;
        }
        if size >= max_size {
            return true;
        }

        let signer = &info.transaction.signer;
        let total_importance = self.config.total_importance as f64;
        let effective_importance =
            (self.importance)(signer) as f64 + self.boost(info.transaction.max_fee);
        let fill_level = size as f64 / max_size as f64;
        let free_slots = (max_size - size) as f64;
        let allowed = if total_importance > 0.0 {
            effective_importance / total_importance * (-3.0 * fill_level).exp() * 100.0 * free_slots
        } else {
            0.0
        };

        let filtered = cache.count(signer) as f64 >= allowed;
        if filtered {
            trace!(
                "throttled transaction {} of {} (allowed {:.2})",
                info.entity_hash,
                signer,
                allowed
            );
        }
        filtered
    }

    /// Importance boost granted by a fee.
    fn boost(&self, max_fee: u64) -> f64 {
        if self.config.max_boost_fee == 0 {
            return 0.0;
        }
        let fee = max_fee.min(self.config.max_boost_fee) as f64;
        self.config.total_importance as f64 * fee / self.config.max_boost_fee as f64
    }
}
