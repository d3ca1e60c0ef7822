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

//! Pending entities caches.
//!
//! Both the unconfirmed transactions cache and the partial transactions cache
//! are bounded, deduplicated by content hash and guarded by a
//! [ReaderWriterLock](crate::base::ReaderWriterLock). Reads go through a
//! `view()`, writes through a `modifier()`. Entries leave a cache only when
//! explicitly removed or pruned.

pub mod hash_cache;
pub mod pt_cache;
pub mod ut_cache;

pub use hash_cache::{HashCheckOptions, RecentHashCache};
pub use pt_cache::{MemoryPtCache, PtCacheModifier, PtCacheView};
pub use ut_cache::{MemoryUtCache, PromotableUtCacheView, UtCacheModifier, UtCacheView};

use crate::config::CacheConfig;

/// Memory cache options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryCacheOptions {
    /// Max size in bytes of a reconciliation response.
    pub max_response_size: u64,
    /// Max number of cached entries.
    pub max_cache_size: usize,
}

impl MemoryCacheOptions {
    pub fn new(max_response_size: u64, max_cache_size: usize) -> Self {
        MemoryCacheOptions {
            max_response_size,
            max_cache_size,
        }
    }

    /// Unconfirmed transactions cache options.
    pub fn unconfirmed(config: &CacheConfig) -> Self {
        Self::new(config.max_response_size, config.ut_max_entries)
    }

    /// Partial transactions cache options.
    pub fn partial(config: &CacheConfig) -> Self {
        Self::new(config.max_response_size, config.pt_max_entries)
    }
}

/// Logs when a cache size crosses the half capacity or the full capacity
/// thresholds.
pub(crate) fn log_sizes(name: &str, old_size: usize, new_size: usize, max_size: usize) {
    let half_size = max_size / 2;
    if old_size < max_size && new_size >= max_size {
        warn!("{} cache is full ({} entries)", name, new_size);
    } else if old_size < half_size && new_size >= half_size {
        info!("{} cache is half full ({}/{} entries)", name, new_size, max_size);
    }
}
