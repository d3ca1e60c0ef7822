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

//! Ingestion core configuration.
//!
//! Every section has sensible defaults, thus a configuration file only needs
//! to list the values that differ. Durations are expressed in milliseconds.

use crate::{Error, ErrorKind, Result};
use std::{path::Path, time::Duration};

/// Behavior of a dispatcher when its input queue has no free slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueFullPolicy {
    /// The element is rejected and the returned id is zero.
    Reject,
    /// The submitter waits for a free slot.
    Block,
    /// A full queue is considered a fatal node condition.
    Abort,
}

/// Pipeline dispatcher settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Max number of queued elements.
    pub queue_size: usize,
    /// An element trace is logged every `element_trace_interval` elements.
    pub element_trace_interval: u64,
    /// Queue overflow policy.
    pub full_policy: QueueFullPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig {
            queue_size: 4096,
            element_trace_interval: 1,
            full_policy: QueueFullPolicy::Reject,
        }
    }
}

/// Pending caches settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Max number of unconfirmed transactions.
    pub ut_max_entries: usize,
    /// Max number of partial transactions.
    pub pt_max_entries: usize,
    /// Max size in bytes of a reconciliation response.
    pub max_response_size: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            ut_max_entries: 50_000,
            pt_max_entries: 10_000,
            max_response_size: 5 * 1024 * 1024,
        }
    }
}

/// Short lived recent-hash cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HashCheckConfig {
    /// Retention of block hashes.
    pub block_duration_ms: u64,
    /// Retention of transaction hashes.
    pub transaction_duration_ms: u64,
    /// Min time between two prune passes.
    pub prune_interval_ms: u64,
    /// Max number of retained hashes.
    pub max_cache_size: usize,
}

impl HashCheckConfig {
    pub fn block_duration(&self) -> Duration {
        Duration::from_millis(self.block_duration_ms)
    }

    pub fn transaction_duration(&self) -> Duration {
        Duration::from_millis(self.transaction_duration_ms)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_millis(self.prune_interval_ms)
    }
}

impl Default for HashCheckConfig {
    fn default() -> Self {
        HashCheckConfig {
            block_duration_ms: 2 * 60 * 1000,
            transaction_duration_ms: 10 * 60 * 1000,
            prune_interval_ms: 90 * 1000,
            max_cache_size: 1_000_000,
        }
    }
}

/// Node reputation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BanningConfig {
    /// Min number of bannable failures within the window to ban a node.
    pub min_failures_for_ban: u32,
    /// Min percentage of failed interactions within the window to ban a node.
    pub min_failure_percent_for_ban: u8,
    /// Ban duration.
    pub ban_duration_ms: u64,
    /// Interactions older than this are forgotten.
    pub interactions_window_ms: u64,
    /// Granularity of the interactions counters.
    pub interactions_bucket_ms: u64,
    /// Max number of concurrently banned nodes.
    pub max_banned_nodes: usize,
}

impl BanningConfig {
    pub fn ban_duration(&self) -> Duration {
        Duration::from_millis(self.ban_duration_ms)
    }

    pub fn interactions_window(&self) -> Duration {
        Duration::from_millis(self.interactions_window_ms)
    }
}

impl Default for BanningConfig {
    fn default() -> Self {
        BanningConfig {
            min_failures_for_ban: 10,
            min_failure_percent_for_ban: 50,
            ban_duration_ms: 12 * 60 * 60 * 1000,
            interactions_window_ms: 24 * 60 * 60 * 1000,
            interactions_bucket_ms: 60 * 60 * 1000,
            max_banned_nodes: 5_000,
        }
    }
}

/// Unconfirmed transactions admission throttle settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpamThrottleConfig {
    /// Throttle switch.
    pub enabled: bool,
    /// Cache size under which no transaction is throttled.
    pub max_block_transactions: usize,
    /// Importance of the whole chain.
    pub total_importance: u64,
    /// Fee granting the max importance boost.
    pub max_boost_fee: u64,
}

impl Default for SpamThrottleConfig {
    fn default() -> Self {
        SpamThrottleConfig {
            enabled: true,
            max_block_transactions: 6_000,
            total_importance: 8_999_999_999,
            max_boost_fee: 10_000_000,
        }
    }
}

/// Chain synchronization settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Max number of blocks within a block element.
    pub max_blocks_per_sync_attempt: usize,
    /// Max distance of a block timestamp into the future.
    pub max_block_future_time_ms: u64,
    /// Max number of local blocks that can be rolled back.
    pub max_rollback_blocks: u64,
    /// Window used by the recent rollback counters.
    pub rollback_recent_window_ms: u64,
}

impl SyncConfig {
    pub fn max_block_future_time(&self) -> Duration {
        Duration::from_millis(self.max_block_future_time_ms)
    }

    pub fn rollback_recent_window(&self) -> Duration {
        Duration::from_millis(self.rollback_recent_window_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            max_blocks_per_sync_attempt: 400,
            max_block_future_time_ms: 300,
            max_rollback_blocks: 398,
            rollback_recent_window_ms: 3 * 60 * 60 * 1000,
        }
    }
}

/// Periodic tasks settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Transactions batch forwarding period.
    pub batch_interval_ms: u64,
    /// Harvest attempts period.
    pub harvest_interval_ms: u64,
    /// Caches and node interactions pruning period.
    pub prune_interval_ms: u64,
}

impl TaskConfig {
    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    pub fn harvest_interval(&self) -> Duration {
        Duration::from_millis(self.harvest_interval_ms)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_millis(self.prune_interval_ms)
    }
}

impl Default for TaskConfig {
    fn default() -> Self {
        TaskConfig {
            batch_interval_ms: 500,
            harvest_interval_ms: 1_000,
            prune_interval_ms: 60_000,
        }
    }
}

/// Ingestion core configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Blockchain network identifier.
    pub network: String,
    /// Block dispatcher.
    pub block_dispatcher: DispatcherConfig,
    /// Transaction dispatcher.
    pub transaction_dispatcher: DispatcherConfig,
    /// Pending caches.
    pub cache: CacheConfig,
    /// Recent hashes.
    pub hash_check: HashCheckConfig,
    /// Node reputation.
    pub banning: BanningConfig,
    /// Spam throttle.
    pub spam_throttle: SpamThrottleConfig,
    /// Chain synchronization.
    pub sync: SyncConfig,
    /// Periodic tasks.
    pub tasks: TaskConfig,
    /// Host prefixes of the trusted local networks. Nodes in these networks
    /// are never banned.
    pub local_networks: Vec<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            network: "skynet".to_owned(),
            block_dispatcher: DispatcherConfig {
                queue_size: 512,
                ..Default::default()
            },
            transaction_dispatcher: DispatcherConfig {
                queue_size: 16_384,
                element_trace_interval: 10,
                ..Default::default()
            },
            cache: CacheConfig::default(),
            hash_check: HashCheckConfig::default(),
            banning: BanningConfig::default(),
            spam_throttle: SpamThrottleConfig::default(),
            sync: SyncConfig::default(),
            tasks: TaskConfig::default(),
            local_networks: vec!["127.0.0.1".to_owned()],
        }
    }
}

impl NodeConfig {
    /// Parses and validates a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: NodeConfig = serde_json::from_str(json)
            .map_err(|err| Error::new_ext(ErrorKind::InvalidConfiguration, err))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a JSON configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())
            .map_err(|err| Error::new_ext(ErrorKind::InvalidConfiguration, err))?;
        Self::from_json(&json)
    }

    /// Checks values that would make a component unusable.
    pub fn validate(&self) -> Result<()> {
        let invalid =
            |msg: &str| Err(Error::new_ext(ErrorKind::InvalidConfiguration, msg.to_owned()));
        if self.block_dispatcher.queue_size == 0 || self.transaction_dispatcher.queue_size == 0 {
            return invalid("dispatcher queue size must be greater than zero");
        }
        if self.cache.ut_max_entries == 0 || self.cache.pt_max_entries == 0 {
            return invalid("cache size must be greater than zero");
        }
        if self.banning.interactions_bucket_ms == 0 {
            return invalid("interactions bucket duration must be greater than zero");
        }
        if self.banning.min_failure_percent_for_ban > 100 {
            return invalid("failure percent cannot exceed 100");
        }
        if self.spam_throttle.enabled
            && (self.spam_throttle.total_importance == 0 || self.spam_throttle.max_boost_fee == 0)
        {
            return invalid("spam throttle requires non zero importance and boost fee");
        }
        if self.tasks.batch_interval_ms == 0
            || self.tasks.harvest_interval_ms == 0
            || self.tasks.prune_interval_ms == 0
        {
            return invalid("task intervals must be greater than zero");
        }
        Ok(())
    }
}
