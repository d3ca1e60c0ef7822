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

//! Per node interaction counters and banning.
//!
//! Every completed element attributable to a remote node is recorded here as
//! a success or a failure. Counters are grouped in time buckets so that old
//! interactions fall out of the window without keeping every event.

use super::NodeIdentity;
use crate::{base::Timestamp, config::BanningConfig};
use std::{
    collections::{HashMap, VecDeque},
    time::Duration,
};

/// Outcome of an interaction with a remote node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionOutcome {
    /// Input was valid.
    Success,
    /// Input was rejected but the node is not necessarily malicious.
    Failure,
    /// Input was malformed or invalid regardless of the chain state.
    BannableFailure,
}

/// Interaction counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InteractionCounters {
    pub num_successes: u64,
    pub num_failures: u64,
}

#[derive(Debug, Clone, Copy)]
struct InteractionsBucket {
    start: Timestamp,
    successes: u64,
    failures: u64,
    bannable_failures: u64,
}

#[derive(Debug, Default)]
struct NodeRecord {
    buckets: VecDeque<InteractionsBucket>,
    totals: InteractionCounters,
    banned_at: Option<Timestamp>,
}

impl NodeRecord {
    fn bucket_mut(&mut self, now: Timestamp, bucket_ms: u64) -> &mut InteractionsBucket {
        let start = Timestamp(now.millis() / bucket_ms * bucket_ms);
        let is_current = self.buckets.back().map_or(false, |bucket| bucket.start == start);
        if !is_current {
            self.buckets.push_back(InteractionsBucket {
                start,
                successes: 0,
                failures: 0,
                bannable_failures: 0,
            });
        }
        // A bucket has just been pushed when missing.
        let last = self.buckets.len() - 1;
        &mut self.buckets[last]
    }

    fn windowed(&self, window_start: Timestamp) -> (InteractionCounters, u64) {
        self.buckets
            .iter()
            .filter(|bucket| bucket.start >= window_start)
            .fold((InteractionCounters::default(), 0), |(mut counters, bannable), bucket| {
                counters.num_successes += bucket.successes;
                counters.num_failures += bucket.failures;
                (counters, bannable + bucket.bannable_failures)
            })
    }

    fn is_banned(&self, now: Timestamp, ban_duration: Duration) -> bool {
        self.banned_at
            .map_or(false, |banned_at| now < banned_at + ban_duration)
    }
}

/// Interactions of all the known remote nodes.
pub struct NodeInteractions {
    config: BanningConfig,
    nodes: HashMap<NodeIdentity, NodeRecord>,
}

impl NodeInteractions {
    pub fn new(config: BanningConfig) -> Self {
        NodeInteractions {
            config,
            nodes: HashMap::new(),
        }
    }

    /// Records an interaction outcome.
    /// Returns true if the node got banned because of it.
    pub fn record(
        &mut self,
        identity: &NodeIdentity,
        outcome: InteractionOutcome,
        now: Timestamp,
    ) -> bool {
        let bucket_ms = self.config.interactions_bucket_ms.max(1);
        let record = self.nodes.entry(identity.clone()).or_default();
        let bucket = record.bucket_mut(now, bucket_ms);
        match outcome {
            InteractionOutcome::Success => {
                bucket.successes += 1;
                record.totals.num_successes += 1;
                return false;
            }
            InteractionOutcome::Failure => bucket.failures += 1,
            InteractionOutcome::BannableFailure => {
                bucket.failures += 1;
                bucket.bannable_failures += 1;
            }
        }
        record.totals.num_failures += 1;

        if outcome != InteractionOutcome::BannableFailure || self.is_banned(identity, now) {
            return false;
        }
        let window_start = now - self.config.interactions_window();
        let (counters, bannable) = match self.nodes.get(identity) {
            Some(record) => record.windowed(window_start),
            None => return false,
        };
        let total = counters.num_successes + counters.num_failures;
        let failure_percent = if total == 0 {
            0
        } else {
            counters.num_failures * 100 / total
        };
        if bannable >= self.config.min_failures_for_ban as u64
            && failure_percent >= self.config.min_failure_percent_for_ban as u64
        {
            return self.ban(identity, now);
        }
        false
    }

    /// Bans a node.
    /// Returns false if the node is already banned or too many nodes are banned.
    pub fn ban(&mut self, identity: &NodeIdentity, now: Timestamp) -> bool {
        if self.is_banned(identity, now) {
            return false;
        }
        if self.num_banned(now) >= self.config.max_banned_nodes {
            warn!("cannot ban {}, too many banned nodes", identity);
            return false;
        }
        info!("banning node {}", identity);
        self.nodes.entry(identity.clone()).or_default().banned_at = Some(now);
        true
    }

    /// Returns true if the node is currently banned.
    pub fn is_banned(&self, identity: &NodeIdentity, now: Timestamp) -> bool {
        self.nodes
            .get(identity)
            .map_or(false, |record| record.is_banned(now, self.config.ban_duration()))
    }

    /// Number of currently banned nodes.
    pub fn num_banned(&self, now: Timestamp) -> usize {
        let ban_duration = self.config.ban_duration();
        self.nodes
            .values()
            .filter(|record| record.is_banned(now, ban_duration))
            .count()
    }

    /// Interaction counters within the window.
    pub fn interactions(&self, identity: &NodeIdentity, now: Timestamp) -> InteractionCounters {
        let window_start = now - self.config.interactions_window();
        self.nodes
            .get(identity)
            .map(|record| record.windowed(window_start).0)
            .unwrap_or_default()
    }

    /// Interaction counters since the node was first seen.
    pub fn totals(&self, identity: &NodeIdentity) -> InteractionCounters {
        self.nodes
            .get(identity)
            .map(|record| record.totals)
            .unwrap_or_default()
    }

    /// Number of tracked nodes.
    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    /// Drops expired buckets and bans, then the records left empty.
    pub fn prune(&mut self, now: Timestamp) {
        let window_start = now - self.config.interactions_window();
        let ban_duration = self.config.ban_duration();
        let bucket_ms = self.config.interactions_bucket_ms.max(1);
        self.nodes.retain(|identity, record| {
            while let Some(bucket) = record.buckets.front() {
                if bucket.start.millis() + bucket_ms > window_start.millis() {
                    break;
                }
                record.buckets.pop_front();
            }
            if record.banned_at.is_some() && !record.is_banned(now, ban_duration) {
                debug!("ban of {} expired", identity);
                record.banned_at = None;
            }
            !record.buckets.is_empty() || record.banned_at.is_some()
        });
    }
}
