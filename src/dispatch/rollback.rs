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

//! Rollback bookkeeping.
//!
//! The chain sync stage counts the local blocks undone by an element. The
//! pending count is then either committed, when the new chain part is
//! accepted, or ignored when it is rejected.

use crate::base::{TimeSupplier, Timestamp};
use std::{collections::VecDeque, sync::Arc, time::Duration};

/// Fate of the undone blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackResult {
    /// The rollback was applied to the local chain.
    Committed,
    /// The rollback was discarded.
    Ignored,
}

/// Counting period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackCounterType {
    /// Since startup.
    All,
    /// Within the recent window.
    Recent,
}

/// Rollback counters snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollbackCounters {
    pub committed_all: usize,
    pub committed_recent: usize,
    pub ignored_all: usize,
    pub ignored_recent: usize,
}

#[derive(Default)]
struct RollbackHistory {
    total: usize,
    events: VecDeque<(Timestamp, usize)>,
}

impl RollbackHistory {
    fn add(&mut self, now: Timestamp, count: usize) {
        self.total += count;
        self.events.push_back((now, count));
    }

    fn prune(&mut self, window_start: Timestamp) {
        while let Some((timestamp, _)) = self.events.front() {
            if *timestamp >= window_start {
                break;
            }
            self.events.pop_front();
        }
    }

    fn recent(&self, window_start: Timestamp) -> usize {
        self.events
            .iter()
            .filter(|(timestamp, _)| *timestamp >= window_start)
            .map(|(_, count)| count)
            .sum()
    }
}

/// Rollback statistics.
pub struct RollbackInfo {
    time_supplier: Arc<dyn TimeSupplier>,
    recent_window: Duration,
    pending: usize,
    committed: RollbackHistory,
    ignored: RollbackHistory,
}

impl RollbackInfo {
    pub fn new(time_supplier: Arc<dyn TimeSupplier>, recent_window: Duration) -> Self {
        RollbackInfo {
            time_supplier,
            recent_window,
            pending: 0,
            committed: RollbackHistory::default(),
            ignored: RollbackHistory::default(),
        }
    }

    /// Counts one more undone block.
    pub fn increment(&mut self) {
        self.pending += 1;
    }

    /// Number of undone blocks not yet committed or ignored.
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Moves the pending blocks into the committed counters.
    pub fn save(&mut self) {
        self.flush(RollbackResult::Committed);
    }

    /// Moves the pending blocks into the ignored counters.
    pub fn reset(&mut self) {
        self.flush(RollbackResult::Ignored);
    }

    fn flush(&mut self, result: RollbackResult) {
        if self.pending == 0 {
            return;
        }
        let now = (self.time_supplier)();
        let window_start = self.window_start(now);
        let history = match result {
            RollbackResult::Committed => &mut self.committed,
            RollbackResult::Ignored => &mut self.ignored,
        };
        history.prune(window_start);
        history.add(now, self.pending);
        debug!("rollback of {} blocks {:?}", self.pending, result);
        self.pending = 0;
    }

    fn window_start(&self, now: Timestamp) -> Timestamp {
        now - self.recent_window
    }

    /// Number of undone blocks with the given fate.
    pub fn counter(&self, result: RollbackResult, counter_type: RollbackCounterType) -> usize {
        let history = match result {
            RollbackResult::Committed => &self.committed,
            RollbackResult::Ignored => &self.ignored,
        };
        match counter_type {
            RollbackCounterType::All => history.total,
            RollbackCounterType::Recent => {
                history.recent(self.window_start((self.time_supplier)()))
            }
        }
    }

    pub fn counters(&self) -> RollbackCounters {
        RollbackCounters {
            committed_all: self.counter(RollbackResult::Committed, RollbackCounterType::All),
            committed_recent: self.counter(RollbackResult::Committed, RollbackCounterType::Recent),
            ignored_all: self.counter(RollbackResult::Ignored, RollbackCounterType::All),
            ignored_recent: self.counter(RollbackResult::Ignored, RollbackCounterType::Recent),
        }
    }
}
