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

//! Single flight block harvesting.
//!
//! A harvest attempt is never started while the previously harvested block
//! is still in the block dispatcher. The in-flight flag is set when a block
//! is handed to the dispatcher and cleared by its completion callback.

use crate::{
    base::{Block, BlockElement, TimeSupplier, Timestamp},
    node::NodeIdentity,
    pipeline::{BlockRange, CompletionCallback, ElementId},
};
#[cfg(test)]
use mockall::automock;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Creates a new block on top of the given parent when a local account is
/// eligible at the given time.
#[cfg_attr(test, automock)]
pub trait BlockGenerator: Send + Sync + 'static {
    fn generate(&self, parent: &BlockElement, timestamp: Timestamp) -> Option<Block>;
}

/// Returns true when the node is allowed to harvest (e.g. it is synced).
pub trait HarvestingAllowed: Fn() -> bool + Send + Sync + 'static {}

impl<T: Fn() -> bool + Send + Sync + 'static> HarvestingAllowed for T {}

/// Returns the last block of the local chain.
pub trait LastBlockElementSupplier: Fn() -> BlockElement + Send + Sync + 'static {}

impl<T: Fn() -> BlockElement + Send + Sync + 'static> LastBlockElementSupplier for T {}

/// Submits harvested blocks to the block dispatcher.
/// Returns zero when the blocks are not accepted, the callback is then dropped.
pub trait RangeConsumer: Fn(BlockRange, CompletionCallback) -> ElementId + Send + Sync + 'static {}

impl<T> RangeConsumer for T where
    T: Fn(BlockRange, CompletionCallback) -> ElementId + Send + Sync + 'static
{
}

/// Harvester collaborators.
#[derive(Clone)]
pub struct HarvestOptions {
    pub harvesting_allowed: Arc<dyn HarvestingAllowed>,
    pub last_block_supplier: Arc<dyn LastBlockElementSupplier>,
    pub time_supplier: Arc<dyn TimeSupplier>,
    pub range_consumer: Arc<dyn RangeConsumer>,
}

/// Outcome of a harvest attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvestOutcome {
    /// A harvested block is still being processed.
    Skipped,
    /// Harvesting is currently not allowed.
    NotAllowed,
    /// No eligible harvester.
    NoBlock,
    /// Harvested block refused by the dispatcher.
    Rejected,
    /// Harvested block handed to the dispatcher.
    Dispatched(ElementId),
}

/// Periodic harvest task.
pub struct ScheduledHarvester {
    options: HarvestOptions,
    generator: Arc<dyn BlockGenerator>,
    in_flight: Arc<AtomicBool>,
}

impl ScheduledHarvester {
    pub fn new(options: HarvestOptions, generator: Arc<dyn BlockGenerator>) -> Self {
        ScheduledHarvester {
            options,
            generator,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns true while a harvested block is being processed.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Harvest attempt.
    pub fn harvest(&self) -> HarvestOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            trace!("harvest skipped, previous block still pending");
            return HarvestOutcome::Skipped;
        }
        if !(self.options.harvesting_allowed)() {
            self.in_flight.store(false, Ordering::SeqCst);
            return HarvestOutcome::NotAllowed;
        }

        let parent = (self.options.last_block_supplier)();
        let timestamp = (self.options.time_supplier)();
        let block = match self.generator.generate(&parent, timestamp) {
            Some(block) => block,
            None => {
                self.in_flight.store(false, Ordering::SeqCst);
                return HarvestOutcome::NoBlock;
            }
        };

        let height = block.header.height;
        let in_flight = self.in_flight.clone();
        let callback: CompletionCallback = Box::new(move |id, result| {
            debug!("harvested block {} completed ({}: {:?})", id, result.code, result.severity);
            in_flight.store(false, Ordering::SeqCst);
        });
        let range = BlockRange::new(vec![block], NodeIdentity::default());
        match (self.options.range_consumer)(range, callback) {
            0 => {
                warn!("harvested block {} rejected by the dispatcher", height);
                self.in_flight.store(false, Ordering::SeqCst);
                HarvestOutcome::Rejected
            }
            id => {
                debug!("harvested block {} dispatched as element {}", height, id);
                HarvestOutcome::Dispatched(id)
            }
        }
    }
}
