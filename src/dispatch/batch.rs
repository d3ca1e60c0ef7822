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

//! Transactions batching.
//!
//! Transaction ranges are accumulated and forwarded to the transaction
//! dispatcher by a periodic task. Ranges sharing the same source and node
//! are merged into a single element.

use crate::{
    base::{Mutex, Transaction},
    node::NodeIdentity,
    pipeline::{ConsumerDispatcher, ConsumerInput, InputSource, TransactionRange},
};
use std::sync::Arc;

struct TransactionBatch {
    source: InputSource,
    identity: NodeIdentity,
    transactions: Vec<Transaction>,
}

/// Accumulates transaction ranges for the transaction dispatcher.
pub struct TransactionBatchRangeDispatcher {
    dispatcher: Arc<ConsumerDispatcher>,
    batches: Mutex<Vec<TransactionBatch>>,
}

impl TransactionBatchRangeDispatcher {
    pub fn new(dispatcher: Arc<ConsumerDispatcher>) -> Self {
        TransactionBatchRangeDispatcher {
            dispatcher,
            batches: Mutex::new(Vec::new()),
        }
    }

    /// Queues a range, empty ranges are ignored.
    pub fn queue(&self, range: TransactionRange, source: InputSource) {
        if range.is_empty() {
            return;
        }
        let mut batches = self.batches.lock();
        match batches
            .iter_mut()
            .find(|batch| batch.source == source && batch.identity == range.identity)
        {
            Some(batch) => batch.transactions.extend(range.transactions),
            None => batches.push(TransactionBatch {
                source,
                identity: range.identity,
                transactions: range.transactions,
            }),
        }
    }

    /// Number of queued transactions.
    pub fn num_queued(&self) -> usize {
        self.batches
            .lock()
            .iter()
            .map(|batch| batch.transactions.len())
            .sum()
    }

    /// Forwards one element per (source, node) pair.
    /// Returns the number of elements accepted by the dispatcher.
    pub fn dispatch(&self) -> usize {
        let batches = std::mem::take(&mut *self.batches.lock());
        let mut num_dispatched = 0;
        for batch in batches {
            let num_transactions = batch.transactions.len();
            let input = ConsumerInput::from_transactions(
                TransactionRange::new(batch.transactions, batch.identity),
                batch.source,
            );
            let ticket = self.dispatcher.process_element(input);
            match ticket.rejection() {
                Some(reason) => warn!(
                    "{} transactions dropped, dispatcher not accepting: {:?}",
                    num_transactions, reason
                ),
                None => num_dispatched += 1,
            }
        }
        num_dispatched
    }
}
