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

//! Dispatch orchestration.
//!
//! Wires the block and transaction dispatchers with their stages, the
//! pending caches and the node reputation.

pub mod batch;
pub mod block_stages;
pub mod handlers;
pub mod rollback;
pub mod service;
pub mod throttle;
pub mod tx_stages;
pub mod ut_updater;

pub use batch::TransactionBatchRangeDispatcher;
pub use handlers::{
    ChainStorage, ImportanceLookup, KnownHashPredicate, NewBlockSink, NewTransactionsSink,
    StatefulValidator, StatelessValidator, TransactionStatusSink, ValidationResult,
};
pub use rollback::{RollbackCounterType, RollbackCounters, RollbackInfo, RollbackResult};
pub use service::{DispatcherHandlers, DispatcherService, IngestCounters, IngestState, PruneStats};
pub use throttle::SpamThrottle;
pub use ut_updater::UtUpdater;
