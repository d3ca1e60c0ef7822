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

//! Foundation types shared by all the ingestion components.

pub mod lock;
pub mod schema;
pub mod serialize;

pub use lock::ReaderWriterLock;
pub use parking_lot::{Mutex, RwLock};
pub use schema::{
    Block, BlockElement, BlockHeader, Cosignature, CosignedTransactionInfo, Transaction,
    TransactionInfo,
};

use std::{
    ops::{Add, Sub},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Network time in milliseconds.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Milliseconds elapsed since the origin.
    pub fn millis(self) -> u64 {
        self.0
    }

    /// Distance from an earlier timestamp, zero if `earlier` is in the future.
    pub fn since(self, earlier: Timestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0.saturating_add(rhs.as_millis() as u64))
    }
}

impl Sub<Duration> for Timestamp {
    type Output = Timestamp;

    fn sub(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0.saturating_sub(rhs.as_millis() as u64))
    }
}

/// Closure trait supplying the current network time.
///
/// Components never read the system clock by themselves, the node injects
/// the time source (and tests inject a deterministic one).
pub trait TimeSupplier: Fn() -> Timestamp + Send + Sync + 'static {}

impl<T: Fn() -> Timestamp + Send + Sync + 'static> TimeSupplier for T {}

/// Time supplier backed by the system clock.
pub fn system_time_supplier() -> impl TimeSupplier {
    || {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| Timestamp(elapsed.as_millis() as u64))
            .unwrap_or_default()
    }
}
