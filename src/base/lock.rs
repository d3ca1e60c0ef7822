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

//! Multi-reader/single-writer lock guarding the shared caches.
//!
//! The lock is a thin layer over `parking_lot::RwLock`, which spins for a
//! short while before parking the thread and does not let a waiting writer
//! starve behind a continuous stream of readers.
//!
//! Three kinds of guards can be obtained:
//! - [ReaderGuard]: shared read access;
//! - [WriterGuard]: exclusive access, can be demoted to a reader in place;
//! - [PromotableGuard]: read access with write intent. It coexists with plain
//!   readers but at most one promotable guard exists at any time, thus a
//!   `promote` never competes with another promotion on the same lock.
//!
//! All guards release the lock when dropped and are move-only.
//! Debug builds additionally detect a thread trying to acquire the lock while
//! it already holds it for writing (a certain deadlock).

use parking_lot::{
    RwLock, RwLockReadGuard, RwLockUpgradableReadGuard, RwLockWriteGuard,
};
use std::{
    marker::PhantomData,
    ops::{Deref, DerefMut},
};

#[cfg(debug_assertions)]
use parking_lot::Mutex;
#[cfg(debug_assertions)]
use std::thread::{self, ThreadId};

/// Reader/writer lock wrapping a value of type `T`.
#[derive(Default)]
pub struct ReaderWriterLock<T> {
    inner: RwLock<T>,
    /// Thread currently holding the writer guard.
    #[cfg(debug_assertions)]
    writer: Mutex<Option<ThreadId>>,
}

impl<T> ReaderWriterLock<T> {
    /// Creates an unlocked instance.
    pub fn new(value: T) -> Self {
        ReaderWriterLock {
            inner: RwLock::new(value),
            #[cfg(debug_assertions)]
            writer: Mutex::new(None),
        }
    }

    /// Blocks until no writer is pending or active, then acquires shared access.
    pub fn acquire_reader(&self) -> ReaderGuard<'_, T> {
        self.check_reentrancy();
        ReaderGuard(self.inner.read())
    }

    /// Acquires shared access only if this is possible without waiting.
    pub fn try_acquire_reader(&self) -> Option<ReaderGuard<'_, T>> {
        self.inner.try_read().map(ReaderGuard)
    }

    /// Blocks until all readers and writers are gone, then acquires
    /// exclusive access.
    pub fn acquire_writer(&self) -> WriterGuard<'_, T> {
        self.check_reentrancy();
        let guard = self.inner.write();
        WriterGuard {
            guard,
            _mark: WriterMark::new(self),
        }
    }

    /// Acquires shared access with the intent of writing later.
    /// Blocks while another promotable guard or a writer is active.
    pub fn acquire_promotable(&self) -> PromotableGuard<'_, T> {
        self.check_reentrancy();
        PromotableGuard {
            guard: self.inner.upgradable_read(),
            lock: self,
        }
    }

    /// Returns true if some guard currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    /// Consumes the lock returning the wrapped value.
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }

    #[cfg(debug_assertions)]
    fn check_reentrancy(&self) {
        let owner = *self.writer.lock();
        debug_assert!(
            owner != Some(thread::current().id()),
            "lock acquired by the thread already holding its writer guard"
        );
    }

    #[cfg(not(debug_assertions))]
    #[inline(always)]
    fn check_reentrancy(&self) {}
}

/// Records the writer thread in debug builds.
struct WriterMark<'a> {
    #[cfg(debug_assertions)]
    writer: &'a Mutex<Option<ThreadId>>,
    _lifetime: PhantomData<&'a ()>,
}

impl<'a> WriterMark<'a> {
    #[allow(unused_variables)]
    fn new<T>(lock: &'a ReaderWriterLock<T>) -> Self {
        #[cfg(debug_assertions)]
        {
            *lock.writer.lock() = Some(thread::current().id());
        }
        WriterMark {
            #[cfg(debug_assertions)]
            writer: &lock.writer,
            _lifetime: PhantomData,
        }
    }
}

impl<'a> Drop for WriterMark<'a> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        {
            *self.writer.lock() = None;
        }
    }
}

/// Shared access guard.
pub struct ReaderGuard<'a, T>(RwLockReadGuard<'a, T>);

impl<'a, T> Deref for ReaderGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

/// Shared access guard that can be promoted to exclusive access.
pub struct PromotableGuard<'a, T> {
    guard: RwLockUpgradableReadGuard<'a, T>,
    lock: &'a ReaderWriterLock<T>,
}

impl<'a, T> PromotableGuard<'a, T> {
    /// Waits for the other readers to go away and turns this guard into a
    /// writer guard. The lock is never released in between.
    pub fn promote(self) -> WriterGuard<'a, T> {
        let lock = self.lock;
        let guard = RwLockUpgradableReadGuard::upgrade(self.guard);
        WriterGuard {
            guard,
            _mark: WriterMark::new(lock),
        }
    }
}

impl<'a, T> Deref for PromotableGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

/// Exclusive access guard.
pub struct WriterGuard<'a, T> {
    guard: RwLockWriteGuard<'a, T>,
    _mark: WriterMark<'a>,
}

impl<'a, T> WriterGuard<'a, T> {
    /// Turns this guard into a reader guard without releasing the lock.
    pub fn demote(self) -> ReaderGuard<'a, T> {
        let WriterGuard { guard, _mark } = self;
        drop(_mark);
        ReaderGuard(RwLockWriteGuard::downgrade(guard))
    }
}

impl<'a, T> Deref for WriterGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<'a, T> DerefMut for WriterGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
