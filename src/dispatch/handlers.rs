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

//! External collaborators consumed by the dispatch stages.
//!
//! Signature checks, state execution and storage live outside of the
//! ingestion core. The stages reach them only through these interfaces.

use crate::{
    base::{BlockElement, Transaction, TransactionInfo},
    crypto::{Hash, PublicKey},
    pipeline::{ConsumerResult, ResultCode, ResultSeverity},
    Result,
};
#[cfg(test)]
use mockall::automock;

/// Outcome of a validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationResult {
    Success,
    /// Valid but not processable, with a validator specific code.
    Neutral(u32),
    /// Invalid, with a validator specific code.
    Failure(u32),
}

impl ValidationResult {
    pub fn is_success(&self) -> bool {
        *self == ValidationResult::Success
    }

    /// Result code reported for a non successful validation.
    pub fn code(&self) -> ResultCode {
        match *self {
            ValidationResult::Success => ResultCode::Success,
            ValidationResult::Neutral(code) => ResultCode::ValidationNeutral(code),
            ValidationResult::Failure(code) => ResultCode::ValidationFailure(code),
        }
    }

    /// Maps the outcome to a stage result, failures get `failure_severity`.
    pub fn to_consumer_result(self, failure_severity: ResultSeverity) -> ConsumerResult {
        match self {
            ValidationResult::Success => ConsumerResult::proceed(),
            ValidationResult::Neutral(_) => {
                ConsumerResult::abort(self.code(), ResultSeverity::Neutral)
            }
            ValidationResult::Failure(_) => ConsumerResult::abort(self.code(), failure_severity),
        }
    }
}

/// Checks that do not depend on the chain state (signatures, format).
#[cfg_attr(test, automock)]
pub trait StatelessValidator: Send + Sync + 'static {
    fn validate_block(&self, element: &BlockElement) -> ValidationResult;

    fn validate_transaction(&self, info: &TransactionInfo) -> ValidationResult;
}

/// Checks that depend on the chain state.
#[cfg_attr(test, automock)]
pub trait StatefulValidator: Send + Sync + 'static {
    /// Executes `blocks` on top of the local block at `common_height`
    /// without committing anything.
    fn validate_blocks(&self, common_height: u64, blocks: &[BlockElement]) -> ValidationResult;

    /// Validates an unconfirmed transaction against the current state.
    fn validate_transaction(&self, info: &TransactionInfo) -> ValidationResult;
}

/// Local chain.
#[cfg_attr(test, automock)]
pub trait ChainStorage: Send + Sync + 'static {
    /// Height of the last local block.
    fn chain_height(&self) -> u64;

    /// Local block at the given height.
    fn load_block(&self, height: u64) -> Option<BlockElement>;

    /// Replaces the local blocks above `common_height` with `blocks`.
    /// Returns the replaced blocks, highest first.
    fn commit(&self, common_height: u64, blocks: &[BlockElement]) -> Result<Vec<BlockElement>>;
}

/// Receives the status of the rejected transactions so that the submitter
/// can be informed.
#[cfg_attr(test, automock)]
pub trait TransactionStatusSink: Send + Sync + 'static {
    fn notify(&self, hash: &Hash, transaction: &Transaction, code: ResultCode);

    /// Delivers the buffered statuses, invoked once per completed element.
    fn flush(&self);
}

/// Receives the blocks worth announcing to the other nodes.
pub trait NewBlockSink: Fn(&BlockElement) + Send + Sync + 'static {}

impl<T: Fn(&BlockElement) + Send + Sync + 'static> NewBlockSink for T {}

/// Receives the transactions accepted by the stateless stages.
pub trait NewTransactionsSink: Fn(&[TransactionInfo]) + Send + Sync + 'static {}

impl<T: Fn(&[TransactionInfo]) + Send + Sync + 'static> NewTransactionsSink for T {}

/// Returns the importance of an account.
pub trait ImportanceLookup: Fn(&PublicKey) -> u64 + Send + Sync + 'static {}

impl<T: Fn(&PublicKey) -> u64 + Send + Sync + 'static> ImportanceLookup for T {}

/// Returns true if the hash belongs to an already known entity.
pub trait KnownHashPredicate: Fn(&Hash) -> bool + Send + Sync + 'static {}

impl<T: Fn(&Hash) -> bool + Send + Sync + 'static> KnownHashPredicate for T {}
