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

//! Pipeline stages and their results.

use super::ConsumerInput;
use std::fmt::{Display, Formatter};

/// Outcome classification of an element.
/// Variants are sorted from the best to the worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResultSeverity {
    /// Processed without errors.
    Success,
    /// Nothing to do, e.g. all the entities were already known.
    Neutral,
    /// Rejected, the input might be valid on a different chain state.
    Failure,
    /// Rejected, the input is invalid regardless of the chain state.
    Fatal,
}

/// Result codes reported by the stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    Success,
    /// All entities were recently seen.
    Known,
    /// A stage panicked.
    ConsumerFault,
    /// Element dropped by a dispatcher shutdown.
    DispatcherShutdown,
    /// More blocks than allowed in a single element.
    TooManyBlocks,
    /// Block heights are not contiguous.
    DiscontinuousHeights,
    /// A block does not link to its predecessor.
    UnlinkedBlocks,
    /// A block timestamp is too far in the future.
    TimestampInFuture,
    /// Blocks do not link to the local chain.
    UnlinkedToLocalChain,
    /// Blocks would roll back too many local blocks.
    RollbackTooDeep,
    /// Blocks would not improve the local chain score.
    ScoreNotBetter,
    /// Local chain could not be updated.
    CommitFailed,
    /// Rejected by the spam throttle.
    SpamThrottled,
    /// Pending cache full or entity already cached.
    CacheRejected,
    /// Entity is already expired.
    Expired,
    /// Neutral validation outcome with a validator specific code.
    ValidationNeutral(u32),
    /// Failed validation with a validator specific code.
    ValidationFailure(u32),
}

impl Display for ResultCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ResultCode::ValidationNeutral(code) => write!(f, "ValidationNeutral({:#010x})", code),
            ResultCode::ValidationFailure(code) => write!(f, "ValidationFailure({:#010x})", code),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Element completion status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    /// All the stages ran.
    Normal,
    /// A stage rejected the element.
    Aborted,
    /// A stage fully handled the element, the remaining stages are not needed.
    Consumed,
}

/// Outcome of a single stage run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerResult {
    pub status: CompletionStatus,
    pub severity: ResultSeverity,
    pub code: ResultCode,
}

impl ConsumerResult {
    /// The element can proceed to the next stage.
    pub fn proceed() -> Self {
        ConsumerResult {
            status: CompletionStatus::Normal,
            severity: ResultSeverity::Success,
            code: ResultCode::Success,
        }
    }

    /// The element is rejected.
    pub fn abort(code: ResultCode, severity: ResultSeverity) -> Self {
        ConsumerResult {
            status: CompletionStatus::Aborted,
            severity,
            code,
        }
    }

    /// The element is completely handled.
    pub fn complete(code: ResultCode, severity: ResultSeverity) -> Self {
        ConsumerResult {
            status: CompletionStatus::Consumed,
            severity,
            code,
        }
    }

    /// Returns true if no further stage shall run.
    pub fn is_terminal(&self) -> bool {
        self.status != CompletionStatus::Normal
    }
}

/// Final element result handed to the inspector and to the submitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionResult {
    pub status: CompletionStatus,
    pub severity: ResultSeverity,
    pub code: ResultCode,
    /// Name of the stage that terminated the element.
    pub stage: Option<&'static str>,
}

impl CompletionResult {
    pub(crate) fn normal() -> Self {
        CompletionResult {
            status: CompletionStatus::Normal,
            severity: ResultSeverity::Success,
            code: ResultCode::Success,
            stage: None,
        }
    }

    pub(crate) fn from_stage(stage: &'static str, result: ConsumerResult) -> Self {
        CompletionResult {
            status: result.status,
            severity: result.severity,
            code: result.code,
            stage: Some(stage),
        }
    }

    pub(crate) fn shutdown() -> Self {
        CompletionResult {
            status: CompletionStatus::Aborted,
            severity: ResultSeverity::Neutral,
            code: ResultCode::DispatcherShutdown,
            stage: None,
        }
    }
}

/// Single step of a dispatcher pipeline.
///
/// Stages run in order on the dispatcher worker thread against the whole
/// element. A stage must not keep references to the element.
pub trait Stage: Send + 'static {
    /// Stage name, used for logging.
    fn name(&self) -> &'static str;

    /// Processes the element.
    fn run(&mut self, input: &mut ConsumerInput) -> ConsumerResult;
}

/// Stage built from a closure.
pub struct FnStage<F> {
    name: &'static str,
    func: F,
}

impl<F> FnStage<F>
where
    F: FnMut(&mut ConsumerInput) -> ConsumerResult + Send + 'static,
{
    pub fn new(name: &'static str, func: F) -> Self {
        FnStage { name, func }
    }
}

impl<F> Stage for FnStage<F>
where
    F: FnMut(&mut ConsumerInput) -> ConsumerResult + Send + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn run(&mut self, input: &mut ConsumerInput) -> ConsumerResult {
        (self.func)(input)
    }
}

/// Closure trait run after the last stage, even for aborted elements.
pub trait Inspector: FnMut(&mut ConsumerInput, &CompletionResult) + Send + 'static {}

impl<T: FnMut(&mut ConsumerInput, &CompletionResult) + Send + 'static> Inspector for T {}
