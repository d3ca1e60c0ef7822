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

//! Ordered stages processing pipeline.
//!
//! Blocks and transactions are submitted as elements to a `ConsumerDispatcher`
//! which runs them through its stages on a dedicated worker thread.

mod dispatcher;
mod input;
mod stage;

pub use dispatcher::{
    CompletionCallback, ConsumerDispatcher, DispatcherBuilder, DispatcherOptions, DispatcherState,
    DispatcherStatus, ElementId, ProcessingTicket,
};
pub use input::{BlockRange, ConsumerInput, InputSource, TransactionElement, TransactionRange};
pub use stage::{
    CompletionResult, CompletionStatus, ConsumerResult, FnStage, Inspector, ResultCode,
    ResultSeverity, Stage,
};
