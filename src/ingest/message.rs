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

//! Messages used to submit entities to the ingestion service.

use crate::{
    base::{Cosignature, Transaction},
    channel,
    crypto::Hash,
    dispatch::IngestCounters,
    pipeline::{BlockRange, ElementId, InputSource, TransactionRange},
    Error,
};

/// Message types enumeration.
#[derive(Debug, Clone)]
#[allow(clippy::large_enum_variant)]
pub enum Message {
    /// Exception response used for the full set of messages.
    Exception(Error),
    /// Push blocks to the block dispatcher.
    PutBlocksRequest {
        /// Blocks and their origin node.
        range: BlockRange,
        source: InputSource,
    },
    /// Put blocks response.
    PutBlocksResponse {
        /// Dispatcher element identifier.
        id: ElementId,
    },
    /// Queue transactions for the next batch.
    PutTransactionsRequest {
        /// Transactions and their origin node.
        range: TransactionRange,
        source: InputSource,
    },
    /// Put transactions response.
    PutTransactionsResponse,
    /// Add a partial transaction waiting for cosignatures.
    PutPartialTransactionRequest {
        transaction: Transaction,
        source: InputSource,
    },
    /// Put partial transaction response.
    PutPartialTransactionResponse {
        /// True if the transaction has been cached.
        cached: bool,
    },
    /// Attach a cosignature to a cached partial transaction.
    PutCosignatureRequest {
        /// Partial transaction hash.
        hash: Hash,
        cosignature: Cosignature,
    },
    /// Put cosignature response.
    PutCosignatureResponse {
        /// Partial transaction hash.
        hash: Hash,
    },
    /// Get ingestion counters.
    GetStatusRequest,
    /// Get status response.
    GetStatusResponse(IngestCounters),
    /// Stop ingestion service.
    Stop,
}

/// Ingestion request sender alias.
pub type IngestRequestSender = channel::RequestSender<Message, Message>;

/// Ingestion request receiver alias.
pub type IngestRequestReceiver = channel::RequestReceiver<Message, Message>;

/// Ingestion response sender alias.
pub type IngestResponseSender = channel::ResponseSender<Message>;

/// Ingestion response receiver alias.
pub type IngestResponseReceiver = channel::ResponseReceiver<Message>;
