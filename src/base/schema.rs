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

//! Entities flowing through the ingestion pipeline.
//!
//! Entities are immutable once built: the pipeline shares them between the
//! dispatchers and the pending caches through `Arc`s and pairs them with the
//! content hash computed once by the hash calculation stage.

use super::{serialize::packed_size, Timestamp};
use crate::crypto::{Hash, Hashable, PublicKey};
use std::sync::Arc;

/// Signed transaction.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Transaction {
    /// Submitter public key.
    pub signer: PublicKey,
    /// Submitter signature.
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
    /// Network identifier.
    pub network: String,
    /// Time after which the transaction can no longer be included in a block.
    pub deadline: Timestamp,
    /// Max fee the signer is willing to pay.
    pub max_fee: u64,
    /// Opaque transaction body.
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

impl Transaction {
    /// Serialized size in bytes.
    pub fn size(&self) -> u64 {
        packed_size(self)
    }
}

/// Additional signature of a partial (multi-signature) transaction.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Cosignature {
    /// Cosigner public key.
    pub signer: PublicKey,
    /// Cosigner signature of the parent transaction hash.
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
}

impl Cosignature {
    /// Serialized size in bytes.
    pub fn size(&self) -> u64 {
        packed_size(self)
    }
}

/// Block header.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct BlockHeader {
    /// Position of the block within the chain.
    pub height: u64,
    /// Block creation time.
    pub timestamp: Timestamp,
    /// Hash of the parent block header.
    pub previous_hash: Hash,
    /// Harvester public key.
    pub signer: PublicKey,
    /// Harvester signature.
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
    /// Chain score contribution, computed by the consensus rules.
    pub score: u64,
}

/// Block.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Block {
    /// Block header, the block hash is computed over the header only.
    pub header: BlockHeader,
    /// Confirmed transactions.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Serialized size in bytes.
    pub fn size(&self) -> u64 {
        packed_size(self)
    }
}

/// Transaction paired with its content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionInfo {
    /// Shared transaction.
    pub transaction: Arc<Transaction>,
    /// Transaction content hash.
    pub entity_hash: Hash,
}

impl TransactionInfo {
    /// Wraps a transaction computing its content hash.
    pub fn new(transaction: Transaction) -> Self {
        Self::from_arc(Arc::new(transaction))
    }

    /// Wraps a shared transaction computing its content hash.
    pub fn from_arc(transaction: Arc<Transaction>) -> Self {
        let entity_hash = transaction.primary_hash();
        TransactionInfo {
            transaction,
            entity_hash,
        }
    }
}

/// Block paired with its hash and the hashes of its transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockElement {
    /// Shared block.
    pub block: Arc<Block>,
    /// Block header hash.
    pub entity_hash: Hash,
    /// Contained transactions hashes, in block order.
    pub transaction_hashes: Vec<Hash>,
}

impl BlockElement {
    /// Wraps a block computing all the hashes.
    pub fn new(block: Block) -> Self {
        Self::from_arc(Arc::new(block))
    }

    /// Wraps a shared block computing all the hashes.
    pub fn from_arc(block: Arc<Block>) -> Self {
        let entity_hash = block.header.primary_hash();
        let transaction_hashes = block.transactions.iter().map(|tx| tx.primary_hash()).collect();
        BlockElement {
            block,
            entity_hash,
            transaction_hashes,
        }
    }

    /// Block height.
    pub fn height(&self) -> u64 {
        self.block.header.height
    }

    /// Contained transactions paired with their hashes.
    pub fn transaction_infos(&self) -> Vec<TransactionInfo> {
        self.block
            .transactions
            .iter()
            .zip(self.transaction_hashes.iter())
            .map(|(tx, hash)| TransactionInfo {
                transaction: Arc::new(tx.clone()),
                entity_hash: *hash,
            })
            .collect()
    }
}

/// Partial transaction data returned to a peer during reconciliation.
///
/// The transaction is `None` when the peer already knows it and only misses
/// some of the cosignatures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CosignedTransactionInfo {
    /// Partial transaction hash.
    pub entity_hash: Hash,
    /// Partial transaction, if unknown to the peer.
    pub transaction: Option<Arc<Transaction>>,
    /// Cosignatures collected so far, sorted by signer.
    pub cosignatures: Vec<Cosignature>,
}
