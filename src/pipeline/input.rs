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

//! Dispatcher input element.

use crate::{
    base::{Block, BlockElement, Transaction, TransactionInfo},
    crypto::Hash,
    node::NodeIdentity,
};
use std::{
    fmt::{Display, Formatter},
    sync::Arc,
};

bitflags::bitflags! {
    /// Origin of an element.
    pub struct InputSource: u8 {
        /// Unknown origin.
        const UNKNOWN = 0;
        /// Produced by this node (e.g. harvested blocks).
        const LOCAL = 1 << 0;
        /// Pushed by a remote node.
        const REMOTE_PUSH = 1 << 1;
        /// Pulled from a remote node.
        const REMOTE_PULL = 1 << 2;
    }
}

impl Default for InputSource {
    fn default() -> Self {
        InputSource::UNKNOWN
    }
}

/// Blocks received from a node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockRange {
    pub blocks: Vec<Block>,
    /// Node the blocks came from.
    pub identity: NodeIdentity,
}

impl BlockRange {
    pub fn new(blocks: Vec<Block>, identity: NodeIdentity) -> Self {
        BlockRange { blocks, identity }
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Transactions received from a node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionRange {
    pub transactions: Vec<Transaction>,
    /// Node the transactions came from.
    pub identity: NodeIdentity,
}

impl TransactionRange {
    pub fn new(transactions: Vec<Transaction>, identity: NodeIdentity) -> Self {
        TransactionRange {
            transactions,
            identity,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

/// Transaction within an element.
#[derive(Debug, Clone)]
pub struct TransactionElement {
    /// Transaction with its hash (zero until computed).
    pub info: TransactionInfo,
    /// Set by a stage to exclude the transaction from the following stages.
    pub skip: bool,
}

impl TransactionElement {
    pub fn new(transaction: Transaction) -> Self {
        TransactionElement {
            info: TransactionInfo {
                transaction: Arc::new(transaction),
                entity_hash: Hash::default(),
            },
            skip: false,
        }
    }
}

#[derive(Debug)]
enum InputEntities {
    Blocks(Vec<BlockElement>),
    Transactions(Vec<TransactionElement>),
}

/// Element processed by a dispatcher: same kind entities with their origin.
#[derive(Debug)]
pub struct ConsumerInput {
    entities: InputEntities,
    source: InputSource,
    identity: NodeIdentity,
}

impl ConsumerInput {
    /// Creates a blocks element. Hashes are computed by the pipeline.
    pub fn from_blocks(range: BlockRange, source: InputSource) -> Self {
        let blocks = range
            .blocks
            .into_iter()
            .map(|block| BlockElement {
                block: Arc::new(block),
                entity_hash: Hash::default(),
                transaction_hashes: Vec::new(),
            })
            .collect();
        ConsumerInput {
            entities: InputEntities::Blocks(blocks),
            source,
            identity: range.identity,
        }
    }

    /// Creates a transactions element. Hashes are computed by the pipeline.
    pub fn from_transactions(range: TransactionRange, source: InputSource) -> Self {
        let transactions = range
            .transactions
            .into_iter()
            .map(TransactionElement::new)
            .collect();
        ConsumerInput {
            entities: InputEntities::Transactions(transactions),
            source,
            identity: range.identity,
        }
    }

    /// Number of entities.
    pub fn len(&self) -> usize {
        match &self.entities {
            InputEntities::Blocks(blocks) => blocks.len(),
            InputEntities::Transactions(transactions) => transactions.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_blocks(&self) -> bool {
        matches!(self.entities, InputEntities::Blocks(_))
    }

    pub fn has_transactions(&self) -> bool {
        matches!(self.entities, InputEntities::Transactions(_))
    }

    /// Blocks, empty for a transactions element.
    pub fn blocks(&self) -> &[BlockElement] {
        match &self.entities {
            InputEntities::Blocks(blocks) => blocks,
            InputEntities::Transactions(_) => &[],
        }
    }

    pub fn blocks_mut(&mut self) -> &mut [BlockElement] {
        match &mut self.entities {
            InputEntities::Blocks(blocks) => blocks,
            InputEntities::Transactions(_) => &mut [],
        }
    }

    /// Transactions, empty for a blocks element.
    pub fn transactions(&self) -> &[TransactionElement] {
        match &self.entities {
            InputEntities::Transactions(transactions) => transactions,
            InputEntities::Blocks(_) => &[],
        }
    }

    pub fn transactions_mut(&mut self) -> &mut [TransactionElement] {
        match &mut self.entities {
            InputEntities::Transactions(transactions) => transactions,
            InputEntities::Blocks(_) => &mut [],
        }
    }

    /// Transactions not marked to be skipped.
    pub fn active_transactions(&self) -> impl Iterator<Item = &TransactionElement> {
        self.transactions().iter().filter(|element| !element.skip)
    }

    pub fn source(&self) -> InputSource {
        self.source
    }

    /// Node the element came from.
    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }
}

impl Display for ConsumerInput {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.entities {
            InputEntities::Blocks(blocks) => match (blocks.first(), blocks.last()) {
                (Some(first), Some(last)) => write!(
                    f,
                    "{} blocks (heights {} - {}) from {:?}",
                    blocks.len(),
                    first.height(),
                    last.height(),
                    self.source
                ),
                _ => write!(f, "empty from {:?}", self.source),
            },
            InputEntities::Transactions(transactions) => {
                write!(f, "{} transactions from {:?}", transactions.len(), self.source)
            }
        }
    }
}
