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

//! Block dispatcher stages.

use super::{
    handlers::{ChainStorage, NewBlockSink, StatefulValidator, StatelessValidator},
    rollback::RollbackInfo,
    ut_updater::UtUpdater,
};
use crate::{
    base::{BlockElement, Mutex, TimeSupplier, TransactionInfo},
    cache::RecentHashCache,
    config::SyncConfig,
    crypto::{Hash, Hashable},
    pipeline::{ConsumerInput, ConsumerResult, InputSource, ResultCode, ResultSeverity, Stage},
};
use std::sync::Arc;

/// Computes the block and transaction hashes.
pub struct BlockHashCalculatorStage;

impl Stage for BlockHashCalculatorStage {
    fn name(&self) -> &'static str {
        "block hash calculator"
    }

    fn run(&mut self, input: &mut ConsumerInput) -> ConsumerResult {
        for element in input.blocks_mut() {
            element.entity_hash = element.block.header.primary_hash();
            element.transaction_hashes = element
                .block
                .transactions
                .iter()
                .map(|tx| tx.primary_hash())
                .collect();
        }
        ConsumerResult::proceed()
    }
}

/// Drops single blocks seen a moment ago.
///
/// Multi block elements come from explicit sync requests and are not checked.
pub struct BlockHashCheckStage {
    cache: Arc<RecentHashCache>,
}

impl BlockHashCheckStage {
    pub fn new(cache: Arc<RecentHashCache>) -> Self {
        BlockHashCheckStage { cache }
    }
}

impl Stage for BlockHashCheckStage {
    fn name(&self) -> &'static str {
        "block hash check"
    }

    fn run(&mut self, input: &mut ConsumerInput) -> ConsumerResult {
        match input.blocks() {
            [element] if !self.cache.add(&element.entity_hash) => {
                trace!("block {} recently seen", element.entity_hash);
                ConsumerResult::abort(ResultCode::Known, ResultSeverity::Neutral)
            }
            _ => ConsumerResult::proceed(),
        }
    }
}

/// Checks the internal consistency of the blocks chain part.
pub struct BlockChainCheckStage {
    config: SyncConfig,
    time_supplier: Arc<dyn TimeSupplier>,
}

impl BlockChainCheckStage {
    pub fn new(config: SyncConfig, time_supplier: Arc<dyn TimeSupplier>) -> Self {
        BlockChainCheckStage {
            config,
            time_supplier,
        }
    }
}

impl Stage for BlockChainCheckStage {
    fn name(&self) -> &'static str {
        "block chain check"
    }

    fn run(&mut self, input: &mut ConsumerInput) -> ConsumerResult {
        let blocks = input.blocks();
        if blocks.len() > self.config.max_blocks_per_sync_attempt {
            return ConsumerResult::abort(ResultCode::TooManyBlocks, ResultSeverity::Fatal);
        }
        for pair in blocks.windows(2) {
            if pair[1].height() != pair[0].height() + 1 {
                return ConsumerResult::abort(
                    ResultCode::DiscontinuousHeights,
                    ResultSeverity::Fatal,
                );
            }
            if pair[1].block.header.previous_hash != pair[0].entity_hash {
                return ConsumerResult::abort(ResultCode::UnlinkedBlocks, ResultSeverity::Fatal);
            }
        }
        let max_timestamp = (self.time_supplier)() + self.config.max_block_future_time();
        if blocks
            .iter()
            .any(|element| element.block.header.timestamp > max_timestamp)
        {
            return ConsumerResult::abort(ResultCode::TimestampInFuture, ResultSeverity::Failure);
        }
        ConsumerResult::proceed()
    }
}

/// Chain state independent validation of every block.
/// Name of the block stateless validation stage.
pub(crate) const BLOCK_STATELESS_VALIDATION_STAGE: &str = "block stateless validation";

pub struct BlockStatelessValidationStage {
    validator: Arc<dyn StatelessValidator>,
}

impl BlockStatelessValidationStage {
    pub fn new(validator: Arc<dyn StatelessValidator>) -> Self {
        BlockStatelessValidationStage { validator }
    }
}

impl Stage for BlockStatelessValidationStage {
    fn name(&self) -> &'static str {
        BLOCK_STATELESS_VALIDATION_STAGE
    }

    fn run(&mut self, input: &mut ConsumerInput) -> ConsumerResult {
        for element in input.blocks() {
            let result = self.validator.validate_block(element);
            if !result.is_success() {
                debug!("block {} failed stateless validation: {}", element.height(), result.code());
                return result.to_consumer_result(ResultSeverity::Fatal);
            }
        }
        ConsumerResult::proceed()
    }
}

/// Attaches the blocks to the local chain.
///
/// The blocks replace the local blocks above their common ancestor when they
/// carry a better score. The replaced blocks transactions go back to the
/// unconfirmed cache.
pub struct ChainSyncStage {
    config: SyncConfig,
    storage: Arc<dyn ChainStorage>,
    validator: Arc<dyn StatefulValidator>,
    rollback: Arc<Mutex<RollbackInfo>>,
    ut_updater: Arc<UtUpdater>,
}

impl ChainSyncStage {
    pub fn new(
        config: SyncConfig,
        storage: Arc<dyn ChainStorage>,
        validator: Arc<dyn StatefulValidator>,
        rollback: Arc<Mutex<RollbackInfo>>,
        ut_updater: Arc<UtUpdater>,
    ) -> Self {
        ChainSyncStage {
            config,
            storage,
            validator,
            rollback,
            ut_updater,
        }
    }

    /// Height of the local block the blocks link to.
    fn common_height(&self, first: &BlockElement, local_height: u64) -> Option<u64> {
        if first.height() == 0 || first.height() > local_height + 1 {
            return None;
        }
        let common_height = first.height() - 1;
        match self.storage.load_block(common_height) {
            Some(common) if common.entity_hash == first.block.header.previous_hash => {
                Some(common_height)
            }
            _ => None,
        }
    }

    fn local_score(&self, from_height: u64, to_height: u64) -> u64 {
        (from_height..=to_height)
            .filter_map(|height| self.storage.load_block(height))
            .map(|element| element.block.header.score)
            .sum()
    }

    fn update_unconfirmed(&self, blocks: &[BlockElement], undone: &[BlockElement]) {
        let confirmed: Vec<Hash> = blocks
            .iter()
            .flat_map(|element| element.transaction_hashes.iter().copied())
            .collect();
        let reverted: Vec<TransactionInfo> = undone
            .iter()
            .flat_map(|element| element.transaction_infos())
            .collect();
        self.ut_updater.update_chain(&confirmed, &reverted);
    }
}

impl Stage for ChainSyncStage {
    fn name(&self) -> &'static str {
        "chain sync"
    }

    fn run(&mut self, input: &mut ConsumerInput) -> ConsumerResult {
        let blocks = input.blocks();
        let first = match blocks.first() {
            Some(first) => first,
            None => return ConsumerResult::proceed(),
        };
        let local_height = self.storage.chain_height();
        let common_height = match self.common_height(first, local_height) {
            Some(height) => height,
            None => {
                debug!("block {} does not link to the local chain", first.height());
                return ConsumerResult::abort(
                    ResultCode::UnlinkedToLocalChain,
                    ResultSeverity::Failure,
                );
            }
        };

        let undo_count = local_height - common_height;
        if undo_count > self.config.max_rollback_blocks {
            return ConsumerResult::abort(ResultCode::RollbackTooDeep, ResultSeverity::Failure);
        }
        if undo_count > 0 {
            let local_score = self.local_score(common_height + 1, local_height);
            let remote_score: u64 = blocks.iter().map(|element| element.block.header.score).sum();
            if remote_score <= local_score {
                debug!(
                    "ignoring blocks {} - {}: score {} not better than {}",
                    first.height(),
                    first.height() + blocks.len() as u64 - 1,
                    remote_score,
                    local_score
                );
                return ConsumerResult::abort(ResultCode::ScoreNotBetter, ResultSeverity::Neutral);
            }
        }

        {
            let mut rollback = self.rollback.lock();
            (0..undo_count).for_each(|_| rollback.increment());
        }

        let result = self.validator.validate_blocks(common_height, blocks);
        if !result.is_success() {
            self.rollback.lock().reset();
            return result.to_consumer_result(ResultSeverity::Failure);
        }

        let undone = match self.storage.commit(common_height, blocks) {
            Ok(undone) => undone,
            Err(err) => {
                error!("chain commit failure: {}", err.to_string_full());
                self.rollback.lock().reset();
                return ConsumerResult::abort(ResultCode::CommitFailed, ResultSeverity::Failure);
            }
        };
        self.rollback.lock().save();
        info!(
            "chain advanced to height {} ({} blocks undone)",
            common_height + blocks.len() as u64,
            undone.len()
        );
        self.update_unconfirmed(blocks, &undone);
        ConsumerResult::proceed()
    }
}

/// Announces the accepted blocks.
pub struct NewBlockStage {
    sink: Arc<dyn NewBlockSink>,
}

impl NewBlockStage {
    /// Sources of the blocks worth announcing.
    pub const SOURCE_MASK: InputSource = InputSource::from_bits_truncate(
        InputSource::LOCAL.bits() | InputSource::REMOTE_PUSH.bits(),
    );

    pub fn new(sink: Arc<dyn NewBlockSink>) -> Self {
        NewBlockStage { sink }
    }
}

impl Stage for NewBlockStage {
    fn name(&self) -> &'static str {
        "new block"
    }

    fn run(&mut self, input: &mut ConsumerInput) -> ConsumerResult {
        if Self::SOURCE_MASK.intersects(input.source()) {
            input.blocks().iter().for_each(|element| (self.sink)(element));
        }
        ConsumerResult::proceed()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        base::{
            schema::tests::{create_test_block, create_test_chain, create_test_tx},
            tests::TestClock,
            Block,
        },
        cache::{HashCheckOptions, MemoryCacheOptions, MemoryUtCache},
        config::SpamThrottleConfig,
        crypto::PublicKey,
        dispatch::{
            handlers::{
                MockChainStorage, MockStatefulValidator, MockStatelessValidator,
                MockTransactionStatusSink, ValidationResult,
            },
            rollback::{RollbackCounterType, RollbackResult},
            throttle::SpamThrottle,
        },
        node::NodeIdentity,
        pipeline::{BlockRange, CompletionStatus},
        ErrorKind,
    };
    use std::time::Duration;

    pub fn create_genesis() -> BlockElement {
        BlockElement::new(create_test_block(0, Hash::default(), vec![]))
    }

    /// Block input with the hashes already computed.
    pub fn create_block_input(elements: &[BlockElement], source: InputSource) -> ConsumerInput {
        let blocks: Vec<Block> = elements.iter().map(|element| (*element.block).clone()).collect();
        let mut input =
            ConsumerInput::from_blocks(BlockRange::new(blocks, NodeIdentity::default()), source);
        BlockHashCalculatorStage.run(&mut input);
        input
    }

    /// Storage serving the given local chain.
    fn create_storage(chain: Vec<BlockElement>) -> MockChainStorage {
        let mut storage = MockChainStorage::new();
        let height = chain.last().map_or(0, |element| element.height());
        storage.expect_chain_height().return_const(height);
        storage
            .expect_load_block()
            .returning(move |height| chain.get(height as usize).cloned());
        storage
    }

    fn create_chain_sync_stage(
        storage: MockChainStorage,
        validator: MockStatefulValidator,
        max_rollback_blocks: u64,
    ) -> (ChainSyncStage, Arc<Mutex<RollbackInfo>>, Arc<MemoryUtCache>) {
        let clock = TestClock::new(1_000);
        let time_supplier: Arc<dyn TimeSupplier> = Arc::new(clock.supplier());
        let cache = Arc::new(MemoryUtCache::new(MemoryCacheOptions::new(u64::MAX, 100)));
        let mut ut_validator = MockStatefulValidator::new();
        ut_validator
            .expect_validate_transaction()
            .returning(|_| ValidationResult::Success);
        let mut sink = MockTransactionStatusSink::new();
        sink.expect_notify().returning(|_, _, _| ());
        let throttle = SpamThrottle::new(
            SpamThrottleConfig::default(),
            Arc::new(|_: &PublicKey| 0),
        );
        let ut_updater = Arc::new(UtUpdater::new(
            cache.clone(),
            Arc::new(ut_validator),
            Arc::new(sink),
            throttle,
            time_supplier.clone(),
        ));
        let rollback = Arc::new(Mutex::new(RollbackInfo::new(
            time_supplier,
            Duration::from_secs(60),
        )));
        let config = SyncConfig {
            max_rollback_blocks,
            ..Default::default()
        };
        let stage = ChainSyncStage::new(
            config,
            Arc::new(storage),
            Arc::new(validator),
            rollback.clone(),
            ut_updater,
        );
        (stage, rollback, cache)
    }

    fn create_accepting_validator() -> MockStatefulValidator {
        let mut validator = MockStatefulValidator::new();
        validator
            .expect_validate_blocks()
            .returning(|_, _| ValidationResult::Success);
        validator
    }

    #[test]
    fn hash_calculator_fills_hashes() {
        let block =
            create_test_block(1, Hash::default(), vec![create_test_tx(1), create_test_tx(2)]);
        let expected = BlockElement::new(block.clone());
        let mut input = ConsumerInput::from_blocks(
            BlockRange::new(vec![block], NodeIdentity::default()),
            InputSource::REMOTE_PUSH,
        );

        let result = BlockHashCalculatorStage.run(&mut input);

        assert_eq!(result, ConsumerResult::proceed());
        assert_eq!(input.blocks()[0], expected);
    }

    #[test]
    fn hash_check_rejects_recent_single_block() {
        let clock = TestClock::new(1_000);
        let options = HashCheckOptions::new(Duration::from_secs(60), Duration::from_secs(10), 100);
        let cache = RecentHashCache::new(Arc::new(clock.supplier()), options);
        let mut stage = BlockHashCheckStage::new(Arc::new(cache));
        let chain = create_test_chain(&create_genesis(), 2, 1);

        let first = stage.run(&mut create_block_input(&chain[..1], InputSource::REMOTE_PUSH));
        let second = stage.run(&mut create_block_input(&chain[..1], InputSource::REMOTE_PUSH));
        let multi = stage.run(&mut create_block_input(&chain, InputSource::REMOTE_PULL));
        let multi_again = stage.run(&mut create_block_input(&chain, InputSource::REMOTE_PULL));

        assert_eq!(first, ConsumerResult::proceed());
        assert_eq!(second, ConsumerResult::abort(ResultCode::Known, ResultSeverity::Neutral));
        assert_eq!(multi, ConsumerResult::proceed());
        assert_eq!(multi_again, ConsumerResult::proceed());
    }

    fn create_chain_check_stage(now: u64) -> BlockChainCheckStage {
        let config = SyncConfig {
            max_blocks_per_sync_attempt: 3,
            max_block_future_time_ms: 500,
            ..Default::default()
        };
        BlockChainCheckStage::new(config, Arc::new(TestClock::new(now).supplier()))
    }

    #[test]
    fn chain_check_accepts_linked_blocks() {
        let mut stage = create_chain_check_stage(10_000);
        let chain = create_test_chain(&create_genesis(), 3, 1);

        let result = stage.run(&mut create_block_input(&chain, InputSource::REMOTE_PULL));

        assert_eq!(result, ConsumerResult::proceed());
    }

    #[test]
    fn chain_check_rejects_too_many_blocks() {
        let mut stage = create_chain_check_stage(10_000);
        let chain = create_test_chain(&create_genesis(), 4, 1);

        let result = stage.run(&mut create_block_input(&chain, InputSource::REMOTE_PULL));

        assert_eq!(result, ConsumerResult::abort(ResultCode::TooManyBlocks, ResultSeverity::Fatal));
    }

    #[test]
    fn chain_check_rejects_discontinuous_heights() {
        let mut stage = create_chain_check_stage(10_000);
        let chain = create_test_chain(&create_genesis(), 3, 1);
        let blocks = vec![chain[0].clone(), chain[2].clone()];

        let result = stage.run(&mut create_block_input(&blocks, InputSource::REMOTE_PULL));

        assert_eq!(
            result,
            ConsumerResult::abort(ResultCode::DiscontinuousHeights, ResultSeverity::Fatal)
        );
    }

    #[test]
    fn chain_check_rejects_unlinked_blocks() {
        let mut stage = create_chain_check_stage(10_000);
        let chain = create_test_chain(&create_genesis(), 2, 1);
        let unlinked = BlockElement::new(create_test_block(2, Hash::default(), vec![]));
        let blocks = vec![chain[0].clone(), unlinked];

        let result = stage.run(&mut create_block_input(&blocks, InputSource::REMOTE_PULL));

        assert_eq!(
            result,
            ConsumerResult::abort(ResultCode::UnlinkedBlocks, ResultSeverity::Fatal)
        );
    }

    #[test]
    fn chain_check_rejects_future_blocks() {
        // Test blocks timestamp is height * 1000.
        let mut stage = create_chain_check_stage(1_499);
        let chain = create_test_chain(&create_genesis(), 2, 1);

        let result = stage.run(&mut create_block_input(&chain, InputSource::REMOTE_PULL));

        assert_eq!(
            result,
            ConsumerResult::abort(ResultCode::TimestampInFuture, ResultSeverity::Failure)
        );
    }

    #[test]
    fn stateless_failure_is_fatal() {
        let mut validator = MockStatelessValidator::new();
        validator
            .expect_validate_block()
            .times(1)
            .returning(|_| ValidationResult::Failure(0x42));
        let mut stage = BlockStatelessValidationStage::new(Arc::new(validator));
        let chain = create_test_chain(&create_genesis(), 2, 1);

        let result = stage.run(&mut create_block_input(&chain, InputSource::REMOTE_PULL));

        assert_eq!(result.status, CompletionStatus::Aborted);
        assert_eq!(result.severity, ResultSeverity::Fatal);
        assert_eq!(result.code, ResultCode::ValidationFailure(0x42));
    }

    #[test]
    fn sync_extends_local_chain() {
        let genesis = create_genesis();
        let blocks = create_test_chain(&genesis, 2, 1);
        let mut storage = create_storage(vec![genesis]);
        storage
            .expect_commit()
            .withf(|height, blocks| *height == 0 && blocks.len() == 2)
            .times(1)
            .returning(|_, _| Ok(vec![]));
        let (mut stage, rollback, _) =
            create_chain_sync_stage(storage, create_accepting_validator(), 10);

        let result = stage.run(&mut create_block_input(&blocks, InputSource::REMOTE_PULL));

        assert_eq!(result, ConsumerResult::proceed());
        assert_eq!(rollback.lock().counters(), Default::default());
    }

    #[test]
    fn sync_rejects_unlinked_blocks() {
        let genesis = create_genesis();
        let local = create_test_chain(&genesis, 1, 1);
        let other_parent =
            BlockElement::new(create_test_block(1, Hash::from_data(b"fork"), vec![]));
        let blocks = create_test_chain(&other_parent, 1, 1);
        let mut storage = create_storage(vec![genesis, local[0].clone()]);
        storage.expect_commit().never();
        let (mut stage, _, _) = create_chain_sync_stage(storage, create_accepting_validator(), 10);

        let result = stage.run(&mut create_block_input(&blocks, InputSource::REMOTE_PULL));

        assert_eq!(
            result,
            ConsumerResult::abort(ResultCode::UnlinkedToLocalChain, ResultSeverity::Failure)
        );
    }

    #[test]
    fn sync_rejects_gap_above_local_chain() {
        let genesis = create_genesis();
        let chain = create_test_chain(&genesis, 3, 1);
        let storage = create_storage(vec![genesis, chain[0].clone()]);
        let (mut stage, _, _) = create_chain_sync_stage(storage, create_accepting_validator(), 10);

        let result = stage.run(&mut create_block_input(&chain[2..], InputSource::REMOTE_PULL));

        assert_eq!(result.code, ResultCode::UnlinkedToLocalChain);
    }

    #[test]
    fn sync_rejects_deep_rollback() {
        let genesis = create_genesis();
        let local = create_test_chain(&genesis, 3, 1);
        let fork = create_test_chain(&genesis, 4, 2);
        let mut chain = vec![genesis];
        chain.extend(local);
        let (mut stage, _, _) =
            create_chain_sync_stage(create_storage(chain), create_accepting_validator(), 2);

        let result = stage.run(&mut create_block_input(&fork, InputSource::REMOTE_PULL));

        assert_eq!(
            result,
            ConsumerResult::abort(ResultCode::RollbackTooDeep, ResultSeverity::Failure)
        );
    }

    #[test]
    fn sync_ignores_fork_without_better_score() {
        let genesis = create_genesis();
        let local = create_test_chain(&genesis, 2, 5);
        let fork = create_test_chain(&genesis, 3, 3);
        let mut chain = vec![genesis];
        chain.extend(local);
        let mut validator = MockStatefulValidator::new();
        validator.expect_validate_blocks().never();
        let (mut stage, _, _) = create_chain_sync_stage(create_storage(chain), validator, 10);

        let result = stage.run(&mut create_block_input(&fork, InputSource::REMOTE_PULL));

        assert_eq!(
            result,
            ConsumerResult::abort(ResultCode::ScoreNotBetter, ResultSeverity::Neutral)
        );
    }

    #[test]
    fn sync_commits_better_fork_and_restores_transactions() {
        let genesis = create_genesis();
        let mut undone_block =
            create_test_block(1, genesis.entity_hash, vec![create_test_tx(1), create_test_tx(2)]);
        undone_block.header.score = 1;
        let undone = BlockElement::new(undone_block);
        let mut fork_block = create_test_block(1, genesis.entity_hash, vec![create_test_tx(2)]);
        fork_block.header.score = 5;
        fork_block.header.signer = PublicKey([7; 32]);
        let fork = vec![BlockElement::new(fork_block)];
        let undone_cloned = undone.clone();
        let mut storage = create_storage(vec![genesis, undone.clone()]);
        storage
            .expect_commit()
            .times(1)
            .returning(move |_, _| Ok(vec![undone_cloned.clone()]));
        let (mut stage, rollback, cache) =
            create_chain_sync_stage(storage, create_accepting_validator(), 10);

        let result = stage.run(&mut create_block_input(&fork, InputSource::REMOTE_PUSH));

        assert_eq!(result, ConsumerResult::proceed());
        let rollback = rollback.lock();
        assert_eq!(rollback.counter(RollbackResult::Committed, RollbackCounterType::All), 1);
        assert_eq!(rollback.counter(RollbackResult::Ignored, RollbackCounterType::All), 0);
        let view = cache.view();
        assert_eq!(view.size(), 1);
        assert!(view.contains(&undone.transaction_hashes[0]));
        assert!(!view.contains(&undone.transaction_hashes[1]));
    }

    #[test]
    fn stateful_failure_ignores_rollback() {
        let genesis = create_genesis();
        let local = create_test_chain(&genesis, 1, 1);
        let fork = create_test_chain(&genesis, 2, 1);
        let mut chain = vec![genesis];
        chain.extend(local);
        let mut storage = create_storage(chain);
        storage.expect_commit().never();
        let mut validator = MockStatefulValidator::new();
        validator
            .expect_validate_blocks()
            .returning(|_, _| ValidationResult::Failure(9));
        let (mut stage, rollback, _) = create_chain_sync_stage(storage, validator, 10);

        let result = stage.run(&mut create_block_input(&fork, InputSource::REMOTE_PULL));

        assert_eq!(result.severity, ResultSeverity::Failure);
        assert_eq!(result.code, ResultCode::ValidationFailure(9));
        assert_eq!(rollback.lock().counter(RollbackResult::Ignored, RollbackCounterType::All), 1);
    }

    #[test]
    fn commit_failure_aborts_element() {
        let genesis = create_genesis();
        let blocks = create_test_chain(&genesis, 1, 1);
        let mut storage = create_storage(vec![genesis]);
        storage
            .expect_commit()
            .returning(|_, _| Err(ErrorKind::Other.into()));
        let (mut stage, _, _) = create_chain_sync_stage(storage, create_accepting_validator(), 10);

        let result = stage.run(&mut create_block_input(&blocks, InputSource::REMOTE_PULL));

        assert_eq!(
            result,
            ConsumerResult::abort(ResultCode::CommitFailed, ResultSeverity::Failure)
        );
    }

    #[test]
    fn new_block_sink_receives_pushed_and_local_blocks_only() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_cloned = received.clone();
        let mut stage = NewBlockStage::new(Arc::new(move |element: &BlockElement| {
            received_cloned.lock().push(element.height());
        }));
        let chain = create_test_chain(&create_genesis(), 3, 1);

        stage.run(&mut create_block_input(&chain[..1], InputSource::LOCAL));
        stage.run(&mut create_block_input(&chain[1..2], InputSource::REMOTE_PULL));
        stage.run(&mut create_block_input(&chain[2..], InputSource::REMOTE_PUSH));

        assert_eq!(*received.lock(), vec![1, 3]);
    }
}
