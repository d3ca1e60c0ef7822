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

//! Dispatcher service.
//!
//! Builds the block and transaction dispatchers, guards their admission and
//! turns their results into node reputation changes.

use super::{
    batch::TransactionBatchRangeDispatcher,
    block_stages::{
        BlockChainCheckStage, BlockHashCalculatorStage, BlockHashCheckStage,
        BlockStatelessValidationStage, ChainSyncStage, NewBlockStage,
        BLOCK_STATELESS_VALIDATION_STAGE,
    },
    handlers::{
        ChainStorage, ImportanceLookup, NewBlockSink, NewTransactionsSink, StatefulValidator,
        StatelessValidator, TransactionStatusSink,
    },
    rollback::{RollbackCounters, RollbackInfo},
    throttle::SpamThrottle,
    tx_stages::{
        NewTransactionsStage, TransactionHashCalculatorStage, TransactionHashCheckStage,
        TransactionStatelessValidationStage, TRANSACTION_STATELESS_VALIDATION_STAGE,
    },
    ut_updater::UtUpdater,
};
use crate::{
    base::{Cosignature, Mutex, RwLock, TimeSupplier, Transaction, TransactionInfo},
    cache::{HashCheckOptions, MemoryCacheOptions, MemoryPtCache, MemoryUtCache, RecentHashCache},
    config::NodeConfig,
    crypto::{Hash, Hashable},
    node::{
        is_local_host, InteractionOutcome, NodeIdentity, NodeInteractions, SharedNodeInteractions,
    },
    pipeline::{
        BlockRange, CompletionResult, ConsumerDispatcher, ConsumerInput, DispatcherBuilder,
        DispatcherOptions, DispatcherStatus, ElementId, Inspector, InputSource, ProcessingTicket,
        ResultCode, ResultSeverity, TransactionRange,
    },
    Error, ErrorKind, Result,
};
use std::{collections::HashSet, sync::Arc};

const BLOCK_DISPATCHER_NAME: &str = "block dispatcher";
const TRANSACTION_DISPATCHER_NAME: &str = "transaction dispatcher";

/// External collaborators of the dispatchers.
#[derive(Clone)]
pub struct DispatcherHandlers {
    pub stateless_validator: Arc<dyn StatelessValidator>,
    pub stateful_validator: Arc<dyn StatefulValidator>,
    pub storage: Arc<dyn ChainStorage>,
    pub status_sink: Arc<dyn TransactionStatusSink>,
    pub new_block_sink: Arc<dyn NewBlockSink>,
    pub new_transactions_sink: Arc<dyn NewTransactionsSink>,
    pub importance: Arc<dyn ImportanceLookup>,
}

/// State shared between the admission path and the dispatchers.
#[derive(Clone)]
pub struct IngestState {
    pub ut_cache: Arc<MemoryUtCache>,
    pub pt_cache: Arc<MemoryPtCache>,
    pub nodes: SharedNodeInteractions,
    pub time_supplier: Arc<dyn TimeSupplier>,
}

impl IngestState {
    pub fn new(config: &NodeConfig, time_supplier: Arc<dyn TimeSupplier>) -> Self {
        IngestState {
            ut_cache: Arc::new(MemoryUtCache::new(MemoryCacheOptions::unconfirmed(&config.cache))),
            pt_cache: Arc::new(MemoryPtCache::new(MemoryCacheOptions::partial(&config.cache))),
            nodes: Arc::new(RwLock::new(NodeInteractions::new(config.banning.clone()))),
            time_supplier,
        }
    }
}

/// Ingestion counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestCounters {
    pub block_dispatcher: DispatcherStatus,
    pub transaction_dispatcher: DispatcherStatus,
    pub rollback: RollbackCounters,
    pub num_queued_transactions: usize,
    pub ut_cache_size: usize,
    pub pt_cache_size: usize,
    pub num_banned_nodes: usize,
}

/// Entities removed by a prune.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    pub unconfirmed: usize,
    pub partial: usize,
}

/// Stages whose rejections count toward a ban.
const STATELESS_STAGES: [&str; 2] = [
    BLOCK_STATELESS_VALIDATION_STAGE,
    TRANSACTION_STATELESS_VALIDATION_STAGE,
];

/// Interaction recorded for a completed element.
///
/// Stateless rejections, neutral ones included, are bannable unless the input
/// is trusted. Stateful rejections only count as failures.
fn interaction_outcome(result: &CompletionResult, trusted: bool) -> Option<InteractionOutcome> {
    let bannable = || {
        if trusted {
            InteractionOutcome::Failure
        } else {
            InteractionOutcome::BannableFailure
        }
    };
    let stateless = result.stage.map_or(false, |stage| STATELESS_STAGES.contains(&stage));
    match result.severity {
        ResultSeverity::Success => Some(InteractionOutcome::Success),
        ResultSeverity::Neutral => match result.code {
            ResultCode::ValidationNeutral(_) if stateless => Some(bannable()),
            ResultCode::ValidationNeutral(_) => Some(InteractionOutcome::Failure),
            _ => None,
        },
        ResultSeverity::Failure => Some(InteractionOutcome::Failure),
        ResultSeverity::Fatal => Some(bannable()),
    }
}

/// Inspector shared by both dispatchers.
fn create_inspector(
    name: &'static str,
    nodes: SharedNodeInteractions,
    status_sink: Arc<dyn TransactionStatusSink>,
    local_networks: Vec<String>,
    time_supplier: Arc<dyn TimeSupplier>,
) -> impl Inspector {
    move |input: &mut ConsumerInput, result: &CompletionResult| {
        status_sink.flush();

        let now = time_supplier();
        let mut nodes = nodes.write();
        let identity = input.identity();
        if *identity != NodeIdentity::default() {
            let trusted = input.source().contains(InputSource::LOCAL)
                || is_local_host(&identity.host, &local_networks);
            if let Some(outcome) = interaction_outcome(result, trusted) {
                if nodes.record(identity, outcome, now) {
                    warn!("{}: {} banned after {} ({})", name, identity, input, result.code);
                }
            }
        }
        nodes.prune(now);
    }
}

/// Dispatcher service.
pub struct DispatcherService {
    state: IngestState,
    handlers: DispatcherHandlers,
    block_dispatcher: Arc<ConsumerDispatcher>,
    transaction_dispatcher: Arc<ConsumerDispatcher>,
    batch: TransactionBatchRangeDispatcher,
    rollback: Arc<Mutex<RollbackInfo>>,
}

impl DispatcherService {
    /// Builds and starts both dispatchers.
    pub fn start(
        config: &NodeConfig,
        state: IngestState,
        handlers: DispatcherHandlers,
    ) -> Result<Self> {
        config.validate()?;
        let time_supplier = state.time_supplier.clone();

        let throttle = SpamThrottle::new(config.spam_throttle.clone(), handlers.importance.clone());
        let ut_updater = Arc::new(UtUpdater::new(
            state.ut_cache.clone(),
            handlers.stateful_validator.clone(),
            handlers.status_sink.clone(),
            throttle,
            time_supplier.clone(),
        ));
        let rollback = Arc::new(Mutex::new(RollbackInfo::new(
            time_supplier.clone(),
            config.sync.rollback_recent_window(),
        )));

        let block_hashes = Arc::new(RecentHashCache::new(
            time_supplier.clone(),
            HashCheckOptions::for_blocks(&config.hash_check),
        ));
        let block_dispatcher = DispatcherBuilder::new(DispatcherOptions::from_config(
            BLOCK_DISPATCHER_NAME,
            &config.block_dispatcher,
        ))
        .stage(BlockHashCalculatorStage)
        .stage(BlockHashCheckStage::new(block_hashes))
        .stage(BlockChainCheckStage::new(config.sync.clone(), time_supplier.clone()))
        .stage(BlockStatelessValidationStage::new(handlers.stateless_validator.clone()))
        .stage(ChainSyncStage::new(
            config.sync.clone(),
            handlers.storage.clone(),
            handlers.stateful_validator.clone(),
            rollback.clone(),
            ut_updater.clone(),
        ))
        .stage(NewBlockStage::new(handlers.new_block_sink.clone()))
        .inspector(create_inspector(
            BLOCK_DISPATCHER_NAME,
            state.nodes.clone(),
            handlers.status_sink.clone(),
            config.local_networks.clone(),
            time_supplier.clone(),
        ))
        .build()?;

        let transaction_hashes = Arc::new(RecentHashCache::new(
            time_supplier.clone(),
            HashCheckOptions::for_transactions(&config.hash_check),
        ));
        let ut_cache = state.ut_cache.clone();
        let pt_cache = state.pt_cache.clone();
        let known =
            move |hash: &Hash| ut_cache.view().contains(hash) || pt_cache.view().contains(hash);
        let transaction_dispatcher = DispatcherBuilder::new(DispatcherOptions::from_config(
            TRANSACTION_DISPATCHER_NAME,
            &config.transaction_dispatcher,
        ))
        .stage(TransactionHashCalculatorStage)
        .stage(TransactionHashCheckStage::new(transaction_hashes, Arc::new(known)))
        .stage(TransactionStatelessValidationStage::new(
            handlers.stateless_validator.clone(),
            handlers.status_sink.clone(),
        ))
        .stage(NewTransactionsStage::new(handlers.new_transactions_sink.clone(), ut_updater))
        .inspector(create_inspector(
            TRANSACTION_DISPATCHER_NAME,
            state.nodes.clone(),
            handlers.status_sink.clone(),
            config.local_networks.clone(),
            time_supplier,
        ))
        .build()?;

        let block_dispatcher = Arc::new(block_dispatcher);
        let transaction_dispatcher = Arc::new(transaction_dispatcher);
        Ok(DispatcherService {
            batch: TransactionBatchRangeDispatcher::new(transaction_dispatcher.clone()),
            state,
            handlers,
            block_dispatcher,
            transaction_dispatcher,
            rollback,
        })
    }

    /// Shared state.
    pub fn state(&self) -> &IngestState {
        &self.state
    }

    /// Rejects input from banned nodes, unless produced locally.
    fn check_admission(&self, identity: &NodeIdentity, source: InputSource) -> Result<()> {
        if source.contains(InputSource::LOCAL) {
            return Ok(());
        }
        let now = (self.state.time_supplier)();
        if self.state.nodes.read().is_banned(identity, now) {
            debug!("dropping input from banned node {}", identity);
            return Err(Error::new(ErrorKind::BannedNode));
        }
        Ok(())
    }

    fn check_blocks(&self, range: &BlockRange, source: InputSource) -> Result<()> {
        if range.is_empty() {
            return Err(Error::new(ErrorKind::EmptyRange));
        }
        self.check_admission(&range.identity, source)
    }

    fn check_transactions(&self, range: &TransactionRange, source: InputSource) -> Result<()> {
        if range.is_empty() {
            return Err(Error::new(ErrorKind::EmptyRange));
        }
        let mut hashes = HashSet::with_capacity(range.transactions.len());
        if !range.transactions.iter().all(|tx| hashes.insert(tx.primary_hash())) {
            debug!("duplicated transaction within range from {}", range.identity);
            return Err(Error::new(ErrorKind::DuplicatedEntity));
        }
        self.check_admission(&range.identity, source)
    }

    /// Submits blocks to the block dispatcher.
    pub fn push_blocks(&self, range: BlockRange, source: InputSource) -> Result<ProcessingTicket> {
        self.check_blocks(&range, source)?;
        self.block_dispatcher
            .process_element(ConsumerInput::from_blocks(range, source))
            .into_result()
    }

    /// Submits blocks to the block dispatcher, `callback` is invoked on completion.
    pub fn push_blocks_with<F>(
        &self,
        range: BlockRange,
        source: InputSource,
        callback: F,
    ) -> Result<ElementId>
    where
        F: FnOnce(ElementId, CompletionResult) + Send + 'static,
    {
        self.check_blocks(&range, source)?;
        self.block_dispatcher
            .try_process_element_with(ConsumerInput::from_blocks(range, source), callback)
    }

    /// Submits transactions to the transaction dispatcher right away.
    pub fn push_transactions(
        &self,
        range: TransactionRange,
        source: InputSource,
    ) -> Result<ProcessingTicket> {
        self.check_transactions(&range, source)?;
        self.transaction_dispatcher
            .process_element(ConsumerInput::from_transactions(range, source))
            .into_result()
    }

    /// Queues transactions for the next batch.
    pub fn queue_transactions(&self, range: TransactionRange, source: InputSource) -> Result<()> {
        self.check_transactions(&range, source)?;
        self.batch.queue(range, source);
        Ok(())
    }

    /// Forwards the queued transactions to the transaction dispatcher.
    pub fn dispatch_transactions(&self) -> usize {
        self.batch.dispatch()
    }

    /// Adds a partial transaction waiting for cosignatures.
    /// Returns false if the transaction is not valid, expired or not cacheable.
    pub fn add_partial_transaction(
        &self,
        transaction: Transaction,
        source: InputSource,
    ) -> Result<bool> {
        let info = TransactionInfo::new(transaction);
        let result = self.handlers.stateless_validator.validate_transaction(&info);
        let code = if !result.is_success() {
            Some(result.code())
        } else if info.transaction.deadline <= (self.state.time_supplier)() {
            Some(ResultCode::Expired)
        } else if !self.state.pt_cache.modifier().add(&info) {
            None
        } else {
            trace!("partial transaction {} from {:?} cached", info.entity_hash, source);
            return Ok(true);
        };
        if let Some(code) = code {
            self.handlers
                .status_sink
                .notify(&info.entity_hash, &info.transaction, code);
            self.handlers.status_sink.flush();
        }
        Ok(false)
    }

    /// Attaches a cosignature to a cached partial transaction.
    pub fn add_cosignature(
        &self,
        parent_hash: &Hash,
        cosignature: &Cosignature,
    ) -> Result<TransactionInfo> {
        self.state
            .pt_cache
            .modifier()
            .add_cosignature(parent_hash, cosignature)
            .ok_or_else(|| Error::new(ErrorKind::ResourceNotFound))
    }

    /// Drops the expired pending transactions, notifying the status sink, and
    /// the stale node interactions.
    pub fn prune(&self) -> PruneStats {
        let now = (self.state.time_supplier)();
        let unconfirmed = self.state.ut_cache.modifier().prune(now);
        let partial = self.state.pt_cache.modifier().prune(now);
        for info in unconfirmed.iter().chain(partial.iter()) {
            self.handlers
                .status_sink
                .notify(&info.entity_hash, &info.transaction, ResultCode::Expired);
        }
        self.handlers.status_sink.flush();
        self.state.nodes.write().prune(now);
        PruneStats {
            unconfirmed: unconfirmed.len(),
            partial: partial.len(),
        }
    }

    /// Rollback counters.
    pub fn rollback_counters(&self) -> RollbackCounters {
        self.rollback.lock().counters()
    }

    pub fn counters(&self) -> IngestCounters {
        let now = (self.state.time_supplier)();
        IngestCounters {
            block_dispatcher: self.block_dispatcher.status(),
            transaction_dispatcher: self.transaction_dispatcher.status(),
            rollback: self.rollback_counters(),
            num_queued_transactions: self.batch.num_queued(),
            ut_cache_size: self.state.ut_cache.view().size(),
            pt_cache_size: self.state.pt_cache.view().size(),
            num_banned_nodes: self.state.nodes.read().num_banned(now),
        }
    }

    /// Stops both dispatchers.
    pub fn shutdown(&self) {
        self.block_dispatcher.shutdown();
        self.transaction_dispatcher.shutdown();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        base::{
            schema::tests::{
                create_test_chain, create_test_key, create_test_tx,
                create_test_tx_info_with_deadline,
            },
            tests::TestClock,
            BlockElement,
        },
        config::BanningConfig,
        crypto::PublicKey,
        pipeline::ConsumerResult,
        dispatch::{
            block_stages::tests::create_genesis,
            handlers::{
                MockChainStorage, MockStatefulValidator, MockStatelessValidator,
                MockTransactionStatusSink, ValidationResult,
            },
        },
    };
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    pub struct TestContext {
        pub clock: TestClock,
        pub service: DispatcherService,
        pub new_blocks: Arc<Mutex<Vec<u64>>>,
    }

    pub fn create_test_config() -> NodeConfig {
        NodeConfig {
            banning: BanningConfig {
                min_failures_for_ban: 1,
                min_failure_percent_for_ban: 50,
                ..Default::default()
            },
            local_networks: vec!["127.".to_owned()],
            ..Default::default()
        }
    }

    /// Stateless validator failing transactions with an odd first payload byte.
    pub fn create_stateless_validator() -> MockStatelessValidator {
        let mut validator = MockStatelessValidator::new();
        validator
            .expect_validate_block()
            .returning(|_| ValidationResult::Success);
        validator.expect_validate_transaction().returning(|info| {
            match info.transaction.payload.first().map_or(0, |byte| byte % 2) {
                1 => ValidationResult::Failure(0x99),
                _ => ValidationResult::Success,
            }
        });
        validator
    }

    /// Handlers accepting everything but odd transactions, new blocks heights
    /// are collected in the returned vector.
    pub fn create_test_handlers(
        storage: MockChainStorage,
    ) -> (DispatcherHandlers, Arc<Mutex<Vec<u64>>>) {
        let mut stateful_validator = MockStatefulValidator::new();
        stateful_validator
            .expect_validate_blocks()
            .returning(|_, _| ValidationResult::Success);
        stateful_validator
            .expect_validate_transaction()
            .returning(|_| ValidationResult::Success);
        let mut status_sink = MockTransactionStatusSink::new();
        status_sink.expect_notify().returning(|_, _, _| ());
        status_sink.expect_flush().returning(|| ());
        let new_blocks = Arc::new(Mutex::new(Vec::new()));
        let new_blocks_cloned = new_blocks.clone();
        let handlers = DispatcherHandlers {
            stateless_validator: Arc::new(create_stateless_validator()),
            stateful_validator: Arc::new(stateful_validator),
            storage: Arc::new(storage),
            status_sink: Arc::new(status_sink),
            new_block_sink: Arc::new(move |element: &BlockElement| {
                new_blocks_cloned.lock().push(element.height())
            }),
            new_transactions_sink: Arc::new(|_: &[TransactionInfo]| ()),
            importance: Arc::new(|_: &PublicKey| 0),
        };
        (handlers, new_blocks)
    }

    pub fn create_test_context(storage: MockChainStorage) -> TestContext {
        let (handlers, new_blocks) = create_test_handlers(storage);
        create_test_context_with(handlers, new_blocks)
    }

    fn create_test_context_with(
        handlers: DispatcherHandlers,
        new_blocks: Arc<Mutex<Vec<u64>>>,
    ) -> TestContext {
        let clock = TestClock::new(10_000);
        let config = create_test_config();
        let state = IngestState::new(&config, Arc::new(clock.supplier()));
        let service = DispatcherService::start(&config, state, handlers).unwrap();
        TestContext {
            clock,
            service,
            new_blocks,
        }
    }

    /// Storage holding only the genesis block and accepting any commit.
    pub fn create_genesis_storage() -> MockChainStorage {
        let genesis = create_genesis();
        let mut storage = MockChainStorage::new();
        storage.expect_chain_height().return_const(0u64);
        storage
            .expect_load_block()
            .returning(move |height| if height == 0 { Some(genesis.clone()) } else { None });
        storage.expect_commit().returning(|_, _| Ok(vec![]));
        storage
    }

    fn create_node(seed: u8, host: &str) -> NodeIdentity {
        NodeIdentity::new(create_test_key(seed), host)
    }

    /// Odd nonces give transactions failing the stateless validation.
    fn create_tx(nonce: u32) -> Transaction {
        create_test_tx(nonce)
    }

    fn wait_transactions_completed(service: &DispatcherService, count: u64) {
        for _ in 0..500 {
            if service.counters().transaction_dispatcher.num_completed_elements >= count {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("transaction elements not completed");
    }

    fn push_and_wait(service: &DispatcherService, range: TransactionRange) -> CompletionResult {
        service
            .push_transactions(range, InputSource::REMOTE_PUSH)
            .unwrap()
            .wait_timeout(WAIT)
            .unwrap()
    }

    #[test]
    fn valid_transactions_reach_unconfirmed_cache() {
        let ctx = create_test_context(create_genesis_storage());
        let node = create_node(1, "10.0.0.1");
        let range = TransactionRange::new(vec![create_tx(2), create_tx(4)], node.clone());

        let result = push_and_wait(&ctx.service, range);

        assert_eq!(result.severity, ResultSeverity::Success);
        assert_eq!(ctx.service.counters().ut_cache_size, 2);
        let nodes = ctx.service.state().nodes.read();
        assert_eq!(nodes.totals(&node).num_successes, 1);
    }

    #[test]
    fn stateless_invalid_transaction_bans_node() {
        let ctx = create_test_context(create_genesis_storage());
        let node = create_node(1, "10.0.0.1");
        let range = TransactionRange::new(vec![create_tx(1)], node.clone());

        let result = push_and_wait(&ctx.service, range);

        assert_eq!(result.severity, ResultSeverity::Fatal);
        let now = (ctx.service.state().time_supplier)();
        assert!(ctx.service.state().nodes.read().is_banned(&node, now));

        let range = TransactionRange::new(vec![create_tx(2)], node.clone());
        let res = ctx.service.push_transactions(range.clone(), InputSource::REMOTE_PUSH);
        assert_eq!(res.err().unwrap().kind, ErrorKind::BannedNode);
        let res = ctx.service.queue_transactions(range, InputSource::REMOTE_PUSH);
        assert_eq!(res.unwrap_err().kind, ErrorKind::BannedNode);
        let counters = ctx.service.counters();
        assert_eq!(counters.transaction_dispatcher.num_added_elements, 1);
        assert_eq!(counters.num_queued_transactions, 0);
        assert_eq!(counters.num_banned_nodes, 1);
    }

    #[test]
    fn stateless_neutral_transaction_bans_node() {
        let mut validator = MockStatelessValidator::new();
        validator
            .expect_validate_block()
            .returning(|_| ValidationResult::Success);
        validator
            .expect_validate_transaction()
            .returning(|_| ValidationResult::Neutral(7));
        let (mut handlers, new_blocks) = create_test_handlers(create_genesis_storage());
        handlers.stateless_validator = Arc::new(validator);
        let ctx = create_test_context_with(handlers, new_blocks);
        let node = create_node(1, "10.0.0.1");
        let range = TransactionRange::new(vec![create_tx(2)], node.clone());

        let result = ctx
            .service
            .push_transactions(range, InputSource::REMOTE_PUSH)
            .unwrap()
            .wait_timeout(WAIT)
            .unwrap();

        assert_eq!(result.code, ResultCode::ValidationNeutral(7));
        assert_eq!(result.severity, ResultSeverity::Neutral);
        assert_eq!(result.stage, Some(TRANSACTION_STATELESS_VALIDATION_STAGE));
        let now = (ctx.service.state().time_supplier)();
        let nodes = ctx.service.state().nodes.read();
        assert!(nodes.is_banned(&node, now));
        assert_eq!(nodes.totals(&node).num_failures, 1);
    }

    #[test]
    fn neutral_outcome_depends_on_stage_and_trust() {
        let neutral = |stage| {
            CompletionResult::from_stage(
                stage,
                ConsumerResult::abort(ResultCode::ValidationNeutral(7), ResultSeverity::Neutral),
            )
        };
        let known = CompletionResult::from_stage(
            "transaction hash check",
            ConsumerResult::abort(ResultCode::Known, ResultSeverity::Neutral),
        );

        assert_eq!(
            interaction_outcome(&neutral(BLOCK_STATELESS_VALIDATION_STAGE), false),
            Some(InteractionOutcome::BannableFailure)
        );
        assert_eq!(
            interaction_outcome(&neutral(BLOCK_STATELESS_VALIDATION_STAGE), true),
            Some(InteractionOutcome::Failure)
        );
        assert_eq!(
            interaction_outcome(&neutral("chain sync"), false),
            Some(InteractionOutcome::Failure)
        );
        assert_eq!(interaction_outcome(&known, false), None);
    }

    #[test]
    fn chain_sync_failure_is_recorded_but_not_bannable() {
        let mut stateful_validator = MockStatefulValidator::new();
        stateful_validator
            .expect_validate_blocks()
            .returning(|_, _| ValidationResult::Failure(0x42));
        stateful_validator
            .expect_validate_transaction()
            .returning(|_| ValidationResult::Success);
        let (mut handlers, new_blocks) = create_test_handlers(create_genesis_storage());
        handlers.stateful_validator = Arc::new(stateful_validator);
        let ctx = create_test_context_with(handlers, new_blocks);
        let node = create_node(1, "10.0.0.1");
        let chain = create_test_chain(&create_genesis(), 1, 1);
        let range = BlockRange::new(vec![(*chain[0].block).clone()], node.clone());

        let result = ctx
            .service
            .push_blocks(range.clone(), InputSource::REMOTE_PUSH)
            .unwrap()
            .wait_timeout(WAIT)
            .unwrap();

        assert_eq!(result.code, ResultCode::ValidationFailure(0x42));
        assert_eq!(result.severity, ResultSeverity::Failure);
        assert_eq!(result.stage, Some("chain sync"));
        assert!(ctx.new_blocks.lock().is_empty());
        {
            let now = (ctx.service.state().time_supplier)();
            let nodes = ctx.service.state().nodes.read();
            assert!(!nodes.is_banned(&node, now));
            assert_eq!(nodes.totals(&node).num_failures, 1);
        }
        assert!(ctx.service.push_blocks(range, InputSource::REMOTE_PUSH).is_ok());
    }

    #[test]
    fn stopped_service_reports_stopped_dispatcher() {
        let ctx = create_test_context(create_genesis_storage());
        let node = create_node(1, "10.0.0.1");
        ctx.service.shutdown();

        let res = ctx.service.push_transactions(
            TransactionRange::new(vec![create_tx(2)], node),
            InputSource::REMOTE_PUSH,
        );

        assert_eq!(res.err().unwrap().kind, ErrorKind::DispatcherStopped);
    }

    #[test]
    fn ban_expires_after_ban_duration() {
        let ctx = create_test_context(create_genesis_storage());
        let node = create_node(1, "10.0.0.1");
        let range = TransactionRange::new(vec![create_tx(1)], node.clone());
        push_and_wait(&ctx.service, range);

        ctx.clock.advance(BanningConfig::default().ban_duration());
        let range = TransactionRange::new(vec![create_tx(2)], node);

        assert!(ctx.service.push_transactions(range, InputSource::REMOTE_PUSH).is_ok());
    }

    #[test]
    fn local_network_node_is_never_banned() {
        let ctx = create_test_context(create_genesis_storage());
        let node = create_node(1, "127.0.0.1");
        let range = TransactionRange::new(vec![create_tx(1)], node.clone());

        let result = push_and_wait(&ctx.service, range);

        assert_eq!(result.severity, ResultSeverity::Fatal);
        let now = (ctx.service.state().time_supplier)();
        let nodes = ctx.service.state().nodes.read();
        assert!(!nodes.is_banned(&node, now));
        assert_eq!(nodes.totals(&node).num_failures, 1);
    }

    #[test]
    fn local_source_bypasses_ban() {
        let ctx = create_test_context(create_genesis_storage());
        let node = create_node(1, "10.0.0.1");
        let now = (ctx.service.state().time_supplier)();
        ctx.service.state().nodes.write().ban(&node, now);
        let chain = create_test_chain(&create_genesis(), 1, 1);
        let range = BlockRange::new(vec![(*chain[0].block).clone()], node.clone());

        let remote = ctx.service.push_blocks(range.clone(), InputSource::REMOTE_PUSH);
        let local = ctx
            .service
            .push_blocks(range, InputSource::LOCAL)
            .unwrap()
            .wait_timeout(WAIT)
            .unwrap();

        assert_eq!(remote.err().unwrap().kind, ErrorKind::BannedNode);
        assert_eq!(local.severity, ResultSeverity::Success);
        assert_eq!(*ctx.new_blocks.lock(), vec![1]);
    }

    #[test]
    fn admission_rejects_empty_and_duplicated_ranges() {
        let ctx = create_test_context(create_genesis_storage());
        let node = create_node(1, "10.0.0.1");

        let empty = ctx
            .service
            .push_blocks(BlockRange::new(vec![], node.clone()), InputSource::REMOTE_PULL);
        let duplicated = ctx.service.queue_transactions(
            TransactionRange::new(vec![create_tx(2), create_tx(2)], node),
            InputSource::REMOTE_PUSH,
        );

        assert_eq!(empty.err().unwrap().kind, ErrorKind::EmptyRange);
        assert_eq!(duplicated.unwrap_err().kind, ErrorKind::DuplicatedEntity);
        assert_eq!(ctx.service.counters().block_dispatcher.num_added_elements, 0);
    }

    #[test]
    fn queued_transactions_are_dispatched_in_batch() {
        let ctx = create_test_context(create_genesis_storage());
        let node = create_node(1, "10.0.0.1");
        ctx.service
            .queue_transactions(
                TransactionRange::new(vec![create_tx(2)], node.clone()),
                InputSource::REMOTE_PUSH,
            )
            .unwrap();
        ctx.service
            .queue_transactions(
                TransactionRange::new(vec![create_tx(4)], node),
                InputSource::REMOTE_PUSH,
            )
            .unwrap();

        let dispatched = ctx.service.dispatch_transactions();

        assert_eq!(dispatched, 1);
        wait_transactions_completed(&ctx.service, 1);
        let counters = ctx.service.counters();
        assert_eq!(counters.transaction_dispatcher.num_completed_elements, 1);
        assert_eq!(counters.ut_cache_size, 2);
    }

    #[test]
    fn known_transactions_are_neutral_and_not_recorded() {
        let ctx = create_test_context(create_genesis_storage());
        let node = create_node(1, "10.0.0.1");
        let range = TransactionRange::new(vec![create_tx(2)], node.clone());
        push_and_wait(&ctx.service, range.clone());

        let result = push_and_wait(&ctx.service, range);

        assert_eq!(result.code, ResultCode::Known);
        assert_eq!(result.severity, ResultSeverity::Neutral);
        let totals = ctx.service.state().nodes.read().totals(&node);
        assert_eq!(totals.num_successes, 1);
        assert_eq!(totals.num_failures, 0);
    }

    #[test]
    fn partial_transactions_collect_cosignatures() {
        let ctx = create_test_context(create_genesis_storage());
        let transaction = create_tx(2);
        let hash = transaction.primary_hash();
        let cosignature = Cosignature {
            signer: create_test_key(5),
            signature: vec![1; 64],
        };
        let source = InputSource::REMOTE_PUSH;

        let added = ctx.service.add_partial_transaction(transaction.clone(), source).unwrap();
        let again = ctx.service.add_partial_transaction(transaction, source).unwrap();
        let invalid = ctx.service.add_partial_transaction(create_tx(3), source).unwrap();
        let cosigned = ctx.service.add_cosignature(&hash, &cosignature).unwrap();
        let duplicate = ctx.service.add_cosignature(&hash, &cosignature);

        assert!(added);
        assert!(!again);
        assert!(!invalid);
        assert_eq!(cosigned.entity_hash, hash);
        assert_eq!(duplicate.unwrap_err().kind, ErrorKind::ResourceNotFound);
        let view = ctx.service.state().pt_cache.view();
        assert_eq!(view.find(&hash).unwrap().cosignatures(), &[cosignature][..]);
    }

    #[test]
    fn prune_drops_expired_transactions() {
        let ctx = create_test_context(create_genesis_storage());
        {
            let mut modifier = ctx.service.state().ut_cache.modifier();
            modifier.add(&create_test_tx_info_with_deadline(1, 20_000));
            modifier.add(&create_test_tx_info_with_deadline(2, 40_000));
        }
        ctx.clock.set(30_000);

        let stats = ctx.service.prune();

        assert_eq!(stats, PruneStats { unconfirmed: 1, partial: 0 });
        assert_eq!(ctx.service.counters().ut_cache_size, 1);
    }
}
