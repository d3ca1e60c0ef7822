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

//! Transaction dispatcher stages.
//!
//! Stages mark the transactions they reject with the `skip` flag, the
//! following stages only see the active ones.

use super::{
    handlers::{KnownHashPredicate, NewTransactionsSink, StatelessValidator, TransactionStatusSink},
    ut_updater::UtUpdater,
};
use crate::{
    base::TransactionInfo,
    cache::RecentHashCache,
    crypto::Hashable,
    pipeline::{ConsumerInput, ConsumerResult, ResultCode, ResultSeverity, Stage},
};
use std::sync::Arc;

/// Computes the transaction hashes.
pub struct TransactionHashCalculatorStage;

impl Stage for TransactionHashCalculatorStage {
    fn name(&self) -> &'static str {
        "transaction hash calculator"
    }

    fn run(&mut self, input: &mut ConsumerInput) -> ConsumerResult {
        for element in input.transactions_mut() {
            element.info.entity_hash = element.info.transaction.primary_hash();
        }
        ConsumerResult::proceed()
    }
}

/// Skips the transactions seen a moment ago or already known.
pub struct TransactionHashCheckStage {
    cache: Arc<RecentHashCache>,
    known: Arc<dyn KnownHashPredicate>,
}

impl TransactionHashCheckStage {
    pub fn new(cache: Arc<RecentHashCache>, known: Arc<dyn KnownHashPredicate>) -> Self {
        TransactionHashCheckStage { cache, known }
    }
}

impl Stage for TransactionHashCheckStage {
    fn name(&self) -> &'static str {
        "transaction hash check"
    }

    fn run(&mut self, input: &mut ConsumerInput) -> ConsumerResult {
        let mut num_active = 0;
        for element in input.transactions_mut().iter_mut().filter(|element| !element.skip) {
            let hash = element.info.entity_hash;
            if !self.cache.add(&hash) || (self.known)(&hash) {
                element.skip = true;
            } else {
                num_active += 1;
            }
        }
        if num_active == 0 {
            return ConsumerResult::abort(ResultCode::Known, ResultSeverity::Neutral);
        }
        ConsumerResult::proceed()
    }
}

/// Name of the transactions stateless validation stage.
pub(crate) const TRANSACTION_STATELESS_VALIDATION_STAGE: &str =
    "transaction stateless validation";

/// Chain state independent validation of every transaction.
///
/// Invalid transactions are reported to the status sink. A single invalid
/// transaction aborts the whole element.
pub struct TransactionStatelessValidationStage {
    validator: Arc<dyn StatelessValidator>,
    status_sink: Arc<dyn TransactionStatusSink>,
}

impl TransactionStatelessValidationStage {
    pub fn new(
        validator: Arc<dyn StatelessValidator>,
        status_sink: Arc<dyn TransactionStatusSink>,
    ) -> Self {
        TransactionStatelessValidationStage {
            validator,
            status_sink,
        }
    }
}

impl Stage for TransactionStatelessValidationStage {
    fn name(&self) -> &'static str {
        TRANSACTION_STATELESS_VALIDATION_STAGE
    }

    fn run(&mut self, input: &mut ConsumerInput) -> ConsumerResult {
        let mut failure = None;
        let mut last_neutral = None;
        let mut num_active = 0;
        for element in input.transactions_mut().iter_mut().filter(|element| !element.skip) {
            let result = self.validator.validate_transaction(&element.info);
            if result.is_success() {
                num_active += 1;
                continue;
            }
            let code = result.code();
            self.status_sink
                .notify(&element.info.entity_hash, &element.info.transaction, code);
            element.skip = true;
            match code {
                ResultCode::ValidationFailure(_) => {
                    failure.get_or_insert(code);
                }
                _ => last_neutral = Some(code),
            }
        }

        if let Some(code) = failure {
            debug!("transactions element failed stateless validation: {}", code);
            return ConsumerResult::abort(code, ResultSeverity::Fatal);
        }
        if num_active == 0 {
            let code = last_neutral.unwrap_or(ResultCode::Known);
            return ConsumerResult::abort(code, ResultSeverity::Neutral);
        }
        ConsumerResult::proceed()
    }
}

/// Forwards the surviving transactions to the new transactions sink and to
/// the unconfirmed cache.
pub struct NewTransactionsStage {
    sink: Arc<dyn NewTransactionsSink>,
    ut_updater: Arc<UtUpdater>,
}

impl NewTransactionsStage {
    pub fn new(sink: Arc<dyn NewTransactionsSink>, ut_updater: Arc<UtUpdater>) -> Self {
        NewTransactionsStage { sink, ut_updater }
    }
}

impl Stage for NewTransactionsStage {
    fn name(&self) -> &'static str {
        "new transactions"
    }

    fn run(&mut self, input: &mut ConsumerInput) -> ConsumerResult {
        let infos: Vec<TransactionInfo> = input
            .active_transactions()
            .map(|element| element.info.clone())
            .collect();
        if infos.is_empty() {
            return ConsumerResult::proceed();
        }
        (self.sink)(&infos);
        self.ut_updater.update_new(&infos);
        ConsumerResult::proceed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        base::{schema::tests::create_test_tx, tests::TestClock, Mutex, Transaction},
        cache::{HashCheckOptions, MemoryCacheOptions, MemoryUtCache},
        config::SpamThrottleConfig,
        crypto::{Hash, PublicKey},
        dispatch::{
            handlers::{
                MockStatefulValidator, MockStatelessValidator, MockTransactionStatusSink,
                ValidationResult,
            },
            throttle::SpamThrottle,
        },
        node::NodeIdentity,
        pipeline::{CompletionStatus, InputSource, TransactionRange},
    };
    use std::{collections::HashSet, time::Duration};

    /// Transactions input with the hashes already computed.
    fn create_input(nonces: &[u32]) -> ConsumerInput {
        let transactions: Vec<Transaction> =
            nonces.iter().map(|nonce| create_test_tx(*nonce)).collect();
        let mut input = ConsumerInput::from_transactions(
            TransactionRange::new(transactions, NodeIdentity::default()),
            InputSource::REMOTE_PUSH,
        );
        TransactionHashCalculatorStage.run(&mut input);
        input
    }

    fn create_recent_cache() -> Arc<RecentHashCache> {
        let options = HashCheckOptions::new(Duration::from_secs(60), Duration::from_secs(10), 100);
        Arc::new(RecentHashCache::new(Arc::new(TestClock::new(1_000).supplier()), options))
    }

    fn skip_flags(input: &ConsumerInput) -> Vec<bool> {
        input.transactions().iter().map(|element| element.skip).collect()
    }

    fn create_validator(results: Vec<(u32, ValidationResult)>) -> MockStatelessValidator {
        let results: Vec<(Hash, ValidationResult)> = results
            .into_iter()
            .map(|(nonce, result)| {
                (TransactionInfo::new(create_test_tx(nonce)).entity_hash, result)
            })
            .collect();
        let mut validator = MockStatelessValidator::new();
        validator.expect_validate_transaction().returning(move |info| {
            results
                .iter()
                .find(|(hash, _)| *hash == info.entity_hash)
                .map_or(ValidationResult::Success, |(_, result)| *result)
        });
        validator
    }

    #[test]
    fn hash_calculator_fills_hashes() {
        let mut input = ConsumerInput::from_transactions(
            TransactionRange::new(vec![create_test_tx(1)], NodeIdentity::default()),
            InputSource::LOCAL,
        );

        TransactionHashCalculatorStage.run(&mut input);

        assert_eq!(input.transactions()[0].info, TransactionInfo::new(create_test_tx(1)));
    }

    #[test]
    fn hash_check_skips_recent_and_known_transactions() {
        let known_hash = TransactionInfo::new(create_test_tx(3)).entity_hash;
        let mut stage = TransactionHashCheckStage::new(
            create_recent_cache(),
            Arc::new(move |hash: &Hash| *hash == known_hash),
        );
        stage.run(&mut create_input(&[1]));
        let mut input = create_input(&[1, 2, 3]);

        let result = stage.run(&mut input);

        assert_eq!(result, ConsumerResult::proceed());
        assert_eq!(skip_flags(&input), vec![true, false, true]);
    }

    #[test]
    fn hash_check_is_neutral_when_all_known() {
        let mut stage =
            TransactionHashCheckStage::new(create_recent_cache(), Arc::new(|_: &Hash| false));
        stage.run(&mut create_input(&[1, 2]));

        let result = stage.run(&mut create_input(&[2, 1]));

        assert_eq!(result, ConsumerResult::abort(ResultCode::Known, ResultSeverity::Neutral));
    }

    #[test]
    fn stateless_failure_aborts_element_as_fatal() {
        let mut sink = MockTransactionStatusSink::new();
        sink.expect_notify()
            .withf(|_, _, code| *code == ResultCode::ValidationFailure(0x11))
            .times(1)
            .returning(|_, _, _| ());
        let validator = create_validator(vec![(2, ValidationResult::Failure(0x11))]);
        let mut stage =
            TransactionStatelessValidationStage::new(Arc::new(validator), Arc::new(sink));
        let mut input = create_input(&[1, 2, 3]);

        let result = stage.run(&mut input);

        assert_eq!(result.status, CompletionStatus::Aborted);
        assert_eq!(result.severity, ResultSeverity::Fatal);
        assert_eq!(result.code, ResultCode::ValidationFailure(0x11));
        assert_eq!(skip_flags(&input), vec![false, true, false]);
    }

    #[test]
    fn stateless_neutral_skips_transaction() {
        let mut sink = MockTransactionStatusSink::new();
        sink.expect_notify().times(1).returning(|_, _, _| ());
        let validator = create_validator(vec![(1, ValidationResult::Neutral(4))]);
        let mut stage =
            TransactionStatelessValidationStage::new(Arc::new(validator), Arc::new(sink));
        let mut input = create_input(&[1, 2]);

        let result = stage.run(&mut input);

        assert_eq!(result, ConsumerResult::proceed());
        assert_eq!(skip_flags(&input), vec![true, false]);
    }

    #[test]
    fn stateless_validation_ignores_skipped_transactions() {
        let mut sink = MockTransactionStatusSink::new();
        sink.expect_notify().never();
        let mut validator = MockStatelessValidator::new();
        validator
            .expect_validate_transaction()
            .times(1)
            .returning(|_| ValidationResult::Success);
        let mut stage =
            TransactionStatelessValidationStage::new(Arc::new(validator), Arc::new(sink));
        let mut input = create_input(&[1, 2]);
        input.transactions_mut()[0].skip = true;

        let result = stage.run(&mut input);

        assert_eq!(result, ConsumerResult::proceed());
    }

    #[test]
    fn new_transactions_reach_sink_and_cache() {
        let received = Arc::new(Mutex::new(HashSet::new()));
        let received_cloned = received.clone();
        let sink = move |infos: &[TransactionInfo]| {
            received_cloned
                .lock()
                .extend(infos.iter().map(|info| info.entity_hash));
        };
        let cache = Arc::new(MemoryUtCache::new(MemoryCacheOptions::new(u64::MAX, 10)));
        let mut validator = MockStatefulValidator::new();
        validator
            .expect_validate_transaction()
            .returning(|_| ValidationResult::Success);
        let ut_updater = Arc::new(UtUpdater::new(
            cache.clone(),
            Arc::new(validator),
            Arc::new(MockTransactionStatusSink::new()),
            SpamThrottle::new(SpamThrottleConfig::default(), Arc::new(|_: &PublicKey| 0)),
            Arc::new(TestClock::new(1_000).supplier()),
        ));
        let mut stage = NewTransactionsStage::new(Arc::new(sink), ut_updater);
        let mut input = create_input(&[1, 2, 3]);
        input.transactions_mut()[1].skip = true;

        let result = stage.run(&mut input);

        assert_eq!(result, ConsumerResult::proceed());
        let expected: HashSet<Hash> = [1, 3]
            .iter()
            .map(|nonce| TransactionInfo::new(create_test_tx(*nonce)).entity_hash)
            .collect();
        assert_eq!(*received.lock(), expected);
        let view = cache.view();
        assert_eq!(view.size(), 2);
        assert!(expected.iter().all(|hash| view.contains(hash)));
    }
}
