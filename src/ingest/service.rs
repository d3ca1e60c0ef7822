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

use super::{
    message::{IngestRequestSender, Message},
    worker::IngestWorker,
};
use crate::{
    channel::confirmed_channel,
    config::NodeConfig,
    dispatch::{DispatcherHandlers, DispatcherService, IngestState},
    harvest::{
        BlockGenerator, HarvestOptions, HarvestingAllowed, LastBlockElementSupplier,
        ScheduledHarvester,
    },
    pipeline::{BlockRange, CompletionCallback, InputSource},
    Result,
};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Local block production collaborators.
#[derive(Clone)]
pub struct HarvestHandlers {
    pub generator: Arc<dyn BlockGenerator>,
    pub harvesting_allowed: Arc<dyn HarvestingAllowed>,
    pub last_block_supplier: Arc<dyn LastBlockElementSupplier>,
}

/// Ingestion service data.
pub struct IngestService {
    /// Worker object.
    worker: Option<IngestWorker>,
    /// Threads data.
    handler: Option<JoinHandle<IngestWorker>>,
    /// To send messages to worker.
    tx_chan: IngestRequestSender,
    /// Dispatchers shared reference.
    service: Arc<DispatcherService>,
    /// To check if the worker thread is still alive.
    canary: Arc<()>,
}

impl IngestService {
    /// Create a new ingestion service instance.
    /// Dispatchers are started right away, the worker on `start`.
    pub fn new(
        config: &NodeConfig,
        state: IngestState,
        handlers: DispatcherHandlers,
        harvest: Option<HarvestHandlers>,
    ) -> Result<Self> {
        let time_supplier = state.time_supplier.clone();
        let service = Arc::new(DispatcherService::start(config, state, handlers)?);

        let harvester = harvest.map(|harvest| {
            let consumer_service = service.clone();
            let options = HarvestOptions {
                harvesting_allowed: harvest.harvesting_allowed,
                last_block_supplier: harvest.last_block_supplier,
                time_supplier,
                range_consumer: Arc::new(move |range: BlockRange, callback: CompletionCallback| {
                    consumer_service
                        .push_blocks_with(range, InputSource::LOCAL, callback)
                        .unwrap_or_else(|err| {
                            debug!("harvested block not accepted: {}", err);
                            0
                        })
                }),
            };
            ScheduledHarvester::new(options, harvest.generator)
        });

        let (tx_chan, rx_chan) = confirmed_channel::<Message, Message>();
        let worker = IngestWorker::new(config.tasks.clone(), service.clone(), harvester, rx_chan);

        Ok(IngestService {
            worker: Some(worker),
            handler: None,
            tx_chan,
            service,
            canary: Arc::new(()),
        })
    }

    /// Start ingestion service.
    pub fn start(&mut self) {
        debug!("Starting ingest service");
        let mut worker = match self.worker.take() {
            Some(worker) => worker,
            None => {
                warn!("service was already running");
                return;
            }
        };

        let mut canary = Arc::clone(&self.canary);
        let handle = thread::spawn(move || {
            let _ = Arc::get_mut(&mut canary);
            worker.run_sync();
            worker
        });
        self.handler = Some(handle);
    }

    /// Stop ingestion service.
    /// Dispatchers keep running until the service is dropped.
    pub fn stop(&mut self) {
        debug!("Stopping ingest service");
        match self.handler.take() {
            Some(handle) => {
                if let Err(err) = self.tx_chan.send_sync(Message::Stop) {
                    error!("Error stopping ingest service thread: {:?}", err);
                }
                match handle.join() {
                    Ok(worker) => self.worker = Some(worker),
                    Err(_) => error!("ingest worker thread panicked"),
                }
            }
            None => {
                debug!("service was not running");
            }
        };
    }

    /// Check if service is running.
    pub fn is_running(&self) -> bool {
        // Intercepts crashed subthreads.
        Arc::strong_count(&self.canary) == 2 && self.worker.is_none()
    }

    /// Get a clone of ingest-service input channel.
    pub fn request_channel(&self) -> IngestRequestSender {
        self.tx_chan.clone()
    }

    /// Get a shared reference to the dispatchers.
    pub fn dispatcher_service(&self) -> Arc<DispatcherService> {
        self.service.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        base::{
            schema::tests::{create_test_block, create_test_tx},
            tests::TestClock,
            Mutex,
        },
        config::TaskConfig,
        dispatch::{
            block_stages::tests::create_genesis,
            service::tests::{create_genesis_storage, create_test_config, create_test_handlers},
        },
        harvest::MockBlockGenerator,
        node::NodeIdentity,
        pipeline::TransactionRange,
        ErrorKind,
    };
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    fn create_config() -> NodeConfig {
        NodeConfig {
            tasks: TaskConfig {
                batch_interval_ms: 10,
                harvest_interval_ms: 10,
                prune_interval_ms: 10,
            },
            ..create_test_config()
        }
    }

    fn create_ingest_service(
        harvest: Option<HarvestHandlers>,
    ) -> (IngestService, Arc<Mutex<Vec<u64>>>) {
        let config = create_config();
        let clock = TestClock::new(10_000);
        let state = IngestState::new(&config, Arc::new(clock.supplier()));
        let (handlers, new_blocks) = create_test_handlers(create_genesis_storage());
        let service = IngestService::new(&config, state, handlers, harvest).unwrap();
        (service, new_blocks)
    }

    fn create_harvest_handlers() -> HarvestHandlers {
        let mut generator = MockBlockGenerator::new();
        generator.expect_generate().returning(|parent, _| {
            let mut block = create_test_block(parent.height() + 1, parent.entity_hash, vec![]);
            block.header.score = 1;
            Some(block)
        });
        HarvestHandlers {
            generator: Arc::new(generator),
            harvesting_allowed: Arc::new(|| true),
            last_block_supplier: Arc::new(create_genesis),
        }
    }

    fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < WAIT {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn start_stop() {
        let (mut svc, _) = create_ingest_service(None);

        svc.start();
        assert!(svc.is_running());

        svc.stop();
        assert!(!svc.is_running());
    }

    #[test]
    fn stopped_subthread() {
        let (mut svc, _) = create_ingest_service(None);

        svc.start();
        assert!(svc.is_running());

        svc.tx_chan.send_sync(Message::Stop).unwrap();
        std::thread::sleep(std::time::Duration::from_secs(1));

        assert!(!svc.is_running());
        svc.stop();
    }

    #[test]
    fn status_request() {
        let (mut svc, _) = create_ingest_service(None);
        svc.start();

        let res_chan = svc.request_channel().send_sync(Message::GetStatusRequest).unwrap();
        let res = res_chan.recv_timeout_sync(WAIT).unwrap();

        assert!(matches!(res, Message::GetStatusResponse(_)));
        svc.stop();
    }

    #[test]
    fn queued_transactions_are_dispatched_by_batch_task() {
        let (mut svc, _) = create_ingest_service(None);
        svc.start();
        let range = TransactionRange::new(
            vec![create_test_tx(2), create_test_tx(4)],
            NodeIdentity::default(),
        );

        let res_chan = svc
            .request_channel()
            .send_sync(Message::PutTransactionsRequest {
                range,
                source: InputSource::REMOTE_PUSH,
            })
            .unwrap();
        let res = res_chan.recv_timeout_sync(WAIT).unwrap();

        assert!(matches!(res, Message::PutTransactionsResponse));
        let dispatcher = svc.dispatcher_service();
        assert!(wait_until(|| dispatcher.counters().ut_cache_size == 2));
        svc.stop();
    }

    #[test]
    fn empty_blocks_request_gets_exception() {
        let (mut svc, _) = create_ingest_service(None);
        svc.start();

        let res_chan = svc
            .request_channel()
            .send_sync(Message::PutBlocksRequest {
                range: BlockRange::default(),
                source: InputSource::REMOTE_PUSH,
            })
            .unwrap();
        let res = res_chan.recv_timeout_sync(WAIT).unwrap();

        match res {
            Message::Exception(err) => assert_eq!(err.kind, ErrorKind::EmptyRange),
            other => panic!("unexpected response {:?}", other),
        }
        svc.stop();
    }

    #[test]
    fn harvest_task_dispatches_local_block() {
        let (mut svc, new_blocks) = create_ingest_service(Some(create_harvest_handlers()));

        svc.start();

        assert!(wait_until(|| !new_blocks.lock().is_empty()));
        svc.stop();
        assert_eq!(new_blocks.lock()[0], 1);
    }
}
