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

use super::message::{IngestRequestReceiver, Message};
use crate::{
    config::TaskConfig, dispatch::DispatcherService, harvest::ScheduledHarvester, Error,
    ErrorKind, Result,
};
use async_std::task::{self, Context, Poll};
use futures::{future, prelude::*};
use std::sync::Arc;

/// Ingestion worker.
/// Answers the service requests and drives the periodic tasks.
pub struct IngestWorker {
    /// Periodic tasks settings.
    config: TaskConfig,
    /// Block and transaction dispatchers.
    service: Arc<DispatcherService>,
    /// Block harvester, `None` on non harvesting nodes.
    harvester: Option<ScheduledHarvester>,
    /// Ingestion requests receiver.
    rx_chan: IngestRequestReceiver,
}

impl IngestWorker {
    pub fn new(
        config: TaskConfig,
        service: Arc<DispatcherService>,
        harvester: Option<ScheduledHarvester>,
        rx_chan: IngestRequestReceiver,
    ) -> Self {
        IngestWorker {
            config,
            service,
            harvester,
            rx_chan,
        }
    }

    fn handle_request(&self, req: Message) -> Result<Message> {
        match req {
            Message::PutBlocksRequest { range, source } => self
                .service
                .push_blocks_with(range, source, |_, _| ())
                .map(|id| Message::PutBlocksResponse { id }),
            Message::PutTransactionsRequest { range, source } => self
                .service
                .queue_transactions(range, source)
                .map(|_| Message::PutTransactionsResponse),
            Message::PutPartialTransactionRequest {
                transaction,
                source,
            } => self
                .service
                .add_partial_transaction(transaction, source)
                .map(|cached| Message::PutPartialTransactionResponse { cached }),
            Message::PutCosignatureRequest { hash, cosignature } => self
                .service
                .add_cosignature(&hash, &cosignature)
                .map(|info| Message::PutCosignatureResponse {
                    hash: info.entity_hash,
                }),
            Message::GetStatusRequest => Ok(Message::GetStatusResponse(self.service.counters())),
            _ => Err(Error::new_ext(
                ErrorKind::MalformedData,
                "unexpected request".to_owned(),
            )),
        }
    }

    /// Handles a single request, errors are returned as `Exception` messages.
    pub fn handle_message(&self, req: Message) -> Message {
        self.handle_request(req).unwrap_or_else(|err| {
            debug!("ingest request rejected: {}", err.to_string_full());
            Message::Exception(err)
        })
    }

    fn run_harvest(&self) {
        if let Some(harvester) = &self.harvester {
            let outcome = harvester.harvest();
            debug!("harvest attempt: {:?}", outcome);
        }
    }

    fn run_prune(&self) {
        let stats = self.service.prune();
        if stats.unconfirmed + stats.partial > 0 {
            debug!(
                "pruned {} unconfirmed and {} partial transactions",
                stats.unconfirmed, stats.partial
            );
        }
    }

    /// Ingestion worker asynchronous task.
    /// This can be stopped by submitting a `Stop` message to its input channel.
    pub async fn run(&mut self) {
        let batch_interval = self.config.batch_interval();
        let harvest_interval = self.config.harvest_interval();
        let prune_interval = self.config.prune_interval();

        let mut batch_sleep = Box::pin(task::sleep(batch_interval));
        let mut harvest_sleep = Box::pin(task::sleep(harvest_interval));
        let mut prune_sleep = Box::pin(task::sleep(prune_interval));

        let future = future::poll_fn(move |cx: &mut Context<'_>| -> Poll<()> {
            while batch_sleep.poll_unpin(cx).is_ready() {
                let count = self.service.dispatch_transactions();
                if count > 0 {
                    trace!("{} transaction ranges dispatched", count);
                }
                batch_sleep = Box::pin(task::sleep(batch_interval));
            }

            while harvest_sleep.poll_unpin(cx).is_ready() {
                self.run_harvest();
                harvest_sleep = Box::pin(task::sleep(harvest_interval));
            }

            while prune_sleep.poll_unpin(cx).is_ready() {
                self.run_prune();
                prune_sleep = Box::pin(task::sleep(prune_interval));
            }

            loop {
                match self.rx_chan.poll_next_unpin(cx) {
                    Poll::Ready(Some((Message::Stop, _))) => return Poll::Ready(()),
                    Poll::Ready(Some((req, res_chan))) => {
                        let res = self.handle_message(req);
                        if let Err(err) = res_chan.try_send(res) {
                            warn!("ingest response send error: {}", err);
                        }
                    }
                    Poll::Ready(None) => return Poll::Ready(()),
                    Poll::Pending => break,
                }
            }
            Poll::Pending
        });

        future.await
    }

    /// Ingestion worker synchronous task.
    /// This can be stopped by submitting a `Stop` message to its input channel.
    pub fn run_sync(&mut self) {
        task::block_on(self.run());
    }

    /// Get a shared reference to the dispatcher service.
    pub fn service_arc(&self) -> Arc<DispatcherService> {
        self.service.clone()
    }
}
