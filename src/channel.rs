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

//! Bounded channels built on top of async-std channels.
//!
//! Besides the plain [Sender]/[Receiver] pair, used as dispatcher input queues
//! and as one-shot completion slots, the module offers a confirmed channel
//! where the consumer answers each request through a dedicated response
//! channel. The producer side is the [RequestSender], the consumer side is the
//! [RequestReceiver].

use async_std::{
    channel::{
        self as async_channel, Receiver as AsyncReceiver, Sender as AsyncSender, TryRecvError,
        TrySendError,
    },
    task,
};
use std::{fmt::Display, pin::Pin, time::Duration};

/// Default upper bound to outstanding channel elements.
pub const CHANNEL_BOUND: usize = 1000;

/// Polling period used by the receive with timeout methods.
const RECV_POLL_PERIOD: Duration = Duration::from_millis(10);

/// Errors which can be triggered by a channel.
#[derive(Debug, PartialEq, Eq)]
pub enum ChannelError {
    /// Error during send. Broken channel.
    SendError,
    /// Error during receive. Broken channel.
    RecvError,
    /// Timeout during receive.
    RecvTimeout,
    /// Non blocking send on a channel without free slots.
    Full,
}

impl std::error::Error for ChannelError {}

impl Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            ChannelError::SendError => "channel send error",
            ChannelError::RecvError => "channel recv error",
            ChannelError::RecvTimeout => "channel recv timeout",
            ChannelError::Full => "channel full",
        };
        write!(f, "{}", msg)
    }
}

/// Creates a mpmc channel holding at most `bound` outstanding elements.
pub fn bounded_channel<T>(bound: usize) -> (Sender<T>, Receiver<T>) {
    let (sender, receiver) = async_channel::bounded::<T>(bound);
    (Sender(sender), Receiver(receiver))
}

/// Creates a channel able to hold exactly one element.
/// Used to deliver a single result back to a waiting party.
pub fn oneshot_channel<T>() -> (Sender<T>, Receiver<T>) {
    bounded_channel(1)
}

/// Channel sender side.
pub struct Sender<T>(AsyncSender<T>);

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Sender(self.0.clone())
    }
}

impl<T> Sender<T> {
    /// Sends a value, waiting for a free slot if the channel is full.
    pub async fn send(&self, value: T) -> Result<(), ChannelError> {
        self.0.send(value).await.map_err(|_| ChannelError::SendError)
    }

    /// Sends a value, synchronous wrapper.
    pub fn send_sync(&self, value: T) -> Result<(), ChannelError> {
        task::block_on(self.send(value))
    }

    /// Sends a value without waiting.
    /// Fails with `Full` when there are no free slots.
    pub fn try_send(&self, value: T) -> Result<(), ChannelError> {
        self.0.try_send(value).map_err(|err| match err {
            TrySendError::Full(_) => ChannelError::Full,
            TrySendError::Closed(_) => ChannelError::SendError,
        })
    }

    /// Number of elements waiting in the channel.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the channel has no outstanding elements.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Closes the channel.
    /// Returns true if this call has closed the channel and it was not closed already.
    /// The remaining messages can still be received.
    pub fn close(&self) -> bool {
        self.0.close()
    }
}

/// Channel receiver side.
pub struct Receiver<T>(AsyncReceiver<T>);

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        Receiver(self.0.clone())
    }
}

impl<T> Receiver<T> {
    /// Waits for the next value.
    pub async fn recv(&self) -> Result<T, ChannelError> {
        self.0.recv().await.map_err(|_| ChannelError::RecvError)
    }

    /// Waits for the next value at most `timeout`.
    pub async fn recv_timeout(&self, timeout: Duration) -> Result<T, ChannelError> {
        let mut timeout = timeout;
        loop {
            match self.0.try_recv() {
                Ok(res) => return Ok(res),
                Err(TryRecvError::Empty) if timeout > Duration::ZERO => {
                    task::sleep(RECV_POLL_PERIOD).await;
                    timeout = timeout.saturating_sub(RECV_POLL_PERIOD);
                }
                Err(TryRecvError::Empty) => return Err(ChannelError::RecvTimeout),
                Err(TryRecvError::Closed) => return Err(ChannelError::RecvError),
            }
        }
    }

    /// Waits for the next value, synchronous wrapper.
    pub fn recv_sync(&self) -> Result<T, ChannelError> {
        task::block_on(self.recv())
    }

    /// Waits for the next value with timeout, synchronous wrapper.
    pub fn recv_timeout_sync(&self, timeout: Duration) -> Result<T, ChannelError> {
        task::block_on(self.recv_timeout(timeout))
    }
}

/// Create a [RequestSender] and a [RequestReceiver] with a channel between them.
///
/// The [RequestSender] can be cloned to be able to do requests to the same
/// [RequestReceiver] from multiple threads.
pub fn confirmed_channel<Req, Res>() -> (RequestSender<Req, Res>, RequestReceiver<Req, Res>) {
    let (request_sender, request_receiver) =
        async_channel::bounded::<(Req, Sender<Res>)>(CHANNEL_BOUND);
    (
        RequestSender(request_sender),
        RequestReceiver(request_receiver),
    )
}

/// Producer side of a confirmed channel.
pub struct RequestSender<Req, Res>(AsyncSender<(Req, Sender<Res>)>);

impl<Req, Res> Clone for RequestSender<Req, Res> {
    fn clone(&self) -> Self {
        RequestSender(self.0.clone())
    }
}

impl<Req, Res> RequestSender<Req, Res> {
    /// Send request to the connected [RequestReceiver].
    /// Returns a [ResponseReceiver] which is used to receive the response.
    pub async fn send(&self, request: Req) -> Result<ResponseReceiver<Res>, ChannelError> {
        let (response_sender, response_receiver) = oneshot_channel();
        self.0
            .send((request, response_sender))
            .await
            .map_err(|_| ChannelError::SendError)
            .map(|_| response_receiver)
    }

    /// Send request, synchronous wrapper.
    pub fn send_sync(&self, request: Req) -> Result<ResponseReceiver<Res>, ChannelError> {
        task::block_on(self.send(request))
    }
}

/// Consumer side of a confirmed channel, consumed as a [futures::Stream].
/// Requests are a tuple of a message and a [ResponseSender] which is used to
/// respond back to the [ResponseReceiver].
pub struct RequestReceiver<Req, Res>(AsyncReceiver<(Req, Sender<Res>)>);

/// Type alias for simple sender used to answer a request.
pub type ResponseSender<Res> = Sender<Res>;

/// Type alias for simple receiver returned by [RequestSender::send].
pub type ResponseReceiver<Res> = Receiver<Res>;

/// Stream implementation for [RequestReceiver].
impl<Req, Res> futures::Stream for RequestReceiver<Req, Res> {
    type Item = (Req, ResponseSender<Res>);

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        Pin::new(&mut self.0).poll_next(cx)
    }
}
