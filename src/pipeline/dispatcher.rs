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

//! Ordered stages dispatcher.
//!
//! A dispatcher owns a bounded queue and a single worker thread. Elements are
//! processed one at a time, in submission order, by every configured stage.
//! A terminal stage result short-circuits the remaining stages, the inspector
//! always runs last.

use super::{CompletionResult, ConsumerInput, Inspector, Stage};
use crate::{
    base::Mutex,
    channel::{bounded_channel, oneshot_channel, ChannelError, Receiver, Sender},
    config::{DispatcherConfig, QueueFullPolicy},
    Error, ErrorKind, Result,
};
use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, AtomicU8, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

/// Element identifier, zero means the element was not accepted.
pub type ElementId = u64;

/// Element completion callback.
pub type CompletionCallback = Box<dyn FnOnce(ElementId, CompletionResult) + Send>;

/// Dispatcher options.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherOptions {
    /// Dispatcher name.
    pub name: String,
    /// Max number of queued elements.
    pub queue_size: usize,
    /// An element trace is logged every `element_trace_interval` elements.
    pub element_trace_interval: u64,
    /// Queue overflow policy.
    pub full_policy: QueueFullPolicy,
}

impl DispatcherOptions {
    pub fn new(name: &str, queue_size: usize) -> Self {
        DispatcherOptions {
            name: name.to_owned(),
            queue_size,
            element_trace_interval: 1,
            full_policy: QueueFullPolicy::Reject,
        }
    }

    pub fn from_config(name: &str, config: &DispatcherConfig) -> Self {
        DispatcherOptions {
            name: name.to_owned(),
            queue_size: config.queue_size,
            element_trace_interval: config.element_trace_interval,
            full_policy: config.full_policy,
        }
    }
}

/// Dispatcher lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DispatcherState {
    Created = 0,
    Running = 1,
    ShuttingDown = 2,
    Stopped = 3,
}

impl From<u8> for DispatcherState {
    fn from(value: u8) -> Self {
        match value {
            0 => DispatcherState::Created,
            1 => DispatcherState::Running,
            2 => DispatcherState::ShuttingDown,
            _ => DispatcherState::Stopped,
        }
    }
}

/// Dispatcher observable status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherStatus {
    pub name: String,
    pub num_stages: usize,
    pub is_running: bool,
    pub num_added_elements: u64,
    pub num_completed_elements: u64,
    pub num_queued_elements: usize,
}

/// Handle to the completion of a submitted element.
pub struct ProcessingTicket {
    id: ElementId,
    receiver: std::result::Result<Receiver<CompletionResult>, ErrorKind>,
}

impl ProcessingTicket {
    fn rejected(reason: ErrorKind) -> Self {
        ProcessingTicket {
            id: 0,
            receiver: Err(reason),
        }
    }

    /// Element identifier, zero when rejected.
    pub fn id(&self) -> ElementId {
        self.id
    }

    pub fn is_rejected(&self) -> bool {
        self.id == 0
    }

    /// Why the element was not accepted, `None` when accepted.
    pub fn rejection(&self) -> Option<ErrorKind> {
        self.receiver.as_ref().err().copied()
    }

    /// Turns a rejected ticket into its rejection error.
    pub fn into_result(self) -> Result<Self> {
        match self.rejection() {
            Some(kind) => Err(Error::new(kind)),
            None => Ok(self),
        }
    }

    /// Waits for the element completion.
    pub fn wait(&self) -> Result<CompletionResult> {
        self.receiver()?.recv_sync().map_err(Self::map_err)
    }

    /// Waits for the element completion at most `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<CompletionResult> {
        self.receiver()?
            .recv_timeout_sync(timeout)
            .map_err(Self::map_err)
    }

    fn receiver(&self) -> Result<&Receiver<CompletionResult>> {
        self.receiver.as_ref().map_err(|kind| Error::new(*kind))
    }

    fn map_err(err: ChannelError) -> Error {
        Error::new_ext(ErrorKind::DispatcherStopped, err)
    }
}

enum Completion {
    Ticket(Sender<CompletionResult>),
    Callback(CompletionCallback),
}

impl Completion {
    fn complete(self, id: ElementId, result: CompletionResult) {
        match self {
            Completion::Ticket(sender) => {
                // The submitter may have dropped the ticket.
                let _ = sender.try_send(result);
            }
            Completion::Callback(callback) => callback(id, result),
        }
    }

    /// Completes the element, a faulting callback is logged and swallowed.
    fn complete_guarded(self, name: &str, id: ElementId, result: CompletionResult) {
        if panic::catch_unwind(AssertUnwindSafe(|| self.complete(id, result))).is_err() {
            error!("{} completion of element {} faulted", name, id);
        }
    }
}

struct QueuedElement {
    id: ElementId,
    input: ConsumerInput,
    completion: Completion,
}

#[derive(Default)]
struct DispatcherCounters {
    last_id: AtomicU64,
    added: AtomicU64,
    completed: AtomicU64,
}

/// Builds a dispatcher from its ordered stages.
pub struct DispatcherBuilder {
    options: DispatcherOptions,
    stages: Vec<Box<dyn Stage>>,
    inspector: Option<Box<dyn Inspector>>,
}

impl DispatcherBuilder {
    pub fn new(options: DispatcherOptions) -> Self {
        DispatcherBuilder {
            options,
            stages: Vec::new(),
            inspector: None,
        }
    }

    /// Appends a stage.
    pub fn stage<S: Stage>(mut self, stage: S) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Appends a boxed stage.
    pub fn boxed_stage(mut self, stage: Box<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Sets the inspector.
    pub fn inspector<I: Inspector>(mut self, inspector: I) -> Self {
        self.inspector = Some(Box::new(inspector));
        self
    }

    /// Starts the dispatcher worker.
    pub fn build(self) -> Result<ConsumerDispatcher> {
        ConsumerDispatcher::start(self.options, self.stages, self.inspector)
    }
}

/// Ordered stages dispatcher.
pub struct ConsumerDispatcher {
    name: String,
    num_stages: usize,
    full_policy: QueueFullPolicy,
    state: Arc<AtomicU8>,
    counters: Arc<DispatcherCounters>,
    sender: Sender<QueuedElement>,
    /// Serializes id assignment and enqueue.
    submit_lock: Mutex<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ConsumerDispatcher {
    fn start(
        options: DispatcherOptions,
        stages: Vec<Box<dyn Stage>>,
        inspector: Option<Box<dyn Inspector>>,
    ) -> Result<Self> {
        if options.name.is_empty() {
            return Err(Error::new_ext(ErrorKind::InvalidConfiguration, "dispatcher name is empty"));
        }
        if options.queue_size == 0 {
            return Err(Error::new_ext(
                ErrorKind::InvalidConfiguration,
                "dispatcher queue size is zero",
            ));
        }
        if stages.is_empty() {
            return Err(Error::new_ext(ErrorKind::InvalidConfiguration, "dispatcher has no stages"));
        }

        let (sender, receiver) = bounded_channel(options.queue_size);
        let state = Arc::new(AtomicU8::new(DispatcherState::Created as u8));
        let counters = Arc::new(DispatcherCounters::default());
        let num_stages = stages.len();

        let mut worker = DispatcherWorker {
            name: options.name.clone(),
            trace_interval: options.element_trace_interval,
            stages,
            inspector,
            state: state.clone(),
            counters: counters.clone(),
        };
        let worker_state = state.clone();
        state.store(DispatcherState::Running as u8, Ordering::SeqCst);
        let handle = thread::Builder::new()
            .name(options.name.clone())
            .spawn(move || {
                if panic::catch_unwind(AssertUnwindSafe(|| worker.run(receiver))).is_err() {
                    error!("{} worker faulted", worker.name);
                }
                // The dispatcher cannot accept work without its worker.
                let _ = worker_state.compare_exchange(
                    DispatcherState::Running as u8,
                    DispatcherState::Stopped as u8,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
            })
            .map_err(|err| Error::new_ext(ErrorKind::Other, err))?;
        info!("{} started with {} stages", options.name, num_stages);

        Ok(ConsumerDispatcher {
            name: options.name,
            num_stages,
            full_policy: options.full_policy,
            state,
            counters,
            sender,
            submit_lock: Mutex::new(()),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Dispatcher name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> DispatcherState {
        self.state.load(Ordering::SeqCst).into()
    }

    pub fn is_running(&self) -> bool {
        self.state() == DispatcherState::Running
    }

    /// Submits an element, the completion is delivered through the returned ticket.
    pub fn process_element(&self, input: ConsumerInput) -> ProcessingTicket {
        let (sender, receiver) = oneshot_channel();
        match self.submit(input, Completion::Ticket(sender)) {
            Ok(id) => ProcessingTicket {
                id,
                receiver: Ok(receiver),
            },
            Err(kind) => ProcessingTicket::rejected(kind),
        }
    }

    /// Submits an element, `callback` is invoked on the worker thread once the
    /// element is completed. The callback is dropped without being invoked when
    /// the element is rejected (returned id is zero).
    pub fn process_element_with<F>(&self, input: ConsumerInput, callback: F) -> ElementId
    where
        F: FnOnce(ElementId, CompletionResult) + Send + 'static,
    {
        self.try_process_element_with(input, callback).unwrap_or(0)
    }

    /// Same as [ConsumerDispatcher::process_element_with], a rejection carries
    /// its reason.
    pub fn try_process_element_with<F>(
        &self,
        input: ConsumerInput,
        callback: F,
    ) -> Result<ElementId>
    where
        F: FnOnce(ElementId, CompletionResult) + Send + 'static,
    {
        self.submit(input, Completion::Callback(Box::new(callback)))
            .map_err(Error::new)
    }

    fn submit(
        &self,
        input: ConsumerInput,
        completion: Completion,
    ) -> std::result::Result<ElementId, ErrorKind> {
        if !self.is_running() {
            debug!("{} is not running, element rejected", self.name);
            return Err(ErrorKind::DispatcherStopped);
        }
        if input.is_empty() {
            debug!("{} rejected empty element", self.name);
            return Err(ErrorKind::EmptyRange);
        }

        let _guard = self.submit_lock.lock();
        let id = self.counters.last_id.load(Ordering::SeqCst) + 1;
        let element = QueuedElement {
            id,
            input,
            completion,
        };
        let res = match self.full_policy {
            QueueFullPolicy::Block => self.sender.send_sync(element),
            QueueFullPolicy::Reject | QueueFullPolicy::Abort => self.sender.try_send(element),
        };
        match res {
            Ok(()) => {
                self.counters.last_id.store(id, Ordering::SeqCst);
                self.counters.added.fetch_add(1, Ordering::SeqCst);
                Ok(id)
            }
            Err(ChannelError::Full) if self.full_policy == QueueFullPolicy::Abort => {
                // Overflow is fatal: queued elements are drained as shut down
                // and no new element is accepted.
                error!("{} queue is full, dispatcher aborted", self.name);
                let _ = self.state.compare_exchange(
                    DispatcherState::Running as u8,
                    DispatcherState::ShuttingDown as u8,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
                Err(ErrorKind::DispatcherFull)
            }
            Err(ChannelError::Full) => {
                warn!("{} queue is full, element rejected", self.name);
                Err(ErrorKind::DispatcherFull)
            }
            Err(err) => {
                debug!("{} cannot accept element: {}", self.name, err);
                Err(ErrorKind::DispatcherStopped)
            }
        }
    }

    /// Stops accepting elements, lets the in-flight element complete and
    /// drops the queued ones.
    pub fn shutdown(&self) {
        let handle = match self.handle.lock().take() {
            Some(handle) => handle,
            None => return,
        };
        info!("{} shutting down", self.name);
        self.state
            .store(DispatcherState::ShuttingDown as u8, Ordering::SeqCst);
        {
            // Waits for a pending submission before closing the queue.
            let _guard = self.submit_lock.lock();
            self.sender.close();
        }
        if handle.join().is_err() {
            error!("{} worker terminated abnormally", self.name);
        }
        self.state
            .store(DispatcherState::Stopped as u8, Ordering::SeqCst);
        info!("{} stopped", self.name);
    }

    /// Observable status.
    pub fn status(&self) -> DispatcherStatus {
        DispatcherStatus {
            name: self.name.clone(),
            num_stages: self.num_stages,
            is_running: self.is_running(),
            num_added_elements: self.counters.added.load(Ordering::SeqCst),
            num_completed_elements: self.counters.completed.load(Ordering::SeqCst),
            num_queued_elements: self.sender.len(),
        }
    }
}

impl Drop for ConsumerDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct DispatcherWorker {
    name: String,
    trace_interval: u64,
    stages: Vec<Box<dyn Stage>>,
    inspector: Option<Box<dyn Inspector>>,
    state: Arc<AtomicU8>,
    counters: Arc<DispatcherCounters>,
}

impl DispatcherWorker {
    fn run(&mut self, receiver: Receiver<QueuedElement>) {
        while let Ok(element) = receiver.recv_sync() {
            let state: DispatcherState = self.state.load(Ordering::SeqCst).into();
            if state == DispatcherState::Running {
                self.process(element);
            } else {
                debug!("{} dropping element {}", self.name, element.id);
                element.completion.complete_guarded(
                    &self.name,
                    element.id,
                    CompletionResult::shutdown(),
                );
            }
        }
    }

    fn process(&mut self, element: QueuedElement) {
        let QueuedElement {
            id,
            mut input,
            completion,
        } = element;
        let start = Instant::now();

        let mut result = CompletionResult::normal();
        for stage in self.stages.iter_mut() {
            let name = stage.name();
            let stage_result =
                match panic::catch_unwind(AssertUnwindSafe(|| stage.run(&mut input))) {
                    Ok(res) => res,
                    Err(_) => {
                        error!("{} stage '{}' faulted on element {}", self.name, name, id);
                        super::ConsumerResult::abort(
                            super::ResultCode::ConsumerFault,
                            super::ResultSeverity::Failure,
                        )
                    }
                };
            if stage_result.is_terminal() {
                result = CompletionResult::from_stage(name, stage_result);
                break;
            }
        }

        if let Some(inspector) = self.inspector.as_mut() {
            if panic::catch_unwind(AssertUnwindSafe(|| inspector(&mut input, &result))).is_err() {
                error!("{} inspector faulted on element {}", self.name, id);
            }
        }

        let completed = self.counters.completed.fetch_add(1, Ordering::SeqCst) + 1;
        if self.trace_interval != 0 && completed % self.trace_interval == 0 {
            debug!(
                "{} element {} ({}) completed in {} ms: {:?} {:?} {}",
                self.name,
                id,
                input,
                start.elapsed().as_millis(),
                result.status,
                result.severity,
                result.code
            );
        }
        completion.complete_guarded(&self.name, id, result);
    }
}
