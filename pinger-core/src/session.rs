// Copyright 2021 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The session façade: the only component that sees both the user-facing
//! submit/reply surface and the transport. Owns the sequence allocator,
//! correlation table, and the dispatcher thread that turns each submitted
//! `Request` into its own scheduler thread.

use crate::config::Config;
use crate::correlation::CorrelationTable;
use crate::request::{Request, Response, UserData};
use crate::resolver::{Resolver, StdResolver};
use crate::scheduler::{self, SchedulerDeps};
use crate::sequence::SequenceAllocator;
use crate::transport::Transport;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Accepts `Request` values until dropped, at which point the session
/// begins its drain sequence.
pub struct Submit {
    sender: Sender<Request>,
}

impl Submit {
    pub fn send(&self, request: Request) -> Result<(), Request> {
        self.sender.send(request).map_err(|e| e.0)
    }
}

/// Yields `Response` values in the order attempts terminate. Finite: ends
/// once the session has drained.
pub struct Reply {
    receiver: Receiver<Response>,
}

impl Reply {
    pub fn recv(&self) -> Option<Response> {
        self.receiver.recv().ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = Response> + '_ {
        self.receiver.iter()
    }
}

/// Lifetime owner of one ping coordinator: sequence allocator, transport,
/// correlation table, and the dispatcher between `submit` and `reply`.
pub struct Session {
    config: Config,
    transport: Arc<dyn Transport>,
    resolver: Arc<dyn Resolver>,
    sequence_alloc: Arc<SequenceAllocator>,
    table: Arc<CorrelationTable>,
    next_request_id: AtomicU64,
    stop_receiving: Arc<AtomicBool>,
    draining: Arc<AtomicBool>,
    receive_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
    dispatcher_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Builds a session around an already-configured transport. Use
    /// `Session::new` for the common case of plugging in the default
    /// resolver; tests that need a fake resolver go through
    /// `Session::with_resolver`.
    pub fn new(config: Config, transport: Arc<dyn Transport>) -> Self {
        Self::with_resolver(config, transport, Arc::new(StdResolver))
    }

    pub fn with_resolver(config: Config, transport: Arc<dyn Transport>, resolver: Arc<dyn Resolver>) -> Self {
        Self {
            config: config.with_defaults(),
            transport,
            resolver,
            sequence_alloc: Arc::new(SequenceAllocator::new()),
            table: Arc::new(CorrelationTable::new()),
            next_request_id: AtomicU64::new(1),
            stop_receiving: Arc::new(AtomicBool::new(false)),
            draining: Arc::new(AtomicBool::new(false)),
            receive_handle: std::sync::Mutex::new(None),
            dispatcher_handle: std::sync::Mutex::new(None),
        }
    }

    /// Factory: stamps a monotonic id and snapshots the session `Config`.
    pub fn new_request(&self, host: impl Into<String>, user_data: UserData) -> Request {
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        Request::new(id, host.into(), self.config, user_data)
    }

    /// Spawns the receive worker and the request dispatcher, and returns
    /// the submit/reply handles. Call once per session.
    pub fn start(&self) -> (Submit, Reply) {
        let identifier = self.sequence_alloc.identifier();
        let receive_handle = Arc::clone(&self.transport).start_receiving(
            Arc::clone(&self.table),
            identifier,
            Arc::clone(&self.stop_receiving),
        );
        *self.receive_handle.lock().unwrap() = Some(receive_handle);

        let (submit_tx, submit_rx) = std::sync::mpsc::channel::<Request>();
        let (reply_tx, reply_rx) = std::sync::mpsc::channel::<Response>();

        let deps_template = SchedulerDeps {
            transport: Arc::clone(&self.transport),
            table: Arc::clone(&self.table),
            sequence_alloc: Arc::clone(&self.sequence_alloc),
            resolver: Arc::clone(&self.resolver),
            draining: Arc::clone(&self.draining),
        };

        let dispatcher_handle = std::thread::spawn(move || {
            let mut workers = Vec::new();
            for request in submit_rx.iter() {
                let deps = deps_template.clone();
                let emit = reply_tx.clone();
                workers.push(std::thread::spawn(move || scheduler::run_request(request, deps, emit)));
            }
            // Submit handle dropped: wait for every in-flight request's
            // scheduler thread to resolve its last attempt before this
            // function returns, which drops `reply_tx` and closes Reply.
            for worker in workers {
                let _ = worker.join();
            }
        });
        *self.dispatcher_handle.lock().unwrap() = Some(dispatcher_handle);

        (Submit { sender: submit_tx }, Reply { receiver: reply_rx })
    }

    /// Signals `count < 0` requests to stop repeating, then blocks until
    /// every in-flight attempt has resolved and the transport is torn
    /// down. The caller is expected to have already dropped its `Submit`
    /// handle (or let it go out of scope) so the dispatcher's receive loop
    /// ends.
    pub fn drain(&self) {
        self.draining.store(true, Ordering::Relaxed);
        if let Some(handle) = self.dispatcher_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.stop_receiving.store(true, Ordering::Relaxed);
        if let Some(handle) = self.receive_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}
