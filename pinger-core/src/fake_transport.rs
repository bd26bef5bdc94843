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

//! An in-process `Transport` double. No socket, no kernel: each `send`
//! looks up a canned outcome keyed by `(destination, attempt index for
//! that destination)` and, if scripted to reply, delivers a `RawResponse`
//! back through the correlation table on its own delay thread. This is
//! how the scheduler and session are exercised without root privileges or
//! a live network.

use crate::config::Config;
use crate::correlation::CorrelationTable;
use crate::error::ReplyError;
use crate::transport::Transport;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// What the fake transport should do with a scripted attempt.
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    /// Reply arrives after `delay`, optionally carrying an ICMP error.
    Reply {
        delay: Duration,
        peer: Ipv4Addr,
        error: Option<ReplyError>,
    },
    /// No reply is ever delivered; the scheduler must observe a timeout.
    Silent,
}

/// A fake transport driven entirely by a pre-programmed script, keyed by
/// `(destination, zero_based_attempt_index)`.
pub struct FakeTransport {
    script: Mutex<HashMap<(Ipv4Addr, u64), ScriptedOutcome>>,
    default_outcome: ScriptedOutcome,
    attempt_counts: Mutex<HashMap<Ipv4Addr, u64>>,
    pending: Mutex<Vec<(u16, Ipv4Addr)>>,
}

impl FakeTransport {
    pub fn new(default_outcome: ScriptedOutcome) -> Self {
        Self {
            script: Mutex::new(HashMap::new()),
            default_outcome,
            attempt_counts: Mutex::new(HashMap::new()),
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn script(&self, dest: Ipv4Addr, attempt_index: u64, outcome: ScriptedOutcome) {
        self.script.lock().unwrap().insert((dest, attempt_index), outcome);
    }
}

impl Transport for FakeTransport {
    fn send(&self, dest: Ipv4Addr, _identifier: u16, sequence: u16, _config: &Config) -> std::io::Result<Instant> {
        self.pending.lock().unwrap().push((sequence, dest));
        Ok(Instant::now())
    }

    fn start_receiving(
        self: Arc<Self>,
        table: Arc<CorrelationTable>,
        _identifier: u16,
        stop: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                let pending: Vec<(u16, Ipv4Addr)> = std::mem::take(&mut self.pending.lock().unwrap());
                for (sequence, dest) in pending {
                    let attempt_index = {
                        let mut counts = self.attempt_counts.lock().unwrap();
                        let entry = counts.entry(dest).or_insert(0);
                        let idx = *entry;
                        *entry += 1;
                        idx
                    };
                    let outcome = self
                        .script
                        .lock()
                        .unwrap()
                        .get(&(dest, attempt_index))
                        .cloned()
                        .unwrap_or_else(|| self.default_outcome.clone());

                    if let ScriptedOutcome::Reply { delay, peer, error } = outcome {
                        let table = Arc::clone(&table);
                        let stop = Arc::clone(&stop);
                        thread::spawn(move || {
                            thread::sleep(delay);
                            if stop.load(Ordering::Relaxed) {
                                return;
                            }
                            table.deliver_reply(sequence, Instant::now(), Some(peer), vec![0, 0], error);
                        });
                    }
                }
                thread::sleep(Duration::from_millis(5));
            }
        })
    }
}
