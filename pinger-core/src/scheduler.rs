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

//! Per-request state machine: `Ready -> Pending -> Arrived|TimedOut ->
//! Cooldown -> Ready'|Done`. One OS thread per in-flight `Request`; threads
//! are otherwise independent and share only the correlation table, the
//! sequence allocator and the raw socket, all of which are already safe
//! for concurrent use.

use crate::correlation::CorrelationTable;
use crate::error::ReplyError;
use crate::request::{Attempt, Request, Response};
use crate::resolver::Resolver;
use crate::sequence::SequenceAllocator;
use crate::transport::Transport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Collaborators a request's scheduler thread needs; bundled so
/// `Session` can hand them out without a long argument list per spawn.
#[derive(Clone)]
pub struct SchedulerDeps {
    pub transport: Arc<dyn Transport>,
    pub table: Arc<CorrelationTable>,
    pub sequence_alloc: Arc<SequenceAllocator>,
    pub resolver: Arc<dyn Resolver>,
    pub draining: Arc<AtomicBool>,
}

/// Runs one request to completion, emitting a `Response` per attempt onto
/// `emit`. Intended to be the body of a dedicated thread; blocks for the
/// lifetime of the request (bounded by `count` attempts, their timeouts,
/// and their intervals).
pub fn run_request(mut request: Request, deps: SchedulerDeps, emit: Sender<Response>) {
    if request.config.count == 0 {
        // A pure acknowledgement: Ready -> Done with no attempts at all.
        return;
    }

    let mut attempt_num: i64 = 0;
    loop {
        if request.config.count >= 0 && attempt_num >= request.config.count {
            break;
        }
        if request.config.count < 0 && deps.draining.load(Ordering::Relaxed) {
            break;
        }

        let (response, sent_at) = run_one_attempt(&mut request, &deps);
        let _ = emit.send(response);
        attempt_num += 1;

        let reached_count = request.config.count >= 0 && attempt_num >= request.config.count;
        let draining_now = request.config.count < 0 && deps.draining.load(Ordering::Relaxed);
        if reached_count || draining_now {
            break;
        }

        // Measured from the send instant (or, on a resolve failure, from
        // when resolution was attempted), never from reply arrival: a slow
        // resolve on this attempt must not shrink the gap before the next
        // send (SPEC_FULL.md S5 / Testable Property 5).
        let elapsed = sent_at.elapsed();
        if elapsed < request.config.interval {
            std::thread::sleep(request.config.interval - elapsed);
        }
    }
}

/// Ready -> Pending -> Arrived|TimedOut, producing exactly one `Response`
/// alongside the instant that attempt's interval should be measured from.
fn run_one_attempt(request: &mut Request, deps: &SchedulerDeps) -> (Response, Instant) {
    let resolve_started_at = Instant::now();
    let resolved = deps.resolver.resolve(&request.host);
    request.resolved_addr = resolved;
    request.sent_count += 1;

    let dest = match resolved {
        Some(addr) => addr,
        None => {
            return (
                Response {
                    request: request.clone(),
                    sequence: 0,
                    rtt: f64::NAN,
                    peer: None,
                    icmp_message: Vec::new(),
                    error: Some(ReplyError::ResolveFailed),
                },
                resolve_started_at,
            );
        }
    };

    let (sequence, sent_at, receiver) = install_with_backpressure(deps);
    let attempt = Attempt::new(request.id, sequence, sent_at, request.config.timeout);

    if let Err(_io_err) = deps
        .transport
        .send(dest, deps.sequence_alloc.identifier(), sequence, &request.config)
    {
        deps.table.evict(sequence);
        return (
            Response {
                request: request.clone(),
                sequence,
                rtt: f64::NAN,
                peer: None,
                icmp_message: Vec::new(),
                error: Some(ReplyError::SendFailed),
            },
            sent_at,
        );
    }

    let remaining = attempt.deadline.saturating_duration_since(Instant::now());
    let response = match receiver.recv_timeout(remaining) {
        Ok(raw) => Response::from_raw(request.clone(), raw),
        Err(_) => {
            deps.table.evict(sequence);
            Response {
                request: request.clone(),
                sequence,
                rtt: f64::NAN,
                peer: None,
                icmp_message: Vec::new(),
                error: Some(ReplyError::Timeout),
            }
        }
    };
    (response, sent_at)
}

/// Allocates sequences and retries `try_install` until one lands in a free
/// slot, blocking on the table's backpressure signal between attempts.
/// Under ordinary load this succeeds on the first try; it only loops when
/// the 65,536-entry table is close to saturated.
fn install_with_backpressure(
    deps: &SchedulerDeps,
) -> (u16, Instant, std::sync::mpsc::Receiver<crate::request::RawResponse>) {
    loop {
        let sequence = deps.sequence_alloc.next_sequence();
        let sent_at = Instant::now();
        let (tx, rx) = std::sync::mpsc::channel();
        if deps.table.try_install(sequence, sent_at, tx) {
            return (sequence, sent_at, rx);
        }
        deps.table.wait_for_free_slot();
    }
}
