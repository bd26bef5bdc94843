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

use crate::config::Config;
use crate::error::ReplyError;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

/// Opaque caller-supplied key/value data, carried through to every
/// `Response` so the caller can demultiplex replies without keeping its
/// own side table.
pub type UserData = HashMap<String, String>;

/// One ping job, created by `Session::new_request` and progressed by the
/// scheduler until its attempt count is satisfied or the session drains.
#[derive(Debug, Clone)]
pub struct Request {
    /// Monotonic, process-unique id stamped at creation.
    pub id: u64,
    /// Caller-supplied host string (name or literal address).
    pub host: String,
    /// Populated on first resolution; `None` until then or on resolve failure.
    pub resolved_addr: Option<Ipv4Addr>,
    /// Snapshot of the session `Config` at the time this request was created.
    pub config: Config,
    /// Caller-supplied correlation data, opaque to the scheduler.
    pub user_data: UserData,
    /// Number of attempts sent so far.
    pub sent_count: u64,
}

impl Request {
    pub(crate) fn new(id: u64, host: String, config: Config, user_data: UserData) -> Self {
        Self {
            id,
            host,
            resolved_addr: None,
            config,
            user_data,
            sent_count: 0,
        }
    }
}

/// One in-flight echo, live from immediately before the send syscall until
/// either a matching `RawResponse` arrives or its deadline elapses.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub request_id: u64,
    pub sequence: u16,
    pub sent_at: Instant,
    pub deadline: Instant,
}

impl Attempt {
    pub fn new(request_id: u64, sequence: u16, sent_at: Instant, timeout: Duration) -> Self {
        Self {
            request_id,
            sequence,
            sent_at,
            deadline: sent_at + timeout,
        }
    }
}

/// What the transport observed for one sequence number: either a clean
/// echo reply, an ICMP error, or a synthesized send failure.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub sequence: u16,
    /// Seconds elapsed between send and receive; `NaN` on error.
    pub rtt: f64,
    pub peer: Option<Ipv4Addr>,
    /// First 8 bytes of the ICMP header, or up to 40 bytes of the error envelope.
    pub icmp_message: Vec<u8>,
    pub error: Option<ReplyError>,
}

/// What the caller observes: exactly one of these is emitted per attempt.
#[derive(Debug, Clone)]
pub struct Response {
    pub request: Request,
    pub sequence: u16,
    pub rtt: f64,
    pub peer: Option<Ipv4Addr>,
    pub icmp_message: Vec<u8>,
    pub error: Option<ReplyError>,
}

impl Response {
    pub(crate) fn from_raw(request: Request, raw: RawResponse) -> Self {
        Self {
            request,
            sequence: raw.sequence,
            rtt: raw.rtt,
            peer: raw.peer,
            icmp_message: raw.icmp_message,
            error: raw.error,
        }
    }
}
