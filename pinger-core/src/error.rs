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

//! Error taxonomy for the coordinator. `ReplyError` is attached to a
//! `Response` when an attempt did not complete as a clean echo reply;
//! `SessionError` covers the handful of conditions fatal enough to fail
//! `Session::start` outright.

use thiserror::Error;

/// Per-attempt failure kind, carried on a `Response` alongside `rtt = NaN`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyError {
    /// No matching reply arrived within `config.timeout` of the send instant.
    #[error("request timed out")]
    Timeout,
    /// ICMP destination-unreachable (type 3) matched back via the quoted datagram.
    #[error("destination unreachable")]
    Unreachable,
    /// ICMP time-exceeded (type 11).
    #[error("time exceeded")]
    TimeExceeded,
    /// ICMP parameter-problem (type 12).
    #[error("parameter problem")]
    ParamProblem,
    /// ICMP redirect (type 5), surfaced to the caller rather than silently followed.
    #[error("redirect")]
    Redirect,
    /// The send syscall returned an error.
    #[error("send failed")]
    SendFailed,
    /// The resolver capability failed before any send occurred.
    #[error("address resolution failed")]
    ResolveFailed,
}

/// Fatal condition that prevents a `Session` from starting.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("could not open or configure the raw socket: {0}")]
    TransportFatal(#[source] std::io::Error),
}
