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

//! `pinger-core`: a high-throughput, concurrent ICMPv4 echo coordinator.
//!
//! The library accepts a stream of ping job descriptions, sends ICMP echo
//! requests over a single shared raw socket, correlates incoming replies
//! (including ICMP-in-ICMP error payloads) back to the request that
//! produced them, enforces per-request timeouts and inter-ping intervals,
//! and delivers one `Response` per attempt through a lazy reply stream.
//!
//! Entry point: [`Session`]. Production callers build a [`RawSocketTransport`];
//! tests inject [`fake_transport::FakeTransport`] instead.

pub mod config;
pub mod correlation;
pub mod error;
pub mod fake_transport;
pub mod packet;
pub mod request;
pub mod resolver;
pub mod scheduler;
pub mod sequence;
pub mod session;
pub mod transport;

pub use config::Config;
pub use error::{ReplyError, SessionError};
pub use request::{Attempt, RawResponse, Request, Response, UserData};
pub use resolver::{Resolver, StdResolver};
pub use session::{Reply, Session, Submit};
pub use transport::{RawSocketTransport, Transport};
