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

use std::time::Duration;

/// Immutable per-session defaults, snapshotted into every `Request` at creation.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Attempts per job. Negative means "repeat until the submission stream drains".
    pub count: i64,
    /// Minimum delay between successive attempts of the same job.
    pub interval: Duration,
    /// Per-attempt deadline measured from the send instant.
    pub timeout: Duration,
    /// Payload bytes carried in the ICMP echo data section.
    pub packet_size: usize,
    /// IPv4 type-of-service byte.
    pub tos: u8,
    /// IPv4 time-to-live.
    pub ttl: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            count: 1,
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(3),
            packet_size: 56,
            tos: 0,
            ttl: 64,
        }
    }
}

impl Config {
    /// Applies the documented defaults to fields left at their zero value.
    ///
    /// `count` is intentionally excluded: `count == 0` is a meaningful,
    /// explicit request for a pure acknowledgement (see the scheduler's
    /// `Done` transition), not an unset field. A front end that wants
    /// "count not specified" behavior should default its own flag to `1`
    /// before constructing a `Config`.
    pub fn with_defaults(mut self) -> Self {
        let default = Self::default();
        if self.timeout.is_zero() {
            self.timeout = default.timeout;
        }
        if self.interval.is_zero() {
            self.interval = default.interval;
        }
        if self.packet_size == 0 {
            self.packet_size = default.packet_size;
        }
        if self.ttl == 0 {
            self.ttl = default.ttl;
        }
        self
    }

    /// Builder helper for tests and callers assembling a `Config` inline.
    pub fn with_count(mut self, count: i64) -> Self {
        self.count = count;
        self
    }
}
