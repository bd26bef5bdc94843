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

//! Hands out the 16-bit sequence numbers and the process identifier tag
//! carried in the ICMP echo header.

use std::sync::atomic::{AtomicU32, Ordering};

/// A single process-wide monotonically increasing counter, truncated to
/// 16 bits on read. Does not by itself guarantee that a returned sequence
/// is not currently in use elsewhere; that's the correlation table's job.
#[derive(Debug, Default)]
pub struct SequenceAllocator {
    counter: AtomicU32,
    identifier: u16,
}

impl SequenceAllocator {
    /// Creates an allocator whose identifier is derived from the OS
    /// process id, masked to 16 bits.
    pub fn new() -> Self {
        Self::with_identifier(std::process::id() as u16)
    }

    /// Creates an allocator with an explicit identifier, mainly useful in
    /// tests that want deterministic ICMP identifiers.
    pub fn with_identifier(identifier: u16) -> Self {
        Self {
            counter: AtomicU32::new(0),
            identifier,
        }
    }

    /// Returns the next sequence number. Monotonic within any 65,536-call
    /// window; wraps silently thereafter.
    pub fn next_sequence(&self) -> u16 {
        self.counter.fetch_add(1, Ordering::Relaxed) as u16
    }

    /// The 16-bit identifier tagging every echo this process sends, and
    /// used to discard packets this process did not originate.
    pub fn identifier(&self) -> u16 {
        self.identifier
    }
}
