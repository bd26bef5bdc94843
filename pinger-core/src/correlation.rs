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

//! Maps `sequence -> waiting request slot`. Shared between the scheduler
//! (install/evict) and the transport's receive worker (deliver).
//!
//! A slot remembers the attempt's send instant alongside its delivery
//! channel, so this table — not the transport, and not the scheduler in
//! isolation — is the single place that turns a raw receive timestamp
//! into an RTT.

use crate::error::ReplyError;
use crate::request::RawResponse;
use std::net::Ipv4Addr;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

type Sender = std::sync::mpsc::Sender<RawResponse>;

struct Waiter {
    sent_at: Instant,
    delivery: Sender,
}

/// Fixed-capacity correlation table: one slot per possible 16-bit sequence.
pub struct CorrelationTable {
    slots: Mutex<Vec<Option<Waiter>>>,
    freed: Condvar,
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new((0..1 << 16).map(|_| None).collect()),
            freed: Condvar::new(),
        }
    }

    /// Attempts to install a waiter for `sequence`. Returns `false` if the
    /// slot is already occupied (table saturation for this sequence); the
    /// caller is expected to wait on `wait_for_free_slot` and retry.
    pub fn try_install(&self, sequence: u16, sent_at: Instant, delivery: Sender) -> bool {
        let mut slots = self.slots.lock().unwrap();
        if slots[sequence as usize].is_some() {
            return false;
        }
        slots[sequence as usize] = Some(Waiter { sent_at, delivery });
        true
    }

    /// Blocks (with a bounded timeout, to stay responsive to spurious
    /// wakeups) until some slot frees up, for backpressure when the
    /// dispatcher cannot install a freshly allocated sequence.
    pub fn wait_for_free_slot(&self) {
        let slots = self.slots.lock().unwrap();
        let _ = self
            .freed
            .wait_timeout(slots, Duration::from_millis(50))
            .unwrap();
    }

    /// Delivers a successful echo reply or ICMP error observed at
    /// `received_at`. Returns `true` if a waiter was present.
    pub fn deliver_reply(
        &self,
        sequence: u16,
        received_at: Instant,
        peer: Option<Ipv4Addr>,
        icmp_message: Vec<u8>,
        error: Option<ReplyError>,
    ) -> bool {
        self.complete(sequence, move |sent_at| RawResponse {
            sequence,
            rtt: if error.is_none() {
                received_at.saturating_duration_since(sent_at).as_secs_f64()
            } else {
                f64::NAN
            },
            peer,
            icmp_message,
            error,
        })
    }

    /// Delivers a synthesized failure (send syscall error) for `sequence`,
    /// with no receive timestamp available.
    pub fn deliver_error(&self, sequence: u16, error: ReplyError) -> bool {
        self.complete(sequence, move |_sent_at| RawResponse {
            sequence,
            rtt: f64::NAN,
            peer: None,
            icmp_message: Vec::new(),
            error: Some(error),
        })
    }

    fn complete(&self, sequence: u16, build: impl FnOnce(Instant) -> RawResponse) -> bool {
        let mut slots = self.slots.lock().unwrap();
        match slots[sequence as usize].take() {
            Some(waiter) => {
                drop(slots);
                self.freed.notify_all();
                // A dropped receiver (the waiting request thread already
                // gave up and evicted) makes this send fail silently; the
                // reply is then an orphan in all but name.
                let _ = waiter.delivery.send(build(waiter.sent_at));
                true
            }
            None => false,
        }
    }

    /// Clears a slot whose attempt has timed out. Idempotent: evicting an
    /// already-empty or already-delivered slot is a no-op.
    pub fn evict(&self, sequence: u16) {
        let mut slots = self.slots.lock().unwrap();
        if slots[sequence as usize].take().is_some() {
            drop(slots);
            self.freed.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_then_deliver_routes_to_waiter() {
        let table = CorrelationTable::new();
        let (tx, rx) = std::sync::mpsc::channel();
        let sent_at = Instant::now();
        assert!(table.try_install(10, sent_at, tx));
        assert!(table.deliver_reply(10, Instant::now(), None, vec![], None));
        let resp = rx.recv().unwrap();
        assert_eq!(resp.sequence, 10);
        assert!(resp.rtt >= 0.0);
    }

    #[test]
    fn second_install_on_occupied_slot_fails() {
        let table = CorrelationTable::new();
        let (tx1, _rx1) = std::sync::mpsc::channel();
        let (tx2, _rx2) = std::sync::mpsc::channel();
        assert!(table.try_install(5, Instant::now(), tx1));
        assert!(!table.try_install(5, Instant::now(), tx2));
    }

    #[test]
    fn deliver_to_empty_slot_is_orphan() {
        let table = CorrelationTable::new();
        assert!(!table.deliver_reply(99, Instant::now(), None, vec![], None));
    }

    #[test]
    fn evict_then_deliver_is_orphan() {
        let table = CorrelationTable::new();
        let (tx, _rx) = std::sync::mpsc::channel();
        assert!(table.try_install(3, Instant::now(), tx));
        table.evict(3);
        assert!(!table.deliver_reply(3, Instant::now(), None, vec![], None));
    }

    #[test]
    fn evict_is_idempotent() {
        let table = CorrelationTable::new();
        table.evict(1);
        table.evict(1);
    }

    #[test]
    fn slot_reusable_after_delivery() {
        let table = CorrelationTable::new();
        let (tx1, rx1) = std::sync::mpsc::channel();
        assert!(table.try_install(1, Instant::now(), tx1));
        assert!(table.deliver_reply(1, Instant::now(), None, vec![], None));
        rx1.recv().unwrap();
        let (tx2, _rx2) = std::sync::mpsc::channel();
        assert!(table.try_install(1, Instant::now(), tx2));
    }

    #[test]
    fn deliver_error_yields_nan_rtt() {
        let table = CorrelationTable::new();
        let (tx, rx) = std::sync::mpsc::channel();
        assert!(table.try_install(7, Instant::now(), tx));
        assert!(table.deliver_error(7, ReplyError::SendFailed));
        let resp = rx.recv().unwrap();
        assert!(resp.rtt.is_nan());
        assert_eq!(resp.error, Some(ReplyError::SendFailed));
    }
}
