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

//! End-to-end scenarios over `Session` wired with the fake transport,
//! covering the quantified invariants and canned scenarios of the
//! coordinator's behavioral contract.

use pinger_core::fake_transport::{FakeTransport, ScriptedOutcome};
use pinger_core::{Config, Resolver, Session};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

struct AlwaysResolves(Ipv4Addr);
impl Resolver for AlwaysResolves {
    fn resolve(&self, _host: &str) -> Option<Ipv4Addr> {
        Some(self.0)
    }
}

struct NeverResolves;
impl Resolver for NeverResolves {
    fn resolve(&self, _host: &str) -> Option<Ipv4Addr> {
        None
    }
}

fn tolerant_eq_ms(actual_secs: f64, expected_ms: f64) {
    let actual_ms = actual_secs * 1000.0;
    assert!(
        (actual_ms - expected_ms).abs() < 40.0,
        "expected ~{}ms, got {}ms",
        expected_ms,
        actual_ms
    );
}

// S1: ten attempts against one host, each with a distinct canned RTT well
// inside the timeout, all successful and all from the same peer.
#[test]
fn s1_successful_replies_carry_their_scripted_rtt() {
    let dest = Ipv4Addr::new(192, 168, 0, 1);
    let rtts_ms = [110.0, 80.0, 65.0, 100.0, 99.0, 76.0, 80.0, 81.0, 150.0, 44.0];

    let transport = Arc::new(FakeTransport::new(ScriptedOutcome::Silent));
    for (i, rtt) in rtts_ms.iter().enumerate() {
        transport.script(
            dest,
            i as u64,
            ScriptedOutcome::Reply {
                delay: Duration::from_millis(*rtt as u64),
                peer: dest,
                error: None,
            },
        );
    }

    let mut config = Config::default().with_defaults();
    config.count = 10;
    config.interval = Duration::from_millis(500);
    config.timeout = Duration::from_millis(500);

    let session = Session::with_resolver(config, transport, Arc::new(AlwaysResolves(dest)));
    let (submit, reply) = session.start();
    submit.send(session.new_request("host-a", HashMap::new())).unwrap();
    drop(submit);

    let responses: Vec<_> = reply.iter().collect();
    assert_eq!(responses.len(), 10);
    for (resp, expected_rtt) in responses.iter().zip(rtts_ms.iter()) {
        assert_eq!(resp.error, None);
        assert_eq!(resp.peer, Some(dest));
        tolerant_eq_ms(resp.rtt, *expected_rtt);
    }

    session.drain();
}

// S2: every canned reply arrives long after the timeout; every attempt
// must surface as a Timeout with a NaN rtt.
#[test]
fn s2_late_replies_time_out() {
    let dest = Ipv4Addr::new(192, 168, 0, 2);
    let transport = Arc::new(FakeTransport::new(ScriptedOutcome::Reply {
        delay: Duration::from_secs(10),
        peer: dest,
        error: None,
    }));

    let mut config = Config::default().with_defaults();
    config.count = 3;
    config.interval = Duration::from_millis(50);
    config.timeout = Duration::from_millis(60);

    let session = Session::with_resolver(config, transport, Arc::new(AlwaysResolves(dest)));
    let (submit, reply) = session.start();
    submit.send(session.new_request("host-b", HashMap::new())).unwrap();
    drop(submit);

    let responses: Vec<_> = reply.iter().collect();
    assert_eq!(responses.len(), 3);
    for resp in &responses {
        assert_eq!(resp.error, Some(pinger_core::ReplyError::Timeout));
        assert!(resp.rtt.is_nan());
    }

    session.drain();
}

// S3: resolution fails for every attempt; no sequence is ever installed,
// and every attempt surfaces as ResolveFailed with no peer.
#[test]
fn s3_resolve_failure_on_every_attempt() {
    let transport = Arc::new(FakeTransport::new(ScriptedOutcome::Silent));
    let mut config = Config::default().with_defaults();
    config.count = 10;
    config.interval = Duration::from_millis(1);
    config.timeout = Duration::from_millis(50);

    let session = Session::with_resolver(config, transport, Arc::new(NeverResolves));
    let (submit, reply) = session.start();
    submit.send(session.new_request("nowhere.invalid", HashMap::new())).unwrap();
    drop(submit);

    let responses: Vec<_> = reply.iter().collect();
    assert_eq!(responses.len(), 10);
    for resp in &responses {
        assert_eq!(resp.error, Some(pinger_core::ReplyError::ResolveFailed));
        assert_eq!(resp.peer, None);
    }

    session.drain();
}

// S4: count == 0 acknowledges the request with zero attempts, but drain
// still completes.
#[test]
fn s4_count_zero_produces_no_responses() {
    let dest = Ipv4Addr::new(192, 168, 0, 4);
    let transport = Arc::new(FakeTransport::new(ScriptedOutcome::Reply {
        delay: Duration::from_millis(1),
        peer: dest,
        error: None,
    }));
    let config = Config::default().with_defaults().with_count(0);

    let session = Session::with_resolver(config, transport, Arc::new(AlwaysResolves(dest)));
    let (submit, reply) = session.start();
    submit.send(session.new_request("host-d", HashMap::new())).unwrap();
    drop(submit);

    let responses: Vec<_> = reply.iter().collect();
    assert!(responses.is_empty());

    session.drain();
}

// S5: successive send instants of the same request are at least one
// interval apart.
#[test]
fn s5_interval_fidelity() {
    let dest = Ipv4Addr::new(192, 168, 0, 5);
    let transport = Arc::new(FakeTransport::new(ScriptedOutcome::Reply {
        delay: Duration::from_millis(1),
        peer: dest,
        error: None,
    }));

    let mut config = Config::default().with_defaults();
    config.count = 3;
    config.interval = Duration::from_millis(200);
    config.timeout = Duration::from_millis(500);

    let session = Session::with_resolver(config, transport, Arc::new(AlwaysResolves(dest)));
    let (submit, reply) = session.start();

    let submitted_at = std::time::Instant::now();
    submit.send(session.new_request("host-e", HashMap::new())).unwrap();
    drop(submit);

    let arrival_times: Vec<Duration> = reply.iter().map(|_| submitted_at.elapsed()).collect();
    assert_eq!(arrival_times.len(), 3);
    for pair in arrival_times.windows(2) {
        let delta = pair[1] - pair[0];
        assert!(
            delta >= Duration::from_millis(190),
            "successive attempts were only {:?} apart",
            delta
        );
    }

    session.drain();
}

// S6: two requests against different hosts submitted concurrently; every
// response must demultiplex to exactly the host that produced it.
#[test]
fn s6_interleaved_requests_do_not_cross_contaminate() {
    let dest_a = Ipv4Addr::new(192, 168, 0, 10);
    let dest_b = Ipv4Addr::new(192, 168, 0, 20);

    struct ByHost;
    impl Resolver for ByHost {
        fn resolve(&self, host: &str) -> Option<Ipv4Addr> {
            host.parse().ok()
        }
    }

    let transport = Arc::new(FakeTransport::new(ScriptedOutcome::Silent));
    for i in 0..5u64 {
        transport.script(
            dest_a,
            i,
            ScriptedOutcome::Reply {
                delay: Duration::from_millis(5),
                peer: dest_a,
                error: None,
            },
        );
        transport.script(
            dest_b,
            i,
            ScriptedOutcome::Reply {
                delay: Duration::from_millis(5),
                peer: dest_b,
                error: None,
            },
        );
    }

    let mut config = Config::default().with_defaults();
    config.count = 5;
    config.interval = Duration::from_millis(10);
    config.timeout = Duration::from_millis(200);

    let session = Session::with_resolver(config, transport, Arc::new(ByHost));
    let (submit, reply) = session.start();
    submit.send(session.new_request(dest_a.to_string(), HashMap::new())).unwrap();
    submit.send(session.new_request(dest_b.to_string(), HashMap::new())).unwrap();
    drop(submit);

    let responses: Vec<_> = reply.iter().collect();
    assert_eq!(responses.len(), 10);
    for resp in &responses {
        let expected_peer = if resp.request.host == dest_a.to_string() {
            dest_a
        } else {
            dest_b
        };
        assert_eq!(resp.peer, Some(expected_peer));
        assert_eq!(resp.request.host, resp.peer.unwrap().to_string());
    }

    session.drain();
}

// Property 7 (engine-level view; the table-level orphan contract itself
// is exercised directly in `correlation.rs`'s unit tests): a reply that
// the transport never schedules still resolves cleanly as a timeout
// rather than hanging or producing a spurious second response.
#[test]
fn unscheduled_reply_resolves_as_a_single_timeout() {
    let dest = Ipv4Addr::new(192, 168, 0, 30);
    let transport = Arc::new(FakeTransport::new(ScriptedOutcome::Silent));
    let mut config = Config::default().with_defaults();
    config.count = 1;
    config.timeout = Duration::from_millis(100);

    let session = Session::with_resolver(config, transport, Arc::new(AlwaysResolves(dest)));
    let (submit, reply) = session.start();
    submit.send(session.new_request("host-f", HashMap::new())).unwrap();
    drop(submit);

    let responses: Vec<_> = reply.iter().collect();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].error, Some(pinger_core::ReplyError::Timeout));

    session.drain();
}
