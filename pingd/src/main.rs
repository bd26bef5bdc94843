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

//! Thin CLI front end: parses arguments, wires a `RawSocketTransport` into
//! a `Session`, submits one request per host, and prints one line per
//! `Response` as the reply stream drains. All coordination logic lives in
//! `pinger-core`; this binary is formatting and argument plumbing only.

#[macro_use]
extern crate log;
extern crate env_logger;

use clap::Clap;
use pinger_core::{Config, RawSocketTransport, Session};
use rand::Rng;
use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clap)]
#[clap(
    version = "0.2.0-beta1",
    author = "David Martinez Marti <deavidsedice@gmail.com>"
)]
struct Opts {
    /// Attempts per host. Negative means "repeat until interrupted".
    #[clap(short, long, default_value = "1")]
    count: i64,

    /// Minimum delay between successive attempts of the same host, in milliseconds.
    #[clap(short, long, default_value = "1000")]
    interval: u64,

    /// Per-attempt deadline, in milliseconds.
    #[clap(short, long, default_value = "3000")]
    timeout: u64,

    /// ICMP echo payload size in bytes.
    #[clap(long, default_value = "56")]
    packet_size: usize,

    /// IPv4 type-of-service byte.
    #[clap(long, default_value = "0")]
    tos: u8,

    /// IPv4 time-to-live.
    #[clap(long, default_value = "64")]
    ttl: u8,

    /// Minimum delay between submitting successive requests to different hosts.
    #[clap(short, long, default_value = "0")]
    smoothing: u64,

    /// Hosts to ping, by name or literal IPv4 address.
    #[clap(required = true)]
    hosts: Vec<String>,
}

fn main() -> ExitCode {
    env_logger::init();
    let opts: Opts = Opts::parse();

    let config = Config {
        count: opts.count,
        interval: Duration::from_millis(opts.interval),
        timeout: Duration::from_millis(opts.timeout),
        packet_size: opts.packet_size,
        tos: opts.tos,
        ttl: opts.ttl,
    }
    .with_defaults();

    let transport = match RawSocketTransport::new() {
        Ok(t) => Arc::new(t),
        Err(e) => {
            error!("could not start the icmp transport: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let session = Arc::new(Session::new(config, transport));
    let (submit, reply) = session.start();

    // `count < 0` requests repeat until interrupted, and only `drain()`
    // tells their scheduler threads to stop; it must run concurrently
    // with the reply-printing loop below rather than after it, or
    // nothing ever unblocks that loop.
    let drain_session = Arc::clone(&session);
    if let Err(e) = ctrlc::set_handler(move || drain_session.drain()) {
        warn!("could not install ctrl-c handler: {}", e);
    }

    // A touch of jitter on top of the smoothing delay keeps many hosts
    // with identical intervals from re-synchronizing into a single burst.
    let mut rng = rand::thread_rng();
    let smoothing = Duration::from_millis(opts.smoothing);
    for host in &opts.hosts {
        let request = session.new_request(host.clone(), HashMap::new());
        if submit.send(request).is_err() {
            warn!("submit channel closed early, dropping remaining hosts");
            break;
        }
        if !smoothing.is_zero() {
            let jitter = Duration::from_nanos(rng.gen_range(0..smoothing.as_nanos() as u64));
            std::thread::sleep(smoothing + jitter);
        }
    }
    drop(submit);

    for response in reply.iter() {
        println!("{}", format_response(&response));
    }

    session.drain();
    ExitCode::SUCCESS
}

fn format_response(response: &pinger_core::Response) -> String {
    match response.error {
        Some(err) => format!(
            "{:<32} seq={:<5} err={}",
            response.request.host, response.sequence, err
        ),
        None => format!(
            "{:<32} seq={:<5} rtt={:>8.2}ms peer={}",
            response.request.host,
            response.sequence,
            response.rtt * 1000.0,
            response
                .peer
                .map(|p| p.to_string())
                .unwrap_or_else(|| "?".to_string()),
        ),
    }
}
