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

//! Hostname resolution is deliberately an external collaborator: the
//! coordinator only consumes a `Resolver` capability. Caching policy,
//! DNS round-robin handling, and the like live entirely outside this crate.

use std::net::{Ipv4Addr, ToSocketAddrs};

/// Resolves a caller-supplied host string to an IPv4 address.
pub trait Resolver: Send + Sync {
    fn resolve(&self, host: &str) -> Option<Ipv4Addr>;
}

/// Resolves via the OS stub resolver (`getaddrinfo`, through
/// `ToSocketAddrs`), falling back to parsing a literal dotted-quad.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdResolver;

impl Resolver for StdResolver {
    fn resolve(&self, host: &str) -> Option<Ipv4Addr> {
        if let Ok(addr) = host.parse::<Ipv4Addr>() {
            return Some(addr);
        }
        (host, 0u16)
            .to_socket_addrs()
            .ok()
            .into_iter()
            .flatten()
            .find_map(|addr| match addr.ip() {
                std::net::IpAddr::V4(v4) => Some(v4),
                std::net::IpAddr::V6(_) => None,
            })
    }
}
