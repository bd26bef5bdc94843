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

//! Wire format: IPv4 + ICMPv4 Echo (RFC 792). Since the socket is opened
//! with `IP_HDRINCL`, outbound datagrams carry an IPv4 header built here
//! rather than by the kernel. Inbound datagrams are handed to us with the
//! kernel's own 20-byte IPv4 header already prepended.

use crate::config::Config;
use pnet::packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet::packet::icmp::IcmpTypes;
use pnet::packet::ipv4::MutableIpv4Packet;
use pnet::packet::Packet;
use pnet::util::checksum as pnet_checksum;
use std::net::Ipv4Addr;

const IPV4_HEADER_LEN: usize = 20;
const ICMP_HEADER_LEN: usize = 8;

/// Offset of the ICMP type byte inside a datagram prefixed with the
/// kernel-supplied 20-byte IPv4 header.
const ICMP_TYPE_OFFSET: usize = IPV4_HEADER_LEN;
/// Offset of the identifier/sequence fields for a plain echo reply.
const ECHO_IDENTIFIER_OFFSET: usize = IPV4_HEADER_LEN + 4;
const ECHO_SEQUENCE_OFFSET: usize = IPV4_HEADER_LEN + 6;
/// An ICMP error quotes the offending datagram starting right after its
/// own 8-byte header copy of the original ICMP message plus the 20-byte
/// IPv4 header copy: offset 20 (outer IP) + 8 (outer ICMP "unused"/MTU
/// words) + 20 (quoted IP header) = 48 to the quoted ICMP header, and the
/// quoted identifier/sequence sit 4/6 bytes into that.
const QUOTED_ICMP_OFFSET: usize = IPV4_HEADER_LEN + ICMP_HEADER_LEN + IPV4_HEADER_LEN;
const QUOTED_IDENTIFIER_OFFSET: usize = QUOTED_ICMP_OFFSET + 4;
const QUOTED_SEQUENCE_OFFSET: usize = QUOTED_ICMP_OFFSET + 6;

/// Builds a complete IPv4 + ICMPv4 Echo Request datagram ready to hand to
/// a `IP_HDRINCL` raw socket.
pub fn build_echo_request(
    dest: Ipv4Addr,
    identifier: u16,
    sequence: u16,
    config: &Config,
) -> Vec<u8> {
    let icmp_len = ICMP_HEADER_LEN + config.packet_size;
    let total_len = IPV4_HEADER_LEN + icmp_len;

    let mut buf = vec![0u8; total_len];
    {
        let (ip_buf, icmp_buf) = buf.split_at_mut(IPV4_HEADER_LEN);

        let mut echo = MutableEchoRequestPacket::new(icmp_buf).expect("icmp buffer sized above");
        echo.set_icmp_type(IcmpTypes::EchoRequest);
        echo.set_icmp_code(pnet::packet::icmp::IcmpCode::new(0));
        echo.set_identifier(identifier);
        echo.set_sequence_number(sequence);
        echo.set_checksum(0);
        let csum = pnet_checksum(echo.packet(), 1);
        echo.set_checksum(csum);

        let mut ip = MutableIpv4Packet::new(ip_buf).expect("ip buffer sized above");
        ip.set_version(4);
        ip.set_header_length((IPV4_HEADER_LEN / 4) as u8);
        ip.set_dscp(config.tos >> 2);
        ip.set_ecn(config.tos & 0x3);
        ip.set_total_length(total_len as u16);
        ip.set_ttl(config.ttl);
        ip.set_next_level_protocol(pnet::packet::ip::IpNextHeaderProtocols::Icmp);
        ip.set_destination(dest);
        ip.set_checksum(pnet::packet::ipv4::checksum(&ip.to_immutable()));
    }
    buf
}

/// What the packet parser extracted from one inbound datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedIcmp {
    pub identifier: u16,
    pub sequence: u16,
    pub icmp_type: u8,
    pub icmp_code: u8,
    /// True when this is an ICMP error (unreachable/time-exceeded/redirect/
    /// param-problem) rather than a plain echo reply.
    pub is_error: bool,
}

/// The result of inspecting one datagram read off the raw socket.
pub enum Inbound {
    /// An echo reply or ICMP error bearing this process's identifier.
    Reply(ParsedIcmp),
    /// An echo request (another host's ping passing through, or a
    /// loopback peer) — never routed to a waiter.
    EchoRequest,
    /// A datagram too short, or bearing an identifier that isn't ours.
    Ignore,
}

/// Inspects one datagram as delivered by `recvmsg`, including the
/// kernel-prepended 20-byte IPv4 header.
pub fn parse_inbound(buf: &[u8], our_identifier: u16) -> Inbound {
    if buf.len() <= ICMP_TYPE_OFFSET {
        return Inbound::Ignore;
    }
    let icmp_type = buf[ICMP_TYPE_OFFSET];
    let icmp_code = buf.get(ICMP_TYPE_OFFSET + 1).copied().unwrap_or(0);

    match icmp_type {
        0 => {
            // Echo reply: identifier/sequence live in this packet's own header.
            if buf.len() < ECHO_SEQUENCE_OFFSET + 2 {
                return Inbound::Ignore;
            }
            let identifier = be_u16(buf, ECHO_IDENTIFIER_OFFSET);
            let sequence = be_u16(buf, ECHO_SEQUENCE_OFFSET);
            if identifier != our_identifier {
                return Inbound::Ignore;
            }
            Inbound::Reply(ParsedIcmp {
                identifier,
                sequence,
                icmp_type,
                icmp_code,
                is_error: false,
            })
        }
        8 => Inbound::EchoRequest,
        3 | 5 | 11 | 12 => {
            // Destination unreachable / redirect / time exceeded / param
            // problem: identifier/sequence live in the quoted original
            // datagram, not in this ICMP message's own header.
            if buf.len() < QUOTED_SEQUENCE_OFFSET + 2 {
                return Inbound::Ignore;
            }
            let identifier = be_u16(buf, QUOTED_IDENTIFIER_OFFSET);
            let sequence = be_u16(buf, QUOTED_SEQUENCE_OFFSET);
            if identifier != our_identifier {
                return Inbound::Ignore;
            }
            Inbound::Reply(ParsedIcmp {
                identifier,
                sequence,
                icmp_type,
                icmp_code,
                is_error: true,
            })
        }
        _ => Inbound::Ignore,
    }
}

fn be_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

/// Copies the ICMP portion of a datagram for inclusion in a
/// `Response.icmp_message`: just the 8-byte echo reply header for a plain
/// reply (type 0), or up to 40 bytes of the error envelope (quoted IP
/// header plus quoted ICMP header) for an ICMP error.
pub fn icmp_message_bytes(buf: &[u8], is_error: bool) -> Vec<u8> {
    let start = ICMP_TYPE_OFFSET.min(buf.len());
    let len = if is_error { 40 } else { ICMP_HEADER_LEN };
    let end = (start + len).min(buf.len());
    buf[start..end].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config::default()
    }

    #[test]
    fn builds_datagram_of_expected_length() {
        let buf = build_echo_request(Ipv4Addr::new(192, 168, 0, 1), 42, 7, &config());
        assert_eq!(buf.len(), IPV4_HEADER_LEN + ICMP_HEADER_LEN + config().packet_size);
        assert_eq!(buf[0] >> 4, 4); // version
    }

    #[test]
    fn parses_echo_reply_identifier_and_sequence() {
        // IP header (20 bytes, contents don't matter here) + ICMP echo reply.
        let mut buf = vec![0u8; IPV4_HEADER_LEN + ICMP_HEADER_LEN];
        buf[ICMP_TYPE_OFFSET] = 0; // echo reply
        buf[ECHO_IDENTIFIER_OFFSET..ECHO_IDENTIFIER_OFFSET + 2].copy_from_slice(&99u16.to_be_bytes());
        buf[ECHO_SEQUENCE_OFFSET..ECHO_SEQUENCE_OFFSET + 2].copy_from_slice(&1234u16.to_be_bytes());

        match parse_inbound(&buf, 99) {
            Inbound::Reply(p) => {
                assert_eq!(p.sequence, 1234);
                assert!(!p.is_error);
            }
            _ => panic!("expected a reply"),
        }
    }

    #[test]
    fn discards_reply_with_foreign_identifier() {
        let mut buf = vec![0u8; IPV4_HEADER_LEN + ICMP_HEADER_LEN];
        buf[ICMP_TYPE_OFFSET] = 0;
        buf[ECHO_IDENTIFIER_OFFSET..ECHO_IDENTIFIER_OFFSET + 2].copy_from_slice(&1u16.to_be_bytes());
        assert!(matches!(parse_inbound(&buf, 2), Inbound::Ignore));
    }

    #[test]
    fn discards_incoming_echo_request() {
        let mut buf = vec![0u8; IPV4_HEADER_LEN + ICMP_HEADER_LEN];
        buf[ICMP_TYPE_OFFSET] = 8;
        assert!(matches!(parse_inbound(&buf, 2), Inbound::EchoRequest));
    }

    #[test]
    fn parses_identifier_from_quoted_datagram_on_unreachable() {
        let mut buf = vec![0u8; QUOTED_SEQUENCE_OFFSET + 2];
        buf[ICMP_TYPE_OFFSET] = 3; // destination unreachable
        buf[QUOTED_IDENTIFIER_OFFSET..QUOTED_IDENTIFIER_OFFSET + 2]
            .copy_from_slice(&55u16.to_be_bytes());
        buf[QUOTED_SEQUENCE_OFFSET..QUOTED_SEQUENCE_OFFSET + 2]
            .copy_from_slice(&4321u16.to_be_bytes());

        // icmp_type -> ReplyError mapping lives in transport.rs; this only
        // checks that the quoted datagram's identifier/sequence are recovered.
        match parse_inbound(&buf, 55) {
            Inbound::Reply(p) => {
                assert!(p.is_error);
                assert_eq!(p.sequence, 4321);
                assert_eq!(p.icmp_type, 3);
            }
            _ => panic!("expected a reply"),
        }
    }
}
