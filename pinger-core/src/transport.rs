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

//! ICMP Transport: the raw-socket send/receive loops.
//!
//! This is the only component that talks to the kernel directly. `Transport`
//! is a capability interface so tests can inject a fake one (see
//! `crate::fake_transport`) and production wires in `RawSocketTransport`.

use crate::config::Config;
use crate::correlation::CorrelationTable;
use crate::error::{ReplyError, SessionError};
use crate::packet::{self, Inbound};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::mem::MaybeUninit;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Capability interface the scheduler sends through and the session
/// starts a receive loop against. One instance is shared by the whole
/// session; sends and receives are expected to be safe to call
/// concurrently from their respective dedicated workers.
pub trait Transport: Send + Sync {
    /// Marshals and sends one echo request. On success returns the instant
    /// captured as close to the syscall as possible.
    fn send(&self, dest: Ipv4Addr, identifier: u16, sequence: u16, config: &Config) -> std::io::Result<Instant>;

    /// Spawns the receive worker, delivering parsed replies into `table`
    /// until `stop` is observed set. Returns the worker's join handle.
    fn start_receiving(
        self: Arc<Self>,
        table: Arc<CorrelationTable>,
        identifier: u16,
        stop: Arc<AtomicBool>,
    ) -> JoinHandle<()>;
}

/// Production transport: one `IP_HDRINCL` ICMPv4 raw socket, read and
/// written from dedicated threads.
pub struct RawSocketTransport {
    socket: Arc<Socket>,
}

impl RawSocketTransport {
    /// Opens and configures the raw socket. The only fatal condition in
    /// the whole transport: everything past this point degrades to a
    /// logged-and-continue runtime error.
    pub fn new() -> Result<Self, SessionError> {
        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))
            .map_err(SessionError::TransportFatal)?;

        socket.set_header_included(true).map_err(SessionError::TransportFatal)?;

        // SO_TIMESTAMP: ask the kernel to attach a receive timestamp as an
        // ancillary control message on every recvmsg.
        set_so_timestamp(&socket).map_err(SessionError::TransportFatal)?;

        // Best-effort: a bigger receive buffer survives bursts without
        // dropping replies; failure here is not fatal.
        let _ = socket.set_recv_buffer_size(1 << 20);

        let bind_addr: SockAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0).into();
        socket.bind(&bind_addr).map_err(SessionError::TransportFatal)?;

        Ok(Self {
            socket: Arc::new(socket),
        })
    }
}

impl Transport for RawSocketTransport {
    fn send(&self, dest: Ipv4Addr, identifier: u16, sequence: u16, config: &Config) -> std::io::Result<Instant> {
        let datagram = packet::build_echo_request(dest, identifier, sequence, config);
        let dest_addr: SockAddr = SocketAddr::new(IpAddr::V4(dest), 0).into();
        self.socket.send_to(&datagram, &dest_addr)?;
        Ok(Instant::now())
    }

    fn start_receiving(
        self: Arc<Self>,
        table: Arc<CorrelationTable>,
        identifier: u16,
        stop: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        let socket = Arc::clone(&self.socket);
        thread::spawn(move || {
            let fd = socket.as_raw_fd();
            let mut buf = [0u8; 2048];
            while !stop.load(Ordering::Relaxed) {
                match recv_with_timestamp(fd, &mut buf) {
                    Ok(Some((len, received_at, peer))) => {
                        route_datagram(&table, identifier, &buf[..len], received_at, peer);
                    }
                    Ok(None) => continue, // recv timed out; re-check stop flag
                    Err(e) => {
                        log::warn!("recvmsg error on icmp socket: {}", e);
                    }
                }
            }
        })
    }
}

fn route_datagram(
    table: &CorrelationTable,
    identifier: u16,
    buf: &[u8],
    received_at: Instant,
    peer: Option<Ipv4Addr>,
) {
    match packet::parse_inbound(buf, identifier) {
        Inbound::Reply(parsed) => {
            let error = icmp_type_to_error(parsed.icmp_type);
            let icmp_message = packet::icmp_message_bytes(buf, parsed.is_error);
            table.deliver_reply(parsed.sequence, received_at, peer, icmp_message, error);
        }
        Inbound::EchoRequest => {
            log::trace!("dropped incoming icmp echo request (loopback peer)");
        }
        Inbound::Ignore => {
            log::trace!("dropped unrecognized or foreign-identifier icmp datagram");
        }
    }
}

fn icmp_type_to_error(icmp_type: u8) -> Option<ReplyError> {
    match icmp_type {
        0 => None,
        3 => Some(ReplyError::Unreachable),
        5 => Some(ReplyError::Redirect),
        11 => Some(ReplyError::TimeExceeded),
        12 => Some(ReplyError::ParamProblem),
        _ => None,
    }
}

fn set_so_timestamp(socket: &Socket) -> std::io::Result<()> {
    let enable: libc::c_int = 1;
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_TIMESTAMP,
            &enable as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Reads one datagram with `recvmsg`, extracting the kernel `SO_TIMESTAMP`
/// control message when present and falling back to a wall-clock reading
/// at return time otherwise. Returns `Ok(None)` on a read timeout so the
/// caller can re-check its stop flag.
fn recv_with_timestamp(
    fd: i32,
    buf: &mut [u8],
) -> std::io::Result<Option<(usize, Instant, Option<Ipv4Addr>)>> {
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr() as *mut libc::c_void,
        iov_len: buf.len(),
    };
    let mut cmsg_buf = [0u8; 64];
    let mut src = MaybeUninit::<libc::sockaddr_in>::zeroed();

    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_name = src.as_mut_ptr() as *mut libc::c_void;
    msg.msg_namelen = std::mem::size_of::<libc::sockaddr_in>() as u32;
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr() as *mut libc::c_void;
    msg.msg_controllen = cmsg_buf.len() as _;

    // A short read timeout keeps the loop responsive to the session's
    // drain/stop signal without busy-spinning; set once at socket setup
    // would be cleaner, but recvmsg itself has no timeout parameter, so
    // this relies on SO_RCVTIMEO having been configured by the caller's
    // socket (not set here; recv returning EAGAIN is treated as a no-op
    // poll rather than an error).
    let n = unsafe { libc::recvmsg(fd, &mut msg, 0) };
    if n < 0 {
        let err = std::io::Error::last_os_error();
        if matches!(err.raw_os_error(), Some(libc::EAGAIN) | Some(libc::EWOULDBLOCK)) {
            return Ok(None);
        }
        return Err(err);
    }

    let received_at = extract_timestamp(&msg).unwrap_or_else(Instant::now);
    let peer = if msg.msg_namelen as usize >= std::mem::size_of::<libc::sockaddr_in>() {
        let addr = unsafe { src.assume_init() };
        Some(Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr)))
    } else {
        None
    };

    Ok(Some((n as usize, received_at, peer)))
}

/// Walks the ancillary control messages looking for `SO_TIMESTAMP`
/// (`SCM_TIMESTAMP`), converting the kernel's `struct timeval` into an
/// `Instant` by anchoring it to `Instant::now()` at call time. This keeps
/// the rest of the pipeline in `Instant` arithmetic while still honoring
/// the kernel-observed receive time relative to "now".
fn extract_timestamp(msg: &libc::msghdr) -> Option<Instant> {
    let now_instant = Instant::now();
    let now_wall = std::time::SystemTime::now();

    let mut cmsg = unsafe { libc::CMSG_FIRSTHDR(msg) };
    while !cmsg.is_null() {
        let header = unsafe { &*cmsg };
        if header.cmsg_level == libc::SOL_SOCKET && header.cmsg_type == libc::SCM_TIMESTAMP {
            let data_ptr = unsafe { libc::CMSG_DATA(cmsg) } as *const libc::timeval;
            let tv = unsafe { data_ptr.read_unaligned() };
            let kernel_wall = std::time::UNIX_EPOCH
                + std::time::Duration::new(tv.tv_sec as u64, (tv.tv_usec as u32) * 1000);
            return Some(match kernel_wall.duration_since(now_wall) {
                Ok(ahead) => now_instant + ahead,
                Err(behind) => now_instant - behind.duration(),
            });
        }
        cmsg = unsafe { libc::CMSG_NXTHDR(msg as *const _ as *mut _, cmsg) };
    }
    None
}
