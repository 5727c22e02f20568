use std::io::{Error, ErrorKind};
use std::mem;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::os::unix::io::AsRawFd;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use libc::{c_int, c_void, cmsghdr, iovec, msghdr, recvmsg, setsockopt, timeval, MSG_TRUNC, SOL_SOCKET, SO_TIMESTAMP};
use log::{debug, warn};
use rand::Rng;

use pnet_packet::icmp::{echo_reply, echo_request, IcmpPacket, IcmpTypes};
use pnet_packet::ip::IpNextHeaderProtocols;
use pnet_packet::ipv4::Ipv4Packet;
use pnet_packet::Packet;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::config::{Config, MAX_SIZE, MIN_SIZE};
use crate::error::ProbeError;
use crate::monitor::Probe;
use crate::stat::{Bucket, Reply, RunStatistics, Sample};

/// Longest single wait on the receive socket, so the run notices when it is done.
const RECV_POLL: Duration = Duration::from_millis(100);

/// Largest IPv4 header (with options) plus the ICMP echo header.
const HEADERS_MAX: usize = 60 + 8;

/// Options of one probe run.
#[derive(Debug, Clone)]
pub struct PingOption {
    /// Upper bound of the whole run.
    pub timeout: Duration,
    /// Delay between two echo requests.
    pub interval: Duration,
    /// Echo requests to send.
    pub count: u16,
    pub ttl: u32,
    /// ICMP identifier of the run's packets.
    pub ident: u16,
    /// Payload length, the first 16 bytes carry the send timestamp.
    pub len: usize,
}

impl PingOption {
    /// Options for one run of `config`, with a fresh random identifier.
    pub fn from_config(config: &Config) -> Self {
        PingOption {
            timeout: config.timeout,
            interval: config.interval,
            count: config.count.min(u32::from(u16::MAX)) as u16,
            ttl: 64,
            ident: rand::random(),
            len: config.size.clamp(MIN_SIZE, MAX_SIZE),
        }
    }
}

/// IcmpProbe pings the configured address over raw ICMPv4 sockets.
#[derive(Debug, Default)]
pub struct IcmpProbe;

impl IcmpProbe {
    pub fn new() -> Self {
        IcmpProbe
    }
}

impl Probe for IcmpProbe {
    fn run(&mut self, config: &Config) -> Result<RunStatistics, ProbeError> {
        let addr = resolve(&config.address)?;
        let popt = PingOption::from_config(config);
        debug!(
            "pinging {} ({}) ident={} count={}",
            config.address, addr, popt.ident, popt.count
        );
        ping(addr, &popt)
    }
}

/// Resolve `address` to its first IPv4 address.
pub fn resolve(address: &str) -> Result<Ipv4Addr, ProbeError> {
    if let Ok(ip) = address.parse::<Ipv4Addr>() {
        return Ok(ip);
    }

    let addrs = (address, 0)
        .to_socket_addrs()
        .map_err(|source| ProbeError::Resolve {
            address: address.to_string(),
            source,
        })?;

    addrs
        .filter_map(|addr| match addr.ip() {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        })
        .next()
        .ok_or_else(|| ProbeError::NoIpv4Address(address.to_string()))
}

/// Payload patterns, picked by sequence number so corrupted replies can be told apart.
struct Payloads([Vec<u8>; 4]);

impl Payloads {
    fn new(len: usize) -> Self {
        let mut rand_payload = vec![0u8; len];
        rand::thread_rng().fill(&mut rand_payload[..]);

        Payloads([rand_payload, vec![0; len], vec![1; len], vec![0x5A; len]])
    }

    fn for_seq(&self, seq: u16) -> &[u8] {
        &self.0[seq as usize % self.0.len()]
    }

    /// True if the reply body differs from what was sent with `seq`.
    fn is_bitflip(&self, seq: u16, payload: &[u8]) -> bool {
        let sent = self.for_seq(seq);
        payload.len() != sent.len() || payload[MIN_SIZE..] != sent[MIN_SIZE..]
    }
}

/// Run `popt.count` echo requests against `addr` and summarize the replies.
///
/// The first request goes out at once, the next ones from a sender thread
/// every `popt.interval`. This thread collects replies until every request has
/// been answered or `popt.timeout` has passed since the start.
pub fn ping(addr: Ipv4Addr, popt: &PingOption) -> Result<RunStatistics, ProbeError> {
    let deadline = Instant::now() + popt.timeout;
    let dest = SocketAddr::new(IpAddr::V4(addr), 0);

    let len = popt.len.clamp(MIN_SIZE, MAX_SIZE);
    let payloads = Arc::new(Payloads::new(len));
    let bucket = Arc::new(Bucket::new());
    // dropping the sending half wakes the sender up and stops it
    let (stop_tx, stop_rx) = mpsc::channel::<()>();

    // listen before the first request goes out
    let read_socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))
        .map_err(ProbeError::socket)?;
    enable_timestamp(&read_socket);

    let send_socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))
        .map_err(ProbeError::socket)?;
    send_socket.set_ttl(popt.ttl).map_err(ProbeError::Socket)?;
    send_socket
        .set_write_timeout(Some(popt.timeout.min(RECV_POLL)))
        .map_err(ProbeError::Socket)?;

    let mut sender = {
        let popt = popt.clone();
        let payloads = payloads.clone();
        let bucket = bucket.clone();
        Some(thread::spawn(move || {
            send(send_socket, dest, &popt, &payloads, &bucket, stop_rx)
        }))
    };

    let received = receive(
        &read_socket,
        addr,
        popt.ident,
        &payloads,
        &bucket,
        deadline,
        len,
        &mut sender,
    );

    drop(stop_tx);
    if let Some(handle) = sender.take() {
        join(handle)?;
    }
    received?;

    Ok(bucket.statistics())
}

fn join(handle: JoinHandle<Result<(), ProbeError>>) -> Result<(), ProbeError> {
    handle.join().map_err(|_| ProbeError::SenderPanicked)?
}

fn send(
    socket: Socket,
    dest: SocketAddr,
    popt: &PingOption,
    payloads: &Payloads,
    bucket: &Bucket,
    stop: Receiver<()>,
) -> Result<(), ProbeError> {
    let dest = SockAddr::from(dest);
    let start = Instant::now();

    for seq in 0..popt.count {
        let wait = popt
            .interval
            .saturating_mul(u32::from(seq))
            .saturating_sub(start.elapsed());
        match stop.recv_timeout(wait) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }

        let txts = now_nanos();
        let buf = echo_request_packet(popt.ident, seq, txts, payloads.for_seq(seq));

        bucket.add(Sample::new(txts, seq));
        socket.send_to(&buf, &dest).map_err(ProbeError::Send)?;
    }

    Ok(())
}

fn receive(
    socket: &Socket,
    addr: Ipv4Addr,
    ident: u16,
    payloads: &Payloads,
    bucket: &Bucket,
    deadline: Instant,
    len: usize,
    sender: &mut Option<JoinHandle<Result<(), ProbeError>>>,
) -> Result<(), ProbeError> {
    let mut buffer = vec![0u8; HEADERS_MAX + len];

    loop {
        if sender.as_ref().map_or(false, |h| h.is_finished()) {
            if let Some(handle) = sender.take() {
                join(handle)?;
            }
        }
        if sender.is_none() && bucket.all_received() {
            return Ok(());
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        // a zero timeout would block forever
        let wait = (deadline - now).min(RECV_POLL).max(Duration::from_millis(1));
        socket
            .set_read_timeout(Some(wait))
            .map_err(ProbeError::Receive)?;

        let (nbytes, kernel_ts) = match recv_with_timestamp(socket, &mut buffer) {
            Ok((_, _, true)) => {
                debug!("dropped truncated datagram");
                continue;
            }
            Ok((nbytes, kernel_ts, false)) => (nbytes, kernel_ts),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                continue;
            }
            Err(e) => return Err(ProbeError::Receive(e)),
        };

        let rxts = kernel_ts
            .and_then(|ts| ts.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or_else(now_nanos);

        let (seq, payload) = match parse_echo_reply(&buffer[..nbytes], addr, ident) {
            Some(reply) => reply,
            None => continue,
        };

        let bitflip = payloads.is_bitflip(seq, payload);
        if bitflip {
            warn!("bitflip detected! seq={}", seq);
        }

        match bucket.add_reply(seq, rxts, bitflip) {
            Reply::Fresh => {}
            Reply::Duplicate => warn!("duplicate reply from {} seq={}", addr, seq),
            Reply::Unknown => debug!("reply from {} for unsent seq={}", addr, seq),
        }
    }
}

/// Build an echo request whose payload starts with `txts`.
fn echo_request_packet(ident: u16, seq: u16, txts: u128, payload: &[u8]) -> Vec<u8> {
    let mut buf = vec![0; echo_request::EchoRequestPacket::minimum_packet_size() + payload.len()];

    let mut send_payload = payload.to_vec();
    let ts_bytes = txts.to_be_bytes();
    send_payload[..ts_bytes.len()].copy_from_slice(&ts_bytes);

    if let Some(mut packet) = echo_request::MutableEchoRequestPacket::new(&mut buf[..]) {
        packet.set_icmp_type(IcmpTypes::EchoRequest);
        packet.set_identifier(ident);
        packet.set_sequence_number(seq);
        packet.set_payload(&send_payload);

        let checksum = pnet_packet::util::checksum(packet.packet(), 1);
        packet.set_checksum(checksum);
    }

    buf
}

/// Extract sequence number and payload of an echo reply from `addr` carrying `ident`.
/// `buf` is a raw IPv4 datagram as read from the socket.
fn parse_echo_reply(buf: &[u8], addr: Ipv4Addr, ident: u16) -> Option<(u16, &[u8])> {
    let ipv4_packet = Ipv4Packet::new(buf)?;
    if ipv4_packet.get_next_level_protocol() != IpNextHeaderProtocols::Icmp
        || ipv4_packet.get_source() != addr
    {
        return None;
    }

    let icmp_bytes = buf.get(ipv4_packet.get_header_length() as usize * 4..)?;
    let icmp_packet = IcmpPacket::new(icmp_bytes)?;
    if icmp_packet.get_icmp_type() != IcmpTypes::EchoReply
        || icmp_packet.get_icmp_code() != echo_reply::IcmpCodes::NoCode
    {
        return None;
    }

    let reply = echo_reply::EchoReplyPacket::new(icmp_bytes)?;
    if reply.get_identifier() != ident {
        return None;
    }

    let payload = &icmp_bytes[echo_reply::EchoReplyPacket::minimum_packet_size()..];
    if payload.len() < MIN_SIZE {
        return None;
    }

    Some((reply.get_sequence_number(), payload))
}

fn enable_timestamp(socket: &Socket) {
    let enable: c_int = 1;
    let ret = unsafe {
        setsockopt(
            socket.as_raw_fd(),
            SOL_SOCKET,
            SO_TIMESTAMP,
            &enable as *const _ as *const c_void,
            mem::size_of_val(&enable) as libc::socklen_t,
        )
    };
    if ret == -1 {
        warn!("Failed to set SO_TIMESTAMP: {}", Error::last_os_error());
    }
}

/// Read one datagram, along with the kernel receive timestamp when there is one
/// and whether the datagram did not fit into `buffer`.
fn recv_with_timestamp(
    socket: &Socket,
    buffer: &mut [u8],
) -> std::io::Result<(usize, Option<SystemTime>, bool)> {
    // u64 keeps the control messages aligned
    let mut control_buf = [0u64; 64];

    let mut iovec = iovec {
        iov_base: buffer.as_mut_ptr() as *mut c_void,
        iov_len: buffer.len(),
    };

    let mut msghdr: msghdr = unsafe { mem::zeroed() };
    msghdr.msg_iov = &mut iovec;
    msghdr.msg_iovlen = 1;
    msghdr.msg_control = control_buf.as_mut_ptr() as *mut c_void;
    msghdr.msg_controllen = mem::size_of_val(&control_buf) as _;

    let nbytes = unsafe { recvmsg(socket.as_raw_fd(), &mut msghdr, 0) };
    if nbytes < 0 {
        return Err(Error::last_os_error());
    }

    let truncated = msghdr.msg_flags & MSG_TRUNC != 0;
    Ok((nbytes as usize, get_timestamp(&msghdr), truncated))
}

fn get_timestamp(msghdr: &msghdr) -> Option<SystemTime> {
    let mut cmsg: *mut cmsghdr = unsafe { libc::CMSG_FIRSTHDR(msghdr) };

    while !cmsg.is_null() {
        if unsafe { (*cmsg).cmsg_level == SOL_SOCKET && (*cmsg).cmsg_type == SO_TIMESTAMP } {
            let tv = unsafe { std::ptr::read_unaligned(libc::CMSG_DATA(cmsg) as *const timeval) };
            return Some(
                UNIX_EPOCH + Duration::new(tv.tv_sec as u64, tv.tv_usec as u32 * 1000),
            );
        }

        cmsg = unsafe { libc::CMSG_NXTHDR(msghdr, cmsg) };
    }

    None
}

fn now_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default()
}
