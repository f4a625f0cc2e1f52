//! UDP socket wrapper with Source-style fragment reassembly and split-send.
//!
//! One `DatagramTransport` owns exactly one socket and its own fragment
//! reassembly table -- tables are never shared across sockets (spec §5).
//! Blocking recv with a deadline mirrors the teacher's I/O-thread pattern of
//! `UdpSocket::set_read_timeout` (see `net_io_thread.rs`), generalized from
//! a fixed poll interval to a caller-supplied deadline.

use std::net::{SocketAddr, SocketAddrV4, UdpSocket};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};

use crate::codec::{decode_header, wrap_header, FragmentHeader, NO_SPLIT};
use crate::error::TransportError;

/// Largest datagram sent without fragmenting.
pub const FRAGMENT_MAX_SIZE: usize = 1200;
/// Bytes consumed by the packet header (4) + fragment header (8) on every
/// fragment, leaving `FRAGMENT_MAX_SIZE - FRAGMENT_PREFIX_LEN` for payload.
const FRAGMENT_PREFIX_LEN: usize = 4 + 4 + 1 + 1 + 2;
const MAX_IN_FLIGHT_MESSAGES: usize = 1024;
const MAX_FRAGMENTS_PER_MESSAGE: usize = 100;

/// Per-message reassembly state: a fixed-size slot array indexed by
/// `fragment_id`, so the reassembled bytes never depend on arrival order.
#[derive(Default)]
struct Assembly {
    parts: Vec<Option<Vec<u8>>>,
    received: usize,
}

impl Assembly {
    fn insert(&mut self, header: FragmentHeader, tail: &[u8]) -> Option<Vec<u8>> {
        if self.parts.is_empty() {
            let expected = (header.fragment_count as usize).min(MAX_FRAGMENTS_PER_MESSAGE);
            self.parts = vec![None; expected.max(1)];
        }

        let idx = header.fragment_id as usize;
        if idx < self.parts.len() && self.parts[idx].is_none() {
            self.parts[idx] = Some(tail.to_vec());
            self.received += 1;
        }

        if self.received == self.parts.len() {
            let mut out = Vec::new();
            for part in self.parts.drain(..) {
                out.extend(part.expect("all slots filled when received == len"));
            }
            Some(out)
        } else {
            None
        }
    }
}

pub struct DatagramTransport {
    socket: UdpSocket,
    fragments: Mutex<LruCache<i32, Assembly>>,
}

impl DatagramTransport {
    /// Bind a listening socket (client-facing side). Uses `socket2` so the
    /// address can be reused immediately across restarts, the way a proxy
    /// redeployed in place needs to (the teacher's `net_ip_socket` reaches
    /// for `socket2` for the same reason, just for broadcast/ToS instead).
    pub fn bind(addr: SocketAddrV4) -> std::io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&SocketAddr::V4(addr).into())?;
        Ok(Self::wrap(socket.into()))
    }

    /// Open an ephemeral-port socket "connected" to an upstream address.
    /// Used once per refresh-loop iteration so concurrent loops never share
    /// a source port (spec §4.3).
    pub fn connect(remote: SocketAddrV4) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(SocketAddrV4::new(std::net::Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect(remote)?;
        Ok(Self::wrap(socket))
    }

    fn wrap(socket: UdpSocket) -> Self {
        DatagramTransport {
            socket,
            fragments: Mutex::new(LruCache::new(
                NonZeroUsize::new(MAX_IN_FLIGHT_MESSAGES).expect("nonzero"),
            )),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Send `packet` (a full encoded message, header included), splitting
    /// into Source fragments if it doesn't fit in one datagram. `addr` is
    /// required for a bound (listening) socket and ignored on a connected
    /// one.
    pub fn send_packet(&self, packet: &[u8], addr: Option<SocketAddr>) -> Result<(), TransportError> {
        if packet.len() <= FRAGMENT_MAX_SIZE {
            return self.send_raw(packet, addr);
        }

        let mtu = FRAGMENT_MAX_SIZE - FRAGMENT_PREFIX_LEN;
        let fragment_count = packet.len().div_ceil(mtu);
        debug_assert!(fragment_count <= u8::MAX as usize, "message far too large to fragment");
        let message_id = (rand::random::<i32>() & i32::MAX).max(1);

        for (fragment_id, chunk) in packet.chunks(mtu).enumerate() {
            let header = FragmentHeader {
                message_id,
                fragment_count: fragment_count as u8,
                fragment_id: fragment_id as u8,
                mtu: mtu as i16,
            };
            let mut datagram = wrap_header(header.encode(), true);
            datagram.extend_from_slice(chunk);
            self.send_raw(&datagram, addr)?;
        }
        Ok(())
    }

    fn send_raw(&self, datagram: &[u8], addr: Option<SocketAddr>) -> Result<(), TransportError> {
        match addr {
            Some(addr) => self.socket.send_to(datagram, addr)?,
            None => self.socket.send(datagram)?,
        };
        Ok(())
    }

    /// Receive one logical packet, reassembling fragments as needed. The
    /// deadline bounds the whole operation, not each individual fragment.
    pub fn recv_packet(&self, timeout: Duration) -> Result<(Vec<u8>, SocketAddr), TransportError> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 65_507];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Timeout);
            }
            self.socket.set_read_timeout(Some(remaining))?;

            let (len, addr) = match self.socket.recv_from(&mut buf) {
                Ok(v) => v,
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    return Err(TransportError::Timeout)
                }
                Err(e) => return Err(TransportError::Io(e)),
            };

            if let Some(packet) = self.handle_fragments(&buf[..len], addr)? {
                return Ok((packet, addr));
            }
        }
    }

    /// Returns `Ok(Some(bytes))` once a full logical packet is available,
    /// `Ok(None)` if more fragments are still expected.
    fn handle_fragments(
        &self,
        datagram: &[u8],
        addr: SocketAddr,
    ) -> Result<Option<Vec<u8>>, TransportError> {
        let (split, body) = decode_header(datagram).map_err(|_| TransportError::BrokenPacket {
            raw: datagram.to_vec(),
            addr,
        })?;

        if split == NO_SPLIT {
            return Ok(Some(datagram.to_vec()));
        }

        let (header, tail) = FragmentHeader::decode(body).map_err(|_| TransportError::BrokenPacket {
            raw: datagram.to_vec(),
            addr,
        })?;

        let mut table = self.fragments.lock();
        if table.get(&header.message_id).is_none() {
            table.put(header.message_id, Assembly::default());
        }
        let assembly = table
            .get_mut(&header.message_id)
            .expect("just inserted above");
        let result = assembly.insert(header, tail);
        if result.is_some() {
            table.pop(&header.message_id);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::wrap_header;

    fn fragment_datagrams(body: Vec<u8>, message_id: i32, mtu: usize) -> Vec<Vec<u8>> {
        let fragment_count = body.len().div_ceil(mtu) as u8;
        body.chunks(mtu)
            .enumerate()
            .map(|(fragment_id, chunk)| {
                let header = FragmentHeader {
                    message_id,
                    fragment_count,
                    fragment_id: fragment_id as u8,
                    mtu: mtu as i16,
                };
                let mut datagram = wrap_header(header.encode(), true);
                datagram.extend_from_slice(chunk);
                datagram
            })
            .collect()
    }

    #[test]
    fn reassembly_is_order_independent() {
        let body: Vec<u8> = (0..50u8).cycle().take(4000).collect();
        let fragments = fragment_datagrams(body.clone(), 777, 1188);

        for permuted in [
            fragments.clone(),
            fragments.iter().rev().cloned().collect(),
        ] {
            let transport = DatagramTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
            let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
            let mut result = None;
            for datagram in &permuted {
                result = transport.handle_fragments(datagram, addr).unwrap();
            }
            assert_eq!(result.unwrap(), body);
        }
    }

    #[test]
    fn non_split_packet_passes_through_untouched() {
        let transport = DatagramTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let packet = wrap_header(vec![0x54, 0x00], false);
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let result = transport.handle_fragments(&packet, addr).unwrap();
        assert_eq!(result.unwrap(), packet);
    }

    #[test]
    fn broken_header_surfaces_as_broken_packet() {
        let transport = DatagramTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let err = transport.handle_fragments(&[1, 2], addr).unwrap_err();
        assert!(matches!(err, TransportError::BrokenPacket { .. }));
    }

    #[test]
    fn fragment_table_evicts_oldest_beyond_capacity() {
        let transport = DatagramTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();

        for id in 0..(MAX_IN_FLIGHT_MESSAGES as i32 + 1) {
            let header = FragmentHeader {
                message_id: id + 1,
                fragment_count: 2,
                fragment_id: 0,
                mtu: 10,
            };
            let mut datagram = wrap_header(header.encode(), true);
            datagram.extend_from_slice(b"x");
            transport.handle_fragments(&datagram, addr).unwrap();
        }

        assert_eq!(transport.fragments.lock().len(), MAX_IN_FLIGHT_MESSAGES);
    }
}
