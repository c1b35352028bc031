//! Packet media: where encoded packets actually go.
//!
//! A medium moves opaque byte packets. Peer addressing is by string; media
//! that address peers one by one consult the `allow` predicate so untrusted
//! peers are never sent to.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::RwLock;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, trace};

use super::settings::{Reliability, TransportKind, TransportSettings};
use crate::error::TransportError;

/// Largest UDP payload we will attempt.
pub const MAX_DATAGRAM: usize = 65_507;

/// How long a reliable in-process send waits for queue space.
const RELIABLE_SEND_WAIT: Duration = Duration::from_millis(250);

/// A packet medium.
pub trait Medium: Send + Sync {
    /// This endpoint's address.
    fn local_address(&self) -> String;

    /// Deliver `packet` to peers. Returns how many peers it was handed to.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the medium cannot send at all.
    fn send(&self, packet: &[u8], allow: &dyn Fn(&str) -> bool) -> Result<usize, TransportError>;

    /// Wait up to `timeout` for the next packet.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Closed` once the medium is closed.
    fn recv(&self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError>;

    /// Release resources; later calls fail with `Closed`.
    fn close(&self);
}

/// In-process rendezvous point. Every endpoint sees every other endpoint's
/// packets, as on a broadcast segment.
#[derive(Clone, Default)]
pub struct InProcessHub {
    peers: Arc<RwLock<HashMap<String, Sender<Vec<u8>>>>>,
}

impl std::fmt::Debug for InProcessHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessHub")
            .field("endpoints", &self.peers.read().len())
            .finish()
    }
}

impl InProcessHub {
    /// Empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint at `address` with a receive queue of `queue_length` packets.
    ///
    /// # Errors
    ///
    /// Fails if `address` is already taken on this hub.
    pub fn endpoint(
        &self,
        address: impl Into<String>,
        queue_length: usize,
        reliability: Reliability,
    ) -> Result<InProcessEndpoint, TransportError> {
        let address = address.into();
        let (tx, rx) = bounded(queue_length.max(1));
        {
            let mut peers = self.peers.write();
            if peers.contains_key(&address) {
                return Err(TransportError::ConnectionFailed {
                    message: format!("address '{address}' already bound on hub"),
                });
            }
            peers.insert(address.clone(), tx);
        }
        Ok(InProcessEndpoint {
            address,
            hub: self.clone(),
            rx,
            reliability,
            closed: AtomicBool::new(false),
        })
    }

    /// Addresses currently bound.
    #[must_use]
    pub fn addresses(&self) -> Vec<String> {
        let mut out: Vec<String> = self.peers.read().keys().cloned().collect();
        out.sort();
        out
    }
}

/// One endpoint of an [`InProcessHub`].
pub struct InProcessEndpoint {
    address: String,
    hub: InProcessHub,
    rx: Receiver<Vec<u8>>,
    reliability: Reliability,
    closed: AtomicBool,
}

impl Medium for InProcessEndpoint {
    fn local_address(&self) -> String {
        self.address.clone()
    }

    fn send(&self, packet: &[u8], allow: &dyn Fn(&str) -> bool) -> Result<usize, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let targets: Vec<(String, Sender<Vec<u8>>)> = self
            .hub
            .peers
            .read()
            .iter()
            .filter(|(addr, _)| **addr != self.address)
            .map(|(addr, tx)| (addr.clone(), tx.clone()))
            .collect();

        let mut delivered = 0;
        for (addr, tx) in targets {
            if !allow(&addr) {
                trace!(peer = %addr, "skipping untrusted peer");
                continue;
            }
            let result = match self.reliability {
                Reliability::BestEffort => match tx.try_send(packet.to_vec()) {
                    Ok(()) => Ok(()),
                    Err(TrySendError::Full(_)) => Err("queue full"),
                    Err(TrySendError::Disconnected(_)) => Err("peer gone"),
                },
                Reliability::Reliable => tx
                    .send_timeout(packet.to_vec(), RELIABLE_SEND_WAIT)
                    .map_err(|_| "queue full or peer gone"),
            };
            match result {
                Ok(()) => delivered += 1,
                Err(reason) => debug!(peer = %addr, reason, "in-process delivery failed"),
            }
        }
        Ok(delivered)
    }

    fn recv(&self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        match self.rx.recv_timeout(timeout) {
            Ok(packet) => Ok(Some(packet)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Closed),
        }
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.hub.peers.write().remove(&self.address);
        }
    }
}

impl Drop for InProcessEndpoint {
    fn drop(&mut self) {
        self.close();
    }
}

/// UDP unicast, broadcast or multicast.
///
/// * `Udp`: bind `hosts[0]`, send to every other host.
/// * `Broadcast`: bind `hosts[0]`, send to the broadcast addresses in `hosts[1..]`.
/// * `Multicast`: `hosts[0]` is the group; bind its port on all interfaces and join it.
pub struct UdpMedium {
    socket: UdpSocket,
    kind: TransportKind,
    peers: Vec<(String, SocketAddr)>,
    local: String,
    closed: AtomicBool,
}

fn resolve(host: &str) -> Result<SocketAddr, TransportError> {
    host.to_socket_addrs()?
        .next()
        .ok_or_else(|| TransportError::ConnectionFailed {
            message: format!("host '{host}' did not resolve"),
        })
}

impl UdpMedium {
    /// Bind according to `settings`. `poll` bounds each blocking receive.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the socket cannot be bound or configured.
    pub fn bind(settings: &TransportSettings, poll: Duration) -> Result<Self, TransportError> {
        let Some(first) = settings.hosts.first() else {
            return Err(TransportError::ConnectionFailed {
                message: "udp transport needs at least one host".to_string(),
            });
        };
        let first_addr = resolve(first)?;

        let (socket, peers) = match settings.kind {
            TransportKind::Multicast => {
                let SocketAddr::V4(group) = first_addr else {
                    return Err(TransportError::Unsupported {
                        kind: "ipv6 multicast".to_string(),
                    });
                };
                (join_group(group)?, vec![(first.clone(), first_addr)])
            }
            TransportKind::Udp | TransportKind::Broadcast => {
                let socket = UdpSocket::bind(first_addr)?;
                if settings.kind == TransportKind::Broadcast {
                    socket.set_broadcast(true)?;
                }
                let peers = settings.hosts[1..]
                    .iter()
                    .map(|h| resolve(h).map(|a| (h.clone(), a)))
                    .collect::<Result<Vec<_>, _>>()?;
                (socket, peers)
            }
            other => {
                return Err(TransportError::Unsupported {
                    kind: other.as_str().to_string(),
                })
            }
        };
        socket.set_read_timeout(Some(poll.max(Duration::from_millis(1))))?;
        let local = socket.local_addr()?.to_string();
        debug!(%local, kind = settings.kind.as_str(), peers = peers.len(), "udp medium bound");

        Ok(Self {
            socket,
            kind: settings.kind,
            peers,
            local,
            closed: AtomicBool::new(false),
        })
    }
}

/// Bind the group port with address reuse so every store on the host can join.
fn join_group(group: SocketAddrV4) -> Result<UdpSocket, TransportError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, group.port()).into())?;
    socket.join_multicast_v4(group.ip(), &Ipv4Addr::UNSPECIFIED)?;
    socket.set_multicast_loop_v4(true)?;
    Ok(socket.into())
}

impl Medium for UdpMedium {
    fn local_address(&self) -> String {
        self.local.clone()
    }

    fn send(&self, packet: &[u8], allow: &dyn Fn(&str) -> bool) -> Result<usize, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        if packet.len() > MAX_DATAGRAM {
            return Err(TransportError::SerializationFailed {
                message: format!("packet of {} bytes exceeds datagram limit", packet.len()),
            });
        }
        let mut delivered = 0;
        for (name, addr) in &self.peers {
            // Broadcast and multicast destinations are not individual peers.
            if self.kind == TransportKind::Udp && !(allow(name) && allow(&addr.to_string())) {
                trace!(peer = %name, "skipping untrusted peer");
                continue;
            }
            match self.socket.send_to(packet, addr) {
                Ok(_) => delivered += 1,
                Err(e) => debug!(peer = %name, error = %e, "udp send failed"),
            }
        }
        Ok(delivered)
    }

    fn recv(&self, _timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let mut buf = vec![0u8; MAX_DATAGRAM];
        match self.socket.recv_from(&mut buf) {
            Ok((n, _from)) => {
                buf.truncate(n);
                Ok(Some(buf))
            }
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
