//! Connection-oriented message transport over UDP.
//!
//! Each UDP datagram carries one bincode-encoded [`Datagram`]. On top of that
//! the transport provides a handshake, a reliable in-order channel (acked,
//! resent until acknowledged), a sequenced unreliable channel (late packets
//! are dropped), heartbeats and peer timeouts. Callers drive everything
//! through `service(timeout)`, which yields the next [`HostEvent`] or `None`
//! once the timeout elapses.

use crate::error::NetError;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;

pub const PROTOCOL_VERSION: u32 = 1;
pub const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const RECV_BUFFER_SIZE: usize = 65536;
const RESEND_INTERVAL: Duration = Duration::from_millis(100);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(250);
/// Upper bound on how long a receive waits before timers are re-checked
const MAINTENANCE_INTERVAL: Duration = Duration::from_millis(50);

/// Peer id the client host uses for its server
pub const SERVER_PEER: PeerId = PeerId(0);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Datagram {
    Connect { protocol_version: u32 },
    Accept,
    Refuse { reason: String },
    Reliable { seq: u32, payload: Vec<u8> },
    Ack { seq: u32 },
    Unreliable { seq: u32, payload: Vec<u8> },
    Heartbeat,
    Disconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Reliable,
    Unreliable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u32);

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The remote side said goodbye
    Requested,
    /// Nothing was heard from the remote side within the peer timeout
    Timeout,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Connect {
        peer: PeerId,
        addr: SocketAddr,
    },
    Receive {
        peer: PeerId,
        channel: Channel,
        payload: Vec<u8>,
    },
    Disconnect {
        peer: PeerId,
        reason: DisconnectReason,
    },
}

/// What an incoming datagram produced on an established link.
#[derive(Debug, Default)]
struct LinkOutcome {
    delivered: Vec<(Channel, Vec<u8>)>,
    reply: Option<Datagram>,
    closed: bool,
}

/// Sequencing and liveness state for one established connection.
#[derive(Debug)]
struct PeerLink {
    addr: SocketAddr,
    next_reliable_seq: u32,
    /// Sent but unacknowledged reliable payloads with their last send time
    unacked: BTreeMap<u32, (Vec<u8>, Instant)>,
    next_expected_reliable: u32,
    /// Reliable payloads that arrived ahead of a gap
    pending_reliable: BTreeMap<u32, Vec<u8>>,
    next_unreliable_seq: u32,
    newest_unreliable: Option<u32>,
    last_received: Instant,
    last_sent: Instant,
}

impl PeerLink {
    fn new(addr: SocketAddr, now: Instant) -> Self {
        Self {
            addr,
            next_reliable_seq: 0,
            unacked: BTreeMap::new(),
            next_expected_reliable: 0,
            pending_reliable: BTreeMap::new(),
            next_unreliable_seq: 0,
            newest_unreliable: None,
            last_received: now,
            last_sent: now,
        }
    }

    fn outgoing(&mut self, channel: Channel, payload: &[u8], now: Instant) -> Datagram {
        self.last_sent = now;
        match channel {
            Channel::Reliable => {
                let seq = self.next_reliable_seq;
                self.next_reliable_seq = self.next_reliable_seq.wrapping_add(1);
                self.unacked.insert(seq, (payload.to_vec(), now));
                Datagram::Reliable {
                    seq,
                    payload: payload.to_vec(),
                }
            }
            Channel::Unreliable => {
                let seq = self.next_unreliable_seq;
                self.next_unreliable_seq = self.next_unreliable_seq.wrapping_add(1);
                Datagram::Unreliable {
                    seq,
                    payload: payload.to_vec(),
                }
            }
        }
    }

    fn handle(&mut self, datagram: Datagram, now: Instant) -> LinkOutcome {
        self.last_received = now;
        let mut outcome = LinkOutcome::default();

        match datagram {
            Datagram::Reliable { seq, payload } => {
                outcome.reply = Some(Datagram::Ack { seq });
                if seq >= self.next_expected_reliable {
                    self.pending_reliable.entry(seq).or_insert(payload);
                }
                while let Some(payload) = self.pending_reliable.remove(&self.next_expected_reliable)
                {
                    outcome.delivered.push((Channel::Reliable, payload));
                    self.next_expected_reliable = self.next_expected_reliable.wrapping_add(1);
                }
            }
            Datagram::Ack { seq } => {
                self.unacked.remove(&seq);
            }
            Datagram::Unreliable { seq, payload } => {
                if self.newest_unreliable.map_or(true, |newest| seq > newest) {
                    self.newest_unreliable = Some(seq);
                    outcome.delivered.push((Channel::Unreliable, payload));
                } else {
                    debug!("Dropping late unreliable packet {} from {}", seq, self.addr);
                }
            }
            // A retried handshake whose accept was lost
            Datagram::Connect { .. } => outcome.reply = Some(Datagram::Accept),
            Datagram::Disconnect => outcome.closed = true,
            Datagram::Heartbeat | Datagram::Accept | Datagram::Refuse { .. } => {}
        }

        outcome
    }

    fn is_timed_out(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_received) > timeout
    }

    /// Resends for overdue reliable payloads, or a heartbeat when idle.
    fn due_datagrams(&mut self, now: Instant) -> Vec<Datagram> {
        let mut due = Vec::new();
        for (&seq, (payload, sent_at)) in self.unacked.iter_mut() {
            if now.saturating_duration_since(*sent_at) >= RESEND_INTERVAL {
                *sent_at = now;
                due.push(Datagram::Reliable {
                    seq,
                    payload: payload.clone(),
                });
            }
        }

        if due.is_empty() && now.saturating_duration_since(self.last_sent) >= HEARTBEAT_INTERVAL {
            due.push(Datagram::Heartbeat);
        }
        if !due.is_empty() {
            self.last_sent = now;
        }
        due
    }
}

fn send_datagram(socket: &UdpSocket, addr: SocketAddr, datagram: &Datagram) -> Result<(), NetError> {
    let bytes = bincode::serialize(datagram).map_err(crate::error::ProtocolError::from)?;
    match socket.try_send_to(&bytes, addr) {
        Ok(_) => Ok(()),
        // Socket buffer full; the datagram counts as lost
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
            debug!("Send buffer full, dropping datagram to {}", addr);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Sends protocol traffic for a single peer. A failure only affects that
/// peer, whose link times out if it persists.
fn send_or_warn(socket: &UdpSocket, addr: SocketAddr, datagram: &Datagram) {
    if let Err(e) = send_datagram(socket, addr, datagram) {
        warn!("Failed to send to {}: {}", addr, e);
    }
}

/// Waits up to `wait` for one datagram. Undecodable datagrams are discarded.
async fn recv_datagram(
    socket: &UdpSocket,
    buffer: &mut [u8],
    wait: Duration,
) -> Result<Option<(SocketAddr, Datagram)>, NetError> {
    match tokio::time::timeout(wait, socket.recv_from(buffer)).await {
        Err(_) => Ok(None),
        Ok(Ok((len, addr))) => match bincode::deserialize::<Datagram>(&buffer[..len]) {
            Ok(datagram) => Ok(Some((addr, datagram))),
            Err(e) => {
                warn!("Discarding undecodable datagram from {}: {}", addr, e);
                Ok(None)
            }
        },
        // ICMP port-unreachable for one peer surfaces as a reset or refusal
        // on some platforms
        Ok(Err(e))
            if matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionRefused
            ) =>
        {
            debug!("Ignoring connection reset from socket: {}", e);
            Ok(None)
        }
        Ok(Err(e)) => Err(e.into()),
    }
}

/// Listening side: accepts up to `max_peers` connections.
pub struct ServerHost {
    socket: UdpSocket,
    peers: HashMap<PeerId, PeerLink>,
    by_addr: HashMap<SocketAddr, PeerId>,
    next_peer: u32,
    max_peers: usize,
    peer_timeout: Duration,
    events: VecDeque<HostEvent>,
    buffer: Vec<u8>,
}

impl ServerHost {
    pub async fn bind(
        addr: SocketAddr,
        max_peers: usize,
        peer_timeout: Duration,
    ) -> Result<Self, NetError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| NetError::TransportInit {
                addr: addr.to_string(),
                source,
            })?;

        Ok(Self {
            socket,
            peers: HashMap::new(),
            by_addr: HashMap::new(),
            next_peer: 1,
            max_peers,
            peer_timeout,
            events: VecDeque::new(),
            buffer: vec![0u8; RECV_BUFFER_SIZE],
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn peer_addr(&self, peer: PeerId) -> Option<SocketAddr> {
        self.peers.get(&peer).map(|link| link.addr)
    }

    /// Returns the next event, or `None` if nothing happened within `timeout`.
    ///
    /// Errors are reserved for the socket itself; failing to reach a single
    /// peer is logged.
    pub async fn service(&mut self, timeout: Duration) -> Result<Option<HostEvent>, NetError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.maintain(Instant::now());
            if let Some(event) = self.events.pop_front() {
                return Ok(Some(event));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            let wait = (deadline - now).min(MAINTENANCE_INTERVAL);
            if let Some((addr, datagram)) =
                recv_datagram(&self.socket, &mut self.buffer, wait).await?
            {
                self.handle_datagram(addr, datagram);
            }
        }
    }

    pub fn send(&mut self, peer: PeerId, channel: Channel, payload: &[u8]) -> Result<(), NetError> {
        let link = self.peers.get_mut(&peer).ok_or(NetError::NotConnected)?;
        let datagram = link.outgoing(channel, payload, Instant::now());
        send_datagram(&self.socket, link.addr, &datagram)
    }

    /// Sends to every connected peer; per-peer failures are logged.
    pub fn broadcast(&mut self, channel: Channel, payload: &[u8]) {
        let now = Instant::now();
        for (peer, link) in self.peers.iter_mut() {
            let datagram = link.outgoing(channel, payload, now);
            if let Err(e) = send_datagram(&self.socket, link.addr, &datagram) {
                warn!("Failed to send to {}: {}", peer, e);
            }
        }
    }

    pub fn disconnect(&mut self, peer: PeerId) {
        if let Some(link) = self.peers.remove(&peer) {
            self.by_addr.remove(&link.addr);
            if let Err(e) = send_datagram(&self.socket, link.addr, &Datagram::Disconnect) {
                debug!("Failed to notify {} of disconnect: {}", peer, e);
            }
        }
    }

    pub fn disconnect_all(&mut self) {
        let peers: Vec<PeerId> = self.peers.keys().copied().collect();
        for peer in peers {
            self.disconnect(peer);
        }
    }

    fn handle_datagram(&mut self, addr: SocketAddr, datagram: Datagram) {
        if let Some(&peer) = self.by_addr.get(&addr) {
            let Some(link) = self.peers.get_mut(&peer) else {
                return;
            };
            let outcome = link.handle(datagram, Instant::now());
            if let Some(reply) = outcome.reply {
                send_or_warn(&self.socket, addr, &reply);
            }
            for (channel, payload) in outcome.delivered {
                self.events.push_back(HostEvent::Receive {
                    peer,
                    channel,
                    payload,
                });
            }
            if outcome.closed {
                self.peers.remove(&peer);
                self.by_addr.remove(&addr);
                self.events.push_back(HostEvent::Disconnect {
                    peer,
                    reason: DisconnectReason::Requested,
                });
            }
            return;
        }

        match datagram {
            Datagram::Connect { protocol_version } if protocol_version != PROTOCOL_VERSION => {
                warn!(
                    "Refusing {}: protocol version {} (expected {})",
                    addr, protocol_version, PROTOCOL_VERSION
                );
                let reason = format!("Protocol version mismatch, server speaks {}", PROTOCOL_VERSION);
                send_or_warn(&self.socket, addr, &Datagram::Refuse { reason });
            }
            Datagram::Connect { .. } if self.peers.len() >= self.max_peers => {
                warn!("Refusing {}: server full", addr);
                let reason = "Server full".to_string();
                send_or_warn(&self.socket, addr, &Datagram::Refuse { reason });
            }
            Datagram::Connect { .. } => {
                let peer = PeerId(self.next_peer);
                self.next_peer = self.next_peer.wrapping_add(1);
                self.peers.insert(peer, PeerLink::new(addr, Instant::now()));
                self.by_addr.insert(addr, peer);
                self.events.push_back(HostEvent::Connect { peer, addr });
                send_or_warn(&self.socket, addr, &Datagram::Accept);
            }
            other => {
                debug!("Ignoring {:?} from unknown address {}", other, addr);
            }
        }
    }

    fn maintain(&mut self, now: Instant) {
        let timeout = self.peer_timeout;
        let timed_out: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|(_, link)| link.is_timed_out(now, timeout))
            .map(|(&peer, _)| peer)
            .collect();

        for peer in timed_out {
            if let Some(link) = self.peers.remove(&peer) {
                self.by_addr.remove(&link.addr);
                info!("{} at {} timed out", peer, link.addr);
                self.events.push_back(HostEvent::Disconnect {
                    peer,
                    reason: DisconnectReason::Timeout,
                });
            }
        }

        for link in self.peers.values_mut() {
            for datagram in link.due_datagrams(now) {
                send_or_warn(&self.socket, link.addr, &datagram);
            }
        }
    }
}

/// Connecting side: one connection to one server.
pub struct ClientHost {
    socket: UdpSocket,
    link: PeerLink,
    peer_timeout: Duration,
    connected: bool,
    events: VecDeque<HostEvent>,
    buffer: Vec<u8>,
}

impl ClientHost {
    /// Performs the handshake, retrying until `connect_timeout` elapses.
    pub async fn connect(
        server_addr: SocketAddr,
        connect_timeout: Duration,
        peer_timeout: Duration,
    ) -> Result<Self, NetError> {
        let bind_addr: SocketAddr = if server_addr.is_ipv4() {
            SocketAddr::from(([0u8; 4], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|source| NetError::TransportInit {
                addr: bind_addr.to_string(),
                source,
            })?;

        let mut buffer = vec![0u8; RECV_BUFFER_SIZE];
        let hello = Datagram::Connect {
            protocol_version: PROTOCOL_VERSION,
        };
        let deadline = Instant::now() + connect_timeout;

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(NetError::ConnectTimeout {
                    addr: server_addr,
                    timeout: connect_timeout,
                });
            }

            debug!("Sending connect request to {}", server_addr);
            send_datagram(&socket, server_addr, &hello)?;

            let retry_at = (now + CONNECT_RETRY_INTERVAL).min(deadline);
            while let Some(wait) = retry_at.checked_duration_since(Instant::now()) {
                if wait.is_zero() {
                    break;
                }
                match recv_datagram(&socket, &mut buffer, wait).await? {
                    Some((addr, Datagram::Accept)) if addr == server_addr => {
                        info!("Connected to {}", server_addr);
                        let now = Instant::now();
                        let mut events = VecDeque::new();
                        events.push_back(HostEvent::Connect {
                            peer: SERVER_PEER,
                            addr: server_addr,
                        });
                        return Ok(Self {
                            socket,
                            link: PeerLink::new(server_addr, now),
                            peer_timeout,
                            connected: true,
                            events,
                            buffer,
                        });
                    }
                    Some((addr, Datagram::Refuse { reason })) if addr == server_addr => {
                        return Err(NetError::Refused(reason));
                    }
                    Some((addr, other)) => {
                        debug!("Ignoring {:?} from {} during handshake", other, addr);
                    }
                    None => {}
                }
            }
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.link.addr
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Returns the next event, or `None` if nothing happened within `timeout`.
    ///
    /// Fails with [`NetError::NotConnected`] once the disconnect event has
    /// been consumed.
    pub async fn service(&mut self, timeout: Duration) -> Result<Option<HostEvent>, NetError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.maintain(Instant::now());
            if let Some(event) = self.events.pop_front() {
                return Ok(Some(event));
            }
            if !self.connected {
                return Err(NetError::NotConnected);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            let wait = (deadline - now).min(MAINTENANCE_INTERVAL);
            if let Some((addr, datagram)) =
                recv_datagram(&self.socket, &mut self.buffer, wait).await?
            {
                if addr != self.link.addr {
                    debug!("Ignoring datagram from unexpected address {}", addr);
                    continue;
                }
                self.handle_datagram(datagram);
            }
        }
    }

    pub fn send(&mut self, channel: Channel, payload: &[u8]) -> Result<(), NetError> {
        if !self.connected {
            return Err(NetError::NotConnected);
        }
        let datagram = self.link.outgoing(channel, payload, Instant::now());
        send_datagram(&self.socket, self.link.addr, &datagram)
    }

    pub fn disconnect(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        if let Err(e) = send_datagram(&self.socket, self.link.addr, &Datagram::Disconnect) {
            debug!("Failed to notify server of disconnect: {}", e);
        }
    }

    fn handle_datagram(&mut self, datagram: Datagram) {
        if !self.connected {
            return;
        }
        let outcome = self.link.handle(datagram, Instant::now());
        if let Some(reply) = outcome.reply {
            send_or_warn(&self.socket, self.link.addr, &reply);
        }
        for (channel, payload) in outcome.delivered {
            self.events.push_back(HostEvent::Receive {
                peer: SERVER_PEER,
                channel,
                payload,
            });
        }
        if outcome.closed {
            info!("Server {} closed the connection", self.link.addr);
            self.connected = false;
            self.events.push_back(HostEvent::Disconnect {
                peer: SERVER_PEER,
                reason: DisconnectReason::Requested,
            });
        }
    }

    fn maintain(&mut self, now: Instant) {
        if !self.connected {
            return;
        }
        if self.link.is_timed_out(now, self.peer_timeout) {
            info!("Server {} timed out", self.link.addr);
            self.connected = false;
            self.events.push_back(HostEvent::Disconnect {
                peer: SERVER_PEER,
                reason: DisconnectReason::Timeout,
            });
            return;
        }
        for datagram in self.link.due_datagrams(now) {
            send_or_warn(&self.socket, self.link.addr, &datagram);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link() -> (PeerLink, Instant) {
        let now = Instant::now();
        (PeerLink::new("127.0.0.1:9000".parse().unwrap(), now), now)
    }

    fn reliable(seq: u32, byte: u8) -> Datagram {
        Datagram::Reliable {
            seq,
            payload: vec![byte],
        }
    }

    fn payloads(outcome: &LinkOutcome) -> Vec<u8> {
        outcome.delivered.iter().map(|(_, p)| p[0]).collect()
    }

    #[test]
    fn test_reliable_delivered_in_order_after_gap() {
        let (mut link, now) = link();

        let outcome = link.handle(reliable(1, 11), now);
        assert!(outcome.delivered.is_empty());
        assert_eq!(outcome.reply, Some(Datagram::Ack { seq: 1 }));

        let outcome = link.handle(reliable(0, 10), now);
        assert_eq!(payloads(&outcome), vec![10, 11]);
        assert_eq!(outcome.reply, Some(Datagram::Ack { seq: 0 }));
    }

    #[test]
    fn test_duplicate_reliable_is_reacked_not_redelivered() {
        let (mut link, now) = link();
        link.handle(reliable(0, 10), now);

        let outcome = link.handle(reliable(0, 10), now);
        assert!(outcome.delivered.is_empty());
        assert_eq!(outcome.reply, Some(Datagram::Ack { seq: 0 }));
    }

    #[test]
    fn test_late_unreliable_dropped() {
        let (mut link, now) = link();
        let unreliable = |seq: u32| Datagram::Unreliable {
            seq,
            payload: vec![seq as u8],
        };

        assert_eq!(payloads(&link.handle(unreliable(0), now)), vec![0]);
        assert_eq!(payloads(&link.handle(unreliable(2), now)), vec![2]);
        assert!(link.handle(unreliable(1), now).delivered.is_empty());
        assert!(link.handle(unreliable(2), now).delivered.is_empty());
        assert_eq!(payloads(&link.handle(unreliable(3), now)), vec![3]);
    }

    #[test]
    fn test_ack_stops_resend() {
        let (mut link, now) = link();
        let sent = link.outgoing(Channel::Reliable, &[7], now);
        assert_eq!(sent, reliable(0, 7));

        let later = now + RESEND_INTERVAL;
        assert!(link.due_datagrams(now).is_empty());
        assert_eq!(link.due_datagrams(later), vec![reliable(0, 7)]);

        link.handle(Datagram::Ack { seq: 0 }, later);
        assert!(link.due_datagrams(later + RESEND_INTERVAL).is_empty());
    }

    #[test]
    fn test_heartbeat_only_when_idle() {
        let (mut link, now) = link();
        assert!(link.due_datagrams(now + Duration::from_millis(500)).is_empty());
        assert_eq!(
            link.due_datagrams(now + HEARTBEAT_INTERVAL),
            vec![Datagram::Heartbeat]
        );
    }

    #[test]
    fn test_timeout_resets_on_receive() {
        let (mut link, now) = link();
        let timeout = Duration::from_secs(5);

        assert!(!link.is_timed_out(now + Duration::from_secs(4), timeout));
        assert!(link.is_timed_out(now + Duration::from_secs(6), timeout));

        link.handle(Datagram::Heartbeat, now + Duration::from_secs(4));
        assert!(!link.is_timed_out(now + Duration::from_secs(6), timeout));
    }

    #[test]
    fn test_disconnect_closes_link() {
        let (mut link, now) = link();
        assert!(link.handle(Datagram::Disconnect, now).closed);
        assert!(!link.handle(Datagram::Heartbeat, now).closed);
    }

    #[test]
    fn test_sequence_numbers_are_per_channel() {
        let (mut link, now) = link();
        link.outgoing(Channel::Reliable, &[0], now);
        let unreliable = link.outgoing(Channel::Unreliable, &[0], now);
        let reliable = link.outgoing(Channel::Reliable, &[0], now);

        assert!(matches!(unreliable, Datagram::Unreliable { seq: 0, .. }));
        assert!(matches!(reliable, Datagram::Reliable { seq: 1, .. }));
    }

    #[tokio::test]
    async fn test_unreachable_peer_does_not_fail_service() {
        let mut host = ServerHost::bind("127.0.0.1:0".parse().unwrap(), 4, DEFAULT_PEER_TIMEOUT)
            .await
            .unwrap();

        // Every send from an IPv4 socket to an IPv6 address fails
        let unreachable: SocketAddr = "[::1]:9000".parse().unwrap();
        let idle_since = Instant::now().checked_sub(HEARTBEAT_INTERVAL * 2).unwrap();
        let peer = PeerId(99);
        host.peers.insert(peer, PeerLink::new(unreachable, idle_since));
        host.by_addr.insert(unreachable, peer);

        assert!(host.send(peer, Channel::Reliable, &[1]).is_err());

        // Heartbeat and resend both fail during maintenance
        let event = host.service(RESEND_INTERVAL * 2).await.unwrap();
        assert!(event.is_none());

        // The ack cannot be sent, the payload is delivered anyway
        host.handle_datagram(unreachable, reliable(0, 5));
        let event = host.service(Duration::from_millis(10)).await.unwrap();
        assert_eq!(
            event,
            Some(HostEvent::Receive {
                peer,
                channel: Channel::Reliable,
                payload: vec![5],
            })
        );
        assert_eq!(host.peer_count(), 1);

        // Other peers can still connect
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let hello = bincode::serialize(&Datagram::Connect {
            protocol_version: PROTOCOL_VERSION,
        })
        .unwrap();
        socket.send_to(&hello, host.local_addr().unwrap()).await.unwrap();

        let event = host.service(Duration::from_secs(2)).await.unwrap();
        let client_addr = socket.local_addr().unwrap();
        assert!(matches!(event, Some(HostEvent::Connect { addr, .. }) if addr == client_addr));
        assert_eq!(host.peer_count(), 2);
    }
}
