//! Client registry for the authoritative server
//!
//! Tracks which transport peer belongs to which client identifier, along with
//! per-client bookkeeping used for logging and diagnostics. Identifiers are
//! issued by an atomic counter so they are unique and strictly increasing
//! for the lifetime of the process, regardless of connects and disconnects.

use log::info;
use shared::PeerId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Issues monotonically increasing 64-bit client identifiers
///
/// Zero is never issued, so it can never collide with a default value.
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// A connected client and its bookkeeping
#[derive(Debug, Clone)]
pub struct ClientEntry {
    /// Identifier issued at connect time
    pub id: u64,
    /// Transport connection handle
    pub peer: PeerId,
    /// Remote address, for logging
    pub addr: SocketAddr,
    pub connected_at: Instant,
    /// Input samples accepted from this client
    pub inputs_received: u64,
    /// Packets from this client discarded for not matching a record layout
    pub malformed_packets: u64,
}

/// Maps transport peers to client identifiers
///
/// Owned by the network task; the authoritative tick never reads it, it only
/// receives join/leave commands derived from registry changes.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    ids: IdGenerator,
    clients: HashMap<u64, ClientEntry>,
    by_peer: HashMap<PeerId, u64>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a newly connected peer and returns its fresh identifier
    pub fn register(&mut self, peer: PeerId, addr: SocketAddr) -> u64 {
        let id = self.ids.next_id();
        self.clients.insert(
            id,
            ClientEntry {
                id,
                peer,
                addr,
                connected_at: Instant::now(),
                inputs_received: 0,
                malformed_packets: 0,
            },
        );
        self.by_peer.insert(peer, id);
        info!("Client {} registered for {} at {}", id, peer, addr);
        id
    }

    /// Removes the client bound to `peer`, if any
    pub fn remove_by_peer(&mut self, peer: PeerId) -> Option<ClientEntry> {
        let id = self.by_peer.remove(&peer)?;
        self.clients.remove(&id)
    }

    pub fn client_for_peer(&self, peer: PeerId) -> Option<u64> {
        self.by_peer.get(&peer).copied()
    }

    pub fn record_input(&mut self, id: u64) {
        if let Some(entry) = self.clients.get_mut(&id) {
            entry.inputs_received += 1;
        }
    }

    pub fn record_malformed(&mut self, id: u64) {
        if let Some(entry) = self.clients.get_mut(&id) {
            entry.malformed_packets += 1;
        }
    }

    pub fn get(&self, id: u64) -> Option<&ClientEntry> {
        self.clients.get(&id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
