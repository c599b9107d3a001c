//! Server network layer and authoritative tick loop
//!
//! Two tasks cooperate:
//! - the network task services the transport, owns the client registry,
//!   enqueues decoded input samples and broadcasts world snapshots;
//! - the authoritative task owns the [`Simulation`], drains the input queue
//!   once per tick and hands the encoded snapshot back for broadcast.

use crate::client_manager::ClientRegistry;
use crate::game::{IntegrationStep, Simulation, WorldCommand};
use crate::input_queue::{input_queue, InputQueue, InputReceiver};
use log::{debug, error, info, warn};
use shared::protocol::{decode_input_sample, encode_connect_ack, encode_world_snapshot};
use shared::transport::DEFAULT_PEER_TIMEOUT;
use shared::{
    Channel, FlatWorld, HostEvent, NetError, Pacer, PhysicsEngine, ServerHost, ShutdownSignal,
    DEFAULT_PORT, DEFAULT_TICK_RATE,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Authoritative ticks per second
    pub tick_rate: u32,
    pub max_clients: usize,
    pub peer_timeout: Duration,
    pub integration: IntegrationStep,
    /// Longest a single transport service call may wait
    pub service_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            tick_rate: DEFAULT_TICK_RATE,
            max_clients: 32,
            peer_timeout: DEFAULT_PEER_TIMEOUT,
            integration: IntegrationStep::ServerTick,
            service_timeout: Duration::from_millis(100),
        }
    }
}

/// Bound server, ready to run
pub struct Server {
    host: ServerHost,
    registry: ClientRegistry,
    config: ServerConfig,
}

impl Server {
    /// Binds the transport host. Failure here is fatal for startup.
    pub async fn bind(config: ServerConfig) -> Result<Self, NetError> {
        let host = ServerHost::bind(config.bind_addr, config.max_clients, config.peer_timeout).await?;
        info!(
            "Server listening on {} ({} Hz, up to {} clients, {:?} integration)",
            host.local_addr()?,
            config.tick_rate,
            config.max_clients,
            config.integration
        );

        Ok(Self {
            host,
            registry: ClientRegistry::new(),
            config,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetError> {
        self.host.local_addr()
    }

    /// Runs until `shutdown` fires, then disconnects every client and joins
    /// the authoritative task.
    pub async fn run(mut self, mut shutdown: ShutdownSignal) -> Result<(), NetError> {
        let (inputs, input_rx) = input_queue();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, mut snapshot_rx) = mpsc::unbounded_channel();

        let simulation = Simulation::new(FlatWorld::new(), self.config.integration);
        let tick_task = tokio::spawn(run_authoritative_loop(
            simulation,
            self.config.tick_rate,
            command_rx,
            input_rx,
            snapshot_tx,
            shutdown.clone(),
        ));

        let service_timeout = self.config.service_timeout;
        let result = loop {
            tokio::select! {
                _ = shutdown.triggered() => {
                    info!("Server shutting down");
                    break Ok(());
                }
                Some(payload) = snapshot_rx.recv() => {
                    if !self.registry.is_empty() {
                        self.host.broadcast(Channel::Unreliable, &payload);
                    }
                }
                event = self.host.service(service_timeout) => match event {
                    Ok(Some(event)) => self.handle_event(event, &inputs, &command_tx),
                    Ok(None) => {}
                    Err(e) => {
                        error!("Transport failure: {}", e);
                        break Err(e);
                    }
                },
            }
        };

        self.host.disconnect_all();
        drop(command_tx);
        drop(inputs);
        drop(snapshot_rx);
        if let Err(e) = tick_task.await {
            error!("Authoritative loop panicked: {}", e);
        }
        info!("Server stopped");
        result
    }

    fn handle_event(
        &mut self,
        event: HostEvent,
        inputs: &InputQueue,
        commands: &mpsc::UnboundedSender<WorldCommand>,
    ) {
        match event {
            HostEvent::Connect { peer, addr } => {
                let client_id = self.registry.register(peer, addr);
                let ack = match encode_connect_ack(client_id) {
                    Ok(ack) => ack,
                    Err(e) => {
                        error!("Failed to encode connect ack: {}", e);
                        return;
                    }
                };
                if let Err(e) = self.host.send(peer, Channel::Reliable, &ack) {
                    warn!("Failed to send connect ack to client {}: {}", client_id, e);
                }
                if commands.send(WorldCommand::Join { client_id }).is_err() {
                    error!("Authoritative loop is gone, cannot create avatar");
                }
                info!(
                    "Client {} connected from {} ({} connected)",
                    client_id,
                    addr,
                    self.registry.len()
                );
            }

            HostEvent::Receive { peer, payload, .. } => {
                let Some(client_id) = self.registry.client_for_peer(peer) else {
                    warn!("Packet from unregistered {}", peer);
                    return;
                };

                match decode_input_sample(&payload) {
                    Ok(mut sample) => {
                        if sample.client_id != client_id {
                            warn!(
                                "Client {} sent input stamped with id {}",
                                client_id, sample.client_id
                            );
                        }
                        sample.client_id = client_id;
                        self.registry.record_input(client_id);
                        if !inputs.push(sample) {
                            error!("Authoritative loop is gone, dropping input");
                        }
                    }
                    Err(e) => {
                        self.registry.record_malformed(client_id);
                        let discarded = self
                            .registry
                            .get(client_id)
                            .map_or(0, |entry| entry.malformed_packets);
                        warn!(
                            "Discarding malformed packet from client {} ({} so far): {}",
                            client_id, discarded, e
                        );
                    }
                }
            }

            HostEvent::Disconnect { peer, reason } => {
                let Some(entry) = self.registry.remove_by_peer(peer) else {
                    return;
                };
                info!(
                    "Client {} disconnected ({:?}) after {:.1}s, {} inputs, {} malformed",
                    entry.id,
                    reason,
                    entry.connected_at.elapsed().as_secs_f64(),
                    entry.inputs_received,
                    entry.malformed_packets
                );
                if commands.send(WorldCommand::Leave { client_id: entry.id }).is_err() {
                    error!("Authoritative loop is gone, cannot remove avatar");
                }
            }
        }
    }
}

/// Fixed-rate authoritative tick: commands, then inputs, then broadcast.
pub async fn run_authoritative_loop<E: PhysicsEngine>(
    mut simulation: Simulation<E>,
    tick_rate: u32,
    mut commands: mpsc::UnboundedReceiver<WorldCommand>,
    mut inputs: InputReceiver,
    snapshots: mpsc::UnboundedSender<Vec<u8>>,
    mut shutdown: ShutdownSignal,
) {
    let mut pacer = Pacer::new(tick_rate);

    loop {
        let dt = tokio::select! {
            _ = shutdown.triggered() => break,
            dt = pacer.tick() => dt,
        };

        while let Ok(command) = commands.try_recv() {
            simulation.apply_command(command);
        }

        let samples = inputs.drain();
        let report = simulation.tick(&samples, dt);

        if simulation.tick_count() % 60 == 0 && simulation.avatar_count() > 0 {
            debug!(
                "Tick {}: {} avatars, {:.1} Hz, {} applied, {} stale, {} invalid, {} coasted",
                simulation.tick_count(),
                simulation.avatar_count(),
                1.0 / dt,
                report.applied,
                report.stale,
                report.invalid,
                report.coasted
            );
        }

        match encode_world_snapshot(&simulation.snapshots()) {
            Ok(payload) => {
                if snapshots.send(payload).is_err() {
                    debug!("Snapshot receiver closed, stopping authoritative loop");
                    break;
                }
            }
            Err(e) => error!("Failed to encode world snapshot: {}", e),
        }
    }

    info!(
        "Authoritative loop stopped after {} ticks",
        simulation.tick_count()
    );
}
