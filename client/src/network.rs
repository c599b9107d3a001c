use crate::game::{ReconcileOutcome, SharedWorld};
use log::{debug, error, info, warn};
use shared::protocol::{decode_connect_ack, decode_world_snapshot, encode_input_sample};
use shared::transport::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_PEER_TIMEOUT};
use shared::{
    Channel, ClientHost, HostEvent, InputSample, NetError, PhysicsEngine, ShutdownSignal,
    DEFAULT_RETENTION,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: SocketAddr,
    pub tick_rate: u32,
    pub connect_timeout: Duration,
    pub peer_timeout: Duration,
    /// How long predicted samples stay available for replay
    pub history_retention: Duration,
    pub service_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], shared::DEFAULT_PORT)),
            tick_rate: shared::DEFAULT_TICK_RATE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            peer_timeout: DEFAULT_PEER_TIMEOUT,
            history_retention: DEFAULT_RETENTION,
            service_timeout: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// Transport is up but no identifier has been issued yet
    Connected,
    Active { client_id: u64 },
}

impl ConnectionState {
    /// Derives the state from outside the network task: the world holds the
    /// issued identifier and the task ends with the connection.
    pub fn observe(local_id: Option<u64>, network_finished: bool) -> Self {
        match (network_finished, local_id) {
            (true, _) => ConnectionState::Disconnected,
            (false, Some(client_id)) => ConnectionState::Active { client_id },
            (false, None) => ConnectionState::Connected,
        }
    }

    pub fn label(&self) -> String {
        match self {
            ConnectionState::Disconnected => "disconnected".to_string(),
            ConnectionState::Connected => "connecting".to_string(),
            ConnectionState::Active { client_id } => format!("client {}", client_id),
        }
    }
}

/// Network side of the client: uploads predicted samples and feeds server
/// snapshots into the shared world.
pub struct Client<E: PhysicsEngine> {
    host: ClientHost,
    state: ConnectionState,
    world: SharedWorld<E>,
    uploaded: u64,
    snapshots: u64,
}

impl<E: PhysicsEngine> Client<E> {
    pub async fn connect(config: &ClientConfig, world: SharedWorld<E>) -> Result<Self, NetError> {
        info!("Connecting to server {}...", config.server_addr);
        let host =
            ClientHost::connect(config.server_addr, config.connect_timeout, config.peer_timeout)
                .await?;

        Ok(Client {
            host,
            state: ConnectionState::Connected,
            world,
            uploaded: 0,
            snapshots: 0,
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetError> {
        self.host.local_addr()
    }

    /// Runs until shutdown or until the server goes away. Predicted samples
    /// arrive on `outbound`.
    pub async fn run(
        mut self,
        mut outbound: mpsc::UnboundedReceiver<InputSample>,
        mut shutdown: ShutdownSignal,
        service_timeout: Duration,
    ) -> Result<(), NetError> {
        let result = loop {
            tokio::select! {
                _ = shutdown.triggered() => {
                    info!("Client shutting down");
                    break Ok(());
                }
                Some(sample) = outbound.recv() => self.send_input(&sample),
                event = self.host.service(service_timeout) => match event {
                    Ok(Some(HostEvent::Disconnect { reason, .. })) => {
                        warn!("Disconnected from server ({:?})", reason);
                        break Ok(());
                    }
                    Ok(Some(event)) => self.handle_event(event).await,
                    Ok(None) => {}
                    Err(NetError::NotConnected) => break Ok(()),
                    Err(e) => {
                        error!("Transport failure: {}", e);
                        break Err(e);
                    }
                },
            }
        };

        self.host.disconnect();
        self.state = ConnectionState::Disconnected;
        self.world.lock().await.deactivate();
        info!(
            "Network loop stopped: {} inputs uploaded, {} snapshots applied",
            self.uploaded, self.snapshots
        );
        result
    }

    async fn handle_event(&mut self, event: HostEvent) {
        let HostEvent::Receive {
            channel, payload, ..
        } = event
        else {
            return;
        };

        match channel {
            Channel::Reliable => match decode_connect_ack(&payload) {
                Ok(client_id) => {
                    self.world.lock().await.activate(client_id);
                    self.state = ConnectionState::Active { client_id };
                    info!("Assigned client id {}", client_id);
                }
                Err(e) => warn!("Discarding malformed reliable message: {}", e),
            },
            Channel::Unreliable => match decode_world_snapshot(&payload) {
                Ok(snapshots) => {
                    let outcome = self.world.lock().await.apply_world_snapshot(&snapshots);
                    self.snapshots += 1;
                    if let Some(ReconcileOutcome::Teleported) = outcome {
                        debug!("Snapshot did not match pending history, snapped to server");
                    }
                }
                Err(e) => warn!("Discarding malformed snapshot: {}", e),
            },
        }
    }

    fn send_input(&mut self, sample: &InputSample) {
        if !matches!(self.state, ConnectionState::Active { .. }) {
            return;
        }
        let payload = match encode_input_sample(sample) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode input: {}", e);
                return;
            }
        };
        match self.host.send(Channel::Unreliable, &payload) {
            Ok(()) => self.uploaded += 1,
            Err(e) => debug!("Failed to upload input: {}", e),
        }
    }
}
