//! Authoritative simulation owned by the server tick task.

use log::{debug, info};
use shared::movement::{apply_movement, coast};
use shared::{
    AvatarHandle, FlatWorld, InputSample, LookState, PhysicsEngine, Snapshot, Vec3,
    NO_INPUT_WATERMARK,
};
use std::collections::{BTreeMap, HashSet};

/// Avatar lifecycle changes forwarded by the network task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorldCommand {
    Join { client_id: u64 },
    Leave { client_id: u64 },
}

/// Which delta-time integrates an applied sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntegrationStep {
    /// Time elapsed since the previous server tick
    #[default]
    ServerTick,
    /// The delta-time the client recorded in the sample
    SampleDelta,
}

/// Server-side state of one connected client's avatar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AvatarState {
    pub handle: AvatarHandle,
    pub look: LookState,
    /// Timestamp of the newest sample applied to this avatar
    pub watermark: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub applied: usize,
    /// Samples at or below their avatar's watermark
    pub stale: usize,
    /// Samples for clients without an avatar
    pub unknown: usize,
    /// Samples carrying a NaN or infinite look or dt field
    pub invalid: usize,
    /// Avatars advanced without input
    pub coasted: usize,
}

pub struct Simulation<E: PhysicsEngine = FlatWorld> {
    engine: E,
    avatars: BTreeMap<u64, AvatarState>,
    integration: IntegrationStep,
    tick: u64,
}

impl<E: PhysicsEngine> Simulation<E> {
    pub fn new(engine: E, integration: IntegrationStep) -> Self {
        Self {
            engine,
            avatars: BTreeMap::new(),
            integration,
            tick: 0,
        }
    }

    /// Creates an avatar for a client. Returns false if it already has one.
    pub fn join(&mut self, client_id: u64) -> bool {
        if self.avatars.contains_key(&client_id) {
            return false;
        }
        let handle = self.engine.create_avatar(client_id);
        self.avatars.insert(
            client_id,
            AvatarState {
                handle,
                look: LookState::default(),
                watermark: NO_INPUT_WATERMARK,
            },
        );
        info!("Avatar created for client {}", client_id);
        true
    }

    pub fn leave(&mut self, client_id: u64) -> bool {
        match self.avatars.remove(&client_id) {
            Some(avatar) => {
                self.engine.delete_avatar(avatar.handle);
                info!("Avatar removed for client {}", client_id);
                true
            }
            None => false,
        }
    }

    pub fn apply_command(&mut self, command: WorldCommand) {
        match command {
            WorldCommand::Join { client_id } => {
                self.join(client_id);
            }
            WorldCommand::Leave { client_id } => {
                self.leave(client_id);
            }
        }
    }

    /// Runs one authoritative tick over the drained input queue.
    ///
    /// Samples are applied in the given order. A sample at or below its
    /// avatar's watermark is dropped, so the watermark never moves backwards.
    /// Avatars with no applied sample this tick coast for `dt`.
    pub fn tick(&mut self, samples: &[InputSample], dt: f64) -> TickReport {
        self.tick += 1;
        let mut report = TickReport::default();
        let mut moved = HashSet::new();

        for sample in samples {
            let Some(avatar) = self.avatars.get_mut(&sample.client_id) else {
                debug!("Dropping input for unknown client {}", sample.client_id);
                report.unknown += 1;
                continue;
            };

            if let Some(field) = sample.non_finite_field() {
                debug!(
                    "Dropping input {} for client {} with non-finite {}",
                    sample.timestamp_ns, sample.client_id, field
                );
                report.invalid += 1;
                continue;
            }

            if sample.timestamp_ns <= avatar.watermark {
                debug!(
                    "Dropping stale input {} for client {} (watermark {})",
                    sample.timestamp_ns, sample.client_id, avatar.watermark
                );
                report.stale += 1;
                continue;
            }

            let step = match self.integration {
                IntegrationStep::ServerTick => dt,
                IntegrationStep::SampleDelta => sample.dt,
            };
            apply_movement(&mut self.engine, avatar.handle, &mut avatar.look, sample, step);
            self.engine.step_avatar(avatar.handle, step as f32);
            avatar.watermark = sample.timestamp_ns;

            moved.insert(sample.client_id);
            report.applied += 1;
        }

        for (client_id, avatar) in &self.avatars {
            if moved.contains(client_id) {
                continue;
            }
            coast(&mut self.engine, avatar.handle, dt);
            self.engine.step_avatar(avatar.handle, dt as f32);
            report.coasted += 1;
        }

        report
    }

    /// One record per avatar, ordered by client id.
    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.avatars
            .iter()
            .map(|(&client_id, avatar)| Snapshot {
                client_id,
                watermark: avatar.watermark,
                position: self.engine.position(avatar.handle).unwrap_or_default(),
                velocity: self.engine.velocity(avatar.handle).unwrap_or_default(),
                yaw: avatar.look.yaw,
                pitch: avatar.look.pitch,
            })
            .collect()
    }

    pub fn avatar(&self, client_id: u64) -> Option<&AvatarState> {
        self.avatars.get(&client_id)
    }

    pub fn position(&self, client_id: u64) -> Option<Vec3> {
        let avatar = self.avatars.get(&client_id)?;
        self.engine.position(avatar.handle)
    }

    pub fn avatar_count(&self) -> usize {
        self.avatars.len()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }
}

impl Default for Simulation<FlatWorld> {
    fn default() -> Self {
        Self::new(FlatWorld::new(), IntegrationStep::default())
    }
}
