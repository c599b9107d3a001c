//! Client world: local prediction and rollback-replay reconciliation.
//!
//! The world is shared between the prediction loop, the network loop and the
//! renderer behind one [`tokio::sync::Mutex`] ([`SharedWorld`]). Prediction
//! holds the lock for a single tick; reconciliation holds it for the whole
//! rewind-and-replay so the two can never interleave.

use log::debug;
use shared::movement::apply_movement;
use shared::{
    AvatarHandle, Clock, FlatWorld, InputHistory, InputSample, LookState, PhysicsEngine, Snapshot,
    Vec3, NO_INPUT_WATERMARK,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub type SharedWorld<E = FlatWorld> = Arc<Mutex<ClientWorld<E>>>;

/// Render-facing view of one avatar
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CharacterView {
    pub client_id: u64,
    pub position: Vec3,
    pub velocity: Vec3,
    pub yaw: f64,
    pub pitch: f64,
    pub is_local: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// No local avatar matches the snapshot; nothing was touched
    NoLocalAvatar,
    /// The watermark does not name a sample still in history; state was
    /// forced without replay
    Teleported,
    /// State was forced, then `replayed` unacknowledged samples re-applied
    Replayed { replayed: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReconcileStats {
    pub reconciliations: u64,
    pub teleports: u64,
    pub last_replayed: usize,
    /// Distance between the predicted and the reconciled position
    pub last_correction: f32,
}

#[derive(Debug, Clone, Copy)]
struct LocalAvatar {
    client_id: u64,
    handle: AvatarHandle,
    look: LookState,
}

pub struct ClientWorld<E: PhysicsEngine = FlatWorld> {
    /// Holds the local avatar only; remotes are plain snapshot views
    engine: E,
    history: InputHistory,
    clock: Arc<dyn Clock>,
    local: Option<LocalAvatar>,
    remotes: BTreeMap<u64, Snapshot>,
    last_timestamp: u64,
    stats: ReconcileStats,
}

impl<E: PhysicsEngine> ClientWorld<E> {
    pub fn new(engine: E, retention: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            engine,
            history: InputHistory::new(retention, Arc::clone(&clock)),
            clock,
            local: None,
            remotes: BTreeMap::new(),
            last_timestamp: NO_INPUT_WATERMARK,
            stats: ReconcileStats::default(),
        }
    }

    pub fn into_shared(self) -> SharedWorld<E> {
        Arc::new(Mutex::new(self))
    }

    /// Creates the local avatar once the server has issued an identifier.
    pub fn activate(&mut self, client_id: u64) {
        if let Some(local) = self.local {
            if local.client_id == client_id {
                return;
            }
            self.engine.delete_avatar(local.handle);
        }

        let handle = self.engine.create_avatar(client_id);
        self.remotes.remove(&client_id);
        self.local = Some(LocalAvatar {
            client_id,
            handle,
            look: LookState::default(),
        });
        debug!("Local avatar created for client {}", client_id);
    }

    /// Drops the local avatar and every remote view.
    pub fn deactivate(&mut self) {
        if let Some(local) = self.local.take() {
            self.engine.delete_avatar(local.handle);
        }
        self.remotes.clear();
    }

    pub fn local_id(&self) -> Option<u64> {
        self.local.map(|local| local.client_id)
    }

    pub fn look(&self) -> Option<LookState> {
        self.local.map(|local| local.look)
    }

    /// Applies one tick of live input to the local avatar, then stamps it and
    /// records it in the history.
    ///
    /// Returns the stamped sample for transmission, or `None` when there is no
    /// local avatar yet. Timestamps are strictly increasing and never equal
    /// the no-input watermark.
    pub fn predict(&mut self, input: InputSample, dt: f64) -> Option<InputSample> {
        let local = self.local.as_mut()?;

        apply_movement(&mut self.engine, local.handle, &mut local.look, &input, dt);
        self.engine.step(dt as f32);

        let timestamp_ns = self.clock.now_ns().max(self.last_timestamp + 1);
        self.last_timestamp = timestamp_ns;

        let sample = InputSample {
            client_id: local.client_id,
            timestamp_ns,
            dt,
            ..input
        };
        self.history.insert(sample);
        Some(sample)
    }

    /// Rewinds the local avatar to an authoritative snapshot and replays
    /// every sample the server has not yet applied.
    pub fn reconcile(&mut self, snapshot: &Snapshot) -> ReconcileOutcome {
        let Some(local) = self.local.as_mut() else {
            return ReconcileOutcome::NoLocalAvatar;
        };
        if local.client_id != snapshot.client_id {
            return ReconcileOutcome::NoLocalAvatar;
        }

        // Inclusive of the watermark so the acknowledged sample can be found
        let pending = self
            .history
            .query_newer_than(snapshot.watermark.saturating_sub(1));
        let predicted = self.engine.position(local.handle).unwrap_or_default();

        self.engine.set_position(local.handle, snapshot.position);
        self.engine.set_velocity(local.handle, snapshot.velocity);
        local.look = LookState::new(snapshot.yaw, snapshot.pitch);
        self.stats.reconciliations += 1;

        let acknowledged = snapshot.watermark != NO_INPUT_WATERMARK
            && pending
                .first()
                .is_some_and(|sample| sample.timestamp_ns == snapshot.watermark);
        if !acknowledged {
            self.stats.teleports += 1;
            self.stats.last_replayed = 0;
            self.stats.last_correction = predicted.distance(snapshot.position);
            return ReconcileOutcome::Teleported;
        }

        let unacknowledged = &pending[1..];
        for sample in unacknowledged {
            apply_movement(&mut self.engine, local.handle, &mut local.look, sample, sample.dt);
            self.engine.step(sample.dt as f32);
        }

        let reconciled = self.engine.position(local.handle).unwrap_or_default();
        self.stats.last_replayed = unacknowledged.len();
        self.stats.last_correction = predicted.distance(reconciled);

        ReconcileOutcome::Replayed {
            replayed: unacknowledged.len(),
        }
    }

    /// Consumes one world snapshot: reconciles the local avatar, replaces
    /// remote views, and forgets remotes absent from the snapshot.
    pub fn apply_world_snapshot(&mut self, snapshots: &[Snapshot]) -> Option<ReconcileOutcome> {
        let local_id = self.local_id();
        let mut outcome = None;
        let mut present = HashSet::with_capacity(snapshots.len());

        for snapshot in snapshots {
            present.insert(snapshot.client_id);
            if Some(snapshot.client_id) == local_id {
                outcome = Some(self.reconcile(snapshot));
            } else {
                self.remotes.insert(snapshot.client_id, *snapshot);
            }
        }

        self.remotes.retain(|id, _| present.contains(id));
        outcome
    }

    pub fn local_state(&self) -> Option<CharacterView> {
        let local = self.local?;
        Some(CharacterView {
            client_id: local.client_id,
            position: self.engine.position(local.handle)?,
            velocity: self.engine.velocity(local.handle)?,
            yaw: local.look.yaw,
            pitch: local.look.pitch,
            is_local: true,
        })
    }

    /// Local avatar first, then remotes by id.
    pub fn characters(&self) -> Vec<CharacterView> {
        let mut views: Vec<CharacterView> = self.local_state().into_iter().collect();
        views.extend(self.remotes.values().map(|snapshot| CharacterView {
            client_id: snapshot.client_id,
            position: snapshot.position,
            velocity: snapshot.velocity,
            yaw: snapshot.yaw,
            pitch: snapshot.pitch,
            is_local: false,
        }));
        views
    }

    pub fn remote_count(&self) -> usize {
        self.remotes.len()
    }

    pub fn history_len(&mut self) -> usize {
        self.history.size()
    }

    pub fn pending_since(&mut self, watermark: u64) -> Vec<InputSample> {
        self.history.query_newer_than(watermark)
    }

    pub fn stats(&self) -> ReconcileStats {
        self.stats
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::clock::{millis_to_ns, ManualClock};
    use shared::DEFAULT_RETENTION;

    const DT: f64 = 1.0 / 60.0;

    fn world_with_clock() -> (ClientWorld, ManualClock) {
        let clock = ManualClock::new();
        let world = ClientWorld::new(FlatWorld::new(), DEFAULT_RETENTION, Arc::new(clock.clone()));
        (world, clock)
    }

    fn forward() -> InputSample {
        InputSample {
            forward: true,
            ..Default::default()
        }
    }

    fn predict_at(world: &mut ClientWorld, clock: &ManualClock, ms: u64, input: InputSample) {
        clock.set_millis(ms);
        world.predict(input, DT).expect("local avatar exists");
    }

    fn snapshot(client_id: u64, watermark: u64, position: Vec3, velocity: Vec3) -> Snapshot {
        Snapshot {
            client_id,
            watermark,
            position,
            velocity,
            yaw: 0.0,
            pitch: 0.0,
        }
    }

    /// Applies samples one by one from a baseline, the way prediction does.
    fn simulate_from(baseline: &Snapshot, samples: &[InputSample]) -> (Vec3, Vec3, LookState) {
        let mut engine = FlatWorld::new();
        let handle = engine.create_avatar(baseline.client_id);
        engine.set_position(handle, baseline.position);
        engine.set_velocity(handle, baseline.velocity);
        let mut look = LookState::new(baseline.yaw, baseline.pitch);

        for sample in samples {
            apply_movement(&mut engine, handle, &mut look, sample, sample.dt);
            engine.step_avatar(handle, sample.dt as f32);
        }
        (
            engine.position(handle).unwrap(),
            engine.velocity(handle).unwrap(),
            look,
        )
    }

    #[test]
    fn test_predict_moves_and_records() {
        let (mut world, clock) = world_with_clock();
        world.activate(1);
        let start = world.local_state().unwrap().position;

        clock.set_millis(100);
        let sample = world.predict(forward(), DT).unwrap();

        assert_eq!(sample.client_id, 1);
        assert_eq!(sample.timestamp_ns, millis_to_ns(100));
        assert_eq!(sample.dt, DT);
        assert_eq!(world.history_len(), 1);
        assert!(world.local_state().unwrap().position.x > start.x);
    }

    #[test]
    fn test_predict_without_avatar_is_noop() {
        let (mut world, _clock) = world_with_clock();
        assert_eq!(world.predict(forward(), DT), None);
        assert_eq!(world.history_len(), 0);
    }

    #[test]
    fn test_timestamps_strictly_increase_when_clock_stalls() {
        let (mut world, clock) = world_with_clock();
        world.activate(1);

        // Clock at zero must not produce the no-input watermark
        let first = world.predict(forward(), DT).unwrap();
        let second = world.predict(forward(), DT).unwrap();
        assert!(first.timestamp_ns > NO_INPUT_WATERMARK);
        assert!(second.timestamp_ns > first.timestamp_ns);

        clock.set_millis(5);
        let third = world.predict(forward(), DT).unwrap();
        assert_eq!(third.timestamp_ns, millis_to_ns(5));
    }

    #[test]
    fn test_reconcile_replays_samples_after_watermark() {
        let (mut world, clock) = world_with_clock();
        world.activate(1);
        predict_at(&mut world, &clock, 100, forward());
        predict_at(&mut world, &clock, 150, forward());
        predict_at(&mut world, &clock, 200, forward());

        let baseline = snapshot(
            1,
            millis_to_ns(100),
            Vec3::new(3.0, 0.0, 4.0),
            Vec3::new(0.5, 0.0, 0.0),
        );
        let outcome = world.reconcile(&baseline);
        assert_eq!(outcome, ReconcileOutcome::Replayed { replayed: 2 });

        let expected_samples = world.pending_since(millis_to_ns(100));
        let timestamps: Vec<u64> = expected_samples.iter().map(|s| s.timestamp_ns).collect();
        assert_eq!(timestamps, vec![millis_to_ns(150), millis_to_ns(200)]);

        let (position, velocity, _) = simulate_from(&baseline, &expected_samples);
        let state = world.local_state().unwrap();
        assert_eq!(state.position, position);
        assert_eq!(state.velocity, velocity);
        assert_eq!(world.stats().last_replayed, 2);
    }

    #[test]
    fn test_replay_matches_one_by_one_prediction() {
        let (mut world, clock) = world_with_clock();
        world.activate(4);

        let inputs = [
            InputSample { look_dx: 120.0, ..forward() },
            InputSample { right: true, jump: true, ..forward() },
            InputSample { left: true, look_dy: -40.0, ..Default::default() },
            InputSample { backward: true, look_dx: -300.0, ..Default::default() },
            forward(),
        ];
        for (i, input) in inputs.iter().enumerate() {
            predict_at(&mut world, &clock, 10 + i as u64 * 16, *input);
        }

        let acknowledged = world.pending_since(0)[0];
        let baseline = Snapshot {
            client_id: 4,
            watermark: acknowledged.timestamp_ns,
            position: Vec3::new(-7.0, 0.0, 2.0),
            velocity: Vec3::new(0.0, 0.0, 1.0),
            yaw: 30.0,
            pitch: 5.0,
        };
        let unacknowledged = world.pending_since(acknowledged.timestamp_ns);
        assert_eq!(unacknowledged.len(), inputs.len() - 1);

        world.reconcile(&baseline);

        let (position, velocity, look) = simulate_from(&baseline, &unacknowledged);
        let state = world.local_state().unwrap();
        assert_eq!(state.position, position);
        assert_eq!(state.velocity, velocity);
        assert_eq!(world.look(), Some(look));
    }

    #[test]
    fn test_reconcile_with_nothing_pending_is_idempotent_snap() {
        let (mut world, clock) = world_with_clock();
        world.activate(1);
        predict_at(&mut world, &clock, 100, forward());

        let authoritative = snapshot(
            1,
            millis_to_ns(100),
            Vec3::new(1.0, 0.0, 1.0),
            Vec3::new(2.0, 0.0, 0.0),
        );

        for _ in 0..3 {
            let outcome = world.reconcile(&authoritative);
            assert_eq!(outcome, ReconcileOutcome::Replayed { replayed: 0 });
            let state = world.local_state().unwrap();
            assert_eq!(state.position, authoritative.position);
            assert_eq!(state.velocity, authoritative.velocity);
        }
        assert_eq!(world.stats().reconciliations, 3);
    }

    #[test]
    fn test_sentinel_watermark_teleports() {
        let (mut world, clock) = world_with_clock();
        world.activate(1);
        predict_at(&mut world, &clock, 100, forward());
        predict_at(&mut world, &clock, 150, forward());

        let spawn = snapshot(1, NO_INPUT_WATERMARK, Vec3::new(5.0, 2.0, 5.0), Vec3::ZERO);
        assert_eq!(world.reconcile(&spawn), ReconcileOutcome::Teleported);

        let state = world.local_state().unwrap();
        assert_eq!(state.position, spawn.position);
        assert_eq!(state.velocity, Vec3::ZERO);
        assert_eq!(world.stats().teleports, 1);
    }

    #[test]
    fn test_unknown_watermark_teleports() {
        let (mut world, clock) = world_with_clock();
        world.activate(1);
        predict_at(&mut world, &clock, 100, forward());

        let unknown = snapshot(1, millis_to_ns(42), Vec3::new(0.0, 0.0, 9.0), Vec3::ZERO);
        assert_eq!(world.reconcile(&unknown), ReconcileOutcome::Teleported);
        assert_eq!(world.local_state().unwrap().position, unknown.position);
    }

    #[test]
    fn test_reconcile_without_local_avatar_is_noop() {
        let (mut world, _clock) = world_with_clock();
        let authoritative = snapshot(1, millis_to_ns(100), Vec3::ZERO, Vec3::ZERO);

        assert_eq!(world.reconcile(&authoritative), ReconcileOutcome::NoLocalAvatar);
        assert_eq!(world.stats(), ReconcileStats::default());
        assert!(world.characters().is_empty());
    }

    #[test]
    fn test_remote_avatars_applied_directly_and_pruned() {
        let (mut world, clock) = world_with_clock();
        world.activate(1);
        predict_at(&mut world, &clock, 100, forward());

        let remote = Snapshot {
            yaw: 90.0,
            ..snapshot(2, millis_to_ns(7), Vec3::new(4.0, 0.0, 4.0), Vec3::new(1.0, 0.0, 0.0))
        };
        let local = snapshot(1, millis_to_ns(100), Vec3::ZERO, Vec3::ZERO);

        let outcome = world.apply_world_snapshot(&[remote, local]);
        assert_eq!(outcome, Some(ReconcileOutcome::Replayed { replayed: 0 }));

        let views = world.characters();
        assert_eq!(views.len(), 2);
        assert!(views[0].is_local);
        assert_eq!(views[1].client_id, 2);
        assert_eq!(views[1].position, remote.position);
        assert_eq!(views[1].yaw, 90.0);
        assert_eq!(world.engine().len(), 1);

        // Remote 2 left the server
        world.apply_world_snapshot(&[local]);
        assert_eq!(world.remote_count(), 0);
        assert_eq!(world.characters().len(), 1);
    }

    #[test]
    fn test_snapshot_before_activation_only_tracks_remotes() {
        let (mut world, _clock) = world_with_clock();
        let outcome = world.apply_world_snapshot(&[snapshot(1, 0, Vec3::ZERO, Vec3::ZERO)]);
        assert_eq!(outcome, None);
        assert_eq!(world.remote_count(), 1);

        world.activate(1);
        assert_eq!(world.remote_count(), 0);
        assert_eq!(world.local_id(), Some(1));

        // A new identifier replaces the old body instead of adding one
        world.activate(3);
        assert_eq!(world.local_id(), Some(3));
        assert_eq!(world.engine().len(), 1);
    }

    #[test]
    fn test_deactivate_clears_state() {
        let (mut world, _clock) = world_with_clock();
        world.activate(1);
        world.apply_world_snapshot(&[snapshot(2, 0, Vec3::ZERO, Vec3::ZERO)]);

        world.deactivate();
        assert_eq!(world.local_id(), None);
        assert!(world.characters().is_empty());
        assert!(world.engine().is_empty());
    }

    #[tokio::test]
    async fn test_shared_world_serialises_access() {
        let (world, clock) = world_with_clock();
        let shared = world.into_shared();
        shared.lock().await.activate(1);

        let predictor = {
            let shared = Arc::clone(&shared);
            let clock = clock.clone();
            tokio::spawn(async move {
                for i in 1..=50u64 {
                    clock.set_millis(i);
                    shared.lock().await.predict(InputSample { forward: true, ..Default::default() }, DT);
                    tokio::task::yield_now().await;
                }
            })
        };
        for _ in 0..10 {
            let mut world = shared.lock().await;
            world.reconcile(&snapshot(1, NO_INPUT_WATERMARK, Vec3::ZERO, Vec3::ZERO));
            drop(world);
            tokio::task::yield_now().await;
        }
        predictor.await.unwrap();

        let mut world = shared.lock().await;
        assert_eq!(world.history_len(), 50);
        assert_eq!(world.stats().reconciliations, 10);
    }
}
