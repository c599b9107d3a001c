//! Velocity composition shared by client prediction, client replay and the
//! authoritative server tick.
//!
//! Every constant that influences an avatar's trajectory lives here so the
//! client and the server cannot drift apart.

use crate::input::InputSample;
use crate::physics::{AvatarHandle, PhysicsEngine};
use glam::Vec3;

pub const MOVEMENT_ACCELERATION: f32 = 15.0;
/// Multiplicative velocity decay applied every tick
pub const FRICTION: f32 = 0.983;
pub const JUMP_IMPULSE: f32 = 1200.0;
pub const GRAVITY: Vec3 = Vec3::new(0.0, -9.81, 0.0);

/// Degrees of rotation per pixel of pointer motion
pub const LOOK_SENSITIVITY: f64 = 0.1;
pub const PITCH_LIMIT: f64 = 89.0;

/// Look orientation in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LookState {
    pub yaw: f64,
    pub pitch: f64,
}

impl LookState {
    pub fn new(yaw: f64, pitch: f64) -> Self {
        Self { yaw, pitch }
    }

    /// Converts raw pointer motion into yaw/pitch deltas.
    pub fn pointer_to_deltas(look_dx: f64, look_dy: f64) -> (f64, f64) {
        (look_dx * LOOK_SENSITIVITY, -look_dy * LOOK_SENSITIVITY)
    }

    pub fn rotate(&mut self, delta_yaw: f64, delta_pitch: f64) {
        self.yaw = (self.yaw + delta_yaw).rem_euclid(360.0);
        self.pitch = (self.pitch + delta_pitch).clamp(-PITCH_LIMIT, PITCH_LIMIT);
    }

    /// Unit forward direction flattened onto the ground plane.
    pub fn forward(&self) -> Vec3 {
        let yaw = self.yaw.to_radians();
        Vec3::new(yaw.cos() as f32, 0.0, yaw.sin() as f32)
    }

    /// Unit right direction on the ground plane (forward x up).
    pub fn right(&self) -> Vec3 {
        let forward = self.forward();
        Vec3::new(-forward.z, 0.0, forward.x)
    }

    /// Normalised horizontal movement direction for the sample's flags.
    pub fn input_direction(&self, sample: &InputSample) -> Vec3 {
        let direction =
            self.forward() * sample.forward_axis() + self.right() * sample.strafe_axis();
        direction.normalize_or_zero()
    }
}

/// Composes the next velocity from the current one.
///
/// Acceleration and the jump impulse are scaled by `dt`, friction is applied
/// once per call regardless of input, and vertical velocity is cleared while
/// grounded before gravity is added.
pub fn compose_velocity(
    velocity: Vec3,
    direction: Vec3,
    grounded: bool,
    jump: bool,
    dt: f64,
) -> Vec3 {
    let dt = dt as f32;
    let mut velocity = velocity + direction * MOVEMENT_ACCELERATION * dt;
    velocity *= FRICTION;

    if grounded {
        velocity.y = 0.0;
        if jump {
            velocity += Vec3::Y * JUMP_IMPULSE * dt;
        }
    }

    velocity + GRAVITY * dt
}

/// Applies one input sample to an avatar: orientation first, then velocity.
///
/// The caller steps the engine afterwards. Returns false when the avatar is
/// unknown to the engine.
pub fn apply_movement<E: PhysicsEngine + ?Sized>(
    engine: &mut E,
    handle: AvatarHandle,
    look: &mut LookState,
    sample: &InputSample,
    dt: f64,
) -> bool {
    let Some(velocity) = engine.velocity(handle) else {
        return false;
    };

    let (delta_yaw, delta_pitch) = LookState::pointer_to_deltas(sample.look_dx, sample.look_dy);
    look.rotate(delta_yaw, delta_pitch);

    let direction = look.input_direction(sample);
    let grounded = engine.is_grounded(handle);
    let velocity = compose_velocity(velocity, direction, grounded, sample.jump, dt);
    engine.set_velocity(handle, velocity);
    true
}

/// Advances an avatar that received no input this tick.
///
/// Horizontal velocity is kept, gravity pulls while airborne. The caller
/// steps the engine afterwards.
pub fn coast<E: PhysicsEngine + ?Sized>(engine: &mut E, handle: AvatarHandle, dt: f64) -> bool {
    let Some(mut velocity) = engine.velocity(handle) else {
        return false;
    };

    if engine.is_grounded(handle) {
        velocity.y = 0.0;
    } else {
        velocity += GRAVITY * dt as f32;
    }
    engine.set_velocity(handle, velocity);
    true
}
