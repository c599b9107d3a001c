//! Physics-engine boundary.
//!
//! The netcode never integrates positions itself; it composes velocities
//! (see [`crate::movement`]) and hands them to an engine through
//! [`PhysicsEngine`]. [`FlatWorld`] is a minimal engine with an infinite
//! ground plane and a square arena, enough to run the server and client.

use glam::Vec3;
use std::collections::HashMap;

/// Handle to an avatar body owned by a physics engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AvatarHandle(pub u64);

pub trait PhysicsEngine {
    fn create_avatar(&mut self, id: u64) -> AvatarHandle;
    fn delete_avatar(&mut self, handle: AvatarHandle);
    fn set_position(&mut self, handle: AvatarHandle, position: Vec3);
    fn set_velocity(&mut self, handle: AvatarHandle, velocity: Vec3);
    fn position(&self, handle: AvatarHandle) -> Option<Vec3>;
    fn velocity(&self, handle: AvatarHandle) -> Option<Vec3>;
    fn is_grounded(&self, handle: AvatarHandle) -> bool;
    /// Integrates every body by `dt` seconds.
    fn step(&mut self, dt: f32);
    /// Integrates a single body by `dt` seconds.
    fn step_avatar(&mut self, handle: AvatarHandle, dt: f32);
}

pub const GROUND_HEIGHT: f32 = 0.0;
pub const GROUND_TOLERANCE: f32 = 0.01;
pub const ARENA_HALF_EXTENT: f32 = 50.0;
pub const SPAWN_HEIGHT: f32 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct Body {
    position: Vec3,
    velocity: Vec3,
}

/// Ground plane at [`GROUND_HEIGHT`] bounded by walls at ±[`ARENA_HALF_EXTENT`].
#[derive(Debug, Clone, Default)]
pub struct FlatWorld {
    bodies: HashMap<AvatarHandle, Body>,
}

impl FlatWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    /// Deterministic spawn point for a client id, spread along the x axis.
    pub fn spawn_point(id: u64) -> Vec3 {
        let x = (id % 10) as f32 * 2.0 - 9.0;
        Vec3::new(x, SPAWN_HEIGHT, 0.0)
    }

    fn integrate(body: &mut Body, dt: f32) {
        body.position += body.velocity * dt;

        if body.position.y < GROUND_HEIGHT {
            body.position.y = GROUND_HEIGHT;
            if body.velocity.y < 0.0 {
                body.velocity.y = 0.0;
            }
        }

        let limit = ARENA_HALF_EXTENT;
        if body.position.x.abs() > limit {
            body.position.x = body.position.x.clamp(-limit, limit);
            body.velocity.x = 0.0;
        }
        if body.position.z.abs() > limit {
            body.position.z = body.position.z.clamp(-limit, limit);
            body.velocity.z = 0.0;
        }
    }
}

impl PhysicsEngine for FlatWorld {
    fn create_avatar(&mut self, id: u64) -> AvatarHandle {
        let handle = AvatarHandle(id);
        self.bodies.insert(
            handle,
            Body {
                position: Self::spawn_point(id),
                velocity: Vec3::ZERO,
            },
        );
        handle
    }

    fn delete_avatar(&mut self, handle: AvatarHandle) {
        self.bodies.remove(&handle);
    }

    fn set_position(&mut self, handle: AvatarHandle, position: Vec3) {
        if let Some(body) = self.bodies.get_mut(&handle) {
            body.position = position;
        }
    }

    fn set_velocity(&mut self, handle: AvatarHandle, velocity: Vec3) {
        if let Some(body) = self.bodies.get_mut(&handle) {
            body.velocity = velocity;
        }
    }

    fn position(&self, handle: AvatarHandle) -> Option<Vec3> {
        self.bodies.get(&handle).map(|body| body.position)
    }

    fn velocity(&self, handle: AvatarHandle) -> Option<Vec3> {
        self.bodies.get(&handle).map(|body| body.velocity)
    }

    // Derived from position so that a forced position immediately yields the
    // same ground state on every machine.
    fn is_grounded(&self, handle: AvatarHandle) -> bool {
        self.bodies
            .get(&handle)
            .is_some_and(|body| body.position.y <= GROUND_HEIGHT + GROUND_TOLERANCE)
    }

    fn step(&mut self, dt: f32) {
        for body in self.bodies.values_mut() {
            Self::integrate(body, dt);
        }
    }

    fn step_avatar(&mut self, handle: AvatarHandle, dt: f32) {
        if let Some(body) = self.bodies.get_mut(&handle) {
            Self::integrate(body, dt);
        }
    }
}
