//! Live input capture
//!
//! Capture sources (the keyboard/mouse poller on the render thread, or the
//! headless wander bot) write into an [`InputCapture`]. The prediction loop
//! takes exactly one [`InputCapture::snapshot`] per tick, so a tick never
//! sees half of an update.

use log::debug;
use macroquad::input::{is_key_down, mouse_position, KeyCode};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{InputSample, ShutdownSignal};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Movement flags plus pointer motion accumulated since the last snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ControlState {
    pub forward: bool,
    pub backward: bool,
    pub left: bool,
    pub right: bool,
    pub jump: bool,
    pub look_dx: f64,
    pub look_dy: f64,
}

/// Shared handle to the live input state; clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct InputCapture {
    state: Arc<Mutex<ControlState>>,
}

impl InputCapture {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ControlState> {
        // The state stays valid even if a writer panicked mid-update
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_movement(&self, forward: bool, backward: bool, left: bool, right: bool, jump: bool) {
        let mut state = self.lock();
        state.forward = forward;
        state.backward = backward;
        state.left = left;
        state.right = right;
        state.jump = jump;
    }

    /// Accumulates raw pointer motion in pixels.
    pub fn add_look(&self, dx: f64, dy: f64) {
        let mut state = self.lock();
        state.look_dx += dx;
        state.look_dy += dy;
    }

    pub fn current(&self) -> ControlState {
        *self.lock()
    }

    /// Takes the tick's input: flags persist, pointer motion is consumed.
    pub fn snapshot(&self) -> InputSample {
        let mut state = self.lock();
        let sample = InputSample {
            forward: state.forward,
            backward: state.backward,
            left: state.left,
            right: state.right,
            jump: state.jump,
            look_dx: state.look_dx,
            look_dy: state.look_dy,
            ..Default::default()
        };
        state.look_dx = 0.0;
        state.look_dy = 0.0;
        sample
    }
}

/// Polls macroquad's keyboard and pointer once per rendered frame.
#[derive(Debug, Default)]
pub struct KeyboardMouse {
    last_pointer: Option<(f32, f32)>,
}

impl KeyboardMouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// WASD or arrows to move, Space to jump, pointer motion to look.
    pub fn poll(&mut self, capture: &InputCapture) {
        capture.set_movement(
            is_key_down(KeyCode::W) || is_key_down(KeyCode::Up),
            is_key_down(KeyCode::S) || is_key_down(KeyCode::Down),
            is_key_down(KeyCode::A) || is_key_down(KeyCode::Left),
            is_key_down(KeyCode::D) || is_key_down(KeyCode::Right),
            is_key_down(KeyCode::Space),
        );

        let pointer = mouse_position();
        if let Some((last_x, last_y)) = self.last_pointer {
            let (dx, dy) = (pointer.0 - last_x, pointer.1 - last_y);
            if dx != 0.0 || dy != 0.0 {
                capture.add_look(f64::from(dx), f64::from(dy));
            }
        }
        self.last_pointer = Some(pointer);
    }
}

/// Picks a random heading change for the wander bot.
pub fn random_controls<R: Rng>(rng: &mut R) -> ControlState {
    let forward = rng.gen_bool(0.7);
    ControlState {
        forward,
        backward: !forward && rng.gen_bool(0.3),
        left: rng.gen_bool(0.25),
        right: rng.gen_bool(0.25),
        jump: rng.gen_bool(0.1),
        look_dx: rng.gen_range(-400.0..400.0),
        look_dy: 0.0,
    }
}

/// Drives the capture with random wandering until shutdown; used when no
/// window is available.
pub async fn run_wander_bot(capture: InputCapture, mut shutdown: ShutdownSignal) {
    let mut rng = StdRng::from_entropy();

    loop {
        let controls = random_controls(&mut rng);
        capture.set_movement(
            controls.forward,
            controls.backward,
            controls.left,
            controls.right,
            controls.jump,
        );
        capture.add_look(controls.look_dx, controls.look_dy);
        debug!("Wander bot picked {:?}", controls);

        let hold = Duration::from_millis(rng.gen_range(400..1500));
        tokio::select! {
            _ = shutdown.triggered() => break,
            _ = tokio::time::sleep(hold) => {}
        }
    }
}
