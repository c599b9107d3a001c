//! Code shared by the server and client: the movement rule both sides must
//! agree on, the physics boundary, input history, wire records and transport.

pub mod clock;
pub mod error;
pub mod history;
pub mod input;
pub mod movement;
pub mod pacing;
pub mod physics;
pub mod protocol;
pub mod shutdown;
pub mod transport;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use error::{NetError, ProtocolError};
pub use history::{InputHistory, DEFAULT_RETENTION};
pub use input::InputSample;
pub use movement::{apply_movement, coast, LookState};
pub use pacing::Pacer;
pub use physics::{AvatarHandle, FlatWorld, PhysicsEngine};
pub use protocol::{Snapshot, NO_INPUT_WATERMARK};
pub use shutdown::{shutdown_channel, ShutdownSignal, ShutdownTrigger};
/// Positions and velocities. Positive `y` is up; avatars move on the `x`/`z`
/// plane and jump along `y`.
pub use glam::Vec3;
pub use transport::{Channel, ClientHost, DisconnectReason, HostEvent, PeerId, ServerHost};

pub const DEFAULT_PORT: u16 = 7777;
pub const DEFAULT_TICK_RATE: u32 = 60;
