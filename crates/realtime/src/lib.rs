// Abyss Realtime
//
// Room sharding and telemetry plumbing on top of a presence/broadcast
// backend: room discovery and overflow routing, the per-room dispatcher
// loop, gaze and cursor broadcast, and the gaze provider lifecycle.

pub mod backend;
pub mod calibration;
pub mod client;
pub mod cursor;
pub mod memory;
pub mod pipeline;
pub mod provider;
pub mod router;
pub mod session;

pub use backend::{
    ChannelConfig, ChannelEvent, ChannelHandle, RealtimeBackend, RealtimeError, SubscribeStatus,
    Subscription,
};
pub use calibration::{Calibration, CalibrationState};
pub use client::AbyssClient;
pub use cursor::CursorBroadcaster;
pub use memory::InMemoryBackend;
pub use pipeline::{GazeBroadcastPipeline, Viewport};
pub use provider::{
    FrameStream, GazeFrame, GazeProvider, GazeService, ProviderError, ProviderLease,
    SimulatedGazeProvider,
};
pub use router::{JoinedRoom, RoomRouter, RouterState};
pub use session::{LifecycleFlags, RoomSession, RoomSnapshot, SessionCommand, SessionExit};
