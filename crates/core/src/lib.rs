pub mod config;
pub mod error;
pub mod model;
pub mod reconcile;
pub mod seat;

// Re-export commonly used types
pub use config::{BlinkConfig, BroadcastConfig, CalibrationConfig, CalibrationPoint, Config, RoomConfig};
pub use error::{AbyssError, DomainError, InfraError};
pub use model::{
    CursorSample, CursorState, EyeTrackingState, GazeSample, ParticipantId, PeerState,
    PresenceRecord, PresenceState, RoomView, Seat, SeatedParticipant,
};
pub use reconcile::{PresenceEvent, PresenceReconciler};
pub use seat::{SeatAssigner, SeatTable};
