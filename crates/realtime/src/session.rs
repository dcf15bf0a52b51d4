// Room session dispatcher.
//
// Owns everything scoped to one room tenancy: the room and discovery
// subscriptions, the seat cache, the blink baseline, the throttles and the
// peer telemetry maps. A single loop consumes room events, provider frames
// and local commands in arrival order; each handler runs to completion
// before the next item is taken.
//
// Rejoining after overflow or leaving drops the whole session, so no cached
// seat or baseline carries over into another room.

use crate::backend::{ChannelEvent, SubscribeStatus, Subscription};
use crate::cursor::CursorBroadcaster;
use crate::pipeline::{GazeBroadcastPipeline, Viewport};
use crate::provider::{FrameStream, GazeFrame, GazeProvider};
use crate::router::JoinedRoom;
use abyss_core::{
    BroadcastConfig, Config, CursorState, EyeTrackingState, ParticipantId, PresenceEvent,
    PresenceReconciler, RoomView,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};

/// Plain state flags for the presentation layer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LifecycleFlags {
    pub connected: bool,
    pub calibrated: bool,
    pub joined: bool,
}

/// Everything the grid needs to render one room
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RoomSnapshot {
    pub room_number: Option<u32>,
    /// Seated members, self excluded
    pub participants: RoomView,
    pub eyes: EyeTrackingState,
    pub cursors: CursorState,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    Pointer { x: f64, y: f64 },
    Resize(Viewport),
    /// Leave the room and redo calibration before rejoining
    Recalibrate,
    Leave,
}

/// Why a session loop ended
#[derive(Debug, Clone, PartialEq)]
pub enum SessionExit {
    Left,
    Recalibrate,
    CommandsClosed,
    FramesEnded,
    RoomClosed,
    ConnectionLost(String),
}

pub struct RoomSession {
    room_number: u32,
    self_id: ParticipantId,
    room: Subscription,
    discovery: Subscription,
    reconciler: PresenceReconciler,
    view: RoomView,
    eyes: EyeTrackingState,
    cursors: CursorState,
    pipeline: GazeBroadcastPipeline,
    cursor: CursorBroadcaster,
    events: BroadcastConfig,
    snapshots: watch::Sender<RoomSnapshot>,
}

impl RoomSession {
    pub fn new(
        joined: JoinedRoom,
        self_id: ParticipantId,
        provider: Arc<dyn GazeProvider>,
        config: &Config,
        viewport: Viewport,
        snapshots: watch::Sender<RoomSnapshot>,
    ) -> Self {
        let JoinedRoom {
            room_number,
            room,
            discovery,
            presence,
        } = joined;

        let channel = room.handle().clone();
        let mut session = Self {
            room_number,
            reconciler: PresenceReconciler::new(self_id.clone()),
            view: RoomView::default(),
            eyes: EyeTrackingState::new(),
            cursors: CursorState::new(),
            pipeline: GazeBroadcastPipeline::new(
                self_id.clone(),
                provider,
                channel.clone(),
                config,
                viewport,
            ),
            cursor: CursorBroadcaster::new(self_id.clone(), channel, &config.broadcast, viewport),
            events: config.broadcast.clone(),
            self_id,
            room,
            discovery,
            snapshots,
        };

        match session.reconciler.reconcile(&presence) {
            Ok(view) => session.view = view,
            Err(e) => tracing::error!("Initial reconciliation of room {} failed: {}", room_number, e),
        }
        session.publish();
        session
    }

    pub fn room_number(&self) -> u32 {
        self.room_number
    }

    /// Full ordered view, self included
    pub fn view(&self) -> &RoomView {
        &self.view
    }

    pub fn eyes(&self) -> &EyeTrackingState {
        &self.eyes
    }

    pub fn cursors(&self) -> &CursorState {
        &self.cursors
    }

    pub fn pipeline(&self) -> &GazeBroadcastPipeline {
        &self.pipeline
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            room_number: Some(self.room_number),
            participants: self.view.excluding(&self.self_id),
            eyes: self.eyes.clone(),
            cursors: self.cursors.clone(),
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.snapshot());
    }

    fn reconcile(&mut self, event: PresenceEvent) {
        let membership = self.room.handle().presence_state();
        match self.reconciler.handle(event, &membership) {
            Ok(view) => {
                self.view = view;
                if event == PresenceEvent::Sync {
                    let gone = self.eyes.retain_present(&membership);
                    self.cursors.retain_present(&membership);
                    if !gone.is_empty() {
                        tracing::debug!("Pruned telemetry of {} departed peer(s)", gone.len());
                    }
                }
                self.publish();
            }
            Err(e) => {
                tracing::error!("Rejected {:?} on room {}: {}", event, self.room_number, e);
            }
        }
    }

    /// Apply one room event. Returns an exit reason if the room is unusable.
    pub fn handle_room_event(&mut self, event: ChannelEvent) -> Option<SessionExit> {
        match event {
            ChannelEvent::PresenceJoin { key } => {
                tracing::debug!("Presence join '{}' in room {}", key, self.room_number);
                self.reconcile(PresenceEvent::Join);
            }
            ChannelEvent::PresenceSync => self.reconcile(PresenceEvent::Sync),
            ChannelEvent::PresenceLeave { key } => {
                tracing::debug!("Presence leave '{}' in room {}", key, self.room_number);
            }
            ChannelEvent::Broadcast { event, payload } => {
                let changed = if event == self.events.eye_tracking_event {
                    self.pipeline.ingest(&payload, &mut self.eyes)
                } else if event == self.events.cursor_event {
                    self.cursor.ingest(&payload, &mut self.cursors)
                } else {
                    tracing::debug!("Ignoring broadcast '{}'", event);
                    false
                };
                if changed {
                    self.publish();
                }
            }
            ChannelEvent::Status(SubscribeStatus::Subscribed) => {}
            ChannelEvent::Status(status) => {
                tracing::error!("Room {} channel reported {:?}", self.room_number, status);
                return Some(SessionExit::ConnectionLost(format!("{:?}", status)));
            }
        }
        None
    }

    /// Handle every room event already queued, without waiting.
    pub fn drain_events(&mut self) -> Option<SessionExit> {
        while let Some(event) = self.room.try_next_event() {
            if let Some(exit) = self.handle_room_event(event) {
                return Some(exit);
            }
        }
        None
    }

    pub async fn handle_frame(&mut self, frame: Option<GazeFrame>, now: Instant) {
        self.pipeline.on_frame(frame, now).await;
    }

    pub fn handle_command(&mut self, command: SessionCommand, now: Instant) -> Option<SessionExit> {
        match command {
            SessionCommand::Pointer { x, y } => {
                self.cursor.on_pointer(x, y, now);
            }
            SessionCommand::Resize(viewport) => {
                self.pipeline.set_viewport(viewport);
                self.cursor.set_viewport(viewport);
            }
            SessionCommand::Recalibrate => return Some(SessionExit::Recalibrate),
            SessionCommand::Leave => return Some(SessionExit::Left),
        }
        None
    }

    /// Run until the room closes, frames stop, or a `Leave` arrives. Every
    /// exit path tears the session down.
    pub async fn run(
        mut self,
        frames: &mut FrameStream,
        commands: &mut mpsc::UnboundedReceiver<SessionCommand>,
    ) -> SessionExit {
        tracing::info!("Room {} session running", self.room_number);
        let exit = loop {
            tokio::select! {
                event = self.room.next_event() => match event {
                    Some(event) => {
                        if let Some(exit) = self.handle_room_event(event) {
                            break exit;
                        }
                    }
                    None => break SessionExit::RoomClosed,
                },
                frame = frames.recv() => match frame {
                    Some(frame) => self.handle_frame(frame, now()).await,
                    None => break SessionExit::FramesEnded,
                },
                command = commands.recv() => match command {
                    Some(command) => {
                        if let Some(exit) = self.handle_command(command, now()) {
                            break exit;
                        }
                    }
                    None => break SessionExit::CommandsClosed,
                },
            }
        };
        self.teardown(&exit);
        exit
    }

    /// Clear timers and baseline, then release both subscriptions.
    pub fn teardown(mut self, reason: &SessionExit) {
        self.pipeline.reset();
        self.cursor.reset();
        self.snapshots.send_replace(RoomSnapshot::default());
        tracing::info!(
            "Leaving room {} ({:?}), unsubscribing '{}' and '{}'",
            self.room_number,
            reason,
            self.room.name(),
            self.discovery.name()
        );
    }
}

// tokio's clock so paused-time tests drive the throttles and debounce
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}
