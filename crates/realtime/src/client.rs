// Client lifecycle.
//
// start provider -> calibrate -> route to a room -> run the room session ->
// release everything. Lifecycle flags and room snapshots are published on
// watch channels for whatever renders them.

use crate::backend::RealtimeBackend;
use crate::calibration::{Calibration, CalibrationState};
use crate::pipeline::Viewport;
use crate::provider::{GazeProvider, GazeService, ProviderLease};
use crate::router::RoomRouter;
use crate::session::{LifecycleFlags, RoomSession, RoomSnapshot, SessionCommand, SessionExit};
use abyss_core::{AbyssError, Config, ParticipantId};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

pub struct AbyssClient {
    config: Config,
    self_id: ParticipantId,
    backend: Arc<dyn RealtimeBackend>,
    provider: Arc<dyn GazeProvider>,
    service: GazeService,
    lease: Option<ProviderLease>,
    calibration: Calibration,
    viewport: Viewport,
    flags: watch::Sender<LifecycleFlags>,
    snapshots: watch::Sender<RoomSnapshot>,
}

impl AbyssClient {
    pub fn new(
        config: Config,
        backend: Arc<dyn RealtimeBackend>,
        provider: Arc<dyn GazeProvider>,
        service: GazeService,
    ) -> Self {
        let (flags, _) = watch::channel(LifecycleFlags::default());
        let (snapshots, _) = watch::channel(RoomSnapshot::default());
        Self {
            calibration: Calibration::new(&config.calibration),
            config,
            self_id: ParticipantId::generate(),
            backend,
            provider,
            service,
            lease: None,
            viewport: Viewport::default(),
            flags,
            snapshots,
        }
    }

    /// Use a fixed participant id instead of a random one
    pub fn with_participant_id(mut self, id: ParticipantId) -> Self {
        self.self_id = id;
        self
    }

    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = viewport;
        self
    }

    pub fn self_id(&self) -> &ParticipantId {
        &self.self_id
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn flags(&self) -> watch::Receiver<LifecycleFlags> {
        self.flags.subscribe()
    }

    pub fn snapshots(&self) -> watch::Receiver<RoomSnapshot> {
        self.snapshots.subscribe()
    }

    /// Acquire the gaze provider session if we do not hold it yet.
    pub async fn start(&mut self) -> Result<(), AbyssError> {
        if self.lease.is_none() {
            self.lease = Some(self.service.acquire(self.provider.clone()).await?);
        }
        Ok(())
    }

    pub fn start_calibration(&mut self) -> Result<(), AbyssError> {
        if self.lease.is_none() {
            return Err(AbyssError::calibration("gaze provider not started"));
        }
        self.calibration.start(self.provider.as_ref());
        self.flags.send_modify(|flags| flags.calibrated = false);
        Ok(())
    }

    /// Throw away the current calibration and begin again at the first point.
    pub fn restart_calibration(&mut self) {
        self.calibration.restart(self.provider.as_ref());
        self.flags.send_modify(|flags| flags.calibrated = false);
    }

    pub fn record_calibration(&mut self, x: f64, y: f64) -> Result<CalibrationState, AbyssError> {
        let state = self.calibration.record(self.provider.as_ref(), x, y)?;
        if state == CalibrationState::Calibrated {
            self.flags.send_modify(|flags| flags.calibrated = true);
        }
        Ok(state)
    }

    /// Click through every configured calibration point.
    pub fn calibrate_all(&mut self) -> Result<(), AbyssError> {
        self.start_calibration()?;
        let points = self.calibration.points().to_vec();
        for point in points {
            self.record_calibration(point.x * self.viewport.width, point.y * self.viewport.height)?;
        }
        Ok(())
    }

    /// Join a room and run its session until it ends. The provider session
    /// is released on every exit path; call `start` again before rejoining.
    /// A `Recalibrate` exit also resets calibration.
    pub async fn run(
        &mut self,
        commands: &mut mpsc::UnboundedReceiver<SessionCommand>,
    ) -> Result<SessionExit, AbyssError> {
        let result = self.join_and_run(commands).await;
        self.flags.send_modify(|flags| {
            flags.connected = false;
            flags.joined = false;
        });
        self.snapshots.send_replace(RoomSnapshot::default());
        if matches!(result, Ok(SessionExit::Recalibrate)) {
            self.restart_calibration();
        }
        self.lease = None;
        result
    }

    async fn join_and_run(
        &mut self,
        commands: &mut mpsc::UnboundedReceiver<SessionCommand>,
    ) -> Result<SessionExit, AbyssError> {
        if self.lease.is_none() {
            return Err(AbyssError::provider_unavailable("gaze provider not started"));
        }
        if !self.calibration.is_calibrated() {
            return Err(AbyssError::calibration("room connection requires calibration"));
        }

        let mut router = RoomRouter::new(
            self.backend.clone(),
            self.self_id.clone(),
            self.config.room.clone(),
        );
        let joined = router.join_any_room().await?;
        self.flags.send_modify(|flags| {
            flags.connected = true;
            flags.joined = true;
        });

        let session = RoomSession::new(
            joined,
            self.self_id.clone(),
            self.provider.clone(),
            &self.config,
            self.viewport,
            self.snapshots.clone(),
        );
        let lease = self
            .lease
            .as_mut()
            .ok_or_else(|| AbyssError::provider_unavailable("gaze provider not started"))?;
        Ok(session.run(lease.frames_mut(), commands).await)
    }

    /// Release the provider session and reset the flags.
    pub fn shutdown(&mut self) {
        self.lease = None;
        self.flags.send_replace(LifecycleFlags::default());
        self.snapshots.send_replace(RoomSnapshot::default());
    }
}
