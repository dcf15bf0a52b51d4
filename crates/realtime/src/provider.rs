// Gaze Provider Interface
//
// The gaze tracker is a process-wide resource (it owns the camera). Sessions
// are handed out by `GazeService` one at a time; the returned lease stops the
// provider when dropped.

use abyss_core::{AbyssError, DomainError};
use abyss_signal::{EyePatch, EyePatches};
use async_trait::async_trait;
use image::Rgba;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::mpsc;

/// Raw gaze prediction in screen pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GazeFrame {
    pub x: f64,
    pub y: f64,
}

/// Per-frame callbacks; `None` means the tracker produced no prediction.
pub type FrameStream = mpsc::UnboundedReceiver<Option<GazeFrame>>;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("gaze provider failed to start: {0}")]
    Start(String),
}

impl From<ProviderError> for AbyssError {
    fn from(err: ProviderError) -> Self {
        AbyssError::provider_unavailable(err.to_string())
    }
}

#[async_trait]
pub trait GazeProvider: Send + Sync {
    /// Begin tracking; frames arrive on the returned stream until `stop`.
    async fn start(&self) -> Result<FrameStream, ProviderError>;

    /// End tracking and release the camera
    fn stop(&self);

    /// Current left/right eye regions, if a face is visible
    async fn eye_patches(&self) -> Option<EyePatches>;

    /// Record a calibration sample at a screen position
    fn record_screen_position(&self, x: f64, y: f64, label: &str);

    /// Discard collected calibration samples
    fn clear_data(&self);
}

/// Hands out at most one active provider session at a time.
#[derive(Debug, Clone, Default)]
pub struct GazeService {
    active: Arc<AtomicBool>,
}

impl GazeService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Start `provider` as the single active session.
    pub async fn acquire(&self, provider: Arc<dyn GazeProvider>) -> Result<ProviderLease, AbyssError> {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(DomainError::ProviderBusy.into());
        }

        match provider.start().await {
            Ok(frames) => {
                tracing::info!("Gaze provider session started");
                Ok(ProviderLease {
                    provider,
                    frames,
                    active: self.active.clone(),
                })
            }
            Err(e) => {
                self.active.store(false, Ordering::SeqCst);
                Err(e.into())
            }
        }
    }
}

/// The active provider session; stops the provider on drop.
pub struct ProviderLease {
    provider: Arc<dyn GazeProvider>,
    frames: FrameStream,
    active: Arc<AtomicBool>,
}

impl ProviderLease {
    pub fn provider(&self) -> &Arc<dyn GazeProvider> {
        &self.provider
    }

    pub fn frames_mut(&mut self) -> &mut FrameStream {
        &mut self.frames
    }
}

impl Drop for ProviderLease {
    fn drop(&mut self) {
        self.provider.stop();
        self.active.store(false, Ordering::SeqCst);
        tracing::info!("Gaze provider session released");
    }
}

#[derive(Default)]
struct SimState {
    running: bool,
    frame_tx: Option<mpsc::UnboundedSender<Option<GazeFrame>>>,
    patches: Option<EyePatches>,
    recorded: Vec<(f64, f64, String)>,
    starts: usize,
}

/// Scriptable provider for simulations and tests.
#[derive(Default)]
pub struct SimulatedGazeProvider {
    state: Mutex<SimState>,
}

impl SimulatedGazeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Deliver a frame callback. False when not running.
    pub fn push_frame(&self, frame: Option<GazeFrame>) -> bool {
        self.state()
            .frame_tx
            .as_ref()
            .is_some_and(|tx| tx.send(frame).is_ok())
    }

    pub fn set_patches(&self, patches: Option<EyePatches>) {
        self.state().patches = patches;
    }

    /// Uniform gray eye patches of the given brightness
    pub fn set_brightness(&self, left: u8, right: u8) {
        let patch = |v: u8| EyePatch::from_pixel(12, 8, Rgba([v, v, v, 255]));
        self.set_patches(Some(EyePatches::new(patch(left), patch(right))));
    }

    pub fn is_running(&self) -> bool {
        self.state().running
    }

    pub fn start_count(&self) -> usize {
        self.state().starts
    }

    pub fn recorded_positions(&self) -> Vec<(f64, f64, String)> {
        self.state().recorded.clone()
    }
}

#[async_trait]
impl GazeProvider for SimulatedGazeProvider {
    async fn start(&self) -> Result<FrameStream, ProviderError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state();
        state.running = true;
        state.frame_tx = Some(tx);
        state.starts += 1;
        Ok(rx)
    }

    fn stop(&self) {
        let mut state = self.state();
        state.running = false;
        state.frame_tx = None;
    }

    async fn eye_patches(&self) -> Option<EyePatches> {
        let state = self.state();
        if !state.running {
            return None;
        }
        state.patches.clone()
    }

    fn record_screen_position(&self, x: f64, y: f64, label: &str) {
        self.state().recorded.push((x, y, label.to_string()));
    }

    fn clear_data(&self) {
        self.state().recorded.clear();
    }
}
