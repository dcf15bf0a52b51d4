// Gaze broadcast pipeline.
//
// provider frame -> normalize against the viewport -> blink detector ->
// throttled send on the room's ephemeral channel. Peers' samples come back
// through `ingest` into the local EyeTrackingState.
//
// Gaze never goes into the presence record: a presence update triggers a
// sync for every member, gaze changes every frame.

use crate::backend::ChannelHandle;
use crate::provider::{GazeFrame, GazeProvider};
use abyss_core::{Config, EyeTrackingState, GazeSample, ParticipantId};
use abyss_signal::{limit, BlinkDetector, Throttled};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Local screen size in pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    /// Screen pixels to [0, 1] coordinates. `None` for an empty viewport or
    /// non-finite input.
    pub fn normalize(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        if self.is_empty() || !x.is_finite() || !y.is_finite() {
            return None;
        }
        Some((
            (x / self.width).clamp(0.0, 1.0),
            (y / self.height).clamp(0.0, 1.0),
        ))
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(1280.0, 800.0)
    }
}

pub(crate) type Sender<T> = Throttled<Box<dyn FnMut(T) + Send>>;

/// Throttled fire-and-forget sender for one broadcast event.
pub(crate) fn throttled_sender<T>(
    channel: Arc<dyn ChannelHandle>,
    event: String,
    window: Duration,
) -> Sender<T>
where
    T: serde::Serialize + 'static,
{
    let send = move |sample: T| {
        let payload = match serde_json::to_value(&sample) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("Failed to encode '{}' payload: {}", event, e);
                return;
            }
        };
        if let Err(e) = channel.send(&event, payload) {
            tracing::warn!("Broadcast '{}' on '{}' dropped: {}", event, channel.name(), e);
        }
    };
    limit(Box::new(send), window)
}

pub struct GazeBroadcastPipeline {
    self_id: ParticipantId,
    provider: Arc<dyn GazeProvider>,
    detector: BlinkDetector,
    viewport: Viewport,
    broadcast: Sender<GazeSample>,
}

impl GazeBroadcastPipeline {
    pub fn new(
        self_id: ParticipantId,
        provider: Arc<dyn GazeProvider>,
        channel: Arc<dyn ChannelHandle>,
        config: &Config,
        viewport: Viewport,
    ) -> Self {
        let broadcast = throttled_sender(
            channel,
            config.broadcast.eye_tracking_event.clone(),
            Duration::from_millis(config.broadcast.gaze_throttle_ms),
        );
        Self {
            self_id,
            provider,
            detector: BlinkDetector::new(&config.blink),
            viewport,
            broadcast,
        }
    }

    pub fn detector(&self) -> &BlinkDetector {
        &self.detector
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        tracing::debug!("Viewport now {}x{}", viewport.width, viewport.height);
        self.viewport = viewport;
    }

    /// Process one provider callback. Returns the sample if it went out;
    /// skipped and throttled frames return `None`.
    pub async fn on_frame(&mut self, frame: Option<GazeFrame>, now: Instant) -> Option<GazeSample> {
        let Some(frame) = frame else {
            tracing::trace!("No gaze prediction this frame");
            return None;
        };
        let Some((gaze_x, gaze_y)) = self.viewport.normalize(frame.x, frame.y) else {
            tracing::warn!(
                "Skipping gaze frame ({}, {}) for viewport {:?}",
                frame.x,
                frame.y,
                self.viewport
            );
            return None;
        };

        let Some(patches) = self.provider.eye_patches().await else {
            tracing::debug!("Eye patches unavailable, skipping frame");
            return None;
        };
        let is_blinking = self.detector.process(&patches, now)?;

        let sample = GazeSample {
            participant_id: self.self_id.clone(),
            is_blinking,
            gaze_x,
            gaze_y,
        };
        self.broadcast
            .call_at(sample.clone(), now)
            .then_some(sample)
    }

    /// Apply a peer's broadcast. Returns whether `eyes` changed.
    pub fn ingest(&self, payload: &JsonValue, eyes: &mut EyeTrackingState) -> bool {
        let sample: GazeSample = match serde_json::from_value(payload.clone()) {
            Ok(sample) => sample,
            Err(e) => {
                tracing::warn!("Dropping malformed gaze broadcast: {}", e);
                return false;
            }
        };
        if sample.participant_id == self.self_id {
            return false;
        }
        eyes.upsert(sample.participant_id.clone(), sample);
        true
    }

    /// Forget the brightness baseline and any open throttle window.
    pub fn reset(&mut self) {
        self.detector.reset();
        self.broadcast.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ChannelConfig, ChannelEvent, RealtimeBackend, Subscription};
    use crate::memory::InMemoryBackend;
    use crate::provider::SimulatedGazeProvider;
    use serde_json::json;

    async fn pair(backend: &InMemoryBackend) -> (Subscription, Subscription) {
        let mut me = backend
            .subscribe("room_1", ChannelConfig::with_presence_key("me".into()))
            .await
            .unwrap();
        let mut peer = backend
            .subscribe("room_1", ChannelConfig::with_presence_key("peer".into()))
            .await
            .unwrap();
        me.wait_ready(None).await.unwrap();
        peer.wait_ready(None).await.unwrap();
        (me, peer)
    }

    fn broadcasts(sub: &mut Subscription) -> Vec<JsonValue> {
        std::iter::from_fn(|| sub.try_next_event())
            .filter_map(|event| match event {
                ChannelEvent::Broadcast { payload, .. } => Some(payload),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn viewport_normalizes_and_clamps() {
        let viewport = Viewport::new(1000.0, 500.0);
        assert_eq!(viewport.normalize(250.0, 250.0), Some((0.25, 0.5)));
        assert_eq!(viewport.normalize(-10.0, 900.0), Some((0.0, 1.0)));
        assert_eq!(viewport.normalize(f64::NAN, 1.0), None);
        assert_eq!(Viewport::new(0.0, 500.0).normalize(1.0, 1.0), None);
    }

    #[tokio::test]
    async fn frames_are_throttled_onto_the_room() {
        let backend = InMemoryBackend::new();
        let (me, mut peer) = pair(&backend).await;
        let provider = Arc::new(SimulatedGazeProvider::new());
        let _frames = provider.start().await.unwrap();
        provider.set_brightness(100, 100);

        let mut pipeline = GazeBroadcastPipeline::new(
            "me".into(),
            provider.clone(),
            me.handle().clone(),
            &Config::default(),
            Viewport::new(1000.0, 1000.0),
        );

        let start = Instant::now();
        let frame = Some(GazeFrame { x: 500.0, y: 250.0 });
        let sent = pipeline.on_frame(frame, start).await.unwrap();
        assert_eq!((sent.gaze_x, sent.gaze_y), (0.5, 0.25));
        assert!(!sent.is_blinking);

        for ms in [20, 50, 99] {
            let at = start + Duration::from_millis(ms);
            assert!(pipeline.on_frame(frame, at).await.is_none());
        }
        assert!(pipeline
            .on_frame(frame, start + Duration::from_millis(100))
            .await
            .is_some());

        let received = broadcasts(&mut peer);
        assert_eq!(received.len(), 2);
        assert_eq!(received[0]["userId"], "me");
        assert_eq!(received[0]["gazeX"], 0.5);
    }

    #[tokio::test]
    async fn missing_patches_skip_the_frame() {
        let backend = InMemoryBackend::new();
        let (me, mut peer) = pair(&backend).await;
        let provider = Arc::new(SimulatedGazeProvider::new());
        let _frames = provider.start().await.unwrap();

        let mut pipeline = GazeBroadcastPipeline::new(
            "me".into(),
            provider.clone(),
            me.handle().clone(),
            &Config::default(),
            Viewport::default(),
        );
        let frame = Some(GazeFrame { x: 1.0, y: 1.0 });
        assert!(pipeline.on_frame(frame, Instant::now()).await.is_none());
        assert!(pipeline.on_frame(None, Instant::now()).await.is_none());
        assert!(pipeline.detector().window().is_empty());
        assert!(broadcasts(&mut peer).is_empty());
    }

    #[tokio::test]
    async fn ingest_is_last_value_wins_and_ignores_self() {
        let backend = InMemoryBackend::new();
        let (me, _peer) = pair(&backend).await;
        let pipeline = GazeBroadcastPipeline::new(
            "me".into(),
            Arc::new(SimulatedGazeProvider::new()),
            me.handle().clone(),
            &Config::default(),
            Viewport::default(),
        );
        let mut eyes = EyeTrackingState::new();

        let first = json!({"userId": "peer", "isBlinking": false, "gazeX": 0.1, "gazeY": 0.2});
        let second = json!({"userId": "peer", "isBlinking": true, "gazeX": 0.3, "gazeY": 0.4});
        assert!(pipeline.ingest(&first, &mut eyes));
        assert!(pipeline.ingest(&second, &mut eyes));
        let stored = eyes.get(&"peer".into()).unwrap();
        assert!(stored.is_blinking);
        assert_eq!(stored.gaze_x, 0.3);

        let echo = json!({"userId": "me", "isBlinking": true, "gazeX": 0.0, "gazeY": 0.0});
        assert!(!pipeline.ingest(&echo, &mut eyes));
        assert!(!pipeline.ingest(&json!({"userId": "peer"}), &mut eyes));
        assert_eq!(eyes.len(), 1);
    }
}
