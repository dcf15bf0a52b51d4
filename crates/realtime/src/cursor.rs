// Pointer position broadcast; same shape as the gaze pipeline, slower window.

use crate::backend::ChannelHandle;
use crate::pipeline::{throttled_sender, Sender, Viewport};
use abyss_core::{BroadcastConfig, CursorSample, CursorState, ParticipantId};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct CursorBroadcaster {
    self_id: ParticipantId,
    viewport: Viewport,
    broadcast: Sender<CursorSample>,
}

impl CursorBroadcaster {
    pub fn new(
        self_id: ParticipantId,
        channel: Arc<dyn ChannelHandle>,
        config: &BroadcastConfig,
        viewport: Viewport,
    ) -> Self {
        Self {
            self_id,
            viewport,
            broadcast: throttled_sender(
                channel,
                config.cursor_event.clone(),
                Duration::from_millis(config.cursor_throttle_ms),
            ),
        }
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    /// Pointer moved to screen position (`x`, `y`). Returns the sample if it
    /// was sent.
    pub fn on_pointer(&mut self, x: f64, y: f64, now: Instant) -> Option<CursorSample> {
        let (x, y) = self.viewport.normalize(x, y)?;
        let sample = CursorSample {
            participant_id: self.self_id.clone(),
            x,
            y,
        };
        self.broadcast.call_at(sample.clone(), now).then_some(sample)
    }

    pub fn ingest(&self, payload: &JsonValue, cursors: &mut CursorState) -> bool {
        match serde_json::from_value::<CursorSample>(payload.clone()) {
            Ok(sample) if sample.participant_id != self.self_id => {
                cursors.upsert(sample.participant_id.clone(), sample);
                true
            }
            Ok(_) => false,
            Err(e) => {
                tracing::warn!("Dropping malformed cursor broadcast: {}", e);
                false
            }
        }
    }

    pub fn reset(&mut self) {
        self.broadcast.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ChannelConfig, ChannelEvent, RealtimeBackend};
    use crate::memory::InMemoryBackend;
    use serde_json::json;

    #[tokio::test]
    async fn pointer_moves_use_the_cursor_window() {
        let backend = InMemoryBackend::new();
        let me = backend
            .subscribe("room_1", ChannelConfig::with_presence_key("me".into()))
            .await
            .unwrap();
        let mut peer = backend
            .subscribe("room_1", ChannelConfig::with_presence_key("peer".into()))
            .await
            .unwrap();
        peer.wait_ready(None).await.unwrap();

        let mut cursor = CursorBroadcaster::new(
            "me".into(),
            me.handle().clone(),
            &BroadcastConfig::default(),
            Viewport::new(200.0, 100.0),
        );
        let start = Instant::now();
        assert!(cursor.on_pointer(50.0, 50.0, start).is_some());
        assert!(cursor
            .on_pointer(60.0, 50.0, start + Duration::from_millis(150))
            .is_none());
        let sent = cursor
            .on_pointer(100.0, 25.0, start + Duration::from_millis(200))
            .unwrap();
        assert_eq!((sent.x, sent.y), (0.5, 0.25));

        let events: Vec<_> = std::iter::from_fn(|| peer.try_next_event()).collect();
        assert_eq!(events.len(), 2);
        assert!(events
            .iter()
            .all(|e| matches!(e, ChannelEvent::Broadcast { event, .. } if event == "cursor")));
    }

    #[tokio::test]
    async fn ingest_keeps_latest_peer_position() {
        let backend = InMemoryBackend::new();
        let me = backend
            .subscribe("room_1", ChannelConfig::with_presence_key("me".into()))
            .await
            .unwrap();
        let cursor = CursorBroadcaster::new(
            "me".into(),
            me.handle().clone(),
            &BroadcastConfig::default(),
            Viewport::default(),
        );
        let mut cursors = CursorState::new();
        assert!(cursor.ingest(&json!({"userId": "p", "x": 0.1, "y": 0.1}), &mut cursors));
        assert!(cursor.ingest(&json!({"userId": "p", "x": 0.7, "y": 0.2}), &mut cursors));
        assert!(!cursor.ingest(&json!({"userId": "me", "x": 0.5, "y": 0.5}), &mut cursors));
        assert!(!cursor.ingest(&json!({"x": 0.5}), &mut cursors));
        assert_eq!(cursors.len(), 1);
        assert_eq!(cursors.get(&"p".into()).unwrap().x, 0.7);
    }
}
