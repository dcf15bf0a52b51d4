// Realtime Backend Interface
//
// A presence/broadcast backend exposes named channels. Each subscription
// yields one ordered queue of typed events (status, presence join/leave/sync,
// broadcast) plus a handle for tracking presence and sending broadcasts.
// Dropping the subscription unsubscribes.

use abyss_core::{AbyssError, ParticipantId, PresenceRecord, PresenceState};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("subscribe to '{channel}' failed: {reason}")]
    SubscribeFailed { channel: String, reason: String },
    #[error("not subscribed to '{channel}'")]
    NotSubscribed { channel: String },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<RealtimeError> for AbyssError {
    fn from(err: RealtimeError) -> Self {
        match err {
            RealtimeError::SubscribeFailed { channel, reason } => {
                AbyssError::connection_failed(channel, reason)
            }
            RealtimeError::NotSubscribed { channel } => {
                AbyssError::transport(channel, "not subscribed")
            }
            RealtimeError::Json(source) => AbyssError::from(source),
        }
    }
}

/// Per-subscription options
#[derive(Debug, Clone, Default)]
pub struct ChannelConfig {
    /// Key this client's presence is stored under
    pub presence_key: Option<ParticipantId>,
    /// Also deliver our own broadcasts back to us
    pub broadcast_self: bool,
}

impl ChannelConfig {
    pub fn with_presence_key(key: ParticipantId) -> Self {
        Self {
            presence_key: Some(key),
            broadcast_self: false,
        }
    }
}

/// Subscription lifecycle status
#[derive(Debug, Clone, PartialEq)]
pub enum SubscribeStatus {
    Subscribed,
    ChannelError(String),
    TimedOut,
    Closed,
}

/// Events delivered on a channel, in backend emission order
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Status(SubscribeStatus),
    /// A member tracked (or re-tracked) its presence
    PresenceJoin { key: ParticipantId },
    /// A member's presence was removed
    PresenceLeave { key: ParticipantId },
    /// Presence state is settled; read the full snapshot
    PresenceSync,
    /// Ephemeral message from another subscriber
    Broadcast { event: String, payload: JsonValue },
}

/// Backend entry point
#[async_trait]
pub trait RealtimeBackend: Send + Sync {
    /// Open a channel subscription. Readiness arrives later as a
    /// `Status(Subscribed)` event.
    async fn subscribe(
        &self,
        channel: &str,
        config: ChannelConfig,
    ) -> Result<Subscription, RealtimeError>;
}

/// Operations on one subscribed channel
#[async_trait]
pub trait ChannelHandle: Send + Sync {
    fn name(&self) -> &str;

    /// Publish our presence payload (replicated, last write wins per key)
    async fn track(&self, payload: PresenceRecord) -> Result<(), RealtimeError>;

    /// Current replicated membership
    fn presence_state(&self) -> PresenceState;

    /// Fire-and-forget broadcast to current subscribers
    fn send(&self, event: &str, payload: JsonValue) -> Result<(), RealtimeError>;

    /// Leave the channel. Must be idempotent.
    fn unsubscribe(&self);
}

/// A live channel subscription; unsubscribes on drop.
pub struct Subscription {
    handle: Arc<dyn ChannelHandle>,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl Subscription {
    pub fn new(handle: Arc<dyn ChannelHandle>, events: mpsc::UnboundedReceiver<ChannelEvent>) -> Self {
        Self { handle, events }
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    pub fn handle(&self) -> &Arc<dyn ChannelHandle> {
        &self.handle
    }

    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    /// Next already-queued event, without waiting
    pub fn try_next_event(&mut self) -> Option<ChannelEvent> {
        self.events.try_recv().ok()
    }

    /// Wait for the subscription to be confirmed. `None` waits indefinitely.
    pub async fn wait_ready(&mut self, timeout: Option<Duration>) -> Result<(), AbyssError> {
        let channel = self.name().to_string();
        let wait = async {
            loop {
                match self.events.recv().await {
                    Some(ChannelEvent::Status(SubscribeStatus::Subscribed)) => return Ok(()),
                    Some(ChannelEvent::Status(status)) => {
                        return Err(AbyssError::connection_failed(
                            channel.as_str(),
                            format!("{:?}", status),
                        ))
                    }
                    Some(other) => {
                        tracing::debug!("Ignoring {:?} on '{}' before subscribe", other, channel);
                    }
                    None => {
                        return Err(AbyssError::connection_failed(
                            channel.as_str(),
                            "channel closed before subscribe",
                        ))
                    }
                }
            }
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await.map_err(|_| {
                AbyssError::connection_failed(channel.as_str(), "timed out waiting for subscribe")
            })?,
            None => wait.await,
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.name())
            .finish_non_exhaustive()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.unsubscribe();
    }
}
