// In-process realtime backend.
//
// Channels live in a shared hub. Presence is one record per key; tracking
// emits `join` then `sync` to every subscriber of the channel, leaving emits
// `leave` then `sync` to those who remain. Broadcasts go to every other
// current subscriber and are never replayed.

use crate::backend::{
    ChannelConfig, ChannelEvent, ChannelHandle, RealtimeBackend, RealtimeError, SubscribeStatus,
    Subscription,
};
use abyss_core::{ParticipantId, PresenceRecord, PresenceState};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

struct Member {
    id: u64,
    key: ParticipantId,
    broadcast_self: bool,
    tx: mpsc::UnboundedSender<ChannelEvent>,
}

#[derive(Default)]
struct ChannelRoom {
    members: Vec<Member>,
    presence: PresenceState,
}

impl ChannelRoom {
    fn emit(&self, event: &ChannelEvent) {
        for member in &self.members {
            // receiver may already be gone; it will unsubscribe on drop
            let _ = member.tx.send(event.clone());
        }
    }
}

#[derive(Default)]
struct Hub {
    channels: HashMap<String, ChannelRoom>,
    failing: HashMap<String, SubscribeStatus>,
    silent: HashSet<String>,
    // senders of never-confirmed subscriptions by id, kept so their queues stay open
    stalled: HashMap<u64, mpsc::UnboundedSender<ChannelEvent>>,
    next_id: u64,
}

fn lock(hub: &Mutex<Hub>) -> MutexGuard<'_, Hub> {
    hub.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared in-memory backend; clones talk to the same hub.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    hub: Arc<Mutex<Hub>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subsequent subscriptions to `channel` report `status` instead of confirming
    pub fn fail_channel(&self, channel: &str, status: SubscribeStatus) {
        lock(&self.hub).failing.insert(channel.to_string(), status);
    }

    /// Subsequent subscriptions to `channel` never report any status
    pub fn silence_channel(&self, channel: &str) {
        lock(&self.hub).silent.insert(channel.to_string());
    }

    pub fn presence_state(&self, channel: &str) -> PresenceState {
        lock(&self.hub)
            .channels
            .get(channel)
            .map(|room| room.presence.clone())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        lock(&self.hub)
            .channels
            .get(channel)
            .map_or(0, |room| room.members.len())
    }

    /// Subscriptions still waiting on a status that will never come
    pub fn unconfirmed_count(&self) -> usize {
        lock(&self.hub).stalled.len()
    }

    /// Names of channels with at least one subscriber
    pub fn active_channels(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.hub).channels.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl RealtimeBackend for InMemoryBackend {
    async fn subscribe(
        &self,
        channel: &str,
        config: ChannelConfig,
    ) -> Result<Subscription, RealtimeError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut hub = lock(&self.hub);
        hub.next_id += 1;
        let id = hub.next_id;
        let key = config
            .presence_key
            .unwrap_or_else(|| ParticipantId::new(format!("anon-{}", id)));

        let handle = Arc::new(MemoryChannel {
            hub: self.hub.clone(),
            name: channel.to_string(),
            id,
            key: key.clone(),
        });

        if let Some(status) = hub.failing.get(channel).cloned() {
            tracing::debug!("Subscribe to '{}' rejected with {:?}", channel, status);
            let _ = tx.send(ChannelEvent::Status(status));
            return Ok(Subscription::new(handle, rx));
        }
        if hub.silent.contains(channel) {
            tracing::debug!("Subscribe to '{}' left unconfirmed", channel);
            hub.stalled.insert(id, tx);
            return Ok(Subscription::new(handle, rx));
        }

        let _ = tx.send(ChannelEvent::Status(SubscribeStatus::Subscribed));
        hub.channels
            .entry(channel.to_string())
            .or_default()
            .members
            .push(Member {
                id,
                key,
                broadcast_self: config.broadcast_self,
                tx,
            });
        Ok(Subscription::new(handle, rx))
    }
}

struct MemoryChannel {
    hub: Arc<Mutex<Hub>>,
    name: String,
    id: u64,
    key: ParticipantId,
}

#[async_trait]
impl ChannelHandle for MemoryChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn track(&self, payload: PresenceRecord) -> Result<(), RealtimeError> {
        let mut hub = lock(&self.hub);
        let room = hub
            .channels
            .get_mut(&self.name)
            .filter(|room| room.members.iter().any(|m| m.id == self.id))
            .ok_or_else(|| RealtimeError::NotSubscribed {
                channel: self.name.clone(),
            })?;

        room.presence.upsert(self.key.clone(), payload);
        room.emit(&ChannelEvent::PresenceJoin {
            key: self.key.clone(),
        });
        room.emit(&ChannelEvent::PresenceSync);
        Ok(())
    }

    fn presence_state(&self) -> PresenceState {
        lock(&self.hub)
            .channels
            .get(&self.name)
            .map(|room| room.presence.clone())
            .unwrap_or_default()
    }

    fn send(&self, event: &str, payload: JsonValue) -> Result<(), RealtimeError> {
        let hub = lock(&self.hub);
        let room = hub
            .channels
            .get(&self.name)
            .filter(|room| room.members.iter().any(|m| m.id == self.id))
            .ok_or_else(|| RealtimeError::NotSubscribed {
                channel: self.name.clone(),
            })?;

        let message = ChannelEvent::Broadcast {
            event: event.to_string(),
            payload,
        };
        for member in room
            .members
            .iter()
            .filter(|m| m.id != self.id || m.broadcast_self)
        {
            let _ = member.tx.send(message.clone());
        }
        Ok(())
    }

    fn unsubscribe(&self) {
        let mut hub = lock(&self.hub);
        hub.stalled.remove(&self.id);
        let Some(room) = hub.channels.get_mut(&self.name) else {
            return;
        };
        let before = room.members.len();
        room.members.retain(|m| m.id != self.id);
        if room.members.len() == before {
            return;
        }
        tracing::debug!("Subscriber {} left '{}'", self.id, self.name);

        let key_still_held = room.members.iter().any(|m| m.key == self.key);
        if !key_still_held && room.presence.remove(&self.key).is_some() {
            room.emit(&ChannelEvent::PresenceLeave {
                key: self.key.clone(),
            });
            room.emit(&ChannelEvent::PresenceSync);
        }

        if room.members.is_empty() {
            hub.channels.remove(&self.name);
        }
    }
}
