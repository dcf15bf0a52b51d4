// Room routing.
//
// Discovering -> Joining(1) -> Joined(n), moving on to Joining(n + 1) when a
// room turns out to be full.
//
// Capacity is checked when our own join event arrives, against the
// membership at that moment. Concurrent joiners can push a room past its
// limit for a while; the next joiner who sees the overflow moves on. This is a
// soft limit, not admission control.

use crate::backend::{ChannelConfig, ChannelEvent, RealtimeBackend, SubscribeStatus, Subscription};
use abyss_core::{AbyssError, DomainError, ParticipantId, PresenceRecord, PresenceState, RoomConfig};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum RouterState {
    Idle,
    Discovering,
    Joining(u32),
    Joined(u32),
    ConnectionFailed(String),
}

/// A room we are seated in, plus the discovery subscription that must be
/// released alongside it.
#[derive(Debug)]
pub struct JoinedRoom {
    pub room_number: u32,
    pub room: Subscription,
    pub discovery: Subscription,
    /// Membership observed when our own join was accepted
    pub presence: PresenceState,
}

enum Attempt {
    Accepted(Subscription, PresenceState),
    Full { others: usize },
}

pub struct RoomRouter {
    backend: Arc<dyn RealtimeBackend>,
    self_id: ParticipantId,
    config: RoomConfig,
    state: RouterState,
}

impl RoomRouter {
    pub fn new(backend: Arc<dyn RealtimeBackend>, self_id: ParticipantId, config: RoomConfig) -> Self {
        Self {
            backend,
            self_id,
            config,
            state: RouterState::Idle,
        }
    }

    pub fn state(&self) -> &RouterState {
        &self.state
    }

    fn set_state(&mut self, state: RouterState) {
        tracing::debug!("Router {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    fn timeout(&self) -> Option<Duration> {
        self.config.connect_timeout_ms.map(Duration::from_millis)
    }

    /// Find a room with a free seat, starting at room 1.
    ///
    /// Waits for the discovery channel first; if it never confirms, no room
    /// is attempted and the error is returned with the router left in
    /// `ConnectionFailed`.
    pub async fn join_any_room(&mut self) -> Result<JoinedRoom, AbyssError> {
        self.set_state(RouterState::Discovering);
        let result = self.route().await;
        if let Err(e) = &result {
            tracing::error!("Room routing failed: {}", e);
            self.set_state(RouterState::ConnectionFailed(e.to_string()));
        }
        result
    }

    async fn route(&mut self) -> Result<JoinedRoom, AbyssError> {
        let mut discovery = self
            .backend
            .subscribe(&self.config.discovery_channel, ChannelConfig::default())
            .await?;
        discovery.wait_ready(self.timeout()).await?;
        tracing::info!("Discovery channel '{}' ready", self.config.discovery_channel);

        let mut room_number = 1;
        loop {
            self.set_state(RouterState::Joining(room_number));
            match self.attempt(room_number).await? {
                Attempt::Accepted(room, presence) => {
                    self.set_state(RouterState::Joined(room_number));
                    tracing::info!(
                        "Joined room {} with {} other participant(s)",
                        room_number,
                        presence.count_others(&self.self_id)
                    );
                    return Ok(JoinedRoom {
                        room_number,
                        room,
                        discovery,
                        presence,
                    });
                }
                Attempt::Full { others } => {
                    let overflow = DomainError::CapacityOverflow {
                        room: room_number,
                        others,
                    };
                    tracing::info!("{}, trying room {}", overflow, room_number + 1);
                    room_number += 1;
                }
            }
        }
    }

    async fn attempt(&self, room_number: u32) -> Result<Attempt, AbyssError> {
        let channel = self.config.room_channel(room_number);
        let mut room = self
            .backend
            .subscribe(&channel, ChannelConfig::with_presence_key(self.self_id.clone()))
            .await?;
        room.wait_ready(self.timeout()).await?;
        room.handle()
            .track(PresenceRecord::announce(room_number))
            .await?;

        loop {
            let event = match self.timeout() {
                Some(limit) => tokio::time::timeout(limit, room.next_event())
                    .await
                    .map_err(|_| {
                        AbyssError::connection_failed(channel.as_str(), "timed out waiting for own join")
                    })?,
                None => room.next_event().await,
            };

            match event {
                Some(ChannelEvent::PresenceJoin { key }) if key == self.self_id => {
                    let presence = room.handle().presence_state();
                    let others = presence.count_others(&self.self_id);
                    if others >= self.config.max_others() {
                        // dropping `room` unsubscribes before the next attempt
                        return Ok(Attempt::Full { others });
                    }
                    return Ok(Attempt::Accepted(room, presence));
                }
                Some(ChannelEvent::Status(SubscribeStatus::Subscribed)) => {}
                Some(ChannelEvent::Status(status)) => {
                    return Err(AbyssError::connection_failed(
                        channel.as_str(),
                        format!("{:?}", status),
                    ));
                }
                Some(other) => {
                    tracing::debug!("'{}' before own join: {:?}", channel, other);
                }
                None => {
                    return Err(AbyssError::connection_failed(
                        channel.as_str(),
                        "channel closed before own join",
                    ));
                }
            }
        }
    }
}
