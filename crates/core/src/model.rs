//! Room data model
//!
//! Identity, seats, replicated presence records and the ephemeral per-peer
//! telemetry maps. Presence is what the backend replicates; everything keyed
//! by `ParticipantId` in `PeerState` is local, last-value-wins memory.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Opaque per-session participant identifier, used as the presence key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Fresh random id for a new client session
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ParticipantId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// One of the nine fixed layout slots, in assignment order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Seat {
    Center,
    MiddleLeft,
    MiddleRight,
    TopCenter,
    BottomCenter,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Seat {
    pub const COUNT: usize = 9;

    pub const ALL: [Seat; Seat::COUNT] = [
        Seat::Center,
        Seat::MiddleLeft,
        Seat::MiddleRight,
        Seat::TopCenter,
        Seat::BottomCenter,
        Seat::TopLeft,
        Seat::TopRight,
        Seat::BottomLeft,
        Seat::BottomRight,
    ];

    pub fn from_index(index: usize) -> Option<Seat> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Seat::Center => "center",
            Seat::MiddleLeft => "middleLeft",
            Seat::MiddleRight => "middleRight",
            Seat::TopCenter => "topCenter",
            Seat::BottomCenter => "bottomCenter",
            Seat::TopLeft => "topLeft",
            Seat::TopRight => "topRight",
            Seat::BottomLeft => "bottomLeft",
            Seat::BottomRight => "bottomRight",
        }
    }
}

impl fmt::Display for Seat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Payload a client tracks into room presence.
///
/// `joined_at` is an ISO-8601 UTC timestamp; it is optional on the wire only
/// so that a producer omitting it can be detected and rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresenceRecord {
    #[serde(rename = "online_at", default, skip_serializing_if = "Option::is_none")]
    pub joined_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seat: Option<Seat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<u32>,
}

impl PresenceRecord {
    /// Self-announcement for `room`, stamped with the current time
    pub fn announce(room: u32) -> Self {
        Self {
            joined_at: Some(iso_timestamp()),
            seat: None,
            room: Some(room),
        }
    }

    pub fn with_joined_at(mut self, joined_at: impl Into<String>) -> Self {
        self.joined_at = Some(joined_at.into());
        self
    }

    pub fn with_seat(mut self, seat: Seat) -> Self {
        self.seat = Some(seat);
        self
    }
}

/// Millisecond-precision UTC timestamp; sorts lexicographically.
pub fn iso_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Raw room membership as the backend reports it.
///
/// Keys keep their insertion order, which is the tie-break for members that
/// joined at the same timestamp.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresenceState {
    entries: Vec<(ParticipantId, Vec<PresenceRecord>)>,
}

impl PresenceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the records held under `key`. Returns true if the key is new.
    pub fn upsert(&mut self, key: ParticipantId, record: PresenceRecord) -> bool {
        self.upsert_all(key, vec![record])
    }

    pub fn upsert_all(&mut self, key: ParticipantId, records: Vec<PresenceRecord>) -> bool {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => {
                *existing = records;
                false
            }
            None => {
                self.entries.push((key, records));
                true
            }
        }
    }

    pub fn remove(&mut self, key: &ParticipantId) -> Option<Vec<PresenceRecord>> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn get(&self, key: &ParticipantId) -> Option<&[PresenceRecord]> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, records)| records.as_slice())
    }

    pub fn contains(&self, key: &ParticipantId) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &ParticipantId> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ParticipantId, &[PresenceRecord])> {
        self.entries.iter().map(|(k, v)| (k, v.as_slice()))
    }

    /// Members other than `self_id`
    pub fn count_others(&self, self_id: &ParticipantId) -> usize {
        self.keys().filter(|k| *k != self_id).count()
    }
}

impl FromIterator<(ParticipantId, PresenceRecord)> for PresenceState {
    fn from_iter<I: IntoIterator<Item = (ParticipantId, PresenceRecord)>>(iter: I) -> Self {
        let mut state = PresenceState::new();
        for (key, record) in iter {
            state.upsert(key, record);
        }
        state
    }
}

/// A member with a settled seat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatedParticipant {
    pub id: ParticipantId,
    pub joined_at: String,
    pub seat: Seat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<u32>,
}

/// Ordered, seated room membership. Rebuilt wholesale on every event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomView {
    participants: Vec<SeatedParticipant>,
}

impl RoomView {
    pub fn new(participants: Vec<SeatedParticipant>) -> Self {
        Self { participants }
    }

    pub fn participants(&self) -> &[SeatedParticipant] {
        &self.participants
    }

    pub fn iter(&self) -> impl Iterator<Item = &SeatedParticipant> {
        self.participants.iter()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.participants.iter().any(|p| &p.id == id)
    }

    pub fn seat_of(&self, id: &ParticipantId) -> Option<Seat> {
        self.participants
            .iter()
            .find(|p| &p.id == id)
            .map(|p| p.seat)
    }

    /// Same ordering with `id` removed; this is what the grid renders.
    pub fn excluding(&self, id: &ParticipantId) -> RoomView {
        RoomView {
            participants: self
                .participants
                .iter()
                .filter(|p| &p.id != id)
                .cloned()
                .collect(),
        }
    }
}

/// Gaze telemetry relayed over the ephemeral broadcast channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GazeSample {
    #[serde(rename = "userId")]
    pub participant_id: ParticipantId,
    pub is_blinking: bool,
    pub gaze_x: f64,
    pub gaze_y: f64,
}

/// Pointer position relayed over the ephemeral broadcast channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorSample {
    #[serde(rename = "userId")]
    pub participant_id: ParticipantId,
    pub x: f64,
    pub y: f64,
}

/// Last-value-wins map of per-peer ephemeral state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeerState<T> {
    values: HashMap<ParticipantId, T>,
}

impl<T> Default for PeerState<T> {
    fn default() -> Self {
        Self {
            values: HashMap::new(),
        }
    }
}

impl<T> PeerState<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&mut self, id: ParticipantId, value: T) {
        self.values.insert(id, value);
    }

    pub fn get(&self, id: &ParticipantId) -> Option<&T> {
        self.values.get(id)
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.values.values()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Drop entries for participants missing from `present`; returns them.
    pub fn retain_present(&mut self, present: &PresenceState) -> Vec<ParticipantId> {
        let departed: Vec<ParticipantId> = self
            .values
            .keys()
            .filter(|id| !present.contains(id))
            .cloned()
            .collect();
        for id in &departed {
            self.values.remove(id);
        }
        departed
    }
}

pub type EyeTrackingState = PeerState<GazeSample>;
pub type CursorState = PeerState<CursorSample>;
