//! Seat assignment
//!
//! `SeatAssigner` maps a 0-based position to a layout slot. `SeatTable` is the
//! reconciler-side memory that makes the choice stick for as long as the
//! participant stays in the room.

use crate::model::{ParticipantId, PresenceState, Seat};
use std::collections::HashMap;

pub struct SeatAssigner;

impl SeatAssigner {
    /// Seat for `position_index`; positions past the last slot fall back to
    /// `Seat::Center`.
    pub fn assign(participant: &ParticipantId, position_index: usize) -> Seat {
        match Seat::from_index(position_index) {
            Some(seat) => seat,
            None => {
                tracing::warn!(
                    "No seat at position {} for {}, clamping to center",
                    position_index,
                    participant
                );
                Seat::Center
            }
        }
    }
}

/// Cached `participant -> seat` assignments for one room session.
#[derive(Debug, Clone, Default)]
pub struct SeatTable {
    seats: HashMap<ParticipantId, Seat>,
}

impl SeatTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &ParticipantId) -> Option<Seat> {
        self.seats.get(id).copied()
    }

    pub fn insert(&mut self, id: ParticipantId, seat: Seat) {
        self.seats.insert(id, seat);
    }

    /// Forget every participant that is not in `present`; returns who was dropped.
    pub fn retain(&mut self, present: &PresenceState) -> Vec<ParticipantId> {
        let mut evicted = Vec::new();
        self.seats.retain(|id, _| {
            let keep = present.contains(id);
            if !keep {
                evicted.push(id.clone());
            }
            keep
        });
        evicted
    }

    pub fn clear(&mut self) {
        self.seats.clear();
    }

    pub fn len(&self) -> usize {
        self.seats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seats.is_empty()
    }
}
