//! Presence reconciliation
//!
//! Turns the backend's raw membership into an ordered, seated `RoomView`.
//! Runs identically for `join` and `sync`; a sync additionally forgets seats
//! of members that are gone.
//!
//! Members whose presence payload already carries a seat are placed first,
//! verbatim. Everyone else gets a seat from the `SeatTable`, computing one
//! only on first sight. A client re-tracking its payload therefore never
//! moves on screen.

use crate::error::AbyssError;
use crate::model::{ParticipantId, PresenceState, RoomView, Seat, SeatedParticipant};
use crate::seat::{SeatAssigner, SeatTable};

/// Which presence event triggered a reconciliation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceEvent {
    Join,
    Sync,
}

struct Candidate<'a> {
    id: &'a ParticipantId,
    joined_at: &'a str,
    seat: Option<Seat>,
    room: Option<u32>,
}

pub struct PresenceReconciler {
    self_id: ParticipantId,
    seats: SeatTable,
}

impl PresenceReconciler {
    pub fn new(self_id: ParticipantId) -> Self {
        Self {
            self_id,
            seats: SeatTable::new(),
        }
    }

    pub fn self_id(&self) -> &ParticipantId {
        &self.self_id
    }

    pub fn seats(&self) -> &SeatTable {
        &self.seats
    }

    /// Dispatch on the event kind.
    pub fn handle(
        &mut self,
        event: PresenceEvent,
        membership: &PresenceState,
    ) -> Result<RoomView, AbyssError> {
        match event {
            PresenceEvent::Join => self.reconcile(membership),
            PresenceEvent::Sync => self.on_sync(membership),
        }
    }

    /// Full snapshot: rebuild the view, then drop seats of departed members.
    pub fn on_sync(&mut self, membership: &PresenceState) -> Result<RoomView, AbyssError> {
        let view = self.reconcile(membership)?;
        let evicted = self.seats.retain(membership);
        if !evicted.is_empty() {
            tracing::debug!("Released seats of {} departed participant(s)", evicted.len());
        }
        Ok(view)
    }

    /// Build a fresh view. Fails without touching the seat table when any
    /// member lacks its join timestamp.
    pub fn reconcile(&mut self, membership: &PresenceState) -> Result<RoomView, AbyssError> {
        let mut seated = Vec::new();
        let mut unseated = Vec::new();

        for (id, records) in membership.iter() {
            let record = records
                .first()
                .ok_or_else(|| AbyssError::malformed_presence(id.as_str(), "no presence payload"))?;
            let joined_at = record
                .joined_at
                .as_deref()
                .filter(|ts| !ts.trim().is_empty())
                .ok_or_else(|| {
                    AbyssError::malformed_presence(id.as_str(), "missing join timestamp")
                })?;
            let candidate = Candidate {
                id,
                joined_at,
                seat: record.seat,
                room: record.room,
            };
            if candidate.seat.is_some() {
                seated.push(candidate);
            } else {
                unseated.push(candidate);
            }
        }

        // sort_by is stable: equal timestamps keep membership order
        seated.sort_by(|a, b| a.joined_at.cmp(b.joined_at));
        unseated.sort_by(|a, b| a.joined_at.cmp(b.joined_at));

        // seats already taken this pass, wherever their holder sorts
        let held: Vec<Seat> = seated
            .iter()
            .chain(unseated.iter())
            .filter(|c| *c.id != self.self_id)
            .filter_map(|c| c.seat.or_else(|| self.seats.get(c.id)))
            .collect();

        let mut placed: Vec<SeatedParticipant> = Vec::with_capacity(membership.len());
        for candidate in seated.into_iter().chain(unseated) {
            let seat = match candidate.seat.or_else(|| self.seats.get(candidate.id)) {
                Some(seat) => seat,
                None => {
                    let seat = self.next_seat(candidate.id, &placed, &held);
                    self.seats.insert(candidate.id.clone(), seat);
                    seat
                }
            };
            placed.push(SeatedParticipant {
                id: candidate.id.clone(),
                joined_at: candidate.joined_at.to_string(),
                seat,
                room: candidate.room,
            });
        }

        Ok(RoomView::new(placed))
    }

    /// Position is the number of non-self members already placed. If that
    /// slot is taken, either by someone placed earlier or by a member later in
    /// the order who kept a seat, take the next free slot after it, then the
    /// first free one before it.
    fn next_seat(&self, id: &ParticipantId, placed: &[SeatedParticipant], held: &[Seat]) -> Seat {
        let others: Vec<Seat> = placed
            .iter()
            .filter(|p| p.id != self.self_id)
            .map(|p| p.seat)
            .collect();
        let position_index = others.len();
        let is_free = |index: &usize| {
            let seat = Seat::ALL[*index];
            !others.contains(&seat) && !held.contains(&seat)
        };

        let index = (position_index..Seat::COUNT)
            .find(is_free)
            .or_else(|| (0..position_index.min(Seat::COUNT)).find(is_free))
            .unwrap_or(position_index);
        SeatAssigner::assign(id, index)
    }
}
