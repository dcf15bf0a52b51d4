// Seat Stability Test
//
// Drives the reconciler through a long join/leave history and checks that
// nobody still present ever moves.

use abyss_core::{
    ParticipantId, PresenceEvent, PresenceReconciler, PresenceRecord, PresenceState, Seat,
};
use std::collections::HashMap;

fn record(second: u32) -> PresenceRecord {
    let stamp = format!("2024-01-01T00:{:02}:{:02}.000Z", second / 60, second % 60);
    PresenceRecord::announce(1).with_joined_at(stamp)
}

#[test]
fn test_seats_are_stable_for_continuously_present_members() {
    let mut reconciler = PresenceReconciler::new("me".into());
    let mut membership = PresenceState::new();
    membership.upsert("me".into(), record(0));

    let mut first_seen: HashMap<ParticipantId, Seat> = HashMap::new();
    let mut clock = 1;

    // (joins, leaves) per step
    let steps: Vec<(Vec<&str>, Vec<&str>)> = vec![
        (vec!["a", "b", "c"], vec![]),
        (vec!["d"], vec!["b"]),
        (vec!["e", "f"], vec![]),
        (vec![], vec!["a", "e"]),
        (vec!["g", "h", "b"], vec![]),
        (vec!["i"], vec!["c"]),
        (vec![], vec!["d", "f", "g"]),
        (vec!["j", "k"], vec![]),
    ];

    for (joins, leaves) in steps {
        for id in joins {
            membership.upsert(id.into(), record(clock));
            clock += 1;
            let view = reconciler.handle(PresenceEvent::Join, &membership).unwrap();
            assert_eq!(view.len(), membership.len());
        }
        for id in leaves {
            let id = ParticipantId::from(id);
            membership.remove(&id);
            first_seen.remove(&id);
        }
        let view = reconciler.handle(PresenceEvent::Sync, &membership).unwrap();

        let others = view.excluding(&"me".into());
        for participant in others.iter() {
            let seat = *first_seen
                .entry(participant.id.clone())
                .or_insert(participant.seat);
            assert_eq!(seat, participant.seat, "{} moved", participant.id);
        }
        let mut taken: Vec<Seat> = others.iter().map(|p| p.seat).collect();
        taken.sort_by_key(|seat| seat.index());
        taken.dedup();
        assert_eq!(taken.len(), others.len(), "two peers share a seat");
        assert_eq!(reconciler.seats().len(), membership.len());
    }
}

#[test]
fn test_three_visitors_fill_the_first_slots_in_join_order() {
    let membership: PresenceState = vec![
        (ParticipantId::from("a"), record(0)),
        (ParticipantId::from("b"), record(1)),
        (ParticipantId::from("c"), record(2)),
        (ParticipantId::from("me"), record(3)),
    ]
    .into_iter()
    .collect();

    let mut reconciler = PresenceReconciler::new("me".into());
    let view = reconciler.on_sync(&membership).unwrap();
    let grid = view.excluding(&"me".into());

    let seats: Vec<(&str, Seat)> = grid.iter().map(|p| (p.id.as_str(), p.seat)).collect();
    assert_eq!(
        seats,
        vec![
            ("a", Seat::Center),
            ("b", Seat::MiddleLeft),
            ("c", Seat::MiddleRight),
        ]
    );
}
