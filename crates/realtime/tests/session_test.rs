// Room Session Tests
//
// Presence reconciliation, telemetry ingestion and teardown driven through
// the in-memory backend.

use abyss_core::{Config, PresenceRecord, RoomConfig, Seat};
use abyss_realtime::{
    AbyssClient, CalibrationState, ChannelConfig, ChannelEvent, GazeFrame, GazeService,
    InMemoryBackend, RealtimeBackend, RoomRouter, RoomSession, RoomSnapshot, SessionCommand,
    SessionExit, SimulatedGazeProvider, SubscribeStatus, Subscription, Viewport,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

async fn tracked_member(backend: &InMemoryBackend, id: &str, seconds: u32) -> Subscription {
    let mut sub = backend
        .subscribe("room_1", ChannelConfig::with_presence_key(id.into()))
        .await
        .unwrap();
    sub.wait_ready(None).await.unwrap();
    let joined_at = format!("2024-01-01T00:00:{:02}.000Z", seconds);
    sub.handle()
        .track(PresenceRecord::announce(1).with_joined_at(joined_at))
        .await
        .unwrap();
    sub
}

async fn join_session(
    backend: &InMemoryBackend,
) -> (RoomSession, watch::Receiver<RoomSnapshot>) {
    let mut router = RoomRouter::new(Arc::new(backend.clone()), "me".into(), RoomConfig::default());
    let joined = router.join_any_room().await.unwrap();
    let (tx, rx) = watch::channel(RoomSnapshot::default());
    let session = RoomSession::new(
        joined,
        "me".into(),
        Arc::new(SimulatedGazeProvider::new()),
        &Config::default(),
        Viewport::default(),
        tx,
    );
    (session, rx)
}

fn seat(session: &RoomSession, id: &str) -> Option<Seat> {
    session.view().seat_of(&id.into())
}

#[tokio::test]
async fn test_seats_survive_churn() {
    let backend = InMemoryBackend::new();
    let (mut session, snapshots) = join_session(&backend).await;
    assert_eq!(session.room_number(), 1);

    let _a = tracked_member(&backend, "a", 1).await;
    let b = tracked_member(&backend, "b", 2).await;
    let _c = tracked_member(&backend, "c", 3).await;
    assert!(session.drain_events().is_none());

    assert_eq!(seat(&session, "a"), Some(Seat::Center));
    assert_eq!(seat(&session, "b"), Some(Seat::MiddleLeft));
    assert_eq!(seat(&session, "c"), Some(Seat::MiddleRight));
    assert_eq!(snapshots.borrow().participants.len(), 3);
    assert!(!snapshots.borrow().participants.contains(&"me".into()));

    drop(b);
    session.drain_events();
    assert_eq!(seat(&session, "b"), None);
    assert_eq!(seat(&session, "a"), Some(Seat::Center));
    assert_eq!(seat(&session, "c"), Some(Seat::MiddleRight));

    let _d = tracked_member(&backend, "d", 4).await;
    session.drain_events();
    assert_eq!(seat(&session, "a"), Some(Seat::Center));
    assert_eq!(seat(&session, "c"), Some(Seat::MiddleRight));
    let d_seat = seat(&session, "d").unwrap();
    assert_ne!(d_seat, Seat::Center);
    assert_ne!(d_seat, Seat::MiddleRight);
}

#[tokio::test]
async fn test_rejoining_member_gets_a_fresh_seat() {
    let backend = InMemoryBackend::new();
    let (mut session, _snapshots) = join_session(&backend).await;

    let a = tracked_member(&backend, "a", 1).await;
    let _b = tracked_member(&backend, "b", 2).await;
    session.drain_events();
    assert_eq!(seat(&session, "a"), Some(Seat::Center));

    drop(a);
    session.drain_events();
    let _a = tracked_member(&backend, "a", 5).await;
    session.drain_events();
    // b keeps middleLeft; a is new to the cache and takes the next free slot
    assert_eq!(seat(&session, "b"), Some(Seat::MiddleLeft));
    assert_eq!(seat(&session, "a"), Some(Seat::MiddleRight));
}

#[tokio::test]
async fn test_retracking_does_not_move_anyone() {
    let backend = InMemoryBackend::new();
    let (mut session, _snapshots) = join_session(&backend).await;

    let a = tracked_member(&backend, "a", 1).await;
    let _b = tracked_member(&backend, "b", 2).await;
    session.drain_events();
    let before = session.view().clone();

    a.handle()
        .track(PresenceRecord::announce(1).with_joined_at("2024-01-01T00:00:01.000Z"))
        .await
        .unwrap();
    session.drain_events();
    assert_eq!(session.view(), &before);
}

#[tokio::test]
async fn test_malformed_presence_keeps_previous_view() {
    let backend = InMemoryBackend::new();
    let (mut session, snapshots) = join_session(&backend).await;
    let _a = tracked_member(&backend, "a", 1).await;
    session.drain_events();
    let before = snapshots.borrow().clone();

    let mut bad = backend
        .subscribe("room_1", ChannelConfig::with_presence_key("bad".into()))
        .await
        .unwrap();
    bad.wait_ready(None).await.unwrap();
    bad.handle().track(PresenceRecord::default()).await.unwrap();
    assert!(session.drain_events().is_none());
    assert_eq!(*snapshots.borrow(), before);
    assert_eq!(seat(&session, "bad"), None);

    bad.handle()
        .track(PresenceRecord::announce(1).with_joined_at("2024-01-01T00:00:09.000Z"))
        .await
        .unwrap();
    session.drain_events();
    assert_eq!(seat(&session, "bad"), Some(Seat::MiddleLeft));
}

#[tokio::test]
async fn test_peer_telemetry_is_ingested_and_pruned_on_sync() {
    let backend = InMemoryBackend::new();
    let (mut session, snapshots) = join_session(&backend).await;
    let a = tracked_member(&backend, "a", 1).await;
    let _b = tracked_member(&backend, "b", 2).await;

    a.handle()
        .send(
            "eye_tracking",
            json!({"userId": "a", "isBlinking": true, "gazeX": 0.25, "gazeY": 0.75}),
        )
        .unwrap();
    a.handle()
        .send("cursor", json!({"userId": "a", "x": 0.5, "y": 0.5}))
        .unwrap();
    a.handle().send("unrelated", json!({"userId": "a"})).unwrap();
    session.drain_events();

    let eye = session.eyes().get(&"a".into()).unwrap();
    assert!(eye.is_blinking);
    assert_eq!(eye.gaze_y, 0.75);
    assert_eq!(session.cursors().len(), 1);
    assert_eq!(snapshots.borrow().eyes.len(), 1);

    drop(a);
    session.drain_events();
    assert!(session.eyes().is_empty());
    assert!(session.cursors().is_empty());
    assert_eq!(snapshots.borrow().participants.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_client_end_to_end() {
    let backend = InMemoryBackend::new();
    let mut peer = tracked_member(&backend, "a", 1).await;

    let provider = Arc::new(SimulatedGazeProvider::new());
    let service = GazeService::new();
    let mut client = AbyssClient::new(
        Config::default(),
        Arc::new(backend.clone()),
        provider.clone(),
        service.clone(),
    )
    .with_participant_id("me".into())
    .with_viewport(Viewport::new(1000.0, 1000.0));

    let (commands, mut rx) = mpsc::unbounded_channel();
    // provider not started yet
    assert!(client.run(&mut rx).await.is_err());

    client.start().await.unwrap();
    client.calibrate_all().unwrap();
    assert!(client.flags().borrow().calibrated);
    assert_eq!(provider.recorded_positions().len(), 5);

    let mut flags = client.flags();
    let mut snapshots = client.snapshots();
    let task = tokio::spawn(async move {
        let exit = client.run(&mut rx).await;
        (client, exit)
    });

    flags.wait_for(|f| f.joined && f.connected).await.unwrap();
    assert_eq!(backend.presence_state("room_1").len(), 2);

    provider.set_brightness(90, 110);
    assert!(provider.push_frame(Some(GazeFrame { x: 250.0, y: 500.0 })));
    tokio::time::sleep(Duration::from_millis(10)).await;

    let sent: Vec<_> = std::iter::from_fn(|| peer.try_next_event())
        .filter_map(|event| match event {
            ChannelEvent::Broadcast { event, payload } if event == "eye_tracking" => Some(payload),
            _ => None,
        })
        .collect();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["userId"], "me");
    assert_eq!(sent[0]["gazeX"], 0.25);
    assert_eq!(sent[0]["isBlinking"], false);

    peer.handle()
        .send(
            "eye_tracking",
            json!({"userId": "a", "isBlinking": false, "gazeX": 0.1, "gazeY": 0.9}),
        )
        .unwrap();
    snapshots
        .wait_for(|s| s.eyes.get(&"a".into()).is_some())
        .await
        .unwrap();
    assert_eq!(snapshots.borrow().room_number, Some(1));

    commands.send(SessionCommand::Leave).unwrap();
    let (client, exit) = task.await.unwrap();
    assert_eq!(exit.unwrap(), SessionExit::Left);

    assert!(!provider.is_running());
    assert!(!service.is_active());
    assert!(!backend.presence_state("room_1").contains(&"me".into()));
    assert_eq!(backend.subscriber_count("room_discovery"), 0);
    let flags = *client.flags().borrow();
    assert!(!flags.joined && !flags.connected && flags.calibrated);
}

fn build_client(
    backend: &InMemoryBackend,
    provider: &Arc<SimulatedGazeProvider>,
    service: &GazeService,
) -> AbyssClient {
    AbyssClient::new(
        Config::default(),
        Arc::new(backend.clone()),
        provider.clone(),
        service.clone(),
    )
    .with_participant_id("me".into())
    .with_viewport(Viewport::new(1000.0, 1000.0))
}

#[tokio::test]
async fn test_client_releases_provider_when_discovery_fails() {
    let backend = InMemoryBackend::new();
    backend.fail_channel("room_discovery", SubscribeStatus::ChannelError("down".into()));
    let provider = Arc::new(SimulatedGazeProvider::new());
    let service = GazeService::new();
    let mut client = build_client(&backend, &provider, &service);

    client.start().await.unwrap();
    client.calibrate_all().unwrap();
    assert!(provider.is_running());
    assert!(service.is_active());

    let (_commands, mut rx) = mpsc::unbounded_channel();
    let err = client.run(&mut rx).await.unwrap_err();
    assert!(err.is_connection_failure());

    assert!(!provider.is_running());
    assert!(!service.is_active());
    assert_eq!(backend.subscriber_count("room_1"), 0);
    assert_eq!(backend.subscriber_count("room_discovery"), 0);
    assert!(backend.active_channels().is_empty());
    let flags = *client.flags().borrow();
    assert!(!flags.joined && !flags.connected);

    // the camera is free for another client
    let mut other = build_client(&backend, &Arc::new(SimulatedGazeProvider::new()), &service);
    other.start().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_recalibrate_leaves_room_and_resets_calibration() {
    let backend = InMemoryBackend::new();
    let _peer = tracked_member(&backend, "a", 1).await;
    let provider = Arc::new(SimulatedGazeProvider::new());
    let service = GazeService::new();
    let mut client = build_client(&backend, &provider, &service);

    client.start().await.unwrap();
    client.calibrate_all().unwrap();
    let mut flags = client.flags();
    let (commands, mut rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move {
        let exit = client.run(&mut rx).await;
        (client, rx, exit)
    });

    flags.wait_for(|f| f.joined).await.unwrap();
    commands.send(SessionCommand::Recalibrate).unwrap();
    let (mut client, mut rx, exit) = task.await.unwrap();
    assert_eq!(exit.unwrap(), SessionExit::Recalibrate);

    assert_eq!(
        client.calibration().state(),
        CalibrationState::Calibrating { point: 0 }
    );
    assert!(!client.flags().borrow().calibrated);
    assert!(provider.recorded_positions().is_empty());
    assert!(!provider.is_running());
    assert!(!backend.presence_state("room_1").contains(&"me".into()));

    // rejoining needs a fresh calibration
    client.start().await.unwrap();
    assert!(client.run(&mut rx).await.is_err());
    assert!(!service.is_active());

    client.start().await.unwrap();
    client.calibrate_all().unwrap();
    assert_eq!(provider.recorded_positions().len(), 5);
    let mut flags = client.flags();
    let task = tokio::spawn(async move { client.run(&mut rx).await });
    flags.wait_for(|f| f.joined && f.calibrated).await.unwrap();
    assert!(backend.presence_state("room_1").contains(&"me".into()));

    commands.send(SessionCommand::Leave).unwrap();
    assert_eq!(task.await.unwrap().unwrap(), SessionExit::Left);
}
