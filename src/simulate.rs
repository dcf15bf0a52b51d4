// Simulated visitors.
//
// Every visitor is a full client (provider session, calibration, routing,
// room session) sharing one in-memory backend. Visitors arrive a few
// milliseconds apart, look around, blink now and then, move the pointer,
// and leave together when time is up.

use abyss_core::{Config, ParticipantId, Seat};
use abyss_realtime::{
    AbyssClient, GazeFrame, GazeService, InMemoryBackend, RoomSnapshot, SessionCommand,
    SessionExit, SimulatedGazeProvider, Viewport,
};
use anyhow::Context;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

const ARRIVAL_GAP: Duration = Duration::from_millis(40);
const FRAME_INTERVAL: Duration = Duration::from_millis(33);
const VIEWPORT: Viewport = Viewport {
    width: 1280.0,
    height: 800.0,
};

/// What one visitor saw just before leaving
#[derive(Debug)]
pub struct VisitorReport {
    pub id: ParticipantId,
    pub snapshot: RoomSnapshot,
    pub exit: SessionExit,
}

pub async fn run(config: Config, visitors: usize, seconds: u64) -> anyhow::Result<Vec<VisitorReport>> {
    let backend = InMemoryBackend::new();
    let stay = Duration::from_secs(seconds);

    let mut tasks = Vec::with_capacity(visitors);
    for index in 0..visitors {
        let config = config.clone();
        let backend = backend.clone();
        // everyone leaves at the same moment
        let remaining = stay + ARRIVAL_GAP * (visitors - index) as u32;
        tasks.push(tokio::spawn(visit(index, config, backend, remaining)));
        tokio::time::sleep(ARRIVAL_GAP).await;
    }

    let mut reports = Vec::with_capacity(visitors);
    for task in tasks {
        reports.push(task.await.context("visitor task panicked")??);
    }
    info!("Channels still open after teardown: {:?}", backend.active_channels());
    Ok(reports)
}

async fn visit(
    index: usize,
    config: Config,
    backend: InMemoryBackend,
    stay: Duration,
) -> anyhow::Result<VisitorReport> {
    let id = ParticipantId::new(format!("visitor-{:02}", index));
    let provider = Arc::new(SimulatedGazeProvider::new());
    let mut client = AbyssClient::new(config, Arc::new(backend), provider.clone(), GazeService::new())
        .with_participant_id(id.clone())
        .with_viewport(VIEWPORT);

    client.start().await?;
    client.calibrate_all()?;

    let (commands, mut rx) = mpsc::unbounded_channel();
    let driver = tokio::spawn(drive(index, provider, commands, client.snapshots(), stay));
    let exit = client.run(&mut rx).await?;
    let snapshot = driver.await.context("visitor driver panicked")?;

    debug!("{} finished with {:?}", id, exit);
    Ok(VisitorReport { id, snapshot, exit })
}

/// Feed frames and pointer moves until `stay` elapses, then leave. Returns
/// the last snapshot seen before leaving.
async fn drive(
    index: usize,
    provider: Arc<SimulatedGazeProvider>,
    commands: mpsc::UnboundedSender<SessionCommand>,
    snapshots: watch::Receiver<RoomSnapshot>,
    stay: Duration,
) -> RoomSnapshot {
    let deadline = tokio::time::Instant::now() + stay;
    let mut ticker = tokio::time::interval(FRAME_INTERVAL);
    let phase = index as f64 * 0.7;
    let mut tick: u64 = 0;

    while tokio::time::Instant::now() < deadline {
        ticker.tick().await;
        tick += 1;

        let t = tick as f64 * FRAME_INTERVAL.as_secs_f64() + phase;
        // closed lids read brighter; blink for ~130ms roughly every 3s
        let blinking = (tick + index as u64 * 11) % 90 < 4;
        let level = if blinking { 190 } else { 95 };
        provider.set_brightness(level, level);

        let x = VIEWPORT.width * (0.5 + 0.4 * t.sin());
        let y = VIEWPORT.height * (0.5 + 0.3 * (t * 0.6).cos());
        provider.push_frame(Some(GazeFrame { x, y }));

        if tick % 3 == 0 && commands.send(SessionCommand::Pointer { x, y }).is_err() {
            break;
        }
    }

    let last = snapshots.borrow().clone();
    let _ = commands.send(SessionCommand::Leave);
    last
}

/// Print each room's grid as seen by its members.
pub fn print_layout(reports: &[VisitorReport]) {
    let mut rooms: BTreeMap<u32, Vec<&VisitorReport>> = BTreeMap::new();
    for report in reports {
        let room = report.snapshot.room_number.unwrap_or(0);
        rooms.entry(room).or_default().push(report);
    }

    for (room, members) in rooms {
        if room == 0 {
            for report in members {
                println!("{} never joined a room ({:?})", report.id, report.exit);
            }
            continue;
        }
        println!("Room {} ({} visitor(s))", room, members.len());
        for report in members {
            let seats: Vec<String> = report
                .snapshot
                .participants
                .iter()
                .map(|p| format!("{}@{}", p.id, p.seat))
                .collect();
            let blinking = report
                .snapshot
                .eyes
                .values()
                .filter(|sample| sample.is_blinking)
                .count();
            println!(
                "  {} sees [{}], {} blinking",
                report.id,
                seats.join(", "),
                blinking
            );
        }
    }
    println!("{} seats per room", Seat::COUNT);
}
