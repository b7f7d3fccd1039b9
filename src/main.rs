//! Headless movement demo
//!
//! Runs a scripted course (walk, jump onto a wall-run, wall-run jump across to
//! a second wall, teleport, jetpack) with a predicting client and an
//! authoritative server in lock-step, moves and acks delayed by a fixed
//! latency, and reports how the reconciliation went.
//!
//! Usage: `movement-demo [tuning.(json|ron)] [--desync]`

use anyhow::{Context, Result};
use bevy::prelude::*;
use std::collections::{HashMap, VecDeque};

use movement_core::abilities::{AbilityEvent, AbilityInput};
use movement_core::geometry::scene::SceneChannels;
use movement_core::logging::{init_tracing, LogLevel, TimingSpan, TracingConfig};
use movement_core::movement::BaseInput;
use movement_core::replication::prediction::AckOutcome;
use movement_core::{
    AbilityCharacter, AbilityMovement, CharacterBody, CharacterMovement, MoveAck, MovementTuning,
    NetMode, NetRole, ServerMove, ServerMoveHandler, TickContext, WallScene,
};

const TICK_RATE: f64 = 60.0;
const TICKS: u32 = 420;
const LATENCY_TICKS: u32 = 4;

fn build_course() -> WallScene {
    let mut scene = WallScene::new();
    // Right-hand wall, west face at x = 1.0
    scene.add_box(Vec3::new(1.5, 4.0, 8.0), Vec3::new(0.5, 4.0, 8.0), SceneChannels::ALL);
    // Left-hand wall, east face at x = -3.0
    scene.add_box(Vec3::new(-3.5, 4.0, 14.0), Vec3::new(0.5, 4.0, 8.0), SceneChannels::ALL);
    // Glass panel: visible, not pawn-blocking, never runnable
    scene.add_box(Vec3::new(-1.0, 2.0, 30.0), Vec3::new(2.0, 2.0, 0.05), SceneChannels::VISIBILITY);
    scene
}

fn spawn(tuning: &MovementTuning, role: NetRole, remote: NetRole, mode: NetMode) -> AbilityCharacter {
    let start = Vec3::new(0.0, tuning.base.capsule_half_height, -2.0);
    let mut body = CharacterBody::new(movement_core::geometry::ActorId(1), start, &tuning.base);
    body.view_direction = Vec3::Z;
    CharacterMovement::new(body, AbilityMovement::new(tuning.clone()), tuning.base.clone())
        .with_roles(role, remote, mode)
}

/// Scripted input for one tick
fn script(tick: u32, character: &AbilityCharacter) -> (BaseInput, AbilityInput) {
    let base = BaseInput {
        acceleration: Vec3::Z,
        jump_pressed: tick == 10,
    };
    let wall_running = character.body.is_wall_running();
    let abilities = AbilityInput {
        wall_run: (tick == 16) || ((80..=130).contains(&tick) && !wall_running),
        wall_run_jump: tick == 60,
        teleport: tick == 220,
        jetpack: (260..=320).contains(&tick),
        wall_jump: (330..=400).contains(&tick),
    };
    (base, abilities)
}

#[derive(Default)]
struct Report {
    sent: usize,
    held_ticks: usize,
    confirmed_exact: usize,
    confirmed_within_tolerance: usize,
    corrected: usize,
    replayed: usize,
    events: HashMap<&'static str, usize>,
}

impl Report {
    fn record(&mut self, outcome: AckOutcome) {
        match outcome {
            AckOutcome::Confirmed { bit_exact: true } => self.confirmed_exact += 1,
            AckOutcome::Confirmed { bit_exact: false } => self.confirmed_within_tolerance += 1,
            AckOutcome::Corrected { replayed } => {
                self.corrected += 1;
                self.replayed += replayed;
            }
        }
    }
}

fn event_name(event: &AbilityEvent) -> &'static str {
    match event {
        AbilityEvent::Teleported { .. } => "teleported",
        AbilityEvent::WallJumped { .. } => "wall_jumped",
        AbilityEvent::JetpackDepleted => "jetpack_depleted",
        AbilityEvent::WallRunStarted { .. } => "wall_run_started",
        AbilityEvent::WallRunStopped { .. } => "wall_run_stopped",
        AbilityEvent::WallRunJumped { .. } => "wall_run_jumped",
    }
}

fn main() -> Result<()> {
    init_tracing(&TracingConfig {
        replication: LogLevel::Info,
        show_targets: false,
        ..TracingConfig::default()
    });

    let mut tuning_path = None;
    let mut desync = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--desync" => desync = true,
            path => tuning_path = Some(path.to_string()),
        }
    }
    let tuning = match &tuning_path {
        Some(path) => MovementTuning::load(path)
            .with_context(|| format!("failed to load movement tuning from {path}"))?,
        None => MovementTuning::default(),
    };

    let scene = build_course();
    let mut client = spawn(&tuning, NetRole::AutonomousProxy, NetRole::Authority, NetMode::Client);
    let mut server = spawn(&tuning, NetRole::Authority, NetRole::AutonomousProxy, NetMode::DedicatedServer);
    let mut handler = ServerMoveHandler::new(&tuning.prediction);

    let mut to_server: VecDeque<(u32, ServerMove)> = VecDeque::new();
    let mut to_client: VecDeque<(u32, MoveAck)> = VecDeque::new();
    let mut report = Report::default();
    let dt = (1.0 / TICK_RATE) as f32;
    let timing = TimingSpan::new("course");

    for tick in 0..TICKS {
        let now = f64::from(tick) / TICK_RATE;
        let ctx = TickContext::new(now, &scene);

        let (base, abilities) = script(tick, &client);
        client.input = base;
        client.extension.apply_input(&client.body, &ctx, abilities);
        match client.replicate_move_to_server(&ctx, dt, &tuning.prediction) {
            Some(server_move) => {
                report.sent += 1;
                to_server.push_back((tick + LATENCY_TICKS, server_move));
            }
            None => report.held_ticks += 1,
        }
        for event in client.extension.drain_events() {
            *report.events.entry(event_name(&event)).or_default() += 1;
        }

        if desync && tick == 200 {
            server.body.position.x += 0.5;
        }

        while to_server.front().is_some_and(|(at, _)| *at <= tick) {
            let Some((_, server_move)) = to_server.pop_front() else {
                break;
            };
            let ack = handler
                .process(&mut server, &scene, &server_move)
                .context("authority rejected a client move")?;
            server.extension.drain_events();
            to_client.push_back((tick + LATENCY_TICKS, ack));
        }

        while to_client.front().is_some_and(|(at, _)| *at <= tick) {
            let Some((_, ack)) = to_client.pop_front() else {
                break;
            };
            let outcome = client
                .client_handle_ack(&ack, &scene, &tuning.prediction)
                .context("client could not apply acknowledgement")?;
            report.record(outcome);
        }
    }

    // Drain the pipe
    if let Some(server_move) = client.flush_pending_move(&tuning.prediction) {
        report.sent += 1;
        to_server.push_back((TICKS, server_move));
    }
    for (_, server_move) in to_server.drain(..) {
        let ack = handler.process(&mut server, &scene, &server_move)?;
        to_client.push_back((TICKS, ack));
    }
    for (_, ack) in to_client.drain(..) {
        report.record(client.client_handle_ack(&ack, &scene, &tuning.prediction)?);
    }
    drop(timing);

    info!(
        sent = report.sent,
        held_ticks = report.held_ticks,
        confirmed_exact = report.confirmed_exact,
        confirmed_within_tolerance = report.confirmed_within_tolerance,
        corrected = report.corrected,
        replayed = report.replayed,
        "reconciliation summary"
    );
    let mut events: Vec<_> = report.events.into_iter().collect();
    events.sort();
    for (name, count) in events {
        info!(event = name, count, "client ability events");
    }
    info!(
        client = ?client.body.position,
        server = ?server.body.position,
        energy = client.extension.jetpack_energy(),
        "final state"
    );

    Ok(())
}
