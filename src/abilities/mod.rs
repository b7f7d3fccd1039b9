//! Movement abilities layered on the base controller
//!
//! Five abilities, each driven by a per-tick request and gated by an
//! availability flag plus a geometric or resource check:
//! - Teleport: instant offset along the view direction
//! - Wall-jump: push off a wall the character is facing
//! - Jetpack sprint: held thrust that drains energy
//! - Wall-run: run along a wall without falling, chaining from wall to wall
//! - Wall-run jump: jump off (or shortly after leaving) a wall-run
//!
//! Jetpack sprint, wall-run and wall-run jump are mutually exclusive within
//! one tick; the request helpers below keep it that way.

pub mod executor;
pub mod gate;

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::MovementTuning;
use crate::constants::MAX_PENDING_EVENTS;
use crate::geometry::SurfaceHit;
use crate::movement::{
    CharacterBody, MovementExtension, MovementMode, SnapshotScope, TickContext,
};
use crate::replication::saved_move::SavedMove;
use crate::replication::CompressedFlags;

/// "Player is triggering ability X this tick"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AbilityRequests {
    pub teleport: bool,
    pub wall_jump: bool,
    pub jetpack_sprint: bool,
    pub wall_run: bool,
    pub wall_run_jump: bool,
}

impl AbilityRequests {
    pub fn any(&self) -> bool {
        self.teleport || self.wall_jump || self.jetpack_sprint || self.wall_run || self.wall_run_jump
    }
}

/// "Player is currently allowed to perform X"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbilityAvailability {
    pub teleport: bool,
    pub wall_jump: bool,
    pub jetpack_sprint: bool,
    pub wall_run: bool,
}

impl Default for AbilityAvailability {
    fn default() -> Self {
        Self {
            teleport: true,
            wall_jump: true,
            jetpack_sprint: true,
            wall_run: true,
        }
    }
}

/// Absolute world-clock deadlines (s)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WallRunTimers {
    /// Wall-run on the current surface ends here
    pub max_ending_time: f64,
    /// A wall-run jump is only valid before this
    pub max_jump_time: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WallRunFlow {
    /// Chaining wall-runs without touching the ground
    pub flowing: bool,
    /// The single wall-run jump of this flow is still available
    pub jump_once: bool,
    /// Grip point of the current (or last) wall-run
    pub last_hit_point: SurfaceHit,
    pub flowing_direction: Vec3,
}

/// Jetpack resource, kept in [0, max]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JetpackEnergy {
    pub current: f32,
    pub max: f32,
}

impl JetpackEnergy {
    pub fn full(max: f32) -> Self {
        Self { current: max, max }
    }

    pub fn drain(&mut self, amount: f32) {
        self.current = (self.current - amount).clamp(0.0, self.max);
    }

    pub fn recharge(&mut self, amount: f32) {
        self.current = (self.current + amount).clamp(0.0, self.max);
    }

    pub fn is_empty(&self) -> bool {
        self.current <= 0.0
    }

    pub fn fraction(&self) -> f32 {
        if self.max > 0.0 {
            self.current / self.max
        } else {
            0.0
        }
    }
}

impl Default for JetpackEnergy {
    fn default() -> Self {
        Self::full(crate::config::JetpackConfig::default().max_energy)
    }
}

/// Every per-character field the abilities read or write
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MovementState {
    pub requests: AbilityRequests,
    pub availability: AbilityAvailability,
    pub timers: WallRunTimers,
    pub flow: WallRunFlow,
    pub energy: JetpackEnergy,
}

/// Why a wall-run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WallRunStopReason {
    Requested,
    TimedOut,
    LostWall,
    Jumped,
}

/// Ability side effects, for gameplay feedback (sounds, camera, UI)
#[derive(Event, Debug, Clone, Copy, PartialEq)]
pub enum AbilityEvent {
    Teleported { from: Vec3, to: Vec3 },
    WallJumped { normal: Vec3 },
    JetpackDepleted,
    WallRunStarted { normal: Vec3, direction: Vec3 },
    WallRunStopped { reason: WallRunStopReason },
    WallRunJumped { normal: Vec3 },
}

/// Ability input sampled once per tick by the input-binding layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AbilityInput {
    pub teleport: bool,
    pub wall_jump: bool,
    /// Held
    pub jetpack: bool,
    /// Pressed
    pub wall_run: bool,
    pub wall_run_jump: bool,
}

/// Movement extension implementing the five abilities
#[derive(Debug, Clone)]
pub struct AbilityMovement {
    state: MovementState,
    tuning: MovementTuning,
    events: Vec<AbilityEvent>,
}

impl AbilityMovement {
    pub fn new(tuning: MovementTuning) -> Self {
        let state = MovementState {
            energy: JetpackEnergy::full(tuning.jetpack.max_energy),
            ..Default::default()
        };
        Self {
            state,
            tuning,
            events: Vec::new(),
        }
    }

    pub fn state(&self) -> &MovementState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut MovementState {
        &mut self.state
    }

    pub fn tuning(&self) -> &MovementTuning {
        &self.tuning
    }

    /// Take every event emitted since the last drain
    pub fn drain_events(&mut self) -> Vec<AbilityEvent> {
        std::mem::take(&mut self.events)
    }

    /// Buffer an event for the host. Replays stay silent, and a host that
    /// never drains loses the oldest events instead of growing the buffer.
    pub(crate) fn emit(&mut self, ctx: &TickContext<'_>, event: AbilityEvent) {
        if ctx.replaying {
            return;
        }
        if self.events.len() >= MAX_PENDING_EVENTS {
            let dropped = self.events.remove(0);
            warn!(?dropped, capacity = MAX_PENDING_EVENTS, "ability events not drained, dropping oldest");
        }
        self.events.push(event);
    }

    // ---- Requests ----

    pub fn triggering_teleport(&self) -> bool {
        self.state.requests.teleport
    }

    pub fn set_triggering_teleport(&mut self, value: bool) {
        self.state.requests.teleport = value;
    }

    pub fn triggering_wall_jump(&self) -> bool {
        self.state.requests.wall_jump
    }

    pub fn set_triggering_wall_jump(&mut self, value: bool) {
        self.state.requests.wall_jump = value;
    }

    pub fn triggering_jetpack_sprint(&self) -> bool {
        self.state.requests.jetpack_sprint
    }

    /// Sprinting with the jetpack takes wall-jump away, releasing gives it back
    pub fn set_triggering_jetpack_sprint(&mut self, value: bool) {
        self.state.requests.jetpack_sprint = value;
        self.state.availability.wall_jump = !value;
    }

    /// False while a wall-run jump is requested: the jump reuses the
    /// wall-run bit on the wire.
    pub fn triggering_wall_run(&self) -> bool {
        self.state.requests.wall_run && !self.state.requests.wall_run_jump
    }

    /// Requesting a wall-run re-enables jetpack sprint only if the character
    /// is already running (so the jetpack can cancel an active run), and
    /// disables it when the request starts a run.
    pub fn set_triggering_wall_run(&mut self, body: &CharacterBody, value: bool) {
        self.state.requests.wall_run = value;
        if value {
            self.state.availability.jetpack_sprint = body.is_wall_running();
        }
    }

    pub fn triggering_wall_run_jump(&self) -> bool {
        self.state.requests.wall_run_jump
    }

    pub fn set_triggering_wall_run_jump(&mut self, value: bool) {
        self.state.requests.wall_run_jump = value;
    }

    // ---- Availability ----

    pub fn set_can_teleport(&mut self, value: bool) {
        self.state.availability.teleport = value;
    }

    pub fn set_can_wall_jump(&mut self, value: bool) {
        self.state.availability.wall_jump = value;
    }

    pub fn set_can_jetpack_sprint(&mut self, value: bool) {
        self.state.availability.jetpack_sprint = value;
    }

    pub fn set_can_wall_run(&mut self, value: bool) {
        self.state.availability.wall_run = value;
    }

    pub fn jetpack_energy(&self) -> f32 {
        self.state.energy.current
    }

    pub fn is_flowing(&self) -> bool {
        self.state.flow.flowing
    }

    /// Speed cap of the current mode
    pub fn max_speed(&self, body: &CharacterBody) -> f32 {
        match body.mode() {
            MovementMode::WallRunning => self.tuning.wall_run.speed,
            _ => self.tuning.base.max_walk_speed,
        }
    }

    // ---- Input binding ----

    pub fn request_teleport(&mut self) -> bool {
        if self.can_teleport() {
            self.set_triggering_teleport(true);
            return true;
        }
        false
    }

    pub fn request_wall_jump(&mut self, body: &CharacterBody, ctx: &TickContext<'_>) -> bool {
        if self.can_wall_jump(body, ctx.ray_caster) {
            self.set_triggering_wall_jump(true);
            return true;
        }
        false
    }

    /// Held every tick; releasing (or being unable to sprint) clears it
    pub fn request_jetpack_sprint(&mut self, body: &CharacterBody, held: bool) -> bool {
        let sprint = held && self.can_jetpack_sprint(body);
        self.set_triggering_jetpack_sprint(sprint);
        sprint
    }

    /// Toggle: starts a run if a wall is in reach, stops a running one
    pub fn request_wall_run_toggle(&mut self, body: &CharacterBody, ctx: &TickContext<'_>) -> bool {
        if self.can_stop_wall_run(body) || self.can_wall_run(body, ctx.ray_caster, false) {
            self.set_triggering_wall_run(body, true);
            return true;
        }
        false
    }

    pub fn request_wall_run_jump(&mut self, ctx: &TickContext<'_>) -> bool {
        if self.can_wall_run_jump(ctx.now) {
            self.set_triggering_wall_run_jump(true);
            return true;
        }
        false
    }

    /// Turn one tick of input into requests.
    ///
    /// Wall-run jump wins over a wall-run toggle, which wins over the
    /// jetpack, so at most one of the three is ever requested.
    pub fn apply_input(&mut self, body: &CharacterBody, ctx: &TickContext<'_>, input: AbilityInput) {
        if input.teleport {
            self.request_teleport();
        }
        if input.wall_jump {
            self.request_wall_jump(body, ctx);
        }
        let wall_run_jump = input.wall_run_jump && self.request_wall_run_jump(ctx);
        let wall_run = !wall_run_jump && input.wall_run && self.request_wall_run_toggle(body, ctx);
        self.request_jetpack_sprint(body, input.jetpack && !wall_run_jump && !wall_run);
    }
}

impl Default for AbilityMovement {
    fn default() -> Self {
        Self::new(MovementTuning::default())
    }
}

impl MovementExtension for AbilityMovement {
    fn on_before_integrate(&mut self, body: &mut CharacterBody, ctx: &TickContext<'_>, dt: f32) {
        self.execute(body, ctx, dt);
    }

    fn on_after_decode_flags(
        &mut self,
        body: &mut CharacterBody,
        ctx: &TickContext<'_>,
        flags: CompressedFlags,
    ) {
        self.apply_compressed_flags(body, ctx, flags);
    }

    fn on_capture_snapshot(&self, snapshot: &mut SavedMove) {
        snapshot.state = self.state;
    }

    fn on_restore_snapshot(&mut self, snapshot: &SavedMove, scope: SnapshotScope) {
        match scope {
            SnapshotScope::Full => self.state = snapshot.state,
            SnapshotScope::Requests => self.state.requests = snapshot.state.requests,
        }
    }
}
