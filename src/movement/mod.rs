//! Base character controller and the seam ability layers plug into.
//!
//! The base simulation owns the body (position, velocity, movement mode) and
//! integrates gravity and velocity. Anything ability-specific lives in a
//! [`MovementExtension`] that the base calls at fixed points of the tick
//! instead of overriding base behavior through inheritance.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::BaseMovementConfig;
use crate::constants::{GROUND_HEIGHT, TERMINAL_VELOCITY};
use crate::geometry::{horizontal, ActorId, RayCaster};
use crate::replication::prediction::{ClientPredictionData, NetMode, NetRole};
use crate::replication::saved_move::SavedMove;
use crate::replication::CompressedFlags;

/// Movement modes of the base controller, plus the custom wall-running mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MovementMode {
    Walking,
    #[default]
    Falling,
    WallRunning,
}

impl MovementMode {
    pub fn as_u8(self) -> u8 {
        match self {
            MovementMode::Walking => 0,
            MovementMode::Falling => 1,
            MovementMode::WallRunning => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Capsule {
    pub radius: f32,
    pub half_height: f32,
}

/// Physical state of one character
#[derive(Debug, Clone, PartialEq)]
pub struct CharacterBody {
    pub actor: ActorId,
    /// Capsule center
    pub position: Vec3,
    pub velocity: Vec3,
    /// Where the player is looking (control rotation), not necessarily horizontal
    pub view_direction: Vec3,
    pub capsule: Capsule,
    pub mass: f32,
    mode: MovementMode,
}

impl CharacterBody {
    pub fn new(actor: ActorId, position: Vec3, config: &BaseMovementConfig) -> Self {
        Self {
            actor,
            position,
            velocity: Vec3::ZERO,
            view_direction: Vec3::NEG_Z,
            capsule: Capsule {
                radius: config.capsule_radius,
                half_height: config.capsule_half_height,
            },
            mass: config.mass,
            mode: MovementMode::Falling,
        }
    }

    pub fn mode(&self) -> MovementMode {
        self.mode
    }

    /// Switch movement mode. Entering wall-running drops all stored velocity
    /// so no momentum from before the run is re-applied.
    pub fn set_movement_mode(&mut self, mode: MovementMode) {
        if mode == MovementMode::WallRunning {
            self.velocity = Vec3::ZERO;
        }
        self.mode = mode;
    }

    pub fn is_falling(&self) -> bool {
        self.mode == MovementMode::Falling
    }

    pub fn is_grounded(&self) -> bool {
        self.mode == MovementMode::Walking
    }

    pub fn is_wall_running(&self) -> bool {
        self.mode == MovementMode::WallRunning
    }

    /// View direction flattened onto the ground plane
    pub fn facing_2d(&self) -> Vec3 {
        horizontal(self.view_direction)
    }

    pub fn feet_height(&self) -> f32 {
        self.position.y - self.capsule.half_height
    }

    /// Apply an impulse (kg·m/s) as an instantaneous velocity change
    pub fn add_impulse(&mut self, impulse: Vec3) {
        if self.mass > 0.0 {
            self.velocity += impulse / self.mass;
        }
    }
}

/// Per-tick input consumed by the base controller
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BaseInput {
    /// Desired movement direction; only its horizontal part is used
    pub acceleration: Vec3,
    pub jump_pressed: bool,
}

/// Shared context of one simulation tick.
///
/// World clock and geometry are passed in explicitly so client and server
/// replay the same tick with the same inputs.
pub struct TickContext<'a> {
    /// World time at the start of the tick (s)
    pub now: f64,
    pub ray_caster: &'a dyn RayCaster,
    /// Set while a client re-simulates moves after a correction
    pub replaying: bool,
}

impl<'a> TickContext<'a> {
    pub fn new(now: f64, ray_caster: &'a dyn RayCaster) -> Self {
        Self {
            now,
            ray_caster,
            replaying: false,
        }
    }

    pub fn replay(now: f64, ray_caster: &'a dyn RayCaster) -> Self {
        Self {
            now,
            ray_caster,
            replaying: true,
        }
    }
}

/// How much of a snapshot a restore writes back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotScope {
    /// Every captured field
    Full,
    /// Only the per-tick requests, used when replaying a move on top of
    /// corrected state
    Requests,
}

/// Hooks the base simulation invokes on an ability layer
pub trait MovementExtension {
    /// Runs before the base integrates gravity and velocity
    fn on_before_integrate(&mut self, body: &mut CharacterBody, ctx: &TickContext<'_>, dt: f32);

    /// Runs on the authority after a client's compressed flags were decoded
    fn on_after_decode_flags(
        &mut self,
        body: &mut CharacterBody,
        ctx: &TickContext<'_>,
        flags: CompressedFlags,
    );

    /// Copy extension state into a snapshot being captured
    fn on_capture_snapshot(&self, snapshot: &mut SavedMove);

    /// Write extension state back from a snapshot
    fn on_restore_snapshot(&mut self, snapshot: &SavedMove, scope: SnapshotScope);
}

/// Minimal base integration: mode-dependent gravity, walking velocity,
/// base jump, velocity application and an implicit ground plane.
pub fn integrate_base(body: &mut CharacterBody, input: &BaseInput, config: &BaseMovementConfig, dt: f32) {
    match body.mode {
        MovementMode::Walking => {
            let wish = horizontal(input.acceleration) * config.max_walk_speed;
            body.velocity.x = wish.x;
            body.velocity.z = wish.z;
            body.velocity.y = 0.0;
            if input.jump_pressed {
                body.velocity.y = config.jump_z_velocity;
                body.mode = MovementMode::Falling;
            }
        }
        MovementMode::Falling => {
            body.velocity.y = (body.velocity.y + config.gravity * dt).max(TERMINAL_VELOCITY);
        }
        MovementMode::WallRunning => {}
    }

    body.position += body.velocity * dt;

    let floor = GROUND_HEIGHT + body.capsule.half_height;
    if body.position.y <= floor && body.velocity.y <= 0.0 {
        body.position.y = floor;
        body.velocity.y = 0.0;
        body.mode = MovementMode::Walking;
    } else if body.mode == MovementMode::Walking && body.position.y > floor {
        body.mode = MovementMode::Falling;
    }
}

/// A character's movement: body, base input and one extension.
///
/// The character exclusively owns its extension; the extension only sees the
/// body through the borrows handed to its hooks.
#[derive(Debug, Clone)]
pub struct CharacterMovement<E> {
    pub body: CharacterBody,
    pub input: BaseInput,
    pub extension: E,
    pub base: BaseMovementConfig,
    pub role: NetRole,
    pub remote_role: NetRole,
    pub net_mode: NetMode,
    prediction: Option<ClientPredictionData>,
}

impl<E: MovementExtension> CharacterMovement<E> {
    pub fn new(body: CharacterBody, extension: E, base: BaseMovementConfig) -> Self {
        Self {
            body,
            input: BaseInput::default(),
            extension,
            base,
            role: NetRole::Authority,
            remote_role: NetRole::SimulatedProxy,
            net_mode: NetMode::Standalone,
            prediction: None,
        }
    }

    pub fn with_roles(mut self, role: NetRole, remote_role: NetRole, net_mode: NetMode) -> Self {
        self.role = role;
        self.remote_role = remote_role;
        self.net_mode = net_mode;
        self
    }

    /// Run one tick: extension first, then the base integration
    pub fn perform_movement(&mut self, ctx: &TickContext<'_>, dt: f32) {
        self.extension.on_before_integrate(&mut self.body, ctx, dt);
        integrate_base(&mut self.body, &self.input, &self.base, dt);
    }

    /// Install the state encoded in a client's flag byte.
    ///
    /// Base bits always apply; ability side effects only run on the authority.
    pub fn update_from_compressed_flags(&mut self, ctx: &TickContext<'_>, flags: CompressedFlags) {
        self.input.jump_pressed = flags.jump_pressed();
        if self.role != NetRole::Authority {
            return;
        }
        self.extension.on_after_decode_flags(&mut self.body, ctx, flags);
    }

    /// Client-side prediction buffer, created on first use.
    ///
    /// Only a client, or a listen server simulating its own autonomous proxy,
    /// predicts moves. Anything else means the replication wiring is broken.
    pub fn prediction_data_client(&mut self, capacity: usize) -> &mut ClientPredictionData {
        debug_assert!(
            self.role != NetRole::Authority
                || (self.remote_role == NetRole::AutonomousProxy
                    && self.net_mode == NetMode::ListenServer),
            "client prediction data requested by a non-predicting role ({:?}/{:?})",
            self.role,
            self.remote_role
        );
        debug_assert!(
            matches!(self.net_mode, NetMode::Client | NetMode::ListenServer),
            "client prediction data requested in {:?}",
            self.net_mode
        );
        self.prediction
            .get_or_insert_with(|| ClientPredictionData::new(capacity))
    }

    pub fn has_prediction_data(&self) -> bool {
        self.prediction.is_some()
    }
}
