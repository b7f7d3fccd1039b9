//! Snapshot of one simulated tick, kept by the client until the authority
//! acknowledges it.

use bevy::prelude::*;
use sha3::{Digest, Sha3_256};

use super::CompressedFlags;
use crate::abilities::MovementState;
use crate::constants::COMBINE_ACCEL_DOT_THRESHOLD;
use crate::movement::{CharacterMovement, MovementExtension, MovementMode, SnapshotScope, TickContext};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SavedMove {
    pub sequence: u32,
    /// World time the move started at (s)
    pub timestamp: f64,
    pub delta_time: f32,

    // Input
    pub acceleration: Vec3,
    pub view_direction: Vec3,
    pub jump_pressed: bool,

    // State before the move
    pub start_position: Vec3,
    pub start_velocity: Vec3,
    pub start_mode: MovementMode,
    pub state: MovementState,

    // State after the move, filled by `post_update`
    pub end_position: Vec3,
    pub end_velocity: Vec3,
    pub end_mode: MovementMode,
}

impl SavedMove {
    /// Zeroed snapshot
    pub fn allocate() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Record input and starting state of a move about to be simulated
    pub fn set_move_for<E: MovementExtension>(
        &mut self,
        movement: &CharacterMovement<E>,
        sequence: u32,
        timestamp: f64,
        delta_time: f32,
    ) {
        self.sequence = sequence;
        self.timestamp = timestamp;
        self.delta_time = delta_time;

        self.acceleration = movement.input.acceleration;
        self.jump_pressed = movement.input.jump_pressed;
        self.view_direction = movement.body.view_direction;

        self.start_position = movement.body.position;
        self.start_velocity = movement.body.velocity;
        self.start_mode = movement.body.mode();
        movement.extension.on_capture_snapshot(self);
    }

    pub fn capture<E: MovementExtension>(
        movement: &CharacterMovement<E>,
        sequence: u32,
        timestamp: f64,
        delta_time: f32,
    ) -> Self {
        let mut snapshot = Self::allocate();
        snapshot.set_move_for(movement, sequence, timestamp, delta_time);
        snapshot
    }

    /// Inverse of [`Self::set_move_for`]: rewind the character to the start
    /// of this move
    pub fn restore<E: MovementExtension>(&self, movement: &mut CharacterMovement<E>) {
        movement.body.set_movement_mode(self.start_mode);
        movement.body.position = self.start_position;
        movement.body.velocity = self.start_velocity;
        self.apply_input(movement);
        movement.extension.on_restore_snapshot(self, SnapshotScope::Full);
    }

    /// Reinstall only this move's input, on top of whatever state the
    /// character is in now. Used when replaying after a correction.
    pub fn prepare_replay<E: MovementExtension>(&self, movement: &mut CharacterMovement<E>) {
        self.apply_input(movement);
        movement.extension.on_restore_snapshot(self, SnapshotScope::Requests);
    }

    /// Reinstall this move the way the authority receives it: input plus
    /// the decoded flag byte, on top of the character's current state.
    /// Instant abilities fire here, as they do on the authority.
    pub fn replay_as_authority<E: MovementExtension>(
        &self,
        movement: &mut CharacterMovement<E>,
        ctx: &TickContext<'_>,
    ) {
        self.apply_input(movement);
        movement
            .extension
            .on_after_decode_flags(&mut movement.body, ctx, self.compressed_flags());
    }

    fn apply_input<E: MovementExtension>(&self, movement: &mut CharacterMovement<E>) {
        movement.input.acceleration = self.acceleration;
        movement.input.jump_pressed = self.jump_pressed;
        movement.body.view_direction = self.view_direction;
    }

    /// Re-record the starting state after the character was moved under this
    /// move (replay after a correction), keeping its input and requests
    pub fn refresh_start<E: MovementExtension>(&mut self, movement: &CharacterMovement<E>) {
        let requests = self.state.requests;
        self.start_position = movement.body.position;
        self.start_velocity = movement.body.velocity;
        self.start_mode = movement.body.mode();
        movement.extension.on_capture_snapshot(self);
        self.state.requests = requests;
    }

    /// Record where the move ended
    pub fn post_update<E: MovementExtension>(&mut self, movement: &CharacterMovement<E>) {
        self.end_position = movement.body.position;
        self.end_velocity = movement.body.velocity;
        self.end_mode = movement.body.mode();
    }

    /// Whether `newer` may be merged into this (older) move and sent as one.
    ///
    /// Any active request on either move forces it to travel alone so every
    /// trigger reaches the authority exactly once.
    pub fn can_combine_with(&self, newer: &SavedMove, max_delta: f32) -> bool {
        if self.state.requests.any() || newer.state.requests.any() {
            return false;
        }
        if self.jump_pressed != newer.jump_pressed || self.start_mode != newer.start_mode {
            return false;
        }
        if self.delta_time + newer.delta_time > max_delta {
            return false;
        }

        let (a, b) = (self.acceleration, newer.acceleration);
        match (a == Vec3::ZERO, b == Vec3::ZERO) {
            (true, true) => true,
            (false, false) => a.normalize().dot(b.normalize()) >= COMBINE_ACCEL_DOT_THRESHOLD,
            _ => false,
        }
    }

    /// Fold an older move into this one: the merged move starts where the
    /// older one did and spans both deltas.
    pub fn combine_with(&mut self, older: &SavedMove) {
        self.sequence = older.sequence;
        self.timestamp = older.timestamp;
        self.delta_time += older.delta_time;
        self.start_position = older.start_position;
        self.start_velocity = older.start_velocity;
        self.start_mode = older.start_mode;
        self.state = older.state;
    }

    pub fn compressed_flags(&self) -> CompressedFlags {
        CompressedFlags::encode(&self.state.requests, self.jump_pressed)
    }

    /// Fingerprint of where the move ended
    pub fn checksum(&self) -> u64 {
        end_state_checksum(self.end_position, self.end_velocity, self.end_mode)
    }
}

/// SHA3-256 over the exact bytes of an end state, truncated to 64 bits.
/// Equal only if prediction and authority agree bit for bit.
pub fn end_state_checksum(position: Vec3, velocity: Vec3, mode: MovementMode) -> u64 {
    let mut hasher = Sha3_256::new();
    for value in position.to_array().into_iter().chain(velocity.to_array()) {
        hasher.update(value.to_le_bytes());
    }
    hasher.update([mode.as_u8()]);
    let digest = hasher.finalize();

    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}
