//! Shooter Movement Core
//!
//! Networked first-person movement abilities on top of a base character
//! controller:
//! - Teleport, wall-jump, jetpack sprint, wall-run and wall-run jump
//! - Deterministic per-tick state machine shared by client and server
//! - One-byte compressed flags for replication
//! - Saved moves for client prediction, rewind and replay
//! - Ray-based wall detection behind a physics-agnostic trait (Rapier adapter
//!   included)

pub mod abilities;
pub mod config;
pub mod constants;
pub mod geometry;
pub mod logging;
pub mod movement;
pub mod plugin;
pub mod replication;

pub use abilities::{AbilityEvent, AbilityInput, AbilityMovement, MovementState};
pub use config::{ConfigError, MovementTuning};
pub use geometry::{RayCaster, SurfaceHit, WallDetector, WallScene};
pub use movement::{CharacterBody, CharacterMovement, MovementExtension, MovementMode, TickContext};
pub use replication::prediction::{MoveAck, NetMode, NetRole, ServerMove, ServerMoveHandler};
pub use replication::saved_move::SavedMove;
pub use replication::{CompressedFlags, ReplicationError};

/// A character with the full ability set
pub type AbilityCharacter = CharacterMovement<AbilityMovement>;
