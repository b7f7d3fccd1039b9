//! Centralized constants for the movement core.
//!
//! Designer-facing knobs live in `config::MovementTuning`; the values here are
//! either wire-format facts or fallbacks the tuning defaults are built from.

// =====================================================
// Physics
// =====================================================

/// Gravity along the up axis (m/s²)
pub const GRAVITY: f32 = -9.81;

/// Fastest the base integrator lets a character fall (m/s)
pub const TERMINAL_VELOCITY: f32 = -50.0;

/// Height of the implicit ground plane used by the base integrator
pub const GROUND_HEIGHT: f32 = 0.0;

/// Vectors shorter than this are treated as zero when normalizing
pub const DIRECTION_EPSILON: f32 = 1.0e-4;

// =====================================================
// Wall detection
// =====================================================

/// Rays cast around the character when looking for a wall to run on
pub const DEFAULT_WALL_RAY_COUNT: u8 = 12;

/// Gameplay events buffered on a character before the oldest is dropped
pub const MAX_PENDING_EVENTS: usize = 64;

// =====================================================
// Client prediction
// =====================================================

/// Unacknowledged moves kept by a client before the oldest is dropped
pub const MAX_SAVED_MOVES: usize = 96;

/// Two moves are never merged into one if their combined delta exceeds this (s)
pub const MAX_COMBINE_DELTA: f32 = 0.125;

/// Acceleration directions closer than this (dot product) count as "the same"
pub const COMBINE_ACCEL_DOT_THRESHOLD: f32 = 0.99;

/// Position error tolerated between prediction and authority before correcting (m)
pub const CORRECTION_POSITION_TOLERANCE: f32 = 0.01;

// =====================================================
// Wire format
// =====================================================

/// Version of the one-byte compressed flag layout.
///
/// Jetpack sprint, wall-run and wall-run-jump share two bits. Adding a fourth
/// mutually-exclusive ability needs a wider field and a bump here.
pub const FLAGS_PROTOCOL_VERSION: u8 = 1;
