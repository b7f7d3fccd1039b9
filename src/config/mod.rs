//! Designer-facing movement tuning.
//!
//! Every knob is a plain number; no logic lives here beyond range validation.
//! Sections default independently so a partial JSON/RON file only overrides
//! what it names.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::constants::{
    CORRECTION_POSITION_TOLERANCE, DEFAULT_WALL_RAY_COUNT, GRAVITY, MAX_COMBINE_DELTA,
    MAX_SAVED_MOVES,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Base character-controller values the ability layer builds on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseMovementConfig {
    pub gravity: f32,
    pub jump_z_velocity: f32,
    pub mass: f32,
    pub capsule_radius: f32,
    pub capsule_half_height: f32,
    pub max_walk_speed: f32,
}

impl Default for BaseMovementConfig {
    fn default() -> Self {
        Self {
            gravity: GRAVITY,
            jump_z_velocity: 4.2,
            mass: 100.0,
            capsule_radius: 0.4,
            capsule_half_height: 0.9,
            max_walk_speed: 6.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeleportConfig {
    /// Distance travelled along the view direction (m)
    pub distance: f32,
}

impl Default for TeleportConfig {
    fn default() -> Self {
        Self { distance: 10.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WallJumpConfig {
    /// Farthest a wall may be from the capsule surface
    pub max_wall_distance: f32,
    /// Largest facing-vs-wall angle still accepted (degrees, 0..=90)
    pub max_impact_angle: f32,
    /// Probe height relative to the capsule center (clamped to ±half-height)
    pub relative_collision_height: f32,
    /// Multiplier on the base jump velocity
    pub velocity_modifier: f32,
    /// Impulse pushing the character away from the wall (kg·m/s)
    pub response_impulse: f32,
}

impl Default for WallJumpConfig {
    fn default() -> Self {
        Self {
            max_wall_distance: 0.4,
            max_impact_angle: 10.0,
            relative_collision_height: 0.0,
            velocity_modifier: 1.0,
            response_impulse: 200.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JetpackConfig {
    pub upward_acceleration: f32,
    /// Energy consumed per second while sprinting
    pub energy_drain_rate: f32,
    /// Energy recovered per second while idle
    pub recharge_rate: f32,
    pub max_energy: f32,
}

impl Default for JetpackConfig {
    fn default() -> Self {
        Self {
            upward_acceleration: 30.0,
            energy_drain_rate: 10.0,
            recharge_rate: 10.0,
            max_energy: 100.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WallRunConfig {
    /// Farthest a wall may be from the capsule surface to start a run
    pub detection_distance: f32,
    /// Distance kept between the capsule center and the wall while running
    pub sliding_distance: f32,
    /// Normals closer than this are "the same surface" (degrees, 0..=80)
    pub max_angle_variation: f32,
    /// Longest run on one surface (s)
    pub max_duration: f32,
    /// Window after leaving a wall in which a wall-run jump is allowed (s)
    pub max_jump_delay: f32,
    pub speed: f32,
    pub jump_lateral_acceleration: f32,
    /// Multiplier on the base jump velocity for a wall-run jump
    pub jump_vertical_modifier: f32,
    pub ray_count: u8,
}

impl Default for WallRunConfig {
    fn default() -> Self {
        Self {
            detection_distance: 0.8,
            sliding_distance: 0.7,
            max_angle_variation: 20.0,
            max_duration: 3.0,
            max_jump_delay: 1.0,
            speed: 6.0,
            jump_lateral_acceleration: 240.0,
            jump_vertical_modifier: 2.0,
            ray_count: DEFAULT_WALL_RAY_COUNT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    pub max_saved_moves: usize,
    pub max_combine_delta: f32,
    pub correction_tolerance: f32,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            max_saved_moves: MAX_SAVED_MOVES,
            max_combine_delta: MAX_COMBINE_DELTA,
            correction_tolerance: CORRECTION_POSITION_TOLERANCE,
        }
    }
}

/// Complete tuning for one character's movement
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementTuning {
    pub base: BaseMovementConfig,
    pub teleport: TeleportConfig,
    pub wall_jump: WallJumpConfig,
    pub jetpack: JetpackConfig,
    pub wall_run: WallRunConfig,
    pub prediction: PredictionConfig,
}

fn check_range(field: &'static str, value: f32, min: f32, max: f32) -> Result<(), ConfigError> {
    if !value.is_finite() || value < min || value > max {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("{value} not in [{min}, {max}]"),
        });
    }
    Ok(())
}

fn check_positive(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("{value} must be > 0"),
        });
    }
    Ok(())
}

impl MovementTuning {
    /// Check every knob against the ranges designers are allowed to use
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_positive("base.mass", self.base.mass)?;
        check_positive("base.capsule_radius", self.base.capsule_radius)?;
        check_positive("base.capsule_half_height", self.base.capsule_half_height)?;
        check_range("base.max_walk_speed", self.base.max_walk_speed, 0.0, 1000.0)?;
        check_range("base.jump_z_velocity", self.base.jump_z_velocity, 0.0, 1000.0)?;
        if !self.base.gravity.is_finite() {
            return Err(ConfigError::Invalid {
                field: "base.gravity",
                reason: "must be finite".into(),
            });
        }

        check_range("teleport.distance", self.teleport.distance, 0.0, 1000.0)?;

        check_range("wall_jump.max_wall_distance", self.wall_jump.max_wall_distance, 0.0, 1000.0)?;
        check_range("wall_jump.max_impact_angle", self.wall_jump.max_impact_angle, 0.0, 90.0)?;
        check_range("wall_jump.velocity_modifier", self.wall_jump.velocity_modifier, 0.0, 100.0)?;
        check_range("wall_jump.response_impulse", self.wall_jump.response_impulse, 0.0, 100_000.0)?;
        if !self.wall_jump.relative_collision_height.is_finite() {
            return Err(ConfigError::Invalid {
                field: "wall_jump.relative_collision_height",
                reason: "must be finite".into(),
            });
        }

        check_range("jetpack.upward_acceleration", self.jetpack.upward_acceleration, 0.0, 1000.0)?;
        check_range("jetpack.energy_drain_rate", self.jetpack.energy_drain_rate, 0.0, 1000.0)?;
        check_range("jetpack.recharge_rate", self.jetpack.recharge_rate, 0.0, 1000.0)?;
        check_positive("jetpack.max_energy", self.jetpack.max_energy)?;

        check_range("wall_run.detection_distance", self.wall_run.detection_distance, 0.0, 1000.0)?;
        check_range("wall_run.sliding_distance", self.wall_run.sliding_distance, 0.0, 1000.0)?;
        check_range("wall_run.max_angle_variation", self.wall_run.max_angle_variation, 0.0, 80.0)?;
        check_range("wall_run.max_duration", self.wall_run.max_duration, 0.0, 1000.0)?;
        check_range("wall_run.max_jump_delay", self.wall_run.max_jump_delay, 0.0, 1000.0)?;
        check_range("wall_run.speed", self.wall_run.speed, 0.0, 1000.0)?;
        check_range(
            "wall_run.jump_lateral_acceleration",
            self.wall_run.jump_lateral_acceleration,
            0.0,
            100_000.0,
        )?;
        check_range(
            "wall_run.jump_vertical_modifier",
            self.wall_run.jump_vertical_modifier,
            0.0,
            100.0,
        )?;
        if self.wall_run.ray_count == 0 {
            return Err(ConfigError::Invalid {
                field: "wall_run.ray_count",
                reason: "at least one ray is required".into(),
            });
        }

        if self.prediction.max_saved_moves == 0 {
            return Err(ConfigError::Invalid {
                field: "prediction.max_saved_moves",
                reason: "ring must hold at least one move".into(),
            });
        }
        check_range("prediction.max_combine_delta", self.prediction.max_combine_delta, 0.0, 1.0)?;
        check_range(
            "prediction.correction_tolerance",
            self.prediction.correction_tolerance,
            0.0,
            100.0,
        )?;
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let tuning: Self = serde_json::from_str(json)?;
        tuning.validate()?;
        Ok(tuning)
    }

    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        let tuning: Self = ron::from_str(text)?;
        tuning.validate()?;
        Ok(tuning)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Load from disk; `.ron` files are parsed as RON, anything else as JSON
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let is_ron = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("ron"));
        let tuning = if is_ron {
            Self::from_ron(&content)?
        } else {
            Self::from_json(&content)?
        };
        tracing::info!(path = %path.display(), "movement tuning loaded");
        Ok(tuning)
    }
}
