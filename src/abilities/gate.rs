//! Availability predicates: each `can_*` ANDs the ability's flag with its
//! state, resource or geometry precondition.

use bevy::prelude::*;

use super::AbilityMovement;
use crate::geometry::{is_same_surface, RayCaster, SurfaceHit, WallDetector};
use crate::movement::{CharacterBody, MovementMode};

impl AbilityMovement {
    pub fn can_teleport(&self) -> bool {
        self.state.availability.teleport
    }

    pub fn can_wall_jump(&self, body: &CharacterBody, caster: &dyn RayCaster) -> bool {
        self.state.availability.wall_jump
            && body.is_falling()
            && self.probe_wall_jump_surface(body, caster).is_some()
    }

    pub fn can_jetpack_sprint(&self, body: &CharacterBody) -> bool {
        self.state.availability.jetpack_sprint
            && self.state.energy.current > 0.0
            && !body.is_wall_running()
    }

    /// Whether a wall-run can start from here.
    ///
    /// While flowing, the surface just left is rejected so the character
    /// cannot re-grip it. With `set_grip_point` the accepted hit becomes the
    /// new grip point; without it the query has no side effects.
    pub fn can_wall_run(
        &mut self,
        body: &CharacterBody,
        caster: &dyn RayCaster,
        set_grip_point: bool,
    ) -> bool {
        if !self.state.availability.wall_run || !body.is_falling() {
            return false;
        }
        let Some(hit) = self.probe_wall_run_surface(body, caster) else {
            return false;
        };
        if self.state.flow.flowing
            && is_same_surface(
                self.state.flow.last_hit_point.normal,
                hit.normal,
                self.tuning.wall_run.max_angle_variation,
            )
        {
            trace!("wall-run rejected: same surface as last grip");
            return false;
        }
        if set_grip_point {
            self.state.flow.last_hit_point = hit;
        }
        true
    }

    pub fn can_stop_wall_run(&self, body: &CharacterBody) -> bool {
        body.mode() == MovementMode::WallRunning
    }

    pub fn can_wall_run_jump(&self, now: f64) -> bool {
        self.state.flow.flowing && self.state.flow.jump_once && now < self.state.timers.max_jump_time
    }

    /// Wall in front of the character within wall-jump reach and angle
    pub(crate) fn probe_wall_jump_surface(
        &self,
        body: &CharacterBody,
        caster: &dyn RayCaster,
    ) -> Option<SurfaceHit> {
        let config = &self.tuning.wall_jump;
        let origin = WallDetector::forward_origin(
            body.position,
            body.capsule.half_height,
            config.relative_collision_height,
        );
        WallDetector::new(caster, Some(body.actor)).probe_forward(
            origin,
            body.facing_2d(),
            body.capsule.radius + config.max_wall_distance,
            config.max_impact_angle,
        )
    }

    /// Closest runnable wall around the character
    pub(crate) fn probe_wall_run_surface(
        &self,
        body: &CharacterBody,
        caster: &dyn RayCaster,
    ) -> Option<SurfaceHit> {
        let config = &self.tuning.wall_run;
        let mut facing = body.facing_2d();
        if facing == Vec3::ZERO {
            facing = Vec3::NEG_Z;
        }
        let ring = facing * (body.capsule.radius + config.detection_distance);
        WallDetector::new(caster, Some(body.actor)).probe_radial(body.position, ring, config.ray_count)
    }
}
