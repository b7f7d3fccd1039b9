//! Per-tick ability state machine.
//!
//! Order every tick: teleport, wall-jump, jetpack, then wall-run jump *or*
//! wall-run toggle, then the continuous wall-run update. Instant actions
//! resolve before the continuous effects so one tick cannot both leave a wall
//! and re-grip it. The base controller integrates afterwards.

use bevy::prelude::*;

use super::{AbilityEvent, AbilityMovement, WallRunStopReason};
use crate::geometry::horizontal;
use crate::movement::{CharacterBody, MovementMode, TickContext};

impl AbilityMovement {
    pub fn execute(&mut self, body: &mut CharacterBody, ctx: &TickContext<'_>, dt: f32) {
        if self.state.requests.teleport {
            self.teleport(body, ctx);
            self.state.requests.teleport = false;
        }

        if self.state.requests.wall_jump {
            self.wall_jump(body, ctx);
            self.state.requests.wall_jump = false;
        }

        self.jetpack_tick(body, ctx, dt);

        if self.state.requests.wall_run_jump {
            self.wall_run_jump(body, ctx, dt);
            self.state.requests.wall_run_jump = false;
            // A same-tick toggle is superseded by the jump
            self.state.requests.wall_run = false;
        } else if self.triggering_wall_run() {
            self.wall_run_change_state(body, ctx);
            self.state.requests.wall_run = false;
        }

        self.wall_run_tick(body, ctx);
    }

    /// Instant offset along the view direction. No collision sweep.
    pub fn teleport(&mut self, body: &mut CharacterBody, ctx: &TickContext<'_>) {
        let from = body.position;
        body.position += body.view_direction.normalize_or_zero() * self.tuning.teleport.distance;
        if !ctx.replaying {
            debug!(?from, to = ?body.position, "teleport");
        }
        self.emit(ctx, AbilityEvent::Teleported { from, to: body.position });
    }

    /// Jump off the wall in front: base jump velocity scaled by the modifier,
    /// plus an impulse along the wall normal.
    pub fn wall_jump(&mut self, body: &mut CharacterBody, ctx: &TickContext<'_>) {
        let config = &self.tuning.wall_jump;
        let normal = self
            .probe_wall_jump_surface(body, ctx.ray_caster)
            .map(|hit| hit.normal)
            .unwrap_or_else(|| -body.facing_2d());

        body.velocity.y = self.tuning.base.jump_z_velocity * config.velocity_modifier;
        body.add_impulse(normal * config.response_impulse);
        if body.is_grounded() {
            body.set_movement_mode(MovementMode::Falling);
        }

        if !ctx.replaying {
            debug!(?normal, velocity = ?body.velocity, "wall jump");
        }
        self.emit(ctx, AbilityEvent::WallJumped { normal });
    }

    /// Drain and thrust while sprinting, recharge otherwise
    pub fn jetpack_tick(&mut self, body: &mut CharacterBody, ctx: &TickContext<'_>, dt: f32) {
        let config = &self.tuning.jetpack;
        if self.state.requests.jetpack_sprint && self.can_jetpack_sprint(body) {
            self.state.energy.drain(config.energy_drain_rate * dt);
            if body.is_grounded() {
                body.set_movement_mode(MovementMode::Falling);
            }
            body.velocity.y += config.upward_acceleration * dt;

            if self.state.energy.is_empty() {
                if !ctx.replaying {
                    info!(energy = self.state.energy.current, "jetpack depleted");
                }
                self.emit(ctx, AbilityEvent::JetpackDepleted);
            }
        } else {
            self.state.energy.recharge(config.recharge_rate * dt);
        }
    }

    /// Enter a wall-run if a fresh wall is in reach, or leave the current one
    pub fn wall_run_change_state(&mut self, body: &mut CharacterBody, ctx: &TickContext<'_>) {
        if self.can_stop_wall_run(body) {
            self.stop_wall_run(body, ctx, WallRunStopReason::Requested);
        } else if self.can_wall_run(body, ctx.ray_caster, true) {
            self.start_wall_run(body, ctx);
        }
    }

    /// Continuous wall-run update.
    ///
    /// Touching ground ends a flow. While running: time out, drop off when
    /// the wall is gone, otherwise follow the wall at the sliding distance.
    pub fn wall_run_tick(&mut self, body: &mut CharacterBody, ctx: &TickContext<'_>) {
        if body.is_grounded() {
            self.state.flow.flowing = false;
        }
        if !body.is_wall_running() {
            return;
        }

        if ctx.now >= self.state.timers.max_ending_time {
            self.stop_wall_run(body, ctx, WallRunStopReason::TimedOut);
            return;
        }
        let Some(hit) = self.probe_wall_run_surface(body, ctx.ray_caster) else {
            self.stop_wall_run(body, ctx, WallRunStopReason::LostWall);
            return;
        };

        self.state.flow.last_hit_point = hit;
        self.state.timers.max_jump_time = ctx.now + f64::from(self.tuning.wall_run.max_jump_delay);
        self.state.flow.flowing_direction = self.flowing_direction(body, hit.normal);

        // Correct only the distance to the wall, never the progress along it
        let normal = horizontal(hit.normal);
        let gap = self.tuning.wall_run.sliding_distance.max(body.capsule.radius);
        let offset = (body.position - hit.position).dot(normal);
        body.position += normal * (gap - offset);
        body.velocity = self.state.flow.flowing_direction * self.max_speed(body);
    }

    /// Jump off (or shortly after leaving) a wall-run: amplified vertical
    /// velocity plus lateral acceleration away from the grip surface.
    /// Consumes the flow's single jump; flowing stays on.
    pub fn wall_run_jump(&mut self, body: &mut CharacterBody, ctx: &TickContext<'_>, dt: f32) {
        let config = &self.tuning.wall_run;
        let normal = self.state.flow.last_hit_point.normal;

        if body.is_wall_running() {
            body.set_movement_mode(MovementMode::Falling);
            self.state.availability.jetpack_sprint = true;
        }
        body.velocity.y = self.tuning.base.jump_z_velocity * config.jump_vertical_modifier;
        body.velocity += normal * config.jump_lateral_acceleration * dt;
        self.state.flow.jump_once = false;

        if !ctx.replaying {
            info!(?normal, velocity = ?body.velocity, "wall-run jump");
        }
        self.emit(ctx, AbilityEvent::WallRunJumped { normal });
    }

    fn start_wall_run(&mut self, body: &mut CharacterBody, ctx: &TickContext<'_>) {
        let config = &self.tuning.wall_run;
        let normal = self.state.flow.last_hit_point.normal;

        body.set_movement_mode(MovementMode::WallRunning);
        self.state.flow.flowing = true;
        self.state.flow.jump_once = true;
        self.state.timers.max_ending_time = ctx.now + f64::from(config.max_duration);
        self.state.timers.max_jump_time = ctx.now + f64::from(config.max_jump_delay);
        self.state.flow.flowing_direction = self.flowing_direction(body, normal);

        if !ctx.replaying {
            info!(?normal, direction = ?self.state.flow.flowing_direction, "wall-run started");
        }
        self.emit(
            ctx,
            AbilityEvent::WallRunStarted {
                normal,
                direction: self.state.flow.flowing_direction,
            },
        );
    }

    fn stop_wall_run(&mut self, body: &mut CharacterBody, ctx: &TickContext<'_>, reason: WallRunStopReason) {
        body.set_movement_mode(MovementMode::Falling);
        self.state.timers.max_jump_time = ctx.now + f64::from(self.tuning.wall_run.max_jump_delay);
        self.state.flow.jump_once = true;
        self.state.availability.jetpack_sprint = true;

        if !ctx.replaying {
            info!(?reason, "wall-run stopped");
        }
        self.emit(ctx, AbilityEvent::WallRunStopped { reason });
    }

    /// Along the wall (normal × up), signed to match where the character looks
    fn flowing_direction(&self, body: &CharacterBody, normal: Vec3) -> Vec3 {
        let along = normal.cross(Vec3::Y).normalize_or_zero();
        if along.dot(body.facing_2d()) < 0.0 {
            -along
        } else {
            along
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BaseMovementConfig, MovementTuning};
    use crate::geometry::scene::{SceneChannels, WallScene};
    use crate::geometry::ActorId;
    use crate::movement::integrate_base;

    const DT: f32 = 1.0 / 60.0;

    /// Long wall along Z whose west face is at x = 1.0
    fn scene() -> WallScene {
        let mut scene = WallScene::new();
        scene.add_box(Vec3::new(1.5, 5.0, 0.0), Vec3::new(0.5, 5.0, 20.0), SceneChannels::ALL);
        scene
    }

    fn body(position: Vec3, facing: Vec3) -> CharacterBody {
        let mut body = CharacterBody::new(ActorId(1), position, &BaseMovementConfig::default());
        body.view_direction = facing;
        body
    }

    #[test]
    fn test_teleport_moves_along_view_and_clears() {
        let scene = WallScene::new();
        let ctx = TickContext::new(0.0, &scene);
        let mut abilities = AbilityMovement::default();
        let mut body = body(Vec3::new(0.0, 3.0, 0.0), Vec3::X);

        abilities.set_triggering_teleport(true);
        abilities.execute(&mut body, &ctx, DT);

        assert!((body.position - Vec3::new(10.0, 3.0, 0.0)).length() < 1e-4);
        assert!(!abilities.triggering_teleport());
        let events = abilities.drain_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], AbilityEvent::Teleported { .. }));
    }

    #[test]
    fn test_wall_jump_pushes_away_from_wall() {
        let scene = scene();
        let ctx = TickContext::new(0.0, &scene);
        let mut abilities = AbilityMovement::default();
        let mut body = body(Vec3::new(0.3, 3.0, 0.0), Vec3::X);

        abilities.set_triggering_wall_jump(true);
        abilities.execute(&mut body, &ctx, DT);

        let tuning = MovementTuning::default();
        assert!((body.velocity.y - tuning.base.jump_z_velocity).abs() < 1e-4);
        assert!(body.velocity.x < 0.0, "pushed back off the wall: {:?}", body.velocity);
        assert!(!abilities.triggering_wall_jump());
    }

    #[test]
    fn test_jetpack_drains_and_lifts() {
        let scene = WallScene::new();
        let ctx = TickContext::new(0.0, &scene);
        let mut abilities = AbilityMovement::default();
        let mut body = body(Vec3::new(0.0, 0.9, 0.0), Vec3::X);
        body.set_movement_mode(MovementMode::Walking);

        abilities.set_triggering_jetpack_sprint(true);
        abilities.execute(&mut body, &ctx, 0.5);

        assert!(body.is_falling(), "lifted off the ground");
        assert!(body.velocity.y > 0.0);
        assert!((abilities.jetpack_energy() - 95.0).abs() < 1e-3);
        assert!(abilities.triggering_jetpack_sprint(), "held request is not consumed");
    }

    #[test]
    fn test_jetpack_depletes_and_recharges() {
        let scene = WallScene::new();
        let ctx = TickContext::new(0.0, &scene);
        let mut abilities = AbilityMovement::default();
        let mut body = body(Vec3::new(0.0, 50.0, 0.0), Vec3::X);
        abilities.state_mut().energy.current = 1.0;

        abilities.set_triggering_jetpack_sprint(true);
        abilities.execute(&mut body, &ctx, 1.0);
        assert_eq!(abilities.jetpack_energy(), 0.0);
        assert!(abilities
            .drain_events()
            .contains(&AbilityEvent::JetpackDepleted));

        let vy = body.velocity.y;
        abilities.execute(&mut body, &ctx, 1.0);
        assert_eq!(body.velocity.y, vy, "no thrust without energy");

        // Held with an empty tank recharges like idle
        assert!((abilities.jetpack_energy() - 10.0).abs() < 1e-3);

        abilities.set_triggering_jetpack_sprint(false);
        abilities.execute(&mut body, &ctx, 2.0);
        assert!((abilities.jetpack_energy() - 30.0).abs() < 1e-3);
    }

    #[test]
    fn test_wall_run_enter_and_follow() {
        let scene = scene();
        let ctx = TickContext::new(1.0, &scene);
        let mut abilities = AbilityMovement::default();
        let mut body = body(Vec3::new(0.3, 3.0, 0.0), Vec3::Z);
        body.velocity = Vec3::new(2.0, -3.0, 4.0);

        abilities.set_triggering_wall_run(&body, true);
        abilities.execute(&mut body, &ctx, DT);

        assert!(body.is_wall_running());
        assert!(abilities.is_flowing());
        assert!(!abilities.state().availability.jetpack_sprint);
        assert!((abilities.state().timers.max_ending_time - 4.0).abs() < 1e-9);
        assert!((body.position.x - 0.3).abs() < 1e-3, "kept at sliding distance");
        assert!((body.velocity - Vec3::Z * 6.0).length() < 1e-3, "runs along the wall");
    }

    #[test]
    fn test_wall_run_times_out() {
        let scene = scene();
        let mut abilities = AbilityMovement::default();
        let mut body = body(Vec3::new(0.3, 3.0, 0.0), Vec3::Z);

        abilities.set_triggering_wall_run(&body, true);
        abilities.execute(&mut body, &TickContext::new(0.0, &scene), DT);
        assert!(body.is_wall_running());
        abilities.drain_events();

        abilities.execute(&mut body, &TickContext::new(3.0, &scene), DT);
        assert!(body.is_falling());
        assert_eq!(
            abilities.drain_events(),
            vec![AbilityEvent::WallRunStopped {
                reason: WallRunStopReason::TimedOut
            }]
        );
        assert!(abilities.can_wall_run_jump(3.5));
    }

    #[test]
    fn test_wall_run_drops_off_wall_end() {
        let scene = scene();
        let config = BaseMovementConfig::default();
        let mut abilities = AbilityMovement::default();
        let mut body = body(Vec3::new(0.3, 3.0, 18.0), Vec3::Z);

        abilities.set_triggering_wall_run(&body, true);
        let mut now = 0.0;
        let mut stopped = false;
        for _ in 0..120 {
            abilities.execute(&mut body, &TickContext::new(now, &scene), DT);
            integrate_base(&mut body, &Default::default(), &config, DT);
            now += f64::from(DT);
            if abilities.drain_events().contains(&AbilityEvent::WallRunStopped {
                reason: WallRunStopReason::LostWall,
            }) {
                stopped = true;
                break;
            }
        }
        assert!(stopped, "run should end past the wall at z = 20");
        assert!(body.is_falling());
    }

    #[test]
    fn test_toggle_stops_running() {
        let scene = scene();
        let ctx = TickContext::new(0.0, &scene);
        let mut abilities = AbilityMovement::default();
        let mut body = body(Vec3::new(0.3, 3.0, 0.0), Vec3::Z);

        abilities.set_triggering_wall_run(&body, true);
        abilities.execute(&mut body, &ctx, DT);
        assert!(body.is_wall_running());

        abilities.set_triggering_wall_run(&body, true);
        assert!(abilities.state().availability.jetpack_sprint);
        abilities.execute(&mut body, &ctx, DT);
        assert!(body.is_falling());
        assert!(!abilities.triggering_wall_run());
    }

    #[test]
    fn test_wall_run_jump_consumed_once() {
        let scene = scene();
        let ctx = TickContext::new(0.0, &scene);
        let mut abilities = AbilityMovement::default();
        let mut body = body(Vec3::new(0.3, 3.0, 0.0), Vec3::Z);

        abilities.set_triggering_wall_run(&body, true);
        abilities.execute(&mut body, &ctx, DT);
        assert!(abilities.can_wall_run_jump(ctx.now));

        abilities.set_triggering_wall_run_jump(true);
        abilities.execute(&mut body, &ctx, DT);

        assert!(body.is_falling());
        assert!(body.velocity.y > 8.0);
        assert!(body.velocity.x < 0.0, "lateral push away from the wall");
        assert!(abilities.is_flowing());
        assert!(!abilities.can_wall_run_jump(ctx.now));
        assert!(!abilities.request_wall_run_jump(&ctx));
    }

    #[test]
    fn test_wall_run_jump_beats_same_tick_toggle() {
        let scene = scene();
        let ctx = TickContext::new(0.0, &scene);
        let mut abilities = AbilityMovement::default();
        let mut body = body(Vec3::new(0.3, 3.0, 0.0), Vec3::Z);
        let state = abilities.state_mut();
        state.flow.flowing = true;
        state.flow.jump_once = true;
        state.timers.max_jump_time = 1.0;
        state.flow.last_hit_point.normal = Vec3::NEG_X;

        abilities.set_triggering_wall_run(&body, true);
        abilities.set_triggering_wall_run_jump(true);
        abilities.execute(&mut body, &ctx, DT);

        assert!(!body.is_wall_running(), "toggle discarded");
        assert!(!abilities.state().requests.wall_run);
        assert!(!abilities.state().requests.wall_run_jump);
    }

    #[test]
    fn test_landing_ends_flow() {
        let scene = WallScene::new();
        let ctx = TickContext::new(0.0, &scene);
        let mut abilities = AbilityMovement::default();
        let mut body = body(Vec3::new(0.0, 0.9, 0.0), Vec3::Z);
        body.set_movement_mode(MovementMode::Walking);
        abilities.state_mut().flow.flowing = true;

        abilities.execute(&mut body, &ctx, DT);
        assert!(!abilities.is_flowing());
    }

    #[test]
    fn test_replay_emits_no_events() {
        let scene = WallScene::new();
        let mut abilities = AbilityMovement::default();
        let mut body = body(Vec3::new(0.0, 3.0, 0.0), Vec3::X);

        abilities.set_triggering_teleport(true);
        abilities.execute(&mut body, &TickContext::replay(0.0, &scene), DT);
        assert!(abilities.drain_events().is_empty());
    }
}
