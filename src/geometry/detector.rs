//! Wall detection for wall-jump and wall-run.
//!
//! Results feed client prediction, so ray order and tie-breaking are fixed:
//! rays are generated by index and a hit only replaces the current best if it
//! is strictly closer.

use bevy::prelude::*;

use super::{horizontal, impact_angle, ActorId, RayCaster, SurfaceHit, TraceChannel};

pub struct WallDetector<'a> {
    caster: &'a dyn RayCaster,
    ignore: Option<ActorId>,
}

impl<'a> WallDetector<'a> {
    /// `ignore` is the querying character; it is never reported as a hit
    pub fn new(caster: &'a dyn RayCaster, ignore: Option<ActorId>) -> Self {
        Self { caster, ignore }
    }

    /// Start of the forward probe: the capsule center shifted vertically by
    /// `relative_height`, clamped to stay inside the capsule.
    pub fn forward_origin(center: Vec3, half_height: f32, relative_height: f32) -> Vec3 {
        let correction = relative_height.clamp(-half_height, half_height);
        center + Vec3::Y * correction
    }

    /// Single ray along the horizontal facing, out to `reach`.
    ///
    /// The hit counts only if the character faces the wall within
    /// `max_impact_angle` degrees.
    pub fn probe_forward(
        &self,
        origin: Vec3,
        facing: Vec3,
        reach: f32,
        max_impact_angle: f32,
    ) -> Option<SurfaceHit> {
        let direction = horizontal(facing);
        if direction == Vec3::ZERO {
            return None;
        }
        let end = origin + direction * reach;
        let hit = self
            .caster
            .cast_ray(origin, end, TraceChannel::Visibility, self.ignore)?;

        let angle = impact_angle(direction, hit.normal);
        if angle < max_impact_angle {
            Some(hit)
        } else {
            trace!(angle, max_impact_angle, "forward wall rejected by impact angle");
            None
        }
    }

    /// `ray_count` rays spread evenly around the up axis, each `ring` long
    /// after rotation. A ray contributes only when it sees a visible surface
    /// *and* a pawn-blocking one; the pawn hit is the grip point. Returns the
    /// closest accepted hit.
    pub fn probe_radial(&self, origin: Vec3, ring: Vec3, ray_count: u8) -> Option<SurfaceHit> {
        if ray_count == 0 {
            return None;
        }
        let step = 360.0 / f32::from(ray_count);
        let mut best: Option<SurfaceHit> = None;

        for i in 0..ray_count {
            let rotation = Quat::from_axis_angle(Vec3::Y, (step * f32::from(i)).to_radians());
            let end = origin + rotation * ring;

            if self
                .caster
                .cast_ray(origin, end, TraceChannel::Visibility, self.ignore)
                .is_none()
            {
                continue;
            }
            let Some(grip) = self
                .caster
                .cast_ray(origin, end, TraceChannel::Pawn, self.ignore)
            else {
                continue;
            };

            if best.is_none_or(|current| grip.distance < current.distance) {
                best = Some(grip);
            }
        }

        best
    }
}
