//! [`RayCaster`] backed by a `bevy_rapier3d` physics context.
//!
//! Channels map to collision groups; the querying character's entity is
//! excluded both as a collider and as a rigid body.

use bevy::prelude::*;
use bevy_rapier3d::prelude::*;

use super::{ActorId, RayCaster, SurfaceHit, TraceChannel};

impl From<Entity> for ActorId {
    fn from(entity: Entity) -> Self {
        ActorId(entity.to_bits())
    }
}

pub struct RapierRayCaster<'a> {
    context: &'a RapierContext,
    visibility: CollisionGroups,
    pawn: CollisionGroups,
}

impl<'a> RapierRayCaster<'a> {
    /// Both channels see every group until narrowed with [`Self::with_groups`]
    pub fn new(context: &'a RapierContext) -> Self {
        Self {
            context,
            visibility: CollisionGroups::new(Group::ALL, Group::ALL),
            pawn: CollisionGroups::new(Group::ALL, Group::ALL),
        }
    }

    pub fn with_groups(mut self, visibility: CollisionGroups, pawn: CollisionGroups) -> Self {
        self.visibility = visibility;
        self.pawn = pawn;
        self
    }
}

impl RayCaster for RapierRayCaster<'_> {
    fn cast_ray(
        &self,
        start: Vec3,
        end: Vec3,
        channel: TraceChannel,
        ignore: Option<ActorId>,
    ) -> Option<SurfaceHit> {
        let delta = end - start;
        let length = delta.length();
        if length <= f32::EPSILON {
            return None;
        }

        let groups = match channel {
            TraceChannel::Visibility => self.visibility,
            TraceChannel::Pawn => self.pawn,
        };
        let mut filter = QueryFilter::new().groups(groups).exclude_sensors();
        if let Some(entity) = ignore.and_then(|id| Entity::try_from_bits(id.0).ok()) {
            filter = filter.exclude_collider(entity).exclude_rigid_body(entity);
        }

        let (_, hit) =
            self.context
                .cast_ray_and_get_normal(start, delta / length, length, true, filter)?;
        Some(SurfaceHit {
            distance: hit.time_of_impact,
            position: hit.point,
            normal: hit.normal,
        })
    }
}
