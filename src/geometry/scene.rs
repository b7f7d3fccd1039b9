//! In-memory collision scene of axis-aligned boxes.
//!
//! Stands in for the host physics engine in the headless demo, tests and
//! benches. Boxes are traced in insertion order so results are reproducible.

use bevy::prelude::*;

use super::{ActorId, RayCaster, SurfaceHit, TraceChannel};

/// Which trace channels a box blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SceneChannels(pub u8);

impl SceneChannels {
    pub const NONE: Self = Self(0);
    pub const VISIBILITY: Self = Self(1 << 0);
    pub const PAWN: Self = Self(1 << 1);
    pub const ALL: Self = Self(Self::VISIBILITY.0 | Self::PAWN.0);

    #[inline]
    pub fn blocks(&self, channel: TraceChannel) -> bool {
        let bit = match channel {
            TraceChannel::Visibility => Self::VISIBILITY.0,
            TraceChannel::Pawn => Self::PAWN.0,
        };
        self.0 & bit != 0
    }
}

#[derive(Debug, Clone)]
pub struct SceneBox {
    pub id: u32,
    pub center: Vec3,
    pub half_extents: Vec3,
    pub channels: SceneChannels,
    /// Character this box belongs to, if it is a character's own collider
    pub owner: Option<ActorId>,
}

impl SceneBox {
    /// Entry distance and face normal of a ray against this box.
    ///
    /// Rays starting inside the box report nothing.
    fn intersect(&self, start: Vec3, direction: Vec3, length: f32) -> Option<(f32, Vec3)> {
        let min = self.center - self.half_extents;
        let max = self.center + self.half_extents;

        let mut t_enter = f32::NEG_INFINITY;
        let mut t_exit = f32::INFINITY;
        let mut normal = Vec3::ZERO;

        for axis in 0..3 {
            let s = start[axis];
            let d = direction[axis];
            if d.abs() < f32::EPSILON {
                if s < min[axis] || s > max[axis] {
                    return None;
                }
                continue;
            }
            let mut t1 = (min[axis] - s) / d;
            let mut t2 = (max[axis] - s) / d;
            if t1 > t2 {
                std::mem::swap(&mut t1, &mut t2);
            }
            if t1 > t_enter {
                t_enter = t1;
                normal = Vec3::ZERO;
                normal[axis] = -d.signum();
            }
            t_exit = t_exit.min(t2);
        }

        if t_enter > t_exit || t_enter < 0.0 || t_enter > length {
            return None;
        }
        Some((t_enter, normal))
    }
}

#[derive(Debug, Clone, Default)]
pub struct WallScene {
    boxes: Vec<SceneBox>,
    next_id: u32,
}

impl WallScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_box(&mut self, center: Vec3, half_extents: Vec3, channels: SceneChannels) -> u32 {
        self.push(center, half_extents, channels, None)
    }

    /// Add a box that belongs to a character (ignored by that character's own traces)
    pub fn add_owned_box(
        &mut self,
        owner: ActorId,
        center: Vec3,
        half_extents: Vec3,
        channels: SceneChannels,
    ) -> u32 {
        self.push(center, half_extents, channels, Some(owner))
    }

    fn push(
        &mut self,
        center: Vec3,
        half_extents: Vec3,
        channels: SceneChannels,
        owner: Option<ActorId>,
    ) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.boxes.push(SceneBox {
            id,
            center,
            half_extents: half_extents.abs(),
            channels,
            owner,
        });
        id
    }

    /// Move a box, e.g. a character's own collider following its body
    pub fn move_box(&mut self, id: u32, center: Vec3) -> bool {
        match self.boxes.iter_mut().find(|b| b.id == id) {
            Some(b) => {
                b.center = center;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }
}

impl RayCaster for WallScene {
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
        let direction = delta / length;

        let mut best: Option<SurfaceHit> = None;
        for scene_box in &self.boxes {
            if !scene_box.channels.blocks(channel) {
                continue;
            }
            if ignore.is_some() && scene_box.owner == ignore {
                continue;
            }
            let Some((distance, normal)) = scene_box.intersect(start, direction, length) else {
                continue;
            };
            if best.is_none_or(|current| distance < current.distance) {
                best = Some(SurfaceHit {
                    distance,
                    position: start + direction * distance,
                    normal,
                });
            }
        }
        best
    }
}
