//! Geometry queries consumed by the movement layer.
//!
//! The physics engine stays outside this crate: everything here talks to it
//! through [`RayCaster`]. "No surface" is a normal answer (`None`), never an
//! error.

use bevy::prelude::*;

use crate::constants::DIRECTION_EPSILON;

pub mod detector;
pub mod rapier;
pub mod scene;

pub use detector::WallDetector;
pub use scene::WallScene;

/// Stable identity of a character for self-exclusion in ray queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ActorId(pub u64);

/// Collision channel a ray is traced against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceChannel {
    /// Anything that blocks sight; broad, used to confirm a surface exists
    Visibility,
    /// Geometry a pawn collides with; narrow, gives the precise grip point
    Pawn,
}

/// Where a ray met a surface
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SurfaceHit {
    /// Distance from the ray start to `position`
    pub distance: f32,
    pub position: Vec3,
    /// Unit normal pointing away from the surface
    pub normal: Vec3,
}

/// Ray-intersection service provided by the host physics engine.
///
/// Implementations must be deterministic: the same query against the same
/// world returns the same hit on client and server. `ignore` names the
/// querying character, which must never be reported as a hit.
pub trait RayCaster {
    fn cast_ray(
        &self,
        start: Vec3,
        end: Vec3,
        channel: TraceChannel,
        ignore: Option<ActorId>,
    ) -> Option<SurfaceHit>;
}

impl<T: RayCaster + ?Sized> RayCaster for &T {
    fn cast_ray(
        &self,
        start: Vec3,
        end: Vec3,
        channel: TraceChannel,
        ignore: Option<ActorId>,
    ) -> Option<SurfaceHit> {
        (**self).cast_ray(start, end, channel, ignore)
    }
}

/// Horizontal (XZ-plane) part of a direction, normalized; zero if degenerate
pub fn horizontal(direction: Vec3) -> Vec3 {
    let flat = Vec3::new(direction.x, 0.0, direction.z);
    if flat.length_squared() < DIRECTION_EPSILON * DIRECTION_EPSILON {
        Vec3::ZERO
    } else {
        flat.normalize()
    }
}

/// Heading of a direction around the up axis, in degrees (-180, 180]
pub fn yaw_degrees(direction: Vec3) -> f32 {
    direction.z.atan2(direction.x).to_degrees()
}

/// Fold an angle delta into [0, 180]: the delta itself if at most 180,
/// otherwise its explement.
pub fn normalize_angle(delta: f32) -> f32 {
    let delta = delta.abs().rem_euclid(360.0);
    if delta > 180.0 {
        360.0 - delta
    } else {
        delta
    }
}

/// Angle between where the character faces and the inverse of a wall normal.
/// 0 means facing the wall head-on.
pub fn impact_angle(facing: Vec3, normal: Vec3) -> f32 {
    normalize_angle(yaw_degrees(facing) - (yaw_degrees(normal) - 180.0))
}

/// Whether two wall normals point the "same" way within `tolerance` degrees.
/// Used to stop the character from re-gripping the wall it just left.
pub fn is_same_surface(previous: Vec3, candidate: Vec3, tolerance: f32) -> bool {
    let delta = (yaw_degrees(previous) - yaw_degrees(candidate)).abs();
    delta < tolerance || 360.0 - delta < tolerance
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_angle_range() {
        assert_eq!(normalize_angle(0.0), 0.0);
        assert_eq!(normalize_angle(180.0), 180.0);
        assert!((normalize_angle(190.0) - 170.0).abs() < 1e-4);
        assert!((normalize_angle(350.0) - 10.0).abs() < 1e-4);
        assert!((normalize_angle(-30.0) - 30.0).abs() < 1e-4);
        assert!((normalize_angle(540.0) - 180.0).abs() < 1e-4);
    }

    #[test]
    fn test_impact_angle_head_on() {
        // Facing +X into a wall whose normal points back along -X
        let angle = impact_angle(Vec3::X, Vec3::NEG_X);
        assert!(angle.abs() < 1e-3, "head-on impact should be 0, got {angle}");
    }

    #[test]
    fn test_impact_angle_parallel() {
        let angle = impact_angle(Vec3::Z, Vec3::NEG_X);
        assert!((angle - 90.0).abs() < 1e-3);
    }

    #[test]
    fn test_same_surface_wraps_around() {
        let a = Vec3::new(1.0, 0.0, 0.01).normalize();
        let b = Vec3::new(1.0, 0.0, -0.01).normalize();
        assert!(is_same_surface(a, b, 5.0));
        assert!(!is_same_surface(Vec3::X, Vec3::Z, 20.0));
        // Yaws near ±180 are close even though their raw difference is ~360
        let c = Vec3::new(-1.0, 0.0, 0.01).normalize();
        let d = Vec3::new(-1.0, 0.0, -0.01).normalize();
        assert!(is_same_surface(c, d, 5.0));
    }

    #[test]
    fn test_horizontal_drops_vertical() {
        let flat = horizontal(Vec3::new(3.0, 10.0, 4.0));
        assert!((flat - Vec3::new(0.6, 0.0, 0.8)).length() < 1e-5);
        assert_eq!(horizontal(Vec3::Y), Vec3::ZERO);
    }
}
