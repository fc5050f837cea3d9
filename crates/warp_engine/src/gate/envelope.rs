//! Jump envelopes
//!
//! The envelope is the ellipsoid defining what counts as "inside" a
//! gate's jump space: a lateral radius in the gate plane and a depth
//! along the plane normal. The local form is stored relative to the
//! owning construct; the world form is resolved on demand from the
//! construct transform and is never persisted.

use serde::{Serialize, Deserialize};

use crate::foundation::math::{Quat, Transform, Vec3};

/// Construct-local jump envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JumpEnvelope {
    /// Envelope center offset in construct-local space
    pub center: Vec3,

    /// Outward-facing plane normal in construct-local space (unit)
    pub normal: Vec3,

    /// Semi-axis in the gate plane (meters)
    pub lateral_radius: f32,

    /// Semi-axis along the normal (meters)
    pub depth: f32,
}

impl JumpEnvelope {
    /// An envelope that contains nothing and overlaps nothing
    pub fn degenerate() -> Self {
        Self {
            center: Vec3::zeros(),
            normal: Vec3::z(),
            lateral_radius: 0.0,
            depth: 0.0,
        }
    }

    /// Whether the envelope is unusable
    pub fn is_degenerate(&self) -> bool {
        self.lateral_radius <= f32::EPSILON
            || self.depth <= f32::EPSILON
            || self.normal.magnitude() <= f32::EPSILON
    }

    /// Resolve the envelope into world space with the owning construct's
    /// transform
    pub fn to_world(&self, construct_transform: &Transform) -> WorldEnvelope {
        WorldEnvelope {
            center: construct_transform.transform_point(self.center),
            normal: construct_transform
                .transform_vector(self.normal)
                .normalize(),
            lateral_radius: self.lateral_radius,
            depth: self.depth,
        }
    }
}

/// World-space resolution of a [`JumpEnvelope`]
#[derive(Debug, Clone, PartialEq)]
pub struct WorldEnvelope {
    /// Envelope center in world space
    pub center: Vec3,
    /// Outward plane normal in world space (unit)
    pub normal: Vec3,
    /// Semi-axis in the gate plane (meters)
    pub lateral_radius: f32,
    /// Semi-axis along the normal (meters)
    pub depth: f32,
}

impl WorldEnvelope {
    /// Whether the envelope is unusable
    pub fn is_degenerate(&self) -> bool {
        self.lateral_radius <= f32::EPSILON || self.depth <= f32::EPSILON
    }

    /// Orthonormal basis (u, v, normal) of the envelope frame
    pub fn basis(&self) -> (Vec3, Vec3, Vec3) {
        let n = self.normal;
        let helper = if n.x.abs() < 0.9 { Vec3::x() } else { Vec3::y() };
        let u = n.cross(&helper).normalize();
        let v = n.cross(&u);
        (u, v, n)
    }

    /// Rotation mapping envelope-local axes into world space
    pub fn rotation(&self) -> Quat {
        let (u, v, n) = self.basis();
        let m = crate::foundation::math::Mat3::from_columns(&[u, v, n]);
        Quat::from_matrix(&m)
    }

    /// Map a world point into envelope-local (u, v, normal) coordinates
    pub fn to_local(&self, world_point: Vec3) -> Vec3 {
        let (u, v, n) = self.basis();
        let d = world_point - self.center;
        Vec3::new(d.dot(&u), d.dot(&v), d.dot(&n))
    }

    /// Map an envelope-local point back into world space
    pub fn from_local(&self, local: Vec3) -> Vec3 {
        let (u, v, n) = self.basis();
        self.center + u * local.x + v * local.y + n * local.z
    }

    /// Ellipsoid containment test
    pub fn contains_point(&self, world_point: Vec3) -> bool {
        if self.is_degenerate() {
            return false;
        }
        let local = self.to_local(world_point);
        let lateral_sq = (local.x * local.x + local.y * local.y)
            / (self.lateral_radius * self.lateral_radius);
        let axial_sq = (local.z * local.z) / (self.depth * self.depth);
        lateral_sq + axial_sq <= 1.0
    }

    /// Radius of the ellipsoid surface along a world-space unit direction
    pub fn radius_toward(&self, direction: Vec3) -> f32 {
        if self.is_degenerate() {
            return 0.0;
        }
        let axial = direction.dot(&self.normal);
        let lateral_sq = (1.0 - axial * axial).max(0.0);
        let inv_sq = lateral_sq / (self.lateral_radius * self.lateral_radius)
            + (axial * axial) / (self.depth * self.depth);
        if inv_sq <= f32::EPSILON {
            0.0
        } else {
            1.0 / inv_sq.sqrt()
        }
    }

    /// Conservative ellipsoid-ellipsoid overlap test along the
    /// center-to-center direction
    pub fn intersects(&self, other: &WorldEnvelope) -> bool {
        if self.is_degenerate() || other.is_degenerate() {
            return false;
        }
        let offset = other.center - self.center;
        let distance = offset.magnitude();
        if distance <= f32::EPSILON {
            return true;
        }
        let dir = offset / distance;
        distance <= self.radius_toward(dir) + other.radius_toward(-dir)
    }

    /// Shrink to the intersection with another envelope's extents,
    /// keeping this envelope's frame. Used for the effective jump space
    /// of a tethered gate pair.
    pub fn clamped_to(&self, other: &WorldEnvelope) -> WorldEnvelope {
        WorldEnvelope {
            center: self.center,
            normal: self.normal,
            lateral_radius: self.lateral_radius.min(other.lateral_radius),
            depth: self.depth.min(other.depth),
        }
    }
}
