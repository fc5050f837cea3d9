//! Free world entities (characters, cargo pods, debris)

use crate::foundation::math::{Transform, Vec3};
use crate::world::ConstructKey;

/// A world object that is not itself a construct
pub struct WorldEntity {
    /// Display name
    pub name: String,

    /// World transform
    pub transform: Transform,

    /// Linear velocity (m/s)
    pub velocity: Vec3,

    /// Mass (kg)
    pub mass_kg: f32,

    /// Owning construct if this entity is a sub-structure of one
    pub owner: Option<ConstructKey>,

    /// Rough bounding radius for nesting tests (m)
    pub bounding_radius: f32,

    /// Whether the entity is currently mid-transit through a gate
    pub mid_transit: bool,
}

impl WorldEntity {
    /// Create a free-floating entity
    pub fn new(name: impl Into<String>, transform: Transform, mass_kg: f32) -> Self {
        Self {
            name: name.into(),
            transform,
            velocity: Vec3::zeros(),
            mass_kg,
            owner: None,
            bounding_radius: 1.0,
            mid_transit: false,
        }
    }
}
