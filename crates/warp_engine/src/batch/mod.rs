//! Entity batch assembly and obstruction resolution
//!
//! Everything inside a gate's effective envelope is grouped into atomic
//! transit batches: a root object plus whatever is physically attached
//! or geometrically nested in it. Batches never overlap; two batches
//! discovered to share members are merged, and the merge is idempotent
//! regardless of discovery order.

use std::collections::BTreeSet;

use crate::config::{AttachmentPolicy, EngineSettings};
use crate::foundation::math::{Aabb, Transform, Vec3};
use crate::gate::{ControllerSettings, FitPolicy, WorldEnvelope};
use crate::world::{ConstructKey, EntityKey, WorldModel};

/// The object a batch is anchored on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BatchRoot {
    /// A construct (grids always root their own batch)
    Construct(ConstructKey),
    /// A free entity with no owning construct
    Entity(EntityKey),
}

/// An atomic group of world objects that transit together
#[derive(Debug, Clone)]
pub struct EntityBatch {
    /// Anchor object
    pub root: BatchRoot,
    /// Construct members, root included when it is a construct
    pub constructs: BTreeSet<ConstructKey>,
    /// Entity members
    pub entities: BTreeSet<EntityKey>,
    /// Precomputed destination transform for the root
    pub destination: Transform,
    /// World-space obstruction volume at the destination
    pub obstruction: Aabb,
    /// Combined member mass (kg)
    pub mass_kg: f32,
}

impl EntityBatch {
    /// Whether two batches share any member
    pub fn overlaps(&self, other: &EntityBatch) -> bool {
        self.constructs.intersection(&other.constructs).next().is_some()
            || self.entities.intersection(&other.entities).next().is_some()
    }

    /// Merge another batch into this one: union of members and union of
    /// obstruction volumes. Idempotent regardless of discovery order.
    pub fn merge(&mut self, other: EntityBatch) {
        self.root = self.root.min(other.root);
        self.constructs.extend(other.constructs);
        self.entities.extend(other.entities);
        self.obstruction = self.obstruction.union(&other.obstruction);
        self.mass_kg += other.mass_kg;
    }
}

/// Result of a batch resolution pass
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Batches cleared for transit
    pub batches: Vec<EntityBatch>,
    /// Batches skipped for obstruction, fit, filter, or attachment
    /// reasons; skipping never fails the whole jump
    pub skipped: usize,
}

/// Groups the contents of a source envelope into transit batches
pub struct BatchResolver<'a> {
    /// World being resolved against
    pub world: &'a WorldModel,
    /// Engine-wide settings
    pub settings: &'a EngineSettings,
    /// Controller settings of the jump, for mass/size filters
    pub controller: &'a ControllerSettings,
    /// The construct the source gate belongs to; never transits itself
    pub source_construct: ConstructKey,
    /// Effective source envelope
    pub source: WorldEnvelope,
    /// Arrival frame
    pub target: WorldEnvelope,
}

impl<'a> BatchResolver<'a> {
    /// Resolve all eligible batches inside the source envelope
    pub fn resolve(&self) -> BatchReport {
        let mut report = BatchReport::default();
        let mut batches: Vec<EntityBatch> = Vec::new();

        let mut roots: BTreeSet<BatchRoot> = BTreeSet::new();
        for key in self.world.constructs_in(&self.source) {
            if let Some(root) = self.resolve_construct_root(key) {
                roots.insert(root);
            }
        }
        for key in self.world.entities_in(&self.source) {
            if let Some(root) = self.resolve_entity_root(key) {
                roots.insert(root);
            }
        }

        for root in roots {
            match self.build_batch(root) {
                Some(batch) => batches.push(batch),
                None => report.skipped += 1,
            }
        }

        report.batches = merge_overlapping(batches);
        report
    }

    /// A sub-structure's true batch root is its owning construct
    fn resolve_construct_root(&self, key: ConstructKey) -> Option<BatchRoot> {
        if key == self.source_construct {
            return None;
        }
        let construct = self.world.constructs.get(key)?;
        if construct.mid_transit {
            return None;
        }
        Some(BatchRoot::Construct(key))
    }

    fn resolve_entity_root(&self, key: EntityKey) -> Option<BatchRoot> {
        let entity = self.world.entities.get(key)?;
        if entity.mid_transit {
            return None;
        }
        match entity.owner {
            // The jump source never batches itself
            Some(owner) if owner == self.source_construct => None,
            Some(owner) => self.resolve_construct_root(owner),
            None => Some(BatchRoot::Entity(key)),
        }
    }

    fn build_batch(&self, root: BatchRoot) -> Option<EntityBatch> {
        let mut constructs = BTreeSet::new();
        let mut entities = BTreeSet::new();
        let (root_transform, root_extent) = match root {
            BatchRoot::Construct(key) => {
                let construct = self.world.constructs.get(key)?;
                constructs.insert(key);
                // Coupled constructs and attached entities move as one
                for coupled in &construct.coupled_constructs {
                    constructs.insert(*coupled);
                }
                for attached in &construct.attached_entities {
                    if !self.can_include_entity(*attached) {
                        match self.settings.attachment_policy {
                            AttachmentPolicy::SkipBatch => return None,
                            AttachmentPolicy::LeaveBehind => continue,
                        }
                    }
                    entities.insert(*attached);
                }
                // Entities nested inside the mover's volume
                if let Some(aabb) = construct.world_aabb() {
                    for (key, entity) in self.world.entities.iter() {
                        if entity.owner.is_none()
                            && !entity.mid_transit
                            && aabb.contains_point(entity.transform.position)
                        {
                            entities.insert(key);
                        }
                    }
                }
                let extent = construct
                    .world_aabb()
                    .unwrap_or_else(|| Aabb::from_center_half_extents(
                        construct.transform.position,
                        Vec3::new(1.0, 1.0, 1.0),
                    ));
                (construct.transform.clone(), extent)
            }
            BatchRoot::Entity(key) => {
                let entity = self.world.entities.get(key)?;
                entities.insert(key);
                let r = entity.bounding_radius;
                (
                    entity.transform.clone(),
                    Aabb::from_center_half_extents(
                        entity.transform.position,
                        Vec3::new(r, r, r),
                    ),
                )
            }
        };

        let destination = self.map_destination(&root_transform);
        let shift = destination.position - root_transform.position;
        let obstruction = Aabb::new(root_extent.min + shift, root_extent.max + shift);

        let mass_kg = self.member_mass(&constructs, &entities);
        if let Some(limit) = self.controller.max_batch_mass_kg {
            if mass_kg > limit {
                return None;
            }
        }
        if let Some(limit) = self.controller.max_batch_radius_m {
            let half = (root_extent.max - root_extent.min) * 0.5;
            if half.magnitude() > limit {
                return None;
            }
        }

        match self.controller.fit_policy {
            FitPolicy::RequireWholeFit => {
                if !self.target.contains_point(obstruction.min)
                    || !self.target.contains_point(obstruction.max)
                {
                    return None;
                }
            }
            FitPolicy::CenterOnly => {
                if !self.target.contains_point(destination.position) {
                    return None;
                }
            }
        }

        if self.destination_obstructed(&constructs, &obstruction) {
            return None;
        }

        Some(EntityBatch {
            root,
            constructs,
            entities,
            destination,
            obstruction,
            mass_kg,
        })
    }

    /// Map a world transform from source-envelope space into the
    /// arrival frame
    fn map_destination(&self, transform: &Transform) -> Transform {
        let local = self.source.to_local(transform.position);
        let position = self.target.from_local(local);
        let relative = self.target.rotation() * self.source.rotation().inverse();
        Transform {
            position,
            rotation: relative * transform.rotation,
            scale: transform.scale,
        }
    }

    fn can_include_entity(&self, key: EntityKey) -> bool {
        self.world
            .entities
            .get(key)
            .map(|e| !e.mid_transit)
            .unwrap_or(false)
    }

    fn member_mass(
        &self,
        constructs: &BTreeSet<ConstructKey>,
        entities: &BTreeSet<EntityKey>,
    ) -> f32 {
        let construct_mass: f32 = constructs
            .iter()
            .filter_map(|k| self.world.constructs.get(*k))
            .map(|c| c.mass_kg)
            .sum();
        let entity_mass: f32 = entities
            .iter()
            .filter_map(|k| self.world.entities.get(*k))
            .map(|e| e.mass_kg)
            .sum();
        construct_mass + entity_mass
    }

    /// Whether any block of a moving construct would land inside a
    /// block of an already-placed construct not itself mid-transit
    fn destination_obstructed(
        &self,
        movers: &BTreeSet<ConstructKey>,
        obstruction: &Aabb,
    ) -> bool {
        for (other_key, other) in self.world.constructs.iter() {
            if movers.contains(&other_key) || other.mid_transit {
                continue;
            }
            let Some(other_aabb) = other.world_aabb() else {
                continue;
            };
            if !other_aabb.intersects(obstruction) {
                continue;
            }
            // Narrow phase: block-level containment
            for mover_key in movers {
                let Some(mover) = self.world.constructs.get(*mover_key) else {
                    continue;
                };
                let shift = obstruction.center()
                    - mover.world_aabb().map_or(obstruction.center(), |a| a.center());
                for cell in &mover.occupancy {
                    let landing = mover.world_cell_center(*cell) + shift;
                    if other.occupies_world_point(landing) {
                        return true;
                    }
                }
            }
        }
        false
    }
}

/// Merge every pair of overlapping batches until none overlap.
/// The fixpoint is independent of discovery order because member union
/// is commutative and associative.
pub fn merge_overlapping(mut batches: Vec<EntityBatch>) -> Vec<EntityBatch> {
    loop {
        let mut merged_any = false;
        'outer: for i in 0..batches.len() {
            for j in (i + 1)..batches.len() {
                if batches[i].overlaps(&batches[j]) {
                    let other = batches.swap_remove(j);
                    batches[i].merge(other);
                    merged_any = true;
                    break 'outer;
                }
            }
        }
        if !merged_any {
            break;
        }
    }
    batches.sort_by_key(|b| b.root);
    batches
}
