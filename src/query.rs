// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Views: declarative archetype filters plus row-streaming and chunk-batched
//! iteration over whatever currently matches them.
//!
//! Grounded on the teacher's `QuerySignature`/`QueryFilter` (a required/excluded
//! mask checked against each archetype's signature), extended with the `Any`,
//! `OneOf`, and `Optional` filter terms and a chunk-batched iteration path for
//! SIMD/cache-friendly consumers, plus a `rayon`-backed parallel pass over chunks.

use smallvec::SmallVec;

use crate::archetype::{Archetype, ChunkView, PackedLocation};
use crate::archetype_manager::ArchetypeManager;
use crate::component::{Component, ComponentId, ComponentRegistry};
use crate::entity::Entity;
use crate::mask::ComponentMask;

const MAX_GROUPS: usize = 8;

/// A single filter term contributing to a [`View`].
#[derive(Debug, Clone, Copy)]
pub enum FilterTerm {
    /// The component must be present.
    Required(ComponentId),
    /// The component must be absent.
    Not(ComponentId),
    /// At least one component in the group must be present.
    Any(ComponentMask),
    /// Exactly one component in the group must be present.
    OneOf(ComponentMask),
    /// The component may or may not be present; does not constrain matching.
    Optional(ComponentId),
}

/// Builds a [`View`] from typed filter terms, resolving each `T` to a
/// [`ComponentId`] via `registry` as the term is added.
pub struct ViewBuilder<'a> {
    registry: &'a ComponentRegistry,
    required: ComponentMask,
    excluded: ComponentMask,
    optional: ComponentMask,
    any_groups: SmallVec<[ComponentMask; MAX_GROUPS]>,
    one_of_groups: SmallVec<[ComponentMask; MAX_GROUPS]>,
}

impl<'a> ViewBuilder<'a> {
    pub fn new(registry: &'a ComponentRegistry) -> Self {
        ViewBuilder {
            registry,
            required: ComponentMask::EMPTY,
            excluded: ComponentMask::EMPTY,
            optional: ComponentMask::EMPTY,
            any_groups: SmallVec::new(),
            one_of_groups: SmallVec::new(),
        }
    }

    pub fn required<T: Component>(mut self) -> Self {
        self.required.set(self.registry.register::<T>());
        self
    }

    pub fn not<T: Component>(mut self) -> Self {
        self.excluded.set(self.registry.register::<T>());
        self
    }

    pub fn optional<T: Component>(mut self) -> Self {
        self.optional.set(self.registry.register::<T>());
        self
    }

    /// At least one of `T1, T2` must be present on a matching archetype.
    pub fn any<T1: Component, T2: Component>(mut self) -> Self {
        let mask = ComponentMask::EMPTY.with(self.registry.register::<T1>()).with(self.registry.register::<T2>());
        self.any_groups.push(mask);
        self
    }

    /// Exactly one of `T1, T2` may be present on a matching archetype.
    pub fn one_of<T1: Component, T2: Component>(mut self) -> Self {
        let mask = ComponentMask::EMPTY.with(self.registry.register::<T1>()).with(self.registry.register::<T2>());
        self.one_of_groups.push(mask);
        self
    }

    pub fn build(self) -> View {
        View {
            required: self.required,
            excluded: self.excluded,
            optional: self.optional,
            any_groups: self.any_groups,
            one_of_groups: self.one_of_groups,
        }
    }
}

/// A resolved, reusable archetype filter. Cheap to keep around and re-run:
/// matching is a handful of mask operations per archetype, no allocation.
#[derive(Debug, Clone)]
pub struct View {
    required: ComponentMask,
    excluded: ComponentMask,
    optional: ComponentMask,
    any_groups: SmallVec<[ComponentMask; MAX_GROUPS]>,
    one_of_groups: SmallVec<[ComponentMask; MAX_GROUPS]>,
}

impl View {
    /// Components marked `.optional::<T>()` on the builder: never constrain
    /// matching, but a caller can intersect this with an archetype's mask
    /// (as seen in `for_each_entity`/`for_each_chunk`'s callback) to learn
    /// which optional components a given matched row actually carries.
    pub fn optional(&self) -> ComponentMask {
        self.optional
    }

    pub fn matches(&self, mask: ComponentMask) -> bool {
        if !mask.is_superset_of(self.required) || !mask.is_disjoint(self.excluded) {
            return false;
        }
        if self.any_groups.iter().any(|group| mask.intersection(*group).is_empty()) {
            return false;
        }
        if self.one_of_groups.iter().any(|group| mask.intersection(*group).len() != 1) {
            return false;
        }
        true
    }

    /// Archetype indices currently matching this view. Recomputed each call:
    /// the archetype graph can grow between calls as new signatures appear.
    pub fn matching_archetypes(&self, manager: &ArchetypeManager) -> Vec<usize> {
        manager.archetypes_matching(|mask| self.matches(mask))
    }

    /// Row-streaming iteration: one callback per matching entity, in archetype
    /// then chunk then row order. Simplest path; prefer
    /// [`View::for_each_chunk`] when iterating over wide columns.
    pub fn for_each_entity<F: FnMut(Entity, &Archetype, PackedLocation)>(&self, manager: &ArchetypeManager, mut f: F) {
        for &archetype_id in &self.matching_archetypes(manager) {
            let archetype = &manager.archetypes()[archetype_id];
            archetype.for_each_chunk(|chunk| {
                for (row, &entity) in chunk.entities().iter().enumerate() {
                    let loc = PackedLocation::new(chunk.chunk_index(), row as u32);
                    f(entity, archetype, loc);
                }
            });
        }
    }

    /// Chunk-batched iteration: one callback per occupied chunk across every
    /// matching archetype, handing the callback a [`ChunkView`] it can pull
    /// typed column slices from.
    pub fn for_each_chunk<F: FnMut(&Archetype, ChunkView<'_>)>(&self, manager: &ArchetypeManager, mut f: F) {
        for &archetype_id in &self.matching_archetypes(manager) {
            let archetype = &manager.archetypes()[archetype_id];
            archetype.for_each_chunk(|chunk| f(archetype, chunk));
        }
    }

    /// Like [`View::for_each_chunk`], but chunks are visited across a `rayon`
    /// thread pool. `f` must not assume chunks arrive in any particular order,
    /// and must not itself mutate the archetype graph (no spawn/despawn from
    /// within `f`).
    #[cfg(feature = "parallel")]
    pub fn parallel_for_each_chunk<F>(&self, manager: &ArchetypeManager, f: F)
    where
        F: Fn(&Archetype, ChunkView<'_>) + Sync,
    {
        use rayon::prelude::*;

        let archetype_ids = self.matching_archetypes(manager);
        archetype_ids.par_iter().for_each(|&archetype_id| {
            let archetype = &manager.archetypes()[archetype_id];
            archetype.for_each_chunk(|chunk| f(archetype, chunk));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkPoolConfig;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Position {
        x: f32,
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Velocity {
        dx: f32,
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Frozen;

    fn manager() -> ArchetypeManager {
        ArchetypeManager::new(ComponentRegistry::new(), ChunkPoolConfig { page_size: 1024, ..Default::default() })
    }

    #[test]
    fn required_and_excluded_filter_archetypes() {
        let mut m = manager();
        let moving = Entity::new(0, 1);
        let frozen = Entity::new(1, 1);
        m.spawn_bundle(moving, (Position { x: 0.0 }, Velocity { dx: 1.0 })).unwrap();
        m.spawn_bundle(frozen, (Position { x: 0.0 }, Velocity { dx: 1.0 }, Frozen)).unwrap();

        let registry = m.registry().clone();
        let view = ViewBuilder::new(&registry).required::<Position>().required::<Velocity>().not::<Frozen>().build();

        let mut seen = Vec::new();
        view.for_each_entity(&m, |entity, _, _| seen.push(entity));
        assert_eq!(seen, vec![moving]);
    }

    #[test]
    fn one_of_matches_exactly_one_variant() {
        let mut m = manager();
        let a = Entity::new(0, 1);
        let b = Entity::new(1, 1);
        let both = Entity::new(2, 1);
        m.spawn_bundle(a, (Position { x: 0.0 },)).unwrap();
        m.add_component(a, Velocity { dx: 1.0 }).unwrap();
        m.spawn_bundle(b, (Position { x: 0.0 },)).unwrap();
        m.spawn_bundle(both, (Position { x: 0.0 }, Velocity { dx: 1.0 }, Frozen)).unwrap();
        m.add_component(both, Velocity { dx: 1.0 }).unwrap();

        let registry = m.registry().clone();
        let view = ViewBuilder::new(&registry).required::<Position>().one_of::<Velocity, Frozen>().build();

        let mut seen: Vec<Entity> = Vec::new();
        view.for_each_entity(&m, |entity, _, _| seen.push(entity));
        assert!(seen.contains(&a));
        assert!(!seen.contains(&both));
    }

    #[test]
    fn optional_term_does_not_constrain_matching_but_is_queryable() {
        let mut m = manager();
        let with_velocity = Entity::new(0, 1);
        let without_velocity = Entity::new(1, 1);
        m.spawn_bundle(with_velocity, (Position { x: 0.0 }, Velocity { dx: 1.0 })).unwrap();
        m.spawn_bundle(without_velocity, (Position { x: 0.0 },)).unwrap();

        let registry = m.registry().clone();
        let view = ViewBuilder::new(&registry).required::<Position>().optional::<Velocity>().build();
        let velocity_id = registry.id_of::<Velocity>().unwrap();

        let mut seen = Vec::new();
        view.for_each_entity(&m, |entity, archetype, _| {
            seen.push((entity, archetype.mask().intersection(view.optional()).contains(velocity_id)));
        });
        seen.sort_by_key(|(e, _)| e.to_bits());
        assert_eq!(seen, vec![(with_velocity, true), (without_velocity, false)]);
    }

    #[test]
    fn chunk_batched_iteration_visits_every_row() {
        let mut m = manager();
        let mut entities = Vec::new();
        for i in 0..50u32 {
            let e = Entity::new(i, 1);
            m.spawn_bundle(e, (Position { x: i as f32 },)).unwrap();
            entities.push(e);
        }
        let registry = m.registry().clone();
        let view = ViewBuilder::new(&registry).required::<Position>().build();

        let mut total_rows = 0usize;
        view.for_each_chunk(&m, |_, chunk| total_rows += chunk.len());
        assert_eq!(total_rows, 50);
    }
}
