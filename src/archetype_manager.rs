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

//! Archetype graph: owns every [`Archetype`], the entity location index, and
//! the cached add/remove edges used to make structural changes O(1) amortized.
//!
//! Grounded on the teacher's `World`: one dense `Vec<Archetype>`, a signature
//! lookup map, and a transition cache keyed by `(archetype, component)` so a
//! repeated `add_component::<Velocity>` on entities of the same archetype
//! never re-walks the signature arithmetic.

use ahash::AHashMap;

use crate::archetype::{Archetype, PackedLocation};
use crate::chunk::{ChunkPool, ChunkPoolConfig};
use crate::component::{Bundle, Component, ComponentId, ComponentRegistry};
use crate::entity::Entity;
use crate::error::Result;
use crate::mask::ComponentMask;

/// Where an entity's row currently lives: which archetype, and which packed
/// chunk/row within it.
#[derive(Debug, Clone, Copy)]
pub struct EntityLocation {
    pub archetype_id: usize,
    pub location: PackedLocation,
}

/// Owns archetype storage, the entity → location index, and the archetype
/// graph's cached structural-change edges.
pub struct ArchetypeManager {
    registry: ComponentRegistry,
    pool: ChunkPool,
    archetypes: Vec<Archetype>,
    archetype_index: AHashMap<ComponentMask, usize>,
    add_edges: AHashMap<(usize, ComponentId), usize>,
    remove_edges: AHashMap<(usize, ComponentId), usize>,
    locations: AHashMap<Entity, EntityLocation>,
    page_size: usize,
}

impl ArchetypeManager {
    pub fn new(registry: ComponentRegistry, chunk_config: ChunkPoolConfig) -> Self {
        let page_size = chunk_config.page_size;
        let mut manager = ArchetypeManager {
            registry: registry.clone(),
            pool: ChunkPool::new(chunk_config),
            archetypes: Vec::new(),
            archetype_index: AHashMap::new(),
            add_edges: AHashMap::new(),
            remove_edges: AHashMap::new(),
            locations: AHashMap::new(),
            page_size,
        };
        let root = Archetype::new(ComponentMask::EMPTY, &[], &registry, page_size);
        manager.archetypes.push(root);
        manager.archetype_index.insert(ComponentMask::EMPTY, 0);
        manager
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    pub fn archetypes(&self) -> &[Archetype] {
        &self.archetypes
    }

    pub fn chunk_pool_stats(&self) -> crate::chunk::ChunkPoolStats {
        self.pool.stats()
    }

    pub fn location_of(&self, entity: Entity) -> Option<EntityLocation> {
        self.locations.get(&entity).copied()
    }

    fn get_or_create_archetype(&mut self, mask: ComponentMask) -> usize {
        if let Some(&id) = self.archetype_index.get(&mask) {
            return id;
        }
        let ids: Vec<ComponentId> = mask.ids().collect();
        let archetype = Archetype::new(mask, &ids, &self.registry, self.page_size);
        let id = self.archetypes.len();
        self.archetypes.push(archetype);
        self.archetype_index.insert(mask, id);
        id
    }

    fn get_two_mut(&mut self, a: usize, b: usize) -> (&mut Archetype, &mut Archetype) {
        assert_ne!(a, b, "get_two_mut requires distinct archetype indices");
        if a < b {
            let (left, right) = self.archetypes.split_at_mut(b);
            (&mut left[a], &mut right[0])
        } else {
            let (left, right) = self.archetypes.split_at_mut(a);
            (&mut right[0], &mut left[b])
        }
    }

    /// Spawn `entity` with no components, placing it in the root archetype.
    pub fn spawn_empty(&mut self, entity: Entity) -> Result<()> {
        let loc = self.archetypes[0].add_entity(entity, &mut self.pool)?;
        self.locations.insert(entity, EntityLocation { archetype_id: 0, location: loc });
        Ok(())
    }

    /// Spawn `entity` with every component in `bundle`, registering any
    /// previously-unseen component types.
    pub fn spawn_bundle<B: Bundle>(&mut self, entity: Entity, bundle: B) -> Result<()> {
        let mask = B::mask(&self.registry);
        let archetype_id = self.get_or_create_archetype(mask);
        let archetype = &mut self.archetypes[archetype_id];
        let loc = archetype.add_entity(entity, &mut self.pool)?;

        let ids: Vec<ComponentId> = mask.ids().collect();
        let ptrs: Vec<*mut u8> = ids
            .iter()
            .map(|&id| archetype.component_ptr(loc, id).expect("column exists for every id in mask"))
            .collect();
        unsafe { bundle.write_components(&ptrs) };

        self.locations.insert(entity, EntityLocation { archetype_id, location: loc });
        Ok(())
    }

    /// Remove `entity` and destroy every component it held. Returns whether
    /// the entity was present.
    pub fn despawn(&mut self, entity: Entity) -> bool {
        let Some(loc) = self.locations.remove(&entity) else { return false };
        let archetype = &mut self.archetypes[loc.archetype_id];
        if let Some(swapped) = archetype.remove_entity(loc.location, &self.registry, &mut self.pool) {
            if let Some(swapped_loc) = self.locations.get_mut(&swapped) {
                swapped_loc.location = loc.location;
            }
        }
        true
    }

    pub fn has_component(&self, entity: Entity, id: ComponentId) -> bool {
        self.locations
            .get(&entity)
            .map(|loc| self.archetypes[loc.archetype_id].has_component(id))
            .unwrap_or(false)
    }

    /// # Safety
    /// `T` must match the component registered under `id`.
    pub unsafe fn get_component<T>(&self, entity: Entity, id: ComponentId) -> Option<&T> {
        let loc = self.locations.get(&entity)?;
        self.archetypes[loc.archetype_id].get_component(loc.location, id)
    }

    /// # Safety
    /// See [`ArchetypeManager::get_component`].
    pub unsafe fn get_component_mut<T>(&mut self, entity: Entity, id: ComponentId) -> Option<&mut T> {
        let loc = self.locations.get(&entity)?;
        self.archetypes[loc.archetype_id].get_component_mut(loc.location, id)
    }

    /// Add component `T` to `entity`. Returns `false` (archetype unchanged,
    /// original value untouched) if the entity is not live or already has a
    /// value for `T` — a duplicate add is rejected, not overwritten.
    pub fn add_component<T: Component>(&mut self, entity: Entity, value: T) -> Result<bool> {
        let id = self.registry.register::<T>();
        let Some(loc) = self.locations.get(&entity).copied() else { return Ok(false) };

        if self.archetypes[loc.archetype_id].has_component(id) {
            return Ok(false);
        }

        let old_mask = self.archetypes[loc.archetype_id].mask();
        let new_archetype_id = if let Some(&cached) = self.add_edges.get(&(loc.archetype_id, id)) {
            cached
        } else {
            let new_mask = old_mask.with(id);
            let new_id = self.get_or_create_archetype(new_mask);
            self.add_edges.insert((loc.archetype_id, id), new_id);
            new_id
        };

        let (src, dst) = self.get_two_mut(loc.archetype_id, new_archetype_id);
        let (dst_loc, swapped) = src.move_entity_to(loc.location, dst, &self.registry, &mut self.pool)?;
        unsafe { dst.set_component(dst_loc, id, value) };

        if let Some(swapped_entity) = swapped {
            if let Some(swapped_loc) = self.locations.get_mut(&swapped_entity) {
                swapped_loc.location = loc.location;
            }
        }
        self.locations.insert(entity, EntityLocation { archetype_id: new_archetype_id, location: dst_loc });
        Ok(true)
    }

    /// Remove component `T` from `entity`. Returns whether it was present.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Result<bool> {
        let Some(id) = self.registry.id_of::<T>() else { return Ok(false) };
        let Some(loc) = self.locations.get(&entity).copied() else { return Ok(false) };

        if !self.archetypes[loc.archetype_id].has_component(id) {
            return Ok(false);
        }

        let old_mask = self.archetypes[loc.archetype_id].mask();
        let new_archetype_id = if let Some(&cached) = self.remove_edges.get(&(loc.archetype_id, id)) {
            cached
        } else {
            let new_mask = old_mask.without(id);
            let new_id = self.get_or_create_archetype(new_mask);
            self.remove_edges.insert((loc.archetype_id, id), new_id);
            new_id
        };

        let (src, dst) = self.get_two_mut(loc.archetype_id, new_archetype_id);
        let (dst_loc, swapped) = src.move_entity_to(loc.location, dst, &self.registry, &mut self.pool)?;

        if let Some(swapped_entity) = swapped {
            if let Some(swapped_loc) = self.locations.get_mut(&swapped_entity) {
                swapped_loc.location = loc.location;
            }
        }
        self.locations.insert(entity, EntityLocation { archetype_id: new_archetype_id, location: dst_loc });
        Ok(true)
    }

    /// Place `entity` directly into the archetype for `mask`, creating it if
    /// necessary, without writing any component data. Used by the
    /// persistence codec, which restores raw column bytes itself afterward.
    pub fn spawn_into_archetype(&mut self, entity: Entity, mask: ComponentMask) -> Result<(usize, PackedLocation)> {
        let archetype_id = self.get_or_create_archetype(mask);
        let loc = self.archetypes[archetype_id].add_entity(entity, &mut self.pool)?;
        self.locations.insert(entity, EntityLocation { archetype_id, location: loc });
        Ok((archetype_id, loc))
    }

    /// # Safety
    /// See [`Archetype::write_component_raw`].
    pub unsafe fn write_component_raw(&mut self, archetype_id: usize, loc: PackedLocation, id: ComponentId, bytes: &[u8]) {
        self.archetypes[archetype_id].write_component_raw(loc, id, bytes);
    }

    /// Archetype indices whose mask satisfies `predicate`. The single path
    /// every archetype-filtering caller (currently [`crate::query::View`])
    /// goes through, so matching logic lives in exactly one place.
    pub fn archetypes_matching<F: Fn(ComponentMask) -> bool>(&self, predicate: F) -> Vec<usize> {
        self.archetypes.iter().enumerate().filter(|(_, a)| predicate(a.mask())).map(|(i, _)| i).collect()
    }

    /// Remove every archetype (other than the root) with zero live entities,
    /// releasing its chunk allocations and invalidating any cached edges that
    /// referenced it. Returns the number of archetypes removed.
    ///
    /// This never runs implicitly: callers decide when archetype churn (e.g.
    /// from many `add_component`/`remove_component` calls producing one-off
    /// signatures) is worth compacting.
    pub fn cleanup_empty_archetypes(&mut self) -> usize {
        let keep: Vec<bool> = self
            .archetypes
            .iter()
            .enumerate()
            .map(|(i, a)| i == 0 || !a.is_empty())
            .collect();
        let removed = keep.iter().filter(|k| !**k).count();
        if removed == 0 {
            return 0;
        }

        let mut remap = vec![usize::MAX; self.archetypes.len()];
        let mut kept = Vec::with_capacity(self.archetypes.len() - removed);
        for (old_index, archetype) in self.archetypes.drain(..).enumerate() {
            if keep[old_index] {
                remap[old_index] = kept.len();
                kept.push(archetype);
            } else {
                let mut archetype = archetype;
                archetype.release_chunks(&mut self.pool);
            }
        }
        self.archetypes = kept;

        self.archetype_index = self.archetypes.iter().map(|a| a.mask()).zip(0..).collect();
        self.add_edges = self
            .add_edges
            .iter()
            .filter_map(|(&(src, id), &dst)| {
                let src = remap[src];
                let dst = remap.get(dst).copied().unwrap_or(usize::MAX);
                (src != usize::MAX && dst != usize::MAX).then_some(((src, id), dst))
            })
            .collect();
        self.remove_edges = self
            .remove_edges
            .iter()
            .filter_map(|(&(src, id), &dst)| {
                let src = remap[src];
                let dst = remap.get(dst).copied().unwrap_or(usize::MAX);
                (src != usize::MAX && dst != usize::MAX).then_some(((src, id), dst))
            })
            .collect();
        for loc in self.locations.values_mut() {
            loc.archetype_id = remap[loc.archetype_id];
        }
        removed
    }
}
