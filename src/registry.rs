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

//! [`Registry`]: the single entry point tying together entity allocation,
//! archetype storage, relationships, and structural hooks.
//!
//! Grounded on the teacher's `World`: the same spawn/despawn/add_component/
//! remove_component surface, but delegating entity id management to
//! [`EntityPool`] (packed, versioned handles) instead of `slotmap::SlotMap`,
//! and archetype storage to [`ArchetypeManager`] instead of `World`'s own
//! `Vec<Archetype>` + transition cache.

use tracing::{debug, warn};

use crate::archetype_manager::ArchetypeManager;
use crate::component::{Bundle, Component, ComponentRegistry};
use crate::config::RegistryConfig;
use crate::entity::EntityPool;
use crate::error::{EcsError, Result};
use crate::hierarchy::RelationshipGraph;
use crate::hooks::{HookRegistry, StructuralHook};
use crate::mask::ComponentMask;
use crate::query::ViewBuilder;
use crate::serialization;

pub use crate::entity::Entity;

/// A maximum batch size for `create_entities`/`destroy_entities`, guarding
/// against a caller accidentally requesting an unreasonable allocation.
pub const MAX_BATCH: usize = 1_000_000;

/// Central handle to a live entity/component/relationship universe.
pub struct Registry {
    entities: EntityPool,
    manager: ArchetypeManager,
    relationships: RelationshipGraph,
    hooks: HookRegistry,
    config: RegistryConfig,
}

impl Registry {
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Registry {
            entities: EntityPool::with_config(config.entity_pool),
            manager: ArchetypeManager::new(ComponentRegistry::new(), config.chunk_pool),
            relationships: RelationshipGraph::new(),
            hooks: HookRegistry::new(),
            config,
        }
    }

    /// Build a registry sharing an existing [`ComponentRegistry`] with other
    /// registries (component ids then agree across both).
    pub fn with_shared_components(config: RegistryConfig, registry: ComponentRegistry) -> Self {
        Registry {
            entities: EntityPool::with_config(config.entity_pool),
            manager: ArchetypeManager::new(registry, config.chunk_pool),
            relationships: RelationshipGraph::new(),
            hooks: HookRegistry::new(),
            config,
        }
    }

    pub fn component_registry(&self) -> &ComponentRegistry {
        self.manager.registry()
    }

    pub fn register_hook(&mut self, hook: Box<dyn StructuralHook>) {
        self.hooks.register(hook);
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn is_valid(&self, entity: Entity) -> bool {
        self.entities.is_valid(entity)
    }

    /// Create a bare entity with no components.
    pub fn create_entity(&mut self) -> Result<Entity> {
        let entity = self.entities.create()?;
        self.manager.spawn_empty(entity)?;
        if self.config.hooks_enabled {
            self.hooks.entity_created(entity);
        }
        Ok(entity)
    }

    /// Create an entity populated with every component in `bundle`.
    pub fn create_entity_with<B: Bundle>(&mut self, bundle: B) -> Result<Entity> {
        let entity = self.entities.create()?;
        self.manager.spawn_bundle(entity, bundle)?;
        if self.config.hooks_enabled {
            self.hooks.entity_created(entity);
        }
        Ok(entity)
    }

    /// Create `n` bare entities atomically: either all `n` end up live and
    /// present in `out`, or (on a mid-batch archetype-storage failure) every
    /// row already placed is rolled back — both from the archetype manager
    /// and from the entity pool — and `out` is left exactly as it was passed in.
    pub fn create_entities(&mut self, n: usize, out: &mut Vec<Entity>) -> Result<()> {
        if n > MAX_BATCH {
            return Err(EcsError::BatchTooLarge { requested: n, max: MAX_BATCH });
        }
        let start = out.len();
        self.entities.create_batch(n, out)?;
        for i in start..out.len() {
            let entity = out[i];
            if let Err(err) = self.manager.spawn_empty(entity) {
                for &placed in &out[start..i] {
                    self.manager.despawn(placed);
                }
                self.entities.destroy_batch(out[start..].iter().copied());
                out.truncate(start);
                return Err(err);
            }
            if self.config.hooks_enabled {
                self.hooks.entity_created(entity);
            }
        }
        Ok(())
    }

    /// Destroy `entity`: removes its components, detaches it from the
    /// relationship graph, and recycles its index. Returns whether it was live.
    pub fn destroy_entity(&mut self, entity: Entity) -> bool {
        if !self.entities.destroy(entity) {
            return false;
        }
        self.manager.despawn(entity);
        self.relationships.on_entity_destroyed(entity);
        if self.config.hooks_enabled {
            self.hooks.entity_destroyed(entity);
        }
        true
    }

    /// Destroy every live entity in `entities`, returning the count destroyed.
    pub fn destroy_entities<I: IntoIterator<Item = Entity>>(&mut self, entities: I) -> usize {
        let mut count = 0;
        for entity in entities {
            if self.destroy_entity(entity) {
                count += 1;
            }
        }
        count
    }

    /// Add component `T` to `entity`. Returns `false` if `entity` is not live
    /// or if it already has a value for `T` — the original value is left
    /// untouched, no archetype move happens.
    pub fn add_component<T: Component>(&mut self, entity: Entity, value: T) -> Result<bool> {
        let added = self.manager.add_component(entity, value)?;
        if added && self.config.hooks_enabled {
            if let Some(id) = self.manager.registry().id_of::<T>() {
                self.hooks.component_added(entity, id);
            }
        }
        Ok(added)
    }

    /// Remove component `T` from `entity`. Returns whether it was present.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Result<bool> {
        let id = self.manager.registry().id_of::<T>();
        let removed = self.manager.remove_component::<T>(entity)?;
        if removed && self.config.hooks_enabled {
            if let Some(id) = id {
                self.hooks.component_removed(entity, id);
            }
        }
        Ok(removed)
    }

    pub fn has_component<T: Component>(&self, entity: Entity) -> bool {
        match self.manager.registry().id_of::<T>() {
            Some(id) => self.manager.has_component(entity, id),
            None => false,
        }
    }

    pub fn get_component<T: Component>(&self, entity: Entity) -> Option<&T> {
        let id = self.manager.registry().id_of::<T>()?;
        // SAFETY: `id` was assigned to `T` by this same registry, so the
        // descriptor's size/align match `T` exactly.
        unsafe { self.manager.get_component::<T>(entity, id) }
    }

    pub fn get_component_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        let id = self.manager.registry().id_of::<T>()?;
        // SAFETY: see `get_component`.
        unsafe { self.manager.get_component_mut::<T>(entity, id) }
    }

    /// Start building a [`crate::query::View`] over this registry's component types.
    pub fn view(&self) -> ViewBuilder<'_> {
        ViewBuilder::new(self.manager.registry())
    }

    pub fn archetype_manager(&self) -> &ArchetypeManager {
        &self.manager
    }

    pub fn relationships(&self) -> &RelationshipGraph {
        &self.relationships
    }

    pub fn set_parent(&mut self, child: Entity, parent: Entity) {
        self.relationships.set_parent(child, parent);
    }

    pub fn remove_parent(&mut self, child: Entity) -> Option<Entity> {
        self.relationships.remove_parent(child)
    }

    pub fn add_link(&mut self, a: Entity, b: Entity) -> bool {
        self.relationships.add_link(a, b)
    }

    pub fn remove_link(&mut self, a: Entity, b: Entity) -> bool {
        self.relationships.remove_link(a, b)
    }

    /// A view of `entity`'s relationships (`children`/`descendants`/`ancestors`/
    /// `links`) narrowed to entities whose archetype mask passes `view`.
    pub fn get_relations<'a>(&'a self, entity: Entity, view: &'a crate::query::View) -> crate::hierarchy::Relations<'a> {
        self.relationships.relations(entity, &self.manager, view)
    }

    /// Compact away empty archetypes accumulated from structural churn.
    pub fn cleanup_empty_archetypes(&mut self) -> usize {
        let removed = self.manager.cleanup_empty_archetypes();
        if removed > 0 {
            debug!(removed, "cleaned up empty archetypes");
        }
        removed
    }

    pub fn entity_pool(&self) -> &EntityPool {
        &self.entities
    }

    /// Serialize every live entity, its persistable (destructor-free)
    /// components, and the relationship graph into a checksummed binary
    /// snapshot. Components with a destructor are skipped; see
    /// [`crate::serialization`] for why.
    pub fn save_to_vec(&self) -> Result<Vec<u8>> {
        let registry = self.manager.registry();
        let persistable = serialization::persistable_components(registry);
        for id in 0..registry.len() as crate::component::ComponentId {
            if !persistable.contains(&id) {
                registry.with_descriptor(id, |d| warn!(component = d.type_name, "skipping non-POD component in snapshot"));
            }
        }

        let components = persistable
            .iter()
            .map(|&id| registry.with_descriptor(id, |d| serialization::ComponentTableEntry { stable_hash: d.stable_hash, size: d.size as u32 }))
            .collect();

        let entity_slots = self
            .entities
            .snapshot_slots()
            .into_iter()
            .map(|(version, in_use)| serialization::EntitySlotRecord { version, in_use })
            .collect();

        let mut archetypes = Vec::new();
        for archetype in self.manager.archetypes() {
            let persisted_ids: Vec<_> = archetype.component_ids().iter().copied().filter(|id| persistable.contains(id)).collect();
            let component_hashes = persisted_ids.iter().map(|&id| registry.with_descriptor(id, |d| d.stable_hash)).collect();

            let mut entities = Vec::new();
            let mut columns: Vec<Vec<u8>> = vec![Vec::new(); persisted_ids.len()];
            archetype.for_each_chunk(|chunk| {
                entities.extend(chunk.entities().iter().map(|e| e.to_bits()));
                for (col_index, &id) in persisted_ids.iter().enumerate() {
                    if let Some(bytes) = chunk.raw_column_bytes(id) {
                        columns[col_index].extend_from_slice(bytes);
                    }
                }
            });

            archetypes.push(serialization::ArchetypeRecord { component_hashes, entities, columns });
        }

        let mut parents = Vec::new();
        let mut peers = Vec::new();
        let mut peers_seen = std::collections::HashSet::new();
        for entity in self.entities.iter() {
            if let Some(parent) = self.relationships.parent_of(entity) {
                parents.push(serialization::ParentRecord { child_bits: entity.to_bits(), parent_bits: parent.to_bits() });
            }
            for &peer in self.relationships.links_of(entity) {
                let key = (entity.to_bits().min(peer.to_bits()), entity.to_bits().max(peer.to_bits()));
                if peers_seen.insert(key) {
                    peers.push(serialization::PeerLinkRecord { a_bits: key.0, b_bits: key.1 });
                }
            }
        }

        let save = serialization::SaveFile {
            header: serialization::FileHeader {
                magic: serialization::MAGIC,
                version: serialization::FORMAT_VERSION,
                entity_count: self.entities.len() as u32,
                archetype_count: archetypes.len() as u32,
            },
            components,
            entity_slots,
            archetypes,
            parents,
            peers,
        };
        serialization::encode(&save)
    }

    /// Replace this registry's contents with a snapshot produced by
    /// [`Registry::save_to_vec`]. Every persisted component must already be
    /// registered (by stable hash) on this registry's [`ComponentRegistry`] —
    /// typically by having been used in at least one prior `add_component`
    /// call, or registered explicitly beforehand.
    pub fn load_from_slice(&mut self, bytes: &[u8]) -> Result<()> {
        let save = serialization::decode(bytes)?;
        let registry = self.manager.registry().clone();

        // Fail fast if the snapshot names a component this registry has never seen.
        for entry in &save.components {
            registry.id_of_hash(entry.stable_hash).ok_or(EcsError::UnknownComponent { stable_hash: entry.stable_hash })?;
        }

        self.entities = EntityPool::from_snapshot(self.config.entity_pool, &save.entity_slots);
        self.manager = ArchetypeManager::new(registry, self.config.chunk_pool);
        self.relationships = RelationshipGraph::new();

        for record in &save.archetypes {
            let ids: Vec<_> = record
                .component_hashes
                .iter()
                .map(|hash| self.manager.registry().id_of_hash(*hash).ok_or(EcsError::UnknownComponent { stable_hash: *hash }))
                .collect::<Result<_>>()?;
            let mut mask = ComponentMask::EMPTY;
            for &id in &ids {
                mask.set(id);
            }

            for (row, &entity_bits) in record.entities.iter().enumerate() {
                let entity = Entity::from_bits(entity_bits);
                let (archetype_id, loc) = self.manager.spawn_into_archetype(entity, mask)?;
                for (col_index, &id) in ids.iter().enumerate() {
                    let item_size = registry_item_size(self.manager.registry(), id);
                    let start = row * item_size;
                    let bytes = &record.columns[col_index][start..start + item_size];
                    unsafe { self.manager.write_component_raw(archetype_id, loc, id, bytes) };
                }
            }
        }

        for record in &save.parents {
            self.relationships.set_parent(Entity::from_bits(record.child_bits), Entity::from_bits(record.parent_bits));
        }
        for record in &save.peers {
            self.relationships.add_link(Entity::from_bits(record.a_bits), Entity::from_bits(record.b_bits));
        }

        Ok(())
    }
}

fn registry_item_size(registry: &ComponentRegistry, id: crate::component::ComponentId) -> usize {
    registry.with_descriptor(id, |d| d.size)
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Velocity {
        dx: f32,
    }

    #[test]
    fn create_destroy_recycle_roundtrip() {
        let mut registry = Registry::new();
        let e1 = registry.create_entity().unwrap();
        let e2 = registry.create_entity().unwrap();
        let e3 = registry.create_entity().unwrap();
        registry.destroy_entity(e2);
        let e4 = registry.create_entity().unwrap();

        assert_eq!(e4.index(), e2.index());
        assert!(!registry.is_valid(e2));
        assert!(registry.is_valid(e1));
        assert!(registry.is_valid(e3));
        assert!(registry.is_valid(e4));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn component_lifecycle_through_the_facade() {
        let mut registry = Registry::new();
        let e = registry.create_entity_with((Position { x: 1.0, y: 2.0 },)).unwrap();
        assert!(registry.has_component::<Position>(e));
        assert!(!registry.has_component::<Velocity>(e));

        registry.add_component(e, Velocity { dx: 3.0 }).unwrap();
        assert_eq!(*registry.get_component::<Velocity>(e).unwrap(), Velocity { dx: 3.0 });

        assert!(registry.remove_component::<Velocity>(e).unwrap());
        assert!(!registry.has_component::<Velocity>(e));
        assert_eq!(*registry.get_component::<Position>(e).unwrap(), Position { x: 1.0, y: 2.0 });
    }

    #[test]
    fn create_entities_rolls_back_partial_batch_on_failure() {
        use crate::chunk::ChunkPoolConfig;

        let mut config = RegistryConfig::default();
        config.chunk_pool = ChunkPoolConfig { page_size: 64, chunks_per_block: 1, max_chunks: 1, initial_blocks: 0, use_huge_pages: false };
        let mut registry = Registry::with_config(config);

        let mut out = Vec::new();
        let result = registry.create_entities(20, &mut out);

        assert!(result.is_err());
        assert!(out.is_empty());
        assert_eq!(registry.len(), 0);
        assert_eq!(registry.archetype_manager().archetypes()[0].len(), 0);
    }

    #[test]
    fn adding_an_already_present_component_is_rejected() {
        let mut registry = Registry::new();
        let e = registry.create_entity_with((Position { x: 1.0, y: 2.0 },)).unwrap();
        assert!(!registry.add_component(e, Position { x: 9.0, y: 9.0 }).unwrap());
        assert_eq!(*registry.get_component::<Position>(e).unwrap(), Position { x: 1.0, y: 2.0 });
    }

    #[test]
    fn destroying_an_entity_detaches_relationships() {
        let mut registry = Registry::new();
        let parent = registry.create_entity().unwrap();
        let child = registry.create_entity().unwrap();
        registry.set_parent(child, parent);

        registry.destroy_entity(parent);
        assert_eq!(registry.relationships().parent_of(child), None);
    }

    #[test]
    fn get_relations_filters_children_by_view() {
        let mut registry = Registry::new();
        let parent = registry.create_entity().unwrap();
        let moving_child = registry.create_entity_with((Position { x: 0.0, y: 0.0 }, Velocity { dx: 1.0 })).unwrap();
        let still_child = registry.create_entity_with((Position { x: 0.0, y: 0.0 },)).unwrap();
        registry.set_parent(moving_child, parent);
        registry.set_parent(still_child, parent);

        let view = registry.view().required::<Velocity>().build();
        assert_eq!(registry.get_relations(parent, &view).children(), vec![moving_child]);
    }

    #[test]
    fn view_streams_matching_entities() {
        let mut registry = Registry::new();
        let moving = registry.create_entity_with((Position { x: 0.0, y: 0.0 }, Velocity { dx: 1.0 })).unwrap();
        let _still = registry.create_entity_with((Position { x: 0.0, y: 0.0 },)).unwrap();

        let view = registry.view().required::<Position>().required::<Velocity>().build();
        let mut seen = Vec::new();
        view.for_each_entity(registry.archetype_manager(), |entity, _, _| seen.push(entity));
        assert_eq!(seen, vec![moving]);
    }
}
