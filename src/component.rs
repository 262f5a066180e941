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

//! Component trait, type-erased descriptors, and the shared component registry.
//!
//! Components are plain `'static + Send + Sync` values; no derive is required; the
//! blanket impl below mirrors the teacher's `Component` marker. [`ComponentRegistry`]
//! assigns each distinct type a small id (0..[`MAX_COMPONENTS`](crate::mask::MAX_COMPONENTS))
//! the first time it is seen and holds the per-type vtable archetypes use to
//! move/drop/serialize columns without knowing the concrete type.

use std::any::TypeId;
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;
use smallvec::{smallvec, SmallVec};

use crate::mask::{ComponentMask, MAX_COMPONENTS};

/// Marker trait for values storable as components.
///
/// Implemented automatically for every `'static + Send + Sync` type, matching
/// the teacher's zero-ceremony component model.
pub trait Component: 'static + Send + Sync {}
impl<T: 'static + Send + Sync> Component for T {}

/// Small, dense component id assigned by a [`ComponentRegistry`].
pub type ComponentId = u8;

/// Type-erased per-component function table.
///
/// `default_construct` is `None` unless explicitly supplied via
/// [`ComponentRegistry::enable_default_construct`] (most components are only ever
/// constructed from a caller-supplied value, so there is no value in requiring
/// every component to implement `Default`).
pub struct ComponentDescriptor {
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub size: usize,
    pub align: usize,
    pub stable_hash: u64,
    /// Write a just-constructed-by-default value into uninitialized storage.
    pub default_construct: Option<unsafe fn(*mut u8)>,
    /// Move-construct `src` into uninitialized `dst`; `src` is logically moved
    /// from afterward (its destructor, if any, must not run again).
    pub move_construct: unsafe fn(dst: *mut u8, src: *mut u8),
    /// Run the destructor in place, if the type has one.
    pub destroy: Option<unsafe fn(*mut u8)>,
    /// Type-erased serialize hook used by the persistence codec; `None` for
    /// components that opted out of serialization support.
    pub serialize: Option<fn(*const u8, &mut dyn erased_serde::Serializer) -> erased_serde::Result<()>>,
}

impl ComponentDescriptor {
    fn new<T: Component>() -> Self {
        ComponentDescriptor {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
            stable_hash: stable_hash_of(std::any::type_name::<T>()),
            default_construct: None,
            move_construct: |dst, src| unsafe {
                std::ptr::copy_nonoverlapping(src as *const T, dst as *mut T, 1);
            },
            destroy: if std::mem::needs_drop::<T>() {
                Some(|ptr| unsafe { std::ptr::drop_in_place(ptr as *mut T) })
            } else {
                None
            },
            serialize: None,
        }
    }
}

/// Deterministic 64-bit hash of a component's name, stable across runs (though
/// not across renames) and used only at the persistence boundary to remap ids.
pub fn stable_hash_of(type_name: &str) -> u64 {
    const_fnv1a_hash::fnv1a_hash_str_64(type_name)
}

struct RegistryInner {
    by_type: AHashMap<TypeId, ComponentId>,
    descriptors: Vec<ComponentDescriptor>,
}

/// Assigns stable small ids to component types and holds their descriptors.
///
/// Reference-counted so several [`crate::registry::Registry`] instances can
/// share one set of ids (§9: "a single registry of component types may back
/// several independent registries"). Registration must happen before any
/// reads race it; once handed to registries for active use, treat it as
/// effectively immutable.
#[derive(Clone)]
pub struct ComponentRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        ComponentRegistry {
            inner: Arc::new(RwLock::new(RegistryInner {
                by_type: AHashMap::new(),
                descriptors: Vec::new(),
            })),
        }
    }

    /// Register `T`, assigning it a small id the first time. Idempotent.
    pub fn register<T: Component>(&self) -> ComponentId {
        let type_id = TypeId::of::<T>();
        {
            let inner = self.inner.read();
            if let Some(&id) = inner.by_type.get(&type_id) {
                return id;
            }
        }
        let mut inner = self.inner.write();
        if let Some(&id) = inner.by_type.get(&type_id) {
            return id;
        }
        let id = inner.descriptors.len();
        assert!(id < MAX_COMPONENTS, "component registry full (max {MAX_COMPONENTS} types)");
        inner.descriptors.push(ComponentDescriptor::new::<T>());
        inner.by_type.insert(type_id, id as ComponentId);
        id as ComponentId
    }

    /// Opt `T` into type-erased default construction (requires `T: Default`,
    /// checked by the caller providing the bound). `T` must already be registered.
    pub fn enable_default_construct<T: Component + Default>(&self) {
        let id = self.register::<T>();
        let mut inner = self.inner.write();
        inner.descriptors[id as usize].default_construct =
            Some(|ptr| unsafe { std::ptr::write(ptr as *mut T, T::default()) });
    }

    /// Opt `T` into the type-erased serialize hook used by the save codec.
    pub fn enable_serialize<T: Component + serde::Serialize>(&self) {
        let id = self.register::<T>();
        let mut inner = self.inner.write();
        inner.descriptors[id as usize].serialize = Some(|ptr, serializer| {
            let value: &T = unsafe { &*(ptr as *const T) };
            erased_serde::serialize(value, serializer)
        });
    }

    /// The small id for `T`, if registered.
    pub fn id_of<T: Component>(&self) -> Option<ComponentId> {
        self.inner.read().by_type.get(&TypeId::of::<T>()).copied()
    }

    /// The small id for a runtime `TypeId`, if registered.
    pub fn id_of_type(&self, type_id: TypeId) -> Option<ComponentId> {
        self.inner.read().by_type.get(&type_id).copied()
    }

    /// Run `f` with the descriptor for `id`. Panics if `id` is out of range.
    pub fn with_descriptor<R>(&self, id: ComponentId, f: impl FnOnce(&ComponentDescriptor) -> R) -> R {
        let inner = self.inner.read();
        f(&inner.descriptors[id as usize])
    }

    /// Deterministic 64-bit hash for `T`, for use at persistence boundaries.
    pub fn hash_of<T: Component>(&self) -> Option<u64> {
        self.id_of::<T>().map(|id| self.with_descriptor(id, |d| d.stable_hash))
    }

    /// Look up a component id by its persisted stable hash.
    pub fn id_of_hash(&self, stable_hash: u64) -> Option<ComponentId> {
        let inner = self.inner.read();
        inner
            .descriptors
            .iter()
            .position(|d| d.stable_hash == stable_hash)
            .map(|i| i as ComponentId)
    }

    /// Number of distinct registered component types.
    pub fn len(&self) -> usize {
        self.inner.read().descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of `(id, type_name, stable_hash, size, align)` for every
    /// registered type, in id order — the shape persisted by the save codec.
    pub fn snapshot(&self) -> Vec<(ComponentId, &'static str, u64, usize, usize)> {
        let inner = self.inner.read();
        inner
            .descriptors
            .iter()
            .enumerate()
            .map(|(id, d)| (id as ComponentId, d.type_name, d.stable_hash, d.size, d.align))
            .collect()
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Maximum number of component types a [`Bundle`] tuple may combine.
pub const MAX_BUNDLE_COMPONENTS: usize = 8;

/// A fixed tuple of components spawned onto an entity at once.
///
/// Mirrors the teacher's tuple-impl `Bundle`: implemented for tuples of up to
/// [`MAX_BUNDLE_COMPONENTS`] component types via macro, never for a bare `T`
/// (that would conflict with the tuple impls).
pub trait Bundle: Send + Sync + 'static {
    fn type_ids() -> SmallVec<[TypeId; MAX_BUNDLE_COMPONENTS]>
    where
        Self: Sized;

    fn mask(registry: &ComponentRegistry) -> ComponentMask
    where
        Self: Sized;

    /// Write components into pointers obtained from the destination archetype's
    /// columns, in the same order as [`Bundle::type_ids`].
    ///
    /// # Safety
    /// Callers must supply one valid, uninitialized, correctly-aligned pointer
    /// per component in `ptrs`.
    unsafe fn write_components(self, ptrs: &[*mut u8]);
}

macro_rules! impl_bundle {
    ($($T:ident),*) => {
        impl<$($T: Component),*> Bundle for ($($T,)*) {
            fn type_ids() -> SmallVec<[TypeId; MAX_BUNDLE_COMPONENTS]> {
                smallvec![$(TypeId::of::<$T>()),*]
            }

            fn mask(registry: &ComponentRegistry) -> ComponentMask {
                let mut mask = ComponentMask::EMPTY;
                $(mask.set(registry.register::<$T>());)*
                mask
            }

            #[allow(non_snake_case)]
            unsafe fn write_components(self, ptrs: &[*mut u8]) {
                let ($($T,)*) = self;
                let mut i = 0;
                $(
                    std::ptr::write(ptrs[i] as *mut $T, $T);
                    i += 1;
                )*
                let _ = i;
            }
        }
    };
}

impl_bundle!(A);
impl_bundle!(A, B);
impl_bundle!(A, B, C);
impl_bundle!(A, B, C, D);
impl_bundle!(A, B, C, D, E);
impl_bundle!(A, B, C, D, E, F);
impl_bundle!(A, B, C, D, E, F, G);
impl_bundle!(A, B, C, D, E, F, G, H);

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, Default)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, Copy)]
    struct Velocity {
        x: f32,
    }

    #[test]
    fn register_is_idempotent() {
        let registry = ComponentRegistry::new();
        let a = registry.register::<Position>();
        let b = registry.register::<Position>();
        assert_eq!(a, b);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn distinct_types_get_distinct_ids() {
        let registry = ComponentRegistry::new();
        let a = registry.register::<Position>();
        let b = registry.register::<Velocity>();
        assert_ne!(a, b);
    }

    #[test]
    fn stable_hash_is_deterministic() {
        let a = ComponentRegistry::new();
        let b = ComponentRegistry::new();
        assert_eq!(a.register::<Position>(), b.register::<Position>());
        assert_eq!(a.hash_of::<Position>(), b.hash_of::<Position>());
    }

    #[test]
    fn bundle_type_ids_match_arity() {
        let ids = <(Position, Velocity)>::type_ids();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], TypeId::of::<Position>());
        assert_eq!(ids[1], TypeId::of::<Velocity>());
    }

    #[test]
    fn default_construct_opt_in() {
        let registry = ComponentRegistry::new();
        registry.enable_default_construct::<Position>();
        let id = registry.id_of::<Position>().unwrap();
        registry.with_descriptor(id, |d| assert!(d.default_construct.is_some()));
    }
}
