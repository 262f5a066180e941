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

//! Structural-change hooks: opt-in callbacks fired after entity/component
//! lifecycle events. Grounded on the teacher's `Observer` trait, trimmed down
//! to no-op-by-default methods over plain ids (not `&mut Registry`) so a hook
//! can never trigger further structural changes reentrantly mid-mutation.

use crate::component::ComponentId;
use crate::entity::Entity;

/// Implement the events you care about; every method defaults to doing nothing.
pub trait StructuralHook: Send + Sync {
    fn on_entity_created(&self, _entity: Entity) {}
    fn on_entity_destroyed(&self, _entity: Entity) {}
    fn on_component_added(&self, _entity: Entity, _component: ComponentId) {}
    fn on_component_removed(&self, _entity: Entity, _component: ComponentId) {}
}

/// An ordered set of hooks, invoked in registration order.
#[derive(Default)]
pub struct HookRegistry {
    hooks: Vec<Box<dyn StructuralHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: Box<dyn StructuralHook>) {
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub(crate) fn entity_created(&self, entity: Entity) {
        for hook in &self.hooks {
            hook.on_entity_created(entity);
        }
    }

    pub(crate) fn entity_destroyed(&self, entity: Entity) {
        for hook in &self.hooks {
            hook.on_entity_destroyed(entity);
        }
    }

    pub(crate) fn component_added(&self, entity: Entity, component: ComponentId) {
        for hook in &self.hooks {
            hook.on_component_added(entity, component);
        }
    }

    pub(crate) fn component_removed(&self, entity: Entity, component: ComponentId) {
        for hook in &self.hooks {
            hook.on_component_removed(entity, component);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingHook {
        created: Arc<AtomicUsize>,
    }

    impl StructuralHook for CountingHook {
        fn on_entity_created(&self, _entity: Entity) {
            self.created.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn registered_hooks_fire_in_order() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut registry = HookRegistry::new();
        registry.register(Box::new(CountingHook { created: counter.clone() }));
        registry.register(Box::new(CountingHook { created: counter.clone() }));

        registry.entity_created(Entity::new(0, 1));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
