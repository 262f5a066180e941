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

//! Archetype-based ECS core.
//!
//! Chunked, column-major archetype storage keyed by component-set signature,
//! with cached archetype-graph edges, typed views, and a relationship graph
//! maintained alongside entity storage.

pub mod archetype;
pub mod archetype_manager;
pub mod chunk;
pub mod component;
pub mod config;
pub mod entity;
pub mod error;
pub mod hierarchy;
pub mod hooks;
pub mod mask;
pub mod query;
pub mod registry;
pub mod serialization;

pub mod prelude;

pub use archetype::{Archetype, PackedLocation};
pub use archetype_manager::{ArchetypeManager, EntityLocation};
pub use chunk::{ChunkPool, ChunkPoolConfig, ChunkPoolStats};
pub use component::{Bundle, Component, ComponentDescriptor, ComponentId, ComponentRegistry};
pub use config::RegistryConfig;
pub use entity::{Entity, EntityPool, EntityPoolConfig};
pub use error::{EcsError, Result};
pub use hierarchy::{RelationshipGraph, Relations};
pub use hooks::{HookRegistry, StructuralHook};
pub use mask::{ComponentMask, MAX_COMPONENTS};
pub use query::{FilterTerm, View, ViewBuilder};
pub use registry::Registry;
