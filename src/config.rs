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

//! Top-level configuration surface, aggregating every subsystem's tunables
//! into one value that can be constructed in code or deserialized from a
//! config file. Mirrors the teacher's plain-struct config pattern (see
//! [`crate::entity::EntityPoolConfig`] and [`crate::chunk::ChunkPoolConfig`]);
//! `RegistryConfig` just groups them for a single entry point.

use crate::chunk::ChunkPoolConfig;
use crate::entity::EntityPoolConfig;

/// Construction-time tunables for a [`crate::registry::Registry`].
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct RegistryConfig {
    pub entity_pool: EntityPoolConfig,
    pub chunk_pool: ChunkPoolConfig,
    /// Initial capacity hint for the relationship graph's internal maps.
    pub relationship_capacity_hint: usize,
    /// Whether structural hooks are invoked at all; disabling entirely skips
    /// the (empty-vec) dispatch loop on every create/destroy/add/remove.
    pub hooks_enabled: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            entity_pool: EntityPoolConfig::default(),
            chunk_pool: ChunkPoolConfig::default(),
            relationship_capacity_hint: 0,
            hooks_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_subsystem_defaults() {
        let config = RegistryConfig::default();
        assert_eq!(config.entity_pool.segment_size, 1024);
        assert_eq!(config.chunk_pool.page_size, crate::chunk::DEFAULT_PAGE_SIZE);
        assert!(config.hooks_enabled);
    }
}
