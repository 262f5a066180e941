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

//! Binary snapshot format: header, component table (remapped by stable hash),
//! entity pool state, archetype columns, relationship graph, trailing checksum.
//!
//! The on-disk shape is encoded with `speedy` (a fast, non-self-describing
//! binary codec — a good fit here since every field's shape is already fixed
//! by this module, unlike the free-form `erased-serde` hook on
//! [`crate::component::ComponentDescriptor`], which exists for callers who
//! want to export a single component through whatever `serde`-compatible
//! format they choose).
//!
//! Persistence only covers components with no destructor (`Drop`-free, plain
//! old data): their bytes can be memcpy'd back into a fresh process without
//! re-establishing any invariant the type's constructor would normally set up.
//! A component that opted into `destroy` is skipped on save and logged via
//! `tracing`; see `DESIGN.md` for why this scope was chosen over a generic
//! typed deserialize hook.

use speedy::{Readable, Writable};

use crate::component::ComponentId;
use crate::error::{EcsError, Result};

pub const MAGIC: [u8; 4] = *b"ARCE";
pub const FORMAT_VERSION: u32 = 1;
pub const MIN_SUPPORTED_VERSION: u32 = 1;

#[derive(Debug, Readable, Writable)]
pub struct FileHeader {
    pub magic: [u8; 4],
    pub version: u32,
    pub entity_count: u32,
    pub archetype_count: u32,
}

/// One row of the persisted component table, used to remap a file's
/// components onto the loading process's [`crate::component::ComponentRegistry`]
/// ids by stable hash rather than by raw id (ids are not stable across runs).
#[derive(Debug, Readable, Writable)]
pub struct ComponentTableEntry {
    pub stable_hash: u64,
    pub size: u32,
}

/// `EntityPool` slot state in index order: `(version, in_use)`.
#[derive(Debug, Readable, Writable)]
pub struct EntitySlotRecord {
    pub version: u8,
    pub in_use: bool,
}

/// One archetype's worth of rows. `component_hashes` gives column order;
/// `columns[i]` holds `entity_count * size_of(component_hashes[i])` raw bytes,
/// one component's column concatenated across every entity in `entities`.
#[derive(Debug, Readable, Writable)]
pub struct ArchetypeRecord {
    pub component_hashes: Vec<u64>,
    pub entities: Vec<u32>,
    pub columns: Vec<Vec<u8>>,
}

#[derive(Debug, Readable, Writable)]
pub struct ParentRecord {
    pub child_bits: u32,
    pub parent_bits: u32,
}

#[derive(Debug, Readable, Writable)]
pub struct PeerLinkRecord {
    pub a_bits: u32,
    pub b_bits: u32,
}

#[derive(Debug, Readable, Writable)]
pub struct SaveFile {
    pub header: FileHeader,
    pub components: Vec<ComponentTableEntry>,
    pub entity_slots: Vec<EntitySlotRecord>,
    pub archetypes: Vec<ArchetypeRecord>,
    pub parents: Vec<ParentRecord>,
    /// Each symmetric link stored once (`a_bits < b_bits`); the loader
    /// restores both directions.
    pub peers: Vec<PeerLinkRecord>,
}

/// Component ids that can be safely persisted: those with no destructor.
/// Anything else is a resource-owning type whose bytes cannot be memcpy'd
/// back into validity and must round-trip through the caller's own
/// `erased-serde` export instead.
pub fn persistable_components(registry: &crate::component::ComponentRegistry) -> Vec<ComponentId> {
    (0..registry.len() as ComponentId)
        .filter(|&id| registry.with_descriptor(id, |d| d.destroy.is_none()))
        .collect()
}

fn checksum(bytes: &[u8]) -> u64 {
    use std::hash::Hasher;
    let mut hasher = rustc_hash::FxHasher::default();
    hasher.write(bytes);
    hasher.finish()
}

/// Serialize `save` and append an 8-byte little-endian checksum over the
/// speedy-encoded payload.
pub fn encode(save: &SaveFile) -> Result<Vec<u8>> {
    let mut bytes = save
        .write_to_vec()
        .map_err(|e| EcsError::CorruptedData(format!("encode failed: {e}")))?;
    let sum = checksum(&bytes);
    bytes.extend_from_slice(&sum.to_le_bytes());
    Ok(bytes)
}

/// Verify the trailing checksum and decode the payload.
pub fn decode(bytes: &[u8]) -> Result<SaveFile> {
    if bytes.len() < 8 {
        return Err(EcsError::CorruptedData("buffer shorter than checksum field".into()));
    }
    let (payload, checksum_bytes) = bytes.split_at(bytes.len() - 8);
    let stored: u64 = u64::from_le_bytes(checksum_bytes.try_into().unwrap());
    if checksum(payload) != stored {
        return Err(EcsError::ChecksumMismatch);
    }
    let save = SaveFile::read_from_buffer(payload).map_err(|e| EcsError::CorruptedData(format!("decode failed: {e}")))?;
    if save.header.magic != MAGIC {
        return Err(EcsError::InvalidMagic);
    }
    if save.header.version < MIN_SUPPORTED_VERSION || save.header.version > FORMAT_VERSION {
        return Err(EcsError::UnsupportedVersion {
            found: save.header.version,
            min_supported: MIN_SUPPORTED_VERSION,
            current: FORMAT_VERSION,
        });
    }
    Ok(save)
}
