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

//! Entity identifiers and the segmented pool that hands them out.
//!
//! An [`Entity`] is a packed 32-bit value: a 24-bit index into the pool and an
//! 8-bit generation ("version"). Recycling an index bumps its version so stale
//! handles from a previous occupant fail [`EntityPool::is_valid`].

use std::fmt;

use crate::error::{EcsError, Result};

/// Number of bits dedicated to the index portion of an [`Entity`].
pub const INDEX_BITS: u32 = 24;
/// Number of bits dedicated to the generation portion of an [`Entity`].
pub const VERSION_BITS: u32 = 8;
const INDEX_MASK: u32 = (1 << INDEX_BITS) - 1;
/// Size of the index space: 2^24 simultaneously live + recycled slots.
pub const MAX_INDEX_SPACE: u32 = 1 << INDEX_BITS;

/// Packed entity handle: lower 24 bits index, upper 8 bits version.
///
/// The null/never-issued value is `index = 0, version = 0`; version 0 is never
/// written to a live slot (the pool's first allocation of any index produces
/// version 1), so `Entity::NULL` can never alias a live entity.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity(u32);

impl Entity {
    /// The reserved null handle. Never compares equal to, or validates as, a live entity.
    pub const NULL: Entity = Entity(0);

    #[inline]
    pub(crate) fn new(index: u32, version: u8) -> Self {
        debug_assert!(index <= INDEX_MASK, "entity index exceeds 24-bit index space");
        Entity((version as u32) << INDEX_BITS | index)
    }

    /// The index component (lower 24 bits).
    #[inline]
    pub fn index(self) -> u32 {
        self.0 & INDEX_MASK
    }

    /// The generation component (upper 8 bits).
    #[inline]
    pub fn version(self) -> u8 {
        (self.0 >> INDEX_BITS) as u8
    }

    /// Whether this handle is the reserved null value.
    #[inline]
    pub fn is_null(self) -> bool {
        self == Entity::NULL
    }

    /// The raw packed 32-bit representation, stable across a process run and
    /// usable as a hash map key without re-deriving index/version.
    #[inline]
    pub fn to_bits(self) -> u32 {
        self.0
    }

    /// Reconstruct an `Entity` from a value previously produced by [`Entity::to_bits`].
    #[inline]
    pub fn from_bits(bits: u32) -> Self {
        Entity(bits)
    }
}

impl Default for Entity {
    fn default() -> Self {
        Entity::NULL
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({}v{})", self.index(), self.version())
    }
}

const IN_USE: u32 = u32::MAX;
const FREE_END: u32 = u32::MAX - 1;

#[derive(Clone, Copy)]
struct Slot {
    version: u8,
    next_free: u32,
}

impl Default for Slot {
    fn default() -> Self {
        Slot { version: 0, next_free: IN_USE }
    }
}

struct Segment {
    slots: Vec<Slot>,
    live_count: u32,
}

/// Tunables for [`EntityPool`] segment allocation and housekeeping.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct EntityPoolConfig {
    /// Number of slots per lazily-allocated segment. Must be a power of two, >= 1024.
    pub segment_size: u32,
    /// Whether fully-empty segments are eligible for release.
    pub auto_release: bool,
    /// Number of fully-empty segments tolerated before the oldest is released.
    pub max_empty_segments: usize,
}

impl Default for EntityPoolConfig {
    fn default() -> Self {
        EntityPoolConfig {
            segment_size: 1024,
            auto_release: false,
            max_empty_segments: 4,
        }
    }
}

/// Segmented, lazily-allocated pool of entity slots with free-list recycling.
///
/// See module docs and the data model (`EntityPool` in the specification) for
/// the allocation/recycling contract this implements.
pub struct EntityPool {
    segments: Vec<Option<Box<Segment>>>,
    config: EntityPoolConfig,
    /// Bump pointer: number of indices ever handed a segment slot.
    total_indices: u32,
    free_head: u32,
    free_count: u32,
    live_count: u32,
}

impl EntityPool {
    /// Create a pool with the default segment size.
    pub fn new() -> Self {
        Self::with_config(EntityPoolConfig::default())
    }

    /// Create a pool with a custom configuration.
    pub fn with_config(config: EntityPoolConfig) -> Self {
        assert!(config.segment_size.is_power_of_two() && config.segment_size >= 1024);
        EntityPool {
            segments: Vec::new(),
            config,
            total_indices: 0,
            free_head: FREE_END,
            free_count: 0,
            live_count: 0,
        }
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.live_count as usize
    }

    /// Whether the pool holds no live entities.
    pub fn is_empty(&self) -> bool {
        self.live_count == 0
    }

    /// Number of recycled (destroyed, awaiting reuse) slots.
    pub fn recycled_count(&self) -> usize {
        self.free_count as usize
    }

    /// Number of index slots ever allocated a segment (live + recycled).
    pub fn capacity(&self) -> usize {
        self.total_indices as usize
    }

    fn segment_and_offset(&self, index: u32) -> (usize, usize) {
        let seg = (index / self.config.segment_size) as usize;
        let off = (index % self.config.segment_size) as usize;
        (seg, off)
    }

    fn slot(&self, index: u32) -> Option<&Slot> {
        if index >= self.total_indices {
            return None;
        }
        let (seg, off) = self.segment_and_offset(index);
        self.segments.get(seg)?.as_ref().map(|s| &s.slots[off])
    }

    fn slot_mut(&mut self, index: u32) -> Option<&mut Slot> {
        if index >= self.total_indices {
            return None;
        }
        let (seg, off) = self.segment_and_offset(index);
        self.segments.get_mut(seg)?.as_mut().map(|s| &mut s.slots[off])
    }

    fn ensure_segment_for(&mut self, index: u32) {
        let seg = (index / self.config.segment_size) as usize;
        if self.segments.len() <= seg {
            self.segments.resize_with(seg + 1, || None);
        }
        if self.segments[seg].is_none() {
            self.segments[seg] = Some(Box::new(Segment {
                slots: vec![Slot::default(); self.config.segment_size as usize],
                live_count: 0,
            }));
        }
    }

    fn push_free(&mut self, index: u32) {
        self.slot_mut(index).unwrap().next_free = self.free_head;
        self.free_head = index;
        self.free_count += 1;
    }

    fn pop_free(&mut self) -> Option<u32> {
        if self.free_head == FREE_END {
            return None;
        }
        let index = self.free_head;
        let next = self.slot(index).unwrap().next_free;
        self.free_head = next;
        self.free_count -= 1;
        Some(index)
    }

    fn allocate_index(&mut self) -> Result<u32> {
        if let Some(index) = self.pop_free() {
            return Ok(index);
        }
        if self.total_indices >= MAX_INDEX_SPACE {
            return Err(EcsError::PoolExhausted);
        }
        let index = self.total_indices;
        self.ensure_segment_for(index);
        self.total_indices += 1;
        Ok(index)
    }

    fn bump_version(v: u8) -> u8 {
        let nv = v.wrapping_add(1);
        if nv == 0 {
            1
        } else {
            nv
        }
    }

    /// Allocate a new entity handle. Fails only if the index space is saturated.
    pub fn create(&mut self) -> Result<Entity> {
        let index = self.allocate_index()?;
        let (seg, off) = self.segment_and_offset(index);
        let slot = &mut self.segments[seg].as_mut().unwrap().slots[off];
        if slot.version == 0 {
            slot.version = 1;
        }
        slot.next_free = IN_USE;
        self.segments[seg].as_mut().unwrap().live_count += 1;
        self.live_count += 1;
        let version = self.slot(index).unwrap().version;
        Ok(Entity::new(index, version))
    }

    /// Allocate `n` entities atomically: all succeed, or none are created and
    /// [`EcsError::PoolExhausted`] is returned.
    pub fn create_batch(&mut self, n: usize, out: &mut Vec<Entity>) -> Result<()> {
        let available = self.free_count as u64 + (MAX_INDEX_SPACE - self.total_indices) as u64;
        if n as u64 > available {
            return Err(EcsError::PoolExhausted);
        }
        out.reserve(n);
        for _ in 0..n {
            out.push(self.create().expect("capacity already checked"));
        }
        Ok(())
    }

    /// Destroy `e` if it is live. Returns whether it was.
    pub fn destroy(&mut self, e: Entity) -> bool {
        if !self.is_valid(e) {
            return false;
        }
        let index = e.index();
        let (seg, off) = self.segment_and_offset(index);
        {
            let slot = &mut self.segments[seg].as_mut().unwrap().slots[off];
            slot.version = Self::bump_version(slot.version);
        }
        self.segments[seg].as_mut().unwrap().live_count -= 1;
        self.live_count -= 1;
        self.push_free(index);
        if self.config.auto_release {
            self.maybe_release_segments();
        }
        true
    }

    /// Destroy every live entity in `entities`, returning the count destroyed.
    pub fn destroy_batch<I: IntoIterator<Item = Entity>>(&mut self, entities: I) -> usize {
        let mut count = 0;
        for e in entities {
            if self.destroy(e) {
                count += 1;
            }
        }
        count
    }

    /// Whether `e` currently refers to a live entity in this pool.
    pub fn is_valid(&self, e: Entity) -> bool {
        if e.is_null() {
            return false;
        }
        match self.slot(e.index()) {
            Some(slot) => slot.next_free == IN_USE && slot.version == e.version(),
            None => false,
        }
    }

    /// The live version for `index`, or 0 (`NULL_VERSION`) if the slot is
    /// free (never allocated, or destroyed and awaiting reuse).
    pub fn version_of(&self, index: u32) -> u8 {
        match self.slot(index) {
            Some(slot) if slot.next_free == IN_USE => slot.version,
            _ => 0,
        }
    }

    /// Iterate live entities in ascending index order.
    pub fn iter(&self) -> EntityPoolIter<'_> {
        EntityPoolIter { pool: self, next_index: 0 }
    }

    /// Drop all entities and free segments, returning to a fresh state.
    pub fn clear(&mut self) {
        self.segments.clear();
        self.total_indices = 0;
        self.free_head = FREE_END;
        self.free_count = 0;
        self.live_count = 0;
    }

    /// Pre-allocate segments to comfortably hold `n` indices.
    pub fn reserve(&mut self, n: usize) {
        let n = n as u32;
        if n == 0 {
            return;
        }
        let last_index = n.saturating_sub(1).min(MAX_INDEX_SPACE - 1);
        let last_seg = last_index / self.config.segment_size;
        for seg in 0..=last_seg {
            self.ensure_segment_for(seg * self.config.segment_size);
        }
    }

    /// Release any fully-empty segments that exceed `max_empty_segments`, regardless
    /// of the `auto_release` config flag. Destroyed slots inside released segments
    /// become permanently unusable (their free-list entries are dropped), matching
    /// the documented "stale forever after release" behavior.
    pub fn shrink_to_fit(&mut self) {
        self.release_empty_segments(0);
    }

    /// Snapshot every allocated slot in index order: `(version, in_use)`. Used
    /// by the persistence codec; `in_use == false` slots are either free or
    /// (if `version == 0`) never allocated.
    pub fn snapshot_slots(&self) -> Vec<(u8, bool)> {
        (0..self.total_indices)
            .map(|index| {
                let slot = self.slot(index).unwrap();
                (slot.version, slot.next_free == IN_USE)
            })
            .collect()
    }

    /// Rebuild a pool from a [`EntityPool::snapshot_slots`] result, restoring
    /// exact index/version/liveness state (including free-list membership).
    pub fn from_snapshot(config: EntityPoolConfig, slots: &[(u8, bool)]) -> Self {
        let mut pool = Self::with_config(config);
        if slots.is_empty() {
            return pool;
        }
        pool.ensure_segment_for(slots.len() as u32 - 1);
        pool.total_indices = slots.len() as u32;
        for (index, &(version, in_use)) in slots.iter().enumerate() {
            let slot = pool.slot_mut(index as u32).unwrap();
            slot.version = version;
            slot.next_free = IN_USE;
        }
        for (index, &(_, in_use)) in slots.iter().enumerate() {
            if in_use {
                let (seg, _) = pool.segment_and_offset(index as u32);
                pool.segments[seg].as_mut().unwrap().live_count += 1;
                pool.live_count += 1;
            } else {
                pool.push_free(index as u32);
            }
        }
        pool
    }

    /// Housekeeping hook called automatically after `destroy` when `auto_release`
    /// is enabled; releases empty segments once their count exceeds the configured cap.
    pub fn maybe_release_segments(&mut self) {
        self.release_empty_segments(self.config.max_empty_segments);
    }

    fn release_empty_segments(&mut self, keep: usize) {
        let empty: Vec<usize> = self
            .segments
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().filter(|s| s.live_count == 0).map(|_| i))
            .collect();
        if empty.len() <= keep {
            return;
        }
        for &seg_idx in &empty[..empty.len() - keep] {
            let base = seg_idx as u32 * self.config.segment_size;
            let end = base + self.config.segment_size;
            // Drop released indices from the free list; they are permanently retired.
            let mut rebuilt_head = FREE_END;
            let mut rebuilt_count = 0;
            let mut cursor = self.free_head;
            let mut chain = Vec::new();
            while cursor != FREE_END {
                chain.push(cursor);
                cursor = self.slot(cursor).unwrap().next_free;
            }
            for &idx in chain.iter().rev() {
                if idx >= base && idx < end {
                    continue;
                }
                if let Some(slot) = self.slot_mut(idx) {
                    slot.next_free = rebuilt_head;
                }
                rebuilt_head = idx;
                rebuilt_count += 1;
            }
            self.free_head = rebuilt_head;
            self.free_count = rebuilt_count;
            self.segments[seg_idx] = None;
        }
    }
}

impl Default for EntityPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Ascending-index iterator over live entities in an [`EntityPool`].
pub struct EntityPoolIter<'a> {
    pool: &'a EntityPool,
    next_index: u32,
}

impl<'a> Iterator for EntityPoolIter<'a> {
    type Item = Entity;

    fn next(&mut self) -> Option<Entity> {
        while self.next_index < self.pool.total_indices {
            let index = self.next_index;
            self.next_index += 1;
            if let Some(slot) = self.pool.slot(index) {
                if slot.next_free == IN_USE {
                    return Some(Entity::new(index, slot.version));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_allocation_is_version_one() {
        let mut pool = EntityPool::new();
        let e = pool.create().unwrap();
        assert_eq!(e.version(), 1);
        assert!(pool.is_valid(e));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn create_destroy_recycle() {
        let mut pool = EntityPool::new();
        let e1 = pool.create().unwrap();
        let e2 = pool.create().unwrap();
        let e3 = pool.create().unwrap();
        pool.destroy(e2);
        let e4 = pool.create().unwrap();

        assert_eq!(e4.index(), e2.index());
        assert_eq!(e4.version(), e2.version() + 1);
        assert!(pool.is_valid(e4));
        assert!(!pool.is_valid(e2));
        assert!(pool.is_valid(e1));
        assert!(pool.is_valid(e3));
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn destroy_invalid_is_noop() {
        let mut pool = EntityPool::new();
        assert!(!pool.destroy(Entity::NULL));
        let e = pool.create().unwrap();
        let wrong_version = Entity::new(e.index(), 99);
        assert!(!pool.destroy(wrong_version));
        assert!(pool.is_valid(e));
    }

    #[test]
    fn version_wraps_skipping_zero() {
        let mut pool = EntityPool::new();
        let mut e = pool.create().unwrap();
        let index = e.index();
        for _ in 0..512 {
            pool.destroy(e);
            e = pool.create().unwrap();
            assert_eq!(e.index(), index);
            assert_ne!(e.version(), 0);
        }
    }

    #[test]
    fn batch_create_is_all_or_nothing() {
        let mut pool = EntityPool::new();
        let mut out = Vec::new();
        pool.create_batch(1000, &mut out).unwrap();
        assert_eq!(out.len(), 1000);
        assert_eq!(pool.len(), 1000);

        let ids: std::collections::HashSet<_> = out.iter().map(|e| e.to_bits()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn iter_visits_live_in_ascending_order() {
        let mut pool = EntityPool::new();
        let entities: Vec<_> = (0..10).map(|_| pool.create().unwrap()).collect();
        pool.destroy(entities[3]);
        pool.destroy(entities[7]);

        let remaining: Vec<_> = pool.iter().map(|e| e.index()).collect();
        let expected: Vec<_> = entities
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != 3 && *i != 7)
            .map(|(_, e)| e.index())
            .collect();
        assert_eq!(remaining, expected);
    }

    #[test]
    fn version_of_is_zero_for_destroyed_and_never_allocated() {
        let mut pool = EntityPool::new();
        let e = pool.create().unwrap();
        assert_eq!(pool.version_of(e.index()), e.version());

        pool.destroy(e);
        assert_eq!(pool.version_of(e.index()), 0);
        assert_eq!(pool.version_of(99_999), 0);
    }

    #[test]
    fn segments_allocate_lazily() {
        let mut pool = EntityPool::with_config(EntityPoolConfig {
            segment_size: 1024,
            ..Default::default()
        });
        assert_eq!(pool.capacity(), 0);
        pool.create().unwrap();
        assert_eq!(pool.capacity(), 1);
    }
}
