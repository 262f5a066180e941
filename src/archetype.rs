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

//! Chunked, column-major storage for all entities sharing one component signature.
//!
//! Mirrors the teacher's `Archetype`/`ComponentColumn` (type-erased byte columns
//! with a per-type drop function) but replaces the teacher's single growable
//! `Vec<u8>` per column with fixed-size chunks drawn from a [`ChunkPool`], as
//! required by the chunked storage model: each chunk is one page holding an
//! entity array and one array per column, and a row's location packs down to
//! a single machine word.

use std::ptr::NonNull;

use tinyvec::ArrayVec;

use crate::chunk::ChunkPool;
use crate::component::{ComponentId, ComponentRegistry};
use crate::entity::Entity;
use crate::error::{EcsError, Result};
use crate::mask::{ComponentMask, MAX_COMPONENTS};

/// A row's position within an archetype: chunk index (high 32 bits) and
/// row-within-chunk (low 32 bits), packed into one word for cache-friendly
/// storage in the entity location index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedLocation(u64);

impl PackedLocation {
    #[inline]
    pub const fn new(chunk_index: u32, row: u32) -> Self {
        PackedLocation((chunk_index as u64) << 32 | row as u64)
    }

    #[inline]
    pub const fn chunk_index(self) -> u32 {
        (self.0 >> 32) as u32
    }

    #[inline]
    pub const fn row(self) -> u32 {
        self.0 as u32
    }
}

fn align_up(offset: usize, align: usize) -> usize {
    let align = align.max(1);
    (offset + align - 1) & !(align - 1)
}

struct Chunk {
    ptr: NonNull<u8>,
    /// Number of initialized rows; `0..len` are valid, `len..capacity` are
    /// uninitialized storage.
    len: u32,
}

/// Per-column metadata: which component it holds, where its array starts
/// within every chunk of this archetype, and its per-item byte size.
struct ColumnLayout {
    component_id: ComponentId,
    offset: usize,
    item_size: usize,
}

/// Column-major, chunked storage for every entity whose component set equals
/// `mask`. See the data model's `Archetype` invariants: components stored as
/// structure-of-arrays, swap-with-last removal, destructors run exactly once
/// per constructed cell.
pub struct Archetype {
    mask: ComponentMask,
    component_ids: ArrayVec<[ComponentId; MAX_COMPONENTS]>,
    columns: Vec<ColumnLayout>,
    chunks: Vec<Chunk>,
    capacity_per_chunk: u32,
    page_size: usize,
    total_len: usize,
    /// Monotonic count of rows ever inserted (for cleanup metrics).
    pub(crate) total_entities_seen: u64,
    pub(crate) peak_len: usize,
}

// SAFETY: chunk pointers are only ever dereferenced through `&mut self`
// methods; the archetype never shares a raw pointer across threads itself.
unsafe impl Send for Archetype {}

impl Archetype {
    /// Build the storage for `mask`, laying out `component_ids` (already
    /// sorted ascending, the canonical column order) within `page_size`-byte
    /// chunks using descriptors from `registry`.
    pub fn new(mask: ComponentMask, component_ids: &[ComponentId], registry: &ComponentRegistry, page_size: usize) -> Self {
        let mut sizes_aligns = Vec::with_capacity(component_ids.len());
        for &id in component_ids {
            let (size, align) = registry.with_descriptor(id, |d| (d.size, d.align));
            sizes_aligns.push((size, align));
        }
        let (capacity, offsets) = Self::layout_for(&sizes_aligns, page_size);

        let mut ids: ArrayVec<[ComponentId; MAX_COMPONENTS]> = ArrayVec::new();
        for &id in component_ids {
            ids.push(id);
        }
        let columns = component_ids
            .iter()
            .zip(offsets)
            .zip(sizes_aligns.iter())
            .map(|((&component_id, offset), &(item_size, _))| ColumnLayout { component_id, offset, item_size })
            .collect();

        Archetype {
            mask,
            component_ids: ids,
            columns,
            chunks: Vec::new(),
            capacity_per_chunk: capacity as u32,
            page_size,
            total_len: 0,
            total_entities_seen: 0,
            peak_len: 0,
        }
    }

    /// Compute (rows-per-chunk, column byte offsets) for a set of
    /// `(size, align)` columns within a `page_size`-byte page, matching the
    /// capacity formula in the data model: `(page − header) / (entity + Σcomponents)`,
    /// refined downward until every column actually fits (the formula ignores
    /// alignment padding, which can shrink true capacity by a row or two).
    fn layout_for(columns: &[(usize, usize)], page_size: usize) -> (usize, Vec<usize>) {
        const ENTITY_SIZE: usize = std::mem::size_of::<Entity>();
        let stride_sum: usize = ENTITY_SIZE + columns.iter().map(|(s, _)| s).sum::<usize>();
        let mut capacity = (page_size / stride_sum.max(1)).max(1);

        loop {
            let mut cursor = align_up(capacity * ENTITY_SIZE, 8);
            let mut offsets = Vec::with_capacity(columns.len());
            for &(size, align) in columns {
                cursor = align_up(cursor, align);
                offsets.push(cursor);
                cursor += size * capacity;
            }
            if cursor <= page_size || capacity <= 1 {
                assert!(cursor <= page_size || columns.is_empty() || stride_sum <= page_size,
                    "a single component does not fit within one chunk page");
                return (capacity.max(1), offsets);
            }
            capacity -= 1;
        }
    }

    pub fn mask(&self) -> ComponentMask {
        self.mask
    }

    pub fn component_ids(&self) -> &[ComponentId] {
        &self.component_ids
    }

    pub fn has_component(&self, id: ComponentId) -> bool {
        self.mask.contains(id)
    }

    pub fn len(&self) -> usize {
        self.total_len
    }

    pub fn is_empty(&self) -> bool {
        self.total_len == 0
    }

    pub fn capacity_per_chunk(&self) -> u32 {
        self.capacity_per_chunk
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    fn column_offset(&self, id: ComponentId) -> Option<usize> {
        self.columns.iter().find(|c| c.component_id == id).map(|c| c.offset)
    }

    fn column(&self, id: ComponentId) -> Option<&ColumnLayout> {
        self.columns.iter().find(|c| c.component_id == id)
    }

    unsafe fn entity_ptr(&self, chunk_index: u32, row: u32) -> *mut Entity {
        let chunk = &self.chunks[chunk_index as usize];
        chunk.ptr.as_ptr().add(row as usize * std::mem::size_of::<Entity>()) as *mut Entity
    }

    /// Raw pointer to the cell for component `id` at `loc`, or `None` if this
    /// archetype has no such column.
    pub fn component_ptr(&self, loc: PackedLocation, id: ComponentId) -> Option<*mut u8> {
        let column = self.column(id)?;
        let chunk = self.chunks.get(loc.chunk_index() as usize)?;
        Some(unsafe { chunk.ptr.as_ptr().add(column.offset).add(loc.row() as usize * column.item_size) })
    }

    /// Typed read access to a component at `loc`. Caller must ensure `T`
    /// matches the component registered under `id`.
    ///
    /// # Safety
    /// `id`'s descriptor size/align must match `T`, and the cell at `loc`
    /// must be initialized.
    pub unsafe fn get_component<T>(&self, loc: PackedLocation, id: ComponentId) -> Option<&T> {
        self.component_ptr(loc, id).map(|p| &*(p as *const T))
    }

    /// # Safety
    /// See [`Archetype::get_component`].
    pub unsafe fn get_component_mut<T>(&mut self, loc: PackedLocation, id: ComponentId) -> Option<&mut T> {
        self.component_ptr(loc, id).map(|p| &mut *(p as *mut T))
    }

    /// Write `value` into an already-reserved, uninitialized cell.
    ///
    /// # Safety
    /// The cell at `loc` for component `id` must currently be uninitialized.
    pub unsafe fn set_component<T>(&mut self, loc: PackedLocation, id: ComponentId, value: T) {
        let ptr = self.component_ptr(loc, id).expect("archetype has no such column") as *mut T;
        std::ptr::write(ptr, value);
    }

    /// Write raw bytes into an already-reserved, uninitialized cell, bypassing
    /// any typed constructor. Used when restoring a POD component from a
    /// persisted snapshot. `bytes.len()` must equal the column's item size.
    ///
    /// # Safety
    /// The cell at `loc` for component `id` must currently be uninitialized,
    /// and `bytes` must hold a valid bit pattern for that component's type.
    pub unsafe fn write_component_raw(&mut self, loc: PackedLocation, id: ComponentId, bytes: &[u8]) {
        let ptr = self.component_ptr(loc, id).expect("archetype has no such column");
        debug_assert_eq!(bytes.len(), self.column(id).unwrap().item_size);
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len());
    }

    pub fn entity_at(&self, loc: PackedLocation) -> Entity {
        unsafe { *self.entity_ptr(loc.chunk_index(), loc.row()) }
    }

    fn last_occupied(&self) -> Option<PackedLocation> {
        let chunk_index = self.chunks.len().checked_sub(1)? as u32;
        let row = self.chunks[chunk_index as usize].len.checked_sub(1)?;
        Some(PackedLocation::new(chunk_index, row))
    }

    /// Reserve a new row for `entity`, acquiring a chunk from `pool` if the
    /// current last chunk is full. Every component cell in the new row is
    /// left uninitialized; callers must follow up with `set_component` for
    /// each column this archetype has.
    pub fn add_entity(&mut self, entity: Entity, pool: &mut ChunkPool) -> Result<PackedLocation> {
        if let Some(chunk) = self.chunks.last_mut() {
            if chunk.len < self.capacity_per_chunk {
                let row = chunk.len;
                chunk.len += 1;
                let chunk_index = (self.chunks.len() - 1) as u32;
                self.total_len += 1;
                self.total_entities_seen += 1;
                self.peak_len = self.peak_len.max(self.total_len);
                let loc = PackedLocation::new(chunk_index, row);
                unsafe { *self.entity_ptr(chunk_index, row) = entity };
                return Ok(loc);
            }
        }
        let ptr = pool.acquire().ok_or(EcsError::OutOfMemory)?;
        self.chunks.push(Chunk { ptr, len: 1 });
        let chunk_index = (self.chunks.len() - 1) as u32;
        self.total_len += 1;
        self.total_entities_seen += 1;
        self.peak_len = self.peak_len.max(self.total_len);
        let loc = PackedLocation::new(chunk_index, 0);
        unsafe { *self.entity_ptr(chunk_index, 0) = entity };
        Ok(loc)
    }

    /// Copy the entity id and every column's raw bytes from `src` to `dst`
    /// (both within this archetype). `src` and `dst` must differ.
    unsafe fn copy_row(&mut self, src: PackedLocation, dst: PackedLocation, registry: &ComponentRegistry) {
        *self.entity_ptr(dst.chunk_index(), dst.row()) = *self.entity_ptr(src.chunk_index(), src.row());
        for column in &self.columns {
            let size = registry.with_descriptor(column.component_id, |d| d.size);
            let src_chunk = &self.chunks[src.chunk_index() as usize];
            let dst_chunk = &self.chunks[dst.chunk_index() as usize];
            let src_ptr = src_chunk.ptr.as_ptr().add(column.offset + src.row() as usize * size);
            let dst_ptr = dst_chunk.ptr.as_ptr().add(column.offset + dst.row() as usize * size);
            std::ptr::copy_nonoverlapping(src_ptr, dst_ptr, size);
        }
    }

    /// Swap-with-last removal without running any column destructor; used
    /// during archetype transitions where the caller has already moved or
    /// destroyed every cell at `loc`. Returns the entity that was swapped
    /// into `loc`, if any.
    fn swap_remove_row(&mut self, loc: PackedLocation, registry: &ComponentRegistry, pool: &mut ChunkPool) -> Option<Entity> {
        let last = self.last_occupied().expect("removing from an empty archetype");
        let moved = if last != loc {
            let moved_entity = self.entity_at(last);
            unsafe { self.copy_row(last, loc, registry) };
            Some(moved_entity)
        } else {
            None
        };
        let last_chunk_index = last.chunk_index() as usize;
        self.chunks[last_chunk_index].len -= 1;
        self.total_len -= 1;
        if self.chunks[last_chunk_index].len == 0 {
            let chunk = self.chunks.pop().unwrap();
            pool.release(chunk.ptr);
        }
        moved
    }

    /// Destroy every initialized component cell at `loc` and remove the row.
    /// Returns the entity swapped into `loc`, if the removed row was not the
    /// last in the archetype.
    pub fn remove_entity(&mut self, loc: PackedLocation, registry: &ComponentRegistry, pool: &mut ChunkPool) -> Option<Entity> {
        for column in &self.columns {
            let size = registry.with_descriptor(column.component_id, |d| d.size);
            let chunk = &self.chunks[loc.chunk_index() as usize];
            let ptr = unsafe { chunk.ptr.as_ptr().add(column.offset + loc.row() as usize * size) };
            registry.with_descriptor(column.component_id, |d| {
                if let Some(destroy) = d.destroy {
                    unsafe { destroy(ptr) };
                }
            });
        }
        self.swap_remove_row(loc, registry, pool)
    }

    /// Move a row from `self` at `loc` into `dst`, reserving a new row there.
    /// Shared columns are move-constructed across; columns unique to `self`
    /// are destroyed; columns unique to `dst` are left uninitialized for the
    /// caller to fill in. Returns the destination location and, if a
    /// different entity was swapped into `loc` in `self`, that entity.
    pub fn move_entity_to(
        &mut self,
        loc: PackedLocation,
        dst: &mut Archetype,
        registry: &ComponentRegistry,
        pool: &mut ChunkPool,
    ) -> Result<(PackedLocation, Option<Entity>)> {
        let entity = self.entity_at(loc);
        let dst_loc = dst.add_entity(entity, pool)?;

        for column in &self.columns {
            let size = registry.with_descriptor(column.component_id, |d| d.size);
            let src_chunk = &self.chunks[loc.chunk_index() as usize];
            let src_ptr = unsafe { src_chunk.ptr.as_ptr().add(column.offset + loc.row() as usize * size) };
            if let Some(dst_ptr) = dst.component_ptr(dst_loc, column.component_id) {
                registry.with_descriptor(column.component_id, |d| unsafe {
                    (d.move_construct)(dst_ptr, src_ptr)
                });
            } else {
                registry.with_descriptor(column.component_id, |d| {
                    if let Some(destroy) = d.destroy {
                        unsafe { destroy(src_ptr) };
                    }
                });
            }
        }

        let moved = self.swap_remove_row(loc, registry, pool);
        Ok((dst_loc, moved))
    }

    /// Release every chunk this archetype owns back to `pool`. Called when an
    /// archetype is removed during cleanup.
    pub fn release_chunks(&mut self, pool: &mut ChunkPool) {
        for chunk in self.chunks.drain(..) {
            pool.release(chunk.ptr);
        }
        self.total_len = 0;
    }

    /// Batched iteration: yields, per chunk, the row count and a closure-free
    /// view the caller uses with [`Archetype::column_slice`] /
    /// [`Archetype::column_slice_mut`] to fetch typed column pointers.
    pub fn for_each_chunk<F: FnMut(ChunkView<'_>)>(&self, mut f: F) {
        for (index, chunk) in self.chunks.iter().enumerate() {
            f(ChunkView { archetype: self, chunk_index: index as u32, len: chunk.len });
        }
    }
}

/// A read-only view of one chunk's occupied rows, used by the batched
/// iteration path ([`Archetype::for_each_chunk`]) and by [`crate::query`].
pub struct ChunkView<'a> {
    archetype: &'a Archetype,
    chunk_index: u32,
    len: u32,
}

impl<'a> ChunkView<'a> {
    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn chunk_index(&self) -> u32 {
        self.chunk_index
    }

    pub fn entities(&self) -> &'a [Entity] {
        let chunk = &self.archetype.chunks[self.chunk_index as usize];
        unsafe { std::slice::from_raw_parts(chunk.ptr.as_ptr() as *const Entity, self.len as usize) }
    }

    /// Raw bytes of component `id`'s column for this chunk's occupied rows,
    /// `item_size * len()` bytes long. Used by the persistence codec, which
    /// has no compile-time type to recover `T` from.
    pub fn raw_column_bytes(&self, id: ComponentId) -> Option<&'a [u8]> {
        let column = self.archetype.column(id)?;
        let chunk = &self.archetype.chunks[self.chunk_index as usize];
        let ptr = unsafe { chunk.ptr.as_ptr().add(column.offset) };
        Some(unsafe { std::slice::from_raw_parts(ptr, column.item_size * self.len as usize) })
    }

    /// Typed slice over component `id`'s column for this chunk's occupied rows.
    ///
    /// # Safety
    /// `T` must match the size/alignment of the component registered as `id`.
    pub unsafe fn column_slice<T>(&self, id: ComponentId) -> Option<&'a [T]> {
        let offset = self.archetype.column_offset(id)?;
        let chunk = &self.archetype.chunks[self.chunk_index as usize];
        let ptr = chunk.ptr.as_ptr().add(offset) as *const T;
        Some(std::slice::from_raw_parts(ptr, self.len as usize))
    }

    /// # Safety
    /// See [`ChunkView::column_slice`]; additionally requires exclusive
    /// access to this archetype for the lifetime of the returned slice.
    pub unsafe fn column_slice_mut<T>(&self, id: ComponentId) -> Option<&'a mut [T]> {
        let offset = self.archetype.column_offset(id)?;
        let chunk = &self.archetype.chunks[self.chunk_index as usize];
        let ptr = chunk.ptr.as_ptr().add(offset) as *mut T;
        Some(std::slice::from_raw_parts_mut(ptr, self.len as usize))
    }
}

impl Drop for Archetype {
    fn drop(&mut self) {
        // Chunks are returned to the pool by the owning ArchetypeManager via
        // `release_chunks` before an Archetype is dropped during cleanup; a
        // still-populated Archetype being dropped with the whole registry
        // leaks its chunk memory back to the process allocator along with
        // the bump arena, which is acceptable since the pool itself is being
        // torn down in that case.
        let _ = &self.chunks;
    }
}
