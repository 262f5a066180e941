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

//! Fixed-size page allocator for archetype chunks.
//!
//! Each "block" is a single large `bumpalo` allocation, carved into
//! `chunks_per_block` fixed-size pages; chunks never migrate or split between
//! blocks, and released chunks return to a LIFO free list rather than being
//! returned to the system allocator. Single-writer: the archetype manager that
//! owns a pool is the only thing that may call into it.

use std::ptr::NonNull;

/// Default chunk size: one 16 KiB page, matching common game-ECS column layouts.
pub const DEFAULT_PAGE_SIZE: usize = 16 * 1024;
const CHUNK_ALIGN: usize = 64;

/// Tunables for a [`ChunkPool`].
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct ChunkPoolConfig {
    pub page_size: usize,
    pub chunks_per_block: usize,
    pub max_chunks: usize,
    pub initial_blocks: usize,
    /// Hint only; this allocator has no huge-page backend, but the flag is
    /// threaded through so callers can record intent in saved configuration.
    pub use_huge_pages: bool,
}

impl Default for ChunkPoolConfig {
    fn default() -> Self {
        ChunkPoolConfig {
            page_size: DEFAULT_PAGE_SIZE,
            chunks_per_block: 32,
            max_chunks: 1 << 20,
            initial_blocks: 0,
            use_huge_pages: false,
        }
    }
}

/// Allocation counters exposed for diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkPoolStats {
    pub acquires: u64,
    pub releases: u64,
    pub failed_acquires: u64,
    pub total_chunks: usize,
    pub free_chunks: usize,
    pub block_allocations: u64,
}

struct Block {
    start: *mut u8,
    len: usize,
}

/// Page allocator backing archetype chunk storage.
pub struct ChunkPool {
    arena: bumpalo::Bump,
    blocks: Vec<Block>,
    free_list: Vec<NonNull<u8>>,
    config: ChunkPoolConfig,
    /// `max_chunks` clamped down to the largest multiple of `chunks_per_block`
    /// that does not exceed it (preserved quirk from the source implementation).
    effective_max_chunks: usize,
    total_chunks: usize,
    stats: ChunkPoolStats,
}

// SAFETY: the pool is single-writer by contract; the raw pointers it stores
// are never aliased outside of acquire/release, which require `&mut self`.
unsafe impl Send for ChunkPool {}

impl ChunkPool {
    pub fn new(config: ChunkPoolConfig) -> Self {
        assert!(config.chunks_per_block > 0);
        let effective_max_chunks = (config.max_chunks / config.chunks_per_block) * config.chunks_per_block;
        let mut pool = ChunkPool {
            arena: bumpalo::Bump::new(),
            blocks: Vec::new(),
            free_list: Vec::new(),
            config,
            effective_max_chunks,
            total_chunks: 0,
            stats: ChunkPoolStats::default(),
        };
        for _ in 0..pool.config.initial_blocks {
            pool.allocate_block();
        }
        pool
    }

    pub fn page_size(&self) -> usize {
        self.config.page_size
    }

    fn allocate_block(&mut self) -> bool {
        if self.total_chunks + self.config.chunks_per_block > self.effective_max_chunks {
            return false;
        }
        let block_len = self.config.chunks_per_block * self.config.page_size;
        let layout = std::alloc::Layout::from_size_align(block_len, CHUNK_ALIGN)
            .expect("chunk block layout");
        let base = self.arena.alloc_layout(layout);
        self.blocks.push(Block { start: base.as_ptr(), len: block_len });
        for i in 0..self.config.chunks_per_block {
            // SAFETY: `base` owns `block_len` bytes; each slice lies fully within it.
            let chunk_ptr = unsafe { base.as_ptr().add(i * self.config.page_size) };
            self.free_list.push(NonNull::new(chunk_ptr).unwrap());
        }
        self.total_chunks += self.config.chunks_per_block;
        self.stats.block_allocations += 1;
        true
    }

    /// Acquire one chunk, allocating a new block if needed. `None` if the pool
    /// is at `max_chunks` capacity.
    pub fn acquire(&mut self) -> Option<NonNull<u8>> {
        if let Some(ptr) = self.free_list.pop() {
            self.stats.acquires += 1;
            return Some(ptr);
        }
        if !self.allocate_block() {
            self.stats.failed_acquires += 1;
            return None;
        }
        let ptr = self.free_list.pop();
        if ptr.is_some() {
            self.stats.acquires += 1;
        } else {
            self.stats.failed_acquires += 1;
        }
        ptr
    }

    /// Acquire up to `n` chunks; partial success is legal and recorded in stats.
    pub fn acquire_batch(&mut self, n: usize, out: &mut Vec<NonNull<u8>>) -> usize {
        let mut acquired = 0;
        for _ in 0..n {
            match self.acquire() {
                Some(ptr) => {
                    out.push(ptr);
                    acquired += 1;
                }
                None => break,
            }
        }
        acquired
    }

    /// Return a chunk to the free list. The chunk's contents are left as-is;
    /// the next acquirer must re-initialize before use.
    pub fn release(&mut self, ptr: NonNull<u8>) {
        debug_assert!(self.owns(ptr), "releasing a chunk this pool did not allocate");
        self.free_list.push(ptr);
        self.stats.releases += 1;
    }

    /// Whether `ptr` lies within a block this pool allocated.
    pub fn owns(&self, ptr: NonNull<u8>) -> bool {
        let p = ptr.as_ptr() as usize;
        self.blocks.iter().any(|b| {
            let start = b.start as usize;
            p >= start && p < start + b.len
        })
    }

    pub fn stats(&self) -> ChunkPoolStats {
        ChunkPoolStats {
            free_chunks: self.free_list.len(),
            total_chunks: self.total_chunks,
            ..self.stats
        }
    }
}

impl Default for ChunkPool {
    fn default() -> Self {
        Self::new(ChunkPoolConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_allocates_block_lazily() {
        let mut pool = ChunkPool::new(ChunkPoolConfig { chunks_per_block: 4, ..Default::default() });
        assert_eq!(pool.stats().block_allocations, 0);
        let p = pool.acquire().unwrap();
        assert_eq!(pool.stats().block_allocations, 1);
        assert!(pool.owns(p));
    }

    #[test]
    fn release_recycles_via_free_list() {
        let mut pool = ChunkPool::new(ChunkPoolConfig { chunks_per_block: 2, ..Default::default() });
        let a = pool.acquire().unwrap();
        pool.release(a);
        let b = pool.acquire().unwrap();
        assert_eq!(a, b);
        assert_eq!(pool.stats().block_allocations, 1);
    }

    #[test]
    fn max_chunks_clamps_to_multiple_of_block_size() {
        let mut pool = ChunkPool::new(ChunkPoolConfig {
            chunks_per_block: 8,
            max_chunks: 20, // not a multiple of 8 -> effective cap is 16
            ..Default::default()
        });
        let mut acquired = Vec::new();
        for _ in 0..16 {
            acquired.push(pool.acquire());
        }
        assert!(acquired.iter().all(Option::is_some));
        assert!(pool.acquire().is_none());
        assert_eq!(pool.stats().failed_acquires, 1);
    }

    #[test]
    fn acquire_batch_partial_success() {
        let mut pool = ChunkPool::new(ChunkPoolConfig {
            chunks_per_block: 4,
            max_chunks: 4,
            ..Default::default()
        });
        let mut out = Vec::new();
        let got = pool.acquire_batch(10, &mut out);
        assert_eq!(got, 4);
        assert_eq!(out.len(), 4);
    }
}
