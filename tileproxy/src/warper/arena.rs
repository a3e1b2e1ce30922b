//! Shared-memory arena with an in-place allocator.
//!
//! Each warper worker owns one arena: a fixed-size file mapping shared with
//! the serving process. The allocator bookkeeping lives inside the region
//! itself, so either side can attach to the same bytes and continue where
//! the other left off. Only one side touches the arena at a time: the worker
//! while it processes a request, the requester after the response arrived.
//!
//! # Layout
//!
//! ```text
//! ┌──────────────────┬───────────────┬─────────┬───────────────┬─────────┬──
//! │ header (64 B)    │ block header  │ payload │ block header  │ payload │ ..
//! │ magic, end       │ size, state   │         │ size, state   │         │
//! └──────────────────┴───────────────┴─────────┴───────────────┴─────────┴──
//! ```
//!
//! Blocks are 16 byte aligned and cover the region without gaps. Allocation
//! is first-fit with splitting; adjacent free blocks are merged on release
//! and while scanning.
//!
//! Allocations are identified by the payload offset, never by a pointer, so
//! they stay meaningful across processes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::Error;
use crate::geo::Raster;

const MAGIC: u64 = u64::from_le_bytes(*b"TPARENA1");
const HEADER_SIZE: usize = 64;
const BLOCK_HEADER_SIZE: usize = 16;
const ALIGN: usize = 16;
const MIN_BLOCK: usize = BLOCK_HEADER_SIZE + ALIGN;

const FREE: u64 = 0;
const USED: u64 = 1;

/// Arena errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArenaError {
    #[error("Arena region of {0} bytes is too small")]
    TooSmall(usize),

    #[error("Region does not contain a formatted arena")]
    BadMagic,

    #[error("Arena corrupted at offset {0}")]
    Corrupt(usize),

    #[error("Arena out of memory: requested {requested} bytes, largest free block {available}")]
    OutOfMemory { requested: usize, available: usize },

    #[error("No live allocation at offset {0}")]
    InvalidAllocation(u64),
}

impl From<ArenaError> for Error {
    fn from(err: ArenaError) -> Self {
        Error::internal(err.to_string())
    }
}

/// Handle of an allocation: payload offset and requested length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Allocation {
    pub offset: u64,
    pub len: u64,
}

/// Allocator view over a memory region.
pub struct Arena<'a> {
    mem: &'a mut [u8],
    end: usize,
}

fn align_up(n: usize) -> usize {
    n.div_ceil(ALIGN) * ALIGN
}

impl<'a> Arena<'a> {
    /// Formats `mem` as an empty arena.
    pub fn format(mem: &'a mut [u8]) -> Result<Self, ArenaError> {
        if mem.len() < HEADER_SIZE + MIN_BLOCK {
            return Err(ArenaError::TooSmall(mem.len()));
        }
        let end = HEADER_SIZE + (mem.len() - HEADER_SIZE) / ALIGN * ALIGN;

        let mut arena = Self { mem, end };
        arena.write_u64(0, MAGIC);
        arena.write_u64(8, end as u64);
        arena.write_block(HEADER_SIZE, end - HEADER_SIZE, FREE);
        Ok(arena)
    }

    /// Attaches to a region previously formatted with [`Arena::format`].
    pub fn attach(mem: &'a mut [u8]) -> Result<Self, ArenaError> {
        if mem.len() < HEADER_SIZE + MIN_BLOCK {
            return Err(ArenaError::TooSmall(mem.len()));
        }
        let mut arena = Self { mem, end: 0 };
        if arena.read_u64(0) != MAGIC {
            return Err(ArenaError::BadMagic);
        }
        let end = arena.read_u64(8) as usize;
        if end > arena.mem.len() || end < HEADER_SIZE + MIN_BLOCK {
            return Err(ArenaError::Corrupt(8));
        }
        arena.end = end;
        Ok(arena)
    }

    /// Total bytes available to blocks (headers included).
    pub fn capacity(&self) -> usize {
        self.end - HEADER_SIZE
    }

    fn read_u64(&self, at: usize) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.mem[at..at + 8]);
        u64::from_le_bytes(buf)
    }

    fn write_u64(&mut self, at: usize, value: u64) {
        self.mem[at..at + 8].copy_from_slice(&value.to_le_bytes());
    }

    fn write_block(&mut self, at: usize, size: usize, state: u64) {
        self.write_u64(at, size as u64);
        self.write_u64(at + 8, state);
    }

    /// Reads and validates the block header at `at`.
    fn block(&self, at: usize) -> Result<(usize, u64), ArenaError> {
        let size = self.read_u64(at) as usize;
        let state = self.read_u64(at + 8);
        if size < MIN_BLOCK || size % ALIGN != 0 || at + size > self.end || state > USED {
            return Err(ArenaError::Corrupt(at));
        }
        Ok((size, state))
    }

    /// Merges the free block at `at` with the free blocks following it.
    fn coalesce(&mut self, at: usize, mut size: usize) -> Result<usize, ArenaError> {
        while at + size < self.end {
            let (next_size, next_state) = self.block(at + size)?;
            if next_state != FREE {
                break;
            }
            size += next_size;
        }
        self.write_block(at, size, FREE);
        Ok(size)
    }

    /// Allocates `len` bytes.
    pub fn allocate(&mut self, len: usize) -> Result<Allocation, ArenaError> {
        let need = BLOCK_HEADER_SIZE + align_up(len.max(1));
        let mut largest = 0;
        let mut at = HEADER_SIZE;

        while at < self.end {
            let (mut size, state) = self.block(at)?;
            if state == FREE {
                size = self.coalesce(at, size)?;
                if size >= need {
                    if size - need >= MIN_BLOCK {
                        self.write_block(at + need, size - need, FREE);
                        size = need;
                    }
                    self.write_block(at, size, USED);
                    return Ok(Allocation {
                        offset: (at + BLOCK_HEADER_SIZE) as u64,
                        len: len as u64,
                    });
                }
                largest = largest.max(size - BLOCK_HEADER_SIZE);
            }
            at += size;
        }

        Err(ArenaError::OutOfMemory {
            requested: len,
            available: largest,
        })
    }

    /// Locates the used block holding `alloc`.
    fn find_used(&self, alloc: Allocation) -> Result<(usize, usize), ArenaError> {
        let target = (alloc.offset as usize).checked_sub(BLOCK_HEADER_SIZE);
        let mut at = HEADER_SIZE;
        while at < self.end {
            let (size, state) = self.block(at)?;
            if Some(at) == target {
                let payload = size - BLOCK_HEADER_SIZE;
                if state != USED || alloc.len as usize > payload {
                    break;
                }
                return Ok((at, size));
            }
            at += size;
        }
        Err(ArenaError::InvalidAllocation(alloc.offset))
    }

    /// Returns an allocation to the free list.
    pub fn release(&mut self, alloc: Allocation) -> Result<(), ArenaError> {
        let (at, size) = self.find_used(alloc)?;
        self.coalesce(at, size)?;
        Ok(())
    }

    /// Payload bytes of a live allocation.
    pub fn bytes(&self, alloc: Allocation) -> Result<&[u8], ArenaError> {
        self.find_used(alloc)?;
        let start = alloc.offset as usize;
        Ok(&self.mem[start..start + alloc.len as usize])
    }

    /// Mutable payload bytes of a live allocation.
    pub fn bytes_mut(&mut self, alloc: Allocation) -> Result<&mut [u8], ArenaError> {
        self.find_used(alloc)?;
        let start = alloc.offset as usize;
        Ok(&mut self.mem[start..start + alloc.len as usize])
    }

    /// Size of the largest allocation that would currently succeed.
    pub fn largest_free(&mut self) -> Result<usize, ArenaError> {
        let mut largest = 0;
        let mut at = HEADER_SIZE;
        while at < self.end {
            let (mut size, state) = self.block(at)?;
            if state == FREE {
                size = self.coalesce(at, size)?;
                largest = largest.max(size - BLOCK_HEADER_SIZE);
            }
            at += size;
        }
        Ok(largest)
    }

    /// Number of live allocations.
    pub fn live_allocations(&self) -> Result<usize, ArenaError> {
        let mut count = 0;
        let mut at = HEADER_SIZE;
        while at < self.end {
            let (size, state) = self.block(at)?;
            if state == USED {
                count += 1;
            }
            at += size;
        }
        Ok(count)
    }

    /// Allocates a slot for `raster` and writes it in place.
    pub fn store_raster(&mut self, raster: &Raster) -> crate::error::Result<Allocation> {
        let alloc = self.allocate(raster.encoded_len())?;
        let written = raster.write_to(self.bytes_mut(alloc)?);
        if let Err(err) = written {
            self.release(alloc)?;
            return Err(err);
        }
        Ok(alloc)
    }

    /// Reads a raster stored with [`Arena::store_raster`].
    pub fn load_raster(&self, alloc: Allocation) -> crate::error::Result<Raster> {
        Raster::read_from(self.bytes(alloc)?)
    }

    /// Allocates a slot and copies `data` into it.
    pub fn store_bytes(&mut self, data: &[u8]) -> Result<Allocation, ArenaError> {
        let alloc = self.allocate(data.len())?;
        self.bytes_mut(alloc)?.copy_from_slice(data);
        Ok(alloc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Size2;
    use proptest::prelude::*;

    fn region(size: usize) -> Vec<u8> {
        vec![0u8; size]
    }

    #[test]
    fn test_format_and_attach() {
        let mut mem = region(4096);
        let capacity = Arena::format(&mut mem).unwrap().capacity();
        let arena = Arena::attach(&mut mem).unwrap();
        assert_eq!(arena.capacity(), capacity);
    }

    #[test]
    fn test_attach_unformatted_fails() {
        let mut mem = region(4096);
        assert_eq!(Arena::attach(&mut mem).err(), Some(ArenaError::BadMagic));
    }

    #[test]
    fn test_too_small() {
        let mut mem = region(32);
        assert!(matches!(
            Arena::format(&mut mem),
            Err(ArenaError::TooSmall(32))
        ));
    }

    #[test]
    fn test_allocations_are_aligned_and_disjoint() {
        let mut mem = region(4096);
        let mut arena = Arena::format(&mut mem).unwrap();
        let a = arena.allocate(10).unwrap();
        let b = arena.allocate(33).unwrap();

        assert_eq!(a.offset % ALIGN as u64, 0);
        assert_eq!(b.offset % ALIGN as u64, 0);
        assert!(a.offset + a.len <= b.offset);
        assert_eq!(arena.live_allocations().unwrap(), 2);
    }

    #[test]
    fn test_out_of_memory_reports_largest_block() {
        let mut mem = region(HEADER_SIZE + 256);
        let mut arena = Arena::format(&mut mem).unwrap();
        let err = arena.allocate(1000).unwrap_err();
        assert_eq!(
            err,
            ArenaError::OutOfMemory {
                requested: 1000,
                available: 256 - BLOCK_HEADER_SIZE
            }
        );
    }

    #[test]
    fn test_double_release_rejected() {
        let mut mem = region(1024);
        let mut arena = Arena::format(&mut mem).unwrap();
        let a = arena.allocate(64).unwrap();
        arena.release(a).unwrap();
        assert_eq!(
            arena.release(a),
            Err(ArenaError::InvalidAllocation(a.offset))
        );
    }

    #[test]
    fn test_release_from_other_attachment() {
        let mut mem = region(2048);
        let alloc = {
            let mut worker_side = Arena::format(&mut mem).unwrap();
            worker_side.store_bytes(b"pixels").unwrap()
        };

        let mut requester_side = Arena::attach(&mut mem).unwrap();
        assert_eq!(requester_side.bytes(alloc).unwrap(), b"pixels");
        requester_side.release(alloc).unwrap();
        assert_eq!(requester_side.live_allocations().unwrap(), 0);
    }

    #[test]
    fn test_raster_in_place() {
        let mut mem = region(4096);
        let mut arena = Arena::format(&mut mem).unwrap();
        let raster = Raster::from_u8(Size2::new(4, 2), 2, (0..16).collect()).unwrap();

        let alloc = arena.store_raster(&raster).unwrap();
        assert_eq!(arena.load_raster(alloc).unwrap(), raster);
    }

    #[test]
    fn test_corrupt_block_detected() {
        let mut mem = region(1024);
        Arena::format(&mut mem).unwrap();
        mem[HEADER_SIZE..HEADER_SIZE + 8].copy_from_slice(&3u64.to_le_bytes());

        let mut arena = Arena::attach(&mut mem).unwrap();
        assert_eq!(arena.allocate(8), Err(ArenaError::Corrupt(HEADER_SIZE)));
    }

    proptest! {
        #[test]
        fn prop_alloc_release_keeps_invariants(
            ops in prop::collection::vec((any::<bool>(), 1usize..600), 1..80)
        ) {
            let mut mem = region(16 * 1024);
            let mut arena = Arena::format(&mut mem).unwrap();
            let full = arena.largest_free().unwrap();
            let mut live: Vec<Allocation> = Vec::new();

            for (do_alloc, n) in ops {
                if do_alloc || live.is_empty() {
                    if let Ok(a) = arena.allocate(n) {
                        for other in &live {
                            let disjoint = a.offset + a.len <= other.offset
                                || other.offset + other.len <= a.offset;
                            prop_assert!(disjoint);
                        }
                        prop_assert!(a.offset as usize + a.len as usize <= arena.end);
                        live.push(a);
                    }
                } else {
                    let a = live.remove(n % live.len());
                    prop_assert!(arena.release(a).is_ok());
                }
                prop_assert_eq!(arena.live_allocations().unwrap(), live.len());
            }

            for a in live.drain(..) {
                prop_assert!(arena.release(a).is_ok());
            }
            prop_assert_eq!(arena.largest_free().unwrap(), full);
        }
    }
}
