//! Compact, memory-mapped form of a [`TileIndex`].
//!
//! File layout (little endian):
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ header (16 B): "TIDX" | version u32 | min lod | max lod  │
//! ├──────────────────────────────────────────────────────────┤
//! │ per LOD (32 B): llx lly urx ury u32 | offset u64 | flags │
//! ├──────────────────────────────────────────────────────────┤
//! │ per LOD bitset over its range, row-major, LSB first      │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Existence checks read single bits out of the mapping without parsing
//! the whole file.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use memmap2::Mmap;

use crate::error::{Error, Result};

use super::{Lod, LodRange, TileId, TileIndex, TileRange};

const MAGIC: &[u8; 4] = b"TIDX";
const VERSION: u32 = 1;
const HEADER_SIZE: usize = 16;
const ENTRY_SIZE: usize = 32;
const FLAG_PRESENT: u32 = 1;

/// Read-only tile index backed by a memory mapping.
#[derive(Debug)]
pub struct DeliveryIndex {
    mmap: Mmap,
    lod_range: LodRange,
}

impl DeliveryIndex {
    /// Encodes `index` into the delivery format.
    pub fn encode(index: &TileIndex) -> Vec<u8> {
        let lods = index.lod_range();
        let count = lods.iter().count();

        let mut header = Vec::with_capacity(HEADER_SIZE + count * ENTRY_SIZE);
        header.extend_from_slice(MAGIC);
        header.extend_from_slice(&VERSION.to_le_bytes());
        header.push(lods.min);
        header.push(lods.max);
        header.resize(HEADER_SIZE, 0);

        let mut bits = Vec::new();
        let data_start = (HEADER_SIZE + count * ENTRY_SIZE) as u64;
        for lod in lods.iter() {
            let range = index.range_at(lod);
            let r = range.unwrap_or(TileRange::new(0, 0, 0, 0));
            let offset = data_start + bits.len() as u64;

            for v in [r.ll[0], r.ll[1], r.ur[0], r.ur[1]] {
                header.extend_from_slice(&v.to_le_bytes());
            }
            header.extend_from_slice(&offset.to_le_bytes());
            let flags = if range.is_some() { FLAG_PRESENT } else { 0 };
            header.extend_from_slice(&flags.to_le_bytes());
            header.extend_from_slice(&0u32.to_le_bytes());

            if range.is_some() {
                let width = r.width() as usize;
                let mut bitset = vec![0u8; (width * r.height() as usize).div_ceil(8)];
                for t in index.tiles_at(lod) {
                    let bit = (t.y - r.ll[1]) as usize * width + (t.x - r.ll[0]) as usize;
                    bitset[bit / 8] |= 1 << (bit % 8);
                }
                bits.extend_from_slice(&bitset);
            }
        }

        header.extend_from_slice(&bits);
        header
    }

    /// Writes `index` to `path` through a temporary file and a rename.
    pub fn write(index: &TileIndex, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp_path = path.with_extension("tmp");
        {
            let mut file = File::create(&temp_path)?;
            file.write_all(&Self::encode(index))?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, path)?;
        Ok(())
    }

    /// Maps a delivery index file.
    ///
    /// # Errors
    ///
    /// `NotFound` if the file does not exist, `Internal` if it is malformed.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::not_found(format!("No delivery index at {}.", path.display()))
            } else {
                Error::from(e)
            }
        })?;
        // SAFETY: the file is only ever replaced by rename, never modified in
        // place, so the mapped contents stay stable for the mapping's lifetime.
        let mmap = unsafe { Mmap::map(&file)? };
        let lod_range = validate(&mmap)
            .map_err(|reason| Error::internal(format!("{}: {}", path.display(), reason)))?;
        Ok(Self { mmap, lod_range })
    }

    pub fn lod_range(&self) -> LodRange {
        self.lod_range
    }

    fn entry(&self, lod: Lod) -> Option<(TileRange, usize)> {
        if !self.lod_range.contains(lod) {
            return None;
        }
        let at = HEADER_SIZE + (lod - self.lod_range.min) as usize * ENTRY_SIZE;
        let e = &self.mmap[at..at + ENTRY_SIZE];
        if read_u32(e, 24) & FLAG_PRESENT == 0 {
            return None;
        }
        let range = TileRange::new(read_u32(e, 0), read_u32(e, 4), read_u32(e, 8), read_u32(e, 12));
        Some((range, read_u64(e, 16) as usize))
    }

    /// Bounding range of occupied tiles at `lod`.
    pub fn range_at(&self, lod: Lod) -> Option<TileRange> {
        self.entry(lod).map(|(range, _)| range)
    }

    /// Returns true if `tile` is occupied.
    pub fn get(&self, tile: TileId) -> bool {
        let Some((range, offset)) = self.entry(tile.lod) else {
            return false;
        };
        if !range.contains(tile.x, tile.y) {
            return false;
        }
        let bit = (tile.y - range.ll[1]) as usize * range.width() as usize
            + (tile.x - range.ll[0]) as usize;
        self.mmap
            .get(offset + bit / 8)
            .is_some_and(|byte| byte & (1 << (bit % 8)) != 0)
    }

    /// Occupancy flags of a metatile block, one byte per tile, row-major.
    ///
    /// # Errors
    ///
    /// `NotFound` if `origin` is not aligned to the block or the block holds
    /// no tile at all.
    pub fn metatile(&self, origin: TileId, order: u8) -> Result<Vec<u8>> {
        let side = 1u32 << order;
        if origin.x % side != 0 || origin.y % side != 0 {
            return Err(Error::not_found(format!(
                "Metatile <{}> is not aligned to its block.",
                origin
            )));
        }

        let mut flags = Vec::with_capacity((side * side) as usize);
        for y in origin.y..origin.y + side {
            for x in origin.x..origin.x + side {
                flags.push(u8::from(self.get(TileId::new(origin.lod, x, y))));
            }
        }
        if flags.iter().all(|f| *f == 0) {
            return Err(Error::not_found(format!("Metatile <{}> is empty.", origin)));
        }
        Ok(flags)
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(b)
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(b)
}

/// Checks the header and every entry against the file length.
fn validate(bytes: &[u8]) -> std::result::Result<LodRange, String> {
    if bytes.len() < HEADER_SIZE || &bytes[..4] != MAGIC {
        return Err("not a delivery index".into());
    }
    let version = read_u32(bytes, 4);
    if version != VERSION {
        return Err(format!("unsupported version {}", version));
    }
    let lod_range = LodRange::new(bytes[8], bytes[9]);
    if lod_range.is_empty() {
        return Err("empty LOD range".into());
    }

    let count = lod_range.iter().count();
    if bytes.len() < HEADER_SIZE + count * ENTRY_SIZE {
        return Err("truncated entry table".into());
    }
    for i in 0..count {
        let e = &bytes[HEADER_SIZE + i * ENTRY_SIZE..HEADER_SIZE + (i + 1) * ENTRY_SIZE];
        if read_u32(e, 24) & FLAG_PRESENT == 0 {
            continue;
        }
        let range = TileRange::new(read_u32(e, 0), read_u32(e, 4), read_u32(e, 8), read_u32(e, 12));
        if range.ll[0] > range.ur[0] || range.ll[1] > range.ur[1] {
            return Err(format!("invalid range {}", range));
        }
        let len = (range.width() as usize * range.height() as usize).div_ceil(8);
        let offset = read_u64(e, 16) as usize;
        if offset.checked_add(len).map_or(true, |end| end > bytes.len()) {
            return Err("truncated bitset".into());
        }
    }
    Ok(lod_range)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_index() -> TileIndex {
        let mut index = TileIndex::new(LodRange::new(1, 4));
        index.set(TileId::new(4, 9, 3));
        index.set(TileId::new(4, 12, 5));
        index.set(TileId::new(2, 1, 1));
        index
    }

    #[test]
    fn test_lookups_match_tile_index() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("delivery.index");
        let index = sample_index();
        DeliveryIndex::write(&index, &path).unwrap();

        let delivery = DeliveryIndex::open(&path).unwrap();
        assert_eq!(delivery.lod_range(), LodRange::new(1, 4));
        for lod in 0..=5 {
            let n = 1u32 << lod;
            for y in 0..n {
                for x in 0..n {
                    let tile = TileId::new(lod, x, y);
                    assert_eq!(delivery.get(tile), index.get(tile), "{tile}");
                }
            }
        }
        assert_eq!(delivery.range_at(4), Some(TileRange::new(9, 3, 12, 5)));
        assert_eq!(delivery.range_at(3), None);
    }

    #[test]
    fn test_metatile_flags() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("delivery.index");
        DeliveryIndex::write(&sample_index(), &path).unwrap();
        let delivery = DeliveryIndex::open(&path).unwrap();

        let flags = delivery.metatile(TileId::new(4, 8, 0), 2).unwrap();
        assert_eq!(flags.len(), 16);
        // tile 9-3 sits at column 1, row 3 of the block
        assert_eq!(flags[3 * 4 + 1], 1);
        assert_eq!(flags.iter().filter(|f| **f == 1).count(), 1);

        assert!(delivery
            .metatile(TileId::new(4, 9, 0), 2)
            .unwrap_err()
            .is_not_found());
        assert!(delivery
            .metatile(TileId::new(4, 0, 8), 2)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("delivery.index");

        std::fs::write(&path, b"not an index at all").unwrap();
        assert!(DeliveryIndex::open(&path).unwrap_err().is_internal());

        let mut truncated = DeliveryIndex::encode(&sample_index());
        truncated.truncate(truncated.len() - 1);
        std::fs::write(&path, truncated).unwrap();
        assert!(DeliveryIndex::open(&path).unwrap_err().is_internal());

        assert!(DeliveryIndex::open(&dir.path().join("missing"))
            .unwrap_err()
            .is_not_found());
    }
}
