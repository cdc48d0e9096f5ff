use linked_hash_map::*;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Result};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::trace;

use crate::block::Block;

//-------------------------------------------------------------------------

pub type BlockNum = u32;

fn fail_(msg: String) -> Result<()> {
    Err(io::Error::new(io::ErrorKind::Other, msg))
}

//-------------------------------------------------------------------------

/// The backing device: a fixed number of equal-sized blocks.
pub trait Disk: Send + Sync {
    fn block_size(&self) -> usize;
    fn nr_blocks(&self) -> BlockNum;
    fn read(&self, loc: BlockNum, buf: &mut [u8]) -> Result<()>;
    fn write(&self, loc: BlockNum, buf: &[u8]) -> Result<()>;
}

//-------------------------------------------------------------------------

/// In-memory disk for tests and demos.
pub struct CoreDisk {
    block_size: usize,
    blocks: Mutex<Vec<Vec<u8>>>,
}

impl CoreDisk {
    pub fn new(block_size: usize, nr_blocks: BlockNum) -> Self {
        Self {
            block_size,
            blocks: Mutex::new(vec![vec![0; block_size]; nr_blocks as usize]),
        }
    }
}

impl Disk for CoreDisk {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn nr_blocks(&self) -> BlockNum {
        let blocks = self.blocks.lock().unwrap();
        blocks.len() as BlockNum
    }

    fn read(&self, loc: BlockNum, buf: &mut [u8]) -> Result<()> {
        let blocks = self.blocks.lock().unwrap();
        match blocks.get(loc as usize) {
            Some(b) => {
                buf.copy_from_slice(b);
                Ok(())
            }
            None => fail_(format!("read of out of range block {}", loc)),
        }
    }

    fn write(&self, loc: BlockNum, buf: &[u8]) -> Result<()> {
        let mut blocks = self.blocks.lock().unwrap();
        match blocks.get_mut(loc as usize) {
            Some(b) => {
                b.copy_from_slice(buf);
                Ok(())
            }
            None => fail_(format!("write of out of range block {}", loc)),
        }
    }
}

//-------------------------------------------------------------------------

/// A disk backed by a regular file, addressed with positional I/O.
pub struct FileDisk {
    block_size: usize,
    nr_blocks: BlockNum,
    file: File,
}

impl FileDisk {
    /// Create (or truncate) the backing file, sized to hold `nr_blocks`
    /// blocks of `block_size` bytes.
    pub fn create<P: AsRef<Path>>(
        path: P,
        block_size: usize,
        nr_blocks: BlockNum,
    ) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(block_size as u64 * nr_blocks as u64)?;
        Ok(Self {
            block_size,
            nr_blocks,
            file,
        })
    }

    /// Open an existing backing file; the block count comes from its length.
    pub fn open<P: AsRef<Path>>(path: P, block_size: usize) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            block_size,
            nr_blocks: (len / block_size as u64) as BlockNum,
            file,
        })
    }

    fn byte_offset(&self, loc: BlockNum) -> u64 {
        loc as u64 * self.block_size as u64
    }

    fn check_loc(&self, loc: BlockNum) -> Result<()> {
        if loc >= self.nr_blocks {
            fail_(format!("block {} out of range", loc))
        } else {
            Ok(())
        }
    }
}

impl Disk for FileDisk {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn nr_blocks(&self) -> BlockNum {
        self.nr_blocks
    }

    fn read(&self, loc: BlockNum, buf: &mut [u8]) -> Result<()> {
        self.check_loc(loc)?;
        self.file.read_exact_at(buf, self.byte_offset(loc))
    }

    fn write(&self, loc: BlockNum, buf: &[u8]) -> Result<()> {
        self.check_loc(loc)?;
        self.file.write_all_at(buf, self.byte_offset(loc))
    }
}

//-------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default)]
pub struct CacheStats {
    pub reads: u64,
    pub writes: u64,
    pub disk_reads: u64,
    pub disk_writes: u64,
    pub allocs: u64,
    pub deallocs: u64,
}

#[derive(Debug, PartialEq, Eq)]
enum PushResult {
    AlreadyPresent,
    Added,
    AddAndEvict(BlockNum),
}

struct BlockCacheInner {
    block_size: usize,
    nr_blocks: BlockNum,
    capacity: usize,
    disk: Arc<dyn Disk>,
    time: u64,
    stats: CacheStats,

    // The LRU order of the resident frames.
    lru: LinkedHashMap<BlockNum, ()>,
    frames: BTreeMap<BlockNum, Block>,
}

impl BlockCacheInner {
    fn new(disk: Arc<dyn Disk>, capacity: usize) -> Result<Self> {
        assert!(capacity > 0);
        let block_size = disk.block_size();
        let nr_blocks = disk.nr_blocks();
        Ok(Self {
            block_size,
            nr_blocks,
            capacity,
            disk,
            time: 0,
            stats: CacheStats::default(),
            lru: LinkedHashMap::new(),
            frames: BTreeMap::new(),
        })
    }

    fn residency(&self) -> usize {
        self.frames.len()
    }

    fn tick(&mut self) -> u64 {
        self.time += 1;
        self.time
    }

    fn lru_push_(&mut self, loc: BlockNum) -> PushResult {
        use PushResult::*;

        if self.lru.contains_key(&loc) {
            // Refresh its position.
            self.lru.remove(&loc);
            self.lru.insert(loc, ());
            AlreadyPresent
        } else if self.lru.len() < self.capacity {
            self.lru.insert(loc, ());
            Added
        } else {
            let old = self.lru.pop_front().unwrap();
            self.lru.insert(loc, ());
            AddAndEvict(old.0)
        }
    }

    fn writeback_(&mut self, loc: BlockNum, block: &Block) -> Result<()> {
        trace!(loc, "writing back dirty block");
        self.disk.write(loc, block.as_bytes())?;
        self.stats.disk_writes += 1;
        Ok(())
    }

    /// Make `loc` resident, evicting (and writing back) the coldest frame
    /// if the cache is full.
    fn insert_frame_(&mut self, loc: BlockNum, block: Block) -> Result<()> {
        if let PushResult::AddAndEvict(old) = self.lru_push_(loc) {
            let old_block = self.frames.remove(&old).unwrap();
            if old_block.is_dirty() {
                self.writeback_(old, &old_block)?;
            }
        }
        self.frames.insert(loc, block);
        Ok(())
    }

    fn fault_in_(&mut self, loc: BlockNum) -> Result<()> {
        let mut block = Block::zeroed(self.block_size);
        self.disk.read(loc, block.as_bytes_mut())?;
        self.stats.disk_reads += 1;
        self.insert_frame_(loc, block)
    }

    fn read_block(&mut self, loc: BlockNum, block: &mut Block) -> Result<()> {
        self.stats.reads += 1;

        if self.frames.contains_key(&loc) {
            self.lru_push_(loc);
        } else {
            self.fault_in_(loc)?;
        }

        let now = self.tick();
        let frame = self.frames.get_mut(&loc).unwrap();
        frame.touch(now);

        if block.len() != self.block_size {
            block.resize(self.block_size, false);
        }
        block.as_bytes_mut().copy_from_slice(frame.as_bytes());
        Ok(())
    }

    fn write_block(&mut self, loc: BlockNum, block: &Block) -> Result<()> {
        // An under- or over-sized write is a caller bug.
        assert_eq!(block.len(), self.block_size);

        self.stats.writes += 1;

        let now = self.tick();
        let mut frame = block.clone();
        frame.set_dirty();
        frame.touch(now);
        self.insert_frame_(loc, frame)
    }

    /// Writeback all dirty frames.
    fn flush(&mut self) -> Result<()> {
        let dirty: Vec<BlockNum> = self
            .frames
            .iter()
            .filter(|(_, b)| b.is_dirty())
            .map(|(loc, _)| *loc)
            .collect();

        for loc in dirty {
            let block = self.frames.get(&loc).unwrap().clone();
            self.writeback_(loc, &block)?;
            self.frames.get_mut(&loc).unwrap().clear_dirty();
        }

        Ok(())
    }
}

//-------------------------------------------------------------------------

/// A write-back cache of disk blocks with a bounded residency.  All node
/// I/O performed by the tree goes through here.
pub struct BlockCache {
    inner: Mutex<BlockCacheInner>,
}

impl Drop for BlockCache {
    fn drop(&mut self) {
        self.flush().expect("flush failed when dropping block cache");
    }
}

impl BlockCache {
    pub fn new(disk: Arc<dyn Disk>, capacity: usize) -> Result<Self> {
        let inner = BlockCacheInner::new(disk, capacity)?;
        Ok(Self {
            inner: Mutex::new(inner),
        })
    }

    pub fn block_size(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.block_size
    }

    pub fn nr_blocks(&self) -> BlockNum {
        let inner = self.inner.lock().unwrap();
        inner.nr_blocks
    }

    /// Number of frames currently resident.
    pub fn residency(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.residency()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap();
        inner.stats
    }

    /// Read block `loc` into the caller's buffer, sizing it to the block
    /// size.
    pub fn read_block(&self, loc: BlockNum, block: &mut Block) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.read_block(loc, block)
    }

    /// Write exactly one block's worth of bytes to `loc`.
    pub fn write_block(&self, loc: BlockNum, block: &Block) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.write_block(loc, block)
    }

    // The notifications are advisory; they only feed the statistics.
    pub fn notify_allocate(&self, loc: BlockNum) {
        let mut inner = self.inner.lock().unwrap();
        inner.stats.allocs += 1;
        trace!(loc, "block allocated");
    }

    pub fn notify_deallocate(&self, loc: BlockNum) {
        let mut inner = self.inner.lock().unwrap();
        inner.stats.deallocs += 1;
        trace!(loc, "block deallocated");
    }

    /// Writeback all dirty frames.
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.flush()
    }
}

//-------------------------------------------------------------------------


//-------------------------------------------------------------------------
