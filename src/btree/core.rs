use std::sync::Arc;
use tracing::{debug, trace};

use crate::block_cache::{BlockCache, BlockNum};
use crate::btree::node::*;
use crate::btree::{BTreeError, BTreeIndex, Result};

//-------------------------------------------------------------------------

impl BTreeIndex {
    /// The index is unusable until `attach` has been called.
    pub fn new(cache: Arc<BlockCache>, key_size: u32, value_size: u32) -> Self {
        let block_size = cache.block_size() as u32;
        let superblock = BTreeNode::new(NodeType::Superblock, key_size, value_size, block_size);

        Self {
            cache,
            superblock,
            superblock_index: 0,
        }
    }

    pub fn key_size(&self) -> u32 {
        self.superblock.header.key_size
    }

    pub fn value_size(&self) -> u32 {
        self.superblock.header.value_size
    }

    pub fn root_node(&self) -> BlockNum {
        self.superblock.header.root_node
    }

    /// Mount the tree.  With `create` set the backing store is formatted
    /// first: superblock at block 0, an empty root at block 1, and every
    /// remaining block chained onto the free list in ascending order.
    pub fn attach(&mut self, initblock: BlockNum, create: bool) -> Result<()> {
        assert_eq!(initblock, 0);
        self.superblock_index = initblock;

        if create {
            self.format_(initblock)?;
        }

        // Mounting is now simply a matter of reading the superblock.
        let sb = BTreeNode::unserialize(&self.cache, initblock)?;
        if sb.header.node_type != NodeType::Superblock {
            return Err(BTreeError::BadNodeType);
        }
        self.superblock = sb;

        debug!(root = self.superblock.header.root_node, "attached tree");
        Ok(())
    }

    fn format_(&mut self, initblock: BlockNum) -> Result<()> {
        let nr_blocks = self.cache.nr_blocks();
        assert!(nr_blocks > initblock + 1);

        let key_size = self.superblock.header.key_size;
        let value_size = self.superblock.header.value_size;
        let block_size = self.cache.block_size() as u32;

        debug!(nr_blocks, key_size, value_size, "formatting backing store");

        let mut sb = BTreeNode::new(NodeType::Superblock, key_size, value_size, block_size);
        sb.header.root_node = initblock + 1;
        sb.header.free_list = if nr_blocks > initblock + 2 {
            initblock + 2
        } else {
            0
        };
        self.cache.notify_allocate(initblock);
        sb.serialize(&self.cache, initblock)?;

        let root = BTreeNode::new(NodeType::Root, key_size, value_size, block_size);
        self.cache.notify_allocate(initblock + 1);
        root.serialize(&self.cache, initblock + 1)?;

        for i in (initblock + 2)..nr_blocks {
            let mut free = BTreeNode::new(NodeType::Unallocated, key_size, value_size, block_size);
            free.header.free_list = if i + 1 == nr_blocks { 0 } else { i + 1 };
            free.serialize(&self.cache, i)?;
        }

        Ok(())
    }

    /// Flush the superblock, then everything else the cache still holds.
    pub fn detach(&mut self) -> Result<()> {
        self.superblock.serialize(&self.cache, self.superblock_index)?;
        self.cache.flush()?;
        Ok(())
    }

    /// Deletion is not implemented.
    pub fn delete(&mut self, _key: &Key) -> Result<()> {
        Err(BTreeError::Unimplemented)
    }

    //-------------------------------

    /// Pop the head of the free chain.  The superblock is rewritten so the
    /// chain is consistent on disk before the block is handed out.
    pub(crate) fn allocate_node(&mut self) -> Result<BlockNum> {
        let n = self.superblock.header.free_list;
        if n == 0 {
            return Err(BTreeError::NoSpace);
        }

        // Don't follow a malformed chain.
        if n >= self.cache.nr_blocks() {
            return Err(BTreeError::Insane);
        }

        let node = BTreeNode::unserialize(&self.cache, n)?;
        if node.header.node_type != NodeType::Unallocated {
            return Err(BTreeError::Insane);
        }

        self.superblock.header.free_list = node.header.free_list;
        self.superblock.serialize(&self.cache, self.superblock_index)?;
        self.cache.notify_allocate(n);

        trace!(loc = n, "allocated node");
        Ok(n)
    }

    /// Push block `n` back onto the head of the free chain.
    pub(crate) fn deallocate_node(&mut self, n: BlockNum) -> Result<()> {
        let mut node = BTreeNode::unserialize(&self.cache, n)?;
        if node.header.node_type == NodeType::Unallocated {
            return Err(BTreeError::Insane);
        }

        node.header.node_type = NodeType::Unallocated;
        node.header.free_list = self.superblock.header.free_list;
        node.serialize(&self.cache, n)?;

        self.superblock.header.free_list = n;
        self.superblock.serialize(&self.cache, self.superblock_index)?;
        self.cache.notify_deallocate(n);

        trace!(loc = n, "deallocated node");
        Ok(())
    }

    /// A blank node sharing the tree's geometry, ready to serialize into a
    /// freshly allocated block.
    pub(crate) fn fresh_node(&self, node_type: NodeType) -> BTreeNode {
        BTreeNode::new(
            node_type,
            self.superblock.header.key_size,
            self.superblock.header.value_size,
            self.superblock.header.block_size,
        )
    }

    // Mixed-width keys or values are a caller bug; all comparisons assume
    // equal widths.
    pub(crate) fn check_key_width(&self, key: &Key) {
        assert_eq!(key.len() as u32, self.key_size());
    }

    pub(crate) fn check_value_width(&self, value: &Value) {
        assert_eq!(value.len() as u32, self.value_size());
    }
}

//-------------------------------------------------------------------------
