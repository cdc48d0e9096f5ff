use fixedbitset::FixedBitSet;

use crate::block_cache::BlockNum;
use crate::btree::node::*;
use crate::btree::{BTreeError, BTreeIndex, Result};

//-------------------------------------------------------------------------

impl BTreeIndex {
    /// Verify the structural invariants: the graph under the root is a
    /// tree, no node has overrun its capacity, the free chain is sound,
    /// and together they account for every block exactly once.
    pub fn sanity_check(&self) -> Result<()> {
        let nr_blocks = self.cache.nr_blocks() as usize;
        let mut seen = FixedBitSet::with_capacity(nr_blocks);
        seen.insert(self.superblock_index as usize);

        self.check_node_(self.superblock.header.root_node, true, &mut seen)?;
        self.check_free_chain_(&mut seen)?;

        // Nothing may be missing from both the tree and the free chain.
        if seen.count_ones(..) != nr_blocks {
            return Err(BTreeError::Insane);
        }

        Ok(())
    }

    fn check_node_(&self, loc: BlockNum, is_root: bool, seen: &mut FixedBitSet) -> Result<()> {
        use NodeType::*;

        if loc as usize >= seen.len() || seen.contains(loc as usize) {
            // Out of range, a cycle, or a shared subtree.
            return Err(BTreeError::Insane);
        }
        seen.insert(loc as usize);

        let node = BTreeNode::unserialize(&self.cache, loc)?;

        match node.header.node_type {
            Root | Interior => {
                if is_root != (node.header.node_type == Root) {
                    return Err(BTreeError::Insane);
                }

                if node.header.nr_keys as usize >= node.nr_slots_as_interior() {
                    return Err(BTreeError::Insane);
                }

                let nr_keys = node.header.nr_keys as usize;
                if nr_keys > 0 {
                    for offset in 0..=nr_keys {
                        self.check_node_(node.get_ptr(offset)?, false, seen)?;
                    }
                }
                Ok(())
            }
            Leaf => {
                if is_root {
                    return Err(BTreeError::Insane);
                }
                if node.header.nr_keys as usize >= node.nr_slots_as_leaf() {
                    return Err(BTreeError::Insane);
                }
                Ok(())
            }
            _ => Err(BTreeError::Insane),
        }
    }

    /// Walk the free chain.  The iteration count is bounded by the store
    /// size, so a chain that links back on itself cannot loop forever.
    fn check_free_chain_(&self, seen: &mut FixedBitSet) -> Result<()> {
        let mut loc = self.superblock.header.free_list;
        let mut steps = 0;

        while loc != 0 {
            steps += 1;
            if steps > seen.len() {
                return Err(BTreeError::Insane);
            }

            if loc as usize >= seen.len() || seen.contains(loc as usize) {
                return Err(BTreeError::Insane);
            }
            seen.insert(loc as usize);

            let node = BTreeNode::unserialize(&self.cache, loc)?;
            if node.header.node_type != NodeType::Unallocated {
                return Err(BTreeError::Insane);
            }

            loc = node.header.free_list;
        }

        Ok(())
    }
}

//-------------------------------------------------------------------------
