use crate::block_cache::BlockNum;
use crate::btree::node::*;
use crate::btree::{BTreeError, BTreeIndex, Result};

//-------------------------------------------------------------------------

impl BTreeIndex {
    /// Point lookup; returns the stored value for `key`.
    pub fn lookup(&self, key: &Key) -> Result<Value> {
        self.check_key_width(key);

        let (_, leaf, offset) = self.find_leaf_(self.superblock.header.root_node, key)?;
        leaf.get_val(offset)
    }

    /// Overwrite the value of an existing key in place.
    pub fn update(&mut self, key: &Key, value: &Value) -> Result<()> {
        self.check_key_width(key);
        self.check_value_width(value);

        let (loc, mut leaf, offset) = self.find_leaf_(self.superblock.header.root_node, key)?;
        leaf.set_val(offset, value)?;
        leaf.serialize(&self.cache, loc)
    }

    /// Descend to the leaf entry holding `key`.  At each interior node the
    /// first key greater than the probe selects its left pointer; if none
    /// is greater we take the rightmost child.
    fn find_leaf_(&self, loc: BlockNum, key: &Key) -> Result<(BlockNum, BTreeNode, usize)> {
        use NodeType::*;

        let node = BTreeNode::unserialize(&self.cache, loc)?;

        match node.header.node_type {
            Root | Interior => {
                let nr_keys = node.header.nr_keys as usize;

                for offset in 0..nr_keys {
                    if *key < node.get_key(offset)? {
                        return self.find_leaf_(node.get_ptr(offset)?, key);
                    }
                }

                if nr_keys > 0 {
                    self.find_leaf_(node.get_ptr(nr_keys)?, key)
                } else {
                    // No keys at all on this node, so nowhere to go.
                    Err(BTreeError::NonExistent)
                }
            }
            Leaf => {
                for offset in 0..node.header.nr_keys as usize {
                    if node.get_key(offset)? == *key {
                        return Ok((loc, node, offset));
                    }
                }
                Err(BTreeError::NonExistent)
            }
            _ => Err(BTreeError::Insane),
        }
    }
}

//-------------------------------------------------------------------------
