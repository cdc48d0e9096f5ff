use tracing::{debug, trace};

use crate::block_cache::BlockNum;
use crate::btree::node::*;
use crate::btree::{BTreeError, BTreeIndex, Result};

//-------------------------------------------------------------------------

impl BTreeIndex {
    /// Add a new pair; fails with Conflict if the key is already present.
    /// Splitting is lazy: a node is only split once an insertion has
    /// filled it completely.
    pub fn insert(&mut self, key: &Key, value: &Value) -> Result<()> {
        self.check_key_width(key);
        self.check_value_width(value);

        // The path of visited blocks, deepest last, for walking back up
        // when splits propagate.
        let mut path = Vec::new();
        let root = self.superblock.header.root_node;
        self.insert_at_(&mut path, root, key, value)
    }

    fn insert_at_(
        &mut self,
        path: &mut Vec<BlockNum>,
        loc: BlockNum,
        key: &Key,
        value: &Value,
    ) -> Result<()> {
        use NodeType::*;

        path.push(loc);

        let node = BTreeNode::unserialize(&self.cache, loc)?;
        match node.header.node_type {
            Root if node.header.nr_keys == 0 => self.first_insert_(loc, node, key, value),
            Root | Interior => {
                let nr_keys = node.header.nr_keys as usize;

                for offset in 0..nr_keys {
                    if *key < node.get_key(offset)? {
                        return self.insert_at_(path, node.get_ptr(offset)?, key, value);
                    }
                }

                if nr_keys > 0 {
                    self.insert_at_(path, node.get_ptr(nr_keys)?, key, value)
                } else {
                    Err(BTreeError::NonExistent)
                }
            }
            Leaf => self.leaf_insert_(path, loc, node, key, value),
            _ => Err(BTreeError::Insane),
        }
    }

    /// The very first insertion.  The empty root gains one separator and
    /// two fresh leaves: an empty one on the left, the new pair on the
    /// right (keys equal to the separator descend rightwards).
    fn first_insert_(
        &mut self,
        root_loc: BlockNum,
        mut root: BTreeNode,
        key: &Key,
        value: &Value,
    ) -> Result<()> {
        debug!("first insert; growing leaves under the empty root");

        let left_loc = self.allocate_node()?;
        let left = self.fresh_node(NodeType::Leaf);
        left.serialize(&self.cache, left_loc)?;

        let right_loc = self.allocate_node()?;
        let mut right = self.fresh_node(NodeType::Leaf);
        right.header.nr_keys = 1;
        right.set_key(0, key)?;
        right.set_val(0, value)?;
        right.serialize(&self.cache, right_loc)?;

        root.header.nr_keys = 1;
        root.set_key(0, key)?;
        root.set_ptr(0, left_loc)?;
        root.set_ptr(1, right_loc)?;
        root.serialize(&self.cache, root_loc)
    }

    fn leaf_insert_(
        &mut self,
        path: &mut Vec<BlockNum>,
        loc: BlockNum,
        mut node: BTreeNode,
        key: &Key,
        value: &Value,
    ) -> Result<()> {
        if node.header.node_type != NodeType::Leaf {
            return Err(BTreeError::BadNodeType);
        }

        // Find the insertion offset; the first existing key greater than
        // ours, or the end.
        let nr_keys = node.header.nr_keys as usize;
        let mut offset = nr_keys;
        for i in 0..nr_keys {
            let k = node.get_key(i)?;
            if *key == k {
                return Err(BTreeError::Conflict);
            }
            if *key < k {
                offset = i;
                break;
            }
        }

        // Shift the tail one slot right and drop the pair in.
        node.header.nr_keys += 1;
        let mut i = nr_keys;
        while i > offset {
            let k = node.get_key(i - 1)?;
            node.set_key(i, &k)?;
            let v = node.get_val(i - 1)?;
            node.set_val(i, &v)?;
            i -= 1;
        }
        node.set_key(offset, key)?;
        node.set_val(offset, value)?;

        node.serialize(&self.cache, loc)?;

        if node.header.nr_keys as usize >= node.nr_slots_as_leaf() {
            self.split_(path)?;
        }

        Ok(())
    }

    //-------------------------------

    /// Split the node at the tail of the path, which has just been filled.
    fn split_(&mut self, path: &mut Vec<BlockNum>) -> Result<()> {
        use NodeType::*;

        let orig_loc = path.pop().ok_or(BTreeError::Insane)?;
        let orig = BTreeNode::unserialize(&self.cache, orig_loc)?;

        match orig.header.node_type {
            Root | Interior => self.split_interior_(path, orig_loc, orig),
            Leaf => self.split_leaf_(path, orig_loc, orig),
            _ => Err(BTreeError::Insane),
        }
    }

    /// Move the upper half of the entries to a new right sibling.  The
    /// separator lifted into the parent is the sibling's first key, which
    /// stays in place.
    fn split_leaf_(
        &mut self,
        path: &mut Vec<BlockNum>,
        orig_loc: BlockNum,
        mut orig: BTreeNode,
    ) -> Result<()> {
        let nr_keys = orig.header.nr_keys as usize;
        if nr_keys < orig.nr_slots_as_leaf() {
            return Err(BTreeError::Insane);
        }

        let blk2 = nr_keys / 2;
        let blk1 = nr_keys - blk2;

        let new_loc = self.allocate_node()?;
        let mut new_node = self.fresh_node(NodeType::Leaf);
        new_node.header.nr_keys = blk2 as u32;

        trace!(loc = orig_loc, new_loc, "splitting leaf");

        let zero_key = Key::zeroed(self.key_size() as usize);
        let zero_val = Value::zeroed(self.value_size() as usize);

        for i in blk1..nr_keys {
            let k = orig.get_key(i)?;
            new_node.set_key(i - blk1, &k)?;
            orig.set_key(i, &zero_key)?;

            let v = orig.get_val(i)?;
            new_node.set_val(i - blk1, &v)?;
            orig.set_val(i, &zero_val)?;
        }
        orig.header.nr_keys = blk1 as u32;

        orig.serialize(&self.cache, orig_loc)?;
        new_node.serialize(&self.cache, new_loc)?;

        let separator = new_node.get_key(0)?;
        self.interior_insert_(path, &separator, new_loc)
    }

    /// Split an interior node (or the root).  The middle key is promoted
    /// to the parent and occupies a slot in neither child; the two
    /// children together keep the original pointer set.
    fn split_interior_(
        &mut self,
        path: &mut Vec<BlockNum>,
        orig_loc: BlockNum,
        mut orig: BTreeNode,
    ) -> Result<()> {
        let nr_keys = orig.header.nr_keys as usize;
        if nr_keys < orig.nr_slots_as_interior() {
            return Err(BTreeError::Insane);
        }

        let blk1 = nr_keys / 2;
        let blk2 = nr_keys - blk1 - 1;

        // Capture the separator before its slot is zeroed.
        let separator = orig.get_key(blk1)?;

        let new_loc = self.allocate_node()?;
        let mut new_node = self.fresh_node(NodeType::Interior);
        new_node.header.nr_keys = blk2 as u32;

        trace!(loc = orig_loc, new_loc, "splitting interior node");

        let zero_key = Key::zeroed(self.key_size() as usize);

        for i in (blk1 + 1)..nr_keys {
            let k = orig.get_key(i)?;
            new_node.set_key(i - (blk1 + 1), &k)?;
            orig.set_key(i, &zero_key)?;

            let p = orig.get_ptr(i)?;
            new_node.set_ptr(i - (blk1 + 1), p)?;
            orig.set_ptr(i, 0)?;
        }
        orig.set_key(blk1, &zero_key)?;

        let last = orig.get_ptr(nr_keys)?;
        new_node.set_ptr(blk2, last)?;
        orig.set_ptr(nr_keys, 0)?;

        orig.header.nr_keys = blk1 as u32;

        if orig.header.node_type == NodeType::Interior {
            orig.serialize(&self.cache, orig_loc)?;
            new_node.serialize(&self.cache, new_loc)?;
            self.interior_insert_(path, &separator, new_loc)
        } else {
            // Splitting the root: demote it to an interior node and grow a
            // fresh root above the pair.  This is the only way the tree
            // gains height.
            orig.header.node_type = NodeType::Interior;

            let new_root_loc = self.allocate_node()?;
            let mut new_root = self.fresh_node(NodeType::Root);
            new_root.header.nr_keys = 1;

            debug!(
                old_root = orig_loc,
                new_root = new_root_loc,
                "splitting root; tree grows taller"
            );

            self.superblock.header.root_node = new_root_loc;

            orig.serialize(&self.cache, orig_loc)?;
            new_node.serialize(&self.cache, new_loc)?;

            new_root.set_key(0, &separator)?;
            new_root.set_ptr(0, orig_loc)?;
            new_root.set_ptr(1, new_loc)?;
            new_root.serialize(&self.cache, new_root_loc)?;

            // Keep the on-disk root pointer current.
            self.superblock.serialize(&self.cache, self.superblock_index)
        }
    }

    /// Insert a separator and its right-hand child pointer into the parent
    /// at the tail of the path, splitting again if the parent fills.
    fn interior_insert_(
        &mut self,
        path: &mut Vec<BlockNum>,
        key: &Key,
        ptr: BlockNum,
    ) -> Result<()> {
        use NodeType::*;

        let loc = *path.last().ok_or(BTreeError::Insane)?;
        let mut node = BTreeNode::unserialize(&self.cache, loc)?;

        if node.header.node_type != Interior && node.header.node_type != Root {
            return Err(BTreeError::BadNodeType);
        }
        if node.header.nr_keys == 0 {
            return Err(BTreeError::Insane);
        }

        let nr_keys = node.header.nr_keys as usize;
        let mut offset = nr_keys;
        for i in 0..nr_keys {
            let k = node.get_key(i)?;
            if *key == k {
                // A separator can't already be present in a sound tree.
                return Err(BTreeError::Conflict);
            }
            if *key < k {
                offset = i;
                break;
            }
        }

        // Keys shift one slot right, the pointers to their right shift
        // with them.
        node.header.nr_keys += 1;
        let mut i = nr_keys;
        while i > offset {
            let k = node.get_key(i - 1)?;
            node.set_key(i, &k)?;
            let p = node.get_ptr(i)?;
            node.set_ptr(i + 1, p)?;
            i -= 1;
        }
        node.set_key(offset, key)?;
        node.set_ptr(offset + 1, ptr)?;

        node.serialize(&self.cache, loc)?;

        if node.header.nr_keys as usize >= node.nr_slots_as_interior() {
            self.split_(path)?;
        }

        Ok(())
    }
}

//-------------------------------------------------------------------------
