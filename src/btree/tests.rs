//-------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use anyhow::{bail, ensure, Result};
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    use std::sync::Arc;
    use test_log::test;

    use crate::block_cache::*;
    use crate::btree::node::*;
    use crate::btree::{BTreeError, BTreeIndex};

    const BLOCK_SIZE: usize = 128;
    const KEY_SIZE: u32 = 8;
    const VALUE_SIZE: u32 = 8;

    fn mk_key(n: u32) -> Key {
        Key::new(format!("key{:05}", n).as_bytes())
    }

    fn mk_val(n: u32) -> Value {
        Value::new(format!("val{:05}", n).as_bytes())
    }

    struct Fixture {
        cache: Arc<BlockCache>,
        tree: BTreeIndex,
    }

    impl Fixture {
        fn new(nr_blocks: BlockNum) -> Result<Self> {
            let disk = Arc::new(CoreDisk::new(BLOCK_SIZE, nr_blocks));
            let cache = Arc::new(BlockCache::new(disk, 16)?);
            let mut tree = BTreeIndex::new(cache.clone(), KEY_SIZE, VALUE_SIZE);
            tree.attach(0, true)?;

            Ok(Self { cache, tree })
        }

        fn insert(&mut self, n: u32) -> crate::btree::Result<()> {
            self.tree.insert(&mk_key(n), &mk_val(n))
        }

        fn lookup(&self, n: u32) -> crate::btree::Result<Value> {
            self.tree.lookup(&mk_key(n))
        }
    }

    //-------------------------------

    // Test-side structure walkers.  The sanity check deliberately leaves
    // key ordering to this layer.

    /// Recursively verify that keys are strictly increasing within every
    /// node and that each subtree respects its separator bounds.  Returns
    /// the number of stored pairs.
    fn check_order_(
        tree: &BTreeIndex,
        loc: BlockNum,
        key_min: Option<Key>,
        key_max: Option<Key>,
    ) -> Result<u64> {
        use NodeType::*;

        let node = BTreeNode::unserialize(&tree.cache, loc)?;
        let nr_keys = node.header.nr_keys as usize;

        let mut last: Option<Key> = None;
        for i in 0..nr_keys {
            let k = node.get_key(i)?;
            if let Some(min) = &key_min {
                ensure!(k >= *min);
            }
            if let Some(max) = &key_max {
                ensure!(k < *max);
            }
            if let Some(last) = &last {
                ensure!(*last < k);
            }
            last = Some(k);
        }

        match node.header.node_type {
            Root | Interior => {
                let mut total = 0;
                if nr_keys > 0 {
                    for i in 0..=nr_keys {
                        let lo = if i == 0 {
                            key_min.clone()
                        } else {
                            Some(node.get_key(i - 1)?)
                        };
                        let hi = if i == nr_keys {
                            key_max.clone()
                        } else {
                            Some(node.get_key(i)?)
                        };
                        total += check_order_(tree, node.get_ptr(i)?, lo, hi)?;
                    }
                }
                Ok(total)
            }
            Leaf => Ok(nr_keys as u64),
            _ => bail!("unexpected node type during order check"),
        }
    }

    fn check_order(fix: &Fixture) -> Result<u64> {
        check_order_(&fix.tree, fix.tree.root_node(), None, None)
    }

    /// Number of nodes on the path from the root down to the leftmost
    /// leaf.
    fn tree_height(fix: &Fixture) -> Result<usize> {
        use NodeType::*;

        let mut height = 0;
        let mut loc = fix.tree.root_node();
        loop {
            let node = BTreeNode::unserialize(&fix.tree.cache, loc)?;
            height += 1;
            match node.header.node_type {
                Leaf => return Ok(height),
                Root | Interior => {
                    if node.header.nr_keys == 0 {
                        return Ok(height);
                    }
                    loc = node.get_ptr(0)?;
                }
                _ => bail!("unexpected node type during height walk"),
            }
        }
    }

    fn count_leaves_(tree: &BTreeIndex, loc: BlockNum) -> Result<usize> {
        use NodeType::*;

        let node = BTreeNode::unserialize(&tree.cache, loc)?;
        match node.header.node_type {
            Leaf => Ok(1),
            Root | Interior => {
                let nr_keys = node.header.nr_keys as usize;
                let mut total = 0;
                if nr_keys > 0 {
                    for i in 0..=nr_keys {
                        total += count_leaves_(tree, node.get_ptr(i)?)?;
                    }
                }
                Ok(total)
            }
            _ => bail!("unexpected node type during leaf count"),
        }
    }

    //-------------------------------

    #[test]
    fn fresh_tree_is_sane() -> Result<()> {
        let fix = Fixture::new(32)?;
        fix.tree.sanity_check()?;
        Ok(())
    }

    #[test]
    fn lookup_on_empty_tree_fails() -> Result<()> {
        let fix = Fixture::new(32)?;
        ensure!(matches!(
            fix.tree.lookup(&Key::new(b"a       ")),
            Err(BTreeError::NonExistent)
        ));
        Ok(())
    }

    #[test]
    fn insert_then_lookup() -> Result<()> {
        let mut fix = Fixture::new(32)?;

        fix.insert(1)?;
        fix.insert(2)?;
        fix.insert(3)?;

        ensure!(fix.lookup(2)? == mk_val(2));
        Ok(())
    }

    #[test]
    fn insert_sequence_splits_leaves() -> Result<()> {
        let mut fix = Fixture::new(64)?;

        for n in 1..=20 {
            fix.insert(n)?;
        }

        for n in 1..=20 {
            ensure!(fix.lookup(n)? == mk_val(n));
        }

        // The workload must have outgrown the two bootstrap leaves.
        ensure!(count_leaves_(&fix.tree, fix.tree.root_node())? > 2);

        fix.tree.sanity_check()?;
        ensure!(check_order(&fix)? == 20);

        Ok(())
    }

    #[test]
    fn duplicate_insert_conflicts() -> Result<()> {
        let mut fix = Fixture::new(32)?;

        fix.insert(5)?;
        ensure!(matches!(
            fix.tree.insert(&mk_key(5), &Value::new(b"other!!!")),
            Err(BTreeError::Conflict)
        ));

        // The original value is untouched.
        ensure!(fix.lookup(5)? == mk_val(5));
        Ok(())
    }

    #[test]
    fn insert_many_grows_height() -> Result<()> {
        let mut fix = Fixture::new(64)?;

        for n in 1..=64 {
            fix.insert(n)?;
        }

        // At least one split has propagated through the root.
        ensure!(tree_height(&fix)? >= 3);

        fix.tree.sanity_check()?;
        ensure!(check_order(&fix)? == 64);

        for n in 1..=64 {
            ensure!(fix.lookup(n)? == mk_val(n));
        }

        Ok(())
    }

    #[test]
    fn update_overwrites_in_place() -> Result<()> {
        let mut fix = Fixture::new(64)?;

        for n in 1..=20 {
            fix.insert(n)?;
        }

        let new_val = Value::new(b"NEWVAL10");
        fix.tree.update(&mk_key(10), &new_val)?;
        ensure!(fix.lookup(10)? == new_val);

        // Everything else is untouched.
        ensure!(fix.lookup(9)? == mk_val(9));
        ensure!(fix.lookup(11)? == mk_val(11));

        ensure!(matches!(
            fix.tree.update(&Key::new(b"absentXX"), &new_val),
            Err(BTreeError::NonExistent)
        ));

        Ok(())
    }

    #[test]
    fn update_on_empty_tree_fails() -> Result<()> {
        let mut fix = Fixture::new(32)?;
        ensure!(matches!(
            fix.tree.update(&mk_key(1), &mk_val(1)),
            Err(BTreeError::NonExistent)
        ));
        Ok(())
    }

    #[test]
    fn delete_is_unimplemented() -> Result<()> {
        let mut fix = Fixture::new(32)?;
        fix.insert(1)?;
        ensure!(matches!(
            fix.tree.delete(&mk_key(1)),
            Err(BTreeError::Unimplemented)
        ));
        Ok(())
    }

    #[test]
    fn insert_random_order() -> Result<()> {
        let mut fix = Fixture::new(64)?;

        let mut keys: Vec<u32> = (1..=40).collect();
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        keys.shuffle(&mut rng);

        for n in &keys {
            fix.insert(*n)?;
        }

        fix.tree.sanity_check()?;
        ensure!(check_order(&fix)? == 40);

        for n in 1..=40 {
            ensure!(fix.lookup(n)? == mk_val(n));
        }

        Ok(())
    }

    #[test]
    fn exhausting_free_list_reports_no_space() -> Result<()> {
        let mut fix = Fixture::new(8)?;

        let mut out_of_space = false;
        for n in 1..=30 {
            match fix.insert(n) {
                Ok(()) => {}
                Err(BTreeError::NoSpace) => {
                    out_of_space = true;
                    break;
                }
                Err(e) => bail!("unexpected error {:?}", e),
            }
        }

        ensure!(out_of_space);
        Ok(())
    }

    #[test]
    fn allocate_and_deallocate_round_trip() -> Result<()> {
        let mut fix = Fixture::new(8)?;

        // Drain the free list completely.
        let mut held = Vec::new();
        loop {
            match fix.tree.allocate_node() {
                Ok(n) => held.push(n),
                Err(BTreeError::NoSpace) => break,
                Err(e) => bail!("unexpected error {:?}", e),
            }
        }
        ensure!(held.len() == 6);

        // Give each block a live type, then hand them all back.
        for n in &held {
            let node = fix.tree.fresh_node(NodeType::Leaf);
            node.serialize(&fix.cache, *n)?;
        }
        for n in &held {
            fix.tree.deallocate_node(*n)?;
        }

        fix.tree.sanity_check()?;

        // The free list serves again, most recently freed first.
        ensure!(fix.tree.allocate_node()? == *held.last().unwrap());

        Ok(())
    }

    #[test]
    fn deallocating_a_free_block_is_insane() -> Result<()> {
        let mut fix = Fixture::new(8)?;
        ensure!(matches!(
            fix.tree.deallocate_node(3),
            Err(BTreeError::Insane)
        ));
        Ok(())
    }

    #[test]
    fn detach_then_reattach_persists() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("store");

        {
            let disk = Arc::new(FileDisk::create(&path, BLOCK_SIZE, 32)?);
            let cache = Arc::new(BlockCache::new(disk, 16)?);
            let mut tree = BTreeIndex::new(cache, KEY_SIZE, VALUE_SIZE);
            tree.attach(0, true)?;

            for n in 1..=10 {
                tree.insert(&mk_key(n), &mk_val(n))?;
            }
            tree.detach()?;
        }

        let disk = Arc::new(FileDisk::open(&path, BLOCK_SIZE)?);
        let cache = Arc::new(BlockCache::new(disk, 16)?);
        let mut tree = BTreeIndex::new(cache, KEY_SIZE, VALUE_SIZE);
        tree.attach(0, false)?;

        tree.sanity_check()?;
        for n in 1..=10 {
            ensure!(tree.lookup(&mk_key(n))? == mk_val(n));
        }

        Ok(())
    }

    #[test]
    fn small_cache_still_correct() -> Result<()> {
        // A two-frame cache forces constant eviction under the walk.
        let disk = Arc::new(CoreDisk::new(BLOCK_SIZE, 64));
        let cache = Arc::new(BlockCache::new(disk, 2)?);
        let mut tree = BTreeIndex::new(cache, KEY_SIZE, VALUE_SIZE);
        tree.attach(0, true)?;

        for n in 1..=32 {
            tree.insert(&mk_key(n), &mk_val(n))?;
        }

        tree.sanity_check()?;
        for n in 1..=32 {
            ensure!(tree.lookup(&mk_key(n))? == mk_val(n));
        }

        Ok(())
    }
}

//-------------------------------------------------------------------------
