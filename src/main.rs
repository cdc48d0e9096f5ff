use anyhow::Result;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use block_btree::block_cache::*;
use block_btree::btree::*;

//-------------------------------------------------------------------------

fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::TRACE)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    const BLOCK_SIZE: usize = 4096;
    const NR_BLOCKS: BlockNum = 1024;

    let disk: Arc<dyn Disk> = Arc::new(CoreDisk::new(BLOCK_SIZE, NR_BLOCKS));
    let cache = Arc::new(BlockCache::new(disk, 16)?);

    let mut tree = BTreeIndex::new(cache.clone(), 16, 16);
    tree.attach(0, true)?;
    info!("created empty tree");

    for n in 0..100u32 {
        let key = Key::new(format!("key{:013}", n).as_bytes());
        let value = Value::new(format!("val{:013}", n).as_bytes());
        tree.insert(&key, &value)?;
    }

    let v = tree.lookup(&Key::new(b"key0000000000042"))?;
    info!(value = ?std::str::from_utf8(v.as_bytes()), "looked up key 42");

    tree.sanity_check()?;
    tree.detach()?;

    let stats = cache.stats();
    info!(
        reads = stats.reads,
        writes = stats.writes,
        disk_reads = stats.disk_reads,
        disk_writes = stats.disk_writes,
        "detached"
    );

    Ok(())
}

//-------------------------------------------------------------------------
