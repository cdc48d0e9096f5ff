use std::result;
use std::sync::Arc;
use thiserror::Error;

use crate::block_cache::{BlockCache, BlockNum};
use crate::btree::node::BTreeNode;

//-------------------------------------------------------------------------

/// Everything that can go wrong at the index boundary.
#[derive(Error, Debug)]
pub enum BTreeError {
    #[error("allocation failed or offset out of range")]
    NoMem,

    #[error("free list exhausted")]
    NoSpace,

    #[error("key does not exist")]
    NonExistent,

    #[error("key already exists")]
    Conflict,

    #[error("unexpected node type")]
    BadNodeType,

    #[error("operation not implemented")]
    Unimplemented,

    #[error("tree structure corrupt")]
    Insane,

    #[error("io error {0:?}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = result::Result<T, BTreeError>;

//-------------------------------------------------------------------------

/// A disk-resident B-Tree mapping fixed-width byte-string keys to
/// fixed-width byte-string values.  All node I/O goes through the block
/// cache in whole-block reads and writes.
pub struct BTreeIndex {
    cache: Arc<BlockCache>,
    superblock: BTreeNode,
    superblock_index: BlockNum,
}

mod check;
mod core;
mod insert;
mod lookup;
pub mod node;
mod tests;

pub use crate::btree::node::{Key, NodeType, Value};

//-------------------------------------------------------------------------
