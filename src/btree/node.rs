use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::io::{self, Cursor, Write};

use crate::block::Block;
use crate::block_cache::{BlockCache, BlockNum};
use crate::btree::{BTreeError, Result};

//-------------------------------------------------------------------------

/// Keys and values are short byte blocks of the widths fixed at tree
/// creation.  Ordering is lexicographic on the bytes.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct Key(Block);

impl Key {
    pub fn new(bytes: &[u8]) -> Self {
        Key(Block::from_bytes(bytes))
    }

    pub fn zeroed(len: usize) -> Self {
        Key(Block::zeroed(len))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct Value(Block);

impl Value {
    pub fn new(bytes: &[u8]) -> Self {
        Value(Block::from_bytes(bytes))
    }

    pub fn zeroed(len: usize) -> Self {
        Value(Block::zeroed(len))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

//-------------------------------------------------------------------------

pub const NODE_HEADER_SIZE: usize = 32;
pub const PTR_SIZE: usize = std::mem::size_of::<BlockNum>();

#[derive(Copy, Clone, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum NodeType {
    Unallocated = 0,
    Superblock = 1,
    Root = 2,
    Interior = 3,
    Leaf = 4,
}

/// The metadata at the start of every block.  `root_node` is only
/// meaningful in the superblock, `free_list` in the superblock and in
/// unallocated blocks.
#[derive(Copy, Clone, Debug)]
pub struct NodeHeader {
    pub node_type: NodeType,
    pub key_size: u32,
    pub value_size: u32,
    pub block_size: u32,
    pub root_node: BlockNum,
    pub free_list: BlockNum,
    pub nr_keys: u32,
}

pub fn write_node_header<W: Write>(w: &mut W, hdr: &NodeHeader) -> io::Result<()> {
    w.write_u32::<LittleEndian>(hdr.node_type.into())?;
    w.write_u32::<LittleEndian>(hdr.key_size)?;
    w.write_u32::<LittleEndian>(hdr.value_size)?;
    w.write_u32::<LittleEndian>(hdr.block_size)?;
    w.write_u32::<LittleEndian>(hdr.root_node)?;
    w.write_u32::<LittleEndian>(hdr.free_list)?;
    w.write_u32::<LittleEndian>(hdr.nr_keys)?;

    // Pad out to NODE_HEADER_SIZE
    w.write_u32::<LittleEndian>(0)?;

    Ok(())
}

pub fn read_node_header(data: &[u8]) -> Result<NodeHeader> {
    let mut r = data;

    let node_type = r.read_u32::<LittleEndian>()?;
    let node_type = NodeType::try_from(node_type).map_err(|_| BTreeError::BadNodeType)?;
    let key_size = r.read_u32::<LittleEndian>()?;
    let value_size = r.read_u32::<LittleEndian>()?;
    let block_size = r.read_u32::<LittleEndian>()?;
    let root_node = r.read_u32::<LittleEndian>()?;
    let free_list = r.read_u32::<LittleEndian>()?;
    let nr_keys = r.read_u32::<LittleEndian>()?;

    Ok(NodeHeader {
        node_type,
        key_size,
        value_size,
        block_size,
        root_node,
        free_list,
        nr_keys,
    })
}

//-------------------------------------------------------------------------

// Interior node payload:
//
//   PTR KEY PTR KEY PTR KEY PTR
//
// Leaf payload:
//
//   PTR KEY VALUE KEY VALUE KEY VALUE
//
// The leading leaf pointer is reserved and never consumed.

/// A block interpreted as a tree node.  The payload buffer is exclusively
/// owned; nodes copy in and out of the cache rather than aliasing it.
pub struct BTreeNode {
    pub header: NodeHeader,
    data: Vec<u8>,
}

impl BTreeNode {
    pub fn new(node_type: NodeType, key_size: u32, value_size: u32, block_size: u32) -> Self {
        assert!(block_size as usize > NODE_HEADER_SIZE + PTR_SIZE);

        let header = NodeHeader {
            node_type,
            key_size,
            value_size,
            block_size,
            root_node: 0,
            free_list: 0,
            nr_keys: 0,
        };

        let data = if Self::has_payload_(node_type) {
            vec![0; block_size as usize - NODE_HEADER_SIZE]
        } else {
            Vec::new()
        };

        Self { header, data }
    }

    fn has_payload_(node_type: NodeType) -> bool {
        !matches!(node_type, NodeType::Unallocated | NodeType::Superblock)
    }

    pub fn nr_data_bytes(&self) -> usize {
        self.header.block_size as usize - NODE_HEADER_SIZE
    }

    pub fn nr_slots_as_interior(&self) -> usize {
        (self.nr_data_bytes() - PTR_SIZE) / (self.header.key_size as usize + PTR_SIZE)
    }

    pub fn nr_slots_as_leaf(&self) -> usize {
        (self.nr_data_bytes() - PTR_SIZE)
            / (self.header.key_size as usize + self.header.value_size as usize)
    }

    /// Emit the node as exactly one block: header first, then payload.
    /// Unallocated blocks and the superblock carry the header only.
    pub fn serialize(&self, cache: &BlockCache, loc: BlockNum) -> Result<()> {
        assert_eq!(self.header.block_size as usize, cache.block_size());

        let mut block = Block::zeroed(cache.block_size());
        let mut w = Cursor::new(block.as_bytes_mut());
        write_node_header(&mut w, &self.header)?;

        if Self::has_payload_(self.header.node_type) {
            block.as_bytes_mut()[NODE_HEADER_SIZE..].copy_from_slice(&self.data);
        }

        cache.write_block(loc, &block)?;
        Ok(())
    }

    /// Read block `loc` and interpret it as a node, copying the payload
    /// into owned storage.
    pub fn unserialize(cache: &BlockCache, loc: BlockNum) -> Result<Self> {
        let mut block = Block::zeroed(0);
        cache.read_block(loc, &mut block)?;

        let header = read_node_header(block.as_bytes())?;
        if header.block_size as usize != cache.block_size() {
            return Err(BTreeError::Insane);
        }

        let data = if Self::has_payload_(header.node_type) {
            block.as_bytes()[NODE_HEADER_SIZE..].to_vec()
        } else {
            Vec::new()
        };

        Ok(Self { header, data })
    }

    //-------------------------------

    // The resolvers compute the byte offset of the ith element within the
    // payload, checked against the node type and the live key count.

    fn key_offset_(&self, offset: usize) -> Result<usize> {
        use NodeType::*;

        let ks = self.header.key_size as usize;
        match self.header.node_type {
            Interior | Root => {
                if offset >= self.header.nr_keys as usize {
                    return Err(BTreeError::NoMem);
                }
                Ok(PTR_SIZE + offset * (PTR_SIZE + ks))
            }
            Leaf => {
                if offset >= self.header.nr_keys as usize {
                    return Err(BTreeError::NoMem);
                }
                Ok(PTR_SIZE + offset * (ks + self.header.value_size as usize))
            }
            _ => Err(BTreeError::NoMem),
        }
    }

    fn ptr_offset_(&self, offset: usize) -> Result<usize> {
        use NodeType::*;

        match self.header.node_type {
            Interior | Root => {
                if offset > self.header.nr_keys as usize {
                    return Err(BTreeError::NoMem);
                }
                Ok(offset * (PTR_SIZE + self.header.key_size as usize))
            }
            Leaf => {
                // Only the reserved leading pointer exists.
                if offset != 0 {
                    return Err(BTreeError::NoMem);
                }
                Ok(0)
            }
            _ => Err(BTreeError::NoMem),
        }
    }

    fn val_offset_(&self, offset: usize) -> Result<usize> {
        use NodeType::*;

        match self.header.node_type {
            Leaf => {
                if offset >= self.header.nr_keys as usize {
                    return Err(BTreeError::NoMem);
                }
                let ks = self.header.key_size as usize;
                let vs = self.header.value_size as usize;
                Ok(PTR_SIZE + offset * (ks + vs) + ks)
            }
            _ => Err(BTreeError::NoMem),
        }
    }

    //-------------------------------

    pub fn get_key(&self, offset: usize) -> Result<Key> {
        let off = self.key_offset_(offset)?;
        let ks = self.header.key_size as usize;
        Ok(Key::new(&self.data[off..off + ks]))
    }

    pub fn set_key(&mut self, offset: usize, k: &Key) -> Result<()> {
        let off = self.key_offset_(offset)?;
        let ks = self.header.key_size as usize;
        assert_eq!(k.len(), ks);
        self.data[off..off + ks].copy_from_slice(k.as_bytes());
        Ok(())
    }

    pub fn get_ptr(&self, offset: usize) -> Result<BlockNum> {
        let off = self.ptr_offset_(offset)?;
        let mut r = &self.data[off..];
        Ok(r.read_u32::<LittleEndian>()?)
    }

    pub fn set_ptr(&mut self, offset: usize, ptr: BlockNum) -> Result<()> {
        let off = self.ptr_offset_(offset)?;
        let mut w = &mut self.data[off..];
        w.write_u32::<LittleEndian>(ptr)?;
        Ok(())
    }

    pub fn get_val(&self, offset: usize) -> Result<Value> {
        let off = self.val_offset_(offset)?;
        let vs = self.header.value_size as usize;
        Ok(Value::new(&self.data[off..off + vs]))
    }

    pub fn set_val(&mut self, offset: usize, v: &Value) -> Result<()> {
        let off = self.val_offset_(offset)?;
        let vs = self.header.value_size as usize;
        assert_eq!(v.len(), vs);
        self.data[off..off + vs].copy_from_slice(v.as_bytes());
        Ok(())
    }
}

//-------------------------------------------------------------------------


//-------------------------------------------------------------------------
