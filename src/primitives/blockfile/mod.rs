//! Fixed-size checksummed blocks addressed by [`BlockId`].
//!
//! Layout of every block (big-endian):
//!
//! ```text
//! 0      1        2      4      8          16
//! | kind | unused | count | crc32 | block id | body ...
//! ```
//!
//! The CRC covers the whole block with the CRC field zeroed and is seeded with the block id
//! and the file salt. Block 0 is never written; it stands for "no block".

use std::io::ErrorKind;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::primitives::bytes::ord;
use crate::primitives::io::FileIo;
use crate::types::{block_crc32, BlockId, Result, StoreError};

/// Length of the block header in bytes.
pub const BLOCK_HEADER_LEN: usize = 16;
/// Smallest block size accepted by [`BlockFile::new`].
pub const MIN_BLOCK_SIZE: usize = 256;
/// Default block size.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

const KIND: usize = 0;
const COUNT: Range<usize> = 2..4;
const CRC: Range<usize> = 4..8;
const ID: Range<usize> = 8..16;

/// What a block holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockKind {
    /// Sorted keys.
    Leaf,
    /// Separator keys and child ids.
    Internal,
}

impl BlockKind {
    fn to_byte(self) -> u8 {
        match self {
            BlockKind::Leaf => 1,
            BlockKind::Internal => 2,
        }
    }

    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(BlockKind::Leaf),
            2 => Some(BlockKind::Internal),
            _ => None,
        }
    }
}

/// A block as read from disk, checksum already verified.
#[derive(Debug)]
pub struct RawBlock {
    /// Block kind.
    pub kind: BlockKind,
    /// Number of entries recorded in the header.
    pub count: u16,
    /// Bytes following the header.
    pub body: Vec<u8>,
}

/// Reads and writes fixed-size blocks through a [`FileIo`].
pub struct BlockFile {
    io: Arc<dyn FileIo>,
    block_size: usize,
    salt: AtomicU64,
}

impl BlockFile {
    /// Opens a block file with the given block size.
    pub fn new(io: Arc<dyn FileIo>, block_size: usize) -> Result<Self> {
        if block_size < MIN_BLOCK_SIZE || !block_size.is_power_of_two() {
            return Err(StoreError::invalid(format!(
                "block size {block_size} must be a power of two of at least {MIN_BLOCK_SIZE}"
            )));
        }
        Ok(Self {
            io,
            block_size,
            salt: AtomicU64::new(0),
        })
    }

    /// Size of each block in bytes.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Bytes available after the header.
    pub fn body_len(&self) -> usize {
        self.block_size - BLOCK_HEADER_LEN
    }

    /// Sets the salt mixed into block checksums.
    pub fn set_salt(&self, salt: u64) {
        self.salt.store(salt, Ordering::Release);
    }

    /// Salt currently mixed into block checksums.
    pub fn salt(&self) -> u64 {
        self.salt.load(Ordering::Acquire)
    }

    fn offset(&self, id: BlockId) -> u64 {
        id.0 * self.block_size as u64
    }

    /// Reads block `id` and verifies its header and checksum.
    pub fn read(&self, id: BlockId) -> Result<RawBlock> {
        if id.is_null() {
            return Err(StoreError::invalid("null block cannot be read"));
        }
        let mut buf = vec![0u8; self.block_size];
        match self.io.read_at(self.offset(id), &mut buf) {
            Ok(()) => {}
            Err(StoreError::Io(err)) if err.kind() == ErrorKind::UnexpectedEof => {
                return Err(StoreError::corruption(format!("block {} truncated", id.0)));
            }
            Err(err) => return Err(err),
        }
        let stored_crc = ord::get_u32_be(&buf[CRC])?;
        buf[CRC].fill(0);
        let actual_crc = block_crc32(id.0, self.salt(), &buf);
        if stored_crc != actual_crc {
            return Err(StoreError::corruption(format!(
                "block {} checksum mismatch (stored {stored_crc:#010x}, computed {actual_crc:#010x})",
                id.0
            )));
        }
        let stored_id = ord::get_u64_be(&buf[ID])?;
        if stored_id != id.0 {
            return Err(StoreError::corruption(format!(
                "block {} carries id {stored_id}",
                id.0
            )));
        }
        let kind = BlockKind::from_byte(buf[KIND]).ok_or_else(|| {
            StoreError::corruption(format!("block {} has unknown kind {}", id.0, buf[KIND]))
        })?;
        let count = ord::get_u16_be(&buf[COUNT])?;
        buf.drain(..BLOCK_HEADER_LEN);
        Ok(RawBlock {
            kind,
            count,
            body: buf,
        })
    }

    /// Writes block `id`. `body` must fit after the header; the rest is zero-filled.
    pub fn write(&self, id: BlockId, kind: BlockKind, count: u16, body: &[u8]) -> Result<()> {
        if id.is_null() {
            return Err(StoreError::invalid("null block cannot be written"));
        }
        if body.len() > self.body_len() {
            return Err(StoreError::invalid(format!(
                "block body of {} bytes exceeds {}",
                body.len(),
                self.body_len()
            )));
        }
        let mut buf = vec![0u8; self.block_size];
        buf[KIND] = kind.to_byte();
        ord::put_u16_be(&mut buf[COUNT], count);
        ord::put_u64_be(&mut buf[ID], id.0);
        buf[BLOCK_HEADER_LEN..BLOCK_HEADER_LEN + body.len()].copy_from_slice(body);
        let crc = block_crc32(id.0, self.salt(), &buf);
        ord::put_u32_be(&mut buf[CRC], crc);
        self.io.write_at(self.offset(id), &buf)
    }

    /// Flushes written blocks to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.io.sync_all()
    }

    /// Number of block slots the file currently spans, including the null block.
    pub fn block_count(&self) -> Result<u64> {
        Ok(self.io.len()? / self.block_size as u64)
    }

    /// Discards every block.
    pub fn reset(&self) -> Result<()> {
        self.io.truncate(0)
    }
}
