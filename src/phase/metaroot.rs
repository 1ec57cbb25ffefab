//! The two-slot metaroot file and its free-list sidecars.
//!
//! Each slot is 512 bytes, big-endian:
//!
//! ```text
//! magic u32 | version u16 | kind u16 | flags u32 | crc32 u32 | phase u64 | generation u64
//! salt u64 | high-water u64 | free-list length u64 | free-list crc u32 | reserved u32
//! payload [u8; 448]
//! ```

use std::fmt;
use std::io::ErrorKind;
use std::ops::Range;
use std::sync::Arc;

use crate::primitives::bytes::ord;
use crate::primitives::io::FileIo;
use crate::types::{block_crc32, ids_crc32, PhaseNumber, Result, StoreError};

/// Size of one metaroot slot in bytes.
pub const SLOT_LEN: usize = 512;
/// Bytes available to the resource inside a slot.
pub const PAYLOAD_LEN: usize = SLOT_LEN - 64;
/// Identifies a metaroot slot.
pub const METAROOT_MAGIC: u32 = 0xa5e7_f21e;
/// Current on-disk format version.
pub const FORMAT_VERSION: u16 = 1;

const FLAG_VALID: u32 = 1;

const MAGIC: Range<usize> = 0..4;
const VERSION: Range<usize> = 4..6;
const KIND: Range<usize> = 6..8;
const FLAGS: Range<usize> = 8..12;
const CRC: Range<usize> = 12..16;
const PHASE: Range<usize> = 16..24;
const GENERATION: Range<usize> = 24..32;
const SALT: Range<usize> = 32..40;
const HIGH_WATER: Range<usize> = 40..48;
const FREE_LEN: Range<usize> = 48..56;
const FREE_CRC: Range<usize> = 56..60;
const RESERVED: Range<usize> = 60..64;
const PAYLOAD: Range<usize> = 64..SLOT_LEN;

/// Which kind of resource owns a metaroot file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceKind {
    /// A statement store.
    Statements,
    /// A node pool.
    NodePool,
}

impl ResourceKind {
    fn code(self) -> u16 {
        match self {
            ResourceKind::Statements => 1,
            ResourceKind::NodePool => 2,
        }
    }
}

/// Decoded contents of one metaroot slot.
#[derive(Clone, PartialEq, Eq)]
pub struct Metaroot {
    /// Phase the slot describes.
    pub phase: PhaseNumber,
    /// Allocator generation sealed when the phase was prepared.
    pub generation: u64,
    /// Salt mixed into block checksums.
    pub salt: u64,
    /// Allocator high-water mark.
    pub high_water: u64,
    /// Number of identifiers in the slot's free-list sidecar.
    pub free_len: u64,
    /// CRC of the sidecar contents.
    pub free_crc: u32,
    /// Resource-specific roots, exactly [`PAYLOAD_LEN`] bytes.
    pub payload: Vec<u8>,
}

impl fmt::Debug for Metaroot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metaroot")
            .field("phase", &self.phase)
            .field("generation", &self.generation)
            .field("high_water", &self.high_water)
            .field("free_len", &self.free_len)
            .finish_non_exhaustive()
    }
}

/// What a slot currently holds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlotState {
    /// Never written or zeroed.
    Empty,
    /// Fails magic, version, kind or checksum validation.
    Corrupt(String),
    /// Well formed but not marked valid (invalidated by commit, rollback or selection).
    Retired(Metaroot),
    /// A usable phase.
    Valid(Metaroot),
}

/// Reads and writes the two metaroot slots of one resource.
pub struct MetarootFile {
    io: Arc<dyn FileIo>,
    kind: ResourceKind,
}

impl MetarootFile {
    /// Wraps `io` for a resource of the given kind.
    pub fn new(io: Arc<dyn FileIo>, kind: ResourceKind) -> Self {
        Self { io, kind }
    }

    /// True when the file has never been written.
    pub fn is_empty(&self) -> Result<bool> {
        self.io.is_empty()
    }

    fn offset(slot: usize) -> u64 {
        (slot * SLOT_LEN) as u64
    }

    /// Reads and classifies slot `slot` (0 or 1).
    pub fn read_slot(&self, slot: usize) -> Result<SlotState> {
        let mut buf = [0u8; SLOT_LEN];
        match self.io.read_at(Self::offset(slot), &mut buf) {
            Ok(()) => {}
            Err(StoreError::Io(err)) if err.kind() == ErrorKind::UnexpectedEof => {
                return Ok(SlotState::Empty);
            }
            Err(err) => return Err(err),
        }
        decode_slot(slot, self.kind, &mut buf)
    }

    /// Writes `root` into `slot` and syncs. The slot is valid once this returns.
    pub fn write_slot(&self, slot: usize, root: &Metaroot) -> Result<()> {
        self.write_raw(slot, root, true)
    }

    /// Rewrites `slot` with its valid flag cleared and syncs.
    pub fn invalidate(&self, slot: usize) -> Result<()> {
        match self.read_slot(slot)? {
            SlotState::Valid(root) => self.write_raw(slot, &root, false),
            _ => Ok(()),
        }
    }

    /// Discards both slots.
    pub fn reset(&self) -> Result<()> {
        self.io.truncate(0)?;
        self.io.sync_all()
    }

    fn write_raw(&self, slot: usize, root: &Metaroot, valid: bool) -> Result<()> {
        if root.payload.len() != PAYLOAD_LEN {
            return Err(StoreError::invalid(format!(
                "metaroot payload must be {PAYLOAD_LEN} bytes, got {}",
                root.payload.len()
            )));
        }
        let mut buf = [0u8; SLOT_LEN];
        ord::put_u32_be(&mut buf[MAGIC], METAROOT_MAGIC);
        ord::put_u16_be(&mut buf[VERSION], FORMAT_VERSION);
        ord::put_u16_be(&mut buf[KIND], self.kind.code());
        ord::put_u32_be(&mut buf[FLAGS], if valid { FLAG_VALID } else { 0 });
        ord::put_u64_be(&mut buf[PHASE], root.phase.0);
        ord::put_u64_be(&mut buf[GENERATION], root.generation);
        ord::put_u64_be(&mut buf[SALT], root.salt);
        ord::put_u64_be(&mut buf[HIGH_WATER], root.high_water);
        ord::put_u64_be(&mut buf[FREE_LEN], root.free_len);
        ord::put_u32_be(&mut buf[FREE_CRC], root.free_crc);
        buf[RESERVED].fill(0);
        buf[PAYLOAD].copy_from_slice(&root.payload);
        let crc = block_crc32(slot as u64, root.salt, &buf);
        ord::put_u32_be(&mut buf[CRC], crc);
        self.io.write_at(Self::offset(slot), &buf)?;
        self.io.sync_all()
    }
}

fn decode_slot(slot: usize, kind: ResourceKind, buf: &mut [u8; SLOT_LEN]) -> Result<SlotState> {
    if buf.iter().all(|b| *b == 0) {
        return Ok(SlotState::Empty);
    }
    let magic = ord::get_u32_be(&buf[MAGIC])?;
    if magic != METAROOT_MAGIC {
        return Ok(SlotState::Corrupt(format!("bad magic {magic:#010x}")));
    }
    let version = ord::get_u16_be(&buf[VERSION])?;
    if version != FORMAT_VERSION {
        return Ok(SlotState::Corrupt(format!("unsupported version {version}")));
    }
    let stored_crc = ord::get_u32_be(&buf[CRC])?;
    let salt = ord::get_u64_be(&buf[SALT])?;
    buf[CRC].fill(0);
    let actual_crc = block_crc32(slot as u64, salt, &buf[..]);
    if stored_crc != actual_crc {
        return Ok(SlotState::Corrupt(format!(
            "checksum mismatch (stored {stored_crc:#010x}, computed {actual_crc:#010x})"
        )));
    }
    let stored_kind = ord::get_u16_be(&buf[KIND])?;
    if stored_kind != kind.code() {
        return Ok(SlotState::Corrupt(format!(
            "resource kind {stored_kind} does not match expected {}",
            kind.code()
        )));
    }
    let flags = ord::get_u32_be(&buf[FLAGS])?;
    let root = Metaroot {
        phase: PhaseNumber(ord::get_u64_be(&buf[PHASE])?),
        generation: ord::get_u64_be(&buf[GENERATION])?,
        salt,
        high_water: ord::get_u64_be(&buf[HIGH_WATER])?,
        free_len: ord::get_u64_be(&buf[FREE_LEN])?,
        free_crc: ord::get_u32_be(&buf[FREE_CRC])?,
        payload: buf[PAYLOAD].to_vec(),
    };
    if flags & FLAG_VALID == 0 {
        Ok(SlotState::Retired(root))
    } else {
        Ok(SlotState::Valid(root))
    }
}

/// Writes a free-list sidecar and syncs it. Returns the CRC to record in the metaroot.
pub fn write_free_list(io: &dyn FileIo, ids: &[u64]) -> Result<u32> {
    let mut buf = vec![0u8; ids.len() * 8];
    for (chunk, id) in buf.chunks_exact_mut(8).zip(ids) {
        ord::put_u64_be(chunk, *id);
    }
    io.write_at(0, &buf)?;
    io.truncate(buf.len() as u64)?;
    io.sync_all()?;
    Ok(ids_crc32(ids))
}

/// Reads a free-list sidecar and checks it against the metaroot's length and CRC.
pub fn read_free_list(io: &dyn FileIo, len: u64, crc: u32) -> Result<Vec<u64>> {
    let byte_len = len
        .checked_mul(8)
        .ok_or_else(|| StoreError::corruption("free-list length overflows"))?;
    if io.len()? < byte_len {
        return Err(StoreError::corruption(format!(
            "free-list sidecar shorter than {len} entries"
        )));
    }
    let mut buf = vec![0u8; byte_len as usize];
    io.read_at(0, &mut buf)?;
    let ids = buf
        .chunks_exact(8)
        .map(ord::get_u64_be)
        .collect::<Result<Vec<_>>>()?;
    if ids_crc32(&ids) != crc {
        return Err(StoreError::corruption("free-list sidecar checksum mismatch"));
    }
    Ok(ids)
}
