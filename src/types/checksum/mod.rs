#![forbid(unsafe_code)]

use crc32fast::Hasher;

/// CRC32 over a block or metaroot slot, seeded with its position and the file salt so a
/// record copied to the wrong place never validates.
pub fn block_crc32(position: u64, salt: u64, payload: &[u8]) -> u32 {
    let mut hasher = seeded(position, salt);
    hasher.update(payload);
    hasher.finalize()
}

/// CRC32 of a list of identifiers, used for free-list sidecar files.
pub fn ids_crc32(ids: &[u64]) -> u32 {
    let mut hasher = Hasher::new();
    for id in ids {
        hasher.update(&id.to_be_bytes());
    }
    hasher.finalize()
}

fn seeded(position: u64, salt: u64) -> Hasher {
    let mut hasher = Hasher::new();
    hasher.update(&position.to_be_bytes());
    hasher.update(&salt.to_be_bytes());
    hasher
}
