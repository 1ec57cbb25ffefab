//! Low-level primitives the storage engine is built from.
//!
//! Includes byte codecs, positioned file I/O, checksummed block files and the
//! generation-tagged identifier allocator.

/// Big-endian field encoding and a checked slice reader.
pub mod bytes;

/// Fixed-size checksummed blocks.
pub mod blockfile;

/// Identifier allocation with deferred reclamation.
pub mod freelist;

/// Positioned file I/O abstractions.
///
/// Interfaces for reading/writing data plus in-memory and fault-injecting implementations.
pub mod io;
