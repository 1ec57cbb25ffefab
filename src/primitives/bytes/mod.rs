#![forbid(unsafe_code)]
//! Big-endian field helpers shared by the block, metaroot and decision-log codecs.

pub mod ord {
    //! Order-preserving big-endian integer encoders.

    use crate::types::{Result, StoreError};

    /// Writes `v` big-endian into the first eight bytes of `dst`.
    pub fn put_u64_be(dst: &mut [u8], v: u64) {
        dst[..8].copy_from_slice(&v.to_be_bytes());
    }

    /// Writes `v` big-endian into the first four bytes of `dst`.
    pub fn put_u32_be(dst: &mut [u8], v: u32) {
        dst[..4].copy_from_slice(&v.to_be_bytes());
    }

    /// Writes `v` big-endian into the first two bytes of `dst`.
    pub fn put_u16_be(dst: &mut [u8], v: u16) {
        dst[..2].copy_from_slice(&v.to_be_bytes());
    }

    /// Decodes a big-endian u64, reporting truncation as corruption.
    pub fn get_u64_be(src: &[u8]) -> Result<u64> {
        let head: [u8; 8] = src
            .get(..8)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| truncated(8, src.len()))?;
        Ok(u64::from_be_bytes(head))
    }

    /// Decodes a big-endian u32, reporting truncation as corruption.
    pub fn get_u32_be(src: &[u8]) -> Result<u32> {
        let head: [u8; 4] = src
            .get(..4)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| truncated(4, src.len()))?;
        Ok(u32::from_be_bytes(head))
    }

    /// Decodes a big-endian u16, reporting truncation as corruption.
    pub fn get_u16_be(src: &[u8]) -> Result<u16> {
        let head: [u8; 2] = src
            .get(..2)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| truncated(2, src.len()))?;
        Ok(u16::from_be_bytes(head))
    }

    fn truncated(need: usize, have: usize) -> StoreError {
        StoreError::Corruption(format!("field truncated: need {need} bytes, have {have}"))
    }
}

pub mod buf {
    //! A slice-backed reader for sequential decoding.

    use core::fmt;

    use super::ord;
    use crate::types::{Result, StoreError};

    /// Reads fields from a slice front to back.
    pub struct Reader<'a> {
        buf: &'a [u8],
        off: usize,
    }

    impl<'a> Reader<'a> {
        /// Starts reading at offset 0.
        pub fn new(buf: &'a [u8]) -> Self {
            Self { buf, off: 0 }
        }

        /// Takes the next `n` bytes.
        pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
            let end = self.off.checked_add(n).filter(|end| *end <= self.buf.len());
            let Some(end) = end else {
                return Err(StoreError::Corruption(format!(
                    "record truncated: need {n} bytes, remaining {}",
                    self.remaining()
                )));
            };
            let slice = &self.buf[self.off..end];
            self.off = end;
            Ok(slice)
        }

        /// Reads a big-endian u64.
        pub fn u64(&mut self) -> Result<u64> {
            ord::get_u64_be(self.take(8)?)
        }

        /// Reads a big-endian u32.
        pub fn u32(&mut self) -> Result<u32> {
            ord::get_u32_be(self.take(4)?)
        }

        /// Reads a big-endian u16.
        pub fn u16(&mut self) -> Result<u16> {
            ord::get_u16_be(self.take(2)?)
        }

        /// Bytes left to read.
        pub fn remaining(&self) -> usize {
            self.buf.len().saturating_sub(self.off)
        }
    }

    impl fmt::Debug for Reader<'_> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Reader")
                .field("off", &self.off)
                .field("remaining", &self.remaining())
                .finish()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{buf::Reader, ord};
    use crate::types::StoreError;
    use proptest::prelude::*;

    #[test]
    fn fixed_width_fields_roundtrip() {
        let mut dst = [0u8; 14];
        ord::put_u64_be(&mut dst[0..8], 123_456_789);
        ord::put_u32_be(&mut dst[8..12], 0xa5e7_f21e);
        ord::put_u16_be(&mut dst[12..14], 7);
        let mut reader = Reader::new(&dst);
        assert_eq!(reader.u64().unwrap(), 123_456_789);
        assert_eq!(reader.u32().unwrap(), 0xa5e7_f21e);
        assert_eq!(reader.u16().unwrap(), 7);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn truncated_reads_are_corruption() {
        assert!(matches!(
            ord::get_u64_be(&[1, 2, 3]),
            Err(StoreError::Corruption(_))
        ));
        let mut reader = Reader::new(&[1, 2, 3]);
        assert!(matches!(reader.take(4), Err(StoreError::Corruption(_))));
        assert_eq!(reader.take(3).unwrap(), &[1, 2, 3]);
    }

    proptest! {
        #[test]
        fn order_preserving_u64_prop(xs in proptest::collection::vec(any::<u64>(), 1..64)) {
            let mut encoded: Vec<[u8; 8]> = xs
                .iter()
                .map(|&v| {
                    let mut buf = [0u8; 8];
                    ord::put_u64_be(&mut buf, v);
                    buf
                })
                .collect();
            encoded.sort();
            let decoded: Vec<u64> = encoded
                .iter()
                .map(|buf| ord::get_u64_be(buf).unwrap())
                .collect();
            let mut expected = xs.clone();
            expected.sort();
            prop_assert_eq!(decoded, expected);
        }
    }
}
