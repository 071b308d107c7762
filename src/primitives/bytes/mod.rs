#![forbid(unsafe_code)]
//! Order-preserving encoders, varints and a checked cursor shared by the
//! encoding and storage layers.

pub mod ord {
    //! Order-preserving encoders for identifier bodies and attribute values.
    //!
    //! Signed integers flip their sign bit so that big-endian byte order
    //! matches numeric order. Doubles use the usual total-order bit trick.

    use crate::error::{GraphError, Result};

    const SIGN_BIT_16: u16 = 1 << 15;
    const SIGN_BIT_64: u64 = 1 << 63;

    /// Encodes an i16 so that byte order matches numeric order.
    pub fn encode_i16(v: i16) -> [u8; 2] {
        ((v as u16) ^ SIGN_BIT_16).to_be_bytes()
    }

    /// Decodes an i16 written by [`encode_i16`].
    pub fn decode_i16(src: &[u8]) -> Result<i16> {
        let head: [u8; 2] = src
            .get(..2)
            .and_then(|s| s.try_into().ok())
            .ok_or(GraphError::Corruption("i16 source shorter than 2 bytes"))?;
        Ok((u16::from_be_bytes(head) ^ SIGN_BIT_16) as i16)
    }

    /// Encodes an i64 so that byte order matches numeric order.
    pub fn encode_i64(v: i64) -> [u8; 8] {
        ((v as u64) ^ SIGN_BIT_64).to_be_bytes()
    }

    /// Decodes an i64 written by [`encode_i64`].
    pub fn decode_i64(src: &[u8]) -> Result<i64> {
        Ok((read_u64(src)? ^ SIGN_BIT_64) as i64)
    }

    /// Encodes an f64 so that byte order matches numeric order.
    ///
    /// NaN is rejected since it has no place in a total order.
    pub fn encode_f64(v: f64) -> Result<[u8; 8]> {
        if v.is_nan() {
            return Err(GraphError::invalid("NaN cannot be stored as a double value"));
        }
        let bits = v.to_bits();
        let encoded = if bits & SIGN_BIT_64 != 0 {
            !bits
        } else {
            bits ^ SIGN_BIT_64
        };
        Ok(encoded.to_be_bytes())
    }

    /// Decodes an f64 written by [`encode_f64`].
    pub fn decode_f64(src: &[u8]) -> Result<f64> {
        let encoded = read_u64(src)?;
        let bits = if encoded & SIGN_BIT_64 != 0 {
            encoded ^ SIGN_BIT_64
        } else {
            !encoded
        };
        Ok(f64::from_bits(bits))
    }

    fn read_u64(src: &[u8]) -> Result<u64> {
        let head: [u8; 8] = src
            .get(..8)
            .and_then(|s| s.try_into().ok())
            .ok_or(GraphError::Corruption("u64 source shorter than 8 bytes"))?;
        Ok(u64::from_be_bytes(head))
    }
}

pub mod counter {
    //! Plain two's-complement counters stored as statistics values.

    use crate::error::{GraphError, Result};

    /// Encodes a counter value.
    pub fn encode(v: i64) -> [u8; 8] {
        v.to_be_bytes()
    }

    /// Decodes a counter value; the slice must be exactly eight bytes.
    pub fn decode(src: &[u8]) -> Result<i64> {
        let bytes: [u8; 8] = src
            .try_into()
            .map_err(|_| GraphError::Corruption("counter value is not 8 bytes"))?;
        Ok(i64::from_be_bytes(bytes))
    }
}

pub mod var {
    //! Unsigned varints and ZigZag signed integers.

    use crate::error::{GraphError, Result};

    /// Encodes a u64 as an unsigned varint.
    pub fn encode_u64(mut v: u64, out: &mut Vec<u8>) {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                out.push(byte);
                break;
            }
            out.push(byte | 0x80);
        }
    }

    /// Decodes a u64 varint from a slice, updating the offset.
    pub fn decode_u64(src: &[u8], off: &mut usize) -> Result<u64> {
        let mut result = 0u64;
        let mut shift = 0u32;
        for i in 0..10 {
            let byte = *src
                .get(*off)
                .ok_or(GraphError::Corruption("varint truncated"))?;
            *off += 1;
            let payload = (byte & 0x7f) as u64;
            if i == 9 && payload > 1 {
                return Err(GraphError::Corruption("varint exceeds 64 bits"));
            }
            result |= payload << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
        Err(GraphError::Corruption("varint longer than 10 bytes"))
    }

    /// Encodes an i64 as a ZigZag-encoded varint.
    pub fn encode_i64(v: i64, out: &mut Vec<u8>) {
        encode_u64(((v << 1) ^ (v >> 63)) as u64, out);
    }

    /// Decodes a ZigZag-encoded i64 varint from a slice, updating the offset.
    pub fn decode_i64(src: &[u8], off: &mut usize) -> Result<i64> {
        let zigzag = decode_u64(src, off)?;
        Ok(((zigzag >> 1) as i64) ^ (-((zigzag & 1) as i64)))
    }
}

pub mod buf {
    //! A slice-backed cursor whose reads fail with `Corruption` instead of
    //! panicking, for parsing bytes that came back from storage.

    use core::fmt;

    use super::var;
    use crate::error::{GraphError, Result};

    /// A cursor for reading bytes from a slice with offset tracking.
    pub struct Cursor<'a> {
        buf: &'a [u8],
        off: usize,
    }

    impl<'a> Cursor<'a> {
        /// Creates a new cursor starting at offset 0.
        pub fn new(buf: &'a [u8]) -> Self {
            Self { buf, off: 0 }
        }

        /// Takes the next `n` bytes, advancing the offset.
        pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
            let end = self
                .off
                .checked_add(n)
                .filter(|end| *end <= self.buf.len())
                .ok_or(GraphError::Corruption("cursor read past end of buffer"))?;
            let slice = &self.buf[self.off..end];
            self.off = end;
            Ok(slice)
        }

        /// Takes a single byte.
        pub fn u8(&mut self) -> Result<u8> {
            Ok(self.take(1)?[0])
        }

        /// Takes an unsigned varint.
        pub fn var_u64(&mut self) -> Result<u64> {
            var::decode_u64(self.buf, &mut self.off)
        }

        /// Takes a ZigZag varint.
        pub fn var_i64(&mut self) -> Result<i64> {
            var::decode_i64(self.buf, &mut self.off)
        }

        /// Takes a varint length followed by that many bytes.
        pub fn var_bytes(&mut self) -> Result<&'a [u8]> {
            let len = usize::try_from(self.var_u64()?)
                .map_err(|_| GraphError::Corruption("length prefix overflows usize"))?;
            self.take(len)
        }

        /// Current read offset.
        pub fn position(&self) -> usize {
            self.off
        }

        /// Returns the number of bytes remaining in the buffer.
        pub fn remaining(&self) -> usize {
            self.buf.len().saturating_sub(self.off)
        }
    }

    impl fmt::Debug for Cursor<'_> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Cursor")
                .field("off", &self.off)
                .field("remaining", &self.remaining())
                .finish()
        }
    }

    /// Appends a varint length followed by the bytes.
    pub fn put_var_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
        var::encode_u64(bytes.len() as u64, out);
        out.extend_from_slice(bytes);
    }
}
