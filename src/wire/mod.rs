//! Binary payload codec shared with workers.
//!
//! The format is deliberately minimal. It has two base kinds:
//!
//! 1. **u64** is 8 bytes, little-endian.
//! 2. **bytes / string**: a u64 byte count followed by the raw bytes.
//!
//! Everything else is built positionally from those two: there are no tag
//! bytes, so writer and reader must agree on the field order of each message.
//! Maps are written as a u64 entry count followed by key/value pairs in
//! unspecified order:
//!
//! ```text
//! [count][key1][value1][key2][value2]...
//! ```
//!
//! Only the message shapes the supervisor actually exchanges are implemented:
//! [`HttpRequest`]/[`HttpResponse`] for the HTTP front-end and
//! [`JobRequest`]/[`JobResponse`] for the background-job path.
//!
//! # Example
//!
//! ```
//! use procpool::wire::{JobRequest, Message};
//! use bytes::Bytes;
//!
//! let req = JobRequest {
//!     name: "resize".to_string(),
//!     payload: Bytes::from_static(b"image-17"),
//!     timeout_ms: 5_000,
//! };
//! let encoded = req.to_bytes();
//! let decoded = JobRequest::from_slice(&encoded).unwrap();
//! assert_eq!(decoded.name, "resize");
//! ```

use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{PoolError, Result};

mod http;
mod job;

pub use http::{FilePart, HttpRequest, HttpResponse};
pub use job::{JobRequest, JobResponse};

/// A message that can be written to and parsed from the wire format.
///
/// Parsing consumes from the front of the buffer; any failure (short input,
/// a length prefix larger than the remaining bytes) aborts the whole message.
pub trait Message: Sized {
    /// Append the encoded message to `buf`.
    fn encode(&self, buf: &mut BytesMut);

    /// Parse one message from the front of `buf`.
    fn decode(buf: &mut impl Buf) -> Result<Self>;

    /// Encode into a freshly allocated buffer.
    fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(4096);
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Parse a message from a byte slice. Trailing bytes are ignored.
    fn from_slice(mut data: &[u8]) -> Result<Self> {
        Self::decode(&mut data)
    }
}

pub(crate) fn put_u64(buf: &mut BytesMut, val: u64) {
    buf.put_u64_le(val);
}

pub(crate) fn get_u64(buf: &mut impl Buf) -> Result<u64> {
    if buf.remaining() < 8 {
        return Err(PoolError::Codec(format!(
            "truncated u64: {} bytes left",
            buf.remaining()
        )));
    }
    Ok(buf.get_u64_le())
}

pub(crate) fn put_bytes(buf: &mut BytesMut, val: &[u8]) {
    put_u64(buf, val.len() as u64);
    buf.put_slice(val);
}

pub(crate) fn get_bytes(buf: &mut impl Buf) -> Result<Bytes> {
    let len = get_u64(buf)?;
    let len = usize::try_from(len)
        .map_err(|_| PoolError::Codec(format!("length prefix {len} overflows usize")))?;
    if buf.remaining() < len {
        return Err(PoolError::Codec(format!(
            "length prefix {} exceeds remaining input {}",
            len,
            buf.remaining()
        )));
    }
    Ok(buf.copy_to_bytes(len))
}

pub(crate) fn put_str(buf: &mut BytesMut, val: &str) {
    put_bytes(buf, val.as_bytes());
}

// Strings are raw bytes on the wire; peers may emit anything, so non-UTF-8
// sequences are replaced rather than rejected.
pub(crate) fn get_str(buf: &mut impl Buf) -> Result<String> {
    let raw = get_bytes(buf)?;
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

pub(crate) fn put_str_map(buf: &mut BytesMut, map: &HashMap<String, String>) {
    put_u64(buf, map.len() as u64);
    for (k, v) in map {
        put_str(buf, k);
        put_str(buf, v);
    }
}

pub(crate) fn get_str_map(buf: &mut impl Buf) -> Result<HashMap<String, String>> {
    let len = get_u64(buf)?;
    let mut map = HashMap::with_capacity(len.min(1024) as usize);
    for _ in 0..len {
        let k = get_str(buf)?;
        let v = get_str(buf)?;
        map.insert(k, v);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u64_round_trip() {
        let mut buf = BytesMut::new();
        put_u64(&mut buf, 123_456);
        let mut input = &buf[..];
        assert_eq!(get_u64(&mut input).unwrap(), 123_456);
        assert!(input.is_empty());
    }

    #[test]
    fn test_u64_is_little_endian() {
        let mut buf = BytesMut::new();
        put_u64(&mut buf, 0x0102_0304_0506_0708);
        assert_eq!(&buf[..], &[0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn test_bytes_round_trip() {
        let want = [0x62, 0x79, 0x00, 0x21];
        let mut buf = BytesMut::new();
        put_bytes(&mut buf, &want);
        let got = get_bytes(&mut &buf[..]).unwrap();
        assert_eq!(&got[..], &want);
    }

    #[test]
    fn test_string_round_trip() {
        let mut buf = BytesMut::new();
        put_str(&mut buf, "hello!");
        assert_eq!(get_str(&mut &buf[..]).unwrap(), "hello!");
    }

    #[test]
    fn test_string_map_round_trip() {
        let mut want = HashMap::new();
        want.insert("foo".to_string(), "bar".to_string());
        want.insert("one".to_string(), "two".to_string());
        let mut buf = BytesMut::new();
        put_str_map(&mut buf, &want);
        let got = get_str_map(&mut &buf[..]).unwrap();
        assert_eq!(got, want);
    }

    #[test]
    fn test_empty_map_round_trip() {
        let mut buf = BytesMut::new();
        put_str_map(&mut buf, &HashMap::new());
        assert_eq!(&buf[..], &0u64.to_le_bytes());
        assert!(get_str_map(&mut &buf[..]).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_u64_errors() {
        let buf = [0u8; 7];
        assert!(matches!(
            get_u64(&mut &buf[..]),
            Err(PoolError::Codec(_))
        ));
    }

    #[test]
    fn test_length_prefix_beyond_input_errors() {
        let mut buf = BytesMut::new();
        put_u64(&mut buf, 10);
        buf.put_slice(b"short");
        assert!(matches!(
            get_bytes(&mut &buf[..]),
            Err(PoolError::Codec(_))
        ));
    }

    #[test]
    fn test_truncation_at_every_boundary_errors() {
        let mut want = HashMap::new();
        want.insert("key".to_string(), "value".to_string());
        let mut buf = BytesMut::new();
        put_str_map(&mut buf, &want);
        for cut in 0..buf.len() {
            assert!(
                get_str_map(&mut &buf[..cut]).is_err(),
                "cut at {cut} should not parse"
            );
        }
    }

    #[test]
    fn test_non_utf8_string_decodes_lossily() {
        let mut buf = BytesMut::new();
        put_bytes(&mut buf, &[0xff, 0xfe]);
        assert_eq!(get_str(&mut &buf[..]).unwrap(), "\u{fffd}\u{fffd}");
    }
}
