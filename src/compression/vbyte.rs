//! Variable-byte coding: 7 payload bits per byte, low bits first; the high
//! bit marks a continuation byte. The workhorse codec and the fallback for
//! the codecs that cannot represent every gap distribution.

use crate::core::error::{Error, Result};
use crate::core::types::Posting;

/// Append one vByte-coded integer.
pub fn write_u64(mut value: u64, out: &mut Vec<u8>) {
    while value >= 128 {
        out.push(128 + (value & 127) as u8);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Number of bytes `write_u64` would emit.
pub fn byte_length(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 128 {
        value >>= 7;
        len += 1;
    }
    len
}

/// Decode one vByte-coded integer; returns (value, bytes consumed).
pub fn read_u64(input: &[u8]) -> Result<(u64, usize)> {
    let mut value = 0u64;
    let mut shift = 0u32;
    for (pos, &byte) in input.iter().enumerate() {
        if shift > 63 {
            return Err(Error::malformed("vByte value overflows 64 bits"));
        }
        value |= ((byte & 127) as u64) << shift;
        if byte < 128 {
            return Ok((value, pos + 1));
        }
        shift += 7;
    }
    Err(Error::malformed("incomplete vByte value"))
}

/// Payload encoder: first posting absolute, the rest as gaps.
pub fn encode(postings: &[Posting], out: &mut Vec<u8>) {
    write_u64(postings[0], out);
    for w in postings.windows(2) {
        write_u64(w[1] - w[0], out);
    }
}

pub fn decode(payload: &[u8], count: usize, out: &mut Vec<Posting>) -> Result<()> {
    let mut pos = 0usize;
    let mut current = 0u64;
    for i in 0..count {
        let (value, used) = read_u64(&payload[pos..])?;
        pos += used;
        current = if i == 0 { value } else { current + value };
        out.push(current);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_values_round_trip() {
        let mut buf = Vec::new();
        let mut i: u64 = 0;
        while i < 100_000_000_000_000 {
            buf.clear();
            write_u64(i, &mut buf);
            assert_eq!(buf.len(), byte_length(i));
            let (value, used) = read_u64(&buf).unwrap();
            assert_eq!(value, i);
            assert_eq!(used, buf.len());
            i = i * 3 + 1;
        }
    }

    #[test]
    fn documented_gap_bytes() {
        // gaps 5, 7, 130, 16384 encode to the documented byte string
        let postings = [5u64, 12, 142, 16526];
        let mut payload = Vec::new();
        encode(&postings, &mut payload);
        assert_eq!(payload, [0x05, 0x07, 0x82, 0x01, 0x80, 0x80, 0x01]);
        let mut restored = Vec::new();
        decode(&payload, 4, &mut restored).unwrap();
        assert_eq!(restored, postings);
    }

    #[test]
    fn small_list_round_trip() {
        let postings = [5u64, 12, 130, 16384];
        let mut payload = Vec::new();
        encode(&postings, &mut payload);
        let mut restored = Vec::new();
        decode(&payload, 4, &mut restored).unwrap();
        assert_eq!(restored, postings);
    }

    #[test]
    fn incomplete_value_is_an_error() {
        assert!(read_u64(&[0x80, 0x80]).is_err());
        assert!(read_u64(&[]).is_err());
    }
}
