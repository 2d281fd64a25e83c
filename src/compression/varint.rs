//! Group varint coding (Dean, WSDM 2009): groups of four d-gaps share one
//! control byte holding four 2-bit byte-length codes. Gaps must fit in 32
//! bits; the index path falls back to vByte otherwise.

use super::vbyte;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::Posting;

pub fn encode(postings: &[Posting], out: &mut Vec<u8>) -> Result<()> {
    vbyte::write_u64(postings[0], out);
    let gaps: Vec<u64> = postings.windows(2).map(|w| w[1] - w[0]).collect();
    for &gap in &gaps {
        if gap > u32::MAX as u64 {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("gap {} exceeds the 32-bit group-varint limit", gap),
            ));
        }
    }
    for group in gaps.chunks(4) {
        let mut control = 0u8;
        for (i, &gap) in group.iter().enumerate() {
            control |= (byte_len(gap as u32) - 1) << (2 * i);
        }
        out.push(control);
        for &gap in group {
            let len = byte_len(gap as u32) as usize;
            out.extend_from_slice(&(gap as u32).to_le_bytes()[..len]);
        }
    }
    Ok(())
}

fn byte_len(v: u32) -> u8 {
    if v < 1 << 8 {
        1
    } else if v < 1 << 16 {
        2
    } else if v < 1 << 24 {
        3
    } else {
        4
    }
}

pub fn decode(payload: &[u8], count: usize, out: &mut Vec<Posting>) -> Result<()> {
    let (first, mut pos) = vbyte::read_u64(payload)?;
    out.push(first);
    let mut current = first;
    let mut remaining = count - 1;
    while remaining > 0 {
        if pos >= payload.len() {
            return Err(Error::malformed("truncated group-varint stream"));
        }
        let control = payload[pos];
        pos += 1;
        for i in 0..remaining.min(4) {
            let len = ((control >> (2 * i)) & 3) as usize + 1;
            if pos + len > payload.len() {
                return Err(Error::malformed("truncated group-varint group"));
            }
            let mut bytes = [0u8; 4];
            bytes[..len].copy_from_slice(&payload[pos..pos + len]);
            current += u32::from_le_bytes(bytes) as u64;
            out.push(current);
            pos += len;
        }
        remaining -= remaining.min(4);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_of_four_round_trip() {
        let postings: Vec<u64> = vec![9, 10, 300, 70_000, 70_001, 20_000_000, 20_000_002];
        let mut out = Vec::new();
        encode(&postings, &mut out).unwrap();
        let mut restored = Vec::new();
        decode(&out, postings.len(), &mut restored).unwrap();
        assert_eq!(restored, postings);
    }

    #[test]
    fn oversized_gap_is_rejected() {
        let postings = vec![0u64, 1 << 33];
        let mut out = Vec::new();
        assert!(encode(&postings, &mut out).is_err());
    }
}
