//! Simple-9 word-aligned coding (Anh & Moffat). Each 32-bit word carries a
//! 4-bit selector and 28 data bits holding 1..28 equally sized d-gaps. Gaps
//! that do not fit in 28 bits cannot be represented; the index path falls
//! back to vByte for such lists.

use super::vbyte;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::Posting;

/// (values per word, bits per value), selector = index.
const CONFIGS: [(usize, u32); 9] = [
    (28, 1),
    (14, 2),
    (9, 3),
    (7, 4),
    (5, 5),
    (4, 7),
    (3, 9),
    (2, 14),
    (1, 28),
];

const MAX_GAP_BITS: u32 = 28;

pub fn encode(postings: &[Posting], out: &mut Vec<u8>) -> Result<()> {
    vbyte::write_u64(postings[0], out);
    let gaps: Vec<u64> = postings.windows(2).map(|w| w[1] - w[0]).collect();
    for &gap in &gaps {
        if gap >= (1 << MAX_GAP_BITS) {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("gap {} exceeds the 28-bit Simple-9 limit", gap),
            ));
        }
    }

    let mut pos = 0;
    while pos < gaps.len() {
        // greedy: densest selector whose slots are all available and fit
        let mut chosen = CONFIGS.len() - 1;
        for (selector, &(slots, bits)) in CONFIGS.iter().enumerate() {
            if gaps.len() - pos < slots {
                continue;
            }
            if gaps[pos..pos + slots].iter().all(|&g| g < (1u64 << bits)) {
                chosen = selector;
                break;
            }
        }
        let (slots, bits) = CONFIGS[chosen];
        let mut word: u32 = (chosen as u32) << 28;
        let take = (gaps.len() - pos).min(slots);
        for (slot, &gap) in gaps[pos..pos + take].iter().enumerate() {
            word |= (gap as u32) << (slot as u32 * bits);
        }
        out.extend_from_slice(&word.to_le_bytes());
        pos += take;
    }
    Ok(())
}

pub fn decode(payload: &[u8], count: usize, out: &mut Vec<Posting>) -> Result<()> {
    let (first, used) = vbyte::read_u64(payload)?;
    out.push(first);
    let mut current = first;
    let mut remaining = count - 1;
    let mut pos = used;
    while remaining > 0 {
        if pos + 4 > payload.len() {
            return Err(Error::malformed("truncated Simple-9 stream"));
        }
        let word = u32::from_le_bytes(payload[pos..pos + 4].try_into().unwrap());
        pos += 4;
        let selector = (word >> 28) as usize;
        if selector >= CONFIGS.len() {
            return Err(Error::malformed("bad Simple-9 selector"));
        }
        let (slots, bits) = CONFIGS[selector];
        let mask = (1u32 << bits) - 1;
        for slot in 0..slots.min(remaining) {
            let gap = ((word >> (slot as u32 * bits)) & mask) as u64;
            current += gap;
            out.push(current);
        }
        remaining -= slots.min(remaining);
    }
    Ok(())
}
