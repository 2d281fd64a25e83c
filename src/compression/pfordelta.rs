//! PForDelta (Heman et al., ICDE 2006): chunks of up to 128 d-gaps packed at
//! a fixed bit width chosen so that ~90% of the chunk fits; the rest become
//! patched exceptions carrying their overflow bits out of band.

use super::bits::{BitReader, BitWriter, bit_length};
use super::vbyte;
use crate::core::error::{Error, Result};
use crate::core::types::Posting;

const CHUNK: usize = 128;

pub fn encode(postings: &[Posting], out: &mut Vec<u8>) {
    vbyte::write_u64(postings[0], out);
    let gaps: Vec<u64> = postings.windows(2).map(|w| w[1] - w[0]).collect();

    for chunk in gaps.chunks(CHUNK) {
        let mut widths: Vec<u32> = chunk.iter().map(|&g| bit_length(g).max(1)).collect();
        widths.sort_unstable();
        // frame width covering 90% of the chunk
        let width = widths[(widths.len() - 1) * 9 / 10];

        let exceptions: Vec<(usize, u64)> = chunk
            .iter()
            .enumerate()
            .filter(|&(_, &g)| bit_length(g).max(1) > width)
            .map(|(i, &g)| (i, g >> width))
            .collect();

        out.push(chunk.len() as u8 - 1);
        out.push(width as u8);
        vbyte::write_u64(exceptions.len() as u64, out);
        let mut w = BitWriter::new();
        for &g in chunk {
            w.write_bits(g & low_mask(width), width);
        }
        out.extend_from_slice(&w.finish());
        for &(pos, high) in &exceptions {
            out.push(pos as u8);
            vbyte::write_u64(high, out);
        }
    }
}

fn low_mask(width: u32) -> u64 {
    if width >= 64 { u64::MAX } else { (1u64 << width) - 1 }
}

pub fn decode(payload: &[u8], count: usize, out: &mut Vec<Posting>) -> Result<()> {
    let (first, mut pos) = vbyte::read_u64(payload)?;
    out.push(first);
    let mut current = first;
    let mut remaining = count - 1;
    let mut gaps = [0u64; CHUNK];
    while remaining > 0 {
        if pos + 2 > payload.len() {
            return Err(Error::malformed("truncated PForDelta chunk header"));
        }
        let n = payload[pos] as usize + 1;
        let width = payload[pos + 1] as u32;
        pos += 2;
        if n > remaining || width > 64 {
            return Err(Error::malformed("bad PForDelta chunk header"));
        }
        let (exception_count, used) = vbyte::read_u64(&payload[pos..])?;
        pos += used;
        if width >= 64 && exception_count > 0 {
            return Err(Error::malformed("PForDelta exceptions at full width"));
        }

        let packed_bytes = (n * width as usize + 7) / 8;
        if pos + packed_bytes > payload.len() {
            return Err(Error::malformed("truncated PForDelta frame"));
        }
        let mut r = BitReader::new(&payload[pos..pos + packed_bytes]);
        for slot in gaps.iter_mut().take(n) {
            *slot = r.read_bits(width)?;
        }
        pos += packed_bytes;

        for _ in 0..exception_count {
            if pos >= payload.len() {
                return Err(Error::malformed("truncated PForDelta exceptions"));
            }
            let slot = payload[pos] as usize;
            pos += 1;
            let (high, used) = vbyte::read_u64(&payload[pos..])?;
            pos += used;
            if slot >= n {
                return Err(Error::malformed("PForDelta exception out of range"));
            }
            gaps[slot] |= high << width;
        }

        for &gap in gaps.iter().take(n) {
            current += gap;
            out.push(current);
        }
        remaining -= n;
    }
    Ok(())
}
