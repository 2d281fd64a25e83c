//! Generalized unaligned binary coding. In γ every header bit buys one body
//! bit; in GUBC one header bit buys N body bits, with N picked per list to
//! minimize the encoded size. GUBCIP lets the first header bit buy J body
//! bits and every further one K, which fits the bimodal gap distribution of
//! positional posting lists.

use super::bits::{BitReader, BitWriter, bit_length};
use super::vbyte;
use crate::core::error::{Error, Result};
use crate::core::types::Posting;

const MAX_GROUP_BITS: u32 = 32;

/// Histogram of gap bit lengths (index 1..=64).
fn bitlen_histogram(postings: &[Posting]) -> [u64; 65] {
    let mut hist = [0u64; 65];
    for pair in postings.windows(2) {
        hist[bit_length(pair[1] - pair[0]) as usize] += 1;
    }
    hist
}

fn groups_for(len: u32, n: u32) -> u64 {
    (len as u64).div_ceil(n as u64)
}

fn gubc_cost(hist: &[u64; 65], n: u32) -> u64 {
    let mut cost = 0u64;
    for (len, &count) in hist.iter().enumerate().skip(1) {
        let g = groups_for(len as u32, n);
        if count > 0 && g * n as u64 > 64 {
            return u64::MAX; // code word would not fit the 64-bit body
        }
        cost += count * (g + g * n as u64);
    }
    cost
}

pub fn encode_gubc(postings: &[Posting], out: &mut Vec<u8>) {
    let hist = bitlen_histogram(postings);
    let mut best_n = 1;
    let mut best_cost = u64::MAX;
    for n in 1..=MAX_GROUP_BITS {
        let cost = gubc_cost(&hist, n);
        if cost < best_cost {
            best_cost = cost;
            best_n = n;
        }
    }

    out.push(best_n as u8);
    vbyte::write_u64(postings[0], out);
    let mut w = BitWriter::new();
    for pair in postings.windows(2) {
        let gap = pair[1] - pair[0];
        let g = groups_for(bit_length(gap), best_n);
        w.write_unary(g - 1);
        w.write_bits(gap, (g as u32) * best_n);
    }
    out.extend_from_slice(&w.finish());
}

pub fn decode_gubc(payload: &[u8], count: usize, out: &mut Vec<Posting>) -> Result<()> {
    let n = payload[0] as u32;
    if n == 0 || n > MAX_GROUP_BITS {
        return Err(Error::malformed("bad GUBC group width"));
    }
    let (first, used) = vbyte::read_u64(&payload[1..])?;
    out.push(first);
    let mut r = BitReader::new(&payload[1 + used..]);
    let mut current = first;
    for _ in 1..count {
        let g = r.read_unary()? + 1;
        if g * n as u64 > 64 {
            return Err(Error::malformed("GUBC code exceeds 64 bits"));
        }
        current += r.read_bits(g as u32 * n)?;
        out.push(current);
    }
    Ok(())
}

fn gubcip_groups(len: u32, j: u32, k: u32) -> u64 {
    if len <= j { 1 } else { 1 + ((len - j) as u64).div_ceil(k as u64) }
}

fn gubcip_cost(hist: &[u64; 65], j: u32, k: u32) -> u64 {
    let mut cost = 0u64;
    for (len, &count) in hist.iter().enumerate().skip(1) {
        let g = gubcip_groups(len as u32, j, k);
        let width = j as u64 + (g - 1) * k as u64;
        if count > 0 && width > 64 {
            return u64::MAX;
        }
        cost += count * (g + width);
    }
    cost
}

pub fn encode_gubcip(postings: &[Posting], out: &mut Vec<u8>) {
    let hist = bitlen_histogram(postings);
    let (mut best_j, mut best_k) = (1, 1);
    let mut best_cost = u64::MAX;
    for j in 1..=MAX_GROUP_BITS {
        for k in 1..=MAX_GROUP_BITS {
            let cost = gubcip_cost(&hist, j, k);
            if cost < best_cost {
                best_cost = cost;
                (best_j, best_k) = (j, k);
            }
        }
    }

    out.push(best_j as u8);
    out.push(best_k as u8);
    vbyte::write_u64(postings[0], out);
    let mut w = BitWriter::new();
    for pair in postings.windows(2) {
        let gap = pair[1] - pair[0];
        let g = gubcip_groups(bit_length(gap), best_j, best_k);
        w.write_unary(g - 1);
        w.write_bits(gap, best_j + (g as u32 - 1) * best_k);
    }
    out.extend_from_slice(&w.finish());
}

pub fn decode_gubcip(payload: &[u8], count: usize, out: &mut Vec<Posting>) -> Result<()> {
    let j = payload[0] as u32;
    let k = payload[1] as u32;
    if j == 0 || k == 0 || j > MAX_GROUP_BITS || k > MAX_GROUP_BITS {
        return Err(Error::malformed("bad GUBCIP group widths"));
    }
    let (first, used) = vbyte::read_u64(&payload[2..])?;
    out.push(first);
    let mut r = BitReader::new(&payload[2 + used..]);
    let mut current = first;
    for _ in 1..count {
        let g = r.read_unary()? + 1;
        let width = j as u64 + (g - 1) * k as u64;
        if width > 64 {
            return Err(Error::malformed("GUBCIP code exceeds 64 bits"));
        }
        current += r.read_bits(width as u32)?;
        out.push(current);
    }
    Ok(())
}
