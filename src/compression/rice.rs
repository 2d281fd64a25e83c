//! Rice and Golomb coding over d-gaps.
//!
//! Rice: parameter k (a power-of-two Golomb b) picked from the mean gap;
//! each gap-1 is coded as quotient in unary plus k remainder bits. The
//! schema-independent variant picks k from the 90th-percentile gap instead,
//! which tolerates the long-tail gap distribution of positional lists.
//! Golomb: general b ~ 0.69 * mean, remainder in truncated binary.

use super::bits::{BitReader, BitWriter, bit_length};
use super::gamma::{read_gamma, write_gamma};
use super::vbyte;
use crate::core::error::Result;
use crate::core::types::Posting;

/// Quotients at or above this escape into a γ code of the whole gap.
/// Outlier gaps in skewed lists would otherwise degenerate into unary runs.
const QUOTIENT_ESCAPE: u64 = 48;

fn gaps_of(postings: &[Posting]) -> impl Iterator<Item = u64> + '_ {
    postings.windows(2).map(|w| w[1] - w[0])
}

fn mean_gap(postings: &[Posting]) -> u64 {
    let n = postings.len() as u64 - 1;
    if n == 0 {
        return 1;
    }
    ((postings[n as usize] - postings[0]) / n).max(1)
}

fn percentile_gap(postings: &[Posting], percent: usize) -> u64 {
    let mut gaps: Vec<u64> = gaps_of(postings).collect();
    if gaps.is_empty() {
        return 1;
    }
    gaps.sort_unstable();
    gaps[(gaps.len() - 1) * percent / 100].max(1)
}

pub fn encode_rice(postings: &[Posting], schema_independent: bool, out: &mut Vec<u8>) {
    let pivot = if schema_independent {
        percentile_gap(postings, 90)
    } else {
        mean_gap(postings)
    };
    let k = bit_length(pivot).saturating_sub(1).min(62);
    out.push(k as u8);
    vbyte::write_u64(postings[0], out);
    let mut w = BitWriter::new();
    for gap in gaps_of(postings) {
        let v = gap - 1;
        if (v >> k) >= QUOTIENT_ESCAPE {
            w.write_unary(QUOTIENT_ESCAPE);
            write_gamma(&mut w, gap);
        } else {
            w.write_unary(v >> k);
            if k > 0 {
                w.write_bits(v & ((1 << k) - 1), k);
            }
        }
    }
    out.extend_from_slice(&w.finish());
}

pub fn decode_rice(
    payload: &[u8],
    count: usize,
    _schema_independent: bool,
    out: &mut Vec<Posting>,
) -> Result<()> {
    let k = payload[0] as u32;
    let (first, used) = vbyte::read_u64(&payload[1..])?;
    out.push(first);
    let mut r = BitReader::new(&payload[1 + used..]);
    let mut current = first;
    for _ in 1..count {
        let q = r.read_unary()?;
        if q >= QUOTIENT_ESCAPE {
            current += read_gamma(&mut r)?;
        } else {
            let rem = if k > 0 { r.read_bits(k)? } else { 0 };
            current += (q << k) + rem + 1;
        }
        out.push(current);
    }
    Ok(())
}

/// Truncated-binary remainder writer for Golomb's general b.
fn write_remainder(w: &mut BitWriter, r: u64, b: u64) {
    if b <= 1 {
        return;
    }
    let c = bit_length(b - 1);
    let threshold = (1u64 << c) - b;
    if r < threshold {
        w.write_bits(r, c - 1);
    } else {
        w.write_bits(r + threshold, c);
    }
}

fn read_remainder(reader: &mut BitReader, b: u64) -> Result<u64> {
    if b <= 1 {
        return Ok(0);
    }
    let c = bit_length(b - 1);
    let threshold = (1u64 << c) - b;
    let head = reader.read_bits(c - 1)?;
    if head < threshold {
        Ok(head)
    } else {
        let tail = reader.read_bits(1)?;
        Ok(((head << 1) | tail) - threshold)
    }
}

pub fn encode_golomb(postings: &[Posting], out: &mut Vec<u8>) {
    // b ~ ln(2) * mean gap, the classic choice for geometric gaps
    let b = ((mean_gap(postings) as f64 * 0.69) as u64).max(1);
    vbyte::write_u64(b, out);
    vbyte::write_u64(postings[0], out);
    let mut w = BitWriter::new();
    for gap in gaps_of(postings) {
        let v = gap - 1;
        if v / b >= QUOTIENT_ESCAPE {
            w.write_unary(QUOTIENT_ESCAPE);
            write_gamma(&mut w, gap);
        } else {
            w.write_unary(v / b);
            write_remainder(&mut w, v % b, b);
        }
    }
    out.extend_from_slice(&w.finish());
}

pub fn decode_golomb(payload: &[u8], count: usize, out: &mut Vec<Posting>) -> Result<()> {
    let (b, used_b) = vbyte::read_u64(payload)?;
    let (first, used_first) = vbyte::read_u64(&payload[used_b..])?;
    out.push(first);
    let mut r = BitReader::new(&payload[used_b + used_first..]);
    let mut current = first;
    for _ in 1..count {
        let q = r.read_unary()?;
        if q >= QUOTIENT_ESCAPE {
            current += read_gamma(&mut r)?;
        } else {
            let rem = read_remainder(&mut r, b)?;
            current += q * b + rem + 1;
        }
        out.push(current);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncated_binary_covers_all_remainders() {
        for b in [1u64, 2, 3, 5, 7, 8, 100, 1000] {
            for r in 0..b.min(64) {
                let mut w = BitWriter::new();
                write_remainder(&mut w, r, b);
                w.write_bits(0, 8); // guard bits
                let bytes = w.finish();
                let mut reader = BitReader::new(&bytes);
                assert_eq!(read_remainder(&mut reader, b).unwrap(), r, "b={} r={}", b, r);
            }
        }
    }

    #[test]
    fn rice_si_handles_skewed_gaps() {
        // one huge gap among thousands of tiny ones
        let mut postings: Vec<u64> = (0..5000u64).map(|i| i * 2).collect();
        postings.push(1 << 45);
        postings.push((1 << 45) + 3);
        let mut out = Vec::new();
        encode_rice(&postings, true, &mut out);
        let mut restored = Vec::new();
        decode_rice(&out, postings.len(), true, &mut restored).unwrap();
        assert_eq!(restored, postings);
    }
}
