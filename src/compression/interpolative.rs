//! Binary interpolative coding (Moffat et al.): the midpoint of the list is
//! coded in truncated binary within the bounds implied by its neighbours,
//! then both halves recurse. The standard variant tightens each bound by the
//! number of strictly monotone values that must fit between the endpoints;
//! the schema-independent variant uses the raw value range.

use super::bits::{BitReader, BitWriter, bit_length};
use super::vbyte;
use crate::core::error::{Error, Result};
use crate::core::types::Posting;

/// Truncated binary code of `v` in a range of `span` values.
fn write_in_range(w: &mut BitWriter, v: u64, span: u64) {
    debug_assert!(v < span);
    if span <= 1 {
        return;
    }
    let c = bit_length(span - 1);
    let threshold = (1u64 << c) - span;
    if v < threshold {
        w.write_bits(v, c - 1);
    } else {
        w.write_bits(v + threshold, c);
    }
}

fn read_in_range(r: &mut BitReader, span: u64) -> Result<u64> {
    if span <= 1 {
        return Ok(0);
    }
    let c = bit_length(span - 1);
    let threshold = (1u64 << c) - span;
    let head = r.read_bits(c - 1)?;
    if head < threshold {
        Ok(head)
    } else {
        let tail = r.read_bits(1)?;
        Ok(((head << 1) | tail) - threshold)
    }
}

fn encode_range(w: &mut BitWriter, values: &[u64], lo: u64, hi: u64, tight: bool) {
    if values.is_empty() {
        return;
    }
    let mid = values.len() / 2;
    let v = values[mid];
    // v must lie in [lo + mid, hi - (len - 1 - mid)] when bounds are tight
    let (low_bound, high_bound) = if tight {
        (lo + mid as u64, hi - (values.len() - 1 - mid) as u64)
    } else {
        (lo, hi)
    };
    write_in_range(w, v - low_bound, high_bound - low_bound + 1);
    if mid > 0 {
        encode_range(w, &values[..mid], lo, v - 1, tight);
    }
    if mid + 1 < values.len() {
        encode_range(w, &values[mid + 1..], v + 1, hi, tight);
    }
}

fn decode_range(
    r: &mut BitReader,
    out: &mut [u64],
    lo: u64,
    hi: u64,
    tight: bool,
) -> Result<()> {
    if out.is_empty() {
        return Ok(());
    }
    let mid = out.len() / 2;
    let (low_bound, high_bound) = if tight {
        let high = hi
            .checked_sub((out.len() - 1 - mid) as u64)
            .ok_or_else(|| Error::malformed("interpolative bounds collapsed"))?;
        (lo + mid as u64, high)
    } else {
        (lo, hi)
    };
    if high_bound < low_bound {
        return Err(Error::malformed("interpolative bounds collapsed"));
    }
    let v = low_bound + read_in_range(r, high_bound - low_bound + 1)?;
    out[mid] = v;
    let (left, right) = out.split_at_mut(mid);
    if !left.is_empty() {
        decode_range(r, left, lo, v - 1, tight)?;
    }
    if right.len() > 1 {
        decode_range(r, &mut right[1..], v + 1, hi, tight)?;
    }
    Ok(())
}

pub fn encode(postings: &[Posting], schema_independent: bool, out: &mut Vec<u8>) {
    vbyte::write_u64(postings[0], out);
    vbyte::write_u64(postings[postings.len() - 1] - postings[0], out);
    if postings.len() <= 2 {
        return;
    }
    let mut w = BitWriter::new();
    encode_range(
        &mut w,
        &postings[1..postings.len() - 1],
        postings[0] + 1,
        postings[postings.len() - 1] - 1,
        !schema_independent,
    );
    out.extend_from_slice(&w.finish());
}

pub fn decode(
    payload: &[u8],
    count: usize,
    schema_independent: bool,
    out: &mut Vec<Posting>,
) -> Result<()> {
    let (first, used_a) = vbyte::read_u64(payload)?;
    let (span, used_b) = vbyte::read_u64(&payload[used_a..])?;
    let last = first + span;
    if count == 1 {
        out.push(first);
        return Ok(());
    }
    if count == 2 {
        if span == 0 {
            return Err(Error::malformed("interpolative pair with zero span"));
        }
        out.push(first);
        out.push(last);
        return Ok(());
    }
    let mut interior = vec![0u64; count - 2];
    let mut r = BitReader::new(&payload[used_a + used_b..]);
    decode_range(&mut r, &mut interior, first + 1, last - 1, !schema_independent)?;
    out.push(first);
    out.extend_from_slice(&interior);
    out.push(last);
    Ok(())
}
