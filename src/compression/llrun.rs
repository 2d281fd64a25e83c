//! Huffman-based codecs.
//!
//! LLRun is γ with the unary length prefix replaced by a Huffman code over
//! gap bit lengths. HuffmanDirect codes small gap values (< 64) directly.
//! Huffman2 understands the document-level posting structure: the low
//! DOC_LEVEL_SHIFT bits (tf bucket) get their own Huffman code, the document
//! gap in the high bits is γ-coded.

use super::bits::{BitReader, BitWriter, bit_length};
use super::gamma::{read_gamma, write_gamma};
use super::vbyte;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{DOC_LEVEL_MAX_TF, DOC_LEVEL_SHIFT, Posting};

/// Longest code word we are willing to emit or decode.
const MAX_CODE_LENGTH: u32 = 32;

/// One symbol of a Huffman model.
#[derive(Debug, Clone, Copy, Default)]
pub struct HuffmanSymbol {
    pub id: u32,
    pub frequency: u64,
    pub code_length: u32,
    pub code: u32,
}

/// Fill in `code_length` for all symbols with non-zero frequency.
pub fn assign_code_lengths(symbols: &mut [HuffmanSymbol]) {
    use std::cmp::Reverse;
    use std::collections::BinaryHeap;

    let live: Vec<usize> = (0..symbols.len()).filter(|&i| symbols[i].frequency > 0).collect();
    if live.is_empty() {
        return;
    }
    if live.len() == 1 {
        symbols[live[0]].code_length = 1;
        return;
    }

    // parent-pointer tree over (leaves ++ internal nodes)
    let mut parents = vec![usize::MAX; live.len() * 2 - 1];
    let mut heap: BinaryHeap<Reverse<(u64, usize)>> = live
        .iter()
        .enumerate()
        .map(|(node, &sym)| Reverse((symbols[sym].frequency, node)))
        .collect();
    let mut next_node = live.len();
    while heap.len() > 1 {
        let Reverse((fa, a)) = heap.pop().unwrap();
        let Reverse((fb, b)) = heap.pop().unwrap();
        parents[a] = next_node;
        parents[b] = next_node;
        heap.push(Reverse((fa + fb, next_node)));
        next_node += 1;
    }

    for (node, &sym) in live.iter().enumerate() {
        let mut depth = 0;
        let mut cursor = node;
        while parents[cursor] != usize::MAX {
            cursor = parents[cursor];
            depth += 1;
        }
        symbols[sym].code_length = depth;
    }

    restrict_code_lengths(symbols, MAX_CODE_LENGTH);
}

/// Flatten the model if any code word exceeds `max_len`. Falls back to a
/// fixed-width code, which stays canonical and decodable.
pub fn restrict_code_lengths(symbols: &mut [HuffmanSymbol], max_len: u32) {
    let live = symbols.iter().filter(|s| s.frequency > 0).count();
    if symbols.iter().all(|s| s.code_length <= max_len) {
        return;
    }
    let fixed = bit_length(live as u64 - 1).max(1);
    for s in symbols.iter_mut() {
        if s.frequency > 0 {
            s.code_length = fixed;
        }
    }
}

/// Compute the canonical code for every symbol with a code length, assigning
/// codes in (length, id) order.
pub fn assign_canonical_codes(symbols: &mut [HuffmanSymbol]) {
    let mut order: Vec<usize> = (0..symbols.len()).filter(|&i| symbols[i].code_length > 0).collect();
    order.sort_by_key(|&i| (symbols[i].code_length, symbols[i].id));
    let mut code = 0u64;
    let mut prev_len = 0u32;
    for &i in &order {
        code <<= symbols[i].code_length - prev_len;
        symbols[i].code = code as u32;
        prev_len = symbols[i].code_length;
        code += 1;
    }
}

/// Canonical decoder table built from a code-length array.
struct CanonicalDecoder {
    // per length: (first code, first symbol slot), plus symbol ids in order
    first_code: [u32; (MAX_CODE_LENGTH + 1) as usize],
    count: [u32; (MAX_CODE_LENGTH + 1) as usize],
    offset: [u32; (MAX_CODE_LENGTH + 1) as usize],
    symbols: Vec<u32>,
}

impl CanonicalDecoder {
    fn from_lengths(lengths: &[u8]) -> Result<CanonicalDecoder> {
        let mut order: Vec<u32> = (0..lengths.len() as u32).filter(|&i| lengths[i as usize] > 0).collect();
        if order.is_empty() {
            return Err(Error::malformed("empty Huffman model"));
        }
        order.sort_by_key(|&i| (lengths[i as usize], i));

        let mut decoder = CanonicalDecoder {
            first_code: [0; (MAX_CODE_LENGTH + 1) as usize],
            count: [0; (MAX_CODE_LENGTH + 1) as usize],
            offset: [0; (MAX_CODE_LENGTH + 1) as usize],
            symbols: order.clone(),
        };
        for &sym in &order {
            let len = lengths[sym as usize] as u32;
            if len > MAX_CODE_LENGTH {
                return Err(Error::malformed("Huffman code length out of range"));
            }
            decoder.count[len as usize] += 1;
        }
        let mut code = 0u64;
        let mut slot = 0u32;
        for len in 1..=MAX_CODE_LENGTH as usize {
            decoder.first_code[len] = code as u32;
            decoder.offset[len] = slot;
            code = (code + decoder.count[len] as u64) << 1;
            slot += decoder.count[len];
        }
        Ok(decoder)
    }

    fn read_symbol(&self, r: &mut BitReader) -> Result<u32> {
        let mut code = 0u32;
        for len in 1..=MAX_CODE_LENGTH as usize {
            code = (code << 1) | r.read_bits(1)? as u32;
            let index = code.wrapping_sub(self.first_code[len]);
            if index < self.count[len] {
                return Ok(self.symbols[(self.offset[len] + index) as usize]);
            }
        }
        Err(Error::malformed("invalid Huffman code word"))
    }
}

/// Build a model over `alphabet_size` symbols from observed frequencies and
/// write the code-length header.
fn build_model(freqs: &[u64], out: &mut Vec<u8>) -> Vec<HuffmanSymbol> {
    let mut symbols: Vec<HuffmanSymbol> = freqs
        .iter()
        .enumerate()
        .map(|(id, &frequency)| HuffmanSymbol { id: id as u32, frequency, ..Default::default() })
        .collect();
    assign_code_lengths(&mut symbols);
    assign_canonical_codes(&mut symbols);
    for s in &symbols {
        out.push(s.code_length as u8);
    }
    symbols
}

pub fn encode_llrun(postings: &[Posting], out: &mut Vec<u8>) {
    let mut freqs = [0u64; 64];
    for pair in postings.windows(2) {
        freqs[(bit_length(pair[1] - pair[0]) - 1) as usize] += 1;
    }
    let symbols = build_model(&freqs, out);
    vbyte::write_u64(postings[0], out);
    let mut w = BitWriter::new();
    for pair in postings.windows(2) {
        let gap = pair[1] - pair[0];
        let len = bit_length(gap);
        let s = &symbols[(len - 1) as usize];
        w.write_bits(s.code as u64, s.code_length);
        if len > 1 {
            w.write_bits(gap & !(1u64 << (len - 1)), len - 1);
        }
    }
    out.extend_from_slice(&w.finish());
}

pub fn decode_llrun(payload: &[u8], count: usize, out: &mut Vec<Posting>) -> Result<()> {
    if payload.len() < 64 {
        return Err(Error::malformed("truncated LLRun model"));
    }
    let (first, used) = vbyte::read_u64(&payload[64..])?;
    out.push(first);
    if count == 1 {
        // a single posting leaves the model empty
        return Ok(());
    }
    let decoder = CanonicalDecoder::from_lengths(&payload[..64])?;
    let mut r = BitReader::new(&payload[64 + used..]);
    let mut current = first;
    for _ in 1..count {
        let len = decoder.read_symbol(&mut r)? + 1;
        let gap = if len == 1 { 1 } else { (1u64 << (len - 1)) | r.read_bits(len - 1)? };
        current += gap;
        out.push(current);
    }
    Ok(())
}

pub fn encode_huffman_direct(postings: &[Posting], out: &mut Vec<u8>) -> Result<()> {
    let mut freqs = [0u64; 64];
    for pair in postings.windows(2) {
        let gap = pair[1] - pair[0];
        if gap >= 64 {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("gap {} too large for direct Huffman coding", gap),
            ));
        }
        freqs[gap as usize] += 1;
    }
    let symbols = build_model(&freqs, out);
    vbyte::write_u64(postings[0], out);
    let mut w = BitWriter::new();
    for pair in postings.windows(2) {
        let s = &symbols[(pair[1] - pair[0]) as usize];
        w.write_bits(s.code as u64, s.code_length);
    }
    out.extend_from_slice(&w.finish());
    Ok(())
}

pub fn decode_huffman_direct(payload: &[u8], count: usize, out: &mut Vec<Posting>) -> Result<()> {
    if payload.len() < 64 {
        return Err(Error::malformed("truncated Huffman model"));
    }
    let (first, used) = vbyte::read_u64(&payload[64..])?;
    out.push(first);
    if count == 1 {
        return Ok(());
    }
    let decoder = CanonicalDecoder::from_lengths(&payload[..64])?;
    let mut r = BitReader::new(&payload[64 + used..]);
    let mut current = first;
    for _ in 1..count {
        current += decoder.read_symbol(&mut r)? as u64;
        out.push(current);
    }
    Ok(())
}

pub fn encode_huffman2(postings: &[Posting], out: &mut Vec<u8>) -> Result<()> {
    let tf_symbols = (DOC_LEVEL_MAX_TF + 1) as usize;
    let mut freqs = vec![0u64; tf_symbols];
    for pair in postings.windows(2) {
        if (pair[1] >> DOC_LEVEL_SHIFT) == (pair[0] >> DOC_LEVEL_SHIFT) {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "Huffman2 requires document-level postings with distinct doc ids".to_string(),
            ));
        }
        freqs[(pair[1] & DOC_LEVEL_MAX_TF) as usize] += 1;
    }
    freqs[(postings[0] & DOC_LEVEL_MAX_TF) as usize] += 1;
    let symbols = build_model(&freqs, out);

    vbyte::write_u64(postings[0] >> DOC_LEVEL_SHIFT, out);
    let mut w = BitWriter::new();
    let first_tf = &symbols[(postings[0] & DOC_LEVEL_MAX_TF) as usize];
    w.write_bits(first_tf.code as u64, first_tf.code_length);
    for pair in postings.windows(2) {
        let doc_gap = (pair[1] >> DOC_LEVEL_SHIFT) - (pair[0] >> DOC_LEVEL_SHIFT);
        write_gamma(&mut w, doc_gap);
        let s = &symbols[(pair[1] & DOC_LEVEL_MAX_TF) as usize];
        w.write_bits(s.code as u64, s.code_length);
    }
    out.extend_from_slice(&w.finish());
    Ok(())
}

pub fn decode_huffman2(payload: &[u8], count: usize, out: &mut Vec<Posting>) -> Result<()> {
    let tf_symbols = (DOC_LEVEL_MAX_TF + 1) as usize;
    if payload.len() < tf_symbols {
        return Err(Error::malformed("truncated Huffman2 model"));
    }
    let decoder = CanonicalDecoder::from_lengths(&payload[..tf_symbols])?;
    let (mut doc_id, used) = vbyte::read_u64(&payload[tf_symbols..])?;
    let mut r = BitReader::new(&payload[tf_symbols + used..]);
    let tf = decoder.read_symbol(&mut r)? as u64;
    out.push((doc_id << DOC_LEVEL_SHIFT) | tf);
    for _ in 1..count {
        doc_id += read_gamma(&mut r)?;
        let tf = decoder.read_symbol(&mut r)? as u64;
        out.push((doc_id << DOC_LEVEL_SHIFT) | tf);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_codes_are_prefix_free() {
        let mut symbols: Vec<HuffmanSymbol> = [50u64, 30, 10, 5, 3, 1, 1]
            .iter()
            .enumerate()
            .map(|(id, &frequency)| HuffmanSymbol { id: id as u32, frequency, ..Default::default() })
            .collect();
        assign_code_lengths(&mut symbols);
        assign_canonical_codes(&mut symbols);
        // frequent symbols never get longer codes
        for pair in symbols.windows(2) {
            assert!(pair[0].code_length <= pair[1].code_length);
        }
        // prefix-freedom
        for a in &symbols {
            for b in &symbols {
                if a.id == b.id {
                    continue;
                }
                let (short, long) = if a.code_length <= b.code_length { (a, b) } else { (b, a) };
                assert_ne!(long.code >> (long.code_length - short.code_length), short.code);
            }
        }
    }

    #[test]
    fn single_symbol_model_round_trips() {
        // constant gap: one live symbol
        let postings: Vec<u64> = (0..500u64).map(|i| i * 4).collect();
        let mut out = Vec::new();
        encode_llrun(&postings, &mut out);
        let mut restored = Vec::new();
        decode_llrun(&out, postings.len(), &mut restored).unwrap();
        assert_eq!(restored, postings);
    }

    #[test]
    fn llrun_is_smaller_than_gamma_on_skewed_lengths() {
        // gaps concentrated on two bit lengths
        let mut postings = Vec::new();
        let mut prev = 0u64;
        for i in 0..20_000u64 {
            prev += if i % 10 == 0 { 700 } else { 3 };
            postings.push(prev);
        }
        let mut llrun = Vec::new();
        encode_llrun(&postings, &mut llrun);
        let mut gamma = Vec::new();
        super::super::gamma::encode_gamma(&postings, &mut gamma);
        assert!(llrun.len() < gamma.len());
    }

    #[test]
    fn huffman2_rejects_repeated_doc_ids() {
        let postings = vec![(5u64 << DOC_LEVEL_SHIFT) | 1, (5u64 << DOC_LEVEL_SHIFT) | 2];
        let mut out = Vec::new();
        assert!(encode_huffman2(&postings, &mut out).is_err());
    }
}
