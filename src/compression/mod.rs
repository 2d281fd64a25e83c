//! Posting-list compression.
//!
//! Every compressed list is self-describing: one method-tag byte, then the
//! posting count as a vByte integer, then a codec-specific payload. The tag
//! values are fixed by the on-disk format and must never be renumbered.
//! Codecs may be mixed freely between segments within one index file.

pub mod bits;
pub mod gamma;
pub mod gubc;
pub mod interpolative;
pub mod llrun;
pub mod nibble;
pub mod pfordelta;
pub mod rice;
pub mod simple9;
pub mod varint;
pub mod vbyte;

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::Posting;

/// One-byte method tags. Gaps in the numbering belong to algorithms that
/// were retired without a decoder (LLRunMulti at 15) and are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CompressionMethod {
    Gamma = 1,
    Delta = 2,
    VByte = 3,
    Simple9 = 4,
    Interpolative = 5,
    Nibble = 6,
    LLRun = 7,
    Rice = 8,
    Golomb = 9,
    Gubc = 10,
    GubcIp = 11,
    PForDelta = 12,
    GroupVarInt = 13,
    None = 14,
    HuffmanDirect = 16,
    Huffman2 = 17,
    InterpolativeSi = 18,
    RiceSi = 19,
    Experimental = 20,
    Best = 21,
}

impl CompressionMethod {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<CompressionMethod> {
        use CompressionMethod::*;
        Some(match tag {
            1 => Gamma,
            2 => Delta,
            3 => VByte,
            4 => Simple9,
            5 => Interpolative,
            6 => Nibble,
            7 => LLRun,
            8 => Rice,
            9 => Golomb,
            10 => Gubc,
            11 => GubcIp,
            12 => PForDelta,
            13 => GroupVarInt,
            14 => None,
            16 => HuffmanDirect,
            17 => Huffman2,
            18 => InterpolativeSi,
            19 => RiceSi,
            20 => Experimental,
            21 => Best,
            _ => return Option::None,
        })
    }

    pub fn from_name(name: &str) -> Option<CompressionMethod> {
        use CompressionMethod::*;
        Some(match name.to_ascii_lowercase().as_str() {
            "gamma" => Gamma,
            "delta" => Delta,
            "vbyte" => VByte,
            "simple9" | "simple-9" => Simple9,
            "interpolative" => Interpolative,
            "nibble" => Nibble,
            "llrun" => LLRun,
            "rice" => Rice,
            "golomb" => Golomb,
            "gubc" => Gubc,
            "gubcip" => GubcIp,
            "pfordelta" | "pfor" => PForDelta,
            "groupvarint" | "group_varint" => GroupVarInt,
            "none" => None,
            "huffman_direct" | "huffmandirect" => HuffmanDirect,
            "huffman2" => Huffman2,
            "interpolative_si" => InterpolativeSi,
            "rice_si" => RiceSi,
            "experimental" => Experimental,
            "best" => Best,
            _ => return Option::None,
        })
    }
}

/// Method tag of a compressed stream.
pub fn method_of(compressed: &[u8]) -> Result<CompressionMethod> {
    let tag = *compressed
        .first()
        .ok_or_else(|| Error::malformed("empty compressed list"))?;
    CompressionMethod::from_tag(tag)
        .ok_or_else(|| Error::malformed(format!("unknown compression tag {}", tag)))
}

/// Posting count of a compressed stream, read from the common header.
pub fn count_of(compressed: &[u8]) -> Result<usize> {
    method_of(compressed)?;
    let (count, _) = vbyte::read_u64(&compressed[1..])?;
    Ok(count as usize)
}

fn check_input(postings: &[Posting]) -> Result<()> {
    if postings.is_empty() {
        return Err(Error::new(
            ErrorKind::InvalidArgument,
            "cannot compress an empty posting list".to_string(),
        ));
    }
    debug_assert!(postings.windows(2).all(|w| w[0] < w[1]));
    Ok(())
}

fn write_header(method: CompressionMethod, count: usize, out: &mut Vec<u8>) {
    out.push(method.tag());
    vbyte::write_u64(count as u64, out);
}

/// Compress with an explicit method. `Best` compresses with a candidate set
/// and returns the smallest stream, tagged with the winning codec.
pub fn compress_with(method: CompressionMethod, postings: &[Posting]) -> Result<Vec<u8>> {
    check_input(postings)?;
    if method == CompressionMethod::Best {
        return compress_best(postings);
    }
    let mut out = Vec::with_capacity(postings.len() / 2 + 16);
    write_header(method, postings.len(), &mut out);
    match method {
        CompressionMethod::Gamma => gamma::encode_gamma(postings, &mut out),
        CompressionMethod::Delta => gamma::encode_delta(postings, &mut out),
        CompressionMethod::VByte => vbyte::encode(postings, &mut out),
        CompressionMethod::Simple9 => simple9::encode(postings, &mut out)?,
        CompressionMethod::Interpolative => interpolative::encode(postings, false, &mut out),
        CompressionMethod::Nibble => nibble::encode(postings, &mut out)?,
        CompressionMethod::LLRun => llrun::encode_llrun(postings, &mut out),
        CompressionMethod::Rice => rice::encode_rice(postings, false, &mut out),
        CompressionMethod::Golomb => rice::encode_golomb(postings, &mut out),
        CompressionMethod::Gubc => gubc::encode_gubc(postings, &mut out),
        CompressionMethod::GubcIp => gubc::encode_gubcip(postings, &mut out),
        CompressionMethod::PForDelta => pfordelta::encode(postings, &mut out),
        CompressionMethod::GroupVarInt => varint::encode(postings, &mut out)?,
        CompressionMethod::None => {
            for &p in postings {
                out.extend_from_slice(&p.to_le_bytes());
            }
        }
        CompressionMethod::HuffmanDirect => llrun::encode_huffman_direct(postings, &mut out)?,
        CompressionMethod::Huffman2 => llrun::encode_huffman2(postings, &mut out)?,
        CompressionMethod::InterpolativeSi => interpolative::encode(postings, true, &mut out),
        CompressionMethod::RiceSi => rice::encode_rice(postings, true, &mut out),
        CompressionMethod::Experimental => {
            let inner = compress_best(postings)?;
            out.extend_from_slice(&inner);
        }
        CompressionMethod::Best => unreachable!(),
    }
    Ok(out)
}

/// Compress for index storage: the configured method, falling back to vByte
/// when the method cannot represent this particular list (oversized gaps in
/// the word-aligned codecs, large symbols in HuffmanDirect).
pub fn compress_for_index(method: CompressionMethod, postings: &[Posting]) -> Result<Vec<u8>> {
    match compress_with(method, postings) {
        Ok(stream) => Ok(stream),
        Err(e) if e.kind == ErrorKind::InvalidArgument && method != CompressionMethod::VByte => {
            log::debug!("{:?} cannot encode list, falling back to vByte: {}", method, e.context);
            compress_with(CompressionMethod::VByte, postings)
        }
        Err(e) => Err(e),
    }
}

/// Candidates tried by `compress_best`. All of them can represent any
/// monotone u64 list.
const BEST_CANDIDATES: [CompressionMethod; 5] = [
    CompressionMethod::VByte,
    CompressionMethod::Gamma,
    CompressionMethod::PForDelta,
    CompressionMethod::LLRun,
    CompressionMethod::Interpolative,
];

pub fn compress_best(postings: &[Posting]) -> Result<Vec<u8>> {
    check_input(postings)?;
    let mut best: Option<Vec<u8>> = None;
    for &method in BEST_CANDIDATES.iter() {
        let stream = compress_with(method, postings)?;
        if best.as_ref().is_none_or(|b| stream.len() < b.len()) {
            best = Some(stream);
        }
    }
    Ok(best.unwrap())
}

/// Decompress a self-describing stream into `out` (cleared first). Returns
/// the number of postings produced.
pub fn decompress_into(compressed: &[u8], out: &mut Vec<Posting>) -> Result<usize> {
    let method = method_of(compressed)?;
    let (count, header_len) = vbyte::read_u64(&compressed[1..])?;
    let count = count as usize;
    let payload = &compressed[1 + header_len..];
    out.clear();
    out.reserve(count);
    match method {
        CompressionMethod::Gamma => gamma::decode_gamma(payload, count, out)?,
        CompressionMethod::Delta => gamma::decode_delta(payload, count, out)?,
        CompressionMethod::VByte => vbyte::decode(payload, count, out)?,
        CompressionMethod::Simple9 => simple9::decode(payload, count, out)?,
        CompressionMethod::Interpolative => interpolative::decode(payload, count, false, out)?,
        CompressionMethod::Nibble => nibble::decode(payload, count, out)?,
        CompressionMethod::LLRun => llrun::decode_llrun(payload, count, out)?,
        CompressionMethod::Rice => rice::decode_rice(payload, count, false, out)?,
        CompressionMethod::Golomb => rice::decode_golomb(payload, count, out)?,
        CompressionMethod::Gubc => gubc::decode_gubc(payload, count, out)?,
        CompressionMethod::GubcIp => gubc::decode_gubcip(payload, count, out)?,
        CompressionMethod::PForDelta => pfordelta::decode(payload, count, out)?,
        CompressionMethod::GroupVarInt => varint::decode(payload, count, out)?,
        CompressionMethod::None => {
            if payload.len() < count * 8 {
                return Err(Error::malformed("truncated uncompressed posting list"));
            }
            for chunk in payload[..count * 8].chunks_exact(8) {
                out.push(u64::from_le_bytes(chunk.try_into().unwrap()));
            }
        }
        CompressionMethod::HuffmanDirect => llrun::decode_huffman_direct(payload, count, out)?,
        CompressionMethod::Huffman2 => llrun::decode_huffman2(payload, count, out)?,
        CompressionMethod::InterpolativeSi => interpolative::decode(payload, count, true, out)?,
        CompressionMethod::RiceSi => rice::decode_rice(payload, count, true, out)?,
        CompressionMethod::Experimental => {
            let inner_count = decompress_into(payload, out)?;
            if inner_count != count {
                return Err(Error::malformed("experimental stream count mismatch"));
            }
        }
        CompressionMethod::Best => {
            return Err(Error::malformed("BEST is not a storable method tag"));
        }
    }
    if out.len() != count {
        return Err(Error::malformed(format!(
            "decompressed {} postings, header says {}",
            out.len(),
            count
        )));
    }
    Ok(count)
}

/// Allocating variant of `decompress_into`.
pub fn decompress_any(compressed: &[u8]) -> Result<Vec<Posting>> {
    let mut out = Vec::new();
    decompress_into(compressed, &mut out)?;
    Ok(out)
}

/// Concatenate two delta-coded lists without fully decoding either. The
/// first gap of `second` is rewritten relative to `last_of_first`. Only
/// valid for the byte-aligned gap codec (vByte); other methods return
/// InvalidArgument.
pub fn merge_compressed_lists(
    first: &[u8],
    second: &[u8],
    last_of_first: Posting,
) -> Result<Vec<u8>> {
    let method_a = method_of(first)?;
    let method_b = method_of(second)?;
    if method_a != CompressionMethod::VByte || method_b != CompressionMethod::VByte {
        return Err(Error::new(
            ErrorKind::InvalidArgument,
            "compressed-list merging requires vByte streams".to_string(),
        ));
    }
    let (count_a, hdr_a) = vbyte::read_u64(&first[1..])?;
    let (count_b, hdr_b) = vbyte::read_u64(&second[1..])?;
    let payload_a = &first[1 + hdr_a..];
    let payload_b = &second[1 + hdr_b..];

    // first value of the second list is stored absolute; it becomes a gap
    let (first_of_b, first_len) = vbyte::read_u64(payload_b)?;
    if first_of_b <= last_of_first {
        return Err(Error::malformed(
            "second list starts at or before the end of the first",
        ));
    }

    let mut out = Vec::with_capacity(first.len() + second.len());
    write_header(CompressionMethod::VByte, (count_a + count_b) as usize, &mut out);
    out.extend_from_slice(payload_a);
    vbyte::write_u64(first_of_b - last_of_first, &mut out);
    out.extend_from_slice(&payload_b[first_len..]);
    Ok(out)
}

/// Front-code `plain` relative to `reference`: shared-prefix length, suffix
/// length, suffix bytes.
pub fn encode_front_coding(plain: &str, reference: &str, out: &mut Vec<u8>) -> usize {
    let shared = plain
        .bytes()
        .zip(reference.bytes())
        .take_while(|(a, b)| a == b)
        .count()
        .min(255);
    let suffix = &plain.as_bytes()[shared..];
    let start = out.len();
    out.push(shared as u8);
    out.push(suffix.len() as u8);
    out.extend_from_slice(suffix);
    out.len() - start
}

/// Counterpart to `encode_front_coding`. Returns the decoded string and the
/// number of bytes consumed.
pub fn decode_front_coding(compressed: &[u8], reference: &str) -> Result<(String, usize)> {
    if compressed.len() < 2 {
        return Err(Error::malformed("truncated front-coded term"));
    }
    let shared = compressed[0] as usize;
    let suffix_len = compressed[1] as usize;
    if compressed.len() < 2 + suffix_len || reference.len() < shared {
        return Err(Error::malformed("front-coded term out of range"));
    }
    let mut term = String::with_capacity(shared + suffix_len);
    term.push_str(&reference[..shared]);
    term.push_str(
        std::str::from_utf8(&compressed[2..2 + suffix_len])
            .map_err(|_| Error::malformed("front-coded term is not UTF-8"))?,
    );
    Ok((term, 2 + suffix_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Every codec that can represent arbitrary monotone u64 lists.
    const UNIVERSAL: [CompressionMethod; 14] = [
        CompressionMethod::Gamma,
        CompressionMethod::Delta,
        CompressionMethod::VByte,
        CompressionMethod::Interpolative,
        CompressionMethod::InterpolativeSi,
        CompressionMethod::Nibble,
        CompressionMethod::LLRun,
        CompressionMethod::Rice,
        CompressionMethod::RiceSi,
        CompressionMethod::Golomb,
        CompressionMethod::Gubc,
        CompressionMethod::GubcIp,
        CompressionMethod::PForDelta,
        CompressionMethod::None,
    ];

    fn random_monotone(rng: &mut StdRng, len: usize, avg_gap: u64) -> Vec<u64> {
        let mut list = Vec::with_capacity(len);
        let mut prev = 0u64;
        for _ in 0..len {
            prev += rng.gen_range(1..avg_gap * 2);
            list.push(prev);
        }
        list
    }

    #[test]
    fn round_trip_all_methods_small_gaps() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut len = 1usize;
        while len <= 50_000 {
            let mut avg = 1u64;
            while avg <= 1024 {
                let list = random_monotone(&mut rng, len, avg);
                for &method in UNIVERSAL.iter() {
                    let compressed = compress_with(method, &list).unwrap();
                    assert_eq!(method_of(&compressed).unwrap(), method);
                    let restored = decompress_any(&compressed).unwrap();
                    assert_eq!(restored, list, "method {:?} len {} avg {}", method, len, avg);
                }
                // word-aligned codecs handle these gap sizes too
                for method in [CompressionMethod::Simple9, CompressionMethod::GroupVarInt] {
                    let compressed = compress_with(method, &list).unwrap();
                    assert_eq!(decompress_any(&compressed).unwrap(), list);
                }
                avg *= 4;
            }
            len = len * 7 + 1;
        }
    }

    #[test]
    fn million_posting_list_round_trips() {
        let mut rng = StdRng::seed_from_u64(99);
        let list = random_monotone(&mut rng, 1_000_000, 64);
        for method in [CompressionMethod::VByte, CompressionMethod::PForDelta] {
            let compressed = compress_with(method, &list).unwrap();
            assert_eq!(decompress_any(&compressed).unwrap(), list, "{:?}", method);
        }
    }

    #[test]
    fn round_trip_large_offsets() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut list = Vec::new();
        let mut prev: u64 = 900_000_000_000; // near DOCUMENT_COUNT_OFFSET
        for _ in 0..5000 {
            prev += rng.gen_range(1..100_000);
            list.push(prev);
        }
        for &method in UNIVERSAL.iter() {
            let compressed = compress_with(method, &list).unwrap();
            assert_eq!(decompress_any(&compressed).unwrap(), list, "{:?}", method);
        }
    }

    #[test]
    fn round_trip_doc_level_postings() {
        use crate::core::types::make_doc_level_posting;
        let list: Vec<u64> = (0..4000u64)
            .map(|d| make_doc_level_posting(d * 3, (d % 40 + 1) as u32))
            .collect();
        for method in [
            CompressionMethod::Huffman2,
            CompressionMethod::VByte,
            CompressionMethod::LLRun,
        ] {
            let compressed = compress_with(method, &list).unwrap();
            assert_eq!(decompress_any(&compressed).unwrap(), list, "{:?}", method);
        }
    }

    #[test]
    fn huffman_direct_handles_small_gaps_only() {
        let small: Vec<u64> = (1..500u64).map(|i| i * 3).collect();
        let compressed = compress_with(CompressionMethod::HuffmanDirect, &small).unwrap();
        assert_eq!(decompress_any(&compressed).unwrap(), small);

        let big = vec![1u64, 100_000];
        assert!(compress_with(CompressionMethod::HuffmanDirect, &big).is_err());
        // the index path falls back instead of failing
        let stream = compress_for_index(CompressionMethod::HuffmanDirect, &big).unwrap();
        assert_eq!(decompress_any(&stream).unwrap(), big);
    }

    #[test]
    fn best_picks_a_decodable_winner() {
        let mut rng = StdRng::seed_from_u64(3);
        let list = random_monotone(&mut rng, 10_000, 16);
        let best = compress_with(CompressionMethod::Best, &list).unwrap();
        assert_eq!(decompress_any(&best).unwrap(), list);
        for &method in BEST_CANDIDATES.iter() {
            let candidate = compress_with(method, &list).unwrap();
            assert!(best.len() <= candidate.len());
        }
    }

    #[test]
    fn experimental_wraps_inner_stream() {
        let list: Vec<u64> = (1..2000u64).map(|i| i * 7).collect();
        let stream = compress_with(CompressionMethod::Experimental, &list).unwrap();
        assert_eq!(method_of(&stream).unwrap(), CompressionMethod::Experimental);
        assert_eq!(decompress_any(&stream).unwrap(), list);
    }

    #[test]
    fn unknown_tag_is_malformed_not_empty() {
        let err = decompress_any(&[99, 1, 5]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedInput);
    }

    #[test]
    fn truncated_stream_is_malformed() {
        let list: Vec<u64> = (1..100u64).collect();
        let mut stream = compress_with(CompressionMethod::Gamma, &list).unwrap();
        stream.truncate(stream.len() / 2);
        assert!(decompress_any(&stream).is_err());
    }

    #[test]
    fn merge_compressed_vbyte_lists() {
        let a: Vec<u64> = vec![5, 12, 142, 16526];
        let b: Vec<u64> = vec![20000, 20004, 21000];
        let ca = compress_with(CompressionMethod::VByte, &a).unwrap();
        let cb = compress_with(CompressionMethod::VByte, &b).unwrap();
        let merged = merge_compressed_lists(&ca, &cb, *a.last().unwrap()).unwrap();
        let mut expected = a.clone();
        expected.extend_from_slice(&b);
        assert_eq!(decompress_any(&merged).unwrap(), expected);
    }

    #[test]
    fn front_coding_round_trip() {
        let mut buf = Vec::new();
        encode_front_coding("retrieval", "retrieve", &mut buf);
        let (term, used) = decode_front_coding(&buf, "retrieve").unwrap();
        assert_eq!(term, "retrieval");
        assert_eq!(used, buf.len());
    }
}
