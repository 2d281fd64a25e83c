//! Nibble-aligned coding: the first nibble of every gap states how many
//! 4-bit payload nibbles follow (1..15, least significant nibble first).

use super::vbyte;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::Posting;

struct NibbleWriter {
    out: Vec<u8>,
    pending: Option<u8>,
}

impl NibbleWriter {
    fn new() -> Self {
        NibbleWriter { out: Vec::new(), pending: None }
    }

    fn push(&mut self, nibble: u8) {
        match self.pending.take() {
            None => self.pending = Some(nibble),
            Some(high) => self.out.push((high << 4) | nibble),
        }
    }

    fn finish(mut self) -> Vec<u8> {
        if let Some(high) = self.pending {
            self.out.push(high << 4);
        }
        self.out
    }
}

struct NibbleReader<'a> {
    data: &'a [u8],
    pos: usize,
    low_half: bool,
}

impl<'a> NibbleReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        NibbleReader { data, pos: 0, low_half: false }
    }

    fn next(&mut self) -> Result<u8> {
        if self.pos >= self.data.len() {
            return Err(Error::malformed("nibble stream exhausted"));
        }
        let byte = self.data[self.pos];
        if self.low_half {
            self.pos += 1;
            self.low_half = false;
            Ok(byte & 0x0F)
        } else {
            self.low_half = true;
            Ok(byte >> 4)
        }
    }
}

pub fn encode(postings: &[Posting], out: &mut Vec<u8>) -> Result<()> {
    vbyte::write_u64(postings[0], out);
    let mut w = NibbleWriter::new();
    for pair in postings.windows(2) {
        let gap = pair[1] - pair[0];
        let nibbles = ((super::bits::bit_length(gap) + 3) / 4).max(1);
        if nibbles > 15 {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "gap exceeds 60 bits, not nibble-codable".to_string(),
            ));
        }
        w.push(nibbles as u8);
        for i in 0..nibbles {
            w.push(((gap >> (4 * i)) & 0x0F) as u8);
        }
    }
    out.extend_from_slice(&w.finish());
    Ok(())
}

pub fn decode(payload: &[u8], count: usize, out: &mut Vec<Posting>) -> Result<()> {
    let (first, used) = vbyte::read_u64(payload)?;
    out.push(first);
    let mut r = NibbleReader::new(&payload[used..]);
    let mut current = first;
    for _ in 1..count {
        let nibbles = r.next()?;
        if nibbles == 0 {
            return Err(Error::malformed("zero-length nibble code"));
        }
        let mut gap = 0u64;
        for i in 0..nibbles {
            gap |= (r.next()? as u64) << (4 * i);
        }
        current += gap;
        out.push(current);
    }
    Ok(())
}
