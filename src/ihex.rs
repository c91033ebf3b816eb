//! Intel HEX image loading
//!
//! Produces the sparse image consumed by the chunker, with contiguous data
//! records merged into a single block.

use std::collections::BTreeMap;

/// Sparse image, blocks keyed by start address
pub type SparseImage = BTreeMap<u32, Vec<u8>>;

const DATA: u8 = 0x00;
const END_OF_FILE: u8 = 0x01;
const EXTENDED_SEGMENT_ADDRESS: u8 = 0x02;
const START_SEGMENT_ADDRESS: u8 = 0x03;
const EXTENDED_LINEAR_ADDRESS: u8 = 0x04;
const START_LINEAR_ADDRESS: u8 = 0x05;

const ADDRESS_SPACE: u64 = 1 << 32;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IhexError {
    #[error("line {0}: record does not start with ':'")]
    MissingStart(usize),
    #[error("line {0}: invalid hex ({1})")]
    Hex(usize, hex::FromHexError),
    #[error("line {0}: record length does not match contents")]
    Length(usize),
    #[error("line {0}: checksum mismatch")]
    Checksum(usize),
    #[error("line {0}: unsupported record type 0x{1:02x}")]
    RecordType(usize, u8),
    #[error("line {0}: data at 0x{1:08x} overlaps a previous record")]
    Overlap(usize, u32),
    #[error("line {0}: data runs past the end of the 32-bit address space")]
    AddressOverflow(usize),
    #[error("missing end of file record")]
    MissingEof,
}

/// Parse Intel HEX text into a sparse image
pub fn parse(text: &str) -> Result<SparseImage, IhexError> {
    let mut image = SparseImage::new();
    let mut base = 0u32;
    // Start and end of the block being extended
    let mut current: Option<(u32, u64)> = None;

    for (n, line) in text.lines().enumerate() {
        let n = n + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if !line.starts_with(':') {
            return Err(IhexError::MissingStart(n));
        }

        let r = hex::decode(&line[1..]).map_err(|e| IhexError::Hex(n, e))?;
        if r.len() < 5 || r.len() != r[0] as usize + 5 {
            return Err(IhexError::Length(n));
        }

        if r.iter().fold(0u8, |a, b| a.wrapping_add(*b)) != 0 {
            return Err(IhexError::Checksum(n));
        }

        let offset = u16::from_be_bytes([r[1], r[2]]) as u32;
        let data = &r[4..r.len() - 1];

        match r[3] {
            DATA if data.is_empty() => (),
            DATA => {
                let address = base.wrapping_add(offset);
                let end = address as u64 + data.len() as u64;
                if end > ADDRESS_SPACE {
                    return Err(IhexError::AddressOverflow(n));
                }

                // Either a block running into this record, or one starting inside it
                let below = image
                    .range(..=address)
                    .next_back()
                    .map_or(false, |(s, b)| *s as u64 + b.len() as u64 > address as u64);
                let above = image
                    .range(address..)
                    .next()
                    .map_or(false, |(s, _)| (*s as u64) < end);
                if below || above {
                    return Err(IhexError::Overlap(n, address));
                }

                match current {
                    Some((start, e)) if e == address as u64 => {
                        if let Some(b) = image.get_mut(&start) {
                            b.extend_from_slice(data);
                        }
                        current = Some((start, end));
                    }
                    _ => {
                        image.insert(address, data.to_vec());
                        current = Some((address, end));
                    }
                }
            }
            END_OF_FILE => return Ok(image),
            EXTENDED_SEGMENT_ADDRESS if data.len() == 2 => {
                base = (u16::from_be_bytes([data[0], data[1]]) as u32) << 4;
            }
            EXTENDED_LINEAR_ADDRESS if data.len() == 2 => {
                base = (u16::from_be_bytes([data[0], data[1]]) as u32) << 16;
            }
            START_SEGMENT_ADDRESS | START_LINEAR_ADDRESS => {
                trace!("Ignoring start address record on line {}", n);
            }
            EXTENDED_SEGMENT_ADDRESS | EXTENDED_LINEAR_ADDRESS => {
                return Err(IhexError::Length(n));
            }
            t => return Err(IhexError::RecordType(n, t)),
        }
    }

    Err(IhexError::MissingEof)
}
