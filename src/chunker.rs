//! Image chunking
//!
//! Converts a sparse image into the sequence of row packets written to the
//! target's data endpoint. Image blocks are streams of 3-byte commands, each
//! followed by a zero padding byte. Every command covers an address pair, so
//! a row holds `row_size / 2` commands, sent as packets of up to
//! `COMMANDS_PER_PACKET` commands prefixed by a framing byte of
//! `toggle | line`.
//!
//! Blocks must be supplied in ascending address order.

use crate::descriptor::{DescriptorError, FlashDescriptor};
use crate::protocol::{COMMANDS_PER_PACKET, PACKET_SIZE, TOGGLE_BIT, TRIPLET_PADDING, TRIPLET_SIZE};

/// A single write command
pub type Triplet = [u8; TRIPLET_SIZE];

const STRIDE: usize = TRIPLET_SIZE + TRIPLET_PADDING;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImageError {
    #[error("non-zero padding byte 0x{value:02x} at 0x{address:08x}")]
    Padding { address: u32, value: u8 },
    #[error("partial command of {len} bytes at 0x{address:08x}")]
    PartialTriplet { address: u32, len: usize },
    #[error("block at 0x{address:08x} follows block at 0x{previous:08x}")]
    Unordered { address: u32, previous: u32 },
}

/// One packet destined for the data endpoint
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RowPacket {
    /// Row this packet belongs to
    pub row: u32,
    /// Slot index within the row
    pub line: u8,
    data: [u8; PACKET_SIZE],
}

impl RowPacket {
    fn new(row: u32, line: u8, toggle: u8, commands: &[Triplet; COMMANDS_PER_PACKET]) -> Self {
        let mut data = [0u8; PACKET_SIZE];
        data[0] = toggle | line;
        for (d, c) in data[1..].chunks_mut(TRIPLET_SIZE).zip(commands.iter()) {
            d.copy_from_slice(c);
        }
        Self { row, line, data }
    }

    /// Framing byte, `toggle | line`
    pub fn header(&self) -> u8 {
        self.data[0]
    }

    pub fn toggle(&self) -> bool {
        self.data[0] & TOGGLE_BIT != 0
    }

    /// Commands carried by this packet
    pub fn commands(&self) -> impl Iterator<Item = &[u8]> {
        self.data[1..].chunks(TRIPLET_SIZE)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Check the padding of a block, returning the number of commands it holds
pub fn count_triplets(address: u32, bytes: &[u8]) -> Result<usize, ImageError> {
    for (i, c) in bytes.chunks(STRIDE).enumerate() {
        let offset = (i * STRIDE) as u32;
        match c.len() {
            STRIDE if c[TRIPLET_SIZE] != 0 => {
                return Err(ImageError::Padding {
                    address: address.wrapping_add(offset + TRIPLET_SIZE as u32),
                    value: c[TRIPLET_SIZE],
                })
            }
            // The trailing command may omit its padding byte
            STRIDE | TRIPLET_SIZE => (),
            len => {
                return Err(ImageError::PartialTriplet {
                    address: address.wrapping_add(offset),
                    len,
                })
            }
        }
    }

    Ok((bytes.len() + TRIPLET_PADDING) / STRIDE)
}

/// Position within the command stream of the current block
struct Cursor<B> {
    data: B,
    /// Erase commands preceding the block data
    fill: usize,
    /// Total commands including fill
    len: usize,
    group: usize,
    line: usize,
    toggle: u8,
}

impl<B: AsRef<[u8]>> Cursor<B> {
    fn command(&self, index: usize, erase: Triplet) -> Triplet {
        if index < self.fill {
            return erase;
        }

        let o = (index - self.fill) * STRIDE;
        let mut t = [0u8; TRIPLET_SIZE];
        t.copy_from_slice(&self.data.as_ref()[o..o + TRIPLET_SIZE]);
        t
    }
}

/// Lazy write plan over a sparse image
pub struct Chunker<I, B> {
    blocks: I,
    descriptor: FlashDescriptor,
    start: u32,
    previous: Option<u32>,
    cursor: Option<Cursor<B>>,
    done: bool,
}

impl<I, B> Chunker<I, B>
where
    I: Iterator<Item = (u32, B)>,
    B: AsRef<[u8]>,
{
    /// Create a chunker for the provided image, validating the descriptor geometry
    pub fn new<T>(descriptor: FlashDescriptor, image: T) -> Result<Self, DescriptorError>
    where
        T: IntoIterator<IntoIter = I, Item = (u32, B)>,
    {
        descriptor.validate()?;

        Ok(Self {
            blocks: image.into_iter(),
            descriptor,
            start: descriptor.starting_address() as u32,
            previous: None,
            cursor: None,
            done: false,
        })
    }

    /// Image address of the first programmable row
    pub fn starting_address(&self) -> u32 {
        self.start
    }

    fn erase(&self) -> Triplet {
        [self.descriptor.erase_value; TRIPLET_SIZE]
    }

    /// Load the next block at or above the starting address
    fn next_block(&mut self) -> Result<Option<Cursor<B>>, ImageError> {
        while let Some((address, data)) = self.blocks.next() {
            if let Some(previous) = self.previous {
                if address <= previous {
                    return Err(ImageError::Unordered { address, previous });
                }
            }
            self.previous = Some(address);

            if address < self.start {
                debug!("Skipping block at 0x{:08x} below programmable region", address);
                continue;
            }

            let count = count_triplets(address, data.as_ref())?;
            let fill = ((address - self.start) / self.descriptor.address_increment() / 2) as usize;

            // Rows made up entirely of fill are never sent
            let group = fill / self.descriptor.commands_per_row();

            debug!(
                "Block at 0x{:08x}: {} commands, {} fill, starting row {}",
                address,
                count,
                fill,
                self.descriptor.program_base_row as usize + group
            );

            return Ok(Some(Cursor {
                data,
                fill,
                len: fill + count,
                group,
                line: 0,
                toggle: 0,
            }));
        }

        Ok(None)
    }

    fn next_packet(&mut self) -> Result<Option<RowPacket>, ImageError> {
        let per_row = self.descriptor.commands_per_row();
        let base = self.descriptor.program_base_row;
        let erase = self.erase();

        loop {
            if self.cursor.is_none() {
                self.cursor = self.next_block()?;
            }

            let cursor = match self.cursor.as_mut() {
                Some(c) => c,
                None => return Ok(None),
            };

            let row_start = cursor.group * per_row;
            if row_start >= cursor.len {
                self.cursor = None;
                continue;
            }

            let row_end = (row_start + per_row).min(cursor.len);
            let slot_start = row_start + cursor.line * COMMANDS_PER_PACKET;
            if slot_start >= row_end {
                cursor.group += 1;
                cursor.line = 0;
                cursor.toggle = 0;
                continue;
            }

            let slot_end = (slot_start + COMMANDS_PER_PACKET).min(row_end);
            let mut commands = [erase; COMMANDS_PER_PACKET];
            for (c, i) in commands.iter_mut().zip(slot_start..slot_end) {
                *c = cursor.command(i, erase);
            }

            let line = cursor.line as u8;
            cursor.line += 1;

            if commands.iter().all(|c| *c == erase) {
                trace!("Eliding erased slot {} of row {}", line, base as usize + cursor.group);
                continue;
            }

            let p = RowPacket::new(base + cursor.group as u32, line, cursor.toggle, &commands);
            cursor.toggle ^= TOGGLE_BIT;

            return Ok(Some(p));
        }
    }
}

impl<I, B> Iterator for Chunker<I, B>
where
    I: Iterator<Item = (u32, B)>,
    B: AsRef<[u8]>,
{
    type Item = Result<RowPacket, ImageError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.next_packet() {
            Ok(Some(p)) => Some(Ok(p)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
