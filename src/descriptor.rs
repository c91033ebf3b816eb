//! Flash descriptor decoding
//!
//! The `GetFlashInfo` response comes in two layouts, selected by its length.
//! 16-bit targets send `mode, program_length[2], base_row[2], row_size[2]`
//! while 24-bit targets prefix an explicit erase value and widen the base
//! row to three bytes. Multi-byte fields are big-endian, except the 24-bit
//! base row which is sent low byte first followed by the upper 16 bits.

use crate::protocol::{
    COMMANDS_PER_PACKET, DEFAULT_ERASE_VALUE, FLASH_INFO_LEN_16, FLASH_INFO_LEN_24,
    MAX_LINES_PER_ROW,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DescriptorError {
    #[error("flash info response of {0} bytes is too short")]
    Length(usize),
    #[error("row size {0} is not a non-zero even number of addresses")]
    RowSize(u16),
    #[error("row of {0} packets exceeds the line counter range")]
    TooManyLines(usize),
    #[error("programmable region starts beyond the 32-bit address space (0x{0:x})")]
    StartOutOfRange(u64),
}

/// Width of row addresses used by the target
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum AddressingWidth {
    Bits16,
    Bits24,
}

/// Flash layout reported by the target, decoded once per session
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct FlashDescriptor {
    pub addressing_width: AddressingWidth,
    /// Value unprogrammed flash reads as
    pub erase_value: u8,
    /// Address units per word, as a power of two
    pub address_increment_exponent: u8,
    /// Data unit width in bytes
    pub word_size: u8,
    /// Bytes transmitted per row before the row is considered done
    pub program_row_length: u16,
    /// First programmable row
    pub program_base_row: u32,
    /// Address units per row
    pub row_size: u16,
}

fn be16(b: &[u8]) -> u16 {
    u16::from_be_bytes([b[0], b[1]])
}

impl FlashDescriptor {
    /// Decode a raw `GetFlashInfo` response
    pub fn decode(raw: &[u8]) -> Result<Self, DescriptorError> {
        if raw.len() < FLASH_INFO_LEN_16 {
            return Err(DescriptorError::Length(raw.len()));
        }

        let (addressing_width, erase_value, mut i) = if raw.len() == FLASH_INFO_LEN_24 {
            (AddressingWidth::Bits24, raw[0], 1)
        } else {
            (AddressingWidth::Bits16, DEFAULT_ERASE_VALUE, 0)
        };

        let mode = raw[i];
        i += 1;

        let program_row_length = be16(&raw[i..]);
        i += 2;

        let program_base_row = match addressing_width {
            AddressingWidth::Bits24 => {
                let v = raw[i] as u32 | (be16(&raw[i + 1..]) as u32) << 8;
                i += 3;
                v
            }
            AddressingWidth::Bits16 => {
                let v = be16(&raw[i..]) as u32;
                i += 2;
                v
            }
        };

        let row_size = be16(&raw[i..]);

        Ok(Self {
            addressing_width,
            erase_value,
            address_increment_exponent: mode >> 4,
            word_size: mode & 0x0F,
            program_row_length,
            program_base_row,
            row_size,
        })
    }

    /// Address units each command triplet advances by
    pub fn address_increment(&self) -> u32 {
        1 << self.address_increment_exponent
    }

    /// Command triplets per row, each command covering an address pair
    pub fn commands_per_row(&self) -> usize {
        self.row_size as usize / 2
    }

    /// Packet slots per row, the last of which may be padded
    pub fn packets_per_row(&self) -> usize {
        (self.commands_per_row() + COMMANDS_PER_PACKET - 1) / COMMANDS_PER_PACKET
    }

    /// Image address of the first programmable row
    pub fn starting_address(&self) -> u64 {
        self.program_base_row as u64 * self.row_size as u64 * self.address_increment() as u64
    }

    /// Check the row geometry can be expressed by the packet framing
    pub fn validate(&self) -> Result<(), DescriptorError> {
        if self.row_size == 0 || self.row_size % 2 != 0 {
            return Err(DescriptorError::RowSize(self.row_size));
        }

        let lines = self.packets_per_row();
        if lines > MAX_LINES_PER_ROW {
            return Err(DescriptorError::TooManyLines(lines));
        }

        let start = self.starting_address();
        if start > u32::MAX as u64 {
            return Err(DescriptorError::StartOutOfRange(start));
        }

        Ok(())
    }
}
