
/// Size of a single write command, in bytes
pub const TRIPLET_SIZE: usize = 3;

/// Padding bytes following each triplet in the image stream
pub const TRIPLET_PADDING: usize = 1;

/// Number of command triplets carried by a single row packet
pub const COMMANDS_PER_PACKET: usize = 6;

/// Size of a row packet on the wire (framing byte + triplets)
pub const PACKET_SIZE: usize = 1 + COMMANDS_PER_PACKET * TRIPLET_SIZE;

/// Framing bit alternated on each packet sent within a row
pub const TOGGLE_BIT: u8 = 0x80;

/// Largest line counter that fits below the toggle bit
pub const MAX_LINES_PER_ROW: usize = TOGGLE_BIT as usize;

/// Data endpoint payload for the app-mode lock command
pub const APP_MODE_LOCK: [u8; 2] = *b"OK";

/// Flash info response length for targets using 24-bit addressing
pub const FLASH_INFO_LEN_24: usize = 9;

/// Flash info response length for targets using 16-bit addressing
pub const FLASH_INFO_LEN_16: usize = 7;

/// Erase value reported implicitly by 16-bit targets
pub const DEFAULT_ERASE_VALUE: u8 = 0xFF;

/// The two logical endpoints exposed by the target
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Endpoint {
    /// Command / status endpoint
    Command,
    /// Data / payload endpoint
    Data,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Reset the command channel, used once on connection
    Initialize = 0x00,

    /// Fetch the current execution mode (application or bootloader)
    GetExecutionMode = 0x03,

    /// Fetch the bootloader version
    GetVersion = 0x05,

    /// Fetch the flash layout descriptor
    GetFlashInfo = 0x0A,

    /// Lock the target back into application mode, with `APP_MODE_LOCK` as data
    LockAppMode = 0x0D,
}

impl Command {
    /// Look up a command by its wire opcode
    pub fn from_opcode(v: u8) -> Option<Self> {
        match v {
            0x00 => Some(Command::Initialize),
            0x03 => Some(Command::GetExecutionMode),
            0x05 => Some(Command::GetVersion),
            0x0A => Some(Command::GetFlashInfo),
            0x0D => Some(Command::LockAppMode),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_size() {
        assert_eq!(PACKET_SIZE, 19);
    }

    #[test]
    fn opcodes() {
        for c in &[
            Command::Initialize,
            Command::GetExecutionMode,
            Command::GetVersion,
            Command::GetFlashInfo,
            Command::LockAppMode,
        ] {
            assert_eq!(Command::from_opcode(*c as u8), Some(*c));
        }

        assert_eq!(Command::GetFlashInfo as u8, 0x0A);
        assert_eq!(Command::from_opcode(0x01), None);
        assert_eq!(APP_MODE_LOCK, [0x4F, 0x4B]);
    }
}
