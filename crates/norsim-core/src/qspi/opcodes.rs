//! QSPI command opcodes
//!
//! The opcode byte values are the wire contract with the flash interface
//! and must match bit for bit.

use bitflags::bitflags;
use serde::Deserialize;

// ============================================================================
// Write commands
// ============================================================================

/// Program one word (issues the program unlock sequence)
pub const PROGRAM_WORD: u8 = 0xF2;
/// Single bus write of one word, no unlock sequence
pub const WRITE_THROUGH: u8 = 0xF8;
/// Address followed by a stalled burst of words to program
pub const PAGE_PROGRAM: u8 = 0x02;

// ============================================================================
// Erase commands
// ============================================================================

/// Erase the sector containing the address
pub const ERASE_SECTOR: u8 = 0xD8;
/// Erase the whole array (no address phase)
pub const ERASE_CHIP: u8 = 0x60;

// ============================================================================
// Read commands
// ============================================================================

/// Fast read, 20 stall cycles between address and data
pub const FAST_READ: u8 = 0x0B;
/// Slow read, data follows the address directly
pub const SLOW_READ: u8 = 0x03;
/// Echo the low half of the address back as data
pub const LOOPBACK: u8 = 0xFA;

// ============================================================================
// Control
// ============================================================================

/// Enter verify mode
pub const ENTER_VERIFY: u8 = 0xFB;
/// Reset the flash to read-array mode
pub const RESET: u8 = 0xF0;

/// Stall cycles of a fast read
pub const FAST_READ_STALL: u32 = 20;
/// Stall cycles between the address and the payload of a page program
pub const PAGE_PROGRAM_STALL: u32 = 16;

bitflags! {
    /// Phases following the opcode in a frame
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FrameFlags: u8 {
        /// 32-bit address, eight quad cycles
        const ADDRESS = 1 << 0;
        /// Exactly one payload word
        const PAYLOAD = 1 << 1;
        /// Payload words until the frame ends
        const STREAM  = 1 << 2;
        /// Data words driven by the target
        const READ    = 1 << 3;

        /// Any host to target data
        const WRITE = Self::PAYLOAD.bits() | Self::STREAM.bits();
    }
}

/// Lanes used for the opcode phase
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lanes {
    /// One bit per cycle on `sio[0]`
    #[default]
    Single,
    /// One nibble per cycle
    Quad,
}

impl Lanes {
    /// Clock cycles to transfer one opcode byte
    pub const fn opcode_cycles(&self) -> u32 {
        match self {
            Self::Single => 8,
            Self::Quad => 2,
        }
    }
}

/// A QSPI command
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QspiCommand {
    /// [`PROGRAM_WORD`]
    ProgramWord,
    /// [`WRITE_THROUGH`]
    WriteThrough,
    /// [`PAGE_PROGRAM`]
    PageProgram,
    /// [`ERASE_SECTOR`]
    EraseSector,
    /// [`ERASE_CHIP`]
    EraseChip,
    /// [`FAST_READ`]
    FastRead,
    /// [`SLOW_READ`]
    SlowRead,
    /// [`LOOPBACK`]
    Loopback,
    /// [`ENTER_VERIFY`]
    EnterVerify,
    /// [`RESET`]
    Reset,
}

/// Wire description of a command
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    /// The command
    pub command: QspiCommand,
    /// Opcode byte
    pub opcode: u8,
    /// Short name for logs
    pub name: &'static str,
    /// Phases after the opcode
    pub flags: FrameFlags,
    /// Clock cycles between the address and the data phase
    pub stall: u32,
}

const fn spec(
    command: QspiCommand,
    opcode: u8,
    name: &'static str,
    flags: FrameFlags,
    stall: u32,
) -> CommandSpec {
    CommandSpec {
        command,
        opcode,
        name,
        flags,
        stall,
    }
}

/// Every command, in [`QspiCommand`] declaration order
pub const COMMANDS: &[CommandSpec] = &[
    spec(
        QspiCommand::ProgramWord,
        PROGRAM_WORD,
        "program word",
        FrameFlags::ADDRESS.union(FrameFlags::PAYLOAD),
        0,
    ),
    spec(
        QspiCommand::WriteThrough,
        WRITE_THROUGH,
        "write through",
        FrameFlags::ADDRESS.union(FrameFlags::PAYLOAD),
        0,
    ),
    spec(
        QspiCommand::PageProgram,
        PAGE_PROGRAM,
        "page program",
        FrameFlags::ADDRESS.union(FrameFlags::STREAM),
        PAGE_PROGRAM_STALL,
    ),
    spec(
        QspiCommand::EraseSector,
        ERASE_SECTOR,
        "erase sector",
        FrameFlags::ADDRESS,
        0,
    ),
    spec(
        QspiCommand::EraseChip,
        ERASE_CHIP,
        "erase chip",
        FrameFlags::empty(),
        0,
    ),
    spec(
        QspiCommand::FastRead,
        FAST_READ,
        "fast read",
        FrameFlags::ADDRESS.union(FrameFlags::READ),
        FAST_READ_STALL,
    ),
    spec(
        QspiCommand::SlowRead,
        SLOW_READ,
        "slow read",
        FrameFlags::ADDRESS.union(FrameFlags::READ),
        0,
    ),
    spec(
        QspiCommand::Loopback,
        LOOPBACK,
        "loopback",
        FrameFlags::ADDRESS.union(FrameFlags::READ),
        0,
    ),
    spec(
        QspiCommand::EnterVerify,
        ENTER_VERIFY,
        "enter verify",
        FrameFlags::empty(),
        0,
    ),
    spec(QspiCommand::Reset, RESET, "reset", FrameFlags::empty(), 0),
];

impl QspiCommand {
    /// Wire description
    pub fn spec(self) -> &'static CommandSpec {
        &COMMANDS[self as usize]
    }

    /// Opcode byte
    pub fn opcode(self) -> u8 {
        self.spec().opcode
    }

    /// Decode an opcode byte
    pub fn from_opcode(opcode: u8) -> Option<Self> {
        COMMANDS
            .iter()
            .find(|s| s.opcode == opcode)
            .map(|s| s.command)
    }

    /// Short name for logs
    pub fn name(self) -> &'static str {
        self.spec().name
    }

    /// Phases after the opcode
    pub fn flags(self) -> FrameFlags {
        self.spec().flags
    }

    /// Stall cycles before the data phase
    pub fn stall(self) -> u32 {
        self.spec().stall
    }

    /// The target drives data
    pub fn is_read(self) -> bool {
        self.flags().contains(FrameFlags::READ)
    }
}

impl std::fmt::Display for QspiCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:02X}h)", self.name(), self.opcode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_order() {
        for (i, s) in COMMANDS.iter().enumerate() {
            assert_eq!(s.command as usize, i, "{} out of place", s.name);
        }
    }

    #[test]
    fn test_opcode_lookup() {
        for s in COMMANDS {
            assert_eq!(QspiCommand::from_opcode(s.opcode), Some(s.command));
        }
        assert_eq!(QspiCommand::from_opcode(0x9F), None);
        assert_eq!(QspiCommand::FastRead.opcode(), 0x0B);
        assert_eq!(QspiCommand::Loopback.opcode(), 0xFA);
    }

    #[test]
    fn test_stalls() {
        assert_eq!(QspiCommand::FastRead.stall(), 20);
        assert_eq!(QspiCommand::SlowRead.stall(), 0);
        assert_eq!(QspiCommand::PageProgram.stall(), 16);
    }

    #[test]
    fn test_phases() {
        assert!(!QspiCommand::EraseChip.flags().contains(FrameFlags::ADDRESS));
        assert!(QspiCommand::EraseSector.flags().contains(FrameFlags::ADDRESS));
        assert!(QspiCommand::PageProgram.flags().intersects(FrameFlags::WRITE));
        assert!(QspiCommand::Loopback.is_read());
        assert!(!QspiCommand::Reset.is_read());
    }

    #[test]
    fn test_display() {
        assert_eq!(QspiCommand::FastRead.to_string(), "fast read (0Bh)");
    }
}
