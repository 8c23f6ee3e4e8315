//! JEDEC/AMD command interpreter
//!
//! Bus write cycles are fed one at a time into [`CommandInterpreter::cycle`].
//! The interpreter walks the unlock sequences and reports what, if
//! anything, the completed sequence asks the device to do. A cycle that
//! does not match the expected transition silently returns the machine to
//! [`CommandState::Cycle1`].

// ============================================================================
// Unlock addresses
// ============================================================================

/// First unlock address
pub const UNLOCK_ADDR_1: u32 = 0x555;
/// Second unlock address
pub const UNLOCK_ADDR_2: u32 = 0x2AA;
/// CFI query entry address
pub const CFI_ADDR: u32 = 0x55;

// ============================================================================
// Command data bytes
// ============================================================================

/// First unlock cycle
pub const UNLOCK_1: u16 = 0xAA;
/// Second unlock cycle
pub const UNLOCK_2: u16 = 0x55;
/// Single word program
pub const PROGRAM: u16 = 0xA0;
/// Erase setup
pub const ERASE_SETUP: u16 = 0x80;
/// Chip erase confirm
pub const CHIP_ERASE: u16 = 0x10;
/// Sector erase confirm
pub const SECTOR_ERASE: u16 = 0x30;
/// Write to buffer
pub const WRITE_BUFFER: u16 = 0x25;
/// Program buffer to flash
pub const WRITE_BUFFER_CONFIRM: u16 = 0x29;
/// Enter CFI query mode
pub const CFI_QUERY: u16 = 0x98;
/// Reset / return to array read
pub const RESET: u16 = 0xF0;

/// State of the unlock sequence decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandState {
    /// Waiting for the first unlock cycle (or reset / CFI entry)
    #[default]
    Cycle1,
    /// First unlock cycle seen
    Cycle2,
    /// Unlocked; next cycle selects the command
    Select,
    /// Next cycle is the program address and data
    Program,
    /// Next cycle is the write buffer word count
    WriteBuffer,
    /// Loading write buffer words, then the confirm cycle
    WriteBufferData,
    /// Erase setup seen; expecting a new first unlock cycle
    Erase1,
    /// Expecting the second unlock cycle of the erase sequence
    Erase2,
    /// Next cycle selects chip or sector erase
    EraseSelect,
}

/// What a completed command asks the device to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandEffect {
    /// Nothing yet
    None,
    /// Program one word
    Program {
        /// Word address
        addr: u32,
        /// Data to AND into the array
        data: u16,
    },
    /// Program the words loaded into the write buffer
    ProgramBuffer(Vec<(u32, u16)>),
    /// Erase the block containing the address
    EraseSector(u32),
    /// Erase the whole array
    EraseChip,
    /// Return to array reads
    Reset,
    /// Switch reads to the CFI table
    EnterCfi,
}

#[derive(Debug, Clone, Default)]
struct BufferLoad {
    sector: u32,
    remaining: u32,
    words: Vec<(u32, u16)>,
}

/// Unlock-sequence state machine
#[derive(Debug, Clone)]
pub struct CommandInterpreter {
    state: CommandState,
    erase_size: u32,
    buffer_words: u32,
    buffer: BufferLoad,
}

impl CommandInterpreter {
    /// Create a decoder for a device with `erase_size`-word sectors and a
    /// `buffer_words`-word write buffer
    pub fn new(erase_size: u32, buffer_words: u32) -> Self {
        Self {
            state: CommandState::Cycle1,
            erase_size: erase_size.max(1),
            buffer_words,
            buffer: BufferLoad::default(),
        }
    }

    /// Current state
    pub fn state(&self) -> CommandState {
        self.state
    }

    /// Back to [`CommandState::Cycle1`], dropping any partial buffer load
    pub fn reset(&mut self) {
        self.state = CommandState::Cycle1;
        self.buffer = BufferLoad::default();
    }

    fn sector(&self, addr: u32) -> u32 {
        addr / self.erase_size
    }

    fn abort(&mut self) -> CommandEffect {
        log::debug!("[flash] command sequence aborted in {:?}", self.state);
        self.reset();
        CommandEffect::None
    }

    /// Feed one bus write cycle
    pub fn cycle(&mut self, addr: u32, data: u16) -> CommandEffect {
        log::trace!(
            "[flash] cmd cycle state={:?} addr={:X} data={:04X}",
            self.state,
            addr,
            data
        );
        let byte = data & 0xFF;

        match self.state {
            CommandState::Cycle1 => {
                if byte == RESET {
                    return CommandEffect::Reset;
                }
                if addr == CFI_ADDR && byte == CFI_QUERY {
                    return CommandEffect::EnterCfi;
                }
                if addr == UNLOCK_ADDR_1 && byte == UNLOCK_1 {
                    self.state = CommandState::Cycle2;
                }
                CommandEffect::None
            }
            CommandState::Cycle2 => {
                if addr == UNLOCK_ADDR_2 && byte == UNLOCK_2 {
                    self.state = CommandState::Select;
                    CommandEffect::None
                } else {
                    self.abort()
                }
            }
            CommandState::Select => {
                if addr == UNLOCK_ADDR_1 && byte == PROGRAM {
                    self.state = CommandState::Program;
                } else if byte == WRITE_BUFFER {
                    self.buffer = BufferLoad {
                        sector: self.sector(addr),
                        ..BufferLoad::default()
                    };
                    self.state = CommandState::WriteBuffer;
                } else if addr == UNLOCK_ADDR_1 && byte == ERASE_SETUP {
                    self.state = CommandState::Erase1;
                } else {
                    return self.abort();
                }
                CommandEffect::None
            }
            CommandState::Program => {
                self.state = CommandState::Cycle1;
                CommandEffect::Program { addr, data }
            }
            CommandState::WriteBuffer => {
                let count = u32::from(data) + 1;
                if self.sector(addr) != self.buffer.sector || count > self.buffer_words {
                    return self.abort();
                }
                self.buffer.remaining = count;
                self.state = CommandState::WriteBufferData;
                CommandEffect::None
            }
            CommandState::WriteBufferData => {
                if self.sector(addr) != self.buffer.sector {
                    return self.abort();
                }
                if self.buffer.remaining > 0 {
                    self.buffer.remaining -= 1;
                    self.buffer.words.push((addr, data));
                    return CommandEffect::None;
                }
                if byte != WRITE_BUFFER_CONFIRM {
                    return self.abort();
                }
                let words = std::mem::take(&mut self.buffer.words);
                self.reset();
                CommandEffect::ProgramBuffer(words)
            }
            CommandState::Erase1 => {
                if addr == UNLOCK_ADDR_1 && byte == UNLOCK_1 {
                    self.state = CommandState::Erase2;
                    CommandEffect::None
                } else {
                    self.abort()
                }
            }
            CommandState::Erase2 => {
                if addr == UNLOCK_ADDR_2 && byte == UNLOCK_2 {
                    self.state = CommandState::EraseSelect;
                    CommandEffect::None
                } else {
                    self.abort()
                }
            }
            CommandState::EraseSelect => {
                self.state = CommandState::Cycle1;
                if addr == UNLOCK_ADDR_1 && byte == CHIP_ERASE {
                    CommandEffect::EraseChip
                } else if byte == SECTOR_ERASE {
                    CommandEffect::EraseSector(addr)
                } else {
                    self.abort()
                }
            }
        }
    }
}

/// A complete command as the list of bus writes that issues it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandSequence {
    /// Single word program
    Program {
        /// Word address
        addr: u32,
        /// Data
        data: u16,
    },
    /// Erase the sector containing `addr`
    SectorErase {
        /// Any address inside the sector
        addr: u32,
    },
    /// Erase the whole chip
    ChipErase,
    /// Enter CFI query mode
    CfiEnter,
    /// Return to array reads
    Reset,
    /// Buffered program of consecutive words starting at `addr`
    WriteBuffer {
        /// First word address; all words must lie in one sector
        addr: u32,
        /// Words to program
        data: Vec<u16>,
    },
}

impl CommandSequence {
    /// The (address, data) bus writes for this command
    pub fn cycles(&self) -> Vec<(u32, u16)> {
        const UNLOCK: [(u32, u16); 2] = [(UNLOCK_ADDR_1, UNLOCK_1), (UNLOCK_ADDR_2, UNLOCK_2)];

        match self {
            Self::Program { addr, data } => {
                let mut v = UNLOCK.to_vec();
                v.push((UNLOCK_ADDR_1, PROGRAM));
                v.push((*addr, *data));
                v
            }
            Self::SectorErase { addr } => {
                let mut v = UNLOCK.to_vec();
                v.push((UNLOCK_ADDR_1, ERASE_SETUP));
                v.extend_from_slice(&UNLOCK);
                v.push((*addr, SECTOR_ERASE));
                v
            }
            Self::ChipErase => {
                let mut v = UNLOCK.to_vec();
                v.push((UNLOCK_ADDR_1, ERASE_SETUP));
                v.extend_from_slice(&UNLOCK);
                v.push((UNLOCK_ADDR_1, CHIP_ERASE));
                v
            }
            Self::CfiEnter => vec![(CFI_ADDR, CFI_QUERY)],
            Self::Reset => vec![(0, RESET)],
            Self::WriteBuffer { addr, data } => {
                let mut v = UNLOCK.to_vec();
                v.push((*addr, WRITE_BUFFER));
                v.push((*addr, data.len().saturating_sub(1) as u16));
                // A run past the top of the address space wraps to 0, leaves
                // the sector and aborts the load
                v.extend(data.iter().enumerate().map(|(i, w)| (addr.wrapping_add(i as u32), *w)));
                v.push((*addr, WRITE_BUFFER_CONFIRM));
                v
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(interp: &mut CommandInterpreter, seq: &CommandSequence) -> CommandEffect {
        let mut last = CommandEffect::None;
        for (addr, data) in seq.cycles() {
            last = interp.cycle(addr, data);
        }
        last
    }

    #[test]
    fn test_program_sequence() {
        let mut i = CommandInterpreter::new(0x10000, 256);
        let effect = run(
            &mut i,
            &CommandSequence::Program {
                addr: 0x1234,
                data: 0xBEEF,
            },
        );
        assert_eq!(
            effect,
            CommandEffect::Program {
                addr: 0x1234,
                data: 0xBEEF
            }
        );
        assert_eq!(i.state(), CommandState::Cycle1);
    }

    #[test]
    fn test_erase_sequences() {
        let mut i = CommandInterpreter::new(0x10000, 256);
        assert_eq!(
            run(&mut i, &CommandSequence::SectorErase { addr: 0x20000 }),
            CommandEffect::EraseSector(0x20000)
        );
        assert_eq!(i.state(), CommandState::Cycle1);
        assert_eq!(
            run(&mut i, &CommandSequence::ChipErase),
            CommandEffect::EraseChip
        );
        assert_eq!(i.state(), CommandState::Cycle1);
    }

    #[test]
    fn test_cfi_and_reset() {
        let mut i = CommandInterpreter::new(0x10000, 256);
        assert_eq!(run(&mut i, &CommandSequence::CfiEnter), CommandEffect::EnterCfi);
        // Reset is accepted at any address
        assert_eq!(i.cycle(0x1234, 0xF0), CommandEffect::Reset);
        // 0x98 anywhere but 0x55 is not a CFI entry
        assert_eq!(i.cycle(0x56, 0x98), CommandEffect::None);
    }

    #[test]
    fn test_intermediate_states() {
        let mut i = CommandInterpreter::new(0x10000, 256);
        i.cycle(0x555, 0xAA);
        assert_eq!(i.state(), CommandState::Cycle2);
        i.cycle(0x2AA, 0x55);
        assert_eq!(i.state(), CommandState::Select);
        i.cycle(0x555, 0x80);
        assert_eq!(i.state(), CommandState::Erase1);
        i.cycle(0x555, 0xAA);
        assert_eq!(i.state(), CommandState::Erase2);
        i.cycle(0x2AA, 0x55);
        assert_eq!(i.state(), CommandState::EraseSelect);
    }

    #[test]
    fn test_mismatch_returns_to_cycle1() {
        let mut i = CommandInterpreter::new(0x10000, 256);
        i.cycle(0x555, 0xAA);
        assert_eq!(i.cycle(0x2AB, 0x55), CommandEffect::None);
        assert_eq!(i.state(), CommandState::Cycle1);

        i.cycle(0x555, 0xAA);
        i.cycle(0x2AA, 0x55);
        assert_eq!(i.cycle(0x555, 0x42), CommandEffect::None);
        assert_eq!(i.state(), CommandState::Cycle1);

        // A wrong confirm in erase select does not erase
        for (a, d) in [(0x555, 0xAA), (0x2AA, 0x55), (0x555, 0x80), (0x555, 0xAA), (0x2AA, 0x55)] {
            i.cycle(a, d);
        }
        assert_eq!(i.cycle(0x555, 0x11), CommandEffect::None);
        assert_eq!(i.state(), CommandState::Cycle1);
    }

    #[test]
    fn test_write_buffer() {
        let mut i = CommandInterpreter::new(0x100, 16);
        let effect = run(
            &mut i,
            &CommandSequence::WriteBuffer {
                addr: 0x210,
                data: vec![1, 2, 3],
            },
        );
        assert_eq!(
            effect,
            CommandEffect::ProgramBuffer(vec![(0x210, 1), (0x211, 2), (0x212, 3)])
        );
        assert_eq!(i.state(), CommandState::Cycle1);
    }

    #[test]
    fn test_write_buffer_aborts() {
        // Too many words for the buffer
        let mut i = CommandInterpreter::new(0x100, 2);
        let seq = CommandSequence::WriteBuffer {
            addr: 0x10,
            data: vec![1, 2, 3],
        };
        assert_eq!(run(&mut i, &seq), CommandEffect::None);
        assert_eq!(i.state(), CommandState::Cycle1);

        // Data word outside the sector
        let mut i = CommandInterpreter::new(0x100, 16);
        for (a, d) in [(0x555, 0xAA), (0x2AA, 0x55), (0x10, 0x25), (0x10, 0)] {
            i.cycle(a, d);
        }
        assert_eq!(i.state(), CommandState::WriteBufferData);
        assert_eq!(i.cycle(0x110, 7), CommandEffect::None);
        assert_eq!(i.state(), CommandState::Cycle1);

        // Missing confirm
        let mut i = CommandInterpreter::new(0x100, 16);
        for (a, d) in [(0x555, 0xAA), (0x2AA, 0x55), (0x10, 0x25), (0x10, 0), (0x10, 7)] {
            i.cycle(a, d);
        }
        assert_eq!(i.cycle(0x10, 0x30), CommandEffect::None);
        assert_eq!(i.state(), CommandState::Cycle1);
    }

    #[test]
    fn test_write_buffer_at_top_of_address_space() {
        let mut i = CommandInterpreter::new(0x100, 16);
        let seq = CommandSequence::WriteBuffer {
            addr: u32::MAX - 1,
            data: vec![1, 2, 3],
        };
        let cycles = seq.cycles();
        assert_eq!(cycles[5], (u32::MAX, 2));
        assert_eq!(cycles[6], (0, 3));
        assert_eq!(run(&mut i, &seq), CommandEffect::None);
        assert_eq!(i.state(), CommandState::Cycle1);
    }

    #[test]
    fn test_sequence_cycles() {
        assert_eq!(
            CommandSequence::Program { addr: 7, data: 9 }.cycles(),
            vec![(0x555, 0xAA), (0x2AA, 0x55), (0x555, 0xA0), (7, 9)]
        );
        assert_eq!(
            CommandSequence::ChipErase.cycles(),
            vec![
                (0x555, 0xAA),
                (0x2AA, 0x55),
                (0x555, 0x80),
                (0x555, 0xAA),
                (0x2AA, 0x55),
                (0x555, 0x10)
            ]
        );
        assert_eq!(CommandSequence::CfiEnter.cycles(), vec![(0x55, 0x98)]);
    }
}
