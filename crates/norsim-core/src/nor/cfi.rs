//! CFI query table
//!
//! Word offsets follow the standard CFI layout for an x16 device. The
//! system interface and geometry entries are derived from the configured
//! array geometry and busy times.

use norsim_kernel::time::{MS, US};
use norsim_kernel::SimTime;

use super::timing::{NorGeometry, NorTiming};

/// Number of words in the table
pub const CFI_TABLE_LEN: usize = 0x3C * 2;

// ============================================================================
// Query identification
// ============================================================================

/// "Q"
pub const QRY_Q: usize = 0x10;
/// "R"
pub const QRY_R: usize = 0x11;
/// "Y"
pub const QRY_Y: usize = 0x12;
/// Primary vendor command set (2 words)
pub const PRIMARY_CMD_SET: usize = 0x13;

// ============================================================================
// System interface
// ============================================================================

/// Vcc min, BCD volts
pub const VCC_MIN: usize = 0x1B;
/// Vcc max, BCD volts
pub const VCC_MAX: usize = 0x1C;
/// Typical single word program timeout, 2^n us
pub const TYP_WORD_PROGRAM: usize = 0x1F;
/// Typical buffer program timeout, 2^n us
pub const TYP_BUFFER_PROGRAM: usize = 0x20;
/// Typical block erase timeout, 2^n ms
pub const TYP_BLOCK_ERASE: usize = 0x21;
/// Typical chip erase timeout, 2^n ms
pub const TYP_CHIP_ERASE: usize = 0x22;
/// First of the four max-timeout multipliers (2^n times typical)
pub const MAX_TIMEOUT_BASE: usize = 0x23;

// ============================================================================
// Device geometry
// ============================================================================

/// Device size, 2^n bytes
pub const DEVICE_SIZE: usize = 0x27;
/// Interface description (2 words)
pub const INTERFACE: usize = 0x28;
/// Max bytes in buffer write, 2^n (2 words)
pub const MAX_BUFFER_BYTES: usize = 0x2A;
/// Number of erase block regions
pub const REGION_COUNT: usize = 0x2C;
/// Region 1 information (4 words)
pub const REGION_1: usize = 0x2D;

/// AMD/Fujitsu standard command set
pub const CMD_SET_AMD: u16 = 0x0002;
/// x16-only asynchronous interface
pub const INTERFACE_X16: u16 = 0x0001;

fn log2_ceil(value: u64) -> u16 {
    if value <= 1 {
        0
    } else {
        (64 - (value - 1).leading_zeros()) as u16
    }
}

fn log2_ceil_time(t: SimTime, unit: SimTime) -> u16 {
    log2_ceil(t.div_ceil(unit).max(1))
}

/// Read-only CFI identification table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CfiTable {
    words: Vec<u16>,
}

impl CfiTable {
    /// Build the table for a device
    pub fn new(geometry: &NorGeometry, timing: &NorTiming) -> Self {
        let mut t = vec![0u16; CFI_TABLE_LEN];

        t[QRY_Q] = 0x0051;
        t[QRY_R] = 0x0052;
        t[QRY_Y] = 0x0059;
        t[PRIMARY_CMD_SET] = CMD_SET_AMD;
        // 0x14..=0x1A: no extended query tables

        t[VCC_MIN] = 0x0027;
        t[VCC_MAX] = 0x0036;
        t[TYP_WORD_PROGRAM] = log2_ceil_time(timing.busy_program, US);
        t[TYP_BUFFER_PROGRAM] = log2_ceil_time(timing.busy_buffer_program, US);
        t[TYP_BLOCK_ERASE] = log2_ceil_time(timing.busy_erase_sector, MS);
        t[TYP_CHIP_ERASE] = log2_ceil_time(timing.busy_erase_chip, MS);
        for i in 0..4 {
            t[MAX_TIMEOUT_BASE + i] = 0x0003;
        }

        let bytes = u64::from(geometry.size) * 2;
        t[DEVICE_SIZE] = log2_ceil(bytes);
        t[INTERFACE] = INTERFACE_X16;
        t[MAX_BUFFER_BYTES] = log2_ceil(u64::from(geometry.write_buffer_words) * 2);
        t[REGION_COUNT] = 1;

        let blocks = geometry.size / geometry.erase_size.max(1);
        let block_units = geometry.erase_size * 2 / 256;
        let blocks_minus_one = blocks.saturating_sub(1);
        t[REGION_1] = (blocks_minus_one & 0xFF) as u16;
        t[REGION_1 + 1] = ((blocks_minus_one >> 8) & 0xFF) as u16;
        t[REGION_1 + 2] = (block_units & 0xFF) as u16;
        t[REGION_1 + 3] = ((block_units >> 8) & 0xFF) as u16;

        Self { words: t }
    }

    /// Word at `offset`; offsets past the table read as zero
    pub fn read(&self, offset: u32) -> u16 {
        self.words.get(offset as usize).copied().unwrap_or(0)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Always false; the table has a fixed size
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}
