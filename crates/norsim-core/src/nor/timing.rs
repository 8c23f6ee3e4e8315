//! NOR device geometry, timing parameters and behavioural policies

use serde::Deserialize;

use norsim_kernel::time::{ms, ns, us};
use norsim_kernel::SimTime;

/// Array geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NorGeometry {
    /// Size in 16-bit words
    pub size: u32,
    /// Erase block size in words
    pub erase_size: u32,
    /// Write buffer capacity in words
    pub write_buffer_words: u32,
}

impl Default for NorGeometry {
    fn default() -> Self {
        Self {
            size: 64 * 1024 * 1024,
            erase_size: 64 * 1024,
            write_buffer_words: 256,
        }
    }
}

/// Timing parameters of the device model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NorTiming {
    /// Write pulse width before address and data are latched
    pub t_wp: SimTime,
    /// Minimum chip-disable time after a write
    pub t_ceh: SimTime,
    /// Random access time
    pub t_acc: SimTime,
    /// Access time within an open page
    pub t_pacc: SimTime,
    /// Delay from command acceptance to ready/busy going low
    pub t_busy: SimTime,
    /// Page size in words; must be a power of two
    pub page_words: u32,
    /// Single word program
    pub busy_program: SimTime,
    /// Write buffer program
    pub busy_buffer_program: SimTime,
    /// Sector erase
    pub busy_erase_sector: SimTime,
    /// Chip erase
    pub busy_erase_chip: SimTime,
}

impl Default for NorTiming {
    fn default() -> Self {
        Self {
            t_wp: ns(35),
            t_ceh: ns(35),
            t_acc: ns(180),
            t_pacc: ns(25),
            t_busy: ns(90),
            page_words: 8,
            busy_program: us(60),
            busy_buffer_program: us(240),
            busy_erase_sector: ms(500),
            busy_erase_chip: ms(30_000),
        }
    }
}

impl NorTiming {
    /// Datasheet bus timing with operation times shortened for simulation
    pub fn accelerated() -> Self {
        Self {
            busy_program: us(1),
            busy_buffer_program: us(4),
            busy_erase_sector: us(20),
            busy_erase_chip: us(50),
            ..Self::default()
        }
    }

    /// Page number of `addr`
    pub fn page_of(&self, addr: u32) -> u32 {
        addr >> self.page_words.max(1).trailing_zeros()
    }
}

/// When the array content changes for program and erase commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationPolicy {
    /// At command acceptance; only ready/busy is delayed
    #[default]
    Immediate,
    /// When ready/busy returns high
    OnReady,
}

/// How reads are served while an operation is in progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadWhileBusy {
    /// Fail with an unimplemented-behaviour error (no status register emulation)
    #[default]
    Fail,
    /// Log a warning and return array data
    ArrayData,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_of() {
        let t = NorTiming::default();
        assert_eq!(t.page_of(7), 0);
        assert_eq!(t.page_of(8), 1);
        assert_eq!(t.page_of(0x83), 0x10);
    }

    #[test]
    fn test_accelerated_keeps_bus_timing() {
        let t = NorTiming::accelerated();
        assert_eq!(t.t_acc, NorTiming::default().t_acc);
        assert!(t.busy_erase_chip < NorTiming::default().busy_erase_sector);
    }
}
