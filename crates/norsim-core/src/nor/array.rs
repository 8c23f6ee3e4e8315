//! NOR flash storage array
//!
//! Programming can only clear bits (`mem[addr] &= data`); erasing sets a
//! whole erase block back to all-ones. Storage is sparse: only words that
//! differ from the erased value take memory, so full-size devices are cheap.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::ops::BitAnd;

use crate::error::{Error, Result};

/// A word lane of the array
pub trait Word: Copy + Eq + Debug + BitAnd<Output = Self> + 'static {
    /// Erased value: all ones
    const ERASED: Self;

    /// Truncating conversion from a bus value
    fn from_u64(value: u64) -> Self;

    /// Widening conversion to a bus value
    fn to_u64(self) -> u64;
}

macro_rules! impl_word {
    ($($t:ty),*) => {
        $(
            impl Word for $t {
                const ERASED: Self = <$t>::MAX;

                fn from_u64(value: u64) -> Self {
                    value as $t
                }

                fn to_u64(self) -> u64 {
                    u64::from(self)
                }
            }
        )*
    };
}

impl_word!(u8, u16, u32, u64);

/// Address of word `index` of a run starting at `base`, if it lies inside
/// an array of `size` words
pub fn word_addr(base: u32, index: usize, size: u32) -> Result<u32> {
    u32::try_from(index)
        .ok()
        .and_then(|i| base.checked_add(i))
        .filter(|addr| *addr < size)
        .ok_or(Error::Range {
            addr: u64::from(base).saturating_add(index as u64),
            size: u64::from(size),
        })
}

/// Word-addressed NOR array
#[derive(Debug, Clone)]
pub struct NorArray<W: Word> {
    size: u32,
    erase_size: u32,
    cells: BTreeMap<u32, W>,
}

impl<W: Word> NorArray<W> {
    /// Create an erased array of `size` words with `erase_size`-word blocks
    pub fn new(size: u32, erase_size: u32) -> Result<Self> {
        if size == 0 || erase_size == 0 {
            return Err(Error::Config(format!(
                "array size ({size}) and erase size ({erase_size}) must be non-zero"
            )));
        }
        if size % erase_size != 0 {
            return Err(Error::Config(format!(
                "array size ({size}) must be a multiple of the erase size ({erase_size})"
            )));
        }
        Ok(Self {
            size,
            erase_size: erase_size.min(size),
            cells: BTreeMap::new(),
        })
    }

    /// Size in words
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Erase block size in words
    pub fn erase_size(&self) -> u32 {
        self.erase_size
    }

    /// Erased value of one word
    pub fn erase_value(&self) -> W {
        W::ERASED
    }

    /// Fail with a range error unless `addr` is inside the array
    pub fn check(&self, addr: u32) -> Result<()> {
        if addr < self.size {
            Ok(())
        } else {
            Err(Error::Range {
                addr: u64::from(addr),
                size: u64::from(self.size),
            })
        }
    }

    /// Current content of `addr`
    pub fn read(&self, addr: u32) -> Result<W> {
        self.check(addr)?;
        Ok(self.cells.get(&addr).copied().unwrap_or(W::ERASED))
    }

    /// `mem[addr] &= data`
    pub fn program(&mut self, addr: u32, data: W) -> Result<()> {
        let value = self.read(addr)? & data;
        if value == W::ERASED {
            self.cells.remove(&addr);
        } else {
            self.cells.insert(addr, value);
        }
        Ok(())
    }

    /// Erase the aligned block containing `addr`
    pub fn erase(&mut self, addr: u32) -> Result<()> {
        self.check(addr)?;
        let base = addr - addr % self.erase_size;
        let end = base + self.erase_size;
        let mut upper = self.cells.split_off(&base);
        let mut rest = upper.split_off(&end);
        self.cells.append(&mut rest);
        Ok(())
    }

    /// Erase the whole array
    pub fn erase_all(&mut self) {
        self.cells.clear();
    }

    /// Number of words that are not erased
    pub fn programmed_words(&self) -> usize {
        self.cells.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_validates_geometry() {
        assert!(NorArray::<u16>::new(1024, 256).is_ok());
        assert!(matches!(
            NorArray::<u16>::new(1000, 256),
            Err(Error::Config(_))
        ));
        assert!(NorArray::<u16>::new(0, 256).is_err());
    }

    #[test]
    fn test_erased_content() {
        let a = NorArray::<u16>::new(64, 16).unwrap();
        assert_eq!(a.read(0).unwrap(), 0xFFFF);
        assert_eq!(a.read(63).unwrap(), 0xFFFF);
        let b = NorArray::<u8>::new(64, 16).unwrap();
        assert_eq!(b.erase_value(), 0xFF);
        let c = NorArray::<u64>::new(64, 16).unwrap();
        assert_eq!(c.erase_value(), u64::MAX);
    }

    #[test]
    fn test_program_only_clears_bits() {
        let mut a = NorArray::<u16>::new(64, 16).unwrap();
        a.program(5, 0x1234).unwrap();
        assert_eq!(a.read(5).unwrap(), 0x1234);
        // 0x4321 would need bits that are already 0
        a.program(5, 0x4321).unwrap();
        assert_eq!(a.read(5).unwrap(), 0x1234 & 0x4321);
        a.program(5, 0xFFFF).unwrap();
        assert_eq!(a.read(5).unwrap(), 0x1234 & 0x4321);
    }

    #[test]
    fn test_sector_erase_is_local() {
        let mut a = NorArray::<u16>::new(64, 16).unwrap();
        for addr in 0..64 {
            a.program(addr, 0).unwrap();
        }
        a.erase(20).unwrap();
        for addr in 0..64 {
            let expected = if (16..32).contains(&addr) { 0xFFFF } else { 0 };
            assert_eq!(a.read(addr).unwrap(), expected, "addr {addr}");
        }
        assert_eq!(a.programmed_words(), 48);
        a.erase_all();
        assert_eq!(a.programmed_words(), 0);
    }

    #[test]
    fn test_out_of_range() {
        let mut a = NorArray::<u16>::new(64, 16).unwrap();
        assert!(matches!(
            a.program(64, 0),
            Err(Error::Range { addr: 64, size: 64 })
        ));
        assert!(a.read(100).is_err());
        assert!(a.erase(64).is_err());
    }

    #[test]
    fn test_word_addr() {
        assert_eq!(word_addr(0x10, 3, 64).unwrap(), 0x13);
        assert!(matches!(
            word_addr(60, 4, 64),
            Err(Error::Range { addr: 64, size: 64 })
        ));
        assert!(matches!(
            word_addr(u32::MAX, 1, u32::MAX),
            Err(Error::Range { addr: 0x1_0000_0000, .. })
        ));
    }

    #[test]
    fn test_bus_conversions() {
        assert_eq!(u16::from_u64(0x1_ABCD), 0xABCD);
        assert_eq!(0xABu8.to_u64(), 0xAB);
    }

    #[test]
    fn test_large_sparse_array() {
        let mut a = NorArray::<u16>::new(64 * 1024 * 1024, 64 * 1024).unwrap();
        a.program(0x3FF_FFFF, 0x00AA).unwrap();
        assert_eq!(a.read(0x3FF_FFFF).unwrap(), 0x00AA);
        assert_eq!(a.programmed_words(), 1);
    }
}
