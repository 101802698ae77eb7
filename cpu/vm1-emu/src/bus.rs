//! 1801VM1 bus interface
//!
//! The CPU only ever performs word reads; byte reads are derived from the containing word, with odd
//! addresses selecting the high half. Word accesses ignore bit 0 of the address.

#[cfg(any(test, feature = "memorybus"))]
use crate::num::{GetBit, WordExt};
use bincode::{Decode, Encode};
use std::fmt::{Display, Formatter};

/// Access to an address that no memory or device responded to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusError {
    pub address: u16,
}

impl BusError {
    #[must_use]
    pub fn new(address: u16) -> Self {
        Self { address }
    }
}

impl Display for BusError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "bus error at {:06o}", self.address)
    }
}

pub type BusResult<T> = Result<T, BusError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum OpSize {
    Byte,
    Word,
}

impl OpSize {
    #[inline]
    #[must_use]
    pub fn from_bit(bit: bool) -> Self {
        if bit { Self::Byte } else { Self::Word }
    }

    #[inline]
    #[must_use]
    pub fn mask(self) -> u16 {
        match self {
            Self::Byte => 0x00FF,
            Self::Word => 0xFFFF,
        }
    }

    #[inline]
    #[must_use]
    pub fn sign_mask(self) -> u16 {
        match self {
            Self::Byte => 0x0080,
            Self::Word => 0x8000,
        }
    }

    #[inline]
    #[must_use]
    pub fn sign_bit(self, value: u16) -> bool {
        value & self.sign_mask() != 0
    }

    /// Largest positive two's complement value at this width
    #[inline]
    #[must_use]
    pub fn max_positive(self) -> u16 {
        self.sign_mask() - 1
    }
}

pub trait BusInterface {
    /// Read the word containing `address`.
    fn read_word(&mut self, address: u16) -> BusResult<u16>;

    /// Write a full word. Bit 0 of `address` is ignored.
    fn write_word(&mut self, address: u16, value: u16) -> BusResult<()>;

    /// Write a single byte; odd addresses target the high half of the word.
    fn write_byte(&mut self, address: u16, value: u8) -> BusResult<()>;

    /// Called by the RESET instruction to reinitialize external devices
    fn reset_devices(&mut self) {}
}

/// Flat 64KiB RAM bus where every address responds, except for an optional set of unmapped words
#[cfg(any(test, feature = "memorybus"))]
#[derive(Debug, Clone)]
pub struct InMemoryBus {
    pub memory: Box<[u16]>,
    pub unmapped: Vec<std::ops::RangeInclusive<u16>>,
    pub device_resets: u32,
}

#[cfg(any(test, feature = "memorybus"))]
impl InMemoryBus {
    #[must_use]
    pub fn new() -> Self {
        Self { memory: vec![0; 0x8000].into_boxed_slice(), unmapped: Vec::new(), device_resets: 0 }
    }

    /// Write consecutive words starting at `address`, bypassing the unmapped check.
    pub fn load(&mut self, address: u16, words: &[u16]) {
        for (i, &word) in words.iter().enumerate() {
            let word_address = address.wrapping_add(2 * i as u16);
            self.memory[usize::from(word_address >> 1)] = word;
        }
    }

    #[must_use]
    pub fn peek(&self, address: u16) -> u16 {
        self.memory[usize::from(address >> 1)]
    }

    fn check(&self, address: u16) -> BusResult<usize> {
        if self.unmapped.iter().any(|range| range.contains(&(address & !1))) {
            return Err(BusError::new(address));
        }

        Ok(usize::from(address >> 1))
    }
}

#[cfg(any(test, feature = "memorybus"))]
impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "memorybus"))]
impl BusInterface for InMemoryBus {
    fn read_word(&mut self, address: u16) -> BusResult<u16> {
        let idx = self.check(address)?;
        Ok(self.memory[idx])
    }

    fn write_word(&mut self, address: u16, value: u16) -> BusResult<()> {
        let idx = self.check(address)?;
        self.memory[idx] = value;
        Ok(())
    }

    fn write_byte(&mut self, address: u16, value: u8) -> BusResult<()> {
        let idx = self.check(address)?;
        let word = self.memory[idx];
        self.memory[idx] =
            if address.bit(0) { word.with_msb(value) } else { word.with_lsb(value) };
        Ok(())
    }

    fn reset_devices(&mut self) {
        self.device_resets += 1;
    }
}
