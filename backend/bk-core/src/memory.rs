//! RAM and ROM regions that can be mapped into the 16-bit address space

use crate::serialize::BINCODE_CONFIG;
use bincode::error::{DecodeError, EncodeError};
use vm1_emu::bus::OpSize;

/// A contiguous block of word-organized storage. Offsets are byte offsets from the start of the
/// memory; word accesses ignore bit 0.
pub trait Memory: Send {
    /// Size in bytes
    fn size(&self) -> usize;

    fn is_readable(&self) -> bool {
        true
    }

    fn is_writable(&self) -> bool;

    /// Read the word containing `offset`, or `None` if this memory does not respond.
    fn read(&self, offset: usize) -> Option<u16>;

    /// Returns whether the write was accepted. Byte writes to odd offsets target the high half.
    fn write(&mut self, size: OpSize, offset: usize, value: u16) -> bool;

    /// Opaque state for save states; memories with nothing to save return an empty buffer.
    fn save_state(&self) -> Result<Vec<u8>, EncodeError> {
        Ok(Vec::new())
    }

    fn load_state(&mut self, state: &[u8]) -> Result<(), DecodeError> {
        let _ = state;
        Ok(())
    }
}

fn words_from_le_bytes(bytes: &[u8]) -> Box<[u16]> {
    bytes
        .chunks(2)
        .map(|chunk| u16::from_le_bytes([chunk[0], chunk.get(1).copied().unwrap_or(0)]))
        .collect()
}

#[derive(Debug, Clone)]
pub struct Ram {
    words: Box<[u16]>,
}

impl Ram {
    /// Zero-filled RAM; odd sizes are rounded up to a whole word.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self { words: vec![0; size.div_ceil(2)].into_boxed_slice() }
    }

    /// RAM initialized from little-endian bytes
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self { words: words_from_le_bytes(bytes) }
    }

    #[must_use]
    pub fn words(&self) -> &[u16] {
        &self.words
    }
}

impl Memory for Ram {
    fn size(&self) -> usize {
        2 * self.words.len()
    }

    fn is_writable(&self) -> bool {
        true
    }

    fn read(&self, offset: usize) -> Option<u16> {
        self.words.get(offset >> 1).copied()
    }

    fn write(&mut self, size: OpSize, offset: usize, value: u16) -> bool {
        let Some(word) = self.words.get_mut(offset >> 1) else { return false };

        *word = match (size, offset & 1) {
            (OpSize::Word, _) => value,
            (OpSize::Byte, 0) => (*word & 0xFF00) | (value & 0x00FF),
            (OpSize::Byte, _) => (*word & 0x00FF) | (value << 8),
        };

        true
    }

    fn save_state(&self) -> Result<Vec<u8>, EncodeError> {
        bincode::encode_to_vec(&self.words, BINCODE_CONFIG)
    }

    fn load_state(&mut self, state: &[u8]) -> Result<(), DecodeError> {
        let (words, _): (Box<[u16]>, _) = bincode::decode_from_slice(state, BINCODE_CONFIG)?;
        if words.len() != self.words.len() {
            return Err(DecodeError::OtherString(format!(
                "RAM size mismatch: expected {} words, got {}",
                self.words.len(),
                words.len()
            )));
        }

        self.words = words;
        Ok(())
    }
}

/// Read-only memory. Writes are rejected, so a ROM alone at an address makes writes there fault.
#[derive(Debug, Clone)]
pub struct Rom {
    words: Box<[u16]>,
}

impl Rom {
    /// ROM image from little-endian bytes, as stored in BK ROM dumps
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self { words: words_from_le_bytes(bytes) }
    }

    #[must_use]
    pub fn from_words(words: &[u16]) -> Self {
        Self { words: words.into() }
    }
}

impl Memory for Rom {
    fn size(&self) -> usize {
        2 * self.words.len()
    }

    fn is_writable(&self) -> bool {
        false
    }

    fn read(&self, offset: usize) -> Option<u16> {
        self.words.get(offset >> 1).copied()
    }

    fn write(&mut self, _size: OpSize, _offset: usize, _value: u16) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ram_byte_lanes() {
        let mut ram = Ram::new(8);
        assert!(ram.write(OpSize::Word, 2, 0o123456));
        assert!(ram.write(OpSize::Byte, 3, 0o377));
        assert_eq!(ram.read(2), Some(0o177456));
        assert!(ram.write(OpSize::Byte, 2, 0o1));
        assert_eq!(ram.read(3), Some(0o177401));
        assert!(!ram.write(OpSize::Word, 8, 0));
        assert_eq!(ram.read(8), None);
    }

    #[test]
    fn ram_state_round_trip() {
        let mut ram = Ram::from_bytes(&[1, 2, 3, 4]);
        let state = ram.save_state().unwrap();

        ram.write(OpSize::Word, 0, 0);
        ram.load_state(&state).unwrap();
        assert_eq!(ram.words(), &[0x0201, 0x0403]);

        assert!(Ram::new(2).load_state(&state).is_err());
    }

    #[test]
    fn rom_rejects_writes() {
        let mut rom = Rom::from_bytes(&[0x34, 0x12, 0x56]);
        assert_eq!(rom.size(), 4);
        assert_eq!(rom.read(1), Some(0x1234));
        assert_eq!(rom.read(2), Some(0x0056));
        assert!(!rom.write(OpSize::Word, 0, 0));
        assert_eq!(rom.read(0), Some(0x1234));
    }
}
