//! Memory-mapped peripherals

use bincode::error::{DecodeError, EncodeError};
use vm1_emu::bus::OpSize;

/// A peripheral that owns one or more word-aligned register addresses. Several devices may map
/// the same address; reads from all of them are ORed together and writes reach all of them.
pub trait Device: Send {
    /// Used in log messages
    fn name(&self) -> &str;

    /// Register addresses this device responds to, queried once when the bus is built
    fn addresses(&self) -> Vec<u16>;

    /// Power-on and RESET instruction initialization
    fn init(&mut self, tick: u64);

    /// Read a register, or `None` if the device does not respond to reads at `address`.
    fn read(&mut self, tick: u64, address: u16) -> Option<u16>;

    /// Returns whether the write was accepted. Byte writes carry the byte in the low bits of
    /// `value`; an odd `address` selects the high half of the register.
    fn write(&mut self, tick: u64, size: OpSize, address: u16, value: u16) -> bool;

    fn save_state(&self) -> Result<Vec<u8>, EncodeError> {
        Ok(Vec::new())
    }

    fn load_state(&mut self, state: &[u8]) -> Result<(), DecodeError> {
        let _ = state;
        Ok(())
    }
}
