use crate::bus::OpSize;
use crate::num::{GetBit, WordExt};
use bincode::{Decode, Encode};
use std::fmt::{Display, Formatter};

pub const SP: usize = 6;
pub const PC: usize = 7;

pub const RESET_PSW: u16 = 0o340;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub struct ProcessorStatus {
    pub carry: bool,
    pub overflow: bool,
    pub zero: bool,
    pub negative: bool,
    // Trace trap after every instruction
    pub trace: bool,
    // Bits 5-6 have no function on the 1801VM1 but are stored and read back
    pub spare: u8,
    // Masks IRQ2, IRQ3 and vectored interrupts
    pub priority: bool,
    // Masks all hardware interrupts
    pub halt: bool,
    // Masks the IRQ1 halt request line
    pub irq1_mask: bool,
}

impl ProcessorStatus {
    #[must_use]
    pub fn low_byte(self) -> u8 {
        u16::from(self).lsb()
    }

    /// Replace bits 0-7, leaving the H and M bits alone.
    pub fn set_low_byte(&mut self, value: u8) {
        *self = Self::from(u16::from(*self).with_lsb(value));
    }

    pub(crate) fn set_nz(&mut self, size: OpSize, value: u16) {
        self.negative = size.sign_bit(value);
        self.zero = value & size.mask() == 0;
    }
}

impl From<u16> for ProcessorStatus {
    fn from(value: u16) -> Self {
        Self {
            carry: value.bit(0),
            overflow: value.bit(1),
            zero: value.bit(2),
            negative: value.bit(3),
            trace: value.bit(4),
            spare: ((value >> 5) & 3) as u8,
            priority: value.bit(7),
            halt: value.bit(8),
            irq1_mask: value.bit(10),
        }
    }
}

impl From<ProcessorStatus> for u16 {
    fn from(value: ProcessorStatus) -> Self {
        (u16::from(value.irq1_mask) << 10)
            | (u16::from(value.halt) << 8)
            | (u16::from(value.priority) << 7)
            | (u16::from(value.spare & 3) << 5)
            | (u16::from(value.trace) << 4)
            | (u16::from(value.negative) << 3)
            | (u16::from(value.zero) << 2)
            | (u16::from(value.overflow) << 1)
            | u16::from(value.carry)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Encode, Decode)]
pub struct Registers {
    // R0-R7; R6 is the stack pointer and R7 is the program counter
    pub gpr: [u16; 8],
    pub psw: ProcessorStatus,
}

impl Registers {
    #[inline]
    #[must_use]
    pub fn pc(&self) -> u16 {
        self.gpr[PC]
    }

    #[inline]
    #[must_use]
    pub fn sp(&self) -> u16 {
        self.gpr[SP]
    }

    /// Write the low `size` bits of a register. Byte writes leave the high byte unchanged.
    pub(crate) fn write(&mut self, register: u8, size: OpSize, value: u16) {
        let register = usize::from(register);
        self.gpr[register] = match size {
            OpSize::Byte => self.gpr[register].with_lsb(value as u8),
            OpSize::Word => value,
        };
    }
}

impl Display for Registers {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (i, value) in self.gpr.iter().enumerate() {
            write!(f, "R{i}={value:06o} ")?;
        }
        write!(f, "PSW={:06o}", u16::from(self.psw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn psw_round_trip_drops_unimplemented_bits() {
        for value in [0_u16, 0o340, 0o377, 0o400, 0o2000, 0o177777] {
            let psw = ProcessorStatus::from(value);
            assert_eq!(u16::from(psw), value & 0o2777, "value {value:06o}");
        }
    }

    #[test]
    fn set_low_byte_preserves_high_flags() {
        let mut psw = ProcessorStatus::from(0o2400);
        psw.set_low_byte(0o17);
        assert_eq!(u16::from(psw), 0o2417);
    }

    #[test]
    fn byte_register_write_keeps_high_byte() {
        let mut registers = Registers::default();
        registers.gpr[3] = 0o123456;
        registers.write(3, OpSize::Byte, 0o177777);
        assert_eq!(registers.gpr[3], 0o123777);
        registers.write(3, OpSize::Word, 0o1);
        assert_eq!(registers.gpr[3], 0o1);
    }
}
